//! Analyzer definitions and their declaration-time property checks.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::{AdapterError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalyzerKind {
    Identity,
    Delimiter,
    MultiDelimiter,
    Stem,
    Norm,
    Ngram,
    Text,
    Aql,
    Pipeline,
    Stopwords,
    Collation,
    Segmentation,
    Minhash,
    Classification,
    NearestNeighbors,
    Geojson,
    GeoS2,
    Geopoint,
    Wildcard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Feature {
    Frequency,
    Norm,
    Position,
}

#[derive(Debug, Clone, Copy)]
enum Shape {
    Str,
    Bool,
    Int,
    Number,
    Strings,
    OneOf(&'static [&'static str]),
    Object,
    /// Nested `{type, properties}` definition.
    Sub,
    SubList,
}

const CASE: &[&str] = &["lower", "upper", "none"];
const GEO_TYPE: &[&str] = &["shape", "centroid", "point"];

/// `(key, shape, required)` per analyzer type.
fn allowed(kind: AnalyzerKind) -> &'static [(&'static str, Shape, bool)] {
    use Shape::*;
    match kind {
        AnalyzerKind::Identity => &[],
        AnalyzerKind::Delimiter => &[("delimiter", Str, true)],
        AnalyzerKind::MultiDelimiter => &[("delimiters", Strings, true)],
        AnalyzerKind::Stem => &[("locale", Str, true)],
        AnalyzerKind::Norm => &[
            ("locale", Str, true),
            ("accent", Bool, false),
            ("case", OneOf(CASE), false),
        ],
        AnalyzerKind::Ngram => &[
            ("min", Int, true),
            ("max", Int, true),
            ("preserveOriginal", Bool, true),
            ("startMarker", Str, false),
            ("endMarker", Str, false),
            ("streamType", OneOf(&["binary", "utf8"]), false),
        ],
        AnalyzerKind::Text => &[
            ("locale", Str, true),
            ("accent", Bool, false),
            ("case", OneOf(CASE), false),
            ("stemming", Bool, false),
            ("edgeNgram", Object, false),
            ("stopwords", Strings, false),
            ("stopwordsPath", Str, false),
        ],
        AnalyzerKind::Aql => &[
            ("queryString", Str, true),
            ("collapsePositions", Bool, false),
            ("keepNull", Bool, false),
            ("batchSize", Int, false),
            ("memoryLimit", Int, false),
            ("returnType", OneOf(&["string", "number", "bool"]), false),
        ],
        AnalyzerKind::Pipeline => &[("pipeline", SubList, true)],
        AnalyzerKind::Stopwords => &[("stopwords", Strings, true), ("hex", Bool, false)],
        AnalyzerKind::Collation => &[("locale", Str, true)],
        AnalyzerKind::Segmentation => &[
            ("break", OneOf(&["all", "alpha", "graphic"]), false),
            ("case", OneOf(CASE), false),
        ],
        AnalyzerKind::Minhash => &[("analyzer", Sub, true), ("numHashes", Int, true)],
        AnalyzerKind::Classification => &[
            ("model_location", Str, true),
            ("top_k", Int, false),
            ("threshold", Number, false),
        ],
        AnalyzerKind::NearestNeighbors => &[("model_location", Str, true), ("top_k", Int, false)],
        AnalyzerKind::Geojson => &[
            ("type", OneOf(GEO_TYPE), false),
            ("options", Object, false),
            ("legacy", Bool, false),
        ],
        AnalyzerKind::GeoS2 => &[
            ("format", OneOf(&["latLngDouble", "latLngInt", "s2Point"]), false),
            ("type", OneOf(GEO_TYPE), false),
            ("options", Object, false),
        ],
        AnalyzerKind::Geopoint => &[
            ("latitude", Strings, false),
            ("longitude", Strings, false),
            ("options", Object, false),
        ],
        AnalyzerKind::Wildcard => &[("ngramSize", Int, true), ("analyzer", Sub, false)],
    }
}

fn check_properties(kind: AnalyzerKind, props: &Map<String, Value>, nested: bool) -> Result<()> {
    let whitelist = allowed(kind);
    for key in props.keys() {
        if !whitelist.iter().any(|(k, _, _)| *k == key.as_str()) {
            return Err(AdapterError::SchemaValidation(format!(
                "property `{key}` is not valid for {kind:?} analyzers"
            )));
        }
    }
    for (key, shape, required) in whitelist {
        match props.get(*key) {
            None if *required => {
                return Err(AdapterError::SchemaValidation(format!(
                    "{kind:?} analyzer requires property `{key}`"
                )))
            }
            None => {}
            Some(value) => check_shape(key, *shape, value, nested)?,
        }
    }
    Ok(())
}

fn check_shape(key: &str, shape: Shape, value: &Value, nested: bool) -> Result<()> {
    let ok = match shape {
        Shape::Str => value.is_string(),
        Shape::Bool => value.is_boolean(),
        Shape::Int => value.is_u64(),
        Shape::Number => value.is_number(),
        Shape::Strings => value
            .as_array()
            .map_or(false, |a| a.iter().all(Value::is_string)),
        Shape::OneOf(options) => value.as_str().map_or(false, |s| options.contains(&s)),
        Shape::Object => value.is_object(),
        Shape::Sub => {
            check_sub(value, nested)?;
            true
        }
        Shape::SubList => match value.as_array() {
            Some(steps) if !steps.is_empty() => {
                for step in steps {
                    check_sub(step, true)?;
                }
                true
            }
            _ => false,
        },
    };
    if ok {
        Ok(())
    } else {
        Err(AdapterError::SchemaValidation(format!(
            "analyzer property `{key}` has an invalid value: {value}"
        )))
    }
}

fn check_sub(value: &Value, in_pipeline: bool) -> Result<()> {
    let kind: AnalyzerKind = serde_json::from_value(value["type"].clone()).map_err(|_| {
        AdapterError::SchemaValidation(format!("invalid nested analyzer definition: {value}"))
    })?;
    if in_pipeline && kind == AnalyzerKind::Pipeline {
        return Err(AdapterError::SchemaValidation(
            "pipeline analyzers cannot be nested".into(),
        ));
    }
    let empty = Map::new();
    let props = match &value["properties"] {
        Value::Null => &empty,
        Value::Object(map) => map,
        other => {
            return Err(AdapterError::SchemaValidation(format!(
                "nested analyzer properties must be an object, got {other}"
            )))
        }
    };
    check_properties(kind, props, true)
}

/// Type and properties of an analyzer used inside `pipeline`, `minhash` or `wildcard`.
#[derive(Debug, Clone, PartialEq)]
pub struct SubAnalyzer {
    pub kind: AnalyzerKind,
    pub properties: Map<String, Value>,
}

impl SubAnalyzer {
    pub fn new(kind: AnalyzerKind) -> Self {
        Self {
            kind,
            properties: Map::new(),
        }
    }

    pub fn property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn to_value(&self) -> Value {
        json!({ "type": self.kind, "properties": self.properties })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analyzer {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: AnalyzerKind,
    #[serde(default)]
    pub properties: Map<String, Value>,
    #[serde(default)]
    pub features: Vec<Feature>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

impl Analyzer {
    pub fn new(name: impl Into<String>, kind: AnalyzerKind) -> Self {
        Self {
            name: name.into(),
            kind,
            properties: Map::new(),
            features: Vec::new(),
            prefix: None,
        }
    }

    pub fn property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn features<I: IntoIterator<Item = Feature>>(mut self, features: I) -> Self {
        self.features = features.into_iter().collect();
        self.features.sort();
        self.features.dedup();
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn pipeline<I: IntoIterator<Item = SubAnalyzer>>(name: impl Into<String>, steps: I) -> Self {
        let steps: Vec<Value> = steps.into_iter().map(|s| s.to_value()).collect();
        Self::new(name, AnalyzerKind::Pipeline).property("pipeline", steps)
    }

    pub fn minhash(name: impl Into<String>, base: SubAnalyzer, num_hashes: u64) -> Self {
        Self::new(name, AnalyzerKind::Minhash)
            .property("analyzer", base.to_value())
            .property("numHashes", num_hashes)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() || self.name.contains("::") {
            return Err(AdapterError::SchemaValidation(format!(
                "invalid analyzer name `{}`",
                self.name
            )));
        }
        check_properties(self.kind, &self.properties, false)
    }

    pub fn to_body(&self) -> Value {
        json!({
            "name": self.name,
            "type": self.kind,
            "properties": self.properties,
            "features": self.features,
        })
    }
}
