//! Synthesizes collection validation documents from column operations.
//!
//! The produced document has the shape the store expects under a collection's
//! `schema` property:
//!
//! ```json
//! {"rule": {"type": "object", "properties": {...}, "required": [...]}, "level": "strict"}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::{AdapterError, Result};

pub const DEFAULT_LEVEL: &str = "strict";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ColumnOp {
    Add {
        name: String,
        #[serde(rename = "type")]
        ty: ColumnType,
        #[serde(default)]
        options: ColumnOptions,
    },
    Modify {
        name: String,
        #[serde(rename = "type")]
        ty: ColumnType,
        #[serde(default)]
        options: ColumnOptions,
    },
    Remove {
        name: String,
    },
    Rename {
        from: String,
        to: String,
    },
}

impl ColumnOp {
    pub fn add(name: impl Into<String>, ty: ColumnType) -> Self {
        ColumnOp::Add {
            name: name.into(),
            ty,
            options: ColumnOptions::default(),
        }
    }

    pub fn modify(name: impl Into<String>, ty: ColumnType) -> Self {
        ColumnOp::Modify {
            name: name.into(),
            ty,
            options: ColumnOptions::default(),
        }
    }

    pub fn remove(name: impl Into<String>) -> Self {
        ColumnOp::Remove { name: name.into() }
    }

    pub fn rename(from: impl Into<String>, to: impl Into<String>) -> Self {
        ColumnOp::Rename {
            from: from.into(),
            to: to.into(),
        }
    }

    /// Replace the options of an add/modify; no effect on remove/rename.
    pub fn with_options(mut self, opts: ColumnOptions) -> Self {
        if let ColumnOp::Add { options, .. } | ColumnOp::Modify { options, .. } = &mut self {
            *options = opts;
        }
        self
    }

    pub fn not_null(self) -> Self {
        self.with_options(ColumnOptions {
            null: false,
            ..ColumnOptions::default()
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Primitive(String),
    Enum(Vec<Value>),
    Const(Value),
    ArrayOf(Box<ColumnType>),
    Object(Vec<ColumnOp>),
}

impl ColumnType {
    pub fn primitive(name: impl Into<String>) -> Self {
        ColumnType::Primitive(name.into())
    }

    pub fn enumeration<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        ColumnType::Enum(values.into_iter().map(Into::into).collect())
    }

    pub fn array_of(inner: ColumnType) -> Self {
        ColumnType::ArrayOf(Box::new(inner))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnOptions {
    #[serde(default = "default_null")]
    pub null: bool,
    /// Additional JSON-schema keywords merged into the property (`minLength`, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_null() -> bool {
    true
}

impl Default for ColumnOptions {
    fn default() -> Self {
        Self {
            null: true,
            extra: Map::new(),
        }
    }
}

/// Apply `ops` in order on top of `existing` (a full schema document) or on an empty
/// base, returning the new schema document.
pub fn generate(ops: &[ColumnOp], existing: Option<&Value>) -> Result<Value> {
    let rule = existing.and_then(|e| e.get("rule"));
    let base = rule
        .and_then(|r| r.get("properties"))
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    let required = rule
        .and_then(|r| r.get("required"))
        .and_then(Value::as_array)
        .map(|names| {
            names
                .iter()
                .filter_map(|n| n.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();
    let (properties, required) = generate_properties(ops, base, required)?;

    let level = existing
        .and_then(|e| e.get("level"))
        .cloned()
        .unwrap_or_else(|| Value::String(DEFAULT_LEVEL.into()));
    let mut doc = Map::new();
    doc.insert("rule".into(), object_rule("object", properties, required));
    doc.insert("level".into(), level);
    if let Some(message) = existing.and_then(|e| e.get("message")) {
        doc.insert("message".into(), message.clone());
    }
    Ok(Value::Object(doc))
}

/// Fold `ops` into a property map and its required list.
pub fn generate_properties(
    ops: &[ColumnOp],
    mut properties: Map<String, Value>,
    mut required: Vec<String>,
) -> Result<(Map<String, Value>, Vec<String>)> {
    for op in ops {
        match op {
            ColumnOp::Add { name, ty, options } | ColumnOp::Modify { name, ty, options } => {
                properties.insert(name.clone(), column_schema(ty, options)?);
                required.retain(|r| r != name);
                if !options.null {
                    required.push(name.clone());
                }
            }
            ColumnOp::Remove { name } => {
                properties.remove(name);
                required.retain(|r| r != name);
            }
            ColumnOp::Rename { from, to } => {
                if let Some(prop) = properties.remove(from) {
                    properties.insert(to.clone(), prop);
                }
                for r in required.iter_mut().filter(|r| r.as_str() == from.as_str()) {
                    *r = to.clone();
                }
            }
        }
    }
    Ok((properties, required))
}

fn object_rule(ty: impl Into<Value>, properties: Map<String, Value>, required: Vec<String>) -> Value {
    let mut rule = Map::new();
    rule.insert("type".into(), ty.into());
    rule.insert("properties".into(), Value::Object(properties));
    if !required.is_empty() {
        rule.insert("required".into(), json!(required));
    }
    Value::Object(rule)
}

fn nullable(ty: &str, null: bool) -> Value {
    if null {
        json!([ty, "null"])
    } else {
        json!(ty)
    }
}

fn column_schema(ty: &ColumnType, options: &ColumnOptions) -> Result<Value> {
    let mut prop = match ty {
        ColumnType::Primitive(name) => json!({ "type": nullable(primitive_type(name)?, options.null) }),
        ColumnType::Enum(values) => {
            let ty = enum_type(values)?;
            json!({ "type": nullable(ty, options.null), "enum": values })
        }
        ColumnType::Const(value) => {
            json!({ "const": value, "type": nullable(value_type(value)?, true) })
        }
        ColumnType::ArrayOf(inner) => {
            let items = column_schema(inner, &ColumnOptions::default())?;
            json!({ "type": nullable("array", options.null), "items": items })
        }
        ColumnType::Object(ops) => {
            let (properties, required) = generate_properties(ops, Map::new(), Vec::new())?;
            object_rule(nullable("object", options.null), properties, required)
        }
    };
    if let Value::Object(map) = &mut prop {
        for (k, v) in &options.extra {
            map.insert(k.clone(), v.clone());
        }
    }
    Ok(prop)
}

fn primitive_type(name: &str) -> Result<&'static str> {
    Ok(match name {
        "string" | "text" | "uuid" | "binary_id" | "binary" | "date" | "time"
        | "naive_datetime" | "utc_datetime" | "utc_datetime_usec" => "string",
        "integer" | "id" => "integer",
        "number" | "float" | "decimal" => "number",
        "boolean" => "boolean",
        "object" | "map" => "object",
        "array" => "array",
        other => {
            return Err(AdapterError::SchemaValidation(format!(
                "unknown column type `{other}`"
            )))
        }
    })
}

fn value_type(value: &Value) -> Result<&'static str> {
    Ok(match value {
        Value::String(_) => "string",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
        Value::Null => {
            return Err(AdapterError::SchemaValidation(
                "null is not a valid constant or enum value".into(),
            ))
        }
    })
}

fn enum_type(values: &[Value]) -> Result<&'static str> {
    let mut found: Option<&'static str> = None;
    for v in values {
        let ty = value_type(v)?;
        found = match (found, ty) {
            (None, t) => Some(t),
            (Some(a), b) if a == b => Some(a),
            (Some("integer" | "number"), "integer" | "number") => Some("number"),
            (Some(a), b) => {
                return Err(AdapterError::SchemaValidation(format!(
                    "enum values mix {a} and {b}"
                )))
            }
        };
    }
    found.ok_or_else(|| AdapterError::SchemaValidation("enum without values".into()))
}
