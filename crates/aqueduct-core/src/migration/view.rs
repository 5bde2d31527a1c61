//! Search view definitions and the alter subcommands folded into them.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

use crate::error::{AdapterError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortField {
    pub field: String,
    #[serde(default)]
    pub direction: SortDirection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredValue {
    pub fields: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression: Option<String>,
}

/// How one collection (or one field of it) is indexed by the view.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Link {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub analyzers: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, Link>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_all_fields: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_list_positions: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_values: Option<String>,
}

impl Link {
    pub fn analyzers<I, S>(analyzers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            analyzers: analyzers.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn field(mut self, name: impl Into<String>, link: Link) -> Self {
        self.fields.insert(name.into(), link);
        self
    }

    pub fn include_all_fields(mut self, flag: bool) -> Self {
        self.include_all_fields = Some(flag);
        self
    }

    fn validate(&self, path: &str) -> Result<()> {
        if let Some(mode) = &self.store_values {
            if mode != "none" && mode != "id" {
                return Err(AdapterError::SchemaValidation(format!(
                    "link `{path}`: storeValues must be `none` or `id`, got `{mode}`"
                )));
            }
        }
        if self.analyzers.iter().any(String::is_empty) {
            return Err(AdapterError::SchemaValidation(format!(
                "link `{path}` names an empty analyzer"
            )));
        }
        for (name, nested) in &self.fields {
            nested.validate(&format!("{path}.{name}"))?;
        }
        Ok(())
    }
}

/// Alter-view subcommands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ViewChange {
    AddSort(SortField),
    AddStore(StoredValue),
    AddLink { collection: String, link: Link },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct View {
    pub name: String,
    #[serde(default)]
    pub links: BTreeMap<String, Link>,
    #[serde(default)]
    pub primary_sort: Vec<SortField>,
    #[serde(default)]
    pub stored_values: Vec<StoredValue>,
    /// Further view properties (`commitIntervalMsec`, ...) passed through as-is.
    #[serde(default)]
    pub options: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

impl View {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            links: BTreeMap::new(),
            primary_sort: Vec::new(),
            stored_values: Vec::new(),
            options: Map::new(),
            prefix: None,
        }
    }

    pub fn link(mut self, collection: impl Into<String>, link: Link) -> Self {
        self.links.insert(collection.into(), link);
        self
    }

    pub fn sort(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.primary_sort.push(SortField {
            field: field.into(),
            direction,
        });
        self
    }

    pub fn store<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stored_values.push(StoredValue {
            fields: fields.into_iter().map(Into::into).collect(),
            compression: None,
        });
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Analyzer names referenced by any link, deduplicated.
    pub fn analyzer_names(&self) -> Vec<String> {
        fn walk(link: &Link, out: &mut Vec<String>) {
            for a in &link.analyzers {
                if !out.contains(a) {
                    out.push(a.clone());
                }
            }
            for nested in link.fields.values() {
                walk(nested, out);
            }
        }
        let mut out = Vec::new();
        for link in self.links.values() {
            walk(link, &mut out);
        }
        out
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(AdapterError::SchemaValidation("view name is empty".into()));
        }
        for (collection, link) in &self.links {
            if collection.is_empty() {
                return Err(AdapterError::SchemaValidation(format!(
                    "view `{}` links an unnamed collection",
                    self.name
                )));
            }
            link.validate(collection)?;
        }
        for stored in &self.stored_values {
            if stored.fields.is_empty() {
                return Err(AdapterError::SchemaValidation(format!(
                    "view `{}` declares stored values without fields",
                    self.name
                )));
            }
            if let Some(c) = &stored.compression {
                if c != "lz4" && c != "none" {
                    return Err(AdapterError::SchemaValidation(format!(
                        "unknown stored value compression `{c}`"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Fold `changes` into a copy of this definition, in order. Entries are appended
    /// to list-valued properties, so the result keeps declaration order.
    pub fn apply(&self, changes: &[ViewChange]) -> View {
        let mut view = self.clone();
        for change in changes {
            match change {
                ViewChange::AddSort(sort) => view.primary_sort.push(sort.clone()),
                ViewChange::AddStore(stored) => view.stored_values.push(stored.clone()),
                ViewChange::AddLink { collection, link } => {
                    view.links.insert(collection.clone(), link.clone());
                }
            }
        }
        view
    }

    /// Mutable view properties, as sent to the properties endpoint.
    pub fn properties(&self) -> Value {
        let mut props = self.options.clone();
        props.insert("links".into(), json!(self.links));
        if !self.primary_sort.is_empty() {
            props.insert("primarySort".into(), json!(self.primary_sort));
        }
        if !self.stored_values.is_empty() {
            props.insert("storedValues".into(), json!(self.stored_values));
        }
        Value::Object(props)
    }

    /// Creation body: name, type and properties.
    pub fn to_body(&self) -> Value {
        let mut body = self.properties();
        if let Value::Object(map) = &mut body {
            map.insert("name".into(), json!(self.name));
            map.insert("type".into(), json!("arangosearch"));
        }
        body
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_appends_in_declaration_order() {
        let base = View::new("user_search").sort("created_at", SortDirection::Desc);
        let view = base.apply(&[
            ViewChange::AddSort(SortField {
                field: "name".into(),
                direction: SortDirection::Asc,
            }),
            ViewChange::AddStore(StoredValue {
                fields: vec!["email".into()],
                compression: Some("lz4".into()),
            }),
            ViewChange::AddLink {
                collection: "users".into(),
                link: Link::analyzers(["text_en"]),
            },
        ]);
        let fields: Vec<_> = view.primary_sort.iter().map(|s| s.field.as_str()).collect();
        assert_eq!(fields, ["created_at", "name"]);
        assert_eq!(view.analyzer_names(), vec!["text_en".to_string()]);
        assert_eq!(base.primary_sort.len(), 1);
    }

    #[test]
    fn body_uses_store_property_names() {
        let view = View::new("v")
            .link(
                "posts",
                Link::analyzers(["identity"]).field("body", Link::analyzers(["text_en"])),
            )
            .store(["title"]);
        let body = view.to_body();
        assert_eq!(body["type"], "arangosearch");
        assert_eq!(body["links"]["posts"]["fields"]["body"]["analyzers"], json!(["text_en"]));
        assert_eq!(body["storedValues"], json!([{"fields": ["title"]}]));
        assert!(body.get("primarySort").is_none());
        assert_eq!(view.analyzer_names(), vec!["identity", "text_en"]);
    }

    #[test]
    fn invalid_links_are_rejected() {
        let mut link = Link::analyzers(["identity"]);
        link.store_values = Some("all".into());
        assert!(View::new("v").link("users", link).validate().is_err());
        assert!(View::new("v").link("", Link::default()).validate().is_err());
        assert!(View::new("").validate().is_err());
    }
}
