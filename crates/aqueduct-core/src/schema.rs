use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use crate::error::{AdapterError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionKind {
    #[default]
    Document,
    Edge,
}

impl CollectionKind {
    /// Numeric collection type used by the store's collection API.
    pub fn type_code(self) -> u8 {
        match self {
            CollectionKind::Document => 2,
            CollectionKind::Edge => 3,
        }
    }
}

/// Describes an entity type: where it lives and which fields it carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySchema {
    pub name: String,
    pub collection: String,
    #[serde(default)]
    pub kind: CollectionKind,
    #[serde(default = "default_primary_key")]
    pub primary_key: String,
    pub fields: Vec<String>,
}

fn default_primary_key() -> String {
    "id".to_string()
}

impl EntitySchema {
    pub fn document(name: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            collection: collection.into(),
            kind: CollectionKind::Document,
            primary_key: default_primary_key(),
            fields: vec![default_primary_key()],
        }
    }

    pub fn edge(name: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            kind: CollectionKind::Edge,
            fields: vec![default_primary_key(), "_from".into(), "_to".into()],
            ..Self::document(name, collection)
        }
    }

    pub fn with_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for f in fields {
            let f = f.into();
            if !self.fields.contains(&f) {
                self.fields.push(f);
            }
        }
        self
    }

    pub fn with_primary_key(mut self, pk: impl Into<String>) -> Self {
        let pk = pk.into();
        let old = std::mem::replace(&mut self.primary_key, pk.clone());
        if let Some(slot) = self.fields.iter_mut().find(|f| **f == old) {
            *slot = pk;
        } else if !self.fields.contains(&pk) {
            self.fields.insert(0, pk);
        }
        self
    }
}

/// Canonical edge collection name for a pair of entity type names; order-independent.
pub fn edge_collection_name(a: &str, b: &str) -> String {
    let (first, second) = if a <= b { (a, b) } else { (b, a) };
    format!("{}_{}", snake_case(first), snake_case(second))
}

fn snake_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 4);
    for (i, ch) in s.chars().enumerate() {
        if ch.is_ascii_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
        } else if ch == '.' || ch == ':' {
            out.push('_');
        } else {
            out.push(ch);
        }
    }
    out
}

/// Entity descriptors known to the adapter, including edge types inferred on first use.
#[derive(Default, Clone)]
pub struct SchemaRegistry {
    inner: Arc<RwLock<HashMap<String, Arc<EntitySchema>>>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, schema: EntitySchema) -> Arc<EntitySchema> {
        let schema = Arc::new(schema);
        self.inner
            .write()
            .insert(schema.name.clone(), schema.clone());
        schema
    }

    pub fn get(&self, name: &str) -> Option<Arc<EntitySchema>> {
        self.inner.read().get(name).cloned()
    }

    /// Look up a schema by the collection it is stored in.
    pub fn by_collection(&self, collection: &str) -> Option<Arc<EntitySchema>> {
        self.inner
            .read()
            .values()
            .find(|s| s.collection == collection)
            .cloned()
    }

    /// Edge type connecting `a` and `b`, created and memoized on first lookup.
    pub fn edge_between(&self, a: &EntitySchema, b: &EntitySchema) -> Arc<EntitySchema> {
        let name = edge_collection_name(&a.name, &b.name);
        if let Some(found) = self.inner.read().get(&name) {
            return found.clone();
        }
        let mut guard = self.inner.write();
        guard
            .entry(name.clone())
            .or_insert_with(|| {
                tracing::debug!(edge = %name, "registering inferred edge schema");
                Arc::new(EntitySchema::edge(name.clone(), name.clone()))
            })
            .clone()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Picks a concrete type for an incoming field map of a polymorphic association.
///
/// Candidates are tested in declaration order and the first one whose required fields
/// are all present wins, even if a later candidate would also match.
#[derive(Debug, Clone, Default)]
pub struct TypeResolver {
    candidates: Vec<(String, BTreeSet<String>)>,
}

impl TypeResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn candidate<I, S>(mut self, tag: impl Into<String>, required: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.candidates
            .push((tag.into(), required.into_iter().map(Into::into).collect()));
        self
    }

    pub fn resolve<'a, I>(&self, keys: I) -> Result<&str>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let keys: BTreeSet<&str> = keys.into_iter().collect();
        self.candidates
            .iter()
            .find(|(_, required)| required.iter().all(|f| keys.contains(f.as_str())))
            .map(|(tag, _)| tag.as_str())
            .ok_or_else(|| {
                AdapterError::Validation(format!(
                    "no type matches fields {:?}",
                    keys.into_iter().collect::<Vec<_>>()
                ))
            })
    }
}
