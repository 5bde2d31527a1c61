//! Migration commands and the objects they act on.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::analyzer::Analyzer;
use super::view::{View, ViewChange};
use crate::error::{AdapterError, Result};
use crate::jsonschema::{self, ColumnOp};
use crate::schema::CollectionKind;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    pub name: String,
    #[serde(default, rename = "type")]
    pub kind: CollectionKind,
    /// Pending column operations; turned into the collection's validation schema.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<ColumnOp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_message: Option<String>,
    /// Store options (`waitForSync`, `keyOptions`, ...) sent verbatim.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub options: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

impl Collection {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: CollectionKind::Document,
            columns: Vec::new(),
            schema_level: None,
            schema_message: None,
            options: Map::new(),
            prefix: None,
        }
    }

    pub fn edge(name: impl Into<String>) -> Self {
        Self {
            kind: CollectionKind::Edge,
            ..Self::new(name)
        }
    }

    pub fn column(mut self, op: ColumnOp) -> Self {
        self.columns.push(op);
        self
    }

    pub fn option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Validation document for the pending columns, if there are any.
    pub fn schema(&self) -> Result<Option<Value>> {
        if self.columns.is_empty() {
            return Ok(None);
        }
        let mut base = Map::new();
        if let Some(level) = &self.schema_level {
            base.insert("level".into(), json!(level));
        }
        if let Some(message) = &self.schema_message {
            base.insert("message".into(), json!(message));
        }
        let base = Value::Object(base);
        jsonschema::generate(&self.columns, Some(&base)).map(Some)
    }

    pub fn to_body(&self) -> Result<Value> {
        if self.name.is_empty() || self.name.contains('/') {
            return Err(AdapterError::SchemaValidation(format!(
                "invalid collection name `{}`",
                self.name
            )));
        }
        let mut body = self.options.clone();
        body.insert("name".into(), json!(self.name));
        body.insert("type".into(), json!(self.kind.type_code()));
        if let Some(schema) = self.schema()? {
            body.insert("schema".into(), schema);
        }
        Ok(Value::Object(body))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    #[default]
    Persistent,
    Hash,
    Skiplist,
    Geo,
    Fulltext,
    Ttl,
    Inverted,
    Zkd,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Index {
    pub collection: String,
    pub fields: Vec<String>,
    #[serde(default, rename = "type")]
    pub kind: IndexKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub sparse: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expire_after: Option<u64>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub options: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

impl Index {
    pub fn new<I, S>(collection: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            collection: collection.into(),
            fields: fields.into_iter().map(Into::into).collect(),
            kind: IndexKind::Persistent,
            name: None,
            unique: false,
            sparse: false,
            expire_after: None,
            options: Map::new(),
            prefix: None,
        }
    }

    pub fn kind(mut self, kind: IndexKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Explicit name, or `{collection}_{fields...}_index`.
    pub fn index_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("{}_{}_index", self.collection, self.fields.join("_")))
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| {
            Err(AdapterError::SchemaValidation(format!(
                "index on `{}`: {msg}",
                self.collection
            )))
        };
        if self.fields.is_empty() || self.fields.iter().any(String::is_empty) {
            return invalid("fields must be non-empty names");
        }
        match self.kind {
            IndexKind::Ttl if self.expire_after.is_none() => invalid("ttl indexes need expire_after"),
            IndexKind::Ttl | IndexKind::Fulltext if self.fields.len() != 1 => {
                invalid("exactly one field is required")
            }
            IndexKind::Geo if self.fields.len() > 2 => invalid("geo indexes take one or two fields"),
            _ if self.expire_after.is_some() && self.kind != IndexKind::Ttl => {
                invalid("expire_after is only valid for ttl indexes")
            }
            _ => Ok(()),
        }
    }

    pub fn to_body(&self) -> Value {
        let mut body = self.options.clone();
        body.insert("type".into(), json!(self.kind));
        body.insert("fields".into(), json!(self.fields));
        body.insert("name".into(), json!(self.index_name()));
        body.insert("unique".into(), json!(self.unique));
        body.insert("sparse".into(), json!(self.sparse));
        if let Some(expire) = self.expire_after {
            body.insert("expireAfter".into(), json!(expire));
        }
        Value::Object(body)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "object", rename_all = "snake_case")]
pub enum Object {
    Collection(Collection),
    Index(Index),
    View(View),
    Analyzer(Analyzer),
}

impl Object {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Object::Collection(_) => "collection",
            Object::Index(_) => "index",
            Object::View(_) => "view",
            Object::Analyzer(_) => "analyzer",
        }
    }

    pub fn name(&self) -> String {
        match self {
            Object::Collection(c) => c.name.clone(),
            Object::Index(i) => i.index_name(),
            Object::View(v) => v.name.clone(),
            Object::Analyzer(a) => a.name.clone(),
        }
    }

    pub fn prefix(&self) -> Option<&str> {
        match self {
            Object::Collection(c) => c.prefix.as_deref(),
            Object::Index(i) => i.prefix.as_deref(),
            Object::View(v) => v.prefix.as_deref(),
            Object::Analyzer(a) => a.prefix.as_deref(),
        }
    }

    fn prefix_slot(&mut self) -> &mut Option<String> {
        match self {
            Object::Collection(c) => &mut c.prefix,
            Object::Index(i) => &mut i.prefix,
            Object::View(v) => &mut v.prefix,
            Object::Analyzer(a) => &mut a.prefix,
        }
    }

    /// Declaration-time checks; run before any request is made.
    pub fn validate(&self) -> Result<()> {
        match self {
            Object::Collection(c) => c.to_body().map(|_| ()),
            Object::Index(i) => i.validate(),
            Object::View(v) => v.validate(),
            Object::Analyzer(a) => a.validate(),
        }
    }
}

impl From<Collection> for Object {
    fn from(c: Collection) -> Self {
        Object::Collection(c)
    }
}

impl From<Index> for Object {
    fn from(i: Index) -> Self {
        Object::Index(i)
    }
}

impl From<View> for Object {
    fn from(v: View) -> Self {
        Object::View(v)
    }
}

impl From<Analyzer> for Object {
    fn from(a: Analyzer) -> Self {
        Object::Analyzer(a)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    Create(Object),
    CreateIfNotExists(Object),
    Drop(Object),
    DropIfExists(Object),
    AlterCollection {
        collection: Collection,
        columns: Vec<ColumnOp>,
    },
    AlterView {
        view: View,
        changes: Vec<ViewChange>,
    },
    Rename {
        from: Object,
        to: Object,
    },
    /// Raw AQL, sent to the cursor API as-is.
    Execute(String),
}

impl Command {
    pub fn describe(&self) -> String {
        match self {
            Command::Create(o) => format!("create {} {}", o.kind_name(), o.name()),
            Command::CreateIfNotExists(o) => {
                format!("create {} {} if not exists", o.kind_name(), o.name())
            }
            Command::Drop(o) => format!("drop {} {}", o.kind_name(), o.name()),
            Command::DropIfExists(o) => format!("drop {} {} if exists", o.kind_name(), o.name()),
            Command::AlterCollection { collection, .. } => {
                format!("alter collection {}", collection.name)
            }
            Command::AlterView { view, .. } => format!("alter view {}", view.name),
            Command::Rename { from, to } => {
                format!("rename {} {} to {}", from.kind_name(), from.name(), to.name())
            }
            Command::Execute(aql) => format!("execute {aql}"),
        }
    }

    /// Fill in `prefix` on every object that does not name one.
    pub fn with_default_prefix(mut self, prefix: Option<&str>) -> Self {
        let Some(prefix) = prefix else {
            return self;
        };
        let fill = |slot: &mut Option<String>| {
            if slot.is_none() {
                *slot = Some(prefix.to_string());
            }
        };
        match &mut self {
            Command::Create(o) | Command::CreateIfNotExists(o) | Command::Drop(o) | Command::DropIfExists(o) => {
                fill(o.prefix_slot())
            }
            Command::AlterCollection { collection, .. } => fill(&mut collection.prefix),
            Command::AlterView { view, .. } => fill(&mut view.prefix),
            Command::Rename { from, to } => {
                fill(from.prefix_slot());
                fill(to.prefix_slot());
            }
            Command::Execute(_) => {}
        }
        self
    }

    /// Inverse command used to roll back a recorded `change`.
    pub fn reverse(&self) -> Result<Command> {
        let irreversible = |what: &str| {
            Err(AdapterError::Irreversible(format!(
                "{what} cannot be reversed automatically, define `down` explicitly ({})",
                self.describe()
            )))
        };
        match self {
            Command::Create(o) => Ok(Command::Drop(o.clone())),
            Command::CreateIfNotExists(o) => Ok(Command::DropIfExists(o.clone())),
            Command::Drop(o) => Ok(Command::Create(o.clone())),
            Command::DropIfExists(o) => Ok(Command::CreateIfNotExists(o.clone())),
            Command::Rename { from, to } => Ok(Command::Rename {
                from: to.clone(),
                to: from.clone(),
            }),
            Command::AlterCollection {
                collection,
                columns,
            } => {
                let mut inverted = Vec::with_capacity(columns.len());
                for op in columns.iter().rev() {
                    inverted.push(match op {
                        ColumnOp::Add { name, .. } => ColumnOp::remove(name.clone()),
                        ColumnOp::Rename { from, to } => ColumnOp::rename(to.clone(), from.clone()),
                        ColumnOp::Modify { .. } => return irreversible("modify column"),
                        ColumnOp::Remove { .. } => return irreversible("remove column"),
                    });
                }
                Ok(Command::AlterCollection {
                    collection: collection.clone(),
                    columns: inverted,
                })
            }
            Command::AlterView { .. } => irreversible("alter view"),
            Command::Execute(_) => irreversible("execute"),
        }
    }
}
