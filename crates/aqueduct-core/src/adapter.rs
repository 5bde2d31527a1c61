//! Entry point used by the persistence layer: document writes, compiled queries,
//! transactions and DDL against one connection.

use serde_json::{json, Map, Value};

use crate::config::AdapterConfig;
use crate::connection::{run_cursor, with_transaction, Connection, Request, Transaction};
use crate::error::{codes, AdapterError, Result};
use crate::identifier;
use crate::migration::{Analyzer, Collection, Command, Executor, LogRecord, Migrator, View};
use crate::query::compiler::{compile, Operation};
use crate::query::Query;
use crate::schema::{CollectionKind, EntitySchema, SchemaRegistry};

/// One hydrated result row, keyed by projected field name.
pub type Row = Map<String, Value>;

pub struct Adapter<C: Connection> {
    conn: C,
    config: AdapterConfig,
    registry: SchemaRegistry,
}

impl<C: Connection> Adapter<C> {
    pub fn new(conn: C) -> Self {
        Self::with_config(conn, AdapterConfig::default())
    }

    pub fn with_config(conn: C, config: AdapterConfig) -> Self {
        Self {
            conn,
            config,
            registry: SchemaRegistry::new(),
        }
    }

    pub fn connection(&self) -> &C {
        &self.conn
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    /// Runner over this adapter's connection and bookkeeping settings.
    pub fn migrator(&self) -> Migrator<&C> {
        Migrator::with_options(&self.conn, self.config.migrator_options())
    }

    fn database(&self) -> Option<&str> {
        self.config.prefix.as_deref()
    }

    /// Insert one document. Returns `fields` with the primary key set to the stored key.
    pub fn insert(
        &self,
        schema: &EntitySchema,
        fields: Row,
        trx: Option<&Transaction>,
    ) -> Result<Row> {
        let document = to_document(schema, fields.clone())?;
        let created = match self.post_document(schema, &document, trx) {
            Err(e) if !self.config.static_mode && e.error_num() == Some(codes::DATA_SOURCE_NOT_FOUND) => {
                self.create_collection_for(schema)?;
                self.post_document(schema, &document, trx)?
            }
            other => other?,
        };
        let key = created["_key"]
            .as_str()
            .ok_or_else(|| AdapterError::Transport {
                context: format!("document/{}", schema.collection),
                message: format!("insert response without `_key`: {created}"),
            })?
            .to_string();
        let mut row = fields;
        row.remove("_key");
        row.insert(schema.primary_key.clone(), json!(key));
        Ok(row)
    }

    pub fn insert_all(
        &self,
        schema: &EntitySchema,
        rows: Vec<Row>,
        trx: Option<&Transaction>,
    ) -> Result<Vec<Row>> {
        rows.into_iter()
            .map(|fields| self.insert(schema, fields, trx))
            .collect()
    }

    /// Patch the document stored under `key` (bare key or global id) and return its new
    /// state restricted to the schema's fields.
    pub fn update(
        &self,
        schema: &EntitySchema,
        key: &str,
        mut fields: Row,
        trx: Option<&Transaction>,
    ) -> Result<Row> {
        let key = identifier::key_from_id(key)?;
        fields.remove(&schema.primary_key);
        fields.remove("_key");
        let res = self.conn.request(
            Request::patch(
                format!("document/{}/{key}", schema.collection),
                Value::Object(fields),
            )
            .with_query("returnNew", "true")
            .with_database(self.database())
            .in_transaction(trx),
        )?;
        Ok(from_document(schema, res["new"].clone()))
    }

    pub fn delete(&self, schema: &EntitySchema, key: &str, trx: Option<&Transaction>) -> Result<()> {
        let key = identifier::key_from_id(key)?;
        self.conn.request(
            Request::delete(format!("document/{}/{key}", schema.collection))
                .with_database(self.database())
                .in_transaction(trx),
        )?;
        Ok(())
    }

    /// Compile and run `query`, following cursor pages. Compile errors surface before
    /// any request; store errors carry the query text and parameters.
    pub fn execute(
        &self,
        query: &Query,
        operation: Operation,
        trx: Option<&Transaction>,
    ) -> Result<Vec<Row>> {
        let compiled = compile(query, operation)?;
        let rows = run_cursor(
            &self.conn,
            self.database(),
            &compiled.text,
            compiled.bind_vars(),
            trx,
        )
        .map_err(|e| AdapterError::Query {
            query: compiled.text.clone(),
            params: compiled.params.clone(),
            source: Box::new(e),
        })?;
        let schema = query.from.schema.as_deref();
        rows.into_iter()
            .map(|row| hydrate(&compiled.columns, schema, row))
            .collect()
    }

    /// Run `f` in a stream transaction over `write` collections.
    pub fn transaction<T, F>(&self, write: &[String], f: F) -> Result<T>
    where
        F: FnOnce(&Transaction) -> Result<T>,
    {
        with_transaction(&self.conn, self.database(), write, f)
    }

    pub fn execute_ddl(&self, command: Command) -> Result<LogRecord> {
        let command = command.with_default_prefix(self.database());
        Executor::new(&self.conn).execute(&command, None)
    }

    /// Make sure `view` exists. In dynamic mode the analyzers it uses (from `analyzers`)
    /// and its linked collections are created first; in static mode a missing view is
    /// an error.
    pub fn ensure_view(&self, view: &View, analyzers: &[Analyzer]) -> Result<()> {
        let database = view.prefix.as_deref().or(self.database());
        if self.config.static_mode {
            self.conn
                .request(Request::get(format!("view/{}", view.name)).with_database(database))?;
            return Ok(());
        }

        let used = view.analyzer_names();
        for analyzer in analyzers.iter().filter(|a| used.contains(&a.name)) {
            let lookup = Request::get(format!("analyzer/{}", analyzer.name))
                .with_database(analyzer.prefix.as_deref().or(self.database()));
            match self.conn.request(lookup) {
                Ok(_) => {}
                Err(e) if e.is_not_found() => {
                    self.execute_ddl(Command::Create(analyzer.clone().into()))?;
                }
                Err(e) => return Err(e),
            }
        }
        for name in view.links.keys() {
            let kind = self
                .registry
                .by_collection(name)
                .map(|s| s.kind)
                .unwrap_or_default();
            let mut collection = Collection::new(name);
            collection.kind = kind;
            collection.prefix = view.prefix.clone();
            self.execute_ddl(Command::CreateIfNotExists(collection.into()))?;
        }
        self.execute_ddl(Command::CreateIfNotExists(view.clone().into()))?;
        Ok(())
    }

    fn post_document(
        &self,
        schema: &EntitySchema,
        document: &Value,
        trx: Option<&Transaction>,
    ) -> Result<Value> {
        self.conn.request(
            Request::post(format!("document/{}", schema.collection), document.clone())
                .with_database(self.database())
                .in_transaction(trx),
        )
    }

    fn create_collection_for(&self, schema: &EntitySchema) -> Result<()> {
        tracing::info!(collection = %schema.collection, kind = ?schema.kind, "creating missing collection");
        let collection = match schema.kind {
            CollectionKind::Document => Collection::new(&schema.collection),
            CollectionKind::Edge => Collection::edge(&schema.collection),
        };
        self.execute_ddl(Command::CreateIfNotExists(collection.into()))?;
        Ok(())
    }
}

/// Store representation of a field map: the primary key becomes `_key`; edges must
/// reference both endpoints by global id.
fn to_document(schema: &EntitySchema, mut fields: Row) -> Result<Value> {
    if schema.primary_key != "_key" {
        match fields.remove(&schema.primary_key) {
            None | Some(Value::Null) => {}
            Some(Value::String(key)) => {
                fields.insert("_key".into(), json!(key));
            }
            Some(Value::Number(n)) => {
                fields.insert("_key".into(), json!(n.to_string()));
            }
            Some(other) => {
                return Err(AdapterError::Validation(format!(
                    "primary key `{}` must be a string or number, got {other}",
                    schema.primary_key
                )))
            }
        }
    }
    if schema.kind == CollectionKind::Edge {
        for attr in ["_from", "_to"] {
            let id = fields.get(attr).and_then(Value::as_str).ok_or_else(|| {
                AdapterError::Validation(format!(
                    "edge `{}` requires `{attr}` as a document id",
                    schema.name
                ))
            })?;
            identifier::validate(id)?;
        }
    }
    Ok(Value::Object(fields))
}

fn from_document(schema: &EntitySchema, document: Value) -> Row {
    let Value::Object(mut doc) = document else {
        return Row::new();
    };
    if let Some(key) = doc.remove("_key") {
        doc.insert(schema.primary_key.clone(), key);
    }
    doc.retain(|k, _| schema.fields.contains(k));
    doc
}

fn hydrate(columns: &[String], schema: Option<&EntitySchema>, row: Value) -> Result<Row> {
    let values = match row {
        Value::Array(values) => values,
        scalar if columns.len() == 1 => vec![scalar],
        other => {
            return Err(AdapterError::Validation(format!(
                "expected a result array of {} values, got {other}",
                columns.len()
            )))
        }
    };
    if values.len() != columns.len() {
        return Err(AdapterError::Validation(format!(
            "expected {} values per row, got {}",
            columns.len(),
            values.len()
        )));
    }
    Ok(columns
        .iter()
        .zip(values)
        .map(|(column, value)| {
            let name = match schema {
                Some(s) if column == "_key" => s.primary_key.clone(),
                _ => column.clone(),
            };
            (name, value)
        })
        .collect())
}
