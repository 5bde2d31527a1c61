use serde_json::{json, Map};
use std::fmt;

use super::analyzer::Analyzer;
use super::command::{Collection, Command, Index, Object};
use super::view::{View, ViewChange};
use crate::connection::{run_cursor, Connection, Request, Transaction};
use crate::error::{AdapterError, Result};
use crate::jsonschema::{self, ColumnOp};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Error,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Level::Info => "info",
            Level::Error => "error",
        })
    }
}

/// Normalized outcome of one command.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub level: Level,
    pub message: String,
    pub metadata: Vec<(String, String)>,
}

impl LogRecord {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: Level::Info,
            message: message.into(),
            metadata: Vec::new(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: Level::Error,
            message: message.into(),
            metadata: Vec::new(),
        }
    }
}

/// Applies migration commands against a connection.
pub struct Executor<'c, C: Connection + ?Sized> {
    conn: &'c C,
    database: Option<String>,
}

impl<'c, C: Connection + ?Sized> Executor<'c, C> {
    pub fn new(conn: &'c C) -> Self {
        Self {
            conn,
            database: None,
        }
    }

    /// Database raw queries run in when no transaction is given.
    pub fn with_database(mut self, database: Option<&str>) -> Self {
        self.database = database.map(str::to_string);
        self
    }

    /// Like [`Executor::execute`] but never fails: errors become `Level::Error` records.
    pub fn execute_logged(&self, command: &Command, trx: Option<&Transaction>) -> LogRecord {
        match self.execute(command, trx) {
            Ok(record) => record,
            Err(e) => {
                tracing::error!(command = %command.describe(), error = %e, "migration command failed");
                LogRecord::error(e.to_string())
            }
        }
    }

    /// Run one command. `trx` only applies to raw queries; schema changes are not
    /// transactional on the store side.
    pub fn execute(&self, command: &Command, trx: Option<&Transaction>) -> Result<LogRecord> {
        let record = match command {
            Command::Create(object) => {
                object.validate()?;
                self.create_object(object)?;
                LogRecord::info(format!("created {} `{}`", object.kind_name(), object.name()))
            }
            Command::CreateIfNotExists(object) => {
                object.validate()?;
                match self.create_object(object) {
                    Ok(()) => LogRecord::info(format!("created {} `{}`", object.kind_name(), object.name())),
                    Err(e) if e.is_conflict() => LogRecord::info(format!(
                        "{} `{}` already exists",
                        object.kind_name(),
                        object.name()
                    )),
                    Err(e) => return Err(e),
                }
            }
            Command::Drop(object) => {
                self.drop_object(object)?;
                LogRecord::info(format!("dropped {} `{}`", object.kind_name(), object.name()))
            }
            Command::DropIfExists(object) => match self.drop_object(object) {
                Ok(()) => LogRecord::info(format!("dropped {} `{}`", object.kind_name(), object.name())),
                Err(e) if e.is_not_found() => LogRecord::info(format!(
                    "{} `{}` does not exist",
                    object.kind_name(),
                    object.name()
                )),
                Err(e) => return Err(e),
            },
            Command::AlterCollection {
                collection,
                columns,
            } => {
                self.alter_collection(collection, columns)?;
                LogRecord::info(format!("altered collection `{}`", collection.name))
            }
            Command::AlterView { view, changes } => {
                self.alter_view(view, changes)?;
                LogRecord::info(format!("altered view `{}`", view.name))
            }
            Command::Rename { from, to } => {
                self.rename(from, to)?;
                LogRecord::info(format!(
                    "renamed {} `{}` to `{}`",
                    from.kind_name(),
                    from.name(),
                    to.name()
                ))
            }
            Command::Execute(aql) => {
                let rows = run_cursor(self.conn, self.database.as_deref(), aql, Map::new(), trx)?;
                let mut record = LogRecord::info("executed query");
                record.metadata.push(("rows".into(), rows.len().to_string()));
                record
            }
        };
        tracing::info!(command = %command.describe(), "{}", record.message);
        Ok(record)
    }

    fn create_object(&self, object: &Object) -> Result<()> {
        let db = object.prefix();
        match object {
            Object::Collection(c) => {
                self.conn
                    .request(Request::post("collection", c.to_body()?).with_database(db))?;
            }
            Object::Index(i) => {
                self.conn.request(
                    Request::post("index", i.to_body())
                        .with_query("collection", i.collection.clone())
                        .with_database(db),
                )?;
            }
            Object::View(v) => {
                self.conn
                    .request(Request::post("view", v.to_body()).with_database(db))?;
            }
            Object::Analyzer(a) => self.create_analyzer(a)?,
        }
        Ok(())
    }

    fn create_analyzer(&self, analyzer: &Analyzer) -> Result<()> {
        let db = analyzer.prefix.as_deref();
        match self.delete_analyzer(analyzer) {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
        self.conn
            .request(Request::post("analyzer", analyzer.to_body()).with_database(db))?;
        Ok(())
    }

    fn delete_analyzer(&self, analyzer: &Analyzer) -> Result<()> {
        self.conn.request(
            Request::delete(format!("analyzer/{}", analyzer.name))
                .with_query("force", "true")
                .with_database(analyzer.prefix.as_deref()),
        )?;
        Ok(())
    }

    fn drop_object(&self, object: &Object) -> Result<()> {
        let db = object.prefix();
        match object {
            Object::Collection(c) => {
                self.conn
                    .request(Request::delete(format!("collection/{}", c.name)).with_database(db))?;
            }
            Object::Index(i) => {
                let id = self.find_index(i)?;
                self.conn
                    .request(Request::delete(format!("index/{id}")).with_database(db))?;
            }
            Object::View(v) => {
                self.conn
                    .request(Request::delete(format!("view/{}", v.name)).with_database(db))?;
            }
            Object::Analyzer(a) => self.delete_analyzer(a)?,
        }
        Ok(())
    }

    /// Store-assigned id of the index named like `index`.
    fn find_index(&self, index: &Index) -> Result<String> {
        let name = index.index_name();
        let listing = self.conn.request(
            Request::get("index")
                .with_query("collection", index.collection.clone())
                .with_database(index.prefix.as_deref()),
        )?;
        listing["indexes"]
            .as_array()
            .into_iter()
            .flatten()
            .find(|i| i["name"] == name.as_str())
            .and_then(|i| i["id"].as_str())
            .map(str::to_string)
            .ok_or_else(|| AdapterError::Store {
                status: 404,
                error_num: crate::error::codes::INDEX_NOT_FOUND,
                message: format!("index `{name}` not found on `{}`", index.collection),
            })
    }

    fn alter_collection(&self, collection: &Collection, columns: &[ColumnOp]) -> Result<()> {
        let db = collection.prefix.as_deref();
        let path = format!("collection/{}/properties", collection.name);
        let current = self.conn.request(Request::get(path.clone()).with_database(db))?;
        let existing = current.get("schema").filter(|s| !s.is_null());
        let schema = jsonschema::generate(columns, existing)?;
        self.conn
            .request(Request::put(path, json!({ "schema": schema })).with_database(db))?;
        Ok(())
    }

    fn alter_view(&self, view: &View, changes: &[ViewChange]) -> Result<()> {
        let merged = view.apply(changes);
        merged.validate()?;
        self.conn.request(
            Request::patch(format!("view/{}/properties", view.name), merged.properties())
                .with_database(view.prefix.as_deref()),
        )?;
        Ok(())
    }

    fn rename(&self, from: &Object, to: &Object) -> Result<()> {
        if from.prefix() != to.prefix() {
            return Err(AdapterError::SchemaValidation(format!(
                "cannot rename `{}` across prefixes ({:?} -> {:?})",
                from.name(),
                from.prefix(),
                to.prefix()
            )));
        }
        let resource = match (from, to) {
            (Object::Collection(_), Object::Collection(_)) => "collection",
            (Object::View(_), Object::View(_)) => "view",
            (Object::Index(_), Object::Index(_)) | (Object::Analyzer(_), Object::Analyzer(_)) => {
                return Err(AdapterError::SchemaValidation(format!(
                    "{}s cannot be renamed",
                    from.kind_name()
                )))
            }
            _ => {
                return Err(AdapterError::SchemaValidation(format!(
                    "cannot rename a {} into a {}",
                    from.kind_name(),
                    to.kind_name()
                )))
            }
        };
        to.validate()?;
        self.conn.request(
            Request::put(
                format!("{resource}/{}/rename", from.name()),
                json!({ "name": to.name() }),
            )
            .with_database(from.prefix()),
        )?;
        Ok(())
    }
}

/// Shorthand for a one-off command without a transaction.
pub fn execute<C: Connection + ?Sized>(conn: &C, command: &Command) -> Result<LogRecord> {
    Executor::new(conn).execute(command, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::codes;
    use crate::jsonschema::ColumnType;
    use crate::migration::analyzer::{AnalyzerKind, Feature};
    use crate::migration::view::Link;
    use crate::testing::MemoryStore;

    fn users() -> Object {
        Collection::new("users").into()
    }

    #[test]
    fn create_if_not_exists_tolerates_existing_collection() {
        let store = MemoryStore::default();
        execute(&store, &Command::Create(users())).unwrap();

        let record = execute(&store, &Command::CreateIfNotExists(users())).unwrap();
        assert_eq!(record.level, Level::Info);
        assert!(record.message.contains("already exists"));

        let err = execute(&store, &Command::Create(users())).unwrap_err();
        assert_eq!(err.error_num(), Some(codes::DUPLICATE_NAME));
    }

    #[test]
    fn drop_if_exists_tolerates_missing_objects() {
        let store = MemoryStore::default();
        let objects: Vec<Object> = vec![
            users(),
            View::new("search").into(),
            Analyzer::new("text_x", AnalyzerKind::Identity).into(),
        ];
        for object in objects {
            execute(&store, &Command::DropIfExists(object.clone())).unwrap();
            assert!(execute(&store, &Command::Drop(object)).unwrap_err().is_not_found());
        }
        execute(&store, &Command::Create(users())).unwrap();
        let index = Object::from(Index::new("users", ["email"]));
        execute(&store, &Command::DropIfExists(index.clone())).unwrap();
        let err = execute(&store, &Command::Drop(index)).unwrap_err();
        assert_eq!(err.error_num(), Some(codes::INDEX_NOT_FOUND));
    }

    #[test]
    fn index_drop_resolves_id_by_name() {
        let store = MemoryStore::default();
        execute(&store, &Command::Create(users())).unwrap();
        let index = Index::new("users", ["email"]).unique();
        execute(&store, &Command::Create(index.clone().into())).unwrap();
        assert_eq!(store.indexes(None, "users")[0]["name"], "users_email_index");

        execute(&store, &Command::Drop(index.into())).unwrap();
        assert!(store.indexes(None, "users").is_empty());
        assert!(store
            .requests()
            .iter()
            .any(|r| r == "GET /_db/_system/_api/index"));
        assert!(store
            .requests()
            .iter()
            .any(|r| r == "DELETE /_db/_system/_api/index/users/1"));
    }

    #[test]
    fn alter_merges_onto_existing_schema() {
        let store = MemoryStore::default();
        let coll = Collection::new("users")
            .column(ColumnOp::add("name", ColumnType::primitive("string")).not_null());
        execute(&store, &Command::Create(coll.clone().into())).unwrap();
        execute(
            &store,
            &Command::AlterCollection {
                collection: coll,
                columns: vec![ColumnOp::add("age", ColumnType::primitive("integer"))],
            },
        )
        .unwrap();
        let schema = &store.collection(None, "users").unwrap()["schema"];
        assert_eq!(schema["rule"]["properties"]["name"]["type"], "string");
        assert_eq!(
            schema["rule"]["properties"]["age"]["type"],
            json!(["integer", "null"])
        );
        assert_eq!(schema["rule"]["required"], json!(["name"]));
    }

    #[test]
    fn analyzer_create_replaces_existing_definition() {
        let store = MemoryStore::default();
        let v1 = Analyzer::new("split", AnalyzerKind::Delimiter).property("delimiter", ",");
        let v2 = Analyzer::new("split", AnalyzerKind::Delimiter)
            .property("delimiter", ";")
            .features([Feature::Frequency]);
        execute(&store, &Command::Create(v1.into())).unwrap();
        execute(&store, &Command::Create(v2.into())).unwrap();
        let stored = store.analyzer(None, "split").unwrap();
        assert_eq!(stored["properties"]["delimiter"], ";");
        assert!(store
            .requests()
            .iter()
            .any(|r| r == "DELETE /_db/_system/_api/analyzer/split"));
    }

    #[test]
    fn invalid_analyzer_fails_before_any_request() {
        let store = MemoryStore::default();
        let bad = Analyzer::new("bad", AnalyzerKind::Stem);
        let err = execute(&store, &Command::Create(bad.into())).unwrap_err();
        assert!(matches!(err, AdapterError::SchemaValidation(_)));
        assert!(store.requests().is_empty());
    }

    #[test]
    fn view_alter_patches_folded_definition() {
        let store = MemoryStore::default();
        let view = View::new("user_search").link("users", Link::analyzers(["identity"]));
        execute(&store, &Command::Create(view.clone().into())).unwrap();
        execute(
            &store,
            &Command::AlterView {
                view,
                changes: vec![ViewChange::AddLink {
                    collection: "posts".into(),
                    link: Link::analyzers(["text_en"]),
                }],
            },
        )
        .unwrap();
        let stored = store.view(None, "user_search").unwrap();
        assert_eq!(stored["links"]["posts"]["analyzers"], json!(["text_en"]));
        assert_eq!(stored["links"]["users"]["analyzers"], json!(["identity"]));
    }

    #[test]
    fn rename_requires_same_kind_and_prefix() {
        let store = MemoryStore::default();
        execute(&store, &Command::Create(users())).unwrap();
        let cross_prefix = Command::Rename {
            from: users(),
            to: Collection::new("people").with_prefix("tenant_a").into(),
        };
        assert!(matches!(
            execute(&store, &cross_prefix),
            Err(AdapterError::SchemaValidation(_))
        ));
        let cross_kind = Command::Rename {
            from: users(),
            to: View::new("people").into(),
        };
        assert!(execute(&store, &cross_kind).is_err());

        execute(
            &store,
            &Command::Rename {
                from: users(),
                to: Collection::new("people").into(),
            },
        )
        .unwrap();
        assert!(store.collection(None, "people").is_some());
        assert!(store.collection(None, "users").is_none());
    }

    #[test]
    fn view_rename_uses_view_endpoint() {
        let store = MemoryStore::default();
        let view = View::new("user_search").link("users", Link::analyzers(["identity"]));
        execute(&store, &Command::Create(view.into())).unwrap();
        let record = execute(
            &store,
            &Command::Rename {
                from: View::new("user_search").into(),
                to: View::new("people_search").into(),
            },
        )
        .unwrap();
        assert_eq!(record.message, "renamed view `user_search` to `people_search`");
        assert!(store.view(None, "user_search").is_none());
        let renamed = store.view(None, "people_search").unwrap();
        assert_eq!(renamed["links"]["users"]["analyzers"], json!(["identity"]));
        assert!(store
            .requests()
            .iter()
            .any(|r| r == "PUT /_db/_system/_api/view/user_search/rename"));
    }

    #[test]
    fn tenant_index_drop_stays_in_tenant_database() {
        let store = MemoryStore::default();
        for db in [None, Some("tenant_a")] {
            let mut coll = Collection::new("users");
            if let Some(db) = db {
                coll = coll.with_prefix(db);
            }
            execute(&store, &Command::Create(coll.into())).unwrap();
        }
        execute(&store, &Command::Create(Index::new("users", ["email"]).into())).unwrap();
        let tenant_index = Index::new("users", ["email"]).with_prefix("tenant_a");
        execute(&store, &Command::Create(tenant_index.clone().into())).unwrap();

        execute(&store, &Command::Drop(tenant_index.into())).unwrap();
        assert!(store.indexes(Some("tenant_a"), "users").is_empty());
        assert_eq!(store.indexes(None, "users").len(), 1);
        assert!(store
            .requests()
            .iter()
            .any(|r| r == "DELETE /_db/tenant_a/_api/index/users/1"));
    }

    #[test]
    fn raw_query_runs_in_executor_database() {
        let store = MemoryStore::default();
        execute(
            &store,
            &Command::Create(Collection::new("users").with_prefix("tenant_a").into()),
        )
        .unwrap();
        let query = Command::Execute("FOR u0 IN `users` RETURN [ u0.`_key` ]".into());
        let err = execute(&store, &query).unwrap_err();
        assert_eq!(err.error_num(), Some(codes::DATA_SOURCE_NOT_FOUND));
        Executor::new(&store)
            .with_database(Some("tenant_a"))
            .execute(&query, None)
            .unwrap();
    }

    #[test]
    fn prefix_selects_database_and_errors_are_logged() {
        let store = MemoryStore::default();
        let tenant = Object::from(Collection::new("users").with_prefix("tenant_a"));
        let exec = Executor::new(&store);
        assert_eq!(exec.execute_logged(&Command::Create(tenant.clone()), None).level, Level::Info);
        assert!(store.collection(Some("tenant_a"), "users").is_some());
        assert!(store.collection(None, "users").is_none());

        let failed = exec.execute_logged(&Command::Create(tenant), None);
        assert_eq!(failed.level, Level::Error);
        assert!(failed.message.contains("duplicate name"));
    }
}
