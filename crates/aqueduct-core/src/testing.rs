//! In-memory stand-in for the store's HTTP API.
//!
//! Covers the collection, index, view, analyzer, document, cursor and stream-transaction
//! endpoints with the error numbers the adapter reacts to. The cursor endpoint
//! understands the single-source AQL the compiler emits for equality filters, sorting,
//! limits, counts, removal and `RETURN [ ... ]` projections; anything else is rejected.
//!
//! Document writes made inside a stream transaction are undone on abort, and are refused
//! for collections the transaction did not declare for writing. Collection, index, view
//! and analyzer changes are applied immediately, as the real store does.

use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

use crate::connection::{Connection, Method, Request, Response};
use crate::error::{codes, Result};

const BAD_PARAMETER: i64 = 10;
const EDGE_ATTRIBUTE_MISSING: i64 = 1233;
const CURSOR_NOT_FOUND: i64 = 1600;
const TRANSACTION_UNREGISTERED_COLLECTION: i64 = 1652;
const TRANSACTION_NOT_FOUND: i64 = 1655;

const CLAUSES: [&str; 6] = [" SORT ", " LIMIT ", " REMOVE ", " UPDATE ", " RETURN ", " COLLECT "];

type Failure = (u16, i64, String);
type Reply = std::result::Result<(u16, Value), Failure>;

fn bad(message: impl Into<String>) -> Failure {
    (400, BAD_PARAMETER, message.into())
}

fn missing_source(name: &str) -> Failure {
    (
        404,
        codes::DATA_SOURCE_NOT_FOUND,
        format!("collection or view not found: {name}"),
    )
}

fn duplicate(name: &str) -> Failure {
    (409, codes::DUPLICATE_NAME, format!("duplicate name: {name}"))
}

#[derive(Default)]
struct Collection {
    props: Map<String, Value>,
    docs: Vec<Value>,
    indexes: Vec<Value>,
    next_index: u64,
}

#[derive(Default)]
struct Database {
    collections: BTreeMap<String, Collection>,
    views: BTreeMap<String, Map<String, Value>>,
    analyzers: BTreeMap<String, Value>,
}

impl Database {
    fn name_taken(&self, name: &str) -> bool {
        self.collections.contains_key(name) || self.views.contains_key(name)
    }

    fn collection(&mut self, name: &str) -> std::result::Result<&mut Collection, Failure> {
        self.collections
            .get_mut(name)
            .ok_or_else(|| missing_source(name))
    }
}

enum Undo {
    Remove { collection: String, key: String },
    Restore { collection: String, doc: Value },
}

struct Trx {
    database: String,
    write: Vec<String>,
    undo: Vec<Undo>,
}

#[derive(Default)]
struct State {
    databases: HashMap<String, Database>,
    transactions: HashMap<String, Trx>,
    cursors: HashMap<String, Vec<Value>>,
    requests: Vec<String>,
    queries: Vec<String>,
    next_rev: u64,
}

/// Fake store; every database name is created on first use.
pub struct MemoryStore {
    database: String,
    batch_size: usize,
    state: Mutex<State>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new("_system")
    }
}

impl MemoryStore {
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            batch_size: 1000,
            state: Mutex::new(State::default()),
        }
    }

    /// Rows per cursor page; small values exercise `hasMore` paging.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// `"<METHOD> <full path>"` for every request received, in order.
    pub fn requests(&self) -> Vec<String> {
        self.state.lock().requests.clone()
    }

    /// AQL text of every cursor request, in order.
    pub fn queries(&self) -> Vec<String> {
        self.state.lock().queries.clone()
    }

    pub fn clear_requests(&self) {
        let mut state = self.state.lock();
        state.requests.clear();
        state.queries.clear();
    }

    fn db_name(&self, database: Option<&str>) -> String {
        database.unwrap_or(&self.database).to_string()
    }

    pub fn collection(&self, database: Option<&str>, name: &str) -> Option<Value> {
        let state = self.state.lock();
        state
            .databases
            .get(&self.db_name(database))?
            .collections
            .get(name)
            .map(|c| Value::Object(c.props.clone()))
    }

    pub fn documents(&self, database: Option<&str>, collection: &str) -> Vec<Value> {
        let state = self.state.lock();
        state
            .databases
            .get(&self.db_name(database))
            .and_then(|db| db.collections.get(collection))
            .map(|c| c.docs.clone())
            .unwrap_or_default()
    }

    pub fn indexes(&self, database: Option<&str>, collection: &str) -> Vec<Value> {
        let state = self.state.lock();
        state
            .databases
            .get(&self.db_name(database))
            .and_then(|db| db.collections.get(collection))
            .map(|c| c.indexes.clone())
            .unwrap_or_default()
    }

    pub fn view(&self, database: Option<&str>, name: &str) -> Option<Value> {
        let state = self.state.lock();
        state
            .databases
            .get(&self.db_name(database))?
            .views
            .get(name)
            .map(|v| Value::Object(v.clone()))
    }

    pub fn analyzer(&self, database: Option<&str>, name: &str) -> Option<Value> {
        let state = self.state.lock();
        state
            .databases
            .get(&self.db_name(database))?
            .analyzers
            .get(name)
            .cloned()
    }

    pub fn open_transactions(&self) -> usize {
        self.state.lock().transactions.len()
    }
}

impl Connection for MemoryStore {
    fn database(&self) -> &str {
        &self.database
    }

    fn send(&self, request: Request) -> Result<Response> {
        let mut state = self.state.lock();
        state
            .requests
            .push(format!("{} {}", request.method, request.full_path(&self.database)));
        let db_name = self.db_name(request.database.as_deref());
        let reply = state.route(&db_name, &request, self.batch_size);
        Ok(match reply {
            Ok((status, body)) => Response::new(status, body),
            Err((status, error_num, message)) => Response::new(
                status,
                json!({"error": true, "code": status, "errorNum": error_num, "errorMessage": message}),
            ),
        })
    }
}

impl State {
    fn db(&mut self, name: &str) -> &mut Database {
        self.databases.entry(name.to_string()).or_default()
    }

    fn rev(&mut self) -> String {
        self.next_rev += 1;
        format!("_rev{}", self.next_rev)
    }

    fn record(&mut self, request: &Request, undo: Undo) {
        if let Some(trx) = request
            .transaction
            .as_ref()
            .and_then(|id| self.transactions.get_mut(id))
        {
            trx.undo.push(undo);
        }
    }

    fn check_write(&self, request: &Request, collection: &str) -> std::result::Result<(), Failure> {
        let Some(trx) = request
            .transaction
            .as_ref()
            .and_then(|id| self.transactions.get(id))
        else {
            return Ok(());
        };
        if trx.write.iter().any(|c| c == collection) {
            return Ok(());
        }
        Err((
            400,
            TRANSACTION_UNREGISTERED_COLLECTION,
            format!("unregistered collection used in transaction: {collection}"),
        ))
    }

    fn route(&mut self, db_name: &str, req: &Request, batch_size: usize) -> Reply {
        if let Some(id) = &req.transaction {
            if !self.transactions.contains_key(id) {
                return Err((404, TRANSACTION_NOT_FOUND, format!("transaction '{id}' not found")));
            }
        }
        let body = req.body.clone().unwrap_or(Value::Null);
        let segments: Vec<&str> = req.path.split('/').collect();
        match (req.method, segments.as_slice()) {
            (Method::Post, ["collection"]) => self.create_collection(db_name, body),
            (Method::Get, ["collection", name]) | (Method::Get, ["collection", name, "properties"]) => {
                let c = self.db(db_name).collection(name)?;
                Ok((200, Value::Object(c.props.clone())))
            }
            (Method::Put, ["collection", name, "properties"]) => {
                let c = self.db(db_name).collection(name)?;
                if let Value::Object(changes) = body {
                    c.props.extend(changes);
                }
                Ok((200, Value::Object(c.props.clone())))
            }
            (Method::Put, ["collection", name, "rename"]) => {
                let to = body["name"].as_str().ok_or_else(|| bad("missing new name"))?;
                let db = self.db(db_name);
                if db.name_taken(to) {
                    return Err(duplicate(to));
                }
                let mut c = db
                    .collections
                    .remove(*name)
                    .ok_or_else(|| missing_source(name))?;
                c.props.insert("name".into(), json!(to));
                let props = Value::Object(c.props.clone());
                db.collections.insert(to.to_string(), c);
                Ok((200, props))
            }
            (Method::Delete, ["collection", name]) => {
                self.db(db_name)
                    .collections
                    .remove(*name)
                    .ok_or_else(|| missing_source(name))?;
                Ok((200, json!({"id": name})))
            }
            (Method::Post, ["index"]) => self.create_index(db_name, req, body),
            (Method::Get, ["index"]) => {
                let coll = query_param(req, "collection").ok_or_else(|| bad("missing collection"))?;
                let c = self.db(db_name).collection(coll)?;
                let mut indexes = vec![json!({
                    "id": format!("{coll}/0"), "type": "primary", "name": "primary", "fields": ["_key"]
                })];
                indexes.extend(c.indexes.iter().cloned());
                Ok((200, json!({"indexes": indexes})))
            }
            (Method::Delete, ["index", coll, id]) => {
                let full = format!("{coll}/{id}");
                let c = self.db(db_name).collection(coll)?;
                let before = c.indexes.len();
                c.indexes.retain(|i| i["id"] != full.as_str());
                if c.indexes.len() == before {
                    return Err((404, codes::INDEX_NOT_FOUND, format!("index not found: {full}")));
                }
                Ok((200, json!({"id": full})))
            }
            (Method::Post, ["view"]) => {
                let Value::Object(def) = body else {
                    return Err(bad("view definition must be an object"));
                };
                let name = def
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or_else(|| bad("missing view name"))?
                    .to_string();
                let db = self.db(db_name);
                if db.name_taken(&name) {
                    return Err(duplicate(&name));
                }
                db.views.insert(name, def.clone());
                Ok((201, Value::Object(def)))
            }
            (Method::Get, ["view", name]) | (Method::Get, ["view", name, "properties"]) => {
                let db = self.db(db_name);
                let view = db.views.get(*name).ok_or_else(|| missing_source(name))?;
                Ok((200, Value::Object(view.clone())))
            }
            (Method::Patch, ["view", name, "properties"]) => {
                let db = self.db(db_name);
                let view = db.views.get_mut(*name).ok_or_else(|| missing_source(name))?;
                if let Value::Object(changes) = body {
                    for (key, value) in changes {
                        if key == "links" {
                            if let (Some(Value::Object(links)), Value::Object(added)) =
                                (view.get_mut("links"), &value)
                            {
                                links.extend(added.clone());
                                continue;
                            }
                        }
                        view.insert(key, value);
                    }
                }
                Ok((200, Value::Object(view.clone())))
            }
            (Method::Put, ["view", name, "rename"]) => {
                let to = body["name"].as_str().ok_or_else(|| bad("missing new name"))?;
                let db = self.db(db_name);
                if db.name_taken(to) {
                    return Err(duplicate(to));
                }
                let mut view = db.views.remove(*name).ok_or_else(|| missing_source(name))?;
                view.insert("name".into(), json!(to));
                let out = Value::Object(view.clone());
                db.views.insert(to.to_string(), view);
                Ok((200, out))
            }
            (Method::Delete, ["view", name]) => {
                self.db(db_name)
                    .views
                    .remove(*name)
                    .ok_or_else(|| missing_source(name))?;
                Ok((200, json!({"result": true})))
            }
            (Method::Post, ["analyzer"]) => {
                let name = body["name"]
                    .as_str()
                    .ok_or_else(|| bad("missing analyzer name"))?
                    .to_string();
                let db = self.db(db_name);
                if db.analyzers.contains_key(&name) {
                    return Err(duplicate(&name));
                }
                db.analyzers.insert(name, body.clone());
                Ok((201, body))
            }
            (Method::Get, ["analyzer", name]) => {
                let db = self.db(db_name);
                db.analyzers
                    .get(*name)
                    .cloned()
                    .map(|a| (200, a))
                    .ok_or_else(|| analyzer_missing(name))
            }
            (Method::Delete, ["analyzer", name]) => {
                self.db(db_name)
                    .analyzers
                    .remove(*name)
                    .ok_or_else(|| analyzer_missing(name))?;
                Ok((200, json!({"name": name})))
            }
            (Method::Post, ["document", coll]) => self.insert_document(db_name, req, coll, body),
            (Method::Get, ["document", coll, key]) => {
                let c = self.db(db_name).collection(coll)?;
                c.docs
                    .iter()
                    .find(|d| d["_key"] == *key)
                    .cloned()
                    .map(|d| (200, d))
                    .ok_or_else(|| document_missing(coll, key))
            }
            (Method::Patch, ["document", coll, key]) => {
                self.check_write(req, coll)?;
                let rev = self.rev();
                let c = self.db(db_name).collection(coll)?;
                let doc = c
                    .docs
                    .iter_mut()
                    .find(|d| d["_key"] == *key)
                    .ok_or_else(|| document_missing(coll, key))?;
                let old = doc.clone();
                if let (Value::Object(target), Value::Object(changes)) = (&mut *doc, body) {
                    target.extend(changes);
                    target.insert("_rev".into(), json!(rev));
                }
                let new = doc.clone();
                self.record(
                    req,
                    Undo::Restore {
                        collection: coll.to_string(),
                        doc: old,
                    },
                );
                Ok((
                    202,
                    json!({"_id": new["_id"], "_key": new["_key"], "_rev": new["_rev"], "new": new}),
                ))
            }
            (Method::Delete, ["document", coll, key]) => {
                self.check_write(req, coll)?;
                let c = self.db(db_name).collection(coll)?;
                let pos = c
                    .docs
                    .iter()
                    .position(|d| d["_key"] == *key)
                    .ok_or_else(|| document_missing(coll, key))?;
                let old = c.docs.remove(pos);
                let reply = json!({"_id": old["_id"], "_key": old["_key"], "_rev": old["_rev"]});
                self.record(
                    req,
                    Undo::Restore {
                        collection: coll.to_string(),
                        doc: old,
                    },
                );
                Ok((202, reply))
            }
            (Method::Post, ["cursor"]) => {
                let query = body["query"]
                    .as_str()
                    .ok_or_else(|| bad("missing query"))?
                    .to_string();
                let bind = body["bindVars"].as_object().cloned().unwrap_or_default();
                let batch = body["batchSize"]
                    .as_u64()
                    .map(|b| b as usize)
                    .unwrap_or(batch_size);
                self.queries.push(query.clone());
                let rows = self.run_query(db_name, req, &query, &bind)?;
                Ok(self.page(rows, batch))
            }
            (Method::Post, ["cursor", id]) | (Method::Put, ["cursor", id]) => {
                let rows = self
                    .cursors
                    .remove(*id)
                    .ok_or_else(|| (404, CURSOR_NOT_FOUND, format!("cursor not found: {id}")))?;
                Ok(self.page(rows, batch_size))
            }
            (Method::Post, ["transaction", "begin"]) => {
                let write = match &body["collections"]["write"] {
                    Value::String(name) => vec![name.clone()],
                    Value::Array(names) => names
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect(),
                    _ => Vec::new(),
                };
                let id = Uuid::new_v4().simple().to_string();
                self.transactions.insert(
                    id.clone(),
                    Trx {
                        database: db_name.to_string(),
                        write,
                        undo: Vec::new(),
                    },
                );
                Ok((201, json!({"result": {"id": id, "status": "running"}})))
            }
            (Method::Put, ["transaction", id]) => {
                self.transactions
                    .remove(*id)
                    .ok_or_else(|| transaction_missing(id))?;
                Ok((200, json!({"result": {"id": id, "status": "committed"}})))
            }
            (Method::Delete, ["transaction", id]) => {
                let trx = self
                    .transactions
                    .remove(*id)
                    .ok_or_else(|| transaction_missing(id))?;
                let db = self.db(&trx.database);
                for undo in trx.undo.into_iter().rev() {
                    db.apply(undo);
                }
                Ok((200, json!({"result": {"id": id, "status": "aborted"}})))
            }
            (method, _) => Err((404, 404, format!("unknown route {method} {}", req.path))),
        }
    }

    fn create_collection(&mut self, db_name: &str, body: Value) -> Reply {
        let Value::Object(mut props) = body else {
            return Err(bad("collection definition must be an object"));
        };
        let name = props
            .get("name")
            .and_then(Value::as_str)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| bad("missing collection name"))?
            .to_string();
        let db = self.db(db_name);
        if db.name_taken(&name) {
            return Err(duplicate(&name));
        }
        props.entry("type").or_insert(json!(2));
        props.entry("schema").or_insert(Value::Null);
        let out = Value::Object(props.clone());
        db.collections.insert(
            name,
            Collection {
                props,
                next_index: 1,
                ..Collection::default()
            },
        );
        Ok((200, out))
    }

    fn create_index(&mut self, db_name: &str, req: &Request, body: Value) -> Reply {
        let coll = query_param(req, "collection").ok_or_else(|| bad("missing collection"))?;
        let Value::Object(mut def) = body else {
            return Err(bad("index definition must be an object"));
        };
        let c = self.db(db_name).collection(coll)?;
        let id = format!("{coll}/{}", c.next_index);
        let name = def
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("idx_{}", c.next_index));
        if c.indexes.iter().any(|i| i["name"] == name.as_str()) {
            return Err(duplicate(&name));
        }
        c.next_index += 1;
        def.insert("id".into(), json!(id));
        def.insert("name".into(), json!(name));
        c.indexes.push(Value::Object(def.clone()));
        def.insert("isNewlyCreated".into(), json!(true));
        Ok((201, Value::Object(def)))
    }

    fn insert_document(&mut self, db_name: &str, req: &Request, coll: &str, body: Value) -> Reply {
        let Value::Object(mut doc) = body else {
            return Err(bad("document body must be an object"));
        };
        self.check_write(req, coll)?;
        let rev = self.rev();
        let c = self.db(db_name).collection(coll)?;
        let key = doc
            .get("_key")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().simple().to_string());
        if c.docs.iter().any(|d| d["_key"] == key.as_str()) {
            return Err((
                409,
                codes::UNIQUE_CONSTRAINT_VIOLATED,
                format!("unique constraint violated - in index primary, conflicting key: {key}"),
            ));
        }
        if c.props["type"] == 3 {
            for attr in ["_from", "_to"] {
                if !doc.get(attr).map_or(false, Value::is_string) {
                    return Err((400, EDGE_ATTRIBUTE_MISSING, format!("edge attribute missing or invalid: {attr}")));
                }
            }
        }
        doc.insert("_key".into(), json!(key));
        doc.insert("_id".into(), json!(format!("{coll}/{key}")));
        doc.insert("_rev".into(), json!(rev));
        let doc = Value::Object(doc);
        c.docs.push(doc.clone());
        self.record(
            req,
            Undo::Remove {
                collection: coll.to_string(),
                key: key.clone(),
            },
        );
        Ok((
            201,
            json!({"_id": doc["_id"], "_key": key, "_rev": doc["_rev"], "new": doc}),
        ))
    }

    fn page(&mut self, mut rows: Vec<Value>, batch: usize) -> (u16, Value) {
        if rows.len() <= batch {
            return (201, json!({"result": rows, "hasMore": false}));
        }
        let rest = rows.split_off(batch);
        let id = Uuid::new_v4().simple().to_string();
        self.cursors.insert(id.clone(), rest);
        (201, json!({"result": rows, "hasMore": true, "id": id}))
    }

    fn run_query(
        &mut self,
        db_name: &str,
        req: &Request,
        aql: &str,
        bind: &Map<String, Value>,
    ) -> std::result::Result<Vec<Value>, Failure> {
        let unsupported = || bad(format!("unsupported query: {aql}"));
        if aql.matches("FOR ").count() != 1 {
            return Err(unsupported());
        }
        let rest = aql.strip_prefix("FOR ").ok_or_else(unsupported)?;
        let (alias, rest) = rest.split_once(" IN `").ok_or_else(unsupported)?;
        let (coll, _) = rest.split_once('`').ok_or_else(unsupported)?;

        let mut filters = Vec::new();
        if let Some(segment) = clause(aql, " FILTER ") {
            for term in segment.split(" && ") {
                let term = term.trim_start_matches('(').trim_end_matches(')');
                let (lhs, rhs) = term.split_once(" == ").ok_or_else(unsupported)?;
                let field = field_name(lhs, alias).ok_or_else(unsupported)?;
                filters.push((field, literal(rhs, bind).ok_or_else(unsupported)?));
            }
        }
        let mut sort = Vec::new();
        if let Some(segment) = clause(aql, " SORT ") {
            for term in segment.split(", ") {
                let (term, desc) = match term.strip_suffix(" DESC") {
                    Some(t) => (t, true),
                    None => (term, false),
                };
                sort.push((field_name(term, alias).ok_or_else(unsupported)?, desc));
            }
        }
        let limit = match clause(aql, " LIMIT ") {
            Some(segment) => {
                let parts = segment
                    .split(", ")
                    .map(|p| literal(p, bind).and_then(|v| v.as_u64()).map(|n| n as usize))
                    .collect::<Option<Vec<_>>>()
                    .ok_or_else(unsupported)?;
                match parts.as_slice() {
                    [count] => Some((0, *count)),
                    [offset, count] => Some((*offset, *count)),
                    _ => return Err(unsupported()),
                }
            }
            None => None,
        };

        let removes = aql.contains(&format!(" REMOVE {alias} IN "));
        if removes {
            self.check_write(req, coll)?;
        }
        let c = self.db(db_name).collection(coll)?;
        let mut matched: Vec<Value> = c
            .docs
            .iter()
            .filter(|d| filters.iter().all(|(f, v)| d.get(f).unwrap_or(&Value::Null) == v))
            .cloned()
            .collect();
        matched.sort_by(|a, b| {
            sort.iter()
                .map(|(f, desc)| {
                    let ord = compare(&a[f.as_str()], &b[f.as_str()]);
                    if *desc {
                        ord.reverse()
                    } else {
                        ord
                    }
                })
                .find(|o| *o != Ordering::Equal)
                .unwrap_or(Ordering::Equal)
        });
        if let Some((offset, count)) = limit {
            matched = matched.into_iter().skip(offset).take(count).collect();
        }

        if removes {
            let keys: Vec<Value> = matched.iter().map(|d| d["_key"].clone()).collect();
            c.docs.retain(|d| !keys.contains(&d["_key"]));
            for doc in &matched {
                self.record(
                    req,
                    Undo::Restore {
                        collection: coll.to_string(),
                        doc: doc.clone(),
                    },
                );
            }
        } else if aql.contains(" UPDATE ") {
            return Err(unsupported());
        }

        if aql.contains(" COLLECT WITH COUNT INTO ") {
            return Ok(vec![json!(matched.len())]);
        }
        let Some(projection) = aql
            .split_once(" RETURN ")
            .map(|(_, r)| r.trim_start_matches("DISTINCT "))
        else {
            return Ok(Vec::new());
        };
        let inner = projection
            .strip_prefix("[ ")
            .and_then(|p| p.strip_suffix(" ]"))
            .ok_or_else(unsupported)?;
        let fields = inner
            .split(", ")
            .map(|f| {
                field_name(f, alias)
                    .or_else(|| field_name(f, "OLD"))
                    .ok_or_else(unsupported)
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(matched
            .iter()
            .map(|d| Value::Array(fields.iter().map(|f| d[f.as_str()].clone()).collect()))
            .collect())
    }
}

impl Database {
    fn apply(&mut self, undo: Undo) {
        match undo {
            Undo::Remove { collection, key } => {
                if let Some(c) = self.collections.get_mut(&collection) {
                    c.docs.retain(|d| d["_key"] != key.as_str());
                }
            }
            Undo::Restore { collection, doc } => {
                if let Some(c) = self.collections.get_mut(&collection) {
                    match c.docs.iter_mut().find(|d| d["_key"] == doc["_key"]) {
                        Some(slot) => *slot = doc,
                        None => c.docs.push(doc),
                    }
                }
            }
        }
    }
}

fn analyzer_missing(name: &str) -> Failure {
    (404, codes::DOCUMENT_NOT_FOUND, format!("analyzer not found: {name}"))
}

fn document_missing(coll: &str, key: &str) -> Failure {
    (404, codes::DOCUMENT_NOT_FOUND, format!("document not found: {coll}/{key}"))
}

fn transaction_missing(id: &str) -> Failure {
    (404, TRANSACTION_NOT_FOUND, format!("transaction '{id}' not found"))
}

fn query_param<'r>(req: &'r Request, key: &str) -> Option<&'r str> {
    req.query
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

/// Text of the clause introduced by `keyword`, up to the next clause keyword.
fn clause<'a>(aql: &'a str, keyword: &str) -> Option<&'a str> {
    let (_, rest) = aql.split_once(keyword)?;
    let end = CLAUSES
        .iter()
        .filter_map(|k| rest.find(k))
        .min()
        .unwrap_or(rest.len());
    Some(&rest[..end])
}

/// `alias.`field`` to `field`.
fn field_name(expr: &str, alias: &str) -> Option<String> {
    let quoted = expr.strip_prefix(alias)?.strip_prefix('.')?;
    let name = quoted.strip_prefix('`')?.strip_suffix('`')?;
    Some(name.to_string())
}

fn literal(text: &str, bind: &Map<String, Value>) -> Option<Value> {
    let text = text.trim();
    if let Some(idx) = text.strip_prefix('@') {
        return bind.get(idx).cloned();
    }
    if let Some(inner) = text.strip_prefix('\'').and_then(|t| t.strip_suffix('\'')) {
        return Some(Value::String(inner.replace("\\'", "'").replace("\\\\", "\\")));
    }
    match text {
        "TRUE" => Some(Value::Bool(true)),
        "FALSE" => Some(Value::Bool(false)),
        "NULL" => Some(Value::Null),
        number => serde_json::from_str::<Value>(number)
            .ok()
            .filter(Value::is_number),
    }
}

fn compare(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{run_cursor, with_transaction};

    #[test]
    fn aborted_transaction_discards_document_writes() {
        let store = MemoryStore::default();
        store
            .request(Request::post("collection", json!({"name": "users"})))
            .unwrap();
        let _ = with_transaction(&store, None, &["users".to_string()], |trx| {
            store.request(
                Request::post("document/users", json!({"_key": "1", "name": "Ann"}))
                    .in_transaction(Some(trx)),
            )?;
            Err::<(), _>(crate::AdapterError::Validation("rollback".into()))
        });
        assert!(store.documents(None, "users").is_empty());
        assert_eq!(store.open_transactions(), 0);
    }

    #[test]
    fn cursor_evaluates_compiled_filters() {
        let store = MemoryStore::default().with_batch_size(1);
        store
            .request(Request::post("collection", json!({"name": "users"})))
            .unwrap();
        for (key, name, age) in [("1", "Ann", 30), ("2", "Bob", 20), ("3", "Ann", 40)] {
            store
                .request(Request::post(
                    "document/users",
                    json!({"_key": key, "name": name, "age": age}),
                ))
                .unwrap();
        }
        let mut bind = Map::new();
        bind.insert("1".into(), json!("Ann"));
        let rows = run_cursor(
            &store,
            None,
            "FOR u0 IN `users` FILTER (u0.`name` == @1) SORT u0.`age` DESC RETURN [ u0.`_key` ]",
            bind,
            None,
        )
        .unwrap();
        assert_eq!(rows, vec![json!(["3"]), json!(["1"])]);
    }

    #[test]
    fn transaction_writes_are_limited_to_declared_collections() {
        let store = MemoryStore::default();
        for name in ["users", "audit"] {
            store
                .request(Request::post("collection", json!({"name": name})))
                .unwrap();
        }
        let err = with_transaction(&store, None, &["users".to_string()], |trx| {
            store.request(
                Request::post("document/users", json!({"_key": "1"})).in_transaction(Some(trx)),
            )?;
            store.request(
                Request::post("document/audit", json!({"_key": "1"})).in_transaction(Some(trx)),
            )
        })
        .unwrap_err();
        assert_eq!(err.error_num(), Some(TRANSACTION_UNREGISTERED_COLLECTION));
        assert!(store.documents(None, "users").is_empty());
        assert!(store.documents(None, "audit").is_empty());
    }

    #[test]
    fn missing_collection_reports_data_source_not_found() {
        let store = MemoryStore::default();
        let err = store
            .request(Request::post("document/nope", json!({})))
            .unwrap_err();
        assert_eq!(err.error_num(), Some(codes::DATA_SOURCE_NOT_FOUND));
    }
}
