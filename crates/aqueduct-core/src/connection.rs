//! Wire seam between the adapter and the store.
//!
//! Everything above this module speaks in [`Request`]/[`Response`] pairs addressed to a
//! relative API path (`collection/users`); the [`Connection`] implementation decides how
//! they travel. Paths are expanded to `/_db/{database}/_api/{path}`, where the database is
//! the request's tenant prefix or the connection's default.

use serde_json::{json, Map, Value};
use std::fmt;
use std::sync::Arc;

use crate::error::{AdapterError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: Method,
    /// Path below `/_api/`, without a leading slash.
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    /// Tenant prefix; `None` targets the connection's default database.
    pub database: Option<String>,
    /// Stream transaction id, sent as `x-arango-trx-id`.
    pub transaction: Option<String>,
}

impl Request {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            database: None,
            transaction: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Post, path).with_body(body)
    }

    pub fn put(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Put, path).with_body(body)
    }

    pub fn patch(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Patch, path).with_body(body)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn with_database(mut self, database: Option<&str>) -> Self {
        self.database = database.map(str::to_string);
        self
    }

    /// Attach the request to `trx`; its database wins over any prefix set earlier.
    pub fn in_transaction(mut self, trx: Option<&Transaction>) -> Self {
        if let Some(trx) = trx {
            self.transaction = Some(trx.id.clone());
            if trx.database.is_some() {
                self.database = trx.database.clone();
            }
        }
        self
    }

    /// Absolute path on the server, e.g. `/_db/app/_api/collection/users`.
    pub fn full_path(&self, default_database: &str) -> String {
        let db = self.database.as_deref().unwrap_or(default_database);
        format!("/_db/{db}/_api/{}", self.path)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    pub body: Value,
}

impl Response {
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status) && !self.body["error"].as_bool().unwrap_or(false)
    }

    /// Body of a successful response, or the store error it carries.
    pub fn into_result(self) -> Result<Value> {
        if self.is_success() {
            return Ok(self.body);
        }
        let error_num = self.body["errorNum"]
            .as_i64()
            .unwrap_or(i64::from(self.status));
        let message = self.body["errorMessage"]
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| format!("request failed with HTTP {}", self.status));
        Err(AdapterError::Store {
            status: self.status,
            error_num,
            message,
        })
    }
}

/// A handle able to deliver requests to the store. Implementations never retry.
pub trait Connection: Send + Sync {
    /// Database used when a request carries no tenant prefix.
    fn database(&self) -> &str;

    fn send(&self, request: Request) -> Result<Response>;

    fn request(&self, request: Request) -> Result<Value> {
        self.send(request)?.into_result()
    }
}

impl<C: Connection + ?Sized> Connection for &C {
    fn database(&self) -> &str {
        (**self).database()
    }

    fn send(&self, request: Request) -> Result<Response> {
        (**self).send(request)
    }
}

impl<C: Connection + ?Sized> Connection for Arc<C> {
    fn database(&self) -> &str {
        (**self).database()
    }

    fn send(&self, request: Request) -> Result<Response> {
        (**self).send(request)
    }
}

impl<C: Connection + ?Sized> Connection for Box<C> {
    fn database(&self) -> &str {
        (**self).database()
    }

    fn send(&self, request: Request) -> Result<Response> {
        (**self).send(request)
    }
}

/// Run AQL through the cursor API, following `hasMore` pages, and return every result row.
pub fn run_cursor<C: Connection + ?Sized>(
    conn: &C,
    database: Option<&str>,
    aql: &str,
    bind_vars: Map<String, Value>,
    trx: Option<&Transaction>,
) -> Result<Vec<Value>> {
    let mut page = conn.request(
        Request::post("cursor", json!({ "query": aql, "bindVars": bind_vars }))
            .with_database(database)
            .in_transaction(trx),
    )?;
    let mut rows = Vec::new();
    loop {
        match page.get_mut("result").map(Value::take) {
            Some(Value::Array(batch)) => rows.extend(batch),
            _ => {
                return Err(AdapterError::Transport {
                    context: "cursor".into(),
                    message: format!("cursor response carries no result array: {page}"),
                })
            }
        }
        let has_more = page["hasMore"].as_bool().unwrap_or(false);
        let id = page["id"].as_str().map(str::to_string);
        match (has_more, id) {
            (true, Some(id)) => {
                page = conn.request(
                    Request::new(Method::Post, format!("cursor/{id}"))
                        .with_database(database)
                        .in_transaction(trx),
                )?;
            }
            (true, None) => {
                return Err(AdapterError::Transport {
                    context: "cursor".into(),
                    message: "response reports more rows but carries no cursor id".into(),
                })
            }
            (false, _) => break,
        }
    }
    tracing::trace!(rows = rows.len(), "cursor drained");
    Ok(rows)
}

/// Stream transaction handle. Every operation that should run inside the transaction
/// takes it explicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    id: String,
    database: Option<String>,
}

impl Transaction {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn database(&self) -> Option<&str> {
        self.database.as_deref()
    }

    pub fn begin<C: Connection + ?Sized>(
        conn: &C,
        database: Option<&str>,
        write: &[String],
        read: &[String],
    ) -> Result<Self> {
        let body = json!({ "collections": { "write": write, "read": read } });
        let res = conn.request(Request::post("transaction/begin", body).with_database(database))?;
        let id = res["result"]["id"]
            .as_str()
            .ok_or_else(|| AdapterError::Transport {
                context: "transaction/begin".into(),
                message: format!("missing transaction id in {res}"),
            })?
            .to_string();
        tracing::debug!(trx = %id, "transaction started");
        Ok(Self {
            id,
            database: database.map(str::to_string),
        })
    }

    pub fn commit<C: Connection + ?Sized>(self, conn: &C) -> Result<()> {
        conn.request(
            Request::new(Method::Put, format!("transaction/{}", self.id))
                .with_database(self.database.as_deref()),
        )?;
        tracing::debug!(trx = %self.id, "transaction committed");
        Ok(())
    }

    pub fn abort<C: Connection + ?Sized>(self, conn: &C) -> Result<()> {
        conn.request(
            Request::delete(format!("transaction/{}", self.id))
                .with_database(self.database.as_deref()),
        )?;
        tracing::debug!(trx = %self.id, "transaction aborted");
        Ok(())
    }
}

/// Run `f` inside a fresh stream transaction: commit on `Ok`, abort on `Err`.
pub fn with_transaction<C, T, F>(
    conn: &C,
    database: Option<&str>,
    write: &[String],
    f: F,
) -> Result<T>
where
    C: Connection + ?Sized,
    F: FnOnce(&Transaction) -> Result<T>,
{
    let trx = Transaction::begin(conn, database, write, &[])?;
    match f(&trx) {
        Ok(value) => {
            trx.commit(conn)?;
            Ok(value)
        }
        Err(err) => {
            let id = trx.id.clone();
            if let Err(abort_err) = trx.abort(conn) {
                tracing::warn!(trx = %id, error = %abort_err, "failed to abort transaction");
            }
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct Scripted {
        seen: Mutex<Vec<Request>>,
        replies: Mutex<Vec<Response>>,
    }

    impl Scripted {
        fn new(replies: Vec<Response>) -> Self {
            Self {
                seen: Mutex::new(Vec::new()),
                replies: Mutex::new(replies.into_iter().rev().collect()),
            }
        }
    }

    impl Connection for Scripted {
        fn database(&self) -> &str {
            "_system"
        }

        fn send(&self, request: Request) -> Result<Response> {
            self.seen.lock().push(request);
            Ok(self
                .replies
                .lock()
                .pop()
                .unwrap_or_else(|| Response::new(500, json!({"error": true}))))
        }
    }

    #[test]
    fn full_path_uses_prefix_or_default() {
        let req = Request::get("collection/users");
        assert_eq!(req.full_path("app"), "/_db/app/_api/collection/users");
        let req = req.with_database(Some("tenant_a"));
        assert_eq!(req.full_path("app"), "/_db/tenant_a/_api/collection/users");
    }

    #[test]
    fn error_bodies_become_store_errors() {
        let res = Response::new(
            409,
            json!({"error": true, "errorNum": 1207, "errorMessage": "duplicate name"}),
        );
        let err = res.into_result().unwrap_err();
        assert!(err.is_conflict());
        assert!(err.to_string().contains("duplicate name"));

        let err = Response::new(502, Value::Null).into_result().unwrap_err();
        assert_eq!(err.error_num(), Some(502));
    }

    #[test]
    fn cursor_follows_pages() {
        let conn = Scripted::new(vec![
            Response::new(201, json!({"result": [[1], [2]], "hasMore": true, "id": "77"})),
            Response::new(200, json!({"result": [[3]], "hasMore": false})),
        ]);
        let rows = run_cursor(&conn, None, "FOR x IN y RETURN [x]", Map::new(), None).unwrap();
        assert_eq!(rows, vec![json!([1]), json!([2]), json!([3])]);
        let seen = conn.seen.lock();
        assert_eq!(seen[1].path, "cursor/77");
        assert_eq!(seen[1].method, Method::Post);
    }

    #[test]
    fn cursor_page_without_result_is_a_transport_error() {
        let conn = Scripted::new(vec![Response::new(
            200,
            json!("<html>bad gateway</html>"),
        )]);
        let err = run_cursor(&conn, None, "FOR x IN y RETURN [x]", Map::new(), None).unwrap_err();
        assert!(matches!(err, AdapterError::Transport { .. }));
    }

    #[test]
    fn failed_body_aborts_transaction() {
        let conn = Scripted::new(vec![
            Response::new(201, json!({"result": {"id": "trx-1", "status": "running"}})),
            Response::new(200, json!({"result": {"id": "trx-1", "status": "aborted"}})),
        ]);
        let out: Result<()> = with_transaction(&conn, Some("t1"), &[], |trx| {
            assert_eq!(trx.id(), "trx-1");
            Err(AdapterError::Validation("boom".into()))
        });
        assert!(matches!(out, Err(AdapterError::Validation(_))));
        let seen = conn.seen.lock();
        assert_eq!(seen[1].method, Method::Delete);
        assert_eq!(seen[1].full_path("_system"), "/_db/t1/_api/transaction/trx-1");
    }
}
