use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use aqueduct_core::connection::{run_cursor, with_transaction};
use aqueduct_core::migration::{execute, Collection, Command};
use aqueduct_core::{AdapterError, Connection, Request};
use aqueduct_http::{HttpConfig, HttpConnection};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{post, put};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Map, Value};

#[derive(Clone, Default)]
struct Seen {
    lines: Arc<Mutex<Vec<String>>>,
}

impl Seen {
    fn push(&self, line: String) {
        self.lines.lock().push(line);
    }

    fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }
}

fn header(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string()
}

async fn create_collection(
    State(seen): State<Seen>,
    Path(db): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    seen.push(format!(
        "create {db} {} auth={}",
        body["name"].as_str().unwrap_or(""),
        header(&headers, "authorization")
    ));
    if body["name"] == "taken" {
        return (
            StatusCode::CONFLICT,
            Json(json!({"error": true, "code": 409, "errorNum": 1207, "errorMessage": "duplicate name"})),
        );
    }
    (StatusCode::OK, Json(body))
}

/// Databases named `behind_proxy` answer like a misconfigured gateway.
async fn cursor(
    State(seen): State<Seen>,
    Path(db): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    seen.push(format!(
        "cursor {db} trx={} bind={}",
        header(&headers, "x-arango-trx-id"),
        body["bindVars"]
    ));
    if db == "behind_proxy" {
        return (StatusCode::OK, "<html>proxy error page</html>").into_response();
    }
    (
        StatusCode::CREATED,
        Json(json!({"result": [[1], [2]], "hasMore": true, "id": "c1"})),
    )
        .into_response()
}

async fn next_page(State(seen): State<Seen>, Path((db, id)): Path<(String, String)>) -> Json<Value> {
    seen.push(format!("next {db} {id}"));
    Json(json!({"result": [[3]], "hasMore": false}))
}

async fn begin(State(seen): State<Seen>, Path(db): Path<String>) -> (StatusCode, Json<Value>) {
    seen.push(format!("begin {db}"));
    (StatusCode::CREATED, Json(json!({"result": {"id": "42", "status": "running"}})))
}

async fn finish(State(seen): State<Seen>, Path((db, id)): Path<(String, String)>) -> Json<Value> {
    seen.push(format!("commit {db} {id}"));
    Json(json!({"result": {"id": id, "status": "committed"}}))
}

async fn abort(State(seen): State<Seen>, Path((db, id)): Path<(String, String)>) -> Json<Value> {
    seen.push(format!("abort {db} {id}"));
    Json(json!({"result": {"id": id, "status": "aborted"}}))
}

async fn missing(Path((_db, name)): Path<(String, String)>) -> (StatusCode, Json<Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"error": true, "code": 404, "errorNum": 1203,
            "errorMessage": format!("collection or view not found: {name}")})),
    )
}

fn spawn_store() -> (String, Seen) {
    let seen = Seen::default();
    let app = Router::new()
        .route("/_db/:db/_api/collection", post(create_collection))
        .route("/_db/:db/_api/collection/:name", axum::routing::get(missing))
        .route("/_db/:db/_api/cursor", post(cursor))
        .route("/_db/:db/_api/cursor/:id", post(next_page))
        .route("/_db/:db/_api/transaction/begin", post(begin))
        .route("/_db/:db/_api/transaction/:id", put(finish).delete(abort))
        .with_state(seen.clone());

    let (tx, rx) = std::sync::mpsc::channel::<SocketAddr>();
    std::thread::spawn(move || {
        let rt = tokio::runtime::Runtime::new().expect("runtime");
        rt.block_on(async move {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
                .await
                .expect("bind");
            tx.send(listener.local_addr().expect("addr")).expect("send addr");
            axum::serve(listener, app).await.expect("serve");
        });
    });
    let addr = rx.recv().expect("server address");
    (format!("http://{addr}/"), seen)
}

fn connect(endpoint: String) -> HttpConnection {
    HttpConnection::new(HttpConfig {
        endpoint,
        database: "app".into(),
        username: Some("root".into()),
        password: Some("secret".into()),
        timeout: Some(Duration::from_secs(5)),
    })
    .unwrap()
}

#[test]
fn commands_reach_the_database_path_with_basic_auth() {
    let (endpoint, seen) = spawn_store();
    let conn = connect(endpoint);

    execute(&conn, &Command::Create(Collection::new("users").into())).unwrap();
    execute(
        &conn,
        &Command::CreateIfNotExists(Collection::new("taken").with_prefix("tenant_a").into()),
    )
    .unwrap();
    let err = execute(&conn, &Command::Create(Collection::new("taken").into())).unwrap_err();
    assert!(err.is_conflict());

    let lines = seen.lines();
    // root:secret
    assert_eq!(lines[0], "create app users auth=Basic cm9vdDpzZWNyZXQ=");
    assert!(lines[1].starts_with("create tenant_a taken"));
}

#[test]
fn store_errors_keep_status_and_error_number() {
    let (endpoint, _seen) = spawn_store();
    let conn = connect(endpoint);
    let err = conn
        .request(Request::get("collection/ghosts"))
        .unwrap_err();
    match err {
        AdapterError::Store {
            status,
            error_num,
            message,
        } => {
            assert_eq!(status, 404);
            assert_eq!(error_num, 1203);
            assert!(message.contains("ghosts"));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn cursor_pages_run_inside_the_transaction() {
    let (endpoint, seen) = spawn_store();
    let conn = connect(endpoint);
    let mut bind = Map::new();
    bind.insert("1".into(), json!("Ann"));

    let rows = with_transaction(&conn, None, &["users".to_string()], |trx| {
        run_cursor(&conn, None, "FOR u0 IN `users` RETURN [ u0.`n` ]", bind, Some(trx))
    })
    .unwrap();
    assert_eq!(rows, vec![json!([1]), json!([2]), json!([3])]);
    assert_eq!(
        seen.lines(),
        vec![
            "begin app".to_string(),
            r#"cursor app trx=42 bind={"1":"Ann"}"#.to_string(),
            "next app c1".to_string(),
            "commit app 42".to_string(),
        ]
    );
}

#[test]
fn failed_body_aborts_the_transaction() {
    let (endpoint, seen) = spawn_store();
    let conn = connect(endpoint);
    let result: aqueduct_core::Result<()> = with_transaction(&conn, Some("tenant_b"), &[], |_| {
        Err(AdapterError::Validation("nope".into()))
    });
    assert!(result.is_err());
    assert_eq!(seen.lines(), vec!["begin tenant_b", "abort tenant_b 42"]);
}

#[test]
fn non_json_success_body_is_a_transport_error() {
    let (endpoint, _seen) = spawn_store();
    let conn = connect(endpoint);
    let err = run_cursor(
        &conn,
        Some("behind_proxy"),
        "FOR u0 IN `users` RETURN [ u0.`a` ]",
        Map::new(),
        None,
    )
    .unwrap_err();
    let AdapterError::Transport { context, message } = &err else {
        panic!("unexpected {err:?}");
    };
    assert_eq!(context, "POST /_db/behind_proxy/_api/cursor");
    assert!(message.contains("malformed response body (HTTP 200)"));
}

#[test]
fn unreachable_endpoint_is_a_transport_error() {
    let conn = connect("http://127.0.0.1:1".into());
    let err = conn.request(Request::get("version")).unwrap_err();
    let AdapterError::Transport { context, .. } = &err else {
        panic!("unexpected {err:?}");
    };
    assert_eq!(context, "GET /_db/app/_api/version");
}

#[test]
fn config_reads_environment() {
    std::env::set_var("ARANGO_ENDPOINT", "http://db.internal:8529");
    std::env::set_var("ARANGO_DATABASE", "shop");
    std::env::set_var("ARANGO_TIMEOUT_MS", "1500");
    let config = HttpConfig::from_env();
    std::env::remove_var("ARANGO_ENDPOINT");
    std::env::remove_var("ARANGO_DATABASE");
    std::env::remove_var("ARANGO_TIMEOUT_MS");

    assert_eq!(config.endpoint, "http://db.internal:8529");
    assert_eq!(config.database, "shop");
    assert_eq!(config.timeout, Some(Duration::from_millis(1500)));
    assert_eq!(config.username.as_deref(), Some("root"));
    assert_eq!(conn_database(config), "shop");
}

fn conn_database(config: HttpConfig) -> String {
    HttpConnection::new(config).unwrap().database().to_string()
}
