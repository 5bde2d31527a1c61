//! [`Connection`] over the store's HTTP API using a blocking reqwest client.

use std::time::Duration;

use aqueduct_core::{AdapterError, Connection, Method, Request, Response, Result};
use reqwest::blocking::Client;
use serde_json::Value;

pub const DEFAULT_ENDPOINT: &str = "http://localhost:8529";
pub const DEFAULT_DATABASE: &str = "_system";
const TRX_HEADER: &str = "x-arango-trx-id";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpConfig {
    pub endpoint: String,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Forwarded to the client; `None` waits indefinitely.
    pub timeout: Option<Duration>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            database: DEFAULT_DATABASE.to_string(),
            username: Some("root".to_string()),
            password: None,
            timeout: None,
        }
    }
}

impl HttpConfig {
    /// `ARANGO_ENDPOINT`, `ARANGO_DATABASE`, `ARANGO_USERNAME`, `ARANGO_PASSWORD` and
    /// `ARANGO_TIMEOUT_MS` override the defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        Self {
            endpoint: var("ARANGO_ENDPOINT").unwrap_or(defaults.endpoint),
            database: var("ARANGO_DATABASE").unwrap_or(defaults.database),
            username: var("ARANGO_USERNAME").or(defaults.username),
            password: var("ARANGO_PASSWORD").or(defaults.password),
            timeout: var("ARANGO_TIMEOUT_MS")
                .and_then(|ms| ms.parse().ok())
                .map(Duration::from_millis)
                .or(defaults.timeout),
        }
    }
}

pub struct HttpConnection {
    client: Client,
    config: HttpConfig,
}

impl HttpConnection {
    pub fn new(config: HttpConfig) -> Result<Self> {
        let mut builder = Client::builder().user_agent(concat!("aqueduct/", env!("CARGO_PKG_VERSION")));
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(|e| AdapterError::Transport {
            context: "client".into(),
            message: e.to_string(),
        })?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &HttpConfig {
        &self.config
    }

    fn url(&self, request: &Request) -> String {
        format!(
            "{}{}",
            self.config.endpoint.trim_end_matches('/'),
            request.full_path(&self.config.database)
        )
    }
}

fn method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Patch => reqwest::Method::PATCH,
        Method::Delete => reqwest::Method::DELETE,
    }
}

impl Connection for HttpConnection {
    fn database(&self) -> &str {
        &self.config.database
    }

    fn send(&self, request: Request) -> Result<Response> {
        let url = self.url(&request);
        let context = format!("{} {}", request.method, request.full_path(&self.config.database));
        let transport = |e: reqwest::Error| AdapterError::Transport {
            context: context.clone(),
            message: e.to_string(),
        };

        let mut builder = self.client.request(method(request.method), &url);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(user) = &self.config.username {
            builder = builder.basic_auth(user, self.config.password.as_deref());
        }
        if let Some(trx) = &request.transaction {
            builder = builder.header(TRX_HEADER, trx);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        tracing::trace!(%context, "sending request");
        let resp = builder.send().map_err(transport)?;
        let status = resp.status().as_u16();
        let text = resp.text().map_err(transport)?;
        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).map_err(|e| AdapterError::Transport {
                context: context.clone(),
                message: format!("malformed response body (HTTP {status}): {e}"),
            })?
        };
        Ok(Response::new(status, body))
    }
}
