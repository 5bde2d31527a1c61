use serde_json::Value;
use thiserror::Error;

/// Store error numbers the adapter reacts to.
pub mod codes {
    pub const DOCUMENT_NOT_FOUND: i64 = 1202;
    pub const DATA_SOURCE_NOT_FOUND: i64 = 1203;
    pub const DUPLICATE_NAME: i64 = 1207;
    pub const UNIQUE_CONSTRAINT_VIOLATED: i64 = 1210;
    pub const INDEX_NOT_FOUND: i64 = 1212;
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("compile error: {message} (query: {query})")]
    Compile { message: String, query: String },
    #[error("schema validation error: {0}")]
    SchemaValidation(String),
    #[error("store error {error_num} (HTTP {status}): {message}")]
    Store {
        status: u16,
        error_num: i64,
        message: String,
    },
    #[error("migration order error: {0}")]
    MigrationOrder(String),
    #[error("irreversible migration: {0}")]
    Irreversible(String),
    #[error("invalid identifier format: {0}")]
    InvalidFormat(String),
    #[error("transport error ({context}): {message}")]
    Transport { context: String, message: String },
    #[error("query failed: {source} (query: {query}, params: {params:?})")]
    Query {
        query: String,
        params: Vec<Value>,
        #[source]
        source: Box<AdapterError>,
    },
    #[error("validation error: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AdapterError {
    pub(crate) fn compile(message: impl Into<String>, query: impl Into<String>) -> Self {
        AdapterError::Compile {
            message: message.into(),
            query: query.into(),
        }
    }

    /// Error number reported by the store, looking through query wrappers.
    pub fn error_num(&self) -> Option<i64> {
        match self {
            AdapterError::Store { error_num, .. } => Some(*error_num),
            AdapterError::Query { source, .. } => source.error_num(),
            _ => None,
        }
    }

    /// "Already exists" as reported by the store.
    pub fn is_conflict(&self) -> bool {
        self.error_num() == Some(codes::DUPLICATE_NAME)
    }

    /// Any of the store's "does not exist" answers for collections, views, analyzers,
    /// documents and indexes.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self.error_num(),
            Some(codes::DATA_SOURCE_NOT_FOUND)
                | Some(codes::DOCUMENT_NOT_FOUND)
                | Some(codes::INDEX_NOT_FOUND)
        )
    }
}

pub type Result<T> = std::result::Result<T, AdapterError>;
