pub mod adapter;
pub mod config;
pub mod connection;
pub mod error;
pub mod identifier;
pub mod jsonschema;
pub mod migration;
pub mod query;
pub mod schema;
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use adapter::{Adapter, Row};
pub use config::AdapterConfig;
pub use connection::{with_transaction, Connection, Method, Request, Response, Transaction};
pub use error::{AdapterError, Result};
pub use migration::{Command, Migration, MigrationContext, MigrationEntry, Migrator};
pub use query::compiler::{compile, CompiledQuery, Operation};
pub use query::Query;
pub use schema::{CollectionKind, EntitySchema, SchemaRegistry, TypeResolver};
