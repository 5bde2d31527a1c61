pub mod analyzer;
pub mod command;
pub mod context;
pub mod executor;
pub mod runner;
pub mod source;
pub mod view;

pub use analyzer::{Analyzer, AnalyzerKind, Feature, SubAnalyzer};
pub use command::{Collection, Command, Index, IndexKind, Object};
pub use context::MigrationContext;
pub use executor::{execute, Executor, Level, LogRecord};
pub use runner::{
    Direction, Migration, MigrationEntry, MigrationStatus, Migrator, MigratorOptions, StatusLine,
    Strategy, DEFAULT_MIGRATIONS_COLLECTION,
};
pub use source::{discover, FileMigration};
pub use view::{Link, SortDirection, SortField, StoredValue, View, ViewChange};
