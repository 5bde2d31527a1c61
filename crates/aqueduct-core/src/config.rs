use std::path::PathBuf;

use crate::migration::{MigratorOptions, DEFAULT_MIGRATIONS_COLLECTION};

pub const DEFAULT_MIGRATIONS_PATH: &str = "priv/migrations";

/// Adapter and migration settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterConfig {
    /// Database used instead of the connection's default (multi-tenant prefix).
    pub prefix: Option<String>,
    /// When false, missing collections are created on first insert.
    pub static_mode: bool,
    pub migrations_collection: String,
    pub migrations_paths: Vec<PathBuf>,
    pub strict_version_order: bool,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            prefix: None,
            static_mode: true,
            migrations_collection: DEFAULT_MIGRATIONS_COLLECTION.to_string(),
            migrations_paths: vec![PathBuf::from(DEFAULT_MIGRATIONS_PATH)],
            strict_version_order: false,
        }
    }
}

fn env_flag(name: &str) -> Option<bool> {
    std::env::var(name).ok().and_then(|v| match v.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    })
}

impl AdapterConfig {
    /// Reads `AQUEDUCT_PREFIX`, `AQUEDUCT_STATIC`, `AQUEDUCT_MIGRATIONS_COLLECTION`,
    /// `AQUEDUCT_MIGRATIONS_PATH` (platform path list) and
    /// `AQUEDUCT_STRICT_VERSION_ORDER`; unset or unparsable values keep their defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let prefix = std::env::var("AQUEDUCT_PREFIX")
            .ok()
            .filter(|p| !p.is_empty());
        let static_mode = env_flag("AQUEDUCT_STATIC").unwrap_or(defaults.static_mode);
        let migrations_collection = std::env::var("AQUEDUCT_MIGRATIONS_COLLECTION")
            .ok()
            .filter(|c| !c.is_empty())
            .unwrap_or(defaults.migrations_collection);
        let migrations_paths = std::env::var_os("AQUEDUCT_MIGRATIONS_PATH")
            .map(|paths| std::env::split_paths(&paths).collect::<Vec<_>>())
            .filter(|paths| !paths.is_empty())
            .unwrap_or(defaults.migrations_paths);
        let strict_version_order =
            env_flag("AQUEDUCT_STRICT_VERSION_ORDER").unwrap_or(defaults.strict_version_order);
        Self {
            prefix,
            static_mode,
            migrations_collection,
            migrations_paths,
            strict_version_order,
        }
    }

    pub fn migrator_options(&self) -> MigratorOptions {
        MigratorOptions {
            collection: self.migrations_collection.clone(),
            prefix: self.prefix.clone(),
            strict_version_order: self.strict_version_order,
            skip_table_creation: false,
        }
    }
}
