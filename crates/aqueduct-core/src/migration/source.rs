//! Migrations declared as JSON files named `<version>_<name>.json`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use super::command::Command;
use super::context::MigrationContext;
use super::runner::{Migration, MigrationEntry};
use crate::error::{AdapterError, Result};

const EXTENSION: &str = "json";

/// Serialized migration body. `up`/`down` override `change` when present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileMigration {
    #[serde(default)]
    pub change: Vec<Command>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub up: Option<Vec<Command>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub down: Option<Vec<Command>>,
    #[serde(default)]
    pub disable_transaction: bool,
    /// Collections the migration's raw queries write documents to.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub write_collections: Vec<String>,
}

fn run_all(ctx: &mut MigrationContext<'_>, commands: &[Command]) -> Result<()> {
    for command in commands {
        ctx.run(command.clone())?;
    }
    Ok(())
}

impl Migration for FileMigration {
    fn change(&self, ctx: &mut MigrationContext<'_>) -> Result<()> {
        run_all(ctx, &self.change)
    }

    fn up(&self, ctx: &mut MigrationContext<'_>) -> Result<()> {
        match &self.up {
            Some(commands) => run_all(ctx, commands),
            None => self.change(ctx),
        }
    }

    fn down(&self, ctx: &mut MigrationContext<'_>) -> Result<()> {
        match &self.down {
            Some(commands) => run_all(ctx, commands),
            None => ctx.revert(|recorder| self.change(recorder)),
        }
    }

    fn disable_transaction(&self) -> bool {
        self.disable_transaction
    }

    fn write_collections(&self) -> Vec<String> {
        self.write_collections.clone()
    }
}

/// Split `20240101120000_create_users.json` into its version and name.
pub fn parse_file_name(file_name: &str) -> Option<(i64, String)> {
    let stem = file_name.strip_suffix(EXTENSION)?.strip_suffix('.')?;
    let (version, name) = stem.split_once('_')?;
    if name.is_empty() || version.is_empty() || !version.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((version.parse().ok()?, name.to_string()))
}

/// File name for a new migration; `name` must be lower-case words joined by `_`.
pub fn file_name(version: i64, name: &str) -> Result<String> {
    let valid = !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_');
    if !valid {
        return Err(AdapterError::Validation(format!(
            "migration name `{name}` must be lower-case with underscores"
        )));
    }
    Ok(format!("{version}_{name}.{EXTENSION}"))
}

/// Contents written for a freshly generated migration.
pub fn skeleton() -> Result<String> {
    let mut text = serde_json::to_string_pretty(&FileMigration::default())?;
    text.push('\n');
    Ok(text)
}

pub fn load(path: &Path) -> Result<FileMigration> {
    let text = fs::read_to_string(path)?;
    serde_json::from_str(&text).map_err(|e| {
        AdapterError::Validation(format!("invalid migration file {}: {e}", path.display()))
    })
}

/// Collect the migrations found in `dirs`, sorted by version. Files that do not follow
/// the naming scheme are skipped; missing directories count as empty.
pub fn discover<P: AsRef<Path>>(dirs: &[P]) -> Result<Vec<MigrationEntry>> {
    let mut found: Vec<(i64, String, PathBuf)> = Vec::new();
    for dir in dirs {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            tracing::debug!(dir = %dir.display(), "migrations directory does not exist");
            continue;
        }
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            let parsed = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(parse_file_name);
            match parsed {
                Some((version, name)) if path.is_file() => found.push((version, name, path)),
                _ => tracing::debug!(file = %path.display(), "skipping non-migration file"),
            }
        }
    }
    found.sort_by_key(|(version, _, _)| *version);

    found
        .into_iter()
        .map(|(version, name, path)| Ok(MigrationEntry::new(version, name, load(&path)?)))
        .collect()
}
