//! Versioned migration runner with a bookkeeping collection.

use serde_json::json;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use super::command::{Collection, Command};
use super::context::MigrationContext;
use super::executor::Executor;
use crate::connection::{run_cursor, with_transaction, Connection, Request, Transaction};
use crate::error::{AdapterError, Result};
use crate::query::compiler::{compile, Operation};
use crate::query::{field, Query, Source};

pub const DEFAULT_MIGRATIONS_COLLECTION: &str = "schema_migrations";

/// A versioned unit of structural change.
///
/// Implement `change` for migrations whose commands can be inverted automatically, or
/// `up` and `down` explicitly; explicit bodies take precedence.
pub trait Migration: Send + Sync {
    fn change(&self, _ctx: &mut MigrationContext<'_>) -> Result<()> {
        Ok(())
    }

    fn up(&self, ctx: &mut MigrationContext<'_>) -> Result<()> {
        self.change(ctx)
    }

    fn down(&self, ctx: &mut MigrationContext<'_>) -> Result<()> {
        ctx.revert(|recorder| self.change(recorder))
    }

    /// Run outside a stream transaction.
    fn disable_transaction(&self) -> bool {
        false
    }

    /// Collections this migration writes documents to. The stream transaction declares
    /// them next to the bookkeeping collection; the store refuses writes to any other.
    fn write_collections(&self) -> Vec<String> {
        Vec::new()
    }
}

#[derive(Clone)]
pub struct MigrationEntry {
    pub version: i64,
    pub name: String,
    pub migration: Arc<dyn Migration>,
}

impl MigrationEntry {
    pub fn new(version: i64, name: impl Into<String>, migration: impl Migration + 'static) -> Self {
        Self {
            version,
            name: name.into(),
            migration: Arc::new(migration),
        }
    }
}

impl fmt::Debug for MigrationEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationEntry")
            .field("version", &self.version)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    All,
    Step(usize),
    /// Up to and including this version.
    To(i64),
    ToExclusive(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::Up => "up",
            Direction::Down => "down",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationStatus {
    Applied,
    Reverted,
    AlreadyUp,
    AlreadyDown,
}

/// One line of [`Migrator::status`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    pub applied: bool,
    pub version: i64,
    /// `None` for versions recorded in the store without a known migration.
    pub name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MigratorOptions {
    pub collection: String,
    /// Database the migrations and the bookkeeping collection live in.
    pub prefix: Option<String>,
    pub strict_version_order: bool,
    /// Read-only mode: never create the bookkeeping collection.
    pub skip_table_creation: bool,
}

impl Default for MigratorOptions {
    fn default() -> Self {
        Self {
            collection: DEFAULT_MIGRATIONS_COLLECTION.to_string(),
            prefix: None,
            strict_version_order: false,
            skip_table_creation: false,
        }
    }
}

pub struct Migrator<C: Connection> {
    conn: C,
    options: MigratorOptions,
}

impl<C: Connection> Migrator<C> {
    pub fn new(conn: C) -> Self {
        Self::with_options(conn, MigratorOptions::default())
    }

    pub fn with_options(conn: C, options: MigratorOptions) -> Self {
        Self { conn, options }
    }

    pub fn options(&self) -> &MigratorOptions {
        &self.options
    }

    fn prefix(&self) -> Option<&str> {
        self.options.prefix.as_deref()
    }

    pub fn ensure_bookkeeping(&self) -> Result<()> {
        if self.options.skip_table_creation {
            return Ok(());
        }
        let command = Command::CreateIfNotExists(Collection::new(&self.options.collection).into())
            .with_default_prefix(self.prefix());
        Executor::new(&self.conn).execute(&command, None)?;
        Ok(())
    }

    /// Versions recorded in the bookkeeping collection, ascending.
    pub fn applied_versions(&self) -> Result<Vec<i64>> {
        self.ensure_bookkeeping()?;
        let query = Query::new(Source::collection(&self.options.collection))
            .select([field(0, "version")]);
        let compiled = compile(&query, Operation::Select)?;
        let rows = run_cursor(
            &self.conn,
            self.prefix(),
            &compiled.text,
            compiled.bind_vars(),
            None,
        )?;
        let mut versions = rows
            .iter()
            .map(|row| {
                row[0].as_i64().ok_or_else(|| {
                    AdapterError::Validation(format!("malformed bookkeeping row {row}"))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        versions.sort_unstable();
        Ok(versions)
    }

    /// Apply or revert the migrations `strategy` selects, in order, and return the
    /// versions that ran. Stops at the first failure.
    pub fn run(
        &self,
        entries: &[MigrationEntry],
        direction: Direction,
        strategy: Strategy,
    ) -> Result<Vec<i64>> {
        let mut applied = self.applied_versions()?;
        let pending = select_pending(entries, &applied, direction, strategy);
        check_duplicates(&pending)?;
        if pending.is_empty() {
            tracing::info!(%direction, "migrations already {direction}");
        }

        let mut ran = Vec::with_capacity(pending.len());
        for entry in pending {
            if direction == Direction::Up {
                self.check_order(entry, &applied)?;
            }
            self.apply(entry, direction)?;
            match direction {
                Direction::Up => applied.push(entry.version),
                Direction::Down => applied.retain(|v| *v != entry.version),
            }
            ran.push(entry.version);
        }
        Ok(ran)
    }

    pub fn up(&self, entry: &MigrationEntry) -> Result<MigrationStatus> {
        let applied = self.applied_versions()?;
        if applied.contains(&entry.version) {
            return Ok(MigrationStatus::AlreadyUp);
        }
        self.check_order(entry, &applied)?;
        self.apply(entry, Direction::Up)?;
        Ok(MigrationStatus::Applied)
    }

    pub fn down(&self, entry: &MigrationEntry) -> Result<MigrationStatus> {
        if !self.applied_versions()?.contains(&entry.version) {
            return Ok(MigrationStatus::AlreadyDown);
        }
        self.apply(entry, Direction::Down)?;
        Ok(MigrationStatus::Reverted)
    }

    /// Every known or recorded version with its state, ascending.
    pub fn status(&self, entries: &[MigrationEntry]) -> Result<Vec<StatusLine>> {
        let applied = self.applied_versions()?;
        let mut lines: Vec<StatusLine> = entries
            .iter()
            .map(|e| StatusLine {
                applied: applied.contains(&e.version),
                version: e.version,
                name: Some(e.name.clone()),
            })
            .collect();
        for version in &applied {
            if !entries.iter().any(|e| e.version == *version) {
                lines.push(StatusLine {
                    applied: true,
                    version: *version,
                    name: None,
                });
            }
        }
        lines.sort_by_key(|l| l.version);
        Ok(lines)
    }

    fn check_order(&self, entry: &MigrationEntry, applied: &[i64]) -> Result<()> {
        let Some(latest) = applied.iter().copied().max() else {
            return Ok(());
        };
        if entry.version > latest {
            return Ok(());
        }
        let message = format!(
            "migration {} ({}) is older than the latest applied version {latest}; \
             rolling back later may revert the wrong migration",
            entry.version, entry.name
        );
        if self.options.strict_version_order {
            return Err(AdapterError::MigrationOrder(message));
        }
        tracing::warn!(version = entry.version, latest, "{message}");
        Ok(())
    }

    fn apply(&self, entry: &MigrationEntry, direction: Direction) -> Result<()> {
        tracing::info!(version = entry.version, name = %entry.name, %direction, "running migration");
        let run_body = |trx: Option<&Transaction>| -> Result<()> {
            let mut ctx = MigrationContext::new(&self.conn, self.prefix(), trx);
            match direction {
                Direction::Up => entry.migration.up(&mut ctx)?,
                Direction::Down => entry.migration.down(&mut ctx)?,
            }
            self.record(entry.version, direction, trx)
        };
        if entry.migration.disable_transaction() {
            run_body(None)?;
        } else {
            let mut write = vec![self.options.collection.clone()];
            for name in entry.migration.write_collections() {
                if !write.contains(&name) {
                    write.push(name);
                }
            }
            with_transaction(&self.conn, self.prefix(), &write, |trx| run_body(Some(trx)))?;
        }
        tracing::info!(version = entry.version, %direction, "migrated");
        Ok(())
    }

    fn record(&self, version: i64, direction: Direction, trx: Option<&Transaction>) -> Result<()> {
        let collection = &self.options.collection;
        let request = match direction {
            Direction::Up => Request::post(
                format!("document/{collection}"),
                json!({ "_key": version.to_string(), "version": version }),
            ),
            Direction::Down => Request::delete(format!("document/{collection}/{version}")),
        };
        self.conn
            .request(request.with_database(self.prefix()).in_transaction(trx))?;
        Ok(())
    }
}

fn select_pending<'e>(
    entries: &'e [MigrationEntry],
    applied: &[i64],
    direction: Direction,
    strategy: Strategy,
) -> Vec<&'e MigrationEntry> {
    let mut candidates: Vec<&MigrationEntry> = entries
        .iter()
        .filter(|e| applied.contains(&e.version) == (direction == Direction::Down))
        .collect();
    candidates.sort_by_key(|e| e.version);
    if direction == Direction::Down {
        candidates.reverse();
    }
    let before_target = |e: &&MigrationEntry, target: i64, inclusive: bool| match direction {
        Direction::Up if inclusive => e.version <= target,
        Direction::Up => e.version < target,
        Direction::Down if inclusive => e.version >= target,
        Direction::Down => e.version > target,
    };
    match strategy {
        Strategy::All => candidates,
        Strategy::Step(n) => candidates.into_iter().take(n).collect(),
        Strategy::To(v) => candidates
            .into_iter()
            .take_while(|e| before_target(e, v, true))
            .collect(),
        Strategy::ToExclusive(v) => candidates
            .into_iter()
            .take_while(|e| before_target(e, v, false))
            .collect(),
    }
}

fn check_duplicates(pending: &[&MigrationEntry]) -> Result<()> {
    let mut versions = HashSet::new();
    let mut names = HashSet::new();
    for entry in pending {
        if !versions.insert(entry.version) {
            return Err(AdapterError::MigrationOrder(format!(
                "migrations can't be executed, version {} is duplicated",
                entry.version
            )));
        }
        if !names.insert(entry.name.as_str()) {
            return Err(AdapterError::MigrationOrder(format!(
                "migrations can't be executed, name {} is duplicated",
                entry.name
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryStore;

    struct CreateCollection(&'static str);

    impl Migration for CreateCollection {
        fn change(&self, ctx: &mut MigrationContext<'_>) -> Result<()> {
            ctx.create(Collection::new(self.0))
        }
    }

    struct Failing;

    impl Migration for Failing {
        fn up(&self, ctx: &mut MigrationContext<'_>) -> Result<()> {
            ctx.create(Collection::new("half_done"))?;
            Err(AdapterError::Validation("boom".into()))
        }
    }

    /// Removes every document of `users` through a raw query.
    struct PurgeUsers {
        declare: bool,
    }

    impl Migration for PurgeUsers {
        fn up(&self, ctx: &mut MigrationContext<'_>) -> Result<()> {
            ctx.execute("FOR u0 IN `users` REMOVE u0 IN `users`")
        }

        fn write_collections(&self) -> Vec<String> {
            if self.declare {
                vec!["users".to_string()]
            } else {
                Vec::new()
            }
        }
    }

    fn abc() -> Vec<MigrationEntry> {
        vec![
            MigrationEntry::new(1, "create_a", CreateCollection("a")),
            MigrationEntry::new(2, "create_b", CreateCollection("b")),
            MigrationEntry::new(3, "create_c", CreateCollection("c")),
        ]
    }

    #[test]
    fn up_to_version_applies_in_order() {
        let store = MemoryStore::default();
        let migrator = Migrator::new(&store);
        let ran = migrator.run(&abc(), Direction::Up, Strategy::To(2)).unwrap();
        assert_eq!(ran, vec![1, 2]);
        assert_eq!(migrator.applied_versions().unwrap(), vec![1, 2]);
        assert!(store.collection(None, "b").is_some());
        assert!(store.collection(None, "c").is_none());
        assert_eq!(
            store.queries().last().map(String::as_str),
            Some("FOR s0 IN `schema_migrations` RETURN [ s0.`version` ]")
        );
    }

    #[test]
    fn down_all_reverts_in_reverse_order() {
        let store = MemoryStore::default();
        let migrator = Migrator::new(&store);
        migrator.run(&abc(), Direction::Up, Strategy::All).unwrap();
        let ran = migrator.run(&abc(), Direction::Down, Strategy::All).unwrap();
        assert_eq!(ran, vec![3, 2, 1]);
        assert!(migrator.applied_versions().unwrap().is_empty());
        assert!(store.collection(None, "a").is_none());
        assert!(store.documents(None, DEFAULT_MIGRATIONS_COLLECTION).is_empty());
    }

    #[test]
    fn step_and_exclusive_targets() {
        let store = MemoryStore::default();
        let migrator = Migrator::new(&store);
        assert_eq!(
            migrator.run(&abc(), Direction::Up, Strategy::ToExclusive(3)).unwrap(),
            vec![1, 2]
        );
        assert_eq!(
            migrator.run(&abc(), Direction::Up, Strategy::Step(5)).unwrap(),
            vec![3]
        );
        assert_eq!(
            migrator.run(&abc(), Direction::Down, Strategy::Step(1)).unwrap(),
            vec![3]
        );
        assert_eq!(
            migrator.run(&abc(), Direction::Down, Strategy::To(1)).unwrap(),
            vec![2, 1]
        );
    }

    #[test]
    fn failed_migration_is_not_recorded_and_stops_the_run() {
        let store = MemoryStore::default();
        let migrator = Migrator::new(&store);
        let mut entries = abc();
        entries.insert(1, MigrationEntry::new(2, "broken", Failing));
        entries.remove(2);
        let err = migrator.run(&entries, Direction::Up, Strategy::All).unwrap_err();
        assert!(matches!(err, AdapterError::Validation(_)));
        assert_eq!(migrator.applied_versions().unwrap(), vec![1]);
        assert!(store.collection(None, "c").is_none());
        assert_eq!(store.open_transactions(), 0);
    }

    #[test]
    fn data_migration_writes_inside_its_transaction() {
        let store = MemoryStore::default();
        let migrator = Migrator::new(&store);
        migrator
            .run(&abc()[..1], Direction::Up, Strategy::All)
            .unwrap();
        store
            .request(Request::post("collection", json!({"name": "users"})))
            .unwrap();
        store
            .request(Request::post("document/users", json!({"_key": "1", "name": "Ann"})))
            .unwrap();

        let undeclared = [MigrationEntry::new(2, "purge_users", PurgeUsers { declare: false })];
        let err = migrator
            .run(&undeclared, Direction::Up, Strategy::All)
            .unwrap_err();
        assert_eq!(err.error_num(), Some(1652));
        assert_eq!(store.documents(None, "users").len(), 1);
        assert_eq!(migrator.applied_versions().unwrap(), vec![1]);

        let declared = [MigrationEntry::new(2, "purge_users", PurgeUsers { declare: true })];
        assert_eq!(
            migrator.run(&declared, Direction::Up, Strategy::All).unwrap(),
            vec![2]
        );
        assert!(store.documents(None, "users").is_empty());
        assert_eq!(migrator.applied_versions().unwrap(), vec![1, 2]);
        assert_eq!(store.open_transactions(), 0);
    }

    #[test]
    fn duplicates_fail_before_anything_runs() {
        let store = MemoryStore::default();
        let migrator = Migrator::new(&store);
        let entries = vec![
            MigrationEntry::new(1, "create_a", CreateCollection("a")),
            MigrationEntry::new(1, "create_b", CreateCollection("b")),
        ];
        let err = migrator.run(&entries, Direction::Up, Strategy::All).unwrap_err();
        assert!(matches!(err, AdapterError::MigrationOrder(_)));
        assert!(store.collection(None, "a").is_none());
    }

    #[test]
    fn older_version_is_rejected_under_strict_order() {
        let store = MemoryStore::default();
        let lenient = Migrator::new(&store);
        lenient.run(&abc()[2..], Direction::Up, Strategy::All).unwrap();

        let strict = Migrator::with_options(
            &store,
            MigratorOptions {
                strict_version_order: true,
                ..MigratorOptions::default()
            },
        );
        let err = strict.run(&abc(), Direction::Up, Strategy::All).unwrap_err();
        assert!(matches!(err, AdapterError::MigrationOrder(_)));
        assert_eq!(lenient.run(&abc(), Direction::Up, Strategy::All).unwrap(), vec![1, 2]);
    }

    #[test]
    fn single_up_and_down_short_circuit() {
        let store = MemoryStore::default();
        let migrator = Migrator::new(&store);
        let entries = abc();
        assert_eq!(migrator.up(&entries[0]).unwrap(), MigrationStatus::Applied);
        assert_eq!(migrator.up(&entries[0]).unwrap(), MigrationStatus::AlreadyUp);
        assert_eq!(migrator.down(&entries[1]).unwrap(), MigrationStatus::AlreadyDown);
        assert_eq!(migrator.down(&entries[0]).unwrap(), MigrationStatus::Reverted);
    }

    #[test]
    fn status_lists_known_and_orphaned_versions() {
        let store = MemoryStore::default();
        let migrator = Migrator::new(&store);
        migrator.run(&abc(), Direction::Up, Strategy::Step(2)).unwrap();
        let lines = migrator.status(&abc()[1..]).unwrap();
        let summary: Vec<_> = lines
            .iter()
            .map(|l| (l.applied, l.version, l.name.as_deref()))
            .collect();
        assert_eq!(
            summary,
            vec![
                (true, 1, None),
                (true, 2, Some("create_b")),
                (false, 3, Some("create_c")),
            ]
        );
    }

    #[test]
    fn prefix_routes_bookkeeping_to_tenant_database() {
        let store = MemoryStore::default();
        let migrator = Migrator::with_options(
            &store,
            MigratorOptions {
                prefix: Some("tenant_a".into()),
                collection: "tenant_migrations".into(),
                ..MigratorOptions::default()
            },
        );
        migrator.run(&abc()[..1], Direction::Up, Strategy::All).unwrap();
        assert_eq!(store.documents(Some("tenant_a"), "tenant_migrations").len(), 1);
        assert!(store.collection(Some("tenant_a"), "a").is_some());
        assert!(store.collection(None, "a").is_none());
    }
}
