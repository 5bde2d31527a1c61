use super::command::{Collection, Command, Object};
use super::executor::{Executor, LogRecord};
use super::view::{View, ViewChange};
use crate::connection::{Connection, Transaction};
use crate::error::Result;
use crate::jsonschema::ColumnOp;

enum Target<'a> {
    Store(&'a dyn Connection),
    Record(Vec<Command>),
}

/// Handle passed to migration bodies. Commands issued through it either run right away
/// or, while a `change` is being inverted, are only recorded.
pub struct MigrationContext<'a> {
    target: Target<'a>,
    prefix: Option<String>,
    trx: Option<&'a Transaction>,
    log: Vec<LogRecord>,
}

impl<'a> MigrationContext<'a> {
    pub fn new(conn: &'a dyn Connection, prefix: Option<&str>, trx: Option<&'a Transaction>) -> Self {
        Self {
            target: Target::Store(conn),
            prefix: prefix.map(str::to_string),
            trx,
            log: Vec::new(),
        }
    }

    /// Context that records commands without executing them.
    pub fn recorder() -> MigrationContext<'static> {
        MigrationContext {
            target: Target::Record(Vec::new()),
            prefix: None,
            trx: None,
            log: Vec::new(),
        }
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    pub fn transaction(&self) -> Option<&Transaction> {
        self.trx
    }

    /// Records of the commands executed so far.
    pub fn log(&self) -> &[LogRecord] {
        &self.log
    }

    /// Commands captured by a recorder; empty for an executing context.
    pub fn into_recorded(self) -> Vec<Command> {
        match self.target {
            Target::Record(commands) => commands,
            Target::Store(_) => Vec::new(),
        }
    }

    pub fn run(&mut self, command: Command) -> Result<()> {
        let command = command.with_default_prefix(self.prefix.as_deref());
        match &mut self.target {
            Target::Record(commands) => commands.push(command),
            Target::Store(conn) => {
                let record = Executor::new(*conn)
                    .with_database(self.prefix.as_deref())
                    .execute(&command, self.trx)?;
                self.log.push(record);
            }
        }
        Ok(())
    }

    pub fn create(&mut self, object: impl Into<Object>) -> Result<()> {
        self.run(Command::Create(object.into()))
    }

    pub fn create_if_not_exists(&mut self, object: impl Into<Object>) -> Result<()> {
        self.run(Command::CreateIfNotExists(object.into()))
    }

    pub fn drop(&mut self, object: impl Into<Object>) -> Result<()> {
        self.run(Command::Drop(object.into()))
    }

    pub fn drop_if_exists(&mut self, object: impl Into<Object>) -> Result<()> {
        self.run(Command::DropIfExists(object.into()))
    }

    pub fn alter_collection(&mut self, collection: Collection, columns: Vec<ColumnOp>) -> Result<()> {
        self.run(Command::AlterCollection {
            collection,
            columns,
        })
    }

    pub fn alter_view(&mut self, view: View, changes: Vec<ViewChange>) -> Result<()> {
        self.run(Command::AlterView { view, changes })
    }

    pub fn rename(&mut self, from: impl Into<Object>, to: impl Into<Object>) -> Result<()> {
        self.run(Command::Rename {
            from: from.into(),
            to: to.into(),
        })
    }

    pub fn execute(&mut self, aql: impl Into<String>) -> Result<()> {
        self.run(Command::Execute(aql.into()))
    }

    /// Record what `change` would do, then run the inverse of each command in reverse
    /// order. Nothing runs if any recorded command is irreversible.
    pub fn revert<F>(&mut self, change: F) -> Result<()>
    where
        F: FnOnce(&mut MigrationContext<'_>) -> Result<()>,
    {
        let mut recorder = MigrationContext::recorder();
        change(&mut recorder)?;
        let inverted = recorder
            .into_recorded()
            .iter()
            .rev()
            .map(Command::reverse)
            .collect::<Result<Vec<_>>>()?;
        for command in inverted {
            self.run(command)?;
        }
        Ok(())
    }
}
