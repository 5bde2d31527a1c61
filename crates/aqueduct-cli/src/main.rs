use anyhow::{bail, Context, Result};
use aqueduct_core::migration::source::{file_name, skeleton};
use aqueduct_core::migration::{discover, Direction, MigrationEntry, Migrator, Strategy};
use aqueduct_core::AdapterConfig;
use aqueduct_http::{HttpConfig, HttpConnection, DEFAULT_DATABASE, DEFAULT_ENDPOINT};
use clap::{Args, Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "aqueduct", version, about = "Versioned schema migrations for ArangoDB", long_about = None)]
struct Cli {
    /// Server URL
    #[arg(long, env = "ARANGO_ENDPOINT", default_value = DEFAULT_ENDPOINT)]
    endpoint: String,

    /// Default database
    #[arg(long, env = "ARANGO_DATABASE", default_value = DEFAULT_DATABASE)]
    database: String,

    #[arg(long, env = "ARANGO_USERNAME", default_value = "root")]
    username: String,

    #[arg(long, env = "ARANGO_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Prompt for the password instead of reading it from flags or the environment
    #[arg(long)]
    ask_password: bool,

    /// Tenant database to migrate instead of the default one
    #[arg(long)]
    prefix: Option<String>,

    /// Directory holding migration files (repeatable)
    #[arg(long = "migrations-path")]
    migrations_paths: Vec<PathBuf>,

    /// Request timeout in milliseconds
    #[arg(long, env = "ARANGO_TIMEOUT_MS")]
    timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending migrations (all by default)
    Migrate {
        #[command(flatten)]
        target: Target,
        /// Fail instead of warning when applying a version older than the latest one
        #[arg(long)]
        strict_version_order: bool,
    },
    /// Revert applied migrations (one step by default)
    Rollback {
        #[command(flatten)]
        target: Target,
    },
    /// List migrations and whether they are applied
    Status,
    /// Write an empty, timestamped migration file
    GenMigration {
        /// Lower-case name, words joined by underscores
        name: String,
    },
}

#[derive(Args, Debug, Default)]
#[group(multiple = false)]
struct Target {
    #[arg(long)]
    all: bool,
    #[arg(long)]
    step: Option<usize>,
    /// Run up to and including this version
    #[arg(long)]
    to: Option<i64>,
    #[arg(long)]
    to_exclusive: Option<i64>,
}

impl Target {
    fn strategy(&self, default: Strategy) -> Strategy {
        match (self.all, self.step, self.to, self.to_exclusive) {
            (true, ..) => Strategy::All,
            (_, Some(n), ..) => Strategy::Step(n),
            (_, _, Some(v), _) => Strategy::To(v),
            (.., Some(v)) => Strategy::ToExclusive(v),
            _ => default,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = AdapterConfig::from_env();
    if cli.prefix.is_some() {
        config.prefix = cli.prefix.clone();
    }
    if !cli.migrations_paths.is_empty() {
        config.migrations_paths = cli.migrations_paths.clone();
    }

    match &cli.command {
        Commands::GenMigration { name } => {
            let dir = config
                .migrations_paths
                .first()
                .context("no migrations path configured")?;
            let path = generate(dir, name)?;
            println!("* creating {}", path.display());
            Ok(())
        }
        Commands::Migrate {
            target,
            strict_version_order,
        } => {
            config.strict_version_order |= *strict_version_order;
            let entries = load(&config)?;
            let migrator = Migrator::with_options(connect(&cli)?, config.migrator_options());
            let ran = migrator.run(&entries, Direction::Up, target.strategy(Strategy::All))?;
            report(&entries, &ran, "migrated");
            Ok(())
        }
        Commands::Rollback { target } => {
            let entries = load(&config)?;
            let migrator = Migrator::with_options(connect(&cli)?, config.migrator_options());
            let ran = migrator.run(&entries, Direction::Down, target.strategy(Strategy::Step(1)))?;
            report(&entries, &ran, "reverted");
            Ok(())
        }
        Commands::Status => {
            let entries = load(&config)?;
            let migrator = Migrator::with_options(connect(&cli)?, config.migrator_options());
            println!("\n{:<10}{:<18}Migration Name", "Status", "Migration ID");
            println!("{}", "-".repeat(50));
            for line in migrator.status(&entries)? {
                println!(
                    "  {:<8}{:<18}{}",
                    if line.applied { "up" } else { "down" },
                    line.version,
                    line.name.as_deref().unwrap_or("** FILE NOT FOUND **")
                );
            }
            println!();
            Ok(())
        }
    }
}

fn connect(cli: &Cli) -> Result<HttpConnection> {
    let password = if cli.ask_password {
        Some(rpassword::prompt_password(format!("Password for {}: ", cli.username))?)
    } else {
        cli.password.clone()
    };
    let config = HttpConfig {
        endpoint: cli.endpoint.clone(),
        database: cli.database.clone(),
        username: Some(cli.username.clone()),
        password,
        timeout: cli.timeout_ms.map(Duration::from_millis),
    };
    Ok(HttpConnection::new(config)?)
}

fn load(config: &AdapterConfig) -> Result<Vec<MigrationEntry>> {
    let entries = discover(&config.migrations_paths)?;
    if entries.is_empty() {
        tracing::warn!(paths = ?config.migrations_paths, "no migrations found");
    }
    Ok(entries)
}

fn report(entries: &[MigrationEntry], ran: &[i64], verb: &str) {
    if ran.is_empty() {
        println!("nothing to do");
    }
    for version in ran {
        let name = entries
            .iter()
            .find(|e| e.version == *version)
            .map_or("", |e| e.name.as_str());
        println!("{verb} {version} {name}");
    }
}

fn generate(dir: &Path, name: &str) -> Result<PathBuf> {
    let version: i64 = chrono::Utc::now()
        .format("%Y%m%d%H%M%S")
        .to_string()
        .parse()?;
    let path = dir.join(file_name(version, name)?);
    if path.exists() {
        bail!("{} already exists", path.display());
    }
    fs::create_dir_all(dir)?;
    fs::write(&path, skeleton()?)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use aqueduct_core::migration::source::parse_file_name;

    #[test]
    fn strategy_flags_are_exclusive_with_defaults_per_command() {
        assert_eq!(Target::default().strategy(Strategy::All), Strategy::All);
        assert_eq!(Target::default().strategy(Strategy::Step(1)), Strategy::Step(1));

        let cli = Cli::try_parse_from(["aqueduct", "rollback", "--to", "20240101000000"]).unwrap();
        let Commands::Rollback { target } = cli.command else {
            panic!("expected rollback");
        };
        assert_eq!(target.strategy(Strategy::Step(1)), Strategy::To(20240101000000));

        assert!(Cli::try_parse_from(["aqueduct", "migrate", "--all", "--step", "2"]).is_err());
    }

    #[test]
    fn repeatable_migrations_path() {
        let cli = Cli::try_parse_from([
            "aqueduct",
            "--migrations-path",
            "a",
            "--migrations-path",
            "b",
            "status",
        ])
        .unwrap();
        assert_eq!(cli.migrations_paths, vec![PathBuf::from("a"), PathBuf::from("b")]);
    }

    #[test]
    fn generated_file_is_discoverable() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("priv").join("migrations");
        let path = generate(&nested, "create_users").unwrap();
        let file = path.file_name().and_then(|n| n.to_str()).unwrap();
        let (version, name) = parse_file_name(file).unwrap();
        assert_eq!(name, "create_users");
        assert_eq!(version.to_string().len(), 14);
        assert_eq!(discover(&[nested]).unwrap().len(), 1);
        assert!(generate(dir.path(), "Bad Name").is_err());
    }
}
