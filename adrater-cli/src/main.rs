//! adrater CLI - database operations for the ad rating backend
//!
//! - `migrate`: apply pending schema migrations (run once at startup)
//! - `status`: list applied and pending migrations
//! - `plan`: print the application order without touching the database
//! - `ping`: check connectivity, pool status and pgvector availability

use std::path::{Path, PathBuf};

use adrater_store::{ConnectionDescriptor, MigrationOutcome, Migrator, Pool};
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::{debug, info, warn};

mod config;
mod tracing_setup;

use config::{load_dotenv, AdraterConfig};
use tracing_setup::{init_tracing, TracingConfig};

#[derive(Parser, Debug)]
#[command(
    name = "adrater",
    author,
    version,
    about = "Database migrations and diagnostics for adrater",
    long_about = "Apply ordered, idempotent schema migrations and inspect the adrater \
                  PostgreSQL database. Connection settings come from --database-url, \
                  adrater.toml, or the DATABASE_URL / PG* environment variables."
)]
struct Cli {
    /// Config file (default: ~/.adrater/config.toml overlaid by ./adrater.toml)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Database URL, overriding config and environment
    #[arg(long, global = true, value_name = "URL")]
    database_url: Option<String>,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Apply pending migrations in one transaction
    Migrate(MigrationArgs),
    /// Show applied and pending migrations
    Status(StatusArgs),
    /// Print migration order without connecting
    Plan(PlanArgs),
    /// Check database connectivity
    Ping(PingArgs),
}

#[derive(Args, Debug)]
struct MigrationArgs {
    /// Directory containing <n>.<name>.sql scripts
    #[arg(long, value_name = "DIR")]
    dir: Option<PathBuf>,

    /// Metadata table recording applied migrations
    #[arg(long, value_name = "TABLE")]
    table: Option<String>,
}

#[derive(Args, Debug)]
struct StatusArgs {
    #[command(flatten)]
    migrations: MigrationArgs,

    /// Emit JSON instead of text
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct PlanArgs {
    /// Directory containing <n>.<name>.sql scripts
    #[arg(long, value_name = "DIR")]
    dir: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct PingArgs {
    /// Emit JSON instead of text
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    // .env may carry RUST_LOG, so it is read before the subscriber starts
    let loaded = load_dotenv();
    init_tracing(&TracingConfig { debug: cli.debug }).ok();
    match loaded {
        Ok(sources) if sources.is_empty() => {
            debug!("No .env files found (current dir or ~/.adrater)")
        }
        Ok(sources) => info!("Loaded environment from: {}", sources.join(", ")),
        Err(err) => warn!("{err:#}"),
    }

    let config = AdraterConfig::load(cli.config.as_deref())?;

    match &cli.command {
        Commands::Migrate(args) => run_migrate(&cli, &config, args).await,
        Commands::Status(args) => run_status(&cli, &config, args).await,
        Commands::Plan(args) => run_plan(&config, args).await,
        Commands::Ping(args) => run_ping(&cli, &config, args).await,
    }
}

fn descriptor(cli: &Cli, config: &AdraterConfig) -> Result<ConnectionDescriptor> {
    let mut db = config.database.clone();
    if let Some(url) = &cli.database_url {
        db.url = Some(url.clone());
    }
    db.resolve().context("Failed to resolve database connection settings")
}

async fn open_pool(cli: &Cli, config: &AdraterConfig) -> Result<Pool> {
    let descriptor = descriptor(cli, config)?;
    Pool::open(&descriptor)
        .await
        .with_context(|| format!("Failed to connect to {}", descriptor.label()))
}

fn migrator(config: &AdraterConfig, dir: Option<&Path>, table: Option<&str>) -> Result<Migrator> {
    let dir = dir.map(Path::to_path_buf).unwrap_or_else(|| config.migrations_dir());
    debug!("Using migrations from {}", dir.display());
    let migrator = Migrator::from_dir(dir);
    match table.or(config.migrations.table.as_deref()) {
        Some(table) => migrator
            .with_table(table)
            .context("Invalid migrations table name"),
        None => Ok(migrator),
    }
}

async fn run_migrate(cli: &Cli, config: &AdraterConfig, args: &MigrationArgs) -> Result<()> {
    let migrator = migrator(config, args.dir.as_deref(), args.table.as_deref())?;
    let pool = open_pool(cli, config).await?;

    let outcome = migrator.run(&pool).await;
    pool.close().await;

    match outcome.context("Migration run failed")? {
        MigrationOutcome::NoMigrationFiles => {
            println!("No migration files found");
        }
        MigrationOutcome::Completed(report) => {
            for filename in &report.applied {
                println!("applied  {filename}");
            }
            println!(
                "{} applied, {} already up to date",
                report.applied.len(),
                report.skipped
            );
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct StatusReport {
    table: String,
    applied: Vec<adrater_store::AppliedMigration>,
    pending: Vec<String>,
}

async fn run_status(cli: &Cli, config: &AdraterConfig, args: &StatusArgs) -> Result<()> {
    let migrator = migrator(
        config,
        args.migrations.dir.as_deref(),
        args.migrations.table.as_deref(),
    )?;
    let pool = open_pool(cli, config).await?;

    let applied = migrator.applied(&pool).await;
    let pending = migrator.pending(&pool).await;
    pool.close().await;

    let report = StatusReport {
        table: migrator.table().plain(),
        applied: applied.context("Failed to read applied migrations")?,
        pending: pending
            .context("Failed to list pending migrations")?
            .into_iter()
            .map(|script| script.filename)
            .collect(),
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    for migration in &report.applied {
        println!(
            "applied  {}  {}",
            migration.filename,
            migration.applied_at.format("%Y-%m-%d %H:%M:%S %Z")
        );
    }
    for filename in &report.pending {
        println!("pending  {filename}");
    }
    println!(
        "{} applied, {} pending ({})",
        report.applied.len(),
        report.pending.len(),
        report.table
    );
    Ok(())
}

async fn run_plan(config: &AdraterConfig, args: &PlanArgs) -> Result<()> {
    let migrator = migrator(config, args.dir.as_deref(), None)?;
    let scripts = migrator
        .plan()
        .await
        .context("Failed to read migration scripts")?;

    if scripts.is_empty() {
        println!("No migration files found");
        return Ok(());
    }
    for (position, script) in scripts.iter().enumerate() {
        println!("{:>3}. {}", position + 1, script.filename);
    }
    Ok(())
}

#[derive(Serialize)]
struct PingReport {
    target: String,
    pool_size: u32,
    idle: u32,
    max_connections: u32,
    vector_extension: bool,
}

async fn run_ping(cli: &Cli, config: &AdraterConfig, args: &PingArgs) -> Result<()> {
    let pool = open_pool(cli, config).await?;

    let mut tx = pool.begin().await.context("Failed to start transaction")?;
    let vector_extension = tx.vector_support().await;
    tx.rollback().await.ok();

    let status = pool.status();
    let report = PingReport {
        target: pool.descriptor().label(),
        pool_size: status.size,
        idle: status.idle,
        max_connections: status.max,
        vector_extension: vector_extension.context("Failed to query extensions")?,
    };
    pool.close().await;
    info!(target = %report.target, "database reachable");

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("connected    {}", report.target);
        println!(
            "pool         {} open, {} idle, max {}",
            report.pool_size, report.idle, report.max_connections
        );
        println!(
            "pgvector     {}",
            if report.vector_extension { "installed" } else { "not installed" }
        );
    }
    Ok(())
}
