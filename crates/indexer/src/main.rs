//! unlwatch indexer - validator manifest and UNL reconciliation
//!
//! This binary provides:
//! - Scheduled validator list fetching and trust attribution
//! - Manifest resolution through a ledger node's `manifest` RPC
//! - Domain verification against `xrp-ledger.toml`
//! - One-shot commands for each job
//!
//! Note: the HTTP read API is a separate service over the same database

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info};
use unlwatch_indexer::config::{Config, LoggingConfig};
use unlwatch_indexer::jobs::{JobReport, Orchestrator};
use unlwatch_indexer::manifests::{ManifestOutcome, ManifestProcessor};
use unlwatch_indexer::scheduler::Scheduler;
use unlwatch_indexer::storage::Storage;

#[derive(Parser)]
#[command(name = "unlwatch-indexer")]
#[command(version, about = "Validator manifest and UNL reconciliation for the XRP Ledger", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "unlwatch.toml")]
    config: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the scheduler (all jobs on their intervals)
    Run,

    /// Fetch every configured validator list once and reconcile
    UpdateUnls,

    /// Refresh manifests from the ledger node once
    UpdateManifests,

    /// Check claimed domains once
    VerifyDomains,

    /// Verify and store a single base64 manifest
    IngestManifest {
        /// Base64 manifest blob
        blob: String,
    },

    /// Show database statistics
    Status,

    /// Initialize the database
    InitDb {
        /// Database URL
        #[arg(long, default_value = "sqlite://unlwatch.db")]
        database_url: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logging settings live in the config file; commands that run without
    // one fall back to defaults.
    let logging = Config::from_file(&cli.config)
        .map(|config| config.logging)
        .unwrap_or_default();
    init_logging(cli.debug, &logging)?;

    info!("unlwatch indexer starting...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_indexer(&cli.config).await?,
        Commands::UpdateUnls => {
            run_once(&cli.config, |o| async move {
                Ok::<_, anyhow::Error>(vec![o.update_unls().await?])
            }).await?
        }
        Commands::UpdateManifests => {
            run_once(&cli.config, |o| async move { o.update_manifests().await }).await?
        }
        Commands::VerifyDomains => {
            run_once(&cli.config, |o| async move {
                Ok::<_, anyhow::Error>(vec![o.verify_domains().await?])
            }).await?
        }
        Commands::IngestManifest { blob } => ingest_manifest(&cli.config, &blob).await?,
        Commands::Status => show_status(&cli.config).await?,
        Commands::InitDb { database_url } => init_database(&database_url).await?,
    }

    Ok(())
}

/// Initialize tracing subscriber for logging
fn init_logging(debug: bool, logging: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let env_filter = if debug {
        EnvFilter::new("unlwatch_indexer=debug,unlwatch_core=debug,sqlx=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "unlwatch_indexer={level},unlwatch_core={level}",
                level = logging.level
            ))
        })
    };

    let registry = tracing_subscriber::registry().with(env_filter);
    if logging.format == "json" {
        registry
            .with(fmt::layer().json().with_target(true).with_line_number(true))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_line_number(true))
            .init();
    }

    Ok(())
}

/// Load configuration and open (and migrate) the configured database.
async fn open(config_path: &str) -> Result<(Config, Storage)> {
    let config = Config::from_file(config_path).context("Failed to load configuration")?;

    info!("Configuration loaded successfully");
    info!("  Database: {}", config.database.url);
    info!("  Ledger node: {}", config.rippled.rpc_url);
    for network in &config.networks {
        info!("  Network {}: {} publisher(s)", network.name, network.unls.len());
    }

    let storage = Storage::new(
        &config.database.url,
        Some(config.database.max_connections),
        Some(config.database.min_connections),
    )
    .await
    .context("Failed to connect to database")?;

    storage
        .run_migrations()
        .await
        .context("Failed to run migrations")?;

    Ok((config, storage))
}

/// Main indexer service - runs every job on its schedule
async fn run_indexer(config_path: &str) -> Result<()> {
    info!("Starting indexer service with config: {}", config_path);

    let (config, storage) = open(config_path).await?;
    let orchestrator = Orchestrator::from_config(&config, storage.clone())
        .context("Failed to build job orchestrator")?;
    info!("Tracking {} validator list(s)", orchestrator.sources().len());

    let scheduler = Scheduler::new(orchestrator, config.schedule.clone());

    tokio::select! {
        _ = scheduler.run() => {
            error!("Scheduler exited unexpectedly");
        }
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for shutdown signal")?;
            info!("Shutdown signal received");
        }
    }

    storage.close().await;
    info!("Indexer stopped");

    Ok(())
}

/// Run one or more jobs once and print their reports.
async fn run_once<F, Fut>(config_path: &str, job: F) -> Result<()>
where
    F: FnOnce(Orchestrator) -> Fut,
    Fut: std::future::Future<Output = Result<Vec<JobReport>>>,
{
    let (config, storage) = open(config_path).await?;
    let orchestrator = Orchestrator::from_config(&config, storage.clone())
        .context("Failed to build job orchestrator")?;

    let result = job(orchestrator).await;
    storage.close().await;

    for report in result? {
        print_report(&report);
    }

    Ok(())
}

fn print_report(report: &JobReport) {
    println!(
        "{}: {} succeeded, {} skipped, {} failed",
        report.job,
        report.succeeded,
        report.skipped,
        report.failures.len()
    );
    for (item, reason) in &report.failures {
        println!("  {item}: {reason}");
    }
}

/// Verify and store one manifest blob given on the command line
async fn ingest_manifest(config_path: &str, blob: &str) -> Result<()> {
    let (_config, storage) = open(config_path).await?;
    let processor = ManifestProcessor::new(storage.clone());

    let result = processor.handle_blob(blob).await;
    storage.close().await;

    match result.context("Manifest rejected")? {
        ManifestOutcome::Accepted {
            master_key,
            seq,
            revoked,
            link,
        } => {
            println!("Accepted manifest for {master_key} at seq {seq}");
            if revoked {
                println!("  Master key is now revoked");
            }
            println!("  Validator link: {link:?}");
        }
        ManifestOutcome::Skipped {
            master_key,
            stored_seq,
            reason,
        } => {
            println!("Skipped manifest for {master_key}: {reason:?} (stored seq {stored_seq})");
        }
    }

    Ok(())
}

/// Show database statistics and tracked lists
async fn show_status(config_path: &str) -> Result<()> {
    info!("Checking indexer status");

    // Fall back to the default database ONLY if the config file doesn't exist
    let (database_url, max_conn, min_conn) = match Config::from_file(config_path) {
        Ok(config) => {
            info!("Using database from config: {}", config.database.url);
            (
                config.database.url,
                Some(config.database.max_connections),
                Some(config.database.min_connections),
            )
        }
        Err(e) => {
            let is_not_found = e.chain().any(|cause| {
                cause
                    .downcast_ref::<std::io::Error>()
                    .is_some_and(|io_err| io_err.kind() == std::io::ErrorKind::NotFound)
            });

            if is_not_found {
                info!("Config file not found, using default database: sqlite://unlwatch.db");
                ("sqlite://unlwatch.db".to_string(), None, None)
            } else {
                return Err(e).context("Failed to load config file");
            }
        }
    };

    let storage = Storage::new(&database_url, max_conn, min_conn)
        .await
        .context("Failed to connect to database")?;

    storage
        .run_migrations()
        .await
        .context("Failed to run migrations")?;

    let stats = storage.stats().await?;
    let sources = storage.list_unl_sources().await?;

    println!("\n=== unlwatch Indexer Status ===\n");
    println!("Database Statistics:");
    println!("  Manifests: {}", stats.manifest_count);
    println!("  Revoked: {}", stats.revoked_count);
    println!("  Validators: {}", stats.validator_count);
    println!("  On a UNL: {}", stats.trusted_validator_count);

    if sources.is_empty() {
        println!("\nNo validator lists accepted yet.");
    } else {
        println!("\nValidator Lists:");
        for source in sources {
            println!("  {} ({})", source.url, source.network);
            println!("    Sequence: {}", source.sequence);
            println!("    Members: {}", source.member_count);
            println!("    Expires: {}", format_unix(source.expiration));
            println!("    Last Updated: {}", format_unix(source.updated_at));
        }
    }

    println!();

    storage.close().await;

    Ok(())
}

fn format_unix(secs: i64) -> String {
    chrono::DateTime::from_timestamp(secs, 0)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Initialize the database
async fn init_database(database_url: &str) -> Result<()> {
    info!("Initializing database: {}", database_url);

    let storage = Storage::new(database_url, None, None)
        .await
        .context("Failed to connect to database")?;

    storage
        .run_migrations()
        .await
        .context("Failed to run migrations")?;

    storage
        .health_check()
        .await
        .context("Database health check failed")?;

    let stats = storage.stats().await?;
    info!("Database initialized successfully!");
    info!("  Manifests: {}", stats.manifest_count);
    info!("  Validators: {}", stats.validator_count);
    info!("  UNL sources: {}", stats.unl_source_count);

    storage.close().await;

    Ok(())
}
