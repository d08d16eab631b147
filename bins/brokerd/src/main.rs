//! Brokerage ledger daemon
//!
//! This is the main entry point for the ledger. It provides commands for
//! initializing and validating configuration, running a single lifecycle
//! batch, and running the session scheduler.

use anyhow::{Context, Result};
use cli::{BatchArg, Cli, Commands};
use common::{Clock, SystemClock};
use config::{
    generate_default_config, load_config, save_config, validate_config, MasterConfig,
    StorageBackend,
};
use matching_engine::MatchingEngine;
use observability::{init_logging, init_metrics, LogFormat, LogSettings};
use oms::{seed_market, Lifecycle, Scheduler, TradingCalendar};
use std::path::Path;
use std::sync::Arc;
use storage::{InMemoryLedgerStore, LedgerStore};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    match cli.command {
        Commands::Start { config, admit_now } => start_command(&config, admit_now).await,
        Commands::Validate { config } => {
            init_logging(&LogSettings::interactive("brokerd"))?;
            validate_command(&config)
        }
        Commands::Init { output } => {
            init_logging(&LogSettings::interactive("brokerd"))?;
            init_command(&output)
        }
        Commands::Batch { batch, config } => batch_command(batch, &config).await,
    }
}

/// Load the configuration, install logging in its format and refuse to
/// go on if it does not validate
fn prepare(config_path: &Path) -> Result<MasterConfig> {
    let config = load_config(config_path)?;
    let format = config
        .observability
        .log_format
        .parse::<LogFormat>()
        .map_err(anyhow::Error::msg)?;
    init_logging(&LogSettings::new(
        "brokerd",
        format,
        &config.observability.log_filter,
    ))?;
    debug!(path = ?config_path, ?format, "Configuration loaded");

    let report = validate_config(&config);
    for warning in &report.warnings {
        warn!(field = %warning.field, message = %warning.message, "Configuration warning");
    }
    if !report.is_valid() {
        error!(
            error_count = report.errors.len(),
            "Configuration validation failed"
        );
        for err in &report.errors {
            error!("{}", err);
        }
        anyhow::bail!("Cannot start ledger due to configuration errors");
    }
    Ok(config)
}

async fn open_store(config: &MasterConfig) -> Result<Arc<dyn LedgerStore>> {
    match config.storage.backend {
        StorageBackend::Memory => {
            warn!("Using the in-memory ledger store; nothing survives a restart");
            Ok(Arc::new(InMemoryLedgerStore::new()))
        }
        StorageBackend::Postgres => open_postgres(config).await,
    }
}

#[cfg(feature = "postgres")]
async fn open_postgres(config: &MasterConfig) -> Result<Arc<dyn LedgerStore>> {
    let pg = config
        .storage
        .postgres
        .as_ref()
        .context("storage.postgres is required for the postgres backend")?;
    let store = storage::PostgresLedgerStore::connect(&pg.url, pg.max_connections)
        .await
        .context("Failed to connect to PostgreSQL")?;
    store
        .ensure_schema()
        .await
        .context("Failed to apply the ledger schema")?;
    info!(max_connections = pg.max_connections, "Using PostgreSQL ledger store");
    Ok(Arc::new(store))
}

#[cfg(not(feature = "postgres"))]
async fn open_postgres(_config: &MasterConfig) -> Result<Arc<dyn LedgerStore>> {
    anyhow::bail!("brokerd was built without the `postgres` feature")
}

/// Open the store, seed the market and wire matching into the lifecycle
async fn build_lifecycle(config: &MasterConfig) -> Result<Arc<Lifecycle>> {
    let store = open_store(config).await?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let calendar = TradingCalendar::from_config(&config.trading)?;

    let seeded = seed_market(store.as_ref(), &config.market, clock.as_ref()).await?;
    info!(
        stocks_created = seeded.stocks_created,
        orders_created = seeded.orders_created,
        "Market ready"
    );

    let engine = MatchingEngine::with_lot_size(store.clone(), clock.clone(), config.trading.lot_size);
    Ok(Arc::new(Lifecycle::new(store, engine, calendar, clock)))
}

async fn start_command(config_path: &Path, admit_now: bool) -> Result<()> {
    let config = prepare(config_path)?;
    info!(
        ledger = %config.ledger.name,
        version = %config.ledger.version,
        session_open = %config.trading.session_open,
        session_close = %config.trading.session_close,
        utc_offset_hours = config.trading.utc_offset_hours,
        "Brokerage ledger starting"
    );

    if let Some(port) = config.observability.metrics_port {
        init_metrics(port)?;
    }

    let lifecycle = build_lifecycle(&config).await?;
    let mut scheduler_config = config.scheduler.clone();
    scheduler_config.admission_on_startup |= admit_now;
    let scheduler = Scheduler::new(lifecycle, scheduler_config);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler_task = tokio::spawn(async move { scheduler.run(shutdown_rx).await });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutdown signal received");

    // The scheduler may already have stopped (disabled)
    let _ = shutdown_tx.send(true);
    scheduler_task.await.context("Scheduler task failed")?;

    info!("Brokerage ledger stopped");
    Ok(())
}

/// A one-shot batch only sees orders that outlive the process
fn ensure_durable_store(config: &MasterConfig) -> Result<()> {
    if config.storage.backend == StorageBackend::Memory {
        anyhow::bail!(
            "`brokerd batch` needs a persistent store; the memory backend starts empty \
             and holds no customer orders. Set storage.backend to postgres"
        );
    }
    Ok(())
}

async fn batch_command(batch: BatchArg, config_path: &Path) -> Result<()> {
    let config = prepare(config_path)?;
    ensure_durable_store(&config)?;
    let lifecycle = build_lifecycle(&config).await?;

    info!(batch = batch.as_str(), "Running batch on demand");
    let report = match batch {
        BatchArg::Admission => lifecycle.run_admission_batch().await?,
        BatchArg::Expiry => lifecycle.run_expiry_batch().await?,
    };

    println!("{}", report);
    if report.failed > 0 {
        anyhow::bail!("{} order(s) failed in the {} batch", report.failed, batch.as_str());
    }
    Ok(())
}

fn validate_command(config_path: &Path) -> Result<()> {
    info!(path = ?config_path, "Validating configuration");

    let config = match load_config(config_path) {
        Ok(c) => c,
        Err(e) => {
            error!(%e, "Failed to load configuration");
            anyhow::bail!(e);
        }
    };

    let report = validate_config(&config);

    // Print summary
    println!("\n=== Configuration Validation Report ===\n");

    if !report.defaults_applied.is_empty() {
        println!("Defaults Applied ({}):", report.defaults_applied.len());
        for default in &report.defaults_applied {
            println!("  [info] {} = {}", default.field, default.value);
        }
        println!();
    }

    if !report.warnings.is_empty() {
        println!("Warnings ({}):", report.warnings.len());
        for warning in &report.warnings {
            println!("  [warn] [{}] {}", warning.field, warning.message);
        }
        println!();
    }

    if !report.errors.is_empty() {
        println!("Errors ({}):", report.errors.len());
        for err in &report.errors {
            println!("  [error] {}", err);
        }
        println!();
        anyhow::bail!("Configuration validation failed");
    }

    println!("[ok] Configuration is valid!");
    println!();
    println!("Ledger: {}", config.ledger.name);
    println!("Version: {}", config.ledger.version);
    println!(
        "Session: {}-{} (UTC{:+}) on {}",
        config.trading.session_open,
        config.trading.session_close,
        config.trading.utc_offset_hours,
        config.trading.trading_days.join(", ")
    );
    println!("Storage: {:?}", config.storage.backend);
    println!("Instruments: {}", config.market.instruments.len());

    Ok(())
}

fn init_command(output_path: &Path) -> Result<()> {
    info!(?output_path, "Initializing new configuration file");

    let config = generate_default_config();

    if let Some(parent) = output_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {:?}", parent))?;
    }

    save_config(&config, output_path)?;

    println!("[ok] Configuration file created successfully!");
    println!();
    println!("Location: {:?}", output_path);
    println!();
    println!("This configuration includes:");
    println!("  - Ledger metadata (name, description, version)");
    println!("  - Mon-Fri 09:00-17:00 session at UTC+8, lots of 100");
    println!(
        "  - {} instruments, some with standing liquidity",
        config.market.instruments.len()
    );
    println!();
    println!("Next steps:");
    println!("  1. Edit the configuration file to customize settings");
    println!("  2. Set DATABASE_URL if you switch storage to postgres");
    println!(
        "  3. Run 'brokerd validate --config {:?}' to check configuration",
        output_path
    );
    println!(
        "  4. Run 'brokerd start --config {:?}' to start the ledger",
        output_path
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::PostgresConfig;

    #[test]
    fn test_batch_refuses_memory_store() {
        let mut config = generate_default_config();
        config.storage.backend = StorageBackend::Memory;
        let err = ensure_durable_store(&config).unwrap_err();
        assert!(err.to_string().contains("persistent store"));

        config.storage.backend = StorageBackend::Postgres;
        config.storage.postgres = Some(PostgresConfig {
            url: "postgres://localhost/ledger".to_string(),
            max_connections: 5,
        });
        assert!(ensure_durable_store(&config).is_ok());
    }
}
