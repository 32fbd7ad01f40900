//! perf-thresholds binary entry point.
//!
//! All logs go to stderr; stdout carries command output only.
//!
//! Coverage is excluded because the main function wires real OS sources,
//! a real store, and signal handling together.

// Enable the coverage attribute when running with nightly for llvm-cov exclusions
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

use std::sync::Arc;

use perf_thresholds::cli::{execute, format_duration, help_text, CliArgs, ThresholdCommand};
use perf_thresholds::config::{Config, LogFormat, StoreBackend};
use perf_thresholds::error::AppError;
use perf_thresholds::metrics::{select_system_provider, StoreCounters};
use perf_thresholds::storage::{MemoryStore, SqliteStore};
use perf_thresholds::thresholds::{MetricCollector, ThresholdManager, ThresholdService};
use perf_thresholds::traits::{KeyValueStore, RealTimeProvider};
use tracing_subscriber::filter::EnvFilter;

#[cfg_attr(coverage_nightly, coverage(off))]
fn init_logging(config: &Config) {
    let filter = config
        .log_level
        .parse()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false);

    match config.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
async fn open_store(config: &Config) -> Result<Arc<dyn KeyValueStore>, AppError> {
    match config.store_backend {
        StoreBackend::Sqlite => {
            if let Some(parent) = std::path::Path::new(&config.database_path).parent() {
                if !parent.as_os_str().is_empty() {
                    if let Err(e) = std::fs::create_dir_all(parent) {
                        tracing::warn!(path = %parent.display(), error = %e, "Could not create database directory");
                    }
                }
            }
            Ok(Arc::new(SqliteStore::new(&config.database_path).await?))
        }
        StoreBackend::Memory => Ok(Arc::new(MemoryStore::default())),
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
async fn run(cli: CliArgs, config: Config) -> Result<String, AppError> {
    let store = open_store(&config).await?;
    let clock = Arc::new(RealTimeProvider);
    let collector = MetricCollector::new(
        select_system_provider(config.system_metrics_enabled),
        Some(Arc::new(StoreCounters::new(Arc::clone(&store)))),
    );
    let manager = ThresholdManager::new(store, collector, clock);

    let interval = match &cli.command {
        ThresholdCommand::Run {
            interval: Some(interval),
        } => *interval,
        _ => config.collection_interval(),
    };
    let (service, handle) = ThresholdService::new(manager, interval);
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let service_task = tokio::spawn(service.run(shutdown_rx));

    if !cli.command.is_long_running() {
        let result = execute(&handle, &cli.command, cli.json).await;
        let _ = shutdown_tx.send(true);
        if let Err(e) = service_task.await {
            tracing::error!(error = %e, "Threshold service task failed");
        }
        return result;
    }

    tracing::info!(
        interval = %format_duration(interval),
        backend = %config.store_backend,
        "Scheduler running; press Ctrl-C to stop"
    );
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl-C");
    }
    tracing::info!("Shutdown requested");

    let _ = shutdown_tx.send(true);
    if let Err(e) = service_task.await {
        tracing::error!(error = %e, "Threshold service task failed");
    }
    execute(&handle, &cli.command, cli.json).await
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let cli = match CliArgs::parse(&args) {
        Ok(cli) => cli,
        Err(e) => {
            eprintln!("{e}\n\n{}", help_text());
            std::process::exit(2);
        }
    };

    if cli.command == ThresholdCommand::Help {
        print!("{}", help_text());
        return;
    }

    // Load configuration from environment
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(1);
        }
    };

    init_logging(&config);

    tracing::debug!(
        backend = %config.store_backend,
        database = %config.database_path,
        system_metrics = config.system_metrics_enabled,
        "Configuration loaded"
    );

    match run(cli, config).await {
        Ok(output) => print!("{output}"),
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}
