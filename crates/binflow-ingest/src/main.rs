//! Binflow Ingest - Main entry point
//!
//! Subscribes to the hub and turns its event streams into persisted,
//! category-enriched records.

use anyhow::Result;
use binflow_ingest::{config, CorrelationEngine, MemoryStore, UpstreamManager};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "binflow-ingest")]
#[command(about = "Binflow hub subscriber with rotation/image correlation")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "binflow-ingest.toml")]
    config: PathBuf,

    /// Hub websocket URL (overrides the configured default)
    #[arg(short, long)]
    url: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Binflow ingest v{}", env!("CARGO_PKG_VERSION"));

    let mut config = config::load_config(&args.config)?;
    if let Some(url) = args.url {
        config.upstream.default_url = url;
    }

    let store = Arc::new(MemoryStore::new());
    let engine = Arc::new(CorrelationEngine::new(store.clone()));
    let manager = Arc::new(UpstreamManager::new(
        engine,
        store,
        config.upstream.default_url.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let upstream = tokio::spawn(manager.run(shutdown_rx));

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    let _ = shutdown_tx.send(());
    upstream.await?;

    Ok(())
}
