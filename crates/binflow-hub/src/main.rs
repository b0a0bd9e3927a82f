//! Binflow Hub - Main entry point
//!
//! Accepts the device and dashboard websocket connections and fans device
//! traffic out by topic.

mod api;
mod config;
mod dispatch;
mod registry;
mod server;
mod state;
mod ws;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "binflow-hub")]
#[command(about = "Binflow websocket hub for device telemetry and image fan-out")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "binflow-hub.toml")]
    config: PathBuf,

    /// Bind address for the server
    #[arg(short, long)]
    bind: Option<String>,

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

    info!("Binflow hub v{}", env!("CARGO_PKG_VERSION"));

    let mut config = config::load_config(&args.config)?;
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }

    let bind = config.server.bind.clone();
    let state = state::AppState::new(config);
    server::run(state, &bind).await
}
