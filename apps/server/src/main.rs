//! Boothcast Server - Standalone headless server for Boothcast.
//!
//! This binary runs the live commentary pipeline without a GUI: it watches
//! snapshot directories, drives the agent stages against the configured
//! LLM/TTS endpoints, and serves the subscriber WebSocket. It's designed
//! for server deployments where Boothcast runs as a background daemon.

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use parking_lot::RwLock;
use boothcast_core::{bootstrap_services, start_server, AppState, StaticContext};
use tokio::signal;

use crate::config::ServerConfig;

/// Boothcast Server - Headless live sports commentary pipeline.
#[derive(Parser, Debug)]
#[command(name = "boothcast-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "BOOTHCAST_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Bind port (overrides config file).
    #[arg(short = 'p', long, env = "BOOTHCAST_BIND_PORT")]
    port: Option<u16>,

    /// Snapshot ingest root (overrides config file).
    #[arg(short = 'i', long, env = "BOOTHCAST_INGEST_ROOT")]
    ingest_root: Option<PathBuf>,

    /// Data directory for durable artifacts (overrides config file).
    #[arg(short = 'd', long, env = "BOOTHCAST_DATA_ROOT")]
    data_root: Option<PathBuf>,

    /// Static context JSON files for games to start immediately.
    #[arg(short = 'g', long = "game", value_name = "FILE")]
    games: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("Boothcast Server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config =
        ServerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    // Apply CLI overrides
    if let Some(port) = args.port {
        config.bind_port = port;
    }
    if let Some(ingest_root) = args.ingest_root {
        config.ingest_root = ingest_root;
    }
    if let Some(data_root) = args.data_root {
        config.data_root = data_root;
    }
    config.games.extend(args.games);

    log::info!(
        "Configuration: bind_port={}, ingest_root={}, data_root={}",
        config.bind_port,
        config.ingest_root.display(),
        config.data_root.display()
    );

    // Bootstrap services
    let core_config = config.to_core_config();
    let services = bootstrap_services(&core_config).context("Failed to bootstrap services")?;

    log::info!("Services bootstrapped successfully");

    // Start any games configured for boot. Others arrive via POST /api/games.
    for path in &config.games {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read static context: {}", path.display()))?;
        let ctx: StaticContext = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse static context: {}", path.display()))?;
        let game_id = ctx.game_id.clone();
        services
            .start_game(ctx)
            .await
            .with_context(|| format!("Failed to start game {}", game_id))?;
        log::info!("Game {} started", game_id);
    }

    // Build app state for the HTTP server
    let app_state = AppState::new(&services, Arc::new(RwLock::new(core_config)));

    // Spawn the HTTP server on the main tokio runtime.
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(app_state).await {
            log::error!("Server error: {}", e);
        }
    });

    log::info!("HTTP server started on port {}", config.bind_port);

    // Wait for shutdown signal
    shutdown_signal().await;

    log::info!("Shutdown signal received, cleaning up...");

    // Graceful shutdown: drain pipelines, close subscribers
    services.shutdown().await;

    // Abort the server task (subscribers have been closed already)
    server_handle.abort();

    log::info!("Shutdown complete");
    Ok(())
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
