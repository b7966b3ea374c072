//! HTTP/WebSocket API layer.
//!
//! This module contains thin handlers that delegate to the registry and
//! pipeline. It provides the router construction and server startup
//! functionality.

use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

use crate::events::ObservabilityBridge;
use crate::pipeline::PipelineDeps;
use crate::services::{BroadcastHub, SessionRegistry};
use crate::state::Config;

pub mod http;
pub mod ws;
pub mod ws_connection;

pub use ws_connection::WsConnectionManager;

/// Errors that can occur when starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to a TCP port.
    #[error("Failed to bind to port: {0}")]
    Bind(#[from] std::io::Error),

    /// No available ports in the specified range.
    #[error("No available ports in range {start}-{end}")]
    NoAvailablePort { start: u16, end: u16 },
}

/// Shared application state for the API layer.
///
/// This is a thin wrapper that holds references to services.
/// All business logic lives in the services themselves.
#[derive(Clone)]
pub struct AppState {
    /// Dependencies handed to every started game pipeline.
    pub pipeline_deps: PipelineDeps,
    /// Running game sessions.
    pub registry: Arc<SessionRegistry>,
    /// Per-game broadcast feeds.
    pub hub: Arc<BroadcastHub>,
    /// Observability event bridge for `/ws/events`.
    pub event_bridge: Arc<ObservabilityBridge>,
    /// Manages WebSocket connections.
    pub ws_manager: Arc<WsConnectionManager>,
    /// Application configuration.
    pub config: Arc<RwLock<Config>>,
}

impl AppState {
    /// Builds the API state from bootstrapped services.
    #[must_use]
    pub fn new(services: &crate::BootstrappedServices, config: Arc<RwLock<Config>>) -> Self {
        Self {
            pipeline_deps: services.pipeline_deps(),
            registry: Arc::clone(&services.registry),
            hub: Arc::clone(&services.hub),
            event_bridge: Arc::clone(&services.event_bridge),
            ws_manager: Arc::clone(&services.ws_manager),
            config,
        }
    }
}

async fn find_available_port(
    start: u16,
    end: u16,
) -> Result<(u16, tokio::net::TcpListener), ServerError> {
    for port in start..=end {
        let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
        match tokio::net::TcpListener::bind(&addr).await {
            Ok(listener) => return Ok((port, listener)),
            Err(_) => continue,
        }
    }
    Err(ServerError::NoAvailablePort { start, end })
}

/// Starts the HTTP server on the configured or auto-discovered port.
pub async fn start_server(state: AppState) -> Result<(), ServerError> {
    let preferred_port = state.config.read().bind_port;
    let (port, listener) = if preferred_port > 0 {
        let addr = std::net::SocketAddr::from(([0, 0, 0, 0], preferred_port));
        (preferred_port, tokio::net::TcpListener::bind(&addr).await?)
    } else {
        find_available_port(49700, 49710).await?
    };

    log::info!("Server listening on http://0.0.0.0:{}", port);
    let app = http::create_router(state);

    axum::serve(listener, app).await?;
    Ok(())
}
