//! Application bootstrap and dependency wiring.
//!
//! This module contains the composition root - the single place where all
//! services are instantiated and wired together. This pattern provides:
//!
//! - **Clarity**: All dependency relationships are visible in one place
//! - **Testability**: Easy to swap implementations for testing
//! - **Maintainability**: Service creation logic is isolated from usage

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tokio_util::sync::CancellationToken;

use crate::agent::{HttpLlmClient, HttpTtsClient, LlmClient, TtsClient};
use crate::api::WsConnectionManager;
use crate::error::{BoothError, BoothResult};
use crate::events::ObservabilityBridge;
use crate::game::roster::StaticContext;
use crate::pipeline::{GameHandle, PipelineDeps};
use crate::runtime::TokioSpawner;
use crate::services::{BroadcastHub, SessionRegistry};
use crate::state::Config;

/// Container for all bootstrapped services.
///
/// This struct holds all the wired services created during bootstrap.
/// It's consumed by `AppState` to build the final application state.
#[derive(Clone)]
pub struct BootstrappedServices {
    /// Running game sessions.
    pub registry: Arc<SessionRegistry>,
    /// Per-game broadcast feeds.
    pub hub: Arc<BroadcastHub>,
    /// Observability event bridge (`/ws/events` and logs).
    pub event_bridge: Arc<ObservabilityBridge>,
    /// Manages WebSocket connections.
    pub ws_manager: Arc<WsConnectionManager>,
    /// LLM collaborator for Analyze and Narrate.
    pub llm: Arc<dyn LlmClient>,
    /// TTS collaborator for Synthesize.
    pub tts: Arc<dyn TtsClient>,
    /// Shared HTTP client for connection pooling.
    http_client: Client,
    /// Task spawner for background operations.
    pub spawner: TokioSpawner,
    /// Cancellation token for graceful shutdown.
    pub cancel_token: CancellationToken,
    /// Validated application configuration.
    config: Config,
}

impl BootstrappedServices {
    /// Returns the shared HTTP client.
    #[must_use]
    pub fn http_client(&self) -> &Client {
        &self.http_client
    }

    /// Dependencies handed to every started game pipeline.
    #[must_use]
    pub fn pipeline_deps(&self) -> PipelineDeps {
        PipelineDeps {
            config: self.config.clone(),
            llm: Arc::clone(&self.llm),
            tts: Arc::clone(&self.tts),
            emitter: Arc::clone(&self.event_bridge) as Arc<dyn crate::events::EventEmitter>,
            hub: Arc::clone(&self.hub),
        }
    }

    /// Starts a game pipeline and registers it.
    pub async fn start_game(&self, ctx: StaticContext) -> BoothResult<Arc<GameHandle>> {
        let game_id = ctx.game_id.clone();
        if self.registry.get(&game_id).is_some() {
            return Err(BoothError::GameAlreadyRunning(game_id.to_string()));
        }
        let handle = crate::pipeline::start_game(self.pipeline_deps(), ctx).await?;
        self.registry.insert(Arc::clone(&handle));
        Ok(handle)
    }

    /// Initiates graceful shutdown of all services.
    pub async fn shutdown(&self) {
        log::info!("[Bootstrap] Beginning graceful shutdown...");

        // Signal cancellation to all background tasks
        self.cancel_token.cancel();

        // Drain every running game within the configured grace period
        let grace = Duration::from_secs(self.config.drain_grace_secs);
        for game_id in self.registry.game_ids() {
            if let Some(handle) = self.registry.remove(&game_id) {
                handle.stop(grace).await;
            }
        }

        // Then close subscriber connections (they have received `end`)
        let closed = self.ws_manager.close_all();
        log::info!("[Bootstrap] Closed {} connection(s)", closed);

        log::info!("[Bootstrap] Shutdown complete");
    }
}

/// Creates the shared HTTP client for all collaborator communication.
///
/// Using a shared client enables connection pooling for better performance.
/// This is created once during bootstrap and injected into the adapters.
/// The client-level timeout is a backstop; per-call deadlines come from the
/// retry kernel.
fn create_http_client(config: &Config) -> Client {
    let backstop = config.llm_timeout().max(config.tts_timeout()) + Duration::from_secs(5);
    Client::builder()
        .timeout(backstop)
        .build()
        .expect("Failed to create HTTP client")
}

/// Bootstraps all application services with their dependencies.
///
/// This is the composition root where all services are instantiated and
/// wired together. The wiring order matters - services are created in
/// dependency order:
///
/// 1. Shared infrastructure (HTTP client, event bridge, cancellation token)
/// 2. Hub and registry
/// 3. Collaborator adapters (depend on the HTTP client)
///
/// # Errors
///
/// Returns an error if the configuration fails validation.
pub fn bootstrap_services(config: &Config) -> BoothResult<BootstrappedServices> {
    config
        .validate()
        .map_err(BoothError::Configuration)?;

    // Create task spawner from current runtime
    let spawner = TokioSpawner::current();

    // Create shared HTTP client for connection pooling
    let http_client = create_http_client(config);

    // Create the event bridge that maps domain events to broadcast transport
    let event_bridge = Arc::new(ObservabilityBridge::new(config.event_channel_capacity));

    // Create cancellation token for graceful shutdown
    let cancel_token = CancellationToken::new();

    // Shared state
    let registry = Arc::new(SessionRegistry::new());
    let hub = Arc::new(BroadcastHub::new(
        config.per_subscriber_queue,
        config.hub_retain_frames,
    ));
    let ws_manager = Arc::new(WsConnectionManager::new());

    // Collaborator adapters share the pooled client
    let llm: Arc<dyn LlmClient> = Arc::new(HttpLlmClient::new(
        http_client.clone(),
        config.llm_endpoint.clone(),
    ));
    let tts: Arc<dyn TtsClient> = Arc::new(HttpTtsClient::new(
        http_client.clone(),
        config.tts_endpoint.clone(),
    ));

    Ok(BootstrappedServices {
        registry,
        hub,
        event_bridge,
        ws_manager,
        llm,
        tts,
        http_client,
        spawner,
        cancel_token,
        config: config.clone(),
    })
}
