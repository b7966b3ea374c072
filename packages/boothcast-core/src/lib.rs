//! Boothcast Core - shared library for Boothcast.
//!
//! This crate provides the core functionality for Boothcast, a live
//! two-voice sports commentary pipeline: it watches time-indexed game
//! snapshots on disk, maintains the authoritative Board state, drives the
//! Analyze → Narrate → Synthesize agent workflow, and broadcasts rendered
//! audio to WebSocket subscribers in strict game-time order. It is designed
//! to be used by the standalone headless server and by embedding hosts.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`game`]: GameTime, snapshots, rosters, and the Board reducer
//! - [`watch`]: Snapshot file watcher (at-least-once arrivals)
//! - [`agent`]: Collaborator boundaries, prompt assembly, adaptive sessions
//! - [`stages`]: The three stage contracts and their degraded modes
//! - [`pipeline`]: Per-game actor topology and the ordering queue
//! - [`services`]: Broadcast hub and game session registry
//! - [`persist`]: Durable artifacts and crash recovery
//! - [`retry`]: Failure classification and bounded retry
//! - [`events`]: Observability event system
//! - [`api`]: HTTP/WebSocket surface
//! - [`error`]: Centralized error types
//!
//! # Abstraction Traits
//!
//! The crate defines several traits to decouple core logic from external
//! collaborators and platforms:
//!
//! - [`LlmClient`](agent::LlmClient): Text generation for Analyze/Narrate
//! - [`TtsClient`](agent::TtsClient): Speech synthesis for Synthesize
//! - [`EventEmitter`](events::EventEmitter): Emitting domain events
//! - [`TaskSpawner`](runtime::TaskSpawner): Spawning background tasks
//!
//! Each trait has a default implementation suitable for the standalone
//! server; tests substitute scripted fakes.

#![warn(clippy::all)]

pub mod agent;
pub mod api;
pub mod audio;
pub mod bootstrap;
pub mod error;
pub mod events;
pub mod game;
pub mod persist;
pub mod pipeline;
pub mod protocol_constants;
pub mod retry;
pub mod runtime;
pub mod services;
pub mod stages;
pub mod state;
pub mod utils;
pub mod watch;

// Re-export commonly used types at the crate root
pub use agent::{ContextManager, HttpLlmClient, HttpTtsClient, LlmClient, SessionManager, TtsClient};
pub use bootstrap::{bootstrap_services, BootstrappedServices};
pub use error::{BoothError, BoothResult, ErrorCode};
pub use events::{
    BoardEvent, EventEmitter, HubEvent, ObservabilityBridge, ObservabilityEvent, PipelineEvent,
    SessionEvent,
};
pub use game::{Board, BoardProjection, GameId, GameTime, RosterLock, Snapshot, StaticContext};
pub use persist::{GameStore, Watermark};
pub use pipeline::{start_game, GameHandle, PipelineDeps};
pub use runtime::{TaskSpawner, TokioSpawner};
pub use services::{BroadcastHub, SessionRegistry, WireFrame};
pub use stages::{NarrationBatch, PipelineOutput, Stage};
pub use state::Config;
pub use utils::now_millis;

// Re-export API types
pub use api::{start_server, AppState, ServerError, WsConnectionManager};
