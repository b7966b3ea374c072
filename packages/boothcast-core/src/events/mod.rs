//! Event system for real-time observability.
//!
//! This module provides:
//! - [`EventEmitter`] trait for domain services to emit events
//! - Event types for the pipeline domains (board, sessions, outputs, hub)
//!
//! The actual transport implementation (the `/ws/events` socket) is handled
//! separately in the `api` module using [`ObservabilityBridge`].

mod bridge;
mod emitter;

pub use bridge::ObservabilityBridge;
pub use emitter::{EventEmitter, LoggingEventEmitter, NoopEventEmitter};

use serde::Serialize;

/// Events broadcast to observability clients.
///
/// This enum categorizes all real-time events that can be sent to connected
/// clients. Each category has its own inner event type with specific variants.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "category", rename_all = "camelCase")]
pub enum ObservabilityEvent {
    /// Events from the Board reducer.
    Board(BoardEvent),

    /// Events from the adaptive session manager.
    Session(SessionEvent),

    /// Events from the stage pipeline and ordering queue.
    Pipeline(PipelineEvent),

    /// Events from the broadcast hub.
    Hub(HubEvent),
}

/// Events from the Board reducer.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum BoardEvent {
    /// A snapshot was reduced into the Board.
    SnapshotReduced {
        #[serde(rename = "gameId")]
        game_id: String,
        #[serde(rename = "gameTime")]
        game_time: String,
        #[serde(rename = "newGoals")]
        new_goals: usize,
        anomalies: usize,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// The reducer refused part of a snapshot.
    AnomalyRecorded {
        #[serde(rename = "gameId")]
        game_id: String,
        detail: String,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// A snapshot was quarantined as poison.
    SnapshotPoisoned {
        #[serde(rename = "gameId")]
        game_id: String,
        #[serde(rename = "gameTime")]
        game_time: String,
        reason: String,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
}

/// Events from the adaptive session manager (refresh analytics).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SessionEvent {
    /// A stage session was atomically replaced.
    Refreshed {
        stage: String,
        trigger: String,
        #[serde(rename = "sessionId")]
        session_id: String,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
}

/// Events from the stage pipeline and ordering queue.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PipelineEvent {
    /// An in-order output left the ordering queue.
    OutputReleased {
        #[serde(rename = "gameId")]
        game_id: String,
        #[serde(rename = "gameTime")]
        game_time: String,
        sequence: u64,
        segments: usize,
        /// How long the output waited behind earlier game times (ms).
        #[serde(rename = "pendingWaitMs")]
        pending_wait_ms: u64,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// A skip marker was emitted in place of a game time.
    SkipEmitted {
        #[serde(rename = "gameId")]
        game_id: String,
        #[serde(rename = "gameTime")]
        game_time: String,
        reason: String,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// A stage fell back to its deterministic degraded mode.
    StageDegraded {
        #[serde(rename = "gameId")]
        game_id: String,
        #[serde(rename = "gameTime")]
        game_time: String,
        stage: String,
        reason: String,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// A game session finished and its feed closed.
    GameEnded {
        #[serde(rename = "gameId")]
        game_id: String,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
}

/// Events from the broadcast hub.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum HubEvent {
    /// A subscriber overflowed its outbound queue and was disconnected.
    SubscriberDropped {
        #[serde(rename = "connectionId")]
        connection_id: String,
        #[serde(rename = "gameId")]
        game_id: String,
        reason: String,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
}

// From implementations for converting inner events to ObservabilityEvent
impl From<BoardEvent> for ObservabilityEvent {
    fn from(event: BoardEvent) -> Self {
        ObservabilityEvent::Board(event)
    }
}

impl From<SessionEvent> for ObservabilityEvent {
    fn from(event: SessionEvent) -> Self {
        ObservabilityEvent::Session(event)
    }
}

impl From<PipelineEvent> for ObservabilityEvent {
    fn from(event: PipelineEvent) -> Self {
        ObservabilityEvent::Pipeline(event)
    }
}

impl From<HubEvent> for ObservabilityEvent {
    fn from(event: HubEvent) -> Self {
        ObservabilityEvent::Hub(event)
    }
}
