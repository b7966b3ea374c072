//! Event emitter abstraction for decoupling services from transport.
//!
//! Services depend on the [`EventEmitter`] trait rather than concrete
//! broadcast channels, enabling testing and alternative transport
//! implementations.

use super::{BoardEvent, HubEvent, PipelineEvent, SessionEvent};

/// Trait for emitting domain events without knowledge of transport.
///
/// Services use this trait to emit events, decoupling them from the
/// specifics of how events are delivered to observers (WebSocket, logs, test
/// counters).
pub trait EventEmitter: Send + Sync {
    /// Emits a Board reducer event.
    fn emit_board(&self, event: BoardEvent);

    /// Emits a session refresh event.
    fn emit_session(&self, event: SessionEvent);

    /// Emits a pipeline/ordering event.
    fn emit_pipeline(&self, event: PipelineEvent);

    /// Emits a broadcast hub event.
    fn emit_hub(&self, event: HubEvent);
}

/// No-op emitter for tests and embedders that don't observe events.
pub struct NoopEventEmitter;

impl EventEmitter for NoopEventEmitter {
    fn emit_board(&self, _event: BoardEvent) {
        // No-op
    }

    fn emit_session(&self, _event: SessionEvent) {
        // No-op
    }

    fn emit_pipeline(&self, _event: PipelineEvent) {
        // No-op
    }

    fn emit_hub(&self, _event: HubEvent) {
        // No-op
    }
}

/// Logging emitter for debugging and development.
///
/// Logs all events at debug level. Useful for debugging event flow
/// or in development environments.
pub struct LoggingEventEmitter;

impl EventEmitter for LoggingEventEmitter {
    fn emit_board(&self, event: BoardEvent) {
        tracing::debug!(?event, "board_event");
    }

    fn emit_session(&self, event: SessionEvent) {
        tracing::debug!(?event, "session_event");
    }

    fn emit_pipeline(&self, event: PipelineEvent) {
        tracing::debug!(?event, "pipeline_event");
    }

    fn emit_hub(&self, event: HubEvent) {
        tracing::debug!(?event, "hub_event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Test emitter that counts events.
    struct CountingEventEmitter {
        board_count: AtomicUsize,
        session_count: AtomicUsize,
    }

    impl CountingEventEmitter {
        fn new() -> Self {
            Self {
                board_count: AtomicUsize::new(0),
                session_count: AtomicUsize::new(0),
            }
        }
    }

    impl EventEmitter for CountingEventEmitter {
        fn emit_board(&self, _event: BoardEvent) {
            self.board_count.fetch_add(1, Ordering::SeqCst);
        }

        fn emit_session(&self, _event: SessionEvent) {
            self.session_count.fetch_add(1, Ordering::SeqCst);
        }

        fn emit_pipeline(&self, _event: PipelineEvent) {}
        fn emit_hub(&self, _event: HubEvent) {}
    }

    #[test]
    fn counting_emitter_tracks_events() {
        let emitter = Arc::new(CountingEventEmitter::new());

        emitter.emit_board(BoardEvent::SnapshotReduced {
            game_id: "GAME".to_string(),
            game_time: "P1 00:05".to_string(),
            new_goals: 0,
            anomalies: 0,
            timestamp: 0,
        });
        emitter.emit_session(SessionEvent::Refreshed {
            stage: "narrate".to_string(),
            trigger: "major_event".to_string(),
            session_id: "s1".to_string(),
            timestamp: 0,
        });

        assert_eq!(emitter.board_count.load(Ordering::SeqCst), 1);
        assert_eq!(emitter.session_count.load(Ordering::SeqCst), 1);
    }
}
