//! Bridge implementation that maps domain events to broadcast transport.
//!
//! The [`ObservabilityBridge`] lives at the boundary between domain services
//! and transport concerns, mapping typed domain events to the WebSocket
//! broadcast channel behind `/ws/events`.

use tokio::sync::broadcast;

use super::emitter::EventEmitter;
use super::{BoardEvent, HubEvent, ObservabilityEvent, PipelineEvent, SessionEvent};

/// Bridges domain events to the observability broadcast channel.
///
/// This adapter implements [`EventEmitter`] by forwarding events to
/// a `tokio::sync::broadcast` channel that WebSocket handlers subscribe to.
///
/// # Thread Safety
///
/// The bridge is `Send + Sync` and can be shared across async tasks.
#[derive(Clone)]
pub struct ObservabilityBridge {
    tx: broadcast::Sender<ObservabilityEvent>,
}

impl ObservabilityBridge {
    /// Creates a new bridge with the given channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Creates a new bridge wrapping an existing broadcast sender.
    #[must_use]
    pub fn with_sender(tx: broadcast::Sender<ObservabilityEvent>) -> Self {
        Self { tx }
    }

    /// Returns a new receiver for the broadcast channel.
    ///
    /// WebSocket handlers use this to subscribe to events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ObservabilityEvent> {
        self.tx.subscribe()
    }

    /// Returns a reference to the broadcast sender.
    #[must_use]
    pub fn sender(&self) -> &broadcast::Sender<ObservabilityEvent> {
        &self.tx
    }
}

/// Generates an [`EventEmitter`] method that sends to the broadcast channel.
macro_rules! impl_emit {
    ($method:ident, $event_ty:ty, $variant:ident) => {
        fn $method(&self, event: $event_ty) {
            if let Err(e) = self.tx.send(ObservabilityEvent::$variant(event)) {
                log::trace!("[EventBridge] No observability receivers: {}", e);
            }
        }
    };
}

impl EventEmitter for ObservabilityBridge {
    impl_emit!(emit_board, BoardEvent, Board);
    impl_emit!(emit_session, SessionEvent, Session);
    impl_emit!(emit_pipeline, PipelineEvent, Pipeline);
    impl_emit!(emit_hub, HubEvent, Hub);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bridge_forwards_to_subscribers() {
        let bridge = ObservabilityBridge::new(16);
        let mut rx = bridge.subscribe();

        bridge.emit_pipeline(PipelineEvent::GameEnded {
            game_id: "GAME".to_string(),
            timestamp: 7,
        });

        match rx.try_recv().unwrap() {
            ObservabilityEvent::Pipeline(PipelineEvent::GameEnded { game_id, timestamp }) => {
                assert_eq!(game_id, "GAME");
                assert_eq!(timestamp, 7);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
