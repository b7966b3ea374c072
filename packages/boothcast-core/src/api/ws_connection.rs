//! WebSocket connection tracking and management.
//!
//! This module provides tracking of subscriber connections with force-close
//! capability:
//!
//! - `WsConnectionManager`: Tracks all active WebSocket connections
//! - `ConnectionGuard`: RAII guard for automatic cleanup on disconnect

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use crate::game::snapshot::GameId;

/// Internal connection state.
struct ConnectionState {
    /// Game the subscriber attached to, once its subscribe op arrived.
    game_id: Option<GameId>,
}

/// Manages all active WebSocket connections.
///
/// Thread-safe and designed for concurrent access from multiple
/// WebSocket handlers. Uses hierarchical cancellation tokens for
/// efficient force-close of all connections.
pub struct WsConnectionManager {
    /// Active connections: connection_id -> ConnectionState
    connections: DashMap<String, ConnectionState>,
    /// Counter for generating unique connection IDs.
    next_id: AtomicU64,
    /// Global cancellation token - when cancelled, all connections close.
    /// Wrapped in RwLock so it can be replaced after close_all().
    global_cancel: RwLock<CancellationToken>,
}

impl WsConnectionManager {
    /// Creates a new connection manager.
    #[must_use]
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            next_id: AtomicU64::new(1),
            global_cancel: RwLock::new(CancellationToken::new()),
        }
    }

    /// Registers a new connection and returns a guard for RAII cleanup.
    ///
    /// The returned `ConnectionGuard` will automatically unregister the
    /// connection when dropped.
    pub fn register(self: &Arc<Self>) -> ConnectionGuard {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let conn_id = format!("ws-{}", id);
        let cancel_token = self.global_cancel.read().child_token();

        self.connections
            .insert(conn_id.clone(), ConnectionState { game_id: None });
        log::info!(
            "[WS] Connection registered: {} (total: {})",
            conn_id,
            self.connections.len()
        );

        ConnectionGuard {
            id: conn_id,
            manager: Arc::clone(self),
            cancel_token,
        }
    }

    /// Records which game a connection subscribed to.
    pub fn attach_game(&self, conn_id: &str, game_id: &GameId) {
        if let Some(mut state) = self.connections.get_mut(conn_id) {
            state.game_id = Some(game_id.clone());
        }
    }

    /// Unregisters a connection by ID.
    fn unregister(&self, id: &str) {
        if self.connections.remove(id).is_some() {
            log::info!(
                "[WS] Connection unregistered: {} (remaining: {})",
                id,
                self.connections.len()
            );
        }
    }

    /// Returns the number of active connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Number of connections subscribed to one game.
    #[must_use]
    pub fn subscribers_for(&self, game_id: &GameId) -> usize {
        self.connections
            .iter()
            .filter(|r| r.value().game_id.as_ref() == Some(game_id))
            .count()
    }

    /// Force-closes all connections.
    ///
    /// This cancels the global token, which signals all connection handlers
    /// to terminate gracefully. After cancellation, a fresh token is created
    /// so new connections can still be accepted.
    ///
    /// Returns the number of connections that were signaled to close.
    pub fn close_all(&self) -> usize {
        let count = self.connections.len();
        if count > 0 {
            log::info!("[WS] Force-closing {} connection(s)", count);
            // Cancel current token and replace with a fresh one
            let mut guard = self.global_cancel.write();
            guard.cancel();
            *guard = CancellationToken::new();
        } else {
            log::info!("[WS] close_all called but no connections to close");
        }
        count
    }
}

impl Default for WsConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard that unregisters a connection when dropped.
///
/// This ensures connections are always cleaned up, even if the handler
/// panics or exits early.
pub struct ConnectionGuard {
    id: String,
    manager: Arc<WsConnectionManager>,
    /// Token for this specific connection - cancelled on force-close.
    cancel_token: CancellationToken,
}

impl ConnectionGuard {
    /// Returns the connection ID.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the cancellation token for this connection.
    ///
    /// Use this in `tokio::select!` to detect force-close requests.
    #[must_use]
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel_token
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.manager.unregister(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_drop_tracks_count() {
        let manager = Arc::new(WsConnectionManager::new());
        let guard = manager.register();
        assert_eq!(manager.connection_count(), 1);

        manager.attach_game(guard.id(), &GameId::from("GAME"));
        assert_eq!(manager.subscribers_for(&GameId::from("GAME")), 1);

        drop(guard);
        assert_eq!(manager.connection_count(), 0);
    }

    #[test]
    fn close_all_cancels_outstanding_tokens() {
        let manager = Arc::new(WsConnectionManager::new());
        let guard = manager.register();
        let token = guard.cancel_token().clone();

        assert_eq!(manager.close_all(), 1);
        assert!(token.is_cancelled());

        // New registrations get a live token again.
        let fresh = manager.register();
        assert!(!fresh.cancel_token().is_cancelled());
    }
}
