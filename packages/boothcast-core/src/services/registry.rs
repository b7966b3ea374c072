//! Registry of running game sessions.

use std::sync::Arc;

use dashmap::DashMap;

use crate::game::snapshot::GameId;
use crate::pipeline::GameHandle;

/// Tracks the live pipeline handle per game.
///
/// Thread-safe; shared between the API layer (start/stop/inspect) and the
/// pipelines themselves (self-removal on finish is the owner's call).
#[derive(Default)]
pub struct SessionRegistry {
    games: DashMap<GameId, Arc<GameHandle>>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a started pipeline. Returns `false` if the game id is
    /// already running (the caller should not have started a second one).
    pub fn insert(&self, handle: Arc<GameHandle>) -> bool {
        let game_id = handle.game_id().clone();
        if self.games.contains_key(&game_id) {
            return false;
        }
        self.games.insert(game_id, handle);
        true
    }

    #[must_use]
    pub fn get(&self, game_id: &GameId) -> Option<Arc<GameHandle>> {
        self.games.get(game_id).map(|r| Arc::clone(r.value()))
    }

    pub fn remove(&self, game_id: &GameId) -> Option<Arc<GameHandle>> {
        self.games.remove(game_id).map(|(_, handle)| handle)
    }

    #[must_use]
    pub fn game_ids(&self) -> Vec<GameId> {
        self.games.iter().map(|r| r.key().clone()).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.games.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.games.is_empty()
    }
}
