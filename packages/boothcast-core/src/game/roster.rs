//! Per-game static context and the roster lock.
//!
//! The roster lock is the closed set of identifiers narration may name.
//! Segments referencing anything outside it are rewritten to a generic
//! role or dropped before emission.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::game::snapshot::{GameId, TeamSide};

/// Non-player tokens narration may always use.
pub const ALLOWED_NON_PLAYERS: [&str; 3] = ["referee", "crowd", "announcer"];

/// Generic role tokens substituted for out-of-roster player references.
pub const GENERIC_ROLES: [&str; 4] = ["the defender", "the winger", "the center", "the forward"];

/// One rostered player: producer identifier plus broadcast display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerEntry {
    pub id: String,
    pub name: String,
}

impl PlayerEntry {
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Per-game static context, produced once before live ingest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticContext {
    pub game_id: GameId,
    pub away_team: String,
    pub home_team: String,
    pub venue: String,
    pub roster_away: Vec<PlayerEntry>,
    pub roster_home: Vec<PlayerEntry>,
    /// Starting goalie identifiers.
    pub goalie_away: String,
    pub goalie_home: String,
}

impl StaticContext {
    /// Team name for one side.
    #[must_use]
    pub fn team(&self, side: TeamSide) -> &str {
        match side {
            TeamSide::Away => &self.away_team,
            TeamSide::Home => &self.home_team,
        }
    }

    /// Starting goalie identifier for one side.
    #[must_use]
    pub fn goalie(&self, side: TeamSide) -> &str {
        match side {
            TeamSide::Away => &self.goalie_away,
            TeamSide::Home => &self.goalie_home,
        }
    }

    /// Roster entries for one side.
    #[must_use]
    pub fn roster(&self, side: TeamSide) -> &[PlayerEntry] {
        match side {
            TeamSide::Away => &self.roster_away,
            TeamSide::Home => &self.roster_home,
        }
    }

    /// Whether a player identifier or display name is rostered on either side.
    #[must_use]
    pub fn knows_player(&self, token: &str) -> bool {
        self.roster_away
            .iter()
            .chain(self.roster_home.iter())
            .any(|p| p.id == token || p.name == token)
    }

    /// Builds the roster lock for narration filtering.
    #[must_use]
    pub fn roster_lock(&self) -> RosterLock {
        RosterLock::from_context(self)
    }
}

/// The closed set of tokens narration may name (case-insensitive).
///
/// Contains both player ids and display names from both rosters, the
/// starting goalies, and the fixed non-player tokens.
#[derive(Debug, Clone)]
pub struct RosterLock {
    allowed: HashSet<String>,
    /// Display names only, for prompt assembly.
    display_names: Vec<String>,
}

impl RosterLock {
    fn from_context(ctx: &StaticContext) -> Self {
        let mut allowed = HashSet::new();
        let mut display_names = Vec::new();

        for player in ctx.roster_away.iter().chain(ctx.roster_home.iter()) {
            allowed.insert(player.id.to_lowercase());
            allowed.insert(player.name.to_lowercase());
            display_names.push(player.name.clone());
        }
        allowed.insert(ctx.goalie_away.to_lowercase());
        allowed.insert(ctx.goalie_home.to_lowercase());
        for token in ALLOWED_NON_PLAYERS {
            allowed.insert(token.to_string());
        }

        Self {
            allowed,
            display_names,
        }
    }

    /// Whether a referenced token is inside the lock.
    #[must_use]
    pub fn contains(&self, token: &str) -> bool {
        self.allowed.contains(&token.to_lowercase())
            || GENERIC_ROLES.iter().any(|r| r.eq_ignore_ascii_case(token))
    }

    /// Roster display names, for the authoritative prompt block.
    #[must_use]
    pub fn display_names(&self) -> &[String] {
        &self.display_names
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// EDM @ FLA fixture used across stage and pipeline tests.
    pub fn edm_at_fla() -> StaticContext {
        StaticContext {
            game_id: GameId::from("GAME"),
            away_team: "EDM".into(),
            home_team: "FLA".into(),
            venue: "Amerant Bank Arena".into(),
            roster_away: vec![
                PlayerEntry::new("edm-29", "Draisaitl"),
                PlayerEntry::new("edm-97", "McDavid"),
                PlayerEntry::new("edm-74", "Skinner"),
            ],
            roster_home: vec![
                PlayerEntry::new("fla-16", "Barkov"),
                PlayerEntry::new("fla-13", "Reinhart"),
                PlayerEntry::new("fla-72", "Bobrovsky"),
            ],
            goalie_away: "Skinner".into(),
            goalie_home: "Bobrovsky".into(),
        }
    }
}
