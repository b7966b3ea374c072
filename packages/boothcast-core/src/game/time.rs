//! Game-clock time points and snapshot filename parsing.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::protocol_constants::PERIOD_LENGTH_MINUTES;

/// A point on the game clock: (period, minute, second), elapsed within the
/// period.
///
/// Ordering is lexicographic on the tuple, so later game moments compare
/// greater. Overtime and shootout are periods beyond regulation with the
/// same arithmetic.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct GameTime {
    pub period: u8,
    pub minute: u8,
    pub second: u8,
}

impl GameTime {
    /// Creates a new game time.
    #[must_use]
    pub fn new(period: u8, minute: u8, second: u8) -> Self {
        Self {
            period,
            minute,
            second,
        }
    }

    /// Total elapsed game seconds since the opening face-off.
    #[must_use]
    pub fn elapsed_seconds(&self) -> u32 {
        let prior_periods = self.period.saturating_sub(1) as u32;
        prior_periods * PERIOD_LENGTH_MINUTES as u32 * 60
            + self.minute as u32 * 60
            + self.second as u32
    }

    /// Clock remaining in the current period, formatted `mm:ss`.
    ///
    /// Clamps to `00:00` once the elapsed time exceeds the period length
    /// (e.g. sudden-death overtime played past the nominal clock).
    #[must_use]
    pub fn remaining_in_period(&self) -> String {
        let elapsed = self.minute as u32 * 60 + self.second as u32;
        let length = PERIOD_LENGTH_MINUTES as u32 * 60;
        let remaining = length.saturating_sub(elapsed);
        format!("{:02}:{:02}", remaining / 60, remaining % 60)
    }

    /// Key used in persisted artifact filenames: `<period>_<mm>_<ss>`.
    #[must_use]
    pub fn file_key(&self) -> String {
        format!("{}_{:02}_{:02}", self.period, self.minute, self.second)
    }
}

impl fmt::Display for GameTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{} {:02}:{:02}", self.period, self.minute, self.second)
    }
}

/// Parses a snapshot filename of the form `<game_id>_<period>_<mm>_<ss>.<ext>`.
///
/// The game id may itself contain underscores, so the three clock components
/// are taken from the right. Returns `None` when the name does not match.
#[must_use]
pub fn parse_snapshot_filename(file_name: &str) -> Option<(String, GameTime)> {
    let stem = file_name.rsplit_once('.').map(|(s, _)| s)?;
    let mut parts = stem.rsplitn(4, '_');

    let second: u8 = parts.next()?.parse().ok()?;
    let minute: u8 = parts.next()?.parse().ok()?;
    let period: u8 = parts.next()?.parse().ok()?;
    let game_id = parts.next()?;

    if game_id.is_empty() || minute > 59 || second > 59 || period == 0 {
        return None;
    }

    Some((game_id.to_string(), GameTime::new(period, minute, second)))
}
