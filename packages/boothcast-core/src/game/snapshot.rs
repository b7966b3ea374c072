//! Snapshot payloads: one sampled observation of a game at a [`GameTime`].
//!
//! Activities use a narrow tagged-variant schema validated on ingress;
//! unknown kinds deserialize to [`Activity::kind`] = `Other` and are
//! surfaced as anomalies by the reducer rather than dropped silently.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::game::time::GameTime;

/// Opaque game identifier; partition key for all state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct GameId(String);

impl GameId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for GameId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Which bench an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeamSide {
    Away,
    Home,
}

impl TeamSide {
    /// The opposing side.
    #[must_use]
    pub fn opponent(self) -> Self {
        match self {
            Self::Away => Self::Home,
            Self::Home => Self::Away,
        }
    }
}

/// An (away, home) counter pair, used for scores and shot totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ScorePair {
    pub away: u32,
    pub home: u32,
}

impl ScorePair {
    #[must_use]
    pub fn new(away: u32, home: u32) -> Self {
        Self { away, home }
    }

    /// Returns the counter for one side.
    #[must_use]
    pub fn side(&self, side: TeamSide) -> u32 {
        match side {
            TeamSide::Away => self.away,
            TeamSide::Home => self.home,
        }
    }

    /// Mutable counter for one side.
    pub fn side_mut(&mut self, side: TeamSide) -> &mut u32 {
        match side {
            TeamSide::Away => &mut self.away,
            TeamSide::Home => &mut self.home,
        }
    }

    /// Sum of both sides.
    #[must_use]
    pub fn total(&self) -> u32 {
        self.away + self.home
    }
}

impl fmt::Display for ScorePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.away, self.home)
    }
}

/// Event-specific payload of one activity.
///
/// The producer's vocabulary is open-ended; kinds this pipeline does not
/// model deserialize to `Other` so a payload with a novel kind still parses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActivityKind {
    Goal {
        scorer: String,
        team: TeamSide,
        #[serde(default)]
        assists: Vec<String>,
    },
    Shot {
        shooter: String,
        team: TeamSide,
    },
    Penalty {
        player: String,
        team: TeamSide,
        infraction: String,
        #[serde(default = "default_penalty_minutes")]
        minutes: u8,
    },
    FaceOff {
        away_player: String,
        home_player: String,
    },
    Stoppage {
        #[serde(default)]
        reason: Option<String>,
    },
    PeriodBoundary {
        period: u8,
    },
    ClockTick,
    #[serde(other)]
    Other,
}

fn default_penalty_minutes() -> u8 {
    2
}

/// One activity within a snapshot, carrying the producer's opaque dedup id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub event_id: String,
    #[serde(flatten)]
    pub kind: ActivityKind,
}

/// Immutable record for one sample point of one game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub game_id: GameId,
    pub game_time: GameTime,
    /// Wall-clock arrival time (Unix millis), stamped by the watcher.
    pub wall_time_received: u64,
    pub activities: Vec<Activity>,
    /// Producer's cumulative score counter. A hint only; the Board derives
    /// the authoritative score from goal events.
    pub observed_score: ScorePair,
    /// Producer's cumulative shot counter. A hint only, like the score.
    pub observed_shots: ScorePair,
}

/// On-disk payload shape. `game_id` comes from the filename, not the body;
/// unknown body fields are ignored.
#[derive(Deserialize)]
struct SnapshotPayload {
    game_time: GameTime,
    #[serde(default)]
    activities: Vec<Activity>,
    observed_score: ScorePair,
    observed_shots: ScorePair,
}

impl Snapshot {
    /// Parses a snapshot file body.
    ///
    /// The filename-derived game time is cross-checked against the body;
    /// a mismatch is logged and the body wins (the body is the producer's
    /// record, the filename its index).
    pub fn parse(
        game_id: &GameId,
        filename_time: GameTime,
        body: &[u8],
        wall_time_received: u64,
    ) -> Result<Self, serde_json::Error> {
        let payload: SnapshotPayload = serde_json::from_slice(body)?;

        if payload.game_time != filename_time {
            log::warn!(
                "[Snapshot] {}: filename time {} disagrees with body time {}",
                game_id,
                filename_time,
                payload.game_time
            );
        }

        Ok(Self {
            game_id: game_id.clone(),
            game_time: payload.game_time,
            wall_time_received,
            activities: payload.activities,
            observed_score: payload.observed_score,
            observed_shots: payload.observed_shots,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(json: &str) -> Vec<u8> {
        json.as_bytes().to_vec()
    }

    #[test]
    fn parses_goal_and_shot_activities() {
        let raw = body(
            r#"{
                "game_time": {"period": 1, "minute": 5, "second": 30},
                "activities": [
                    {"event_id": "e1", "kind": "shot", "shooter": "Draisaitl", "team": "away"},
                    {"event_id": "e2", "kind": "goal", "scorer": "Draisaitl", "team": "away",
                     "assists": ["McDavid"]}
                ],
                "observed_score": {"away": 1, "home": 0},
                "observed_shots": {"away": 4, "home": 2}
            }"#,
        );

        let snapshot =
            Snapshot::parse(&GameId::from("GAME"), GameTime::new(1, 5, 30), &raw, 0).unwrap();

        assert_eq!(snapshot.activities.len(), 2);
        assert_eq!(
            snapshot.activities[1].kind,
            ActivityKind::Goal {
                scorer: "Draisaitl".into(),
                team: TeamSide::Away,
                assists: vec!["McDavid".into()],
            }
        );
        assert_eq!(snapshot.observed_score, ScorePair::new(1, 0));
    }

    #[test]
    fn unknown_activity_kind_parses_as_other() {
        let raw = body(
            r#"{
                "game_time": {"period": 2, "minute": 0, "second": 0},
                "activities": [
                    {"event_id": "e9", "kind": "zamboni_entry", "lane": 3}
                ],
                "observed_score": {"away": 0, "home": 0},
                "observed_shots": {"away": 0, "home": 0}
            }"#,
        );

        let snapshot =
            Snapshot::parse(&GameId::from("GAME"), GameTime::new(2, 0, 0), &raw, 0).unwrap();
        assert_eq!(snapshot.activities[0].kind, ActivityKind::Other);
    }

    #[test]
    fn unknown_top_level_fields_are_ignored() {
        let raw = body(
            r#"{
                "game_time": {"period": 1, "minute": 0, "second": 0},
                "activities": [],
                "observed_score": {"away": 0, "home": 0},
                "observed_shots": {"away": 0, "home": 0},
                "producer_version": "7.1",
                "venue_temperature_c": -4
            }"#,
        );

        assert!(Snapshot::parse(&GameId::from("GAME"), GameTime::new(1, 0, 0), &raw, 0).is_ok());
    }

    #[test]
    fn missing_required_field_is_an_error() {
        let raw = body(r#"{"game_time": {"period": 1, "minute": 0, "second": 0}}"#);
        assert!(Snapshot::parse(&GameId::from("GAME"), GameTime::new(1, 0, 0), &raw, 0).is_err());
    }
}
