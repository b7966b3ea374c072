//! The Board: authoritative state of one game, and its deterministic reducer.
//!
//! The Board is the single source of truth for all downstream narration.
//! It is mutated only by [`Board::reduce`] under the pipeline's
//! single-writer discipline; everything else reads an immutable
//! [`BoardProjection`] taken by value.
//!
//! Counters are derived from activity events, never adopted from the
//! producer's cumulative `observed_*` fields - those are hints used only
//! for anomaly detection.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::game::roster::StaticContext;
use crate::game::snapshot::{Activity, ActivityKind, GameId, ScorePair, Snapshot, TeamSide};
use crate::game::summary;
use crate::game::time::GameTime;

/// A goal credited on the Board.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalRecord {
    pub scorer: String,
    pub team: TeamSide,
    pub assists: Vec<String>,
    pub game_time: GameTime,
}

/// An active or expired penalty interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PenaltyRecord {
    pub player: String,
    pub team: TeamSide,
    pub infraction: String,
    pub minutes: u8,
    pub start: GameTime,
}

impl PenaltyRecord {
    /// Whether the penalty is still being served at `now`.
    #[must_use]
    pub fn active_at(&self, now: GameTime) -> bool {
        let expiry = self.start.elapsed_seconds() + self.minutes as u32 * 60;
        now.elapsed_seconds() < expiry
    }
}

/// One goalie and the goals charged against them while on ice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalieStatus {
    pub id: String,
    pub goals_allowed: u32,
}

/// Both goalies, keyed by the side they defend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoaliePair {
    pub away: GoalieStatus,
    pub home: GoalieStatus,
}

impl GoaliePair {
    /// The goalie defending `side`'s net.
    pub fn defending_mut(&mut self, side: TeamSide) -> &mut GoalieStatus {
        match side {
            TeamSide::Away => &mut self.away,
            TeamSide::Home => &mut self.home,
        }
    }

    #[must_use]
    pub fn defending(&self, side: TeamSide) -> &GoalieStatus {
        match side {
            TeamSide::Away => &self.away,
            TeamSide::Home => &self.home,
        }
    }
}

/// An observation the reducer refused to apply verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Anomaly {
    /// Producer's cumulative counter went backwards; the decrease was ignored.
    CounterDecrement {
        counter: String,
        observed: ScorePair,
        authoritative: ScorePair,
    },
    /// An event named a player outside both rosters.
    UnknownPlayer { event_id: String, player: String },
    /// An activity kind this pipeline does not model.
    UnknownActivity { event_id: String },
}

/// Result of reducing one snapshot into the Board.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateReport {
    pub game_time: GameTime,
    pub new_goals: Vec<GoalRecord>,
    pub new_penalties: Vec<PenaltyRecord>,
    pub score_delta: u32,
    pub shots_delta: u32,
    pub period_crossed: bool,
    pub anomalies: Vec<Anomaly>,
    /// Events applied this reduce (excludes duplicates).
    pub applied_events: usize,
}

impl UpdateReport {
    /// Whether this update contains a major event for session-refresh policy:
    /// a new goal, a new penalty, or a period boundary.
    #[must_use]
    pub fn is_major(&self) -> bool {
        !self.new_goals.is_empty() || !self.new_penalties.is_empty() || self.period_crossed
    }
}

/// Errors from [`Board::reduce`].
#[derive(Debug, Error)]
pub enum ReduceError {
    /// Snapshot is not strictly after the last reduced one. Expected under
    /// at-least-once delivery; callers drop the snapshot without rollback.
    #[error("snapshot {game_time} is not after last reduced {last}")]
    OutOfOrder { game_time: GameTime, last: GameTime },

    /// Snapshot contents are structurally unusable. Treated as poison.
    #[error("snapshot is corrupt: {0}")]
    Corrupt(String),
}

/// Read-only view of the Board handed to stages and subscribers by value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardProjection {
    pub game_id: GameId,
    pub away_team: String,
    pub home_team: String,
    pub score: ScorePair,
    pub shots: ScorePair,
    pub period: u8,
    pub time_remaining: String,
    pub goals: Vec<GoalRecord>,
    pub active_penalties: Vec<PenaltyRecord>,
    pub goalies: GoaliePair,
    pub narrative_summary: String,
    pub last_game_time: Option<GameTime>,
}

/// Authoritative mutable state of one game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Board {
    pub game_id: GameId,
    pub score: ScorePair,
    pub shots: ScorePair,
    pub period: u8,
    pub goals: Vec<GoalRecord>,
    pub penalties: Vec<PenaltyRecord>,
    pub goalies: GoaliePair,
    pub processed_event_ids: HashSet<String>,
    pub narrative_summary: String,
    pub last_game_time: Option<GameTime>,
}

impl Board {
    /// Creates a fresh Board from the game's static context.
    #[must_use]
    pub fn load(ctx: &StaticContext) -> Self {
        let mut board = Self {
            game_id: ctx.game_id.clone(),
            score: ScorePair::default(),
            shots: ScorePair::default(),
            period: 1,
            goals: Vec::new(),
            penalties: Vec::new(),
            goalies: GoaliePair {
                away: GoalieStatus {
                    id: ctx.goalie_away.clone(),
                    goals_allowed: 0,
                },
                home: GoalieStatus {
                    id: ctx.goalie_home.clone(),
                    goals_allowed: 0,
                },
            },
            processed_event_ids: HashSet::new(),
            narrative_summary: String::new(),
            last_game_time: None,
        };
        board.narrative_summary = summary::narrative_summary(&board, ctx);
        board
    }

    /// Applies one snapshot to the Board.
    ///
    /// Deterministic: the same board, snapshot, and context always produce
    /// the same result. Events whose ids were already processed are skipped
    /// (idempotent under re-delivery); a snapshot at or before
    /// `last_game_time` is rejected without state change.
    pub fn reduce(
        &mut self,
        snapshot: &Snapshot,
        ctx: &StaticContext,
    ) -> Result<UpdateReport, ReduceError> {
        if snapshot.game_id != self.game_id {
            return Err(ReduceError::Corrupt(format!(
                "snapshot for game {} applied to board {}",
                snapshot.game_id, self.game_id
            )));
        }
        if let Some(last) = self.last_game_time {
            if snapshot.game_time <= last {
                return Err(ReduceError::OutOfOrder {
                    game_time: snapshot.game_time,
                    last,
                });
            }
        }

        let prior_score = self.score;
        let prior_shots = self.shots;
        let prior_period = self.period;

        let mut report = UpdateReport {
            game_time: snapshot.game_time,
            new_goals: Vec::new(),
            new_penalties: Vec::new(),
            score_delta: 0,
            shots_delta: 0,
            period_crossed: false,
            anomalies: Vec::new(),
            applied_events: 0,
        };

        // Goals apply before penalties within one snapshot, so a delayed-call
        // penalty cannot mask the goal it trailed. Everything else keeps the
        // producer's order.
        let mut ordered: Vec<&Activity> = snapshot.activities.iter().collect();
        ordered.sort_by_key(|a| !matches!(a.kind, ActivityKind::Goal { .. }));

        for activity in ordered {
            if self.processed_event_ids.contains(&activity.event_id) {
                continue;
            }
            self.apply_activity(activity, snapshot.game_time, ctx, &mut report);
            self.processed_event_ids.insert(activity.event_id.clone());
            report.applied_events += 1;
        }

        // The period advances from activity evidence or the clock itself.
        if snapshot.game_time.period > self.period {
            self.period = snapshot.game_time.period;
        }
        report.period_crossed = self.period > prior_period;

        self.check_observed_counters(snapshot, &mut report);

        debug_assert!(self.score.away >= prior_score.away && self.score.home >= prior_score.home);
        debug_assert!(self.shots.away >= prior_shots.away && self.shots.home >= prior_shots.home);

        report.score_delta = self.score.total() - prior_score.total();
        report.shots_delta = self.shots.total() - prior_shots.total();

        self.last_game_time = Some(snapshot.game_time);
        self.narrative_summary = summary::narrative_summary(self, ctx);

        for anomaly in &report.anomalies {
            log::warn!("[Board] {} anomaly: {:?}", self.game_id, anomaly);
        }

        Ok(report)
    }

    fn apply_activity(
        &mut self,
        activity: &Activity,
        game_time: GameTime,
        ctx: &StaticContext,
        report: &mut UpdateReport,
    ) {
        match &activity.kind {
            ActivityKind::Goal {
                scorer,
                team,
                assists,
            } => {
                if !ctx.knows_player(scorer) {
                    report.anomalies.push(Anomaly::UnknownPlayer {
                        event_id: activity.event_id.clone(),
                        player: scorer.clone(),
                    });
                    return;
                }
                *self.score.side_mut(*team) += 1;
                self.goalies.defending_mut(team.opponent()).goals_allowed += 1;
                let record = GoalRecord {
                    scorer: scorer.clone(),
                    team: *team,
                    assists: assists.clone(),
                    game_time,
                };
                self.goals.push(record.clone());
                report.new_goals.push(record);
            }
            ActivityKind::Shot { shooter, team } => {
                if !ctx.knows_player(shooter) {
                    report.anomalies.push(Anomaly::UnknownPlayer {
                        event_id: activity.event_id.clone(),
                        player: shooter.clone(),
                    });
                    return;
                }
                *self.shots.side_mut(*team) += 1;
            }
            ActivityKind::Penalty {
                player,
                team,
                infraction,
                minutes,
            } => {
                if !ctx.knows_player(player) {
                    report.anomalies.push(Anomaly::UnknownPlayer {
                        event_id: activity.event_id.clone(),
                        player: player.clone(),
                    });
                    return;
                }
                let record = PenaltyRecord {
                    player: player.clone(),
                    team: *team,
                    infraction: infraction.clone(),
                    minutes: *minutes,
                    start: game_time,
                };
                self.penalties.push(record.clone());
                report.new_penalties.push(record);
            }
            ActivityKind::PeriodBoundary { period } => {
                if *period > self.period {
                    self.period = *period;
                }
            }
            // Face-offs, stoppages and clock ticks move the clock only; the
            // clock itself comes from `last_game_time`.
            ActivityKind::FaceOff { .. } | ActivityKind::Stoppage { .. } | ActivityKind::ClockTick => {}
            ActivityKind::Other => {
                report.anomalies.push(Anomaly::UnknownActivity {
                    event_id: activity.event_id.clone(),
                });
            }
        }
    }

    /// Cross-checks the producer's cumulative counters against the
    /// authoritative ones. Never adopts them; a counter that would move a
    /// Board value backwards is recorded as an anomaly and ignored.
    fn check_observed_counters(&self, snapshot: &Snapshot, report: &mut UpdateReport) {
        if snapshot.observed_score.away < self.score.away
            || snapshot.observed_score.home < self.score.home
        {
            report.anomalies.push(Anomaly::CounterDecrement {
                counter: "score".into(),
                observed: snapshot.observed_score,
                authoritative: self.score,
            });
        }
        if snapshot.observed_shots.away < self.shots.away
            || snapshot.observed_shots.home < self.shots.home
        {
            report.anomalies.push(Anomaly::CounterDecrement {
                counter: "shots".into(),
                observed: snapshot.observed_shots,
                authoritative: self.shots,
            });
        }
    }

    /// Pure read-only projection for stages and subscribers.
    #[must_use]
    pub fn project(&self, ctx: &StaticContext) -> BoardProjection {
        let now = self.last_game_time.unwrap_or_default();
        BoardProjection {
            game_id: self.game_id.clone(),
            away_team: ctx.away_team.clone(),
            home_team: ctx.home_team.clone(),
            score: self.score,
            shots: self.shots,
            period: self.period,
            time_remaining: now.remaining_in_period(),
            goals: self.goals.clone(),
            active_penalties: self
                .penalties
                .iter()
                .filter(|p| p.active_at(now))
                .cloned()
                .collect(),
            goalies: self.goalies.clone(),
            narrative_summary: self.narrative_summary.clone(),
            last_game_time: self.last_game_time,
        }
    }

    /// Serializes the Board for persistence.
    pub fn snapshot_state(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec_pretty(self)
    }

    /// Restores a Board from persisted bytes.
    pub fn restore(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::roster::fixtures::edm_at_fla;
    use crate::game::snapshot::ActivityKind;

    fn activity(event_id: &str, kind: ActivityKind) -> Activity {
        Activity {
            event_id: event_id.into(),
            kind,
        }
    }

    fn snapshot(time: GameTime, activities: Vec<Activity>, score: ScorePair) -> Snapshot {
        Snapshot {
            game_id: GameId::from("GAME"),
            game_time: time,
            wall_time_received: 0,
            activities,
            observed_score: score,
            observed_shots: ScorePair::default(),
        }
    }

    fn goal(event_id: &str, scorer: &str, team: TeamSide) -> Activity {
        activity(
            event_id,
            ActivityKind::Goal {
                scorer: scorer.into(),
                team,
                assists: vec![],
            },
        )
    }

    #[test]
    fn goal_updates_score_and_opposing_goalie() {
        let ctx = edm_at_fla();
        let mut board = Board::load(&ctx);

        let report = board
            .reduce(
                &snapshot(
                    GameTime::new(1, 5, 30),
                    vec![
                        activity(
                            "s1",
                            ActivityKind::Shot {
                                shooter: "Draisaitl".into(),
                                team: TeamSide::Away,
                            },
                        ),
                        goal("g1", "Draisaitl", TeamSide::Away),
                    ],
                    ScorePair::new(1, 0),
                ),
                &ctx,
            )
            .unwrap();

        assert_eq!(board.score, ScorePair::new(1, 0));
        assert_eq!(board.shots, ScorePair::new(1, 0));
        assert_eq!(board.goalies.home.goals_allowed, 1);
        assert_eq!(board.goalies.away.goals_allowed, 0);
        assert_eq!(report.new_goals.len(), 1);
        assert_eq!(report.score_delta, 1);
    }

    #[test]
    fn duplicate_event_id_scores_once() {
        let ctx = edm_at_fla();
        let mut board = Board::load(&ctx);

        board
            .reduce(
                &snapshot(
                    GameTime::new(1, 5, 30),
                    vec![goal("g1", "Draisaitl", TeamSide::Away)],
                    ScorePair::new(1, 0),
                ),
                &ctx,
            )
            .unwrap();

        // Same event id re-delivered in the next snapshot.
        let report = board
            .reduce(
                &snapshot(
                    GameTime::new(1, 5, 35),
                    vec![goal("g1", "Draisaitl", TeamSide::Away)],
                    ScorePair::new(1, 0),
                ),
                &ctx,
            )
            .unwrap();

        assert_eq!(board.score, ScorePair::new(1, 0));
        assert_eq!(board.goalies.home.goals_allowed, 1);
        assert!(report.new_goals.is_empty());
        assert_eq!(report.applied_events, 0);
    }

    #[test]
    fn all_seen_events_reduce_is_a_counter_noop() {
        let ctx = edm_at_fla();
        let mut board = Board::load(&ctx);

        let first = snapshot(
            GameTime::new(1, 5, 30),
            vec![goal("g1", "Draisaitl", TeamSide::Away)],
            ScorePair::new(1, 0),
        );
        board.reduce(&first, &ctx).unwrap();
        let after_first = board.clone();

        let replay = snapshot(
            GameTime::new(1, 5, 35),
            vec![goal("g1", "Draisaitl", TeamSide::Away)],
            ScorePair::new(1, 0),
        );
        board.reduce(&replay, &ctx).unwrap();

        assert_eq!(board.score, after_first.score);
        assert_eq!(board.shots, after_first.shots);
        assert_eq!(board.goals, after_first.goals);
        assert_eq!(board.goalies, after_first.goalies);
    }

    #[test]
    fn out_of_order_snapshot_is_rejected_without_change() {
        let ctx = edm_at_fla();
        let mut board = Board::load(&ctx);

        board
            .reduce(
                &snapshot(GameTime::new(1, 5, 30), vec![], ScorePair::default()),
                &ctx,
            )
            .unwrap();
        let saved = board.clone();

        let stale = snapshot(
            GameTime::new(1, 5, 30),
            vec![goal("g9", "Barkov", TeamSide::Home)],
            ScorePair::new(0, 1),
        );
        assert!(matches!(
            board.reduce(&stale, &ctx),
            Err(ReduceError::OutOfOrder { .. })
        ));
        assert_eq!(board, saved);
    }

    #[test]
    fn observed_score_decrement_is_anomaly_not_adopted() {
        let ctx = edm_at_fla();
        let mut board = Board::load(&ctx);

        board
            .reduce(
                &snapshot(
                    GameTime::new(1, 5, 30),
                    vec![goal("g1", "Draisaitl", TeamSide::Away)],
                    ScorePair::new(1, 0),
                ),
                &ctx,
            )
            .unwrap();

        // Producer regresses to 0-0 after the goal.
        let report = board
            .reduce(
                &snapshot(GameTime::new(1, 5, 35), vec![], ScorePair::new(0, 0)),
                &ctx,
            )
            .unwrap();

        assert_eq!(board.score, ScorePair::new(1, 0));
        assert!(report
            .anomalies
            .iter()
            .any(|a| matches!(a, Anomaly::CounterDecrement { counter, .. } if counter == "score")));
    }

    #[test]
    fn unknown_player_is_anomaly_and_not_applied() {
        let ctx = edm_at_fla();
        let mut board = Board::load(&ctx);

        let report = board
            .reduce(
                &snapshot(
                    GameTime::new(1, 2, 0),
                    vec![goal("g1", "Gretzky", TeamSide::Away)],
                    ScorePair::new(1, 0),
                ),
                &ctx,
            )
            .unwrap();

        assert_eq!(board.score, ScorePair::default());
        assert!(report
            .anomalies
            .iter()
            .any(|a| matches!(a, Anomaly::UnknownPlayer { player, .. } if player == "Gretzky")));
    }

    #[test]
    fn goal_applies_before_penalty_in_same_snapshot() {
        let ctx = edm_at_fla();
        let mut board = Board::load(&ctx);

        let report = board
            .reduce(
                &snapshot(
                    GameTime::new(2, 10, 0),
                    vec![
                        activity(
                            "p1",
                            ActivityKind::Penalty {
                                player: "McDavid".into(),
                                team: TeamSide::Away,
                                infraction: "tripping".into(),
                                minutes: 2,
                            },
                        ),
                        goal("g1", "Draisaitl", TeamSide::Away),
                    ],
                    ScorePair::new(1, 0),
                ),
                &ctx,
            )
            .unwrap();

        assert_eq!(report.new_goals.len(), 1);
        assert_eq!(report.new_penalties.len(), 1);
        assert_eq!(board.score, ScorePair::new(1, 0));
    }

    #[test]
    fn period_transition_carries_counters_and_resets_clock() {
        let ctx = edm_at_fla();
        let mut board = Board::load(&ctx);

        board
            .reduce(
                &snapshot(
                    GameTime::new(1, 19, 55),
                    vec![goal("g1", "Barkov", TeamSide::Home)],
                    ScorePair::new(0, 1),
                ),
                &ctx,
            )
            .unwrap();

        let report = board
            .reduce(
                &snapshot(GameTime::new(2, 0, 5), vec![], ScorePair::new(0, 1)),
                &ctx,
            )
            .unwrap();

        assert!(report.period_crossed);
        assert_eq!(board.period, 2);
        assert_eq!(board.score, ScorePair::new(0, 1));
        assert_eq!(board.project(&ctx).time_remaining, "19:55");
    }

    #[test]
    fn overtime_is_a_period_past_regulation() {
        let ctx = edm_at_fla();
        let mut board = Board::load(&ctx);

        board
            .reduce(
                &snapshot(GameTime::new(4, 1, 12), vec![], ScorePair::default()),
                &ctx,
            )
            .unwrap();
        assert_eq!(board.period, 4);
    }

    #[test]
    fn goals_allowed_matches_goals_against_team() {
        let ctx = edm_at_fla();
        let mut board = Board::load(&ctx);

        board
            .reduce(
                &snapshot(
                    GameTime::new(1, 5, 0),
                    vec![goal("g1", "Draisaitl", TeamSide::Away)],
                    ScorePair::new(1, 0),
                ),
                &ctx,
            )
            .unwrap();
        board
            .reduce(
                &snapshot(
                    GameTime::new(2, 3, 0),
                    vec![
                        goal("g2", "Barkov", TeamSide::Home),
                        goal("g3", "McDavid", TeamSide::Away),
                    ],
                    ScorePair::new(2, 1),
                ),
                &ctx,
            )
            .unwrap();

        let against_home = board
            .goals
            .iter()
            .filter(|g| g.team == TeamSide::Away)
            .count() as u32;
        let against_away = board
            .goals
            .iter()
            .filter(|g| g.team == TeamSide::Home)
            .count() as u32;

        assert_eq!(board.goalies.home.goals_allowed, against_home);
        assert_eq!(board.goalies.away.goals_allowed, against_away);
    }

    #[test]
    fn board_round_trips_through_snapshot_state() {
        let ctx = edm_at_fla();
        let mut board = Board::load(&ctx);
        board
            .reduce(
                &snapshot(
                    GameTime::new(1, 5, 30),
                    vec![goal("g1", "Draisaitl", TeamSide::Away)],
                    ScorePair::new(1, 0),
                ),
                &ctx,
            )
            .unwrap();

        let bytes = board.snapshot_state().unwrap();
        let restored = Board::restore(&bytes).unwrap();
        assert_eq!(board, restored);
    }

    #[test]
    fn projection_filters_expired_penalties() {
        let ctx = edm_at_fla();
        let mut board = Board::load(&ctx);

        board
            .reduce(
                &snapshot(
                    GameTime::new(1, 2, 0),
                    vec![activity(
                        "p1",
                        ActivityKind::Penalty {
                            player: "McDavid".into(),
                            team: TeamSide::Away,
                            infraction: "hooking".into(),
                            minutes: 2,
                        },
                    )],
                    ScorePair::default(),
                ),
                &ctx,
            )
            .unwrap();

        assert_eq!(board.project(&ctx).active_penalties.len(), 1);

        board
            .reduce(
                &snapshot(GameTime::new(1, 5, 0), vec![], ScorePair::default()),
                &ctx,
            )
            .unwrap();
        assert!(board.project(&ctx).active_penalties.is_empty());
    }
}
