//! Prompt assembly and context accounting for the stage agents.
//!
//! Every stage call carries the same five-part layout: fixed stage
//! preamble, the authoritative state block rendered from the Board
//! projection, the narrative summary, the current snapshot's activities,
//! and the stage instructions. Token accounting is deliberately coarse
//! (bytes / 4) - it steers the refresh policy, nothing else.

use crate::agent::session::{AgentSession, RefreshPolicy, RefreshTrigger, SessionSeed};
use crate::game::board::{BoardProjection, UpdateReport};
use crate::game::roster::RosterLock;
use crate::game::snapshot::{ActivityKind, Snapshot};
use crate::stages::Stage;

/// Context growth classification over recent token estimates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrowthTrend {
    Stable,
    Rising,
    /// Two consecutive estimates above the soft threshold, and rising.
    Critical,
}

/// Assembled prompt material for one collaborator call.
#[derive(Debug, Clone)]
pub struct PromptPayload {
    pub system_prompt: String,
    pub user_message: String,
    /// Estimate for the call including the session log (bytes / 4).
    pub estimated_tokens: usize,
}

/// Assembles prompts and tracks context size for stage sessions.
#[derive(Debug, Clone, Copy)]
pub struct ContextManager {
    soft_tokens: usize,
    hard_tokens: usize,
}

impl ContextManager {
    #[must_use]
    pub fn new(soft_tokens: usize, hard_tokens: usize) -> Self {
        Self {
            soft_tokens,
            hard_tokens,
        }
    }

    #[must_use]
    pub fn soft_tokens(&self) -> usize {
        self.soft_tokens
    }

    #[must_use]
    pub fn hard_tokens(&self) -> usize {
        self.hard_tokens
    }

    /// Coarse token estimate for a session's log.
    #[must_use]
    pub fn estimate_tokens(&self, session: &AgentSession) -> usize {
        session.estimated_tokens()
    }

    /// Classifies the session's recent context growth.
    #[must_use]
    pub fn growth_trend(&self, session: &AgentSession) -> GrowthTrend {
        let estimates = session.recent_estimates();
        let Some((&last, rest)) = estimates.split_last() else {
            return GrowthTrend::Stable;
        };
        let Some(&previous) = rest.last() else {
            return GrowthTrend::Stable;
        };

        if last > previous {
            if last >= self.soft_tokens && previous >= self.soft_tokens {
                GrowthTrend::Critical
            } else {
                GrowthTrend::Rising
            }
        } else {
            GrowthTrend::Stable
        }
    }

    /// Applies the adaptive refresh policy: refresh when ANY of the four
    /// conditions holds. Returns the first matching trigger.
    #[must_use]
    pub fn recommend_refresh(
        &self,
        session: &AgentSession,
        board_update: &UpdateReport,
        policy: &RefreshPolicy,
    ) -> Option<RefreshTrigger> {
        if self.estimate_tokens(session) >= policy.soft_tokens {
            return Some(RefreshTrigger::TokenBudget);
        }
        if board_update.is_major() {
            return Some(RefreshTrigger::MajorEvent);
        }
        if session.snapshots_processed() >= policy.every_n_snapshots {
            return Some(RefreshTrigger::SnapshotInterval);
        }
        if self.growth_trend(session) == GrowthTrend::Critical {
            return Some(RefreshTrigger::CriticalGrowth);
        }
        None
    }

    /// Assembles the prompt payload for one stage call.
    #[must_use]
    pub fn assemble(
        &self,
        stage: Stage,
        session: &AgentSession,
        board: &BoardProjection,
        snapshot: &Snapshot,
        lock: &RosterLock,
    ) -> PromptPayload {
        let system_prompt = stage.preamble().to_string();

        let mut user_message = String::with_capacity(1024);
        user_message.push_str(&authoritative_block(board, lock));
        user_message.push('\n');
        user_message.push_str("GAME SO FAR: ");
        user_message.push_str(&board.narrative_summary);
        user_message.push('\n');
        user_message.push_str(&activities_block(snapshot));
        user_message.push('\n');
        user_message.push_str(stage.instructions());

        let log_bytes: usize = session
            .log_snapshot()
            .iter()
            .map(|m| m.content.len())
            .sum();
        let estimated_tokens = (log_bytes + system_prompt.len() + user_message.len()) / 4;

        PromptPayload {
            system_prompt,
            user_message,
            estimated_tokens,
        }
    }

    /// Seed material for a fresh session of a stage.
    #[must_use]
    pub fn seed(&self, stage: Stage, board: &BoardProjection, lock: &RosterLock) -> SessionSeed {
        SessionSeed {
            preamble: stage.preamble().to_string(),
            board_block: authoritative_block(board, lock),
            summary: board.narrative_summary.clone(),
        }
    }
}

/// Renders the Board projection as the authoritative state block.
///
/// Downstream narration must not contradict anything in this block.
fn authoritative_block(board: &BoardProjection, lock: &RosterLock) -> String {
    let mut block = String::with_capacity(512);
    block.push_str("AUTHORITATIVE STATE (never contradict):\n");
    block.push_str(&format!(
        "Score: {} {} - {} {}\n",
        board.away_team, board.score.away, board.score.home, board.home_team
    ));
    block.push_str(&format!(
        "Shots: {} {} - {} {}\n",
        board.away_team, board.shots.away, board.shots.home, board.home_team
    ));
    block.push_str(&format!(
        "Period {} with {} remaining\n",
        board.period, board.time_remaining
    ));

    if board.active_penalties.is_empty() {
        block.push_str("No active penalties\n");
    } else {
        block.push_str("Active penalties: ");
        let items: Vec<String> = board
            .active_penalties
            .iter()
            .map(|p| format!("{} ({})", p.player, p.infraction))
            .collect();
        block.push_str(&items.join("; "));
        block.push('\n');
    }

    block.push_str(&format!(
        "Goalies: {} ({} allowed) vs {} ({} allowed)\n",
        board.goalies.away.id,
        board.goalies.away.goals_allowed,
        board.goalies.home.id,
        board.goalies.home.goals_allowed
    ));

    block.push_str("Players you may name: ");
    block.push_str(&lock.display_names().join(", "));
    block.push('\n');

    block
}

/// Renders the snapshot's activities as a structured list.
fn activities_block(snapshot: &Snapshot) -> String {
    let mut block = format!("NEW AT {}:\n", snapshot.game_time);
    if snapshot.activities.is_empty() {
        block.push_str("- (no events, clock running)\n");
        return block;
    }
    for activity in &snapshot.activities {
        let line = match &activity.kind {
            ActivityKind::Goal {
                scorer, assists, ..
            } => {
                if assists.is_empty() {
                    format!("- GOAL by {}", scorer)
                } else {
                    format!("- GOAL by {} (assists: {})", scorer, assists.join(", "))
                }
            }
            ActivityKind::Shot { shooter, .. } => format!("- shot by {}", shooter),
            ActivityKind::Penalty {
                player, infraction, minutes, ..
            } => format!("- penalty: {} for {} ({} min)", player, infraction, minutes),
            ActivityKind::FaceOff {
                away_player,
                home_player,
            } => format!("- face-off: {} vs {}", away_player, home_player),
            ActivityKind::Stoppage { reason } => match reason {
                Some(r) => format!("- stoppage ({})", r),
                None => "- stoppage".to_string(),
            },
            ActivityKind::PeriodBoundary { period } => {
                format!("- period {} begins", period)
            }
            ActivityKind::ClockTick => "- clock tick".to_string(),
            ActivityKind::Other => continue,
        };
        block.push_str(&line);
        block.push('\n');
    }
    block
}
