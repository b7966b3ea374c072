//! Agent sessions and the adaptive refresh policy.
//!
//! A session is an append-only conversation log behind an [`Arc`] handle.
//! Refresh never mutates an existing session: it constructs a new one
//! seeded with the canonical preamble, the current Board projection, and
//! the narrative summary, then atomically swaps the active handle. Callers
//! holding the old handle finish their in-flight call on it undisturbed -
//! an in-flight call is never cancelled, which would break ordering.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agent::context::ContextManager;
use crate::events::{EventEmitter, SessionEvent};
use crate::game::board::UpdateReport;
use crate::stages::Stage;
use crate::utils::now_millis;

/// Recent token estimates retained per session for trend detection.
const ESTIMATE_WINDOW: usize = 4;

/// Conversation role of one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One message in a session's log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMessage {
    pub role: Role,
    pub content: String,
}

impl SessionMessage {
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Seed material for a fresh session.
#[derive(Debug, Clone)]
pub struct SessionSeed {
    /// Canonical stage system prompt.
    pub preamble: String,
    /// Authoritative state block rendered from the Board projection.
    pub board_block: String,
    /// Deterministic narrative summary.
    pub summary: String,
}

/// Conversation handle for one stage.
pub struct AgentSession {
    id: String,
    stage: Stage,
    log: RwLock<Vec<SessionMessage>>,
    estimates: Mutex<VecDeque<usize>>,
    snapshots_processed: AtomicU32,
}

impl AgentSession {
    /// Creates a session seeded with preamble, Board projection, and summary.
    #[must_use]
    pub fn seeded(stage: Stage, seed: &SessionSeed) -> Self {
        let log = vec![
            SessionMessage::new(Role::System, seed.preamble.clone()),
            SessionMessage::new(Role::System, seed.board_block.clone()),
            SessionMessage::new(Role::System, seed.summary.clone()),
        ];
        Self {
            id: Uuid::new_v4().to_string(),
            stage,
            log: RwLock::new(log),
            estimates: Mutex::new(VecDeque::with_capacity(ESTIMATE_WINDOW)),
            snapshots_processed: AtomicU32::new(0),
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Copy of the conversation log for the next collaborator call.
    #[must_use]
    pub fn log_snapshot(&self) -> Vec<SessionMessage> {
        self.log.read().clone()
    }

    /// Appends a completed user/assistant exchange and records the new
    /// token estimate for trend detection.
    pub fn record_exchange(&self, user: impl Into<String>, assistant: impl Into<String>) {
        {
            let mut log = self.log.write();
            log.push(SessionMessage::new(Role::User, user));
            log.push(SessionMessage::new(Role::Assistant, assistant));
        }
        let estimate = self.estimated_tokens();
        let mut estimates = self.estimates.lock();
        if estimates.len() == ESTIMATE_WINDOW {
            estimates.pop_front();
        }
        estimates.push_back(estimate);
    }

    /// Coarse token estimate over the whole log (bytes / 4).
    #[must_use]
    pub fn estimated_tokens(&self) -> usize {
        let bytes: usize = self.log.read().iter().map(|m| m.content.len()).sum();
        bytes / 4
    }

    /// Recent estimates, oldest first.
    #[must_use]
    pub fn recent_estimates(&self) -> Vec<usize> {
        self.estimates.lock().iter().copied().collect()
    }

    /// Marks one snapshot processed on this session.
    pub fn note_snapshot(&self) {
        self.snapshots_processed.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshots processed since this session was seeded.
    #[must_use]
    pub fn snapshots_processed(&self) -> u32 {
        self.snapshots_processed.load(Ordering::Relaxed)
    }
}

/// Refresh thresholds, from configuration.
#[derive(Debug, Clone, Copy)]
pub struct RefreshPolicy {
    pub soft_tokens: usize,
    pub every_n_snapshots: u32,
}

/// Why a session was refreshed; recorded in refresh analytics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshTrigger {
    /// Estimated tokens reached the soft threshold.
    TokenBudget,
    /// New goal, new penalty, or period boundary in the update.
    MajorEvent,
    /// Time-based fallback after N snapshots.
    SnapshotInterval,
    /// Two consecutive estimates above the soft threshold and rising.
    CriticalGrowth,
}

impl RefreshTrigger {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TokenBudget => "token_budget",
            Self::MajorEvent => "major_event",
            Self::SnapshotInterval => "snapshot_interval",
            Self::CriticalGrowth => "critical_growth",
        }
    }
}

/// Owns the active session handle per stage and applies the refresh policy.
///
/// Refreshes are invisible to callers: sequence numbers and output ordering
/// are untouched, only the conversation context resets.
pub struct SessionManager {
    sessions: RwLock<HashMap<Stage, Arc<AgentSession>>>,
    policy: RefreshPolicy,
    context: ContextManager,
    emitter: Arc<dyn EventEmitter>,
}

impl SessionManager {
    #[must_use]
    pub fn new(policy: RefreshPolicy, context: ContextManager, emitter: Arc<dyn EventEmitter>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            policy,
            context,
            emitter,
        }
    }

    /// Installs the initial session for a stage.
    pub fn install(&self, stage: Stage, seed: &SessionSeed) {
        let session = Arc::new(AgentSession::seeded(stage, seed));
        log::info!(
            "[Session] {} session {} installed",
            stage.name(),
            session.id()
        );
        self.sessions.write().insert(stage, session);
    }

    /// Current session handle for a stage.
    ///
    /// # Panics
    ///
    /// Panics if the stage was never installed; the pipeline installs all
    /// managed stages at startup.
    #[must_use]
    pub fn active(&self, stage: Stage) -> Arc<AgentSession> {
        Arc::clone(
            self.sessions
                .read()
                .get(&stage)
                .expect("stage session not installed"),
        )
    }

    /// Applies the refresh policy after a Board update.
    ///
    /// Returns the trigger if the stage's session was replaced. The old
    /// session handle stays alive for any in-flight call and is discarded
    /// when its last holder drops it.
    pub fn maybe_refresh(
        &self,
        stage: Stage,
        report: &UpdateReport,
        seed: &SessionSeed,
    ) -> Option<RefreshTrigger> {
        let current = self.active(stage);

        let trigger = self
            .context
            .recommend_refresh(&current, report, &self.policy)?;

        let fresh = Arc::new(AgentSession::seeded(stage, seed));
        let fresh_id = fresh.id().to_string();
        self.sessions.write().insert(stage, fresh);

        log::info!(
            "[Session] {} refreshed ({}): {} -> {}",
            stage.name(),
            trigger.as_str(),
            current.id(),
            fresh_id
        );
        self.emitter.emit_session(SessionEvent::Refreshed {
            stage: stage.name().to_string(),
            trigger: trigger.as_str().to_string(),
            session_id: fresh_id,
            timestamp: now_millis(),
        });

        Some(trigger)
    }

    /// Marks one snapshot processed on every managed session.
    pub fn note_snapshot(&self) {
        for session in self.sessions.read().values() {
            session.note_snapshot();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NoopEventEmitter;
    use crate::game::time::GameTime;

    fn seed() -> SessionSeed {
        SessionSeed {
            preamble: "You are the analyze stage.".into(),
            board_block: "Score 0-0.".into(),
            summary: "EDM 0 - 0 FLA, pregame.".into(),
        }
    }

    fn empty_report() -> UpdateReport {
        UpdateReport {
            game_time: GameTime::new(1, 0, 0),
            new_goals: vec![],
            new_penalties: vec![],
            score_delta: 0,
            shots_delta: 0,
            period_crossed: false,
            anomalies: vec![],
            applied_events: 0,
        }
    }

    fn manager(soft_tokens: usize, every_n: u32) -> SessionManager {
        SessionManager::new(
            RefreshPolicy {
                soft_tokens,
                every_n_snapshots: every_n,
            },
            ContextManager::new(soft_tokens, soft_tokens * 2),
            Arc::new(NoopEventEmitter),
        )
    }

    #[test]
    fn quiet_updates_do_not_refresh() {
        let mgr = manager(30_000, 15);
        mgr.install(Stage::Analyze, &seed());
        let before = mgr.active(Stage::Analyze).id().to_string();

        assert_eq!(mgr.maybe_refresh(Stage::Analyze, &empty_report(), &seed()), None);
        assert_eq!(mgr.active(Stage::Analyze).id(), before);
    }

    #[test]
    fn major_event_swaps_the_session() {
        let mgr = manager(30_000, 15);
        mgr.install(Stage::Narrate, &seed());
        let before = mgr.active(Stage::Narrate).id().to_string();

        let report = UpdateReport {
            period_crossed: true,
            ..empty_report()
        };
        assert_eq!(
            mgr.maybe_refresh(Stage::Narrate, &report, &seed()),
            Some(RefreshTrigger::MajorEvent)
        );
        assert_ne!(mgr.active(Stage::Narrate).id(), before);
    }

    #[test]
    fn snapshot_interval_is_the_fallback_trigger() {
        let mgr = manager(30_000, 3);
        mgr.install(Stage::Analyze, &seed());

        for _ in 0..3 {
            assert_eq!(mgr.maybe_refresh(Stage::Analyze, &empty_report(), &seed()), None);
            mgr.note_snapshot();
        }
        assert_eq!(
            mgr.maybe_refresh(Stage::Analyze, &empty_report(), &seed()),
            Some(RefreshTrigger::SnapshotInterval)
        );
        // Fresh session starts its count over.
        assert_eq!(mgr.active(Stage::Analyze).snapshots_processed(), 0);
    }

    #[test]
    fn token_budget_triggers_refresh() {
        let mgr = manager(10, 100);
        mgr.install(Stage::Analyze, &seed());

        let session = mgr.active(Stage::Analyze);
        session.record_exchange("u".repeat(200), "a".repeat(200));

        assert_eq!(
            mgr.maybe_refresh(Stage::Analyze, &empty_report(), &seed()),
            Some(RefreshTrigger::TokenBudget)
        );
    }

    #[test]
    fn in_flight_holder_keeps_old_session_alive() {
        let mgr = manager(30_000, 15);
        mgr.install(Stage::Narrate, &seed());
        let in_flight = mgr.active(Stage::Narrate);

        let report = UpdateReport {
            period_crossed: true,
            ..empty_report()
        };
        mgr.maybe_refresh(Stage::Narrate, &report, &seed());

        // The old handle still reads its own log after the swap.
        assert_eq!(in_flight.log_snapshot().len(), 3);
        assert_ne!(mgr.active(Stage::Narrate).id(), in_flight.id());
    }
}
