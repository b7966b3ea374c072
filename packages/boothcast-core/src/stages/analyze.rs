//! Stage 1 - Analyze: structured read of the newest events.
//!
//! Output is a well-typed structure; free-form text is rejected. A
//! malformed reply gets one repair retry, then the stage substitutes a
//! deterministic analysis derived from the Board update so the pipeline
//! always progresses.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::agent::context::ContextManager;
use crate::agent::session::AgentSession;
use crate::agent::LlmClient;
use crate::events::{EventEmitter, PipelineEvent};
use crate::game::board::{BoardProjection, UpdateReport};
use crate::game::roster::RosterLock;
use crate::game::snapshot::Snapshot;
use crate::retry::with_retry;
use crate::stages::{extract_json, Stage};
use crate::utils::now_millis;

/// Structured analysis of one snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub talking_points: Vec<String>,
    /// How much is happening right now, 0.0 (dead clock) to 1.0 (bedlam).
    pub momentum: f32,
    #[serde(default)]
    pub high_intensity_events: Vec<String>,
}

impl Analysis {
    fn sanitized(mut self) -> Self {
        self.momentum = self.momentum.clamp(0.0, 1.0);
        self
    }
}

/// Runs the Analyze stage against the LLM collaborator.
pub struct AnalyzeStage {
    llm: Arc<dyn LlmClient>,
    context: ContextManager,
    timeout: Duration,
    emitter: Arc<dyn EventEmitter>,
}

impl AnalyzeStage {
    #[must_use]
    pub fn new(
        llm: Arc<dyn LlmClient>,
        context: ContextManager,
        timeout: Duration,
        emitter: Arc<dyn EventEmitter>,
    ) -> Self {
        Self {
            llm,
            context,
            timeout,
            emitter,
        }
    }

    /// Produces the analysis for one snapshot.
    ///
    /// Never fails: collaborator exhaustion and persistent malformed output
    /// both land in the deterministic degraded analysis.
    pub async fn run(
        &self,
        session: &AgentSession,
        board: &BoardProjection,
        snapshot: &Snapshot,
        report: &UpdateReport,
        lock: &RosterLock,
    ) -> Analysis {
        let payload = self
            .context
            .assemble(Stage::Analyze, session, board, snapshot, lock);
        let log = session.log_snapshot();

        let first = with_retry("analyze", self.timeout, || {
            self.llm
                .complete(&payload.system_prompt, &log, &payload.user_message)
        })
        .await;

        let reply = match first {
            Ok(text) => text,
            Err(e) => {
                self.degrade(snapshot, &format!("collaborator failed: {}", e));
                return fallback_analysis(report, board);
            }
        };

        if let Some(analysis) = parse_analysis(&reply) {
            session.record_exchange(payload.user_message, reply);
            return analysis;
        }

        // One repair retry with an explicit schema reminder.
        let repair_message = format!(
            "{}\nYour previous reply was not the required JSON object. Reply with ONLY \
             {{\"talking_points\": [...], \"momentum\": 0.0-1.0, \"high_intensity_events\": [...]}}.",
            payload.user_message
        );
        let repaired = with_retry("analyze-repair", self.timeout, || {
            self.llm
                .complete(&payload.system_prompt, &log, &repair_message)
        })
        .await;

        match repaired {
            Ok(text) => match parse_analysis(&text) {
                Some(analysis) => {
                    session.record_exchange(repair_message, text);
                    analysis
                }
                None => {
                    self.degrade(snapshot, "malformed analysis after repair retry");
                    fallback_analysis(report, board)
                }
            },
            Err(e) => {
                self.degrade(snapshot, &format!("repair retry failed: {}", e));
                fallback_analysis(report, board)
            }
        }
    }

    fn degrade(&self, snapshot: &Snapshot, reason: &str) {
        log::warn!(
            "[Analyze] {} {}: degraded ({})",
            snapshot.game_id,
            snapshot.game_time,
            reason
        );
        self.emitter.emit_pipeline(PipelineEvent::StageDegraded {
            game_id: snapshot.game_id.to_string(),
            game_time: snapshot.game_time.to_string(),
            stage: Stage::Analyze.name().to_string(),
            reason: reason.to_string(),
            timestamp: now_millis(),
        });
    }
}

fn parse_analysis(reply: &str) -> Option<Analysis> {
    let json = extract_json(reply)?;
    serde_json::from_str::<Analysis>(json)
        .ok()
        .map(Analysis::sanitized)
}

/// Deterministic minimal analysis from the Board update (degraded mode).
#[must_use]
pub fn fallback_analysis(report: &UpdateReport, board: &BoardProjection) -> Analysis {
    let mut talking_points = Vec::new();
    let mut high_intensity_events = Vec::new();

    for goal in &report.new_goals {
        talking_points.push(format!("{} scores for {:?}", goal.scorer, goal.team));
        high_intensity_events.push(format!("goal: {}", goal.scorer));
    }
    for penalty in &report.new_penalties {
        talking_points.push(format!("{} penalized for {}", penalty.player, penalty.infraction));
    }
    if report.period_crossed {
        talking_points.push(format!("period {} underway", board.period));
    }
    if talking_points.is_empty() {
        talking_points.push(format!(
            "{} {} - {} {}, {} left in period {}",
            board.away_team,
            board.score.away,
            board.score.home,
            board.home_team,
            board.time_remaining,
            board.period
        ));
    }

    let momentum = if !report.new_goals.is_empty() {
        0.9
    } else if !report.new_penalties.is_empty() || report.period_crossed {
        0.55
    } else if report.shots_delta > 0 {
        0.35
    } else {
        0.15
    };

    Analysis {
        talking_points,
        momentum,
        high_intensity_events,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::session::SessionSeed;
    use crate::events::NoopEventEmitter;
    use crate::game::board::Board;
    use crate::game::roster::fixtures::edm_at_fla;
    use crate::game::snapshot::{GameId, ScorePair};
    use crate::game::time::GameTime;
    use crate::stages::fixtures::ScriptedLlm;

    fn session() -> AgentSession {
        AgentSession::seeded(
            Stage::Analyze,
            &SessionSeed {
                preamble: "p".into(),
                board_block: "b".into(),
                summary: "s".into(),
            },
        )
    }

    fn stage(llm: Arc<ScriptedLlm>) -> AnalyzeStage {
        AnalyzeStage::new(
            llm,
            ContextManager::new(30_000, 48_000),
            Duration::from_secs(1),
            Arc::new(NoopEventEmitter),
        )
    }

    fn snapshot() -> Snapshot {
        Snapshot {
            game_id: GameId::from("GAME"),
            game_time: GameTime::new(1, 0, 0),
            wall_time_received: 0,
            activities: vec![],
            observed_score: ScorePair::default(),
            observed_shots: ScorePair::default(),
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

    #[tokio::test]
    async fn well_formed_reply_parses_and_extends_session() {
        let llm = ScriptedLlm::new(vec![Ok(
            r#"{"talking_points": ["early pace"], "momentum": 0.2, "high_intensity_events": []}"#,
        )]);
        let ctx = edm_at_fla();
        let board = Board::load(&ctx).project(&ctx);
        let s = session();

        let analysis = stage(llm.clone())
            .run(&s, &board, &snapshot(), &empty_report(), &ctx.roster_lock())
            .await;

        assert_eq!(analysis.momentum, 0.2);
        assert_eq!(analysis.talking_points, vec!["early pace".to_string()]);
        assert_eq!(llm.calls(), 1);
        // Seed (3) + recorded exchange (2).
        assert_eq!(s.log_snapshot().len(), 5);
    }

    #[tokio::test]
    async fn malformed_reply_gets_one_repair_retry() {
        let llm = ScriptedLlm::new(vec![
            Ok("the first period has been cagey so far"),
            Ok(r#"{"talking_points": [], "momentum": 0.4, "high_intensity_events": []}"#),
        ]);
        let ctx = edm_at_fla();
        let board = Board::load(&ctx).project(&ctx);

        let analysis = stage(llm.clone())
            .run(
                &session(),
                &board,
                &snapshot(),
                &empty_report(),
                &ctx.roster_lock(),
            )
            .await;

        assert_eq!(analysis.momentum, 0.4);
        assert_eq!(llm.calls(), 2);
    }

    #[tokio::test]
    async fn persistent_malformed_output_degrades_deterministically() {
        let llm = ScriptedLlm::new(vec![Ok("prose"), Ok("more prose")]);
        let ctx = edm_at_fla();
        let board = Board::load(&ctx).project(&ctx);

        let analysis = stage(llm)
            .run(
                &session(),
                &board,
                &snapshot(),
                &empty_report(),
                &ctx.roster_lock(),
            )
            .await;

        assert_eq!(analysis.momentum, 0.15);
        assert!(!analysis.talking_points.is_empty());
    }

    #[tokio::test]
    async fn momentum_is_clamped_to_unit_interval() {
        let llm = ScriptedLlm::new(vec![Ok(
            r#"{"talking_points": [], "momentum": 7.5, "high_intensity_events": []}"#,
        )]);
        let ctx = edm_at_fla();
        let board = Board::load(&ctx).project(&ctx);

        let analysis = stage(llm)
            .run(
                &session(),
                &board,
                &snapshot(),
                &empty_report(),
                &ctx.roster_lock(),
            )
            .await;

        assert_eq!(analysis.momentum, 1.0);
    }

    #[test]
    fn fallback_rates_goals_highest() {
        let ctx = edm_at_fla();
        let board = Board::load(&ctx).project(&ctx);

        let quiet = fallback_analysis(&empty_report(), &board);
        assert!(quiet.momentum < 0.33);

        let mut with_goal = empty_report();
        with_goal.new_goals.push(crate::game::board::GoalRecord {
            scorer: "Draisaitl".into(),
            team: crate::game::snapshot::TeamSide::Away,
            assists: vec![],
            game_time: GameTime::new(1, 5, 30),
        });
        let loud = fallback_analysis(&with_goal, &board);
        assert!(loud.momentum > 0.66);
        assert!(loud.high_intensity_events.iter().any(|e| e.contains("Draisaitl")));
    }
}
