//! Stage 2 - Narrate: turn analysis into two-voice booth lines.
//!
//! The narrator's output passes through deterministic post-filters before
//! it can reach synthesis:
//! - roster lock: segments naming players outside the lock are repaired
//!   by the collaborator once, then mechanically rewritten to a generic
//!   role, then dropped;
//! - state contradiction: a segment stating a score or shot count the
//!   Board disagrees with gets the same repair-then-drop treatment;
//! - speakers alternate, every batch lands in the 2-6 segment window, and
//!   a new goal always gets at least one on-air call.

use std::sync::Arc;
use std::time::Duration;

use crate::agent::context::ContextManager;
use crate::agent::session::AgentSession;
use crate::agent::LlmClient;
use crate::events::{EventEmitter, PipelineEvent};
use crate::game::board::{BoardProjection, UpdateReport};
use crate::game::roster::{RosterLock, GENERIC_ROLES};
use crate::game::snapshot::Snapshot;
use crate::retry::with_retry;
use crate::stages::{
    extract_json, Analysis, CommentaryKind, CommentarySegment, Emotion, NarrationBatch, Speaker,
    Stage,
};
use crate::utils::now_millis;

/// Batch size bounds from the stage contract.
const MIN_SEGMENTS: usize = 2;
const MAX_SEGMENTS: usize = 6;

/// Runs the Narrate stage against the LLM collaborator.
pub struct NarrateStage {
    llm: Arc<dyn LlmClient>,
    context: ContextManager,
    timeout: Duration,
    momentum_low_max: f32,
    momentum_high_min: f32,
    emitter: Arc<dyn EventEmitter>,
}

impl NarrateStage {
    #[must_use]
    pub fn new(
        llm: Arc<dyn LlmClient>,
        context: ContextManager,
        timeout: Duration,
        momentum_low_max: f32,
        momentum_high_min: f32,
        emitter: Arc<dyn EventEmitter>,
    ) -> Self {
        Self {
            llm,
            context,
            timeout,
            momentum_low_max,
            momentum_high_min,
            emitter,
        }
    }

    /// Commentary register for a momentum score (thresholds are tunable
    /// configuration, not contract).
    #[must_use]
    pub fn select_kind(&self, momentum: f32) -> CommentaryKind {
        if momentum <= self.momentum_low_max {
            CommentaryKind::Filler
        } else if momentum >= self.momentum_high_min {
            CommentaryKind::PlayByPlay
        } else {
            CommentaryKind::Mixed
        }
    }

    /// Produces the narration batch for one snapshot. Never fails; the
    /// degraded path builds a deterministic batch from the Board update.
    pub async fn run(
        &self,
        session: &AgentSession,
        analysis: &Analysis,
        board: &BoardProjection,
        snapshot: &Snapshot,
        report: &UpdateReport,
        lock: &RosterLock,
    ) -> NarrationBatch {
        let kind = self.select_kind(analysis.momentum);

        let payload = self
            .context
            .assemble(Stage::Narrate, session, board, snapshot, lock);
        let user_message = format!(
            "{}\nANALYSIS: momentum {:.2}; talking points: {}.\nRegister: {}.",
            payload.user_message,
            analysis.momentum,
            analysis.talking_points.join("; "),
            register_directive(kind),
        );
        let log = session.log_snapshot();

        let reply = match with_retry("narrate", self.timeout, || {
            self.llm.complete(&payload.system_prompt, &log, &user_message)
        })
        .await
        {
            Ok(text) => text,
            Err(e) => {
                self.degrade(snapshot, &format!("collaborator failed: {}", e));
                return degraded_batch(kind, report, board);
            }
        };

        let mut segments = match parse_segments(&reply) {
            Some(segments) => segments,
            None => {
                // One repair retry for the schema, then degrade.
                let repair = format!(
                    "{}\nYour previous reply was not the required JSON array of segments. \
                     Reply with ONLY the JSON array.",
                    user_message
                );
                match with_retry("narrate-repair", self.timeout, || {
                    self.llm.complete(&payload.system_prompt, &log, &repair)
                })
                .await
                .ok()
                .and_then(|text| parse_segments(&text))
                {
                    Some(segments) => segments,
                    None => {
                        self.degrade(snapshot, "malformed narration after repair retry");
                        return degraded_batch(kind, report, board);
                    }
                }
            }
        };

        // Fact filters: one collaborator repair for violations, then the
        // mechanical rewrite/drop pass guarantees the invariants.
        let violations = collect_violations(&segments, lock, board);
        if !violations.is_empty() {
            log::info!(
                "[Narrate] {} {}: repairing {} violation(s)",
                snapshot.game_id,
                snapshot.game_time,
                violations.len()
            );
            let repair = format!(
                "{}\nRewrite your segments fixing these problems, reply with ONLY the JSON \
                 array: {}",
                user_message,
                violations.join("; ")
            );
            if let Some(repaired) = with_retry("narrate-facts", self.timeout, || {
                self.llm.complete(&payload.system_prompt, &log, &repair)
            })
            .await
            .ok()
            .and_then(|text| parse_segments(&text))
            {
                segments = repaired;
            }
        }

        let mut batch = NarrationBatch { kind, segments };
        enforce_roster_lock(&mut batch, lock);
        drop_contradictions(&mut batch, board);
        finish_batch(&mut batch, report, board);

        session.record_exchange(
            user_message,
            serde_json::to_string(&batch.segments).unwrap_or_default(),
        );
        batch
    }

    fn degrade(&self, snapshot: &Snapshot, reason: &str) {
        log::warn!(
            "[Narrate] {} {}: degraded ({})",
            snapshot.game_id,
            snapshot.game_time,
            reason
        );
        self.emitter.emit_pipeline(PipelineEvent::StageDegraded {
            game_id: snapshot.game_id.to_string(),
            game_time: snapshot.game_time.to_string(),
            stage: Stage::Narrate.name().to_string(),
            reason: reason.to_string(),
            timestamp: now_millis(),
        });
    }
}

fn register_directive(kind: CommentaryKind) -> &'static str {
    match kind {
        CommentaryKind::Filler => "filler - atmosphere, color, no urgency",
        CommentaryKind::Mixed => "mixed - light play calling with color",
        CommentaryKind::PlayByPlay => "play-by-play - urgent, call the action",
    }
}

fn parse_segments(reply: &str) -> Option<Vec<CommentarySegment>> {
    let json = extract_json(reply)?;
    let segments: Vec<CommentarySegment> = serde_json::from_str(json).ok()?;
    (!segments.is_empty()).then_some(segments)
}

/// Human-readable violation list for the collaborator repair prompt.
fn collect_violations(
    segments: &[CommentarySegment],
    lock: &RosterLock,
    board: &BoardProjection,
) -> Vec<String> {
    let mut violations = Vec::new();
    for (i, segment) in segments.iter().enumerate() {
        for mention in &segment.mentions {
            if !lock.contains(mention) {
                violations.push(format!(
                    "segment {}: '{}' is not in this game, use a rostered player or a role",
                    i, mention
                ));
            }
        }
        for (a, b) in score_claims(&segment.text) {
            if !claim_matches_board(a, b, board) {
                violations.push(format!(
                    "segment {}: states {}-{} but the score is {}-{}",
                    i, a, b, board.score.away, board.score.home
                ));
            }
        }
    }
    violations
}

/// Roster lock enforcement (mechanical pass after the repair retry):
/// rewrite the offending token to a generic role, or drop the segment if
/// the token cannot be located in the text.
fn enforce_roster_lock(batch: &mut NarrationBatch, lock: &RosterLock) {
    let mut role_cursor = 0usize;
    batch.segments.retain_mut(|segment| {
        let offending: Vec<String> = segment
            .mentions
            .iter()
            .filter(|m| !lock.contains(m))
            .cloned()
            .collect();

        for mention in offending {
            let role = GENERIC_ROLES[role_cursor % GENERIC_ROLES.len()];
            role_cursor += 1;
            match replace_ascii_ci(&segment.text, &mention, role) {
                Some(rewritten) => {
                    log::info!("[Narrate] rewrote '{}' -> '{}'", mention, role);
                    segment.text = rewritten;
                    segment.mentions.retain(|m| m != &mention);
                }
                None => {
                    log::warn!(
                        "[Narrate] dropping segment: cannot rewrite mention '{}'",
                        mention
                    );
                    return false;
                }
            }
        }
        true
    });
}

/// Drops any segment still contradicting the Board after the repair retry.
fn drop_contradictions(batch: &mut NarrationBatch, board: &BoardProjection) {
    batch.segments.retain(|segment| {
        let ok = score_claims(&segment.text)
            .into_iter()
            .all(|(a, b)| claim_matches_board(a, b, board));
        if !ok {
            log::warn!(
                "[Narrate] dropping segment contradicting the board: {:?}",
                segment.text
            );
        }
        ok
    });
}

/// Alternation, goal coverage, and the 2-6 segment window.
fn finish_batch(batch: &mut NarrationBatch, report: &UpdateReport, board: &BoardProjection) {
    if !report.new_goals.is_empty()
        && !batch
            .segments
            .iter()
            .any(|s| report.new_goals.iter().any(|g| s.text.contains(&g.scorer)))
    {
        // The filters ate every mention of the goal; put the call back.
        let goal = &report.new_goals[0];
        batch.segments.insert(0, goal_call_segment(goal, board));
    }

    batch.segments.truncate(MAX_SEGMENTS);
    while batch.segments.len() < MIN_SEGMENTS {
        let speaker = batch
            .segments
            .last()
            .map(|s| s.speaker.other())
            .unwrap_or(Speaker::A);
        batch.segments.push(color_segment(speaker, board));
    }

    // Speakers alternate in a natural rhythm.
    for i in 1..batch.segments.len() {
        if batch.segments[i].speaker == batch.segments[i - 1].speaker {
            batch.segments[i].speaker = batch.segments[i - 1].speaker.other();
        }
    }
}

/// Deterministic batch for the fully degraded path.
#[must_use]
pub fn degraded_batch(
    kind: CommentaryKind,
    report: &UpdateReport,
    board: &BoardProjection,
) -> NarrationBatch {
    let mut segments = Vec::new();
    for goal in &report.new_goals {
        segments.push(goal_call_segment(goal, board));
    }
    let mut batch = NarrationBatch { kind, segments };
    finish_batch(&mut batch, report, board);
    batch
}

fn goal_call_segment(
    goal: &crate::game::board::GoalRecord,
    board: &BoardProjection,
) -> CommentarySegment {
    let team = match goal.team {
        crate::game::snapshot::TeamSide::Away => &board.away_team,
        crate::game::snapshot::TeamSide::Home => &board.home_team,
    };
    CommentarySegment {
        speaker: Speaker::A,
        text: format!(
            "{} scores for {}! That makes it {} {} - {} {}.",
            goal.scorer, team, board.away_team, board.score.away, board.score.home, board.home_team
        ),
        emotion: Emotion::Goal,
        mentions: vec![goal.scorer.clone()],
        duration_estimate_seconds: 4.0,
        pause_after_seconds: 0.5,
    }
}

fn color_segment(speaker: Speaker, board: &BoardProjection) -> CommentarySegment {
    CommentarySegment {
        speaker,
        text: format!(
            "{} {} - {} {} here in period {}, {} to play.",
            board.away_team,
            board.score.away,
            board.score.home,
            board.home_team,
            board.period,
            board.time_remaining
        ),
        emotion: Emotion::Neutral,
        mentions: vec![],
        duration_estimate_seconds: 3.0,
        pause_after_seconds: 0.4,
    }
}

/// Finds `N-M` style score claims in a text (also en dash and spaced forms).
fn score_claims(text: &str) -> Vec<(u32, u32)> {
    let mut claims = Vec::new();
    let normalized: String = text
        .chars()
        .map(|c| if c == '\u{2013}' { '-' } else { c })
        .collect();

    let bytes = normalized.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i].is_ascii_digit() {
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            let first: u32 = match normalized[start..i].parse() {
                Ok(n) => n,
                Err(_) => continue,
            };

            // Optional single space, dash, optional single space, digits.
            let mut j = i;
            if j < bytes.len() && bytes[j] == b' ' {
                j += 1;
            }
            if j >= bytes.len() || bytes[j] != b'-' {
                continue;
            }
            j += 1;
            if j < bytes.len() && bytes[j] == b' ' {
                j += 1;
            }
            let num_start = j;
            while j < bytes.len() && bytes[j].is_ascii_digit() {
                j += 1;
            }
            if j == num_start {
                continue;
            }
            if let Ok(second) = normalized[num_start..j].parse() {
                claims.push((first, second));
            }
            i = j;
        } else {
            i += 1;
        }
    }
    claims
}

/// A claimed pair is consistent if it matches the score or the shot totals
/// in either reading order.
fn claim_matches_board(a: u32, b: u32, board: &BoardProjection) -> bool {
    let score = (board.score.away, board.score.home);
    let shots = (board.shots.away, board.shots.home);
    let claim = (a, b);
    let flipped = (b, a);
    claim == score || flipped == score || claim == shots || flipped == shots
}

/// ASCII case-insensitive replace-all. Returns `None` when the needle does
/// not occur (non-ASCII needles fall back to exact matching).
fn replace_ascii_ci(text: &str, needle: &str, replacement: &str) -> Option<String> {
    if needle.is_empty() {
        return None;
    }
    if !needle.is_ascii() {
        return text
            .contains(needle)
            .then(|| text.replace(needle, replacement));
    }

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    let mut found = false;
    while rest.len() >= needle.len() {
        let window_end = needle.len();
        if rest.is_char_boundary(window_end)
            && rest[..window_end].eq_ignore_ascii_case(needle)
        {
            out.push_str(replacement);
            rest = &rest[window_end..];
            found = true;
        } else {
            let mut chars = rest.chars();
            out.push(chars.next()?);
            rest = chars.as_str();
        }
    }
    out.push_str(rest);
    found.then_some(out)
}
