//! The three-stage agent workflow: Analyze → Narrate → Synthesize.
//!
//! Stages are sequential within one snapshot and concurrent across
//! snapshots (the pipeline's worker pool). Each stage has a typed output
//! contract; malformed collaborator output gets one repair retry and then
//! a deterministic degraded fallback, so a well-formed [`PipelineOutput`]
//! always reaches the ordering queue.

pub mod analyze;
pub mod narrate;
pub mod synthesize;

#[cfg(test)]
pub(crate) mod fixtures;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::game::board::BoardProjection;
use crate::game::snapshot::GameId;
use crate::game::time::GameTime;

pub use analyze::{Analysis, AnalyzeStage};
pub use narrate::NarrateStage;
pub use synthesize::SynthesizeStage;

/// One of the three pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Analyze,
    Narrate,
    Synthesize,
}

impl Stage {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Analyze => "analyze",
            Self::Narrate => "narrate",
            Self::Synthesize => "synthesize",
        }
    }

    /// Fixed stage system preamble: role and output schema.
    #[must_use]
    pub fn preamble(&self) -> &'static str {
        match self {
            Self::Analyze => {
                "You are the game analyst for a live hockey broadcast. You receive the \
                 authoritative game state and the newest events, and you reply with ONLY a \
                 JSON object: {\"talking_points\": [string], \"momentum\": number 0.0-1.0, \
                 \"high_intensity_events\": [string]}. No prose outside the JSON."
            }
            Self::Narrate => {
                "You are writing lines for a two-voice broadcast booth. Speaker A is the \
                 energetic play-by-play caller; speaker B is the measured color analyst. \
                 Reply with ONLY a JSON array of segment objects: {\"speaker\": \"A\"|\"B\", \
                 \"text\": string, \"emotion\": string, \"mentions\": [player names used], \
                 \"duration_estimate_seconds\": number, \"pause_after_seconds\": number}. \
                 Never state a score or shot count that differs from the authoritative \
                 state block. Only name players from the allowed list."
            }
            Self::Synthesize => {
                "Render each commentary line as natural broadcast speech."
            }
        }
    }

    /// Stage-specific instructions appended to every prompt.
    #[must_use]
    pub fn instructions(&self) -> &'static str {
        match self {
            Self::Analyze => {
                "Produce the analysis JSON for the new events above. Momentum reflects how \
                 much is happening right now: quiet clock ticks are near 0, goals are near 1."
            }
            Self::Narrate => {
                "Write 2-6 segments continuing the broadcast, alternating speakers."
            }
            Self::Synthesize => "",
        }
    }
}

/// Commentary register chosen from the momentum score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommentaryKind {
    /// Low momentum: color, anecdotes, atmosphere.
    Filler,
    /// Medium momentum: mixed color and light play calling.
    Mixed,
    /// High momentum: urgent play-by-play.
    PlayByPlay,
}

/// One of the two fixed broadcaster roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Speaker {
    A,
    B,
}

impl Speaker {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
        }
    }

    #[must_use]
    pub fn other(&self) -> Self {
        match self {
            Self::A => Self::B,
            Self::B => Self::A,
        }
    }
}

/// Fixed emotion vocabulary carried through to voice-style mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Emotion {
    Excited,
    Goal,
    HighIntensity,
    Analytical,
    Calm,
    Neutral,
    Concerned,
    Penalty,
    Dramatic,
}

impl Emotion {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Excited => "excited",
            Self::Goal => "goal",
            Self::HighIntensity => "high_intensity",
            Self::Analytical => "analytical",
            Self::Calm => "calm",
            Self::Neutral => "neutral",
            Self::Concerned => "concerned",
            Self::Penalty => "penalty",
            Self::Dramatic => "dramatic",
        }
    }
}

/// A single spoken line produced by Narrate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentarySegment {
    pub speaker: Speaker,
    pub text: String,
    pub emotion: Emotion,
    /// Player names the text references, declared by the narrator and
    /// enforced against the roster lock.
    #[serde(default)]
    pub mentions: Vec<String>,
    pub duration_estimate_seconds: f32,
    #[serde(default)]
    pub pause_after_seconds: f32,
}

/// Ordered list of commentary segments for one snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NarrationBatch {
    pub kind: CommentaryKind,
    pub segments: Vec<CommentarySegment>,
}

/// Rendered audio for one commentary segment.
#[derive(Debug, Clone)]
pub struct AudioSegment {
    /// Index within the batch; pairs this audio with its narration segment.
    pub index: usize,
    pub speaker: Speaker,
    pub emotion: Emotion,
    /// Duration decoded from the rendered WAV.
    pub duration_seconds: f32,
    /// Complete 24 kHz 16-bit mono PCM WAV file.
    pub wav: Bytes,
}

/// Everything the pipeline produced for one snapshot, released in
/// game-time order by the ordering queue.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub game_id: GameId,
    pub game_time: GameTime,
    pub sequence: u64,
    pub narration: NarrationBatch,
    pub audio: Vec<AudioSegment>,
    pub board: BoardProjection,
}

/// Extracts the first JSON value from a collaborator reply.
///
/// Collaborators are told to reply with bare JSON, but fenced or prefixed
/// replies are common enough that we scan for the outermost object or array
/// instead of failing outright.
#[must_use]
pub(crate) fn extract_json(text: &str) -> Option<&str> {
    let object = text.find('{').and_then(|start| {
        let end = text.rfind('}')?;
        (end > start).then(|| &text[start..=end])
    });
    let array = text.find('[').and_then(|start| {
        let end = text.rfind(']')?;
        (end > start).then(|| &text[start..=end])
    });

    match (object, array) {
        (Some(o), Some(a)) => {
            // Whichever opens first is the payload.
            if o.as_ptr() <= a.as_ptr() {
                Some(o)
            } else {
                Some(a)
            }
        }
        (Some(o), None) => Some(o),
        (None, Some(a)) => Some(a),
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_json_handles_fenced_replies() {
        let reply = "Here you go:\n```json\n{\"momentum\": 0.5}\n```";
        assert_eq!(extract_json(reply), Some("{\"momentum\": 0.5}"));
    }

    #[test]
    fn extract_json_prefers_first_opening_bracket() {
        let reply = "[{\"speaker\": \"A\"}]";
        assert_eq!(extract_json(reply), Some("[{\"speaker\": \"A\"}]"));
    }

    #[test]
    fn extract_json_rejects_plain_prose() {
        assert_eq!(extract_json("What a game this is."), None);
    }

    #[test]
    fn segment_round_trips_with_defaulted_fields() {
        let raw = r#"{"speaker": "B", "text": "Early pace here.", "emotion": "calm",
                      "duration_estimate_seconds": 2.5}"#;
        let segment: CommentarySegment = serde_json::from_str(raw).unwrap();
        assert_eq!(segment.speaker, Speaker::B);
        assert!(segment.mentions.is_empty());
        assert_eq!(segment.pause_after_seconds, 0.0);
    }
}
