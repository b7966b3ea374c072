//! Stage 3 - Synthesize: render narration segments to audio.
//!
//! Segments within a batch render in parallel and reassemble in batch
//! order. A segment whose audio cannot be produced (or arrives in the
//! wrong format after one repair call) is dropped from both the audio
//! list and the narration, keeping the wire contract's per-segment
//! narration/audio pairing intact.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;

use crate::agent::tts::voice_style_for;
use crate::agent::TtsClient;
use crate::audio::wav::parse_wav;
use crate::events::{EventEmitter, PipelineEvent};
use crate::game::snapshot::GameId;
use crate::game::time::GameTime;
use crate::retry::with_retry;
use crate::stages::{AudioSegment, CommentarySegment, NarrationBatch, Stage};
use crate::utils::now_millis;

/// Runs the Synthesize stage against the TTS collaborator.
pub struct SynthesizeStage {
    tts: Arc<dyn TtsClient>,
    timeout: Duration,
    language: String,
    emitter: Arc<dyn EventEmitter>,
}

impl SynthesizeStage {
    #[must_use]
    pub fn new(
        tts: Arc<dyn TtsClient>,
        timeout: Duration,
        language: impl Into<String>,
        emitter: Arc<dyn EventEmitter>,
    ) -> Self {
        Self {
            tts,
            timeout,
            language: language.into(),
            emitter,
        }
    }

    /// Renders a batch. Returns the (possibly thinned) narration batch and
    /// its audio, index-paired and densely renumbered.
    pub async fn run(
        &self,
        game_id: &GameId,
        game_time: GameTime,
        batch: NarrationBatch,
    ) -> (NarrationBatch, Vec<AudioSegment>) {
        let renders = join_all(
            batch
                .segments
                .iter()
                .map(|segment| self.render_segment(segment)),
        )
        .await;

        let mut kept_segments = Vec::with_capacity(batch.segments.len());
        let mut audio = Vec::with_capacity(batch.segments.len());

        for (segment, rendered) in batch.segments.into_iter().zip(renders) {
            match rendered {
                Some((wav, duration_seconds)) => {
                    audio.push(AudioSegment {
                        index: kept_segments.len(),
                        speaker: segment.speaker,
                        emotion: segment.emotion,
                        duration_seconds,
                        wav,
                    });
                    kept_segments.push(segment);
                }
                None => {
                    self.emitter.emit_pipeline(PipelineEvent::StageDegraded {
                        game_id: game_id.to_string(),
                        game_time: game_time.to_string(),
                        stage: Stage::Synthesize.name().to_string(),
                        reason: format!("dropped segment: {:?}", segment.text),
                        timestamp: now_millis(),
                    });
                }
            }
        }

        (
            NarrationBatch {
                kind: batch.kind,
                segments: kept_segments,
            },
            audio,
        )
    }

    /// Renders one segment, validating the collaborator's WAV contract.
    /// Wrong-format output gets one repair call, then the segment is dropped.
    async fn render_segment(&self, segment: &CommentarySegment) -> Option<(bytes::Bytes, f32)> {
        let style = voice_style_for(segment.speaker, segment.emotion);

        for attempt in 0..2 {
            let result = with_retry("synthesize", self.timeout, || {
                self.tts.synthesize(&segment.text, style, &self.language)
            })
            .await;

            let wav = match result {
                Ok(bytes) => bytes,
                Err(e) => {
                    log::warn!("[Synthesize] collaborator failed: {}", e);
                    return None;
                }
            };

            match parse_wav(&wav) {
                Ok(spec) if spec.is_pipeline_format() => {
                    return Some((wav, spec.duration_seconds()));
                }
                Ok(spec) => {
                    log::warn!(
                        "[Synthesize] wrong format from collaborator (attempt {}): {:?}",
                        attempt + 1,
                        spec
                    );
                }
                Err(e) => {
                    log::warn!(
                        "[Synthesize] unparseable audio from collaborator (attempt {}): {}",
                        attempt + 1,
                        e
                    );
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::CollaboratorError;
    use crate::events::NoopEventEmitter;
    use crate::stages::fixtures::{GarbageTts, ScriptedTts};
    use crate::stages::{CommentaryKind, Emotion, Speaker};

    fn segment(speaker: Speaker, text: &str, estimate: f32) -> CommentarySegment {
        CommentarySegment {
            speaker,
            text: text.into(),
            emotion: Emotion::Neutral,
            mentions: vec![],
            duration_estimate_seconds: estimate,
            pause_after_seconds: 0.2,
        }
    }

    fn batch(segments: Vec<CommentarySegment>) -> NarrationBatch {
        NarrationBatch {
            kind: CommentaryKind::Filler,
            segments,
        }
    }

    fn stage(tts: Arc<dyn TtsClient>) -> SynthesizeStage {
        SynthesizeStage::new(
            tts,
            Duration::from_secs(1),
            "en",
            Arc::new(NoopEventEmitter),
        )
    }

    #[tokio::test]
    async fn renders_one_wav_per_segment_in_order() {
        let tts = ScriptedTts::ok(2.0);
        let s = stage(tts.clone());

        let (narration, audio) = s
            .run(
                &GameId::from("GAME"),
                GameTime::new(1, 0, 0),
                batch(vec![
                    segment(Speaker::A, "first", 2.0),
                    segment(Speaker::B, "second", 2.0),
                    segment(Speaker::A, "third", 2.0),
                ]),
            )
            .await;

        assert_eq!(narration.segments.len(), 3);
        assert_eq!(audio.len(), 3);
        for (i, a) in audio.iter().enumerate() {
            assert_eq!(a.index, i);
            assert_eq!(a.speaker, narration.segments[i].speaker);
        }
        assert_eq!(tts.calls(), 3);
    }

    #[tokio::test]
    async fn rendered_duration_tracks_estimates_within_tolerance() {
        let tts = ScriptedTts::ok(2.0);
        let s = stage(tts);

        let segments = vec![segment(Speaker::A, "a", 2.0), segment(Speaker::B, "b", 2.0)];
        let estimate: f32 = segments.iter().map(|x| x.duration_estimate_seconds).sum();

        let (_, audio) = s
            .run(&GameId::from("GAME"), GameTime::new(1, 0, 0), batch(segments))
            .await;

        let total: f32 = audio.iter().map(|a| a.duration_seconds).sum();
        assert!((total - estimate).abs() / estimate < 0.05);
    }

    #[tokio::test]
    async fn transient_failure_retries_and_succeeds() {
        tokio::time::pause();
        let tts = ScriptedTts::failing_first(
            1.0,
            vec![CollaboratorError::Transport("connection reset".into())],
        );
        let s = stage(tts.clone());

        let (narration, audio) = s
            .run(
                &GameId::from("GAME"),
                GameTime::new(1, 0, 0),
                batch(vec![segment(Speaker::A, "line", 1.0)]),
            )
            .await;

        assert_eq!(narration.segments.len(), 1);
        assert_eq!(audio.len(), 1);
        assert_eq!(tts.calls(), 2);
    }

    #[tokio::test]
    async fn non_wav_output_drops_the_segment_but_keeps_the_rest() {
        // Garbage for every call: segment is dropped after the repair call.
        let s = stage(Arc::new(GarbageTts));

        let (narration, audio) = s
            .run(
                &GameId::from("GAME"),
                GameTime::new(1, 0, 0),
                batch(vec![segment(Speaker::A, "doomed", 1.0)]),
            )
            .await;

        assert!(narration.segments.is_empty());
        assert!(audio.is_empty());
    }
}
