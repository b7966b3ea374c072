//! Broadcast hub: fan-out of ordered pipeline output to subscribers.
//!
//! Each game has one feed: a bounded broadcast channel plus a ring of
//! recent wire frames for resume-from replay. Subscribing captures the
//! retained frames and the live receiver atomically, so a late joiner
//! sees no duplicates and no gap. A subscriber that lags more than the
//! channel bound behind the head is disconnected by its connection
//! handler (the receiver observes `Lagged`); fast subscribers are
//! unaffected and the pipeline never blocks on a slow one.

use std::collections::VecDeque;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::game::snapshot::GameId;
use crate::game::time::GameTime;
use crate::pipeline::ordering::SkipMarker;
use crate::protocol_constants::AUDIO_ENCODING;
use crate::stages::PipelineOutput;

/// One message on the subscriber wire (JSON text frames).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireFrame {
    Narration {
        game_id: String,
        game_time: GameTime,
        sequence: u64,
        segment_index: usize,
        speaker: String,
        text: String,
        emotion: String,
    },
    Audio {
        game_id: String,
        game_time: GameTime,
        sequence: u64,
        segment_index: usize,
        encoding: &'static str,
        /// Base64 of the complete WAV file.
        data: String,
        /// Decoded duration in seconds.
        duration: f32,
    },
    BatchEnd {
        game_id: String,
        game_time: GameTime,
        sequence: u64,
    },
    Skip {
        game_id: String,
        game_time: GameTime,
        reason: String,
    },
    End {
        game_id: String,
    },
}

impl WireFrame {
    /// Game time carried by the frame; `End` has none.
    #[must_use]
    fn game_time(&self) -> Option<GameTime> {
        match self {
            Self::Narration { game_time, .. }
            | Self::Audio { game_time, .. }
            | Self::BatchEnd { game_time, .. }
            | Self::Skip { game_time, .. } => Some(*game_time),
            Self::End { .. } => None,
        }
    }
}

/// Per-game broadcast feed.
pub struct GameFeed {
    game_id: GameId,
    tx: broadcast::Sender<Arc<WireFrame>>,
    /// Recent frames for resume-from replay (ring buffer).
    recent: RwLock<VecDeque<Arc<WireFrame>>>,
    retain: usize,
}

impl GameFeed {
    fn new(game_id: GameId, queue_capacity: usize, retain: usize) -> Self {
        let (tx, _) = broadcast::channel(queue_capacity);
        Self {
            game_id,
            tx,
            recent: RwLock::new(VecDeque::with_capacity(retain)),
            retain,
        }
    }

    /// Publishes one in-order pipeline output as its wire frames:
    /// per segment a narration message then the matching audio message,
    /// then `batch_end`.
    pub fn publish_output(&self, output: &PipelineOutput) {
        let game_id = self.game_id.to_string();
        for (segment, audio) in output.narration.segments.iter().zip(&output.audio) {
            self.push(WireFrame::Narration {
                game_id: game_id.clone(),
                game_time: output.game_time,
                sequence: output.sequence,
                segment_index: audio.index,
                speaker: segment.speaker.as_str().to_string(),
                text: segment.text.clone(),
                emotion: segment.emotion.as_str().to_string(),
            });
            self.push(WireFrame::Audio {
                game_id: game_id.clone(),
                game_time: output.game_time,
                sequence: output.sequence,
                segment_index: audio.index,
                encoding: AUDIO_ENCODING,
                data: BASE64.encode(&audio.wav),
                duration: audio.duration_seconds,
            });
        }
        self.push(WireFrame::BatchEnd {
            game_id,
            game_time: output.game_time,
            sequence: output.sequence,
        });
    }

    /// Publishes an explicit skip marker.
    pub fn publish_skip(&self, marker: &SkipMarker) {
        self.push(WireFrame::Skip {
            game_id: self.game_id.to_string(),
            game_time: marker.game_time,
            reason: marker.reason.clone(),
        });
    }

    /// Publishes the end-of-game frame.
    pub fn publish_end(&self) {
        self.push(WireFrame::End {
            game_id: self.game_id.to_string(),
        });
    }

    fn push(&self, frame: WireFrame) {
        let frame = Arc::new(frame);

        // Hold the ring lock across the send so subscribe() can capture
        // prefill + receiver without a frame landing in both or neither.
        let mut recent = self.recent.write();
        if recent.len() >= self.retain {
            recent.pop_front();
        }
        recent.push_back(Arc::clone(&frame));

        if let Err(e) = self.tx.send(frame) {
            log::trace!("[Hub] {}: no subscribers: {}", self.game_id, e);
        }
    }

    /// Subscribes with optional resume-from: retained frames strictly after
    /// `since` (plus any `end` frame), and the live receiver, captured
    /// atomically.
    #[must_use]
    pub fn subscribe(
        &self,
        since: Option<GameTime>,
    ) -> (Vec<Arc<WireFrame>>, broadcast::Receiver<Arc<WireFrame>>) {
        let recent = self.recent.read();
        let rx = self.tx.subscribe();

        let prefill = recent
            .iter()
            .filter(|frame| match (frame.game_time(), since) {
                (Some(t), Some(since)) => t > since,
                _ => true,
            })
            .cloned()
            .collect();

        (prefill, rx)
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Registry of per-game feeds.
pub struct BroadcastHub {
    feeds: DashMap<GameId, Arc<GameFeed>>,
    queue_capacity: usize,
    retain: usize,
}

impl BroadcastHub {
    #[must_use]
    pub fn new(queue_capacity: usize, retain: usize) -> Self {
        Self {
            feeds: DashMap::new(),
            queue_capacity,
            retain,
        }
    }

    /// Gets or creates the feed for a game.
    #[must_use]
    pub fn feed(&self, game_id: &GameId) -> Arc<GameFeed> {
        Arc::clone(
            &self
                .feeds
                .entry(game_id.clone())
                .or_insert_with(|| {
                    Arc::new(GameFeed::new(
                        game_id.clone(),
                        self.queue_capacity,
                        self.retain,
                    ))
                }),
        )
    }

    /// Feed for a game, if it exists.
    #[must_use]
    pub fn get(&self, game_id: &GameId) -> Option<Arc<GameFeed>> {
        self.feeds.get(game_id).map(|r| Arc::clone(r.value()))
    }

    /// Drops a finished game's feed (late subscribers get nothing).
    pub fn discard(&self, game_id: &GameId) {
        self.feeds.remove(game_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::wav::build_wav;
    use crate::game::board::Board;
    use crate::game::roster::fixtures::edm_at_fla;
    use crate::stages::{
        AudioSegment, CommentaryKind, CommentarySegment, Emotion, NarrationBatch, Speaker,
    };

    fn output(second: u8, sequence: u64) -> PipelineOutput {
        let ctx = edm_at_fla();
        let segment = CommentarySegment {
            speaker: Speaker::A,
            text: "puck drops".into(),
            emotion: Emotion::Neutral,
            mentions: vec![],
            duration_estimate_seconds: 1.0,
            pause_after_seconds: 0.1,
        };
        PipelineOutput {
            game_id: GameId::from("GAME"),
            game_time: GameTime::new(1, 0, second),
            sequence,
            narration: NarrationBatch {
                kind: CommentaryKind::Filler,
                segments: vec![segment],
            },
            audio: vec![AudioSegment {
                index: 0,
                speaker: Speaker::A,
                emotion: Emotion::Neutral,
                duration_seconds: 1.0,
                wav: build_wav(&vec![0u8; 64]),
            }],
            board: Board::load(&ctx).project(&ctx),
        }
    }

    #[test]
    fn output_becomes_narration_audio_batch_end() {
        let hub = BroadcastHub::new(64, 128);
        let feed = hub.feed(&GameId::from("GAME"));
        let (_, mut rx) = feed.subscribe(None);

        feed.publish_output(&output(5, 0));

        assert!(matches!(*rx.try_recv().unwrap(), WireFrame::Narration { .. }));
        match &*rx.try_recv().unwrap() {
            WireFrame::Audio { encoding, data, .. } => {
                assert_eq!(*encoding, "wav_pcm16_24k_mono");
                assert!(!data.is_empty());
            }
            other => panic!("expected audio frame, got {:?}", other),
        }
        assert!(matches!(*rx.try_recv().unwrap(), WireFrame::BatchEnd { .. }));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn resume_from_replays_only_newer_frames() {
        let hub = BroadcastHub::new(64, 128);
        let feed = hub.feed(&GameId::from("GAME"));

        feed.publish_output(&output(5, 0));
        feed.publish_output(&output(10, 1));

        let (prefill, _) = feed.subscribe(Some(GameTime::new(1, 0, 5)));
        assert_eq!(prefill.len(), 3); // one batch: narration + audio + batch_end
        assert!(prefill
            .iter()
            .all(|f| f.game_time() == Some(GameTime::new(1, 0, 10))));
    }

    #[test]
    fn lagging_subscriber_observes_lagged_error() {
        let hub = BroadcastHub::new(4, 128);
        let feed = hub.feed(&GameId::from("GAME"));
        let (_, mut rx) = feed.subscribe(None);

        // 3 frames per output; 4 outputs = 12 frames >> capacity 4.
        for i in 0u8..4 {
            feed.publish_output(&output(5 * (i + 1), u64::from(i)));
        }

        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Lagged(_))
        ));
    }

    #[test]
    fn end_frame_survives_resume_filter() {
        let hub = BroadcastHub::new(64, 128);
        let feed = hub.feed(&GameId::from("GAME"));
        feed.publish_output(&output(5, 0));
        feed.publish_end();

        let (prefill, _) = feed.subscribe(Some(GameTime::new(3, 19, 55)));
        assert_eq!(prefill.len(), 1);
        assert!(matches!(*prefill[0], WireFrame::End { .. }));
    }

    #[test]
    fn retention_is_bounded() {
        let hub = BroadcastHub::new(64, 6);
        let feed = hub.feed(&GameId::from("GAME"));
        for i in 0..10u8 {
            feed.publish_output(&output(i.saturating_mul(5), i as u64));
        }
        let (prefill, _) = feed.subscribe(None);
        assert!(prefill.len() <= 6);
    }
}
