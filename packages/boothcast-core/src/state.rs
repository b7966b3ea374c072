//! Core configuration types.
//!
//! Provides the pipeline configuration ([`Config`]) shared by the headless
//! server and embedding hosts. Runtime game-session state lives in
//! [`crate::services::registry`].

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the Boothcast pipeline.
///
/// All fields have sensible defaults. Timeouts and thresholds mirror the
/// knobs exposed to operators; protocol-fixed values (audio format, wire
/// encoding) live in [`crate::protocol_constants`] instead.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    // Server
    /// Preferred port for the HTTP/WS server (0 = auto-allocate).
    pub bind_port: u16,

    // Ingest
    /// Root directory where the upstream producer writes snapshot files.
    /// The watcher observes `<ingest_root>/<game_id>/`.
    pub ingest_root: PathBuf,

    /// Grace period for the stable-size check before a snapshot file is
    /// considered fully written (milliseconds).
    pub watcher_grace_ms: u64,

    /// Bound on how long the watcher waits for a file to stabilize before
    /// skipping it (milliseconds).
    pub watcher_stabilize_timeout_ms: u64,

    // Persistence
    /// Root directory for durable artifacts (`<data_root>/<game_id>/...`).
    pub data_root: PathBuf,

    // Pipeline
    /// Game-time seconds between successive snapshots from the producer.
    /// Governs the ordering-queue skip window.
    pub snapshot_cadence_seconds: u64,

    /// Maximum snapshots in flight through the stage workers.
    pub stage_pool_size: usize,

    /// Multiplier on the snapshot cadence after which a stuck game time is
    /// skipped with an explicit marker.
    pub skip_after_multiplier: f64,

    // Agent sessions
    /// Soft context threshold (estimated tokens) that triggers a session
    /// refresh.
    pub context_soft_tokens: usize,

    /// Hard context ceiling (estimated tokens).
    pub context_hard_tokens: usize,

    /// Time-based refresh fallback: refresh after this many snapshots even
    /// if no other trigger fired.
    pub refresh_every_n_snapshots: u32,

    // Narration selection (tunable, not contract)
    /// Momentum at or below this selects filler commentary.
    pub momentum_low_max: f32,

    /// Momentum at or above this selects play-by-play commentary.
    pub momentum_high_min: f32,

    /// Narration language for the TTS collaborator.
    pub narration_language: String,

    // Collaborators
    /// LLM completion endpoint (Analyze, Narrate).
    pub llm_endpoint: String,

    /// TTS synthesis endpoint (Synthesize).
    pub tts_endpoint: String,

    /// Per-call timeout for the LLM collaborator (seconds).
    pub llm_timeout_secs: u64,

    /// Per-call timeout for the TTS collaborator (seconds).
    pub tts_timeout_secs: u64,

    /// Per-call timeout for snapshot filesystem reads (seconds).
    pub fs_timeout_secs: u64,

    // Broadcast
    /// Per-subscriber outbound queue bound; a subscriber lagging past this
    /// many frames is disconnected.
    pub per_subscriber_queue: usize,

    /// Recent wire frames retained per game for resume-from replay.
    pub hub_retain_frames: usize,

    /// Capacity of the observability event broadcast channel.
    pub event_channel_capacity: usize,

    // Shutdown
    /// Grace period for draining in-flight snapshots on cancel (seconds).
    pub drain_grace_secs: u64,

    /// Bound on letting an in-flight stage call finish during cancel (seconds).
    pub stage_finish_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_port: 49700,
            ingest_root: PathBuf::from("ingest"),
            watcher_grace_ms: 250,
            watcher_stabilize_timeout_ms: 5_000,
            data_root: PathBuf::from("data"),
            snapshot_cadence_seconds: 5,
            stage_pool_size: 3,
            skip_after_multiplier: 2.0,
            context_soft_tokens: 30_000,
            context_hard_tokens: 48_000,
            refresh_every_n_snapshots: 15,
            momentum_low_max: 0.33,
            momentum_high_min: 0.66,
            narration_language: "en".to_string(),
            llm_endpoint: "http://127.0.0.1:8801/v1/complete".to_string(),
            tts_endpoint: "http://127.0.0.1:8802/v1/synthesize".to_string(),
            llm_timeout_secs: 12,
            tts_timeout_secs: 8,
            fs_timeout_secs: 2,
            per_subscriber_queue: 64,
            hub_retain_frames: 512,
            event_channel_capacity: 100,
            drain_grace_secs: 10,
            stage_finish_timeout_secs: 5,
        }
    }
}

impl Config {
    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.stage_pool_size == 0 {
            return Err("stage_pool_size must be >= 1".to_string());
        }
        if self.per_subscriber_queue == 0 {
            return Err(
                "per_subscriber_queue must be >= 1 (broadcast::channel panics on 0)".to_string(),
            );
        }
        if self.snapshot_cadence_seconds == 0 {
            return Err("snapshot_cadence_seconds must be >= 1".to_string());
        }
        if self.skip_after_multiplier <= 0.0 {
            return Err("skip_after_multiplier must be > 0".to_string());
        }
        if self.context_soft_tokens >= self.context_hard_tokens {
            return Err("context_soft_tokens must be below context_hard_tokens".to_string());
        }
        if !(0.0..=1.0).contains(&self.momentum_low_max)
            || !(0.0..=1.0).contains(&self.momentum_high_min)
            || self.momentum_low_max >= self.momentum_high_min
        {
            return Err("momentum thresholds must satisfy 0 <= low < high <= 1".to_string());
        }
        Ok(())
    }

    /// Window after which a stuck game time is skipped with a marker.
    #[must_use]
    pub fn skip_after(&self) -> Duration {
        Duration::from_secs_f64(self.snapshot_cadence_seconds as f64 * self.skip_after_multiplier)
    }

    /// Per-call timeout for the LLM collaborator.
    #[must_use]
    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm_timeout_secs)
    }

    /// Per-call timeout for the TTS collaborator.
    #[must_use]
    pub fn tts_timeout(&self) -> Duration {
        Duration::from_secs(self.tts_timeout_secs)
    }

    /// Per-call timeout for snapshot filesystem reads.
    #[must_use]
    pub fn fs_timeout(&self) -> Duration {
        Duration::from_secs(self.fs_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn zero_pool_size_is_rejected() {
        let config = Config {
            stage_pool_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn inverted_momentum_thresholds_are_rejected() {
        let config = Config {
            momentum_low_max: 0.8,
            momentum_high_min: 0.4,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn skip_after_scales_with_cadence() {
        let config = Config {
            snapshot_cadence_seconds: 5,
            skip_after_multiplier: 2.0,
            ..Default::default()
        };
        assert_eq!(config.skip_after(), Duration::from_secs(10));
    }
}
