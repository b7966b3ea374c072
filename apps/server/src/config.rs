//! Server configuration.
//!
//! Supports loading from YAML files with environment variable overrides.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

/// Server configuration loaded from YAML with environment overrides.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Port to bind the HTTP server to.
    /// Override: `BOOTHCAST_BIND_PORT`
    pub bind_port: u16,

    /// Root directory the upstream producer writes snapshots into.
    /// Override: `BOOTHCAST_INGEST_ROOT`
    pub ingest_root: PathBuf,

    /// Root directory for durable artifacts (boards, narration, audio).
    /// Override: `BOOTHCAST_DATA_ROOT`
    pub data_root: PathBuf,

    /// LLM completion endpoint for the Analyze and Narrate stages.
    /// Override: `BOOTHCAST_LLM_ENDPOINT`
    pub llm_endpoint: Option<String>,

    /// TTS synthesis endpoint for the Synthesize stage.
    /// Override: `BOOTHCAST_TTS_ENDPOINT`
    pub tts_endpoint: Option<String>,

    /// Game-time seconds between producer snapshots.
    pub snapshot_cadence_seconds: u64,

    /// Max snapshots in flight through the stage workers.
    pub stage_pool_size: usize,

    /// Soft context threshold (tokens) for session refresh.
    pub context_soft_tokens: usize,

    /// Hard context ceiling (tokens).
    pub context_hard_tokens: usize,

    /// Snapshot-count fallback for session refresh.
    pub refresh_every_n_snapshots: u32,

    /// Per-subscriber outbound queue bound.
    pub per_subscriber_queue: usize,

    /// Ordering-queue skip window as a multiple of the cadence.
    pub skip_after_multiplier: f64,

    /// Narration language passed to the TTS collaborator.
    pub narration_language: String,

    /// Static contexts of games to start at boot (JSON files).
    pub games: Vec<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let core = boothcast_core::Config::default();
        Self {
            bind_port: core.bind_port,
            ingest_root: core.ingest_root,
            data_root: core.data_root,
            llm_endpoint: None,
            tts_endpoint: None,
            snapshot_cadence_seconds: core.snapshot_cadence_seconds,
            stage_pool_size: core.stage_pool_size,
            context_soft_tokens: core.context_soft_tokens,
            context_hard_tokens: core.context_hard_tokens,
            refresh_every_n_snapshots: core.refresh_every_n_snapshots,
            per_subscriber_queue: core.per_subscriber_queue,
            skip_after_multiplier: core.skip_after_multiplier,
            narration_language: core.narration_language,
            games: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("BOOTHCAST_BIND_PORT") {
            if let Ok(port) = val.parse() {
                self.bind_port = port;
            }
        }

        if let Ok(val) = std::env::var("BOOTHCAST_INGEST_ROOT") {
            self.ingest_root = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("BOOTHCAST_DATA_ROOT") {
            self.data_root = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("BOOTHCAST_LLM_ENDPOINT") {
            self.llm_endpoint = Some(val);
        }

        if let Ok(val) = std::env::var("BOOTHCAST_TTS_ENDPOINT") {
            self.tts_endpoint = Some(val);
        }
    }

    /// Converts to boothcast-core's Config type.
    pub fn to_core_config(&self) -> boothcast_core::Config {
        let defaults = boothcast_core::Config::default();
        boothcast_core::Config {
            bind_port: self.bind_port,
            ingest_root: self.ingest_root.clone(),
            data_root: self.data_root.clone(),
            snapshot_cadence_seconds: self.snapshot_cadence_seconds,
            stage_pool_size: self.stage_pool_size,
            context_soft_tokens: self.context_soft_tokens,
            context_hard_tokens: self.context_hard_tokens,
            refresh_every_n_snapshots: self.refresh_every_n_snapshots,
            per_subscriber_queue: self.per_subscriber_queue,
            skip_after_multiplier: self.skip_after_multiplier,
            narration_language: self.narration_language.clone(),
            llm_endpoint: self
                .llm_endpoint
                .clone()
                .unwrap_or_else(|| defaults.llm_endpoint.clone()),
            tts_endpoint: self
                .tts_endpoint
                .clone()
                .unwrap_or_else(|| defaults.tts_endpoint.clone()),
            ..defaults
        }
    }
}
