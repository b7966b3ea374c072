//! Fixed protocol constants that should NOT be changed.
//!
//! These values are defined by external contracts (the broadcast wire
//! protocol, the TTS audio format, WAV structure) and changing them would
//! break compatibility with subscribers and collaborators.

// ─────────────────────────────────────────────────────────────────────────────
// Audio Format
// ─────────────────────────────────────────────────────────────────────────────

/// Sample rate for all rendered commentary audio (Hz).
///
/// The TTS collaborator streams 24 kHz PCM; subscribers decode against this.
pub const AUDIO_SAMPLE_RATE: u32 = 24_000;

/// Channel count for rendered audio (mono).
pub const AUDIO_CHANNELS: u16 = 1;

/// Bit depth for rendered audio.
pub const AUDIO_BITS_PER_SAMPLE: u16 = 16;

/// Wire identifier for the audio encoding, sent with every audio frame.
pub const AUDIO_ENCODING: &str = "wav_pcm16_24k_mono";

/// Size of a canonical PCM WAV header (RIFF + fmt + data chunk headers).
pub const WAV_HEADER_LEN: usize = 44;

// ─────────────────────────────────────────────────────────────────────────────
// Game Clock
// ─────────────────────────────────────────────────────────────────────────────

/// Regulation period length in minutes.
///
/// Overtime and shootout are modeled as periods beyond [`REGULATION_PERIODS`]
/// with the same clock arithmetic.
pub const PERIOD_LENGTH_MINUTES: u8 = 20;

/// Number of regulation periods.
pub const REGULATION_PERIODS: u8 = 3;

// ─────────────────────────────────────────────────────────────────────────────
// Narrative Summary
// ─────────────────────────────────────────────────────────────────────────────

/// Upper bound on the deterministic narrative summary (characters).
pub const NARRATIVE_SUMMARY_MAX_CHARS: usize = 600;

// ─────────────────────────────────────────────────────────────────────────────
// Application Identity
// ─────────────────────────────────────────────────────────────────────────────

/// Application name used in wire metadata and logs.
pub const APP_NAME: &str = "Boothcast";

/// Service identifier returned by the health endpoint.
///
/// Subscribers probe /health and expect this exact string to identify a
/// Boothcast server.
pub const SERVICE_ID: &str = "boothcast";
