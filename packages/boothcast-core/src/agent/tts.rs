//! TTS collaborator boundary for the Synthesize stage.

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;

use crate::agent::CollaboratorError;
use crate::stages::{Emotion, Speaker};

/// Voice style requested from the TTS collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VoiceStyle {
    Enthusiastic,
    Dramatic,
    Calm,
}

impl VoiceStyle {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Enthusiastic => "enthusiastic",
            Self::Dramatic => "dramatic",
            Self::Calm => "calm",
        }
    }
}

/// Fixed (speaker, emotion) → voice style table.
///
/// Speaker A is the energetic play-by-play voice and always maps to
/// enthusiastic. Speaker B is the color commentator: calm for measured
/// emotions, dramatic otherwise.
#[must_use]
pub fn voice_style_for(speaker: Speaker, emotion: Emotion) -> VoiceStyle {
    match speaker {
        Speaker::A => VoiceStyle::Enthusiastic,
        Speaker::B => match emotion {
            Emotion::Analytical | Emotion::Calm | Emotion::Neutral => VoiceStyle::Calm,
            Emotion::Concerned
            | Emotion::Penalty
            | Emotion::Dramatic
            | Emotion::Excited
            | Emotion::Goal
            | Emotion::HighIntensity => VoiceStyle::Dramatic,
        },
    }
}

/// Speech-synthesis collaborator.
///
/// The contract output is a complete 24 kHz 16-bit mono PCM WAV; the
/// Synthesize stage validates the header and treats anything else as
/// malformed output.
#[async_trait]
pub trait TtsClient: Send + Sync {
    async fn synthesize(
        &self,
        text: &str,
        voice_style: VoiceStyle,
        language: &str,
    ) -> Result<Bytes, CollaboratorError>;
}

#[derive(Serialize)]
struct SynthesisRequest<'a> {
    text: &'a str,
    voice_style: VoiceStyle,
    language: &'a str,
}

/// HTTP adapter for a generic JSON-in/WAV-out synthesis endpoint.
pub struct HttpTtsClient {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTtsClient {
    #[must_use]
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl TtsClient for HttpTtsClient {
    async fn synthesize(
        &self,
        text: &str,
        voice_style: VoiceStyle,
        language: &str,
    ) -> Result<Bytes, CollaboratorError> {
        let request = SynthesisRequest {
            text,
            voice_style,
            language,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| CollaboratorError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(CollaboratorError::Http {
                status: status.as_u16(),
                detail,
            });
        }

        response
            .bytes()
            .await
            .map_err(|e| CollaboratorError::Transport(e.to_string()))
    }
}
