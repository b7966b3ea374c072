//! Scripted collaborator fakes shared across stage and pipeline tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use crate::agent::session::SessionMessage;
use crate::agent::tts::VoiceStyle;
use crate::agent::{CollaboratorError, LlmClient, TtsClient};
use crate::audio::wav::build_wav;
use crate::protocol_constants::{AUDIO_BITS_PER_SAMPLE, AUDIO_SAMPLE_RATE};

/// LLM fake that replays a script of canned results.
///
/// Once the script runs dry it keeps returning the last entry's clone, so
/// open-ended tests don't need to count calls exactly.
pub struct ScriptedLlm {
    script: Mutex<VecDeque<Result<String, String>>>,
    calls: AtomicUsize,
    last: Mutex<Option<String>>,
}

impl ScriptedLlm {
    pub fn new(script: Vec<Result<&str, &str>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(
                script
                    .into_iter()
                    .map(|r| r.map(str::to_string).map_err(str::to_string))
                    .collect(),
            ),
            calls: AtomicUsize::new(0),
            last: Mutex::new(None),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(
        &self,
        _system_prompt: &str,
        _session_log: &[SessionMessage],
        _user_message: &str,
    ) -> Result<String, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().pop_front();
        match next {
            Some(Ok(text)) => {
                *self.last.lock() = Some(text.clone());
                Ok(text)
            }
            Some(Err(msg)) => Err(CollaboratorError::Transport(msg)),
            None => match self.last.lock().clone() {
                Some(text) => Ok(text),
                None => Err(CollaboratorError::Transport("script exhausted".into())),
            },
        }
    }
}

/// TTS fake that renders valid pipeline-format WAVs of a fixed duration.
pub struct ScriptedTts {
    /// Failures to inject before succeeding, per call order.
    failures: Mutex<VecDeque<CollaboratorError>>,
    pub duration_seconds: f32,
    calls: AtomicUsize,
}

impl ScriptedTts {
    pub fn ok(duration_seconds: f32) -> Arc<Self> {
        Arc::new(Self {
            failures: Mutex::new(VecDeque::new()),
            duration_seconds,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing_first(duration_seconds: f32, failures: Vec<CollaboratorError>) -> Arc<Self> {
        Arc::new(Self {
            failures: Mutex::new(failures.into()),
            duration_seconds,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn render(&self) -> Bytes {
        let bytes_per_second = AUDIO_SAMPLE_RATE * (AUDIO_BITS_PER_SAMPLE as u32 / 8);
        let len = (bytes_per_second as f32 * self.duration_seconds) as usize;
        // Even length keeps whole 16-bit samples.
        build_wav(&vec![0u8; len & !1])
    }
}

#[async_trait]
impl TtsClient for ScriptedTts {
    async fn synthesize(
        &self,
        _text: &str,
        _voice_style: VoiceStyle,
        _language: &str,
    ) -> Result<Bytes, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.failures.lock().pop_front() {
            return Err(err);
        }
        Ok(self.render())
    }
}

/// TTS fake that always returns bytes that are not a WAV.
pub struct GarbageTts;

#[async_trait]
impl TtsClient for GarbageTts {
    async fn synthesize(
        &self,
        _text: &str,
        _voice_style: VoiceStyle,
        _language: &str,
    ) -> Result<Bytes, CollaboratorError> {
        Ok(Bytes::from_static(b"definitely not audio"))
    }
}
