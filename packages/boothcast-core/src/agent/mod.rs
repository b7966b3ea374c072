//! Agent layer: collaborator boundaries, prompt assembly, and adaptive
//! session management for the LLM-backed stages.

pub mod context;
pub mod llm;
pub mod session;
pub mod tts;

use std::time::Duration;

use thiserror::Error;

pub use context::{ContextManager, GrowthTrend, PromptPayload};
pub use llm::{HttpLlmClient, LlmClient};
pub use session::{AgentSession, RefreshPolicy, RefreshTrigger, Role, SessionManager, SessionMessage, SessionSeed};
pub use tts::{voice_style_for, HttpTtsClient, TtsClient, VoiceStyle};

/// Errors from an external collaborator call (LLM, TTS).
///
/// Classification drives the retry kernel: transient errors are retried
/// with backoff, malformed output goes straight back to the stage layer
/// for its single repair retry.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    /// The call exceeded its per-attempt timeout.
    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    /// The collaborator answered with a non-success HTTP status.
    #[error("HTTP {status}: {detail}")]
    Http { status: u16, detail: String },

    /// Connection-level failure before a response arrived.
    #[error("transport error: {0}")]
    Transport(String),

    /// The collaborator responded, but not with the declared structure.
    #[error("malformed output: {0}")]
    Malformed(String),
}

impl CollaboratorError {
    /// Whether the retry kernel should retry this error.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Transport(_) => true,
            Self::Http { status, .. } => *status >= 500,
            Self::Malformed(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_are_transient_client_errors_are_not() {
        assert!(CollaboratorError::Http {
            status: 503,
            detail: String::new()
        }
        .is_transient());
        assert!(!CollaboratorError::Http {
            status: 400,
            detail: String::new()
        }
        .is_transient());
        assert!(CollaboratorError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(!CollaboratorError::Malformed("bad".into()).is_transient());
    }
}
