//! LLM collaborator boundary for the Analyze and Narrate stages.
//!
//! The collaborator receives (system prompt, session log, user message) and
//! returns a single text response; extracting the declared structured
//! payload is the stage layer's job. A response that is not the declared
//! structure is an error, not a degraded success.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::agent::session::{Role, SessionMessage};
use crate::agent::CollaboratorError;

/// Text-completion collaborator for the two LLM-backed stages.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Runs one completion over the session's conversation.
    async fn complete(
        &self,
        system_prompt: &str,
        session_log: &[SessionMessage],
        user_message: &str,
    ) -> Result<String, CollaboratorError>;
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    system: &'a str,
    messages: Vec<WireMessage<'a>>,
    user: &'a str,
}

#[derive(Deserialize)]
struct CompletionResponse {
    text: String,
}

/// HTTP adapter for a generic JSON completion endpoint.
///
/// Uses the shared pooled client from bootstrap; per-call timeouts are
/// applied by the retry kernel, not here.
pub struct HttpLlmClient {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpLlmClient {
    #[must_use]
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn complete(
        &self,
        system_prompt: &str,
        session_log: &[SessionMessage],
        user_message: &str,
    ) -> Result<String, CollaboratorError> {
        let request = CompletionRequest {
            system: system_prompt,
            messages: session_log
                .iter()
                .map(|m| WireMessage {
                    role: match m.role {
                        Role::System => "system",
                        Role::User => "user",
                        Role::Assistant => "assistant",
                    },
                    content: &m.content,
                })
                .collect(),
            user: user_message,
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

        let body: CompletionResponse = response
            .json()
            .await
            .map_err(|e| CollaboratorError::Malformed(format!("completion envelope: {}", e)))?;

        Ok(body.text)
    }
}
