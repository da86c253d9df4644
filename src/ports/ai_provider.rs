//! AiProvider port - streaming completion provider for AI turns.
//!
//! The core hands the adapter the ordered, non-deleted message history of a
//! conversation plus the optional system prompt, and consumes a stream of
//! text chunks until completion, error, or cancellation. Context assembly
//! beyond that (truncation, prompt shaping) is the adapter's business.

use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Role of one turn in the provider conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnRole {
    User,
    Assistant,
}

/// One turn of context handed to the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnMessage {
    pub role: TurnRole,
    pub content: String,
}

impl TurnMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Assistant,
            content: content.into(),
        }
    }
}

/// A completion request: ordered history plus steering prompt.
#[derive(Debug, Clone, Default)]
pub struct AiRequest {
    pub messages: Vec<TurnMessage>,
    pub system_prompt: Option<String>,
    pub max_tokens: Option<u32>,
}

impl AiRequest {
    pub fn new(messages: Vec<TurnMessage>) -> Self {
        Self {
            messages,
            system_prompt: None,
            max_tokens: None,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }
}

/// A streamed piece of the completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AiChunk {
    /// New text in this chunk.
    pub delta: String,
    /// Completion token count, reported by providers that know it; present
    /// only on the final chunk.
    pub completion_tokens: Option<u32>,
}

impl AiChunk {
    pub fn delta(text: impl Into<String>) -> Self {
        Self {
            delta: text.into(),
            completion_tokens: None,
        }
    }

    pub fn final_chunk(completion_tokens: u32) -> Self {
        Self {
            delta: String::new(),
            completion_tokens: Some(completion_tokens),
        }
    }
}

/// The stream of chunks produced by a provider.
pub type AiStream = Pin<Box<dyn Stream<Item = Result<AiChunk, AiError>> + Send>>;

/// AI provider errors.
#[derive(Debug, Error)]
pub enum AiError {
    /// Rate limited by the provider.
    #[error("rate limited: retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u32 },

    /// Provider is unavailable.
    #[error("provider unavailable: {message}")]
    Unavailable { message: String },

    /// API key or authentication failed.
    #[error("authentication failed")]
    AuthenticationFailed,

    /// Network error during request or mid-stream.
    #[error("network error: {0}")]
    Network(String),

    /// Failed to parse a provider response frame.
    #[error("parse error: {0}")]
    Parse(String),

    /// Invalid request configuration.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Request or idle-read timed out.
    #[error("timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u32 },

    /// The stream was aborted through the cancellation token.
    #[error("cancelled")]
    Cancelled,
}

impl AiError {
    pub fn rate_limited(retry_after_secs: u32) -> Self {
        Self::RateLimited { retry_after_secs }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::Network(message.into())
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse(message.into())
    }

    /// Returns true if this error is retryable from the caller's side.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AiError::RateLimited { .. }
                | AiError::Unavailable { .. }
                | AiError::Network(_)
                | AiError::Timeout { .. }
        )
    }
}

/// Port for AI/LLM provider interactions.
#[async_trait]
pub trait AiProvider: Send + Sync {
    /// Opens a streaming completion. The adapter must stop producing chunks
    /// within two seconds of `cancel` firing, yielding `AiError::Cancelled`
    /// or simply ending the stream.
    async fn stream(
        &self,
        request: AiRequest,
        cancel: CancellationToken,
    ) -> Result<AiStream, AiError>;

    /// Short provider name for logs ("anthropic", "mock").
    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_builder_sets_fields() {
        let req = AiRequest::new(vec![TurnMessage::user("hi")])
            .with_system_prompt("be terse")
            .with_max_tokens(64);
        assert_eq!(req.messages.len(), 1);
        assert_eq!(req.system_prompt.as_deref(), Some("be terse"));
        assert_eq!(req.max_tokens, Some(64));
    }

    #[test]
    fn final_chunk_carries_usage_only() {
        let c = AiChunk::final_chunk(17);
        assert!(c.delta.is_empty());
        assert_eq!(c.completion_tokens, Some(17));
    }

    #[test]
    fn retryable_classification() {
        assert!(AiError::rate_limited(5).is_retryable());
        assert!(AiError::network("reset").is_retryable());
        assert!(AiError::Timeout { timeout_secs: 30 }.is_retryable());
        assert!(!AiError::AuthenticationFailed.is_retryable());
        assert!(!AiError::Cancelled.is_retryable());
    }
}
