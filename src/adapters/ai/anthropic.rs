//! Anthropic provider - streaming implementation of the `AiProvider` port.
//!
//! Speaks the Messages API with SSE streaming. Events arrive as `event:` /
//! `data:` line pairs; `content_block_delta` carries text, `message_delta`
//! carries the final usage. The SSE parser buffers across network chunk
//! boundaries, since a frame may be split between reads.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use reqwest::{Client, Response};
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::ports::{AiChunk, AiError, AiProvider, AiRequest, AiStream, TurnRole};

/// Anthropic API version header value.
const ANTHROPIC_API_VERSION: &str = "2023-06-01";

/// Configuration for the Anthropic provider.
#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    api_key: Secret<String>,
    /// Model to use.
    pub model: String,
    /// Base URL for the API.
    pub base_url: String,
    /// Request timeout (connect + headers; the body streams beyond it).
    pub timeout: Duration,
    /// Default max tokens when the request does not set one.
    pub max_tokens: u32,
}

impl AnthropicConfig {
    /// Creates a new configuration with the given API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: Secret::new(api_key.into()),
            model: "claude-sonnet-4-20250514".to_string(),
            base_url: "https://api.anthropic.com".to_string(),
            timeout: Duration::from_secs(30),
            max_tokens: 1024,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    fn api_key(&self) -> &str {
        self.api_key.expose_secret()
    }
}

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ContentBlockDelta {
    delta: TextDelta,
}

#[derive(Debug, Deserialize)]
struct TextDelta {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageDelta {
    #[serde(default)]
    usage: Option<DeltaUsage>,
}

#[derive(Debug, Deserialize)]
struct DeltaUsage {
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct SseError {
    error: SseErrorBody,
}

#[derive(Debug, Deserialize)]
struct SseErrorBody {
    message: String,
}

/// Anthropic Messages API provider.
pub struct AnthropicProvider {
    config: AnthropicConfig,
    client: Client,
}

impl AnthropicProvider {
    pub fn new(config: AnthropicConfig) -> Self {
        let client = Client::builder()
            .connect_timeout(config.timeout)
            .build()
            .expect("Failed to create HTTP client");

        Self { config, client }
    }

    fn messages_url(&self) -> String {
        format!("{}/v1/messages", self.config.base_url)
    }

    fn to_anthropic_request(&self, request: &AiRequest) -> AnthropicRequest {
        let messages = request
            .messages
            .iter()
            .map(|m| AnthropicMessage {
                role: match m.role {
                    TurnRole::User => "user",
                    TurnRole::Assistant => "assistant",
                },
                content: m.content.clone(),
            })
            .collect();

        AnthropicRequest {
            model: self.config.model.clone(),
            messages,
            system: request.system_prompt.clone(),
            max_tokens: request.max_tokens.unwrap_or(self.config.max_tokens),
            stream: true,
        }
    }

    async fn handle_response_status(&self, response: Response) -> Result<Response, AiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let error_body = response.text().await.unwrap_or_default();
        match status.as_u16() {
            401 => Err(AiError::AuthenticationFailed),
            429 => Err(AiError::rate_limited(60)),
            400 => Err(AiError::InvalidRequest(error_body)),
            500..=599 => Err(AiError::unavailable(format!(
                "Server error {}: {}",
                status, error_body
            ))),
            _ => Err(AiError::network(format!(
                "Unexpected status {}: {}",
                status, error_body
            ))),
        }
    }
}

#[async_trait]
impl AiProvider for AnthropicProvider {
    async fn stream(
        &self,
        request: AiRequest,
        cancel: CancellationToken,
    ) -> Result<AiStream, AiError> {
        if request.messages.is_empty() {
            return Err(AiError::InvalidRequest("empty message history".into()));
        }

        let body = self.to_anthropic_request(&request);
        let response = self
            .client
            .post(self.messages_url())
            .header("x-api-key", self.config.api_key())
            .header("anthropic-version", ANTHROPIC_API_VERSION)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AiError::Timeout {
                        timeout_secs: self.config.timeout.as_secs() as u32,
                    }
                } else {
                    AiError::network(e.to_string())
                }
            })?;
        let response = self.handle_response_status(response).await?;

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| AiError::network(format!("Stream error: {}", e))))
            .take_until(cancel.cancelled_owned())
            .scan(SseParser::default(), |parser, chunk| {
                let out = match chunk {
                    Ok(bytes) => parser.feed(&String::from_utf8_lossy(&bytes)),
                    Err(e) => vec![Err(e)],
                };
                futures::future::ready(Some(out))
            })
            .flat_map(stream::iter);

        Ok(Box::pin(stream))
    }

    fn name(&self) -> &'static str {
        "anthropic"
    }
}

/// Incremental parser for Anthropic's SSE framing.
#[derive(Default)]
struct SseParser {
    buffer: String,
    current_event: String,
}

impl SseParser {
    /// Feeds raw text, returning chunks for every complete line consumed.
    fn feed(&mut self, text: &str) -> Vec<Result<AiChunk, AiError>> {
        self.buffer.push_str(text);
        let mut results = Vec::new();

        while let Some(newline) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=newline).collect();
            let line = line.trim_end();

            if let Some(event_type) = line.strip_prefix("event: ") {
                self.current_event = event_type.to_string();
            } else if let Some(data) = line.strip_prefix("data: ") {
                match self.current_event.as_str() {
                    "content_block_delta" => {
                        if let Ok(delta) = serde_json::from_str::<ContentBlockDelta>(data) {
                            if let Some(text) = delta.delta.text {
                                if !text.is_empty() {
                                    results.push(Ok(AiChunk::delta(text)));
                                }
                            }
                        }
                    }
                    "message_delta" => {
                        if let Ok(delta) = serde_json::from_str::<MessageDelta>(data) {
                            if let Some(usage) = delta.usage {
                                results.push(Ok(AiChunk::final_chunk(usage.output_tokens)));
                            }
                        }
                    }
                    "error" => {
                        let message = serde_json::from_str::<SseError>(data)
                            .map(|e| e.error.message)
                            .unwrap_or_else(|_| data.to_string());
                        results.push(Err(AiError::unavailable(message)));
                    }
                    // ping, message_start, content_block_start/stop
                    _ => {}
                }
            }
        }

        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::TurnMessage;

    #[test]
    fn sse_parser_extracts_text_deltas() {
        let mut parser = SseParser::default();
        let chunks = parser.feed(
            "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"delta\":{\"type\":\"text_delta\",\"text\":\"Hello\"}}\n",
        );
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].as_ref().unwrap().delta, "Hello");
    }

    #[test]
    fn sse_parser_buffers_across_chunk_boundaries() {
        let mut parser = SseParser::default();
        let first = parser.feed("event: content_block_delta\ndata: {\"delta\":{\"te");
        assert!(first.is_empty());
        let second = parser.feed("xt\":\"ok\"}}\n");
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].as_ref().unwrap().delta, "ok");
    }

    #[test]
    fn sse_parser_reports_final_usage() {
        let mut parser = SseParser::default();
        let chunks = parser.feed(
            "event: message_delta\ndata: {\"delta\":{\"stop_reason\":\"end_turn\"},\"usage\":{\"output_tokens\":42}}\n",
        );
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].as_ref().unwrap().completion_tokens, Some(42));
    }

    #[test]
    fn sse_parser_surfaces_error_events() {
        let mut parser = SseParser::default();
        let chunks = parser
            .feed("event: error\ndata: {\"error\":{\"type\":\"overloaded\",\"message\":\"busy\"}}\n");
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].is_err());
    }

    #[test]
    fn request_maps_roles_and_system_prompt() {
        let provider = AnthropicProvider::new(AnthropicConfig::new("key"));
        let request = AiRequest::new(vec![
            TurnMessage::user("hi"),
            TurnMessage::assistant("hello"),
        ])
        .with_system_prompt("be brief");

        let body = provider.to_anthropic_request(&request);
        assert_eq!(body.messages[0].role, "user");
        assert_eq!(body.messages[1].role, "assistant");
        assert_eq!(body.system.as_deref(), Some("be brief"));
        assert!(body.stream);
    }

    #[tokio::test]
    async fn empty_history_is_rejected() {
        let provider = AnthropicProvider::new(AnthropicConfig::new("key"));
        let result = provider
            .stream(AiRequest::default(), CancellationToken::new())
            .await;
        assert!(matches!(result, Err(AiError::InvalidRequest(_))));
    }
}
