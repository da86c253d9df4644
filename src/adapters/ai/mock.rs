//! Mock AI provider for tests and local development.
//!
//! Responses are queued up front and consumed in order; each successful
//! response is streamed one character at a time with a configurable delay,
//! which gives cancellation tests a window to fire in. When the queue is
//! empty the provider echoes a canned reply.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::ports::{AiChunk, AiError, AiProvider, AiRequest, AiStream};

/// Mock error types for injection.
#[derive(Debug, Clone)]
pub enum MockAiError {
    RateLimited { retry_after_secs: u32 },
    Unavailable { message: String },
    AuthenticationFailed,
    Network { message: String },
    Timeout { timeout_secs: u32 },
}

impl From<MockAiError> for AiError {
    fn from(err: MockAiError) -> Self {
        match err {
            MockAiError::RateLimited { retry_after_secs } => AiError::rate_limited(retry_after_secs),
            MockAiError::Unavailable { message } => AiError::unavailable(message),
            MockAiError::AuthenticationFailed => AiError::AuthenticationFailed,
            MockAiError::Network { message } => AiError::network(message),
            MockAiError::Timeout { timeout_secs } => AiError::Timeout { timeout_secs },
        }
    }
}

#[derive(Debug, Clone)]
enum Scripted {
    Reply(String),
    Fail(MockAiError),
}

/// Scriptable mock provider.
#[derive(Debug, Clone, Default)]
pub struct MockAiProvider {
    script: Arc<Mutex<VecDeque<Scripted>>>,
    /// Requests seen, for verification in tests.
    requests: Arc<Mutex<Vec<AiRequest>>>,
    chunk_delay: Duration,
}

impl MockAiProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a reply streamed char by char.
    pub fn with_reply(self, content: impl Into<String>) -> Self {
        self.script
            .lock()
            .unwrap()
            .push_back(Scripted::Reply(content.into()));
        self
    }

    /// Queues an error returned when the stream is opened.
    pub fn with_error(self, error: MockAiError) -> Self {
        self.script.lock().unwrap().push_back(Scripted::Fail(error));
        self
    }

    /// Delay between streamed characters.
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }

    /// Requests the provider has served so far.
    pub fn seen_requests(&self) -> Vec<AiRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl AiProvider for MockAiProvider {
    async fn stream(
        &self,
        request: AiRequest,
        cancel: CancellationToken,
    ) -> Result<AiStream, AiError> {
        self.requests.lock().unwrap().push(request);

        let next = self.script.lock().unwrap().pop_front();
        let content = match next {
            Some(Scripted::Fail(err)) => return Err(err.into()),
            Some(Scripted::Reply(content)) => content,
            None => "ok".to_string(),
        };

        let delay = self.chunk_delay;
        let total: u32 = content.chars().count() as u32;
        let chunks: Vec<Result<AiChunk, AiError>> = content
            .chars()
            .map(|c| Ok(AiChunk::delta(c.to_string())))
            .chain(std::iter::once(Ok(AiChunk::final_chunk(total))))
            .collect();

        let stream = stream::iter(chunks)
            .then(move |chunk| async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                chunk
            })
            .take_until(cancel.cancelled_owned());

        Ok(Box::pin(stream))
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
