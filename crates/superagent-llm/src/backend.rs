//! The model handle abstraction and its test double.
//!
//! Every provider backend implements [`ModelHandle`]. The agent only ever
//! holds a [`SharedModel`], so roles can be bound to different providers
//! without the reasoning code knowing which.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{LlmError, Result, is_retryable};
use crate::types::{Completion, CompletionRequest};

// ─────────────────────────────────────────────────────────────────────────────
// Shared Retry Logic
// ─────────────────────────────────────────────────────────────────────────────

/// Execute an async operation with exponential backoff retry.
///
/// Retries only on transient errors (network failures, rate limits). A
/// provider-supplied `Retry-After` overrides the computed backoff.
pub async fn with_retry<F, Fut, T>(
    max_retries: u32,
    initial_backoff: Duration,
    backend_name: &str,
    mut f: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut backoff = initial_backoff;
    let mut attempt = 0;

    loop {
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) if !is_retryable(&e) || attempt >= max_retries => return Err(e),
            Err(e) => {
                let wait = e.retry_after().unwrap_or(backoff);
                attempt += 1;
                tracing::warn!(
                    backend = backend_name,
                    attempt,
                    max_retries,
                    backoff_ms = wait.as_millis() as u64,
                    error = %e,
                    "Request failed, retrying"
                );
                tokio::time::sleep(wait).await;
                backoff *= 2;
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ModelHandle Trait
// ─────────────────────────────────────────────────────────────────────────────

/// A resolved model that can produce completions.
#[async_trait]
pub trait ModelHandle: Send + Sync {
    /// Provider name (`openai`, `anthropic`, `gemini`, `local`, ...).
    fn provider(&self) -> &str;

    /// Model name as sent to the provider.
    fn model(&self) -> &str;

    /// Run one completion.
    async fn complete(&self, request: CompletionRequest) -> Result<Completion>;

    /// `provider/model`, for logs.
    fn describe(&self) -> String {
        format!("{}/{}", self.provider(), self.model())
    }
}

/// Type alias for a shared model handle.
pub type SharedModel = Arc<dyn ModelHandle>;

// ─────────────────────────────────────────────────────────────────────────────
// Mock Model (for testing)
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(any(test, feature = "testing"))]
pub use mock::{MockModel, MockReply};

#[cfg(any(test, feature = "testing"))]
mod mock {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    type Responder = Box<dyn Fn(&CompletionRequest) -> Result<String> + Send + Sync>;

    /// A scripted reply.
    #[derive(Debug, Clone)]
    pub enum MockReply {
        Text(String),
        /// Fail the call with `LlmError::Backend`.
        Fail(String),
    }

    /// Scripted model for tests.
    ///
    /// Replies are returned in order. When the script runs out, the fallback
    /// (if any) is returned for every further call; otherwise the call fails.
    pub struct MockModel {
        name: String,
        script: Mutex<VecDeque<MockReply>>,
        fallback: Option<String>,
        responder: Option<Responder>,
        delay: Option<Duration>,
        request_log: Mutex<Vec<CompletionRequest>>,
    }

    impl MockModel {
        /// Create a mock with scripted text replies.
        pub fn new<I, S>(replies: I) -> Self
        where
            I: IntoIterator<Item = S>,
            S: Into<String>,
        {
            Self::scripted(replies.into_iter().map(|r| MockReply::Text(r.into())))
        }

        /// Create a mock from mixed text/failure replies.
        pub fn scripted(replies: impl IntoIterator<Item = MockReply>) -> Self {
            Self {
                name: "mock-model".to_string(),
                script: Mutex::new(replies.into_iter().collect()),
                fallback: None,
                responder: None,
                delay: None,
                request_log: Mutex::new(Vec::new()),
            }
        }

        /// A mock that answers every call with `text`.
        pub fn with_text(text: impl Into<String>) -> Self {
            Self::scripted(Vec::new()).with_fallback(text)
        }

        /// A mock that computes each reply from the request.
        pub fn with_responder<F>(responder: F) -> Self
        where
            F: Fn(&CompletionRequest) -> Result<String> + Send + Sync + 'static,
        {
            let mut mock = Self::scripted(Vec::new());
            mock.responder = Some(Box::new(responder));
            mock
        }

        /// A mock whose every call fails.
        pub fn failing(message: impl Into<String>) -> Self {
            let message = message.into();
            Self::with_responder(move |_| Err(LlmError::Backend(message.clone())))
        }

        pub fn with_fallback(mut self, text: impl Into<String>) -> Self {
            self.fallback = Some(text.into());
            self
        }

        /// Sleep before answering each call.
        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        pub fn with_name(mut self, name: impl Into<String>) -> Self {
            self.name = name.into();
            self
        }

        /// Get all requests that were made to this model.
        pub fn requests(&self) -> Vec<CompletionRequest> {
            self.request_log.lock().clone()
        }

        pub fn request_count(&self) -> usize {
            self.request_log.lock().len()
        }

        fn next_reply(&self, request: &CompletionRequest) -> Result<String> {
            if let Some(reply) = self.script.lock().pop_front() {
                return match reply {
                    MockReply::Text(text) => Ok(text),
                    MockReply::Fail(message) => Err(LlmError::Backend(message)),
                };
            }
            if let Some(responder) = &self.responder {
                return responder(request);
            }
            self.fallback.clone().ok_or_else(|| {
                LlmError::Backend("MockModel: no more responses available".to_string())
            })
        }
    }

    #[async_trait]
    impl ModelHandle for MockModel {
        fn provider(&self) -> &str {
            "mock"
        }

        fn model(&self) -> &str {
            &self.name
        }

        async fn complete(&self, request: CompletionRequest) -> Result<Completion> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let reply = self.next_reply(&request);
            self.request_log.lock().push(request);
            reply.map(|text| Completion::new(self.name.clone(), text))
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
