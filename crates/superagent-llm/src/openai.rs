//! OpenAI-compatible chat completions backend.
//!
//! Serves the `openai` provider directly, `gemini` through Google's
//! OpenAI-compatible endpoint, and `local` through any server that speaks the
//! same protocol (LM Studio, vLLM, Ollama).

use async_trait::async_trait;
use reqwest::{Client, Response, header};
use std::time::Duration;

use crate::backend::{ModelHandle, with_retry};
use crate::error::{LlmError, RateLimitInfo, Result};
use crate::types::{Completion, CompletionRequest, Usage};

/// Default OpenAI API base URL.
pub const DEFAULT_OPENAI_BASE: &str = "https://api.openai.com/v1";

/// Google's OpenAI-compatible Gemini endpoint.
pub const DEFAULT_GEMINI_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/openai";

/// Default base URL for a local model server.
pub const DEFAULT_LOCAL_BASE: &str = "http://localhost:1234/v1";

const DEFAULT_TIMEOUT_SECS: u64 = 300;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration for the OpenAI-compatible backend.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// API key (optional for local servers).
    pub api_key: Option<String>,

    pub base_url: String,

    /// Model name sent with every request.
    pub model: String,

    pub timeout: Duration,

    /// Maximum retries for transient errors.
    pub max_retries: u32,

    /// Initial backoff duration for retries.
    pub retry_backoff: Duration,

    /// Provider name reported by the handle.
    pub name: String,
}

impl OpenAiConfig {
    fn base(name: &str, base_url: &str, api_key: Option<String>, model: String) -> Self {
        Self {
            api_key,
            base_url: base_url.to_string(),
            model,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_retries: 3,
            retry_backoff: Duration::from_millis(500),
            name: name.to_string(),
        }
    }

    pub fn openai(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self::base("openai", DEFAULT_OPENAI_BASE, Some(api_key.into()), model.into())
    }

    pub fn gemini(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self::base("gemini", DEFAULT_GEMINI_BASE, Some(api_key.into()), model.into())
    }

    /// A local server; the key is optional.
    pub fn local(model: impl Into<String>) -> Self {
        let mut config = Self::base("local", DEFAULT_LOCAL_BASE, None, model.into());
        config.timeout = Duration::from_secs(600);
        config
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// OpenAI Backend
// ─────────────────────────────────────────────────────────────────────────────

/// OpenAI-compatible API backend.
pub struct OpenAiBackend {
    client: Client,
    config: OpenAiConfig,
}

impl OpenAiBackend {
    pub fn new(config: OpenAiConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &OpenAiConfig {
        &self.config
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.config.base_url)
    }

    fn add_headers(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let builder = builder.header(header::CONTENT_TYPE, "application/json");

        if let Some(ref api_key) = self.config.api_key {
            builder.header(header::AUTHORIZATION, format!("Bearer {}", api_key))
        } else {
            builder
        }
    }

    fn to_openai_request(&self, request: &CompletionRequest) -> OpenAiChatRequest {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);

        if let Some(ref system) = request.system {
            messages.push(OpenAiMessage {
                role: "system".to_string(),
                content: system.clone(),
            });
        }
        messages.extend(request.messages.iter().map(|m| OpenAiMessage {
            role: m.role.as_str().to_string(),
            content: m.content.clone(),
        }));

        OpenAiChatRequest {
            model: self.config.model.clone(),
            messages,
            max_tokens: Some(request.max_tokens),
            temperature: request.temperature,
        }
    }

    async fn handle_response(response: Response) -> Result<Completion> {
        if !response.status().is_success() {
            return Err(Self::handle_error_response(response).await);
        }

        let body = response.text().await?;
        let parsed: OpenAiChatResponse =
            serde_json::from_str(&body).map_err(|e| LlmError::Serialization(e.to_string()))?;

        parsed.try_into()
    }

    async fn handle_error_response(response: Response) -> LlmError {
        let status = response.status();
        let retry_after = response
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let body = response.text().await.unwrap_or_default();

        let message = serde_json::from_str::<OpenAiErrorResponse>(&body)
            .map(|e| e.error.message)
            .unwrap_or_else(|_| format!("HTTP {}: {}", status, body));

        match status.as_u16() {
            401 | 403 => LlmError::Auth(format!("Authentication failed: {}", message)),
            429 => LlmError::RateLimit(RateLimitInfo::from_response(
                &message,
                retry_after.as_deref(),
            )),
            500..=599 => LlmError::Backend(format!("Server error: {}", message)),
            _ => LlmError::Backend(message),
        }
    }
}

#[async_trait]
impl ModelHandle for OpenAiBackend {
    fn provider(&self) -> &str {
        &self.config.name
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    async fn complete(&self, request: CompletionRequest) -> Result<Completion> {
        let openai_request = self.to_openai_request(&request);

        tracing::debug!(
            backend = %self.config.name,
            model = %openai_request.model,
            messages = openai_request.messages.len(),
            "Sending OpenAI-compatible request"
        );

        with_retry(
            self.config.max_retries,
            self.config.retry_backoff,
            &self.config.name,
            || async {
                let response = self
                    .add_headers(self.client.post(self.completions_url()))
                    .json(&openai_request)
                    .send()
                    .await?;

                Self::handle_response(response).await
            },
        )
        .await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// OpenAI API Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, serde::Serialize)]
struct OpenAiChatRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, serde::Serialize)]
struct OpenAiMessage {
    role: String,
    content: String,
}

#[derive(Debug, serde::Deserialize)]
struct OpenAiChatResponse {
    choices: Vec<OpenAiChoice>,
    #[serde(default)]
    model: String,
    usage: Option<OpenAiUsage>,
}

impl TryFrom<OpenAiChatResponse> for Completion {
    type Error = LlmError;

    fn try_from(resp: OpenAiChatResponse) -> Result<Self> {
        let choice = resp
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::Backend("response contained no choices".to_string()))?;
        let usage = resp
            .usage
            .map(|u| Usage::new(u.prompt_tokens, u.completion_tokens))
            .unwrap_or_default();

        Ok(Completion {
            text: choice.message.content.unwrap_or_default(),
            model: resp.model,
            usage,
            finish_reason: choice.finish_reason,
        })
    }
}

#[derive(Debug, serde::Deserialize)]
struct OpenAiChoice {
    message: OpenAiResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct OpenAiResponseMessage {
    content: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Debug, serde::Deserialize)]
struct OpenAiErrorResponse {
    error: OpenAiError,
}

#[derive(Debug, serde::Deserialize)]
struct OpenAiError {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChatMessage;

    #[test]
    fn test_config_presets() {
        let openai = OpenAiConfig::openai("sk-test", "gpt-4o-mini");
        assert_eq!(openai.base_url, DEFAULT_OPENAI_BASE);
        assert_eq!(openai.name, "openai");

        let gemini = OpenAiConfig::gemini("g-key", "gemini-1.5-flash");
        assert_eq!(gemini.base_url, DEFAULT_GEMINI_BASE);

        let local = OpenAiConfig::local("llama3").with_base_url("http://127.0.0.1:8080/v1/");
        assert!(local.api_key.is_none());
        assert_eq!(local.base_url, "http://127.0.0.1:8080/v1");
    }

    #[test]
    fn test_request_conversion_puts_system_first() {
        let backend = OpenAiBackend::new(OpenAiConfig::openai("k", "gpt-4o-mini")).unwrap();
        let request = CompletionRequest::new(vec![
            ChatMessage::user("hi"),
            ChatMessage::assistant("hello"),
        ])
        .with_system("be terse")
        .with_temperature(0.2);

        let wire = serde_json::to_value(backend.to_openai_request(&request)).unwrap();
        assert_eq!(wire["model"], "gpt-4o-mini");
        assert_eq!(wire["messages"][0]["role"], "system");
        assert_eq!(wire["messages"][1]["role"], "user");
        assert_eq!(wire["messages"][2]["role"], "assistant");
        assert!((wire["temperature"].as_f64().unwrap() - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_response_conversion() {
        let body = r#"{
            "id": "chatcmpl-1",
            "model": "gpt-4o-mini",
            "choices": [{"message": {"role": "assistant", "content": "Hi there"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 9, "completion_tokens": 3}
        }"#;
        let parsed: OpenAiChatResponse = serde_json::from_str(body).unwrap();
        let completion = Completion::try_from(parsed).unwrap();
        assert_eq!(completion.text, "Hi there");
        assert_eq!(completion.usage, Usage::new(9, 3));
        assert_eq!(completion.finish_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn test_empty_choices_is_error() {
        let parsed: OpenAiChatResponse =
            serde_json::from_str(r#"{"model": "m", "choices": []}"#).unwrap();
        assert!(Completion::try_from(parsed).is_err());
    }

    #[test]
    fn test_handle_identity() {
        let backend = OpenAiBackend::new(OpenAiConfig::local("qwen2")).unwrap();
        assert_eq!(backend.describe(), "local/qwen2");
        assert_eq!(backend.completions_url(), "http://localhost:1234/v1/chat/completions");
    }
}
