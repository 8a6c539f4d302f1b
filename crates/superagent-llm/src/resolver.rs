//! Turning `provider/model` strings into live model handles.
//!
//! A spec without a provider prefix is an OpenAI model. Unknown providers
//! and missing credentials are reported as errors and never replaced by a
//! different model.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use superagent_config::{ResolvedProvider, SuperagentConfig, resolve_provider, resolve_role_model, secrets};
use superagent_types::AgentRole;

use crate::anthropic::{AnthropicBackend, AnthropicConfig};
use crate::backend::SharedModel;
use crate::error::{LlmError, Result};
use crate::openai::{OpenAiBackend, OpenAiConfig};

// ─────────────────────────────────────────────────────────────────────────────
// Model Spec
// ─────────────────────────────────────────────────────────────────────────────

/// A provider we know how to reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    OpenAi,
    Anthropic,
    Gemini,
    Local,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Anthropic => "anthropic",
            Provider::Gemini => "gemini",
            Provider::Local => "local",
        }
    }

    /// Whether calls to this provider need an API key.
    pub fn requires_api_key(&self) -> bool {
        !matches!(self, Provider::Local)
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = LlmError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Provider::OpenAi),
            "anthropic" => Ok(Provider::Anthropic),
            "gemini" | "google" => Ok(Provider::Gemini),
            "local" => Ok(Provider::Local),
            _ => Err(LlmError::UnsupportedProvider(s.trim().to_string())),
        }
    }
}

/// A parsed `provider/model` string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub provider: Provider,
    pub model: String,
}

impl ModelSpec {
    /// Parse `provider/model`, or a bare model name (OpenAI).
    ///
    /// Only the first `/` separates the provider, so local model paths such
    /// as `local/meta-llama/Llama-3-8B` keep their slashes.
    pub fn parse(spec: &str) -> Result<Self> {
        let spec = spec.trim();
        let (provider, model) = match spec.split_once('/') {
            Some((provider, model)) => (provider.parse()?, model.trim()),
            None => (Provider::OpenAi, spec),
        };
        if model.is_empty() {
            return Err(LlmError::Config(format!("model spec '{}' names no model", spec)));
        }
        Ok(Self {
            provider,
            model: model.to_string(),
        })
    }
}

impl fmt::Display for ModelSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.provider, self.model)
    }
}

impl FromStr for ModelSpec {
    type Err = LlmError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Role bindings
// ─────────────────────────────────────────────────────────────────────────────

/// The model spec bound to each agent role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleBindings {
    pub assistant: String,
    pub planner: String,
    pub executor: String,
    pub critic: String,
}

impl RoleBindings {
    /// Every role bound to the same spec.
    pub fn uniform(spec: impl Into<String>) -> Self {
        let spec = spec.into();
        Self {
            assistant: spec.clone(),
            planner: spec.clone(),
            executor: spec.clone(),
            critic: spec,
        }
    }

    pub fn from_config(config: &SuperagentConfig) -> Self {
        let spec = |role| resolve_role_model(config, role).spec;
        Self {
            assistant: spec(AgentRole::Assistant),
            planner: spec(AgentRole::Planner),
            executor: spec(AgentRole::Executor),
            critic: spec(AgentRole::Critic),
        }
    }

    pub fn get(&self, role: AgentRole) -> &str {
        match role {
            AgentRole::Assistant => &self.assistant,
            AgentRole::Planner => &self.planner,
            AgentRole::Executor => &self.executor,
            AgentRole::Critic => &self.critic,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Resolvers
// ─────────────────────────────────────────────────────────────────────────────

/// Resolves a model spec to a handle.
pub trait ModelResolver: Send + Sync {
    fn resolve(&self, spec: &str) -> Result<SharedModel>;
}

/// Shared resolver type.
pub type SharedResolver = Arc<dyn ModelResolver>;

/// Resolver backed by provider settings from configuration and the
/// environment.
#[derive(Debug, Clone)]
pub struct ProviderResolver {
    config: Arc<SuperagentConfig>,
}

impl ProviderResolver {
    pub fn new(config: Arc<SuperagentConfig>) -> Self {
        Self { config }
    }

    fn required_key(provider: Provider, resolved: &ResolvedProvider) -> Result<String> {
        resolved.api_key.clone().ok_or_else(|| {
            let env_var = secrets::provider_env_var(provider.as_str()).unwrap_or("API key");
            LlmError::missing_credential(provider.as_str(), env_var)
        })
    }

    fn build(&self, spec: &ModelSpec) -> Result<SharedModel> {
        let resolved = resolve_provider(&self.config, spec.provider.as_str());
        let timeout = resolved.timeout_secs.map(Duration::from_secs);
        let backoff = resolved.retry_backoff_ms.map(Duration::from_millis);

        if spec.provider == Provider::Anthropic {
            let key = Self::required_key(spec.provider, &resolved)?;
            let mut config = AnthropicConfig::new(key, spec.model.clone());
            if let Some(url) = resolved.base_url {
                config = config.with_base_url(url);
            }
            if let Some(timeout) = timeout {
                config = config.with_timeout(timeout);
            }
            if let Some(retries) = resolved.retry_max {
                config = config.with_max_retries(retries);
            }
            if let Some(backoff) = backoff {
                config = config.with_retry_backoff(backoff);
            }
            return Ok(Arc::new(AnthropicBackend::new(config)?));
        }

        let mut config = match spec.provider {
            Provider::OpenAi => {
                OpenAiConfig::openai(Self::required_key(spec.provider, &resolved)?, spec.model.clone())
            }
            Provider::Gemini => {
                OpenAiConfig::gemini(Self::required_key(spec.provider, &resolved)?, spec.model.clone())
            }
            _ => {
                let mut config = OpenAiConfig::local(spec.model.clone());
                if let Some(key) = resolved.api_key.clone() {
                    config = config.with_api_key(key);
                }
                config
            }
        };
        if let Some(url) = resolved.base_url {
            config = config.with_base_url(url);
        }
        if let Some(timeout) = timeout {
            config = config.with_timeout(timeout);
        }
        if let Some(retries) = resolved.retry_max {
            config = config.with_max_retries(retries);
        }
        if let Some(backoff) = backoff {
            config = config.with_retry_backoff(backoff);
        }
        Ok(Arc::new(OpenAiBackend::new(config)?))
    }
}

impl ModelResolver for ProviderResolver {
    fn resolve(&self, spec: &str) -> Result<SharedModel> {
        let parsed = ModelSpec::parse(spec)?;
        let model = self.build(&parsed)?;
        tracing::debug!(spec = %parsed, "Resolved model handle");
        Ok(model)
    }
}

#[cfg(any(test, feature = "testing"))]
pub use fixed::FixedResolver;

#[cfg(any(test, feature = "testing"))]
mod fixed {
    use super::*;
    use std::collections::HashMap;

    /// Test resolver handing out pre-built handles.
    ///
    /// Specs are still parsed, so unknown providers fail the same way they
    /// do in production.
    #[derive(Default, Clone)]
    pub struct FixedResolver {
        default: Option<SharedModel>,
        by_spec: HashMap<String, SharedModel>,
    }

    impl FixedResolver {
        /// Resolve every spec to `model`.
        pub fn new(model: SharedModel) -> Self {
            Self {
                default: Some(model),
                by_spec: HashMap::new(),
            }
        }

        /// Resolve `spec` to `model`.
        pub fn with(mut self, spec: impl Into<String>, model: SharedModel) -> Self {
            self.by_spec.insert(spec.into(), model);
            self
        }
    }

    impl ModelResolver for FixedResolver {
        fn resolve(&self, spec: &str) -> Result<SharedModel> {
            let parsed = ModelSpec::parse(spec)?;
            self.by_spec
                .get(spec)
                .or(self.default.as_ref())
                .cloned()
                .ok_or_else(|| LlmError::missing_credential(parsed.provider.as_str(), "TEST_KEY"))
        }
    }
}
