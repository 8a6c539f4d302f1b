//! API key lookup for model and search providers.
//!
//! Resolution order:
//! 1. Environment variable
//! 2. Config file (with warning at load time)

/// Result of API key resolution with provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSecret {
    /// The secret value.
    pub value: String,
    /// Where the secret was found.
    pub source: SecretSource,
}

/// Where a secret was resolved from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretSource {
    /// Environment variable.
    EnvVar(String),
    /// Config file (plaintext, not recommended).
    ConfigFile,
}

impl std::fmt::Display for SecretSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SecretSource::EnvVar(var) => write!(f, "env var {}", var),
            SecretSource::ConfigFile => write!(f, "config file (plaintext)"),
        }
    }
}

/// Environment variable holding the API key for a model provider.
pub fn provider_env_var(provider: &str) -> Option<&'static str> {
    match provider {
        "openai" => Some("OPENAI_API_KEY"),
        "anthropic" => Some("ANTHROPIC_API_KEY"),
        "gemini" => Some("GOOGLE_API_KEY"),
        "local" => Some("LOCAL_MODEL_API_KEY"),
        _ => None,
    }
}

/// Environment variable overriding a provider's base URL.
pub fn provider_base_url_env_var(provider: &str) -> Option<&'static str> {
    match provider {
        "local" => Some("LOCAL_MODEL_API_BASE"),
        "openai" => Some("OPENAI_API_BASE"),
        _ => None,
    }
}

/// Resolve a secret from an environment variable, then the config value.
pub fn resolve_secret(env_var: Option<&str>, config_value: Option<&str>) -> Option<ResolvedSecret> {
    if let Some(var) = env_var
        && let Ok(value) = std::env::var(var)
        && !value.is_empty()
    {
        return Some(ResolvedSecret {
            value,
            source: SecretSource::EnvVar(var.to_string()),
        });
    }

    config_value
        .filter(|v| !v.is_empty())
        .map(|v| ResolvedSecret {
            value: v.to_string(),
            source: SecretSource::ConfigFile,
        })
}

/// Resolve an API key for a model provider.
pub fn resolve_api_key(provider: &str, config_value: Option<&str>) -> Option<ResolvedSecret> {
    resolve_secret(provider_env_var(provider), config_value)
}

/// Mask a secret for display, keeping a short prefix.
pub fn mask(secret: &str) -> String {
    let prefix: String = secret.chars().take(4).collect();
    if secret.chars().count() <= 8 {
        "****".to_string()
    } else {
        format!("{prefix}****")
    }
}
