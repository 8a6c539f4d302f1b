//! Resolution of role model bindings and provider settings.
//!
//! Takes a [`SuperagentConfig`] and answers two questions: which
//! `provider/model` string a role uses, and which credentials and endpoint a
//! provider is reached with.

use superagent_types::AgentRole;

use crate::secrets::{self, SecretSource};
use crate::types::defaults;
use crate::SuperagentConfig;

/// Tracks how a role's model binding was resolved for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedFrom {
    /// `[models].<role>`
    RoleSpecific(AgentRole),
    /// `[models].default`
    ConfiguredDefault,
    /// Nothing configured; built-in default.
    BuiltIn,
}

impl std::fmt::Display for ResolvedFrom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolvedFrom::RoleSpecific(role) => write!(f, "models.{}", role),
            ResolvedFrom::ConfiguredDefault => write!(f, "models.default"),
            ResolvedFrom::BuiltIn => write!(f, "built-in default"),
        }
    }
}

/// A role's model binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedModel {
    pub role: AgentRole,
    /// Model spec in `provider/model` form (provider optional).
    pub spec: String,
    pub resolved_from: ResolvedFrom,
}

/// Resolve the model binding for a role: role-specific → default → built-in.
pub fn resolve_role_model(config: &SuperagentConfig, role: AgentRole) -> ResolvedModel {
    let models = config.models.as_ref();

    if let Some(spec) = models.and_then(|m| m.for_role(role)) {
        return ResolvedModel {
            role,
            spec: spec.to_string(),
            resolved_from: ResolvedFrom::RoleSpecific(role),
        };
    }

    if let Some(spec) = models.and_then(|m| m.default.as_deref()) {
        return ResolvedModel {
            role,
            spec: spec.to_string(),
            resolved_from: ResolvedFrom::ConfiguredDefault,
        };
    }

    ResolvedModel {
        role,
        spec: defaults::DEFAULT_MODEL.to_string(),
        resolved_from: ResolvedFrom::BuiltIn,
    }
}

/// Credentials and endpoint for one provider.
#[derive(Debug, Clone, Default)]
pub struct ResolvedProvider {
    pub name: String,
    pub api_key: Option<String>,
    pub api_key_source: Option<SecretSource>,
    pub base_url: Option<String>,
    pub retry_max: Option<u32>,
    pub retry_backoff_ms: Option<u64>,
    pub timeout_secs: Option<u64>,
}

/// Resolve a provider's settings.
///
/// Missing credentials are not an error here; the model layer decides
/// whether a provider requires a key.
pub fn resolve_provider(config: &SuperagentConfig, provider: &str) -> ResolvedProvider {
    let section = config.providers.get(provider);

    let secret = secrets::resolve_api_key(provider, section.and_then(|p| p.api_key.as_deref()));
    let (api_key, api_key_source) = match secret {
        Some(s) => (Some(s.value), Some(s.source)),
        None => (None, None),
    };

    let base_url = secrets::resolve_secret(
        secrets::provider_base_url_env_var(provider),
        section.and_then(|p| p.base_url.as_deref()),
    )
    .map(|s| s.value);

    ResolvedProvider {
        name: provider.to_string(),
        api_key,
        api_key_source,
        base_url,
        retry_max: section.and_then(|p| p.retry_max),
        retry_backoff_ms: section.and_then(|p| p.retry_backoff_ms),
        timeout_secs: section.and_then(|p| p.timeout_secs),
    }
}
