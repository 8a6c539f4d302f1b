//! Configuration types mapping to the TOML schema.
//!
//! Top-level config:
//! ```toml
//! [models]                 # role → "provider/model" bindings
//! [providers.openai]       # credentials and endpoints per provider
//! [server]                 # HTTP/WebSocket server settings
//! [tools]                  # tool deadlines and per-tool settings
//! [orchestrator]           # observer queue sizing, shutdown grace
//! [logging]                # log level and file output
//! ```

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use superagent_types::AgentRole;

use crate::{ConfigError, Result};

/// Built-in defaults shared by the config layer and its consumers.
pub mod defaults {
    pub const DEFAULT_MODEL: &str = "openai/gpt-4o-mini";
    pub const DEFAULT_PORT: u16 = 8000;
    pub const DEFAULT_BIND: &str = "127.0.0.1";
    pub const DEFAULT_CORS_ORIGIN: &str = "http://localhost:3000";
    pub const TOOL_DEADLINE_SECS: u64 = 30;
    pub const MAX_TOOL_DEADLINE_SECS: u64 = 600;
    pub const MAX_OUTPUT_BYTES: usize = 102_400;
    pub const CHANNEL_CAPACITY: usize = 1024;
    pub const SHUTDOWN_GRACE_SECS: u64 = 10;
    pub const SEARCH_MAX_RESULTS: usize = 5;
    pub const BROWSER_MAX_CHARS: usize = 20_000;
}

// ─────────────────────────────────────────────────────────────────────────────
// Top-level Config
// ─────────────────────────────────────────────────────────────────────────────

/// Root configuration structure.
///
/// All sections are optional so that partial configs (e.g. project-local
/// overrides) can be loaded and merged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SuperagentConfig {
    /// Model bindings per agent role.
    pub models: Option<ModelsConfig>,

    /// Provider credentials and endpoints, keyed by provider name.
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub providers: HashMap<String, ProviderConfig>,

    /// Server configuration.
    pub server: Option<ServerConfig>,

    /// Tool execution configuration.
    pub tools: Option<ToolsConfig>,

    /// Orchestrator tuning.
    pub orchestrator: Option<OrchestratorConfig>,

    /// Logging configuration.
    pub logging: Option<LoggingConfig>,
}

impl SuperagentConfig {
    /// Create an empty config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Merge another config on top of this one (other takes priority).
    ///
    /// Sections are replaced wholesale, except `[models]` which merges per
    /// role and `[providers.*]` which merges per provider.
    pub fn merge(&mut self, other: SuperagentConfig) {
        match (&mut self.models, other.models) {
            (Some(base), Some(layer)) => base.merge(layer),
            (slot @ None, Some(layer)) => *slot = Some(layer),
            _ => {}
        }

        for (name, provider) in other.providers {
            self.providers.insert(name, provider);
        }

        if other.server.is_some() {
            self.server = other.server;
        }

        if other.tools.is_some() {
            self.tools = other.tools;
        }

        if other.orchestrator.is_some() {
            self.orchestrator = other.orchestrator;
        }

        if other.logging.is_some() {
            self.logging = other.logging;
        }
    }

    /// Server settings, falling back to defaults.
    pub fn server(&self) -> ServerConfig {
        self.server.clone().unwrap_or_default()
    }

    /// Tool settings, falling back to defaults.
    pub fn tools(&self) -> ToolsConfig {
        self.tools.clone().unwrap_or_default()
    }

    /// Orchestrator settings, falling back to defaults.
    pub fn orchestrator(&self) -> OrchestratorConfig {
        self.orchestrator.clone().unwrap_or_default()
    }

    /// Logging settings, falling back to defaults.
    pub fn logging(&self) -> LoggingConfig {
        self.logging.clone().unwrap_or_default()
    }

    /// Validate cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        self.tools().deadline()?;
        let orchestrator = self.orchestrator();
        if orchestrator.channel_capacity == 0 {
            return Err(ConfigError::invalid(
                "orchestrator.channel_capacity",
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Models & Providers
// ─────────────────────────────────────────────────────────────────────────────

/// Model bindings in `provider/model` form.
///
/// ```toml
/// [models]
/// default = "openai/gpt-4o-mini"
/// planner = "anthropic/claude-3-5-sonnet-latest"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    pub default: Option<String>,
    pub assistant: Option<String>,
    pub planner: Option<String>,
    pub executor: Option<String>,
    pub critic: Option<String>,
}

impl ModelsConfig {
    /// The explicit binding for a role, if any.
    pub fn for_role(&self, role: AgentRole) -> Option<&str> {
        match role {
            AgentRole::Assistant => self.assistant.as_deref(),
            AgentRole::Planner => self.planner.as_deref(),
            AgentRole::Executor => self.executor.as_deref(),
            AgentRole::Critic => self.critic.as_deref(),
        }
    }

    fn merge(&mut self, other: ModelsConfig) {
        if other.default.is_some() {
            self.default = other.default;
        }
        if other.assistant.is_some() {
            self.assistant = other.assistant;
        }
        if other.planner.is_some() {
            self.planner = other.planner;
        }
        if other.executor.is_some() {
            self.executor = other.executor;
        }
        if other.critic.is_some() {
            self.critic = other.critic;
        }
    }
}

/// Credentials and endpoint for one model provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// API key (prefer the provider's environment variable).
    pub api_key: Option<String>,
    /// API base URL override.
    pub base_url: Option<String>,
    /// Maximum retry attempts for failed requests.
    pub retry_max: Option<u32>,
    /// Backoff delay between retries in milliseconds.
    pub retry_backoff_ms: Option<u64>,
    /// HTTP request timeout in seconds.
    pub timeout_secs: Option<u64>,
}

impl ProviderConfig {
    pub fn has_plaintext_api_key(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.is_empty())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Server Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Port to listen on.
    pub port: u16,
    /// Address to bind to.
    pub bind: String,
    /// Allowed CORS origins.
    pub cors_origins: Vec<String>,
    /// Shared bearer token for the API. `None` disables the check.
    pub auth_token: Option<String>,
    /// Enable request tracing.
    pub request_logging: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: defaults::DEFAULT_PORT,
            bind: defaults::DEFAULT_BIND.to_string(),
            cors_origins: vec![defaults::DEFAULT_CORS_ORIGIN.to_string()],
            auth_token: None,
            request_logging: true,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tools Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Tool execution configuration.
///
/// ```toml
/// [tools]
/// deadline_secs = 30
/// workspace_root = "data/workspaces"
///
/// [tools.browser]
/// headless = true
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Deadline applied to every tool invocation, in seconds.
    pub deadline_secs: u64,
    /// Upper bound any per-call deadline is clamped to.
    pub max_deadline_secs: u64,
    /// Directory under which per-caller workspaces are created.
    pub workspace_root: PathBuf,
    /// Maximum bytes of tool output kept before truncation.
    pub max_output_bytes: usize,
    pub code: CodeToolConfig,
    pub browser: BrowserToolConfig,
    pub search: SearchToolConfig,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            deadline_secs: defaults::TOOL_DEADLINE_SECS,
            max_deadline_secs: defaults::MAX_TOOL_DEADLINE_SECS,
            workspace_root: PathBuf::from("data").join("workspaces"),
            max_output_bytes: defaults::MAX_OUTPUT_BYTES,
            code: CodeToolConfig::default(),
            browser: BrowserToolConfig::default(),
            search: SearchToolConfig::default(),
        }
    }
}

impl ToolsConfig {
    /// The validated per-invocation deadline.
    pub fn deadline(&self) -> Result<Duration> {
        if self.deadline_secs == 0 {
            return Err(ConfigError::invalid(
                "tools.deadline_secs",
                "must be greater than zero",
            ));
        }
        if self.deadline_secs > self.max_deadline_secs {
            return Err(ConfigError::invalid(
                "tools.deadline_secs",
                format!("must not exceed max_deadline_secs ({})", self.max_deadline_secs),
            ));
        }
        Ok(Duration::from_secs(self.deadline_secs))
    }

    pub fn max_deadline(&self) -> Duration {
        Duration::from_secs(self.max_deadline_secs)
    }
}

/// Code execution tool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CodeToolConfig {
    /// Python interpreter program.
    pub python: String,
    /// Shell used for `bash`/`sh` code.
    pub shell: String,
    /// Extra environment variables passed through to executed code.
    pub env_passthrough: Vec<String>,
}

impl Default for CodeToolConfig {
    fn default() -> Self {
        Self {
            python: "python3".to_string(),
            shell: "bash".to_string(),
            env_passthrough: Vec::new(),
        }
    }
}

/// Browser tool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserToolConfig {
    /// Run the browser without a visible window.
    pub headless: bool,
    /// Explicit browser executable. Discovered on `PATH` when unset.
    pub executable: Option<PathBuf>,
    /// User agent for plain HTTP fetches.
    pub user_agent: String,
    /// Maximum characters of extracted page text.
    pub max_chars: usize,
}

impl Default for BrowserToolConfig {
    fn default() -> Self {
        Self {
            headless: true,
            executable: None,
            user_agent: concat!("superagent/", env!("CARGO_PKG_VERSION")).to_string(),
            max_chars: defaults::BROWSER_MAX_CHARS,
        }
    }
}

/// Search provider selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchProviderKind {
    Brave,
    Serper,
    Tavily,
    #[default]
    DuckDuckGo,
}

impl SearchProviderKind {
    /// Environment variable holding this provider's API key.
    pub fn env_var(&self) -> Option<&'static str> {
        match self {
            Self::Brave => Some("BRAVE_API_KEY"),
            Self::Serper => Some("SERPER_API_KEY"),
            Self::Tavily => Some("TAVILY_API_KEY"),
            Self::DuckDuckGo => None,
        }
    }
}

/// Web search tool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchToolConfig {
    pub provider: SearchProviderKind,
    pub api_key: Option<String>,
    pub max_results: usize,
}

impl Default for SearchToolConfig {
    fn default() -> Self {
        Self {
            provider: SearchProviderKind::default(),
            api_key: None,
            max_results: defaults::SEARCH_MAX_RESULTS,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Orchestrator & Logging
// ─────────────────────────────────────────────────────────────────────────────

/// Orchestrator tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Capacity of each observer's outbound queue.
    pub channel_capacity: usize,
    /// How long shutdown waits for cancelled runs to finish.
    pub shutdown_grace_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            channel_capacity: defaults::CHANNEL_CAPACITY,
            shutdown_grace_secs: defaults::SHUTDOWN_GRACE_SECS,
        }
    }
}

/// Logging configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Directory for rotated JSON log files. Defaults to the data dir.
    pub dir: Option<PathBuf>,
    /// Write the JSON file log at all.
    pub file: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: None,
            file: true,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let config = SuperagentConfig::from_toml(
            r#"
[models]
default = "openai/gpt-4o"
planner = "anthropic/claude-3-5-sonnet-latest"

[providers.local]
base_url = "http://localhost:1234/v1"

[server]
port = 9000
cors_origins = ["http://example.com"]

[tools]
deadline_secs = 12

[tools.browser]
headless = false

[tools.search]
provider = "brave"
max_results = 3

[orchestrator]
channel_capacity = 16
"#,
        )
        .unwrap();

        let models = config.models.as_ref().unwrap();
        assert_eq!(models.default.as_deref(), Some("openai/gpt-4o"));
        assert_eq!(
            models.for_role(AgentRole::Planner),
            Some("anthropic/claude-3-5-sonnet-latest")
        );
        assert_eq!(models.for_role(AgentRole::Critic), None);
        assert_eq!(
            config.providers["local"].base_url.as_deref(),
            Some("http://localhost:1234/v1")
        );
        assert_eq!(config.server().port, 9000);
        let tools = config.tools();
        assert_eq!(tools.deadline().unwrap(), Duration::from_secs(12));
        assert!(!tools.browser.headless);
        assert_eq!(tools.search.provider, SearchProviderKind::Brave);
        assert_eq!(tools.code.python, "python3");
        assert_eq!(config.orchestrator().channel_capacity, 16);
    }

    #[test]
    fn test_defaults_when_sections_missing() {
        let config = SuperagentConfig::from_toml("").unwrap();
        assert!(config.models.is_none());
        assert_eq!(config.server().port, defaults::DEFAULT_PORT);
        assert_eq!(config.server().bind, defaults::DEFAULT_BIND);
        assert_eq!(
            config.tools().deadline().unwrap(),
            Duration::from_secs(defaults::TOOL_DEADLINE_SECS)
        );
        assert!(config.tools().browser.headless);
        assert_eq!(config.logging().level, "info");
    }

    #[test]
    fn test_zero_deadline_rejected() {
        let config = SuperagentConfig::from_toml("[tools]\ndeadline_secs = 0\n").unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("tools.deadline_secs"));
    }

    #[test]
    fn test_deadline_above_max_rejected() {
        let tools = ToolsConfig {
            deadline_secs: 100,
            max_deadline_secs: 50,
            ..Default::default()
        };
        assert!(tools.deadline().is_err());
    }

    #[test]
    fn test_zero_channel_capacity_rejected() {
        let config =
            SuperagentConfig::from_toml("[orchestrator]\nchannel_capacity = 0\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_merge_models_per_role() {
        let mut base = SuperagentConfig::from_toml(
            r#"
[models]
default = "openai/gpt-4o-mini"
critic = "openai/gpt-4o"
"#,
        )
        .unwrap();
        let layer = SuperagentConfig::from_toml(
            r#"
[models]
planner = "local/qwen"
"#,
        )
        .unwrap();
        base.merge(layer);

        let models = base.models.unwrap();
        assert_eq!(models.default.as_deref(), Some("openai/gpt-4o-mini"));
        assert_eq!(models.critic.as_deref(), Some("openai/gpt-4o"));
        assert_eq!(models.planner.as_deref(), Some("local/qwen"));
    }

    #[test]
    fn test_merge_replaces_sections_and_merges_providers() {
        let mut base = SuperagentConfig::from_toml(
            r#"
[providers.openai]
base_url = "https://a.example"

[providers.anthropic]
retry_max = 2

[server]
port = 1
"#,
        )
        .unwrap();
        let layer = SuperagentConfig::from_toml(
            r#"
[providers.openai]
base_url = "https://b.example"

[server]
port = 2
"#,
        )
        .unwrap();
        base.merge(layer);

        assert_eq!(
            base.providers["openai"].base_url.as_deref(),
            Some("https://b.example")
        );
        assert_eq!(base.providers["anthropic"].retry_max, Some(2));
        assert_eq!(base.server().port, 2);
    }

    #[test]
    fn test_toml_roundtrip_keeps_values() {
        let mut config = SuperagentConfig::new();
        config.models = Some(ModelsConfig {
            default: Some("gemini/gemini-1.5-flash".into()),
            ..Default::default()
        });
        let text = config.to_toml().unwrap();
        let parsed = SuperagentConfig::from_toml(&text).unwrap();
        assert_eq!(parsed.models, config.models);
    }
}
