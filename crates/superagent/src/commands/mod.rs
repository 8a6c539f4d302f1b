//! CLI command handlers.

pub mod config;
pub mod run;
pub mod start;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use superagent_agent::{
    DefaultToolset, Orchestrator, OrchestratorDeps, OrchestratorOptions, PlanExecuteEngine,
};
use superagent_config::{LoadedConfig, SuperagentConfig};
use superagent_config::discovery::ConfigSource;
use superagent_llm::{ProviderResolver, RoleBindings};

/// Shared context for all commands.
#[derive(Debug)]
pub struct Context {
    /// Merged configuration and where it came from.
    pub loaded: LoadedConfig,
    /// Output as JSON for scripting.
    pub json_output: bool,
    /// Verbose output enabled.
    pub verbose: bool,
}

impl Context {
    pub fn config(&self) -> &SuperagentConfig {
        &self.loaded.config
    }
}

/// Load configuration, either from an explicit file or by discovery.
pub fn load(explicit: Option<&Path>) -> Result<LoadedConfig> {
    let Some(path) = explicit else {
        return Ok(superagent_config::load_config(None)?);
    };

    let config = superagent_config::load_config_file(path)
        .with_context(|| format!("loading {}", path.display()))?;
    Ok(LoadedConfig {
        config,
        sources: vec![ConfigSource {
            path: path.to_path_buf(),
            loaded: true,
        }],
        warnings: Vec::new(),
    })
}

/// Wire the orchestrator from configuration: plan-execute engine, provider
/// resolver, per-role bindings and the default tool set.
pub fn build_orchestrator(config: &SuperagentConfig) -> Result<Orchestrator> {
    config.validate().context("invalid configuration")?;

    let options = OrchestratorOptions::from_config(config)?;
    let toolset = DefaultToolset::from_config(&config.tools())?;
    let bindings = RoleBindings::from_config(config);

    tracing::info!(
        assistant = %bindings.assistant,
        planner = %bindings.planner,
        executor = %bindings.executor,
        critic = %bindings.critic,
        tool_deadline_secs = options.tool_deadline.as_secs(),
        "Orchestrator configured"
    );

    Ok(Orchestrator::new(
        options,
        OrchestratorDeps {
            engine: Arc::new(PlanExecuteEngine::new()),
            resolver: Arc::new(ProviderResolver::new(Arc::new(config.clone()))),
            bindings,
            toolsets: Arc::new(toolset),
        },
    ))
}
