//! Per-caller tool set resolution.
//!
//! Every run gets its own [`ToolRegistry`] built for the caller that started
//! it: the browser's headless flag and the file tools' workspace directory
//! depend on who is asking. Resolution is pure; nothing touches the
//! filesystem until a tool runs.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use superagent_config::ToolsConfig;
use superagent_sandbox::{SandboxConfig, SandboxExecutor};

use crate::error::{AgentError, Result};
use crate::tool::{OutputConfig, ToolRegistry};
use crate::tools::{
    BrowserTool, CodeExecutionTool, FileListTool, FileReadTool, FileWriteTool, SearchProvider,
    WebSearchTool, Workspace, discover_browser,
};

/// Workspace directory name used for callers without a user id.
pub const ANONYMOUS_WORKSPACE: &str = "anonymous";

/// Who is starting a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallerContext {
    /// Caller identity. `None` for anonymous callers.
    pub user_id: Option<String>,
    /// Overrides the configured browser headless flag.
    pub headless: Option<bool>,
}

impl CallerContext {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            headless: None,
        }
    }

    pub fn with_headless(mut self, headless: bool) -> Self {
        self.headless = Some(headless);
        self
    }

    /// Directory name for this caller's workspace.
    ///
    /// Anything but ASCII alphanumerics, `-` and `_` is replaced with `_`, so
    /// a user id can never name a path outside the workspace root.
    pub fn workspace_name(&self) -> String {
        let sanitized: String = self
            .user_id
            .as_deref()
            .unwrap_or_default()
            .trim()
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        if sanitized.is_empty() || sanitized.chars().all(|c| c == '_') {
            ANONYMOUS_WORKSPACE.to_string()
        } else {
            sanitized
        }
    }
}

/// Builds the tool set for a caller.
pub trait ToolsetResolver: Send + Sync {
    fn resolve(&self, caller: &CallerContext) -> ToolRegistry;
}

impl<F> ToolsetResolver for F
where
    F: Fn(&CallerContext) -> ToolRegistry + Send + Sync,
{
    fn resolve(&self, caller: &CallerContext) -> ToolRegistry {
        self(caller)
    }
}

/// The standard tool set: `browser`, `web_search`, `code_execution`,
/// `file_read`, `file_write` and `file_list`.
#[derive(Debug, Clone)]
pub struct DefaultToolset {
    client: Client,
    executor: Arc<SandboxExecutor>,
    search: SearchProvider,
    search_max_results: usize,
    browser_executable: Option<PathBuf>,
    headless: bool,
    browser_max_chars: usize,
    workspace_root: PathBuf,
    output: OutputConfig,
}

impl DefaultToolset {
    /// Build from configuration. Looks up the search key and the browser
    /// executable once, here.
    pub fn from_config(config: &ToolsConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.browser.user_agent)
            .timeout(config.max_deadline())
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AgentError::Config(format!("Failed to build HTTP client: {e}")))?;

        let mut sandbox = SandboxConfig::default()
            .with_max_output_bytes(config.max_output_bytes)
            .with_python(config.code.python.clone())
            .with_shell(config.code.shell.clone());
        for name in &config.code.env_passthrough {
            sandbox = sandbox.allow_env(name.clone());
        }

        let browser_executable = config.browser.executable.clone().or_else(discover_browser);
        match &browser_executable {
            Some(path) => tracing::info!(
                browser = %path.display(),
                "Browser tool renders with local browser"
            ),
            None => tracing::info!("No browser executable found; browser tool uses HTTP fetch"),
        }

        Ok(Self {
            client,
            executor: Arc::new(SandboxExecutor::new(sandbox)),
            search: SearchProvider::from_config(&config.search),
            search_max_results: config.search.max_results,
            browser_executable,
            headless: config.browser.headless,
            browser_max_chars: config.browser.max_chars,
            workspace_root: config.workspace_root.clone(),
            output: OutputConfig::with_max_size(config.max_output_bytes),
        })
    }

    /// Replace the sandbox executor (tests use a scratch root).
    pub fn with_executor(mut self, executor: Arc<SandboxExecutor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn workspace_for(&self, caller: &CallerContext) -> Workspace {
        Workspace::new(self.workspace_root.join(caller.workspace_name()))
    }
}

impl ToolsetResolver for DefaultToolset {
    fn resolve(&self, caller: &CallerContext) -> ToolRegistry {
        let workspace = self.workspace_for(caller);
        let headless = caller.headless.unwrap_or(self.headless);

        let mut registry = ToolRegistry::new().with_output_config(self.output.clone());
        registry.register(
            BrowserTool::new(
                self.client.clone(),
                Arc::clone(&self.executor),
                self.browser_max_chars,
            )
            .with_executable(self.browser_executable.clone())
            .with_headless(headless),
        );
        registry.register(WebSearchTool::new(
            self.client.clone(),
            self.search.clone(),
            self.search_max_results,
        ));
        registry.register(CodeExecutionTool::new(Arc::clone(&self.executor)));
        registry.register(FileReadTool::new(workspace.clone()));
        registry.register(FileWriteTool::new(workspace.clone()));
        registry.register(FileListTool::new(workspace));
        registry
    }
}
