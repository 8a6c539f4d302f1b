//! Executor configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the [`SandboxExecutor`](crate::SandboxExecutor).
///
/// Deliberately carries no deadline: every call supplies its own.
///
/// # Environment
///
/// Processes start from an empty environment. Only variables named in
/// `env_allowlist` are copied from the server's environment, then
/// `env_vars`, then the operation's own variables. `HOME` and `TMPDIR`
/// always point at the call's scratch directory.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Parent directory for per-call scratch directories. System temp dir when `None`.
    pub scratch_root: Option<PathBuf>,

    /// Variables copied from the parent environment.
    pub env_allowlist: Vec<String>,

    /// Variables set on every process.
    pub env_vars: Vec<(String, String)>,

    /// Maximum bytes captured per output stream.
    pub max_output_bytes: usize,

    /// Time between SIGTERM and SIGKILL when terminating a process group.
    pub kill_grace: Duration,

    /// How long to wait for output readers after the process is gone.
    pub drain_timeout: Duration,

    /// Interpreter for Python scripts.
    pub python: String,

    /// Interpreter for Bash scripts.
    pub shell: String,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            scratch_root: None,
            env_allowlist: Self::default_env_allowlist(),
            env_vars: Vec::new(),
            max_output_bytes: 100 * 1024,
            kill_grace: Duration::from_millis(200),
            drain_timeout: Duration::from_millis(500),
            python: "python3".to_string(),
            shell: "bash".to_string(),
        }
    }
}

impl SandboxConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_scratch_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_root = Some(dir.into());
        self
    }

    pub fn with_env_allowlist(mut self, names: Vec<String>) -> Self {
        self.env_allowlist = names;
        self
    }

    pub fn allow_env(mut self, name: impl Into<String>) -> Self {
        self.env_allowlist.push(name.into());
        self
    }

    pub fn add_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.push((key.into(), value.into()));
        self
    }

    pub fn with_max_output_bytes(mut self, bytes: usize) -> Self {
        self.max_output_bytes = bytes;
        self
    }

    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    pub fn with_python(mut self, program: impl Into<String>) -> Self {
        self.python = program.into();
        self
    }

    pub fn with_shell(mut self, program: impl Into<String>) -> Self {
        self.shell = program.into();
        self
    }

    /// Variables copied from the parent environment by default.
    pub fn default_env_allowlist() -> Vec<String> {
        ["PATH", "LANG", "LC_ALL", "TZ", "TERM"]
            .into_iter()
            .map(String::from)
            .collect()
    }
}
