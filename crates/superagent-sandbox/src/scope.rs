//! Scoped ownership of one execution's process group and scratch directory.

use std::io;
use std::path::Path;
use std::process::ExitStatus;
use std::time::Duration;

use tempfile::TempDir;
use tokio::process::Child;

use crate::error::{SandboxError, SandboxResult};

/// Owns everything one call creates: the scratch directory, the child
/// process, and the process group the child leads.
///
/// [`release`](Self::release) performs the cleanup obligation: kill whatever
/// is left of the process group, reap the child, remove the scratch
/// directory. If the scope is dropped without being released (the owning
/// future was dropped, or a panic unwound through it), `Drop` kills the group
/// and the `TempDir` removes itself. Either way cleanup happens exactly once.
pub(crate) struct ExecutionScope {
    scratch: Option<TempDir>,
    child: Option<Child>,
    pid: Option<u32>,
    released: bool,
}

impl ExecutionScope {
    pub(crate) fn create(root: Option<&Path>) -> SandboxResult<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("superagent-exec-");
        let dir = match root {
            Some(root) => {
                std::fs::create_dir_all(root).map_err(SandboxError::Workspace)?;
                builder.tempdir_in(root)
            }
            None => builder.tempdir(),
        }
        .map_err(SandboxError::Workspace)?;

        Ok(Self {
            scratch: Some(dir),
            child: None,
            pid: None,
            released: false,
        })
    }

    pub(crate) fn dir(&self) -> &Path {
        self.scratch
            .as_ref()
            .map_or_else(|| Path::new("."), |dir| dir.path())
    }

    pub(crate) fn attach(&mut self, child: Child) {
        self.pid = child.id();
        self.child = Some(child);
    }

    pub(crate) fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub(crate) async fn wait(&mut self) -> io::Result<ExitStatus> {
        match self.child.as_mut() {
            Some(child) => child.wait().await,
            None => Err(io::Error::other("no process attached to scope")),
        }
    }

    /// Stop the process group: SIGTERM, up to `grace` for the leader to exit,
    /// then SIGKILL, then reap the leader.
    pub(crate) async fn terminate(&mut self, grace: Duration) {
        signal_group(self.pid, false);

        let Some(child) = self.child.as_mut() else {
            return;
        };
        if !grace.is_zero() && tokio::time::timeout(grace, child.wait()).await.is_ok() {
            signal_group(self.pid, true);
            return;
        }

        signal_group(self.pid, true);
        if let Err(e) = child.kill().await {
            tracing::debug!(pid = ?self.pid, error = %e, "kill after SIGKILL to group");
        }
    }

    /// Run the cleanup obligation and consume the scope.
    pub(crate) async fn release(mut self) {
        signal_group(self.pid, true);

        if let Some(mut child) = self.child.take()
            && matches!(child.try_wait(), Ok(None))
            && let Err(e) = child.kill().await
        {
            tracing::warn!(pid = ?self.pid, error = %e, "Failed to reap child process");
        }

        if let Some(dir) = self.scratch.take() {
            let path = dir.path().to_path_buf();
            if let Err(e) = dir.close() {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Failed to remove scratch directory"
                );
            }
        }

        self.released = true;
    }
}

impl Drop for ExecutionScope {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        tracing::debug!(
            pid = ?self.pid,
            "Execution scope dropped before release; killing process group"
        );
        signal_group(self.pid, true);
        if let Some(child) = self.child.as_mut() {
            let _ = child.start_kill();
        }
    }
}

/// Signal the process group led by `pid`. Errors (typically ESRCH once the
/// group is gone) are ignored.
#[cfg(unix)]
fn signal_group(pid: Option<u32>, force: bool) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Some(pgid) = pid.and_then(|p| i32::try_from(p).ok()) else {
        return;
    };
    let signal = if force { Signal::SIGKILL } else { Signal::SIGTERM };
    let _ = killpg(Pid::from_raw(pgid), signal);
}

#[cfg(not(unix))]
fn signal_group(_pid: Option<u32>, _force: bool) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_release_removes_scratch_dir() {
        let root = tempfile::tempdir().unwrap();
        let scope = ExecutionScope::create(Some(root.path())).unwrap();
        let dir = scope.dir().to_path_buf();
        assert!(dir.is_dir());
        assert!(dir.starts_with(root.path()));

        scope.release().await;
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn test_drop_removes_scratch_dir() {
        let scope = ExecutionScope::create(None).unwrap();
        let dir = scope.dir().to_path_buf();
        std::fs::write(dir.join("file.txt"), "data").unwrap();
        drop(scope);
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn test_wait_without_child_errors() {
        let mut scope = ExecutionScope::create(None).unwrap();
        assert!(scope.wait().await.is_err());
        assert!(scope.pid().is_none());
        scope.release().await;
    }
}
