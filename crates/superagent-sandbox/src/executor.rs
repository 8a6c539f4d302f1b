//! The sandboxed tool executor.

use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use serde_json::json;
use superagent_types::{ToolDiagnostics, ToolErrorKind, ToolResult};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::capture::{Captured, StreamCapture};
use crate::config::SandboxConfig;
use crate::error::{SandboxError, SandboxResult};
use crate::operation::Operation;
use crate::scope::ExecutionScope;

/// Runs untrusted or long-running operations under a hard deadline.
///
/// Each call gets its own scratch directory and its own process group. When
/// the deadline passes or the token is cancelled, the whole group is killed
/// and the call returns promptly with whatever output was captured.
#[derive(Debug, Clone, Default)]
pub struct SandboxExecutor {
    config: SandboxConfig,
}

enum Outcome {
    Exited(std::io::Result<ExitStatus>),
    TimedOut,
    Cancelled,
}

impl SandboxExecutor {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Execute `operation`, bounded by `deadline` and `cancel`.
    ///
    /// Never fails: spawn problems, non-zero exits, timeouts and
    /// cancellation are all reported in the returned envelope.
    #[tracing::instrument(
        skip(self, operation, cancel),
        fields(op = %operation.label(), deadline_ms = deadline.as_millis() as u64)
    )]
    pub async fn execute(
        &self,
        operation: &Operation,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> ToolResult {
        let started = Instant::now();
        let result = match self.run(operation, deadline, cancel).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(error = %e, "Operation could not run");
                e.into_tool_result()
            }
        };
        result.with_duration(started.elapsed())
    }

    async fn run(
        &self,
        operation: &Operation,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> SandboxResult<ToolResult> {
        if deadline.is_zero() {
            return Err(SandboxError::InvalidOperation(
                "deadline must be greater than zero".to_string(),
            ));
        }
        if cancel.is_cancelled() {
            return Ok(ToolResult::cancelled());
        }

        let mut scope = ExecutionScope::create(self.config.scratch_root.as_deref())?;
        let mut command = self.build_command(operation, &scope).await?;

        let mut child = command.spawn().map_err(|source| SandboxError::Spawn {
            program: operation.label(),
            source,
        })?;

        let stdin_writer = match (child.stdin.take(), operation.stdin()) {
            (Some(mut pipe), Some(input)) => {
                let input = input.to_string();
                Some(tokio::spawn(async move {
                    let _ = pipe.write_all(input.as_bytes()).await;
                    let _ = pipe.shutdown().await;
                }))
            }
            _ => None,
        };
        let stdout = StreamCapture::spawn(child.stdout.take(), self.config.max_output_bytes);
        let stderr = StreamCapture::spawn(child.stderr.take(), self.config.max_output_bytes);
        scope.attach(child);
        let pid = scope.pid();
        tracing::debug!(pid = ?pid, "Process started");

        let outcome = tokio::select! {
            status = scope.wait() => Outcome::Exited(status),
            _ = tokio::time::sleep(deadline) => Outcome::TimedOut,
            _ = cancel.cancelled() => Outcome::Cancelled,
        };

        if !matches!(outcome, Outcome::Exited(_)) {
            scope.terminate(self.config.kill_grace).await;
        }
        scope.release().await;
        if let Some(writer) = stdin_writer {
            writer.abort();
        }

        let stdout = stdout.finish(self.config.drain_timeout).await;
        let stderr = stderr.finish(self.config.drain_timeout).await;

        Ok(build_result(outcome, deadline, pid, stdout, stderr))
    }

    async fn build_command(
        &self,
        operation: &Operation,
        scope: &ExecutionScope,
    ) -> SandboxResult<Command> {
        let dir = scope.dir();

        let (program, args, extra_env) = match operation {
            Operation::Command {
                program, args, env, ..
            } => (program.clone(), args.clone(), env.clone()),
            Operation::Script {
                language, source, ..
            } => {
                let path = dir.join(language.file_name());
                tokio::fs::write(&path, source).await?;
                (
                    language.interpreter(&self.config).to_string(),
                    vec![path.to_string_lossy().into_owned()],
                    Vec::new(),
                )
            }
        };

        let resolved = which::which(&program)
            .map_err(|_| SandboxError::ProgramNotFound(program.clone()))?;

        let mut command = Command::new(resolved);
        command
            .args(&args)
            .current_dir(dir)
            .env_clear()
            .stdin(if operation.stdin().is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        for name in &self.config.env_allowlist {
            if let Ok(value) = std::env::var(name) {
                command.env(name, value);
            }
        }
        command.env("HOME", dir).env("TMPDIR", dir);
        for (key, value) in self.config.env_vars.iter().chain(extra_env.iter()) {
            command.env(key, value);
        }

        #[cfg(unix)]
        command.process_group(0);

        Ok(command)
    }
}

fn build_result(
    outcome: Outcome,
    deadline: Duration,
    pid: Option<u32>,
    stdout: Captured,
    stderr: Captured,
) -> ToolResult {
    let truncated = stdout.truncated || stderr.truncated;

    match outcome {
        Outcome::Exited(Ok(status)) if status.success() => ToolResult::data(json!({
            "stdout": stdout.text,
            "stderr": stderr.text,
            "exit_code": status.code().unwrap_or(0),
        }))
        .with_diagnostics(ToolDiagnostics {
            exit_code: status.code(),
            pid,
            truncated,
            ..Default::default()
        }),
        Outcome::Exited(Ok(status)) => {
            let message = match status.code() {
                Some(code) => format!("process exited with status {code}"),
                None => "process terminated by signal".to_string(),
            };
            ToolResult::error(ToolErrorKind::Execution, message).with_diagnostics(
                ToolDiagnostics {
                    stdout: Some(stdout.text),
                    stderr: Some(stderr.text),
                    exit_code: status.code(),
                    pid,
                    truncated,
                    ..Default::default()
                },
            )
        }
        Outcome::Exited(Err(e)) => {
            ToolResult::error(ToolErrorKind::Internal, format!("failed to wait for process: {e}"))
                .with_diagnostics(ToolDiagnostics {
                    pid,
                    ..Default::default()
                })
        }
        Outcome::TimedOut => {
            tracing::warn!(
                pid = ?pid,
                deadline_ms = deadline.as_millis() as u64,
                "Operation exceeded deadline; process group killed"
            );
            ToolResult::timeout(deadline).with_diagnostics(ToolDiagnostics {
                stdout: Some(stdout.text),
                stderr: Some(stderr.text),
                pid,
                truncated,
                ..Default::default()
            })
        }
        Outcome::Cancelled => {
            tracing::debug!(pid = ?pid, "Operation cancelled; process group killed");
            ToolResult::cancelled().with_diagnostics(ToolDiagnostics {
                stdout: Some(stdout.text),
                stderr: Some(stderr.text),
                pid,
                truncated,
                ..Default::default()
            })
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
