//! Code execution tool backed by the sandboxed executor.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use superagent_sandbox::{Language, Operation, SandboxExecutor};
use superagent_types::ToolResult;

use crate::error::{AgentError, Result};
use crate::tool::{CodeExecutionParams, Tool, ToolContext};

/// Runs Python or shell code in a scratch directory under a hard deadline.
///
/// The effective deadline is the smaller of the caller's `timeout_secs` and
/// the invocation's own deadline.
#[derive(Debug, Clone)]
pub struct CodeExecutionTool {
    executor: Arc<SandboxExecutor>,
}

impl CodeExecutionTool {
    pub fn new(executor: Arc<SandboxExecutor>) -> Self {
        Self { executor }
    }

    fn effective_deadline(requested: Option<u64>, ctx: &ToolContext) -> Duration {
        requested
            .map(Duration::from_secs)
            .map_or(ctx.deadline, |d| d.min(ctx.deadline))
    }
}

#[async_trait]
impl Tool for CodeExecutionTool {
    fn name(&self) -> &str {
        "code_execution"
    }

    fn description(&self) -> &str {
        "Execute Python, bash or sh code in an isolated scratch directory. \
         Returns stdout, stderr and the exit code."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "language": {
                    "type": "string",
                    "enum": ["python", "bash", "sh"],
                    "description": "Language of the code (default: python)"
                },
                "code": {
                    "type": "string",
                    "description": "The source code to run"
                },
                "timeout_secs": {
                    "type": "integer",
                    "description": "Optional time limit in seconds; capped by the server's tool deadline"
                }
            },
            "required": ["code"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<ToolResult> {
        let params = CodeExecutionParams::try_from(params)?;
        let language: Language = params
            .language
            .parse()
            .map_err(|e: superagent_sandbox::SandboxError| AgentError::invalid_params(e.to_string()))?;

        let deadline = Self::effective_deadline(params.timeout_secs, ctx);
        tracing::debug!(%language, deadline_ms = deadline.as_millis() as u64, "Executing code");

        let operation = Operation::script(language, params.code);
        Ok(self
            .executor
            .execute(&operation, deadline, &ctx.cancellation)
            .await)
    }
}
