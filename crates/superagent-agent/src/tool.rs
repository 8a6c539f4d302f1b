//! Tool framework for agent capabilities.
//!
//! This module defines the [`Tool`] trait every built-in tool implements and
//! the [`ToolRegistry`] that dispatches invocations by name.
//!
//! The registry is the boundary between tools and the rest of the system:
//! [`ToolRegistry::invoke`] always returns a [`ToolResult`] envelope, whatever
//! the tool did. Unknown names, bad arguments, tool errors, deadlines and
//! cancellation all come back as classified errors inside the envelope.
//!
//! # Example
//!
//! ```rust,ignore
//! use superagent_agent::{Tool, ToolContext, ToolRegistry};
//! use superagent_types::ToolResult;
//!
//! struct Echo;
//!
//! #[async_trait]
//! impl Tool for Echo {
//!     fn name(&self) -> &str { "echo" }
//!     fn description(&self) -> &str { "Echo the input" }
//!     fn parameters(&self) -> Value { json!({"type": "object"}) }
//!
//!     async fn execute(&self, params: Value, _ctx: &ToolContext) -> Result<ToolResult> {
//!         Ok(ToolResult::data(params))
//!     }
//! }
//!
//! let mut registry = ToolRegistry::new();
//! registry.register(Echo);
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use superagent_sandbox::Interrupted;
use superagent_types::{ConversationId, RunId, ToolErrorKind, ToolInvocation, ToolOutcome, ToolResult};
use tokio_util::sync::CancellationToken;

use crate::error::{AgentError, Result};

/// Extra time a tool gets past its deadline to report the timeout itself.
///
/// Tools that enforce the deadline on their own (the sandbox does) return a
/// timeout envelope with partial output; the registry's outer bound only
/// fires for tools that ignore it.
const DEADLINE_GRACE: Duration = Duration::from_millis(500);

/// How long a cancelled tool gets to wind down before the call is abandoned.
/// Covers the sandbox's kill grace plus its output drain.
const CANCEL_GRACE: Duration = Duration::from_secs(2);

// ─────────────────────────────────────────────────────────────────────────────
// Parameter Validation
// ─────────────────────────────────────────────────────────────────────────────

/// Error type for tool parameter validation failures.
///
/// Messages are phrased so a model reading them can fix its call.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ParameterValidationError {
    #[error("missing required parameter '{name}': {hint}")]
    MissingRequired {
        name: &'static str,
        hint: &'static str,
    },

    #[error("invalid type for '{name}': expected {expected}, got {actual}")]
    InvalidType {
        name: &'static str,
        expected: &'static str,
        actual: String,
    },

    #[error("'{name}' value {value} is out of range: {constraint}")]
    OutOfRange {
        name: &'static str,
        value: String,
        constraint: String,
    },

    #[error("'{name}' has invalid value '{value}': {message}")]
    InvalidValue {
        name: &'static str,
        value: String,
        message: String,
    },
}

impl ParameterValidationError {
    pub fn missing(name: &'static str, hint: &'static str) -> Self {
        Self::MissingRequired { name, hint }
    }

    pub fn invalid_type(
        name: &'static str,
        expected: &'static str,
        actual: impl Into<String>,
    ) -> Self {
        Self::InvalidType {
            name,
            expected,
            actual: actual.into(),
        }
    }

    pub fn out_of_range(
        name: &'static str,
        value: impl ToString,
        constraint: impl Into<String>,
    ) -> Self {
        Self::OutOfRange {
            name,
            value: value.to_string(),
            constraint: constraint.into(),
        }
    }

    pub fn invalid_value(
        name: &'static str,
        value: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            name,
            value: value.into(),
            message: message.into(),
        }
    }

    /// The parameter this error is about.
    pub fn parameter_name(&self) -> &str {
        match self {
            Self::MissingRequired { name, .. }
            | Self::InvalidType { name, .. }
            | Self::OutOfRange { name, .. }
            | Self::InvalidValue { name, .. } => name,
        }
    }
}

impl From<ParameterValidationError> for AgentError {
    fn from(err: ParameterValidationError) -> Self {
        AgentError::InvalidToolParams(err.to_string())
    }
}

/// Result type for parameter validation.
pub type ParamResult<T> = std::result::Result<T, ParameterValidationError>;

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Helper trait for extracting and validating parameters from JSON.
pub trait ParamExt {
    /// Get a required, non-empty string parameter.
    fn required_str(&self, name: &'static str, hint: &'static str) -> ParamResult<&str>;

    /// Get an optional string parameter.
    fn optional_str(&self, name: &str) -> Option<&str>;

    /// Get an optional unsigned integer, rejecting values of the wrong type.
    fn optional_u64(&self, name: &'static str) -> ParamResult<Option<u64>>;

    /// Get an optional boolean parameter with default.
    fn optional_bool(&self, name: &str, default: bool) -> bool;
}

impl ParamExt for Value {
    fn required_str(&self, name: &'static str, hint: &'static str) -> ParamResult<&str> {
        match self.get(name) {
            None | Some(Value::Null) => Err(ParameterValidationError::missing(name, hint)),
            Some(Value::String(s)) if s.trim().is_empty() => {
                Err(ParameterValidationError::invalid_value(name, s.as_str(), "must not be empty"))
            }
            Some(Value::String(s)) => Ok(s.as_str()),
            Some(other) => Err(ParameterValidationError::invalid_type(
                name,
                "string",
                json_type_name(other),
            )),
        }
    }

    fn optional_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|v| v.as_str())
    }

    fn optional_u64(&self, name: &'static str) -> ParamResult<Option<u64>> {
        match self.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(v) => v
                .as_u64()
                .map(Some)
                .ok_or_else(|| ParameterValidationError::invalid_type(name, "non-negative integer", v.to_string())),
        }
    }

    fn optional_bool(&self, name: &str, default: bool) -> bool {
        self.get(name).and_then(|v| v.as_bool()).unwrap_or(default)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Typed Parameter Structs
// ─────────────────────────────────────────────────────────────────────────────

/// Validated parameters for the code execution tool.
#[derive(Debug, Clone)]
pub struct CodeExecutionParams {
    pub language: String,
    pub code: String,
    pub timeout_secs: Option<u64>,
}

impl TryFrom<Value> for CodeExecutionParams {
    type Error = ParameterValidationError;

    fn try_from(params: Value) -> ParamResult<Self> {
        let language = params
            .optional_str("language")
            .unwrap_or("python")
            .to_string();
        let code = params
            .required_str("code", "provide the source code to run")?
            .to_string();
        let timeout_secs = params.optional_u64("timeout_secs")?;
        if timeout_secs == Some(0) {
            return Err(ParameterValidationError::out_of_range(
                "timeout_secs",
                0,
                "must be at least 1 second",
            ));
        }

        Ok(Self {
            language,
            code,
            timeout_secs,
        })
    }
}

/// Validated parameters for the browser tool.
#[derive(Debug, Clone)]
pub struct BrowserParams {
    pub url: url::Url,
    pub max_chars: Option<usize>,
}

impl TryFrom<Value> for BrowserParams {
    type Error = ParameterValidationError;

    fn try_from(params: Value) -> ParamResult<Self> {
        let raw = params.required_str("url", "provide an absolute http(s) URL to open")?;
        let url = url::Url::parse(raw)
            .map_err(|e| ParameterValidationError::invalid_value("url", raw, e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ParameterValidationError::invalid_value(
                "url",
                raw,
                "only http and https URLs are supported",
            ));
        }
        let max_chars = params
            .optional_u64("max_chars")?
            .map(|n| usize::try_from(n).unwrap_or(usize::MAX));

        Ok(Self { url, max_chars })
    }
}

/// Validated parameters for the web search tool.
#[derive(Debug, Clone)]
pub struct WebSearchParams {
    pub query: String,
    pub max_results: Option<usize>,
}

impl TryFrom<Value> for WebSearchParams {
    type Error = ParameterValidationError;

    fn try_from(params: Value) -> ParamResult<Self> {
        let query = params
            .required_str("query", "provide a search query string")?
            .to_string();
        let max_results = match params.optional_u64("max_results")? {
            Some(n) if !(1..=20).contains(&n) => {
                return Err(ParameterValidationError::out_of_range(
                    "max_results",
                    n,
                    "must be between 1 and 20",
                ));
            }
            other => other.map(|n| n as usize),
        };

        Ok(Self { query, max_results })
    }
}

/// Validated parameters for the file write tool.
#[derive(Debug, Clone)]
pub struct FileWriteParams {
    pub path: String,
    pub content: String,
    pub append: bool,
}

impl TryFrom<Value> for FileWriteParams {
    type Error = ParameterValidationError;

    fn try_from(params: Value) -> ParamResult<Self> {
        let path = params
            .required_str("path", "provide a path relative to the workspace")?
            .to_string();
        let content = match params.get("content") {
            Some(Value::String(s)) => s.clone(),
            None | Some(Value::Null) => {
                return Err(ParameterValidationError::missing(
                    "content",
                    "provide the text to write",
                ));
            }
            Some(other) => {
                return Err(ParameterValidationError::invalid_type(
                    "content",
                    "string",
                    json_type_name(other),
                ));
            }
        };
        let append = params.optional_bool("append", false);

        Ok(Self {
            path,
            content,
            append,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Output Sanitization
// ─────────────────────────────────────────────────────────────────────────────

/// Default maximum output size in bytes (100KB).
pub const DEFAULT_MAX_OUTPUT_SIZE: usize = 100 * 1024;

/// Configuration for sanitizing tool output.
#[derive(Debug, Clone)]
pub struct OutputConfig {
    /// Maximum size in bytes of any single string before truncation.
    pub max_size_bytes: usize,
    /// Message appended when output is truncated.
    pub truncation_message: String,
    /// Strip control characters (except newlines, tabs, carriage returns).
    pub strip_control_chars: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            max_size_bytes: DEFAULT_MAX_OUTPUT_SIZE,
            truncation_message: "\n\n[Output truncated - exceeded size limit]".to_string(),
            strip_control_chars: true,
        }
    }
}

impl OutputConfig {
    pub fn with_max_size(max_size_bytes: usize) -> Self {
        Self {
            max_size_bytes,
            ..Default::default()
        }
    }

    pub fn with_truncation_message(mut self, message: impl Into<String>) -> Self {
        self.truncation_message = message.into();
        self
    }
}

/// Error type for output sanitization failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum OutputSanitizationError {
    #[error(
        "output appears to be binary data (detected {null_bytes} null bytes in first {checked_bytes} bytes)"
    )]
    BinaryContent {
        null_bytes: usize,
        checked_bytes: usize,
    },
}

/// Sanitize a string according to the output configuration.
///
/// Rejects binary-looking content, strips null bytes and control characters,
/// and truncates on a UTF-8 boundary. Returns the sanitized string and
/// whether it was truncated.
pub fn sanitize_output(
    input: &str,
    config: &OutputConfig,
) -> std::result::Result<(String, bool), OutputSanitizationError> {
    let check_len = std::cmp::min(input.len(), 8 * 1024);
    let null_count = input.as_bytes()[..check_len]
        .iter()
        .filter(|&&b| b == 0)
        .count();

    // More than 1% null bytes reads as binary.
    if null_count > check_len / 100 && null_count > 10 {
        return Err(OutputSanitizationError::BinaryContent {
            null_bytes: null_count,
            checked_bytes: check_len,
        });
    }

    let mut output: String = if config.strip_control_chars {
        input
            .chars()
            .filter(|c| !c.is_control() || matches!(c, '\n' | '\t' | '\r'))
            .collect()
    } else {
        input.replace('\0', "")
    };

    let truncated = output.len() > config.max_size_bytes;
    if truncated {
        let budget = config
            .max_size_bytes
            .saturating_sub(config.truncation_message.len());
        let mut cut = budget;
        while cut > 0 && !output.is_char_boundary(cut) {
            cut -= 1;
        }
        output.truncate(cut);
        output.push_str(&config.truncation_message);
    }

    Ok((output, truncated))
}

/// Sanitize every string inside a JSON value. Returns whether anything was cut.
fn sanitize_value(value: &mut Value, config: &OutputConfig) -> std::result::Result<bool, OutputSanitizationError> {
    match value {
        Value::String(s) => {
            let (clean, truncated) = sanitize_output(s, config)?;
            *s = clean;
            Ok(truncated)
        }
        Value::Array(items) => {
            let mut truncated = false;
            for item in items {
                truncated |= sanitize_value(item, config)?;
            }
            Ok(truncated)
        }
        Value::Object(map) => {
            let mut truncated = false;
            for item in map.values_mut() {
                truncated |= sanitize_value(item, config)?;
            }
            Ok(truncated)
        }
        _ => Ok(false),
    }
}

/// Apply `config` to the data and captured streams of a result.
///
/// Binary data is replaced with an `execution` error.
pub fn sanitize_result(mut result: ToolResult, config: &OutputConfig) -> ToolResult {
    let mut truncated = false;

    if let ToolOutcome::Data(value) = &mut result.outcome {
        match sanitize_value(value, config) {
            Ok(t) => truncated |= t,
            Err(e) => {
                let diagnostics = result.diagnostics.clone();
                return ToolResult::error(ToolErrorKind::Execution, e.to_string())
                    .with_diagnostics(diagnostics);
            }
        }
    }

    for stream in [&mut result.diagnostics.stdout, &mut result.diagnostics.stderr] {
        if let Some(text) = stream.as_mut() {
            match sanitize_output(text, config) {
                Ok((clean, t)) => {
                    *text = clean;
                    truncated |= t;
                }
                Err(e) => *text = format!("[{e}]"),
            }
        }
    }

    result.diagnostics.truncated |= truncated;
    result
}

// ─────────────────────────────────────────────────────────────────────────────
// Tool Trait
// ─────────────────────────────────────────────────────────────────────────────

/// Trait for agent tools.
///
/// Each tool defines its parameters as a JSON Schema and implements async
/// execution. Returning `Err` is fine: the registry classifies it.
/// [`AgentError::InvalidToolParams`] becomes `invalid_arguments`,
/// [`AgentError::Cancelled`] becomes `cancelled`, anything else `execution`.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name of this tool.
    fn name(&self) -> &str;

    /// Human-readable description of what this tool does.
    fn description(&self) -> &str;

    /// JSON Schema for this tool's parameters.
    fn parameters(&self) -> Value;

    /// Execute the tool with the given parameters.
    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<ToolResult>;
}

/// Context passed to a tool for one invocation.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub conversation_id: ConversationId,
    pub run_id: RunId,
    /// Id of the invocation being executed.
    pub invocation_id: String,
    /// Child of the run's token; cancelled when the run is.
    pub cancellation: CancellationToken,
    /// Hard bound on this invocation.
    pub deadline: Duration,
}

impl ToolContext {
    pub fn new(conversation_id: ConversationId, run_id: RunId, deadline: Duration) -> Self {
        Self {
            conversation_id,
            run_id,
            invocation_id: String::new(),
            cancellation: CancellationToken::new(),
            deadline,
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn with_invocation_id(mut self, id: impl Into<String>) -> Self {
        self.invocation_id = id.into();
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

/// A tool's name, description and parameter schema, as shown to models.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tool Registry
// ─────────────────────────────────────────────────────────────────────────────

/// Registry of tools available to a run, keyed by name.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    output: OutputConfig,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the output sanitization applied to every result.
    pub fn with_output_config(mut self, config: OutputConfig) -> Self {
        self.output = config;
        self
    }

    /// Register a tool, replacing any tool with the same name.
    pub fn register<T: Tool + 'static>(&mut self, tool: T) {
        self.register_arc(Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Tool names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Definitions of every tool, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .tools
            .values()
            .map(|tool| ToolDefinition {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters(),
            })
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// A registry holding only the named tools. Unknown names are ignored.
    pub fn filtered_by_names(&self, names: &[&str]) -> ToolRegistry {
        let tools = names
            .iter()
            .filter_map(|&name| self.tools.get(name).map(|t| (name.to_string(), Arc::clone(t))))
            .collect();
        ToolRegistry {
            tools,
            output: self.output.clone(),
        }
    }

    /// Run one invocation to completion. Never fails.
    #[tracing::instrument(
        skip(self, invocation, ctx),
        fields(tool = %invocation.name, invocation_id = %invocation.id, run_id = %ctx.run_id)
    )]
    pub async fn invoke(&self, invocation: &ToolInvocation, ctx: &ToolContext) -> ToolResult {
        let started = Instant::now();

        let Some(tool) = self.get(&invocation.name) else {
            tracing::debug!("Unknown tool requested");
            return ToolResult::not_found(&invocation.name).with_duration(started.elapsed());
        };
        if ctx.is_cancelled() {
            return ToolResult::cancelled().with_duration(started.elapsed());
        }

        let ctx = ctx.clone().with_invocation_id(invocation.id.clone());
        // The tool sees the cancel first and runs its own termination path.
        // The call is only abandoned if it ignores the token.
        let outer = ctx.deadline + DEADLINE_GRACE;
        let result = tokio::select! {
            outcome = tokio::time::timeout(outer, tool.execute(invocation.arguments.clone(), &ctx)) => {
                match outcome {
                    Ok(Ok(result)) => result,
                    Ok(Err(e)) => classify_error(e),
                    Err(_) => ToolResult::timeout(ctx.deadline),
                }
            }
            _ = cancelled_after(&ctx.cancellation, CANCEL_GRACE) => {
                tracing::warn!("Tool ignored cancellation, abandoning call");
                Interrupted::Cancelled.into_tool_result()
            }
        };

        let result = sanitize_result(result, &self.output);
        let result = if result.diagnostics.duration_ms == 0 {
            result.with_duration(started.elapsed())
        } else {
            result
        };

        match result.error_kind() {
            Some(ToolErrorKind::Timeout) => {
                tracing::warn!(deadline_ms = ctx.deadline.as_millis() as u64, "Tool timed out")
            }
            Some(kind) => tracing::debug!(%kind, "Tool invocation failed"),
            None => tracing::debug!(
                duration_ms = result.diagnostics.duration_ms,
                "Tool invocation succeeded"
            ),
        }
        result
    }
}

/// Resolves `grace` after `token` fires.
async fn cancelled_after(token: &CancellationToken, grace: Duration) {
    token.cancelled().await;
    tokio::time::sleep(grace).await;
}

fn classify_error(err: AgentError) -> ToolResult {
    let kind = match &err {
        AgentError::InvalidToolParams(_) => ToolErrorKind::InvalidArguments,
        AgentError::Cancelled => ToolErrorKind::Cancelled,
        AgentError::Internal(_) => ToolErrorKind::Internal,
        _ => ToolErrorKind::Execution,
    };
    let message = match err {
        AgentError::InvalidToolParams(msg) | AgentError::Tool(msg) => msg,
        other => other.to_string(),
    };
    ToolResult::error(kind, message)
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Mock Tool (for testing)
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) use mock::MockTool;

#[cfg(test)]
mod mock {
    use super::*;
    use parking_lot::Mutex;

    /// A tool with a canned response that records its calls.
    #[derive(Debug)]
    pub struct MockTool {
        name: String,
        response: Mutex<Option<ToolResult>>,
        delay: Option<Duration>,
        cancellable: bool,
        fail_with: Option<String>,
        calls: Mutex<Vec<Value>>,
    }

    impl MockTool {
        pub fn new(name: impl Into<String>) -> Self {
            Self {
                name: name.into(),
                response: Mutex::new(None),
                delay: None,
                cancellable: false,
                fail_with: None,
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn with_response(self, response: ToolResult) -> Self {
            *self.response.lock() = Some(response);
            self
        }

        /// Sleep before answering, ignoring the deadline.
        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        /// Cut the delay short when the context is cancelled.
        pub fn cancellable(mut self) -> Self {
            self.cancellable = true;
            self
        }

        pub fn failing(mut self, message: impl Into<String>) -> Self {
            self.fail_with = Some(message.into());
            self
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().len()
        }
    }

    #[async_trait]
    impl Tool for MockTool {
        fn name(&self) -> &str {
            &self.name
        }

        fn description(&self) -> &str {
            "A mock tool for testing"
        }

        fn parameters(&self) -> Value {
            serde_json::json!({"type": "object", "properties": {}})
        }

        async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<ToolResult> {
            self.calls.lock().push(params);
            if let Some(delay) = self.delay {
                if self.cancellable {
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = ctx.cancellation.cancelled() => return Err(AgentError::Cancelled),
                    }
                } else {
                    tokio::time::sleep(delay).await;
                }
            }
            if let Some(message) = &self.fail_with {
                return Err(AgentError::tool(message.clone()));
            }
            Ok(self
                .response
                .lock()
                .clone()
                .unwrap_or_else(|| ToolResult::text("mock response")))
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
