//! The reasoning engine interface.
//!
//! An engine turns a query into a lazy stream of [`Step`]s. It never talks to
//! observers directly: tool calls go through the [`ToolDispatch`] handle it
//! is given, and everything it wants observers to see is a step. The agent
//! run drives the stream and translates steps into events.
//!
//! ```text
//!   AgentRun ──EngineRequest──▶ ReasoningEngine::run ──▶ StepStream
//!      ▲                              │
//!      │                              ▼
//!      └──── ToolResult ◀──── ToolDispatch::dispatch(invocation)
//! ```

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use superagent_llm::{ModelResolver, RoleBindings, SharedModel};
use superagent_types::{AgentRole, AgentStatus, HistoryMessage, ToolInvocation, ToolResult};

use crate::error::{OrchestratorError, Result};
use crate::tool::ToolDefinition;

// ─────────────────────────────────────────────────────────────────────────────
// Steps
// ─────────────────────────────────────────────────────────────────────────────

/// What a step carries.
#[derive(Debug, Clone, PartialEq)]
pub enum StepContent {
    /// Progress notice.
    Status {
        status: AgentStatus,
        message: String,
        task: Option<String>,
    },
    /// Intermediate text shown to observers as a partial message.
    Thought(String),
    /// The answer. Ends the run.
    Final(String),
}

/// One notification from an engine.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub role: AgentRole,
    pub content: StepContent,
}

impl Step {
    pub fn status(role: AgentRole, status: AgentStatus, message: impl Into<String>) -> Self {
        Self {
            role,
            content: StepContent::Status {
                status,
                message: message.into(),
                task: None,
            },
        }
    }

    pub fn thought(role: AgentRole, text: impl Into<String>) -> Self {
        Self {
            role,
            content: StepContent::Thought(text.into()),
        }
    }

    pub fn final_answer(role: AgentRole, text: impl Into<String>) -> Self {
        Self {
            role,
            content: StepContent::Final(text.into()),
        }
    }

    pub fn with_task(mut self, text: impl Into<String>) -> Self {
        if let StepContent::Status { task, .. } = &mut self.content {
            *task = Some(text.into());
        }
        self
    }
}

/// A boxed stream of steps. An `Err` item ends the run as failed.
pub type StepStream = Pin<Box<dyn Stream<Item = Result<Step>> + Send + 'static>>;

// ─────────────────────────────────────────────────────────────────────────────
// Tool dispatch
// ─────────────────────────────────────────────────────────────────────────────

/// How an engine runs tools. Never fails; errors come back in the envelope.
#[async_trait]
pub trait ToolDispatch: Send + Sync {
    async fn dispatch(&self, role: AgentRole, invocation: ToolInvocation) -> ToolResult;
}

pub type SharedDispatch = Arc<dyn ToolDispatch>;

// ─────────────────────────────────────────────────────────────────────────────
// Role models
// ─────────────────────────────────────────────────────────────────────────────

/// A resolved model handle for each agent role.
#[derive(Clone)]
pub struct RoleModels {
    pub assistant: SharedModel,
    pub planner: SharedModel,
    pub executor: SharedModel,
    pub critic: SharedModel,
}

impl RoleModels {
    /// Every role served by one model.
    pub fn uniform(model: SharedModel) -> Self {
        Self {
            assistant: Arc::clone(&model),
            planner: Arc::clone(&model),
            executor: Arc::clone(&model),
            critic: model,
        }
    }

    /// Resolve every role's binding. The first failure is returned with the
    /// role it belongs to; nothing is substituted.
    pub fn resolve(
        resolver: &dyn ModelResolver,
        bindings: &RoleBindings,
    ) -> std::result::Result<Self, OrchestratorError> {
        let resolve = |role: AgentRole| {
            resolver
                .resolve(bindings.get(role))
                .map_err(|source| OrchestratorError::Model { role, source })
        };

        Ok(Self {
            assistant: resolve(AgentRole::Assistant)?,
            planner: resolve(AgentRole::Planner)?,
            executor: resolve(AgentRole::Executor)?,
            critic: resolve(AgentRole::Critic)?,
        })
    }

    pub fn get(&self, role: AgentRole) -> &SharedModel {
        match role {
            AgentRole::Assistant => &self.assistant,
            AgentRole::Planner => &self.planner,
            AgentRole::Executor => &self.executor,
            AgentRole::Critic => &self.critic,
        }
    }
}

impl std::fmt::Debug for RoleModels {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoleModels")
            .field("assistant", &self.assistant.describe())
            .field("planner", &self.planner.describe())
            .field("executor", &self.executor.describe())
            .field("critic", &self.critic.describe())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Engine
// ─────────────────────────────────────────────────────────────────────────────

/// Everything an engine needs for one run.
#[derive(Clone)]
pub struct EngineRequest {
    pub query: String,
    /// Snapshot of the conversation taken when the run started.
    pub history: Arc<[HistoryMessage]>,
    pub tools: Vec<ToolDefinition>,
    pub dispatch: SharedDispatch,
    pub models: RoleModels,
}

/// Produces the steps of a run.
///
/// `run` must return quickly; work happens as the stream is polled. Each call
/// starts from scratch.
pub trait ReasoningEngine: Send + Sync {
    fn run(&self, request: EngineRequest) -> StepStream;
}

pub type SharedEngine = Arc<dyn ReasoningEngine>;
