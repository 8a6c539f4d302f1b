//! Agent core for Superagent.
//!
//! This crate runs multi-agent tasks for conversations and fans their
//! progress out to observers.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Orchestrator                                               │
//! │  - One active run per conversation                          │
//! │  - Observers per conversation, ordered broadcast            │
//! │  - Cancellation and shutdown                                │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ spawns
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  AgentRun                                                   │
//! │  - Drives a ReasoningEngine's step stream                   │
//! │  - Dispatches tool calls with a deadline                    │
//! └─────────────────────────────────────────────────────────────┘
//!              ┌───────────────┼───────────────┐
//!              ▼               ▼               ▼
//!       ┌────────────┐  ┌────────────┐  ┌────────────┐
//!       │ RoleModels │  │ToolRegistry│  │  Sandbox   │
//!       │(superagent-│  │  (tools)   │  │ (executor) │
//!       │    llm)    │  │            │  │            │
//!       └────────────┘  └────────────┘  └────────────┘
//! ```
//!
//! # Core Components
//!
//! - [`Orchestrator`]: registry of runs and observers
//! - [`AgentRun`]: one execution attempt
//! - [`ReasoningEngine`]: produces steps; [`PlanExecuteEngine`] is the default
//! - [`ToolRegistry`]: named tools with bounded, sanitized invocation
//! - [`ObserverChannel`]: where events are handed off

pub mod channel;
pub mod engine;
pub mod error;
pub mod orchestrator;
pub mod planner;
pub mod run;
pub mod tool;
pub mod tools;
pub mod toolset;

// Re-export core types
pub use error::{AgentError, OrchestratorError, Result};

// Re-export orchestrator types
pub use orchestrator::{
    Orchestrator, OrchestratorDeps, OrchestratorOptions, RunHandle, RunSnapshot,
    SubscriptionHandle,
};

// Re-export run and channel types
pub use channel::{ChannelClosed, FnChannel, ObserverChannel, QueueChannel, SharedChannel};
pub use run::{AgentRun, EventSink, RunToolDispatcher};

// Re-export engine types
pub use engine::{
    EngineRequest, ReasoningEngine, RoleModels, SharedDispatch, SharedEngine, Step, StepContent,
    StepStream, ToolDispatch,
};
pub use planner::{PlanExecuteConfig, PlanExecuteEngine};

// Re-export tool types
pub use tool::{Tool, ToolContext, ToolDefinition, ToolRegistry};

// Re-export parameter validation types
pub use tool::{
    BrowserParams, CodeExecutionParams, FileWriteParams, ParamExt, ParamResult,
    ParameterValidationError, WebSearchParams,
};

// Re-export output sanitization types
pub use tool::{
    DEFAULT_MAX_OUTPUT_SIZE, OutputConfig, OutputSanitizationError, sanitize_output,
    sanitize_result,
};

// Re-export toolset types
pub use toolset::{CallerContext, DefaultToolset, ToolsetResolver};
