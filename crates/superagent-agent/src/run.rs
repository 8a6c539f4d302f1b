//! One agent run: drive a reasoning engine and push its steps out as events.
//!
//! The run is a producer. It pulls steps from the engine and emits events
//! into an [`EventSink`]; it never knows who is listening. Every await is
//! raced against the run's cancellation token.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use superagent_types::{
    AgentRole, AgentStatus, ConversationId, EventKind, HistoryMessage, RunId, RunState,
    ToolErrorKind, ToolInvocation, ToolResult,
};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::engine::{EngineRequest, RoleModels, SharedEngine, StepContent, ToolDispatch};
use crate::tool::{ToolContext, ToolRegistry};

/// Reason carried by the `cancelled` event of a run stopped on request.
pub const CANCELLED_BY_REQUEST: &str = "cancelled by request";

/// Error message for an engine whose stream ended with nothing to say.
pub const NO_FINAL_MESSAGE: &str = "reasoning engine produced no final message";

/// Where a run's events go.
pub trait EventSink: Send + Sync {
    /// Emit one event. Returns `false` once the run is no longer registered;
    /// the event was discarded.
    fn emit(&self, kind: EventKind) -> bool;
}

pub type SharedSink = Arc<dyn EventSink>;

// ─────────────────────────────────────────────────────────────────────────────
// Tool dispatch
// ─────────────────────────────────────────────────────────────────────────────

/// Runs tools for one agent run.
///
/// Each call gets the configured deadline and a child of the run's token, so
/// cancelling the run kills whatever tool is in flight.
///
/// Invocations run on tracked tasks. When the engine stream is dropped on
/// cancel, the tool still finishes its own cancel path (process kill, output
/// capture) and [`settle`](Self::settle) waits for that.
pub struct RunToolDispatcher {
    registry: Arc<ToolRegistry>,
    sink: SharedSink,
    conversation_id: ConversationId,
    run_id: RunId,
    deadline: Duration,
    cancellation: CancellationToken,
    inflight: TaskTracker,
}

impl RunToolDispatcher {
    pub fn new(
        registry: Arc<ToolRegistry>,
        sink: SharedSink,
        conversation_id: ConversationId,
        run_id: RunId,
        deadline: Duration,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            registry,
            sink,
            conversation_id,
            run_id,
            deadline,
            cancellation,
            inflight: TaskTracker::new(),
        }
    }

    /// Wait for every in-flight invocation to return. No new ones start.
    pub async fn settle(&self) {
        self.inflight.close();
        self.inflight.wait().await;
    }
}

#[async_trait]
impl ToolDispatch for RunToolDispatcher {
    async fn dispatch(&self, role: AgentRole, invocation: ToolInvocation) -> ToolResult {
        self.sink.emit(EventKind::status(
            role,
            AgentStatus::Executing,
            format!("Using tool {}", invocation.name),
        ));

        let ctx = ToolContext::new(self.conversation_id.clone(), self.run_id, self.deadline)
            .with_cancellation(self.cancellation.child_token())
            .with_invocation_id(&invocation.id);
        let registry = Arc::clone(&self.registry);
        let call = invocation.clone();
        let result = match self
            .inflight
            .spawn(async move { registry.invoke(&call, &ctx).await })
            .await
        {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(tool = %invocation.name, error = %e, "Tool task failed");
                ToolResult::error(ToolErrorKind::Internal, format!("tool task failed: {e}"))
            }
        };

        self.sink.emit(EventKind::ToolResult {
            invocation_id: invocation.id,
            tool: invocation.name,
            result: result.clone(),
        });
        result
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Agent run
// ─────────────────────────────────────────────────────────────────────────────

/// Everything one run needs. Consumed by [`AgentRun::execute`].
pub struct AgentRun {
    pub conversation_id: ConversationId,
    pub run_id: RunId,
    pub query: String,
    pub history: Arc<[HistoryMessage]>,
    pub tools: Arc<ToolRegistry>,
    pub models: RoleModels,
    pub engine: SharedEngine,
    pub tool_deadline: Duration,
    pub cancellation: CancellationToken,
    pub sink: SharedSink,
}

impl AgentRun {
    /// Run to a terminal state, emitting exactly one terminal event.
    pub async fn execute(self) -> RunState {
        let dispatch = Arc::new(RunToolDispatcher::new(
            Arc::clone(&self.tools),
            Arc::clone(&self.sink),
            self.conversation_id.clone(),
            self.run_id,
            self.tool_deadline,
            self.cancellation.clone(),
        ));
        let inflight = Arc::clone(&dispatch);

        let request = EngineRequest {
            query: self.query,
            history: self.history,
            tools: self.tools.definitions(),
            dispatch,
            models: self.models,
        };
        let mut steps = self.engine.run(request);
        let mut last_message: Option<(AgentRole, String)> = None;

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancellation.cancelled() => {
                    drop(steps);
                    inflight.settle().await;
                    tracing::info!(
                        conversation_id = %self.conversation_id,
                        run_id = %self.run_id,
                        "Run cancelled"
                    );
                    self.sink.emit(EventKind::cancelled(CANCELLED_BY_REQUEST));
                    return RunState::Cancelled;
                }
                next = steps.next() => next,
            };

            match next {
                Some(Ok(step)) => match step.content {
                    StepContent::Status {
                        status,
                        message,
                        task,
                    } => {
                        self.sink.emit(EventKind::Status {
                            role: step.role,
                            status,
                            message,
                            task,
                        });
                    }
                    StepContent::Thought(text) => {
                        self.sink.emit(EventKind::partial(step.role, text.clone()));
                        last_message = Some((step.role, text));
                    }
                    StepContent::Final(text) => {
                        self.sink.emit(EventKind::final_message(step.role, text));
                        return RunState::Completed;
                    }
                },
                Some(Err(e)) => {
                    tracing::error!(
                        conversation_id = %self.conversation_id,
                        run_id = %self.run_id,
                        error = %e,
                        "Reasoning engine failed"
                    );
                    self.sink
                        .emit(EventKind::error(format!("Error processing message: {e}")));
                    return RunState::Failed;
                }
                None => {
                    return match last_message {
                        Some((role, text)) => {
                            self.sink.emit(EventKind::final_message(role, text));
                            RunState::Completed
                        }
                        None => {
                            tracing::error!(
                                conversation_id = %self.conversation_id,
                                "{NO_FINAL_MESSAGE}"
                            );
                            self.sink.emit(EventKind::error(NO_FINAL_MESSAGE));
                            RunState::Failed
                        }
                    };
                }
            }
        }
    }
}
