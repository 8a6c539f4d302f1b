//! Common test utilities for orchestrator integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;
use serde_json::{Value, json};
use superagent_agent::{
    AgentError, CallerContext, EngineRequest, Orchestrator, OrchestratorDeps,
    OrchestratorOptions, QueueChannel, ReasoningEngine, Step, StepStream, Tool, ToolContext,
    ToolRegistry,
};
use superagent_llm::{FixedResolver, MockModel, RoleBindings};
use superagent_types::{AgentRole, AgentStatus, ConversationId, Event, ToolInvocation, ToolResult};
use tokio::sync::{Notify, mpsc};

pub fn conv(id: &str) -> ConversationId {
    ConversationId::parse(id).expect("valid conversation id")
}

/// Build an orchestrator around `engine` with echo and slow tools.
pub fn orchestrator(engine: impl ReasoningEngine + 'static) -> Orchestrator {
    orchestrator_with(engine, RoleBindings::uniform("openai/gpt-4o-mini"), Duration::from_secs(30))
}

pub fn orchestrator_with(
    engine: impl ReasoningEngine + 'static,
    bindings: RoleBindings,
    tool_deadline: Duration,
) -> Orchestrator {
    let toolsets = |_: &CallerContext| {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);
        registry.register(SleepTool);
        registry
    };
    Orchestrator::new(
        OrchestratorOptions::default()
            .with_tool_deadline(tool_deadline)
            .with_shutdown_grace(Duration::from_secs(5)),
        OrchestratorDeps {
            engine: Arc::new(engine),
            resolver: Arc::new(FixedResolver::new(Arc::new(MockModel::with_text("ok")))),
            bindings,
            toolsets: Arc::new(toolsets),
        },
    )
}

/// Build an orchestrator whose every caller gets the registry from `tools`.
pub fn orchestrator_with_tools<F>(engine: impl ReasoningEngine + 'static, tools: F) -> Orchestrator
where
    F: Fn() -> ToolRegistry + Send + Sync + 'static,
{
    Orchestrator::new(
        OrchestratorOptions::default()
            .with_tool_deadline(Duration::from_secs(60))
            .with_shutdown_grace(Duration::from_secs(5)),
        OrchestratorDeps {
            engine: Arc::new(engine),
            resolver: Arc::new(FixedResolver::new(Arc::new(MockModel::with_text("ok")))),
            bindings: RoleBindings::uniform("openai/gpt-4o-mini"),
            toolsets: Arc::new(move |_: &CallerContext| tools()),
        },
    )
}

/// Subscribe a fresh queue observer.
pub fn observe(orch: &Orchestrator, id: &ConversationId) -> mpsc::Receiver<Event> {
    let (channel, rx) = QueueChannel::bounded(1024);
    orch.subscribe(id, Arc::new(channel));
    rx
}

/// Receive events until a terminal one arrives.
pub async fn until_terminal(rx: &mut mpsc::Receiver<Event>) -> Result<Vec<Event>> {
    let mut events = Vec::new();
    loop {
        let Some(event) = tokio::time::timeout(Duration::from_secs(10), rx.recv()).await? else {
            bail!("observer closed before terminal event; got {events:?}");
        };
        let done = event.is_terminal();
        events.push(event);
        if done {
            return Ok(events);
        }
    }
}

/// Wait until the conversation has no active run.
pub async fn wait_idle(orch: &Orchestrator, id: &ConversationId) -> Result<()> {
    tokio::time::timeout(Duration::from_secs(10), async {
        while orch.is_running(id) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await?;
    Ok(())
}

pub fn assert_gap_free(events: &[Event]) {
    for (i, event) in events.iter().enumerate() {
        assert_eq!(event.seq, events[0].seq + i as u64, "gap or reorder at {i}: {events:?}");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Engines
// ─────────────────────────────────────────────────────────────────────────────

/// Emits `steps` status events, calls `echo`, then answers.
pub struct ScriptedEngine {
    pub steps: usize,
    pub pause: Duration,
}

impl ReasoningEngine for ScriptedEngine {
    fn run(&self, request: EngineRequest) -> StepStream {
        let steps = self.steps;
        let pause = self.pause;
        Box::pin(async_stream::stream! {
            for i in 0..steps {
                yield Ok::<_, AgentError>(Step::status(AgentRole::Planner, AgentStatus::Thinking, format!("step {i}")));
                tokio::time::sleep(pause).await;
            }
            let result = request
                .dispatch
                .dispatch(AgentRole::Executor, ToolInvocation::new("echo", json!({"text": request.query})))
                .await;
            yield Ok(Step::thought(AgentRole::Critic, result.to_observation()));
            yield Ok(Step::final_answer(AgentRole::Assistant, format!("answer to {}", request.query)));
        })
    }
}

/// Holds the run open until released.
pub struct GatedEngine {
    pub gate: Arc<Notify>,
}

impl ReasoningEngine for GatedEngine {
    fn run(&self, _request: EngineRequest) -> StepStream {
        let gate = Arc::clone(&self.gate);
        Box::pin(async_stream::stream! {
            yield Ok::<_, AgentError>(Step::status(AgentRole::Assistant, AgentStatus::Waiting, "waiting"));
            gate.notified().await;
            yield Ok(Step::final_answer(AgentRole::Assistant, "released"));
        })
    }
}

/// Calls the `sleep` tool, which never finishes on its own.
pub struct SlowToolEngine;

impl ReasoningEngine for SlowToolEngine {
    fn run(&self, request: EngineRequest) -> StepStream {
        Box::pin(async_stream::stream! {
            yield Ok::<_, AgentError>(Step::status(AgentRole::Executor, AgentStatus::Executing, "Using tools: sleep"));
            let result = request
                .dispatch
                .dispatch(AgentRole::Executor, ToolInvocation::new("sleep", json!({"secs": 600})))
                .await;
            yield Ok(Step::final_answer(AgentRole::Assistant, result.to_observation()));
        })
    }
}

/// Runs one `code_execution` call with the given shell script.
pub struct ScriptEngine {
    pub script: String,
}

impl ReasoningEngine for ScriptEngine {
    fn run(&self, request: EngineRequest) -> StepStream {
        let args = json!({"language": "sh", "code": self.script});
        Box::pin(async_stream::stream! {
            let result = request
                .dispatch
                .dispatch(AgentRole::Executor, ToolInvocation::new("code_execution", args))
                .await;
            yield Ok::<_, AgentError>(Step::final_answer(AgentRole::Assistant, result.to_observation()));
        })
    }
}

/// Panics after its first step.
pub struct PanicEngine;

impl ReasoningEngine for PanicEngine {
    fn run(&self, _request: EngineRequest) -> StepStream {
        Box::pin(async_stream::stream! {
            yield Ok::<_, AgentError>(Step::status(AgentRole::Assistant, AgentStatus::Thinking, "about to fail"));
            panic!("engine exploded");
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tools
// ─────────────────────────────────────────────────────────────────────────────

pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo the text argument"
    }

    fn parameters(&self) -> Value {
        json!({"type": "object", "properties": {"text": {"type": "string"}}})
    }

    async fn execute(&self, params: Value, _ctx: &ToolContext) -> superagent_agent::Result<ToolResult> {
        Ok(ToolResult::text(params["text"].as_str().unwrap_or_default()))
    }
}

/// Sleeps for `secs` without looking at its context.
pub struct SleepTool;

#[async_trait]
impl Tool for SleepTool {
    fn name(&self) -> &str {
        "sleep"
    }

    fn description(&self) -> &str {
        "Sleep for a number of seconds"
    }

    fn parameters(&self) -> Value {
        json!({"type": "object", "properties": {"secs": {"type": "integer"}}})
    }

    async fn execute(&self, params: Value, _ctx: &ToolContext) -> superagent_agent::Result<ToolResult> {
        let secs = params["secs"].as_u64().unwrap_or(1);
        tokio::time::sleep(Duration::from_secs(secs)).await;
        Ok(ToolResult::text("slept"))
    }
}

/// Observer that counts deliveries and reports closed after `accept` events.
pub struct CountingObserver {
    pub delivered: AtomicUsize,
    pub accept: usize,
}

impl superagent_agent::ObserverChannel for CountingObserver {
    fn send(&self, _event: &Event) -> std::result::Result<(), superagent_agent::ChannelClosed> {
        let n = self.delivered.fetch_add(1, Ordering::SeqCst) + 1;
        if n > self.accept {
            Err(superagent_agent::ChannelClosed)
        } else {
            Ok(())
        }
    }
}
