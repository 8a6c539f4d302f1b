//! Conversation orchestrator.
//!
//! Owns at most one active run per conversation and the set of observers
//! watching each conversation. It is the only routing state in the system.
//!
//! ```text
//!  start ──▶ Slot { run, subscribers } ◀── subscribe / unsubscribe
//!               ▲            │
//!     RunEmitter│            │ send (under the slot lock)
//!               │            ▼
//!          AgentRun    ObserverChannel × N
//! ```
//!
//! Every conversation has its own slot, guarded by its own mutex. Sequence
//! numbers are assigned and events handed to observers under that lock, so
//! a subscriber sees a gap-free suffix of the run's events. The lock is never
//! held across an await. Slots with no run and no subscribers are retired
//! from the map; an operation that races a retirement retries on a fresh
//! slot.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use superagent_config::SuperagentConfig;
use superagent_llm::{RoleBindings, SharedResolver};
use superagent_types::{
    ConversationId, Event, EventKind, HistoryMessage, RunId, RunState, SubscriptionId, Timestamp,
    now,
};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::Instrument;

use crate::channel::SharedChannel;
use crate::engine::{RoleModels, SharedEngine};
use crate::error::{AgentError, OrchestratorError};
use crate::run::{AgentRun, EventSink};
use crate::toolset::{CallerContext, ToolsetResolver};

type SlotGuard = parking_lot::lock_api::ArcMutexGuard<parking_lot::RawMutex, SlotState>;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Runtime settings for the orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// Deadline handed to every tool invocation.
    pub tool_deadline: Duration,
    /// How long [`Orchestrator::shutdown`] waits for cancelled runs.
    pub shutdown_grace: Duration,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            tool_deadline: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

impl OrchestratorOptions {
    pub fn from_config(config: &SuperagentConfig) -> crate::error::Result<Self> {
        let tool_deadline = config
            .tools()
            .deadline()
            .map_err(|e| AgentError::Config(e.to_string()))?;
        Ok(Self {
            tool_deadline,
            shutdown_grace: Duration::from_secs(config.orchestrator().shutdown_grace_secs),
        })
    }

    pub fn with_tool_deadline(mut self, deadline: Duration) -> Self {
        self.tool_deadline = deadline;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }
}

/// Collaborators the orchestrator builds runs from.
#[derive(Clone)]
pub struct OrchestratorDeps {
    pub engine: SharedEngine,
    pub resolver: SharedResolver,
    pub bindings: RoleBindings,
    pub toolsets: Arc<dyn ToolsetResolver>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Public records
// ─────────────────────────────────────────────────────────────────────────────

/// Returned by a successful start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunHandle {
    pub conversation_id: ConversationId,
    pub run_id: RunId,
}

/// Identifies one registered observer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionHandle {
    pub conversation_id: ConversationId,
    pub subscription_id: SubscriptionId,
}

/// Point-in-time view of an active run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSnapshot {
    pub conversation_id: ConversationId,
    pub run_id: RunId,
    pub state: RunState,
    pub started_at: Timestamp,
    /// Sequence number of the last event emitted, 0 before the first.
    pub last_seq: u64,
    pub subscriber_count: usize,
    pub query: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Registry state
// ─────────────────────────────────────────────────────────────────────────────

struct ActiveRun {
    run_id: RunId,
    next_seq: u64,
    cancel: CancellationToken,
    started_at: Timestamp,
    query: String,
}

struct Subscriber {
    id: SubscriptionId,
    channel: SharedChannel,
}

#[derive(Default)]
struct SlotState {
    retired: bool,
    run: Option<ActiveRun>,
    subscribers: Vec<Subscriber>,
}

impl SlotState {
    fn snapshot(&self, conversation_id: &ConversationId) -> Option<RunSnapshot> {
        self.run.as_ref().map(|run| RunSnapshot {
            conversation_id: conversation_id.clone(),
            run_id: run.run_id,
            state: RunState::Running,
            started_at: run.started_at,
            last_seq: run.next_seq - 1,
            subscriber_count: self.subscribers.len(),
            query: run.query.clone(),
        })
    }
}

type Slot = Arc<Mutex<SlotState>>;

struct Inner {
    slots: DashMap<ConversationId, Slot>,
    options: OrchestratorOptions,
    deps: OrchestratorDeps,
    tasks: TaskTracker,
    shutdown: CancellationToken,
}

impl Inner {
    /// Lock the live slot for `id`, creating it if needed.
    fn lock_slot(&self, id: &ConversationId) -> SlotGuard {
        loop {
            let slot = Arc::clone(self.slots.entry(id.clone()).or_default().value());
            let guard = slot.lock_arc();
            if !guard.retired {
                return guard;
            }
        }
    }

    /// Lock the slot for `id` only if one exists.
    fn existing_slot(&self, id: &ConversationId) -> Option<SlotGuard> {
        let slot = Arc::clone(self.slots.get(id)?.value());
        let guard = slot.lock_arc();
        (!guard.retired).then_some(guard)
    }

    /// Remove an idle slot from the map. Called with the slot locked.
    fn retire_if_idle(&self, id: &ConversationId, guard: &mut SlotGuard) {
        if guard.run.is_some() || !guard.subscribers.is_empty() {
            return;
        }
        guard.retired = true;
        let slot = Arc::clone(SlotGuard::mutex(guard));
        self.slots.remove_if(id, |_, current| Arc::ptr_eq(current, &slot));
    }

    /// Assign the next sequence number and hand the event to every observer.
    ///
    /// Returns `false` when `run_id` is not the conversation's active run.
    fn deliver(&self, id: &ConversationId, run_id: RunId, kind: EventKind) -> bool {
        let Some(mut guard) = self.existing_slot(id) else {
            tracing::debug!(
                conversation_id = %id,
                %run_id,
                kind = kind.name(),
                "Discarding event for unregistered run"
            );
            return false;
        };
        let state = &mut *guard;
        let Some(run) = state.run.as_mut().filter(|run| run.run_id == run_id) else {
            tracing::debug!(
                conversation_id = %id,
                %run_id,
                kind = kind.name(),
                "Discarding event from stale run"
            );
            return false;
        };

        let seq = run.next_seq;
        run.next_seq += 1;
        let terminal = kind.terminal_state();
        let event = Event::new(id.clone(), run_id, seq, kind);

        state.subscribers.retain(|sub| match sub.channel.send(&event) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    conversation_id = %id,
                    subscription_id = %sub.id,
                    seq,
                    error = %e,
                    "ChannelDisconnected: dropping observer"
                );
                false
            }
        });
        tracing::debug!(
            conversation_id = %id,
            seq,
            kind = event.kind.name(),
            observers = state.subscribers.len(),
            "Event broadcast"
        );

        if let Some(final_state) = terminal {
            state.run = None;
            tracing::info!(
                conversation_id = %id,
                %run_id,
                state = %final_state,
                last_seq = seq,
                "Run deregistered"
            );
            self.retire_if_idle(id, &mut guard);
        }
        true
    }

    fn is_registered(&self, id: &ConversationId, run_id: RunId) -> bool {
        self.existing_slot(id)
            .is_some_and(|guard| guard.run.as_ref().is_some_and(|run| run.run_id == run_id))
    }
}

/// Event sink bound to one run. Events from a run that is no longer
/// registered are discarded.
struct RunEmitter {
    inner: Arc<Inner>,
    conversation_id: ConversationId,
    run_id: RunId,
}

impl EventSink for RunEmitter {
    fn emit(&self, kind: EventKind) -> bool {
        self.inner.deliver(&self.conversation_id, self.run_id, kind)
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    panic
        .downcast_ref::<String>()
        .map(|s| s.as_str())
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic")
        .to_string()
}

/// Drive a run and guarantee its conversation is released afterwards.
async fn supervise(inner: Arc<Inner>, run: AgentRun) {
    let conversation_id = run.conversation_id.clone();
    let run_id = run.run_id;
    let started = Instant::now();

    match AssertUnwindSafe(run.execute()).catch_unwind().await {
        Ok(state) => {
            tracing::info!(
                state = %state,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Run finished"
            );
        }
        Err(panic) => {
            let message = panic_message(&panic);
            tracing::error!(panic = %message, "Agent run panicked");
            inner.deliver(
                &conversation_id,
                run_id,
                EventKind::error(format!("agent run panicked: {message}")),
            );
        }
    }

    if inner.is_registered(&conversation_id, run_id) {
        tracing::error!("Run ended without a terminal event");
        inner.deliver(
            &conversation_id,
            run_id,
            EventKind::error("agent run ended unexpectedly"),
        );
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Orchestrator
// ─────────────────────────────────────────────────────────────────────────────

/// Registry of active runs and observers. Cheap to clone.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn new(options: OrchestratorOptions, deps: OrchestratorDeps) -> Self {
        Self {
            inner: Arc::new(Inner {
                slots: DashMap::new(),
                options,
                deps,
                tasks: TaskTracker::new(),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn options(&self) -> &OrchestratorOptions {
        &self.inner.options
    }

    /// Start a run for an anonymous caller.
    pub fn start(
        &self,
        conversation_id: ConversationId,
        query: impl Into<String>,
        history: Vec<HistoryMessage>,
    ) -> Result<RunHandle, OrchestratorError> {
        self.start_as(&CallerContext::anonymous(), conversation_id, query, history)
    }

    /// Start a run whose tools are resolved for `caller`.
    ///
    /// Returns as soon as the run is registered; the run itself executes on
    /// a tracked background task. Must be called within a tokio runtime.
    pub fn start_as(
        &self,
        caller: &CallerContext,
        conversation_id: ConversationId,
        query: impl Into<String>,
        history: Vec<HistoryMessage>,
    ) -> Result<RunHandle, OrchestratorError> {
        let inner = &self.inner;
        if inner.shutdown.is_cancelled() {
            return Err(OrchestratorError::ShuttingDown);
        }
        if self.is_running(&conversation_id) {
            return Err(OrchestratorError::AlreadyRunning(conversation_id));
        }

        let models = RoleModels::resolve(inner.deps.resolver.as_ref(), &inner.deps.bindings)
            .inspect_err(|e| {
                tracing::warn!(conversation_id = %conversation_id, error = %e, "Cannot start run");
            })?;
        let tools = Arc::new(inner.deps.toolsets.resolve(caller));

        let query = query.into();
        let run_id = RunId::new();
        let cancel = inner.shutdown.child_token();
        {
            let mut guard = inner.lock_slot(&conversation_id);
            if guard.run.is_some() {
                return Err(OrchestratorError::AlreadyRunning(conversation_id));
            }
            guard.run = Some(ActiveRun {
                run_id,
                next_seq: 1,
                cancel: cancel.clone(),
                started_at: now(),
                query: query.clone(),
            });
        }

        tracing::info!(
            conversation_id = %conversation_id,
            %run_id,
            user_id = caller.user_id.as_deref().unwrap_or("anonymous"),
            tools = tools.len(),
            "Run started"
        );

        let run = AgentRun {
            conversation_id: conversation_id.clone(),
            run_id,
            query,
            history: Arc::from(history),
            tools,
            models,
            engine: Arc::clone(&inner.deps.engine),
            tool_deadline: inner.options.tool_deadline,
            cancellation: cancel,
            sink: Arc::new(RunEmitter {
                inner: Arc::clone(inner),
                conversation_id: conversation_id.clone(),
                run_id,
            }),
        };
        let span = tracing::info_span!("agent_run", conversation_id = %conversation_id, %run_id);
        inner
            .tasks
            .spawn(supervise(Arc::clone(inner), run).instrument(span));

        Ok(RunHandle {
            conversation_id,
            run_id,
        })
    }

    /// Register an observer. Works whether or not a run is active; the
    /// observer receives events emitted from now on.
    pub fn subscribe(&self, conversation_id: &ConversationId, channel: SharedChannel) -> SubscriptionHandle {
        let subscription_id = SubscriptionId::new();
        let mut guard = self.inner.lock_slot(conversation_id);
        guard.subscribers.push(Subscriber {
            id: subscription_id,
            channel,
        });
        tracing::debug!(
            conversation_id = %conversation_id,
            subscription_id = %subscription_id,
            observers = guard.subscribers.len(),
            "Observer subscribed"
        );
        SubscriptionHandle {
            conversation_id: conversation_id.clone(),
            subscription_id,
        }
    }

    /// Remove an observer. Returns whether it was registered; calling it
    /// again is a no-op.
    pub fn unsubscribe(&self, conversation_id: &ConversationId, subscription_id: SubscriptionId) -> bool {
        let Some(mut guard) = self.inner.existing_slot(conversation_id) else {
            return false;
        };
        let before = guard.subscribers.len();
        guard.subscribers.retain(|sub| sub.id != subscription_id);
        let removed = guard.subscribers.len() != before;
        if removed {
            tracing::debug!(
                conversation_id = %conversation_id,
                subscription_id = %subscription_id,
                "Observer unsubscribed"
            );
            self.inner.retire_if_idle(conversation_id, &mut guard);
        }
        removed
    }

    /// Request cancellation of the active run. Returns `false` if there is
    /// none.
    pub fn cancel(&self, conversation_id: &ConversationId) -> bool {
        let Some(guard) = self.inner.existing_slot(conversation_id) else {
            return false;
        };
        match &guard.run {
            Some(run) => {
                tracing::info!(
                    conversation_id = %conversation_id,
                    run_id = %run.run_id,
                    "Cancellation requested"
                );
                run.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self, conversation_id: &ConversationId) -> bool {
        self.inner
            .existing_slot(conversation_id)
            .is_some_and(|guard| guard.run.is_some())
    }

    pub fn status(&self, conversation_id: &ConversationId) -> Option<RunSnapshot> {
        self.inner
            .existing_slot(conversation_id)?
            .snapshot(conversation_id)
    }

    /// Snapshots of every active run, ordered by conversation id.
    pub fn active_runs(&self) -> Vec<RunSnapshot> {
        // Collected first: slot locks are never taken under a map shard lock.
        let slots: Vec<(ConversationId, Slot)> = self
            .inner
            .slots
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();

        let mut runs: Vec<RunSnapshot> = slots
            .iter()
            .filter_map(|(id, slot)| slot.lock().snapshot(id))
            .collect();
        runs.sort_by(|a, b| a.conversation_id.cmp(&b.conversation_id));
        runs
    }

    pub fn subscriber_count(&self, conversation_id: &ConversationId) -> usize {
        self.inner
            .existing_slot(conversation_id)
            .map_or(0, |guard| guard.subscribers.len())
    }

    /// Number of conversations with a run or an observer.
    pub fn conversation_count(&self) -> usize {
        self.inner.slots.len()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Cancel every run, refuse new ones, and wait for run tasks to finish.
    ///
    /// Returns `false` if runs were still going when the grace period ran
    /// out.
    pub async fn shutdown(&self) -> bool {
        let inner = &self.inner;
        tracing::info!(active = inner.tasks.len(), "Shutting down orchestrator");
        inner.shutdown.cancel();
        inner.tasks.close();

        match tokio::time::timeout(inner.options.shutdown_grace, inner.tasks.wait()).await {
            Ok(()) => true,
            Err(_) => {
                tracing::warn!(
                    remaining = inner.tasks.len(),
                    grace_secs = inner.options.shutdown_grace.as_secs(),
                    "Runs still active after shutdown grace period"
                );
                false
            }
        }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("conversations", &self.inner.slots.len())
            .field("tasks", &self.inner.tasks.len())
            .field("options", &self.inner.options)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ChannelClosed, ObserverChannel, QueueChannel};
    use crate::engine::{EngineRequest, ReasoningEngine, Step, StepStream};
    use crate::tool::ToolRegistry;
    use superagent_llm::{FixedResolver, MockModel};
    use superagent_types::{AgentRole, AgentStatus};

    struct OneShot;

    impl ReasoningEngine for OneShot {
        fn run(&self, request: EngineRequest) -> StepStream {
            Box::pin(futures::stream::iter(vec![
                Ok(Step::status(AgentRole::Assistant, AgentStatus::Thinking, "thinking")),
                Ok(Step::final_answer(AgentRole::Assistant, format!("echo: {}", request.query))),
            ]))
        }
    }

    fn orchestrator() -> Orchestrator {
        Orchestrator::new(
            OrchestratorOptions::default(),
            OrchestratorDeps {
                engine: Arc::new(OneShot),
                resolver: Arc::new(FixedResolver::new(Arc::new(MockModel::with_text("ok")))),
                bindings: RoleBindings::uniform("openai/gpt-4o-mini"),
                toolsets: Arc::new(|_: &CallerContext| ToolRegistry::new()),
            },
        )
    }

    fn id(s: &str) -> ConversationId {
        ConversationId::parse(s).unwrap()
    }

    struct Closed;

    impl ObserverChannel for Closed {
        fn send(&self, _event: &Event) -> Result<(), ChannelClosed> {
            Err(ChannelClosed)
        }
    }

    #[test]
    fn test_subscribe_without_run() {
        let orch = orchestrator();
        let (channel, _rx) = QueueChannel::bounded(8);
        let handle = orch.subscribe(&id("c1"), Arc::new(channel));
        assert_eq!(orch.subscriber_count(&id("c1")), 1);
        assert!(orch.status(&id("c1")).is_none());

        assert!(orch.unsubscribe(&id("c1"), handle.subscription_id));
        assert!(!orch.unsubscribe(&id("c1"), handle.subscription_id));
        assert_eq!(orch.conversation_count(), 0);
    }

    #[test]
    fn test_unknown_conversation_is_noop() {
        let orch = orchestrator();
        assert!(!orch.cancel(&id("ghost")));
        assert!(orch.status(&id("ghost")).is_none());
        assert!(!orch.unsubscribe(&id("ghost"), SubscriptionId::new()));
        assert_eq!(orch.conversation_count(), 0);
    }

    #[test]
    fn test_deliver_assigns_sequence_and_drops_closed() {
        let orch = orchestrator();
        let conv = id("c1");
        let run_id = RunId::new();
        orch.inner.lock_slot(&conv).run = Some(ActiveRun {
            run_id,
            next_seq: 1,
            cancel: CancellationToken::new(),
            started_at: now(),
            query: "q".into(),
        });

        let (channel, mut rx) = QueueChannel::bounded(8);
        orch.subscribe(&conv, Arc::new(channel));
        orch.subscribe(&conv, Arc::new(Closed));
        assert_eq!(orch.subscriber_count(&conv), 2);

        assert!(orch.inner.deliver(&conv, run_id, EventKind::status(AgentRole::Planner, AgentStatus::Thinking, "a")));
        assert_eq!(orch.subscriber_count(&conv), 1);
        assert!(!orch.inner.deliver(&conv, RunId::new(), EventKind::error("stale")));
        assert!(orch.inner.deliver(&conv, run_id, EventKind::final_message(AgentRole::Assistant, "done")));

        assert_eq!(rx.try_recv().unwrap().seq, 1);
        assert_eq!(rx.try_recv().unwrap().seq, 2);
        assert!(rx.try_recv().is_err());
        assert!(orch.status(&conv).is_none());
    }

    #[tokio::test]
    async fn test_run_completes_and_releases() {
        let orch = orchestrator();
        let (channel, mut rx) = QueueChannel::bounded(16);
        orch.subscribe(&id("c1"), Arc::new(channel));

        let handle = orch.start(id("c1"), "hi", Vec::new()).unwrap();
        let mut last = None;
        while let Some(event) = rx.recv().await {
            assert_eq!(event.run_id, handle.run_id);
            let done = event.is_terminal();
            last = Some(event);
            if done {
                break;
            }
        }
        assert_eq!(
            last.unwrap().kind,
            EventKind::final_message(AgentRole::Assistant, "echo: hi")
        );
        assert!(orch.status(&id("c1")).is_none());
        assert!(orch.shutdown().await);
    }

    #[tokio::test]
    async fn test_start_after_shutdown_refused() {
        let orch = orchestrator();
        assert!(orch.shutdown().await);
        assert!(matches!(
            orch.start(id("c1"), "hi", Vec::new()),
            Err(OrchestratorError::ShuttingDown)
        ));
    }

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(&boxed), "boom");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(&boxed), "bang");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(42);
        assert_eq!(panic_message(&boxed), "unknown panic");
    }
}
