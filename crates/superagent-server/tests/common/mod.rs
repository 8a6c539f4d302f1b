//! Common test utilities for server integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use futures::{SinkExt, StreamExt};
use reqwest::Client;
use serde_json::Value;
use superagent_agent::{
    AgentError, CallerContext, EngineRequest, Orchestrator, OrchestratorDeps, OrchestratorOptions,
    ReasoningEngine, Step, StepStream, ToolRegistry,
};
use superagent_llm::{FixedResolver, MockModel, RoleBindings};
use superagent_server::{Server, ServerConfig};
use superagent_types::{AgentRole, AgentStatus};
use tokio::net::TcpListener;
use tokio::sync::{Notify, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

pub type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// A test server that runs in the background.
pub struct TestServer {
    pub addr: SocketAddr,
    /// Auth token, if the server requires one.
    pub token: Option<String>,
    pub client: Client,
    pub orchestrator: Orchestrator,
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl TestServer {
    /// Start a server without authentication.
    pub async fn start(engine: impl ReasoningEngine + 'static) -> Result<Self> {
        Self::start_with(engine, None, |config| config).await
    }

    /// Start a server that requires `test-token`.
    pub async fn start_with_auth(engine: impl ReasoningEngine + 'static) -> Result<Self> {
        Self::start_with(engine, Some("test-token".to_string()), |config| config).await
    }

    pub async fn start_with(
        engine: impl ReasoningEngine + 'static,
        token: Option<String>,
        configure: impl FnOnce(ServerConfig) -> ServerConfig,
    ) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let orchestrator = orchestrator(engine);
        let config = configure(
            ServerConfig::new(token.clone())
                .with_bind_address(addr)
                .with_request_logging(false),
        );
        let server = Server::new(orchestrator.clone(), config);

        let (tx, rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let _ = server
                .serve(listener, async move {
                    let _ = rx.await;
                })
                .await;
        });

        let client = Client::new();
        wait_for_server(&client, addr).await?;

        Ok(Self {
            addr,
            token,
            client,
            orchestrator,
            shutdown: Some(tx),
            handle,
        })
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.authorize(self.client.get(format!("{}{}", self.base_url(), path)))
    }

    pub fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.authorize(self.client.post(format!("{}{}", self.base_url(), path)))
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Open a WebSocket connection.
    pub async fn connect_ws(&self) -> Result<WsStream> {
        let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws", self.addr)).await?;
        Ok(ws)
    }

    /// Trigger graceful shutdown and wait for the server task.
    pub async fn stop(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        tokio::time::timeout(Duration::from_secs(10), &mut self.handle).await??;
        Ok(())
    }
}

async fn wait_for_server(client: &Client, addr: SocketAddr) -> Result<()> {
    let url = format!("http://{addr}/health");
    for _ in 0..50 {
        if let Ok(resp) = client.get(&url).send().await
            && resp.status().is_success()
        {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    bail!("server did not become ready at {addr}")
}

pub fn orchestrator(engine: impl ReasoningEngine + 'static) -> Orchestrator {
    let toolsets = |_: &CallerContext| ToolRegistry::new();
    Orchestrator::new(
        OrchestratorOptions::default()
            .with_tool_deadline(Duration::from_secs(5))
            .with_shutdown_grace(Duration::from_secs(5)),
        OrchestratorDeps {
            engine: Arc::new(engine),
            resolver: Arc::new(FixedResolver::new(Arc::new(MockModel::with_text("ok")))),
            bindings: RoleBindings::uniform("openai/gpt-4o-mini"),
            toolsets: Arc::new(toolsets),
        },
    )
}

// ─────────────────────────────────────────────────────────────────────────────
// WebSocket helpers
// ─────────────────────────────────────────────────────────────────────────────

pub async fn send_json(ws: &mut WsStream, value: Value) -> Result<()> {
    ws.send(Message::Text(value.to_string().into())).await?;
    Ok(())
}

/// Next JSON text message, skipping control frames.
pub async fn recv_json(ws: &mut WsStream) -> Result<Value> {
    loop {
        let Some(msg) = tokio::time::timeout(Duration::from_secs(10), ws.next()).await? else {
            bail!("websocket closed");
        };
        match msg? {
            Message::Text(text) => return Ok(serde_json::from_str(&text)?),
            Message::Close(_) => bail!("websocket closed"),
            _ => continue,
        }
    }
}

/// Next message whose `type` is `kind`, skipping others.
pub async fn recv_type(ws: &mut WsStream, kind: &str) -> Result<Value> {
    loop {
        let msg = recv_json(ws).await?;
        if msg["type"] == kind {
            return Ok(msg);
        }
    }
}

/// Collect `event` payloads until a terminal one arrives.
pub async fn events_until_terminal(ws: &mut WsStream) -> Result<Vec<Value>> {
    let mut events = Vec::new();
    loop {
        let msg = recv_type(ws, "event").await?;
        let event = msg["event"].clone();
        let terminal = match event["type"].as_str() {
            Some("message") => event["partial"] == false,
            Some("error") | Some("cancelled") => true,
            _ => false,
        };
        events.push(event);
        if terminal {
            return Ok(events);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Engines
// ─────────────────────────────────────────────────────────────────────────────

/// Emits a few status steps then answers with the query.
pub struct QuickEngine;

impl ReasoningEngine for QuickEngine {
    fn run(&self, request: EngineRequest) -> StepStream {
        Box::pin(async_stream::stream! {
            for i in 0..3 {
                yield Ok::<_, AgentError>(Step::status(AgentRole::Planner, AgentStatus::Thinking, format!("step {i}")));
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
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
