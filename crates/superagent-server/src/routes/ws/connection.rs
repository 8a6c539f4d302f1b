//! WebSocket connection lifecycle and state management.
//!
//! Each connection owns one bounded outbound queue drained by a writer task.
//! Replies and broadcast events share that queue, so a client sees them in
//! the order they were enqueued.

use std::collections::HashMap;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use superagent_agent::{ChannelClosed, ObserverChannel};
use superagent_types::{ConversationId, Event, SubscriptionId};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::handlers::handle_message;
use super::protocol::{ClientMessage, ServerMessage};
use crate::state::AppState;

/// How long the writer may keep draining after the read side closes.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Unique identifier for a WebSocket connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// State for a WebSocket connection.
pub struct ConnectionState {
    pub id: ConnectionId,
    pub authenticated: bool,
    /// Live subscriptions held by this connection.
    pub subscriptions: HashMap<ConversationId, SubscriptionId>,
    outbound: mpsc::Sender<ServerMessage>,
    /// Cancelled when the writer fails or the queue overflows.
    pub cancellation: CancellationToken,
}

impl ConnectionState {
    pub fn new(outbound: mpsc::Sender<ServerMessage>, cancellation: CancellationToken) -> Self {
        Self {
            id: ConnectionId::new(),
            authenticated: false,
            subscriptions: HashMap::new(),
            outbound,
            cancellation,
        }
    }

    /// Enqueue a reply, waiting for queue space.
    pub async fn reply(&self, msg: ServerMessage) -> Result<(), ChannelClosed> {
        tokio::select! {
            sent = self.outbound.send(msg) => sent.map_err(|_| ChannelClosed),
            _ = self.cancellation.cancelled() => Err(ChannelClosed),
        }
    }

    /// Observer channel that feeds broadcast events into this connection.
    pub fn observer(&self) -> WsObserver {
        WsObserver {
            connection_id: self.id,
            outbound: self.outbound.clone(),
            cancellation: self.cancellation.clone(),
        }
    }

    /// Unsubscribe every subscription this connection holds.
    pub fn release(&mut self, state: &AppState) {
        for (conversation_id, subscription_id) in self.subscriptions.drain() {
            state.orchestrator.unsubscribe(&conversation_id, subscription_id);
        }
    }
}

/// Adapts a connection's outbound queue to [`ObserverChannel`].
///
/// Never blocks the broadcaster: a full queue means the client is not
/// keeping up, so the whole connection is closed.
pub struct WsObserver {
    connection_id: ConnectionId,
    outbound: mpsc::Sender<ServerMessage>,
    cancellation: CancellationToken,
}

impl ObserverChannel for WsObserver {
    fn send(&self, event: &Event) -> Result<(), ChannelClosed> {
        match self.outbound.try_send(ServerMessage::Event {
            event: event.clone(),
        }) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                tracing::warn!(
                    connection_id = %self.connection_id,
                    conversation_id = %event.conversation_id,
                    seq = event.seq,
                    "Outbound queue full, closing slow connection"
                );
                self.cancellation.cancel();
                Err(ChannelClosed)
            }
            Err(TrySendError::Closed(_)) => Err(ChannelClosed),
        }
    }

    fn is_open(&self) -> bool {
        !self.cancellation.is_cancelled() && !self.outbound.is_closed()
    }
}

/// Drain the outbound queue into the socket until the queue closes or the
/// connection is cancelled.
async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<ServerMessage>,
    cancellation: CancellationToken,
    connection_id: ConnectionId,
) {
    loop {
        let msg = tokio::select! {
            _ = cancellation.cancelled() => break,
            msg = rx.recv() => match msg {
                Some(msg) => msg,
                None => break,
            },
        };

        let text = match serde_json::to_string(&msg) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(%connection_id, error = %e, "Failed to serialize message");
                continue;
            }
        };

        if let Err(e) = sink.send(Message::Text(text.into())).await {
            tracing::debug!(%connection_id, error = %e, "WebSocket write failed");
            break;
        }
    }

    cancellation.cancel();
    let _ = sink.close().await;
}

/// Handle a WebSocket connection.
pub async fn handle_socket(socket: WebSocket, state: AppState) {
    let (sink, mut receiver) = socket.split();
    let cancellation = CancellationToken::new();
    let (outbound, rx) = mpsc::channel(state.config.ws_queue_capacity);
    let mut conn = ConnectionState::new(outbound, cancellation.clone());
    let mut writer = tokio::spawn(write_loop(sink, rx, cancellation.clone(), conn.id));

    tracing::debug!(connection_id = %conn.id, "WebSocket connection established");

    // Localhost mode
    if state.config.auth_token.is_none() {
        conn.authenticated = true;
    }

    let idle_timeout = state.config.ws_idle_timeout;
    loop {
        let next = tokio::select! {
            biased;
            _ = cancellation.cancelled() => break,
            next = tokio::time::timeout(idle_timeout, receiver.next()) => next,
        };

        let msg = match next {
            Ok(Some(Ok(msg))) => msg,
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                tracing::debug!(connection_id = %conn.id, error = %e, "WebSocket read failed");
                break;
            }
            Err(_) => {
                tracing::info!(
                    connection_id = %conn.id,
                    "WebSocket connection closed due to idle timeout"
                );
                let _ = conn
                    .reply(ServerMessage::error(
                        "idle_timeout",
                        "Connection closed due to inactivity",
                    ))
                    .await;
                break;
            }
        };

        // Binary frames are accepted when they carry UTF-8 JSON.
        let text = match msg {
            Message::Text(text) => text.to_string(),
            Message::Binary(data) => match String::from_utf8(data.to_vec()) {
                Ok(text) => text,
                Err(_) => {
                    if conn
                        .reply(ServerMessage::error("invalid_message", "Binary data must be UTF-8"))
                        .await
                        .is_err()
                    {
                        break;
                    }
                    continue;
                }
            },
            Message::Ping(_) | Message::Pong(_) => continue,
            Message::Close(_) => break,
        };

        let client_msg: ClientMessage = match serde_json::from_str(&text) {
            Ok(m) => m,
            Err(e) => {
                if conn
                    .reply(ServerMessage::error("parse_error", format!("Invalid message: {e}")))
                    .await
                    .is_err()
                {
                    break;
                }
                continue;
            }
        };

        if handle_message(client_msg, &mut conn, &state).await.is_err() {
            break;
        }
    }

    let subscriptions = conn.subscriptions.len();
    conn.release(&state);
    drop(conn);

    // The queue closes once every sender is gone; give the writer a moment
    // to flush what is already queued.
    if tokio::time::timeout(FLUSH_TIMEOUT, &mut writer).await.is_err() {
        cancellation.cancel();
        let _ = writer.await;
    }

    tracing::debug!(subscriptions, "WebSocket connection closed");
}
