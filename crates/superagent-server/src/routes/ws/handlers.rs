//! WebSocket message handlers.

use std::sync::Arc;

use superagent_agent::ChannelClosed;
use superagent_types::ConversationId;

use super::connection::ConnectionState;
use super::protocol::{ClientMessage, ServerMessage};
use crate::auth::verify_token;
use crate::routes::runs::StartRunRequest;
use crate::state::AppState;

/// Handle one client message. Fails only when the connection can no longer
/// be written to.
pub async fn handle_message(
    msg: ClientMessage,
    conn: &mut ConnectionState,
    state: &AppState,
) -> Result<(), ChannelClosed> {
    match msg {
        ClientMessage::Auth { token } => handle_auth(&token, conn, state).await,
        ClientMessage::Ping => conn.reply(ServerMessage::Pong).await,
        _ if !conn.authenticated => {
            conn.reply(ServerMessage::error("unauthorized", "Authenticate first"))
                .await
        }
        ClientMessage::Subscribe { conversation_id } => {
            let Some(id) = parse_conversation(&conversation_id, conn).await? else {
                return Ok(());
            };
            subscribe(id, conn, state).await
        }
        ClientMessage::Unsubscribe { conversation_id } => {
            let Some(id) = parse_conversation(&conversation_id, conn).await? else {
                return Ok(());
            };
            handle_unsubscribe(id, conn, state).await
        }
        ClientMessage::Start {
            conversation_id,
            request,
        } => {
            let Some(id) = parse_conversation(&conversation_id, conn).await? else {
                return Ok(());
            };
            handle_start(id, request, conn, state).await
        }
        ClientMessage::Cancel { conversation_id } => {
            let Some(id) = parse_conversation(&conversation_id, conn).await? else {
                return Ok(());
            };
            let cancelled = state.orchestrator.cancel(&id);
            conn.reply(ServerMessage::CancelRequested {
                conversation_id: id.to_string(),
                cancelled,
            })
            .await
        }
    }
}

/// Validate a conversation id, replying with an error when it is invalid.
async fn parse_conversation(
    raw: &str,
    conn: &ConnectionState,
) -> Result<Option<ConversationId>, ChannelClosed> {
    match ConversationId::parse(raw) {
        Ok(id) => Ok(Some(id)),
        Err(e) => {
            conn.reply(ServerMessage::error("invalid_conversation", e.to_string()))
                .await?;
            Ok(None)
        }
    }
}

async fn handle_auth(
    token: &str,
    conn: &mut ConnectionState,
    state: &AppState,
) -> Result<(), ChannelClosed> {
    match verify_token(state.config.auth_token.as_deref(), Some(token)) {
        Ok(()) => {
            conn.authenticated = true;
            conn.reply(ServerMessage::auth_success()).await
        }
        Err(e) => {
            tracing::debug!(connection_id = %conn.id, error = %e, "WebSocket auth rejected");
            conn.reply(ServerMessage::auth_failure(e.to_string())).await
        }
    }
}

/// Subscribe the connection unless it already is. The acknowledgment is
/// queued before the observer is registered so it precedes every event.
async fn subscribe(
    id: ConversationId,
    conn: &mut ConnectionState,
    state: &AppState,
) -> Result<(), ChannelClosed> {
    conn.reply(ServerMessage::Subscribed {
        conversation_id: id.to_string(),
    })
    .await?;

    if conn.subscriptions.contains_key(&id) {
        return Ok(());
    }

    let handle = state.orchestrator.subscribe(&id, Arc::new(conn.observer()));
    tracing::debug!(
        connection_id = %conn.id,
        conversation_id = %id,
        subscription_id = %handle.subscription_id,
        "Connection subscribed"
    );
    conn.subscriptions.insert(id, handle.subscription_id);
    Ok(())
}

async fn handle_unsubscribe(
    id: ConversationId,
    conn: &mut ConnectionState,
    state: &AppState,
) -> Result<(), ChannelClosed> {
    let removed = match conn.subscriptions.remove(&id) {
        Some(subscription_id) => state.orchestrator.unsubscribe(&id, subscription_id),
        None => false,
    };
    conn.reply(ServerMessage::Unsubscribed {
        conversation_id: id.to_string(),
        removed,
    })
    .await
}

async fn handle_start(
    id: ConversationId,
    request: StartRunRequest,
    conn: &mut ConnectionState,
    state: &AppState,
) -> Result<(), ChannelClosed> {
    if request.query.trim().is_empty() {
        return conn
            .reply(ServerMessage::error("bad_request", "query must not be empty"))
            .await;
    }

    subscribe(id.clone(), conn, state).await?;

    let caller = request.caller();
    match state
        .orchestrator
        .start_as(&caller, id.clone(), request.query, request.history)
    {
        Ok(handle) => {
            conn.reply(ServerMessage::RunStarted {
                conversation_id: id.to_string(),
                run_id: handle.run_id,
            })
            .await
        }
        Err(e) => conn.reply(ServerMessage::error(e.code(), e.to_string())).await,
    }
}
