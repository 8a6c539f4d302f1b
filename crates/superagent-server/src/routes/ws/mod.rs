//! WebSocket observer adapter.
//!
//! A connection can subscribe to any number of conversations and start or
//! cancel runs. Broadcast events arrive as `event` messages.
//!
//! ## Module Structure
//!
//! - `protocol` - Message types (ClientMessage, ServerMessage)
//! - `connection` - Connection lifecycle, outbound queue and observer channel
//! - `handlers` - Message processing logic

mod connection;
mod handlers;
mod protocol;

use axum::{
    extract::{State, ws::WebSocketUpgrade},
    response::Response,
};

use crate::state::AppState;

pub use connection::{ConnectionId, WsObserver};
pub use protocol::{ClientMessage, ServerMessage};

/// GET /ws - WebSocket upgrade handler.
///
/// Authentication happens via the first message (Auth type) rather than
/// HTTP headers, since browsers cannot set custom headers on WebSocket.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.max_message_size(state.config.max_ws_message_size)
        .on_upgrade(move |socket| connection::handle_socket(socket, state))
}
