//! API routes.

pub mod health;
pub mod runs;
pub mod ws;

pub use health::health_routes;
pub use runs::{
    CancelResponse, StartRunRequest, active_runs_handler, cancel_handler, conversation_handler,
    start_run_handler,
};
pub use ws::{ClientMessage, ServerMessage, ws_handler};
