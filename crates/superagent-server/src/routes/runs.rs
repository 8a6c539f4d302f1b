//! Run lifecycle endpoints.
//!
//! Starting a run returns immediately with its identity; progress is only
//! observable over the WebSocket adapter.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use superagent_agent::{CallerContext, RunHandle, RunSnapshot};
use superagent_types::{ConversationId, HistoryMessage};

use crate::error::{Result, ServerError};
use crate::state::AppState;

/// Body of `POST /conversations/{id}/runs`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StartRunRequest {
    pub query: String,
    #[serde(default)]
    pub history: Vec<HistoryMessage>,
    /// Selects the caller's tool workspace.
    #[serde(default)]
    pub user_id: Option<String>,
    /// Overrides the configured browser mode for this run.
    #[serde(default)]
    pub headless: Option<bool>,
}

impl StartRunRequest {
    pub(crate) fn caller(&self) -> CallerContext {
        let mut caller = match &self.user_id {
            Some(user) => CallerContext::for_user(user.clone()),
            None => CallerContext::anonymous(),
        };
        if let Some(headless) = self.headless {
            caller = caller.with_headless(headless);
        }
        caller
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CancelResponse {
    pub cancelled: bool,
}

#[derive(Debug, Serialize)]
pub struct ActiveRunsResponse {
    pub runs: Vec<RunSnapshot>,
    pub total: usize,
}

fn conversation(raw: &str) -> Result<ConversationId> {
    Ok(ConversationId::parse(raw)?)
}

/// POST /api/v1/conversations/{id}/runs
pub async fn start_run_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<StartRunRequest>,
) -> Result<(StatusCode, Json<RunHandle>)> {
    let conversation_id = conversation(&id)?;
    if request.query.trim().is_empty() {
        return Err(ServerError::BadRequest("query must not be empty".into()));
    }

    let handle = state.orchestrator.start_as(
        &request.caller(),
        conversation_id,
        request.query,
        request.history,
    )?;
    Ok((StatusCode::ACCEPTED, Json(handle)))
}

/// POST /api/v1/conversations/{id}/cancel
pub async fn cancel_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CancelResponse>> {
    let conversation_id = conversation(&id)?;
    Ok(Json(CancelResponse {
        cancelled: state.orchestrator.cancel(&conversation_id),
    }))
}

/// GET /api/v1/conversations/{id}
pub async fn conversation_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RunSnapshot>> {
    let conversation_id = conversation(&id)?;
    state
        .orchestrator
        .status(&conversation_id)
        .map(Json)
        .ok_or_else(|| ServerError::NotFound(format!("no active run for '{conversation_id}'")))
}

/// GET /api/v1/runs
pub async fn active_runs_handler(State(state): State<AppState>) -> Json<ActiveRunsResponse> {
    let runs = state.orchestrator.active_runs();
    Json(ActiveRunsResponse {
        total: runs.len(),
        runs,
    })
}
