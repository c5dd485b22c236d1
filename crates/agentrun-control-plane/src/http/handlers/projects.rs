//! Task submission and project query handlers.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use tracing::info;

use agentrun_core::{ProjectState, SubmitOutcome};

use super::parse_project;
use crate::http::responses::{
    ActiveResponse, ApiError, BrowserSessionResponse, MessagesResponse, StateResponse,
    SubmitTaskRequest, TerminalSessionResponse, TokenUsageResponse,
};
use crate::state::AppState;

/// Submit a task for a project.
///
/// A rejected submission (a run is still in progress) answers 409 with the
/// same body shape as an accepted one.
pub async fn submit_task(
    State(state): State<Arc<AppState>>,
    Path(project): Path<String>,
    payload: Result<Json<SubmitTaskRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload.map_err(|e| ApiError::InvalidJson {
        message: e.body_text(),
    })?;

    info!(project = %project, message_len = req.message.len(), "Received task submission");
    let receipt = state.orchestrator.submit(&project, &req.message).await?;

    let status = match receipt.outcome {
        SubmitOutcome::Rejected => StatusCode::CONFLICT,
        SubmitOutcome::Accepted | SubmitOutcome::Resumed => StatusCode::OK,
    };
    Ok((status, Json(receipt)))
}

/// List the latest state of every project.
pub async fn list_projects(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<ProjectState>>, ApiError> {
    Ok(Json(state.orchestrator.list_projects().await?))
}

pub async fn get_state(
    State(state): State<Arc<AppState>>,
    Path(project): Path<String>,
) -> Result<Json<StateResponse>, ApiError> {
    let project = parse_project(project)?;
    let latest = state.orchestrator.latest_state(&project).await?;
    Ok(Json(StateResponse { state: latest }))
}

pub async fn get_active(
    State(state): State<Arc<AppState>>,
    Path(project): Path<String>,
) -> Result<Json<ActiveResponse>, ApiError> {
    let project = parse_project(project)?;
    let is_active = state.orchestrator.is_agent_active(&project).await?;
    Ok(Json(ActiveResponse { is_active }))
}

pub async fn get_browser_session(
    State(state): State<Arc<AppState>>,
    Path(project): Path<String>,
) -> Result<Json<BrowserSessionResponse>, ApiError> {
    let project = parse_project(project)?;
    let session = state.orchestrator.browser_session(&project).await?;
    Ok(Json(BrowserSessionResponse { session }))
}

pub async fn get_terminal_session(
    State(state): State<Arc<AppState>>,
    Path(project): Path<String>,
) -> Result<Json<TerminalSessionResponse>, ApiError> {
    let project = parse_project(project)?;
    let terminal_state = state.orchestrator.terminal_session(&project).await?;
    Ok(Json(TerminalSessionResponse { terminal_state }))
}

pub async fn get_token_usage(
    State(state): State<Arc<AppState>>,
    Path(project): Path<String>,
) -> Result<Json<TokenUsageResponse>, ApiError> {
    let project = parse_project(project)?;
    let token_usage = state.orchestrator.token_usage(&project).await?;
    Ok(Json(TokenUsageResponse { token_usage }))
}

pub async fn get_messages(
    State(state): State<Arc<AppState>>,
    Path(project): Path<String>,
) -> Result<Json<MessagesResponse>, ApiError> {
    let project = parse_project(project)?;
    let messages = state.orchestrator.messages(&project).await;
    Ok(Json(MessagesResponse { messages }))
}
