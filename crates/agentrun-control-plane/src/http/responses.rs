//! HTTP request and response types.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use agentrun_core::{ChatMessage, ProjectState};

use crate::orchestrator::SubmitError;
use crate::store::StoreError;

// ============================================================================
// Task submission
// ============================================================================

/// Request body for the submit endpoint.
#[derive(Debug, Deserialize)]
pub struct SubmitTaskRequest {
    /// Task description handed to the agent.
    pub message: String,
}

// ============================================================================
// Project queries
// ============================================================================

/// Latest state of a project; `null` if it never ran.
#[derive(Debug, Serialize)]
pub struct StateResponse {
    pub state: Option<ProjectState>,
}

#[derive(Debug, Serialize)]
pub struct ActiveResponse {
    pub is_active: bool,
}

#[derive(Debug, Serialize)]
pub struct BrowserSessionResponse {
    pub session: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct TerminalSessionResponse {
    pub terminal_state: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct TokenUsageResponse {
    pub token_usage: u64,
}

#[derive(Debug, Serialize)]
pub struct MessagesResponse {
    pub messages: Vec<ChatMessage>,
}

// ============================================================================
// Token calculation
// ============================================================================

/// Request body for the token calculation endpoint.
#[derive(Debug, Deserialize)]
pub struct CalculateTokensRequest {
    pub prompt: String,
}

// ============================================================================
// Server status
// ============================================================================

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: i64,
    pub live_workers: usize,
    pub progress_subscribers: usize,
}

// ============================================================================
// Error types
// ============================================================================

/// Error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
}

/// API errors with their HTTP status codes.
#[derive(Debug)]
pub enum ApiError {
    /// Malformed request body.
    InvalidJson { message: String },
    /// Well-formed request the server refuses (bad project name, empty message).
    InvalidRequest { message: String },
    /// The state store could not be reached.
    StorageUnavailable { message: String },
    /// The project's stored row cannot be decoded.
    CorruptState { message: String },
    /// The project cannot take another run.
    RunIdsExhausted { message: String },
}

impl From<SubmitError> for ApiError {
    fn from(err: SubmitError) -> Self {
        match err {
            SubmitError::InvalidRequest(message) => Self::InvalidRequest { message },
            SubmitError::StorageUnavailable(e) => Self::StorageUnavailable {
                message: e.to_string(),
            },
            SubmitError::CorruptState(e) => Self::CorruptState {
                message: e.to_string(),
            },
            err @ SubmitError::RunIdsExhausted { .. } => Self::RunIdsExhausted {
                message: err.to_string(),
            },
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Corrupt { .. } => Self::CorruptState {
                message: err.to_string(),
            },
            StoreError::Unavailable(_) => Self::StorageUnavailable {
                message: err.to_string(),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, error) = match self {
            ApiError::InvalidJson { message } => (StatusCode::BAD_REQUEST, "invalid_json", message),
            ApiError::InvalidRequest { message } => {
                (StatusCode::BAD_REQUEST, "invalid_request", message)
            }
            ApiError::StorageUnavailable { message } => (
                StatusCode::SERVICE_UNAVAILABLE,
                "storage_unavailable",
                message,
            ),
            ApiError::CorruptState { message } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "corrupt_state", message)
            }
            ApiError::RunIdsExhausted { message } => {
                (StatusCode::CONFLICT, "run_ids_exhausted", message)
            }
        };

        (status, Json(ErrorResponse { error, code })).into_response()
    }
}
