//! Token calculation handler.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};

use crate::http::responses::{ApiError, CalculateTokensRequest, TokenUsageResponse};
use crate::state::AppState;

/// Count the tokens in a prompt.
pub async fn calculate_tokens(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CalculateTokensRequest>, JsonRejection>,
) -> Result<Json<TokenUsageResponse>, ApiError> {
    let Json(req) = payload.map_err(|e| ApiError::InvalidJson {
        message: e.body_text(),
    })?;
    let token_usage = state.tokens.count_tokens(&req.prompt);
    Ok(Json(TokenUsageResponse { token_usage }))
}
