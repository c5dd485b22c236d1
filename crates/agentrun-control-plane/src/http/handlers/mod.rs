//! HTTP request handlers.

mod events;
mod health;
mod projects;
mod tokens;

pub use events::project_events;
pub use health::{health_check, metrics_handler, server_status};
pub use projects::{
    get_active, get_browser_session, get_messages, get_state, get_terminal_session,
    get_token_usage, list_projects, submit_task,
};
pub use tokens::calculate_tokens;

use agentrun_core::ProjectName;

use crate::http::responses::ApiError;

/// Validate a project name taken from the request path.
fn parse_project(name: String) -> Result<ProjectName, ApiError> {
    ProjectName::new(name).map_err(|e| ApiError::InvalidRequest {
        message: e.to_string(),
    })
}
