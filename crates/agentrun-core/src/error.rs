//! Core domain errors.

use thiserror::Error;

/// Core domain errors for agentrun.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    /// Project name failed validation.
    #[error("Invalid project name '{name}': {reason}")]
    InvalidProjectName { name: String, reason: &'static str },

    /// Task message failed validation.
    #[error("Invalid task message: {0}")]
    InvalidMessage(&'static str),
}
