//! Status enums for submissions and runs.

use serde::{Deserialize, Serialize};

/// What the orchestrator did with a submitted task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitOutcome {
    /// A fresh run was started.
    Accepted,
    /// A new logical run was started on top of a completed one.
    Resumed,
    /// A run is already in progress for the project; nothing was started.
    Rejected,
}

/// How a worker invokes the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// No prior context is continued.
    Fresh,
    /// The prior project state is handed to the agent as context.
    Resume,
}

/// Coarse phase of a project's latest run, derived from its state row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    /// A worker is executing (or the row claims one is).
    Running,
    /// The run finished without error.
    Succeeded,
    /// The run finished with an error.
    Failed,
    /// Neither active nor completed, left behind by an interrupted process.
    Interrupted,
}

impl RunPhase {
    /// Lowercase label used in metrics and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Interrupted => "interrupted",
        }
    }
}
