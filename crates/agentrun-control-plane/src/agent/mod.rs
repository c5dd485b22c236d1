//! The opaque reasoning operation and its collaborators.
//!
//! An [`Agent`] runs one task to completion or failure. It has no return
//! value beyond success/failure: everything it wants observed goes through
//! the [`StepReporter`] handed to it in [`AgentRun`].

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use agentrun_core::{ProjectName, ProjectState, RunErrorKind, RunId};

use crate::store::StoreError;
pub use crate::worker::StepReporter;

mod command;
mod project;

pub use command::{AgentLine, CommandAgent};
pub use project::{InMemoryProjectManager, ProjectManager};

/// Errors an agent run can end with.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Agent process I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Agent process exited with error: {0}")]
    Process(String),

    #[error("Reasoning failed: {0}")]
    Reasoning(String),

    /// The project's state row no longer belongs to this run.
    #[error("Run {run_id} of project '{project}' was superseded")]
    Superseded { project: ProjectName, run_id: RunId },

    #[error("Failed to persist progress: {0}")]
    Storage(#[from] StoreError),
}

impl AgentError {
    /// How the failure is recorded on the project state.
    pub fn run_error_kind(&self) -> RunErrorKind {
        match self {
            Self::Storage(_) => RunErrorKind::Storage,
            _ => RunErrorKind::Reasoning,
        }
    }
}

/// Everything an agent gets for one run.
pub struct AgentRun {
    /// Project the run belongs to.
    pub project_name: ProjectName,
    /// Run being executed.
    pub run_id: RunId,
    /// Task description.
    pub message: String,
    /// State of the previous run, when resuming.
    pub prior_state: Option<ProjectState>,
    /// Channel for progress: persisted steps and log lines.
    pub reporter: StepReporter,
}

/// Progress made by one reasoning step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepUpdate {
    /// Tokens consumed by the step, added to the run's total.
    pub tokens_used: u64,
    /// Replacement browser snapshot.
    pub browser_session: Option<Value>,
    /// Replacement terminal snapshot.
    pub terminal_session: Option<Value>,
    /// Log line describing the step.
    pub log: Option<String>,
}

impl StepUpdate {
    /// Create an empty step update.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to add token usage.
    pub fn with_tokens(mut self, tokens: u64) -> Self {
        self.tokens_used = tokens;
        self
    }

    /// Builder method to set the browser snapshot.
    pub fn with_browser_session(mut self, session: Value) -> Self {
        self.browser_session = Some(session);
        self
    }

    /// Builder method to set the terminal snapshot.
    pub fn with_terminal_session(mut self, session: Value) -> Self {
        self.terminal_session = Some(session);
        self
    }

    /// Builder method to attach a log line.
    pub fn with_log(mut self, line: impl Into<String>) -> Self {
        self.log = Some(line.into());
        self
    }
}

/// The reasoning operation driven by a worker.
#[async_trait]
pub trait Agent: Send + Sync + 'static {
    /// Work on a task from scratch.
    async fn execute(&self, run: AgentRun) -> Result<(), AgentError>;

    /// Work on a follow-up task, with the previous run's state as context.
    async fn subsequent_execute(&self, run: AgentRun) -> Result<(), AgentError>;
}
