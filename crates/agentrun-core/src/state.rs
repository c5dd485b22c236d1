//! Durable per-project run state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{ProjectName, RunId, RunPhase};

/// Durable snapshot of a project's most recent or in-progress run.
///
/// Exactly one row exists per project. It is only ever replaced in full;
/// the transition methods below keep `agent_is_active` and `completed`
/// mutually exclusive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectState {
    /// Project this row belongs to.
    pub project_name: ProjectName,

    /// Run the row currently describes.
    pub run_id: RunId,

    /// A worker is executing this run.
    pub agent_is_active: bool,

    /// The run reached a terminal state.
    pub completed: bool,

    /// Opaque snapshot from the browser-automation collaborator.
    pub browser_session: Option<Value>,

    /// Opaque snapshot from the terminal collaborator.
    pub terminal_session: Option<Value>,

    /// Tokens consumed by the current run.
    pub token_usage: u64,

    /// When the row was last mutated.
    pub last_updated: DateTime<Utc>,

    /// Why the run failed, if it did.
    pub error: Option<RunError>,
}

impl ProjectState {
    /// State of a project's first run, active from the start.
    pub fn fresh(project_name: ProjectName) -> Self {
        Self {
            project_name,
            run_id: RunId::INITIAL,
            agent_is_active: true,
            completed: false,
            browser_session: None,
            terminal_session: None,
            token_usage: 0,
            last_updated: Utc::now(),
            error: None,
        }
    }

    /// Restart the row as an active run with the given id.
    ///
    /// Token usage and error belong to a single run and are cleared. The
    /// session snapshots are kept as context for the next run.
    pub fn begin_run(&mut self, run_id: RunId) {
        self.run_id = run_id;
        self.agent_is_active = true;
        self.completed = false;
        self.token_usage = 0;
        self.error = None;
        self.touch();
    }

    /// Start the row's current run over from scratch, keeping its id.
    ///
    /// Unlike [`begin_run`](Self::begin_run) nothing of the previous attempt
    /// survives, snapshots included.
    pub fn restart(&mut self) {
        self.browser_session = None;
        self.terminal_session = None;
        self.begin_run(self.run_id);
    }

    /// Move the row into its terminal state.
    pub fn finalize(&mut self, error: Option<RunError>) {
        self.agent_is_active = false;
        self.completed = true;
        self.error = error;
        self.touch();
    }

    /// Bump `last_updated` without ever moving it backwards.
    pub fn touch(&mut self) {
        let now = Utc::now();
        if now > self.last_updated {
            self.last_updated = now;
        }
    }

    /// Returns true if the row still describes the given live run.
    pub fn is_owned_by(&self, run_id: RunId) -> bool {
        self.run_id == run_id && self.agent_is_active && !self.completed
    }

    /// Returns true if the active/completed flags agree with each other.
    pub fn is_consistent(&self) -> bool {
        !(self.agent_is_active && self.completed) && (self.error.is_none() || self.completed)
    }

    /// Coarse phase of the run.
    pub fn phase(&self) -> RunPhase {
        match (self.agent_is_active, self.completed, &self.error) {
            (_, true, Some(_)) => RunPhase::Failed,
            (_, true, None) => RunPhase::Succeeded,
            (true, false, _) => RunPhase::Running,
            (false, false, _) => RunPhase::Interrupted,
        }
    }
}

/// Category of a run failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunErrorKind {
    /// The agent returned an error.
    Reasoning,
    /// The run exceeded its deadline.
    Timeout,
    /// Progress could not be persisted.
    Storage,
    /// The agent panicked.
    Panicked,
}

/// Error descriptor stored on a failed run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunError {
    pub kind: RunErrorKind,
    pub message: String,
}

impl RunError {
    /// Create a new RunError.
    pub fn new(kind: RunErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}
