//! Live progress events emitted while a run executes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{EventId, ProjectName, RunId};

/// An ephemeral notification about run activity. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Unique event identifier.
    pub id: EventId,
    /// Project this event belongs to.
    pub project_name: ProjectName,
    /// Run this event belongs to.
    pub run_id: RunId,
    /// Unix timestamp (milliseconds) when event occurred.
    pub timestamp_ms: i64,
    /// Kind-specific payload.
    pub payload: ProgressPayload,
}

impl ProgressEvent {
    /// Create a new progress event.
    pub fn new(project_name: ProjectName, run_id: RunId, payload: ProgressPayload) -> Self {
        Self {
            id: EventId::generate(),
            project_name,
            run_id,
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
            payload,
        }
    }

    /// Create an info event.
    pub fn info(project_name: ProjectName, run_id: RunId, message: impl Into<String>) -> Self {
        Self::new(
            project_name,
            run_id,
            ProgressPayload::Info {
                message: message.into(),
            },
        )
    }

    /// Create a warning event.
    pub fn warning(project_name: ProjectName, run_id: RunId, message: impl Into<String>) -> Self {
        Self::new(
            project_name,
            run_id,
            ProgressPayload::Warning {
                message: message.into(),
            },
        )
    }

    /// Create a log event.
    pub fn log(project_name: ProjectName, run_id: RunId, message: impl Into<String>) -> Self {
        Self::new(
            project_name,
            run_id,
            ProgressPayload::Log {
                message: message.into(),
            },
        )
    }

    /// Create a terminal event carrying the latest terminal snapshot.
    pub fn terminal(project_name: ProjectName, run_id: RunId, session: Value) -> Self {
        Self::new(project_name, run_id, ProgressPayload::Terminal { session })
    }

    /// Kind of this event.
    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }
}

/// Event payload, one variant per event kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProgressPayload {
    /// Lifecycle information (run started, step summary, run finished).
    Info { message: String },
    /// Something went wrong or looks suspicious.
    Warning { message: String },
    /// A log line produced by the agent.
    Log { message: String },
    /// The terminal collaborator's latest snapshot.
    Terminal { session: Value },
}

impl ProgressPayload {
    /// Kind of this payload.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Info { .. } => EventKind::Info,
            Self::Warning { .. } => EventKind::Warning,
            Self::Log { .. } => EventKind::Log,
            Self::Terminal { .. } => EventKind::Terminal,
        }
    }
}

/// Kind of progress event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Info,
    Warning,
    Log,
    Terminal,
}

impl EventKind {
    /// Lowercase name, as used for SSE event names.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Log => "log",
            Self::Terminal => "terminal",
        }
    }
}
