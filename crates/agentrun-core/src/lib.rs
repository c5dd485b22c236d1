//! agentrun Core Domain Types
//!
//! This crate contains pure domain types with no dependencies on:
//! - Network/HTTP
//! - Database
//! - Runtime specifics
//!
//! All types here describe per-project agent runs: the durable
//! [`ProjectState`] snapshot and the ephemeral [`ProgressEvent`]s
//! emitted while a run is in flight.

pub mod chat;
pub mod error;
pub mod event;
pub mod ids;
pub mod state;
pub mod status;

// Re-export commonly used types
pub use chat::{ChatMessage, ChatRole};
pub use error::CoreError;
pub use event::{EventKind, ProgressEvent, ProgressPayload};
pub use ids::{EventId, ProjectName, RunId};
pub use state::{ProjectState, RunError, RunErrorKind};
pub use status::{RunMode, RunPhase, SubmitOutcome};
