//! Durable per-project state snapshots.
//!
//! A store holds exactly one [`ProjectState`] row per project. Each call is
//! atomic on its own; read-modify-write sequences are serialized by the
//! caller through [`crate::locks::ProjectLocks`].

use async_trait::async_trait;
use thiserror::Error;

use agentrun_core::{ProjectName, ProjectState};

mod memory;
mod sqlite;

pub use memory::InMemoryStateStore;
pub use sqlite::SqliteStateStore;

/// State store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store cannot be reached.
    #[error("State store unavailable: {0}")]
    Unavailable(String),

    /// A stored row could not be decoded.
    #[error("Corrupt state for project '{project}': {reason}")]
    Corrupt { project: String, reason: String },
}

/// Data-access layer for project states.
#[async_trait]
pub trait StateStore: Send + Sync + 'static {
    /// Latest state of a project, if one was ever stored.
    async fn get(&self, project: &ProjectName) -> Result<Option<ProjectState>, StoreError>;

    /// Replace the project's row with `state`.
    async fn put(&self, state: &ProjectState) -> Result<(), StoreError>;

    /// All stored rows, ordered by project name.
    async fn list(&self) -> Result<Vec<ProjectState>, StoreError>;
}
