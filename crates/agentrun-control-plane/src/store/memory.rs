//! In-memory state store.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use agentrun_core::{ProjectName, ProjectState};

use super::{StateStore, StoreError};

/// State store backed by a map. Contents are lost on restart.
#[derive(Default)]
pub struct InMemoryStateStore {
    rows: RwLock<BTreeMap<ProjectName, ProjectState>>,
}

impl InMemoryStateStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of stored rows.
    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    /// Returns true if no row is stored.
    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn get(&self, project: &ProjectName) -> Result<Option<ProjectState>, StoreError> {
        Ok(self.rows.read().await.get(project).cloned())
    }

    async fn put(&self, state: &ProjectState) -> Result<(), StoreError> {
        self.rows
            .write()
            .await
            .insert(state.project_name.clone(), state.clone());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<ProjectState>, StoreError> {
        Ok(self.rows.read().await.values().cloned().collect())
    }
}
