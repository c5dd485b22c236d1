//! Project conversation history.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use agentrun_core::{ChatMessage, ProjectName};

/// Read access to a project's conversation history.
#[async_trait]
pub trait ProjectManager: Send + Sync + 'static {
    /// Messages exchanged for `project`, oldest first.
    async fn get_messages(&self, project: &ProjectName) -> Vec<ChatMessage>;
}

/// Conversation history kept in memory.
#[derive(Default)]
pub struct InMemoryProjectManager {
    messages: RwLock<HashMap<ProjectName, Vec<ChatMessage>>>,
}

impl InMemoryProjectManager {
    /// Create an empty history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message to the project's history.
    pub async fn record(&self, project: &ProjectName, message: ChatMessage) {
        self.messages
            .write()
            .await
            .entry(project.clone())
            .or_default()
            .push(message);
    }

    /// Names of all projects with history.
    pub async fn projects(&self) -> Vec<ProjectName> {
        let mut names: Vec<_> = self.messages.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl ProjectManager for InMemoryProjectManager {
    async fn get_messages(&self, project: &ProjectName) -> Vec<ChatMessage> {
        self.messages
            .read()
            .await
            .get(project)
            .cloned()
            .unwrap_or_default()
    }
}
