//! Conversation history entries.

use serde::{Deserialize, Serialize};

/// Who wrote a history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    /// The submitted task message.
    User,
    /// A reply the agent addressed to the user.
    Assistant,
}

/// One entry of a project's conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    /// Unix timestamp (milliseconds) when the entry was recorded.
    pub timestamp_ms: i64,
}

impl ChatMessage {
    fn stamped(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Entry for a submitted task message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::stamped(ChatRole::User, content)
    }

    /// Entry for an agent reply.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::stamped(ChatRole::Assistant, content)
    }
}
