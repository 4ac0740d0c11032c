use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::calls::{ToolCall, ToolResult};
use crate::errors::AgentError;
use crate::ids::{ConversationId, UserId};
use crate::messages::Role;

/// A persisted conversation message.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoredMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// Persisted mid-execution state for resumability.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CheckpointRecord {
    pub fingerprint: String,
    pub phase: String,
    pub turn: u32,
    pub pending_calls: Vec<ToolCall>,
    pub completed_calls: Vec<ToolResult>,
}

/// Persistence collaborator. All operations are awaited; failures
/// propagate except profile loads when profile tracking is disabled
/// (the implementation decides based on its configuration).
#[async_trait]
pub trait Storage: Send + Sync {
    async fn load_messages(
        &self,
        conversation_id: &ConversationId,
        limit: Option<usize>,
    ) -> Result<Vec<StoredMessage>, AgentError>;

    async fn save_message(
        &self,
        conversation_id: &ConversationId,
        role: Role,
        content: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<(), AgentError>;

    async fn load_profile(&self, user_id: &UserId) -> Result<Option<String>, AgentError>;

    async fn save_profile(&self, user_id: &UserId, profile: &str) -> Result<(), AgentError>;

    async fn save_event(
        &self,
        conversation_id: &ConversationId,
        event_type: &str,
        content: &Value,
    ) -> Result<(), AgentError>;

    async fn save_checkpoint(&self, record: &CheckpointRecord) -> Result<(), AgentError>;

    /// Returns `None` both on a genuine miss and when a stored row
    /// failed integrity validation (the corrupt row is deleted).
    async fn find_checkpoint(
        &self,
        fingerprint: &str,
    ) -> Result<Option<CheckpointRecord>, AgentError>;

    async fn delete_checkpoint(&self, fingerprint: &str) -> Result<(), AgentError>;
}
