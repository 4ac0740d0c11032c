use std::sync::Arc;

use sha2::{Digest, Sha256};
use tracing::debug;

use strand_core::calls::{ToolCall, ToolResult};
use strand_core::errors::AgentError;
use strand_core::ids::{RunId, SessionId};
use strand_core::messages::Message;
use strand_core::storage::{CheckpointRecord, Storage};

/// Persists and recovers mid-execution state.
///
/// The fingerprint is stable for one (session, query, turn, toolset)
/// combination and mixes in a run identifier so checkpoints never
/// collide across processes. Integrity validation lives in the store;
/// a corrupt row comes back as a miss.
pub struct CheckpointManager {
    storage: Arc<dyn Storage>,
    run_id: RunId,
}

impl CheckpointManager {
    pub fn new(storage: Arc<dyn Storage>, run_id: RunId) -> Self {
        Self { storage, run_id }
    }

    pub fn fingerprint(
        &self,
        session_id: &SessionId,
        query: &str,
        turn: u32,
        tool_names: &[String],
    ) -> String {
        let mut sorted = tool_names.to_vec();
        sorted.sort();

        let mut hasher = Sha256::new();
        hasher.update(self.run_id.as_str().as_bytes());
        hasher.update(b"\x1f");
        hasher.update(session_id.as_str().as_bytes());
        hasher.update(b"\x1f");
        hasher.update(query.as_bytes());
        hasher.update(b"\x1f");
        hasher.update(turn.to_le_bytes());
        for name in &sorted {
            hasher.update(b"\x1f");
            hasher.update(name.as_bytes());
        }
        format!("{:x}", hasher.finalize())
    }

    pub async fn save(
        &self,
        fingerprint: &str,
        phase: &str,
        turn: u32,
        pending_calls: Vec<ToolCall>,
        completed_calls: Vec<ToolResult>,
    ) -> Result<(), AgentError> {
        let record = CheckpointRecord {
            fingerprint: fingerprint.to_string(),
            phase: phase.to_string(),
            turn,
            pending_calls,
            completed_calls,
        };
        self.storage.save_checkpoint(&record).await?;
        debug!(fingerprint = fingerprint, phase = phase, turn = turn, "checkpoint saved");
        Ok(())
    }

    pub async fn find(&self, fingerprint: &str) -> Result<Option<CheckpointRecord>, AgentError> {
        self.storage.find_checkpoint(fingerprint).await
    }

    pub async fn delete(&self, fingerprint: &str) -> Result<(), AgentError> {
        self.storage.delete_checkpoint(fingerprint).await
    }

    /// System message reinjected into the context when a session picks
    /// up from a checkpoint.
    pub fn resume_message(record: &CheckpointRecord) -> Message {
        let completed = record.completed_calls.len();
        let pending: Vec<&str> = record
            .pending_calls
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        Message::system(format!(
            "Resuming from checkpoint at turn {} (phase: {}). \
             {} tool call(s) already completed; pending: [{}]. \
             Do not repeat completed work.",
            record.turn,
            record.phase,
            completed,
            pending.join(", ")
        ))
    }
}
