use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::params;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use strand_core::errors::AgentError;
use strand_core::ids::{ConversationId, UserId};
use strand_core::messages::Role;
use strand_core::storage::{CheckpointRecord, Storage, StoredMessage};

use crate::database::Database;
use crate::error::StoreError;

/// SQLite-backed `Storage` implementation.
///
/// With profile tracking disabled, profile loads degrade to `None`
/// instead of failing the turn; every other operation propagates.
pub struct SqliteStorage {
    db: Database,
    profile_tracking: bool,
}

impl SqliteStorage {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            profile_tracking: true,
        }
    }

    pub fn with_profile_tracking(mut self, enabled: bool) -> Self {
        self.profile_tracking = enabled;
        self
    }

    fn load_profile_inner(&self, user_id: &UserId) -> Result<Option<String>, StoreError> {
        self.db.with_conn(|conn| {
            let result = conn.query_row(
                "SELECT profile FROM profiles WHERE user_id = ?1",
                params![user_id.as_str()],
                |row| row.get::<_, String>(0),
            );
            match result {
                Ok(profile) => Ok(Some(profile)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
    }
}

/// Integrity digest over the checkpoint payload. Stored beside the row
/// and recomputed on read; a mismatch invalidates the checkpoint.
fn checkpoint_digest(record: &CheckpointRecord) -> Result<String, StoreError> {
    let payload = serde_json::to_string(record)?;
    let mut hasher = Sha256::new();
    hasher.update(payload.as_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn load_messages(
        &self,
        conversation_id: &ConversationId,
        limit: Option<usize>,
    ) -> Result<Vec<StoredMessage>, AgentError> {
        let messages = self.db.with_conn(|conn| {
            let mut rows: Vec<StoredMessage> = match limit {
                // Most recent `n` rows, returned in chronological order.
                Some(n) => conn
                    .prepare(
                        "SELECT role, content, timestamp FROM messages \
                         WHERE conversation_id = ?1 ORDER BY id DESC LIMIT ?2",
                    )?
                    .query_map(params![conversation_id.as_str(), n], row_to_message)?
                    .collect::<Result<_, _>>()?,
                None => conn
                    .prepare(
                        "SELECT role, content, timestamp FROM messages \
                         WHERE conversation_id = ?1 ORDER BY id ASC",
                    )?
                    .query_map(params![conversation_id.as_str()], row_to_message)?
                    .collect::<Result<_, _>>()?,
            };
            if limit.is_some() {
                rows.reverse();
            }
            Ok(rows)
        })?;
        Ok(messages)
    }

    async fn save_message(
        &self,
        conversation_id: &ConversationId,
        role: Role,
        content: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<(), AgentError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (conversation_id, role, content, timestamp) \
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    conversation_id.as_str(),
                    role.to_string(),
                    content,
                    timestamp.to_rfc3339()
                ],
            )?;
            Ok(())
        })?;
        Ok(())
    }

    async fn load_profile(&self, user_id: &UserId) -> Result<Option<String>, AgentError> {
        match self.load_profile_inner(user_id) {
            Ok(profile) => Ok(profile),
            Err(e) if !self.profile_tracking => {
                debug!(user_id = %user_id, error = %e, "profile load skipped");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn save_profile(&self, user_id: &UserId, profile: &str) -> Result<(), AgentError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO profiles (user_id, profile, updated_at) VALUES (?1, ?2, ?3) \
                 ON CONFLICT(user_id) DO UPDATE SET profile = ?2, updated_at = ?3",
                params![user_id.as_str(), profile, Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })?;
        Ok(())
    }

    async fn save_event(
        &self,
        conversation_id: &ConversationId,
        event_type: &str,
        content: &Value,
    ) -> Result<(), AgentError> {
        let payload = serde_json::to_string(content).map_err(StoreError::from)?;
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO events (conversation_id, type, payload, timestamp) \
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    conversation_id.as_str(),
                    event_type,
                    payload,
                    Utc::now().to_rfc3339()
                ],
            )?;
            Ok(())
        })?;
        Ok(())
    }

    async fn save_checkpoint(&self, record: &CheckpointRecord) -> Result<(), AgentError> {
        let digest = checkpoint_digest(record)?;
        let pending = serde_json::to_string(&record.pending_calls).map_err(StoreError::from)?;
        let completed =
            serde_json::to_string(&record.completed_calls).map_err(StoreError::from)?;
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO checkpoints \
                 (fingerprint, phase, turn, pending_calls, completed_calls, digest, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
                 ON CONFLICT(fingerprint) DO UPDATE SET \
                 phase = ?2, turn = ?3, pending_calls = ?4, completed_calls = ?5, \
                 digest = ?6, created_at = ?7",
                params![
                    record.fingerprint,
                    record.phase,
                    record.turn,
                    pending,
                    completed,
                    digest,
                    Utc::now().to_rfc3339()
                ],
            )?;
            Ok(())
        })?;
        Ok(())
    }

    async fn find_checkpoint(
        &self,
        fingerprint: &str,
    ) -> Result<Option<CheckpointRecord>, AgentError> {
        let row = self.db.with_conn(|conn| {
            let result = conn.query_row(
                "SELECT phase, turn, pending_calls, completed_calls, digest \
                 FROM checkpoints WHERE fingerprint = ?1",
                params![fingerprint],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, u32>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            );
            match result {
                Ok(row) => Ok(Some(row)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })?;

        let Some((phase, turn, pending, completed, stored_digest)) = row else {
            return Ok(None);
        };

        let decoded = serde_json::from_str(&pending).and_then(|pending_calls| {
            serde_json::from_str(&completed).map(|completed_calls| CheckpointRecord {
                fingerprint: fingerprint.to_string(),
                phase,
                turn,
                pending_calls,
                completed_calls,
            })
        });

        let valid = match decoded {
            Ok(record) => match checkpoint_digest(&record) {
                Ok(digest) if digest == stored_digest => Some(record),
                _ => None,
            },
            Err(_) => None,
        };

        match valid {
            Some(record) => Ok(Some(record)),
            None => {
                // Corrupt rows are removed so the next lookup is a clean miss.
                warn!(fingerprint = fingerprint, "checkpoint failed integrity check, deleting");
                self.delete_checkpoint(fingerprint).await?;
                Ok(None)
            }
        }
    }

    async fn delete_checkpoint(&self, fingerprint: &str) -> Result<(), AgentError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "DELETE FROM checkpoints WHERE fingerprint = ?1",
                params![fingerprint],
            )?;
            Ok(())
        })?;
        Ok(())
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredMessage> {
    let role_str: String = row.get(0)?;
    let content: String = row.get(1)?;
    let ts_str: String = row.get(2)?;

    let role: Role = role_str.parse().map_err(|e: String| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
        )
    })?;
    let timestamp = DateTime::parse_from_rfc3339(&ts_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                2,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })?;

    Ok(StoredMessage {
        role,
        content,
        timestamp,
    })
}
