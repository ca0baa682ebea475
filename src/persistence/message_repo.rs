//! Append-only repository for assembled session messages.

use std::sync::Arc;

use chrono::Utc;

use crate::models::message::{MessageKind, MessagePayload, SessionMessage};
use crate::{AppError, Result};

use super::db::Database;

/// Repository wrapper around `SQLite` for session messages.
#[derive(Clone)]
pub struct MessageRepo {
    db: Arc<Database>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct MessageRow {
    session_id: String,
    sequence: i64,
    payload: String,
    created_at: String,
}

impl MessageRow {
    /// Convert a database row into the domain model.
    fn into_message(self) -> Result<SessionMessage> {
        let payload: MessagePayload = serde_json::from_str(&self.payload)
            .map_err(|e| AppError::Db(format!("invalid message payload json: {e}")))?;
        let created_at = chrono::DateTime::parse_from_rfc3339(&self.created_at)
            .map_err(|e| AppError::Db(format!("invalid created_at: {e}")))?
            .with_timezone(&Utc);
        let sequence = u64::try_from(self.sequence)
            .map_err(|_| AppError::Db(format!("negative sequence {}", self.sequence)))?;

        Ok(SessionMessage {
            session_id: self.session_id,
            sequence,
            payload,
            created_at,
        })
    }
}

/// Serialize a kind enum to its database string.
fn kind_str(k: MessageKind) -> &'static str {
    match k {
        MessageKind::AgentMessage => "agent_message",
        MessageKind::AgentThought => "agent_thought",
        MessageKind::ToolCall => "tool_call",
        MessageKind::ModeChange => "mode_change",
    }
}

impl MessageRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Append one assembled message.
    ///
    /// The `(session_id, sequence)` primary key rejects duplicates, which
    /// keeps the per-session sequence space append-only.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the insert fails (including sequence reuse).
    pub async fn append(&self, message: &SessionMessage) -> Result<()> {
        let payload = serde_json::to_string(&message.payload)
            .map_err(|e| AppError::Db(format!("failed to serialize message payload: {e}")))?;
        let sequence = i64::try_from(message.sequence)
            .map_err(|_| AppError::Db(format!("sequence {} overflows i64", message.sequence)))?;

        sqlx::query(
            "INSERT INTO session_message (session_id, sequence, kind, payload, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(&message.session_id)
        .bind(sequence)
        .bind(kind_str(message.kind()))
        .bind(&payload)
        .bind(message.created_at.to_rfc3339())
        .execute(self.db.as_ref())
        .await?;

        Ok(())
    }

    /// List messages for one session with sequence strictly greater than
    /// `after_sequence`, in sequence order.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_after(
        &self,
        session_id: &str,
        after_sequence: u64,
    ) -> Result<Vec<SessionMessage>> {
        let after = i64::try_from(after_sequence).unwrap_or(i64::MAX);
        let rows: Vec<MessageRow> = sqlx::query_as(
            "SELECT session_id, sequence, payload, created_at FROM session_message
             WHERE session_id = ?1 AND sequence > ?2 ORDER BY sequence",
        )
        .bind(session_id)
        .bind(after)
        .fetch_all(self.db.as_ref())
        .await?;

        rows.into_iter().map(MessageRow::into_message).collect()
    }

    /// Highest persisted sequence for a session, or `None` when empty.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn max_sequence(&self, session_id: &str) -> Result<Option<u64>> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT MAX(sequence) FROM session_message WHERE session_id = ?1
             GROUP BY session_id",
        )
        .bind(session_id)
        .fetch_optional(self.db.as_ref())
        .await?;

        row.map(|(seq,)| {
            u64::try_from(seq).map_err(|_| AppError::Db(format!("negative sequence {seq}")))
        })
        .transpose()
    }
}
