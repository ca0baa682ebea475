//! Session repository for `SQLite` persistence.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;

use crate::models::session::{McpServerEntry, Session, SessionOptions, SessionStatus};
use crate::{AppError, Result};

use super::db::Database;

/// Repository wrapper around `SQLite` for session records.
#[derive(Clone)]
pub struct SessionRepo {
    db: Arc<Database>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct SessionRow {
    id: String,
    thread_id: String,
    task_id: Option<String>,
    cwd: String,
    agent: String,
    mode: Option<String>,
    model: Option<String>,
    system_prompt: Option<String>,
    initial_prompt: Option<String>,
    env_overrides: String,
    mcp_servers: String,
    resume_session_id: Option<String>,
    worker_id: Option<String>,
    agent_session_id: Option<String>,
    status: String,
    error_reason: Option<String>,
    created_at: String,
    updated_at: String,
}

impl SessionRow {
    /// Convert a database row into the domain model.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if enum parsing or JSON deserialization fails.
    fn into_session(self) -> Result<Session> {
        let status = parse_status(&self.status)?;
        let created_at = chrono::DateTime::parse_from_rfc3339(&self.created_at)
            .map_err(|e| AppError::Db(format!("invalid created_at: {e}")))?
            .with_timezone(&Utc);
        let updated_at = chrono::DateTime::parse_from_rfc3339(&self.updated_at)
            .map_err(|e| AppError::Db(format!("invalid updated_at: {e}")))?
            .with_timezone(&Utc);
        let env_overrides: HashMap<String, String> = serde_json::from_str(&self.env_overrides)
            .map_err(|e| AppError::Db(format!("invalid env_overrides json: {e}")))?;
        let mcp_servers: Vec<McpServerEntry> = serde_json::from_str(&self.mcp_servers)
            .map_err(|e| AppError::Db(format!("invalid mcp_servers json: {e}")))?;

        Ok(Session {
            id: self.id,
            thread_id: self.thread_id,
            task_id: self.task_id,
            options: SessionOptions {
                cwd: self.cwd,
                agent: self.agent,
                mode: self.mode,
                model: self.model,
                system_prompt: self.system_prompt,
                prompt: self.initial_prompt,
                env_overrides,
                mcp_servers,
                resume_session_id: self.resume_session_id,
            },
            worker_id: self.worker_id,
            agent_session_id: self.agent_session_id,
            status,
            error_reason: self.error_reason,
            created_at,
            updated_at,
        })
    }
}

/// Parse a status string into the domain enum.
fn parse_status(s: &str) -> Result<SessionStatus> {
    match s {
        "pending" => Ok(SessionStatus::Pending),
        "running" => Ok(SessionStatus::Running),
        "idle" => Ok(SessionStatus::Idle),
        "stopped" => Ok(SessionStatus::Stopped),
        "errored" => Ok(SessionStatus::Errored),
        "cancelled" => Ok(SessionStatus::Cancelled),
        other => Err(AppError::Db(format!("invalid session status: {other}"))),
    }
}

/// Serialize a status enum to its database string.
fn status_str(s: SessionStatus) -> &'static str {
    match s {
        SessionStatus::Pending => "pending",
        SessionStatus::Running => "running",
        SessionStatus::Idle => "idle",
        SessionStatus::Stopped => "stopped",
        SessionStatus::Errored => "errored",
        SessionStatus::Cancelled => "cancelled",
    }
}

impl SessionRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert a new session record.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the database insert fails.
    pub async fn create(&self, session: &Session) -> Result<Session> {
        let status = status_str(session.status);
        let created_at = session.created_at.to_rfc3339();
        let updated_at = session.updated_at.to_rfc3339();
        let env_overrides = serde_json::to_string(&session.options.env_overrides)
            .map_err(|e| AppError::Db(format!("failed to serialize env_overrides: {e}")))?;
        let mcp_servers = serde_json::to_string(&session.options.mcp_servers)
            .map_err(|e| AppError::Db(format!("failed to serialize mcp_servers: {e}")))?;

        sqlx::query(
            "INSERT INTO session (id, thread_id, task_id, cwd, agent, mode, model,
             system_prompt, initial_prompt, env_overrides, mcp_servers, resume_session_id,
             worker_id, agent_session_id, status, error_reason, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
             ?17, ?18)",
        )
        .bind(&session.id)
        .bind(&session.thread_id)
        .bind(&session.task_id)
        .bind(&session.options.cwd)
        .bind(&session.options.agent)
        .bind(&session.options.mode)
        .bind(&session.options.model)
        .bind(&session.options.system_prompt)
        .bind(&session.options.prompt)
        .bind(&env_overrides)
        .bind(&mcp_servers)
        .bind(&session.options.resume_session_id)
        .bind(&session.worker_id)
        .bind(&session.agent_session_id)
        .bind(status)
        .bind(&session.error_reason)
        .bind(&created_at)
        .bind(&updated_at)
        .execute(self.db.as_ref())
        .await?;

        Ok(session.clone())
    }

    /// Retrieve a session by identifier.
    ///
    /// Returns `Ok(None)` if the session does not exist.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get_by_id(&self, id: &str) -> Result<Option<Session>> {
        let row: Option<SessionRow> = sqlx::query_as("SELECT * FROM session WHERE id = ?1")
            .bind(id)
            .fetch_optional(self.db.as_ref())
            .await?;

        row.map(SessionRow::into_session).transpose()
    }

    /// List `pending` sessions in the order they became pending.
    ///
    /// Creation-time order with the id as a stable tie-break, so the
    /// dispatcher observes a deterministic queue.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_pending(&self) -> Result<Vec<Session>> {
        let rows: Vec<SessionRow> = sqlx::query_as(
            "SELECT * FROM session WHERE status = 'pending' ORDER BY created_at, id",
        )
        .fetch_all(self.db.as_ref())
        .await?;

        rows.into_iter().map(SessionRow::into_session).collect()
    }

    /// Update session status and `updated_at` timestamp.
    ///
    /// Validates state transitions before applying the update.
    /// Returns the updated session entity.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidState` if the transition is not permitted,
    /// `AppError::NotFound` if the session does not exist, or `AppError::Db`
    /// on query failure.
    pub async fn update_status(&self, id: &str, status: SessionStatus) -> Result<Session> {
        let current = self
            .get_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("session {id} not found")))?;

        if current.status != status && !current.status.can_transition_to(status) {
            return Err(AppError::InvalidState(format!(
                "invalid status transition: {} -> {}",
                status_str(current.status),
                status_str(status)
            )));
        }

        let now = Utc::now().to_rfc3339();
        let status_s = status_str(status);

        sqlx::query("UPDATE session SET status = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(status_s)
            .bind(&now)
            .bind(id)
            .execute(self.db.as_ref())
            .await?;

        self.get_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("session {id} not found after update")))
    }

    /// Record a successful dispatch: status `running` plus the worker id and,
    /// when already known, the agent-side session id.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn mark_running(
        &self,
        id: &str,
        worker_id: &str,
        agent_session_id: Option<&str>,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            "UPDATE session SET status = 'running', worker_id = ?1,
             agent_session_id = COALESCE(?2, agent_session_id), updated_at = ?3
             WHERE id = ?4",
        )
        .bind(worker_id)
        .bind(agent_session_id)
        .bind(&now)
        .bind(id)
        .execute(self.db.as_ref())
        .await?;

        Ok(())
    }

    /// Record a terminal dispatch or runtime failure.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn mark_errored(&self, id: &str, reason: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            "UPDATE session SET status = 'errored', error_reason = ?1, updated_at = ?2
             WHERE id = ?3",
        )
        .bind(reason)
        .bind(&now)
        .bind(id)
        .execute(self.db.as_ref())
        .await?;

        Ok(())
    }

    /// Record the agent-side session id discovered after launch.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn set_agent_session_id(&self, id: &str, agent_session_id: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();

        sqlx::query("UPDATE session SET agent_session_id = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(agent_session_id)
            .bind(&now)
            .bind(id)
            .execute(self.db.as_ref())
            .await?;

        Ok(())
    }

    /// Resolve the session ids matching a watch selector.
    ///
    /// Exactly one of the arguments should be set; they are checked in
    /// `session_id`, `thread_id`, `task_id` order.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn resolve_selector(
        &self,
        session_id: Option<&str>,
        thread_id: Option<&str>,
        task_id: Option<&str>,
    ) -> Result<Vec<String>> {
        if let Some(id) = session_id {
            return Ok(vec![id.to_owned()]);
        }

        let rows: Vec<(String,)> = if let Some(thread) = thread_id {
            sqlx::query_as("SELECT id FROM session WHERE thread_id = ?1 ORDER BY created_at, id")
                .bind(thread)
                .fetch_all(self.db.as_ref())
                .await?
        } else if let Some(task) = task_id {
            sqlx::query_as("SELECT id FROM session WHERE task_id = ?1 ORDER BY created_at, id")
                .bind(task)
                .fetch_all(self.db.as_ref())
                .await?
        } else {
            return Err(AppError::InvalidState(
                "watch selector must name a session, thread, or task".into(),
            ));
        };

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// List sessions that are live (`running` or `idle`) on a given worker.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_live_on_worker(&self, worker_id: &str) -> Result<Vec<Session>> {
        let rows: Vec<SessionRow> = sqlx::query_as(
            "SELECT * FROM session WHERE worker_id = ?1 AND status IN ('running', 'idle')",
        )
        .bind(worker_id)
        .fetch_all(self.db.as_ref())
        .await?;

        rows.into_iter().map(SessionRow::into_session).collect()
    }
}
