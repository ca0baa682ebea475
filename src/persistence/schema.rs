//! `SQLite` schema bootstrap logic.
//!
//! All table definitions use `CREATE TABLE IF NOT EXISTS` — safe to
//! re-run on every startup. Produces a convergent result.

use sqlx::SqlitePool;

use crate::Result;

/// Apply all table definitions to the connected `SQLite` database.
///
/// One row per session; one append-only row per assembled session message
/// keyed by `(session_id, sequence)`.
///
/// # Errors
///
/// Returns `AppError::Db` if any DDL statement fails.
pub async fn bootstrap_schema(pool: &SqlitePool) -> Result<()> {
    let ddl = r"
CREATE TABLE IF NOT EXISTS session (
    id                TEXT PRIMARY KEY NOT NULL,
    thread_id         TEXT NOT NULL,
    task_id           TEXT,
    cwd               TEXT NOT NULL,
    agent             TEXT NOT NULL,
    mode              TEXT,
    model             TEXT,
    system_prompt     TEXT,
    initial_prompt    TEXT,
    env_overrides     TEXT NOT NULL DEFAULT '{}',
    mcp_servers       TEXT NOT NULL DEFAULT '[]',
    resume_session_id TEXT,
    worker_id         TEXT,
    agent_session_id  TEXT,
    status            TEXT NOT NULL CHECK(status IN ('pending','running','idle','stopped','errored','cancelled')),
    error_reason      TEXT,
    created_at        TEXT NOT NULL,
    updated_at        TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS session_message (
    session_id      TEXT NOT NULL,
    sequence        INTEGER NOT NULL,
    kind            TEXT NOT NULL CHECK(kind IN ('agent_message','agent_thought','tool_call','mode_change')),
    payload         TEXT NOT NULL,
    created_at      TEXT NOT NULL,
    PRIMARY KEY (session_id, sequence)
);

CREATE INDEX IF NOT EXISTS idx_session_status ON session(status, created_at);
CREATE INDEX IF NOT EXISTS idx_session_thread ON session(thread_id);
CREATE INDEX IF NOT EXISTS idx_session_task ON session(task_id);
CREATE INDEX IF NOT EXISTS idx_message_session ON session_message(session_id, sequence);
";

    sqlx::raw_sql(ddl).execute(pool).await?;
    Ok(())
}
