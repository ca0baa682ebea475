//! `SQLite` connection bootstrap.
//!
//! The pool is restricted to a single connection on purpose: every insert
//! into `session_message` must observe the previous one, or the per-session
//! `(session_id, sequence)` key stops being append-only under concurrent
//! drivers. One writer makes that ordering structural instead of something
//! each repository has to defend. WAL mode keeps watcher history reads from
//! stalling behind that writer.

use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::SqlitePool;

use crate::{AppError, Result};

use super::schema;

/// Alias for the shared `SQLite` connection pool.
pub type Database = SqlitePool;

/// How long a statement waits on a locked database before failing.
///
/// Generous relative to dispatch latencies; a session launch should never
/// lose a race against a watcher replaying history.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open a file-backed database and apply the schema.
///
/// Creates the file and any missing parent directories on first start, so
/// a fresh worker can point `db_path` at a not-yet-existing data
/// directory.
///
/// # Errors
///
/// Returns `AppError::Db` if the path is invalid or the connection or
/// schema application fails.
pub async fn connect(path: &str) -> Result<Database> {
    if let Some(parent) = Path::new(path).parent() {
        fs::create_dir_all(parent)
            .map_err(|err| AppError::Db(format!("failed to create db dir: {err}")))?;
    }

    let opts = SqliteConnectOptions::from_str(path)
        .map_err(|err| AppError::Db(format!("invalid db path: {err}")))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        // NORMAL is durable enough under WAL; session rows are reconciled
        // from the worker state stream after a crash anyway.
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(BUSY_TIMEOUT);

    open(opts, false).await
}

/// Open an in-memory database for tests and ephemeral runs.
///
/// # Errors
///
/// Returns `AppError::Db` if the connection or schema application fails.
pub async fn connect_memory() -> Result<Database> {
    let opts = SqliteConnectOptions::from_str("sqlite::memory:")
        .map_err(|err| AppError::Db(format!("invalid memory uri: {err}")))?;

    open(opts, true).await
}

/// Build the single-writer pool and bootstrap the schema.
async fn open(opts: SqliteConnectOptions, pin_connection: bool) -> Result<Database> {
    let mut pool = SqlitePoolOptions::new().max_connections(1);
    if pin_connection {
        // An in-memory database vanishes with its last connection; keep
        // one open for the lifetime of the pool.
        pool = pool.min_connections(1);
    }

    let pool = pool.connect_with(opts).await?;
    schema::bootstrap_schema(&pool).await?;
    Ok(pool)
}
