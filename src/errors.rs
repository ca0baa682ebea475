//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Persistence failure when interacting with `SQLite`.
    Db(String),
    /// ACP protocol violation or codec failure.
    Acp(String),
    /// Agent adapter or bridge subprocess failure.
    Adapter(String),
    /// Subprocess spawn or teardown failure.
    Spawn(String),
    /// Control-plane to worker RPC failure.
    Rpc(String),
    /// Peer closed the connection before a response arrived.
    PeerClosed(String),
    /// Requested entity does not exist.
    NotFound(String),
    /// Operation is not valid in the current lifecycle state.
    InvalidState(String),
    /// Peer requested a capability this session does not provide.
    Unsupported(String),
    /// Operation ended because the session or turn was cancelled.
    Cancelled(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Db(msg) => write!(f, "db: {msg}"),
            Self::Acp(msg) => write!(f, "acp: {msg}"),
            Self::Adapter(msg) => write!(f, "adapter: {msg}"),
            Self::Spawn(msg) => write!(f, "spawn: {msg}"),
            Self::Rpc(msg) => write!(f, "rpc: {msg}"),
            Self::PeerClosed(msg) => write!(f, "peer closed: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::InvalidState(msg) => write!(f, "invalid state: {msg}"),
            Self::Unsupported(msg) => write!(f, "unsupported: {msg}"),
            Self::Cancelled(msg) => write!(f, "cancelled: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        Self::Db(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
