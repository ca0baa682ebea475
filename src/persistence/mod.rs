//! `SQLite` persistence: connection bootstrap and repositories.

pub mod db;
pub mod message_repo;
pub mod schema;
pub mod session_repo;
