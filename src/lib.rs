#![forbid(unsafe_code)]

//! Flowgentic session runtime.
//!
//! Runs interactive coding-agent workloads across a worker fleet: the
//! control-plane dispatcher reconciles pending sessions onto workers, each
//! worker's session manager drives an ACP peer (subprocess or in-process
//! adapter), and the event pipeline turns streaming agent output into
//! ordered, persisted, watchable session history.

mod errors;

pub use errors::{AppError, Result};

pub mod acp;
pub mod adapter;
pub mod config;
pub mod control;
pub mod dispatch;
pub mod driver;
pub mod events;
pub mod models;
pub mod permissions;
pub mod persistence;
pub mod rpc;
pub mod worker;
