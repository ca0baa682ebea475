//! Worker fleet metadata used by the dispatcher.

use serde::{Deserialize, Serialize};

/// Static description of a worker known to the control plane.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct WorkerInfo {
    /// Stable worker identifier.
    pub id: String,
    /// Base URL agents use to reach the worker (`AGENTCTL_WORKER_URL`).
    pub url: String,
    /// Agent integration ids the worker can launch.
    pub agents: Vec<String>,
    /// Maximum concurrent live sessions.
    pub max_sessions: u32,
}
