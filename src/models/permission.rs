//! Permission request records carried by the broker.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Client decision on a pending permission request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct PermissionDecision {
    /// Whether the tool may run.
    pub allow: bool,
    /// Optional human-readable justification.
    pub reason: Option<String>,
}

impl PermissionDecision {
    /// An allow decision without a reason.
    #[must_use]
    pub fn allow() -> Self {
        Self {
            allow: true,
            reason: None,
        }
    }

    /// A deny decision carrying `reason`.
    #[must_use]
    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allow: false,
            reason: Some(reason.into()),
        }
    }
}

/// A peer-initiated permission request awaiting a client decision.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct PermissionRequest {
    /// Broker-assigned opaque request identifier (fresh UUID).
    pub request_id: String,
    /// Session the request belongs to.
    pub session_id: String,
    /// Tool the agent wants to run.
    pub tool_name: String,
    /// Raw tool input.
    pub raw_input: Option<serde_json::Value>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}
