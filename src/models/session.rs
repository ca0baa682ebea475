//! Session record and lifecycle helpers.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status for an agent session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Created on the control plane, not yet assigned to a worker.
    Pending,
    /// A turn is in flight on the assigned worker.
    Running,
    /// Launched and waiting for the next prompt.
    Idle,
    /// Stopped by an explicit client request.
    Stopped,
    /// Terminated because of a launch or peer failure.
    Errored,
    /// Terminated before launch by a client cancellation.
    Cancelled,
}

impl SessionStatus {
    /// Whether the session has reached a terminal state.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Errored | Self::Cancelled)
    }

    /// Whether a lifecycle transition is permitted.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (
                Self::Pending,
                Self::Running | Self::Errored | Self::Cancelled
            ) | (
                Self::Running,
                Self::Idle | Self::Stopped | Self::Errored | Self::Cancelled
            ) | (
                Self::Idle,
                Self::Running | Self::Stopped | Self::Errored | Self::Cancelled
            )
        )
    }
}

/// Options supplied when a session is created.
///
/// Everything the dispatcher needs to hand the session to a worker: where to
/// run, which agent to run, and how the first turn starts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub struct SessionOptions {
    /// Working directory the agent runs in.
    pub cwd: String,
    /// Agent integration identifier (e.g. `codex`, `claude-code`).
    pub agent: String,
    /// Agent session mode identifier (e.g. `code`, `plan`).
    pub mode: Option<String>,
    /// Model identifier passed through to the agent.
    pub model: Option<String>,
    /// System prompt delivered via session meta.
    pub system_prompt: Option<String>,
    /// Initial user prompt; `None` launches the session idle.
    pub prompt: Option<String>,
    /// Environment overrides layered over the worker's inherited env.
    pub env_overrides: HashMap<String, String>,
    /// MCP servers declared to the agent at session start.
    pub mcp_servers: Vec<McpServerEntry>,
    /// Agent-side session id to resume instead of starting fresh.
    pub resume_session_id: Option<String>,
}

/// One stdio MCP server entry declared to the agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct McpServerEntry {
    /// Server name as shown to the agent.
    pub name: String,
    /// Executable to launch.
    pub command: String,
    /// Arguments passed to the executable.
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment variables set for the server process.
    #[serde(default)]
    pub env: HashMap<String, String>,
}

/// Session record owned by the control plane.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Session {
    /// Stable, globally unique identifier.
    pub id: String,
    /// Thread the session belongs to.
    pub thread_id: String,
    /// Optional task label within the thread.
    pub task_id: Option<String>,
    /// Launch options captured at creation time.
    pub options: SessionOptions,
    /// Worker the session was dispatched to; set once `running`.
    pub worker_id: Option<String>,
    /// Agent-side session id, discovered after launch.
    pub agent_session_id: Option<String>,
    /// Current lifecycle status.
    pub status: SessionStatus,
    /// Terminal reason recorded when the session errors.
    pub error_reason: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Construct a new `pending` session with a generated identifier.
    #[must_use]
    pub fn new(thread_id: String, task_id: Option<String>, options: SessionOptions) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            thread_id,
            task_id,
            options,
            worker_id: None,
            agent_session_id: None,
            status: SessionStatus::Pending,
            error_reason: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A worker-observed session transition, reported over the state stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SessionTransition {
    /// Session the transition belongs to.
    pub session_id: String,
    /// New lifecycle status.
    pub status: SessionStatus,
    /// Agent-side session id, included once known.
    pub agent_session_id: Option<String>,
    /// Failure detail when `status` is `errored`.
    pub error: Option<String>,
}

/// Reason a prompt turn stopped.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The agent finished the turn normally.
    EndTurn,
    /// The turn hit the model's output limit.
    MaxTokens,
    /// The agent refused to continue.
    Refusal,
    /// The turn was interrupted by a cancel request.
    Cancelled,
}
