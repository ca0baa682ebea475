//! Persisted session messages — assembled, complete artifacts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind discriminant for a persisted [`SessionMessage`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Assembled agent reply text.
    AgentMessage,
    /// Assembled agent reasoning text.
    AgentThought,
    /// A tool call that reached a terminal status.
    ToolCall,
    /// A session-mode switch.
    ModeChange,
}

/// Execution status of a tool call.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    /// Announced but not yet running.
    Pending,
    /// Currently executing.
    InProgress,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
}

impl ToolCallStatus {
    /// Whether the tool call has finished (successfully or not).
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Coarse classification of what a tool call does.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    /// Reads files or other data.
    Read,
    /// Edits files.
    Edit,
    /// Runs a command.
    Execute,
    /// Fetches remote content.
    Fetch,
    /// Internal reasoning step surfaced as a tool.
    Think,
    /// Anything else.
    Other,
}

/// A file location a tool call touches.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallLocation {
    /// Absolute file path.
    pub path: String,
    /// Optional 1-based line number.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

/// Full state of a tool call as carried by events and persisted messages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ToolCallState {
    /// Peer-assigned tool call identifier.
    pub tool_call_id: String,
    /// Human-readable title.
    pub title: String,
    /// Coarse kind classification.
    pub kind: ToolKind,
    /// Raw input as supplied by the agent.
    pub raw_input: Option<serde_json::Value>,
    /// Raw output once available.
    pub raw_output: Option<serde_json::Value>,
    /// Current execution status.
    pub status: ToolCallStatus,
    /// Files touched by the call, if reported.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub locations: Vec<ToolCallLocation>,
}

/// Kind-specific payload of a persisted message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessagePayload {
    /// Assembled agent reply.
    AgentMessage {
        /// Concatenated chunk text.
        text: String,
    },
    /// Assembled agent reasoning.
    AgentThought {
        /// Concatenated chunk text.
        text: String,
    },
    /// A tool call in its terminal state.
    ToolCall {
        /// Final tool call state.
        #[serde(flatten)]
        state: ToolCallState,
    },
    /// A session-mode switch.
    ModeChange {
        /// New mode identifier.
        mode_id: String,
    },
}

impl MessagePayload {
    /// Kind discriminant matching this payload.
    #[must_use]
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::AgentMessage { .. } => MessageKind::AgentMessage,
            Self::AgentThought { .. } => MessageKind::AgentThought,
            Self::ToolCall { .. } => MessageKind::ToolCall,
            Self::ModeChange { .. } => MessageKind::ModeChange,
        }
    }
}

/// Persisted session artifact, ordered by a per-session sequence.
///
/// Sequences share one space with live [`crate::models::event::SessionEvent`]
/// numbers: the union of message and event sequences for a session is
/// contiguous.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SessionMessage {
    /// Owning session.
    pub session_id: String,
    /// Per-session monotone sequence number.
    pub sequence: u64,
    /// Kind-specific payload.
    pub payload: MessagePayload,
    /// Persistence timestamp.
    pub created_at: DateTime<Utc>,
}

impl SessionMessage {
    /// Kind discriminant of the payload.
    #[must_use]
    pub fn kind(&self) -> MessageKind {
        self.payload.kind()
    }
}
