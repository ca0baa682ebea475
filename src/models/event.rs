//! Live session events — raw streaming chunks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::message::{SessionMessage, ToolCallLocation, ToolCallStatus, ToolKind};
use crate::models::session::SessionStatus;

/// Payload of a live session event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEventPayload {
    /// Delta of agent reply text.
    AgentMessageChunk {
        /// Chunk text.
        text: String,
    },
    /// Delta of agent reasoning text.
    AgentThoughtChunk {
        /// Chunk text.
        text: String,
    },
    /// A tool call was announced.
    ToolCallStart {
        /// Peer-assigned tool call identifier.
        tool_call_id: String,
        /// Human-readable title.
        title: String,
        /// Coarse kind classification.
        kind: ToolKind,
        /// Raw input as supplied by the agent.
        raw_input: Option<serde_json::Value>,
        /// Status at announcement time.
        status: ToolCallStatus,
        /// Files touched, if reported.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        locations: Vec<ToolCallLocation>,
    },
    /// A tool call changed state.
    ToolCallUpdate {
        /// Peer-assigned tool call identifier.
        tool_call_id: String,
        /// New execution status, when reported.
        status: Option<ToolCallStatus>,
        /// Raw output, when available.
        raw_output: Option<serde_json::Value>,
        /// Replacement content blocks rendered as text, when reported.
        content: Option<String>,
        /// Updated location list, when reported.
        locations: Option<Vec<ToolCallLocation>>,
    },
    /// The session's lifecycle status changed.
    StatusChange {
        /// New lifecycle status.
        new_status: SessionStatus,
    },
    /// The session's mode changed.
    ModeChange {
        /// New mode identifier.
        mode_id: String,
    },
    /// The agent asked for a go/no-go decision.
    PermissionRequest {
        /// Broker-assigned request identifier.
        request_id: String,
        /// Tool the agent wants to run.
        tool_name: String,
        /// Raw tool input.
        raw_input: Option<serde_json::Value>,
    },
}

/// A live streaming event, sequenced alongside persisted messages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SessionEvent {
    /// Owning session.
    pub session_id: String,
    /// Per-session monotone sequence number, shared with messages.
    pub sequence: u64,
    /// Emission timestamp.
    pub timestamp: DateTime<Utc>,
    /// Event payload.
    pub payload: SessionEventPayload,
}

/// One item of a watch stream: assembled history or a live chunk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "item", rename_all = "snake_case")]
pub enum WatchItem {
    /// A persisted, assembled message.
    Message(SessionMessage),
    /// A raw live event.
    Event(SessionEvent),
}

impl WatchItem {
    /// Session the item belongs to.
    #[must_use]
    pub fn session_id(&self) -> &str {
        match self {
            Self::Message(m) => &m.session_id,
            Self::Event(e) => &e.session_id,
        }
    }

    /// Sequence number of the item.
    #[must_use]
    pub fn sequence(&self) -> u64 {
        match self {
            Self::Message(m) => m.sequence,
            Self::Event(e) => e.sequence,
        }
    }
}

/// Convenience constructor stamping the current time.
#[must_use]
pub fn event_now(session_id: &str, sequence: u64, payload: SessionEventPayload) -> SessionEvent {
    SessionEvent {
        session_id: session_id.to_owned(),
        sequence,
        timestamp: Utc::now(),
        payload,
    }
}
