//! JSON-RPC envelope and typed ACP messages.
//!
//! ACP is JSON-RPC 2.0 over newline-delimited frames. The envelope layer
//! here classifies inbound lines into requests, notifications, and
//! responses; the typed layer defines the lifecycle methods
//! (`initialize`, `session/new`, `session/load`, `session/prompt`, …) plus
//! the notification and capability-callback payloads exchanged around them.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::models::session::{McpServerEntry, StopReason};
use crate::{AppError, Result};

// ── Method names ─────────────────────────────────────────────────────────────

/// ACP method name constants.
pub mod methods {
    /// Protocol handshake.
    pub const INITIALIZE: &str = "initialize";
    /// Start a fresh agent session.
    pub const SESSION_NEW: &str = "session/new";
    /// Resume a previously created agent session.
    pub const SESSION_LOAD: &str = "session/load";
    /// Run one prompt turn; the response carries the stop reason.
    pub const SESSION_PROMPT: &str = "session/prompt";
    /// Notification interrupting the current turn.
    pub const SESSION_CANCEL: &str = "session/cancel";
    /// Switch the session mode.
    pub const SESSION_SET_MODE: &str = "session/set_mode";
    /// Switch the session model.
    pub const SESSION_SET_MODEL: &str = "session/set_model";
    /// Agent-to-client streaming update notification.
    pub const SESSION_UPDATE: &str = "session/update";
    /// Agent-to-client permission request.
    pub const SESSION_REQUEST_PERMISSION: &str = "session/request_permission";
    /// Client file-system capability: read.
    pub const FS_READ_TEXT_FILE: &str = "fs/read_text_file";
    /// Client file-system capability: write.
    pub const FS_WRITE_TEXT_FILE: &str = "fs/write_text_file";
    /// Client terminal capability: create.
    pub const TERMINAL_CREATE: &str = "terminal/create";
    /// Client terminal capability: fetch output.
    pub const TERMINAL_OUTPUT: &str = "terminal/output";
    /// Client terminal capability: kill the command.
    pub const TERMINAL_KILL: &str = "terminal/kill";
    /// Client terminal capability: release the handle.
    pub const TERMINAL_RELEASE: &str = "terminal/release";
}

// ── Error codes ──────────────────────────────────────────────────────────────

/// JSON-RPC parse error.
pub const PARSE_ERROR: i64 = -32700;
/// JSON-RPC malformed request.
pub const INVALID_REQUEST: i64 = -32600;
/// JSON-RPC unknown method.
pub const METHOD_NOT_FOUND: i64 = -32601;
/// JSON-RPC bad parameters.
pub const INVALID_PARAMS: i64 = -32602;
/// JSON-RPC internal error.
pub const INTERNAL_ERROR: i64 = -32603;
/// The peer asked for a capability this client did not advertise.
pub const UNSUPPORTED_CAPABILITY: i64 = -32002;

// ── Envelope ─────────────────────────────────────────────────────────────────

/// A JSON-RPC error object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RpcError {
    /// Numeric error code.
    pub code: i64,
    /// Human-readable message.
    pub message: String,
    /// Optional structured detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    /// Construct an error with `code` and `message`.
    #[must_use]
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// An [`UNSUPPORTED_CAPABILITY`] error for `what`.
    #[must_use]
    pub fn unsupported(what: &str) -> Self {
        Self::new(UNSUPPORTED_CAPABILITY, format!("unsupported: {what}"))
    }

    /// A [`METHOD_NOT_FOUND`] error for `method`.
    #[must_use]
    pub fn method_not_found(method: &str) -> Self {
        Self::new(METHOD_NOT_FOUND, format!("method not found: {method}"))
    }

    /// An [`INVALID_PARAMS`] error with `detail`.
    #[must_use]
    pub fn invalid_params(detail: impl Into<String>) -> Self {
        Self::new(INVALID_PARAMS, detail)
    }
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

/// One classified inbound JSON-RPC message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Peer-initiated request; `id` must be echoed in the response.
    Request {
        /// Correlation id, echoed verbatim.
        id: Value,
        /// Method name.
        method: String,
        /// Method parameters.
        params: Value,
    },
    /// Fire-and-forget notification.
    Notification {
        /// Method name.
        method: String,
        /// Method parameters.
        params: Value,
    },
    /// Response to one of our requests.
    Response {
        /// Correlation id of the originating request.
        id: Value,
        /// Result or error payload.
        outcome: std::result::Result<Value, RpcError>,
    },
}

/// Classify one line of input as a request, notification, or response.
///
/// # Errors
///
/// Returns [`AppError::Acp`] if the line is not valid JSON or does not fit
/// any of the three JSON-RPC shapes.
pub fn parse_line(line: &str) -> Result<Inbound> {
    let value: Value =
        serde_json::from_str(line).map_err(|e| AppError::Acp(format!("malformed json: {e}")))?;

    let method = value.get("method").and_then(Value::as_str);
    let id = value.get("id").cloned().filter(|v| !v.is_null());

    match (method, id) {
        (Some(method), Some(id)) => Ok(Inbound::Request {
            id,
            method: method.to_owned(),
            params: value.get("params").cloned().unwrap_or(Value::Null),
        }),
        (Some(method), None) => Ok(Inbound::Notification {
            method: method.to_owned(),
            params: value.get("params").cloned().unwrap_or(Value::Null),
        }),
        (None, Some(id)) => {
            if let Some(error) = value.get("error") {
                let error: RpcError = serde_json::from_value(error.clone())
                    .map_err(|e| AppError::Acp(format!("malformed error object: {e}")))?;
                Ok(Inbound::Response {
                    id,
                    outcome: Err(error),
                })
            } else {
                Ok(Inbound::Response {
                    id,
                    outcome: Ok(value.get("result").cloned().unwrap_or(Value::Null)),
                })
            }
        }
        (None, None) => Err(AppError::Acp(
            "message has neither method nor id".to_owned(),
        )),
    }
}

/// Build an outbound request frame.
#[must_use]
pub fn request_frame(id: i64, method: &str, params: &Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params })
}

/// Build an outbound notification frame.
#[must_use]
pub fn notification_frame(method: &str, params: &Value) -> Value {
    json!({ "jsonrpc": "2.0", "method": method, "params": params })
}

/// Build an outbound success-response frame echoing `id`.
#[must_use]
pub fn response_frame(id: &Value, result: &Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

/// Build an outbound error-response frame echoing `id`.
#[must_use]
pub fn error_frame(id: &Value, error: &RpcError) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "error": error })
}

// ── Typed lifecycle messages ─────────────────────────────────────────────────

/// Client identification sent during `initialize`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    /// Client name.
    pub name: String,
    /// Client version.
    pub version: String,
}

/// File-system capabilities the client offers the agent.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FsCapabilities {
    /// `fs/read_text_file` is served.
    #[serde(default)]
    pub read_text_file: bool,
    /// `fs/write_text_file` is served.
    #[serde(default)]
    pub write_text_file: bool,
}

/// Capabilities the client advertises during `initialize`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClientCapabilities {
    /// File-system callbacks.
    #[serde(default)]
    pub fs: FsCapabilities,
    /// Terminal callbacks.
    #[serde(default)]
    pub terminal: bool,
}

/// `initialize` request parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    /// Highest protocol version the client speaks.
    pub protocol_version: u16,
    /// Client identification.
    pub client_info: ClientInfo,
    /// Capabilities the client serves.
    #[serde(default)]
    pub client_capabilities: ClientCapabilities,
}

/// `initialize` response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    /// Protocol version the peer settled on.
    pub protocol_version: u16,
    /// Free-form agent metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_info: Option<Value>,
}

/// One selectable model reported by the peer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    /// Stable model identifier.
    pub model_id: String,
    /// Display name; falls back to the id when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// One selectable session mode reported by the peer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ModeInfo {
    /// Stable mode identifier.
    pub mode_id: String,
    /// Display name; falls back to the id when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Model enumeration attached to a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionModelState {
    /// Models the peer can switch between.
    pub available: Vec<ModelInfo>,
    /// Currently selected model id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<String>,
}

/// Mode enumeration attached to a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionModeState {
    /// Modes the peer can switch between.
    pub available: Vec<ModeInfo>,
    /// Currently selected mode id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<String>,
}

/// `session/new` request parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NewSessionParams {
    /// Working directory for the session.
    pub cwd: String,
    /// MCP servers the agent should connect to.
    #[serde(default)]
    pub mcp_servers: Vec<McpServerEntry>,
    /// Schemaless pass-through: system prompt, model, mode, and anything
    /// else a specific peer consumes.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub meta: HashMap<String, Value>,
}

/// `session/load` request parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LoadSessionParams {
    /// Agent-side session id to resume.
    pub session_id: String,
    /// Working directory for the session.
    pub cwd: String,
    /// MCP servers the agent should connect to.
    #[serde(default)]
    pub mcp_servers: Vec<McpServerEntry>,
    /// Schemaless pass-through, as for `session/new`.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub meta: HashMap<String, Value>,
}

/// `session/new` and `session/load` response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NewSessionResult {
    /// Agent-side session id.
    pub session_id: String,
    /// Model enumeration, when the peer reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub models: Option<SessionModelState>,
    /// Mode enumeration, when the peer reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modes: Option<SessionModeState>,
}

/// One prompt content block.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ContentBlock {
    /// Plain text.
    Text {
        /// Block text.
        text: String,
    },
}

impl ContentBlock {
    /// Build a text block.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Render the block as plain text.
    #[must_use]
    pub fn as_text(&self) -> &str {
        match self {
            Self::Text { text } => text,
        }
    }
}

/// `session/prompt` request parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PromptParams {
    /// Agent-side session id.
    pub session_id: String,
    /// Prompt content blocks.
    pub prompt: Vec<ContentBlock>,
}

/// `session/prompt` response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PromptResult {
    /// Why the turn ended.
    pub stop_reason: StopReason,
}

/// `session/cancel` notification parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CancelParams {
    /// Agent-side session id.
    pub session_id: String,
}

/// `session/set_mode` request parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SetModeParams {
    /// Agent-side session id.
    pub session_id: String,
    /// Target mode id.
    pub mode_id: String,
}

/// `session/set_model` request parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SetModelParams {
    /// Agent-side session id.
    pub session_id: String,
    /// Target model id.
    pub model_id: String,
}

// ── Streaming updates ────────────────────────────────────────────────────────

/// Tool-call fields shared by start and update notifications.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallFields {
    /// Peer-assigned tool call id.
    pub tool_call_id: String,
    /// Human-readable title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Coarse kind string (`read`, `edit`, `execute`, `fetch`, `think`, …).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Execution status string (`pending`, `in_progress`, `completed`,
    /// `failed`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Raw input value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_input: Option<Value>,
    /// Raw output value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_output: Option<Value>,
    /// Rendered content replacing earlier output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Touched file locations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locations: Option<Vec<crate::models::message::ToolCallLocation>>,
}

/// One `session/update` payload variant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "sessionUpdate", rename_all = "snake_case")]
pub enum SessionUpdate {
    /// Delta of agent reply text.
    AgentMessageChunk {
        /// Chunk content.
        content: ContentBlock,
    },
    /// Delta of agent reasoning text.
    AgentThoughtChunk {
        /// Chunk content.
        content: ContentBlock,
    },
    /// A tool call was announced.
    ToolCall {
        /// Tool-call fields.
        #[serde(flatten)]
        fields: ToolCallFields,
    },
    /// A tool call changed state.
    ToolCallUpdate {
        /// Tool-call fields; absent members are unchanged.
        #[serde(flatten)]
        fields: ToolCallFields,
    },
    /// The session switched modes.
    CurrentModeUpdate {
        /// New mode id.
        current_mode_id: String,
    },
}

/// `session/update` notification parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionNotification {
    /// Agent-side session id.
    pub session_id: String,
    /// Update payload.
    pub update: SessionUpdate,
}

/// `session/request_permission` request parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PermissionRequestParams {
    /// Agent-side session id.
    pub session_id: String,
    /// Tool the agent wants to run.
    pub tool_name: String,
    /// Raw tool input.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_input: Option<Value>,
    /// Decision-callback URL for agents with an HTTP permission channel.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
}

/// `session/request_permission` response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PermissionRequestResult {
    /// `allow` or `deny`.
    pub outcome: String,
    /// Optional justification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

// ── File-system and terminal callbacks ───────────────────────────────────────

/// `fs/read_text_file` request parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReadTextFileParams {
    /// Agent-side session id.
    pub session_id: String,
    /// Absolute file path.
    pub path: String,
    /// Optional 1-based start line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    /// Optional line count limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

/// `fs/write_text_file` request parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WriteTextFileParams {
    /// Agent-side session id.
    pub session_id: String,
    /// Absolute file path.
    pub path: String,
    /// Full replacement content.
    pub content: String,
}
