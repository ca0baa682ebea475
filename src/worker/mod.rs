//! Worker-side session runtime: lifecycle registry and environment
//! injection.

pub mod environment;
pub mod manager;

use serde::{Deserialize, Serialize};

use crate::acp::protocol::{SessionModeState, SessionModelState};
use crate::models::session::SessionOptions;

/// Launch request handed to a worker, in-process or over RPC.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct NewSessionRequest {
    /// Control-plane session id; doubles as the agent run id.
    pub session_id: String,
    /// Launch options captured at session creation.
    pub options: SessionOptions,
}

/// What a successful launch reports back.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct NewSessionResponse {
    /// Agent-side session id, when already discovered.
    pub agent_session_id: Option<String>,
    /// Model enumeration reported by the peer.
    pub available_models: Option<SessionModelState>,
    /// Mode enumeration reported by the peer.
    pub available_modes: Option<SessionModeState>,
}
