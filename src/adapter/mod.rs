//! In-process agent adapters.
//!
//! An adapter translates between ACP and a specific agent's JSON-RPC
//! dialect. It presents the agent side of ACP to the session driver over a
//! pair of in-process byte pipes, while owning the real agent subprocess
//! through an [`bridge::AdapterBridge`]. The driver cannot tell an adapter
//! from an external ACP subprocess.

pub mod bridge;
pub mod codex;

use std::collections::HashMap;

use tokio::io::DuplexStream;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::Result;

/// Byte-stream endpoints handed to an in-process adapter.
///
/// `reader` carries driver → adapter frames; `writer` carries adapter →
/// driver frames. Each endpoint is one side of a unidirectional pipe.
pub struct AdapterIo {
    /// Frames from the driver.
    pub reader: DuplexStream,
    /// Frames to the driver.
    pub writer: DuplexStream,
}

/// Launch context for one adapter instance.
pub struct AdapterContext {
    /// Flowgentic session id (`AGENTCTL_AGENT_RUN_ID`).
    pub run_id: String,
    /// Working directory for the agent subprocess.
    pub cwd: String,
    /// Fully composed subprocess environment.
    pub env: HashMap<String, String>,
    /// Fires when the owning session stops.
    pub cancel: CancellationToken,
}

/// Constructs one adapter instance per session launch.
pub trait AgentAdapterFactory: Send + Sync + 'static {
    /// Start the adapter over `io`. The returned task completes when the
    /// adapter shuts down (cancellation, peer EOF, or agent death).
    fn spawn(&self, io: AdapterIo, ctx: AdapterContext) -> JoinHandle<Result<()>>;
}
