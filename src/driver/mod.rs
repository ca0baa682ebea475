//! Agent driver layer: integration registry and the generic ACP session
//! driver.
//!
//! Each agent integration is a record of `{agent_id, capabilities, launch
//! mode}`. The driver itself is generic — adding a new agent means either
//! pointing at an ACP-speaking subprocess or implementing an in-process
//! adapter that translates the agent's dialect.

pub mod handlers;
pub mod session_driver;

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;

use crate::adapter::AgentAdapterFactory;
use crate::{AppError, Result};

/// How permission requests from this agent reach a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionChannel {
    /// In-stream JSON-RPC request resolved by a client decision.
    Interactive,
    /// The decision is delivered by HTTP POST to an agent-supplied URL.
    Http,
    /// The agent cannot take interactive decisions; requests fail closed.
    Unsupported,
}

/// Static capabilities of an agent integration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentCapabilities {
    /// The agent discovers its session id after launch, so concurrent
    /// launches in one working directory must be serialized.
    pub session_resolver: bool,
    /// How permission requests are resolved.
    pub permissions: PermissionChannel,
}

impl Default for AgentCapabilities {
    fn default() -> Self {
        Self {
            session_resolver: false,
            permissions: PermissionChannel::Interactive,
        }
    }
}

/// How a driver reaches its ACP peer.
#[derive(Clone)]
pub enum LaunchMode {
    /// External subprocess speaking ACP over stdio.
    Subprocess {
        /// Executable to launch.
        command: String,
        /// Arguments passed to the executable.
        args: Vec<String>,
    },
    /// In-process adapter constructed by a factory; the driver talks to it
    /// over duplex pipes exactly as it would to a subprocess.
    InProcess(Arc<dyn AgentAdapterFactory>),
}

impl std::fmt::Debug for LaunchMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Subprocess { command, args } => f
                .debug_struct("Subprocess")
                .field("command", command)
                .field("args", args)
                .finish(),
            Self::InProcess(_) => f.write_str("InProcess(..)"),
        }
    }
}

/// One registered agent integration.
#[derive(Debug, Clone)]
pub struct AgentSpec {
    /// Integration identifier (e.g. `codex`, `claude-code`).
    pub agent_id: String,
    /// Static capabilities.
    pub capabilities: AgentCapabilities,
    /// Peer launch mode.
    pub launch: LaunchMode,
}

/// Registry of agent integrations available on a worker.
#[derive(Default)]
pub struct AgentRegistry {
    agents: HashMap<String, Arc<AgentSpec>>,
}

impl AgentRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an integration, replacing any previous spec with the same id.
    pub fn register(&mut self, spec: AgentSpec) {
        self.agents.insert(spec.agent_id.clone(), Arc::new(spec));
    }

    /// Look up an integration by id.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for unknown agent ids.
    pub fn get(&self, agent_id: &str) -> Result<Arc<AgentSpec>> {
        self.agents
            .get(agent_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("unknown agent '{agent_id}'")))
    }

    /// Ids of all registered integrations.
    #[must_use]
    pub fn agent_ids(&self) -> Vec<String> {
        self.agents.keys().cloned().collect()
    }
}
