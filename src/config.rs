//! Global configuration parsing and validation.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::adapter::codex::CodexAdapterFactory;
use crate::driver::{AgentCapabilities, AgentRegistry, AgentSpec, LaunchMode, PermissionChannel};
use crate::{AppError, Result};

/// Environment variable carrying the worker shared secret.
pub const ENV_WORKER_SECRET: &str = "FLOWGENTIC_WORKER_SECRET";

/// Dispatcher tuning section.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct DispatchSection {
    /// Placement attempts before a session becomes `errored`.
    pub max_attempts: u32,
    /// First retry delay in milliseconds; doubles per attempt.
    pub base_backoff_ms: u64,
    /// Periodic reconcile interval in milliseconds.
    pub tick_ms: u64,
}

impl Default for DispatchSection {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff_ms: 250,
            tick_ms: 5000,
        }
    }
}

/// Watch-stream tuning section.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct WatchSection {
    /// Per-watcher live buffer capacity; a watcher that falls this far
    /// behind is dropped with a resumable error.
    pub buffer_capacity: usize,
}

impl Default for WatchSection {
    fn default() -> Self {
        Self {
            buffer_capacity: 256,
        }
    }
}

/// How an agent integration reaches its peer.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AgentLaunchKind {
    /// Native ACP subprocess.
    Acp,
    /// In-process adapter bridging a non-ACP subprocess.
    Embedded,
}

/// One `[[agents]]` entry.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct AgentSection {
    /// Integration id (e.g. `codex`, `claude-code`).
    pub id: String,
    /// Launch kind.
    pub kind: AgentLaunchKind,
    /// Agent executable.
    pub command: String,
    /// Arguments passed to the executable.
    #[serde(default)]
    pub args: Vec<String>,
    /// Whether the agent discovers its session id after launch.
    #[serde(default)]
    pub session_resolver: bool,
    /// Permission channel.
    #[serde(default = "default_permissions")]
    pub permissions: PermissionChannel,
    /// Always inject the companion MCP server, regardless of the system
    /// prompt.
    #[serde(default)]
    pub force_mcp_injection: bool,
}

fn default_permissions() -> PermissionChannel {
    PermissionChannel::Interactive
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Stable worker identifier.
    pub worker_id: String,
    /// RPC listen address.
    pub listen_addr: String,
    /// Private URL agents use to reach this worker.
    pub worker_url: String,
    /// `SQLite` database path.
    pub db_path: String,
    /// Maximum concurrent live sessions on this worker.
    pub max_concurrent_sessions: u32,
    /// Grace period in seconds before a session stop escalates to a kill.
    #[serde(default = "default_stop_grace")]
    pub stop_grace_seconds: u64,
    /// Dispatcher tuning.
    #[serde(default)]
    pub dispatch: DispatchSection,
    /// Watch-stream tuning.
    #[serde(default)]
    pub watch: WatchSection,
    /// Agent integrations available on this worker.
    pub agents: Vec<AgentSection>,
    /// Shared secret, loaded from the environment — never from the file.
    #[serde(skip)]
    pub worker_secret: String,
}

fn default_stop_grace() -> u64 {
    5
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and validate it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Read the worker secret from [`ENV_WORKER_SECRET`].
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the variable is unset or empty.
    pub fn load_secret(&mut self) -> Result<()> {
        let secret = std::env::var(ENV_WORKER_SECRET)
            .map_err(|_| AppError::Config(format!("{ENV_WORKER_SECRET} must be set")))?;
        if secret.trim().is_empty() {
            return Err(AppError::Config(format!(
                "{ENV_WORKER_SECRET} must not be empty"
            )));
        }
        self.worker_secret = secret;
        Ok(())
    }

    /// Dispatcher config in runtime types.
    #[must_use]
    pub fn dispatch_config(&self) -> crate::dispatch::DispatchConfig {
        crate::dispatch::DispatchConfig {
            max_attempts: self.dispatch.max_attempts,
            base_backoff: Duration::from_millis(self.dispatch.base_backoff_ms),
            tick: Duration::from_millis(self.dispatch.tick_ms),
        }
    }

    /// Stop grace period in runtime types.
    #[must_use]
    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_seconds)
    }

    /// Build the agent registry from the `[[agents]]` entries.
    #[must_use]
    pub fn build_agent_registry(&self) -> AgentRegistry {
        let mut registry = AgentRegistry::new();
        for agent in &self.agents {
            let launch = match agent.kind {
                AgentLaunchKind::Acp => LaunchMode::Subprocess {
                    command: agent.command.clone(),
                    args: agent.args.clone(),
                },
                AgentLaunchKind::Embedded => LaunchMode::InProcess(Arc::new(
                    CodexAdapterFactory::new(
                        agent.command.clone(),
                        agent.args.clone(),
                        agent.force_mcp_injection,
                    ),
                )),
            };
            registry.register(AgentSpec {
                agent_id: agent.id.clone(),
                capabilities: AgentCapabilities {
                    session_resolver: agent.session_resolver,
                    permissions: agent.permissions,
                },
                launch,
            });
        }
        registry
    }

    /// Structural validation beyond what serde enforces.
    fn validate(&self) -> Result<()> {
        if self.worker_id.trim().is_empty() {
            return Err(AppError::Config("worker_id must not be empty".into()));
        }
        if self.max_concurrent_sessions == 0 {
            return Err(AppError::Config(
                "max_concurrent_sessions must be at least 1".into(),
            ));
        }
        if self.dispatch.max_attempts == 0 {
            return Err(AppError::Config(
                "dispatch.max_attempts must be at least 1".into(),
            ));
        }
        if self.agents.is_empty() {
            return Err(AppError::Config(
                "at least one [[agents]] entry is required".into(),
            ));
        }

        let mut seen = HashMap::new();
        for agent in &self.agents {
            if agent.id.trim().is_empty() {
                return Err(AppError::Config("agent id must not be empty".into()));
            }
            if seen.insert(agent.id.clone(), ()).is_some() {
                return Err(AppError::Config(format!(
                    "duplicate agent id '{}'",
                    agent.id
                )));
            }
            if agent.command.trim().is_empty() {
                return Err(AppError::Config(format!(
                    "agent '{}' command must not be empty",
                    agent.id
                )));
            }
        }

        self.listen_addr
            .parse::<std::net::SocketAddr>()
            .map_err(|err| AppError::Config(format!("invalid listen_addr: {err}")))?;

        Ok(())
    }
}
