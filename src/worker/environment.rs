//! Agent subprocess environment composition.
//!
//! Layering, lowest precedence first: the worker's inherited process
//! environment, then caller-supplied overrides, then the fixed agent-visible
//! variables that let `agentctl` invoked inside the agent reach this worker.

use std::collections::HashMap;

/// Private worker URL visible to the agent.
pub const ENV_WORKER_URL: &str = "AGENTCTL_WORKER_URL";
/// Shared secret for authenticating against the worker.
pub const ENV_WORKER_SECRET: &str = "AGENTCTL_WORKER_SECRET";
/// Opaque run identifier tying `agentctl` calls to the session.
pub const ENV_AGENT_RUN_ID: &str = "AGENTCTL_AGENT_RUN_ID";
/// Agent integration id the run belongs to.
pub const ENV_AGENT: &str = "AGENTCTL_AGENT";

/// Worker identity injected into every agent subprocess.
#[derive(Debug, Clone, Copy)]
pub struct AgentEnv<'a> {
    /// Private worker URL.
    pub worker_url: &'a str,
    /// Worker shared secret.
    pub worker_secret: &'a str,
    /// Session / run identifier.
    pub run_id: &'a str,
    /// Agent integration id.
    pub agent: &'a str,
}

/// Compose the complete subprocess environment.
///
/// Overrides shadow inherited values; the fixed `AGENTCTL_*` variables are
/// applied last.
#[must_use]
pub fn compose(overrides: &HashMap<String, String>, ctx: &AgentEnv<'_>) -> HashMap<String, String> {
    let mut env: HashMap<String, String> = std::env::vars().collect();
    for (key, value) in overrides {
        env.insert(key.clone(), value.clone());
    }
    env.insert(ENV_WORKER_URL.to_owned(), ctx.worker_url.to_owned());
    env.insert(ENV_WORKER_SECRET.to_owned(), ctx.worker_secret.to_owned());
    env.insert(ENV_AGENT_RUN_ID.to_owned(), ctx.run_id.to_owned());
    env.insert(ENV_AGENT.to_owned(), ctx.agent.to_owned());
    env
}
