use serial_test::serial;

use flowgentic::config::{AgentLaunchKind, GlobalConfig, ENV_WORKER_SECRET};
use flowgentic::driver::PermissionChannel;
use flowgentic::AppError;

const FULL: &str = r#"
worker_id = "worker-1"
listen_addr = "127.0.0.1:7700"
worker_url = "http://127.0.0.1:7700"
db_path = "data/flowgentic.db"
max_concurrent_sessions = 8

[dispatch]
max_attempts = 5
base_backoff_ms = 100
tick_ms = 2000

[watch]
buffer_capacity = 128

[[agents]]
id = "codex"
kind = "embedded"
command = "codex"
args = ["app-server"]
permissions = "interactive"

[[agents]]
id = "claude-code"
kind = "acp"
command = "claude-code-acp"
session_resolver = true
permissions = "http"
"#;

#[test]
fn full_config_parses() {
    let config = GlobalConfig::from_toml_str(FULL).expect("parse");
    assert_eq!(config.worker_id, "worker-1");
    assert_eq!(config.dispatch.max_attempts, 5);
    assert_eq!(config.watch.buffer_capacity, 128);
    assert_eq!(config.agents.len(), 2);
    assert_eq!(config.agents[0].kind, AgentLaunchKind::Embedded);
    assert!(config.agents[1].session_resolver);
    assert_eq!(config.agents[1].permissions, PermissionChannel::Http);
}

#[test]
fn defaults_apply_to_optional_sections() {
    let minimal = r#"
worker_id = "w"
listen_addr = "127.0.0.1:0"
worker_url = "http://127.0.0.1:0"
db_path = ":memory:"
max_concurrent_sessions = 1

[[agents]]
id = "codex"
kind = "embedded"
command = "codex"
"#;
    let config = GlobalConfig::from_toml_str(minimal).expect("parse");
    assert_eq!(config.dispatch.max_attempts, 3);
    assert_eq!(config.watch.buffer_capacity, 256);
    assert_eq!(config.stop_grace_seconds, 5);
    assert_eq!(config.agents[0].permissions, PermissionChannel::Interactive);
    assert!(!config.agents[0].force_mcp_injection);
}

#[test]
fn registry_is_built_from_agent_entries() {
    let config = GlobalConfig::from_toml_str(FULL).expect("parse");
    let registry = config.build_agent_registry();
    let mut ids = registry.agent_ids();
    ids.sort();
    assert_eq!(ids, vec!["claude-code".to_owned(), "codex".to_owned()]);
    assert!(registry.get("codex").is_ok());
    assert!(registry.get("gemini").is_err());
}

#[test]
fn rejects_zero_session_cap() {
    let bad = FULL.replace("max_concurrent_sessions = 8", "max_concurrent_sessions = 0");
    let err = GlobalConfig::from_toml_str(&bad).expect_err("must fail");
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn rejects_duplicate_agent_ids() {
    let bad = FULL.replace("id = \"claude-code\"", "id = \"codex\"");
    let err = GlobalConfig::from_toml_str(&bad).expect_err("must fail");
    assert!(matches!(err, AppError::Config(ref msg) if msg.contains("duplicate")));
}

#[test]
fn rejects_unparseable_listen_addr() {
    let bad = FULL.replace("listen_addr = \"127.0.0.1:7700\"", "listen_addr = \"nope\"");
    let err = GlobalConfig::from_toml_str(&bad).expect_err("must fail");
    assert!(matches!(err, AppError::Config(ref msg) if msg.contains("listen_addr")));
}

#[test]
fn rejects_missing_agents() {
    let bad = r#"
worker_id = "w"
listen_addr = "127.0.0.1:0"
worker_url = "http://127.0.0.1:0"
db_path = ":memory:"
max_concurrent_sessions = 1
agents = []
"#;
    let err = GlobalConfig::from_toml_str(bad).expect_err("must fail");
    assert!(matches!(err, AppError::Config(ref msg) if msg.contains("agents")));
}

#[test]
#[serial]
fn secret_comes_from_the_environment() {
    let mut config = GlobalConfig::from_toml_str(FULL).expect("parse");

    std::env::remove_var(ENV_WORKER_SECRET);
    let err = config.load_secret().expect_err("missing secret");
    assert!(matches!(err, AppError::Config(_)));

    std::env::set_var(ENV_WORKER_SECRET, "super-secret");
    config.load_secret().expect("secret loaded");
    assert_eq!(config.worker_secret, "super-secret");
    std::env::remove_var(ENV_WORKER_SECRET);
}
