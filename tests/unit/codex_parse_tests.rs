//! Codex handshake shape probing and companion MCP injection.

use std::collections::HashMap;
use std::path::Path;

use serde_json::json;

use flowgentic::adapter::codex::{
    maybe_inject_companion_server, parse_commands, parse_models, parse_modes, resolve_agentctl,
    COMPANION_SERVER_NAME,
};

#[test]
fn models_nested_under_available() {
    let init = json!({
        "models": {
            "available": [
                { "modelId": "m-large", "name": "Large" },
                "m-small",
            ],
            "current": "m-large",
        }
    });
    let models = parse_models(&init).expect("models parsed");
    assert_eq!(models.available.len(), 2);
    assert_eq!(models.available[0].model_id, "m-large");
    assert_eq!(models.available[0].name.as_deref(), Some("Large"));
    assert_eq!(models.available[1].model_id, "m-small");
    assert_eq!(models.current.as_deref(), Some("m-large"));
}

#[test]
fn models_flat_available_models() {
    let init = json!({
        "availableModels": [{ "id": "m-1" }],
        "currentModel": "m-1",
    });
    let models = parse_models(&init).expect("models parsed");
    assert_eq!(models.available[0].model_id, "m-1");
    assert_eq!(models.current.as_deref(), Some("m-1"));
}

#[test]
fn models_plain_array() {
    let init = json!({ "models": ["m-a", "m-b"] });
    let models = parse_models(&init).expect("models parsed");
    assert_eq!(models.available.len(), 2);
    assert_eq!(models.current, None);
}

#[test]
fn missing_model_metadata_is_not_an_error() {
    assert!(parse_models(&json!({})).is_none());
    assert!(parse_models(&json!({ "models": "weird" })).is_none());
}

#[test]
fn commands_deduplicate_by_name_in_arrival_order() {
    let init = json!({
        "commands": [
            { "name": "review", "description": "review the diff" },
            "compact",
        ],
        "availableCommands": [
            { "name": "review", "description": "duplicate, dropped" },
            { "name": "plan" },
        ],
        "slash_commands": ["compact", "init"],
    });
    let commands = parse_commands(&init);
    let names: Vec<&str> = commands.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["review", "compact", "plan", "init"]);
    assert_eq!(commands[0].description.as_deref(), Some("review the diff"));
}

#[test]
fn modes_are_probed_best_effort() {
    let init = json!({
        "modes": {
            "available": [{ "modeId": "code", "name": "Code" }, "plan"],
            "current": "code",
        }
    });
    let modes = parse_modes(&init).expect("modes parsed");
    assert_eq!(modes.available.len(), 2);
    assert_eq!(modes.available[1].mode_id, "plan");
    assert_eq!(modes.current.as_deref(), Some("code"));
    assert!(parse_modes(&json!({})).is_none());
}

fn identity_env() -> HashMap<String, String> {
    [
        ("AGENTCTL_WORKER_URL", "http://127.0.0.1:7700"),
        ("AGENTCTL_WORKER_SECRET", "s3cret"),
        ("AGENTCTL_AGENT_RUN_ID", "run-1"),
        ("AGENTCTL_AGENT", "codex"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_owned(), v.to_owned()))
    .collect()
}

#[test]
fn agentctl_resolves_from_cwd_bin() {
    let dir = tempfile::tempdir().expect("tempdir");
    let bin_dir = dir.path().join("bin");
    std::fs::create_dir_all(&bin_dir).expect("mkdir");
    let binary = bin_dir.join("agentctl");
    std::fs::write(&binary, b"#!/bin/sh\n").expect("write");

    let resolved = resolve_agentctl(&identity_env(), dir.path()).expect("resolved");
    assert_eq!(resolved, binary);
}

#[test]
fn agentctl_env_override_wins() {
    let dir = tempfile::tempdir().expect("tempdir");
    let explicit = dir.path().join("custom-agentctl");
    std::fs::write(&explicit, b"#!/bin/sh\n").expect("write");

    let mut env = identity_env();
    env.insert("AGENTCTL_BIN".to_owned(), explicit.display().to_string());

    let resolved = resolve_agentctl(&env, Path::new("/nonexistent")).expect("resolved");
    assert_eq!(resolved, explicit);
}

#[test]
fn injection_requires_identity_and_opt_in() {
    let dir = tempfile::tempdir().expect("tempdir");
    let bin_dir = dir.path().join("bin");
    std::fs::create_dir_all(&bin_dir).expect("mkdir");
    std::fs::write(bin_dir.join("agentctl"), b"#!/bin/sh\n").expect("write");

    // No identity in the environment: nothing happens even when forced.
    let mut servers = Vec::new();
    maybe_inject_companion_server(&mut servers, &HashMap::new(), dir.path(), None, true);
    assert!(servers.is_empty());

    // Identity but no mention and no flag: nothing happens.
    let mut servers = Vec::new();
    maybe_inject_companion_server(&mut servers, &identity_env(), dir.path(), Some("plain"), false);
    assert!(servers.is_empty());

    // System prompt mentions the companion server: injected.
    let mut servers = Vec::new();
    maybe_inject_companion_server(
        &mut servers,
        &identity_env(),
        dir.path(),
        Some("use the flowgentic tools to report progress"),
        false,
    );
    assert_eq!(servers.len(), 1);
    assert_eq!(servers[0].name, COMPANION_SERVER_NAME);
    assert!(servers[0].env.contains_key("AGENTCTL_WORKER_URL"));
    assert!(servers[0].env.contains_key("AGENTCTL_AGENT_RUN_ID"));

    // Explicit flag works without a mention, but never duplicates.
    maybe_inject_companion_server(&mut servers, &identity_env(), dir.path(), None, true);
    assert_eq!(servers.len(), 1);
}
