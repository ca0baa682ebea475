use flowgentic::driver::{
    AgentCapabilities, AgentRegistry, AgentSpec, LaunchMode, PermissionChannel,
};
use flowgentic::AppError;

fn spec(id: &str) -> AgentSpec {
    AgentSpec {
        agent_id: id.to_owned(),
        capabilities: AgentCapabilities::default(),
        launch: LaunchMode::Subprocess {
            command: "agent".to_owned(),
            args: vec!["--acp".to_owned()],
        },
    }
}

#[test]
fn lookup_by_id() {
    let mut registry = AgentRegistry::new();
    registry.register(spec("codex"));

    let found = registry.get("codex").expect("registered");
    assert_eq!(found.agent_id, "codex");

    let err = registry.get("gemini").expect_err("unknown");
    assert!(matches!(err, AppError::NotFound(_)), "got {err:?}");
}

#[test]
fn registering_the_same_id_replaces_the_spec() {
    let mut registry = AgentRegistry::new();
    registry.register(spec("codex"));
    let mut replacement = spec("codex");
    replacement.capabilities.session_resolver = true;
    registry.register(replacement);

    assert_eq!(registry.agent_ids().len(), 1);
    assert!(registry.get("codex").expect("found").capabilities.session_resolver);
}

#[test]
fn default_capabilities_are_interactive_non_resolver() {
    let caps = AgentCapabilities::default();
    assert!(!caps.session_resolver);
    assert_eq!(caps.permissions, PermissionChannel::Interactive);
}
