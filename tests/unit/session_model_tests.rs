use flowgentic::models::session::{SessionStatus, StopReason};

#[test]
fn pending_can_only_start_or_terminate() {
    let pending = SessionStatus::Pending;
    assert!(pending.can_transition_to(SessionStatus::Running));
    assert!(pending.can_transition_to(SessionStatus::Errored));
    assert!(pending.can_transition_to(SessionStatus::Cancelled));
    assert!(!pending.can_transition_to(SessionStatus::Idle));
    assert!(!pending.can_transition_to(SessionStatus::Stopped));
}

#[test]
fn running_and_idle_alternate() {
    assert!(SessionStatus::Running.can_transition_to(SessionStatus::Idle));
    assert!(SessionStatus::Idle.can_transition_to(SessionStatus::Running));
    assert!(!SessionStatus::Running.can_transition_to(SessionStatus::Pending));
}

#[test]
fn live_states_can_reach_every_terminal_state() {
    for live in [SessionStatus::Running, SessionStatus::Idle] {
        for terminal in [
            SessionStatus::Stopped,
            SessionStatus::Errored,
            SessionStatus::Cancelled,
        ] {
            assert!(live.can_transition_to(terminal), "{live:?} -> {terminal:?}");
        }
    }
}

#[test]
fn status_serializes_snake_case() {
    let json = serde_json::to_string(&SessionStatus::Errored).expect("serialize");
    assert_eq!(json, "\"errored\"");
    let parsed: SessionStatus = serde_json::from_str("\"idle\"").expect("parse");
    assert_eq!(parsed, SessionStatus::Idle);
}

#[test]
fn stop_reason_serializes_snake_case() {
    let json = serde_json::to_string(&StopReason::EndTurn).expect("serialize");
    assert_eq!(json, "\"end_turn\"");
    let parsed: StopReason = serde_json::from_str("\"cancelled\"").expect("parse");
    assert_eq!(parsed, StopReason::Cancelled);
}
