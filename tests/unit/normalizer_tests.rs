use serde_json::json;

use flowgentic::acp::protocol::{ContentBlock, SessionUpdate, ToolCallFields};
use flowgentic::events::normalizer::normalize_update;
use flowgentic::models::event::SessionEventPayload;
use flowgentic::models::message::{ToolCallStatus, ToolKind};

fn fields(id: &str) -> ToolCallFields {
    ToolCallFields {
        tool_call_id: id.to_owned(),
        title: None,
        kind: None,
        status: None,
        raw_input: None,
        raw_output: None,
        content: None,
        locations: None,
    }
}

#[test]
fn message_and_thought_chunks_carry_text() {
    let update = SessionUpdate::AgentMessageChunk {
        content: ContentBlock::text("hello"),
    };
    assert_eq!(
        normalize_update(update),
        Some(SessionEventPayload::AgentMessageChunk {
            text: "hello".to_owned()
        })
    );

    let update = SessionUpdate::AgentThoughtChunk {
        content: ContentBlock::text("hmm"),
    };
    assert_eq!(
        normalize_update(update),
        Some(SessionEventPayload::AgentThoughtChunk {
            text: "hmm".to_owned()
        })
    );
}

#[test]
fn tool_call_defaults_title_kind_and_status() {
    let update = SessionUpdate::ToolCall {
        fields: fields("call-9"),
    };
    let Some(SessionEventPayload::ToolCallStart {
        tool_call_id,
        title,
        kind,
        status,
        ..
    }) = normalize_update(update)
    else {
        panic!("expected tool_call_start");
    };
    assert_eq!(tool_call_id, "call-9");
    assert_eq!(title, "call-9", "title falls back to the id");
    assert_eq!(kind, ToolKind::Other);
    assert_eq!(status, ToolCallStatus::Pending);
}

#[test]
fn known_kind_and_status_strings_are_mapped() {
    let mut f = fields("call-1");
    f.title = Some("edit file".to_owned());
    f.kind = Some("edit".to_owned());
    f.status = Some("in_progress".to_owned());
    f.raw_input = Some(json!({ "path": "/tmp/a" }));

    let Some(SessionEventPayload::ToolCallStart {
        title,
        kind,
        status,
        raw_input,
        ..
    }) = normalize_update(SessionUpdate::ToolCall { fields: f })
    else {
        panic!("expected tool_call_start");
    };
    assert_eq!(title, "edit file");
    assert_eq!(kind, ToolKind::Edit);
    assert_eq!(status, ToolCallStatus::InProgress);
    assert_eq!(raw_input, Some(json!({ "path": "/tmp/a" })));
}

#[test]
fn unknown_status_strings_are_dropped_on_updates() {
    let mut f = fields("call-1");
    f.status = Some("weird".to_owned());
    let Some(SessionEventPayload::ToolCallUpdate { status, .. }) =
        normalize_update(SessionUpdate::ToolCallUpdate { fields: f })
    else {
        panic!("expected tool_call_update");
    };
    assert_eq!(status, None);
}

#[test]
fn mode_updates_become_mode_change_events() {
    let update = SessionUpdate::CurrentModeUpdate {
        current_mode_id: "plan".to_owned(),
    };
    assert_eq!(
        normalize_update(update),
        Some(SessionEventPayload::ModeChange {
            mode_id: "plan".to_owned()
        })
    );
}
