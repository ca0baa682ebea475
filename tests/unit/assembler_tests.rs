use serde_json::json;

use flowgentic::events::assembler::MessageAssembler;
use flowgentic::models::event::SessionEventPayload;
use flowgentic::models::message::{MessagePayload, ToolCallStatus, ToolKind};

fn message_chunk(text: &str) -> SessionEventPayload {
    SessionEventPayload::AgentMessageChunk {
        text: text.to_owned(),
    }
}

fn thought_chunk(text: &str) -> SessionEventPayload {
    SessionEventPayload::AgentThoughtChunk {
        text: text.to_owned(),
    }
}

fn tool_start(id: &str, status: ToolCallStatus) -> SessionEventPayload {
    SessionEventPayload::ToolCallStart {
        tool_call_id: id.to_owned(),
        title: "run".to_owned(),
        kind: ToolKind::Execute,
        raw_input: Some(json!({ "command": "ls" })),
        status,
        locations: Vec::new(),
    }
}

fn tool_update(id: &str, status: ToolCallStatus) -> SessionEventPayload {
    SessionEventPayload::ToolCallUpdate {
        tool_call_id: id.to_owned(),
        status: Some(status),
        raw_output: Some(json!({ "ok": true })),
        content: None,
        locations: None,
    }
}

#[test]
fn adjacent_chunks_fold_into_one_message_on_flush() {
    let mut assembler = MessageAssembler::new();
    assert!(assembler.observe(&message_chunk("a")).is_empty());
    assert!(assembler.observe(&message_chunk("b")).is_empty());
    assert!(assembler.observe(&message_chunk("c")).is_empty());

    let flushed = assembler.flush();
    assert_eq!(
        flushed,
        vec![MessagePayload::AgentMessage {
            text: "abc".to_owned()
        }]
    );
    assert!(assembler.flush().is_empty(), "flush drains the buffer");
}

#[test]
fn kind_switch_closes_the_previous_block() {
    let mut assembler = MessageAssembler::new();
    assembler.observe(&thought_chunk("thinking…"));
    let out = assembler.observe(&message_chunk("answer"));

    assert_eq!(
        out,
        vec![MessagePayload::AgentThought {
            text: "thinking…".to_owned()
        }]
    );
    assert_eq!(
        assembler.flush(),
        vec![MessagePayload::AgentMessage {
            text: "answer".to_owned()
        }]
    );
}

#[test]
fn terminal_tool_call_closes_text_and_persists() {
    let mut assembler = MessageAssembler::new();
    assembler.observe(&message_chunk("running a tool"));
    assert!(assembler
        .observe(&tool_start("call-1", ToolCallStatus::InProgress))
        .is_empty());

    let out = assembler.observe(&tool_update("call-1", ToolCallStatus::Completed));
    assert_eq!(out.len(), 2);
    assert!(matches!(
        &out[0],
        MessagePayload::AgentMessage { text } if text == "running a tool"
    ));
    match &out[1] {
        MessagePayload::ToolCall { state } => {
            assert_eq!(state.tool_call_id, "call-1");
            assert_eq!(state.status, ToolCallStatus::Completed);
            assert_eq!(state.raw_output, Some(json!({ "ok": true })));
            assert_eq!(state.raw_input, Some(json!({ "command": "ls" })));
        }
        other => panic!("expected tool call, got {other:?}"),
    }
}

#[test]
fn non_terminal_updates_keep_the_call_in_flight() {
    let mut assembler = MessageAssembler::new();
    assembler.observe(&tool_start("call-1", ToolCallStatus::Pending));
    assert!(assembler
        .observe(&tool_update("call-1", ToolCallStatus::InProgress))
        .is_empty());
    let out = assembler.observe(&tool_update("call-1", ToolCallStatus::Failed));
    assert!(matches!(
        &out[0],
        MessagePayload::ToolCall { state } if state.status == ToolCallStatus::Failed
    ));
}

#[test]
fn updates_for_unknown_calls_are_ignored() {
    let mut assembler = MessageAssembler::new();
    assert!(assembler
        .observe(&tool_update("ghost", ToolCallStatus::Completed))
        .is_empty());
}

#[test]
fn mode_change_persists_after_closing_the_block() {
    let mut assembler = MessageAssembler::new();
    assembler.observe(&message_chunk("before"));
    let out = assembler.observe(&SessionEventPayload::ModeChange {
        mode_id: "plan".to_owned(),
    });

    assert_eq!(out.len(), 2);
    assert!(matches!(&out[0], MessagePayload::AgentMessage { text } if text == "before"));
    assert!(matches!(&out[1], MessagePayload::ModeChange { mode_id } if mode_id == "plan"));
}

#[test]
fn permission_requests_do_not_disturb_assembly() {
    let mut assembler = MessageAssembler::new();
    assembler.observe(&message_chunk("part"));
    assert!(assembler
        .observe(&SessionEventPayload::PermissionRequest {
            request_id: "r-1".to_owned(),
            tool_name: "bash".to_owned(),
            raw_input: None,
        })
        .is_empty());
    assert_eq!(
        assembler.flush(),
        vec![MessagePayload::AgentMessage {
            text: "part".to_owned()
        }]
    );
}
