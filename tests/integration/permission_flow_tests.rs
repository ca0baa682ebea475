//! Permission correlation: agent → broker → client → back.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::time::timeout;

use flowgentic::acp::protocol::ContentBlock;
use flowgentic::models::event::{SessionEventPayload, WatchItem};
use flowgentic::models::message::{MessageKind, MessagePayload, ToolCallStatus};
use flowgentic::models::permission::PermissionDecision;
use flowgentic::models::session::StopReason;
use flowgentic::persistence::message_repo::MessageRepo;
use flowgentic::AppError;

use super::test_helpers::{
    collect_until, launch_request, scripted_registry, test_manager, ScriptedAgentFactory,
    TurnScript,
};

fn gated_factory() -> ScriptedAgentFactory {
    ScriptedAgentFactory::new(TurnScript::PermissionGated {
        tool: "bash".to_owned(),
        input: json!({ "command": "ls" }),
    })
}

/// Extract the request id of the first permission_request event.
fn permission_request_id(items: &[WatchItem]) -> String {
    items
        .iter()
        .find_map(|item| match item {
            WatchItem::Event(event) => match &event.payload {
                SessionEventPayload::PermissionRequest { request_id, .. } => {
                    Some(request_id.clone())
                }
                _ => None,
            },
            WatchItem::Message(_) => None,
        })
        .expect("permission_request event present")
}

#[tokio::test]
async fn approved_permission_runs_the_tool() {
    let (manager, database) = test_manager(scripted_registry(gated_factory(), false)).await;
    let messages = MessageRepo::new(Arc::clone(&database));

    manager
        .launch(launch_request("sess-p", None))
        .await
        .expect("launch");
    let pipeline = manager.pipeline("sess-p").await.expect("pipeline");
    let mut subscription = pipeline.subscribe().await;

    let prompt_manager = Arc::clone(&manager);
    let turn = tokio::spawn(async move {
        prompt_manager
            .prompt("sess-p", vec![ContentBlock::text("list files")])
            .await
    });

    let items = collect_until(&mut subscription.rx, Duration::from_secs(5), |item| {
        matches!(
            item,
            WatchItem::Event(e)
                if matches!(e.payload, SessionEventPayload::PermissionRequest { .. })
        )
    })
    .await;
    let request_id = permission_request_id(&items);

    manager
        .respond_permission("sess-p", &request_id, PermissionDecision::allow())
        .await
        .expect("respond");

    let stop = timeout(Duration::from_secs(5), turn)
        .await
        .expect("turn finished")
        .expect("join")
        .expect("prompt");
    assert_eq!(stop, StopReason::EndTurn);

    // Exactly one tool_call_start followed by one terminal update in the
    // live stream.
    let rest = collect_until(&mut subscription.rx, Duration::from_secs(5), |item| {
        matches!(
            item,
            WatchItem::Event(e) if matches!(
                &e.payload,
                SessionEventPayload::ToolCallUpdate { status: Some(s), .. }
                    if s.is_terminal()
            )
        )
    })
    .await;
    let starts = rest
        .iter()
        .filter(|item| {
            matches!(
                item,
                WatchItem::Event(e)
                    if matches!(e.payload, SessionEventPayload::ToolCallStart { .. })
            )
        })
        .count();
    assert_eq!(starts, 1);

    // The terminal tool call persists alongside the closing message.
    let persisted = timeout(Duration::from_secs(5), async {
        loop {
            let persisted = messages.list_after("sess-p", 0).await.expect("list");
            if persisted.len() >= 2 {
                return persisted;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("messages persisted");

    let tool_call = persisted
        .iter()
        .find(|m| m.kind() == MessageKind::ToolCall)
        .expect("tool_call message");
    match &tool_call.payload {
        MessagePayload::ToolCall { state } => {
            assert_eq!(state.tool_call_id, "call-1");
            assert_eq!(state.status, ToolCallStatus::Completed);
            assert_eq!(state.raw_input, Some(json!({ "command": "ls" })));
        }
        other => panic!("expected tool_call payload, got {other:?}"),
    }
}

#[tokio::test]
async fn denied_permission_skips_the_tool() {
    let (manager, _db) = test_manager(scripted_registry(gated_factory(), false)).await;

    manager
        .launch(launch_request("sess-d", None))
        .await
        .expect("launch");
    let pipeline = manager.pipeline("sess-d").await.expect("pipeline");
    let mut subscription = pipeline.subscribe().await;

    let prompt_manager = Arc::clone(&manager);
    let turn = tokio::spawn(async move {
        prompt_manager
            .prompt("sess-d", vec![ContentBlock::text("list files")])
            .await
    });

    let items = collect_until(&mut subscription.rx, Duration::from_secs(5), |item| {
        matches!(
            item,
            WatchItem::Event(e)
                if matches!(e.payload, SessionEventPayload::PermissionRequest { .. })
        )
    })
    .await;
    let request_id = permission_request_id(&items);

    manager
        .respond_permission("sess-d", &request_id, PermissionDecision::deny("not now"))
        .await
        .expect("respond");

    timeout(Duration::from_secs(5), turn)
        .await
        .expect("turn finished")
        .expect("join")
        .expect("prompt");

    // No tool call was announced after the deny.
    let rest = collect_until(&mut subscription.rx, Duration::from_secs(5), |item| {
        matches!(
            item,
            WatchItem::Event(e)
                if matches!(e.payload, SessionEventPayload::AgentMessageChunk { .. })
        )
    })
    .await;
    assert!(rest.iter().all(|item| !matches!(
        item,
        WatchItem::Event(e)
            if matches!(e.payload, SessionEventPayload::ToolCallStart { .. })
    )));
}

#[tokio::test]
async fn unknown_request_id_is_not_found() {
    let (manager, _db) = test_manager(scripted_registry(gated_factory(), false)).await;
    manager
        .launch(launch_request("sess-u", None))
        .await
        .expect("launch");

    let err = manager
        .respond_permission("sess-u", "no-such-request", PermissionDecision::allow())
        .await
        .expect_err("unknown request id");
    assert!(matches!(err, AppError::NotFound(_)), "got {err:?}");
}

#[tokio::test]
async fn stop_with_pending_permission_does_not_hang() {
    let (manager, _db) = test_manager(scripted_registry(gated_factory(), false)).await;

    manager
        .launch(launch_request("sess-s", None))
        .await
        .expect("launch");
    let pipeline = manager.pipeline("sess-s").await.expect("pipeline");
    let mut subscription = pipeline.subscribe().await;

    let prompt_manager = Arc::clone(&manager);
    let turn = tokio::spawn(async move {
        prompt_manager
            .prompt("sess-s", vec![ContentBlock::text("list files")])
            .await
    });

    collect_until(&mut subscription.rx, Duration::from_secs(5), |item| {
        matches!(
            item,
            WatchItem::Event(e)
                if matches!(e.payload, SessionEventPayload::PermissionRequest { .. })
        )
    })
    .await;

    // Stop while the permission is unresolved: teardown drains the broker
    // and the turn ends within the grace window.
    timeout(Duration::from_secs(5), manager.stop("sess-s"))
        .await
        .expect("stop finished in time")
        .expect("stop ok");

    let outcome = timeout(Duration::from_secs(5), turn)
        .await
        .expect("turn finished")
        .expect("join");
    assert!(outcome.is_err(), "turn should not complete normally");
    assert_eq!(manager.live_count().await, 0);
}
