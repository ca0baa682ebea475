use serde_json::json;

use flowgentic::models::permission::PermissionDecision;
use flowgentic::permissions::PermissionBroker;
use flowgentic::AppError;

#[tokio::test]
async fn decision_reaches_the_waiting_agent() {
    let broker = PermissionBroker::new("s-1".to_owned());
    let (request, rx) = broker.open("bash", Some(json!({ "command": "ls" }))).await;

    assert_eq!(request.session_id, "s-1");
    assert_eq!(request.tool_name, "bash");
    assert_eq!(broker.pending_count().await, 1);

    broker
        .respond(&request.request_id, PermissionDecision::allow())
        .await
        .expect("respond");

    let decision = rx.await.expect("decision delivered");
    assert!(decision.allow);
    assert_eq!(broker.pending_count().await, 0);
}

#[tokio::test]
async fn request_ids_are_fresh_per_request() {
    let broker = PermissionBroker::new("s-1".to_owned());
    let (first, _rx1) = broker.open("bash", None).await;
    let (second, _rx2) = broker.open("bash", None).await;
    assert_ne!(first.request_id, second.request_id);
    assert_eq!(broker.pending_count().await, 2);
}

#[tokio::test]
async fn responding_twice_is_not_found() {
    let broker = PermissionBroker::new("s-1".to_owned());
    let (request, _rx) = broker.open("bash", None).await;

    broker
        .respond(&request.request_id, PermissionDecision::deny("no"))
        .await
        .expect("first response");
    let err = broker
        .respond(&request.request_id, PermissionDecision::allow())
        .await
        .expect_err("already consumed");
    assert!(matches!(err, AppError::NotFound(_)), "got {err:?}");
}

#[tokio::test]
async fn unknown_request_id_is_not_found() {
    let broker = PermissionBroker::new("s-1".to_owned());
    let err = broker
        .respond("ghost", PermissionDecision::allow())
        .await
        .expect_err("unknown id");
    assert!(matches!(err, AppError::NotFound(_)), "got {err:?}");
}

#[tokio::test]
async fn drain_denies_every_pending_request() {
    let broker = PermissionBroker::new("s-1".to_owned());
    let (_first, rx1) = broker.open("bash", None).await;
    let (_second, rx2) = broker.open("edit", None).await;

    broker.drain("session cancelled").await;
    assert_eq!(broker.pending_count().await, 0);

    for rx in [rx1, rx2] {
        let decision = rx.await.expect("deny delivered");
        assert!(!decision.allow);
        assert_eq!(decision.reason.as_deref(), Some("session cancelled"));
    }
}

#[tokio::test]
async fn decision_after_agent_gave_up_is_ok() {
    let broker = PermissionBroker::new("s-1".to_owned());
    let (request, rx) = broker.open("bash", None).await;
    drop(rx);

    // The agent stopped waiting; delivery is moot but not an error.
    broker
        .respond(&request.request_id, PermissionDecision::allow())
        .await
        .expect("respond");
}
