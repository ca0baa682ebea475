use std::sync::Arc;

use flowgentic::models::session::{Session, SessionOptions, SessionStatus};
use flowgentic::persistence::{db, session_repo::SessionRepo};
use flowgentic::AppError;

fn options(agent: &str) -> SessionOptions {
    SessionOptions {
        cwd: "/tmp/x".to_owned(),
        agent: agent.to_owned(),
        mode: Some("code".to_owned()),
        model: None,
        system_prompt: Some("be brief".to_owned()),
        prompt: Some("hello".to_owned()),
        env_overrides: [("K".to_owned(), "V".to_owned())].into_iter().collect(),
        mcp_servers: Vec::new(),
        resume_session_id: None,
    }
}

async fn repo() -> SessionRepo {
    let database = Arc::new(db::connect_memory().await.expect("db connect"));
    SessionRepo::new(database)
}

#[tokio::test]
async fn create_and_fetch_round_trips_options() {
    let repo = repo().await;
    let session = Session::new("thr-1".to_owned(), Some("task-1".to_owned()), options("codex"));
    repo.create(&session).await.expect("create");

    let fetched = repo
        .get_by_id(&session.id)
        .await
        .expect("get")
        .expect("exists");
    assert_eq!(fetched, session);
}

#[tokio::test]
async fn get_by_id_returns_none_for_missing() {
    let repo = repo().await;
    assert!(repo.get_by_id("nope").await.expect("query").is_none());
}

#[tokio::test]
async fn list_pending_is_ordered_by_creation() {
    let repo = repo().await;
    let first = Session::new("thr".to_owned(), None, options("a"));
    repo.create(&first).await.expect("create");
    tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    let second = Session::new("thr".to_owned(), None, options("b"));
    repo.create(&second).await.expect("create");

    let pending = repo.list_pending().await.expect("list");
    assert_eq!(pending.len(), 2);
    assert_eq!(pending[0].id, first.id);
    assert_eq!(pending[1].id, second.id);
}

#[tokio::test]
async fn mark_running_records_worker_and_agent_ids() {
    let repo = repo().await;
    let session = Session::new("thr".to_owned(), None, options("codex"));
    repo.create(&session).await.expect("create");

    repo.mark_running(&session.id, "w1", Some("agent-9"))
        .await
        .expect("mark running");

    let updated = repo
        .get_by_id(&session.id)
        .await
        .expect("get")
        .expect("exists");
    assert_eq!(updated.status, SessionStatus::Running);
    assert_eq!(updated.worker_id.as_deref(), Some("w1"));
    assert_eq!(updated.agent_session_id.as_deref(), Some("agent-9"));
    assert!(repo.list_pending().await.expect("list").is_empty());
}

#[tokio::test]
async fn invalid_transitions_are_rejected() {
    let repo = repo().await;
    let session = Session::new("thr".to_owned(), None, options("codex"));
    repo.create(&session).await.expect("create");

    repo.mark_errored(&session.id, "boom").await.expect("error");
    let err = repo
        .update_status(&session.id, SessionStatus::Running)
        .await
        .expect_err("terminal state is final");
    assert!(matches!(err, AppError::InvalidState(_)), "got {err:?}");
}

#[tokio::test]
async fn same_status_update_is_a_no_op_not_an_error() {
    let repo = repo().await;
    let session = Session::new("thr".to_owned(), None, options("codex"));
    repo.create(&session).await.expect("create");
    repo.mark_running(&session.id, "w1", None).await.expect("run");

    let updated = repo
        .update_status(&session.id, SessionStatus::Running)
        .await
        .expect("idempotent");
    assert_eq!(updated.status, SessionStatus::Running);
}

#[tokio::test]
async fn mark_errored_records_the_reason() {
    let repo = repo().await;
    let session = Session::new("thr".to_owned(), None, options("codex"));
    repo.create(&session).await.expect("create");

    repo.mark_errored(&session.id, "no reachable worker for agent 'codex'")
        .await
        .expect("error");
    let updated = repo
        .get_by_id(&session.id)
        .await
        .expect("get")
        .expect("exists");
    assert_eq!(updated.status, SessionStatus::Errored);
    assert_eq!(
        updated.error_reason.as_deref(),
        Some("no reachable worker for agent 'codex'")
    );
}

#[tokio::test]
async fn selector_resolution_covers_all_three_axes() {
    let repo = repo().await;
    let in_thread = Session::new("thr-a".to_owned(), Some("task-1".to_owned()), options("x"));
    let other = Session::new("thr-b".to_owned(), None, options("x"));
    repo.create(&in_thread).await.expect("create");
    repo.create(&other).await.expect("create");

    let by_session = repo
        .resolve_selector(Some(&in_thread.id), None, None)
        .await
        .expect("by session");
    assert_eq!(by_session, vec![in_thread.id.clone()]);

    let by_thread = repo
        .resolve_selector(None, Some("thr-a"), None)
        .await
        .expect("by thread");
    assert_eq!(by_thread, vec![in_thread.id.clone()]);

    let by_task = repo
        .resolve_selector(None, None, Some("task-1"))
        .await
        .expect("by task");
    assert_eq!(by_task, vec![in_thread.id.clone()]);

    let err = repo
        .resolve_selector(None, None, None)
        .await
        .expect_err("empty selector");
    assert!(matches!(err, AppError::InvalidState(_)), "got {err:?}");
}

#[tokio::test]
async fn live_sessions_are_listed_per_worker() {
    let repo = repo().await;
    let session = Session::new("thr".to_owned(), None, options("codex"));
    repo.create(&session).await.expect("create");
    repo.mark_running(&session.id, "w1", None).await.expect("run");

    let live = repo.list_live_on_worker("w1").await.expect("list");
    assert_eq!(live.len(), 1);
    assert!(repo.list_live_on_worker("w2").await.expect("list").is_empty());
}
