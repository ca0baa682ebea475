//! Worker state subscription: transition application and reconnect
//! reconciliation.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use flowgentic::dispatch::{state_sync, WorkerPool};
use flowgentic::models::session::{Session, SessionStatus, SessionTransition};
use flowgentic::persistence::db;
use flowgentic::persistence::session_repo::SessionRepo;

use super::test_helpers::{session_options, FakeWorker};

async fn running_session(repo: &SessionRepo) -> Session {
    let session = Session::new("thread-1".to_owned(), None, session_options(Some("hi")));
    let created = repo.create(&session).await.expect("create");
    repo.mark_running(&created.id, "w1", Some("agent-1"))
        .await
        .expect("mark running");
    repo.get_by_id(&created.id)
        .await
        .expect("get")
        .expect("exists")
}

async fn wait_for_db_status(repo: &SessionRepo, session_id: &str, status: SessionStatus) {
    timeout(Duration::from_secs(5), async {
        loop {
            let session = repo
                .get_by_id(session_id)
                .await
                .expect("get")
                .expect("exists");
            if session.status == status {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("status reflected in session record");
}

#[tokio::test]
async fn stream_transitions_update_the_session_record() {
    let database = Arc::new(db::connect_memory().await.expect("db"));
    let repo = SessionRepo::new(database);
    let session = running_session(&repo).await;

    let pool = Arc::new(WorkerPool::new());
    let worker = FakeWorker::new("w1", &["scripted"]);
    pool.register(worker.clone()).await;

    let cancel = CancellationToken::new();
    let task = state_sync::spawn_state_sync(
        repo.clone(),
        Arc::clone(&pool),
        worker.clone(),
        cancel.clone(),
    );

    // Give the task a moment to open the stream.
    tokio::time::sleep(Duration::from_millis(50)).await;
    worker
        .push_transition(SessionTransition {
            session_id: session.id.clone(),
            status: SessionStatus::Idle,
            agent_session_id: Some("agent-updated".to_owned()),
            error: None,
        })
        .await;

    wait_for_db_status(&repo, &session.id, SessionStatus::Idle).await;
    let updated = repo
        .get_by_id(&session.id)
        .await
        .expect("get")
        .expect("exists");
    assert_eq!(updated.agent_session_id.as_deref(), Some("agent-updated"));

    cancel.cancel();
    let _ = task.await;
}

#[tokio::test]
async fn dropped_stream_reconnects_and_reconciles() {
    let database = Arc::new(db::connect_memory().await.expect("db"));
    let repo = SessionRepo::new(database);
    let session = running_session(&repo).await;

    let pool = Arc::new(WorkerPool::new());
    let worker = FakeWorker::new("w1", &["scripted"]);
    pool.register(worker.clone()).await;

    let cancel = CancellationToken::new();
    let task = state_sync::spawn_state_sync(
        repo.clone(),
        Arc::clone(&pool),
        worker.clone(),
        cancel.clone(),
    );
    tokio::time::sleep(Duration::from_millis(50)).await;

    // The worker stopped the session while the subscription was down; the
    // snapshot carries the missed transition.
    worker
        .set_snapshot(vec![SessionTransition {
            session_id: session.id.clone(),
            status: SessionStatus::Stopped,
            agent_session_id: None,
            error: None,
        }])
        .await;
    worker.drop_streams().await;

    wait_for_db_status(&repo, &session.id, SessionStatus::Stopped).await;

    cancel.cancel();
    let _ = task.await;
}

#[tokio::test]
async fn errored_transition_records_the_reason() {
    let database = Arc::new(db::connect_memory().await.expect("db"));
    let repo = SessionRepo::new(database);
    let session = running_session(&repo).await;

    let pool = Arc::new(WorkerPool::new());
    let worker = FakeWorker::new("w1", &["scripted"]);
    pool.register(worker.clone()).await;

    let cancel = CancellationToken::new();
    let task = state_sync::spawn_state_sync(
        repo.clone(),
        Arc::clone(&pool),
        worker.clone(),
        cancel.clone(),
    );
    tokio::time::sleep(Duration::from_millis(50)).await;

    worker
        .push_transition(SessionTransition {
            session_id: session.id.clone(),
            status: SessionStatus::Errored,
            agent_session_id: None,
            error: Some("peer terminated unexpectedly".to_owned()),
        })
        .await;

    wait_for_db_status(&repo, &session.id, SessionStatus::Errored).await;
    let updated = repo
        .get_by_id(&session.id)
        .await
        .expect("get")
        .expect("exists");
    assert_eq!(
        updated.error_reason.as_deref(),
        Some("peer terminated unexpectedly")
    );

    cancel.cancel();
    let _ = task.await;
}
