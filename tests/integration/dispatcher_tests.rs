//! Dispatcher reconciliation: placement, retry budget, tie-breaks.

use std::sync::Arc;
use std::time::Duration;

use flowgentic::dispatch::{DispatchConfig, Dispatcher, WorkerPool};
use flowgentic::models::session::{Session, SessionStatus};
use flowgentic::persistence::db;
use flowgentic::persistence::session_repo::SessionRepo;

use super::test_helpers::{session_options, FakeWorker};

fn fast_config() -> DispatchConfig {
    DispatchConfig {
        max_attempts: 3,
        base_backoff: Duration::from_millis(1),
        tick: Duration::from_secs(60),
    }
}

async fn test_repo() -> SessionRepo {
    let database = Arc::new(db::connect_memory().await.expect("db"));
    SessionRepo::new(database)
}

async fn pending_session(repo: &SessionRepo, agent: &str) -> Session {
    let mut options = session_options(Some("hello"));
    options.agent = agent.to_owned();
    let session = Session::new("thread-1".to_owned(), None, options);
    repo.create(&session).await.expect("create session")
}

#[tokio::test]
async fn pending_session_is_dispatched_to_a_capable_worker() {
    let repo = test_repo().await;
    let pool = Arc::new(WorkerPool::new());
    let worker = FakeWorker::new("w1", &["scripted"]);
    pool.register(worker.clone()).await;

    let session = pending_session(&repo, "scripted").await;
    let (mut dispatcher, _handle) = Dispatcher::new(repo.clone(), pool, fast_config());
    dispatcher.reconcile().await.expect("reconcile");

    let updated = repo
        .get_by_id(&session.id)
        .await
        .expect("get")
        .expect("exists");
    assert_eq!(updated.status, SessionStatus::Running);
    assert_eq!(updated.worker_id.as_deref(), Some("w1"));
    assert_eq!(
        updated.agent_session_id,
        Some(format!("agent-{}", session.id))
    );
    assert_eq!(worker.launches.lock().await.len(), 1);
}

#[tokio::test]
async fn no_reachable_worker_exhausts_retries_and_errors() {
    let repo = test_repo().await;
    let pool = Arc::new(WorkerPool::new());
    let worker = FakeWorker::new("w1", &["scripted"]);
    worker.set_reachable(false);
    pool.register(worker).await;

    let session = pending_session(&repo, "scripted").await;
    let (mut dispatcher, _handle) = Dispatcher::new(repo.clone(), pool, fast_config());

    for _ in 0..3 {
        dispatcher.reconcile().await.expect("reconcile");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let updated = repo
        .get_by_id(&session.id)
        .await
        .expect("get")
        .expect("exists");
    assert_eq!(updated.status, SessionStatus::Errored);
    let reason = updated.error_reason.expect("reason recorded");
    assert!(reason.contains("no reachable worker"), "reason: {reason}");
}

#[tokio::test]
async fn transient_failures_are_retried_until_success() {
    let repo = test_repo().await;
    let pool = Arc::new(WorkerPool::new());
    let worker = FakeWorker::new("w1", &["scripted"]);
    worker.fail_next(2, false);
    pool.register(worker.clone()).await;

    let session = pending_session(&repo, "scripted").await;
    let (mut dispatcher, _handle) = Dispatcher::new(repo.clone(), pool, fast_config());

    for _ in 0..3 {
        dispatcher.reconcile().await.expect("reconcile");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let updated = repo
        .get_by_id(&session.id)
        .await
        .expect("get")
        .expect("exists");
    assert_eq!(updated.status, SessionStatus::Running);
    assert_eq!(worker.launches.lock().await.len(), 1);
}

#[tokio::test]
async fn spawn_failures_error_the_session_immediately() {
    let repo = test_repo().await;
    let pool = Arc::new(WorkerPool::new());
    let worker = FakeWorker::new("w1", &["scripted"]);
    worker.fail_next(1, true);
    pool.register(worker).await;

    let session = pending_session(&repo, "scripted").await;
    let (mut dispatcher, _handle) = Dispatcher::new(repo.clone(), pool, fast_config());
    dispatcher.reconcile().await.expect("reconcile");

    let updated = repo
        .get_by_id(&session.id)
        .await
        .expect("get")
        .expect("exists");
    assert_eq!(updated.status, SessionStatus::Errored);
    let reason = updated.error_reason.expect("reason");
    assert!(reason.contains("launch on worker 'w1' failed"), "reason: {reason}");
}

#[tokio::test]
async fn selection_prefers_least_recently_assigned() {
    let repo = test_repo().await;
    let pool = Arc::new(WorkerPool::new());
    let first = FakeWorker::new("w1", &["scripted"]);
    let second = FakeWorker::new("w2", &["scripted"]);
    pool.register(first.clone()).await;
    pool.register(second.clone()).await;

    pending_session(&repo, "scripted").await;
    tokio::time::sleep(Duration::from_millis(2)).await;
    pending_session(&repo, "scripted").await;

    let (mut dispatcher, _handle) = Dispatcher::new(repo.clone(), pool, fast_config());
    dispatcher.reconcile().await.expect("reconcile");

    // Two pending sessions spread across the two idle workers.
    assert_eq!(first.launches.lock().await.len(), 1);
    assert_eq!(second.launches.lock().await.len(), 1);
}

#[tokio::test]
async fn capability_mismatch_counts_as_no_worker() {
    let repo = test_repo().await;
    let pool = Arc::new(WorkerPool::new());
    let worker = FakeWorker::new("w1", &["other-agent"]);
    pool.register(worker).await;

    let session = pending_session(&repo, "scripted").await;
    let (mut dispatcher, _handle) = Dispatcher::new(repo.clone(), pool, fast_config());

    for _ in 0..3 {
        dispatcher.reconcile().await.expect("reconcile");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let updated = repo
        .get_by_id(&session.id)
        .await
        .expect("get")
        .expect("exists");
    assert_eq!(updated.status, SessionStatus::Errored);
}
