//! Worker pool: client abstraction and candidate selection.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use crate::acp::connection::BoxFuture;
use crate::acp::protocol::ContentBlock;
use crate::models::permission::PermissionDecision;
use crate::models::session::{SessionTransition, StopReason};
use crate::models::worker::WorkerInfo;
use crate::worker::{NewSessionRequest, NewSessionResponse};
use crate::Result;

/// Structural interface between the control plane and one worker.
///
/// The embedded worker implements this in-process; remote workers implement
/// it over whatever transport the deployment uses. The dispatcher only sees
/// this trait.
pub trait WorkerClient: Send + Sync + 'static {
    /// Static worker metadata.
    fn info(&self) -> &WorkerInfo;

    /// Probe reachability. Unreachable workers are skipped by selection and
    /// their sessions retried elsewhere.
    fn is_reachable(&self) -> BoxFuture<'_, bool>;

    /// Launch a session on the worker.
    fn new_session(&self, request: NewSessionRequest)
        -> BoxFuture<'_, Result<NewSessionResponse>>;

    /// Forward a follow-up prompt.
    fn prompt_session(
        &self,
        session_id: &str,
        blocks: Vec<ContentBlock>,
    ) -> BoxFuture<'_, Result<StopReason>>;

    /// Interrupt the session's current turn.
    fn cancel_session(&self, session_id: &str) -> BoxFuture<'_, Result<()>>;

    /// Stop the session.
    fn stop_session(&self, session_id: &str) -> BoxFuture<'_, Result<()>>;

    /// Deliver a permission decision.
    fn respond_to_permission(
        &self,
        session_id: &str,
        request_id: &str,
        decision: PermissionDecision,
    ) -> BoxFuture<'_, Result<()>>;

    /// Snapshot of live sessions, used for reconciliation after a dropped
    /// state stream.
    fn current_sessions(&self) -> BoxFuture<'_, Result<Vec<SessionTransition>>>;

    /// Long-lived stream of session transitions.
    fn state_stream(&self) -> BoxFuture<'_, Result<mpsc::Receiver<SessionTransition>>>;
}

/// One registered worker and its scheduling state.
struct PoolEntry {
    client: Arc<dyn WorkerClient>,
    /// Session ids currently believed live on the worker.
    active: HashSet<String>,
    /// Assignment counter value at the last dispatch, for the
    /// least-recently-assigned tie-break.
    last_assigned: u64,
}

/// Registry of workers known to the control plane.
#[derive(Default)]
pub struct WorkerPool {
    entries: Mutex<Vec<PoolEntry>>,
    assign_seq: AtomicU64,
}

impl WorkerPool {
    /// Create an empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a worker. The embedded co-located worker registers exactly
    /// like a remote one.
    pub async fn register(&self, client: Arc<dyn WorkerClient>) {
        let mut entries = self.entries.lock().await;
        entries.push(PoolEntry {
            client,
            active: HashSet::new(),
            last_assigned: 0,
        });
    }

    /// Look up a worker by id.
    pub async fn client(&self, worker_id: &str) -> Option<Arc<dyn WorkerClient>> {
        self.entries
            .lock()
            .await
            .iter()
            .find(|e| e.client.info().id == worker_id)
            .map(|e| Arc::clone(&e.client))
    }

    /// Select a worker for `agent`: reachable, capable, under its cap,
    /// least recently assigned.
    ///
    /// Returns `None` when no candidate qualifies.
    pub async fn select(&self, agent: &str) -> Option<Arc<dyn WorkerClient>> {
        // Snapshot candidates so reachability probes run without the lock.
        let mut candidates: Vec<(String, u64, Arc<dyn WorkerClient>)> = {
            let entries = self.entries.lock().await;
            entries
                .iter()
                .filter(|e| {
                    let info = e.client.info();
                    info.agents.iter().any(|a| a == agent)
                        && e.active.len()
                            < usize::try_from(info.max_sessions).unwrap_or(usize::MAX)
                })
                .map(|e| {
                    (
                        e.client.info().id.clone(),
                        e.last_assigned,
                        Arc::clone(&e.client),
                    )
                })
                .collect()
        };
        candidates.sort_by_key(|(id, last, _)| (*last, id.clone()));

        for (worker_id, _, client) in candidates {
            if client.is_reachable().await {
                self.touch_assigned(&worker_id).await;
                return Some(client);
            }
            debug!(worker_id, "pool: worker unreachable, skipping");
        }
        None
    }

    /// Record that a session was dispatched to a worker.
    pub async fn note_session_started(&self, worker_id: &str, session_id: &str) {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.iter_mut().find(|e| e.client.info().id == worker_id) {
            entry.active.insert(session_id.to_owned());
        }
    }

    /// Reflect a worker-reported transition into the scheduling state.
    pub async fn note_transition(&self, worker_id: &str, transition: &SessionTransition) {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.iter_mut().find(|e| e.client.info().id == worker_id) {
            if transition.status.is_terminal() {
                entry.active.remove(&transition.session_id);
            } else {
                entry.active.insert(transition.session_id.clone());
            }
        }
    }

    /// Ids of all registered workers.
    pub async fn worker_ids(&self) -> Vec<String> {
        self.entries
            .lock()
            .await
            .iter()
            .map(|e| e.client.info().id.clone())
            .collect()
    }

    /// Bump the assignment counter for a worker.
    async fn touch_assigned(&self, worker_id: &str) {
        let seq = self.assign_seq.fetch_add(1, Ordering::Relaxed) + 1;
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.iter_mut().find(|e| e.client.info().id == worker_id) {
            entry.last_assigned = seq;
        }
    }
}
