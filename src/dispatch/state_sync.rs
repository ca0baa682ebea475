//! Worker state subscription: consume transitions, survive disconnects.
//!
//! One task per worker keeps a long-lived state stream open. Every
//! transition updates the session record and the pool's scheduling state.
//! A dropped stream is re-established with backoff, and each
//! (re)connection starts by reconciling against the worker's current
//! session snapshot so nothing reported during the gap is lost.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::dispatch::pool::{WorkerClient, WorkerPool};
use crate::models::session::{SessionStatus, SessionTransition};
use crate::persistence::session_repo::SessionRepo;

/// Initial reconnect delay; doubles per failure up to [`MAX_BACKOFF`].
const INITIAL_BACKOFF: Duration = Duration::from_millis(200);
/// Reconnect delay ceiling.
const MAX_BACKOFF: Duration = Duration::from_secs(10);

/// Spawn the state-sync task for one worker.
#[must_use]
pub fn spawn_state_sync(
    sessions: SessionRepo,
    pool: Arc<WorkerPool>,
    worker: Arc<dyn WorkerClient>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let worker_id = worker.info().id.clone();
        let mut backoff = INITIAL_BACKOFF;

        loop {
            if cancel.is_cancelled() {
                return;
            }

            // Reconcile first: anything the worker reported while we were
            // disconnected is reflected in its current snapshot.
            match worker.current_sessions().await {
                Ok(current) => {
                    for transition in &current {
                        apply_transition(&sessions, &pool, &worker_id, transition).await;
                    }
                    debug!(worker_id, sessions = current.len(), "state sync: reconciled");
                }
                Err(err) => {
                    warn!(worker_id, %err, "state sync: reconcile failed, backing off");
                    if sleep_or_cancel(backoff, &cancel).await {
                        return;
                    }
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                    continue;
                }
            }

            let mut stream = match worker.state_stream().await {
                Ok(stream) => {
                    backoff = INITIAL_BACKOFF;
                    stream
                }
                Err(err) => {
                    warn!(worker_id, %err, "state sync: subscription failed, backing off");
                    if sleep_or_cancel(backoff, &cancel).await {
                        return;
                    }
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                    continue;
                }
            };

            loop {
                tokio::select! {
                    () = cancel.cancelled() => return,
                    transition = stream.recv() => match transition {
                        Some(transition) => {
                            apply_transition(&sessions, &pool, &worker_id, &transition).await;
                        }
                        None => {
                            warn!(worker_id, "state sync: stream ended, reconnecting");
                            break;
                        }
                    }
                }
            }

            if sleep_or_cancel(backoff, &cancel).await {
                return;
            }
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    })
}

/// Reflect one worker-reported transition into the session record and the
/// pool.
async fn apply_transition(
    sessions: &SessionRepo,
    pool: &WorkerPool,
    worker_id: &str,
    transition: &SessionTransition,
) {
    pool.note_transition(worker_id, transition).await;

    if let Some(agent_session_id) = &transition.agent_session_id {
        if let Err(err) = sessions
            .set_agent_session_id(&transition.session_id, agent_session_id)
            .await
        {
            warn!(
                session_id = %transition.session_id,
                %err, "state sync: failed to record agent session id"
            );
        }
    }

    let applied = match transition.status {
        SessionStatus::Errored => {
            let reason = transition
                .error
                .as_deref()
                .unwrap_or("worker reported error");
            sessions.mark_errored(&transition.session_id, reason).await
        }
        status => sessions
            .update_status(&transition.session_id, status)
            .await
            .map(|_| ()),
    };

    if let Err(err) = applied {
        // Duplicate or stale transitions are expected after reconnects.
        debug!(
            session_id = %transition.session_id,
            status = ?transition.status,
            %err, "state sync: transition not applied"
        );
    }
}

/// Sleep for `duration`, returning `true` if cancelled first.
async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        () = cancel.cancelled() => true,
        () = tokio::time::sleep(duration) => false,
    }
}
