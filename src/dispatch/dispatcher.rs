//! Session dispatcher: reconciles pending sessions onto workers.
//!
//! A reconciliation loop, not a request handler. It wakes on an explicit
//! signal (session created or updated) and on a periodic tick, reads all
//! `pending` sessions in creation order, and tries to place each one. A
//! failed placement backs off exponentially and gives up after a bounded
//! number of attempts, leaving the session `errored` with a terminal
//! reason.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dispatch::pool::WorkerPool;
use crate::persistence::session_repo::SessionRepo;
use crate::worker::NewSessionRequest;
use crate::{AppError, Result};

/// Dispatcher tuning knobs.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Placement attempts before a session becomes `errored`.
    pub max_attempts: u32,
    /// First retry delay; doubles per attempt.
    pub base_backoff: Duration,
    /// Periodic reconcile interval.
    pub tick: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(250),
            tick: Duration::from_secs(5),
        }
    }
}

/// Wake-up signal into the dispatcher loop.
#[derive(Clone)]
pub struct DispatchHandle {
    wake_tx: mpsc::Sender<()>,
}

impl DispatchHandle {
    /// Request a reconcile pass. Coalesces; never blocks.
    pub fn wake(&self) {
        let _ = self.wake_tx.try_send(());
    }
}

/// Per-session retry bookkeeping.
#[derive(Debug, Default)]
struct AttemptState {
    count: u32,
    next_eligible: Option<Instant>,
}

/// The reconciliation loop.
pub struct Dispatcher {
    sessions: SessionRepo,
    pool: Arc<WorkerPool>,
    config: DispatchConfig,
    wake_rx: mpsc::Receiver<()>,
    attempts: HashMap<String, AttemptState>,
}

impl Dispatcher {
    /// Create a dispatcher and its wake handle.
    #[must_use]
    pub fn new(
        sessions: SessionRepo,
        pool: Arc<WorkerPool>,
        config: DispatchConfig,
    ) -> (Self, DispatchHandle) {
        let (wake_tx, wake_rx) = mpsc::channel(1);
        (
            Self {
                sessions,
                pool,
                config,
                wake_rx,
                attempts: HashMap::new(),
            },
            DispatchHandle { wake_tx },
        )
    }

    /// Run until cancelled, reconciling on wake-ups and ticks.
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut tick = tokio::time::interval(self.config.tick);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    debug!("dispatcher: cancellation received, stopping");
                    return;
                }
                _ = self.wake_rx.recv() => {}
                _ = tick.tick() => {}
            }

            if let Err(err) = self.reconcile().await {
                warn!(%err, "dispatcher: reconcile pass failed");
            }
        }
    }

    /// One reconcile pass over all pending sessions.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if reading or updating session records fails;
    /// individual placement failures are absorbed into retry state instead.
    pub async fn reconcile(&mut self) -> Result<()> {
        let pending = self.sessions.list_pending().await?;

        // Forget retry state for sessions that left the pending set.
        let pending_ids: std::collections::HashSet<&str> =
            pending.iter().map(|s| s.id.as_str()).collect();
        self.attempts.retain(|id, _| pending_ids.contains(id.as_str()));

        let now = Instant::now();
        for session in pending {
            if let Some(state) = self.attempts.get(&session.id) {
                if state.next_eligible.is_some_and(|at| at > now) {
                    continue;
                }
            }

            let Some(worker) = self.pool.select(&session.options.agent).await else {
                let reason = format!(
                    "no reachable worker for agent '{}'",
                    session.options.agent
                );
                self.note_failure(&session.id, &reason, false).await?;
                continue;
            };

            let worker_id = worker.info().id.clone();
            let request = NewSessionRequest {
                session_id: session.id.clone(),
                options: session.options.clone(),
            };

            match worker.new_session(request).await {
                Ok(response) => {
                    self.sessions
                        .mark_running(
                            &session.id,
                            &worker_id,
                            response.agent_session_id.as_deref(),
                        )
                        .await?;
                    self.pool.note_session_started(&worker_id, &session.id).await;
                    self.attempts.remove(&session.id);
                    info!(session_id = %session.id, worker_id, "session dispatched");
                }
                Err(err) => {
                    // A spawn failure is deterministic on the worker; the
                    // transport-flavored errors get the retry budget.
                    let fatal = matches!(err, AppError::Spawn(_));
                    let reason = format!("launch on worker '{worker_id}' failed: {err}");
                    self.note_failure(&session.id, &reason, fatal).await?;
                }
            }
        }

        Ok(())
    }

    /// Record a placement failure; errs the session once the budget is
    /// spent (or immediately when `fatal`).
    async fn note_failure(&mut self, session_id: &str, reason: &str, fatal: bool) -> Result<()> {
        let count = {
            let state = self.attempts.entry(session_id.to_owned()).or_default();
            state.count += 1;
            state.count
        };

        if fatal || count >= self.config.max_attempts {
            warn!(session_id, attempts = count, reason, "session errored");
            self.sessions.mark_errored(session_id, reason).await?;
            self.attempts.remove(session_id);
            return Ok(());
        }

        let backoff = self.config.base_backoff * 2_u32.saturating_pow(count - 1);
        if let Some(state) = self.attempts.get_mut(session_id) {
            state.next_eligible = Some(Instant::now() + backoff);
        }
        debug!(
            session_id,
            attempt = count,
            backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX),
            reason,
            "placement failed, will retry"
        );
        Ok(())
    }
}
