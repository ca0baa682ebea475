//! Client-facing control-plane operations.
//!
//! Threads, session creation, message listing, event watching, and control
//! operations routed to the owning worker. Watching honors the
//! history-then-live contract: persisted messages with sequence greater
//! than the cursor stream first, then live items with strictly greater
//! sequences — no duplicates across the boundary.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

use crate::dispatch::{DispatchHandle, WorkerPool};
use crate::models::event::WatchItem;
use crate::models::message::SessionMessage;
use crate::models::permission::PermissionDecision;
use crate::models::session::{Session, SessionOptions, SessionStatus};
use crate::persistence::message_repo::MessageRepo;
use crate::persistence::session_repo::SessionRepo;
use crate::worker::manager::SessionManager;
use crate::{AppError, Result};

/// What a watch or list call addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchSelector {
    /// One session.
    Session(String),
    /// Every session in a thread.
    Thread(String),
    /// Every session belonging to a task.
    Task(String),
}

/// `CreateThread` outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateThreadResponse {
    /// Newly minted thread id.
    pub thread_id: String,
    /// Initial session, when a prompt was supplied.
    pub session_id: Option<String>,
}

/// Client-facing control plane.
pub struct ControlPlane {
    sessions: SessionRepo,
    messages: MessageRepo,
    pool: Arc<WorkerPool>,
    dispatch: DispatchHandle,
    local: Arc<SessionManager>,
    watch_capacity: usize,
}

impl ControlPlane {
    /// Assemble the control plane over its collaborators.
    #[must_use]
    pub fn new(
        sessions: SessionRepo,
        messages: MessageRepo,
        pool: Arc<WorkerPool>,
        dispatch: DispatchHandle,
        local: Arc<SessionManager>,
        watch_capacity: usize,
    ) -> Self {
        Self {
            sessions,
            messages,
            pool,
            dispatch,
            local,
            watch_capacity,
        }
    }

    /// Mint a thread; when `options` carries a prompt, create its initial
    /// `pending` session and wake the dispatcher.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the session insert fails.
    pub async fn create_thread(
        &self,
        task_id: Option<String>,
        options: Option<SessionOptions>,
    ) -> Result<CreateThreadResponse> {
        let thread_id = Uuid::new_v4().to_string();

        let session_id = match options {
            Some(options) if options.prompt.is_some() => {
                let session = self
                    .create_session(thread_id.clone(), task_id, options)
                    .await?;
                Some(session.id)
            }
            _ => None,
        };

        Ok(CreateThreadResponse {
            thread_id,
            session_id,
        })
    }

    /// Create a `pending` session and wake the dispatcher.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the insert fails.
    pub async fn create_session(
        &self,
        thread_id: String,
        task_id: Option<String>,
        options: SessionOptions,
    ) -> Result<Session> {
        let session = Session::new(thread_id, task_id, options);
        let created = self.sessions.create(&session).await?;
        self.dispatch.wake();
        Ok(created)
    }

    /// List persisted messages matching a selector, in per-session
    /// sequence order.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if a query fails.
    pub async fn list_session_messages(
        &self,
        selector: &WatchSelector,
    ) -> Result<Vec<SessionMessage>> {
        let mut out = Vec::new();
        for session_id in self.resolve(selector).await? {
            out.extend(self.messages.list_after(&session_id, 0).await?);
        }
        Ok(out)
    }

    /// Watch matching sessions: history after `after_sequence`, then live
    /// items with strictly greater sequences.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the selector cannot be resolved.
    pub async fn watch_session_events(
        &self,
        selector: &WatchSelector,
        after_sequence: u64,
    ) -> Result<mpsc::Receiver<WatchItem>> {
        let session_ids = self.resolve(selector).await?;
        let (tx, rx) = mpsc::channel(self.watch_capacity.max(1));

        // Attach to the live feeds before reading history so chunks
        // produced during the replay are buffered, not lost.
        let mut attachments = Vec::new();
        for session_id in session_ids {
            let subscription = match self.local.pipeline(&session_id).await {
                Some(pipeline) => Some(pipeline.subscribe().await),
                None => None,
            };
            attachments.push((session_id, subscription));
        }

        let messages = self.messages.clone();
        tokio::spawn(async move {
            let mut live = Vec::new();

            for (session_id, subscription) in attachments {
                let history = match messages.list_after(&session_id, after_sequence).await {
                    Ok(history) => history,
                    Err(err) => {
                        warn!(session_id, %err, "watch: history read failed, skipping session");
                        continue;
                    }
                };

                let mut last_delivered = after_sequence;
                for message in history {
                    last_delivered = last_delivered.max(message.sequence);
                    if tx.send(WatchItem::Message(message)).await.is_err() {
                        return;
                    }
                }

                if let Some(subscription) = subscription {
                    live.push((subscription, last_delivered));
                }
            }

            for (mut subscription, boundary) in live {
                let tx = tx.clone();
                tokio::spawn(async move {
                    let mut last_delivered = boundary;
                    while let Some(item) = subscription.rx.recv().await {
                        // Items at or below the boundary already reached the
                        // watcher through history.
                        if item.sequence() <= last_delivered {
                            continue;
                        }
                        last_delivered = item.sequence();
                        if tx.send(item).await.is_err() {
                            return;
                        }
                    }
                });
            }
        });

        Ok(rx)
    }

    /// Interrupt a session's current turn; a still-`pending` session is
    /// cancelled outright.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for unknown sessions or workers.
    pub async fn cancel_session(&self, session_id: &str) -> Result<()> {
        let session = self.require_session(session_id).await?;
        if session.status == SessionStatus::Pending {
            self.sessions
                .update_status(session_id, SessionStatus::Cancelled)
                .await?;
            return Ok(());
        }
        let worker = self.require_worker(&session).await?;
        worker.cancel_session(session_id).await
    }

    /// Stop a session; a still-`pending` session is cancelled outright.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for unknown sessions or workers.
    pub async fn stop_session(&self, session_id: &str) -> Result<()> {
        let session = self.require_session(session_id).await?;
        if session.status == SessionStatus::Pending {
            self.sessions
                .update_status(session_id, SessionStatus::Cancelled)
                .await?;
            return Ok(());
        }
        if session.status.is_terminal() {
            return Ok(());
        }
        let worker = self.require_worker(&session).await?;
        worker.stop_session(session_id).await
    }

    /// Route a permission decision to the session's worker.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for unknown sessions, workers, or
    /// request ids.
    pub async fn respond_to_permission(
        &self,
        session_id: &str,
        request_id: &str,
        allow: bool,
        reason: Option<String>,
    ) -> Result<()> {
        let session = self.require_session(session_id).await?;
        let worker = self.require_worker(&session).await?;
        worker
            .respond_to_permission(session_id, request_id, PermissionDecision { allow, reason })
            .await
    }

    /// Resolve a selector to session ids.
    async fn resolve(&self, selector: &WatchSelector) -> Result<Vec<String>> {
        match selector {
            WatchSelector::Session(id) => self.sessions.resolve_selector(Some(id), None, None),
            WatchSelector::Thread(id) => self.sessions.resolve_selector(None, Some(id), None),
            WatchSelector::Task(id) => self.sessions.resolve_selector(None, None, Some(id)),
        }
        .await
    }

    /// Load a session or fail with `NotFound`.
    async fn require_session(&self, session_id: &str) -> Result<Session> {
        self.sessions
            .get_by_id(session_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("session '{session_id}' not found")))
    }

    /// Resolve the worker owning `session`.
    async fn require_worker(
        &self,
        session: &Session,
    ) -> Result<Arc<dyn crate::dispatch::WorkerClient>> {
        let Some(worker_id) = &session.worker_id else {
            return Err(AppError::InvalidState(format!(
                "session '{}' has no assigned worker",
                session.id
            )));
        };
        self.pool
            .client(worker_id)
            .await
            .ok_or_else(|| AppError::NotFound(format!("worker '{worker_id}' not registered")))
    }
}
