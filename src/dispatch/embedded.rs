//! Embedded worker: the co-located worker as a [`WorkerClient`].
//!
//! The control plane schedules onto its own in-process worker through the
//! same trait it uses for remote workers, so the dispatcher never special-
//! cases locality.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tracing::warn;

use crate::acp::connection::BoxFuture;
use crate::acp::protocol::ContentBlock;
use crate::dispatch::pool::WorkerClient;
use crate::models::permission::PermissionDecision;
use crate::models::session::{SessionTransition, StopReason};
use crate::models::worker::WorkerInfo;
use crate::worker::manager::SessionManager;
use crate::worker::{NewSessionRequest, NewSessionResponse};
use crate::Result;

/// In-process worker client wrapping a [`SessionManager`].
pub struct EmbeddedWorker {
    info: WorkerInfo,
    manager: Arc<SessionManager>,
}

impl EmbeddedWorker {
    /// Wrap `manager` with the given fleet metadata.
    #[must_use]
    pub fn new(info: WorkerInfo, manager: Arc<SessionManager>) -> Arc<Self> {
        Arc::new(Self { info, manager })
    }
}

impl WorkerClient for EmbeddedWorker {
    fn info(&self) -> &WorkerInfo {
        &self.info
    }

    fn is_reachable(&self) -> BoxFuture<'_, bool> {
        Box::pin(async { true })
    }

    fn new_session(
        &self,
        request: NewSessionRequest,
    ) -> BoxFuture<'_, Result<NewSessionResponse>> {
        Box::pin(async move { self.manager.launch(request).await })
    }

    fn prompt_session(
        &self,
        session_id: &str,
        blocks: Vec<ContentBlock>,
    ) -> BoxFuture<'_, Result<StopReason>> {
        let session_id = session_id.to_owned();
        Box::pin(async move { self.manager.prompt(&session_id, blocks).await })
    }

    fn cancel_session(&self, session_id: &str) -> BoxFuture<'_, Result<()>> {
        let session_id = session_id.to_owned();
        Box::pin(async move { self.manager.cancel(&session_id).await })
    }

    fn stop_session(&self, session_id: &str) -> BoxFuture<'_, Result<()>> {
        let session_id = session_id.to_owned();
        Box::pin(async move { self.manager.stop(&session_id).await })
    }

    fn respond_to_permission(
        &self,
        session_id: &str,
        request_id: &str,
        decision: PermissionDecision,
    ) -> BoxFuture<'_, Result<()>> {
        let session_id = session_id.to_owned();
        let request_id = request_id.to_owned();
        Box::pin(async move {
            self.manager
                .respond_permission(&session_id, &request_id, decision)
                .await
        })
    }

    fn current_sessions(&self) -> BoxFuture<'_, Result<Vec<SessionTransition>>> {
        Box::pin(async move { Ok(self.manager.current_sessions().await) })
    }

    fn state_stream(&self) -> BoxFuture<'_, Result<mpsc::Receiver<SessionTransition>>> {
        Box::pin(async move {
            let mut subscription = self.manager.subscribe_transitions();
            let (tx, rx) = mpsc::channel(64);

            tokio::spawn(async move {
                loop {
                    match subscription.recv().await {
                        Ok(transition) => {
                            if tx.send(transition).await.is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            // Transitions were lost; end the stream so the
                            // consumer reconnects and reconciles.
                            warn!(skipped, "embedded state stream lagged, closing");
                            break;
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            });

            Ok(rx)
        })
    }
}
