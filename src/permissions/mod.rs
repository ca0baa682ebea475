//! Permission broker: carries go/no-go decisions between agent and client.
//!
//! Each peer-initiated permission request gets a fresh UUID, an entry in the
//! pending table, and a `permission_request` event upward. The client's
//! decision is routed back by that id — through an in-process channel for
//! interactive agents, or as an HTTP POST for agents that take decisions
//! over a callback URL. When the owning session terminates, every pending
//! entry is resolved with a deny; nothing is ever implicitly accepted.

use std::collections::HashMap;

use chrono::Utc;
use serde_json::json;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::permission::{PermissionDecision, PermissionRequest};
use crate::{AppError, Result};

/// How a decision reaches the waiting agent.
enum Responder {
    /// In-stream: the agent blocks on the JSON-RPC response.
    Channel(oneshot::Sender<PermissionDecision>),
    /// Out-of-band: the decision is POSTed to the agent's callback URL.
    Http {
        /// Decision endpoint supplied by the agent.
        callback_url: String,
    },
}

/// One pending permission request.
struct Pending {
    request: PermissionRequest,
    responder: Responder,
}

/// Per-session permission broker.
pub struct PermissionBroker {
    session_id: String,
    pending: Mutex<HashMap<String, Pending>>,
    http: reqwest::Client,
}

impl PermissionBroker {
    /// Create a broker for `session_id`.
    #[must_use]
    pub fn new(session_id: String) -> Self {
        Self {
            session_id,
            pending: Mutex::new(HashMap::new()),
            http: reqwest::Client::new(),
        }
    }

    /// Open an interactive permission request.
    ///
    /// Returns the request record (for the `permission_request` event) and
    /// the receiver the caller blocks on. The receiver errors if the session
    /// terminates first — callers treat that as a deny.
    pub async fn open(
        &self,
        tool_name: &str,
        raw_input: Option<serde_json::Value>,
    ) -> (PermissionRequest, oneshot::Receiver<PermissionDecision>) {
        let request = self.make_request(tool_name, raw_input);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(
            request.request_id.clone(),
            Pending {
                request: request.clone(),
                responder: Responder::Channel(tx),
            },
        );
        debug!(
            session_id = %self.session_id,
            request_id = %request.request_id,
            tool_name, "permission request opened"
        );
        (request, rx)
    }

    /// Open an HTTP-channel permission request; the decision will be POSTed
    /// to `callback_url` instead of delivered in-stream.
    pub async fn open_http(
        &self,
        tool_name: &str,
        raw_input: Option<serde_json::Value>,
        callback_url: String,
    ) -> PermissionRequest {
        let request = self.make_request(tool_name, raw_input);
        self.pending.lock().await.insert(
            request.request_id.clone(),
            Pending {
                request: request.clone(),
                responder: Responder::Http { callback_url },
            },
        );
        debug!(
            session_id = %self.session_id,
            request_id = %request.request_id,
            tool_name, "http permission request opened"
        );
        request
    }

    /// Deliver a client decision for `request_id`.
    ///
    /// # Errors
    ///
    /// - `AppError::NotFound` if the id is unknown (already resolved, or
    ///   never existed).
    /// - `AppError::Rpc` if the HTTP decision POST fails.
    pub async fn respond(&self, request_id: &str, decision: PermissionDecision) -> Result<()> {
        let entry = self.pending.lock().await.remove(request_id);
        let Some(entry) = entry else {
            return Err(AppError::NotFound(format!(
                "no pending permission request '{request_id}'"
            )));
        };

        match entry.responder {
            Responder::Channel(tx) => {
                if tx.send(decision).is_err() {
                    // The agent stopped waiting; the decision is moot.
                    debug!(
                        session_id = %self.session_id,
                        request_id, "permission decision arrived after the agent gave up"
                    );
                }
                Ok(())
            }
            Responder::Http { callback_url } => {
                self.post_decision(&callback_url, request_id, &decision)
                    .await
            }
        }
    }

    /// Resolve every pending request with a deny carrying `reason`.
    ///
    /// Called on session teardown. HTTP-channel requests get a best-effort
    /// deny POST; in-process waiters see their channel close (interpreted
    /// as a deny by the caller).
    pub async fn drain(&self, reason: &str) {
        let drained: Vec<Pending> = self.pending.lock().await.drain().map(|(_, p)| p).collect();
        if drained.is_empty() {
            return;
        }
        debug!(
            session_id = %self.session_id,
            count = drained.len(),
            "draining pending permission requests"
        );

        for entry in drained {
            match entry.responder {
                Responder::Channel(tx) => {
                    let _ = tx.send(PermissionDecision::deny(reason));
                }
                Responder::Http { callback_url } => {
                    let decision = PermissionDecision::deny(reason);
                    if let Err(err) = self
                        .post_decision(&callback_url, &entry.request.request_id, &decision)
                        .await
                    {
                        warn!(
                            session_id = %self.session_id,
                            request_id = %entry.request.request_id,
                            %err, "failed to deliver teardown deny"
                        );
                    }
                }
            }
        }
    }

    /// Number of unresolved requests.
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Build a request record with a fresh UUID.
    fn make_request(
        &self,
        tool_name: &str,
        raw_input: Option<serde_json::Value>,
    ) -> PermissionRequest {
        PermissionRequest {
            request_id: Uuid::new_v4().to_string(),
            session_id: self.session_id.clone(),
            tool_name: tool_name.to_owned(),
            raw_input,
            created_at: Utc::now(),
        }
    }

    /// POST one decision to an agent's callback URL.
    async fn post_decision(
        &self,
        callback_url: &str,
        request_id: &str,
        decision: &PermissionDecision,
    ) -> Result<()> {
        let body = json!({
            "requestId": request_id,
            "allow": decision.allow,
            "reason": decision.reason,
        });
        let response = self
            .http
            .post(callback_url)
            .json(&body)
            .send()
            .await
            .map_err(|err| AppError::Rpc(format!("permission decision POST failed: {err}")))?;

        if !response.status().is_success() {
            return Err(AppError::Rpc(format!(
                "permission decision POST returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}
