//! Role-agnostic JSON-RPC connection over a pair of byte streams.
//!
//! [`RpcConnection`] multiplexes outbound requests (matched to responses by
//! an atomic id counter), inbound notifications, and peer-initiated requests
//! over any `AsyncRead`/`AsyncWrite` pair — a subprocess's stdio or one side
//! of an in-process duplex pipe. Outbound frames funnel through a single
//! writer task so each JSON line is written atomically; inbound frames are
//! classified by [`crate::acp::protocol::parse_line`] and dispatched to a
//! [`PeerHandler`].
//!
//! Notifications are handled inline on the read loop, preserving the order
//! the peer produced them. Peer-initiated requests may block (permission
//! prompts do), so each one runs on its own task and its response is queued
//! through the writer when the handler returns.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use futures_util::StreamExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::acp::codec::JsonLineCodec;
use crate::acp::protocol::{self, Inbound, RpcError};
use crate::{AppError, Result};

/// Boxed future alias used by [`PeerHandler`].
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Callbacks invoked for inbound traffic that is not a response.
///
/// Implementations are shared across tasks behind an [`Arc`]; request
/// handlers may suspend for as long as the underlying operation needs
/// (permission requests wait for a client decision).
pub trait PeerHandler: Send + Sync + 'static {
    /// Handle a peer-initiated request; the returned value (or error) is
    /// written back as the JSON-RPC response.
    fn on_request(
        &self,
        method: String,
        params: Value,
    ) -> BoxFuture<'_, std::result::Result<Value, RpcError>>;

    /// Handle a notification. Called inline on the read loop — relative
    /// order across notifications is preserved.
    fn on_notification(&self, method: String, params: Value) -> BoxFuture<'_, ()>;
}

/// Map of in-flight request ids to their response slots.
type PendingMap = Arc<Mutex<HashMap<i64, oneshot::Sender<std::result::Result<Value, RpcError>>>>>;

/// A live JSON-RPC connection to one peer.
///
/// Cheap to clone; all clones share the writer channel, the pending-request
/// table, and the closed signal.
#[derive(Clone)]
pub struct RpcConnection {
    outbound: mpsc::Sender<Value>,
    pending: PendingMap,
    next_id: Arc<AtomicI64>,
    closed: CancellationToken,
}

impl RpcConnection {
    /// Start the reader and writer tasks over `reader`/`writer` and return
    /// the connection handle.
    ///
    /// `cancel` stops both tasks; the connection also closes when the peer
    /// reaches EOF or an unrecoverable stream error occurs. Either way,
    /// every in-flight request fails with [`AppError::PeerClosed`].
    pub fn spawn<R, W, H>(
        peer_label: String,
        reader: R,
        writer: W,
        handler: Arc<H>,
        cancel: &CancellationToken,
    ) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
        H: PeerHandler,
    {
        let (outbound_tx, outbound_rx) = mpsc::channel::<Value>(64);
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let closed = CancellationToken::new();

        let conn = Self {
            outbound: outbound_tx.clone(),
            pending: Arc::clone(&pending),
            next_id: Arc::new(AtomicI64::new(1)),
            closed: closed.clone(),
        };

        tokio::spawn(run_writer(
            peer_label.clone(),
            writer,
            outbound_rx,
            cancel.child_token(),
        ));
        tokio::spawn(run_reader(
            peer_label,
            reader,
            handler,
            outbound_tx,
            pending,
            cancel.child_token(),
            closed,
        ));

        conn
    }

    /// Issue a request and wait for the matching response.
    ///
    /// # Errors
    ///
    /// - [`AppError::PeerClosed`] if the connection closes before a response
    ///   arrives.
    /// - [`AppError::Rpc`] if the peer responds with a JSON-RPC error.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let frame = protocol::request_frame(id, method, &params);
        if self.outbound.send(frame).await.is_err() {
            self.pending.lock().await.remove(&id);
            return Err(AppError::PeerClosed(format!(
                "connection closed before '{method}' was sent"
            )));
        }

        let outcome = tokio::select! {
            biased;
            outcome = rx => outcome,
            // The read loop is gone; no response can ever arrive, even if
            // the registration raced the pending-table drain.
            () = self.closed.cancelled() => {
                self.pending.lock().await.remove(&id);
                return Err(AppError::PeerClosed(format!(
                    "connection closed before response to '{method}'"
                )));
            }
        };

        match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(rpc)) => Err(AppError::Rpc(format!("'{method}' failed: {rpc}"))),
            Err(_) => Err(AppError::PeerClosed(format!(
                "connection closed before response to '{method}'"
            ))),
        }
    }

    /// Issue a request with typed parameters and a typed result.
    ///
    /// # Errors
    ///
    /// As for [`RpcConnection::request`], plus [`AppError::Acp`] if the
    /// response does not match `T`.
    pub async fn request_typed<P, T>(&self, method: &str, params: &P) -> Result<T>
    where
        P: Serialize + Sync,
        T: DeserializeOwned,
    {
        let params = serde_json::to_value(params)
            .map_err(|e| AppError::Acp(format!("failed to serialize '{method}' params: {e}")))?;
        let value = self.request(method, params).await?;
        serde_json::from_value(value)
            .map_err(|e| AppError::Acp(format!("unexpected '{method}' response shape: {e}")))
    }

    /// Send a fire-and-forget notification.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::PeerClosed`] if the connection is gone.
    pub async fn notify(&self, method: &str, params: Value) -> Result<()> {
        let frame = protocol::notification_frame(method, &params);
        self.outbound
            .send(frame)
            .await
            .map_err(|_| AppError::PeerClosed(format!("connection closed, '{method}' dropped")))
    }

    /// Token fired when the read loop exits (peer EOF, stream error, or
    /// cancellation).
    #[must_use]
    pub fn closed(&self) -> CancellationToken {
        self.closed.clone()
    }
}

// ── Writer task ──────────────────────────────────────────────────────────────

/// Serialize outbound frames and write them as NDJSON lines.
///
/// Exits when the channel closes or `cancel` fires. A failed write closes
/// the channel so subsequent sends surface [`AppError::PeerClosed`].
async fn run_writer<W>(
    peer_label: String,
    mut writer: W,
    mut outbound_rx: mpsc::Receiver<Value>,
    cancel: CancellationToken,
) where
    W: AsyncWrite + Unpin + Send,
{
    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(peer = %peer_label, "rpc writer: cancellation received, stopping");
                break;
            }

            frame = outbound_rx.recv() => {
                let Some(frame) = frame else {
                    debug!(peer = %peer_label, "rpc writer: channel closed, stopping");
                    break;
                };

                let mut bytes = match serde_json::to_vec(&frame) {
                    Ok(bytes) => bytes,
                    Err(err) => {
                        warn!(peer = %peer_label, %err, "rpc writer: frame serialization failed, dropping");
                        continue;
                    }
                };
                bytes.push(b'\n');

                if let Err(err) = writer.write_all(&bytes).await {
                    warn!(peer = %peer_label, %err, "rpc writer: write failed, stopping");
                    break;
                }
                if let Err(err) = writer.flush().await {
                    warn!(peer = %peer_label, %err, "rpc writer: flush failed, stopping");
                    break;
                }
            }
        }
    }
}

// ── Reader task ──────────────────────────────────────────────────────────────

/// Read, classify, and dispatch inbound frames until EOF or cancellation.
#[allow(clippy::too_many_lines)] // One match arm per JSON-RPC shape.
async fn run_reader<R, H>(
    peer_label: String,
    reader: R,
    handler: Arc<H>,
    outbound_tx: mpsc::Sender<Value>,
    pending: PendingMap,
    cancel: CancellationToken,
    closed: CancellationToken,
) where
    R: AsyncRead + Unpin + Send,
    H: PeerHandler,
{
    let mut framed = FramedRead::new(reader, JsonLineCodec::new());

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(peer = %peer_label, "rpc reader: cancellation received, stopping");
                break;
            }

            item = framed.next() => {
                match item {
                    None => {
                        debug!(peer = %peer_label, "rpc reader: EOF");
                        break;
                    }

                    Some(Err(AppError::Acp(ref msg))) => {
                        // Codec-level error (line too long) — skip the frame.
                        warn!(peer = %peer_label, error = msg.as_str(),
                              "rpc reader: framing error, skipping");
                    }

                    Some(Err(err)) => {
                        warn!(peer = %peer_label, %err, "rpc reader: stream error, stopping");
                        break;
                    }

                    Some(Ok(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        match protocol::parse_line(&line) {
                            Err(err) => {
                                warn!(peer = %peer_label, %err, raw_line = %line,
                                      "rpc reader: unparseable frame, skipping");
                            }

                            Ok(Inbound::Response { id, outcome }) => {
                                deliver_response(&peer_label, &pending, &id, outcome).await;
                            }

                            Ok(Inbound::Notification { method, params }) => {
                                handler.on_notification(method, params).await;
                            }

                            Ok(Inbound::Request { id, method, params }) => {
                                let handler = Arc::clone(&handler);
                                let outbound = outbound_tx.clone();
                                tokio::spawn(async move {
                                    let frame = match handler.on_request(method, params).await {
                                        Ok(result) => protocol::response_frame(&id, &result),
                                        Err(error) => protocol::error_frame(&id, &error),
                                    };
                                    let _ = outbound.send(frame).await;
                                });
                            }
                        }
                    }
                }
            }
        }
    }

    // The read loop is gone: no response can ever arrive. Fail everything
    // in flight and signal closure.
    pending.lock().await.clear();
    closed.cancel();
}

/// Route a response into the pending table.
async fn deliver_response(
    peer_label: &str,
    pending: &PendingMap,
    id: &Value,
    outcome: std::result::Result<Value, RpcError>,
) {
    let Some(id) = id.as_i64() else {
        warn!(peer = %peer_label, ?id, "rpc reader: response with non-numeric id, dropping");
        return;
    };

    let slot = pending.lock().await.remove(&id);
    match slot {
        Some(tx) => {
            let _ = tx.send(outcome);
        }
        None => {
            warn!(peer = %peer_label, id, "rpc reader: response for unknown request id, dropping");
        }
    }
}
