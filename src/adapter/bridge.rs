//! Agent subprocess bridge: process ownership plus JSON-RPC multiplexing.
//!
//! The bridge owns one agent subprocess and splits its stdout into three
//! streams of traffic:
//!
//! - **responses** are matched to in-flight requests by id and delivered
//!   through 1-buffered channels;
//! - **notifications** are forwarded to the adapter's consumer channel;
//! - **server-initiated requests** (permission prompts) are forwarded to a
//!   second consumer channel and answered via [`AdapterBridge::respond`].
//!
//! stdin writes funnel through a single writer task so each JSON line is
//! atomic. If the subprocess dies, a shared `done` token fires and every
//! outstanding request fails with a peer-closed error.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use futures_util::StreamExt;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::acp::codec::JsonLineCodec;
use crate::acp::protocol::{self, Inbound, RpcError};
use crate::{AppError, Result};

/// Subprocess launch parameters for a bridge.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Agent executable.
    pub command: String,
    /// Arguments passed to the executable.
    pub args: Vec<String>,
    /// Working directory for the subprocess.
    pub cwd: String,
    /// Complete subprocess environment.
    pub env: std::collections::HashMap<String, String>,
}

/// A server-initiated request from the agent subprocess.
#[derive(Debug)]
pub struct BridgeRequest {
    /// Correlation id to echo via [`AdapterBridge::respond`].
    pub id: Value,
    /// Method name.
    pub method: String,
    /// Request parameters.
    pub params: Value,
}

/// Inbound consumer channels produced by [`AdapterBridge::spawn`].
#[derive(Debug)]
pub struct BridgeChannels {
    /// Agent notifications in arrival order.
    pub notifications: mpsc::Receiver<(String, Value)>,
    /// Server-initiated requests in arrival order.
    pub requests: mpsc::Receiver<BridgeRequest>,
}

/// Map of in-flight request ids to their response slots.
type PendingMap = Arc<Mutex<HashMap<i64, oneshot::Sender<std::result::Result<Value, RpcError>>>>>;

/// Handle to a live agent subprocess and its multiplexed channel.
#[derive(Clone, Debug)]
pub struct AdapterBridge {
    label: String,
    outbound: mpsc::Sender<Value>,
    pending: PendingMap,
    next_id: Arc<AtomicI64>,
    done: CancellationToken,
}

impl AdapterBridge {
    /// Spawn the agent subprocess and start the reader, writer, stderr, and
    /// exit-monitor tasks.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Spawn` if the subprocess cannot be started or its
    /// stdio handles cannot be captured.
    pub fn spawn(
        config: &BridgeConfig,
        cancel: &CancellationToken,
    ) -> Result<(Self, BridgeChannels)> {
        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args)
            .current_dir(&config.cwd)
            .env_clear()
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|err| {
            AppError::Spawn(format!("failed to spawn '{}': {err}", config.command))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AppError::Spawn("failed to capture bridge stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::Spawn("failed to capture bridge stdout".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| AppError::Spawn("failed to capture bridge stderr".into()))?;

        let label = config.command.clone();
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Value>(64);
        let (notif_tx, notif_rx) = mpsc::channel(256);
        let (request_tx, request_rx) = mpsc::channel(16);
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let done = CancellationToken::new();

        // stderr drain.
        {
            let label = label.clone();
            let cancel = cancel.child_token();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                loop {
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        line = lines.next_line() => match line {
                            Ok(Some(line)) => debug!(bridge = %label, stderr = %line, "bridge stderr"),
                            Ok(None) | Err(_) => break,
                        }
                    }
                }
            });
        }

        // Writer: one JSON line per frame, serialized through this task.
        {
            let label = label.clone();
            let cancel = cancel.child_token();
            let mut stdin = stdin;
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => break,
                        frame = outbound_rx.recv() => {
                            let Some(frame) = frame else { break };
                            let mut bytes = match serde_json::to_vec(&frame) {
                                Ok(bytes) => bytes,
                                Err(err) => {
                                    warn!(bridge = %label, %err, "bridge writer: serialization failed");
                                    continue;
                                }
                            };
                            bytes.push(b'\n');
                            if let Err(err) = stdin.write_all(&bytes).await {
                                warn!(bridge = %label, %err, "bridge writer: write failed, stopping");
                                break;
                            }
                        }
                    }
                }
            });
        }

        // Reader: classify each stdout line and route it.
        {
            let label = label.clone();
            let cancel = cancel.child_token();
            let done = done.clone();
            let pending = Arc::clone(&pending);
            tokio::spawn(async move {
                let mut framed = FramedRead::new(stdout, JsonLineCodec::new());
                loop {
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => break,
                        item = framed.next() => {
                            match item {
                                None => {
                                    debug!(bridge = %label, "bridge reader: EOF");
                                    break;
                                }
                                Some(Err(err)) => {
                                    // Malformed framing from the agent: log and keep reading.
                                    warn!(bridge = %label, %err, "bridge reader: framing error, skipping");
                                }
                                Some(Ok(line)) => {
                                    if line.trim().is_empty() {
                                        continue;
                                    }
                                    match protocol::parse_line(&line) {
                                        Err(err) => {
                                            warn!(bridge = %label, %err, raw_line = %line,
                                                  "bridge reader: unparseable frame, skipping");
                                        }
                                        Ok(Inbound::Response { id, outcome }) => {
                                            let Some(id) = id.as_i64() else {
                                                warn!(bridge = %label, ?id,
                                                      "bridge reader: non-numeric response id");
                                                continue;
                                            };
                                            if let Some(tx) = pending.lock().await.remove(&id) {
                                                let _ = tx.send(outcome);
                                            } else {
                                                warn!(bridge = %label, id,
                                                      "bridge reader: response for unknown id");
                                            }
                                        }
                                        Ok(Inbound::Notification { method, params }) => {
                                            if notif_tx.send((method, params)).await.is_err() {
                                                break;
                                            }
                                        }
                                        Ok(Inbound::Request { id, method, params }) => {
                                            let request = BridgeRequest { id, method, params };
                                            if request_tx.send(request).await.is_err() {
                                                break;
                                            }
                                        }
                                    }
                                }
                            }
                        }
                    }
                }
                // Subprocess gone: fail everything still waiting.
                pending.lock().await.clear();
                done.cancel();
            });
        }

        // Exit monitor: the child handle lives here so `kill_on_drop`
        // reaps the process when the monitor ends.
        {
            let label = label.clone();
            let cancel = cancel.child_token();
            let done = done.clone();
            tokio::spawn(async move {
                tokio::select! {
                    status = child.wait() => {
                        match status {
                            Ok(status) => debug!(bridge = %label, ?status, "bridge: agent exited"),
                            Err(err) => warn!(bridge = %label, %err, "bridge: wait failed"),
                        }
                        done.cancel();
                    }
                    () = cancel.cancelled() => {
                        // Drop kills the child via kill_on_drop.
                        debug!(bridge = %label, "bridge: cancellation received, releasing agent");
                    }
                }
            });
        }

        let bridge = Self {
            label,
            outbound: outbound_tx,
            pending,
            next_id: Arc::new(AtomicI64::new(1)),
            done,
        };
        let channels = BridgeChannels {
            notifications: notif_rx,
            requests: request_rx,
        };
        Ok((bridge, channels))
    }

    /// Issue a request to the agent and wait for the matching response.
    ///
    /// # Errors
    ///
    /// - `AppError::PeerClosed` if the agent dies before responding.
    /// - `AppError::Rpc` if the agent responds with a JSON-RPC error.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value> {
        if self.done.is_cancelled() {
            return Err(AppError::PeerClosed(format!(
                "agent '{}' already exited",
                self.label
            )));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let frame = protocol::request_frame(id, method, &params);
        if self.outbound.send(frame).await.is_err() {
            self.pending.lock().await.remove(&id);
            return Err(AppError::PeerClosed(format!(
                "agent '{}' closed before '{method}' was sent",
                self.label
            )));
        }

        let outcome = tokio::select! {
            biased;
            outcome = rx => outcome,
            // The agent died; nothing will ever resolve this request.
            () = self.done.cancelled() => {
                self.pending.lock().await.remove(&id);
                return Err(AppError::PeerClosed(format!(
                    "agent '{}' closed before response to '{method}'",
                    self.label
                )));
            }
        };

        match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(rpc)) => Err(AppError::Rpc(format!("'{method}' failed: {rpc}"))),
            Err(_) => Err(AppError::PeerClosed(format!(
                "agent '{}' closed before response to '{method}'",
                self.label
            ))),
        }
    }

    /// Send a fire-and-forget notification to the agent.
    ///
    /// # Errors
    ///
    /// Returns `AppError::PeerClosed` if the agent is gone.
    pub async fn notify(&self, method: &str, params: Value) -> Result<()> {
        let frame = protocol::notification_frame(method, &params);
        self.outbound.send(frame).await.map_err(|_| {
            AppError::PeerClosed(format!("agent '{}' closed, '{method}' dropped", self.label))
        })
    }

    /// Answer a server-initiated request from the agent.
    ///
    /// # Errors
    ///
    /// Returns `AppError::PeerClosed` if the agent is gone.
    pub async fn respond(
        &self,
        id: &Value,
        outcome: std::result::Result<Value, RpcError>,
    ) -> Result<()> {
        let frame = match outcome {
            Ok(result) => protocol::response_frame(id, &result),
            Err(error) => protocol::error_frame(id, &error),
        };
        self.outbound.send(frame).await.map_err(|_| {
            AppError::PeerClosed(format!("agent '{}' closed, response dropped", self.label))
        })
    }

    /// Token fired when the agent subprocess exits or its stdout closes.
    #[must_use]
    pub fn done(&self) -> CancellationToken {
        self.done.clone()
    }
}
