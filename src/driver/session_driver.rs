//! Generic ACP session driver.
//!
//! Drives the standardized protocol against one peer: `initialize`, then
//! `session/new` (or `session/load` when resuming), then a prompt loop. The
//! peer is either an ACP-speaking subprocess or an in-process adapter built
//! by a factory — chosen by the agent's [`LaunchMode`], transparent to
//! callers.
//!
//! State machine:
//!
//! ```text
//! Starting → Running ⇄ Idle → Stopping → Stopped
//!                  ↘ Errored
//! ```
//!
//! Handshake failures are fatal (`Errored`). Prompt failures are reported to
//! the caller but leave the session alive; only peer death, context
//! cancellation, or an explicit stop terminates it.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::acp::connection::{BoxFuture, PeerHandler, RpcConnection};
use crate::acp::protocol::{
    methods, CancelParams, ClientCapabilities, ClientInfo, FsCapabilities, InitializeParams,
    InitializeResult, LoadSessionParams, NewSessionParams, NewSessionResult, PermissionRequestParams,
    PermissionRequestResult, PromptParams, PromptResult, ReadTextFileParams, RpcError,
    SessionModeState, SessionModelState, SessionNotification, WriteTextFileParams,
};
use crate::acp::{PROTOCOL_VERSION, SYSTEM_PROMPT_SEPARATOR};
use crate::adapter::{AdapterContext, AdapterIo};
use crate::driver::handlers::{FileSystemHandler, TerminalHandler};
use crate::driver::{AgentSpec, LaunchMode, PermissionChannel};
use crate::events::normalizer::normalize_update;
use crate::events::SessionPipeline;
use crate::models::event::SessionEventPayload;
use crate::models::session::{SessionStatus, SessionTransition, StopReason};
use crate::permissions::PermissionBroker;
use crate::{AppError, Result};

use crate::acp::protocol::ContentBlock;

/// Buffer size for each in-process pipe between driver and adapter.
const DUPLEX_BUFFER: usize = 256 * 1024;

/// Driver lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    /// Handshake in progress.
    Starting,
    /// A turn is in flight.
    Running,
    /// Waiting for the next prompt.
    Idle,
    /// Teardown in progress.
    Stopping,
    /// Torn down after an explicit stop.
    Stopped,
    /// Torn down after a peer or transport failure.
    Errored,
}

/// Everything the driver needs to launch one session.
pub struct LaunchRequest {
    /// Flowgentic session id.
    pub session_id: String,
    /// Agent integration to launch.
    pub spec: Arc<AgentSpec>,
    /// Session options captured at creation time.
    pub options: crate::models::session::SessionOptions,
    /// Fully composed subprocess environment.
    pub env: HashMap<String, String>,
    /// Grace period before a stop escalates to a kill.
    pub stop_grace: Duration,
}

/// What the handshake produced.
#[derive(Debug, Clone)]
pub struct LaunchOutcome {
    /// Agent-side session id.
    pub agent_session_id: String,
    /// Model enumeration reported by the peer.
    pub models: Option<SessionModelState>,
    /// Mode enumeration reported by the peer.
    pub modes: Option<SessionModeState>,
}

/// A launched driver: the caller-facing handle, the handshake outcome, and
/// the join handle of the driver task.
pub struct LaunchedDriver {
    /// Caller-facing handle.
    pub handle: DriverHandle,
    /// Handshake outcome.
    pub outcome: LaunchOutcome,
    /// Driver task; completes after teardown.
    pub task: JoinHandle<()>,
}

/// One queued follow-up prompt.
struct PromptJob {
    blocks: Vec<ContentBlock>,
    reply: oneshot::Sender<Result<StopReason>>,
}

/// Why the driver's idle loop woke up.
enum Wakeup {
    /// Explicit stop requested.
    Stop,
    /// The peer connection closed.
    PeerClosed,
    /// A follow-up prompt (or handle drop when `None`).
    Prompt(Option<PromptJob>),
}

/// Caller-facing handle to a live driver.
///
/// Prompts are linearized through a single-consumer channel: two concurrent
/// prompt calls are processed one after the other, never merged.
#[derive(Clone)]
pub struct DriverHandle {
    session_id: String,
    agent_session_id: String,
    conn: RpcConnection,
    prompt_tx: mpsc::Sender<PromptJob>,
    cancel: CancellationToken,
    state_rx: watch::Receiver<DriverState>,
}

impl DriverHandle {
    /// Current driver state.
    #[must_use]
    pub fn state(&self) -> DriverState {
        *self.state_rx.borrow()
    }

    /// Agent-side session id discovered at launch.
    #[must_use]
    pub fn agent_session_id(&self) -> &str {
        &self.agent_session_id
    }

    /// Queue a follow-up prompt and wait for the turn to finish.
    ///
    /// # Errors
    ///
    /// - `AppError::InvalidState` if the driver is not idle.
    /// - `AppError::PeerClosed` / `AppError::Rpc` if the turn fails.
    pub async fn prompt(&self, blocks: Vec<ContentBlock>) -> Result<StopReason> {
        // The driver task leaves `Starting` right after launch returns; a
        // racing first prompt waits that transition out instead of failing.
        let mut state_rx = self.state_rx.clone();
        while *state_rx.borrow() == DriverState::Starting {
            if state_rx.changed().await.is_err() {
                return Err(AppError::InvalidState("driver is shutting down".into()));
            }
        }

        let state = *state_rx.borrow();
        if state != DriverState::Idle {
            return Err(AppError::InvalidState(format!(
                "session '{}' is not idle (state {state:?})",
                self.session_id
            )));
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        let job = PromptJob {
            blocks,
            reply: reply_tx,
        };
        self.prompt_tx
            .send(job)
            .await
            .map_err(|_| AppError::InvalidState("driver is shutting down".into()))?;

        reply_rx
            .await
            .map_err(|_| AppError::Cancelled("session stopped during turn".into()))?
    }

    /// Interrupt the current turn without terminating the session.
    ///
    /// The peer acknowledges by completing the in-flight prompt with a
    /// `cancelled` stop reason.
    ///
    /// # Errors
    ///
    /// Returns `AppError::PeerClosed` if the peer is already gone.
    pub async fn cancel_turn(&self) -> Result<()> {
        let params = serde_json::to_value(CancelParams {
            session_id: self.agent_session_id.clone(),
        })
        .map_err(|e| AppError::Acp(format!("failed to serialize cancel params: {e}")))?;
        self.conn.notify(methods::SESSION_CANCEL, params).await
    }

    /// Begin teardown. Idempotent; the driver task completes after the
    /// grace period (escalating to a kill for subprocess peers).
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

// ── Peer handler ─────────────────────────────────────────────────────────────

/// Routes inbound peer traffic: session updates into the pipeline,
/// permission requests through the broker, capability callbacks to the
/// optional handlers.
struct DriverPeerHandler {
    session_id: String,
    pipeline: Arc<SessionPipeline>,
    broker: Arc<PermissionBroker>,
    permissions: PermissionChannel,
    fs: Option<Arc<dyn FileSystemHandler>>,
    terminal: Option<Arc<dyn TerminalHandler>>,
}

impl DriverPeerHandler {
    async fn ingest(&self, payload: SessionEventPayload) {
        if let Err(err) = self.pipeline.ingest(payload).await {
            warn!(session_id = %self.session_id, %err, "driver: failed to ingest session event");
        }
    }

    /// Serve `session/request_permission` according to the agent's
    /// permission channel.
    async fn handle_permission(
        &self,
        params: Value,
    ) -> std::result::Result<Value, RpcError> {
        let params: PermissionRequestParams = serde_json::from_value(params)
            .map_err(|e| RpcError::invalid_params(format!("permission params: {e}")))?;

        match self.permissions {
            PermissionChannel::Unsupported => {
                // Fail closed: agents without an interactive channel never
                // get an implicit allow.
                Err(RpcError::unsupported("interactive permissions"))
            }

            PermissionChannel::Http => {
                let Some(callback_url) = params.callback_url else {
                    return Err(RpcError::invalid_params(
                        "http permission channel requires callbackUrl",
                    ));
                };
                let request = self
                    .broker
                    .open_http(&params.tool_name, params.raw_input.clone(), callback_url)
                    .await;
                self.ingest(SessionEventPayload::PermissionRequest {
                    request_id: request.request_id,
                    tool_name: request.tool_name,
                    raw_input: request.raw_input,
                })
                .await;
                Ok(json!({ "acknowledged": true }))
            }

            PermissionChannel::Interactive => {
                let (request, decision_rx) = self
                    .broker
                    .open(&params.tool_name, params.raw_input.clone())
                    .await;
                self.ingest(SessionEventPayload::PermissionRequest {
                    request_id: request.request_id.clone(),
                    tool_name: request.tool_name.clone(),
                    raw_input: request.raw_input.clone(),
                })
                .await;

                let result = match decision_rx.await {
                    Ok(decision) => PermissionRequestResult {
                        outcome: if decision.allow { "allow" } else { "deny" }.to_owned(),
                        reason: decision.reason,
                    },
                    // Broker drained — the session is going away.
                    Err(_) => PermissionRequestResult {
                        outcome: "deny".to_owned(),
                        reason: Some("session cancelled".to_owned()),
                    },
                };
                serde_json::to_value(result).map_err(|e| {
                    RpcError::new(
                        crate::acp::protocol::INTERNAL_ERROR,
                        format!("failed to serialize permission outcome: {e}"),
                    )
                })
            }
        }
    }
}

impl PeerHandler for DriverPeerHandler {
    fn on_request(
        &self,
        method: String,
        params: Value,
    ) -> BoxFuture<'_, std::result::Result<Value, RpcError>> {
        Box::pin(async move {
            match method.as_str() {
                methods::SESSION_REQUEST_PERMISSION => self.handle_permission(params).await,

                methods::FS_READ_TEXT_FILE => match &self.fs {
                    None => Err(RpcError::unsupported("fs/read_text_file")),
                    Some(fs) => {
                        let params: ReadTextFileParams = serde_json::from_value(params)
                            .map_err(|e| RpcError::invalid_params(format!("fs params: {e}")))?;
                        fs.read_text_file(params)
                            .await
                            .map(|content| json!({ "content": content }))
                            .map_err(|e| {
                                RpcError::new(crate::acp::protocol::INTERNAL_ERROR, e.to_string())
                            })
                    }
                },

                methods::FS_WRITE_TEXT_FILE => match &self.fs {
                    None => Err(RpcError::unsupported("fs/write_text_file")),
                    Some(fs) => {
                        let params: WriteTextFileParams = serde_json::from_value(params)
                            .map_err(|e| RpcError::invalid_params(format!("fs params: {e}")))?;
                        fs.write_text_file(params)
                            .await
                            .map(|()| json!({}))
                            .map_err(|e| {
                                RpcError::new(crate::acp::protocol::INTERNAL_ERROR, e.to_string())
                            })
                    }
                },

                m if m.starts_with("terminal/") => match &self.terminal {
                    None => Err(RpcError::unsupported(m)),
                    Some(terminal) => terminal.call(method, params).await,
                },

                other => Err(RpcError::method_not_found(other)),
            }
        })
    }

    fn on_notification(&self, method: String, params: Value) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if method == methods::SESSION_UPDATE {
                match serde_json::from_value::<SessionNotification>(params) {
                    Ok(notification) => {
                        if let Some(payload) = normalize_update(notification.update) {
                            self.ingest(payload).await;
                        }
                    }
                    Err(err) => {
                        warn!(
                            session_id = %self.session_id, %err,
                            "driver: malformed session/update, skipping"
                        );
                    }
                }
            } else {
                debug!(
                    session_id = %self.session_id,
                    method, "driver: skipping unknown notification"
                );
            }
        })
    }
}

// ── Launch ───────────────────────────────────────────────────────────────────

/// Launch a session driver: build the peer, run the handshake and the
/// optional initial prompt, and hand back a live handle.
///
/// # Errors
///
/// - `AppError::Spawn` if the subprocess cannot be started.
/// - `AppError::Acp` / `AppError::Rpc` / `AppError::PeerClosed` if the
///   handshake fails — the session never becomes live.
pub async fn launch(
    request: LaunchRequest,
    pipeline: Arc<SessionPipeline>,
    broker: Arc<PermissionBroker>,
    fs: Option<Arc<dyn FileSystemHandler>>,
    terminal: Option<Arc<dyn TerminalHandler>>,
    transitions: broadcast::Sender<SessionTransition>,
) -> Result<LaunchedDriver> {
    let cancel = CancellationToken::new();
    let session_id = request.session_id.clone();
    let opts = request.options.clone();

    let advertise_fs = fs.is_some();
    let advertise_terminal = terminal.is_some();

    let handler = Arc::new(DriverPeerHandler {
        session_id: session_id.clone(),
        pipeline: Arc::clone(&pipeline),
        broker: Arc::clone(&broker),
        permissions: request.spec.capabilities.permissions,
        fs,
        terminal,
    });

    let is_subprocess = matches!(request.spec.launch, LaunchMode::Subprocess { .. });
    let (conn, child) = connect_peer(&request, handler, &cancel)?;

    // A handshake failure is fatal: release the peer (subprocess dies via
    // kill_on_drop, adapter tasks via the token) and surface the error.
    let session = match run_handshake(&conn, &opts, is_subprocess, advertise_fs, advertise_terminal)
        .await
    {
        Ok(session) => session,
        Err(err) => {
            cancel.cancel();
            return Err(err);
        }
    };

    info!(
        session_id,
        agent_session_id = %session.session_id,
        agent = %request.spec.agent_id,
        "driver: session established"
    );

    // For peers that do not consume meta, the system prompt rides in front
    // of the first user prompt.
    let initial_prompt = opts.prompt.clone().map(|prompt| {
        match (&opts.system_prompt, is_subprocess) {
            (Some(system), true) => format!("{system}{SYSTEM_PROMPT_SEPARATOR}{prompt}"),
            _ => prompt,
        }
    });

    let (state_tx, state_rx) = watch::channel(DriverState::Starting);
    let (prompt_tx, prompt_rx) = mpsc::channel::<PromptJob>(8);

    let handle = DriverHandle {
        session_id: session_id.clone(),
        agent_session_id: session.session_id.clone(),
        conn: conn.clone(),
        prompt_tx,
        cancel: cancel.clone(),
        state_rx,
    };

    let outcome = LaunchOutcome {
        agent_session_id: session.session_id.clone(),
        models: session.models,
        modes: session.modes,
    };

    let task_ctx = DriverTask {
        session_id,
        agent_session_id: session.session_id,
        conn,
        child,
        cancel,
        pipeline,
        broker,
        transitions,
        state_tx,
        stop_grace: request.stop_grace,
    };
    let task = tokio::spawn(task_ctx.run(prompt_rx, initial_prompt));

    Ok(LaunchedDriver {
        handle,
        outcome,
        task,
    })
}

/// Run `initialize` and `session/new` / `session/load` against the peer.
async fn run_handshake(
    conn: &RpcConnection,
    opts: &crate::models::session::SessionOptions,
    is_subprocess: bool,
    advertise_fs: bool,
    advertise_terminal: bool,
) -> Result<NewSessionResult> {
    let init_params = InitializeParams {
        protocol_version: PROTOCOL_VERSION,
        client_info: ClientInfo {
            name: "flowgentic-worker".to_owned(),
            version: env!("CARGO_PKG_VERSION").to_owned(),
        },
        client_capabilities: ClientCapabilities {
            fs: FsCapabilities {
                read_text_file: advertise_fs,
                write_text_file: advertise_fs,
            },
            terminal: advertise_terminal,
        },
    };
    let init: InitializeResult = conn
        .request_typed(methods::INITIALIZE, &init_params)
        .await?;
    debug!(peer_protocol = init.protocol_version, "driver: initialized");

    let meta = build_meta(opts, is_subprocess);
    if let Some(resume) = &opts.resume_session_id {
        conn.request_typed(
            methods::SESSION_LOAD,
            &LoadSessionParams {
                session_id: resume.clone(),
                cwd: opts.cwd.clone(),
                mcp_servers: opts.mcp_servers.clone(),
                meta,
            },
        )
        .await
    } else {
        conn.request_typed(
            methods::SESSION_NEW,
            &NewSessionParams {
                cwd: opts.cwd.clone(),
                mcp_servers: opts.mcp_servers.clone(),
                meta,
            },
        )
        .await
    }
}

/// Build the schemaless meta map for `session/new` / `session/load`.
fn build_meta(
    opts: &crate::models::session::SessionOptions,
    is_subprocess: bool,
) -> HashMap<String, Value> {
    let mut meta = HashMap::new();
    if let Some(model) = &opts.model {
        meta.insert("model".to_owned(), json!(model));
    }
    if let Some(mode) = &opts.mode {
        meta.insert("sessionMode".to_owned(), json!(mode));
    }
    // Subprocess peers get the system prompt folded into the first user
    // prompt instead; in-process peers consume meta directly.
    if !is_subprocess {
        if let Some(system) = &opts.system_prompt {
            meta.insert("systemPrompt".to_owned(), json!(system));
        }
    }
    meta
}

/// Build the byte-stream connection to the peer.
fn connect_peer(
    request: &LaunchRequest,
    handler: Arc<DriverPeerHandler>,
    cancel: &CancellationToken,
) -> Result<(RpcConnection, Option<Child>)> {
    let label = format!("{}:{}", request.spec.agent_id, request.session_id);

    match &request.spec.launch {
        LaunchMode::Subprocess { command, args } => {
            let mut cmd = Command::new(command);
            cmd.args(args)
                .current_dir(&request.options.cwd)
                .env_clear()
                .envs(&request.env)
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true);

            let mut child = cmd
                .spawn()
                .map_err(|err| AppError::Spawn(format!("failed to spawn '{command}': {err}")))?;

            let stdin = child
                .stdin
                .take()
                .ok_or_else(|| AppError::Spawn("failed to capture agent stdin".into()))?;
            let stdout = child
                .stdout
                .take()
                .ok_or_else(|| AppError::Spawn("failed to capture agent stdout".into()))?;
            let stderr = child
                .stderr
                .take()
                .ok_or_else(|| AppError::Spawn("failed to capture agent stderr".into()))?;

            tokio::spawn(drain_stderr(label.clone(), stderr, cancel.child_token()));

            let conn = RpcConnection::spawn(label, stdout, stdin, handler, cancel);
            Ok((conn, Some(child)))
        }

        LaunchMode::InProcess(factory) => {
            // Two unidirectional pipes, so the same driver code reads and
            // writes exactly as it would against a subprocess.
            let (driver_writer, adapter_reader) = tokio::io::duplex(DUPLEX_BUFFER);
            let (adapter_writer, driver_reader) = tokio::io::duplex(DUPLEX_BUFFER);

            let io = AdapterIo {
                reader: adapter_reader,
                writer: adapter_writer,
            };
            let ctx = AdapterContext {
                run_id: request.session_id.clone(),
                cwd: request.options.cwd.clone(),
                env: request.env.clone(),
                cancel: cancel.child_token(),
            };
            factory.spawn(io, ctx);

            let conn = RpcConnection::spawn(label, driver_reader, driver_writer, handler, cancel);
            Ok((conn, None))
        }
    }
}

/// Log subprocess stderr lines at debug level until EOF or cancellation.
async fn drain_stderr<R>(label: String, stderr: R, cancel: CancellationToken)
where
    R: tokio::io::AsyncRead + Unpin + Send,
{
    let mut lines = BufReader::new(stderr).lines();
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            line = lines.next_line() => match line {
                Ok(Some(line)) => debug!(peer = %label, stderr = %line, "agent stderr"),
                Ok(None) | Err(_) => break,
            }
        }
    }
}

// ── Driver task ──────────────────────────────────────────────────────────────

/// State owned by the driver task for the lifetime of the session.
struct DriverTask {
    session_id: String,
    agent_session_id: String,
    conn: RpcConnection,
    child: Option<Child>,
    cancel: CancellationToken,
    pipeline: Arc<SessionPipeline>,
    broker: Arc<PermissionBroker>,
    transitions: broadcast::Sender<SessionTransition>,
    state_tx: watch::Sender<DriverState>,
    stop_grace: Duration,
}

impl DriverTask {
    /// Idle loop: initial prompt, then follow-up prompts until stop, peer
    /// death, or handle drop.
    async fn run(mut self, mut prompt_rx: mpsc::Receiver<PromptJob>, initial_prompt: Option<String>) {
        let closed = self.conn.closed();

        if let Some(text) = initial_prompt {
            self.enter(DriverState::Running, SessionStatus::Running).await;
            match self.run_turn(vec![ContentBlock::text(text)]).await {
                Ok(stop) => {
                    debug!(session_id = %self.session_id, ?stop, "driver: initial turn complete");
                }
                Err(AppError::PeerClosed(msg)) => {
                    self.finish_errored(&msg).await;
                    return;
                }
                Err(err) => {
                    // Prompt errors are reported but do not end the session.
                    warn!(session_id = %self.session_id, %err, "driver: initial prompt failed");
                }
            }
            if self.cancel.is_cancelled() {
                self.finish_stopped().await;
                return;
            }
        }
        self.enter(DriverState::Idle, SessionStatus::Idle).await;

        loop {
            // Decide first, act after: the select futures borrow `self`,
            // while the teardown paths consume it.
            let next = tokio::select! {
                biased;
                () = self.cancel.cancelled() => Wakeup::Stop,
                () = closed.cancelled() => Wakeup::PeerClosed,
                job = prompt_rx.recv() => Wakeup::Prompt(job),
            };

            match next {
                Wakeup::Stop => {
                    self.finish_stopped().await;
                    return;
                }

                Wakeup::PeerClosed => {
                    self.finish_errored("peer terminated unexpectedly").await;
                    return;
                }

                // Every handle is gone — treat as a stop.
                Wakeup::Prompt(None) => {
                    self.finish_stopped().await;
                    return;
                }

                Wakeup::Prompt(Some(job)) => {
                    self.enter(DriverState::Running, SessionStatus::Running).await;
                    let outcome = self.run_turn(job.blocks).await;
                    let fatal = matches!(outcome, Err(AppError::PeerClosed(_)));
                    let _ = job.reply.send(outcome);

                    if fatal {
                        self.finish_errored("peer terminated during turn").await;
                        return;
                    }
                    if self.cancel.is_cancelled() {
                        self.finish_stopped().await;
                        return;
                    }
                    self.enter(DriverState::Idle, SessionStatus::Idle).await;
                }
            }
        }
    }

    /// Run one `session/prompt` turn to completion.
    async fn run_turn(&self, blocks: Vec<ContentBlock>) -> Result<StopReason> {
        let params = PromptParams {
            session_id: self.agent_session_id.clone(),
            prompt: blocks,
        };

        tokio::select! {
            result = self.conn.request_typed::<_, PromptResult>(methods::SESSION_PROMPT, &params) => {
                result.map(|r| r.stop_reason)
            }
            () = self.cancel.cancelled() => {
                // Stop during a turn: ask the peer to interrupt, then let
                // teardown take over.
                let cancel_params = json!({ "sessionId": self.agent_session_id });
                let _ = self.conn.notify(methods::SESSION_CANCEL, cancel_params).await;
                Err(AppError::Cancelled("session stopped during turn".into()))
            }
        }
    }

    /// Record a state change and emit it to watchers and the state stream.
    async fn enter(&mut self, state: DriverState, status: SessionStatus) {
        let _ = self.state_tx.send(state);
        let _ = self.transitions.send(SessionTransition {
            session_id: self.session_id.clone(),
            status,
            agent_session_id: Some(self.agent_session_id.clone()),
            error: None,
        });
        if let Err(err) = self
            .pipeline
            .ingest(SessionEventPayload::StatusChange { new_status: status })
            .await
        {
            warn!(session_id = %self.session_id, %err, "driver: failed to emit status change");
        }
    }

    /// Orderly teardown after an explicit stop.
    async fn finish_stopped(mut self) {
        let _ = self.state_tx.send(DriverState::Stopping);
        self.cancel.cancel();
        self.teardown_peer().await;
        self.broker.drain("session cancelled").await;
        self.enter(DriverState::Stopped, SessionStatus::Stopped).await;
        self.pipeline.close().await;
        info!(session_id = %self.session_id, "driver: stopped");
    }

    /// Teardown after a peer failure: fail everything pending, surface the
    /// reason.
    async fn finish_errored(mut self, reason: &str) {
        self.cancel.cancel();
        self.teardown_peer().await;
        self.broker.drain("session cancelled").await;

        let _ = self.state_tx.send(DriverState::Errored);
        let _ = self.transitions.send(SessionTransition {
            session_id: self.session_id.clone(),
            status: SessionStatus::Errored,
            agent_session_id: Some(self.agent_session_id.clone()),
            error: Some(reason.to_owned()),
        });
        if let Err(err) = self
            .pipeline
            .ingest(SessionEventPayload::StatusChange {
                new_status: SessionStatus::Errored,
            })
            .await
        {
            warn!(session_id = %self.session_id, %err, "driver: failed to emit errored status");
        }
        self.pipeline.close().await;
        warn!(session_id = %self.session_id, reason, "driver: errored");
    }

    /// Wait for the subprocess to exit within the grace period, then kill.
    /// In-process peers stop via the cancellation token instead.
    async fn teardown_peer(&mut self) {
        let Some(child) = self.child.as_mut() else {
            return;
        };

        match tokio::time::timeout(self.stop_grace, child.wait()).await {
            Ok(Ok(exit)) => {
                debug!(session_id = %self.session_id, ?exit, "driver: agent process exited");
            }
            Ok(Err(err)) => {
                warn!(session_id = %self.session_id, %err, "driver: error waiting for agent process");
            }
            Err(_elapsed) => {
                warn!(
                    session_id = %self.session_id,
                    "driver: agent process did not exit within grace period, killing"
                );
                if let Err(err) = child.kill().await {
                    warn!(session_id = %self.session_id, %err, "driver: failed to kill agent process");
                }
            }
        }
    }
}
