//! Codex adapter: translates between ACP and the Codex app-server dialect.
//!
//! Presents the agent side of ACP to the session driver while driving a
//! Codex subprocess through an [`AdapterBridge`]. The dialect maps:
//!
//! | ACP                          | Codex                                  |
//! |------------------------------|----------------------------------------|
//! | `session/new`                | `thread/start`                         |
//! | `session/load`               | `thread/resume`                        |
//! | `session/prompt`             | `turn/start` … `turn/completed`        |
//! | `session/cancel`             | `turn/interrupt`                       |
//! | `session/update` (to driver) | `turn/*` delta notifications           |
//! | `session/request_permission` | `permission/request` (agent-initiated) |
//!
//! The `initialize` result is probed for model and command metadata across
//! the shapes Codex has shipped; extraction is best-effort and the adapter
//! keeps working when the metadata is absent.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock, Weak};

use serde_json::{json, Value};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::acp::connection::{BoxFuture, PeerHandler, RpcConnection};
use crate::acp::protocol::{
    methods, ContentBlock, InitializeResult, LoadSessionParams, ModeInfo, ModelInfo,
    NewSessionParams, NewSessionResult, PermissionRequestParams, PermissionRequestResult,
    PromptParams, PromptResult, RpcError, SessionModeState, SessionModelState,
    SessionNotification, SessionUpdate, ToolCallFields, INTERNAL_ERROR,
};
use crate::acp::PROTOCOL_VERSION;
use crate::adapter::bridge::{AdapterBridge, BridgeChannels, BridgeConfig, BridgeRequest};
use crate::adapter::{AdapterContext, AdapterIo, AgentAdapterFactory};
use crate::models::session::{McpServerEntry, StopReason};
use crate::Result;

/// Name of the companion MCP server injected for `agentctl`.
pub const COMPANION_SERVER_NAME: &str = "flowgentic";

/// One slash command advertised by the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailableCommand {
    /// Command name without the slash.
    pub name: String,
    /// Optional description.
    pub description: Option<String>,
}

// ── Factory ──────────────────────────────────────────────────────────────────

/// Builds one [`CodexAdapter`] per session launch.
pub struct CodexAdapterFactory {
    command: String,
    args: Vec<String>,
    force_mcp_injection: bool,
}

impl CodexAdapterFactory {
    /// Create a factory launching `command args…` as the Codex subprocess.
    #[must_use]
    pub fn new(command: String, args: Vec<String>, force_mcp_injection: bool) -> Self {
        Self {
            command,
            args,
            force_mcp_injection,
        }
    }
}

impl AgentAdapterFactory for CodexAdapterFactory {
    fn spawn(&self, io: AdapterIo, ctx: AdapterContext) -> JoinHandle<Result<()>> {
        let conn_cancel = ctx.cancel.child_token();
        let adapter = Arc::new(CodexAdapter {
            command: self.command.clone(),
            args: self.args.clone(),
            force_mcp_injection: self.force_mcp_injection,
            run_id: ctx.run_id,
            cwd: ctx.cwd,
            env: ctx.env,
            cancel: conn_cancel.clone(),
            me: OnceLock::new(),
            conn: OnceLock::new(),
            bridge: Mutex::new(None),
            thread_id: Mutex::new(None),
            turn_waiters: Mutex::new(HashMap::new()),
        });
        let _ = adapter.me.set(Arc::downgrade(&adapter));

        let label = format!("codex-adapter:{}", adapter.run_id);
        let conn = RpcConnection::spawn(
            label,
            io.reader,
            io.writer,
            Arc::clone(&adapter),
            &conn_cancel,
        );
        let _ = adapter.conn.set(conn);

        tokio::spawn(async move {
            conn_cancel.cancelled().await;
            debug!(run_id = %adapter.run_id, "codex adapter: shut down");
            Ok(())
        })
    }
}

// ── Adapter ──────────────────────────────────────────────────────────────────

/// Live adapter state for one session.
struct CodexAdapter {
    command: String,
    args: Vec<String>,
    force_mcp_injection: bool,
    run_id: String,
    cwd: String,
    env: HashMap<String, String>,
    cancel: CancellationToken,
    me: OnceLock<Weak<CodexAdapter>>,
    conn: OnceLock<RpcConnection>,
    bridge: Mutex<Option<AdapterBridge>>,
    thread_id: Mutex<Option<String>>,
    turn_waiters: Mutex<HashMap<String, oneshot::Sender<StopReason>>>,
}

impl CodexAdapter {
    /// The driver-facing connection. Set once in the factory before any
    /// frame can arrive.
    fn conn(&self) -> std::result::Result<&RpcConnection, RpcError> {
        self.conn
            .get()
            .ok_or_else(|| RpcError::new(INTERNAL_ERROR, "adapter connection not ready"))
    }

    /// The live bridge, if a thread has been started.
    async fn bridge(&self) -> std::result::Result<AdapterBridge, RpcError> {
        self.bridge
            .lock()
            .await
            .clone()
            .ok_or_else(|| RpcError::new(INTERNAL_ERROR, "no agent thread started"))
    }

    /// The adapter's own [`Arc`], set at construction.
    fn strong_self(&self) -> std::result::Result<Arc<Self>, RpcError> {
        self.me
            .get()
            .and_then(Weak::upgrade)
            .ok_or_else(|| RpcError::new(INTERNAL_ERROR, "adapter is shutting down"))
    }

    /// Serve `session/new` / `session/load`: spawn Codex, run its
    /// handshake, start (or resume) a thread.
    async fn start_thread(
        &self,
        cwd: String,
        mcp_servers: Vec<McpServerEntry>,
        meta: &HashMap<String, Value>,
        resume_thread_id: Option<String>,
    ) -> std::result::Result<Value, RpcError> {
        let system_prompt = meta.get("systemPrompt").and_then(Value::as_str);
        let model = meta.get("model").and_then(Value::as_str);
        let mode = meta.get("sessionMode").and_then(Value::as_str);

        let mut mcp_servers = mcp_servers;
        maybe_inject_companion_server(
            &mut mcp_servers,
            &self.env,
            Path::new(&self.cwd),
            system_prompt,
            self.force_mcp_injection,
        );

        let config = BridgeConfig {
            command: self.command.clone(),
            args: self.args.clone(),
            cwd,
            env: self.env.clone(),
        };
        let (bridge, channels) = AdapterBridge::spawn(&config, &self.cancel)
            .map_err(|e| RpcError::new(INTERNAL_ERROR, e.to_string()))?;

        // Codex handshake: initialize request, then initialized notification.
        let init = bridge
            .request(
                "initialize",
                json!({
                    "clientInfo": {
                        "name": "flowgentic",
                        "version": env!("CARGO_PKG_VERSION"),
                    }
                }),
            )
            .await
            .map_err(|e| RpcError::new(INTERNAL_ERROR, e.to_string()))?;
        bridge
            .notify("initialized", json!({}))
            .await
            .map_err(|e| RpcError::new(INTERNAL_ERROR, e.to_string()))?;

        let models = parse_models(&init);
        let modes = parse_modes(&init);
        let commands = parse_commands(&init);
        info!(
            run_id = %self.run_id,
            models = models.as_ref().map_or(0, |m| m.available.len()),
            commands = commands.len(),
            "codex adapter: handshake complete"
        );

        let thread = if let Some(thread_id) = resume_thread_id {
            bridge
                .request("thread/resume", json!({ "threadId": thread_id }))
                .await
        } else {
            bridge
                .request(
                    "thread/start",
                    json!({
                        "cwd": config.cwd,
                        "model": model,
                        "mode": mode,
                        "systemPrompt": system_prompt,
                        "mcpServers": mcp_servers,
                    }),
                )
                .await
        }
        .map_err(|e| RpcError::new(INTERNAL_ERROR, e.to_string()))?;

        let thread_id = thread
            .get("threadId")
            .or_else(|| thread.get("thread_id"))
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::new(INTERNAL_ERROR, "thread response missing threadId"))?
            .to_owned();

        *self.thread_id.lock().await = Some(thread_id.clone());
        *self.bridge.lock().await = Some(bridge.clone());

        // Consume agent traffic for the rest of the session.
        tokio::spawn(self.strong_self()?.consume_agent(channels));

        // Codex death closes the driver-facing connection, so the driver
        // observes peer termination even between turns.
        {
            let done = bridge.done();
            let conn_cancel = self.cancel.clone();
            tokio::spawn(async move {
                done.cancelled().await;
                conn_cancel.cancel();
            });
        }

        let result = NewSessionResult {
            session_id: thread_id,
            models,
            modes,
        };
        serde_json::to_value(result)
            .map_err(|e| RpcError::new(INTERNAL_ERROR, format!("serialize session result: {e}")))
    }

    /// Serve `session/prompt`: start a turn and wait for its completion.
    async fn handle_prompt(&self, params: Value) -> std::result::Result<Value, RpcError> {
        let params: PromptParams = serde_json::from_value(params)
            .map_err(|e| RpcError::invalid_params(format!("prompt params: {e}")))?;

        let thread_id = self
            .thread_id
            .lock()
            .await
            .clone()
            .ok_or_else(|| RpcError::new(INTERNAL_ERROR, "no agent thread started"))?;
        if params.session_id != thread_id {
            return Err(RpcError::invalid_params(format!(
                "unknown session '{}'",
                params.session_id
            )));
        }

        let bridge = self.bridge().await?;
        let (done_tx, done_rx) = oneshot::channel();
        self.turn_waiters
            .lock()
            .await
            .insert(thread_id.clone(), done_tx);

        let items: Vec<Value> = params
            .prompt
            .iter()
            .map(|block| json!({ "type": "text", "text": block.as_text() }))
            .collect();

        if let Err(err) = bridge
            .request("turn/start", json!({ "threadId": thread_id, "items": items }))
            .await
        {
            self.turn_waiters.lock().await.remove(&thread_id);
            return Err(RpcError::new(INTERNAL_ERROR, err.to_string()));
        }

        let done = bridge.done();
        let stop_reason = tokio::select! {
            outcome = done_rx => outcome.unwrap_or(StopReason::Cancelled),
            () = done.cancelled() => {
                self.turn_waiters.lock().await.remove(&thread_id);
                return Err(RpcError::new(INTERNAL_ERROR, "agent terminated during turn"));
            }
        };

        serde_json::to_value(PromptResult { stop_reason })
            .map_err(|e| RpcError::new(INTERNAL_ERROR, format!("serialize prompt result: {e}")))
    }

    /// Serve `session/cancel`: interrupt the in-flight turn.
    async fn handle_cancel(&self) {
        let thread_id = self.thread_id.lock().await.clone();
        let bridge = self.bridge.lock().await.clone();
        if let (Some(thread_id), Some(bridge)) = (thread_id, bridge) {
            if let Err(err) = bridge
                .notify("turn/interrupt", json!({ "threadId": thread_id }))
                .await
            {
                warn!(run_id = %self.run_id, %err, "codex adapter: interrupt failed");
            }
        }
    }

    /// Forward one translated update to the driver.
    async fn forward_update(&self, update: SessionUpdate) {
        let thread_id = self.thread_id.lock().await.clone().unwrap_or_default();
        let Ok(conn) = self.conn() else { return };
        let notification = SessionNotification {
            session_id: thread_id,
            update,
        };
        match serde_json::to_value(&notification) {
            Ok(params) => {
                if let Err(err) = conn.notify(methods::SESSION_UPDATE, params).await {
                    debug!(run_id = %self.run_id, %err, "codex adapter: update dropped");
                }
            }
            Err(err) => {
                warn!(run_id = %self.run_id, %err, "codex adapter: update serialization failed");
            }
        }
    }

    /// Consume Codex notifications and server-initiated requests until the
    /// subprocess exits.
    async fn consume_agent(self: Arc<Self>, mut channels: BridgeChannels) {
        loop {
            tokio::select! {
                notification = channels.notifications.recv() => {
                    let Some((method, params)) = notification else { break };
                    self.handle_agent_notification(&method, params).await;
                }
                request = channels.requests.recv() => {
                    let Some(request) = request else { break };
                    let adapter = Arc::clone(&self);
                    // Permission requests block on a client decision; each
                    // one gets its own task so the stream keeps draining.
                    tokio::spawn(async move {
                        adapter.handle_agent_request(request).await;
                    });
                }
            }
        }
        debug!(run_id = %self.run_id, "codex adapter: agent channels closed");
    }

    /// Translate one Codex notification into ACP traffic.
    async fn handle_agent_notification(&self, method: &str, params: Value) {
        match method {
            "turn/agent_message_delta" => {
                if let Some(text) = params.get("text").and_then(Value::as_str) {
                    self.forward_update(SessionUpdate::AgentMessageChunk {
                        content: ContentBlock::text(text),
                    })
                    .await;
                }
            }

            "turn/reasoning_delta" => {
                if let Some(text) = params.get("text").and_then(Value::as_str) {
                    self.forward_update(SessionUpdate::AgentThoughtChunk {
                        content: ContentBlock::text(text),
                    })
                    .await;
                }
            }

            "turn/tool_call" => {
                if let Some(fields) = map_tool_call(&params) {
                    self.forward_update(SessionUpdate::ToolCall { fields }).await;
                }
            }

            "turn/tool_call_update" => {
                if let Some(fields) = map_tool_call(&params) {
                    self.forward_update(SessionUpdate::ToolCallUpdate { fields })
                        .await;
                }
            }

            "thread/mode_changed" => {
                if let Some(mode_id) = params.get("modeId").and_then(Value::as_str) {
                    self.forward_update(SessionUpdate::CurrentModeUpdate {
                        current_mode_id: mode_id.to_owned(),
                    })
                    .await;
                }
            }

            "turn/completed" => {
                let thread_id = params
                    .get("threadId")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_owned();
                let stop_reason = params
                    .get("stopReason")
                    .and_then(Value::as_str)
                    .map_or(StopReason::EndTurn, parse_stop_reason);
                if let Some(waiter) = self.turn_waiters.lock().await.remove(&thread_id) {
                    let _ = waiter.send(stop_reason);
                } else {
                    debug!(
                        run_id = %self.run_id,
                        thread_id, "codex adapter: turn/completed with no waiter"
                    );
                }
            }

            other => {
                debug!(run_id = %self.run_id, method = other, "codex adapter: skipping notification");
            }
        }
    }

    /// Route one Codex server-initiated request.
    async fn handle_agent_request(&self, request: BridgeRequest) {
        let Ok(bridge) = self.bridge().await else {
            return;
        };

        if request.method != "permission/request" {
            let _ = bridge
                .respond(
                    &request.id,
                    Err(RpcError::method_not_found(&request.method)),
                )
                .await;
            return;
        }

        let tool_name = request
            .params
            .get("tool")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_owned();
        let raw_input = request.params.get("input").cloned();
        let callback_url = request
            .params
            .get("callbackUrl")
            .and_then(Value::as_str)
            .map(str::to_owned);
        let thread_id = self.thread_id.lock().await.clone().unwrap_or_default();

        let acp_params = PermissionRequestParams {
            session_id: thread_id,
            tool_name,
            raw_input,
            callback_url,
        };

        let decision = match self.request_client_decision(&acp_params).await {
            Ok(result) => result,
            Err(err) => {
                debug!(run_id = %self.run_id, %err, "codex adapter: permission fell back to deny");
                PermissionRequestResult {
                    outcome: "deny".to_owned(),
                    reason: Some("session cancelled".to_owned()),
                }
            }
        };

        let body = json!({
            "decision": if decision.outcome == "allow" { "accept" } else { "deny" },
            "reason": decision.reason,
        });
        if let Err(err) = bridge.respond(&request.id, Ok(body)).await {
            warn!(run_id = %self.run_id, %err, "codex adapter: permission response dropped");
        }
    }

    /// Carry a permission request to the driver and await the decision.
    async fn request_client_decision(
        &self,
        params: &PermissionRequestParams,
    ) -> Result<PermissionRequestResult> {
        let conn = self
            .conn()
            .map_err(|e| crate::AppError::Adapter(e.message))?;
        let value = serde_json::to_value(params)
            .map_err(|e| crate::AppError::Adapter(format!("serialize permission params: {e}")))?;
        let response = conn
            .request(methods::SESSION_REQUEST_PERMISSION, value)
            .await?;
        serde_json::from_value(response)
            .map_err(|e| crate::AppError::Adapter(format!("permission response shape: {e}")))
    }
}

impl PeerHandler for CodexAdapter {
    fn on_request(
        &self,
        method: String,
        params: Value,
    ) -> BoxFuture<'_, std::result::Result<Value, RpcError>> {
        Box::pin(async move {
            match method.as_str() {
                methods::INITIALIZE => {
                    let result = InitializeResult {
                        protocol_version: PROTOCOL_VERSION,
                        agent_info: Some(json!({ "name": "codex-adapter" })),
                    };
                    serde_json::to_value(result)
                        .map_err(|e| RpcError::new(INTERNAL_ERROR, e.to_string()))
                }

                methods::SESSION_NEW => {
                    let params: NewSessionParams = serde_json::from_value(params)
                        .map_err(|e| RpcError::invalid_params(format!("session params: {e}")))?;
                    self.start_thread(params.cwd, params.mcp_servers, &params.meta, None)
                        .await
                }

                methods::SESSION_LOAD => {
                    let params: LoadSessionParams = serde_json::from_value(params)
                        .map_err(|e| RpcError::invalid_params(format!("session params: {e}")))?;
                    self.start_thread(
                        params.cwd,
                        params.mcp_servers,
                        &params.meta,
                        Some(params.session_id),
                    )
                    .await
                }

                methods::SESSION_PROMPT => self.handle_prompt(params).await,

                methods::SESSION_SET_MODE => {
                    let bridge = self.bridge().await?;
                    bridge
                        .request("mode/set", params)
                        .await
                        .map_err(|e| RpcError::new(INTERNAL_ERROR, e.to_string()))
                }

                methods::SESSION_SET_MODEL => {
                    let bridge = self.bridge().await?;
                    bridge
                        .request("model/set", params)
                        .await
                        .map_err(|e| RpcError::new(INTERNAL_ERROR, e.to_string()))
                }

                other => Err(RpcError::method_not_found(other)),
            }
        })
    }

    fn on_notification(&self, method: String, _params: Value) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if method == methods::SESSION_CANCEL {
                self.handle_cancel().await;
            } else {
                debug!(run_id = %self.run_id, method, "codex adapter: skipping notification");
            }
        })
    }
}

// ── Handshake shape probing ──────────────────────────────────────────────────

/// Extract a model enumeration from an `initialize` result, trying the
/// documented shapes in order and keeping the first viable result.
#[must_use]
pub fn parse_models(init: &Value) -> Option<SessionModelState> {
    // Shape 1: { "models": { "available": [...], "current": "..." } }
    if let Some(models) = init.get("models") {
        if let Some(available) = models.get("available").and_then(Value::as_array) {
            return Some(SessionModelState {
                available: available.iter().filter_map(model_info).collect(),
                current: models
                    .get("current")
                    .and_then(Value::as_str)
                    .map(str::to_owned),
            });
        }
        // Shape 3: { "models": [...] }
        if let Some(available) = models.as_array() {
            return Some(SessionModelState {
                available: available.iter().filter_map(model_info).collect(),
                current: None,
            });
        }
    }

    // Shape 2: { "availableModels": [...], "currentModel": "..." }
    if let Some(available) = init.get("availableModels").and_then(Value::as_array) {
        return Some(SessionModelState {
            available: available.iter().filter_map(model_info).collect(),
            current: init
                .get("currentModel")
                .and_then(Value::as_str)
                .map(str::to_owned),
        });
    }

    None
}

/// Extract a mode enumeration from an `initialize` result, best-effort.
#[must_use]
pub fn parse_modes(init: &Value) -> Option<SessionModeState> {
    let modes = init.get("modes")?;
    let available = modes.get("available").and_then(Value::as_array)?;
    Some(SessionModeState {
        available: available
            .iter()
            .filter_map(|v| {
                let mode_id = v
                    .as_str()
                    .map(str::to_owned)
                    .or_else(|| value_str(v, &["modeId", "id"]))?;
                Some(ModeInfo {
                    mode_id,
                    name: value_str(v, &["name"]),
                })
            })
            .collect(),
        current: modes
            .get("current")
            .and_then(Value::as_str)
            .map(str::to_owned),
    })
}

/// Extract the advertised command list, checking the documented key names
/// and deduplicating by name in arrival order.
#[must_use]
pub fn parse_commands(init: &Value) -> Vec<AvailableCommand> {
    let mut seen = HashSet::new();
    let mut commands = Vec::new();

    for key in ["commands", "availableCommands", "slash_commands"] {
        let Some(entries) = init.get(key).and_then(Value::as_array) else {
            continue;
        };
        for entry in entries {
            let name = entry
                .as_str()
                .map(str::to_owned)
                .or_else(|| value_str(entry, &["name"]));
            let Some(name) = name else { continue };
            if !seen.insert(name.clone()) {
                continue;
            }
            commands.push(AvailableCommand {
                name,
                description: value_str(entry, &["description"]),
            });
        }
    }

    commands
}

/// Build a [`ModelInfo`] from a string or object entry.
fn model_info(value: &Value) -> Option<ModelInfo> {
    if let Some(id) = value.as_str() {
        return Some(ModelInfo {
            model_id: id.to_owned(),
            name: None,
        });
    }
    let model_id = value_str(value, &["modelId", "id", "model"])?;
    Some(ModelInfo {
        model_id,
        name: value_str(value, &["name", "displayName"]),
    })
}

/// First string value among `keys` in an object.
fn value_str(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| value.get(key).and_then(Value::as_str))
        .map(str::to_owned)
}

/// Map a Codex stop-reason string onto the ACP enum.
fn parse_stop_reason(reason: &str) -> StopReason {
    match reason {
        "interrupted" | "cancelled" => StopReason::Cancelled,
        "max_tokens" => StopReason::MaxTokens,
        "refusal" => StopReason::Refusal,
        _ => StopReason::EndTurn,
    }
}

/// Map a Codex tool-call payload onto ACP tool-call fields.
fn map_tool_call(params: &Value) -> Option<ToolCallFields> {
    let call = params.get("toolCall")?;
    let tool_call_id = value_str(call, &["id", "toolCallId"])?;
    Some(ToolCallFields {
        tool_call_id,
        title: value_str(call, &["title"]),
        kind: value_str(call, &["kind"]),
        status: value_str(call, &["status"]),
        raw_input: call.get("input").cloned(),
        raw_output: call.get("output").cloned(),
        content: value_str(call, &["contentText", "content"]),
        locations: call
            .get("locations")
            .and_then(|v| serde_json::from_value(v.clone()).ok()),
    })
}

// ── MCP companion injection ──────────────────────────────────────────────────

/// Append the `flowgentic` stdio MCP entry when the environment carries
/// worker identity and the session opts in (system prompt mention or an
/// explicit flag).
pub fn maybe_inject_companion_server(
    servers: &mut Vec<McpServerEntry>,
    env: &HashMap<String, String>,
    cwd: &Path,
    system_prompt: Option<&str>,
    force: bool,
) {
    let Some(_url) = env.get("AGENTCTL_WORKER_URL") else {
        return;
    };
    if env.get("AGENTCTL_AGENT_RUN_ID").is_none() {
        return;
    }

    let mentioned = system_prompt.is_some_and(|sp| sp.contains(COMPANION_SERVER_NAME));
    if !(force || mentioned) {
        return;
    }
    if servers.iter().any(|s| s.name == COMPANION_SERVER_NAME) {
        return;
    }

    let Some(binary) = resolve_agentctl(env, cwd) else {
        warn!("agentctl binary not found; companion MCP server not injected");
        return;
    };

    let entry_env: HashMap<String, String> = env
        .iter()
        .filter(|(key, _)| key.starts_with("AGENTCTL_"))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    servers.push(McpServerEntry {
        name: COMPANION_SERVER_NAME.to_owned(),
        command: binary.display().to_string(),
        args: Vec::new(),
        env: entry_env,
    });
}

/// Locate the `agentctl` binary: explicit env override, then
/// `$CWD/bin/agentctl`, then alongside the current executable, then `PATH`.
#[must_use]
pub fn resolve_agentctl(env: &HashMap<String, String>, cwd: &Path) -> Option<PathBuf> {
    if let Some(explicit) = env.get("AGENTCTL_BIN") {
        let path = PathBuf::from(explicit);
        if path.is_file() {
            return Some(path);
        }
    }

    let local = cwd.join("bin").join("agentctl");
    if local.is_file() {
        return Some(local);
    }

    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            let sibling = dir.join("agentctl");
            if sibling.is_file() {
                return Some(sibling);
            }
        }
    }

    let path_var = env
        .get("PATH")
        .cloned()
        .or_else(|| std::env::var("PATH").ok())?;
    for dir in std::env::split_paths(&path_var) {
        let candidate = dir.join("agentctl");
        if candidate.is_file() {
            return Some(candidate);
        }
    }

    None
}
