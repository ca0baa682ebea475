//! Worker session manager: launch, registry, prompt routing, teardown.
//!
//! Holds the only mutable map from session id to live runtime state. At most
//! one live session exists per id; stopping is idempotent; a live session
//! holds exactly one driver. Launches of `SessionResolver` agents in the
//! same working directory are serialized through a per-cwd mutex so
//! filesystem-based session-id discovery cannot interleave.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::acp::protocol::ContentBlock;
use crate::driver::handlers::{FileSystemHandler, TerminalHandler};
use crate::driver::session_driver::{self, DriverHandle, DriverState, LaunchRequest};
use crate::driver::{AgentRegistry, AgentSpec};
use crate::events::SessionPipeline;
use crate::models::event::SessionEventPayload;
use crate::models::permission::PermissionDecision;
use crate::models::session::{SessionStatus, SessionTransition, StopReason};
use crate::permissions::PermissionBroker;
use crate::persistence::message_repo::MessageRepo;
use crate::worker::environment::{self, AgentEnv};
use crate::worker::{NewSessionRequest, NewSessionResponse};
use crate::{AppError, Result};

/// Static settings for one worker instance.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Stable worker identifier.
    pub worker_id: String,
    /// Private URL agents use to reach this worker.
    pub worker_url: String,
    /// Shared secret injected into agent environments.
    pub worker_secret: String,
    /// Maximum concurrent live sessions.
    pub max_sessions: u32,
    /// Grace period before a stop escalates to a subprocess kill.
    pub stop_grace: Duration,
    /// Per-watcher live buffer capacity.
    pub watch_capacity: usize,
}

/// Registry slot for one session id.
enum SessionEntry {
    /// Launch in progress; reserves the id.
    Launching,
    /// Fully launched.
    Live(LiveSession),
}

/// Runtime state owned for the lifetime of a live session.
struct LiveSession {
    handle: DriverHandle,
    pipeline: Arc<SessionPipeline>,
    broker: Arc<PermissionBroker>,
    task: JoinHandle<()>,
}

/// Worker-side session lifecycle manager.
pub struct SessionManager {
    settings: WorkerSettings,
    agents: Arc<AgentRegistry>,
    messages: MessageRepo,
    registry: Mutex<HashMap<String, SessionEntry>>,
    cwd_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    transitions: broadcast::Sender<SessionTransition>,
    fs_handler: Option<Arc<dyn FileSystemHandler>>,
    terminal_handler: Option<Arc<dyn TerminalHandler>>,
}

impl SessionManager {
    /// Create a manager with no optional capability handlers.
    #[must_use]
    pub fn new(settings: WorkerSettings, agents: Arc<AgentRegistry>, messages: MessageRepo) -> Self {
        let (transitions, _) = broadcast::channel(256);
        Self {
            settings,
            agents,
            messages,
            registry: Mutex::new(HashMap::new()),
            cwd_locks: Mutex::new(HashMap::new()),
            transitions,
            fs_handler: None,
            terminal_handler: None,
        }
    }

    /// Install a file-system handler; drivers advertise the capability.
    #[must_use]
    pub fn with_fs_handler(mut self, handler: Arc<dyn FileSystemHandler>) -> Self {
        self.fs_handler = Some(handler);
        self
    }

    /// Install a terminal handler; drivers advertise the capability.
    #[must_use]
    pub fn with_terminal_handler(mut self, handler: Arc<dyn TerminalHandler>) -> Self {
        self.terminal_handler = Some(handler);
        self
    }

    /// This worker's identifier.
    #[must_use]
    pub fn worker_id(&self) -> &str {
        &self.settings.worker_id
    }

    /// Shared secret expected by the RPC surface.
    #[must_use]
    pub fn worker_secret(&self) -> &str {
        &self.settings.worker_secret
    }

    /// Subscribe to session transitions for the worker state stream.
    #[must_use]
    pub fn subscribe_transitions(&self) -> broadcast::Receiver<SessionTransition> {
        self.transitions.subscribe()
    }

    /// Number of registered (live or launching) sessions.
    pub async fn live_count(&self) -> usize {
        self.registry.lock().await.len()
    }

    /// Pipeline of a live session, for watch attachment.
    pub async fn pipeline(&self, session_id: &str) -> Option<Arc<SessionPipeline>> {
        match self.registry.lock().await.get(session_id) {
            Some(SessionEntry::Live(live)) => Some(Arc::clone(&live.pipeline)),
            _ => None,
        }
    }

    /// Snapshot of live sessions as state-stream transitions, used by the
    /// control plane to reconcile after a dropped subscription.
    pub async fn current_sessions(&self) -> Vec<SessionTransition> {
        self.registry
            .lock()
            .await
            .iter()
            .filter_map(|(session_id, entry)| match entry {
                SessionEntry::Launching => None,
                SessionEntry::Live(live) => Some(SessionTransition {
                    session_id: session_id.clone(),
                    status: map_state(live.handle.state()),
                    agent_session_id: Some(live.handle.agent_session_id().to_owned()),
                    error: None,
                }),
            })
            .collect()
    }

    /// Launch a session: reserve the id, compose the environment, start the
    /// driver, and register the runtime state.
    ///
    /// # Errors
    ///
    /// - `AppError::InvalidState` if the id is already live or the worker is
    ///   at its concurrency cap.
    /// - `AppError::NotFound` for unknown agent ids.
    /// - Any driver launch failure (spawn, handshake); the id is released.
    pub async fn launch(&self, request: NewSessionRequest) -> Result<NewSessionResponse> {
        let spec = self.agents.get(&request.options.agent)?;

        {
            let mut registry = self.registry.lock().await;
            if registry.contains_key(&request.session_id) {
                return Err(AppError::InvalidState(format!(
                    "session '{}' is already live",
                    request.session_id
                )));
            }
            if registry.len() >= usize::try_from(self.settings.max_sessions).unwrap_or(usize::MAX) {
                return Err(AppError::InvalidState(format!(
                    "concurrent session limit reached ({}/{})",
                    registry.len(),
                    self.settings.max_sessions
                )));
            }
            registry.insert(request.session_id.clone(), SessionEntry::Launching);
        }

        let launched = self.run_launch(&request, &spec).await;

        let (live, response) = match launched {
            Ok(result) => result,
            Err(err) => {
                self.registry.lock().await.remove(&request.session_id);
                warn!(session_id = %request.session_id, %err, "session launch failed");
                return Err(err);
            }
        };

        let mut registry = self.registry.lock().await;
        if !matches!(
            registry.get(&request.session_id),
            Some(SessionEntry::Launching)
        ) {
            // Stopped while launching — tear the driver straight down.
            live.handle.stop();
            return Err(AppError::Cancelled(format!(
                "session '{}' was stopped during launch",
                request.session_id
            )));
        }
        registry.insert(request.session_id.clone(), SessionEntry::Live(live));
        info!(session_id = %request.session_id, "session launched");
        Ok(response)
    }

    /// Forward a follow-up prompt to a live, idle session.
    ///
    /// # Errors
    ///
    /// - `AppError::NotFound` if the session is not live.
    /// - `AppError::InvalidState` if the session is not idle.
    pub async fn prompt(&self, session_id: &str, blocks: Vec<ContentBlock>) -> Result<StopReason> {
        let handle = self.live_handle(session_id).await?;
        handle.prompt(blocks).await
    }

    /// Interrupt the current turn. The session stays live.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the session is not live.
    pub async fn cancel(&self, session_id: &str) -> Result<()> {
        let handle = self.live_handle(session_id).await?;
        handle.cancel_turn().await
    }

    /// Stop a session: teardown with grace, drain permissions, release
    /// runtime state. Idempotent — stopping an unknown id is a no-op.
    ///
    /// # Errors
    ///
    /// Currently infallible; the signature leaves room for teardown
    /// reporting.
    pub async fn stop(&self, session_id: &str) -> Result<()> {
        let entry = self.registry.lock().await.remove(session_id);
        let Some(entry) = entry else {
            debug!(session_id, "stop on unknown session — no-op");
            return Ok(());
        };

        match entry {
            SessionEntry::Launching => {
                // The in-flight launch observes the missing reservation and
                // tears itself down.
                debug!(session_id, "stop during launch, reservation released");
                Ok(())
            }
            SessionEntry::Live(live) => {
                live.handle.stop();
                let deadline = self.settings.stop_grace * 2;
                if tokio::time::timeout(deadline, live.task).await.is_err() {
                    warn!(session_id, "driver task did not finish teardown in time");
                }
                info!(session_id, "session stopped");
                Ok(())
            }
        }
    }

    /// Deliver a client permission decision to the session's broker.
    ///
    /// # Errors
    ///
    /// - `AppError::NotFound` if the session or the request id is unknown.
    pub async fn respond_permission(
        &self,
        session_id: &str,
        request_id: &str,
        decision: PermissionDecision,
    ) -> Result<()> {
        let broker = match self.registry.lock().await.get(session_id) {
            Some(SessionEntry::Live(live)) => Arc::clone(&live.broker),
            _ => {
                return Err(AppError::NotFound(format!(
                    "session '{session_id}' is not live"
                )))
            }
        };
        broker.respond(request_id, decision).await
    }

    /// Map a sideband hook event from the agent process onto the session.
    ///
    /// `stop`-flavored hooks act as turn terminators (the in-band stream
    /// does not always carry one); everything else is recorded at debug.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the session is not live.
    pub async fn handle_hook(
        &self,
        session_id: &str,
        agent: &str,
        hook_name: &str,
        payload: Value,
    ) -> Result<()> {
        let pipeline = self
            .pipeline(session_id)
            .await
            .ok_or_else(|| AppError::NotFound(format!("session '{session_id}' is not live")))?;

        match hook_name {
            "stop" | "turn_completed" => {
                pipeline
                    .ingest(SessionEventPayload::StatusChange {
                        new_status: SessionStatus::Idle,
                    })
                    .await
            }
            other => {
                debug!(session_id, agent, hook = other, ?payload, "unhandled hook event");
                Ok(())
            }
        }
    }

    /// Clone the live driver handle for `session_id`.
    async fn live_handle(&self, session_id: &str) -> Result<DriverHandle> {
        match self.registry.lock().await.get(session_id) {
            Some(SessionEntry::Live(live)) => Ok(live.handle.clone()),
            Some(SessionEntry::Launching) => Err(AppError::InvalidState(format!(
                "session '{session_id}' is still launching"
            ))),
            None => Err(AppError::NotFound(format!(
                "session '{session_id}' is not live"
            ))),
        }
    }

    /// Compose the environment and run the driver launch, serializing per
    /// cwd for resolver agents.
    async fn run_launch(
        &self,
        request: &NewSessionRequest,
        spec: &Arc<AgentSpec>,
    ) -> Result<(LiveSession, NewSessionResponse)> {
        let env = environment::compose(
            &request.options.env_overrides,
            &AgentEnv {
                worker_url: &self.settings.worker_url,
                worker_secret: &self.settings.worker_secret,
                run_id: &request.session_id,
                agent: &request.options.agent,
            },
        );

        let resumed_from = self
            .messages
            .max_sequence(&request.session_id)
            .await?
            .unwrap_or(0);
        let pipeline = SessionPipeline::new(
            request.session_id.clone(),
            self.messages.clone(),
            resumed_from,
            self.settings.watch_capacity,
        );
        let broker = Arc::new(PermissionBroker::new(request.session_id.clone()));

        let launch_request = LaunchRequest {
            session_id: request.session_id.clone(),
            spec: Arc::clone(spec),
            options: request.options.clone(),
            env,
            stop_grace: self.settings.stop_grace,
        };

        let launched = if spec.capabilities.session_resolver {
            // Launch + session-id resolution must not interleave with
            // another launch in the same cwd.
            let lock = self.cwd_lock(&request.options.cwd).await;
            let _guard = lock.lock().await;
            session_driver::launch(
                launch_request,
                Arc::clone(&pipeline),
                Arc::clone(&broker),
                self.fs_handler.clone(),
                self.terminal_handler.clone(),
                self.transitions.clone(),
            )
            .await?
        } else {
            session_driver::launch(
                launch_request,
                Arc::clone(&pipeline),
                Arc::clone(&broker),
                self.fs_handler.clone(),
                self.terminal_handler.clone(),
                self.transitions.clone(),
            )
            .await?
        };

        let response = NewSessionResponse {
            agent_session_id: Some(launched.outcome.agent_session_id.clone()),
            available_models: launched.outcome.models.clone(),
            available_modes: launched.outcome.modes.clone(),
        };
        let live = LiveSession {
            handle: launched.handle,
            pipeline,
            broker,
            task: launched.task,
        };
        Ok((live, response))
    }

    /// Get or create the launch mutex for a working directory.
    async fn cwd_lock(&self, cwd: &str) -> Arc<Mutex<()>> {
        let mut locks = self.cwd_locks.lock().await;
        Arc::clone(
            locks
                .entry(cwd.to_owned())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }
}

/// Map driver state onto the session status reported upstream.
fn map_state(state: DriverState) -> SessionStatus {
    match state {
        DriverState::Starting | DriverState::Running => SessionStatus::Running,
        DriverState::Idle => SessionStatus::Idle,
        DriverState::Stopping | DriverState::Stopped => SessionStatus::Stopped,
        DriverState::Errored => SessionStatus::Errored,
    }
}
