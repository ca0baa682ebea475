#![forbid(unsafe_code)]

//! `flowgentic-worker` — session runtime binary.
//!
//! Runs the control-plane dispatcher with an embedded co-located worker:
//! loads configuration, connects the database, registers the configured
//! agent integrations, and serves the worker RPC surface until interrupted.

use std::future::IntoFuture;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use flowgentic::config::GlobalConfig;
use flowgentic::dispatch::{state_sync, Dispatcher, EmbeddedWorker, WorkerPool};
use flowgentic::models::worker::WorkerInfo;
use flowgentic::persistence::db;
use flowgentic::persistence::message_repo::MessageRepo;
use flowgentic::persistence::session_repo::SessionRepo;
use flowgentic::rpc::http::{self, WorkerRpcState};
use flowgentic::worker::manager::{SessionManager, WorkerSettings};
use flowgentic::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "flowgentic-worker", about = "Flowgentic session worker", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    /// Override the RPC listen address from the config file.
    #[arg(long)]
    listen_addr: Option<String>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format);
    info!("flowgentic-worker bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = GlobalConfig::load_from_path(&args.config)?;
    if let Some(listen_addr) = args.listen_addr {
        config.listen_addr = listen_addr;
    }
    config.load_secret()?;
    info!(worker_id = %config.worker_id, "configuration loaded");

    // ── Initialize database ─────────────────────────────
    let database = Arc::new(db::connect(&config.db_path).await?);
    let sessions = SessionRepo::new(Arc::clone(&database));
    let messages = MessageRepo::new(Arc::clone(&database));
    info!("database connected");

    // ── Worker runtime ──────────────────────────────────
    let agents = Arc::new(config.build_agent_registry());
    let agent_ids = agents.agent_ids();
    let manager = Arc::new(SessionManager::new(
        WorkerSettings {
            worker_id: config.worker_id.clone(),
            worker_url: config.worker_url.clone(),
            worker_secret: config.worker_secret.clone(),
            max_sessions: config.max_concurrent_sessions,
            stop_grace: config.stop_grace(),
            watch_capacity: config.watch.buffer_capacity,
        },
        agents,
        messages,
    ));
    info!(agents = ?agent_ids, "session manager ready");

    // ── Control plane with the embedded worker ──────────
    let pool = Arc::new(WorkerPool::new());
    let embedded = EmbeddedWorker::new(
        WorkerInfo {
            id: config.worker_id.clone(),
            url: config.worker_url.clone(),
            agents: agent_ids,
            max_sessions: config.max_concurrent_sessions,
        },
        Arc::clone(&manager),
    );
    pool.register(embedded.clone()).await;

    let shutdown = CancellationToken::new();
    let (dispatcher, _dispatch) = Dispatcher::new(
        sessions.clone(),
        Arc::clone(&pool),
        config.dispatch_config(),
    );
    let dispatcher_task = tokio::spawn(dispatcher.run(shutdown.clone()));
    let sync_task = state_sync::spawn_state_sync(
        sessions,
        Arc::clone(&pool),
        embedded,
        shutdown.clone(),
    );
    info!("dispatcher and state sync started");

    // ── RPC surface ─────────────────────────────────────
    let state = Arc::new(WorkerRpcState { manager });
    let app = http::router(state);
    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .map_err(|err| AppError::Config(format!("failed to bind {}: {err}", config.listen_addr)))?;
    info!(listen_addr = %config.listen_addr, "worker RPC listening");

    let serve_shutdown = shutdown.clone();
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async move { serve_shutdown.cancelled().await })
        .into_future();

    tokio::select! {
        result = server => {
            result.map_err(|err| AppError::Rpc(format!("server error: {err}")))?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, shutting down");
        }
    }

    shutdown.cancel();
    let _ = dispatcher_task.await;
    let _ = sync_task.await;
    info!("flowgentic-worker stopped");
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,flowgentic=debug"));
    match format {
        LogFormat::Text => fmt().with_env_filter(filter).init(),
        LogFormat::Json => fmt().json().with_env_filter(filter).init(),
    }
}
