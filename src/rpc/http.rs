//! Thin axum JSON surface over the worker session manager.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::acp::protocol::ContentBlock;
use crate::models::permission::PermissionDecision;
use crate::worker::manager::SessionManager;
use crate::worker::NewSessionRequest;
use crate::AppError;

/// Shared state for the worker RPC router.
pub struct WorkerRpcState {
    /// The session manager all routes operate on.
    pub manager: Arc<SessionManager>,
}

/// JSON error body with a status derived from the error kind.
struct ApiError(AppError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::InvalidState(_) => StatusCode::CONFLICT,
            AppError::Unsupported(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Config(_) => StatusCode::BAD_REQUEST,
            AppError::Cancelled(_) => StatusCode::GONE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        Self(err)
    }
}

/// Build the worker RPC router.
#[must_use]
pub fn router(state: Arc<WorkerRpcState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/sessions", post(new_session))
        .route("/v1/sessions/{id}/prompt", post(prompt_session))
        .route("/v1/sessions/{id}/cancel", post(cancel_session))
        .route("/v1/sessions/{id}/stop", post(stop_session))
        .route(
            "/v1/sessions/{id}/permissions/{request_id}",
            post(respond_permission),
        )
        .route("/v1/sessions/{id}/hooks", post(report_hook))
        .with_state(state)
}

/// Check the bearer secret on an authenticated route.
fn authorize(state: &WorkerRpcState, headers: &HeaderMap) -> Result<(), ApiError> {
    let expected = format!("Bearer {}", state.manager.worker_secret());
    let supplied = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    if supplied == Some(expected.as_str()) {
        Ok(())
    } else {
        Err(ApiError(AppError::Config(
            "missing or invalid worker secret".into(),
        )))
    }
}

async fn healthz() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn new_session(
    State(state): State<Arc<WorkerRpcState>>,
    headers: HeaderMap,
    Json(request): Json<NewSessionRequest>,
) -> Result<Json<Value>, ApiError> {
    authorize(&state, &headers)?;
    let response = state.manager.launch(request).await?;
    Ok(Json(serde_json::to_value(response).map_err(|e| {
        ApiError(AppError::Rpc(format!("serialize response: {e}")))
    })?))
}

/// Body for `PromptSession`.
#[derive(Debug, Deserialize)]
struct PromptBody {
    blocks: Vec<ContentBlock>,
}

async fn prompt_session(
    State(state): State<Arc<WorkerRpcState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<PromptBody>,
) -> Result<Json<Value>, ApiError> {
    authorize(&state, &headers)?;
    let stop_reason = state.manager.prompt(&id, body.blocks).await?;
    Ok(Json(json!({ "stop_reason": stop_reason })))
}

async fn cancel_session(
    State(state): State<Arc<WorkerRpcState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    authorize(&state, &headers)?;
    state.manager.cancel(&id).await?;
    Ok(Json(json!({})))
}

async fn stop_session(
    State(state): State<Arc<WorkerRpcState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    authorize(&state, &headers)?;
    state.manager.stop(&id).await?;
    Ok(Json(json!({})))
}

/// Body for `RespondToPermission`.
#[derive(Debug, Deserialize)]
struct PermissionBody {
    allow: bool,
    #[serde(default)]
    reason: Option<String>,
}

async fn respond_permission(
    State(state): State<Arc<WorkerRpcState>>,
    Path((id, request_id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(body): Json<PermissionBody>,
) -> Result<Json<Value>, ApiError> {
    authorize(&state, &headers)?;
    state
        .manager
        .respond_permission(
            &id,
            &request_id,
            PermissionDecision {
                allow: body.allow,
                reason: body.reason,
            },
        )
        .await?;
    Ok(Json(json!({})))
}

/// Body for `ReportHook`.
#[derive(Debug, Deserialize)]
struct HookBody {
    agent: String,
    hook_name: String,
    #[serde(default)]
    payload: Value,
}

async fn report_hook(
    State(state): State<Arc<WorkerRpcState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<HookBody>,
) -> Result<Json<Value>, ApiError> {
    authorize(&state, &headers)?;
    state
        .manager
        .handle_hook(&id, &body.agent, &body.hook_name, body.payload)
        .await?;
    Ok(Json(json!({})))
}
