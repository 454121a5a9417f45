//! Build dashboard HTTP API.
//!
//! JSON endpoints for starting, watching and cancelling builds, plus the
//! worker views. User errors map to 400, unknown builds to 404.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::domain::errors::BuildError;
use crate::domain::models::{BuildId, BuildRecord, BuildRequest, ServerConfig};
use crate::services::{BuildService, WorkerStatus, WorkerSummary};

/// Configuration for the build HTTP server.
#[derive(Debug, Clone)]
pub struct BuildHttpConfig {
    pub host: String,
    pub port: u16,
    pub enable_cors: bool,
}

impl Default for BuildHttpConfig {
    fn default() -> Self {
        Self::from(&ServerConfig::default())
    }
}

impl From<&ServerConfig> for BuildHttpConfig {
    fn from(config: &ServerConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            enable_cors: config.enable_cors,
        }
    }
}

/// Body of `POST /api/build/start`.
#[derive(Debug, Default, Deserialize)]
pub struct StartBuildRequest {
    #[serde(default)]
    pub config: BuildRequest,
}

#[derive(Debug, Deserialize)]
pub struct LogsParams {
    #[serde(default = "default_log_lines")]
    pub lines: usize,
}

fn default_log_lines() -> usize {
    100
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    #[serde(default = "default_history_limit")]
    pub limit: usize,
}

fn default_history_limit() -> usize {
    20
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ActiveBuildResponse {
    pub has_active_build: bool,
    pub active_build: Option<BuildRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LogsResponse {
    pub build_id: String,
    pub logs: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub history: Vec<BuildRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct KillResponse {
    pub success: bool,
    pub message: String,
}

/// Body of `POST /api/build/workers/{worker_id}`.
#[derive(Debug, Deserialize)]
pub struct WorkerUpdateRequest {
    pub job_name: String,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WorkerUpdateResponse {
    pub success: bool,
    pub worker_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HandleStalledResponse {
    pub success: bool,
    pub stalled_workers: Vec<String>,
    pub handled_count: usize,
}

/// Error response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, code: &str, error: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
            code: code.to_string(),
        }),
    )
}

fn from_build_error(err: &BuildError, code: &str) -> ApiError {
    let status = match err {
        BuildError::NotFound(_) => StatusCode::NOT_FOUND,
        e if e.is_user_error() => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    api_error(status, code, err.to_string())
}

fn parse_build_id(raw: &str) -> Result<BuildId, ApiError> {
    raw.parse()
        .map_err(|_| api_error(StatusCode::NOT_FOUND, "NOT_FOUND", format!("Build {raw} not found")))
}

/// Shared state for the build HTTP server.
struct AppState {
    service: BuildService,
}

/// Build HTTP server.
pub struct BuildHttpServer {
    config: BuildHttpConfig,
    service: BuildService,
}

impl BuildHttpServer {
    pub fn new(service: BuildService, config: BuildHttpConfig) -> Self {
        Self { config, service }
    }

    /// Build the router.
    pub fn router(&self) -> Router {
        let state = Arc::new(AppState {
            service: self.service.clone(),
        });

        let app = Router::new()
            .route("/api/build/active", get(active_build))
            .route("/api/build/start", post(start_build))
            .route("/api/build/status/{id}", get(build_status))
            .route("/api/build/logs/{id}", get(build_logs))
            .route("/api/build/history", get(build_history))
            .route("/api/build/kill/{id}", post(kill_build))
            .route("/api/build/workers", get(worker_summary))
            .route(
                "/api/build/workers/{worker_id}",
                post(update_worker).delete(remove_worker),
            )
            .route("/api/workers/handle-stalled", post(handle_stalled_workers))
            .route("/health", get(health_check))
            .with_state(state);

        if self.config.enable_cors {
            app.layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
                .layer(TraceLayer::new_for_http())
        } else {
            app.layer(TraceLayer::new_for_http())
        }
    }

    /// Serve until `shutdown` resolves.
    pub async fn serve_with_shutdown<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port).parse()?;
        let router = self.router();

        tracing::info!("BuildMaster HTTP server listening on {}", addr);

        let listener = TcpListener::bind(addr).await?;
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await?;
        Ok(())
    }
}

// Handler functions

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn active_build(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ActiveBuildResponse>, ApiError> {
    let active = state
        .service
        .active_build()
        .await
        .map_err(|e| from_build_error(&e, "ACTIVE_ERROR"))?;
    Ok(Json(ActiveBuildResponse {
        has_active_build: active.is_some(),
        active_build: active,
    }))
}

async fn start_build(
    State(state): State<Arc<AppState>>,
    Json(req): Json<StartBuildRequest>,
) -> Result<Json<BuildRecord>, ApiError> {
    if let Some(active) = state
        .service
        .active_build()
        .await
        .map_err(|e| from_build_error(&e, "ACTIVE_ERROR"))?
    {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "BUILD_ACTIVE",
            format!("Build already running: {}", active.build_id),
        ));
    }

    state
        .service
        .start(req.config)
        .await
        .map(Json)
        .map_err(|e| from_build_error(&e, "START_ERROR"))
}

async fn build_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<BuildRecord>, ApiError> {
    let build_id = parse_build_id(&id)?;
    state
        .service
        .status(build_id)
        .await
        .map(Json)
        .map_err(|e| from_build_error(&e, "STATUS_ERROR"))
}

async fn build_logs(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(params): Query<LogsParams>,
) -> Result<Json<LogsResponse>, ApiError> {
    let build_id = parse_build_id(&id)?;
    match state.service.logs(build_id, params.lines).await {
        Ok(logs) => Ok(Json(LogsResponse {
            build_id: build_id.to_string(),
            logs,
        })),
        Err(BuildError::NotFound(_)) => Err(api_error(
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            format!("Logs for build {build_id} not found"),
        )),
        Err(e) => Err(from_build_error(&e, "LOGS_ERROR")),
    }
}

async fn build_history(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<HistoryResponse>, ApiError> {
    state
        .service
        .history(params.limit)
        .await
        .map(|history| Json(HistoryResponse { history }))
        .map_err(|e| from_build_error(&e, "HISTORY_ERROR"))
}

async fn kill_build(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<KillResponse>, ApiError> {
    let build_id = parse_build_id(&id)?;
    match state.service.kill(build_id).await {
        Ok(()) => Ok(Json(KillResponse {
            success: true,
            message: "Build cancelled successfully".to_string(),
        })),
        // Unknown builds are a rejected kill, not a missing resource
        Err(e) if e.is_user_error() => Err(api_error(
            StatusCode::BAD_REQUEST,
            "KILL_REJECTED",
            e.to_string(),
        )),
        Err(e) => Err(api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "KILL_ERROR",
            format!("Failed to kill build: {e}"),
        )),
    }
}

async fn worker_summary(State(state): State<Arc<AppState>>) -> Json<WorkerSummary> {
    Json(state.service.workers().summary().await)
}

async fn update_worker(
    State(state): State<Arc<AppState>>,
    Path(worker_id): Path<String>,
    Json(body): Json<WorkerUpdateRequest>,
) -> Result<Json<WorkerUpdateResponse>, ApiError> {
    if worker_id.trim().is_empty() || body.job_name.trim().is_empty() {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "INVALID_WORKER",
            "worker_id and job_name must not be empty",
        ));
    }
    let status = body
        .status
        .as_deref()
        .map_or(WorkerStatus::Running, WorkerStatus::parse_lenient);
    state
        .service
        .workers()
        .update_worker(&worker_id, &body.job_name, status)
        .await;
    Ok(Json(WorkerUpdateResponse {
        success: true,
        worker_id,
    }))
}

async fn remove_worker(
    State(state): State<Arc<AppState>>,
    Path(worker_id): Path<String>,
) -> Json<WorkerUpdateResponse> {
    state.service.workers().remove_worker(&worker_id).await;
    Json(WorkerUpdateResponse {
        success: true,
        worker_id,
    })
}

async fn handle_stalled_workers(
    State(state): State<Arc<AppState>>,
) -> Json<HandleStalledResponse> {
    let stalled = state.service.workers().handle_stalled().await;
    Json(HandleStalledResponse {
        success: true,
        handled_count: stalled.len(),
        stalled_workers: stalled,
    })
}
