//! HTTP API for docroute
//!
//! Exposes the catalog, route resolution, job submission and metrics over
//! JSON. Errors are returned as `{code, message}` with a matching status.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::catalog::{normalize_id, Format};
use crate::jobs::{Job, JobOptions};
use crate::manager::{JobInput, JobManager, SubmitError};
use crate::metrics::MetricsSnapshot;
use crate::route::{ConversionPath, RouteError};

const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Errors that can occur when running the API server
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Server error: {0}")]
    Serve(#[from] std::io::Error),
}

/// Error body returned by every handler
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            code: "not_found",
            message: message.into(),
        }
    }

    fn invalid_input(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "invalid_input",
            message: message.into(),
        }
    }
}

impl From<RouteError> for ApiError {
    fn from(e: RouteError) -> Self {
        Self {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            code: "no_route",
            message: e.to_string(),
        }
    }
}

impl From<SubmitError> for ApiError {
    fn from(e: SubmitError) -> Self {
        match e {
            SubmitError::NoRoute(route) => route.into(),
            SubmitError::AdmissionRejected { .. } => Self {
                status: StatusCode::TOO_MANY_REQUESTS,
                code: "admission_rejected",
                message: e.to_string(),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            code: self.code.to_string(),
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct RouteQuery {
    from: String,
    to: String,
}

#[derive(Debug, Deserialize)]
struct EstimateQuery {
    from: String,
    to: String,
    #[serde(default)]
    size: u64,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct EstimateResponse {
    pub from: String,
    pub to: String,
    pub size_bytes: u64,
    pub estimated_duration_secs: f64,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TargetsResponse {
    pub format: String,
    pub targets: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    limit: Option<usize>,
}

/// Body of `POST /jobs`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    /// File on the daemon host
    pub input_path: PathBuf,
    /// Source format; taken from the file extension when absent
    #[serde(default)]
    pub from: Option<String>,
    pub to: String,
    #[serde(default)]
    pub options: JobOptions,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubmitResponse {
    pub job_id: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CancelResponse {
    pub cancelled: bool,
}

async fn get_metrics(State(manager): State<JobManager>) -> Json<MetricsSnapshot> {
    Json(manager.metrics_snapshot())
}

async fn list_formats(State(manager): State<JobManager>) -> Json<Vec<Format>> {
    Json(manager.catalog().list_all().to_vec())
}

async fn format_targets(
    State(manager): State<JobManager>,
    Path(id): Path<String>,
) -> Result<Json<TargetsResponse>, ApiError> {
    let format = manager
        .catalog()
        .lookup(&id)
        .map_err(|e| ApiError::not_found(e.to_string()))?;
    Ok(Json(TargetsResponse {
        format: format.id.clone(),
        targets: manager.resolver().supported_targets(&format.id),
    }))
}

async fn resolve_route(
    State(manager): State<JobManager>,
    Query(q): Query<RouteQuery>,
) -> Result<Json<ConversionPath>, ApiError> {
    Ok(Json(manager.resolver().resolve(&q.from, &q.to)?))
}

async fn estimate(
    State(manager): State<JobManager>,
    Query(q): Query<EstimateQuery>,
) -> Result<Json<EstimateResponse>, ApiError> {
    let secs = manager.estimate_duration(&q.from, &q.to, q.size)?;
    Ok(Json(EstimateResponse {
        from: normalize_id(&q.from),
        to: normalize_id(&q.to),
        size_bytes: q.size,
        estimated_duration_secs: secs,
    }))
}

async fn submit_job(
    State(manager): State<JobManager>,
    Json(req): Json<SubmitRequest>,
) -> Result<(StatusCode, Json<SubmitResponse>), ApiError> {
    let from = match req.from {
        Some(from) => from,
        None => format_from_extension(&req.input_path).ok_or_else(|| {
            ApiError::invalid_input(format!(
                "Cannot infer format of {}; pass \"from\"",
                req.input_path.display()
            ))
        })?,
    };

    let data = tokio::fs::read(&req.input_path).await.map_err(|e| {
        ApiError::invalid_input(format!("Cannot read {}: {}", req.input_path.display(), e))
    })?;

    let name = req
        .input_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| format!("input.{}", from));

    let job_id = manager.submit(JobInput::new(name, from, data.into()), &req.to, req.options)?;
    Ok((StatusCode::ACCEPTED, Json(SubmitResponse { job_id })))
}

async fn list_jobs(
    State(manager): State<JobManager>,
    Query(q): Query<HistoryQuery>,
) -> Json<Vec<Job>> {
    Json(manager.history(q.limit.unwrap_or(DEFAULT_HISTORY_LIMIT)))
}

async fn get_job(
    State(manager): State<JobManager>,
    Path(id): Path<String>,
) -> Result<Json<Job>, ApiError> {
    manager
        .status(&id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("No job {}", id)))
}

async fn cancel_job(
    State(manager): State<JobManager>,
    Path(id): Path<String>,
) -> Json<CancelResponse> {
    Json(CancelResponse {
        cancelled: manager.cancel(&id),
    })
}

/// Format id implied by a file's extension
pub fn format_from_extension(path: &std::path::Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(normalize_id)
        .filter(|id| !id.is_empty())
}

/// Creates the axum Router with every API endpoint
pub fn create_router(manager: JobManager) -> Router {
    Router::new()
        .route("/metrics", get(get_metrics))
        .route("/formats", get(list_formats))
        .route("/formats/:id/targets", get(format_targets))
        .route("/routes", get(resolve_route))
        .route("/estimate", get(estimate))
        .route("/jobs", post(submit_job).get(list_jobs))
        .route("/jobs/:id", get(get_job))
        .route("/jobs/:id/cancel", post(cancel_job))
        .with_state(manager)
}

/// Serve the API on `bind` until `shutdown` is cancelled
pub async fn run_server(
    manager: JobManager,
    bind: &str,
    shutdown: CancellationToken,
) -> Result<(), ServerError> {
    let app = create_router(manager);
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .map_err(|source| ServerError::Bind {
            addr: bind.to_string(),
            source,
        })?;

    tracing::info!(addr = %bind, "API server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}
