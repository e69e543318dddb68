//! Status HTTP server for vidprep
//!
//! Job submission and polling for the application layer, plus aggregate metrics.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use crate::config::ProcessingSettings;
use crate::daemon::{Daemon, SubmitError};
use crate::metrics::MetricsSnapshot;
use crate::tracker::{JobSnapshot, TrackerError};

/// Errors that can occur when running the status server
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind to address: {0}")]
    BindError(#[from] std::io::Error),
}

/// Body of `POST /jobs`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub job_id: String,
    pub source_path: PathBuf,
    #[serde(default)]
    pub settings: Option<ProcessingSettings>,
}

/// Body of a `202 Accepted` reply
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubmitResponse {
    pub job_id: String,
    pub task_id: String,
}

/// JSON error reply: `{"error": "..."}`
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({ "error": self.message })),
        )
            .into_response()
    }
}

impl From<SubmitError> for ApiError {
    fn from(e: SubmitError) -> Self {
        let status = match &e {
            SubmitError::InvalidJobId(_)
            | SubmitError::InvalidSourcePath(_)
            | SubmitError::InvalidSettings(_) => StatusCode::BAD_REQUEST,
            SubmitError::Tracker(TrackerError::ConcurrentRunConflict(_)) => StatusCode::CONFLICT,
            SubmitError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            SubmitError::Tracker(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: e.to_string(),
        }
    }
}

impl From<TrackerError> for ApiError {
    fn from(e: TrackerError) -> Self {
        let status = match &e {
            TrackerError::JobNotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: e.to_string(),
        }
    }
}

/// Handler for POST /jobs
async fn submit_job(
    State(daemon): State<Arc<Daemon>>,
    Json(req): Json<SubmitRequest>,
) -> Result<(StatusCode, Json<SubmitResponse>), ApiError> {
    let task_id = daemon
        .submit(&req.job_id, req.source_path, req.settings)
        .await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            job_id: req.job_id,
            task_id,
        }),
    ))
}

/// Handler for GET /jobs/:job_id
async fn get_job(
    State(daemon): State<Arc<Daemon>>,
    Path(job_id): Path<String>,
) -> Result<Json<JobSnapshot>, ApiError> {
    Ok(Json(daemon.status(&job_id).await?))
}

/// Handler for GET /jobs
async fn list_jobs(State(daemon): State<Arc<Daemon>>) -> Json<Vec<JobSnapshot>> {
    Json(daemon.jobs().await)
}

/// Handler for GET /metrics endpoint
/// Returns the current MetricsSnapshot as JSON
async fn get_metrics(State(daemon): State<Arc<Daemon>>) -> Json<MetricsSnapshot> {
    let snapshot = daemon.metrics.read().await.clone();
    Json(snapshot)
}

/// Creates the axum Router with job and metrics endpoints
pub fn create_status_router(daemon: Arc<Daemon>) -> Router {
    Router::new()
        .route("/jobs", post(submit_job).get(list_jobs))
        .route("/jobs/:job_id", get(get_job))
        .route("/metrics", get(get_metrics))
        .with_state(daemon)
}

/// Runs the status HTTP server on `bind`
pub async fn run_status_server(daemon: Arc<Daemon>, bind: &str) -> Result<(), ServerError> {
    let app = create_status_router(daemon);

    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(addr = %listener.local_addr()?, "Status server listening");
    axum::serve(listener, app).await?;

    Ok(())
}
