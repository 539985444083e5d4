/// REST handlers for render job submission, polling and cancellation

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

use jobs::{JobManager, RenderJob, RenderRequest};

pub enum ApiError {
    NotFound,
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound => (StatusCode::NOT_FOUND, "Not found".to_string()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub job_id: String,
}

/// POST /api/render - Validate the document and queue the render
pub async fn submit_render(
    State(manager): State<Arc<JobManager>>,
    Json(request): Json<RenderRequest>,
) -> Result<Json<SubmitResponse>, ApiError> {
    let job_id = manager
        .submit(request)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    info!("Queued render job {}", job_id);
    Ok(Json(SubmitResponse { job_id }))
}

/// GET /api/render/:id - Current job status and progress
pub async fn get_render(
    State(manager): State<Arc<JobManager>>,
    Path(id): Path<String>,
) -> Result<Json<RenderJob>, ApiError> {
    manager.job(&id).map(Json).ok_or(ApiError::NotFound)
}

/// POST /api/render/:id/cancel - Request cancellation of a running job
pub async fn cancel_render(
    State(manager): State<Arc<JobManager>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if manager.cancel(&id) {
        Ok(StatusCode::OK)
    } else {
        Err(ApiError::NotFound)
    }
}
