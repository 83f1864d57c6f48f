//! HTTP routes.
//!
//! A deliberately thin boundary: the enqueue entry points, session/status
//! queries and job inspection. All orchestration logic lives behind the
//! dispatcher and the stores.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::importer::error::{ImportError, SerializedException};
use crate::jobs::{JobMeta, JobPayload};
use crate::server::state::ServerState;
use crate::state::serialize::SerializedSessionState;

/// ImportError rendered as an HTTP response with the serialized exception as
/// body.
pub struct ApiError(ImportError);

impl From<ImportError> for ApiError {
    fn from(err: ImportError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = Json(SerializedException::from(&self.0));
        (status, body).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct EnqueueRequest {
    pub kind: String,
    pub folder_hash: String,
    pub folder_path: String,
    #[serde(default)]
    pub frontend_ref: Option<String>,
    /// Kind-specific kwargs (`search_ids`, `candidate_ids`, …).
    #[serde(flatten)]
    pub kwargs: serde_json::Map<String, serde_json::Value>,
}

fn payload_from_request(request: &EnqueueRequest) -> Result<JobPayload, ImportError> {
    let mut value = request.kwargs.clone();
    value.insert("kind".to_string(), json!(request.kind));
    serde_json::from_value(serde_json::Value::Object(value)).map_err(|e| {
        ImportError::InvalidUsage(format!(
            "invalid parameters for kind {:?}: {e}",
            request.kind
        ))
    })
}

/// `POST /api/enqueue`
pub async fn enqueue(
    State(state): State<ServerState>,
    Json(request): Json<EnqueueRequest>,
) -> Result<Json<JobMeta>, ApiError> {
    let payload = payload_from_request(&request)?;
    let meta = state.dispatcher.enqueue(
        &request.folder_hash,
        &request.folder_path,
        payload,
        request.frontend_ref.clone(),
    )?;
    Ok(Json(meta))
}

/// `GET /api/sessions/{hash}` — the current (highest revision) session.
pub async fn session_by_hash(
    State(state): State<ServerState>,
    Path(hash): Path<String>,
) -> Result<Json<SerializedSessionState>, ApiError> {
    let session = state
        .store
        .latest_by_hash(&hash)
        .map_err(ImportError::Infra)?
        .ok_or_else(|| ImportError::NotFound(format!("no session for hash {hash}")))?;
    Ok(Json(SerializedSessionState::from_live(&session)))
}

#[derive(Debug, Deserialize)]
pub struct PathQuery {
    pub path: String,
}

/// `GET /api/sessions/by_path?path=...`
pub async fn session_by_path(
    State(state): State<ServerState>,
    Query(query): Query<PathQuery>,
) -> Result<Json<SerializedSessionState>, ApiError> {
    let session = state
        .store
        .latest_by_path(std::path::Path::new(&query.path))
        .map_err(ImportError::Infra)?
        .ok_or_else(|| ImportError::NotFound(format!("no session for path {}", query.path)))?;
    Ok(Json(SerializedSessionState::from_live(&session)))
}

/// `GET /api/jobs`
pub async fn list_jobs(State(state): State<ServerState>) -> impl IntoResponse {
    Json(state.dispatcher.jobs())
}

/// `GET /api/jobs/{id}`
pub async fn get_job(
    State(state): State<ServerState>,
    Path(job_id): Path<String>,
) -> Result<Response, ApiError> {
    let record = state
        .dispatcher
        .job(&job_id)
        .ok_or_else(|| ImportError::NotFound(format!("no job with id {job_id}")))?;
    Ok(Json(record).into_response())
}

/// `DELETE /api/jobs/{id}` — revoke a queued job.
pub async fn revoke_job(
    State(state): State<ServerState>,
    Path(job_id): Path<String>,
) -> impl IntoResponse {
    let revoked = state.dispatcher.revoke(&job_id);
    Json(json!({ "job_id": job_id, "revoked": revoked }))
}

/// `GET /health`
pub async fn health(State(state): State<ServerState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "connections": state.connections.connection_count(),
    }))
}
