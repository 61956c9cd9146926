//! Training job API handlers
//!
//! POST /api/audio/train, POST /api/audio/train/upload,
//! GET /api/audio/train/status/:job_id, POST /api/audio/train/cancel/:job_id,
//! GET /api/audio/train/jobs

use axum::{
    extract::{rejection::JsonRejection, Multipart, Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::{
    error::{ApiError, ApiResult},
    models::TrainingJob,
    services::store_training_upload,
    AppState,
};

/// Multipart field carrying the owner id
const USER_ID_FIELD: &str = "userId";

/// Multipart field carrying training audio (repeatable)
const AUDIO_FILES_FIELD: &str = "audioFiles";

/// POST /api/audio/train request
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TrainRequest {
    pub user_id: String,
    pub audio_files: Vec<String>,
}

impl TrainRequest {
    /// Reject submissions that must not create a job
    pub fn validate(&self) -> ApiResult<()> {
        validate_submission(&self.user_id, self.audio_files.len())?;
        if self.audio_files.iter().any(|path| path.trim().is_empty()) {
            return Err(ApiError::BadRequest(
                "Audio file paths must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Submission response
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainResponse {
    pub success: bool,
    pub job_id: String,
}

/// GET /api/audio/train/jobs query
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListJobsQuery {
    pub user_id: Option<String>,
}

/// GET /api/audio/train/jobs response
#[derive(Debug, Serialize)]
pub struct ListJobsResponse {
    pub jobs: Vec<TrainingJob>,
}

fn validate_submission(user_id: &str, file_count: usize) -> ApiResult<()> {
    if user_id.trim().is_empty() {
        return Err(ApiError::BadRequest("userId is required".to_string()));
    }
    if file_count == 0 {
        return Err(ApiError::BadRequest("No audio files provided".to_string()));
    }
    Ok(())
}

/// POST /api/audio/train
///
/// Register a job for audio files already on disk and launch its worker.
/// Returns as soon as the worker is started. Bodies that are not a JSON
/// object get the same error envelope as validation failures.
pub async fn submit_training(
    State(state): State<AppState>,
    payload: Result<Json<TrainRequest>, JsonRejection>,
) -> ApiResult<Json<TrainResponse>> {
    let Json(request) = payload.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
    request.validate()?;

    let job = state
        .supervisor
        .start_training(&request.user_id, request.audio_files)
        .await?;

    Ok(Json(TrainResponse {
        success: true,
        job_id: job.id,
    }))
}

/// POST /api/audio/train/upload
///
/// Multipart variant: `userId` text field plus one or more `audioFiles`
/// parts. Nothing is written to disk unless the submission is valid and an
/// admission slot is held.
pub async fn submit_training_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Json<TrainResponse>> {
    let mut user_id = String::new();
    let mut uploads: Vec<(Option<String>, Vec<u8>)> = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Invalid multipart body: {}", e)))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some(USER_ID_FIELD) => {
                user_id = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Invalid userId field: {}", e)))?;
            }
            Some(AUDIO_FILES_FIELD) => {
                let file_name = field.file_name().map(str::to_string);
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Failed to read upload: {}", e)))?;
                uploads.push((file_name, bytes.to_vec()));
            }
            other => {
                tracing::debug!(field = ?other, "Ignoring unexpected multipart field");
            }
        }
    }

    validate_submission(&user_id, uploads.len())?;
    if let Some((name, _)) = uploads.iter().find(|(_, bytes)| bytes.is_empty()) {
        return Err(ApiError::BadRequest(format!(
            "Uploaded training file is empty: {}",
            name.as_deref().unwrap_or("<unnamed>")
        )));
    }

    let permit = state.supervisor.reserve()?;

    let mut stored = Vec::with_capacity(uploads.len());
    for (file_name, bytes) in &uploads {
        match store_training_upload(bytes, file_name.as_deref(), &state.upload_dir).await {
            Ok(path) => stored.push(path),
            Err(e) => {
                remove_uploads(&stored).await;
                return Err(e.into());
            }
        }
    }
    let audio_files = stored
        .iter()
        .map(|path| path.to_string_lossy().into_owned())
        .collect();

    let job = state
        .supervisor
        .start_reserved(permit, &user_id, audio_files)
        .await?;

    Ok(Json(TrainResponse {
        success: true,
        job_id: job.id,
    }))
}

async fn remove_uploads(paths: &[std::path::PathBuf]) {
    for path in paths {
        if let Err(e) = tokio::fs::remove_file(path).await {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove partial upload");
        }
    }
}

/// GET /api/audio/train/status/:job_id
///
/// Current snapshot; never waits on the worker.
pub async fn get_training_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<TrainingJob>> {
    state
        .registry
        .get(&job_id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Job not found: {}", job_id)))
}

/// POST /api/audio/train/cancel/:job_id
pub async fn cancel_training(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<TrainingJob>> {
    let job = state.supervisor.cancel(&job_id).await?;
    Ok(Json(job))
}

/// GET /api/audio/train/jobs?userId=...
pub async fn list_training_jobs(
    State(state): State<AppState>,
    Query(query): Query<ListJobsQuery>,
) -> ApiResult<Json<ListJobsResponse>> {
    let user_id = query
        .user_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("userId is required".to_string()))?;

    let jobs = state.registry.list_for_user(&user_id).await;
    Ok(Json(ListJobsResponse { jobs }))
}

/// Build training routes
pub fn training_routes() -> Router<AppState> {
    Router::new()
        .route("/api/audio/train", post(submit_training))
        .route("/api/audio/train/upload", post(submit_training_upload))
        .route("/api/audio/train/status/:job_id", get(get_training_status))
        .route("/api/audio/train/cancel/:job_id", post(cancel_training))
        .route("/api/audio/train/jobs", get(list_training_jobs))
}
