//! Audio upload handler
//!
//! POST /api/audio/upload

use axum::{
    extract::{Multipart, State},
    routing::post,
    Json, Router,
};
use serde::Serialize;

use crate::{
    error::{ApiError, ApiResult},
    models::ProcessedAudioFile,
    services::process_audio_file,
    AppState,
};

/// Multipart field carrying the uploaded audio
const AUDIO_FIELD: &str = "audio";

/// POST /api/audio/upload response
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub success: bool,
    pub file: ProcessedAudioFile,
}

/// POST /api/audio/upload
///
/// Stores one `audio` part and reports its duration and sample rate.
pub async fn upload_audio(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Json<UploadResponse>> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Invalid multipart body: {}", e)))?
    {
        if field.name() != Some(AUDIO_FIELD) {
            continue;
        }

        let file_name = field.file_name().map(str::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(format!("Failed to read upload: {}", e)))?;

        let file = process_audio_file(&bytes, file_name.as_deref(), &state.upload_dir).await?;
        return Ok(Json(UploadResponse {
            success: true,
            file,
        }));
    }

    Err(ApiError::BadRequest("No audio file provided".to_string()))
}

/// Build upload routes
pub fn upload_routes() -> Router<AppState> {
    Router::new().route("/api/audio/upload", post(upload_audio))
}
