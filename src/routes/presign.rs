//! Presigned direct-upload route
//!
//! Issues a time-limited URL so the client can push the file straight
//! to the object store without routing bytes through this service.
//! Only available with the S3 backend; the SDK primitive is a
//! presigned PUT request.

use std::time::Duration;

use axum::{extract::State, routing::post, Json, Router};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::state::AppState;
use crate::upload::coordinator::make_target_key;
use crate::upload::{UploadError, MAX_FILE_SIZE};

#[derive(Debug, Deserialize)]
pub struct PresignRequest {
    #[serde(default = "default_filename")]
    pub filename: String,
    #[serde(default = "default_content_type")]
    pub content_type: String,
    /// Declared size; rejected up front if over the cap
    #[serde(default)]
    pub size: Option<u64>,
}

fn default_filename() -> String {
    "audio.mp3".to_string()
}

fn default_content_type() -> String {
    "audio/mpeg".to_string()
}

#[derive(Debug, Serialize)]
pub struct PresignResponse {
    pub status: &'static str,
    pub upload_url: String,
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/presign", post(presign))
}

/// POST /api/v1/upload/presign
async fn presign(
    State(state): State<AppState>,
    Json(request): Json<PresignRequest>,
) -> Result<Json<PresignResponse>, AppError> {
    if let Some(size) = request.size {
        if size > MAX_FILE_SIZE {
            return Err(UploadError::PayloadTooLarge {
                size,
                max: MAX_FILE_SIZE,
            }
            .into());
        }
    }

    let s3 = state.s3().ok_or_else(|| {
        AppError::Configuration("Presigned uploads require the S3 backend".to_string())
    })?;

    let key = make_target_key(&request.filename);
    let ttl = Duration::from_secs(state.config().upload.presign_ttl_secs);

    let upload_url = s3
        .presign_put(&key, &request.content_type, ttl)
        .await
        .map_err(AppError::Storage)?;

    tracing::info!(key = %key, ttl_secs = ttl.as_secs(), "Issued presigned upload URL");

    Ok(Json(PresignResponse {
        status: "put",
        upload_url,
        url: state.public_url(&key),
        key,
    }))
}
