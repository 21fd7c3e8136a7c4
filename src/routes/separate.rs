//! Stem separation route
//!
//! Thin passthrough to the configured inference backend.

use axum::{extract::State, routing::post, Json, Router};
use serde::Deserialize;

use crate::error::AppError;
use crate::inference::SeparationOutcome;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SeparateRequest {
    pub audio_url: String,
    #[serde(rename = "type", default = "default_stem")]
    pub stem: String,
}

fn default_stem() -> String {
    "vocals".to_string()
}

pub fn router() -> Router<AppState> {
    Router::new().route("/api/v1/separate", post(separate))
}

/// POST /api/v1/separate
async fn separate(
    State(state): State<AppState>,
    Json(request): Json<SeparateRequest>,
) -> Result<Json<SeparationOutcome>, AppError> {
    if request.audio_url.is_empty() {
        return Err(AppError::BadRequest("audio_url is required".to_string()));
    }

    let separator = state.separator().ok_or_else(|| {
        AppError::Configuration("No inference endpoint configured".to_string())
    })?;

    let outcome = separator
        .separate(&request.audio_url, &request.stem)
        .await?;

    match &outcome {
        SeparationOutcome::Separated { outputs, stem } => {
            tracing::info!(stem = %stem, outputs = outputs.len(), "Separation complete");
        }
        SeparationOutcome::Passthrough { stem, .. } => {
            tracing::warn!(stem = %stem, "Backend performed no separation, passing input through");
        }
    }

    Ok(Json(outcome))
}
