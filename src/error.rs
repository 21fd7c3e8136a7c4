//! Error types for the Stemsplit server

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Application-wide result type
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Upload(#[from] crate::upload::UploadError),

    #[error("Inference backend error: {0}")]
    Inference(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Storage-specific errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    #[error("S3 SDK error: {0}")]
    SdkError(String),
}

/// Error response body
///
/// Every failure surfaces as `{"status": "error", "error": …}` so
/// clients can branch on `status` alone.
#[derive(Serialize)]
struct ErrorResponse {
    status: &'static str,
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            // Upload errors carry their own status mapping
            AppError::Upload(e) => (e.status_code(), e.to_string()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Configuration(msg) => {
                tracing::error!("Configuration error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Server misconfigured".to_string(),
                )
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal error occurred".to_string(),
                )
            }
            AppError::Storage(e) => {
                tracing::error!("Storage error: {}", e);
                match e {
                    StorageError::ObjectNotFound(key) => {
                        (StatusCode::NOT_FOUND, format!("Object not found: {}", key))
                    }
                    StorageError::SdkError(_) => (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "Storage error".to_string(),
                    ),
                }
            }
            AppError::Inference(msg) => {
                tracing::error!("Inference error: {}", msg);
                (StatusCode::BAD_GATEWAY, "Inference backend failed".to_string())
            }
            AppError::Io(e) => {
                tracing::error!("IO error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "IO error".to_string())
            }
        };

        let body = Json(ErrorResponse {
            status: "error",
            error: message,
            details: if cfg!(debug_assertions) {
                Some(self.to_string())
            } else {
                None
            },
        });

        (status, body).into_response()
    }
}
