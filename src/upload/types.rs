//! Types for the chunked upload protocol

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StorageError;

// ============================================================================
// Constants
// ============================================================================

/// Maximum declared file size accepted at presign time: 100MB
pub const MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// Concurrent object-store fetches/deletes during one finalize
pub const ASSEMBLY_WORKERS: usize = 10;

// ============================================================================
// Session Types
// ============================================================================

/// Upload session state
///
/// Created at init, mutated only through status transitions, removed on
/// successful finalize or by the TTL reaper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadSession {
    /// Unique session ID, correlation key for all subsequent calls
    pub upload_id: Uuid,

    /// Final storage key the assembled object will occupy
    pub target_key: String,

    /// MIME type recorded at init, applied to the final object
    pub content_type: String,

    /// Advisory, used only for key naming and telemetry
    pub original_filename: String,

    /// Current status
    pub status: SessionStatus,

    /// Session creation time
    pub created_at: DateTime<Utc>,

    /// Session expiry time
    pub expires_at: DateTime<Utc>,
}

impl UploadSession {
    pub fn new(
        target_key: String,
        content_type: String,
        original_filename: String,
        ttl_hours: i64,
    ) -> Self {
        let now = Utc::now();
        Self {
            upload_id: Uuid::new_v4(),
            target_key,
            content_type,
            original_filename,
            status: SessionStatus::Open,
            created_at: now,
            expires_at: now + chrono::Duration::hours(ttl_hours),
        }
    }

    /// Check if session has outlived its TTL
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }
}

/// Session status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Accepting chunks
    Open,
    /// A finalize is in flight; acts as the mutual-exclusion gate
    Finalizing,
    /// Final object written; terminal
    Complete,
    /// Finalize failed; chunks left in place for inspection
    Aborted,
}

// ============================================================================
// Wire Types
// ============================================================================

/// Request to open an upload session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitRequest {
    pub filename: String,
    #[serde(default = "default_content_type")]
    pub content_type: String,
}

fn default_content_type() -> String {
    "audio/mpeg".to_string()
}

/// Response to init: the session id and the not-yet-existing final key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitResponse {
    pub status: String,
    pub upload_id: String,
    pub key: String,
}

/// JSON form of a chunk body, for text-safe transports
#[derive(Debug, Clone, Deserialize)]
pub struct ChunkBody {
    /// Base64-encoded chunk payload
    pub data: String,
}

/// Response after storing a chunk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkResponse {
    pub status: String,
    pub chunk_index: usize,
}

/// Request to finalize: declares how many chunks the object has
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalizeRequest {
    pub total_chunks: usize,
}

/// Response after a successful finalize
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalizeResponse {
    pub status: String,
    pub key: String,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

// ============================================================================
// Error Types
// ============================================================================

/// Upload error types
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Operation invalid for session {id} in state {status:?}")]
    InvalidSession { id: String, status: SessionStatus },

    #[error("Incomplete upload: missing chunk indices {missing:?}")]
    IncompleteUpload { missing: Vec<usize> },

    #[error("Finalize already in progress for session {0}")]
    FinalizeInProgress(String),

    #[error("File too large: {size} bytes (max: {max})")]
    PayloadTooLarge { size: u64, max: u64 },

    #[error("Invalid chunk encoding: {0}")]
    InvalidEncoding(String),

    #[error("Storage operation timed out: {0}")]
    Timeout(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl UploadError {
    /// Get HTTP status code for this error
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Self::SessionNotFound(_) => StatusCode::BAD_REQUEST,
            Self::InvalidSession { .. } => StatusCode::CONFLICT,
            Self::IncompleteUpload { .. } => StatusCode::BAD_REQUEST,
            Self::FinalizeInProgress(_) => StatusCode::CONFLICT,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::InvalidEncoding(_) => StatusCode::BAD_REQUEST,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Storage(StorageError::ObjectNotFound(_)) => StatusCode::NOT_FOUND,
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
