//! Upload Routes
//!
//! HTTP endpoints for the chunked upload protocol.
//!
//! Endpoints:
//! - POST /api/v1/upload/init - Open an upload session
//! - POST /api/v1/upload/:upload_id/chunks/:index - Store a chunk
//! - POST /api/v1/upload/:upload_id/finalize - Assemble the final object

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::header,
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use base64::Engine;
use serde::Serialize;
use uuid::Uuid;

use crate::state::AppState;
use crate::upload::{
    ChunkBody, ChunkResponse, FinalizeRequest, FinalizeResponse, InitRequest, InitResponse,
    UploadError,
};

// ============================================================================
// Error Response
// ============================================================================

#[derive(Serialize)]
struct ErrorResponse {
    status: &'static str,
    error: String,
}

impl IntoResponse for UploadError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let body = Json(ErrorResponse {
            status: "error",
            error: self.to_string(),
        });
        (status, body).into_response()
    }
}

// ============================================================================
// Router
// ============================================================================

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/init", post(init))
        .route("/:upload_id/chunks/:index", post(upload_chunk))
        .route("/:upload_id/finalize", post(finalize))
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /api/v1/upload/init
///
/// Open a session. Returns the upload id and the final key the
/// assembled object will occupy once finalized.
async fn init(
    State(state): State<AppState>,
    Json(request): Json<InitRequest>,
) -> Result<Json<InitResponse>, UploadError> {
    let session = state
        .coordinator()
        .init(&request.filename, &request.content_type)
        .await?;

    Ok(Json(InitResponse {
        status: "ready".to_string(),
        upload_id: session.upload_id.to_string(),
        key: session.target_key,
    }))
}

/// POST /api/v1/upload/:upload_id/chunks/:index
///
/// Store one chunk. The body is the raw chunk bytes, or a JSON object
/// `{"data": "<base64>"}` for text-safe transports; either way the
/// stored payload is the decoded binary.
async fn upload_chunk(
    State(state): State<AppState>,
    Path((upload_id, chunk_index)): Path<(String, usize)>,
    headers: axum::http::HeaderMap,
    body: Bytes,
) -> Result<Json<ChunkResponse>, UploadError> {
    let upload_id = parse_upload_id(&upload_id)?;
    let payload = decode_chunk_body(&headers, body)?;

    state
        .coordinator()
        .put_chunk(upload_id, chunk_index, payload)
        .await?;

    Ok(Json(ChunkResponse {
        status: "chunk_received".to_string(),
        chunk_index,
    }))
}

/// POST /api/v1/upload/:upload_id/finalize
///
/// Assemble all declared chunks into the final object and reclaim
/// transient state.
async fn finalize(
    State(state): State<AppState>,
    Path(upload_id): Path<String>,
    Json(request): Json<FinalizeRequest>,
) -> Result<Json<FinalizeResponse>, UploadError> {
    let upload_id = parse_upload_id(&upload_id)?;

    let (key, size) = state
        .coordinator()
        .finalize(upload_id, request.total_chunks)
        .await?;

    let url = state.public_url(&key);

    Ok(Json(FinalizeResponse {
        status: "uploaded".to_string(),
        key,
        size,
        url,
    }))
}

// ============================================================================
// Helpers
// ============================================================================

fn parse_upload_id(raw: &str) -> Result<Uuid, UploadError> {
    Uuid::parse_str(raw).map_err(|_| UploadError::SessionNotFound(raw.to_string()))
}

/// Decode the chunk transit encoding. JSON bodies carry base64; raw
/// bodies are already the payload.
fn decode_chunk_body(
    headers: &axum::http::HeaderMap,
    body: Bytes,
) -> Result<Vec<u8>, UploadError> {
    let is_json = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("application/json"))
        .unwrap_or(false);

    if !is_json {
        return Ok(body.to_vec());
    }

    let parsed: ChunkBody = serde_json::from_slice(&body)
        .map_err(|e| UploadError::InvalidEncoding(format!("Bad chunk body: {}", e)))?;

    base64::engine::general_purpose::STANDARD
        .decode(parsed.data.as_bytes())
        .map_err(|e| UploadError::InvalidEncoding(format!("Bad base64 payload: {}", e)))
}


#[cfg(test)]
mod router_tests {
    use std::sync::Arc;

    use axum_test::TestServer;
    use serde_json::{json, Value};
    use tempfile::TempDir;

    use crate::config::Config;
    use crate::state::AppState;
    use crate::storage::FsStore;
    use crate::upload::{MemorySessionStore, UploadCoordinator};

    fn test_server(temp: &TempDir) -> (TestServer, Arc<FsStore>) {
        let store = Arc::new(FsStore::new(temp.path()));
        let sessions = Arc::new(MemorySessionStore::new());
        let coordinator = UploadCoordinator::new(
            sessions,
            store.clone(),
            "tmp/uploads".to_string(),
            24,
        );
        let state = AppState::new(Config::default(), None, coordinator, None);

        let app = axum::Router::new()
            .nest("/api/v1/upload", super::router())
            .with_state(state);

        (TestServer::new(app).unwrap(), store)
    }

    #[tokio::test]
    async fn test_init_chunk_finalize_over_http() {
        let temp = TempDir::new().unwrap();
        let (server, store) = test_server(&temp);

        // init
        let response = server
            .post("/api/v1/upload/init")
            .json(&json!({ "filename": "a.mp3", "content_type": "audio/mpeg" }))
            .await;
        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["status"], "ready");
        let upload_id = body["upload_id"].as_str().unwrap().to_string();
        let key = body["key"].as_str().unwrap().to_string();

        // chunk 1 as raw bytes, chunk 0 as base64 JSON, out of order
        let response = server
            .post(&format!("/api/v1/upload/{}/chunks/1", upload_id))
            .content_type("application/octet-stream")
            .bytes(b"BBBB".to_vec().into())
            .await;
        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["status"], "chunk_received");

        let response = server
            .post(&format!("/api/v1/upload/{}/chunks/0", upload_id))
            .json(&json!({ "data": "QUFBQQ==" }))
            .await;
        response.assert_status_ok();

        // finalize
        let response = server
            .post(&format!("/api/v1/upload/{}/finalize", upload_id))
            .json(&json!({ "total_chunks": 2 }))
            .await;
        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["status"], "uploaded");
        assert_eq!(body["size"], 8);

        use crate::storage::ObjectStore;
        assert_eq!(store.get(&key).await.unwrap(), b"AAAABBBB");
    }

    #[tokio::test]
    async fn test_unknown_session_is_rejected() {
        let temp = TempDir::new().unwrap();
        let (server, _) = test_server(&temp);

        let response = server
            .post(&format!(
                "/api/v1/upload/{}/finalize",
                uuid::Uuid::new_v4()
            ))
            .json(&json!({ "total_chunks": 1 }))
            .await;
        response.assert_status(axum::http::StatusCode::BAD_REQUEST);
        let body: Value = response.json();
        assert_eq!(body["status"], "error");
    }
}
