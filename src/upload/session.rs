//! Session Store
//!
//! Holds per-upload metadata keyed by upload id. Two backends:
//! - In-memory: sessions are lost on process restart. Acceptable only
//!   for a single-process deployment that never redeploys mid-upload.
//! - Durable: session metadata persisted as a JSON object in the object
//!   store under the temp namespace, so sessions survive restarts and
//!   any instance can serve any request. This is the default.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::storage::ObjectStore;

use super::types::{UploadError, UploadSession};

/// Trait for session storage backends
#[async_trait::async_trait]
pub trait SessionStore: Send + Sync {
    /// Persist a newly created session
    async fn create(&self, session: &UploadSession) -> Result<(), UploadError>;

    /// Get a session; `SessionNotFound` on an unknown id, never a default
    async fn get(&self, upload_id: Uuid) -> Result<UploadSession, UploadError>;

    /// Overwrite an existing session (status transitions)
    async fn update(&self, session: &UploadSession) -> Result<(), UploadError>;

    /// Delete a session; deleting a missing session is not an error
    async fn delete(&self, upload_id: Uuid) -> Result<(), UploadError>;

    /// List all known sessions (reaper sweep)
    async fn list(&self) -> Result<Vec<UploadSession>, UploadError>;
}

// ============================================================================
// In-Memory Backend
// ============================================================================

/// Process-local session store (degraded mode)
#[derive(Clone, Default)]
pub struct MemorySessionStore {
    sessions: Arc<RwLock<HashMap<Uuid, UploadSession>>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl SessionStore for MemorySessionStore {
    async fn create(&self, session: &UploadSession) -> Result<(), UploadError> {
        let mut sessions = self.sessions.write().await;
        sessions.insert(session.upload_id, session.clone());
        Ok(())
    }

    async fn get(&self, upload_id: Uuid) -> Result<UploadSession, UploadError> {
        let sessions = self.sessions.read().await;
        sessions
            .get(&upload_id)
            .cloned()
            .ok_or_else(|| UploadError::SessionNotFound(upload_id.to_string()))
    }

    async fn update(&self, session: &UploadSession) -> Result<(), UploadError> {
        let mut sessions = self.sessions.write().await;
        if !sessions.contains_key(&session.upload_id) {
            return Err(UploadError::SessionNotFound(session.upload_id.to_string()));
        }
        sessions.insert(session.upload_id, session.clone());
        Ok(())
    }

    async fn delete(&self, upload_id: Uuid) -> Result<(), UploadError> {
        let mut sessions = self.sessions.write().await;
        sessions.remove(&upload_id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<UploadSession>, UploadError> {
        let sessions = self.sessions.read().await;
        Ok(sessions.values().cloned().collect())
    }
}

// ============================================================================
// Durable Backend
// ============================================================================

/// Object-store-backed session store
///
/// Session JSON lives at `{prefix}/{upload_id}/session.json`, next to
/// the session's chunks, so one prefix delete reclaims everything.
pub struct DurableSessionStore {
    store: Arc<dyn ObjectStore>,
    prefix: String,
}

impl DurableSessionStore {
    pub fn new(store: Arc<dyn ObjectStore>, prefix: String) -> Self {
        Self { store, prefix }
    }

    fn session_key(&self, upload_id: Uuid) -> String {
        format!("{}/{}/session.json", self.prefix, upload_id)
    }

    fn encode(session: &UploadSession) -> Result<Vec<u8>, UploadError> {
        serde_json::to_vec(session)
            .map_err(|e| UploadError::Internal(format!("Failed to encode session: {}", e)))
    }
}

#[async_trait::async_trait]
impl SessionStore for DurableSessionStore {
    async fn create(&self, session: &UploadSession) -> Result<(), UploadError> {
        let key = self.session_key(session.upload_id);
        self.store
            .put(&key, Self::encode(session)?, "application/json")
            .await?;
        Ok(())
    }

    async fn get(&self, upload_id: Uuid) -> Result<UploadSession, UploadError> {
        let key = self.session_key(upload_id);
        let data = match self.store.get(&key).await {
            Ok(data) => data,
            Err(crate::error::StorageError::ObjectNotFound(_)) => {
                return Err(UploadError::SessionNotFound(upload_id.to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        serde_json::from_slice(&data)
            .map_err(|e| UploadError::Internal(format!("Corrupt session record: {}", e)))
    }

    async fn update(&self, session: &UploadSession) -> Result<(), UploadError> {
        // get() first so an update on a vanished session surfaces as NotFound
        self.get(session.upload_id).await?;
        self.create(session).await
    }

    async fn delete(&self, upload_id: Uuid) -> Result<(), UploadError> {
        let key = self.session_key(upload_id);
        self.store.delete(&key).await?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<UploadSession>, UploadError> {
        let keys = self.store.list(&format!("{}/", self.prefix)).await?;
        let mut sessions = Vec::new();

        for key in keys.iter().filter(|k| k.ends_with("/session.json")) {
            match self.store.get(key).await {
                Ok(data) => match serde_json::from_slice(&data) {
                    Ok(session) => sessions.push(session),
                    Err(e) => {
                        tracing::warn!(key = %key, "Skipping corrupt session record: {}", e);
                    }
                },
                Err(e) => {
                    tracing::warn!(key = %key, "Failed to read session record: {}", e);
                }
            }
        }

        Ok(sessions)
    }
}

// ============================================================================
// Tests
// ============================================================================
