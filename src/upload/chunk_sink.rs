//! Chunk Sink
//!
//! Persists each incoming chunk as an independently addressable object
//! keyed by (upload_id, index), so arrival order is irrelevant and a
//! retransmitted index overwrites its predecessor without touching any
//! other chunk. Payloads are stored byte-for-byte; any transit encoding
//! is decoded before they get here.

use std::sync::Arc;

use uuid::Uuid;

use crate::storage::ObjectStore;

use super::types::UploadError;

/// Chunk persistence over the shared object store
#[derive(Clone)]
pub struct ChunkSink {
    store: Arc<dyn ObjectStore>,
    prefix: String,
}

impl ChunkSink {
    pub fn new(store: Arc<dyn ObjectStore>, prefix: String) -> Self {
        Self { store, prefix }
    }

    /// Key for one chunk. Zero-padded index keeps listings ordered.
    pub fn chunk_key(&self, upload_id: Uuid, index: usize) -> String {
        format!("{}/{}/chunks/{:08}.chunk", self.prefix, upload_id, index)
    }

    fn chunk_prefix(&self, upload_id: Uuid) -> String {
        format!("{}/{}/chunks/", self.prefix, upload_id)
    }

    /// Store a chunk; same-index re-put overwrites
    pub async fn put(
        &self,
        upload_id: Uuid,
        index: usize,
        payload: Vec<u8>,
    ) -> Result<(), UploadError> {
        let key = self.chunk_key(upload_id, index);
        let size = payload.len();

        self.store
            .put(&key, payload, "application/octet-stream")
            .await?;

        tracing::debug!(
            upload_id = %upload_id,
            chunk_index = index,
            size = size,
            "Chunk stored"
        );

        Ok(())
    }

    /// Fetch a chunk payload
    pub async fn get(&self, upload_id: Uuid, index: usize) -> Result<Vec<u8>, UploadError> {
        let key = self.chunk_key(upload_id, index);
        Ok(self.store.get(&key).await?)
    }

    /// Delete one chunk
    pub async fn delete(&self, upload_id: Uuid, index: usize) -> Result<(), UploadError> {
        let key = self.chunk_key(upload_id, index);
        self.store.delete(&key).await?;
        Ok(())
    }

    /// Delete every chunk for a session, returning the count removed
    pub async fn delete_all(&self, upload_id: Uuid) -> Result<usize, UploadError> {
        let count = self.store.delete_prefix(&self.chunk_prefix(upload_id)).await?;
        Ok(count)
    }
}
