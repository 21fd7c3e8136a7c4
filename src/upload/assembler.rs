//! Assembler
//!
//! Turns a session's stored chunks into the final object: fetches all
//! expected chunks concurrently under a fixed worker budget, orders
//! them by index, concatenates, writes the result to the session's
//! target key in one put, then reclaims the transient chunk and
//! session state.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio::time::timeout;
use uuid::Uuid;

use crate::storage::{ObjectStore, STORE_OP_TIMEOUT};

use super::chunk_sink::ChunkSink;
use super::session::SessionStore;
use super::types::{UploadError, ASSEMBLY_WORKERS};

pub struct Assembler {
    sessions: Arc<dyn SessionStore>,
    chunks: ChunkSink,
    store: Arc<dyn ObjectStore>,
}

impl Assembler {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        chunks: ChunkSink,
        store: Arc<dyn ObjectStore>,
    ) -> Self {
        Self {
            sessions,
            chunks,
            store,
        }
    }

    /// Assemble all chunks of a session into its target key.
    ///
    /// Returns the final key and total byte size. Any missing index
    /// fails the whole call with `IncompleteUpload` before anything is
    /// written; a fetch timeout aborts the call rather than
    /// substituting empty data.
    pub async fn assemble(
        &self,
        upload_id: Uuid,
        total_chunks: usize,
    ) -> Result<(String, u64), UploadError> {
        let session = self.sessions.get(upload_id).await?;

        // Phase 1: concurrent bounded fetch, joined before assembly
        let fetched: Vec<(usize, Result<Vec<u8>, UploadError>)> =
            stream::iter(0..total_chunks)
                .map(|index| {
                    let chunks = self.chunks.clone();
                    async move {
                        let result = match timeout(
                            STORE_OP_TIMEOUT,
                            chunks.get(upload_id, index),
                        )
                        .await
                        {
                            Ok(r) => r,
                            Err(_) => Err(UploadError::Timeout(format!(
                                "chunk fetch {} for {}",
                                index, upload_id
                            ))),
                        };
                        (index, result)
                    }
                })
                .buffer_unordered(ASSEMBLY_WORKERS)
                .collect()
                .await;

        let mut payloads: Vec<Option<Vec<u8>>> = Vec::new();
        payloads.resize_with(total_chunks, || None);
        let mut missing = Vec::new();

        for (index, result) in fetched {
            match result {
                Ok(data) => payloads[index] = Some(data),
                Err(UploadError::Storage(crate::error::StorageError::ObjectNotFound(_))) => {
                    missing.push(index);
                }
                Err(e) => return Err(e),
            }
        }

        if !missing.is_empty() {
            missing.sort_unstable();
            return Err(UploadError::IncompleteUpload { missing });
        }

        // Phase 2: strict ascending-index concatenation
        let total_size: usize = payloads.iter().flatten().map(Vec::len).sum();
        let mut assembled = Vec::with_capacity(total_size);
        for payload in payloads.into_iter().flatten() {
            assembled.extend_from_slice(&payload);
        }

        // Phase 3: one atomic put under the final key
        timeout(
            STORE_OP_TIMEOUT,
            self.store
                .put(&session.target_key, assembled, &session.content_type),
        )
        .await
        .map_err(|_| UploadError::Timeout(format!("final put for {}", upload_id)))??;

        tracing::info!(
            upload_id = %upload_id,
            key = %session.target_key,
            size = total_size,
            chunks = total_chunks,
            "Assembled final object"
        );

        // Phase 4: best-effort concurrent cleanup. The final object is
        // already durable; a stray temp object is cleanup debt, not a
        // correctness problem.
        self.cleanup(upload_id, total_chunks).await;

        Ok((session.target_key, total_size as u64))
    }

    /// Delete every chunk and the session metadata, logging failures.
    /// Each delete carries the same bounded timeout as the fetches; a
    /// hung delete must not stall the finalize response.
    async fn cleanup(&self, upload_id: Uuid, total_chunks: usize) {
        let results: Vec<(usize, Result<(), UploadError>)> = stream::iter(0..total_chunks)
            .map(|index| {
                let chunks = self.chunks.clone();
                async move {
                    let result = match timeout(
                        STORE_OP_TIMEOUT,
                        chunks.delete(upload_id, index),
                    )
                    .await
                    {
                        Ok(r) => r,
                        Err(_) => Err(UploadError::Timeout(format!(
                            "chunk delete {} for {}",
                            index, upload_id
                        ))),
                    };
                    (index, result)
                }
            })
            .buffer_unordered(ASSEMBLY_WORKERS)
            .collect()
            .await;

        for (index, result) in results {
            if let Err(e) = result {
                tracing::warn!(
                    upload_id = %upload_id,
                    chunk_index = index,
                    "Failed to delete chunk: {}",
                    e
                );
            }
        }

        match timeout(STORE_OP_TIMEOUT, self.sessions.delete(upload_id)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(upload_id = %upload_id, "Failed to delete session: {}", e);
            }
            Err(_) => {
                tracing::warn!(upload_id = %upload_id, "Session delete timed out");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::FsStore;
    use crate::upload::session::MemorySessionStore;
    use crate::upload::types::UploadSession;
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        assembler: Assembler,
        sessions: Arc<MemorySessionStore>,
        chunks: ChunkSink,
        store: Arc<FsStore>,
    }

    async fn fixture() -> (Fixture, Uuid) {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(FsStore::new(temp.path()));
        let sessions = Arc::new(MemorySessionStore::new());
        let chunks = ChunkSink::new(store.clone(), "tmp/uploads".to_string());

        let session = UploadSession::new(
            "audio/uploads/final.mp3".to_string(),
            "audio/mpeg".to_string(),
            "final.mp3".to_string(),
            24,
        );
        let id = session.upload_id;
        sessions.create(&session).await.unwrap();

        let assembler = Assembler::new(sessions.clone(), chunks.clone(), store.clone());

        (
            Fixture {
                _temp: temp,
                assembler,
                sessions,
                chunks,
                store,
            },
            id,
        )
    }

    #[tokio::test]
    async fn test_assembles_in_index_order_regardless_of_arrival() {
        let (fx, id) = fixture().await;

        // Arrival order 2, 0, 1
        fx.chunks.put(id, 2, b"CC".to_vec()).await.unwrap();
        fx.chunks.put(id, 0, b"AA".to_vec()).await.unwrap();
        fx.chunks.put(id, 1, b"BB".to_vec()).await.unwrap();

        let (key, size) = fx.assembler.assemble(id, 3).await.unwrap();
        assert_eq!(key, "audio/uploads/final.mp3");
        assert_eq!(size, 6);

        let data = fx.store.get("audio/uploads/final.mp3").await.unwrap();
        assert_eq!(data, b"AABBCC");
    }

    #[tokio::test]
    async fn test_missing_index_fails_without_partial_write() {
        let (fx, id) = fixture().await;

        fx.chunks.put(id, 0, b"AA".to_vec()).await.unwrap();
        fx.chunks.put(id, 1, b"BB".to_vec()).await.unwrap();
        fx.chunks.put(id, 2, b"CC".to_vec()).await.unwrap();
        fx.chunks.put(id, 4, b"EE".to_vec()).await.unwrap();

        let result = fx.assembler.assemble(id, 5).await;
        match result {
            Err(UploadError::IncompleteUpload { missing }) => assert_eq!(missing, vec![3]),
            other => panic!("expected IncompleteUpload, got {:?}", other.map(|_| ())),
        }

        // No partial object under the target key
        assert!(!fx.store.exists("audio/uploads/final.mp3").await.unwrap());
        // Chunks left in place for inspection
        assert_eq!(fx.chunks.get(id, 0).await.unwrap(), b"AA");
    }

    #[tokio::test]
    async fn test_cleanup_removes_chunks_and_session() {
        let (fx, id) = fixture().await;

        fx.chunks.put(id, 0, b"AAAA".to_vec()).await.unwrap();
        fx.chunks.put(id, 1, b"BBBB".to_vec()).await.unwrap();

        fx.assembler.assemble(id, 2).await.unwrap();

        assert!(fx.chunks.get(id, 0).await.is_err());
        assert!(fx.chunks.get(id, 1).await.is_err());
        assert!(matches!(
            fx.sessions.get(id).await,
            Err(UploadError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_session_fails() {
        let (fx, _) = fixture().await;
        let result = fx.assembler.assemble(Uuid::new_v4(), 1).await;
        assert!(matches!(result, Err(UploadError::SessionNotFound(_))));
    }

    /// In-memory store whose deletes never complete
    #[derive(Default)]
    struct StuckDeleteStore {
        objects: std::sync::Mutex<std::collections::HashMap<String, Vec<u8>>>,
    }

    #[async_trait::async_trait]
    impl crate::storage::ObjectStore for StuckDeleteStore {
        async fn put(
            &self,
            key: &str,
            data: Vec<u8>,
            _content_type: &str,
        ) -> Result<(), crate::error::StorageError> {
            self.objects.lock().unwrap().insert(key.to_string(), data);
            Ok(())
        }

        async fn get(&self, key: &str) -> Result<Vec<u8>, crate::error::StorageError> {
            self.objects
                .lock()
                .unwrap()
                .get(key)
                .cloned()
                .ok_or_else(|| crate::error::StorageError::ObjectNotFound(key.to_string()))
        }

        async fn delete(&self, _key: &str) -> Result<(), crate::error::StorageError> {
            std::future::pending().await
        }

        async fn exists(&self, key: &str) -> Result<bool, crate::error::StorageError> {
            Ok(self.objects.lock().unwrap().contains_key(key))
        }

        async fn list(&self, prefix: &str) -> Result<Vec<String>, crate::error::StorageError> {
            Ok(self
                .objects
                .lock()
                .unwrap()
                .keys()
                .filter(|k| k.starts_with(prefix))
                .cloned()
                .collect())
        }

        async fn delete_prefix(&self, _prefix: &str) -> Result<usize, crate::error::StorageError> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_finalize_survives_hung_cleanup_deletes() {
        let store: Arc<dyn crate::storage::ObjectStore> = Arc::new(StuckDeleteStore::default());
        let sessions = Arc::new(MemorySessionStore::new());
        let chunks = ChunkSink::new(store.clone(), "tmp/uploads".to_string());

        let session = UploadSession::new(
            "audio/uploads/final.mp3".to_string(),
            "audio/mpeg".to_string(),
            "final.mp3".to_string(),
            24,
        );
        let id = session.upload_id;
        sessions.create(&session).await.unwrap();

        chunks.put(id, 0, b"AAAA".to_vec()).await.unwrap();
        chunks.put(id, 1, b"BBBB".to_vec()).await.unwrap();

        let assembler = Assembler::new(sessions.clone(), chunks.clone(), store.clone());

        // Deletes hang forever; assembly must still return once the
        // object is durable, bounded by the per-operation timeout.
        let (key, size) = assembler.assemble(id, 2).await.unwrap();
        assert_eq!(key, "audio/uploads/final.mp3");
        assert_eq!(size, 8);
        assert_eq!(
            store.get("audio/uploads/final.mp3").await.unwrap(),
            b"AAAABBBB"
        );
    }

    #[tokio::test]
    async fn test_single_byte_chunks_many_workers() {
        let (fx, id) = fixture().await;

        // More chunks than the worker budget
        for i in 0..32usize {
            fx.chunks.put(id, i, vec![i as u8]).await.unwrap();
        }

        let (_, size) = fx.assembler.assemble(id, 32).await.unwrap();
        assert_eq!(size, 32);

        let data = fx.store.get("audio/uploads/final.mp3").await.unwrap();
        let expected: Vec<u8> = (0..32).collect();
        assert_eq!(data, expected);
    }
}
