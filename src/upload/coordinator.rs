//! Upload Coordinator
//!
//! Public operation surface for chunked uploads: `init`, `put_chunk`,
//! `finalize`. Enforces the session state machine
//! (Open -> Finalizing -> Complete, Aborted on failure) and guarantees
//! at most one active finalize per upload id.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::storage::ObjectStore;

use super::assembler::Assembler;
use super::chunk_sink::ChunkSink;
use super::session::SessionStore;
use super::types::{SessionStatus, UploadError, UploadSession};

/// Reaper sweep interval
const REAPER_INTERVAL_SECS: u64 = 300;

#[derive(Clone)]
pub struct UploadCoordinator {
    inner: Arc<CoordinatorInner>,
}

struct CoordinatorInner {
    sessions: Arc<dyn SessionStore>,
    chunks: ChunkSink,
    assembler: Assembler,
    /// Upload ids with a finalize in flight in this process
    finalizing: Mutex<HashSet<Uuid>>,
    session_ttl_hours: i64,
}

impl UploadCoordinator {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        store: Arc<dyn ObjectStore>,
        tmp_prefix: String,
        session_ttl_hours: i64,
    ) -> Self {
        let chunks = ChunkSink::new(store.clone(), tmp_prefix);
        let assembler = Assembler::new(sessions.clone(), chunks.clone(), store);

        Self {
            inner: Arc::new(CoordinatorInner {
                sessions,
                chunks,
                assembler,
                finalizing: Mutex::new(HashSet::new()),
                session_ttl_hours,
            }),
        }
    }

    // ========================================================================
    // Operations
    // ========================================================================

    /// Open a new upload session. Returns the session and the final
    /// key the assembled object will occupy (nothing exists there yet).
    pub async fn init(
        &self,
        filename: &str,
        content_type: &str,
    ) -> Result<UploadSession, UploadError> {
        let target_key = make_target_key(filename);

        let session = UploadSession::new(
            target_key,
            content_type.to_string(),
            filename.to_string(),
            self.inner.session_ttl_hours,
        );

        self.inner.sessions.create(&session).await?;

        tracing::info!(
            upload_id = %session.upload_id,
            filename = %filename,
            key = %session.target_key,
            "Upload session opened"
        );

        Ok(session)
    }

    /// Store one chunk. Valid only while the session is Open; does not
    /// change session status.
    pub async fn put_chunk(
        &self,
        upload_id: Uuid,
        index: usize,
        payload: Vec<u8>,
    ) -> Result<(), UploadError> {
        let session = self.inner.sessions.get(upload_id).await?;

        if session.status != SessionStatus::Open || session.is_expired() {
            return Err(UploadError::InvalidSession {
                id: upload_id.to_string(),
                status: session.status,
            });
        }

        self.inner.chunks.put(upload_id, index, payload).await
    }

    /// Assemble the declared number of chunks into the final object.
    ///
    /// Success deletes the session and its chunks and returns
    /// (final_key, total_size). Failure leaves the session Aborted with
    /// chunks intact. A concurrent second call on the same id fails
    /// fast with `FinalizeInProgress`.
    pub async fn finalize(
        &self,
        upload_id: Uuid,
        total_chunks: usize,
    ) -> Result<(String, u64), UploadError> {
        // In-process gate first: cheap fail-fast before touching the store
        {
            let mut finalizing = self.inner.finalizing.lock().await;
            if !finalizing.insert(upload_id) {
                return Err(UploadError::FinalizeInProgress(upload_id.to_string()));
            }
        }

        let result = self.finalize_inner(upload_id, total_chunks).await;

        {
            let mut finalizing = self.inner.finalizing.lock().await;
            finalizing.remove(&upload_id);
        }

        result
    }

    async fn finalize_inner(
        &self,
        upload_id: Uuid,
        total_chunks: usize,
    ) -> Result<(String, u64), UploadError> {
        let mut session = self.inner.sessions.get(upload_id).await?;

        match session.status {
            // Retry after a failed finalize is allowed; chunks are intact
            SessionStatus::Open | SessionStatus::Aborted => {}
            SessionStatus::Finalizing => {
                // Another instance holds this session
                return Err(UploadError::FinalizeInProgress(upload_id.to_string()));
            }
            SessionStatus::Complete => {
                return Err(UploadError::InvalidSession {
                    id: upload_id.to_string(),
                    status: session.status,
                });
            }
        }

        session.status = SessionStatus::Finalizing;
        self.inner.sessions.update(&session).await?;

        match self.inner.assembler.assemble(upload_id, total_chunks).await {
            Ok((key, size)) => {
                // Session is gone; Complete is terminal and unobservable
                tracing::info!(
                    upload_id = %upload_id,
                    key = %key,
                    size = size,
                    "Upload finalized"
                );
                Ok((key, size))
            }
            Err(e) => {
                session.status = SessionStatus::Aborted;
                if let Err(update_err) = self.inner.sessions.update(&session).await {
                    tracing::warn!(
                        upload_id = %upload_id,
                        "Failed to mark session aborted: {}",
                        update_err
                    );
                }
                tracing::warn!(upload_id = %upload_id, "Finalize failed: {}", e);
                Err(e)
            }
        }
    }

    // ========================================================================
    // Retention
    // ========================================================================

    /// Delete sessions past their TTL along with their chunks.
    ///
    /// Returns the number of sessions reaped. Sessions mid-finalize are
    /// skipped; they either complete (and self-delete) or abort (and
    /// get reaped on a later sweep).
    pub async fn reap_expired(&self) -> usize {
        let sessions = match self.inner.sessions.list().await {
            Ok(sessions) => sessions,
            Err(e) => {
                tracing::warn!("Reaper could not list sessions: {}", e);
                return 0;
            }
        };

        let now = Utc::now();
        let mut reaped = 0;

        for session in sessions {
            if session.expires_at >= now || session.status == SessionStatus::Finalizing {
                continue;
            }

            let id = session.upload_id;
            if let Err(e) = self.inner.chunks.delete_all(id).await {
                tracing::warn!(upload_id = %id, "Reaper failed to delete chunks: {}", e);
                continue;
            }
            if let Err(e) = self.inner.sessions.delete(id).await {
                tracing::warn!(upload_id = %id, "Reaper failed to delete session: {}", e);
                continue;
            }

            tracing::debug!(
                upload_id = %id,
                filename = %session.original_filename,
                "Reaped expired upload session"
            );
            reaped += 1;
        }

        if reaped > 0 {
            tracing::info!(count = reaped, "Reaped expired upload sessions");
        }

        reaped
    }

    /// Start the background reaper task
    pub fn start_reaper(&self) -> tokio::task::JoinHandle<()> {
        let coordinator = self.clone();
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_secs(REAPER_INTERVAL_SECS));

            loop {
                interval.tick().await;
                coordinator.reap_expired().await;
            }
        })
    }
}

/// Final key for an uploaded file:
/// `audio/uploads/{timestamp}_{hash8}_{sanitized filename}`
pub fn make_target_key(filename: &str) -> String {
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
    let mut hasher = Sha256::new();
    hasher.update(format!("{}{}", timestamp, filename));
    let digest = hex::encode(hasher.finalize());

    format!(
        "audio/uploads/{}_{}_{}",
        timestamp,
        &digest[..8],
        sanitize_filename(filename)
    )
}

/// Keep alphanumerics, dot, dash, underscore; everything else becomes `_`
fn sanitize_filename(filename: &str) -> String {
    let cleaned: String = filename
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if cleaned.is_empty() {
        "audio.mp3".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::FsStore;
    use crate::upload::session::MemorySessionStore;
    use tempfile::TempDir;

    fn coordinator(temp: &TempDir) -> (UploadCoordinator, Arc<FsStore>) {
        let store = Arc::new(FsStore::new(temp.path()));
        let sessions = Arc::new(MemorySessionStore::new());
        let coordinator = UploadCoordinator::new(
            sessions,
            store.clone(),
            "tmp/uploads".to_string(),
            24,
        );
        (coordinator, store)
    }

    #[tokio::test]
    async fn test_example_scenario() {
        // init -> out-of-order chunks -> finalize -> b"AAAABBBB"
        let temp = TempDir::new().unwrap();
        let (coordinator, store) = coordinator(&temp);

        let session = coordinator.init("a.mp3", "audio/mpeg").await.unwrap();
        let id = session.upload_id;

        coordinator.put_chunk(id, 1, b"BBBB".to_vec()).await.unwrap();
        coordinator.put_chunk(id, 0, b"AAAA".to_vec()).await.unwrap();

        let (key, size) = coordinator.finalize(id, 2).await.unwrap();
        assert_eq!(size, 8);

        let data = store.get(&key).await.unwrap();
        assert_eq!(data, b"AAAABBBB");

        // Session gone: both follow-up operations report SessionNotFound
        assert!(matches!(
            coordinator.put_chunk(id, 0, vec![0]).await,
            Err(UploadError::SessionNotFound(_))
        ));
        assert!(matches!(
            coordinator.finalize(id, 2).await,
            Err(UploadError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_arrival_order_permutations() {
        let payloads: [&[u8]; 3] = [b"one-", b"two-", b"three"];
        let orders = [
            [0usize, 1, 2],
            [0, 2, 1],
            [1, 0, 2],
            [1, 2, 0],
            [2, 0, 1],
            [2, 1, 0],
        ];

        for order in orders {
            let temp = TempDir::new().unwrap();
            let (coordinator, store) = coordinator(&temp);

            let session = coordinator.init("p.mp3", "audio/mpeg").await.unwrap();
            for &i in &order {
                coordinator
                    .put_chunk(session.upload_id, i, payloads[i].to_vec())
                    .await
                    .unwrap();
            }

            let (key, _) = coordinator.finalize(session.upload_id, 3).await.unwrap();
            let data = store.get(&key).await.unwrap();
            assert_eq!(data, b"one-two-three", "order {:?}", order);
        }
    }

    #[tokio::test]
    async fn test_resubmitted_chunk_overwrites() {
        let temp = TempDir::new().unwrap();
        let (coordinator, store) = coordinator(&temp);

        let session = coordinator.init("r.mp3", "audio/mpeg").await.unwrap();
        let id = session.upload_id;

        coordinator.put_chunk(id, 0, b"old!".to_vec()).await.unwrap();
        coordinator.put_chunk(id, 1, b"tail".to_vec()).await.unwrap();
        coordinator.put_chunk(id, 0, b"new!".to_vec()).await.unwrap();

        let (key, _) = coordinator.finalize(id, 2).await.unwrap();
        let data = store.get(&key).await.unwrap();
        assert_eq!(data, b"new!tail");
    }

    #[tokio::test]
    async fn test_failed_finalize_aborts_and_keeps_chunks() {
        let temp = TempDir::new().unwrap();
        let (coordinator, store) = coordinator(&temp);

        let session = coordinator.init("m.mp3", "audio/mpeg").await.unwrap();
        let id = session.upload_id;

        coordinator.put_chunk(id, 0, b"AA".to_vec()).await.unwrap();
        // Index 1 never arrives

        let result = coordinator.finalize(id, 2).await;
        assert!(matches!(
            result,
            Err(UploadError::IncompleteUpload { .. })
        ));

        // No object under the target key
        assert!(!store.exists(&session.target_key).await.unwrap());

        // Session is Aborted now; put_chunk is rejected
        assert!(matches!(
            coordinator.put_chunk(id, 1, b"BB".to_vec()).await,
            Err(UploadError::InvalidSession { .. })
        ));
    }

    #[tokio::test]
    async fn test_finalize_retry_after_abort_succeeds() {
        let temp = TempDir::new().unwrap();
        let (coordinator, store) = coordinator(&temp);

        let session = coordinator.init("retry.mp3", "audio/mpeg").await.unwrap();
        let id = session.upload_id;

        coordinator.put_chunk(id, 0, b"AA".to_vec()).await.unwrap();
        assert!(coordinator.finalize(id, 2).await.is_err());

        // Repair by storing the missing chunk directly; the session is
        // Aborted so put_chunk is closed, but the chunks are intact and
        // finalize from Aborted is permitted
        let backing: Arc<dyn ObjectStore> = store.clone();
        let sink = ChunkSink::new(backing, "tmp/uploads".to_string());
        sink.put(id, 1, b"BB".to_vec()).await.unwrap();

        let (key, size) = coordinator.finalize(id, 2).await.unwrap();
        assert_eq!(size, 4);
        assert_eq!(store.get(&key).await.unwrap(), b"AABB");
    }

    #[tokio::test]
    async fn test_concurrent_finalize_exactly_one_wins() {
        let temp = TempDir::new().unwrap();
        let (coordinator, store) = coordinator(&temp);

        let session = coordinator.init("c.mp3", "audio/mpeg").await.unwrap();
        let id = session.upload_id;

        for i in 0..20usize {
            coordinator.put_chunk(id, i, vec![i as u8; 64]).await.unwrap();
        }

        let a = {
            let c = coordinator.clone();
            tokio::spawn(async move { c.finalize(id, 20).await })
        };
        let b = {
            let c = coordinator.clone();
            tokio::spawn(async move { c.finalize(id, 20).await })
        };

        let ra = a.await.unwrap();
        let rb = b.await.unwrap();

        let (ok, err) = match (ra, rb) {
            (Ok(ok), Err(err)) | (Err(err), Ok(ok)) => (ok, err),
            (Ok(_), Ok(_)) => panic!("both finalize calls succeeded"),
            (Err(ea), Err(eb)) => panic!("both finalize calls failed: {} / {}", ea, eb),
        };

        assert!(matches!(
            err,
            UploadError::FinalizeInProgress(_) | UploadError::SessionNotFound(_)
        ));

        let (key, size) = ok;
        assert_eq!(size, 20 * 64);
        assert!(store.exists(&key).await.unwrap());
    }

    #[tokio::test]
    async fn test_reaper_removes_expired_sessions() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(FsStore::new(temp.path()));
        let sessions = Arc::new(MemorySessionStore::new());
        let coordinator = UploadCoordinator::new(
            sessions.clone(),
            store.clone(),
            "tmp/uploads".to_string(),
            0, // TTL of zero hours: everything is expired immediately
        );

        let session = coordinator.init("old.mp3", "audio/mpeg").await.unwrap();
        let id = session.upload_id;
        // Session is already expired, so put_chunk refuses; store a
        // chunk through the sink to give the reaper something to sweep
        let backing: Arc<dyn ObjectStore> = store.clone();
        let sink = ChunkSink::new(backing, "tmp/uploads".to_string());
        sink.put(id, 0, b"stale".to_vec()).await.unwrap();

        let reaped = coordinator.reap_expired().await;
        assert_eq!(reaped, 1);

        assert!(sessions.get(id).await.is_err());
        assert!(sink.get(id, 0).await.is_err());
    }

    #[test]
    fn test_target_key_shape() {
        let key = make_target_key("my song.mp3");
        assert!(key.starts_with("audio/uploads/"));
        assert!(key.ends_with("_my_song.mp3"));
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("a b/c.mp3"), "a_b_c.mp3");
        assert_eq!(sanitize_filename(""), "audio.mp3");
        assert_eq!(sanitize_filename("ok-1_2.wav"), "ok-1_2.wav");
    }
}
