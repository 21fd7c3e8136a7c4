//! Local filesystem storage backend
//!
//! Keys map directly to paths under a base directory. Used for
//! development deployments without an S3 endpoint and as the test
//! backend. Content types are not persisted.

use std::path::{Path, PathBuf};

use crate::error::StorageError;

use super::ObjectStore;

/// Filesystem-backed object store
#[derive(Clone)]
pub struct FsStore {
    base_path: PathBuf,
}

impl FsStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.base_path.join(key)
    }
}

/// Recursively collect file paths under a directory
fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_files(&path, out)?;
        } else {
            out.push(path);
        }
    }
    Ok(())
}

#[async_trait::async_trait]
impl ObjectStore for FsStore {
    async fn put(
        &self,
        key: &str,
        data: Vec<u8>,
        _content_type: &str,
    ) -> Result<(), StorageError> {
        let path = self.key_path(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::SdkError(e.to_string()))?;
        }

        // Write to a sibling temp file and rename so readers never see
        // a partially written object under the final key
        let tmp = PathBuf::from(format!("{}.part", path.display()));
        tokio::fs::write(&tmp, &data)
            .await
            .map_err(|e| StorageError::SdkError(e.to_string()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| StorageError::SdkError(e.to_string()))?;

        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.key_path(key);
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::ObjectNotFound(key.to_string()))
            }
            Err(e) => Err(StorageError::SdkError(format!(
                "Failed to read {}: {}",
                key, e
            ))),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let path = self.key_path(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::SdkError(format!(
                "Failed to delete {}: {}",
                key, e
            ))),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.key_path(key).exists())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let root = self.key_path(prefix);
        let dir = if root.is_dir() {
            root
        } else {
            // Prefix may be a partial path component; list from its parent
            match root.parent() {
                Some(p) if p.is_dir() => p.to_path_buf(),
                _ => return Ok(Vec::new()),
            }
        };

        let mut files = Vec::new();
        collect_files(&dir, &mut files).map_err(|e| StorageError::SdkError(e.to_string()))?;

        let mut keys: Vec<String> = files
            .into_iter()
            .filter_map(|p| {
                p.strip_prefix(&self.base_path)
                    .ok()
                    .map(|rel| rel.to_string_lossy().replace('\\', "/"))
            })
            .filter(|k| k.starts_with(prefix))
            .collect();
        keys.sort();

        Ok(keys)
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<usize, StorageError> {
        let keys = self.list(prefix).await?;
        let count = keys.len();

        for key in &keys {
            self.delete(key).await?;
        }

        // Drop the now-empty directory if the prefix named one
        let dir = self.key_path(prefix);
        if dir.is_dir() {
            let _ = tokio::fs::remove_dir_all(&dir).await;
        }

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let temp = TempDir::new().unwrap();
        let store = FsStore::new(temp.path());

        store
            .put("a/b/c.bin", b"hello".to_vec(), "application/octet-stream")
            .await
            .unwrap();

        let data = store.get("a/b/c.bin").await.unwrap();
        assert_eq!(data, b"hello");
        assert!(store.exists("a/b/c.bin").await.unwrap());
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let temp = TempDir::new().unwrap();
        let store = FsStore::new(temp.path());

        let result = store.get("nope.bin").await;
        assert!(matches!(result, Err(StorageError::ObjectNotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let store = FsStore::new(temp.path());

        store.put("x.bin", vec![1, 2, 3], "").await.unwrap();
        store.delete("x.bin").await.unwrap();
        store.delete("x.bin").await.unwrap();
        assert!(!store.exists("x.bin").await.unwrap());
    }

    #[tokio::test]
    async fn test_list_and_delete_prefix() {
        let temp = TempDir::new().unwrap();
        let store = FsStore::new(temp.path());

        store.put("tmp/u1/0.chunk", vec![0], "").await.unwrap();
        store.put("tmp/u1/1.chunk", vec![1], "").await.unwrap();
        store.put("tmp/u2/0.chunk", vec![2], "").await.unwrap();

        let keys = store.list("tmp/u1/").await.unwrap();
        assert_eq!(keys, vec!["tmp/u1/0.chunk", "tmp/u1/1.chunk"]);

        let removed = store.delete_prefix("tmp/u1/").await.unwrap();
        assert_eq!(removed, 2);
        assert!(store.list("tmp/u1/").await.unwrap().is_empty());
        assert!(store.exists("tmp/u2/0.chunk").await.unwrap());
    }
}
