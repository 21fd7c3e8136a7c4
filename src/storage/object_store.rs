//! Object store trait
//!
//! The seam between the upload coordinator and whatever holds the
//! bytes. Both the durable session store and the chunk sink go through
//! this interface, so they work identically against S3 and the local
//! filesystem backend.

use std::time::Duration;

use crate::error::StorageError;

/// Upper bound on a single store operation during assembly
pub const STORE_OP_TIMEOUT: Duration = Duration::from_secs(30);

/// Durable key/value blob storage
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write an object. The write is atomic: readers never observe a
    /// partially written object under `key`.
    async fn put(&self, key: &str, data: Vec<u8>, content_type: &str)
        -> Result<(), StorageError>;

    /// Read an object; `ObjectNotFound` if the key does not exist
    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    /// Delete an object; deleting a missing key is not an error
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Check existence without fetching the body
    async fn exists(&self, key: &str) -> Result<bool, StorageError>;

    /// List all keys under a prefix
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    /// Delete every object under a prefix, returning the count removed
    async fn delete_prefix(&self, prefix: &str) -> Result<usize, StorageError>;
}
