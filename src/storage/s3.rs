//! S3-compatible storage client
//!
//! Wraps the AWS SDK for S3-compatible storage access.

use std::time::Duration;

use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    config::{Credentials, Region},
    presigning::PresigningConfig,
    primitives::ByteStream,
    Client,
};

use crate::config::StorageConfig;
use crate::error::StorageError;

use super::ObjectStore;

/// S3-compatible storage client
#[derive(Clone)]
pub struct S3Store {
    client: Client,
    bucket: String,
}

impl S3Store {
    /// Create a new S3 client from configuration
    pub async fn new(config: &StorageConfig) -> Result<Self, StorageError> {
        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "stemsplit",
        );

        let region = config
            .region
            .clone()
            .unwrap_or_else(|| "us-east-1".to_string());

        let s3_config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(&config.endpoint)
            .region(Region::new(region))
            .credentials_provider(credentials)
            .force_path_style(true) // Required for MinIO and other S3-compatible services
            .build();

        let client = Client::from_conf(s3_config);

        // Test connection by checking if bucket exists
        let bucket = config.bucket.clone();
        match client.head_bucket().bucket(&bucket).send().await {
            Ok(_) => {
                tracing::info!("Connected to S3 bucket: {}", bucket);
            }
            Err(e) => {
                tracing::warn!(
                    "Could not verify bucket {}: {}. Will attempt operations anyway.",
                    bucket,
                    e
                );
            }
        }

        Ok(Self { client, bucket })
    }

    /// Get the bucket name
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Generate a presigned PUT URL for direct client upload
    pub async fn presign_put(
        &self,
        key: &str,
        content_type: &str,
        ttl: Duration,
    ) -> Result<String, StorageError> {
        let presigning = PresigningConfig::expires_in(ttl)
            .map_err(|e| StorageError::SdkError(format!("Invalid presign TTL: {}", e)))?;

        let request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .presigned(presigning)
            .await
            .map_err(|e| StorageError::SdkError(format!("Failed to presign {}: {}", key, e)))?;

        Ok(request.uri().to_string())
    }
}

fn is_not_found(message: &str) -> bool {
    message.contains("404") || message.contains("NoSuchKey") || message.contains("NotFound")
}

#[async_trait::async_trait]
impl ObjectStore for S3Store {
    async fn put(
        &self,
        key: &str,
        data: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StorageError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| StorageError::SdkError(format!("Failed to put object {}: {}", key, e)))?;

        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let msg = e.to_string();
                if is_not_found(&msg) {
                    StorageError::ObjectNotFound(key.to_string())
                } else {
                    StorageError::SdkError(format!("Failed to get object {}: {}", key, msg))
                }
            })?;

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| StorageError::SdkError(format!("Failed to read object body: {}", e)))?
            .into_bytes()
            .to_vec();

        Ok(data)
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                StorageError::SdkError(format!("Failed to delete object {}: {}", key, e))
            })?;

        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                let msg = e.to_string();
                if is_not_found(&msg) {
                    Ok(false)
                } else {
                    Err(StorageError::SdkError(format!(
                        "Failed to head object {}: {}",
                        key, msg
                    )))
                }
            }
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let mut keys = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix)
                .max_keys(1000);

            if let Some(token) = continuation_token.take() {
                request = request.continuation_token(token);
            }

            let response = request
                .send()
                .await
                .map_err(|e| StorageError::SdkError(format!("Failed to list objects: {}", e)))?;

            keys.extend(
                response
                    .contents()
                    .iter()
                    .filter_map(|obj| obj.key().map(|s| s.to_string())),
            );

            if !response.is_truncated().unwrap_or(false) {
                break;
            }

            continuation_token = response.next_continuation_token().map(|s| s.to_string());
        }

        Ok(keys)
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<usize, StorageError> {
        let keys = self.list(prefix).await?;
        let count = keys.len();

        for key in keys {
            self.delete(&key).await?;
        }

        Ok(count)
    }
}
