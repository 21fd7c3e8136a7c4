//! Configuration management for Stemsplit Server

use serde::Deserialize;
use std::env;

use crate::error::AppError;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub upload: UploadConfig,
    pub inference: InferenceConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub endpoint: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: Option<String>,
    /// Public base URL prepended to final keys in responses (CDN front)
    pub public_base_url: Option<String>,
    /// Base directory for the filesystem backend
    pub local_path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    S3,
    Local,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    /// Temp namespace in the store for sessions and chunks
    pub tmp_prefix: String,
    /// Whether sessions are persisted to the object store or held in memory
    pub durable_sessions: bool,
    /// Session inactivity window in hours before the reaper deletes it
    pub session_ttl_hours: i64,
    /// Presigned URL validity in seconds
    pub presign_ttl_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InferenceConfig {
    /// Endpoint of the external stem separation API, if any
    pub endpoint: Option<String>,
    pub timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 3000,
            },
            storage: StorageConfig {
                backend: StorageBackend::Local,
                endpoint: "http://localhost:9000".to_string(),
                bucket: "files".to_string(),
                access_key: String::new(),
                secret_key: String::new(),
                region: Some("us-east-1".to_string()),
                public_base_url: None,
                local_path: "./data".to_string(),
            },
            upload: UploadConfig::default(),
            inference: InferenceConfig {
                endpoint: None,
                timeout_secs: 120,
            },
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        UploadConfig {
            tmp_prefix: "tmp/uploads".to_string(),
            durable_sessions: true,
            session_ttl_hours: 24,
            presign_ttl_secs: 3600,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let backend = match env::var("STORAGE_BACKEND")
            .unwrap_or_else(|_| "s3".to_string())
            .as_str()
        {
            "local" => StorageBackend::Local,
            "s3" => StorageBackend::S3,
            other => {
                return Err(AppError::Configuration(format!(
                    "Unknown storage backend: {}",
                    other
                )))
            }
        };

        let storage = StorageConfig {
            backend,
            endpoint: env::var("S3_ENDPOINT").unwrap_or_default(),
            bucket: env::var("S3_BUCKET").unwrap_or_else(|_| "files".to_string()),
            access_key: env::var("S3_ACCESS_KEY").unwrap_or_default(),
            secret_key: env::var("S3_SECRET_KEY").unwrap_or_default(),
            region: env::var("S3_REGION").ok(),
            public_base_url: env::var("PUBLIC_BASE_URL").ok(),
            local_path: env::var("LOCAL_STORAGE_PATH").unwrap_or_else(|_| "./data".to_string()),
        };

        // S3 mode is unusable without credentials; fail at startup, not mid-upload
        if backend == StorageBackend::S3 {
            if storage.endpoint.is_empty() {
                return Err(AppError::Configuration("S3_ENDPOINT is required".into()));
            }
            if storage.access_key.is_empty() || storage.secret_key.is_empty() {
                return Err(AppError::Configuration(
                    "S3_ACCESS_KEY and S3_SECRET_KEY are required".into(),
                ));
            }
        }

        Ok(Config {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env::var("SERVER_PORT")
                    .unwrap_or_else(|_| "3000".to_string())
                    .parse()
                    .unwrap_or(3000),
            },
            storage,
            upload: UploadConfig {
                tmp_prefix: env::var("UPLOAD_TMP_PREFIX")
                    .unwrap_or_else(|_| "tmp/uploads".to_string()),
                durable_sessions: env::var("UPLOAD_DURABLE_SESSIONS")
                    .map(|v| v != "false" && v != "0")
                    .unwrap_or(true),
                session_ttl_hours: env::var("UPLOAD_SESSION_TTL_HOURS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(24),
                presign_ttl_secs: env::var("PRESIGN_TTL_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(3600),
            },
            inference: InferenceConfig {
                endpoint: env::var("INFERENCE_ENDPOINT").ok(),
                timeout_secs: env::var("INFERENCE_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(120),
            },
        })
    }
}
