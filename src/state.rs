//! Application state management

use std::sync::Arc;

use crate::config::Config;
use crate::inference::Separator;
use crate::storage::S3Store;
use crate::upload::UploadCoordinator;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    /// Present only in S3 mode; presigning needs the SDK client
    s3: Option<S3Store>,
    coordinator: UploadCoordinator,
    separator: Option<Arc<dyn Separator>>,
}

impl AppState {
    pub fn new(
        config: Config,
        s3: Option<S3Store>,
        coordinator: UploadCoordinator,
        separator: Option<Arc<dyn Separator>>,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                config,
                s3,
                coordinator,
                separator,
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn s3(&self) -> Option<&S3Store> {
        self.inner.s3.as_ref()
    }

    pub fn coordinator(&self) -> &UploadCoordinator {
        &self.inner.coordinator
    }

    pub fn separator(&self) -> Option<&Arc<dyn Separator>> {
        self.inner.separator.as_ref()
    }

    /// Public URL for a stored key, when a CDN front is configured
    pub fn public_url(&self, key: &str) -> Option<String> {
        self.inner
            .config
            .storage
            .public_base_url
            .as_ref()
            .map(|base| format!("{}/{}", base.trim_end_matches('/'), key))
    }
}
