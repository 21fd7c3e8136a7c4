//! Stemsplit Server
//!
//! Chunked audio upload coordinator with S3-native storage, presigned
//! direct uploads, and stem separation delegated to an external
//! inference backend.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{routing::get, Router};
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod error;
mod inference;
mod routes;
mod state;
mod storage;
mod upload;

use config::{Config, StorageBackend};
use inference::{HttpSeparator, Separator};
use state::AppState;
use storage::{FsStore, ObjectStore, S3Store};
use upload::{DurableSessionStore, MemorySessionStore, SessionStore, UploadCoordinator};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stemsplit_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;

    tracing::info!("Starting Stemsplit Server v{}", env!("CARGO_PKG_VERSION"));

    // Initialize object store
    let (store, s3): (Arc<dyn ObjectStore>, Option<S3Store>) = match config.storage.backend {
        StorageBackend::S3 => {
            tracing::info!("S3 endpoint: {}", config.storage.endpoint);
            tracing::info!("S3 bucket: {}", config.storage.bucket);
            let s3 = S3Store::new(&config.storage).await?;
            (Arc::new(s3.clone()), Some(s3))
        }
        StorageBackend::Local => {
            tracing::info!("Local storage at {}", config.storage.local_path);
            (Arc::new(FsStore::new(&config.storage.local_path)), None)
        }
    };

    // Session store: durable by default so sessions survive restarts
    let sessions: Arc<dyn SessionStore> = if config.upload.durable_sessions {
        Arc::new(DurableSessionStore::new(
            store.clone(),
            config.upload.tmp_prefix.clone(),
        ))
    } else {
        tracing::warn!("In-memory session store: open uploads are lost on restart");
        Arc::new(MemorySessionStore::new())
    };

    let coordinator = UploadCoordinator::new(
        sessions,
        store.clone(),
        config.upload.tmp_prefix.clone(),
        config.upload.session_ttl_hours,
    );

    // Background reaper keeps abandoned sessions from leaking storage
    let _reaper = coordinator.start_reaper();

    // Inference backend, if configured
    let separator: Option<Arc<dyn Separator>> = match &config.inference.endpoint {
        Some(endpoint) => {
            tracing::info!("Inference endpoint: {}", endpoint);
            Some(Arc::new(HttpSeparator::new(
                endpoint.clone(),
                Duration::from_secs(config.inference.timeout_secs),
            )?))
        }
        None => {
            tracing::warn!("No inference endpoint configured; /api/v1/separate disabled");
            None
        }
    };

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid listen address: {}", e))?;
    let app_state = AppState::new(config, s3, coordinator, separator);

    // Build CORS layer
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Build router
    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        .nest(
            "/api/v1/upload",
            routes::upload::router().merge(routes::presign::router()),
        )
        .merge(routes::separate::router())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app_state);

    // Start server with graceful shutdown
    tracing::info!("Stemsplit Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown...");
        },
    }
}
