use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use album_media::{
    api,
    config::{Config, StorageBackend},
    object_store as obj,
    storage::Database,
    AppState,
};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());

    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    match log_format.to_lowercase().as_str() {
        "gcp" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_stackdriver::layer())
                .init();
        }
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_target(true)
                        .with_span_list(false),
                )
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    info!(version = env!("CARGO_PKG_VERSION"), "album-media starting");

    // Load configuration
    let config = Config::load()?;
    info!(bucket = %config.media.bucket, "Loaded configuration");

    // Initialize database
    let db = Database::open(&config.node.data_dir)?;
    info!("Database opened at: {}", config.node.data_dir);

    // Initialize object store backend
    let (object_store, url_signer): (Arc<dyn obj::ObjectStore>, Option<obj::UrlSigner>) =
        match config.storage.backend {
            StorageBackend::Local => {
                let signer = obj::UrlSigner::new(
                    &config.storage.url_signing_secret,
                    &config.node.public_base_url,
                );
                let store =
                    obj::LocalStore::new(&config.storage.local_storage_path, signer.clone())?;
                info!(
                    "Using local storage backend at: {}",
                    config.storage.local_storage_path
                );
                (Arc::new(store), Some(signer))
            }
            StorageBackend::S3 => {
                let endpoint = config
                    .storage
                    .s3_endpoint
                    .as_deref()
                    .ok_or_else(|| anyhow::anyhow!("S3_ENDPOINT is required"))?;
                let credentials = obj::S3Credentials {
                    access_key_id: config.storage.s3_access_key_id.clone().unwrap_or_default(),
                    secret_access_key: config
                        .storage
                        .s3_secret_access_key
                        .clone()
                        .unwrap_or_default(),
                    region: config.storage.s3_region.clone(),
                };
                let store = obj::S3Store::new(endpoint, credentials);
                info!("Using S3 storage backend at: {}", endpoint);
                (Arc::new(store), None)
            }
        };

    // Create shared state
    let state = Arc::new(AppState::new(config.clone(), db, object_store, url_signer));

    // Start the reconciliation sweep
    let mut background = Vec::new();
    match config.media.sweep_interval() {
        Some(interval) => {
            info!(
                interval_secs = interval.as_secs(),
                grace_secs = config.media.sweep_grace_seconds,
                "Starting reconciliation sweep"
            );
            background.push(Arc::clone(&state.sweep).spawn(interval));
        }
        None => info!("Reconciliation sweep disabled"),
    }

    // Build and start the HTTP server
    let app = api::create_router(Arc::clone(&state));
    let listener = tokio::net::TcpListener::bind(&config.node.bind_address).await?;
    info!("Listening on: {}", config.node.bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Cleanup: abort background tasks
    info!("Shutting down background tasks");
    for handle in background {
        handle.abort();
    }

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, draining connections");
}
