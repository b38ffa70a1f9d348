//! album-media - Album records with media objects kept consistent across stores
//!
//! This crate provides album management with attached media files:
//! - Swappable object storage backends (local filesystem, S3-compatible)
//! - redb embedded database for album and media records (ACID, MVCC, crash-safe)
//! - A media coordinator that orders object writes and record commits so that
//!   no media row ever points at a missing object
//! - A reconciliation sweep that removes orphaned objects
//! - REST API with multipart upload support

pub mod api;
pub mod config;
pub mod media;
pub mod object_store;
pub mod storage;
#[cfg(test)]
pub mod testutil;

use std::sync::Arc;

use config::Config;
use media::{MediaCoordinator, ReconciliationSweep};
use object_store::{ObjectStore, UrlSigner};
use storage::Database;

/// Shared application state
pub struct AppState {
    pub config: Config,
    pub db: Database,
    pub object_store: Arc<dyn ObjectStore>,
    pub coordinator: MediaCoordinator,
    pub sweep: Arc<ReconciliationSweep>,
    /// Present when the backend issues URLs served by this process
    pub url_signer: Option<UrlSigner>,
}

impl AppState {
    pub fn new(
        config: Config,
        db: Database,
        object_store: Arc<dyn ObjectStore>,
        url_signer: Option<UrlSigner>,
    ) -> Self {
        let coordinator =
            MediaCoordinator::new(db.clone(), Arc::clone(&object_store), &config.media);
        let sweep = Arc::new(ReconciliationSweep::new(
            db.clone(),
            Arc::clone(&object_store),
            &config.media.bucket,
            config.media.sweep_grace(),
        ));

        Self {
            config,
            db,
            object_store,
            coordinator,
            sweep,
            url_signer,
        }
    }
}
