//! Shared test helpers for album-media unit tests.

use std::sync::Arc;

use crate::config::{Config, MediaConfig, NodeConfig, StorageConfig};
use crate::object_store::MemoryStore;
use crate::storage::Database;
use crate::AppState;

/// Create a test AppState with a temporary database and an in-memory object store.
pub fn test_state(temp_dir: &tempfile::TempDir) -> (Arc<AppState>, Arc<MemoryStore>) {
    let data_dir = temp_dir.path().join("data");

    let config = Config {
        node: NodeConfig {
            bind_address: "127.0.0.1:0".to_string(),
            data_dir: data_dir.to_string_lossy().to_string(),
            public_base_url: "http://localhost".to_string(),
        },
        storage: StorageConfig::default(),
        media: MediaConfig {
            remove_attempts: 1,
            ..MediaConfig::default()
        },
        test_mode: true,
        max_upload_size: 10 * 1024 * 1024, // 10MB for tests
    };

    let db = Database::open(&data_dir).expect("Failed to open test database");
    let store = Arc::new(MemoryStore::new());

    let state = Arc::new(AppState::new(config, db, store.clone(), None));
    (state, store)
}
