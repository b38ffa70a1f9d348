use std::sync::Arc;

use tracing::{debug, info};

use crate::object_store::{ObjectStore, ObjectStoreError};

/// Idempotent bucket provisioning.
pub struct BucketManager {
    store: Arc<dyn ObjectStore>,
}

impl BucketManager {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Make sure `bucket` exists. Safe to call concurrently: losing the creation
    /// race to another caller counts as success.
    pub async fn ensure_bucket(&self, bucket: &str) -> Result<(), ObjectStoreError> {
        let names = self.store.list_bucket_names().await?;
        if names.contains(bucket) {
            return Ok(());
        }

        match self.store.create_bucket(bucket).await {
            Ok(()) => {
                info!(bucket, "Created media bucket");
                Ok(())
            }
            Err(ObjectStoreError::BucketAlreadyExists(_)) => {
                debug!(bucket, "Bucket created concurrently");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
