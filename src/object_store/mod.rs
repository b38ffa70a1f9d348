mod local;
mod memory;
mod s3;
mod signer;

pub use local::LocalStore;
pub use memory::MemoryStore;
pub use s3::{S3Credentials, S3Store};
pub use signer::UrlSigner;

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Object store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("Write rejected: {0}")]
    WriteRejected(String),
    #[error("Access denied: {0}")]
    AccessDenied(String),
    #[error("Bucket already exists: {0}")]
    BucketAlreadyExists(String),
    #[error("Object not found: {0}")]
    NotFound(String),
}

/// Capability wrapper over an object storage backend.
///
/// Every call maps to one backend request and fails independently. Nothing here
/// retries: callers decide whether a retry is safe (removal) or not (put).
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn list_bucket_names(&self) -> Result<HashSet<String>, ObjectStoreError>;

    /// Fails with `BucketAlreadyExists` when the bucket is already there.
    async fn create_bucket(&self, bucket: &str) -> Result<(), ObjectStoreError>;

    async fn put(&self, bucket: &str, key: &str, data: Bytes) -> Result<(), ObjectStoreError>;

    async fn get(&self, bucket: &str, key: &str) -> Result<Bytes, ObjectStoreError>;

    /// Removing a missing key succeeds.
    async fn remove(&self, bucket: &str, key: &str) -> Result<(), ObjectStoreError>;

    /// Issue a time-limited URL for `key`. Backends do not check that the object
    /// exists, so only call this for a key that was just written.
    async fn presigned_url(
        &self,
        bucket: &str,
        key: &str,
        ttl: Duration,
    ) -> Result<String, ObjectStoreError>;

    /// All keys in the bucket. A missing bucket lists as empty.
    async fn list_keys(&self, bucket: &str) -> Result<Vec<String>, ObjectStoreError>;
}
