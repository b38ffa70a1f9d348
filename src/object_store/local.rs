use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use super::{ObjectStore, ObjectStoreError, UrlSigner};

/// Local filesystem object store for development and testing.
///
/// Buckets are directories under `base_path`; keys may contain `/` and map to
/// nested paths. Presigned URLs point back at this service and are checked by
/// the `/objects` route.
pub struct LocalStore {
    base_path: PathBuf,
    signer: UrlSigner,
}

impl LocalStore {
    pub fn new<P: AsRef<Path>>(base_path: P, signer: UrlSigner) -> Result<Self, std::io::Error> {
        let base_path = base_path.as_ref().to_path_buf();
        std::fs::create_dir_all(&base_path)?;
        Ok(Self { base_path, signer })
    }

    pub fn signer(&self) -> &UrlSigner {
        &self.signer
    }

    fn bucket_path(&self, bucket: &str) -> Result<PathBuf, ObjectStoreError> {
        if bucket.is_empty() || bucket.contains(['/', '\\']) || bucket == "." || bucket == ".." {
            return Err(ObjectStoreError::WriteRejected(format!(
                "invalid bucket name: {bucket}"
            )));
        }
        Ok(self.base_path.join(bucket))
    }

    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf, ObjectStoreError> {
        let escapes = key.is_empty()
            || key.starts_with('/')
            || key.contains('\\')
            || key.split('/').any(|segment| segment.is_empty() || segment == "." || segment == "..");
        if escapes {
            return Err(ObjectStoreError::WriteRejected(format!("invalid object key: {key}")));
        }
        Ok(self.bucket_path(bucket)?.join(key))
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    async fn list_bucket_names(&self) -> Result<HashSet<String>, ObjectStoreError> {
        let mut names = HashSet::new();
        let mut entries = tokio::fs::read_dir(&self.base_path).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                names.insert(entry.file_name().to_string_lossy().to_string());
            }
        }
        Ok(names)
    }

    async fn create_bucket(&self, bucket: &str) -> Result<(), ObjectStoreError> {
        let path = self.bucket_path(bucket)?;
        match tokio::fs::create_dir(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                Err(ObjectStoreError::BucketAlreadyExists(bucket.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, bucket: &str, key: &str, data: Bytes) -> Result<(), ObjectStoreError> {
        let bucket_path = self.bucket_path(bucket)?;
        let exists = tokio::fs::try_exists(&bucket_path)
            .await
            .map_err(|e| write_error(key, e))?;
        if !exists {
            return Err(ObjectStoreError::WriteRejected(format!(
                "bucket does not exist: {bucket}"
            )));
        }

        let path = self.object_path(bucket, key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| write_error(key, e))?;
        }
        tokio::fs::write(&path, &data)
            .await
            .map_err(|e| write_error(key, e))
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Bytes, ObjectStoreError> {
        let path = self.object_path(bucket, key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(ObjectStoreError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn remove(&self, bucket: &str, key: &str) -> Result<(), ObjectStoreError> {
        let path = self.object_path(bucket, key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ObjectStoreError::StoreUnavailable(e.to_string())),
        }
    }

    async fn presigned_url(
        &self,
        bucket: &str,
        key: &str,
        ttl: Duration,
    ) -> Result<String, ObjectStoreError> {
        Ok(self.signer.sign(bucket, key, ttl))
    }

    async fn list_keys(&self, bucket: &str) -> Result<Vec<String>, ObjectStoreError> {
        let root = self.bucket_path(bucket)?;
        if !tokio::fs::try_exists(&root).await? {
            return Ok(Vec::new());
        }

        let mut keys = Vec::new();
        let mut pending = vec![root.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                } else if let Ok(relative) = path.strip_prefix(&root) {
                    let key = relative
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy())
                        .collect::<Vec<_>>()
                        .join("/");
                    keys.push(key);
                }
            }
        }

        keys.sort();
        Ok(keys)
    }
}

/// The filesystem refusing a path is a rejected write; anything else is
/// treated as the store being unavailable.
fn write_error(key: &str, e: std::io::Error) -> ObjectStoreError {
    match e.kind() {
        ErrorKind::PermissionDenied | ErrorKind::AlreadyExists | ErrorKind::InvalidInput => {
            ObjectStoreError::WriteRejected(format!("{key}: {e}"))
        }
        _ => ObjectStoreError::StoreUnavailable(format!("{key}: {e}")),
    }
}
