use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use super::{ObjectStore, ObjectStoreError};

/// In-memory object store with fault injection, used as a test double.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    buckets: HashMap<String, BTreeMap<String, Bytes>>,
    failing_puts: HashSet<String>,
    failing_removes: HashSet<String>,
    unavailable: bool,
    deny_bucket_creation: bool,
    create_bucket_calls: usize,
    put_calls: Vec<String>,
    remove_calls: Vec<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        // A panicking test thread must not hide the store from the others.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Every `put` of `key` fails with `WriteRejected` until healed.
    pub fn fail_put(&self, key: &str) {
        self.state().failing_puts.insert(key.to_string());
    }

    /// Every `remove` of `key` fails with `StoreUnavailable` until healed.
    pub fn fail_remove(&self, key: &str) {
        self.state().failing_removes.insert(key.to_string());
    }

    /// Listing and bucket creation fail with `StoreUnavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state().unavailable = unavailable;
    }

    /// Bucket creation fails with `AccessDenied`.
    pub fn deny_bucket_creation(&self) {
        self.state().deny_bucket_creation = true;
    }

    pub fn heal(&self) {
        let mut state = self.state();
        state.failing_puts.clear();
        state.failing_removes.clear();
        state.unavailable = false;
        state.deny_bucket_creation = false;
    }

    /// Place an object directly, bypassing fault injection and call tracking.
    pub fn insert_object(&self, bucket: &str, key: &str, data: impl Into<Bytes>) {
        self.state()
            .buckets
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), data.into());
    }

    pub fn contains(&self, bucket: &str, key: &str) -> bool {
        self.state()
            .buckets
            .get(bucket)
            .is_some_and(|objects| objects.contains_key(key))
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<Bytes> {
        self.state().buckets.get(bucket)?.get(key).cloned()
    }

    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.state()
            .buckets
            .get(bucket)
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn bucket_count(&self) -> usize {
        self.state().buckets.len()
    }

    pub fn create_bucket_calls(&self) -> usize {
        self.state().create_bucket_calls
    }

    pub fn put_calls(&self) -> Vec<String> {
        self.state().put_calls.clone()
    }

    pub fn remove_calls(&self) -> Vec<String> {
        self.state().remove_calls.clone()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn list_bucket_names(&self) -> Result<HashSet<String>, ObjectStoreError> {
        let names = {
            let state = self.state();
            if state.unavailable {
                return Err(ObjectStoreError::StoreUnavailable("memory store offline".into()));
            }
            state.buckets.keys().cloned().collect()
        };
        // Let concurrent callers observe the same snapshot, like a network round trip.
        tokio::task::yield_now().await;
        Ok(names)
    }

    async fn create_bucket(&self, bucket: &str) -> Result<(), ObjectStoreError> {
        let mut state = self.state();
        state.create_bucket_calls += 1;
        if state.unavailable {
            return Err(ObjectStoreError::StoreUnavailable("memory store offline".into()));
        }
        if state.deny_bucket_creation {
            return Err(ObjectStoreError::AccessDenied(format!(
                "not allowed to create {bucket}"
            )));
        }
        if state.buckets.contains_key(bucket) {
            return Err(ObjectStoreError::BucketAlreadyExists(bucket.to_string()));
        }
        state.buckets.insert(bucket.to_string(), BTreeMap::new());
        Ok(())
    }

    async fn put(&self, bucket: &str, key: &str, data: Bytes) -> Result<(), ObjectStoreError> {
        let mut state = self.state();
        state.put_calls.push(key.to_string());
        if state.failing_puts.contains(key) {
            return Err(ObjectStoreError::WriteRejected(format!("injected failure for {key}")));
        }
        let objects = state.buckets.get_mut(bucket).ok_or_else(|| {
            ObjectStoreError::WriteRejected(format!("bucket does not exist: {bucket}"))
        })?;
        objects.insert(key.to_string(), data);
        Ok(())
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Bytes, ObjectStoreError> {
        self.object(bucket, key)
            .ok_or_else(|| ObjectStoreError::NotFound(key.to_string()))
    }

    async fn remove(&self, bucket: &str, key: &str) -> Result<(), ObjectStoreError> {
        let mut state = self.state();
        state.remove_calls.push(key.to_string());
        if state.failing_removes.contains(key) {
            return Err(ObjectStoreError::StoreUnavailable(format!(
                "injected failure for {key}"
            )));
        }
        if let Some(objects) = state.buckets.get_mut(bucket) {
            objects.remove(key);
        }
        Ok(())
    }

    async fn presigned_url(
        &self,
        bucket: &str,
        key: &str,
        ttl: Duration,
    ) -> Result<String, ObjectStoreError> {
        Ok(format!("memory://{bucket}/{key}?expires_in={}", ttl.as_secs()))
    }

    async fn list_keys(&self, bucket: &str) -> Result<Vec<String>, ObjectStoreError> {
        let state = self.state();
        if state.unavailable {
            return Err(ObjectStoreError::StoreUnavailable("memory store offline".into()));
        }
        Ok(state
            .buckets
            .get(bucket)
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default())
    }
}
