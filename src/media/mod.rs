//! Album media attachment.
//!
//! Keeps album media rows in the record store and objects in the media bucket
//! consistent with each other. Object-store calls cannot join a record
//! transaction, so every write path orders its steps so that a failure leaves
//! at worst an unreferenced object (which the reconciliation sweep removes) and
//! never a row pointing at a missing object.

mod bucket;
mod coordinator;
mod lease;
mod sweep;

pub use bucket::BucketManager;
pub use coordinator::MediaCoordinator;
pub use lease::AlbumLeases;
pub use sweep::{DanglingReference, ReconciliationSweep, SweepError, SweepReport};

use std::collections::HashSet;

use bytes::Bytes;
use serde::Serialize;
use thiserror::Error;

use crate::object_store::ObjectStoreError;
use crate::storage::models::MediaRecord;
use crate::storage::DatabaseError;

/// Longest accepted object key, in bytes.
pub const MAX_KEY_LENGTH: usize = 1024;

/// One uploaded file. `name` becomes the object key.
#[derive(Debug, Clone)]
pub struct MediaUpload {
    pub name: String,
    pub content: Bytes,
}

impl MediaUpload {
    pub fn new(name: impl Into<String>, content: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("Media bucket '{bucket}' could not be provisioned: {source}")]
    BucketProvisionFailed {
        bucket: String,
        source: ObjectStoreError,
    },
    #[error("Writing object '{key}' failed: {source}")]
    ObjectWriteFailed {
        key: String,
        source: ObjectStoreError,
    },
    #[error("Issuing an access URL for '{key}' failed: {source}")]
    PresignFailed {
        key: String,
        source: ObjectStoreError,
    },
    #[error("Access URL requested for '{0}', which was not written by this operation")]
    ObjectReadBackInconsistent(String),
    #[error("Invalid object key '{key}': {reason}")]
    InvalidKey { key: String, reason: &'static str },
    #[error("Object key '{0}' appears more than once in the upload")]
    DuplicateKey(String),
    #[error("Object key '{key}' is already attached to album {owner}")]
    KeyConflict { key: String, owner: u64 },
    #[error("Object key '{0}' is being reclaimed, retry shortly")]
    KeyReclaiming(String),
    #[error("Album {0} not found")]
    AlbumNotFound(u64),
    #[error(transparent)]
    Record(#[from] DatabaseError),
}

/// An object whose media row was removed but which could not be deleted.
/// The reconciliation sweep picks it up later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartialDetachResidue {
    pub key: String,
    pub reason: String,
}

/// What a successful media operation did.
#[derive(Debug, Default, Serialize)]
pub struct MediaOutcome {
    /// Media rows committed by this operation
    pub attached: Vec<MediaRecord>,
    /// Object keys deleted from the bucket
    pub removed: Vec<String>,
    pub residue: Vec<PartialDetachResidue>,
}

impl MediaOutcome {
    pub fn is_clean(&self) -> bool {
        self.residue.is_empty()
    }
}

/// Reject keys the object store cannot hold safely.
pub fn validate_key(key: &str) -> Result<(), MediaError> {
    let invalid = |reason| MediaError::InvalidKey {
        key: key.to_string(),
        reason,
    };

    if key.is_empty() {
        return Err(invalid("key is empty"));
    }
    if key.len() > MAX_KEY_LENGTH {
        return Err(invalid("key is longer than 1024 bytes"));
    }
    if key.starts_with('/') {
        return Err(invalid("key starts with '/'"));
    }
    if key.contains('\\') || key.chars().any(char::is_control) {
        return Err(invalid("key contains a backslash or control character"));
    }
    if key.split('/').any(|segment| segment == ".." || segment == ".") {
        return Err(invalid("key contains a relative path segment"));
    }
    if key.split('/').any(str::is_empty) {
        return Err(invalid("key contains an empty path segment"));
    }
    Ok(())
}

/// Validate every key of a batch before anything is written.
pub fn validate_batch(files: &[MediaUpload]) -> Result<(), MediaError> {
    let mut seen = HashSet::with_capacity(files.len());
    for file in files {
        validate_key(&file.name)?;
        if !seen.insert(file.name.as_str()) {
            return Err(MediaError::DuplicateKey(file.name.clone()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_and_nested_keys() {
        assert!(validate_key("cover.jpg").is_ok());
        assert!(validate_key("tracks/01 - intro.mp3").is_ok());
    }

    #[test]
    fn rejects_unsafe_keys() {
        for key in ["", "/cover.jpg", "../cover.jpg", "a/./b", "a//b", "a\\b", "a/"] {
            assert!(
                matches!(validate_key(key), Err(MediaError::InvalidKey { .. })),
                "expected {key:?} to be rejected"
            );
        }
        assert!(validate_key(&"k".repeat(MAX_KEY_LENGTH + 1)).is_err());
        assert!(validate_key(&"k".repeat(MAX_KEY_LENGTH)).is_ok());
    }

    #[test]
    fn batch_rejects_duplicates() {
        let files = vec![
            MediaUpload::new("a.jpg", "1"),
            MediaUpload::new("b.jpg", "2"),
            MediaUpload::new("a.jpg", "3"),
        ];
        match validate_batch(&files) {
            Err(MediaError::DuplicateKey(key)) => assert_eq!(key, "a.jpg"),
            other => panic!("expected DuplicateKey, got {other:?}"),
        }
    }
}
