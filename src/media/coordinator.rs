use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::bucket::BucketManager;
use super::lease::AlbumLeases;
use super::{validate_batch, MediaError, MediaOutcome, MediaUpload, PartialDetachResidue};
use crate::config::MediaConfig;
use crate::object_store::{ObjectStore, ObjectStoreError};
use crate::storage::models::{AlbumPatch, AlbumRecord, MediaRecord, NewAlbum};
use crate::storage::{Database, KeyReservation, RecordTransaction};

/// A key whose write intent this operation recorded.
struct Reservation {
    key: String,
    /// A committed row of the same album already points at this key.
    replaces_existing: bool,
}

/// Runs album writes that touch both the record store and the media bucket.
pub struct MediaCoordinator {
    db: Database,
    store: Arc<dyn ObjectStore>,
    buckets: BucketManager,
    leases: AlbumLeases,
    bucket: String,
    presign_ttl: Duration,
    remove_attempts: u32,
}

impl MediaCoordinator {
    pub fn new(db: Database, store: Arc<dyn ObjectStore>, config: &MediaConfig) -> Self {
        Self {
            db,
            buckets: BucketManager::new(Arc::clone(&store)),
            store,
            leases: AlbumLeases::new(),
            bucket: config.bucket.clone(),
            presign_ttl: config.presign_ttl(),
            remove_attempts: config.remove_attempts.max(1),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    // ========================================================================
    // Album operations
    // ========================================================================

    /// Create an album with its initial media in one record transaction.
    pub async fn create_album(
        &self,
        album: NewAlbum,
        files: Vec<MediaUpload>,
    ) -> Result<(AlbumRecord, MediaOutcome), MediaError> {
        validate_batch(&files)?;
        self.provision(&files).await?;

        let mut tx = self.db.begin_transaction();
        let record = tx.insert_album(&album)?;
        let _lease = self.leases.acquire(record.id).await;

        let attached = match self.attach_or_rollback(&mut tx, record.id, &files).await {
            Ok(attached) => attached,
            Err(e) => {
                tx.rollback();
                return Err(e);
            }
        };
        self.commit_attached(tx, record.id, &attached)?;

        info!(album_id = record.id, media = attached.len(), "Created album");
        Ok((
            record,
            MediaOutcome {
                attached,
                ..Default::default()
            },
        ))
    }

    /// Patch an album and add media to it. Uploads whose name matches an
    /// existing media row of the album replace that row.
    pub async fn update_album(
        &self,
        id: u64,
        patch: AlbumPatch,
        files: Vec<MediaUpload>,
    ) -> Result<(AlbumRecord, MediaOutcome), MediaError> {
        validate_batch(&files)?;
        let _lease = self.leases.acquire(id).await;
        if !self.db.album_exists(id)? {
            return Err(MediaError::AlbumNotFound(id));
        }
        self.provision(&files).await?;

        let mut tx = self.db.begin_transaction();
        let record = if patch.is_empty() {
            tx.get_album(id)?
        } else {
            tx.update_album(id, &patch)?
        };
        let Some(record) = record else {
            tx.rollback();
            return Err(MediaError::AlbumNotFound(id));
        };

        let attached = match self.attach_or_rollback(&mut tx, id, &files).await {
            Ok(attached) => attached,
            Err(e) => {
                tx.rollback();
                return Err(e);
            }
        };
        self.commit_attached(tx, id, &attached)?;

        info!(album_id = id, media = attached.len(), "Updated album");
        Ok((
            record,
            MediaOutcome {
                attached,
                ..Default::default()
            },
        ))
    }

    /// Delete an album, its media rows and then its objects.
    pub async fn delete_album(&self, id: u64) -> Result<MediaOutcome, MediaError> {
        let _lease = self.leases.acquire(id).await;

        let mut tx = self.db.begin_transaction();
        if !tx.album_exists(id)? {
            tx.rollback();
            return Err(MediaError::AlbumNotFound(id));
        }
        let doomed = self.stage_detach(&mut tx, id)?;
        tx.delete_album(id)?;
        tx.commit()?;

        let outcome = self.remove_objects(id, doomed).await;
        info!(
            album_id = id,
            removed = outcome.removed.len(),
            residue = outcome.residue.len(),
            "Deleted album"
        );
        Ok(outcome)
    }

    /// Attach a batch of media to an existing album.
    pub async fn attach_media(
        &self,
        album_id: u64,
        files: Vec<MediaUpload>,
    ) -> Result<MediaOutcome, MediaError> {
        validate_batch(&files)?;
        let _lease = self.leases.acquire(album_id).await;
        if !self.db.album_exists(album_id)? {
            return Err(MediaError::AlbumNotFound(album_id));
        }
        self.provision(&files).await?;

        let mut tx = self.db.begin_transaction();
        let attached = match self.attach_or_rollback(&mut tx, album_id, &files).await {
            Ok(attached) => attached,
            Err(e) => {
                tx.rollback();
                return Err(e);
            }
        };
        self.commit_attached(tx, album_id, &attached)?;

        Ok(MediaOutcome {
            attached,
            ..Default::default()
        })
    }

    /// Remove every media row of an album, then its objects. Calling it on an
    /// album without media is a no-op.
    pub async fn detach_media(&self, album_id: u64) -> Result<MediaOutcome, MediaError> {
        let _lease = self.leases.acquire(album_id).await;

        let mut tx = self.db.begin_transaction();
        if !tx.album_exists(album_id)? {
            tx.rollback();
            return Err(MediaError::AlbumNotFound(album_id));
        }
        let doomed = self.stage_detach(&mut tx, album_id)?;
        if doomed.is_empty() {
            tx.rollback();
            return Ok(MediaOutcome::default());
        }
        tx.commit()?;

        Ok(self.remove_objects(album_id, doomed).await)
    }

    // ========================================================================
    // Attach
    // ========================================================================

    /// Provision the bucket once per batch. Empty batches touch nothing.
    async fn provision(&self, files: &[MediaUpload]) -> Result<(), MediaError> {
        if files.is_empty() {
            return Ok(());
        }
        self.buckets
            .ensure_bucket(&self.bucket)
            .await
            .map_err(|source| MediaError::BucketProvisionFailed {
                bucket: self.bucket.clone(),
                source,
            })
    }

    /// Write every object and stage its row inside `tx`. On failure, objects
    /// written by this batch are removed again before the error is returned,
    /// and the caller must roll `tx` back.
    async fn attach_or_rollback(
        &self,
        tx: &mut RecordTransaction,
        album_id: u64,
        files: &[MediaUpload],
    ) -> Result<Vec<MediaRecord>, MediaError> {
        if files.is_empty() {
            return Ok(Vec::new());
        }

        let reservations = self.reserve_keys(album_id, files)?;
        let mut written = HashSet::with_capacity(files.len());
        match self.write_batch(tx, album_id, files, &mut written).await {
            Ok(staged) => Ok(staged),
            Err(e) => {
                self.compensate(album_id, &reservations, &written).await;
                Err(e)
            }
        }
    }

    /// Check ownership of every key and record write intents, before any put.
    fn reserve_keys(
        &self,
        album_id: u64,
        files: &[MediaUpload],
    ) -> Result<Vec<Reservation>, MediaError> {
        let mut reservations: Vec<Reservation> = Vec::with_capacity(files.len());
        for file in files {
            let reserved = match self.db.reserve_object_key(&file.name, album_id) {
                Ok(reserved) => reserved,
                Err(e) => {
                    self.release(&reservations);
                    return Err(e.into());
                }
            };
            let replaces_existing = match reserved {
                KeyReservation::Fresh => false,
                KeyReservation::Replaces => true,
                KeyReservation::Conflict { owner } => {
                    self.release(&reservations);
                    return Err(MediaError::KeyConflict {
                        key: file.name.clone(),
                        owner,
                    });
                }
                KeyReservation::Reclaiming => {
                    self.release(&reservations);
                    return Err(MediaError::KeyReclaiming(file.name.clone()));
                }
            };
            reservations.push(Reservation {
                key: file.name.clone(),
                replaces_existing,
            });
        }
        Ok(reservations)
    }

    async fn write_batch(
        &self,
        tx: &mut RecordTransaction,
        album_id: u64,
        files: &[MediaUpload],
        written: &mut HashSet<String>,
    ) -> Result<Vec<MediaRecord>, MediaError> {
        let mut staged = Vec::with_capacity(files.len());
        for file in files {
            self.store
                .put(&self.bucket, &file.name, file.content.clone())
                .await
                .map_err(|source| MediaError::ObjectWriteFailed {
                    key: file.name.clone(),
                    source,
                })?;
            written.insert(file.name.clone());
            debug!(album_id, key = %file.name, size = file.content.len(), "Wrote object");

            let url = self.presign(written, &file.name).await?;
            staged.push(tx.insert_media(album_id, &file.name, &url)?);
        }
        Ok(staged)
    }

    /// Issue an access URL. Presigning never checks that the object exists, so
    /// it is only allowed for keys this operation has just written.
    async fn presign(&self, written: &HashSet<String>, key: &str) -> Result<String, MediaError> {
        if !written.contains(key) {
            return Err(MediaError::ObjectReadBackInconsistent(key.to_string()));
        }
        self.store
            .presigned_url(&self.bucket, key, self.presign_ttl)
            .await
            .map_err(|source| MediaError::PresignFailed {
                key: key.to_string(),
                source,
            })
    }

    /// Undo the puts of a failed batch. Failures here are logged and never
    /// replace the error that caused the rollback.
    async fn compensate(
        &self,
        album_id: u64,
        reservations: &[Reservation],
        written: &HashSet<String>,
    ) {
        let mut released = Vec::with_capacity(reservations.len());
        for reservation in reservations {
            // Rows committed earlier still point at replaced keys.
            if reservation.replaces_existing || !written.contains(&reservation.key) {
                released.push(reservation);
                continue;
            }
            match self.remove_with_retry(&reservation.key).await {
                Ok(()) => released.push(reservation),
                Err(e) => warn!(
                    album_id,
                    key = %reservation.key,
                    error = %e,
                    "Compensating remove failed, object left for the reconciliation sweep"
                ),
            }
        }
        self.release_all(released.into_iter());
    }

    fn commit_attached(
        &self,
        tx: RecordTransaction,
        album_id: u64,
        attached: &[MediaRecord],
    ) -> Result<(), MediaError> {
        if let Err(e) = tx.commit() {
            let keys: Vec<&str> = attached.iter().map(|m| m.name.as_str()).collect();
            warn!(
                album_id,
                keys = ?keys,
                error = %e,
                "Record commit failed after objects were written, leaving them to the reconciliation sweep"
            );
            return Err(e.into());
        }
        Ok(())
    }

    fn release(&self, reservations: &[Reservation]) {
        self.release_all(reservations.iter());
    }

    fn release_all<'a>(&self, reservations: impl Iterator<Item = &'a Reservation>) {
        let keys: Vec<String> = reservations.map(|r| r.key.clone()).collect();
        if let Err(e) = self.db.clear_pending_objects(&keys) {
            warn!(keys = ?keys, error = %e, "Failed to clear write intents");
        }
    }

    // ========================================================================
    // Detach
    // ========================================================================

    fn stage_detach(
        &self,
        tx: &mut RecordTransaction,
        album_id: u64,
    ) -> Result<Vec<MediaRecord>, MediaError> {
        let rows = tx.list_media(album_id)?;
        tx.delete_media(album_id)?;
        Ok(rows)
    }

    /// Remove the objects of rows that are already gone from the record store.
    async fn remove_objects(&self, album_id: u64, rows: Vec<MediaRecord>) -> MediaOutcome {
        let mut outcome = MediaOutcome::default();
        for row in rows {
            match self.remove_with_retry(&row.name).await {
                Ok(()) => outcome.removed.push(row.name),
                Err(e) => {
                    warn!(
                        album_id,
                        key = %row.name,
                        error = %e,
                        "Object removal failed after its row was deleted"
                    );
                    outcome.residue.push(PartialDetachResidue {
                        key: row.name,
                        reason: e.to_string(),
                    });
                }
            }
        }
        outcome
    }

    /// Removal is idempotent, so it can be retried blindly.
    async fn remove_with_retry(&self, key: &str) -> Result<(), ObjectStoreError> {
        let mut attempt = 1;
        loop {
            match self.store.remove(&self.bucket, key).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt >= self.remove_attempts => return Err(e),
                Err(e) => {
                    debug!(key, attempt, error = %e, "Retrying object removal");
                    tokio::time::sleep(Duration::from_millis(50 * u64::from(attempt))).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_store::MemoryStore;

    fn coordinator(dir: &tempfile::TempDir) -> MediaCoordinator {
        let db = Database::open(dir.path().join("data")).unwrap();
        MediaCoordinator::new(db, Arc::new(MemoryStore::new()), &MediaConfig::default())
    }

    #[tokio::test]
    async fn presign_refuses_keys_not_written() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = coordinator(&dir);
        let written = HashSet::from(["a.jpg".to_string()]);

        let err = coordinator.presign(&written, "b.jpg").await.unwrap_err();
        assert!(matches!(err, MediaError::ObjectReadBackInconsistent(ref key) if key == "b.jpg"));

        let url = coordinator.presign(&written, "a.jpg").await.unwrap();
        assert_eq!(url, "memory://album-media/a.jpg?expires_in=1000");
    }

    #[tokio::test]
    async fn operations_on_one_album_are_serialized() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = coordinator(&dir);
        let held = coordinator.leases.acquire(1).await;

        let blocked = tokio::time::timeout(
            Duration::from_millis(50),
            coordinator.detach_media(1),
        )
        .await;
        assert!(blocked.is_err());

        drop(held);
        // Album 1 does not exist, but the call now gets past the lease
        let err = coordinator.detach_media(1).await.unwrap_err();
        assert!(matches!(err, MediaError::AlbumNotFound(1)));
    }
}
