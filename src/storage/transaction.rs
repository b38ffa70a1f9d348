//! Record transactions.
//!
//! A `RecordTransaction` stages writes on its handle and applies them in a
//! single redb write transaction on `commit`. Reads through the handle see the
//! committed state with the staged writes laid over it. Nothing holds the redb
//! writer lock between calls, so a transaction can stay open across object
//! store round trips without blocking other requests.

use chrono::{DateTime, Utc};
use redb::{ReadableTable, WriteTransaction};

use super::db::{Database, DatabaseError};
use super::models::{AlbumPatch, AlbumRecord, MediaRecord, NewAlbum, PendingObject};
use super::tables::*;

#[derive(Debug)]
enum StagedOp {
    InsertAlbum(AlbumRecord),
    UpdateAlbum {
        id: u64,
        patch: AlbumPatch,
        at: DateTime<Utc>,
    },
    DeleteAlbum(u64),
    InsertMedia(MediaRecord),
    DeleteMedia(u64),
}

/// A unit of work against the record store, owned by exactly one request.
///
/// Dropping the handle without committing rolls it back.
pub struct RecordTransaction {
    db: Database,
    staged: Vec<StagedOp>,
    finished: bool,
}

impl RecordTransaction {
    pub(super) fn new(db: Database) -> Self {
        Self {
            db,
            staged: Vec::new(),
            finished: false,
        }
    }

    // ========================================================================
    // Albums
    // ========================================================================

    pub fn insert_album(&mut self, album: &NewAlbum) -> Result<AlbumRecord, DatabaseError> {
        let now = Utc::now();
        let record = AlbumRecord {
            id: self.db.next_id(ALBUM_SEQUENCE)?,
            name: album.name.clone(),
            publication_year: album.publication_year,
            artist_id: album.artist_id,
            created_at: now,
            updated_at: now,
        };
        self.staged.push(StagedOp::InsertAlbum(record.clone()));
        Ok(record)
    }

    /// Stage a patch. Returns the album as it will look after commit, or `None`
    /// when the album does not exist.
    pub fn update_album(
        &mut self,
        id: u64,
        patch: &AlbumPatch,
    ) -> Result<Option<AlbumRecord>, DatabaseError> {
        let Some(mut album) = self.get_album(id)? else {
            return Ok(None);
        };

        let at = Utc::now();
        patch.apply(&mut album);
        album.updated_at = at;
        self.staged.push(StagedOp::UpdateAlbum {
            id,
            patch: patch.clone(),
            at,
        });
        Ok(Some(album))
    }

    /// Stage deletion of an album and, by cascade, its media rows.
    pub fn delete_album(&mut self, id: u64) -> Result<bool, DatabaseError> {
        if !self.album_exists(id)? {
            return Ok(false);
        }
        self.staged.push(StagedOp::DeleteAlbum(id));
        Ok(true)
    }

    pub fn get_album(&self, id: u64) -> Result<Option<AlbumRecord>, DatabaseError> {
        let mut album = self.db.get_album(id)?;
        for op in &self.staged {
            match op {
                StagedOp::InsertAlbum(record) if record.id == id => album = Some(record.clone()),
                StagedOp::UpdateAlbum { id: target, patch, at } if *target == id => {
                    if let Some(ref mut album) = album {
                        patch.apply(album);
                        album.updated_at = *at;
                    }
                }
                StagedOp::DeleteAlbum(target) if *target == id => album = None,
                _ => {}
            }
        }
        Ok(album)
    }

    pub fn album_exists(&self, id: u64) -> Result<bool, DatabaseError> {
        Ok(self.get_album(id)?.is_some())
    }

    // ========================================================================
    // Media
    // ========================================================================

    pub fn insert_media(
        &mut self,
        album_id: u64,
        name: &str,
        url: &str,
    ) -> Result<MediaRecord, DatabaseError> {
        let record = MediaRecord {
            id: self.db.next_id(MEDIA_SEQUENCE)?,
            album_id,
            name: name.to_string(),
            url: url.to_string(),
            created_at: Utc::now(),
        };
        self.staged.push(StagedOp::InsertMedia(record.clone()));
        Ok(record)
    }

    /// Media rows of an album as this transaction sees them.
    pub fn list_media(&self, album_id: u64) -> Result<Vec<MediaRecord>, DatabaseError> {
        let mut media = self.db.get_album_media(album_id)?;
        for op in &self.staged {
            match op {
                StagedOp::InsertMedia(record) if record.album_id == album_id => {
                    // Same key within an album replaces the earlier row.
                    media.retain(|m| m.name != record.name);
                    media.push(record.clone());
                }
                StagedOp::DeleteMedia(target) | StagedOp::DeleteAlbum(target)
                    if *target == album_id =>
                {
                    media.clear();
                }
                _ => {}
            }
        }
        Ok(media)
    }

    /// Stage deletion of every media row of an album. Returns how many rows
    /// this transaction currently sees.
    pub fn delete_media(&mut self, album_id: u64) -> Result<usize, DatabaseError> {
        let count = self.list_media(album_id)?.len();
        self.staged.push(StagedOp::DeleteMedia(album_id));
        Ok(count)
    }

    // ========================================================================
    // Completion
    // ========================================================================

    /// Apply every staged write atomically. Constraint checks (album existence,
    /// key ownership) run here against the latest committed state; on any error
    /// nothing is applied.
    pub fn commit(mut self) -> Result<(), DatabaseError> {
        self.finished = true;
        if self.staged.is_empty() {
            return Ok(());
        }

        let write_txn = self.db.begin_write()?;
        for op in &self.staged {
            apply(&write_txn, op)?;
        }
        write_txn.commit()?;

        tracing::debug!(operations = self.staged.len(), "Committed record transaction");
        Ok(())
    }

    pub fn rollback(mut self) {
        self.finished = true;
        tracing::debug!(operations = self.staged.len(), "Rolled back record transaction");
    }
}

impl Drop for RecordTransaction {
    fn drop(&mut self) {
        if !self.finished && !self.staged.is_empty() {
            tracing::debug!(
                operations = self.staged.len(),
                "Record transaction dropped without commit, rolling back"
            );
        }
    }
}

// ============================================================================
// Commit helpers (run inside the redb write transaction)
// ============================================================================

fn apply(txn: &WriteTransaction, op: &StagedOp) -> Result<(), DatabaseError> {
    match op {
        StagedOp::InsertAlbum(album) => {
            let mut table = txn.open_table(ALBUMS)?;
            let data = rmp_serde::to_vec_named(album)?;
            table.insert(album.id, data.as_slice())?;
        }
        StagedOp::UpdateAlbum { id, patch, at } => {
            let mut album = read_album(txn, *id)?
                .ok_or_else(|| DatabaseError::Constraint(format!("album {id} does not exist")))?;
            patch.apply(&mut album);
            album.updated_at = *at;

            let mut table = txn.open_table(ALBUMS)?;
            let data = rmp_serde::to_vec_named(&album)?;
            table.insert(*id, data.as_slice())?;
        }
        StagedOp::DeleteAlbum(id) => {
            remove_album_media(txn, *id)?;
            let mut table = txn.open_table(ALBUMS)?;
            table.remove(*id)?;
        }
        StagedOp::InsertMedia(record) => insert_media(txn, record)?,
        StagedOp::DeleteMedia(album_id) => remove_album_media(txn, *album_id)?,
    }
    Ok(())
}

fn read_album(txn: &WriteTransaction, id: u64) -> Result<Option<AlbumRecord>, DatabaseError> {
    let table = txn.open_table(ALBUMS)?;
    let result = match table.get(id)? {
        Some(data) => Some(rmp_serde::from_slice(data.value())?),
        None => None,
    };
    Ok(result)
}

fn read_media(txn: &WriteTransaction, id: u64) -> Result<Option<MediaRecord>, DatabaseError> {
    let table = txn.open_table(ALBUM_MEDIA)?;
    let result = match table.get(id)? {
        Some(data) => Some(rmp_serde::from_slice(data.value())?),
        None => None,
    };
    Ok(result)
}

fn read_index(txn: &WriteTransaction, album_id: u64) -> Result<Vec<u64>, DatabaseError> {
    let table = txn.open_table(ALBUM_MEDIA_INDEX)?;
    let result = match table.get(album_id)? {
        Some(data) => rmp_serde::from_slice(data.value())?,
        None => Vec::new(),
    };
    Ok(result)
}

fn write_index(txn: &WriteTransaction, album_id: u64, ids: &[u64]) -> Result<(), DatabaseError> {
    let mut table = txn.open_table(ALBUM_MEDIA_INDEX)?;
    if ids.is_empty() {
        table.remove(album_id)?;
    } else {
        let data = rmp_serde::to_vec_named(&ids)?;
        table.insert(album_id, data.as_slice())?;
    }
    Ok(())
}

fn read_intent(txn: &WriteTransaction, key: &str) -> Result<Option<PendingObject>, DatabaseError> {
    let table = txn.open_table(PENDING_OBJECTS)?;
    let result = match table.get(key)? {
        Some(data) => Some(rmp_serde::from_slice(data.value())?),
        None => None,
    };
    Ok(result)
}

fn key_owner(txn: &WriteTransaction, key: &str) -> Result<Option<u64>, DatabaseError> {
    let table = txn.open_table(MEDIA_KEYS)?;
    let result = table.get(key)?.map(|id| id.value());
    Ok(result)
}

fn insert_media(txn: &WriteTransaction, record: &MediaRecord) -> Result<(), DatabaseError> {
    if read_album(txn, record.album_id)?.is_none() {
        return Err(DatabaseError::Constraint(format!(
            "album {} does not exist",
            record.album_id
        )));
    }

    if read_intent(txn, &record.name)?.is_some_and(|intent| intent.reclaiming) {
        return Err(DatabaseError::Constraint(format!(
            "object key '{}' is being reclaimed by the reconciliation sweep",
            record.name
        )));
    }

    // One row per object key. Re-attaching a key to the same album replaces the row.
    if let Some(existing_id) = key_owner(txn, &record.name)? {
        if let Some(existing) = read_media(txn, existing_id)? {
            if existing.album_id != record.album_id {
                return Err(DatabaseError::Constraint(format!(
                    "object key '{}' is already referenced by album {}",
                    record.name, existing.album_id
                )));
            }
            remove_media_row(txn, &existing)?;
        }
    }

    {
        let mut table = txn.open_table(ALBUM_MEDIA)?;
        let data = rmp_serde::to_vec_named(record)?;
        table.insert(record.id, data.as_slice())?;
    }
    {
        let mut keys = txn.open_table(MEDIA_KEYS)?;
        keys.insert(record.name.as_str(), record.id)?;
    }
    {
        let mut pending = txn.open_table(PENDING_OBJECTS)?;
        pending.remove(record.name.as_str())?;
    }

    let mut ids = read_index(txn, record.album_id)?;
    if !ids.contains(&record.id) {
        ids.push(record.id);
    }
    write_index(txn, record.album_id, &ids)
}

fn remove_media_row(txn: &WriteTransaction, record: &MediaRecord) -> Result<(), DatabaseError> {
    {
        let mut table = txn.open_table(ALBUM_MEDIA)?;
        table.remove(record.id)?;
    }
    if key_owner(txn, &record.name)? == Some(record.id) {
        let mut keys = txn.open_table(MEDIA_KEYS)?;
        keys.remove(record.name.as_str())?;
    }

    let mut ids = read_index(txn, record.album_id)?;
    ids.retain(|id| *id != record.id);
    write_index(txn, record.album_id, &ids)
}

fn remove_album_media(txn: &WriteTransaction, album_id: u64) -> Result<(), DatabaseError> {
    for media_id in read_index(txn, album_id)? {
        if let Some(record) = read_media(txn, media_id)? {
            remove_media_row(txn, &record)?;
        }
    }
    write_index(txn, album_id, &[])
}
