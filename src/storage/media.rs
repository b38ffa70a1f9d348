use chrono::Utc;
use redb::{ReadableTable, Table};

use super::db::{Database, DatabaseError};
use super::models::{MediaRecord, PendingObject};
use super::tables::*;

/// Result of reserving an object key for an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyReservation {
    /// No row references the key; a write intent was recorded.
    Fresh,
    /// A row of the same album references the key; the upload overwrites it.
    Replaces,
    /// Another album references the key or is uploading it. Nothing was recorded.
    Conflict { owner: u64 },
    /// The reconciliation sweep is removing an orphaned object under this key.
    /// Nothing was recorded.
    Reclaiming,
}

impl Database {
    // ========================================================================
    // Committed media reads
    // ========================================================================

    /// Committed media rows of an album, in insertion order
    pub fn get_album_media(&self, album_id: u64) -> Result<Vec<MediaRecord>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let index_table = read_txn.open_table(ALBUM_MEDIA_INDEX)?;
        let media_table = read_txn.open_table(ALBUM_MEDIA)?;

        let media_ids: Vec<u64> = match index_table.get(album_id)? {
            Some(data) => rmp_serde::from_slice(data.value())?,
            None => return Ok(Vec::new()),
        };

        let mut media = Vec::new();
        for media_id in media_ids {
            if let Some(data) = media_table.get(media_id)? {
                let record: MediaRecord = rmp_serde::from_slice(data.value())?;
                media.push(record);
            }
        }

        Ok(media)
    }

    /// Every committed media row and every write intent, read from one snapshot.
    pub fn reconciliation_snapshot(
        &self,
    ) -> Result<(Vec<MediaRecord>, Vec<PendingObject>), DatabaseError> {
        let read_txn = self.begin_read()?;
        let media_table = read_txn.open_table(ALBUM_MEDIA)?;
        let pending_table = read_txn.open_table(PENDING_OBJECTS)?;

        let mut media = Vec::new();
        for result in media_table.iter()? {
            let (_, value) = result?;
            let record: MediaRecord = rmp_serde::from_slice(value.value())?;
            media.push(record);
        }

        let mut pending = Vec::new();
        for result in pending_table.iter()? {
            let (_, value) = result?;
            let intent: PendingObject = rmp_serde::from_slice(value.value())?;
            pending.push(intent);
        }

        Ok((media, pending))
    }

    // ========================================================================
    // Write intents
    // ========================================================================

    /// Check key ownership and record a write intent in one write transaction,
    /// so two albums cannot both pass the check for the same key.
    pub fn reserve_object_key(
        &self,
        key: &str,
        album_id: u64,
    ) -> Result<KeyReservation, DatabaseError> {
        let write_txn = self.begin_write()?;
        let reservation = {
            let keys_table = write_txn.open_table(MEDIA_KEYS)?;
            let media_table = write_txn.open_table(ALBUM_MEDIA)?;
            let mut pending_table = write_txn.open_table(PENDING_OBJECTS)?;

            let media_id = keys_table.get(key)?.map(|id| id.value());
            let mut row_owner = None;
            if let Some(media_id) = media_id {
                if let Some(data) = media_table.get(media_id)? {
                    let record: MediaRecord = rmp_serde::from_slice(data.value())?;
                    row_owner = Some(record.album_id);
                }
            }

            let pending = match pending_table.get(key)? {
                Some(data) => Some(rmp_serde::from_slice::<PendingObject>(data.value())?),
                None => None,
            };

            let reservation = match (row_owner, pending) {
                (Some(owner), _) if owner != album_id => KeyReservation::Conflict { owner },
                (_, Some(intent)) if intent.reclaiming => KeyReservation::Reclaiming,
                (_, Some(intent)) if intent.album_id != album_id => KeyReservation::Conflict {
                    owner: intent.album_id,
                },
                (Some(_), _) => KeyReservation::Replaces,
                (None, _) => KeyReservation::Fresh,
            };

            if matches!(reservation, KeyReservation::Fresh | KeyReservation::Replaces) {
                let intent = PendingObject {
                    key: key.to_string(),
                    album_id,
                    created_at: Utc::now(),
                    reclaiming: false,
                };
                let data = rmp_serde::to_vec_named(&intent)?;
                pending_table.insert(key, data.as_slice())?;
            }
            reservation
        };
        write_txn.commit()?;
        Ok(reservation)
    }

    /// Release upload intents by key. Sweep markers are left in place.
    pub fn clear_pending_objects(&self, keys: &[String]) -> Result<(), DatabaseError> {
        if keys.is_empty() {
            return Ok(());
        }

        let write_txn = self.begin_write()?;
        {
            let mut table = write_txn.open_table(PENDING_OBJECTS)?;
            for key in keys {
                let reclaiming = match table.get(key.as_str())? {
                    Some(data) => rmp_serde::from_slice::<PendingObject>(data.value())?.reclaiming,
                    None => continue,
                };
                if !reclaiming {
                    table.remove(key.as_str())?;
                }
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Remove intents that still match what the caller read. An intent that
    /// was refreshed since is kept. Returns how many were removed.
    pub fn clear_stale_intents(&self, intents: &[PendingObject]) -> Result<usize, DatabaseError> {
        if intents.is_empty() {
            return Ok(0);
        }

        let write_txn = self.begin_write()?;
        let mut cleared = 0;
        {
            let mut table = write_txn.open_table(PENDING_OBJECTS)?;
            for intent in intents {
                if current_intent(&table, &intent.key)?.as_ref() == Some(intent) {
                    table.remove(intent.key.as_str())?;
                    cleared += 1;
                }
            }
        }
        write_txn.commit()?;
        Ok(cleared)
    }

    /// Take an unreferenced key away from uploads before its object is removed.
    ///
    /// Succeeds only if no media row references the key and its intent is
    /// still `seen` (`None`: there was no intent). The intent is replaced by a
    /// sweep marker, which makes `reserve_object_key` return `Reclaiming` and
    /// a media row commit for the key fail, until `release_claim`.
    pub fn claim_orphan(
        &self,
        key: &str,
        seen: Option<&PendingObject>,
    ) -> Result<Option<PendingObject>, DatabaseError> {
        let write_txn = self.begin_write()?;
        let claim = {
            let keys_table = write_txn.open_table(MEDIA_KEYS)?;
            let mut pending_table = write_txn.open_table(PENDING_OBJECTS)?;

            if keys_table.get(key)?.is_some()
                || current_intent(&pending_table, key)?.as_ref() != seen
            {
                None
            } else {
                let marker = PendingObject {
                    key: key.to_string(),
                    album_id: seen.map_or(0, |intent| intent.album_id),
                    created_at: Utc::now(),
                    reclaiming: true,
                };
                let data = rmp_serde::to_vec_named(&marker)?;
                pending_table.insert(key, data.as_slice())?;
                Some(marker)
            }
        };
        write_txn.commit()?;
        Ok(claim)
    }

    /// Drop a sweep marker taken by `claim_orphan`.
    pub fn release_claim(&self, claim: &PendingObject) -> Result<(), DatabaseError> {
        self.clear_stale_intents(std::slice::from_ref(claim))?;
        Ok(())
    }

    pub fn pending_objects(&self) -> Result<Vec<PendingObject>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(PENDING_OBJECTS)?;

        let mut pending = Vec::new();
        for result in table.iter()? {
            let (_, value) = result?;
            let intent: PendingObject = rmp_serde::from_slice(value.value())?;
            pending.push(intent);
        }
        Ok(pending)
    }
}

fn current_intent(
    table: &Table<&'static str, &'static [u8]>,
    key: &str,
) -> Result<Option<PendingObject>, DatabaseError> {
    let intent = match table.get(key)? {
        Some(data) => Some(rmp_serde::from_slice(data.value())?),
        None => None,
    };
    Ok(intent)
}
