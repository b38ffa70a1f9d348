use redb::ReadableTable;

use super::db::{Database, DatabaseError};
use super::models::{AlbumFilter, AlbumRecord};
use super::tables::*;

impl Database {
    // ========================================================================
    // Album reads (writes go through RecordTransaction)
    // ========================================================================

    /// Get an album by id
    pub fn get_album(&self, id: u64) -> Result<Option<AlbumRecord>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(ALBUMS)?;

        match table.get(id)? {
            Some(data) => {
                let album: AlbumRecord = rmp_serde::from_slice(data.value())?;
                Ok(Some(album))
            }
            None => Ok(None),
        }
    }

    pub fn album_exists(&self, id: u64) -> Result<bool, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(ALBUMS)?;
        Ok(table.get(id)?.is_some())
    }

    /// List albums matching the filter, ordered by id
    pub fn list_albums(&self, filter: &AlbumFilter) -> Result<Vec<AlbumRecord>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(ALBUMS)?;

        let mut albums = Vec::new();
        for result in table.iter()? {
            let (_, value) = result?;
            let album: AlbumRecord = rmp_serde::from_slice(value.value())?;
            if filter.matches(&album) {
                albums.push(album);
            }
        }

        Ok(albums)
    }
}
