use redb::{
    Database as RedbDatabase, Key, ReadTransaction, ReadableTable, TableDefinition, Value,
    WriteTransaction,
};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use super::tables::*;
use super::transaction::RecordTransaction;

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Commit error: {0}")]
    Commit(Box<redb::CommitError>),
    #[error("Constraint violation: {0}")]
    Constraint(String),
    #[error("Database error: {0}")]
    Redb(Box<redb::Error>),
    #[error("Database error: {0}")]
    RedbDatabase(Box<redb::DatabaseError>),
    #[error("Deserialization error: {0}")]
    Deserialization(#[from] rmp_serde::decode::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] rmp_serde::encode::Error),
    #[error("Storage error: {0}")]
    Storage(Box<redb::StorageError>),
    #[error("Table error: {0}")]
    Table(Box<redb::TableError>),
    #[error("Transaction error: {0}")]
    Transaction(Box<redb::TransactionError>),
}

impl From<redb::CommitError> for DatabaseError {
    fn from(e: redb::CommitError) -> Self {
        DatabaseError::Commit(Box::new(e))
    }
}

impl From<redb::DatabaseError> for DatabaseError {
    fn from(e: redb::DatabaseError) -> Self {
        DatabaseError::RedbDatabase(Box::new(e))
    }
}

impl From<redb::Error> for DatabaseError {
    fn from(e: redb::Error) -> Self {
        DatabaseError::Redb(Box::new(e))
    }
}

impl From<redb::StorageError> for DatabaseError {
    fn from(e: redb::StorageError) -> Self {
        DatabaseError::Storage(Box::new(e))
    }
}

impl From<redb::TableError> for DatabaseError {
    fn from(e: redb::TableError) -> Self {
        DatabaseError::Table(Box::new(e))
    }
}

impl From<redb::TransactionError> for DatabaseError {
    fn from(e: redb::TransactionError) -> Self {
        DatabaseError::Transaction(Box::new(e))
    }
}

pub struct Database {
    db: Arc<RedbDatabase>,
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self {
            db: Arc::clone(&self.db),
        }
    }
}

/// Statistics from a purge operation
#[derive(Debug, Default)]
pub struct PurgeStats {
    pub albums: u64,
    pub media: u64,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open<P: AsRef<Path>>(data_dir: P) -> Result<Self, DatabaseError> {
        std::fs::create_dir_all(data_dir.as_ref())?;
        let db_path = data_dir.as_ref().join("album-media.redb");
        let db = Arc::new(RedbDatabase::create(db_path)?);

        // Initialize application tables
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(ALBUMS)?;
            let _ = write_txn.open_table(ALBUM_MEDIA)?;
            let _ = write_txn.open_table(ALBUM_MEDIA_INDEX)?;
            let _ = write_txn.open_table(MEDIA_KEYS)?;
            let _ = write_txn.open_table(PENDING_OBJECTS)?;
            let _ = write_txn.open_table(SEQUENCES)?;
        }
        write_txn.commit()?;

        Ok(Self { db })
    }

    /// Begin a read transaction
    pub fn begin_read(&self) -> Result<ReadTransaction, DatabaseError> {
        Ok(self.db.begin_read()?)
    }

    /// Begin a write transaction
    pub fn begin_write(&self) -> Result<WriteTransaction, DatabaseError> {
        Ok(self.db.begin_write()?)
    }

    /// Begin a record transaction. Changes are staged on the handle and applied
    /// atomically by `RecordTransaction::commit`.
    pub fn begin_transaction(&self) -> RecordTransaction {
        RecordTransaction::new(self.clone())
    }

    /// Allocate the next id of a sequence. Ids taken by rolled-back transactions
    /// are not reused.
    pub fn next_id(&self, sequence: &str) -> Result<u64, DatabaseError> {
        let write_txn = self.begin_write()?;
        let id = {
            let mut table = write_txn.open_table(SEQUENCES)?;
            let current = table.get(sequence)?.map(|v| v.value()).unwrap_or(0);
            table.insert(sequence, current + 1)?;
            current + 1
        };
        write_txn.commit()?;
        Ok(id)
    }

    /// Drop every album, media row and write intent. Sequences are kept so ids
    /// stay unique across a purge. Test mode only.
    pub fn purge_all(&self) -> Result<PurgeStats, DatabaseError> {
        let write_txn = self.begin_write()?;
        let stats = PurgeStats {
            albums: clear_table(&write_txn, ALBUMS)?,
            media: clear_table(&write_txn, ALBUM_MEDIA)?,
        };
        clear_table(&write_txn, ALBUM_MEDIA_INDEX)?;
        clear_table(&write_txn, MEDIA_KEYS)?;
        clear_table(&write_txn, PENDING_OBJECTS)?;
        write_txn.commit()?;
        Ok(stats)
    }
}

/// Remove every entry of a table, returning how many there were.
fn clear_table<K: Key + 'static, V: Value + 'static>(
    write_txn: &WriteTransaction,
    definition: TableDefinition<K, V>,
) -> Result<u64, DatabaseError> {
    let mut table = write_txn.open_table(definition)?;
    let count = table.iter()?.count() as u64;
    table.retain(|_, _| false)?;
    Ok(count)
}
