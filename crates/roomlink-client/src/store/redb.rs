//! Redb-backed durable queue storage.
//!
//! Uses Redb's ACID transactions with Copy-on-Write for crash safety. Queued
//! messages survive process restarts.

use std::{path::Path, sync::Arc};

use redb::{Database, ReadableTable, TableDefinition};
use roomlink_core::{QueueSnapshot, Room};

use super::{QueueStore, StorageError, decode, encode};

/// Table: queues
/// Key: room storage key (`queue:<kind>[:<id>]`)
/// Value: CBOR-encoded QueueSnapshot
const QUEUES: TableDefinition<&str, &[u8]> = TableDefinition::new("queues");

/// Durable queue storage backed by Redb.
///
/// Thread-safe through Redb's internal locking. Clone is cheap (Arc).
#[derive(Clone)]
pub struct RedbQueueStore {
    db: Arc<Database>,
}

impl RedbQueueStore {
    /// Open or create a Redb database at the given path.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Io` if the database cannot be opened or created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let db = Database::create(path.as_ref()).map_err(|e| StorageError::Io(e.to_string()))?;

        let txn = db.begin_write().map_err(|e| StorageError::Io(e.to_string()))?;
        {
            let _ = txn.open_table(QUEUES).map_err(|e| StorageError::Io(e.to_string()))?;
        }
        txn.commit().map_err(|e| StorageError::Io(e.to_string()))?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Storage keys of every saved queue.
    pub fn keys(&self) -> Result<Vec<String>, StorageError> {
        let txn = self.db.begin_read().map_err(|e| StorageError::Io(e.to_string()))?;
        let table = txn.open_table(QUEUES).map_err(|e| StorageError::Io(e.to_string()))?;

        let mut keys = Vec::new();
        for entry in table.iter().map_err(|e| StorageError::Io(e.to_string()))? {
            let (key, _) = entry.map_err(|e| StorageError::Io(e.to_string()))?;
            keys.push(key.value().to_string());
        }
        Ok(keys)
    }
}

impl QueueStore for RedbQueueStore {
    fn load(&self, room: &Room) -> Result<Option<QueueSnapshot>, StorageError> {
        let txn = self.db.begin_read().map_err(|e| StorageError::Io(e.to_string()))?;
        let table = txn.open_table(QUEUES).map_err(|e| StorageError::Io(e.to_string()))?;

        let key = room.storage_key();
        let Some(value) = table.get(key.as_str()).map_err(|e| StorageError::Io(e.to_string()))?
        else {
            return Ok(None);
        };
        decode(value.value()).map(Some)
    }

    fn save(&self, snapshot: &QueueSnapshot) -> Result<(), StorageError> {
        let bytes = encode(snapshot)?;
        let txn = self.db.begin_write().map_err(|e| StorageError::Io(e.to_string()))?;

        {
            let mut table = txn.open_table(QUEUES).map_err(|e| StorageError::Io(e.to_string()))?;
            let key = snapshot.room.storage_key();
            table
                .insert(key.as_str(), bytes.as_slice())
                .map_err(|e| StorageError::Io(e.to_string()))?;
        }

        txn.commit().map_err(|e| StorageError::Io(e.to_string()))?;
        Ok(())
    }

    fn remove(&self, room: &Room) -> Result<(), StorageError> {
        let txn = self.db.begin_write().map_err(|e| StorageError::Io(e.to_string()))?;

        {
            let mut table = txn.open_table(QUEUES).map_err(|e| StorageError::Io(e.to_string()))?;
            let key = room.storage_key();
            table.remove(key.as_str()).map_err(|e| StorageError::Io(e.to_string()))?;
        }

        txn.commit().map_err(|e| StorageError::Io(e.to_string()))?;
        Ok(())
    }
}
