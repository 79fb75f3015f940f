//! In-memory queue storage for tests and ephemeral sessions.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use roomlink_core::{QueueSnapshot, Room};

use super::{QueueStore, StorageError, decode, encode};

/// In-memory queue storage
///
/// Snapshots are stored CBOR-encoded, exactly as the durable store holds
/// them, so encoding problems surface in tests too. Clones share state.
#[derive(Clone, Default)]
pub struct MemoryQueueStore {
    inner: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemoryQueueStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rooms with a saved snapshot.
    pub fn len(&self) -> usize {
        self.lock().map(|entries| entries.len()).unwrap_or_default()
    }

    /// Whether no snapshot is saved.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, Vec<u8>>>, StorageError> {
        self.inner.lock().map_err(|_| StorageError::Io("memory store lock poisoned".to_string()))
    }
}

impl QueueStore for MemoryQueueStore {
    fn load(&self, room: &Room) -> Result<Option<QueueSnapshot>, StorageError> {
        let entries = self.lock()?;
        entries.get(&room.storage_key()).map(|bytes| decode(bytes)).transpose()
    }

    fn save(&self, snapshot: &QueueSnapshot) -> Result<(), StorageError> {
        let bytes = encode(snapshot)?;
        self.lock()?.insert(snapshot.room.storage_key(), bytes);
        Ok(())
    }

    fn remove(&self, room: &Room) -> Result<(), StorageError> {
        self.lock()?.remove(&room.storage_key());
        Ok(())
    }
}
