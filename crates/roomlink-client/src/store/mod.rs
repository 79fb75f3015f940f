//! Durable queue storage.
//!
//! One entry per room under its queue key (see
//! [`roomlink_core::Room::storage_key`]), holding the CBOR-encoded
//! [`QueueSnapshot`]. The trait is synchronous: writes are small and happen
//! on the session task between events.

mod chaotic;
mod error;
mod memory;
mod redb;

pub use chaotic::ChaoticQueueStore;
pub use error::StorageError;
pub use memory::MemoryQueueStore;
use roomlink_core::{QueueSnapshot, Room};

pub use self::redb::RedbQueueStore;

/// Storage abstraction for queue snapshots
///
/// Must be Clone (one handle per room session), Send + Sync, and synchronous.
/// Implementations share internal state via Arc, so clones access the same
/// underlying storage.
pub trait QueueStore: Clone + Send + Sync + 'static {
    /// Load the snapshot for `room`. `None` if nothing was saved.
    fn load(&self, room: &Room) -> Result<Option<QueueSnapshot>, StorageError>;

    /// Overwrite the snapshot for `snapshot.room`.
    fn save(&self, snapshot: &QueueSnapshot) -> Result<(), StorageError>;

    /// Delete the snapshot for `room`. No-op if absent.
    fn remove(&self, room: &Room) -> Result<(), StorageError>;
}

/// Encode a snapshot as CBOR.
pub(crate) fn encode(snapshot: &QueueSnapshot) -> Result<Vec<u8>, StorageError> {
    let mut bytes = Vec::new();
    ciborium::into_writer(snapshot, &mut bytes)
        .map_err(|e| StorageError::Serialization(e.to_string()))?;
    Ok(bytes)
}

/// Decode a CBOR snapshot.
pub(crate) fn decode(bytes: &[u8]) -> Result<QueueSnapshot, StorageError> {
    ciborium::from_reader(bytes).map_err(|e| StorageError::Serialization(e.to_string()))
}
