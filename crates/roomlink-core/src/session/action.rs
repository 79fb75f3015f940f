//! Session output actions.

use chrono::{DateTime, Utc};

use super::event::FetchPurpose;
use crate::{
    message::{NewMessage, QueueItemId, ReadStatus, Room},
    queue::{QueueItem, QueueSnapshot},
};

/// Actions the driver executes on behalf of the [`crate::Session`].
///
/// Every backend operation's outcome must be fed back as the matching
/// [`crate::SessionEvent`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    /// Open the push channel for `room`.
    ///
    /// Report `Subscribed`, `SubscribeFailed` or `ChannelClosed` with the
    /// same generation.
    Subscribe {
        /// Room to subscribe to.
        room: Room,
        /// Attempt generation.
        generation: u64,
    },

    /// Close the push channel. Idempotent.
    Unsubscribe,

    /// Execute a latency probe.
    Probe {
        /// Probe id.
        probe_id: u64,
    },

    /// Direct write of a freshly composed message.
    InsertMessage {
        /// Local id to report the outcome with.
        local_id: QueueItemId,
        /// Insert payload.
        draft: NewMessage,
    },

    /// Send a queued item.
    SendQueued {
        /// The item.
        item: QueueItem,
    },

    /// Fetch messages created after `since`.
    FetchMessages {
        /// Why they are fetched.
        purpose: FetchPurpose,
        /// Lower bound (exclusive). Everything when `None`.
        since: Option<DateTime<Utc>>,
    },

    /// Write the queue to durable storage.
    PersistQueue(QueueSnapshot),

    /// Upsert the room read marker.
    PersistReadStatus(ReadStatus),
}
