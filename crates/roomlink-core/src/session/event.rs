//! Session input events.
//!
//! Events originate from three sources:
//! - User intents from the UI layer.
//! - Results of backend operations the driver executed on the session's
//!   behalf.
//! - Host signals (network availability, timer wake-ups).

use crate::message::{Message, Metadata, QueueItemId};

/// Why messages are being fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchPurpose {
    /// Initial or user-requested load.
    Load,
    /// Fallback poll while push delivery is down.
    Poll,
    /// Gap fill after the link came back.
    CatchUp,
}

/// Events processed by the [`crate::Session`] state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Room view mounted. Connects and loads history.
    Start,

    /// Compose and send a message.
    SendMessage {
        /// Message text.
        content: String,
        /// Passthrough metadata.
        metadata: Option<Metadata>,
    },

    /// Reload history.
    LoadMessages,

    /// Manual reconnect.
    Reconnect,

    /// Reset the attempt counter, clear the error, and reconnect.
    ResetConnection,

    /// Explicit disconnect.
    Disconnect,

    /// On-demand latency probe.
    MeasureLatency,

    /// Re-admit a queued or failed item with a fresh budget.
    RetryItem(QueueItemId),

    /// Drop a queued or failed item.
    RemoveItem(QueueItemId),

    /// Drop every queued and failed item.
    ClearQueue,

    /// Mark the room as read now.
    MarkRead,

    /// Subscription acknowledged.
    Subscribed {
        /// Attempt generation.
        generation: u64,
    },

    /// Subscription failed.
    SubscribeFailed {
        /// Attempt generation.
        generation: u64,
        /// Failure description.
        reason: String,
    },

    /// Push stream ended.
    ChannelClosed {
        /// Generation of the closed subscription.
        generation: u64,
    },

    /// Hydrated message from the push channel.
    PushReceived(Message),

    /// Latency probe completed.
    ProbeSucceeded {
        /// Probe id.
        probe_id: u64,
    },

    /// Latency probe errored.
    ProbeFailed {
        /// Probe id.
        probe_id: u64,
        /// Failure description.
        reason: String,
    },

    /// Direct write succeeded.
    DirectSendSucceeded {
        /// Local id of the optimistic entry.
        local_id: QueueItemId,
        /// Server-confirmed message.
        message: Message,
    },

    /// Direct write failed. The message is queued.
    DirectSendFailed {
        /// Local id of the optimistic entry.
        local_id: QueueItemId,
        /// Failure description.
        reason: String,
    },

    /// Queued item delivered.
    QueueSendSucceeded {
        /// Queue item id.
        item_id: QueueItemId,
        /// Server-confirmed message.
        message: Message,
    },

    /// Queued item send failed.
    QueueSendFailed {
        /// Queue item id.
        item_id: QueueItemId,
        /// Failure description.
        reason: String,
    },

    /// Fetch returned messages.
    MessagesFetched {
        /// Why they were fetched.
        purpose: FetchPurpose,
        /// Messages in ascending creation order.
        messages: Vec<Message>,
    },

    /// Fetch failed.
    FetchFailed {
        /// Why they were being fetched.
        purpose: FetchPurpose,
        /// Failure description.
        reason: String,
    },

    /// Host online/offline event.
    NetworkChanged {
        /// New availability.
        online: bool,
    },

    /// Periodic cross-check of host availability.
    NetworkChecked {
        /// Current availability.
        online: bool,
    },

    /// Timer wake-up.
    Tick,
}
