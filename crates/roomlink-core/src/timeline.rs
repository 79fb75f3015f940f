//! Visible message list.
//!
//! Confirmed messages are kept sorted by creation time and deduplicated by
//! id, whichever path delivered them. Optimistic sends live in a separate
//! pending list keyed by their local id, so they can be replaced or reverted
//! precisely.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::message::{Message, MessageId, QueueItemId};

/// Lifecycle of an optimistic entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingState {
    /// Direct send in flight
    Sending,
    /// Owned by the queue, waiting for delivery
    Queued,
    /// Retry budget exhausted
    Failed {
        /// Last failure reason
        reason: String,
    },
}

/// An outbound message not yet confirmed by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry {
    /// Local id (same as the queue item id once queued)
    pub id: QueueItemId,
    /// Message text
    pub content: String,
    /// Local creation time
    pub created_at: DateTime<Utc>,
    /// Current state
    pub state: PendingState,
}

/// Deduplicated, time-ordered message list plus optimistic entries.
#[derive(Debug, Clone, Default)]
pub struct Timeline {
    messages: Vec<Message>,
    ids: HashSet<MessageId>,
    pending: Vec<PendingEntry>,
}

impl Timeline {
    /// Empty timeline
    pub fn new() -> Self {
        Self::default()
    }

    /// Confirmed messages, oldest first
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Optimistic entries in send order
    pub fn pending(&self) -> &[PendingEntry] {
        &self.pending
    }

    /// Number of confirmed messages
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether no message is confirmed
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Whether `id` is in the list
    pub fn contains(&self, id: &MessageId) -> bool {
        self.ids.contains(id)
    }

    /// Creation time of the newest confirmed message
    pub fn newest_created_at(&self) -> Option<DateTime<Utc>> {
        self.messages.last().map(|message| message.created_at)
    }

    /// Insert by ascending creation time. An id already present is a no-op.
    ///
    /// Messages with equal timestamps keep arrival order.
    pub fn merge(&mut self, message: Message) -> bool {
        if self.ids.contains(&message.id) {
            return false;
        }

        let pos = self.messages.partition_point(|m| m.created_at <= message.created_at);
        self.ids.insert(message.id.clone());
        self.messages.insert(pos, message);
        true
    }

    /// Merge many. Returns the number actually inserted.
    pub fn merge_all(&mut self, messages: impl IntoIterator<Item = Message>) -> usize {
        messages.into_iter().map(|message| usize::from(self.merge(message))).sum()
    }

    /// Show an optimistic entry. Replaces an entry with the same id.
    pub fn apply_pending(&mut self, entry: PendingEntry) {
        match self.pending.iter_mut().find(|pending| pending.id == entry.id) {
            Some(existing) => *existing = entry,
            None => self.pending.push(entry),
        }
    }

    /// Change the state of an optimistic entry. False if unknown.
    pub fn set_pending_state(&mut self, id: QueueItemId, state: PendingState) -> bool {
        match self.pending.iter_mut().find(|pending| pending.id == id) {
            Some(entry) => {
                entry.state = state;
                true
            },
            None => false,
        }
    }

    /// Replace the optimistic entry with its confirmed message.
    ///
    /// Returns whether the message was newly merged (false when another path
    /// delivered it first).
    pub fn confirm_pending(&mut self, id: QueueItemId, message: Message) -> bool {
        self.revert_pending(id);
        self.merge(message)
    }

    /// Remove an optimistic entry.
    pub fn revert_pending(&mut self, id: QueueItemId) -> Option<PendingEntry> {
        let pos = self.pending.iter().position(|pending| pending.id == id)?;
        Some(self.pending.remove(pos))
    }
}
