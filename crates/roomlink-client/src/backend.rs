//! Backend contract.
//!
//! The realtime backend is a hosted database with a message table per room
//! type, insert notifications over a push channel, and a cheap read used as a
//! latency probe. Every method is a single request; retries and timeouts are
//! owned by the session state machines.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use roomlink_core::{InsertNotice, Message, MessageId, NewMessage, ReadStatus, Room};
use tokio::sync::mpsc;

use crate::error::BackendError;

/// Realtime backend operations used by a room session.
///
/// Implementations must be cheap to share: the runtime holds one in an
/// `Arc` and issues concurrent requests.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    /// Insert a row. Returns the confirmed message with its server-assigned
    /// id, timestamp and author display data.
    async fn insert_message(&self, draft: NewMessage) -> Result<Message, BackendError>;

    /// Rows of `room` created strictly after `since`, ascending by creation
    /// time. All rows when `since` is `None`.
    async fn fetch_messages(
        &self,
        room: &Room,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>, BackendError>;

    /// One row by id, with author display data.
    async fn fetch_message(&self, id: &MessageId) -> Result<Message, BackendError>;

    /// Open an insert-notification channel for `room`.
    ///
    /// Returning `Ok` means the subscription is acknowledged. The stream
    /// ending means the channel closed.
    async fn subscribe(&self, room: &Room) -> Result<mpsc::Receiver<InsertNotice>, BackendError>;

    /// Lightweight round trip used to measure latency.
    async fn probe(&self) -> Result<(), BackendError>;

    /// Record the room read marker.
    async fn upsert_read_status(&self, status: ReadStatus) -> Result<(), BackendError>;
}
