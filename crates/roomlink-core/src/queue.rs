//! Durable outbound message queue.
//!
//! Holds messages that could not be sent directly, drains them when the link
//! allows, and retries each item on its own backoff timer until its budget is
//! spent. The queue never touches storage or the network itself; it emits
//! [`QueueAction::Send`] and [`QueueAction::Persist`] for the driver.
//!
//! # Draining
//!
//! A drain snapshots the queued items and sends them one at a time, in queue
//! order. Only one drain runs at a time; a drain requested while one is in
//! progress is remembered and started when the current one finishes. Items
//! waiting on a retry timer are skipped by ordinary drains and re-sent alone
//! when their timer fires. A reconnection drain cancels those timers and
//! sends everything.
//!
//! Every send carries a deadline. A send that has not been answered within
//! `send_timeout` counts as a failed attempt, and a result that arrives for
//! it afterwards is ignored unless it is a delivery.
//!
//! # Retry budget
//!
//! The failure count is incremented before it is compared with the budget,
//! so an item with `max_retries = 3` is attempted exactly three times. The
//! delay after the n-th failure is `retry_backoff.delay(n)`: 2 s, then 4 s.

use std::{
    collections::{HashMap, VecDeque},
    time::Duration,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    backoff::Backoff,
    env::MonotonicInstant,
    error::QueueError,
    message::{Message, Metadata, QueueItemId, Room, UserId},
};

/// Attempts per item before it is moved to the failed list.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Time allowed for the backend to answer one send.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Queue configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    /// Attempt budget for newly queued items
    pub max_retries: u32,
    /// Delay policy between attempts of a single item
    pub retry_backoff: Backoff,
    /// Unanswered sends fail after this long
    pub send_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            retry_backoff: Backoff::default(),
            send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }
}

/// A message waiting to be sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    /// Stable local id
    pub id: QueueItemId,
    /// Message text
    pub content: String,
    /// Target room
    pub room: Room,
    /// Sending user
    pub user_id: UserId,
    /// When the item was queued
    pub created_at: DateTime<Utc>,
    /// Failed attempts so far
    pub retry_count: u32,
    /// Attempt budget
    pub max_retries: u32,
    /// Passthrough metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

/// Lifetime counters of a room's queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    /// Items ever admitted (including manual re-admissions)
    pub total_queued: u64,
    /// Items delivered
    pub total_processed: u64,
    /// Items that exhausted their budget
    pub total_failed: u64,
    /// Time of the last delivery
    pub last_processed_at: Option<DateTime<Utc>>,
}

/// Serializable queue state. This is what the durable store holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSnapshot {
    /// Owning room
    pub room: Room,
    /// Queued items in order
    pub items: Vec<QueueItem>,
    /// Counters
    pub stats: QueueStats,
}

/// An item that exhausted its retry budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedItem {
    /// The item as of its last attempt
    pub item: QueueItem,
    /// Reason of the last failure
    pub reason: String,
}

/// Why a drain was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainReason {
    /// New item admitted
    Enqueued,
    /// Link re-established. Cancels pending retry timers.
    Reconnected,
    /// Item re-admitted by the user
    Retried,
}

/// Actions returned by the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueAction {
    /// Send this item and report the outcome by id
    Send(QueueItem),
    /// Write this snapshot to durable storage
    Persist(QueueSnapshot),
    /// Item delivered; merge the confirmed message
    Delivered {
        /// Local id of the delivered item
        item_id: QueueItemId,
        /// Server-confirmed message
        message: Message,
    },
    /// Item exhausted its budget
    Failed {
        /// Local id of the failed item
        item_id: QueueItemId,
        /// Last failure reason
        reason: String,
    },
}

/// Outbound queue for one room.
#[derive(Debug, Clone)]
pub struct MessageQueue<I> {
    room: Room,
    config: QueueConfig,
    items: Vec<QueueItem>,
    stats: QueueStats,
    failed: Vec<FailedItem>,
    /// Sends awaiting a result, with their deadlines
    in_flight: HashMap<QueueItemId, I>,
    retry_at: HashMap<QueueItemId, I>,
    draining: bool,
    batch: VecDeque<QueueItemId>,
    current: Option<QueueItemId>,
    requested: Option<DrainReason>,
}

impl<I: MonotonicInstant> MessageQueue<I> {
    /// Create an empty queue for `room`.
    pub fn new(room: Room, config: QueueConfig) -> Self {
        Self {
            room,
            config,
            items: Vec::new(),
            stats: QueueStats::default(),
            failed: Vec::new(),
            in_flight: HashMap::new(),
            retry_at: HashMap::new(),
            draining: false,
            batch: VecDeque::new(),
            current: None,
            requested: None,
        }
    }

    /// Replace contents with a persisted snapshot.
    ///
    /// Snapshots for another room are ignored.
    pub fn restore(&mut self, snapshot: QueueSnapshot) {
        if snapshot.room != self.room {
            tracing::warn!(expected = %self.room, found = %snapshot.room, "ignoring foreign queue snapshot");
            return;
        }
        tracing::info!(room = %self.room, items = snapshot.items.len(), "queue restored");
        self.teardown();
        self.items = snapshot.items;
        self.stats = snapshot.stats;
    }

    /// Configuration
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Queued items in order
    pub fn items(&self) -> &[QueueItem] {
        &self.items
    }

    /// Items that exhausted their budget this session
    pub fn failed(&self) -> &[FailedItem] {
        &self.failed
    }

    /// Counters
    pub fn stats(&self) -> &QueueStats {
        &self.stats
    }

    /// Number of queued items
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether nothing is queued
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Whether a drain is in progress
    pub fn is_draining(&self) -> bool {
        self.draining
    }

    /// Whether `id` is queued
    pub fn contains(&self, id: QueueItemId) -> bool {
        self.items.iter().any(|item| item.id == id)
    }

    /// Serializable state
    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot { room: self.room.clone(), items: self.items.clone(), stats: self.stats.clone() }
    }

    /// Admit an item.
    pub fn enqueue(&mut self, item: QueueItem) -> Vec<QueueAction> {
        tracing::info!(item_id = %item.id, room = %self.room, "message queued");
        self.items.push(item);
        self.stats.total_queued += 1;
        vec![self.persist()]
    }

    /// Whether a send of `id` awaits its result
    pub fn is_in_flight(&self, id: QueueItemId) -> bool {
        self.in_flight.contains_key(&id)
    }

    /// Start a drain, or remember the request if one is running.
    pub fn process_queue(&mut self, reason: DrainReason, now: I) -> Vec<QueueAction> {
        if self.draining {
            tracing::debug!(?reason, "drain already running, deferring");
            self.requested = Some(match (self.requested, reason) {
                (Some(DrainReason::Reconnected), _) | (_, DrainReason::Reconnected) => {
                    DrainReason::Reconnected
                },
                _ => reason,
            });
            return vec![];
        }

        if reason == DrainReason::Reconnected && !self.retry_at.is_empty() {
            tracing::debug!(timers = self.retry_at.len(), "cancelling retry timers for reconnect drain");
            self.retry_at.clear();
        }

        self.batch = self
            .items
            .iter()
            .map(|item| item.id)
            .filter(|id| !self.in_flight.contains_key(id) && !self.retry_at.contains_key(id))
            .collect();
        if self.batch.is_empty() {
            return vec![];
        }

        tracing::info!(?reason, items = self.batch.len(), "draining queue");
        self.draining = true;
        self.advance(now)
    }

    /// Stop the running drain after the in-flight send. Used when the link
    /// goes down mid-drain.
    pub fn suspend_drain(&mut self) {
        if self.draining {
            tracing::debug!(remaining = self.batch.len(), "drain suspended");
        }
        self.batch.clear();
        self.draining = false;
        self.current = None;
        self.requested = None;
    }

    /// Item delivered. Late deliveries of timed-out sends still count.
    pub fn handle_delivered(
        &mut self,
        id: QueueItemId,
        message: Message,
        processed_at: DateTime<Utc>,
        now: I,
    ) -> Vec<QueueAction> {
        self.in_flight.remove(&id);

        let mut actions = Vec::new();
        if let Some(pos) = self.items.iter().position(|item| item.id == id) {
            self.items.remove(pos);
            self.retry_at.remove(&id);
            self.stats.total_processed += 1;
            self.stats.last_processed_at = Some(processed_at);
            tracing::info!(item_id = %id, message_id = %message.id, "queued message delivered");
            actions.push(QueueAction::Delivered { item_id: id, message });
            actions.push(self.persist());
        } else {
            tracing::debug!(item_id = %id, "delivered item no longer queued");
            actions.push(QueueAction::Delivered { item_id: id, message });
        }

        actions.extend(self.finish_current(id, now));
        actions
    }

    /// Item send failed. Schedules a retry or moves it to the failed list.
    ///
    /// Failures of sends that are no longer in flight (timed out, or
    /// forgotten by [`MessageQueue::teardown`]) were already accounted for
    /// and are ignored.
    pub fn handle_send_failed(&mut self, id: QueueItemId, reason: &str, now: I) -> Vec<QueueAction> {
        if self.in_flight.remove(&id).is_none() {
            tracing::debug!(item_id = %id, %reason, "ignoring failure of a send no longer in flight");
            return vec![];
        }

        let mut actions = Vec::new();
        if let Some(pos) = self.items.iter().position(|item| item.id == id) {
            let item = &mut self.items[pos];
            item.retry_count += 1;

            if item.retry_count >= item.max_retries {
                let item = self.items.remove(pos);
                tracing::warn!(item_id = %id, attempts = item.retry_count, %reason, "message failed permanently");
                self.retry_at.remove(&id);
                self.stats.total_failed += 1;
                self.failed.push(FailedItem { item, reason: reason.to_string() });
                actions.push(QueueAction::Failed { item_id: id, reason: reason.to_string() });
            } else {
                let delay = self.config.retry_backoff.delay(item.retry_count);
                tracing::warn!(
                    item_id = %id,
                    attempt = item.retry_count,
                    delay_ms = delay.as_millis() as u64,
                    %reason,
                    "send failed, retry scheduled"
                );
                self.retry_at.insert(id, now + delay);
            }
            actions.push(self.persist());
        }

        actions.extend(self.finish_current(id, now));
        actions
    }

    /// Expire unanswered sends and fire due retry timers.
    ///
    /// With `can_send` false the due retry timers are dropped and the items
    /// wait for the next reconnection drain.
    pub fn tick(&mut self, now: I, can_send: bool) -> Vec<QueueAction> {
        let mut actions = Vec::new();

        let mut expired: Vec<(QueueItemId, I)> =
            self.in_flight.iter().filter(|(_, at)| now >= **at).map(|(id, at)| (*id, *at)).collect();
        expired.sort_by_key(|(_, at)| *at);
        for (id, _) in expired {
            tracing::warn!(item_id = %id, timeout_ms = self.config.send_timeout.as_millis() as u64, "send unanswered");
            actions.extend(self.handle_send_failed(id, "send timed out", now));
        }

        let due: Vec<QueueItemId> = self
            .items
            .iter()
            .map(|item| item.id)
            .filter(|id| self.retry_at.get(id).is_some_and(|at| now >= *at))
            .collect();

        for id in due {
            self.retry_at.remove(&id);
            if !can_send {
                tracing::debug!(item_id = %id, "retry timer fired while offline, deferring");
                continue;
            }
            if self.in_flight.contains_key(&id) {
                continue;
            }
            self.in_flight.insert(id, now + self.config.send_timeout);
            if let Some(item) = self.items.iter().find(|item| item.id == id) {
                tracing::debug!(item_id = %id, attempt = item.retry_count + 1, "retrying item");
                actions.push(QueueAction::Send(item.clone()));
            }
        }
        actions
    }

    /// Re-admit an item with a fresh budget.
    ///
    /// Works for queued items (cancels their timer) and for items in the
    /// failed list (counted as newly queued).
    pub fn retry(&mut self, id: QueueItemId) -> Result<Vec<QueueAction>, QueueError> {
        if let Some(item) = self.items.iter_mut().find(|item| item.id == id) {
            item.retry_count = 0;
            self.retry_at.remove(&id);
            tracing::info!(item_id = %id, "queued item retry requested");
            return Ok(vec![self.persist()]);
        }

        let pos = self
            .failed
            .iter()
            .position(|failed| failed.item.id == id)
            .ok_or(QueueError::UnknownItem(id))?;
        let mut item = self.failed.remove(pos).item;
        item.retry_count = 0;

        tracing::info!(item_id = %id, "failed item re-admitted");
        self.items.push(item);
        self.stats.total_queued += 1;
        Ok(vec![self.persist()])
    }

    /// Drop an item from the queue or the failed list.
    pub fn remove(&mut self, id: QueueItemId) -> Result<Vec<QueueAction>, QueueError> {
        if let Some(pos) = self.items.iter().position(|item| item.id == id) {
            self.items.remove(pos);
            self.retry_at.remove(&id);
            tracing::info!(item_id = %id, "queued item removed");
            return Ok(vec![self.persist()]);
        }

        let pos = self
            .failed
            .iter()
            .position(|failed| failed.item.id == id)
            .ok_or(QueueError::UnknownItem(id))?;
        self.failed.remove(pos);
        tracing::info!(item_id = %id, "failed item discarded");
        Ok(vec![])
    }

    /// Drop every queued and failed item. Counters are kept.
    pub fn clear(&mut self) -> Vec<QueueAction> {
        tracing::info!(items = self.items.len(), failed = self.failed.len(), "queue cleared");
        self.items.clear();
        self.failed.clear();
        self.retry_at.clear();
        self.batch.clear();
        vec![self.persist()]
    }

    /// Earliest retry timer or send deadline.
    pub fn next_deadline(&self) -> Option<I> {
        self.retry_at.values().chain(self.in_flight.values()).min().copied()
    }

    /// Cancel every timer and forget in-flight sends.
    pub fn teardown(&mut self) {
        self.retry_at.clear();
        self.in_flight.clear();
        self.batch.clear();
        self.draining = false;
        self.current = None;
        self.requested = None;
    }

    fn persist(&self) -> QueueAction {
        QueueAction::Persist(self.snapshot())
    }

    fn finish_current(&mut self, id: QueueItemId, now: I) -> Vec<QueueAction> {
        if self.draining && self.current == Some(id) {
            self.current = None;
            return self.advance(now);
        }
        vec![]
    }

    fn advance(&mut self, now: I) -> Vec<QueueAction> {
        while let Some(id) = self.batch.pop_front() {
            if self.in_flight.contains_key(&id) || self.retry_at.contains_key(&id) {
                continue;
            }
            if let Some(item) = self.items.iter().find(|item| item.id == id) {
                self.in_flight.insert(id, now + self.config.send_timeout);
                self.current = Some(id);
                return vec![QueueAction::Send(item.clone())];
            }
        }

        self.draining = false;
        self.current = None;
        tracing::debug!("drain complete");

        match self.requested.take() {
            Some(reason) => self.process_queue(reason, now),
            None => vec![],
        }
    }
}
