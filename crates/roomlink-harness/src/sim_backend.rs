//! In-memory realtime backend with fault injection.
//!
//! Rows get sequential ids (`m1`, `m2`, ...) and strictly increasing
//! timestamps one second apart, so ordering is reproducible regardless of
//! the test clock. Every insert, including rows injected on behalf of other
//! users, notifies the matching subscribers.
//!
//! Every operation has a synchronous form used by [`crate::SimDriver`]; the
//! [`Backend`] impl wraps the same calls for the async runtime.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use roomlink_client::{Backend, BackendError};
use roomlink_core::{
    Author, InsertNotice, Message, MessageId, NewMessage, ReadStatus, Room, UserId,
};
use tokio::sync::mpsc;

/// Row timestamp of `m1`.
const FIRST_ROW_SECS: i64 = 1_704_067_200;

/// Capacity of each simulated push channel.
const PUSH_CAPACITY: usize = 256;

#[derive(Default)]
struct BackendState {
    rows: Vec<Message>,
    subscribers: Vec<(Room, mpsc::Sender<InsertNotice>)>,
    read_status: HashMap<(Room, UserId), ReadStatus>,
    offline: bool,
    fail_inserts: usize,
    hold_inserts: usize,
    fail_subscribes: usize,
    fail_probes: usize,
    fail_fetches: usize,
    insert_attempts: usize,
    subscribe_attempts: usize,
    probes: usize,
    fetches: usize,
}

impl BackendState {
    fn reachable(&self) -> Result<(), BackendError> {
        if self.offline {
            return Err(BackendError::Network("backend unreachable".to_string()));
        }
        Ok(())
    }

    fn insert(&mut self, draft: NewMessage) -> Message {
        let n = self.rows.len() as i64 + 1;
        let created_at = DateTime::<Utc>::UNIX_EPOCH + TimeDelta::seconds(FIRST_ROW_SECS + n);
        let message = Message {
            id: MessageId(format!("m{n}")),
            room: draft.room,
            content: draft.content,
            author: Author {
                display_name: Some(format!("User {}", draft.author_id)),
                avatar_url: None,
                id: draft.author_id,
            },
            created_at,
            metadata: draft.metadata,
        };

        let notice = InsertNotice { id: message.id.clone(), room: message.room.clone() };
        self.subscribers.retain(|(_, tx)| !tx.is_closed());
        for (room, tx) in &self.subscribers {
            if *room == notice.room && tx.try_send(notice.clone()).is_err() {
                tracing::warn!(id = %notice.id, "simulated push channel full, notice dropped");
            }
        }

        self.rows.push(message.clone());
        message
    }
}

/// Simulated backend. Clones share state.
#[derive(Clone, Default)]
pub struct SimBackend {
    state: Arc<Mutex<BackendState>>,
}

impl SimBackend {
    /// Empty, reachable backend.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BackendState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every request fail with a network error.
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Fail the next `count` inserts with a server error.
    pub fn fail_next_inserts(&self, count: usize) {
        self.lock().fail_inserts = count;
    }

    /// Leave the next `count` inserts unanswered. The rows are never written.
    pub fn hold_next_inserts(&self, count: usize) {
        self.lock().hold_inserts = count;
    }

    /// Consume one held insert, counting it as an attempt. Returns false
    /// when no insert is being held.
    pub fn take_held_insert(&self) -> bool {
        let mut state = self.lock();
        if state.hold_inserts == 0 {
            return false;
        }
        state.hold_inserts -= 1;
        state.insert_attempts += 1;
        true
    }

    /// Fail the next `count` subscribe requests.
    pub fn fail_next_subscribes(&self, count: usize) {
        self.lock().fail_subscribes = count;
    }

    /// Fail the next `count` latency probes.
    pub fn fail_next_probes(&self, count: usize) {
        self.lock().fail_probes = count;
    }

    /// Fail the next `count` fetches of message lists.
    pub fn fail_next_fetches(&self, count: usize) {
        self.lock().fail_fetches = count;
    }

    /// End every open push stream.
    pub fn close_subscriptions(&self) {
        self.lock().subscribers.clear();
    }

    /// Deliver `notice` on every open push channel, whatever room it was
    /// opened for. Models a server-side filter that lets foreign rows through.
    pub fn push_notice(&self, notice: InsertNotice) {
        let mut state = self.lock();
        state.subscribers.retain(|(_, tx)| !tx.is_closed());
        for (_, tx) in &state.subscribers {
            if tx.try_send(notice.clone()).is_err() {
                tracing::warn!(id = %notice.id, "simulated push channel full, notice dropped");
            }
        }
    }

    /// Insert a row on behalf of another user, bypassing fault injection.
    pub fn inject_remote_message(&self, room: &Room, author: &str, content: &str) -> Message {
        self.lock().insert(NewMessage {
            content: content.to_string(),
            author_id: UserId::from(author),
            room: room.clone(),
            metadata: None,
        })
    }

    /// Every row of `room` in insertion order.
    pub fn messages(&self, room: &Room) -> Vec<Message> {
        self.lock().rows.iter().filter(|m| m.room == *room).cloned().collect()
    }

    /// Stored read marker.
    pub fn read_status(&self, room: &Room, user: &UserId) -> Option<ReadStatus> {
        self.lock().read_status.get(&(room.clone(), user.clone())).cloned()
    }

    /// Insert requests received, including failed ones.
    pub fn insert_attempts(&self) -> usize {
        self.lock().insert_attempts
    }

    /// Subscribe requests received, including failed ones.
    pub fn subscribe_attempts(&self) -> usize {
        self.lock().subscribe_attempts
    }

    /// Latency probes received.
    pub fn probe_count(&self) -> usize {
        self.lock().probes
    }

    /// List fetches received.
    pub fn fetch_count(&self) -> usize {
        self.lock().fetches
    }

    /// Open push subscribers.
    pub fn subscriber_count(&self) -> usize {
        let mut state = self.lock();
        state.subscribers.retain(|(_, tx)| !tx.is_closed());
        state.subscribers.len()
    }

    /// Synchronous insert.
    pub fn insert_now(&self, draft: NewMessage) -> Result<Message, BackendError> {
        let mut state = self.lock();
        state.insert_attempts += 1;
        state.reachable()?;
        if state.fail_inserts > 0 {
            state.fail_inserts -= 1;
            return Err(BackendError::Server("injected insert failure".to_string()));
        }
        Ok(state.insert(draft))
    }

    /// Synchronous list fetch.
    pub fn fetch_messages_now(
        &self,
        room: &Room,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>, BackendError> {
        let mut state = self.lock();
        state.fetches += 1;
        state.reachable()?;
        if state.fail_fetches > 0 {
            state.fail_fetches -= 1;
            return Err(BackendError::Timeout);
        }

        let mut rows: Vec<_> = state
            .rows
            .iter()
            .filter(|m| m.room == *room && since.is_none_or(|since| m.created_at > since))
            .cloned()
            .collect();
        rows.sort_by_key(|m| m.created_at);
        Ok(rows)
    }

    /// Synchronous fetch by id.
    pub fn fetch_message_now(&self, id: &MessageId) -> Result<Message, BackendError> {
        let state = self.lock();
        state.reachable()?;
        state
            .rows
            .iter()
            .find(|m| m.id == *id)
            .cloned()
            .ok_or_else(|| BackendError::NotFound(id.clone()))
    }

    /// Synchronous subscribe.
    pub fn subscribe_now(&self, room: &Room) -> Result<mpsc::Receiver<InsertNotice>, BackendError> {
        let mut state = self.lock();
        state.subscribe_attempts += 1;
        state.reachable()?;
        if state.fail_subscribes > 0 {
            state.fail_subscribes -= 1;
            return Err(BackendError::Rejected("injected subscribe failure".to_string()));
        }

        let (tx, rx) = mpsc::channel(PUSH_CAPACITY);
        state.subscribers.push((room.clone(), tx));
        Ok(rx)
    }

    /// Synchronous probe.
    pub fn probe_now(&self) -> Result<(), BackendError> {
        let mut state = self.lock();
        state.probes += 1;
        state.reachable()?;
        if state.fail_probes > 0 {
            state.fail_probes -= 1;
            return Err(BackendError::Timeout);
        }
        Ok(())
    }

    /// Synchronous read marker upsert.
    pub fn upsert_read_status_now(&self, status: ReadStatus) -> Result<(), BackendError> {
        let mut state = self.lock();
        state.reachable()?;
        state.read_status.insert((status.room.clone(), status.user_id.clone()), status);
        Ok(())
    }
}

#[async_trait]
impl Backend for SimBackend {
    async fn insert_message(&self, draft: NewMessage) -> Result<Message, BackendError> {
        if self.take_held_insert() {
            std::future::pending::<()>().await;
        }
        self.insert_now(draft)
    }

    async fn fetch_messages(
        &self,
        room: &Room,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>, BackendError> {
        self.fetch_messages_now(room, since)
    }

    async fn fetch_message(&self, id: &MessageId) -> Result<Message, BackendError> {
        self.fetch_message_now(id)
    }

    async fn subscribe(&self, room: &Room) -> Result<mpsc::Receiver<InsertNotice>, BackendError> {
        self.subscribe_now(room)
    }

    async fn probe(&self) -> Result<(), BackendError> {
        self.probe_now()
    }

    async fn upsert_read_status(&self, status: ReadStatus) -> Result<(), BackendError> {
        self.upsert_read_status_now(status)
    }
}
