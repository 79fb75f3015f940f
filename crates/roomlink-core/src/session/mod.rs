//! Room session orchestrator.
//!
//! [`Session`] owns every state machine of one room view: the connection
//! manager, the outbound queue, the fallback poller and the timeline. It
//! consumes [`SessionEvent`]s and returns [`SessionAction`]s, reading time and
//! randomness from its [`Environment`].
//!
//! # Send policy
//!
//! Compose validation runs first and is the only way a send can fail. While
//! connected the message is written directly; if that write fails or goes
//! unanswered for the queue's `send_timeout`, or the link is not up, it is
//! queued. Either way an optimistic entry is shown
//! immediately and replaced by the confirmed message once the server assigns
//! an id.
//!
//! # Merge policy
//!
//! Load, push, poll, direct-send and queue deliveries all merge through the
//! [`Timeline`]: ascending creation time, duplicates by id dropped.

mod action;
mod event;
mod view;

use std::{collections::HashMap, time::Duration};

use chrono::{DateTime, Utc};

pub use self::{
    action::SessionAction,
    event::{FetchPurpose, SessionEvent},
    view::{ConnectionInfo, SessionView},
};
use crate::{
    connection::{ConnectionAction, ConnectionConfig, ConnectionManager, ConnectionStatus},
    env::Environment,
    error::{SendError, SessionError},
    message::{Message, Metadata, NewMessage, QueueItemId, ReadStatus, Room, UserId},
    poller::{FallbackPoller, PollerAction, PollerConfig},
    queue::{DrainReason, MessageQueue, QueueAction, QueueConfig, QueueItem, QueueSnapshot},
    timeline::{PendingEntry, PendingState, Timeline},
};

/// Aggregated configuration of one session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionConfig {
    /// Link and heartbeat settings
    pub connection: ConnectionConfig,
    /// Outbound queue settings
    pub queue: QueueConfig,
    /// Fallback poller settings
    pub poller: PollerConfig,
}

#[derive(Debug, Clone)]
struct DirectSend<I> {
    draft: NewMessage,
    created_at: DateTime<Utc>,
    deadline: I,
}

/// One room view's messaging state.
pub struct Session<E: Environment> {
    env: E,
    room: Room,
    user: Option<UserId>,
    connection: ConnectionManager<E::Instant>,
    queue: MessageQueue<E::Instant>,
    poller: FallbackPoller<E::Instant>,
    timeline: Timeline,
    direct_sends: HashMap<QueueItemId, DirectSend<E::Instant>>,
    error: Option<String>,
    read_status: Option<ReadStatus>,
    started: bool,
    ever_connected: bool,
    last_connected_at: Option<DateTime<Utc>>,
    last_disconnected_at: Option<DateTime<Utc>>,
}

impl<E: Environment> Session<E> {
    /// Create an idle session. Nothing happens until [`SessionEvent::Start`].
    ///
    /// `user` is `None` for an anonymous viewer, who can read but not send.
    pub fn new(env: E, room: Room, user: Option<UserId>, config: SessionConfig) -> Self {
        Self {
            connection: ConnectionManager::new(config.connection),
            queue: MessageQueue::new(room.clone(), config.queue),
            poller: FallbackPoller::new(config.poller),
            timeline: Timeline::new(),
            direct_sends: HashMap::new(),
            error: None,
            read_status: None,
            started: false,
            ever_connected: false,
            last_connected_at: None,
            last_disconnected_at: None,
            env,
            room,
            user,
        }
    }

    /// Load a persisted queue. Restored items are shown as queued entries.
    pub fn restore_queue(&mut self, snapshot: QueueSnapshot) {
        self.queue.restore(snapshot);
        for item in self.queue.items() {
            self.timeline.apply_pending(PendingEntry {
                id: item.id,
                content: item.content.clone(),
                created_at: item.created_at,
                state: PendingState::Queued,
            });
        }
    }

    /// Room this session belongs to
    pub fn room(&self) -> &Room {
        &self.room
    }

    /// Connection state machine
    pub fn connection(&self) -> &ConnectionManager<E::Instant> {
        &self.connection
    }

    /// Outbound queue
    pub fn queue(&self) -> &MessageQueue<E::Instant> {
        &self.queue
    }

    /// Fallback poller
    pub fn poller(&self) -> &FallbackPoller<E::Instant> {
        &self.poller
    }

    /// Visible messages
    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    /// User-facing error
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Whether a direct write of `local_id` awaits its result.
    pub fn is_sending_directly(&self, local_id: QueueItemId) -> bool {
        self.direct_sends.contains_key(&local_id)
    }

    /// Whether `generation` belongs to the live subscription attempt.
    pub fn is_current_generation(&self, generation: u64) -> bool {
        self.connection.is_current_generation(generation)
    }

    /// Process one event.
    ///
    /// Due timers are always fired afterwards, so the driver only needs to
    /// send [`SessionEvent::Tick`] when [`Session::next_deadline`] passes.
    ///
    /// # Errors
    ///
    /// - `SessionError::Send` for compose validation failures
    /// - `SessionError::Queue` for manual operations on unknown items
    pub fn handle(&mut self, event: SessionEvent) -> Result<Vec<SessionAction>, SessionError> {
        let now = self.env.now();
        let mut out = Vec::new();

        match event {
            SessionEvent::Start => {
                if !self.started {
                    tracing::info!(room = %self.room, "session started");
                    self.started = true;
                    let actions = self.connection.connect(now);
                    self.apply_connection(actions, &mut out);
                    out.push(SessionAction::FetchMessages { purpose: FetchPurpose::Load, since: None });
                }
            },
            SessionEvent::SendMessage { content, metadata } => {
                self.send_message(content, metadata, &mut out)?;
            },
            SessionEvent::LoadMessages => {
                out.push(SessionAction::FetchMessages { purpose: FetchPurpose::Load, since: None });
            },
            SessionEvent::Reconnect => {
                let actions = self.connection.reconnect(now, self.env.random_u64());
                self.apply_connection(actions, &mut out);
            },
            SessionEvent::ResetConnection => {
                tracing::info!("connection reset requested");
                self.connection.reset_reconnection_attempts();
                self.error = None;
                let actions = self.connection.reconnect(now, self.env.random_u64());
                self.apply_connection(actions, &mut out);
            },
            SessionEvent::Disconnect => {
                let actions = self.connection.disconnect(now);
                self.queue.suspend_drain();
                self.apply_connection(actions, &mut out);
            },
            SessionEvent::MeasureLatency => {
                let actions = self.connection.measure_latency(now);
                self.apply_connection(actions, &mut out);
            },
            SessionEvent::RetryItem(id) => {
                let actions = self.queue.retry(id)?;
                self.apply_queue(actions, &mut out);
                if let Some(item) = self.queue.items().iter().find(|item| item.id == id) {
                    self.timeline.apply_pending(PendingEntry {
                        id,
                        content: item.content.clone(),
                        created_at: item.created_at,
                        state: PendingState::Queued,
                    });
                }
                self.drain_if_connected(DrainReason::Retried, &mut out);
            },
            SessionEvent::RemoveItem(id) => {
                let actions = self.queue.remove(id)?;
                self.apply_queue(actions, &mut out);
                self.timeline.revert_pending(id);
            },
            SessionEvent::ClearQueue => {
                let ids: Vec<QueueItemId> = self
                    .queue
                    .items()
                    .iter()
                    .map(|item| item.id)
                    .chain(self.queue.failed().iter().map(|failed| failed.item.id))
                    .collect();
                let actions = self.queue.clear();
                self.apply_queue(actions, &mut out);
                for id in ids {
                    self.timeline.revert_pending(id);
                }
            },
            SessionEvent::MarkRead => self.mark_read(&mut out)?,
            SessionEvent::Subscribed { generation } => {
                let actions = self.connection.handle_subscribed(generation, now);
                self.apply_connection(actions, &mut out);
            },
            SessionEvent::SubscribeFailed { generation, reason } => {
                let actions = self.connection.handle_subscribe_failed(
                    generation,
                    &reason,
                    now,
                    self.env.random_u64(),
                );
                self.apply_connection(actions, &mut out);
            },
            SessionEvent::ChannelClosed { generation } => {
                if self.connection.is_current_generation(generation) {
                    let actions = self.connection.handle_link_failure(
                        "channel closed",
                        now,
                        self.env.random_u64(),
                    );
                    self.apply_connection(actions, &mut out);
                }
            },
            SessionEvent::PushReceived(message) => {
                if message.room == self.room {
                    self.observe(message);
                } else {
                    tracing::warn!(expected = %self.room, found = %message.room, "dropping push for another room");
                }
            },
            SessionEvent::ProbeSucceeded { probe_id } => {
                self.connection.handle_probe_succeeded(probe_id, now);
            },
            SessionEvent::ProbeFailed { probe_id, reason } => {
                let actions = self.connection.handle_probe_failed(
                    probe_id,
                    &reason,
                    now,
                    self.env.random_u64(),
                );
                self.apply_connection(actions, &mut out);
            },
            SessionEvent::DirectSendSucceeded { local_id, message } => {
                self.error = None;
                if self.direct_sends.remove(&local_id).is_none() && self.queue.contains(local_id) {
                    tracing::info!(%local_id, "late direct send confirmation, settling queued copy");
                    let actions =
                        self.queue.handle_delivered(local_id, message, self.env.wall_clock(), now);
                    self.apply_queue(actions, &mut out);
                } else {
                    self.poller.observe(message.created_at);
                    self.timeline.confirm_pending(local_id, message);
                }
            },
            SessionEvent::DirectSendFailed { local_id, reason } => {
                self.direct_send_failed(local_id, &reason, &mut out);
            },
            SessionEvent::QueueSendSucceeded { item_id, message } => {
                let actions = self.queue.handle_delivered(item_id, message, self.env.wall_clock(), now);
                self.apply_queue(actions, &mut out);
            },
            SessionEvent::QueueSendFailed { item_id, reason } => {
                let actions = self.queue.handle_send_failed(item_id, &reason, now);
                self.apply_queue(actions, &mut out);
            },
            SessionEvent::MessagesFetched { purpose, messages } => {
                if purpose == FetchPurpose::Poll {
                    self.poller.handle_fetched(&messages);
                }
                let fetched = messages.len();
                let mut merged = 0usize;
                for message in messages {
                    if message.room == self.room && self.observe(message) {
                        merged += 1;
                    }
                }
                tracing::debug!(?purpose, fetched, merged, "messages fetched");
                if purpose == FetchPurpose::Load {
                    self.error = None;
                }
            },
            SessionEvent::FetchFailed { purpose, reason } => match purpose {
                FetchPurpose::Poll => self.poller.handle_fetch_failed(&reason),
                FetchPurpose::Load => {
                    tracing::warn!(%reason, "message load failed");
                    self.error = Some(format!("failed to load messages: {reason}"));
                },
                FetchPurpose::CatchUp => tracing::warn!(%reason, "catch-up fetch failed"),
            },
            SessionEvent::NetworkChanged { online } => {
                let actions = self.connection.set_online(online, now, self.env.random_u64());
                self.apply_connection(actions, &mut out);
            },
            SessionEvent::NetworkChecked { online } => {
                let actions = self.connection.check_network_status(online, now, self.env.random_u64());
                self.apply_connection(actions, &mut out);
            },
            SessionEvent::Tick => {},
        }

        self.poll_timers(&mut out);
        Ok(out)
    }

    /// Earliest instant at which a timer is due.
    pub fn next_deadline(&self) -> Option<E::Instant> {
        [
            self.connection.next_deadline(),
            self.queue.next_deadline(),
            self.poller.next_deadline(),
            self.direct_sends.values().map(|send| send.deadline).min(),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    /// Time until [`Session::next_deadline`], if any.
    pub fn time_until_deadline(&self) -> Option<Duration> {
        let now = self.env.now();
        self.next_deadline().map(|deadline| if deadline > now { deadline - now } else { Duration::ZERO })
    }

    /// Cancel every timer in every state machine.
    pub fn teardown(&mut self) {
        tracing::info!(room = %self.room, "session torn down");
        self.connection.teardown();
        self.queue.teardown();
        self.poller.teardown();
        self.direct_sends.clear();
        self.started = false;
    }

    /// Snapshot for the UI.
    pub fn view(&self) -> SessionView {
        SessionView {
            room: self.room.clone(),
            messages: self.timeline.messages().to_vec(),
            pending: self.timeline.pending().to_vec(),
            failed: self.queue.failed().to_vec(),
            connection: ConnectionInfo {
                status: self.connection.status(),
                is_online: self.connection.is_online(),
                latency: self.connection.latency(),
                quality: self.connection.quality(),
                reconnect_attempts: self.connection.reconnect_attempts(),
                max_reconnect_attempts: self.connection.max_reconnect_attempts(),
                reconnect_delay: self.connection.reconnect_delay(),
                last_connected_at: self.last_connected_at,
                last_disconnected_at: self.last_disconnected_at,
                error: self.connection.error().map(str::to_string),
            },
            queue_size: self.queue.len(),
            queue_stats: self.queue.stats().clone(),
            is_fallback_mode: self.poller.is_active(),
            error: self.error.clone(),
            read_status: self.read_status.clone(),
        }
    }

    fn send_message(
        &mut self,
        content: String,
        metadata: Option<Metadata>,
        out: &mut Vec<SessionAction>,
    ) -> Result<(), SessionError> {
        let user = self.user.clone().ok_or(SendError::NotAuthenticated)?;
        if content.trim().is_empty() {
            return Err(SendError::EmptyContent.into());
        }

        let local_id = QueueItemId::new(self.env.random_u128());
        let created_at = self.env.wall_clock();

        if self.connection.status() == ConnectionStatus::Connected {
            tracing::debug!(%local_id, "sending directly");
            self.timeline.apply_pending(PendingEntry {
                id: local_id,
                content: content.clone(),
                created_at,
                state: PendingState::Sending,
            });
            let draft = NewMessage { content, author_id: user, room: self.room.clone(), metadata };
            let deadline = self.env.now() + self.queue.config().send_timeout;
            self.direct_sends.insert(local_id, DirectSend { draft: draft.clone(), created_at, deadline });
            out.push(SessionAction::InsertMessage { local_id, draft });
            return Ok(());
        }

        tracing::debug!(%local_id, status = ?self.connection.status(), "not connected, queueing");
        self.timeline.apply_pending(PendingEntry {
            id: local_id,
            content: content.clone(),
            created_at,
            state: PendingState::Queued,
        });
        let item = QueueItem {
            id: local_id,
            content,
            room: self.room.clone(),
            user_id: user,
            created_at,
            retry_count: 0,
            max_retries: self.queue.config().max_retries,
            metadata,
        };
        let actions = self.queue.enqueue(item);
        self.apply_queue(actions, out);
        Ok(())
    }

    fn direct_send_failed(&mut self, local_id: QueueItemId, reason: &str, out: &mut Vec<SessionAction>) {
        let Some(DirectSend { draft, created_at, .. }) = self.direct_sends.remove(&local_id) else {
            tracing::debug!(%local_id, "ignoring failure of unknown direct send");
            return;
        };

        tracing::warn!(%local_id, %reason, "direct send failed, queueing");
        self.timeline.set_pending_state(local_id, PendingState::Queued);
        let item = QueueItem {
            id: local_id,
            content: draft.content,
            room: draft.room,
            user_id: draft.author_id,
            created_at,
            retry_count: 0,
            max_retries: self.queue.config().max_retries,
            metadata: draft.metadata,
        };
        let actions = self.queue.enqueue(item);
        self.apply_queue(actions, out);
        self.drain_if_connected(DrainReason::Enqueued, out);
    }

    fn mark_read(&mut self, out: &mut Vec<SessionAction>) -> Result<(), SessionError> {
        if !self.room.supports_read_status() {
            tracing::debug!(room = %self.room, "read status not tracked for this room");
            return Ok(());
        }
        let user_id = self.user.clone().ok_or(SendError::NotAuthenticated)?;

        let status = ReadStatus { last_read_at: self.env.wall_clock(), room: self.room.clone(), user_id };
        self.read_status = Some(status.clone());
        out.push(SessionAction::PersistReadStatus(status));
        Ok(())
    }

    fn observe(&mut self, message: Message) -> bool {
        self.poller.observe(message.created_at);
        self.timeline.merge(message)
    }

    fn drain_if_connected(&mut self, reason: DrainReason, out: &mut Vec<SessionAction>) {
        if self.connection.status() == ConnectionStatus::Connected {
            let actions = self.queue.process_queue(reason, self.env.now());
            self.apply_queue(actions, out);
        }
    }

    fn apply_connection(&mut self, actions: Vec<ConnectionAction>, out: &mut Vec<SessionAction>) {
        for action in actions {
            match action {
                ConnectionAction::Subscribe { generation } => {
                    out.push(SessionAction::Subscribe { room: self.room.clone(), generation });
                },
                ConnectionAction::Unsubscribe => out.push(SessionAction::Unsubscribe),
                ConnectionAction::Probe { probe_id } => out.push(SessionAction::Probe { probe_id }),
                ConnectionAction::Connected => {
                    self.last_connected_at = Some(self.env.wall_clock());
                    self.error = None;
                    if self.ever_connected {
                        out.push(SessionAction::FetchMessages {
                            purpose: FetchPurpose::CatchUp,
                            since: self.poller.last_seen(),
                        });
                    }
                    self.ever_connected = true;
                    self.drain_if_connected(DrainReason::Reconnected, out);
                },
                ConnectionAction::Disconnected { reason } => {
                    tracing::debug!(%reason, "link lost, suspending queue drain");
                    self.last_disconnected_at = Some(self.env.wall_clock());
                    self.queue.suspend_drain();
                },
                ConnectionAction::Exhausted { attempts } => {
                    self.error = Some(format!("connection failed after {attempts} attempts"));
                },
            }
        }
    }

    fn apply_queue(&mut self, actions: Vec<QueueAction>, out: &mut Vec<SessionAction>) {
        for action in actions {
            match action {
                QueueAction::Send(item) => out.push(SessionAction::SendQueued { item }),
                QueueAction::Persist(snapshot) => out.push(SessionAction::PersistQueue(snapshot)),
                QueueAction::Delivered { item_id, message } => {
                    self.poller.observe(message.created_at);
                    self.timeline.confirm_pending(item_id, message);
                },
                QueueAction::Failed { item_id, reason } => {
                    self.timeline.set_pending_state(item_id, PendingState::Failed { reason });
                },
            }
        }
    }

    fn apply_poller(&mut self, actions: Vec<PollerAction>, out: &mut Vec<SessionAction>) {
        for action in actions {
            match action {
                PollerAction::Fetch { since } => {
                    out.push(SessionAction::FetchMessages { purpose: FetchPurpose::Poll, since });
                },
                PollerAction::Activated | PollerAction::Deactivated => {},
            }
        }
    }

    fn poll_timers(&mut self, out: &mut Vec<SessionAction>) {
        let now = self.env.now();

        let actions = self.connection.tick(now, self.env.random_u64());
        self.apply_connection(actions, out);

        let mut unanswered: Vec<(QueueItemId, E::Instant)> = self
            .direct_sends
            .iter()
            .filter(|(_, send)| now >= send.deadline)
            .map(|(id, send)| (*id, send.deadline))
            .collect();
        unanswered.sort_by_key(|(_, deadline)| *deadline);
        for (local_id, _) in unanswered {
            self.direct_send_failed(local_id, "send timed out", out);
        }

        let connected = self.connection.status() == ConnectionStatus::Connected;
        let actions = self.queue.tick(now, connected);
        self.apply_queue(actions, out);

        // Fallback polling runs only while a reconnect is being pursued.
        let actions = if connected {
            self.poller.on_connected()
        } else if self.started
            && self.connection.is_online()
            && !self.connection.is_manually_disconnected()
        {
            self.poller.on_link_lost(now);
            self.poller.tick(now)
        } else {
            self.poller.stop()
        };
        self.apply_poller(actions, out);
    }
}
