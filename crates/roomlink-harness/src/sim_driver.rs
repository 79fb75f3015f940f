//! Synchronous simulation driver.
//!
//! `SimDriver` plays the role of the client runtime for deterministic tests:
//! it executes every [`SessionAction`] against a [`SimBackend`] and a
//! [`MemoryQueueStore`] immediately and feeds the outcomes back as events, in
//! order, until the session is quiescent. Time comes from a [`SimEnv`] and
//! only moves through [`SimDriver::run_for`] or [`SimDriver::advance`].

use std::{collections::VecDeque, time::Duration};

use roomlink_client::{MemoryQueueStore, QueueStore};
use roomlink_core::{
    Environment, InsertNotice, NewMessage, Room, Session, SessionAction, SessionConfig,
    SessionError, SessionEvent, SessionView, UserId,
};
use tokio::sync::mpsc::{self, error::TryRecvError};

use crate::{
    invariants::{InvariantRegistry, SessionSnapshot, SystemSnapshot},
    sim_backend::SimBackend,
    sim_env::SimEnv,
};

/// Upper bound on timer firings per [`SimDriver::run_for`] call.
const MAX_TIMER_STEPS: usize = 100_000;

/// Deterministic driver of one room session.
pub struct SimDriver {
    env: SimEnv,
    backend: SimBackend,
    store: MemoryQueueStore,
    session: Session<SimEnv>,
    push: Option<(u64, mpsc::Receiver<InsertNotice>)>,
    events: VecDeque<SessionEvent>,
    invariants: Option<InvariantRegistry>,
}

impl SimDriver {
    /// Driver over a fresh environment, backend and store.
    pub fn new(room: Room, user: Option<UserId>, config: SessionConfig) -> Self {
        Self::with_parts(
            SimEnv::new(),
            SimBackend::new(),
            MemoryQueueStore::new(),
            room,
            user,
            config,
        )
    }

    /// Driver over existing parts, e.g. to simulate a restart against the
    /// same backend and store. The persisted queue is restored.
    pub fn with_parts(
        env: SimEnv,
        backend: SimBackend,
        store: MemoryQueueStore,
        room: Room,
        user: Option<UserId>,
        config: SessionConfig,
    ) -> Self {
        let mut session = Session::new(env.clone(), room.clone(), user, config);
        match store.load(&room) {
            Ok(Some(snapshot)) => session.restore_queue(snapshot),
            Ok(None) => {},
            Err(e) => tracing::error!(%room, error = %e, "failed to load persisted queue"),
        }

        Self {
            env,
            backend,
            store,
            session,
            push: None,
            events: VecDeque::new(),
            invariants: None,
        }
    }

    /// Check invariants after every settled step.
    #[must_use]
    pub fn with_invariants(mut self, registry: InvariantRegistry) -> Self {
        self.invariants = Some(registry);
        self
    }

    /// Simulated environment.
    pub fn env(&self) -> &SimEnv {
        &self.env
    }

    /// Simulated backend.
    pub fn backend(&self) -> &SimBackend {
        &self.backend
    }

    /// Queue store.
    pub fn store(&self) -> &MemoryQueueStore {
        &self.store
    }

    /// Session under test.
    pub fn session(&self) -> &Session<SimEnv> {
        &self.session
    }

    /// UI view of the session.
    pub fn view(&self) -> SessionView {
        self.session.view()
    }

    /// Timeline contents in display order.
    pub fn contents(&self) -> Vec<String> {
        self.session.timeline().messages().iter().map(|m| m.content.clone()).collect()
    }

    /// Whether a push subscription is open.
    pub fn is_subscribed(&self) -> bool {
        self.push.is_some()
    }

    /// Observable state for invariant checks.
    pub fn snapshot(&self) -> SystemSnapshot {
        SystemSnapshot::single(SessionSnapshot::from_session(&self.session))
    }

    /// Mount the room view.
    pub fn start(&mut self) {
        self.dispatch(SessionEvent::Start);
        self.settle();
    }

    /// Process one event and everything it causes.
    ///
    /// # Errors
    ///
    /// Returns the session's rejection of `event` itself. Failures of the
    /// follow-up events are absorbed by the session.
    pub fn handle(&mut self, event: SessionEvent) -> Result<(), SessionError> {
        let actions = self.session.handle(event)?;
        self.execute(actions);
        self.settle();
        Ok(())
    }

    /// Send a message.
    ///
    /// # Errors
    ///
    /// Returns the validation error, if any.
    pub fn send(&mut self, content: &str) -> Result<(), SessionError> {
        self.handle(SessionEvent::SendMessage { content: content.to_string(), metadata: None })
    }

    /// Change host and backend availability together.
    pub fn set_online(&mut self, online: bool) {
        self.backend.set_offline(!online);
        self.dispatch(SessionEvent::NetworkChanged { online });
        self.settle();
    }

    /// Move the clock forward without firing intermediate deadlines.
    pub fn advance(&mut self, duration: Duration) {
        self.env.advance(duration);
        self.dispatch(SessionEvent::Tick);
        self.settle();
    }

    /// Move the clock forward by `duration`, firing every deadline at its
    /// exact instant.
    pub fn run_for(&mut self, duration: Duration) {
        let end = self.env.now() + duration;

        for _ in 0..MAX_TIMER_STEPS {
            match self.session.next_deadline() {
                Some(deadline) if deadline <= end => {
                    let now = self.env.now();
                    if deadline > now {
                        self.env.advance(deadline - now);
                    }
                    self.dispatch(SessionEvent::Tick);
                    self.settle();
                },
                _ => {
                    let now = self.env.now();
                    self.env.advance(end - now);
                    self.dispatch(SessionEvent::Tick);
                    self.settle();
                    return;
                },
            }
        }

        tracing::warn!(steps = MAX_TIMER_STEPS, "timer loop did not converge");
    }

    /// Unmount the room view.
    pub fn teardown(&mut self) {
        self.session.teardown();
        self.push = None;
        self.events.clear();
    }

    fn dispatch(&mut self, event: SessionEvent) {
        match self.session.handle(event) {
            Ok(actions) => self.execute(actions),
            Err(e) => tracing::warn!(error = %e, "session rejected event"),
        }
    }

    /// Run queued events and push deliveries until nothing is left.
    fn settle(&mut self) {
        loop {
            while let Some(event) = self.events.pop_front() {
                self.dispatch(event);
            }
            if !self.pump_push() {
                break;
            }
        }

        if let Some(registry) = &self.invariants {
            let snapshot = SystemSnapshot::single(SessionSnapshot::from_session(&self.session));
            registry.assert_all(&snapshot, &format!("at {:?}", self.env.elapsed()));
        }
    }

    /// Returns true if any event was produced.
    fn pump_push(&mut self) -> bool {
        let Some((generation, rx)) = &mut self.push else {
            return false;
        };
        let generation = *generation;

        let mut produced = false;
        let mut closed = false;
        loop {
            match rx.try_recv() {
                Ok(notice) => match self.backend.fetch_message_now(&notice.id) {
                    Ok(message) => {
                        self.events.push_back(SessionEvent::PushReceived(message));
                        produced = true;
                    },
                    Err(e) => tracing::warn!(id = %notice.id, error = %e, "hydration failed"),
                },
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    closed = true;
                    break;
                },
            }
        }

        if closed {
            self.push = None;
            self.events.push_back(SessionEvent::ChannelClosed { generation });
            produced = true;
        }
        produced
    }

    fn execute(&mut self, actions: Vec<SessionAction>) {
        for action in actions {
            let event = match action {
                SessionAction::Subscribe { room, generation } => {
                    self.push = None;
                    match self.backend.subscribe_now(&room) {
                        Ok(rx) => {
                            self.push = Some((generation, rx));
                            SessionEvent::Subscribed { generation }
                        },
                        Err(e) => {
                            SessionEvent::SubscribeFailed { generation, reason: e.to_string() }
                        },
                    }
                },
                SessionAction::Unsubscribe => {
                    self.push = None;
                    continue;
                },
                SessionAction::Probe { probe_id } => match self.backend.probe_now() {
                    Ok(()) => SessionEvent::ProbeSucceeded { probe_id },
                    Err(e) => SessionEvent::ProbeFailed { probe_id, reason: e.to_string() },
                },
                SessionAction::InsertMessage { local_id, draft } => {
                    if self.backend.take_held_insert() {
                        tracing::debug!(%local_id, "insert held, never answered");
                        continue;
                    }
                    match self.backend.insert_now(draft) {
                        Ok(message) => SessionEvent::DirectSendSucceeded { local_id, message },
                        Err(e) => SessionEvent::DirectSendFailed { local_id, reason: e.to_string() },
                    }
                },
                SessionAction::SendQueued { item } => {
                    let item_id = item.id;
                    if self.backend.take_held_insert() {
                        tracing::debug!(%item_id, "insert held, never answered");
                        continue;
                    }
                    let draft = NewMessage {
                        content: item.content,
                        author_id: item.user_id,
                        room: item.room,
                        metadata: item.metadata,
                    };
                    match self.backend.insert_now(draft) {
                        Ok(message) => SessionEvent::QueueSendSucceeded { item_id, message },
                        Err(e) => SessionEvent::QueueSendFailed { item_id, reason: e.to_string() },
                    }
                },
                SessionAction::FetchMessages { purpose, since } => {
                    match self.backend.fetch_messages_now(self.session.room(), since) {
                        Ok(messages) => SessionEvent::MessagesFetched { purpose, messages },
                        Err(e) => SessionEvent::FetchFailed { purpose, reason: e.to_string() },
                    }
                },
                SessionAction::PersistQueue(snapshot) => {
                    if let Err(e) = self.store.save(&snapshot) {
                        tracing::error!(error = %e, "failed to persist queue");
                    }
                    continue;
                },
                SessionAction::PersistReadStatus(status) => {
                    if let Err(e) = self.backend.upsert_read_status_now(status) {
                        tracing::warn!(error = %e, "failed to save read status");
                    }
                    continue;
                },
            };
            self.events.push_back(event);
        }
    }
}
