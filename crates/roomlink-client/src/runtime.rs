//! Room runtime: drives one [`Session`] against real I/O.
//!
//! One tokio task per room owns all session state and runs a `select!` loop
//! over:
//! - UI commands from [`SessionHandle`]s
//! - completed backend operations (a [`JoinSet`])
//! - push deliveries from the active [`Subscription`]
//! - host network changes and the periodic cross-check
//! - a sleep until the session's earliest deadline
//!
//! Backend operations run concurrently as join-set tasks, but their results
//! are applied one at a time by the loop. Late results after a reconnect are
//! ignored by the state machines through generation counters and ids.

use std::{collections::HashMap, future, sync::Arc, time::Duration};

use roomlink_core::{
    Environment, FetchPurpose, Message, Metadata, NewMessage, QueueItemId, QueueSnapshot, Room,
    Session, SessionAction, SessionConfig, SessionEvent, SessionView, UserId,
};
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::{JoinError, JoinSet},
    time::MissedTickBehavior,
};

use crate::{
    backend::Backend,
    error::{BackendError, RuntimeError},
    network::NetworkMonitor,
    store::QueueStore,
    subscription::{Subscription, SubscriptionEvent, SubscriptionManager},
};

/// Default period of the host network cross-check.
pub const DEFAULT_NETWORK_CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Default capacity of the UI command channel.
pub const DEFAULT_COMMAND_CAPACITY: usize = 64;

/// Default capacity of the push delivery channel.
pub const DEFAULT_PUSH_CAPACITY: usize = 256;

/// Runtime configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// State machine settings
    pub session: SessionConfig,
    /// Period of the host network cross-check
    pub network_check_interval: Duration,
    /// Capacity of the UI command channel
    pub command_capacity: usize,
    /// Capacity of the push delivery channel
    pub push_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            network_check_interval: DEFAULT_NETWORK_CHECK_INTERVAL,
            command_capacity: DEFAULT_COMMAND_CAPACITY,
            push_capacity: DEFAULT_PUSH_CAPACITY,
        }
    }
}

type Reply = oneshot::Sender<Result<(), RuntimeError>>;

enum Command {
    Send { content: String, metadata: Option<Metadata>, reply: Reply },
    Event { event: SessionEvent, reply: Reply },
    Shutdown { reply: oneshot::Sender<()> },
}

/// Output of a backend task.
enum Completion {
    Subscribed {
        generation: u64,
        result: Result<(Subscription, mpsc::Receiver<SubscriptionEvent>), BackendError>,
    },
    Probed {
        probe_id: u64,
        result: Result<(), BackendError>,
    },
    Inserted {
        local_id: QueueItemId,
        result: Result<Message, BackendError>,
    },
    QueueSent {
        item_id: QueueItemId,
        result: Result<Message, BackendError>,
    },
    Fetched {
        purpose: FetchPurpose,
        result: Result<Vec<Message>, BackendError>,
    },
    ReadStatusSaved {
        result: Result<(), BackendError>,
    },
}

struct ActiveSubscription {
    generation: u64,
    handle: Subscription,
    events: mpsc::Receiver<SubscriptionEvent>,
}

enum Step {
    Command(Command),
    HandlesDropped,
    Completed(Result<Completion, JoinError>),
    Push { generation: u64, event: Option<SubscriptionEvent> },
    NetworkChanged(bool),
    NetworkMonitorGone,
    NetworkCheck,
    Timer,
}

/// Async driver of one room session.
///
/// Created with [`RoomRuntime::new`] together with its [`SessionHandle`],
/// then consumed by [`RoomRuntime::run`]. Every exit path, including drop,
/// tears the session down and aborts in-flight backend work.
pub struct RoomRuntime<B, S, N, E>
where
    B: Backend,
    S: QueueStore,
    N: NetworkMonitor,
    E: Environment,
{
    env: E,
    session: Session<E>,
    backend: Arc<B>,
    subscriptions: SubscriptionManager<B>,
    store: S,
    network: N,
    network_rx: watch::Receiver<bool>,
    network_live: bool,
    config: RuntimeConfig,
    commands: mpsc::Receiver<Command>,
    view: watch::Sender<SessionView>,
    tasks: JoinSet<Completion>,
    subscription: Option<ActiveSubscription>,
    send_replies: HashMap<QueueItemId, Reply>,
    torn_down: bool,
}

impl<B, S, N, E> RoomRuntime<B, S, N, E>
where
    B: Backend,
    S: QueueStore,
    N: NetworkMonitor,
    E: Environment,
{
    /// Create a runtime for `room` and the handle controlling it.
    ///
    /// The persisted queue is loaded here. A load failure is logged and the
    /// session starts with an empty queue.
    pub fn new(
        env: E,
        room: Room,
        user: Option<UserId>,
        backend: Arc<B>,
        store: S,
        network: N,
        config: RuntimeConfig,
    ) -> (Self, SessionHandle) {
        let mut session = Session::new(env.clone(), room.clone(), user, config.session);
        match store.load(&room) {
            Ok(Some(snapshot)) => {
                tracing::info!(%room, items = snapshot.items.len(), "restored persisted queue");
                session.restore_queue(snapshot);
            },
            Ok(None) => {},
            Err(e) => tracing::error!(%room, error = %e, "failed to load persisted queue"),
        }

        let (command_tx, commands) = mpsc::channel(config.command_capacity.max(1));
        let (view, view_rx) = watch::channel(session.view());
        let network_rx = network.watch();

        let runtime = Self {
            env,
            session,
            subscriptions: SubscriptionManager::new(Arc::clone(&backend)),
            backend,
            store,
            network,
            network_rx,
            network_live: true,
            config,
            commands,
            view,
            tasks: JoinSet::new(),
            subscription: None,
            send_replies: HashMap::new(),
            torn_down: false,
        };

        (runtime, SessionHandle { commands: command_tx, view: view_rx })
    }

    /// Create a runtime and spawn it on the current tokio runtime.
    pub fn spawn(
        env: E,
        room: Room,
        user: Option<UserId>,
        backend: Arc<B>,
        store: S,
        network: N,
        config: RuntimeConfig,
    ) -> SessionHandle {
        let (runtime, handle) = Self::new(env, room, user, backend, store, network, config);
        tokio::spawn(runtime.run());
        handle
    }

    /// Run until shutdown is requested or every handle is dropped.
    pub async fn run(mut self) {
        tracing::info!(room = %self.session.room(), "room runtime started");

        let online = self.network.is_online();
        self.dispatch(SessionEvent::NetworkChanged { online });
        self.dispatch(SessionEvent::Start);
        self.publish();

        let mut cross_check = tokio::time::interval(self.config.network_check_interval);
        cross_check.set_missed_tick_behavior(MissedTickBehavior::Delay);
        cross_check.tick().await;

        loop {
            let wait = self.session.time_until_deadline();

            let step = tokio::select! {
                command = self.commands.recv() => command.map_or(Step::HandlesDropped, Step::Command),

                Some(joined) = self.tasks.join_next(), if !self.tasks.is_empty() => Step::Completed(joined),

                (generation, event) = next_push(&mut self.subscription) => Step::Push { generation, event },

                changed = self.network_rx.changed(), if self.network_live => match changed {
                    Ok(()) => Step::NetworkChanged(*self.network_rx.borrow_and_update()),
                    Err(_) => Step::NetworkMonitorGone,
                },

                _ = cross_check.tick() => Step::NetworkCheck,

                () = sleep_for(&self.env, wait) => Step::Timer,
            };

            match step {
                Step::Command(command) => {
                    if self.handle_command(command) {
                        return;
                    }
                },
                Step::HandlesDropped => {
                    tracing::debug!("all session handles dropped");
                    break;
                },
                Step::Completed(Ok(completion)) => self.handle_completion(completion),
                Step::Completed(Err(e)) => {
                    if !e.is_cancelled() {
                        tracing::error!(error = %e, "backend task failed");
                    }
                },
                Step::Push { generation, event } => self.handle_push(generation, event),
                Step::NetworkChanged(online) => {
                    self.dispatch(SessionEvent::NetworkChanged { online });
                },
                Step::NetworkMonitorGone => {
                    tracing::warn!("network monitor dropped, relying on periodic checks");
                    self.network_live = false;
                },
                Step::NetworkCheck => {
                    let online = self.network.is_online();
                    self.dispatch(SessionEvent::NetworkChecked { online });
                },
                Step::Timer => self.dispatch(SessionEvent::Tick),
            }

            self.answer_settled_sends();
            self.publish();
        }

        self.teardown();
    }

    /// Returns true if the runtime should stop.
    fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Send { content, metadata, reply } => {
                match self.session.handle(SessionEvent::SendMessage { content, metadata }) {
                    Ok(actions) => {
                        let direct = actions.iter().find_map(|action| match action {
                            SessionAction::InsertMessage { local_id, .. } => Some(*local_id),
                            _ => None,
                        });
                        // Direct writes answer once the write settles
                        match direct {
                            Some(local_id) => {
                                self.send_replies.insert(local_id, reply);
                            },
                            None => {
                                let _ = reply.send(Ok(()));
                            },
                        }
                        self.execute(actions);
                    },
                    Err(e) => {
                        let _ = reply.send(Err(e.into()));
                    },
                }
            },
            Command::Event { event, reply } => match self.session.handle(event) {
                Ok(actions) => {
                    self.execute(actions);
                    let _ = reply.send(Ok(()));
                },
                Err(e) => {
                    let _ = reply.send(Err(e.into()));
                },
            },
            Command::Shutdown { reply } => {
                self.teardown();
                let _ = reply.send(());
                return true;
            },
        }
        false
    }

    fn handle_completion(&mut self, completion: Completion) {
        let event = match completion {
            Completion::Subscribed { generation, result } => match result {
                Ok((handle, events)) => {
                    if !self.session.is_current_generation(generation) {
                        tracing::debug!(generation, "dropping stale subscription");
                        return;
                    }
                    self.subscription = Some(ActiveSubscription { generation, handle, events });
                    SessionEvent::Subscribed { generation }
                },
                Err(e) => SessionEvent::SubscribeFailed { generation, reason: e.to_string() },
            },
            Completion::Probed { probe_id, result } => match result {
                Ok(()) => SessionEvent::ProbeSucceeded { probe_id },
                Err(e) => SessionEvent::ProbeFailed { probe_id, reason: e.to_string() },
            },
            Completion::Inserted { local_id, result } => {
                match result {
                    Ok(message) => SessionEvent::DirectSendSucceeded { local_id, message },
                    Err(e) => {
                        tracing::warn!(%local_id, error = %e, transient = e.is_transient(), "direct send failed");
                        SessionEvent::DirectSendFailed { local_id, reason: e.to_string() }
                    },
                }
            },
            Completion::QueueSent { item_id, result } => match result {
                Ok(message) => SessionEvent::QueueSendSucceeded { item_id, message },
                Err(e) => SessionEvent::QueueSendFailed { item_id, reason: e.to_string() },
            },
            Completion::Fetched { purpose, result } => match result {
                Ok(messages) => SessionEvent::MessagesFetched { purpose, messages },
                Err(e) => SessionEvent::FetchFailed { purpose, reason: e.to_string() },
            },
            Completion::ReadStatusSaved { result } => {
                if let Err(e) = result {
                    tracing::warn!(error = %e, "failed to save read status");
                }
                return;
            },
        };

        self.dispatch(event);
    }

    /// Answer senders whose direct write was confirmed, failed over to the
    /// queue, or timed out.
    fn answer_settled_sends(&mut self) {
        let settled: Vec<QueueItemId> = self
            .send_replies
            .keys()
            .copied()
            .filter(|id| !self.session.is_sending_directly(*id))
            .collect();
        for id in settled {
            if let Some(reply) = self.send_replies.remove(&id) {
                let _ = reply.send(Ok(()));
            }
        }
    }

    fn handle_push(&mut self, generation: u64, event: Option<SubscriptionEvent>) {
        match event {
            Some(SubscriptionEvent::Message(message)) => {
                self.dispatch(SessionEvent::PushReceived(message));
            },
            Some(SubscriptionEvent::Closed) | None => {
                self.subscription = None;
                self.dispatch(SessionEvent::ChannelClosed { generation });
            },
        }
    }

    fn dispatch(&mut self, event: SessionEvent) {
        match self.session.handle(event) {
            Ok(actions) => self.execute(actions),
            Err(e) => tracing::warn!(error = %e, "session rejected event"),
        }
    }

    fn execute(&mut self, actions: Vec<SessionAction>) {
        for action in actions {
            match action {
                SessionAction::Subscribe { room, generation } => {
                    self.subscription = None;
                    let manager = self.subscriptions.clone();
                    let capacity = self.config.push_capacity.max(1);
                    self.tasks.spawn(async move {
                        let (sink, events) = mpsc::channel(capacity);
                        let result =
                            manager.subscribe(&room, sink).await.map(|handle| (handle, events));
                        Completion::Subscribed { generation, result }
                    });
                },
                SessionAction::Unsubscribe => {
                    if let Some(mut active) = self.subscription.take() {
                        active.handle.close();
                    }
                },
                SessionAction::Probe { probe_id } => {
                    let backend = Arc::clone(&self.backend);
                    self.tasks.spawn(async move {
                        Completion::Probed { probe_id, result: backend.probe().await }
                    });
                },
                SessionAction::InsertMessage { local_id, draft } => {
                    let backend = Arc::clone(&self.backend);
                    self.tasks.spawn(async move {
                        Completion::Inserted { local_id, result: backend.insert_message(draft).await }
                    });
                },
                SessionAction::SendQueued { item } => {
                    let item_id = item.id;
                    let draft = NewMessage {
                        content: item.content,
                        author_id: item.user_id,
                        room: item.room,
                        metadata: item.metadata,
                    };
                    let backend = Arc::clone(&self.backend);
                    self.tasks.spawn(async move {
                        Completion::QueueSent { item_id, result: backend.insert_message(draft).await }
                    });
                },
                SessionAction::FetchMessages { purpose, since } => {
                    let backend = Arc::clone(&self.backend);
                    let room = self.session.room().clone();
                    self.tasks.spawn(async move {
                        Completion::Fetched {
                            purpose,
                            result: backend.fetch_messages(&room, since).await,
                        }
                    });
                },
                SessionAction::PersistQueue(snapshot) => self.persist(&snapshot),
                SessionAction::PersistReadStatus(status) => {
                    let backend = Arc::clone(&self.backend);
                    self.tasks.spawn(async move {
                        Completion::ReadStatusSaved { result: backend.upsert_read_status(status).await }
                    });
                },
            }
        }
    }

    fn persist(&self, snapshot: &QueueSnapshot) {
        if let Err(e) = self.store.save(snapshot) {
            tracing::error!(room = %snapshot.room, error = %e, "failed to persist queue");
        }
    }

    fn publish(&self) {
        self.view.send_replace(self.session.view());
    }

    fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        self.session.teardown();
        self.subscription = None;
        self.tasks.abort_all();
        self.send_replies.clear();
        self.publish();

        tracing::info!(room = %self.session.room(), "room runtime stopped");
    }
}

impl<B, S, N, E> Drop for RoomRuntime<B, S, N, E>
where
    B: Backend,
    S: QueueStore,
    N: NetworkMonitor,
    E: Environment,
{
    fn drop(&mut self) {
        self.teardown();
    }
}

async fn next_push(
    subscription: &mut Option<ActiveSubscription>,
) -> (u64, Option<SubscriptionEvent>) {
    match subscription {
        Some(active) => (active.generation, active.events.recv().await),
        None => future::pending().await,
    }
}

async fn sleep_for<E: Environment>(env: &E, wait: Option<Duration>) {
    match wait {
        Some(wait) => env.sleep(wait).await,
        None => future::pending().await,
    }
}

/// UI-facing handle to a running [`RoomRuntime`].
///
/// Cheap to clone. Methods fail with [`RuntimeError::Closed`] once the
/// runtime has stopped; [`SessionHandle::view`] keeps returning the last
/// published state.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    view: watch::Receiver<SessionView>,
}

impl SessionHandle {
    /// Send a message.
    ///
    /// Resolves once the message is either written or queued. Only
    /// validation failures are returned as errors.
    pub async fn send_message(
        &self,
        content: impl Into<String>,
        metadata: Option<Metadata>,
    ) -> Result<(), RuntimeError> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Send { content: content.into(), metadata, reply }, rx).await
    }

    /// Reload history.
    pub async fn load_messages(&self) -> Result<(), RuntimeError> {
        self.event(SessionEvent::LoadMessages).await
    }

    /// Reconnect now.
    pub async fn reconnect(&self) -> Result<(), RuntimeError> {
        self.event(SessionEvent::Reconnect).await
    }

    /// Reset the attempt counter, clear the error and reconnect.
    pub async fn reset_connection(&self) -> Result<(), RuntimeError> {
        self.event(SessionEvent::ResetConnection).await
    }

    /// Close the link until the next reconnect.
    pub async fn disconnect(&self) -> Result<(), RuntimeError> {
        self.event(SessionEvent::Disconnect).await
    }

    /// Probe latency now.
    pub async fn measure_latency(&self) -> Result<(), RuntimeError> {
        self.event(SessionEvent::MeasureLatency).await
    }

    /// Retry a queued or failed item.
    pub async fn retry_item(&self, id: QueueItemId) -> Result<(), RuntimeError> {
        self.event(SessionEvent::RetryItem(id)).await
    }

    /// Remove a queued or failed item.
    pub async fn remove_item(&self, id: QueueItemId) -> Result<(), RuntimeError> {
        self.event(SessionEvent::RemoveItem(id)).await
    }

    /// Remove every queued and failed item.
    pub async fn clear_queue(&self) -> Result<(), RuntimeError> {
        self.event(SessionEvent::ClearQueue).await
    }

    /// Mark the room as read.
    pub async fn mark_read(&self) -> Result<(), RuntimeError> {
        self.event(SessionEvent::MarkRead).await
    }

    /// Latest published state.
    pub fn view(&self) -> SessionView {
        self.view.borrow().clone()
    }

    /// Receiver notified on every state change.
    pub fn subscribe_view(&self) -> watch::Receiver<SessionView> {
        self.view.clone()
    }

    /// Whether the runtime has stopped.
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    /// Stop the runtime and wait for teardown. Idempotent.
    pub async fn shutdown(&self) {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Shutdown { reply }).await.is_ok() {
            let _ = rx.await;
        }
    }

    async fn event(&self, event: SessionEvent) -> Result<(), RuntimeError> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Event { event, reply }, rx).await
    }

    async fn request(
        &self,
        command: Command,
        rx: oneshot::Receiver<Result<(), RuntimeError>>,
    ) -> Result<(), RuntimeError> {
        self.commands.send(command).await.map_err(|_| RuntimeError::Closed)?;
        rx.await.unwrap_or(Err(RuntimeError::Closed))
    }
}
