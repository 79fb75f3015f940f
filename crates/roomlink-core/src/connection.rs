//! Connection state machine.
//!
//! Tracks link health for one room session: subscription lifecycle,
//! reconnection scheduling with bounded exponential backoff, and the
//! heartbeat monitor. Uses the action pattern: methods take time as input and
//! return actions for the driver to execute.
//!
//! # State Machine
//!
//! ```text
//!                connect()            ack
//! ┌──────────────┐ ───────> ┌────────────┐ ───────> ┌───────────┐
//! │ Disconnected │          │ Connecting │          │ Connected │
//! └──────────────┘          └────────────┘          └───────────┘
//!        ↑                     │     ↑                    │
//!        │         error/timeout│     │ delay elapsed      │ probe failure,
//!        │                     ↓     │                    │ channel closed
//!        │                ┌────────┐ │ ┌──────────────┐   │
//!        │                │ Failed │─┴>│ Reconnecting │<──┘
//!        │                └────────┘   └──────────────┘
//!        │                     ↑ attempts exhausted
//!        └── offline / disconnect() from any state
//! ```
//!
//! Every transition bumps or checks a generation counter so results of a
//! superseded subscription attempt are ignored.

use std::time::Duration;

use crate::{
    backoff::Backoff,
    env::MonotonicInstant,
    heartbeat::{Heartbeat, HeartbeatConfig, HeartbeatTick, Quality},
};

/// Automatic reconnection attempts before giving up.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// Time allowed for a subscription to be acknowledged.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

const OFFLINE: &str = "network offline";
const EXHAUSTED: &str = "max reconnection attempts reached";

/// Actions returned by the connection state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionAction {
    /// Open the push channel. Report the outcome tagged with `generation`.
    Subscribe {
        /// Attempt generation
        generation: u64,
    },
    /// Close the push channel, if any.
    Unsubscribe,
    /// Execute a latency probe and report the result with `probe_id`.
    Probe {
        /// Probe id
        probe_id: u64,
    },
    /// The link was established.
    Connected,
    /// An established link was lost.
    Disconnected {
        /// Why the link was lost
        reason: String,
    },
    /// Automatic reconnection gave up.
    Exhausted {
        /// Attempts made
        attempts: u32,
    },
}

/// Link status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// No link and nothing scheduled
    Disconnected,
    /// Subscription requested, waiting for acknowledgement
    Connecting,
    /// Subscription acknowledged, heartbeat running
    Connected,
    /// Waiting out a backoff delay before the next attempt
    Reconnecting,
    /// Last attempt failed, or attempts are exhausted
    Failed,
}

/// Connection configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Delay policy between reconnection attempts
    pub backoff: Backoff,
    /// Attempts before the terminal failed state
    pub max_reconnect_attempts: u32,
    /// Subscription acknowledgement deadline
    pub connect_timeout: Duration,
    /// Heartbeat settings
    pub heartbeat: HeartbeatConfig,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            backoff: Backoff::default(),
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            heartbeat: HeartbeatConfig::default(),
        }
    }
}

/// Connection state machine
///
/// Pure state machine: no I/O, no timers. Deadlines are stored and fired by
/// [`ConnectionManager::tick`]; the driver wakes at
/// [`ConnectionManager::next_deadline`].
#[derive(Debug, Clone)]
pub struct ConnectionManager<I> {
    config: ConnectionConfig,
    status: ConnectionStatus,
    is_online: bool,
    reconnect_attempts: u32,
    reconnect_delay: Option<Duration>,
    reconnect_at: Option<I>,
    connect_deadline: Option<I>,
    generation: u64,
    heartbeat: Heartbeat<I>,
    last_connected_at: Option<I>,
    last_disconnected_at: Option<I>,
    error: Option<String>,
    manual_disconnect: bool,
}

impl<I: MonotonicInstant> ConnectionManager<I> {
    /// Create a disconnected manager.
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            status: ConnectionStatus::Disconnected,
            is_online: true,
            reconnect_attempts: 0,
            reconnect_delay: None,
            reconnect_at: None,
            connect_deadline: None,
            generation: 0,
            heartbeat: Heartbeat::new(config.heartbeat),
            last_connected_at: None,
            last_disconnected_at: None,
            error: None,
            manual_disconnect: false,
        }
    }

    /// Current status
    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    /// Last known host network availability
    pub fn is_online(&self) -> bool {
        self.is_online
    }

    /// Attempts scheduled since the last successful connect or reset
    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    /// Configured attempt budget
    pub fn max_reconnect_attempts(&self) -> u32 {
        self.config.max_reconnect_attempts
    }

    /// Delay of the most recently scheduled attempt
    pub fn reconnect_delay(&self) -> Option<Duration> {
        self.reconnect_delay
    }

    /// Last measured round-trip time
    pub fn latency(&self) -> Option<Duration> {
        self.heartbeat.latency()
    }

    /// Link quality derived from [`ConnectionManager::latency`]
    pub fn quality(&self) -> Quality {
        self.heartbeat.quality()
    }

    /// When the link was last established
    pub fn last_connected_at(&self) -> Option<I> {
        self.last_connected_at
    }

    /// When the link was last lost
    pub fn last_disconnected_at(&self) -> Option<I> {
        self.last_disconnected_at
    }

    /// Last failure reason. Cleared on successful connect.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Current attempt generation
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether `generation` belongs to the current subscription attempt.
    pub fn is_current_generation(&self, generation: u64) -> bool {
        generation == self.generation
    }

    /// Whether the last transition was an explicit [`ConnectionManager::disconnect`].
    pub fn is_manually_disconnected(&self) -> bool {
        self.manual_disconnect
    }

    /// Whether a reconnection attempt is scheduled.
    pub fn is_reconnect_scheduled(&self) -> bool {
        self.reconnect_at.is_some()
    }

    /// Start a subscription attempt.
    ///
    /// No-op while connected or connecting. While offline, records the error
    /// and stays put without consuming an attempt.
    pub fn connect(&mut self, now: I) -> Vec<ConnectionAction> {
        if matches!(self.status, ConnectionStatus::Connected | ConnectionStatus::Connecting) {
            return vec![];
        }

        if !self.is_online {
            tracing::debug!("connect skipped while offline");
            self.error = Some(OFFLINE.to_string());
            return vec![];
        }

        self.manual_disconnect = false;
        self.reconnect_at = None;
        self.generation += 1;
        self.status = ConnectionStatus::Connecting;
        self.connect_deadline = Some(now + self.config.connect_timeout);

        tracing::info!(generation = self.generation, attempt = self.reconnect_attempts, "connecting");
        vec![ConnectionAction::Subscribe { generation: self.generation }]
    }

    /// Subscription acknowledged by the server.
    pub fn handle_subscribed(&mut self, generation: u64, now: I) -> Vec<ConnectionAction> {
        if generation != self.generation || self.status != ConnectionStatus::Connecting {
            tracing::debug!(generation, current = self.generation, "ignoring stale subscribe ack");
            return vec![];
        }

        self.status = ConnectionStatus::Connected;
        self.reconnect_attempts = 0;
        self.reconnect_delay = None;
        self.connect_deadline = None;
        self.error = None;
        self.last_connected_at = Some(now);
        self.heartbeat.start(now);

        tracing::info!(generation, "connected");
        vec![ConnectionAction::Connected]
    }

    /// Subscription attempt failed. Schedules the next attempt.
    pub fn handle_subscribe_failed(
        &mut self,
        generation: u64,
        reason: &str,
        now: I,
        random: u64,
    ) -> Vec<ConnectionAction> {
        if generation != self.generation || self.status != ConnectionStatus::Connecting {
            tracing::debug!(generation, current = self.generation, "ignoring stale subscribe error");
            return vec![];
        }

        tracing::warn!(generation, %reason, "subscription failed");
        self.status = ConnectionStatus::Failed;
        self.connect_deadline = None;
        self.error = Some(reason.to_string());

        let mut actions = vec![ConnectionAction::Unsubscribe];
        actions.extend(self.reconnect(now, random));
        actions
    }

    /// Schedule a reconnection attempt after the backoff delay.
    ///
    /// No-op while offline, connected, connecting, or with an attempt
    /// already scheduled. Once the attempt budget is spent the status becomes
    /// terminal [`ConnectionStatus::Failed`] until
    /// [`ConnectionManager::reset_reconnection_attempts`].
    ///
    /// `random` is drawn from the environment and only matters when the
    /// backoff has jitter configured.
    pub fn reconnect(&mut self, now: I, random: u64) -> Vec<ConnectionAction> {
        if !self.is_online {
            tracing::debug!("reconnect skipped while offline");
            return vec![];
        }
        if matches!(self.status, ConnectionStatus::Connected | ConnectionStatus::Connecting)
            || self.reconnect_at.is_some()
        {
            return vec![];
        }

        self.manual_disconnect = false;

        if self.reconnect_attempts >= self.config.max_reconnect_attempts {
            tracing::warn!(attempts = self.reconnect_attempts, "reconnection attempts exhausted");
            self.status = ConnectionStatus::Failed;
            self.error = Some(EXHAUSTED.to_string());
            return vec![ConnectionAction::Exhausted { attempts: self.reconnect_attempts }];
        }

        let delay = self.config.backoff.delay_with_jitter(self.reconnect_attempts, random);
        self.reconnect_attempts += 1;
        self.reconnect_delay = Some(delay);
        self.reconnect_at = Some(now + delay);
        self.status = ConnectionStatus::Reconnecting;

        tracing::info!(
            attempt = self.reconnect_attempts,
            max = self.config.max_reconnect_attempts,
            delay_ms = delay.as_millis() as u64,
            "reconnect scheduled"
        );
        vec![]
    }

    /// Explicit disconnect. Terminal: nothing is retried automatically.
    pub fn disconnect(&mut self, now: I) -> Vec<ConnectionAction> {
        let was = self.status;
        self.manual_disconnect = true;
        self.halt(now);

        tracing::info!(from = ?was, "disconnected by request");
        match was {
            ConnectionStatus::Connected | ConnectionStatus::Connecting => {
                vec![ConnectionAction::Unsubscribe]
            },
            _ => vec![],
        }
    }

    /// The established link failed (probe error, probe timeout, channel
    /// closed). Ignored unless connected.
    pub fn handle_link_failure(&mut self, reason: &str, now: I, random: u64) -> Vec<ConnectionAction> {
        if self.status != ConnectionStatus::Connected {
            return vec![];
        }

        tracing::warn!(%reason, "link lost");
        self.halt(now);
        self.error = Some(reason.to_string());

        let mut actions = vec![
            ConnectionAction::Unsubscribe,
            ConnectionAction::Disconnected { reason: reason.to_string() },
        ];
        actions.extend(self.reconnect(now, random));
        actions
    }

    /// Host network signal.
    ///
    /// Going offline forces [`ConnectionStatus::Disconnected`] and cancels
    /// every pending timer. Coming back online reconnects unless connected
    /// or disconnected by request.
    pub fn set_online(&mut self, online: bool, now: I, random: u64) -> Vec<ConnectionAction> {
        if online == self.is_online {
            return vec![];
        }
        self.is_online = online;

        if online {
            tracing::info!("network online");
            if self.manual_disconnect
                || matches!(self.status, ConnectionStatus::Connected | ConnectionStatus::Connecting)
            {
                return vec![];
            }
            return self.reconnect(now, random);
        }

        tracing::info!(from = ?self.status, "network offline");
        let was = self.status;
        self.halt(now);
        self.error = Some(OFFLINE.to_string());

        match was {
            ConnectionStatus::Connected => vec![
                ConnectionAction::Unsubscribe,
                ConnectionAction::Disconnected { reason: OFFLINE.to_string() },
            ],
            ConnectionStatus::Connecting => vec![ConnectionAction::Unsubscribe],
            _ => vec![],
        }
    }

    /// Periodic cross-check of the host online flag. Same transitions as
    /// [`ConnectionManager::set_online`] when the flag changed.
    pub fn check_network_status(&mut self, online: bool, now: I, random: u64) -> Vec<ConnectionAction> {
        if online != self.is_online {
            tracing::debug!(online, "network status changed on cross-check");
        }
        self.set_online(online, now, random)
    }

    /// Zero the attempt counter without touching the status.
    pub fn reset_reconnection_attempts(&mut self) {
        self.reconnect_attempts = 0;
        self.reconnect_delay = None;
    }

    /// On-demand latency probe. Only while connected and idle.
    pub fn measure_latency(&mut self, now: I) -> Vec<ConnectionAction> {
        if self.status != ConnectionStatus::Connected {
            return vec![];
        }
        self.heartbeat
            .measure(now)
            .map(|probe_id| ConnectionAction::Probe { probe_id })
            .into_iter()
            .collect()
    }

    /// Probe round trip completed.
    pub fn handle_probe_succeeded(&mut self, probe_id: u64, now: I) {
        if let Some(latency) = self.heartbeat.handle_probe_ok(probe_id, now) {
            tracing::debug!(probe_id, latency_ms = latency.as_millis() as u64, "probe ok");
        }
    }

    /// Probe errored. The link is declared failed.
    pub fn handle_probe_failed(
        &mut self,
        probe_id: u64,
        reason: &str,
        now: I,
        random: u64,
    ) -> Vec<ConnectionAction> {
        if !self.heartbeat.handle_probe_failed(probe_id) {
            return vec![];
        }
        self.handle_link_failure(reason, now, random)
    }

    /// Fire due deadlines.
    pub fn tick(&mut self, now: I, random: u64) -> Vec<ConnectionAction> {
        let mut actions = Vec::new();

        if self.reconnect_at.is_some_and(|at| now >= at) {
            tracing::debug!("reconnect delay elapsed");
            self.reconnect_at = None;
            actions.extend(self.connect(now));
        }

        if self.status == ConnectionStatus::Connecting
            && self.connect_deadline.is_some_and(|at| now >= at)
        {
            actions.extend(self.handle_subscribe_failed(
                self.generation,
                "subscription timed out",
                now,
                random,
            ));
        }

        if self.status == ConnectionStatus::Connected {
            match self.heartbeat.tick(now) {
                HeartbeatTick::Idle => {},
                HeartbeatTick::Probe(probe_id) => actions.push(ConnectionAction::Probe { probe_id }),
                HeartbeatTick::TimedOut => {
                    actions.extend(self.handle_link_failure("heartbeat timed out", now, random));
                },
            }
        }

        actions
    }

    /// Earliest instant at which [`ConnectionManager::tick`] has work to do.
    pub fn next_deadline(&self) -> Option<I> {
        let heartbeat = if self.status == ConnectionStatus::Connected {
            self.heartbeat.next_deadline()
        } else {
            None
        };
        [self.reconnect_at, self.connect_deadline, heartbeat].into_iter().flatten().min()
    }

    /// Cancel every timer and invalidate in-flight attempts.
    pub fn teardown(&mut self) {
        self.reconnect_at = None;
        self.connect_deadline = None;
        self.heartbeat.stop();
        self.generation += 1;
        self.status = ConnectionStatus::Disconnected;
    }

    fn halt(&mut self, now: I) {
        if self.status != ConnectionStatus::Disconnected {
            self.last_disconnected_at = Some(now);
        }
        self.reconnect_at = None;
        self.connect_deadline = None;
        self.heartbeat.stop();
        self.generation += 1;
        self.status = ConnectionStatus::Disconnected;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    fn manager() -> ConnectionManager<Instant> {
        ConnectionManager::new(ConnectionConfig::default())
    }

    fn connected(now: Instant) -> ConnectionManager<Instant> {
        let mut conn = manager();
        let actions = conn.connect(now);
        let [ConnectionAction::Subscribe { generation }] = actions[..] else {
            panic!("expected subscribe, got {actions:?}")
        };
        conn.handle_subscribed(generation, now);
        conn
    }

    #[test]
    fn connect_then_ack() {
        let t0 = Instant::now();
        let mut conn = manager();

        let actions = conn.connect(t0);
        assert_eq!(actions, vec![ConnectionAction::Subscribe { generation: 1 }]);
        assert_eq!(conn.status(), ConnectionStatus::Connecting);

        let actions = conn.handle_subscribed(1, t0);
        assert_eq!(actions, vec![ConnectionAction::Connected]);
        assert_eq!(conn.status(), ConnectionStatus::Connected);
        assert_eq!(conn.last_connected_at(), Some(t0));
    }

    #[test]
    fn connect_is_idempotent_while_connecting() {
        let t0 = Instant::now();
        let mut conn = manager();
        conn.connect(t0);

        assert!(conn.connect(t0).is_empty());
        assert_eq!(conn.generation(), 1);
    }

    #[test]
    fn first_probe_fires_on_connect() {
        let t0 = Instant::now();
        let mut conn = connected(t0);

        assert_eq!(conn.tick(t0, 0), vec![ConnectionAction::Probe { probe_id: 0 }]);
    }

    #[test]
    fn subscribe_failure_schedules_backoff() {
        let t0 = Instant::now();
        let mut conn = manager();
        conn.connect(t0);

        let actions = conn.handle_subscribe_failed(1, "boom", t0, 0);
        assert_eq!(actions, vec![ConnectionAction::Unsubscribe]);
        assert_eq!(conn.status(), ConnectionStatus::Reconnecting);
        assert_eq!(conn.reconnect_attempts(), 1);
        assert_eq!(conn.reconnect_delay(), Some(Duration::from_millis(1000)));
        assert_eq!(conn.next_deadline(), Some(t0 + Duration::from_millis(1000)));
    }

    #[test]
    fn subscribe_timeout_counts_as_failure() {
        let t0 = Instant::now();
        let mut conn = manager();
        conn.connect(t0);

        let actions = conn.tick(t0 + DEFAULT_CONNECT_TIMEOUT, 0);
        assert_eq!(actions, vec![ConnectionAction::Unsubscribe]);
        assert_eq!(conn.status(), ConnectionStatus::Reconnecting);
        assert_eq!(conn.error(), Some("subscription timed out"));
    }

    #[test]
    fn stale_ack_is_ignored() {
        let t0 = Instant::now();
        let mut conn = manager();
        conn.connect(t0);
        conn.set_online(false, t0, 0);
        conn.set_online(true, t0, 0);

        assert!(conn.handle_subscribed(1, t0).is_empty());
        assert_ne!(conn.status(), ConnectionStatus::Connected);
    }

    #[test]
    fn ten_failed_attempts_exhaust_then_reset_keeps_status() {
        let mut now = Instant::now();
        let mut conn = manager();
        conn.connect(now);
        let mut exhausted = false;

        // Initial attempt plus ten scheduled retries, all failing.
        for _ in 0..=DEFAULT_MAX_RECONNECT_ATTEMPTS {
            let actions = conn.handle_subscribe_failed(conn.generation(), "unreachable", now, 0);
            if actions.contains(&ConnectionAction::Exhausted { attempts: 10 }) {
                exhausted = true;
                break;
            }
            now = conn.next_deadline().unwrap_or(now);
            let actions = conn.tick(now, 0);
            assert!(matches!(actions[..], [ConnectionAction::Subscribe { .. }]));
        }

        assert!(exhausted);
        assert_eq!(conn.status(), ConnectionStatus::Failed);
        assert_eq!(conn.reconnect_attempts(), 10);
        assert_eq!(conn.next_deadline(), None);
        assert_eq!(conn.error(), Some(EXHAUSTED));

        conn.reset_reconnection_attempts();
        assert_eq!(conn.reconnect_attempts(), 0);
        assert_eq!(conn.status(), ConnectionStatus::Failed);
    }

    #[test]
    fn scheduled_delays_follow_backoff() {
        let mut now = Instant::now();
        let mut conn = manager();
        conn.connect(now);
        let mut delays = Vec::new();

        for _ in 0..6 {
            conn.handle_subscribe_failed(conn.generation(), "unreachable", now, 0);
            delays.push(conn.reconnect_delay().map(|d| d.as_millis()));
            now = conn.next_deadline().unwrap_or(now);
            conn.tick(now, 0);
        }

        let expected = [1000, 2000, 4000, 8000, 16000, 30000].map(Some);
        assert_eq!(delays, expected);
    }

    #[test]
    fn going_offline_forces_disconnected_and_cancels_timers() {
        let t0 = Instant::now();
        let mut conn = manager();
        conn.connect(t0);
        conn.handle_subscribe_failed(1, "boom", t0, 0);
        assert!(conn.is_reconnect_scheduled());

        let actions = conn.set_online(false, t0, 0);
        assert!(actions.is_empty());
        assert_eq!(conn.status(), ConnectionStatus::Disconnected);
        assert_eq!(conn.next_deadline(), None);

        let attempts = conn.reconnect_attempts();
        assert!(conn.reconnect(t0, 0).is_empty());
        assert!(conn.connect(t0).is_empty());
        assert_eq!(conn.reconnect_attempts(), attempts);
        assert_eq!(conn.error(), Some(OFFLINE));
    }

    #[test]
    fn offline_while_connected_reports_link_loss() {
        let t0 = Instant::now();
        let mut conn = connected(t0);

        let actions = conn.set_online(false, t0, 0);
        assert_eq!(actions, vec![
            ConnectionAction::Unsubscribe,
            ConnectionAction::Disconnected { reason: OFFLINE.to_string() },
        ]);
        assert_eq!(conn.last_disconnected_at(), Some(t0));
    }

    #[test]
    fn back_online_reconnects() {
        let t0 = Instant::now();
        let mut conn = connected(t0);
        conn.set_online(false, t0, 0);

        assert!(conn.set_online(true, t0, 0).is_empty());
        assert_eq!(conn.status(), ConnectionStatus::Reconnecting);
        assert!(conn.is_reconnect_scheduled());
    }

    #[test]
    fn manual_disconnect_is_not_retried() {
        let t0 = Instant::now();
        let mut conn = connected(t0);

        assert_eq!(conn.disconnect(t0), vec![ConnectionAction::Unsubscribe]);
        assert_eq!(conn.status(), ConnectionStatus::Disconnected);
        assert_eq!(conn.next_deadline(), None);

        conn.set_online(false, t0, 0);
        conn.set_online(true, t0, 0);
        assert_eq!(conn.status(), ConnectionStatus::Disconnected);
        assert!(!conn.is_reconnect_scheduled());
    }

    #[test]
    fn probe_failure_triggers_reconnect() {
        let t0 = Instant::now();
        let mut conn = connected(t0);
        let _ = conn.tick(t0, 0);

        let actions = conn.handle_probe_failed(0, "probe failed", t0, 0);
        assert_eq!(actions, vec![
            ConnectionAction::Unsubscribe,
            ConnectionAction::Disconnected { reason: "probe failed".to_string() },
        ]);
        assert_eq!(conn.status(), ConnectionStatus::Reconnecting);
        assert_eq!(conn.reconnect_attempts(), 1);
    }

    #[test]
    fn heartbeat_timeout_triggers_reconnect() {
        let t0 = Instant::now();
        let mut conn = connected(t0);
        let _ = conn.tick(t0, 0);

        let actions = conn.tick(t0 + Duration::from_secs(10), 0);
        assert!(actions.contains(&ConnectionAction::Disconnected {
            reason: "heartbeat timed out".to_string()
        }));
        assert_eq!(conn.status(), ConnectionStatus::Reconnecting);
    }

    #[test]
    fn probe_success_records_latency() {
        let t0 = Instant::now();
        let mut conn = connected(t0);
        let _ = conn.tick(t0, 0);

        conn.handle_probe_succeeded(0, t0 + Duration::from_millis(80));
        assert_eq!(conn.latency(), Some(Duration::from_millis(80)));
        assert_eq!(conn.quality(), Quality::Good);
    }

    #[test]
    fn measure_latency_only_when_connected() {
        let t0 = Instant::now();
        let mut conn = manager();
        assert!(conn.measure_latency(t0).is_empty());

        let mut conn = connected(t0);
        assert_eq!(conn.measure_latency(t0), vec![ConnectionAction::Probe { probe_id: 0 }]);
    }

    #[test]
    fn teardown_clears_all_deadlines() {
        let t0 = Instant::now();
        let mut conn = connected(t0);
        conn.teardown();

        assert_eq!(conn.next_deadline(), None);
        assert!(conn.tick(t0 + Duration::from_secs(3600), 0).is_empty());
    }

    #[test]
    fn jitter_comes_from_the_supplied_randomness() {
        let t0 = Instant::now();
        let config = ConnectionConfig {
            backoff: Backoff::default().with_jitter(Duration::from_millis(250)),
            ..ConnectionConfig::default()
        };
        let delay_for = |random: u64| {
            let mut conn: ConnectionManager<Instant> = ConnectionManager::new(config);
            conn.connect(t0);
            conn.handle_subscribe_failed(1, "boom", t0, random);
            conn.reconnect_delay().unwrap_or_default()
        };

        assert_eq!(delay_for(0), Duration::from_millis(1000));
        assert_eq!(delay_for(100), Duration::from_millis(1100));
        assert_eq!(delay_for(250), Duration::from_millis(1250));
        assert_eq!(delay_for(251), Duration::from_millis(1000));
        assert!(delay_for(u64::MAX) <= Duration::from_millis(1250));
    }
}
