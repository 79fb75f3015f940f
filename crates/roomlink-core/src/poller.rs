//! Fallback poller.
//!
//! Catches up on messages while push delivery is down. Activation waits for
//! a grace period after the link was lost so short blips never start
//! polling. While active it fetches everything newer than the last-seen
//! timestamp on a fixed interval. It deactivates as soon as the link is back.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::{env::MonotonicInstant, message::Message};

/// Time the link must stay down before polling starts.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Time between poll starts.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Poller configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollerConfig {
    /// Delay between link loss and activation
    pub grace_period: Duration,
    /// Interval between polls while active
    pub interval: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self { grace_period: DEFAULT_GRACE_PERIOD, interval: DEFAULT_POLL_INTERVAL }
    }
}

/// Actions returned by the poller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollerAction {
    /// Fallback mode entered
    Activated,
    /// Fetch messages created after `since` (everything if `None`)
    Fetch {
        /// Last-seen timestamp
        since: Option<DateTime<Utc>>,
    },
    /// Fallback mode left
    Deactivated,
}

/// Grace-delayed interval poller.
#[derive(Debug, Clone)]
pub struct FallbackPoller<I> {
    config: PollerConfig,
    lost_at: Option<I>,
    active: bool,
    next_poll: Option<I>,
    in_flight: bool,
    last_seen: Option<DateTime<Utc>>,
}

impl<I: MonotonicInstant> FallbackPoller<I> {
    /// Create an idle poller.
    pub fn new(config: PollerConfig) -> Self {
        Self { config, lost_at: None, active: false, next_poll: None, in_flight: false, last_seen: None }
    }

    /// Whether fallback mode is on
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Newest creation time observed on any delivery path
    pub fn last_seen(&self) -> Option<DateTime<Utc>> {
        self.last_seen
    }

    /// Link went down. Starts the grace period unless already running.
    pub fn on_link_lost(&mut self, now: I) {
        if self.lost_at.is_none() && !self.active {
            tracing::debug!(grace_ms = self.config.grace_period.as_millis() as u64, "fallback grace started");
            self.lost_at = Some(now);
        }
    }

    /// Link is back. Deactivates and cancels the poll timer.
    pub fn on_connected(&mut self) -> Vec<PollerAction> {
        self.stop()
    }

    /// Fire due timers.
    pub fn tick(&mut self, now: I) -> Vec<PollerAction> {
        let mut actions = Vec::new();

        if !self.active && self.lost_at.is_some_and(|lost| now >= lost + self.config.grace_period) {
            tracing::info!("fallback polling activated");
            self.active = true;
            self.lost_at = None;
            self.next_poll = Some(now);
            actions.push(PollerAction::Activated);
        }

        if self.active && !self.in_flight && self.next_poll.is_some_and(|at| now >= at) {
            self.in_flight = true;
            self.next_poll = Some(now + self.config.interval);
            tracing::debug!(since = ?self.last_seen, "fallback poll");
            actions.push(PollerAction::Fetch { since: self.last_seen });
        }

        actions
    }

    /// Poll returned these messages.
    pub fn handle_fetched(&mut self, messages: &[Message]) {
        self.in_flight = false;
        for message in messages {
            self.observe(message.created_at);
        }
    }

    /// Poll failed. The next interval tries again.
    pub fn handle_fetch_failed(&mut self, reason: &str) {
        self.in_flight = false;
        tracing::warn!(%reason, "fallback poll failed");
    }

    /// Advance the last-seen marker from another delivery path.
    pub fn observe(&mut self, created_at: DateTime<Utc>) {
        if self.last_seen.is_none_or(|seen| created_at > seen) {
            self.last_seen = Some(created_at);
        }
    }

    /// Deactivate and forget the grace period.
    pub fn stop(&mut self) -> Vec<PollerAction> {
        let was_active = self.active;
        self.lost_at = None;
        self.active = false;
        self.next_poll = None;
        self.in_flight = false;

        if was_active {
            tracing::info!("fallback polling deactivated");
            vec![PollerAction::Deactivated]
        } else {
            vec![]
        }
    }

    /// Earliest instant at which [`FallbackPoller::tick`] has work to do.
    pub fn next_deadline(&self) -> Option<I> {
        if self.active {
            if self.in_flight { None } else { self.next_poll }
        } else {
            self.lost_at.map(|lost| lost + self.config.grace_period)
        }
    }

    /// Cancel every timer.
    pub fn teardown(&mut self) {
        let _ = self.stop();
    }
}
