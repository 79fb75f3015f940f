//! Heartbeat and latency monitor.
//!
//! While the link is up, a lightweight probe is issued every
//! `interval`. The round-trip time of the last successful probe is the
//! measured latency, classified against `latency_threshold`. A probe that
//! errors or outlives `probe_timeout` is treated as a link failure by the
//! owning [`crate::ConnectionManager`].
//!
//! At most one probe is outstanding. Probe ids let the driver report results
//! for a probe that has since been superseded without corrupting state.

use std::time::Duration;

use crate::env::MonotonicInstant;

/// Interval between probes while connected.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Latency at or below which the link is considered good.
pub const DEFAULT_LATENCY_THRESHOLD: Duration = Duration::from_millis(1000);

/// Time a probe may remain unanswered before the link is declared failed.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Heartbeat configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Time between a completed probe and the next one
    pub interval: Duration,
    /// Quality boundary (inclusive: equal latency is good)
    pub latency_threshold: Duration,
    /// Deadline for a single probe
    pub probe_timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_HEARTBEAT_INTERVAL,
            latency_threshold: DEFAULT_LATENCY_THRESHOLD,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }
}

/// Classification of the last measured latency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quality {
    /// No successful probe yet.
    Unknown,
    /// Latency at or below the threshold.
    Good,
    /// Latency above the threshold.
    Poor,
}

/// Outcome of advancing the heartbeat clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatTick {
    /// Nothing due.
    Idle,
    /// A probe is due. The driver must execute it and report the result with
    /// this id.
    Probe(u64),
    /// The outstanding probe exceeded its timeout.
    TimedOut,
}

/// Probe scheduler and latency tracker.
#[derive(Debug, Clone)]
pub struct Heartbeat<I> {
    config: HeartbeatConfig,
    running: bool,
    next_probe: Option<I>,
    outstanding: Option<(u64, I)>,
    next_probe_id: u64,
    latency: Option<Duration>,
}

impl<I: MonotonicInstant> Heartbeat<I> {
    /// Create a stopped heartbeat.
    pub fn new(config: HeartbeatConfig) -> Self {
        Self {
            config,
            running: false,
            next_probe: None,
            outstanding: None,
            next_probe_id: 0,
            latency: None,
        }
    }

    /// Begin probing. The first probe is due immediately.
    pub fn start(&mut self, now: I) {
        self.running = true;
        self.next_probe = Some(now);
        self.outstanding = None;
    }

    /// Stop probing and forget any outstanding probe.
    ///
    /// The last measured latency is kept for display.
    pub fn stop(&mut self) {
        self.running = false;
        self.next_probe = None;
        self.outstanding = None;
    }

    /// Whether probes are being scheduled.
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Issue an on-demand probe. `None` if one is already outstanding or the
    /// heartbeat is stopped.
    pub fn measure(&mut self, now: I) -> Option<u64> {
        if !self.running || self.outstanding.is_some() {
            return None;
        }
        Some(self.issue(now))
    }

    /// Advance the clock.
    pub fn tick(&mut self, now: I) -> HeartbeatTick {
        if !self.running {
            return HeartbeatTick::Idle;
        }

        if let Some((_, started)) = self.outstanding {
            if now >= started + self.config.probe_timeout {
                self.stop();
                return HeartbeatTick::TimedOut;
            }
            return HeartbeatTick::Idle;
        }

        match self.next_probe {
            Some(due) if now >= due => HeartbeatTick::Probe(self.issue(now)),
            _ => HeartbeatTick::Idle,
        }
    }

    /// Record a successful probe. Returns the measured latency, or `None` if
    /// the id does not match the outstanding probe.
    pub fn handle_probe_ok(&mut self, probe_id: u64, now: I) -> Option<Duration> {
        let (id, started) = self.outstanding?;
        if id != probe_id {
            return None;
        }

        let latency = now - started;
        self.latency = Some(latency);
        self.outstanding = None;
        self.next_probe = Some(now + self.config.interval);
        Some(latency)
    }

    /// Record a failed probe. Returns true if it was the outstanding one,
    /// in which case the heartbeat stops.
    pub fn handle_probe_failed(&mut self, probe_id: u64) -> bool {
        match self.outstanding {
            Some((id, _)) if id == probe_id => {
                self.stop();
                true
            },
            _ => false,
        }
    }

    /// Last measured round-trip time.
    pub fn latency(&self) -> Option<Duration> {
        self.latency
    }

    /// Quality classification of [`Heartbeat::latency`].
    pub fn quality(&self) -> Quality {
        match self.latency {
            None => Quality::Unknown,
            Some(latency) if latency <= self.config.latency_threshold => Quality::Good,
            Some(_) => Quality::Poor,
        }
    }

    /// Earliest instant at which [`Heartbeat::tick`] has work to do.
    pub fn next_deadline(&self) -> Option<I> {
        if !self.running {
            return None;
        }
        match self.outstanding {
            Some((_, started)) => Some(started + self.config.probe_timeout),
            None => self.next_probe,
        }
    }

    fn issue(&mut self, now: I) -> u64 {
        let id = self.next_probe_id;
        self.next_probe_id = self.next_probe_id.wrapping_add(1);
        self.outstanding = Some((id, now));
        self.next_probe = None;
        id
    }
}
