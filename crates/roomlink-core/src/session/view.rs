//! Read-only session state for UI consumption.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::{
    connection::ConnectionStatus,
    heartbeat::Quality,
    message::{Message, ReadStatus, Room},
    queue::{FailedItem, QueueStats},
    timeline::PendingEntry,
};

/// Connection diagnostics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Link status
    pub status: ConnectionStatus,
    /// Host network availability
    pub is_online: bool,
    /// Last measured round trip
    pub latency: Option<Duration>,
    /// Latency classification
    pub quality: Quality,
    /// Attempts since the last success or reset
    pub reconnect_attempts: u32,
    /// Attempt budget
    pub max_reconnect_attempts: u32,
    /// Delay of the last scheduled attempt
    pub reconnect_delay: Option<Duration>,
    /// Wall-clock time the link was last established
    pub last_connected_at: Option<DateTime<Utc>>,
    /// Wall-clock time the link was last lost
    pub last_disconnected_at: Option<DateTime<Utc>>,
    /// Last link failure reason
    pub error: Option<String>,
}

/// Snapshot of everything a room view renders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionView {
    /// Room
    pub room: Room,
    /// Confirmed messages, oldest first
    pub messages: Vec<Message>,
    /// Optimistic entries
    pub pending: Vec<PendingEntry>,
    /// Items that exhausted their retry budget
    pub failed: Vec<FailedItem>,
    /// Link diagnostics
    pub connection: ConnectionInfo,
    /// Queued item count
    pub queue_size: usize,
    /// Queue counters
    pub queue_stats: QueueStats,
    /// Whether fallback polling is active
    pub is_fallback_mode: bool,
    /// User-facing error
    pub error: Option<String>,
    /// Read marker, if recorded
    pub read_status: Option<ReadStatus>,
}
