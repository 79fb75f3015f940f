//! Observable state snapshots for invariant checking.
//!
//! Snapshots capture the observable state of a session at a point in time.
//! Invariants operate on snapshots rather than live state so every check sees
//! the same consistent picture.

use chrono::{DateTime, Utc};
use roomlink_core::{ConnectionStatus, Environment, MessageId, QueueStats, Session};

/// Snapshot of every session under test.
#[derive(Debug, Clone, Default)]
pub struct SystemSnapshot {
    /// Per-session state snapshots.
    pub sessions: Vec<SessionSnapshot>,
}

impl SystemSnapshot {
    /// Create an empty snapshot (no sessions).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Create a snapshot with a single session.
    pub fn single(session: SessionSnapshot) -> Self {
        Self { sessions: vec![session] }
    }

    /// Add a session snapshot.
    pub fn add_session(&mut self, session: SessionSnapshot) {
        self.sessions.push(session);
    }
}

/// Retry bookkeeping of one queued item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrySnapshot {
    /// Attempts so far
    pub retry_count: u32,
    /// Attempt budget
    pub max_retries: u32,
}

/// Snapshot of a single session's observable state.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    /// Room label, for error messages.
    pub room: String,
    /// Timeline message ids in display order.
    pub message_ids: Vec<MessageId>,
    /// Timeline creation times in display order.
    pub created_at: Vec<DateTime<Utc>>,
    /// Link status.
    pub status: ConnectionStatus,
    /// Whether the fallback poller is active.
    pub is_fallback_mode: bool,
    /// Items waiting in the queue.
    pub queue_size: usize,
    /// Queue counters.
    pub stats: QueueStats,
    /// Retry state of every queued item.
    pub retries: Vec<RetrySnapshot>,
}

impl SessionSnapshot {
    /// Capture the observable state of `session`.
    pub fn from_session<E: Environment>(session: &Session<E>) -> Self {
        let messages = session.timeline().messages();
        Self {
            room: session.room().to_string(),
            message_ids: messages.iter().map(|m| m.id.clone()).collect(),
            created_at: messages.iter().map(|m| m.created_at).collect(),
            status: session.connection().status(),
            is_fallback_mode: session.poller().is_active(),
            queue_size: session.queue().len(),
            stats: session.queue().stats().clone(),
            retries: session
                .queue()
                .items()
                .iter()
                .map(|item| RetrySnapshot {
                    retry_count: item.retry_count,
                    max_retries: item.max_retries,
                })
                .collect(),
        }
    }
}
