//! Standard invariant checks.
//!
//! These invariants capture behavioral properties that must always hold.
//! They verify WHAT must be true, not specific test scenarios.

use std::collections::HashSet;

use roomlink_core::ConnectionStatus;

use super::{Invariant, InvariantResult, SystemSnapshot, Violation};

/// No message id appears twice in a timeline.
///
/// Load, push, poll, direct-send and queue deliveries can all carry the same
/// row; the timeline must keep exactly one copy.
pub struct UniqueMessageIds;

impl Invariant for UniqueMessageIds {
    fn name(&self) -> &'static str {
        "unique_message_ids"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for session in &state.sessions {
            let mut seen = HashSet::new();
            for id in &session.message_ids {
                if !seen.insert(id) {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!("session {}: message {} appears twice", session.room, id),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Timeline creation times never decrease.
pub struct TimelineOrdered;

impl Invariant for TimelineOrdered {
    fn name(&self) -> &'static str {
        "timeline_ordered"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for session in &state.sessions {
            for (i, window) in session.created_at.windows(2).enumerate() {
                if window[1] < window[0] {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!(
                            "session {}: {} at {} precedes {} at {}",
                            session.room,
                            session.message_ids[i + 1],
                            window[1],
                            session.message_ids[i],
                            window[0]
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Every queued item is still waiting, delivered or failed.
///
/// `total_queued >= total_processed + total_failed + queue_size`. Items can
/// leave without being counted (remove, clear), never the other way round.
pub struct QueueAccounting;

impl Invariant for QueueAccounting {
    fn name(&self) -> &'static str {
        "queue_accounting"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for session in &state.sessions {
            let stats = &session.stats;
            let accounted = stats.total_processed + stats.total_failed + session.queue_size as u64;
            if stats.total_queued < accounted {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!(
                        "session {}: queued {} < processed {} + failed {} + waiting {}",
                        session.room,
                        stats.total_queued,
                        stats.total_processed,
                        stats.total_failed,
                        session.queue_size
                    ),
                });
            }
        }
        Ok(())
    }
}

/// A queued item never has its budget spent.
///
/// The item that uses its last attempt leaves the queue at once.
pub struct RetryBudget;

impl Invariant for RetryBudget {
    fn name(&self) -> &'static str {
        "retry_budget"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for session in &state.sessions {
            if let Some(retry) = session.retries.iter().find(|r| r.retry_count >= r.max_retries) {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!(
                        "session {}: queued item at {} of {} attempts",
                        session.room, retry.retry_count, retry.max_retries
                    ),
                });
            }
        }
        Ok(())
    }
}

/// Fallback polling only runs while the push channel is down.
pub struct FallbackOnlyWhileDown;

impl Invariant for FallbackOnlyWhileDown {
    fn name(&self) -> &'static str {
        "fallback_only_while_down"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for session in &state.sessions {
            if session.is_fallback_mode && session.status == ConnectionStatus::Connected {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!("session {}: fallback mode while connected", session.room),
                });
            }
        }
        Ok(())
    }
}
