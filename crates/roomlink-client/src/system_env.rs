//! Production Environment implementation using runtime time and OS RNG.
//!
//! # Capabilities
//!
//! - Tokio's monotonic clock, so tests can pause and advance it
//! - System wall clock for message and queue timestamps
//! - OS RNG (getrandom) for queue item ids and backoff jitter

use std::time::Duration;

use chrono::{DateTime, Utc};
use roomlink_core::Environment;

/// Production environment.
///
/// Uses `tokio::time::Instant::now()` for time, `tokio::time::sleep()` for
/// async sleeping, and getrandom for randomness.
///
/// # Panics
///
/// Panics if the OS RNG fails. Queue item ids must be unique, and RNG
/// failure indicates an OS-level problem.
#[derive(Clone, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    type Instant = tokio::time::Instant;

    fn now(&self) -> Self::Instant {
        tokio::time::Instant::now()
    }

    fn wall_clock(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::fill(buffer).expect("invariant: OS RNG failure is unrecoverable");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_ids_differ() {
        let env = SystemEnv::new();
        assert_ne!(env.random_u128(), env.random_u128());
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_follows_paused_clock() {
        let env = SystemEnv::new();

        let start = env.now();
        env.sleep(Duration::from_secs(30)).await;

        assert_eq!(env.now() - start, Duration::from_secs(30));
    }
}
