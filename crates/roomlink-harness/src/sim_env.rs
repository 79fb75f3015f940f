//! Simulated environment with a virtual clock and seeded randomness.
//!
//! Time only moves when a test calls [`SimEnv::advance`] (or sleeps through
//! the environment), so every timer in the session fires at an exact,
//! reproducible instant. Clones share the clock and the RNG.

use std::{
    ops::{Add, Sub},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use chrono::{DateTime, TimeDelta, Utc};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use roomlink_core::Environment;

/// Wall-clock time at virtual instant zero (2024-01-01T00:00:00Z).
const SIM_EPOCH_SECS: i64 = 1_704_067_200;

/// Instant on the virtual clock, measured from simulation start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SimInstant(Duration);

impl SimInstant {
    /// Time since simulation start.
    pub fn elapsed(self) -> Duration {
        self.0
    }
}

impl Sub for SimInstant {
    type Output = Duration;

    fn sub(self, rhs: Self) -> Duration {
        self.0.saturating_sub(rhs.0)
    }
}

impl Add<Duration> for SimInstant {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self {
        Self(self.0 + rhs)
    }
}

struct SimState {
    elapsed: Duration,
    rng: ChaCha8Rng,
}

/// Deterministic environment for simulation.
#[derive(Clone)]
pub struct SimEnv {
    state: Arc<Mutex<SimState>>,
}

impl Default for SimEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl SimEnv {
    /// Environment with seed 0.
    pub fn new() -> Self {
        Self::with_seed(0)
    }

    /// Environment with an explicit seed.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                elapsed: Duration::ZERO,
                rng: ChaCha8Rng::seed_from_u64(seed),
            })),
        }
    }

    /// Move the virtual clock forward.
    pub fn advance(&self, duration: Duration) {
        self.lock().elapsed += duration;
    }

    /// Time since simulation start.
    pub fn elapsed(&self) -> Duration {
        self.lock().elapsed
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Environment for SimEnv {
    type Instant = SimInstant;

    fn now(&self) -> SimInstant {
        SimInstant(self.lock().elapsed)
    }

    fn wall_clock(&self) -> DateTime<Utc> {
        let base = DateTime::<Utc>::UNIX_EPOCH + TimeDelta::seconds(SIM_EPOCH_SECS);
        let offset = TimeDelta::from_std(self.elapsed()).unwrap_or(TimeDelta::MAX);
        base.checked_add_signed(offset).unwrap_or(base)
    }

    /// Advances the virtual clock and completes immediately.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        self.advance(duration);
        std::future::ready(())
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        self.lock().rng.fill_bytes(buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_only_moves_on_advance() {
        let env = SimEnv::new();
        let start = env.now();
        assert_eq!(env.now(), start);

        env.advance(Duration::from_millis(1500));
        assert_eq!(env.now() - start, Duration::from_millis(1500));
        assert_eq!(env.wall_clock().to_rfc3339(), "2024-01-01T00:00:01.500+00:00");
    }

    #[test]
    fn same_seed_same_bytes() {
        let a = SimEnv::with_seed(42);
        let b = SimEnv::with_seed(42);
        assert_eq!(a.random_u128(), b.random_u128());
        assert_ne!(a.random_u64(), SimEnv::with_seed(43).random_u64());
    }

    #[test]
    fn instants_never_underflow() {
        let early = SimInstant::default();
        let late = early + Duration::from_secs(1);
        assert_eq!(early - late, Duration::ZERO);
    }
}
