//! Exponential backoff policy.
//!
//! `delay(attempt) = min(initial * multiplier^attempt, max)`. Used by the
//! reconnection scheduler and by the message queue's per-item retry.
//!
//! No jitter is applied unless configured. The default policy is exactly
//! deterministic.

use std::time::Duration;

/// Delay before the first retry.
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_millis(1000);

/// Growth factor between consecutive retries.
pub const DEFAULT_MULTIPLIER: u32 = 2;

/// Upper bound on any single delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(30_000);

/// Exponential backoff with a cap and optional additive jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    /// Delay for attempt 0.
    pub initial: Duration,
    /// Factor applied per attempt.
    pub multiplier: u32,
    /// Cap on the computed delay (jitter is added on top).
    pub max: Duration,
    /// Upper bound of the uniformly random extra delay. Zero disables jitter.
    pub jitter: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(DEFAULT_INITIAL_DELAY, DEFAULT_MULTIPLIER, DEFAULT_MAX_DELAY)
    }
}

impl Backoff {
    /// Create a policy without jitter.
    pub const fn new(initial: Duration, multiplier: u32, max: Duration) -> Self {
        Self { initial, multiplier, max, jitter: Duration::ZERO }
    }

    /// Same policy with an additive jitter bound.
    #[must_use]
    pub const fn with_jitter(self, jitter: Duration) -> Self {
        Self { jitter, ..self }
    }

    /// Deterministic delay for the given zero-based attempt.
    ///
    /// Saturates instead of overflowing for large attempt numbers.
    pub fn delay(&self, attempt: u32) -> Duration {
        let max_ms = self.max.as_millis();
        let delay_ms = u128::from(self.multiplier)
            .checked_pow(attempt)
            .and_then(|factor| self.initial.as_millis().checked_mul(factor))
            .map_or(max_ms, |ms| ms.min(max_ms));

        Duration::from_millis(u64::try_from(delay_ms).unwrap_or(u64::MAX))
    }

    /// Delay plus jitter derived from `random`.
    ///
    /// With zero jitter this equals [`Backoff::delay`], whatever `random` is.
    pub fn delay_with_jitter(&self, attempt: u32, random: u64) -> Duration {
        let base = self.delay(attempt);
        let jitter_ms = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        if jitter_ms == 0 {
            return base;
        }

        base.saturating_add(Duration::from_millis(random % jitter_ms.saturating_add(1)))
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn default_delays_double_until_cap() {
        let backoff = Backoff::default();
        let delays: Vec<u128> = (0..7).map(|n| backoff.delay(n).as_millis()).collect();

        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16000, 30000, 30000]);
    }

    #[test]
    fn huge_attempt_saturates_at_cap() {
        let backoff = Backoff::default();
        assert_eq!(backoff.delay(200), DEFAULT_MAX_DELAY);
        assert_eq!(backoff.delay(u32::MAX), DEFAULT_MAX_DELAY);
    }

    #[test]
    fn multiplier_one_is_constant() {
        let backoff = Backoff::new(Duration::from_millis(250), 1, Duration::from_secs(5));
        assert_eq!(backoff.delay(0), Duration::from_millis(250));
        assert_eq!(backoff.delay(9), Duration::from_millis(250));
    }

    #[test]
    fn zero_jitter_ignores_random_input() {
        let backoff = Backoff::default();
        assert_eq!(backoff.delay_with_jitter(3, u64::MAX), Duration::from_millis(8000));
    }

    #[test]
    fn unbounded_jitter_does_not_overflow() {
        let backoff = Backoff::default().with_jitter(Duration::MAX);
        assert_eq!(backoff.delay_with_jitter(0, u64::MAX), Duration::from_millis(1000));
        assert_eq!(
            backoff.delay_with_jitter(0, u64::MAX - 1),
            Duration::from_millis(1000).saturating_add(Duration::from_millis(u64::MAX - 1))
        );
    }

    proptest! {
        #[test]
        fn prop_delay_never_exceeds_cap(attempt in any::<u32>()) {
            let backoff = Backoff::default();
            prop_assert!(backoff.delay(attempt) <= DEFAULT_MAX_DELAY);
        }

        #[test]
        fn prop_delay_is_monotonic(attempt in 0u32..64) {
            let backoff = Backoff::default();
            prop_assert!(backoff.delay(attempt) <= backoff.delay(attempt + 1));
        }

        #[test]
        fn prop_jitter_stays_within_bound(attempt in 0u32..16, random in any::<u64>()) {
            let backoff = Backoff::default().with_jitter(Duration::from_millis(500));
            let delay = backoff.delay_with_jitter(attempt, random);
            let base = backoff.delay(attempt);

            prop_assert!(delay >= base);
            prop_assert!(delay <= base + Duration::from_millis(500));
        }
    }
}
