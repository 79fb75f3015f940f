//! Chaotic queue storage wrapper for fault injection testing
//!
//! Randomly fails operations so tests can verify that persistence failures
//! are logged and absorbed while the queue keeps working in memory.

use std::sync::{Arc, Mutex};

use roomlink_core::{QueueSnapshot, Room};

use super::{QueueStore, StorageError};

/// Queue store wrapper that randomly injects failures
///
/// Delegates to an underlying store but fails operations at a configured
/// rate. The RNG state is shared between clones.
#[derive(Clone)]
pub struct ChaoticQueueStore<S: QueueStore> {
    inner: S,
    /// Failure rate (0.0 = never fail, 1.0 = always fail)
    failure_rate: f64,
    rng: Arc<Mutex<ChaoticRng>>,
    failures: Arc<Mutex<usize>>,
}

/// Linear congruential generator, reproducible from its seed.
struct ChaoticRng {
    state: u64,
}

impl ChaoticRng {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    /// Next value in [0.0, 1.0)
    fn next(&mut self) -> f64 {
        // Numerical Recipes constants
        const A: u64 = 1_664_525;
        const C: u64 = 1_013_904_223;
        const M: u64 = 1u64 << 32;

        self.state = (A.wrapping_mul(self.state).wrapping_add(C)) % M;
        (self.state as f64) / (M as f64)
    }
}

impl<S: QueueStore> ChaoticQueueStore<S> {
    /// Wrap `inner` with the default seed. `failure_rate` is clamped to
    /// [0.0, 1.0].
    pub fn new(inner: S, failure_rate: f64) -> Self {
        Self::with_seed(inner, failure_rate, 0x1234_5678_9ABC_DEF0)
    }

    /// Wrap `inner` with an explicit seed for reproducible chaos.
    pub fn with_seed(inner: S, failure_rate: f64, seed: u64) -> Self {
        Self {
            inner,
            failure_rate: failure_rate.clamp(0.0, 1.0),
            rng: Arc::new(Mutex::new(ChaoticRng::new(seed))),
            failures: Arc::new(Mutex::new(0)),
        }
    }

    /// Underlying store (for checking state after chaos).
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Number of injected failures so far.
    pub fn failure_count(&self) -> usize {
        self.failures.lock().map(|count| *count).unwrap_or_default()
    }

    fn inject(&self) -> Result<(), StorageError> {
        let fail = self
            .rng
            .lock()
            .map_err(|_| StorageError::Io("chaotic rng lock poisoned".to_string()))?
            .next()
            < self.failure_rate;
        if !fail {
            return Ok(());
        }

        if let Ok(mut count) = self.failures.lock() {
            *count += 1;
        }
        Err(StorageError::Io("chaotic failure injection".to_string()))
    }
}

impl<S: QueueStore> QueueStore for ChaoticQueueStore<S> {
    fn load(&self, room: &Room) -> Result<Option<QueueSnapshot>, StorageError> {
        self.inject()?;
        self.inner.load(room)
    }

    fn save(&self, snapshot: &QueueSnapshot) -> Result<(), StorageError> {
        self.inject()?;
        self.inner.save(snapshot)
    }

    fn remove(&self, room: &Room) -> Result<(), StorageError> {
        self.inject()?;
        self.inner.remove(room)
    }
}
