//! Session invariants checked during simulation.
//!
//! A check sees only what a UI could observe: the timeline, the queue
//! counters, retry budgets and the connection flags of each session, captured
//! in a [`SystemSnapshot`]. [`crate::SimDriver`] runs the registry after
//! every settled step, so a violation points at the event that caused it.
//!
//! ```ignore
//! let sim = SimDriver::new(room, user, config).with_invariants(InvariantRegistry::standard());
//! ```

mod checks;
mod snapshot;

use std::fmt;

pub use checks::{
    FallbackOnlyWhileDown, QueueAccounting, RetryBudget, TimelineOrdered, UniqueMessageIds,
};
pub use snapshot::{RetrySnapshot, SessionSnapshot, SystemSnapshot};

/// Outcome of one check.
pub type InvariantResult = Result<(), Violation>;

/// A broken invariant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// Which check failed
    pub invariant: &'static str,
    /// What was observed
    pub message: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.invariant, self.message)
    }
}

impl std::error::Error for Violation {}

/// Property of observable session state.
pub trait Invariant: Send + Sync {
    /// Stable snake_case name used in reports.
    fn name(&self) -> &'static str;

    /// Check every session in `state`.
    fn check(&self, state: &SystemSnapshot) -> InvariantResult;
}

/// Ordered set of checks.
#[derive(Default)]
pub struct InvariantRegistry {
    checks: Vec<Box<dyn Invariant>>,
}

impl InvariantRegistry {
    /// Registry without checks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Timeline ids unique and ordered, queue counters consistent, retry
    /// budgets respected, fallback polling only while the link is down.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.add(UniqueMessageIds);
        registry.add(TimelineOrdered);
        registry.add(QueueAccounting);
        registry.add(RetryBudget);
        registry.add(FallbackOnlyWhileDown);
        registry
    }

    /// Register a check.
    pub fn add<I: Invariant + 'static>(&mut self, invariant: I) {
        self.checks.push(Box::new(invariant));
    }

    /// Names of the registered checks in order.
    pub fn names(&self) -> Vec<&'static str> {
        self.checks.iter().map(|check| check.name()).collect()
    }

    /// Run every check and collect all violations.
    pub fn check_all(&self, state: &SystemSnapshot) -> Result<(), Vec<Violation>> {
        let violations: Vec<_> =
            self.checks.iter().filter_map(|check| check.check(state).err()).collect();

        if violations.is_empty() { Ok(()) } else { Err(violations) }
    }

    /// Run every check and panic listing all violations. `context` says
    /// where in the simulation the state was taken.
    #[allow(clippy::panic)]
    pub fn assert_all(&self, state: &SystemSnapshot, context: &str) {
        if let Err(violations) = self.check_all(state) {
            let report: Vec<_> = violations.iter().map(ToString::to_string).collect();
            panic!("session invariants broken {context}:\n  {}", report.join("\n  "));
        }
    }

    /// Number of checks.
    pub fn len(&self) -> usize {
        self.checks.len()
    }

    /// Whether no check is registered.
    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }
}
