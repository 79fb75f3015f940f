//! Deterministic simulation harness for roomlink testing.
//!
//! Simulated implementations of the environment and backend seams so session
//! behavior can be reproduced exactly under link loss, send failures and
//! restarts.
//!
//! - [`SimEnv`]: virtual clock and seeded RNG
//! - [`SimBackend`]: in-memory backend with fault injection, usable by both
//!   [`SimDriver`] and the async client runtime
//! - [`SimDriver`]: synchronous driver executing session actions in order
//!
//! # Invariant Testing
//!
//! The `invariants` module provides behavioral testing through invariant
//! checks. Use [`InvariantRegistry::standard()`] for the common session
//! invariants.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod invariants;
pub mod sim_backend;
pub mod sim_driver;
pub mod sim_env;

pub use invariants::{
    FallbackOnlyWhileDown, Invariant, InvariantRegistry, InvariantResult, QueueAccounting,
    RetryBudget, RetrySnapshot, SessionSnapshot, SystemSnapshot, TimelineOrdered,
    UniqueMessageIds, Violation,
};
pub use sim_backend::SimBackend;
pub use sim_driver::SimDriver;
pub use sim_env::{SimEnv, SimInstant};
use tracing_subscriber::EnvFilter;

/// Install a test-friendly tracing subscriber.
///
/// Honors `RUST_LOG` and defaults to `warn`. Safe to call from every test;
/// only the first call installs the subscriber.
pub fn init_test_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_test_writer().try_init();
}
