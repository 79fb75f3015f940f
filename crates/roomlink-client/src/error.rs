//! Client error types.
//!
//! - `BackendError`: failures of backend operations (network, server)
//! - `RuntimeError`: failures surfaced through a [`crate::SessionHandle`]

use roomlink_core::{MessageId, SessionError};
use thiserror::Error;

/// Errors returned by a [`crate::Backend`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// Request could not reach the server.
    #[error("network error: {0}")]
    Network(String),

    /// Request did not complete in time.
    #[error("request timed out")]
    Timeout,

    /// Row does not exist (or is not visible to this user).
    #[error("message not found: {0}")]
    NotFound(MessageId),

    /// Server refused the request (permissions, constraint violation).
    #[error("rejected by server: {0}")]
    Rejected(String),

    /// Server-side failure.
    #[error("server error: {0}")]
    Server(String),
}

impl BackendError {
    /// Returns true if retrying the same request may succeed.
    ///
    /// Non-transient errors are still retried by the queue within its budget;
    /// this only affects logging and test assertions.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout | Self::Server(_))
    }
}

/// Errors returned by [`crate::SessionHandle`] methods.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    /// The session rejected the request.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The runtime task has stopped.
    #[error("session runtime closed")]
    Closed,
}

impl RuntimeError {
    /// Returns true for compose validation failures.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Session(err) if err.is_validation())
    }
}
