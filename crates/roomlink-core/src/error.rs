//! Error types for the session core.
//!
//! Only validation failures and unknown queue items surface as errors.
//! Recoverable failures (link loss, failed sends, persistence) are absorbed
//! by the state machines and reported as observable state instead.

use thiserror::Error;

use crate::message::QueueItemId;

/// Rejection of a compose action before any network attempt.
///
/// Never queued, never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    /// No user is signed in for this session.
    #[error("not authenticated")]
    NotAuthenticated,

    /// Content is empty or whitespace only.
    #[error("message content is empty")]
    EmptyContent,
}

/// Errors from manual queue operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// The item is neither queued nor in the failed list.
    #[error("unknown queue item {0}")]
    UnknownItem(QueueItemId),
}

/// Errors returned by [`crate::Session::handle`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Compose validation failed.
    #[error(transparent)]
    Send(#[from] SendError),

    /// Manual queue operation failed.
    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl SessionError {
    /// Returns true if this error came from compose validation.
    ///
    /// Validation errors are the only errors a send can produce; everything
    /// else about a send is absorbed by the queue.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Send(_))
    }
}
