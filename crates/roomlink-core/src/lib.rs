//! Core state machines for resilient room messaging.
//!
//! Every component follows the Sans-IO action pattern: methods take the
//! current instant as input and return actions for a driver to execute. No
//! component performs I/O or owns a timer. Timers are deadlines stored in the
//! state machine, so cancelling one means clearing a field and a stale
//! callback can never fire.
//!
//! # Components
//!
//! - [`ConnectionManager`]: link health, reconnection scheduling, heartbeat
//! - [`MessageQueue`]: durable outbound queue with per-item retry
//! - [`FallbackPoller`]: catch-up polling while push delivery is down
//! - [`Timeline`]: deduplicated, time-ordered message list
//! - [`Session`]: orchestrator combining all of the above for one room

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod backoff;
pub mod connection;
pub mod env;
pub mod error;
pub mod heartbeat;
pub mod message;
pub mod poller;
pub mod queue;
pub mod session;
pub mod timeline;

pub use backoff::Backoff;
pub use connection::{ConnectionAction, ConnectionConfig, ConnectionManager, ConnectionStatus};
pub use env::{Environment, MonotonicInstant};
pub use error::{QueueError, SendError, SessionError};
pub use heartbeat::{Heartbeat, HeartbeatConfig, Quality};
pub use message::{
    Author, InsertNotice, Message, MessageId, Metadata, NewMessage, QueueItemId, ReadStatus, Room,
    UserId,
};
pub use poller::{FallbackPoller, PollerAction, PollerConfig};
pub use queue::{
    DrainReason, FailedItem, MessageQueue, QueueAction, QueueConfig, QueueItem, QueueSnapshot,
    QueueStats,
};
pub use session::{
    ConnectionInfo, FetchPurpose, Session, SessionAction, SessionConfig, SessionEvent, SessionView,
};
pub use timeline::{PendingEntry, PendingState, Timeline};
