//! Client runtime
//!
//! Async driver for [`roomlink_core::Session`]. Executes session actions
//! against a realtime [`Backend`], persists the outbound queue through a
//! [`QueueStore`], and publishes a [`SessionView`] for UI code.
//!
//! # Architecture
//!
//! The core crate holds every decision; this crate only performs I/O. Each
//! room session runs as one tokio task ([`RoomRuntime`]) controlled through a
//! cloneable [`SessionHandle`].
//!
//! # Components
//!
//! - [`Backend`]: realtime backend contract
//! - [`SubscriptionManager`]: hydrated push subscriptions
//! - [`QueueStore`]: durable queue storage (memory, redb, chaotic)
//! - [`NetworkMonitor`]: host network availability
//! - [`SystemEnv`]: production environment

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod backend;
pub mod error;
pub mod network;
pub mod runtime;
pub mod store;
pub mod subscription;
pub mod system_env;

pub use backend::Backend;
pub use error::{BackendError, RuntimeError};
pub use network::{ManualNetwork, NetworkMonitor};
pub use roomlink_core::{
    ConnectionInfo, ConnectionStatus, Message, QueueItemId, Room, SessionConfig, SessionView,
};
pub use runtime::{RoomRuntime, RuntimeConfig, SessionHandle};
pub use store::{ChaoticQueueStore, MemoryQueueStore, QueueStore, RedbQueueStore, StorageError};
pub use subscription::{Subscription, SubscriptionEvent, SubscriptionManager};
pub use system_env::SystemEnv;
