//! Realtime subscription manager.
//!
//! Opens one push channel per room and hydrates every insert notice with a
//! fetch by id before forwarding it: the push payload lacks author display
//! data. Deduplication is left to the session, since the same message may
//! also arrive through a direct-send echo or a fallback poll.
//!
//! Each subscription is an owned [`Subscription`] handle; closing it (or
//! dropping it) stops the forwarding task. There is no global registry.

use std::sync::Arc;

use roomlink_core::{Message, Room};
use tokio::{sync::mpsc, task::AbortHandle};

use crate::{backend::Backend, error::BackendError};

/// Events forwarded from a push channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionEvent {
    /// Hydrated message.
    Message(Message),
    /// The push stream ended.
    Closed,
}

/// Opens hydrated push subscriptions against a backend.
pub struct SubscriptionManager<B> {
    backend: Arc<B>,
}

impl<B> Clone for SubscriptionManager<B> {
    fn clone(&self) -> Self {
        Self { backend: Arc::clone(&self.backend) }
    }
}

impl<B: Backend> SubscriptionManager<B> {
    /// Create a manager over `backend`.
    pub fn new(backend: Arc<B>) -> Self {
        Self { backend }
    }

    /// Subscribe to `room`, forwarding hydrated messages into `sink`.
    ///
    /// Returns once the backend acknowledged the subscription. Must be
    /// called within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns the backend error if the subscription is refused.
    pub async fn subscribe(
        &self,
        room: &Room,
        sink: mpsc::Sender<SubscriptionEvent>,
    ) -> Result<Subscription, BackendError> {
        let mut notices = self.backend.subscribe(room).await?;
        tracing::debug!(%room, filter = ?room.filter(), "push channel open");

        let backend = Arc::clone(&self.backend);
        let task_room = room.clone();
        let task = tokio::spawn(async move {
            while let Some(notice) = notices.recv().await {
                if notice.room != task_room {
                    tracing::debug!(room = %notice.room, "ignoring notice for another room");
                    continue;
                }

                match backend.fetch_message(&notice.id).await {
                    Ok(message) => {
                        if sink.send(SubscriptionEvent::Message(message)).await.is_err() {
                            return;
                        }
                    },
                    Err(e) => {
                        tracing::warn!(message_id = %notice.id, error = %e, "failed to hydrate pushed message");
                    },
                }
            }

            tracing::debug!(room = %task_room, "push stream ended");
            let _ = sink.send(SubscriptionEvent::Closed).await;
        });

        Ok(Subscription { room: room.clone(), task: Some(task.abort_handle()) })
    }
}

/// Owned handle to an open push channel.
///
/// Closing is idempotent; dropping the handle closes it.
#[derive(Debug)]
pub struct Subscription {
    room: Room,
    task: Option<AbortHandle>,
}

impl Subscription {
    /// Subscribed room
    pub fn room(&self) -> &Room {
        &self.room
    }

    /// Whether [`Subscription::close`] was called.
    pub fn is_closed(&self) -> bool {
        self.task.is_none()
    }

    /// Stop forwarding. Safe to call more than once.
    pub fn close(&mut self) {
        if let Some(task) = self.task.take() {
            tracing::debug!(room = %self.room, "push channel closed");
            task.abort();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}
