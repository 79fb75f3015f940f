//! Host network availability.
//!
//! The runtime listens for online/offline changes and also polls the
//! point-in-time flag on an interval as a cross-check, since change events
//! can be missed.

use std::sync::Arc;

use tokio::sync::watch;

/// Source of host network availability.
pub trait NetworkMonitor: Send + Sync + 'static {
    /// Current availability.
    fn is_online(&self) -> bool;

    /// Receiver notified on every availability change.
    fn watch(&self) -> watch::Receiver<bool>;
}

/// Network monitor driven by explicit calls.
///
/// Used by hosts that receive platform online/offline callbacks, and by
/// tests. Clones share state.
#[derive(Clone)]
pub struct ManualNetwork {
    state: Arc<watch::Sender<bool>>,
}

impl ManualNetwork {
    /// Create a monitor with the given initial availability.
    pub fn new(online: bool) -> Self {
        let (state, _) = watch::channel(online);
        Self { state: Arc::new(state) }
    }

    /// Report a platform availability change. Repeated values are ignored.
    pub fn set_online(&self, online: bool) {
        let changed = self.state.send_if_modified(|current| {
            let changed = *current != online;
            *current = online;
            changed
        });
        if changed {
            tracing::debug!(online, "host network changed");
        }
    }
}

impl Default for ManualNetwork {
    fn default() -> Self {
        Self::new(true)
    }
}

impl NetworkMonitor for ManualNetwork {
    fn is_online(&self) -> bool {
        *self.state.borrow()
    }

    fn watch(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn changes_are_observable() {
        let network = ManualNetwork::default();
        let mut rx = network.watch();
        assert!(network.is_online());

        network.set_online(false);
        assert!(!network.is_online());
        assert!(rx.has_changed().unwrap());
        assert!(!*rx.borrow_and_update());

        network.set_online(false);
        assert!(!rx.has_changed().unwrap());
    }
}
