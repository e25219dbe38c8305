//! Bridge from the store's synchronous listener fan-out to async
//! consumers.
//!
//! Exactly one store listener is installed; it republishes every
//! [`StateChangedEvent`] onto a tokio broadcast channel that SSE streams
//! and WebSocket sessions subscribe to. The listener only clones an `Arc`
//! and enqueues, so it never blocks the write path; consumers that lag
//! lose the oldest events and get a warning, never backpressure into the
//! kernel.

use hearth_kernel::model::StateChangedEvent;
use hearth_kernel::store::{ListenerId, StateStore};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

/// Buffered events per subscriber before lag starts dropping the oldest.
const EVENT_BUFFER: usize = 1024;

/// Store-to-broadcast event bridge.
pub struct EventBridge {
    sender: broadcast::Sender<Arc<StateChangedEvent>>,
    listener: ListenerId,
    store: Arc<StateStore>,
}

impl EventBridge {
    /// Install the bridge's listener on `store`.
    pub fn install(store: Arc<StateStore>) -> Self {
        let (sender, _) = broadcast::channel(EVENT_BUFFER);
        let tx = sender.clone();
        let listener = store.add_listener(move |event| {
            // A send fails only when nobody is subscribed; that is fine.
            let _ = tx.send(Arc::new(event.clone()));
        });
        debug!("event bridge installed");
        Self {
            sender,
            listener,
            store,
        }
    }

    /// New subscription starting at the current stream position.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<StateChangedEvent>> {
        self.sender.subscribe()
    }
}

impl Drop for EventBridge {
    fn drop(&mut self) {
        self.store.remove_listener(self.listener);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_kernel::clock::SimulationClock;
    use hearth_kernel::metrics::KernelMetrics;
    use hearth_kernel::model::AttrMap;

    #[tokio::test]
    async fn events_flow_through_the_bridge_in_order() {
        let clock = Arc::new(SimulationClock::realtime());
        let store = Arc::new(StateStore::new(clock, Arc::new(KernelMetrics::new())));
        let bridge = EventBridge::install(store.clone());
        let mut rx = bridge.subscribe();

        store.set_state("light.a", "on", AttrMap::new()).unwrap();
        store.set_state("light.a", "off", AttrMap::new()).unwrap();

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.new_state.state, "on");
        assert_eq!(second.new_state.state, "off");
        assert!(first.seq < second.seq);
    }

    #[tokio::test]
    async fn dropping_the_bridge_removes_the_listener() {
        let clock = Arc::new(SimulationClock::realtime());
        let store = Arc::new(StateStore::new(clock, Arc::new(KernelMetrics::new())));
        let bridge = EventBridge::install(store.clone());
        drop(bridge);
        // No listener left: the write still succeeds.
        store.set_state("light.a", "on", AttrMap::new()).unwrap();
    }
}
