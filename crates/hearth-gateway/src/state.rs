//! Shared application state for the API server.

use crate::events::EventBridge;
use hearth_behaviors::simulator::Simulator;
use std::sync::Arc;

/// State shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// The simulator - source of truth for entities, clock, and services.
    pub simulator: Arc<Simulator>,
    /// Store-to-broadcast bridge feeding SSE and WebSocket sessions.
    pub events: Arc<EventBridge>,
}

impl AppState {
    /// Wrap a simulator and install the event bridge on its store.
    pub fn new(simulator: Arc<Simulator>) -> Self {
        let events = Arc::new(EventBridge::install(simulator.store().clone()));
        Self { simulator, events }
    }
}
