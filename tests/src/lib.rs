//! Shared helpers for the cross-crate scenario tests.

use hearth_behaviors::simulator::{Simulator, SimulatorConfig};
use hearth_kernel::model::StateChangedEvent;
use parking_lot::Mutex;
use std::sync::Arc;

/// Simulator with a frozen clock, for deterministic service-call tests.
pub fn paused_simulator() -> Arc<Simulator> {
    Arc::new(
        Simulator::new(SimulatorConfig {
            start_time: Some("2025-06-10T12:00:00Z".parse().unwrap()),
            paused: true,
            ..SimulatorConfig::default()
        })
        .expect("valid config"),
    )
}

/// Recorded view of one delivered change event.
#[derive(Debug, Clone)]
pub struct RecordedEvent {
    pub seq: u64,
    pub entity_id: String,
    pub old_state: Option<String>,
    pub new_state: String,
}

/// Install a listener that records every change event, in order.
pub fn record_events(simulator: &Simulator) -> Arc<Mutex<Vec<RecordedEvent>>> {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = log.clone();
    simulator.store().add_listener(move |event: &StateChangedEvent| {
        sink.lock().push(RecordedEvent {
            seq: event.seq,
            entity_id: event.entity_id.clone(),
            old_state: event.old_state.as_ref().map(|s| s.state.clone()),
            new_state: event.new_state.state.clone(),
        });
    });
    log
}

/// Service payload from JSON literal pairs.
pub fn payload(value: serde_json::Value) -> hearth_kernel::model::AttrMap {
    value.as_object().cloned().unwrap_or_default()
}
