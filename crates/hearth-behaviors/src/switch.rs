//! Switch domain engine.

use crate::engine::{EngineCore, friendly_name, round_to};
use hearth_kernel::clock::SimulationClock;
use hearth_kernel::engine::BehaviorEngine;
use hearth_kernel::error::{KernelError, KernelResult};
use hearth_kernel::model::AttrMap;
use hearth_kernel::scheduler::Scheduler;
use hearth_kernel::store::StateStore;
use chrono::Duration;
use parking_lot::{Mutex, RwLock};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;

/// Per-switch configuration. Unrecognized keys are ignored.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SwitchConfig {
    pub name: Option<String>,
    pub power_monitoring: bool,
    /// Watts drawn while on, before the ±10% jitter.
    pub rated_power: f64,
    pub initial_state: Option<String>,
}

impl Default for SwitchConfig {
    fn default() -> Self {
        Self {
            name: None,
            power_monitoring: false,
            rated_power: 10.0,
            initial_state: None,
        }
    }
}

/// Behavior engine for `switch.*` entities.
pub struct SwitchEngine {
    core: EngineCore,
    configs: RwLock<HashMap<String, SwitchConfig>>,
    rng: Mutex<SmallRng>,
}

impl SwitchEngine {
    pub fn new(
        store: Arc<StateStore>,
        clock: Arc<SimulationClock>,
        scheduler: Arc<Scheduler>,
        seed: u64,
    ) -> Arc<Self> {
        Arc::new(Self {
            core: EngineCore::new("switch", store, clock, scheduler),
            configs: RwLock::new(HashMap::new()),
            rng: Mutex::new(SmallRng::seed_from_u64(seed)),
        })
    }

    /// Refresh `current_power_w` on monitored switches: rated draw with
    /// ±10% jitter while on, phantom draw while off.
    fn update_power_monitoring(&self) {
        for entity_id in self.core.entity_ids() {
            let Some(state) = self.core.store.get_state(&entity_id) else {
                continue;
            };
            if state.attr("current_power_w").is_none() {
                continue;
            }

            let rated = self
                .configs
                .read()
                .get(&entity_id)
                .map(|c| c.rated_power)
                .unwrap_or(10.0);
            let power = {
                let mut rng = self.rng.lock();
                if state.state == "on" {
                    rated * rng.gen_range(0.9..1.1)
                } else {
                    rng.gen_range(0.0..0.5)
                }
            };

            let mut delta = AttrMap::new();
            delta.insert("current_power_w".into(), json!(round_to(power, 1)));
            let _ = self.core.update_state(&entity_id, &state.state, delta);
        }
    }

    fn set(&self, entity_id: &str, next: &str) -> KernelResult<()> {
        if self.core.store.get_state(entity_id).is_some() {
            self.core.update_state(entity_id, next, AttrMap::new())?;
        }
        Ok(())
    }
}

impl BehaviorEngine for SwitchEngine {
    fn domain(&self) -> &'static str {
        self.core.domain()
    }

    fn register_entity(&self, entity_id: &str, config: Option<Value>) -> KernelResult<()> {
        let config: SwitchConfig = match config {
            Some(value) => serde_json::from_value(value)
                .map_err(|e| KernelError::invalid(format!("switch config: {e}")))?,
            None => SwitchConfig::default(),
        };
        self.core.admit(entity_id)?;
        if self.core.store.get_state(entity_id).is_none() {
            let mut attrs = AttrMap::new();
            attrs.insert(
                "friendly_name".into(),
                json!(friendly_name(entity_id, config.name.as_deref())),
            );
            if config.power_monitoring {
                attrs.insert("current_power_w".into(), json!(0.0));
            }
            let initial = config.initial_state.as_deref().unwrap_or("off");
            self.core.store.set_state(entity_id, initial, attrs)?;
        }
        self.configs.write().insert(entity_id.to_string(), config);
        Ok(())
    }

    fn start(self: Arc<Self>) {
        if !self.core.begin_start() {
            return;
        }
        let engine = self.clone();
        self.core.scheduler.schedule_interval(
            Duration::seconds(30),
            move || engine.update_power_monitoring(),
            Some("switch_power_monitoring"),
            false,
        );
    }

    fn handle_service_call(
        &self,
        service: &str,
        entity_id: Option<&str>,
        _data: &AttrMap,
    ) -> KernelResult<bool> {
        let Some(entity_id) = entity_id else {
            return Ok(false);
        };
        if !self.core.owns(entity_id) {
            return Ok(false);
        }
        match service {
            "turn_on" => self.set(entity_id, "on").map(|()| true),
            "turn_off" => self.set(entity_id, "off").map(|()| true),
            "toggle" => {
                let next = match self.core.store.get_state(entity_id) {
                    Some(state) if state.state == "on" => "off",
                    _ => "on",
                };
                self.set(entity_id, next).map(|()| true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_kernel::metrics::KernelMetrics;

    fn fixture() -> (Arc<StateStore>, Arc<SwitchEngine>) {
        let clock = Arc::new(SimulationClock::realtime());
        let metrics = Arc::new(KernelMetrics::new());
        let store = Arc::new(StateStore::new(clock.clone(), metrics.clone()));
        let scheduler = Arc::new(Scheduler::new(clock.clone(), metrics));
        let engine = SwitchEngine::new(store.clone(), clock, scheduler, 5);
        (store, engine)
    }

    #[test]
    fn monitored_switch_gets_power_attribute() {
        let (store, engine) = fixture();
        engine
            .register_entity(
                "switch.heater",
                Some(json!({"power_monitoring": true, "rated_power": 1500.0})),
            )
            .unwrap();
        let state = store.get_state("switch.heater").unwrap();
        assert_eq!(state.attr_f64("current_power_w"), Some(0.0));
    }

    #[test]
    fn toggle_round_trips() {
        let (store, engine) = fixture();
        engine.register_entity("switch.fan", None).unwrap();

        engine
            .handle_service_call("toggle", Some("switch.fan"), &AttrMap::new())
            .unwrap();
        assert_eq!(store.get_state("switch.fan").unwrap().state, "on");

        engine
            .handle_service_call("toggle", Some("switch.fan"), &AttrMap::new())
            .unwrap();
        assert_eq!(store.get_state("switch.fan").unwrap().state, "off");
    }

    #[test]
    fn power_tick_tracks_on_off_draw() {
        let (store, engine) = fixture();
        engine
            .register_entity(
                "switch.heater",
                Some(json!({"power_monitoring": true, "rated_power": 1000.0})),
            )
            .unwrap();

        engine
            .handle_service_call("turn_on", Some("switch.heater"), &AttrMap::new())
            .unwrap();
        engine.update_power_monitoring();
        let on_power = store
            .get_state("switch.heater")
            .unwrap()
            .attr_f64("current_power_w")
            .unwrap();
        assert!((900.0..=1100.0).contains(&on_power), "on draw {on_power}");

        engine
            .handle_service_call("turn_off", Some("switch.heater"), &AttrMap::new())
            .unwrap();
        engine.update_power_monitoring();
        let off_power = store
            .get_state("switch.heater")
            .unwrap()
            .attr_f64("current_power_w")
            .unwrap();
        assert!((0.0..=0.5).contains(&off_power), "phantom draw {off_power}");
    }

    #[test]
    fn initial_state_config_is_honored() {
        let (store, engine) = fixture();
        engine
            .register_entity("switch.always", Some(json!({"initial_state": "on"})))
            .unwrap();
        assert_eq!(store.get_state("switch.always").unwrap().state, "on");
    }
}
