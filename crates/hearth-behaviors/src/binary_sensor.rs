//! Binary sensor domain engine.
//!
//! Read-only from the service surface apart from a `test` service for
//! manual triggering. Motion sensors follow a time-of-day activity model
//! unless an occupancy simulator claims their area via
//! [`BinarySensorEngine::set_occupancy`].

use crate::engine::{EngineCore, data_str, friendly_name, round_to};
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

/// Per-sensor configuration. Unrecognized keys are ignored.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BinarySensorConfig {
    pub name: Option<String>,
    /// `motion`, `door`, `window`, `opening`, …
    pub device_class: String,
    pub battery_powered: bool,
    /// Home area, used by the occupancy simulator to drive this sensor.
    pub area: Option<String>,
}

impl Default for BinarySensorConfig {
    fn default() -> Self {
        Self {
            name: None,
            device_class: "motion".into(),
            battery_powered: true,
            area: None,
        }
    }
}

/// Behavior engine for `binary_sensor.*` entities.
pub struct BinarySensorEngine {
    core: EngineCore,
    configs: RwLock<HashMap<String, BinarySensorConfig>>,
    /// Areas whose motion sensors are driven externally.
    occupancy: RwLock<HashMap<String, bool>>,
    rng: Mutex<SmallRng>,
}

impl BinarySensorEngine {
    pub fn new(
        store: Arc<StateStore>,
        clock: Arc<SimulationClock>,
        scheduler: Arc<Scheduler>,
        seed: u64,
    ) -> Arc<Self> {
        Arc::new(Self {
            core: EngineCore::new("binary_sensor", store, clock, scheduler),
            configs: RwLock::new(HashMap::new()),
            occupancy: RwLock::new(HashMap::new()),
            rng: Mutex::new(SmallRng::seed_from_u64(seed)),
        })
    }

    /// Claim an area: its motion sensors now follow `occupied` instead of
    /// the random activity model.
    pub fn set_occupancy(&self, area: &str, occupied: bool) {
        self.occupancy.write().insert(area.to_string(), occupied);
        let next = if occupied { "on" } else { "off" };
        for entity_id in self.core.entity_ids() {
            let matches = self.configs.read().get(&entity_id).is_some_and(|c| {
                c.device_class == "motion" && c.area.as_deref() == Some(area)
            });
            if matches && self.core.store.get_state(&entity_id).is_some() {
                let _ = self.core.update_state(&entity_id, next, AttrMap::new());
            }
        }
    }

    fn simulate_motion(&self) {
        let activity = match self.core.sim_hour() {
            6..=8 => 0.5,
            9..=11 => 0.3,
            12 => 0.4,
            13..=16 => 0.2,
            17..=20 => 0.6,
            21..=22 => 0.4,
            _ => 0.05,
        };

        for entity_id in self.core.entity_ids() {
            let externally_driven = {
                let configs = self.configs.read();
                let Some(config) = configs.get(&entity_id) else {
                    continue;
                };
                if config.device_class != "motion" {
                    continue;
                }
                config
                    .area
                    .as_ref()
                    .is_some_and(|area| self.occupancy.read().contains_key(area))
            };
            if externally_driven {
                continue;
            }

            let Some(state) = self.core.store.get_state(&entity_id) else {
                continue;
            };
            let roll = self.rng.lock().gen_range(0.0..1.0);
            if state.state == "off" {
                if roll < activity * 0.2 {
                    let _ = self.core.update_state(&entity_id, "on", AttrMap::new());
                }
            } else if roll < 0.3 {
                // Motion self-clears after a while.
                let _ = self.core.update_state(&entity_id, "off", AttrMap::new());
            }
        }
    }

    fn simulate_door_window(&self) {
        for entity_id in self.core.entity_ids() {
            let change_prob = {
                let configs = self.configs.read();
                let Some(config) = configs.get(&entity_id) else {
                    continue;
                };
                match config.device_class.as_str() {
                    "door" => 0.05,
                    "window" | "opening" => 0.01,
                    _ => continue,
                }
            };
            let Some(state) = self.core.store.get_state(&entity_id) else {
                continue;
            };
            if self.rng.lock().gen_range(0.0..1.0) < change_prob {
                let next = if state.state == "on" { "off" } else { "on" };
                let _ = self.core.update_state(&entity_id, next, AttrMap::new());
            }
        }
    }

    fn update_battery(&self) {
        for entity_id in self.core.entity_ids() {
            let Some(state) = self.core.store.get_state(&entity_id) else {
                continue;
            };
            let Some(level) = state.attr_f64("battery_level") else {
                continue;
            };
            let drain = self.rng.lock().gen_range(0.0..0.2);
            let mut delta = AttrMap::new();
            delta.insert(
                "battery_level".into(),
                json!(round_to((level - drain).max(0.0), 1)),
            );
            let _ = self.core.update_state(&entity_id, &state.state, delta);
        }
    }
}

impl BehaviorEngine for BinarySensorEngine {
    fn domain(&self) -> &'static str {
        self.core.domain()
    }

    fn register_entity(&self, entity_id: &str, config: Option<Value>) -> KernelResult<()> {
        let config: BinarySensorConfig = match config {
            Some(value) => serde_json::from_value(value)
                .map_err(|e| KernelError::invalid(format!("binary_sensor config: {e}")))?,
            None => BinarySensorConfig::default(),
        };
        self.core.admit(entity_id)?;
        if self.core.store.get_state(entity_id).is_none() {
            let mut attrs = AttrMap::new();
            attrs.insert(
                "friendly_name".into(),
                json!(friendly_name(entity_id, config.name.as_deref())),
            );
            attrs.insert("device_class".into(), json!(config.device_class));
            if let Some(area) = &config.area {
                attrs.insert("area".into(), json!(area));
            }
            if config.battery_powered {
                let level = self.rng.lock().gen_range(80..=100u64);
                attrs.insert("battery_level".into(), json!(level));
            }
            self.core.store.set_state(entity_id, "off", attrs)?;
        }
        self.configs.write().insert(entity_id.to_string(), config);
        Ok(())
    }

    fn start(self: Arc<Self>) {
        if !self.core.begin_start() {
            return;
        }
        let motion = self.clone();
        self.core.scheduler.schedule_interval(
            Duration::seconds(30),
            move || motion.simulate_motion(),
            Some("binary_sensor_motion"),
            false,
        );
        let doors = self.clone();
        self.core.scheduler.schedule_interval(
            Duration::minutes(10),
            move || doors.simulate_door_window(),
            Some("binary_sensor_door_window"),
            false,
        );
        let battery = self.clone();
        self.core.scheduler.schedule_interval(
            Duration::hours(1),
            move || battery.update_battery(),
            Some("binary_sensor_battery"),
            false,
        );
    }

    fn handle_service_call(
        &self,
        service: &str,
        entity_id: Option<&str>,
        data: &AttrMap,
    ) -> KernelResult<bool> {
        let Some(entity_id) = entity_id else {
            return Ok(false);
        };
        if !self.core.owns(entity_id) {
            return Ok(false);
        }
        match service {
            // Manual trigger for debugging and test harnesses.
            "test" => {
                let next = data_str(data, "state").unwrap_or("on");
                self.core.update_state(entity_id, next, AttrMap::new())?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_kernel::metrics::KernelMetrics;

    fn fixture() -> (Arc<StateStore>, Arc<BinarySensorEngine>) {
        let clock = Arc::new(SimulationClock::realtime());
        let metrics = Arc::new(KernelMetrics::new());
        let store = Arc::new(StateStore::new(clock.clone(), metrics.clone()));
        let scheduler = Arc::new(Scheduler::new(clock.clone(), metrics));
        let engine = BinarySensorEngine::new(store.clone(), clock, scheduler, 3);
        (store, engine)
    }

    #[test]
    fn battery_powered_sensor_starts_charged() {
        let (store, engine) = fixture();
        engine.register_entity("binary_sensor.hall", None).unwrap();
        let level = store
            .get_state("binary_sensor.hall")
            .unwrap()
            .attr_f64("battery_level")
            .unwrap();
        assert!((80.0..=100.0).contains(&level));
    }

    #[test]
    fn battery_drains_and_clamps_at_zero() {
        let (store, engine) = fixture();
        engine.register_entity("binary_sensor.hall", None).unwrap();
        for _ in 0..2000 {
            engine.update_battery();
        }
        let level = store
            .get_state("binary_sensor.hall")
            .unwrap()
            .attr_f64("battery_level")
            .unwrap();
        assert!(level >= 0.0);
    }

    #[test]
    fn occupancy_claims_override_random_motion() {
        let (store, engine) = fixture();
        engine
            .register_entity(
                "binary_sensor.kitchen_motion",
                Some(json!({"device_class": "motion", "area": "kitchen"})),
            )
            .unwrap();

        engine.set_occupancy("kitchen", true);
        assert_eq!(
            store.get_state("binary_sensor.kitchen_motion").unwrap().state,
            "on"
        );

        // While claimed, the random model leaves the sensor alone.
        for _ in 0..50 {
            engine.simulate_motion();
        }
        assert_eq!(
            store.get_state("binary_sensor.kitchen_motion").unwrap().state,
            "on"
        );

        engine.set_occupancy("kitchen", false);
        assert_eq!(
            store.get_state("binary_sensor.kitchen_motion").unwrap().state,
            "off"
        );
    }

    #[test]
    fn test_service_triggers_manually() {
        let (store, engine) = fixture();
        engine.register_entity("binary_sensor.door", None).unwrap();

        let mut data = AttrMap::new();
        data.insert("state".into(), json!("on"));
        assert!(
            engine
                .handle_service_call("test", Some("binary_sensor.door"), &data)
                .unwrap()
        );
        assert_eq!(store.get_state("binary_sensor.door").unwrap().state, "on");
    }

    #[test]
    fn motion_eventually_triggers_and_clears() {
        let (store, engine) = fixture();
        engine
            .register_entity("binary_sensor.landing", Some(json!({"device_class": "motion"})))
            .unwrap();

        let mut saw_on = false;
        let mut saw_off_after_on = false;
        for _ in 0..500 {
            engine.simulate_motion();
            let state = store.get_state("binary_sensor.landing").unwrap();
            if state.state == "on" {
                saw_on = true;
            } else if saw_on {
                saw_off_after_on = true;
                break;
            }
        }
        assert!(saw_on, "motion never triggered in 500 ticks");
        assert!(saw_off_after_on, "motion never self-cleared");
    }
}
