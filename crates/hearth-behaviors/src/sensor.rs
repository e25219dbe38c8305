//! Sensor domain engine.
//!
//! Numeric sensors store their reading as a stringified state. Three
//! ambient loops run at different cadences: environmental smoothing every
//! simulated minute, electrical integration every 10 seconds, and the
//! remaining classes every 30 seconds.

use crate::engine::{EngineCore, friendly_name, round_to};
use crate::weather::WeatherOracle;
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
use rand_distr::{Distribution, Normal};
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;

/// Per-sensor configuration. Unrecognized keys are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    pub name: Option<String>,
    pub device_class: String,
    /// Outdoor sensors track the weather oracle instead of indoor targets.
    pub outdoor: bool,
    pub battery_powered: Option<bool>,
    /// Entity whose on/off state drives a power sensor.
    pub linked_entity: Option<String>,
    pub rated_power: Option<f64>,
    /// Power sensor integrated by an energy sensor or divided by a
    /// current sensor.
    pub power_sensor: Option<String>,
}

fn unit_for(device_class: &str) -> Option<&'static str> {
    Some(match device_class {
        "temperature" => "°C",
        "humidity" => "%",
        "pressure" => "hPa",
        "battery" => "%",
        "power" => "W",
        "energy" => "kWh",
        "voltage" => "V",
        "current" => "A",
        "illuminance" => "lx",
        "pm25" => "µg/m³",
        "co2" => "ppm",
        _ => return None,
    })
}

fn initial_value(device_class: &str) -> f64 {
    match device_class {
        "temperature" => 20.0,
        "humidity" => 50.0,
        "pressure" => 1013.0,
        "battery" => 100.0,
        "voltage" => 120.0,
        "pm25" => 5.0,
        "co2" => 400.0,
        _ => 0.0,
    }
}

fn state_class(device_class: &str) -> Option<&'static str> {
    match device_class {
        "energy" => Some("total_increasing"),
        "power" | "voltage" | "current" | "temperature" | "humidity" | "pressure" => {
            Some("measurement")
        }
        _ => None,
    }
}

/// Behavior engine for `sensor.*` entities.
pub struct SensorEngine {
    core: EngineCore,
    weather: Arc<WeatherOracle>,
    configs: RwLock<HashMap<String, SensorConfig>>,
    rng: Mutex<SmallRng>,
}

impl SensorEngine {
    pub fn new(
        store: Arc<StateStore>,
        clock: Arc<SimulationClock>,
        scheduler: Arc<Scheduler>,
        weather: Arc<WeatherOracle>,
        seed: u64,
    ) -> Arc<Self> {
        Arc::new(Self {
            core: EngineCore::new("sensor", store, clock, scheduler),
            weather,
            configs: RwLock::new(HashMap::new()),
            rng: Mutex::new(SmallRng::seed_from_u64(seed)),
        })
    }

    fn gauss(&self, sigma: f64) -> f64 {
        let normal = Normal::new(0.0, sigma).expect("valid sigma");
        normal.sample(&mut *self.rng.lock())
    }

    /// Exponential smoothing toward a weather- or indoor-driven target.
    fn update_environmental(&self) {
        let now = self.core.clock.now();
        for entity_id in self.core.entity_ids() {
            let config = match self.configs.read().get(&entity_id) {
                Some(c) => c.clone(),
                None => continue,
            };
            if !matches!(
                config.device_class.as_str(),
                "temperature" | "humidity" | "pressure"
            ) {
                continue;
            }
            let Some(state) = self.core.store.get_state(&entity_id) else {
                continue;
            };
            let current = state.state_f64().unwrap_or(20.0);

            let next = match config.device_class.as_str() {
                "temperature" => {
                    let target = if config.outdoor {
                        self.weather.sample(now).temp_c
                    } else {
                        21.0 + self.gauss(0.5)
                    };
                    round_to(current + (target - current) * 0.1 + self.gauss(0.1), 1)
                }
                "humidity" => {
                    let target = if config.outdoor {
                        self.weather.sample(now).rel_humidity * 100.0
                    } else {
                        45.0 + self.gauss(5.0)
                    };
                    round_to(current + (target - current) * 0.1 + self.gauss(1.0), 1)
                        .clamp(0.0, 100.0)
                }
                "pressure" => round_to(current + self.gauss(0.5), 1).clamp(950.0, 1050.0),
                _ => continue,
            };

            let _ = self
                .core
                .update_state(&entity_id, &next.to_string(), AttrMap::new());
        }
    }

    /// Power draw, energy integration, and derived voltage/current.
    fn update_electrical(&self) {
        for entity_id in self.core.entity_ids() {
            let config = match self.configs.read().get(&entity_id) {
                Some(c) => c.clone(),
                None => continue,
            };
            if !matches!(
                config.device_class.as_str(),
                "power" | "energy" | "voltage" | "current"
            ) {
                continue;
            }
            let Some(state) = self.core.store.get_state(&entity_id) else {
                continue;
            };
            let current = state.state_f64().unwrap_or(0.0);

            let linked_power = |sensor: &Option<String>| -> Option<f64> {
                sensor
                    .as_ref()
                    .and_then(|id| self.core.store.get_state(id))
                    .and_then(|s| s.state_f64())
            };

            let next = match config.device_class.as_str() {
                "power" => {
                    let watts = match &config.linked_entity {
                        Some(linked) => {
                            let on = self
                                .core
                                .store
                                .get_state(linked)
                                .is_some_and(|s| s.state == "on");
                            let mut rng = self.rng.lock();
                            if on {
                                config.rated_power.unwrap_or(10.0) * rng.gen_range(0.9..1.1)
                            } else {
                                rng.gen_range(0.0..0.5)
                            }
                        }
                        None => (current + self.gauss(5.0)).max(0.0),
                    };
                    round_to(watts, 1)
                }
                "energy" => {
                    // kWh integrated from the linked power sensor over a
                    // 10-second tick: P[W] / (3600 * 100).
                    let add = linked_power(&config.power_sensor).unwrap_or(0.0) / 360_000.0;
                    round_to(current + add, 3)
                }
                "voltage" => round_to(120.0 + self.gauss(0.5), 1),
                "current" => match linked_power(&config.power_sensor) {
                    Some(power) => round_to(power / 120.0, 2),
                    None => round_to(self.rng.lock().gen_range(0.0..1.0), 2),
                },
                _ => continue,
            };

            let _ = self
                .core
                .update_state(&entity_id, &next.to_string(), AttrMap::new());
        }
    }

    /// Illuminance, particulates, and CO₂.
    fn update_misc(&self) {
        let hour = self.core.sim_hour();
        for entity_id in self.core.entity_ids() {
            let device_class = match self.configs.read().get(&entity_id) {
                Some(c) => c.device_class.clone(),
                None => continue,
            };
            if !matches!(device_class.as_str(), "illuminance" | "pm25" | "co2") {
                continue;
            }
            let Some(state) = self.core.store.get_state(&entity_id) else {
                continue;
            };
            let current = state.state_f64().unwrap_or(0.0);

            let next = match device_class.as_str() {
                "illuminance" => {
                    let target = match hour {
                        6..=7 => 500.0,
                        8..=17 => 1000.0,
                        18..=20 => 300.0,
                        _ => 10.0,
                    };
                    (current + (target - current) * 0.2 + self.gauss(50.0))
                        .max(0.0)
                        .round()
                }
                "pm25" => round_to((5.0 + self.gauss(2.0)).max(0.0), 1),
                "co2" => (current + self.gauss(20.0)).clamp(400.0, 2000.0).round(),
                _ => continue,
            };

            let _ = self
                .core
                .update_state(&entity_id, &next.to_string(), AttrMap::new());
        }
    }
}

impl BehaviorEngine for SensorEngine {
    fn domain(&self) -> &'static str {
        self.core.domain()
    }

    fn register_entity(&self, entity_id: &str, config: Option<Value>) -> KernelResult<()> {
        let config: SensorConfig = match config {
            Some(value) => serde_json::from_value(value)
                .map_err(|e| KernelError::invalid(format!("sensor config: {e}")))?,
            None => SensorConfig::default(),
        };
        self.core.admit(entity_id)?;
        if self.core.store.get_state(entity_id).is_none() {
            let mut attrs = AttrMap::new();
            attrs.insert(
                "friendly_name".into(),
                json!(friendly_name(entity_id, config.name.as_deref())),
            );
            if !config.device_class.is_empty() {
                attrs.insert("device_class".into(), json!(config.device_class));
            }
            if let Some(unit) = unit_for(&config.device_class) {
                attrs.insert("unit_of_measurement".into(), json!(unit));
            }
            if let Some(class) = state_class(&config.device_class) {
                attrs.insert("state_class".into(), json!(class));
            }
            let battery_powered = config
                .battery_powered
                .unwrap_or(config.device_class == "battery");
            if battery_powered {
                let level = self.rng.lock().gen_range(80..=100u64);
                attrs.insert("battery_level".into(), json!(level));
            }
            let initial = initial_value(&config.device_class);
            self.core
                .store
                .set_state(entity_id, &initial.to_string(), attrs)?;
        }
        self.configs.write().insert(entity_id.to_string(), config);
        Ok(())
    }

    fn start(self: Arc<Self>) {
        if !self.core.begin_start() {
            return;
        }
        let environmental = self.clone();
        self.core.scheduler.schedule_interval(
            Duration::minutes(1),
            move || environmental.update_environmental(),
            Some("sensor_environmental"),
            false,
        );
        let electrical = self.clone();
        self.core.scheduler.schedule_interval(
            Duration::seconds(10),
            move || electrical.update_electrical(),
            Some("sensor_electrical"),
            false,
        );
        let misc = self.clone();
        self.core.scheduler.schedule_interval(
            Duration::seconds(30),
            move || misc.update_misc(),
            Some("sensor_misc"),
            false,
        );
    }

    fn handle_service_call(
        &self,
        _service: &str,
        _entity_id: Option<&str>,
        _data: &AttrMap,
    ) -> KernelResult<bool> {
        // Sensors are read-only from the service surface.
        Ok(false)
    }
}
