//! Climate (thermostat) domain engine.
//!
//! The entity's primary state is its HVAC mode. The 1-minute ambient loop
//! applies thermal drift toward the outdoor temperature, the HVAC effect
//! while out of band, and gaussian noise; when a pure heat or cool mode
//! reaches its target the state transitions to `off` rather than idling
//! in mode.

use crate::engine::{EngineCore, data_f64, data_str, friendly_name, round_to};
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
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;

pub const PRESET_MODES: [&str; 7] = ["none", "away", "eco", "boost", "comfort", "home", "sleep"];
pub const FAN_MODES: [&str; 4] = ["auto", "low", "medium", "high"];

/// Supported-features bits: target temperature, humidity, fan, preset.
const FEATURE_TARGET_TEMP: u64 = 1;
const FEATURE_HUMIDITY: u64 = 4;
const FEATURE_FAN: u64 = 8;
const FEATURE_PRESET: u64 = 16;

/// Per-thermostat configuration. Unrecognized keys are ignored.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClimateConfig {
    pub name: Option<String>,
    pub hvac_modes: Vec<String>,
    pub humidity_control: bool,
}

impl Default for ClimateConfig {
    fn default() -> Self {
        Self {
            name: None,
            hvac_modes: ["off", "heat", "cool", "auto"]
                .into_iter()
                .map(String::from)
                .collect(),
            humidity_control: false,
        }
    }
}

/// Behavior engine for `climate.*` entities.
pub struct ClimateEngine {
    core: EngineCore,
    weather: Arc<WeatherOracle>,
    configs: RwLock<HashMap<String, ClimateConfig>>,
    rng: Mutex<SmallRng>,
}

impl ClimateEngine {
    pub fn new(
        store: Arc<StateStore>,
        clock: Arc<SimulationClock>,
        scheduler: Arc<Scheduler>,
        weather: Arc<WeatherOracle>,
        seed: u64,
    ) -> Arc<Self> {
        Arc::new(Self {
            core: EngineCore::new("climate", store, clock, scheduler),
            weather,
            configs: RwLock::new(HashMap::new()),
            rng: Mutex::new(SmallRng::seed_from_u64(seed)),
        })
    }

    fn gauss(&self, sigma: f64) -> f64 {
        Normal::new(0.0, sigma)
            .expect("valid sigma")
            .sample(&mut *self.rng.lock())
    }

    fn simulate_hvac(&self) {
        let outdoor = self.weather.sample(self.core.clock.now()).temp_c;

        for entity_id in self.core.entity_ids() {
            let Some(state) = self.core.store.get_state(&entity_id) else {
                continue;
            };
            let current = state.attr_f64("current_temperature").unwrap_or(20.0);
            let target = state.attr_f64("temperature").unwrap_or(21.0);
            let mode = state.state.as_str();

            let thermal_drift = (outdoor - current) * 0.05;

            let mut hvac_effect = 0.0;
            let mut next_mode = mode.to_string();
            if matches!(mode, "heat" | "heat_cool" | "auto") {
                if current < target - 0.5 {
                    hvac_effect = 0.3;
                    next_mode = "heat".into();
                } else if mode == "heat" && current >= target {
                    next_mode = "off".into();
                }
            }
            if matches!(mode, "cool" | "heat_cool" | "auto") {
                if current > target + 0.5 {
                    hvac_effect = -0.3;
                    next_mode = "cool".into();
                } else if mode == "cool" && current <= target {
                    next_mode = "off".into();
                }
            }

            let mut delta = AttrMap::new();
            delta.insert(
                "current_temperature".into(),
                json!(round_to(
                    current + thermal_drift + hvac_effect + self.gauss(0.05),
                    1
                )),
            );

            if let Some(humidity) = state.attr_f64("current_humidity") {
                let change = if matches!(mode, "heat" | "cool") {
                    // Running HVAC dries the air.
                    -0.2
                } else {
                    self.gauss(0.1)
                };
                delta.insert(
                    "current_humidity".into(),
                    json!(round_to(humidity + change, 1).clamp(20.0, 80.0)),
                );
            }

            let _ = self.core.update_state(&entity_id, &next_mode, delta);
        }
    }

    fn hvac_modes_of(&self, state: &hearth_kernel::model::EntityState) -> Vec<String> {
        state
            .attr("hvac_modes")
            .and_then(Value::as_array)
            .map(|modes| {
                modes
                    .iter()
                    .filter_map(Value::as_str)
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn set_temperature(&self, entity_id: &str, data: &AttrMap) -> KernelResult<()> {
        let Some(state) = self.core.store.get_state(entity_id) else {
            return Ok(());
        };
        let mut delta = AttrMap::new();

        if let Some(temperature) = data_f64(data, "temperature")? {
            let min = state.attr_f64("min_temp").unwrap_or(10.0);
            let max = state.attr_f64("max_temp").unwrap_or(35.0);
            delta.insert(
                "temperature".into(),
                json!(temperature.clamp(min, max)),
            );
        }

        let mut next_mode = state.state.clone();
        if let Some(mode) = data_str(data, "hvac_mode") {
            if !self.hvac_modes_of(&state).iter().any(|m| m == mode) {
                return Err(KernelError::invalid(format!(
                    "hvac_mode {mode:?} not supported by {entity_id}"
                )));
            }
            next_mode = mode.to_string();
        }

        self.core.update_state(entity_id, &next_mode, delta)?;
        Ok(())
    }

    fn set_hvac_mode(&self, entity_id: &str, data: &AttrMap) -> KernelResult<()> {
        let Some(state) = self.core.store.get_state(entity_id) else {
            return Ok(());
        };
        let Some(mode) = data_str(data, "hvac_mode") else {
            return Err(KernelError::invalid("set_hvac_mode requires hvac_mode"));
        };
        if !self.hvac_modes_of(&state).iter().any(|m| m == mode) {
            return Err(KernelError::invalid(format!(
                "hvac_mode {mode:?} not supported by {entity_id}"
            )));
        }
        self.core.update_state(entity_id, mode, AttrMap::new())?;
        Ok(())
    }

    fn set_preset_mode(&self, entity_id: &str, data: &AttrMap) -> KernelResult<()> {
        let Some(state) = self.core.store.get_state(entity_id) else {
            return Ok(());
        };
        let Some(preset) = data_str(data, "preset_mode") else {
            return Err(KernelError::invalid("set_preset_mode requires preset_mode"));
        };
        if !PRESET_MODES.contains(&preset) {
            return Err(KernelError::invalid(format!(
                "unknown preset_mode {preset:?}"
            )));
        }
        let mut delta = AttrMap::new();
        delta.insert("preset_mode".into(), json!(preset));
        let target = match preset {
            "away" => Some(18.0),
            "eco" | "sleep" => Some(19.0),
            "boost" => Some(24.0),
            "comfort" => Some(21.0),
            _ => None,
        };
        if let Some(target) = target {
            delta.insert("temperature".into(), json!(target));
        }
        self.core.update_state(entity_id, &state.state, delta)?;
        Ok(())
    }

    fn set_fan_mode(&self, entity_id: &str, data: &AttrMap) -> KernelResult<()> {
        let Some(state) = self.core.store.get_state(entity_id) else {
            return Ok(());
        };
        let Some(fan_mode) = data_str(data, "fan_mode") else {
            return Err(KernelError::invalid("set_fan_mode requires fan_mode"));
        };
        if !FAN_MODES.contains(&fan_mode) {
            return Err(KernelError::invalid(format!(
                "unknown fan_mode {fan_mode:?}"
            )));
        }
        let mut delta = AttrMap::new();
        delta.insert("fan_mode".into(), json!(fan_mode));
        self.core.update_state(entity_id, &state.state, delta)?;
        Ok(())
    }

    fn set_humidity(&self, entity_id: &str, data: &AttrMap) -> KernelResult<()> {
        let Some(state) = self.core.store.get_state(entity_id) else {
            return Ok(());
        };
        if state.attr("target_humidity").is_none() {
            return Err(KernelError::invalid(format!(
                "{entity_id} does not support humidity control"
            )));
        }
        let Some(humidity) = data_f64(data, "humidity")? else {
            return Err(KernelError::invalid("set_humidity requires humidity"));
        };
        let mut delta = AttrMap::new();
        delta.insert("target_humidity".into(), json!(humidity.clamp(20.0, 80.0)));
        self.core.update_state(entity_id, &state.state, delta)?;
        Ok(())
    }

    /// First advertised non-off mode, for `turn_on`.
    fn on_mode(&self, state: &hearth_kernel::model::EntityState) -> String {
        self.hvac_modes_of(state)
            .into_iter()
            .find(|m| m != "off")
            .unwrap_or_else(|| "off".into())
    }
}

impl BehaviorEngine for ClimateEngine {
    fn domain(&self) -> &'static str {
        self.core.domain()
    }

    fn register_entity(&self, entity_id: &str, config: Option<Value>) -> KernelResult<()> {
        let config: ClimateConfig = match config {
            Some(value) => serde_json::from_value(value)
                .map_err(|e| KernelError::invalid(format!("climate config: {e}")))?,
            None => ClimateConfig::default(),
        };
        self.core.admit(entity_id)?;
        if self.core.store.get_state(entity_id).is_none() {
            let mut supported = FEATURE_TARGET_TEMP | FEATURE_FAN | FEATURE_PRESET;
            if config.humidity_control {
                supported |= FEATURE_HUMIDITY;
            }
            let mut attrs = AttrMap::new();
            attrs.insert(
                "friendly_name".into(),
                json!(friendly_name(entity_id, config.name.as_deref())),
            );
            attrs.insert("supported_features".into(), json!(supported));
            attrs.insert("hvac_modes".into(), json!(config.hvac_modes));
            attrs.insert("preset_modes".into(), json!(PRESET_MODES));
            attrs.insert("fan_modes".into(), json!(FAN_MODES));
            attrs.insert("current_temperature".into(), json!(20.0));
            attrs.insert("temperature".into(), json!(21.0));
            attrs.insert("min_temp".into(), json!(10.0));
            attrs.insert("max_temp".into(), json!(35.0));
            attrs.insert("temp_step".into(), json!(0.5));
            attrs.insert("preset_mode".into(), json!("none"));
            attrs.insert("fan_mode".into(), json!("auto"));
            if config.humidity_control {
                attrs.insert("current_humidity".into(), json!(50.0));
                attrs.insert("target_humidity".into(), json!(50.0));
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
        let engine = self.clone();
        self.core.scheduler.schedule_interval(
            Duration::minutes(1),
            move || engine.simulate_hvac(),
            Some("climate_hvac"),
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
            "set_temperature" => self.set_temperature(entity_id, data).map(|()| true),
            "set_hvac_mode" => self.set_hvac_mode(entity_id, data).map(|()| true),
            "set_preset_mode" => self.set_preset_mode(entity_id, data).map(|()| true),
            "set_fan_mode" => self.set_fan_mode(entity_id, data).map(|()| true),
            "set_humidity" => self.set_humidity(entity_id, data).map(|()| true),
            "turn_off" => {
                self.core.update_state(entity_id, "off", AttrMap::new())?;
                Ok(true)
            }
            "turn_on" => {
                let Some(state) = self.core.store.get_state(entity_id) else {
                    return Ok(false);
                };
                let mode = self.on_mode(&state);
                self.core.update_state(entity_id, &mode, AttrMap::new())?;
                Ok(true)
            }
            "toggle" => {
                let Some(state) = self.core.store.get_state(entity_id) else {
                    return Ok(false);
                };
                let next = if state.state == "off" {
                    self.on_mode(&state)
                } else {
                    "off".into()
                };
                self.core.update_state(entity_id, &next, AttrMap::new())?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
