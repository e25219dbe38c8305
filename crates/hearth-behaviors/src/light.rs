//! Light domain engine.

use crate::engine::{EngineCore, data_f64, data_str, friendly_name};
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

const EFFECT_LIST: [&str; 3] = ["none", "colorloop", "random"];

/// Per-light configuration. Unrecognized keys are ignored.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LightConfig {
    pub name: Option<String>,
    /// Dimmable. On by default; almost every simulated light dims.
    pub brightness: bool,
    pub color_temp: bool,
    pub rgb_color: bool,
    pub effect: bool,
    /// Automated lights are driven by motion links, not the ambient loop.
    pub automated: bool,
}

impl Default for LightConfig {
    fn default() -> Self {
        Self {
            name: None,
            brightness: true,
            color_temp: false,
            rgb_color: false,
            effect: false,
            automated: false,
        }
    }
}

/// Behavior engine for `light.*` entities.
pub struct LightEngine {
    core: EngineCore,
    configs: RwLock<HashMap<String, LightConfig>>,
    /// light id -> motion sensor id driving it.
    motion_links: RwLock<HashMap<String, String>>,
    rng: Mutex<SmallRng>,
}

impl LightEngine {
    pub fn new(
        store: Arc<StateStore>,
        clock: Arc<SimulationClock>,
        scheduler: Arc<Scheduler>,
        seed: u64,
    ) -> Arc<Self> {
        Arc::new(Self {
            core: EngineCore::new("light", store, clock, scheduler),
            configs: RwLock::new(HashMap::new()),
            motion_links: RwLock::new(HashMap::new()),
            rng: Mutex::new(SmallRng::seed_from_u64(seed)),
        })
    }

    /// Drive a light from a motion sensor; the ambient loop skips it from
    /// then on.
    pub fn link_motion_sensor(&self, light_id: &str, motion_sensor_id: &str) -> KernelResult<()> {
        if !self.core.owns(light_id) {
            return Err(KernelError::NotFound(light_id.to_string()));
        }
        self.motion_links
            .write()
            .insert(light_id.to_string(), motion_sensor_id.to_string());
        self.configs
            .write()
            .entry(light_id.to_string())
            .or_default()
            .automated = true;
        Ok(())
    }

    /// Motion sensor driving a light, if one was linked.
    pub fn motion_link(&self, light_id: &str) -> Option<String> {
        self.motion_links.read().get(light_id).cloned()
    }

    fn initial_state(&self, entity_id: &str, config: &LightConfig) -> AttrMap {
        let mut attrs = AttrMap::new();
        attrs.insert(
            "friendly_name".into(),
            json!(friendly_name(entity_id, config.name.as_deref())),
        );
        let mut supported = 0u64;
        if config.brightness {
            attrs.insert("brightness".into(), json!(255));
            supported |= 1;
        }
        if config.color_temp {
            attrs.insert("color_temp".into(), json!(370));
            attrs.insert("min_mireds".into(), json!(153));
            attrs.insert("max_mireds".into(), json!(500));
            supported |= 2;
        }
        if config.effect {
            attrs.insert("effect_list".into(), json!(EFFECT_LIST));
            attrs.insert("effect".into(), json!("none"));
            supported |= 4;
        }
        if config.rgb_color {
            attrs.insert("rgb_color".into(), json!([255, 255, 255]));
            supported |= 16;
        }
        attrs.insert("supported_features".into(), json!(supported));
        attrs
    }

    /// Ambient toggling driven by a time-of-day activity fraction.
    fn simulate_usage(&self) {
        let activity = match self.core.sim_hour() {
            6..=8 => 0.4,
            9..=16 => 0.2,
            17..=22 => 0.6,
            _ => 0.1,
        };

        for entity_id in self.core.entity_ids() {
            if self
                .configs
                .read()
                .get(&entity_id)
                .is_some_and(|c| c.automated)
            {
                continue;
            }
            let Some(state) = self.core.store.get_state(&entity_id) else {
                continue;
            };

            let (toggle, brightness) = {
                let mut rng = self.rng.lock();
                (
                    rng.gen_range(0.0..1.0) < activity * 0.1,
                    rng.gen_range(128..=255u64),
                )
            };
            if !toggle {
                continue;
            }

            let mut delta = AttrMap::new();
            let next = if state.state == "on" { "off" } else { "on" };
            if next == "on" && state.attr("brightness").is_some() {
                delta.insert("brightness".into(), json!(brightness));
            }
            let _ = self.core.update_state(&entity_id, next, delta);
        }
    }

    fn turn_on(&self, entity_id: &str, data: &AttrMap) -> KernelResult<()> {
        let Some(state) = self.core.store.get_state(entity_id) else {
            return Ok(());
        };
        let mut delta = AttrMap::new();

        match data_f64(data, "brightness")? {
            Some(value) => {
                delta.insert("brightness".into(), json!(value.clamp(0.0, 255.0) as u64));
            }
            // No explicit level: dimmable lights come on at full.
            None if state.attr("brightness").is_some() => {
                delta.insert("brightness".into(), json!(255));
            }
            None => {}
        }

        if state.attr("color_temp").is_some() {
            if let Some(mireds) = data_f64(data, "color_temp")? {
                delta.insert(
                    "color_temp".into(),
                    json!(mireds.clamp(153.0, 500.0) as u64),
                );
            }
        }

        if state.attr("rgb_color").is_some() {
            if let Some(rgb) = data.get("rgb_color") {
                let channels: Vec<u64> = rgb
                    .as_array()
                    .filter(|a| a.len() == 3)
                    .map(|a| {
                        a.iter()
                            .filter_map(Value::as_f64)
                            .map(|c| c.clamp(0.0, 255.0) as u64)
                            .collect()
                    })
                    .ok_or_else(|| {
                        KernelError::invalid(format!("rgb_color must be [r, g, b], got {rgb}"))
                    })?;
                if channels.len() != 3 {
                    return Err(KernelError::invalid(format!(
                        "rgb_color must hold three numbers, got {rgb}"
                    )));
                }
                delta.insert("rgb_color".into(), json!(channels));
            }
        }

        if let (Some(effect), Some(list)) = (data_str(data, "effect"), state.attr("effect_list")) {
            let listed = list
                .as_array()
                .is_some_and(|l| l.iter().any(|e| e.as_str() == Some(effect)));
            if listed {
                delta.insert("effect".into(), json!(effect));
            }
        }

        self.core.update_state(entity_id, "on", delta)?;
        Ok(())
    }

    fn turn_off(&self, entity_id: &str) -> KernelResult<()> {
        if self.core.store.get_state(entity_id).is_some() {
            // Prior attributes (brightness included) survive the off state.
            self.core.update_state(entity_id, "off", AttrMap::new())?;
        }
        Ok(())
    }
}

impl BehaviorEngine for LightEngine {
    fn domain(&self) -> &'static str {
        self.core.domain()
    }

    fn register_entity(&self, entity_id: &str, config: Option<Value>) -> KernelResult<()> {
        let config: LightConfig = match config {
            Some(value) => serde_json::from_value(value)
                .map_err(|e| KernelError::invalid(format!("light config: {e}")))?,
            None => LightConfig::default(),
        };
        self.core.admit(entity_id)?;
        if self.core.store.get_state(entity_id).is_none() {
            let attrs = self.initial_state(entity_id, &config);
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
            Duration::minutes(5),
            move || engine.simulate_usage(),
            Some("light_simulate_usage"),
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
            "turn_on" => self.turn_on(entity_id, data).map(|()| true),
            "turn_off" => self.turn_off(entity_id).map(|()| true),
            "toggle" => {
                let on = self
                    .core
                    .store
                    .get_state(entity_id)
                    .is_some_and(|s| s.state == "on");
                if on {
                    self.turn_off(entity_id).map(|()| true)
                } else {
                    self.turn_on(entity_id, data).map(|()| true)
                }
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_kernel::metrics::KernelMetrics;

    fn fixture() -> (Arc<StateStore>, Arc<LightEngine>) {
        let clock = Arc::new(SimulationClock::realtime());
        let metrics = Arc::new(KernelMetrics::new());
        let store = Arc::new(StateStore::new(clock.clone(), metrics.clone()));
        let scheduler = Arc::new(Scheduler::new(clock.clone(), metrics));
        let engine = LightEngine::new(store.clone(), clock, scheduler, 11);
        (store, engine)
    }

    #[test]
    fn registration_writes_initial_state() {
        let (store, engine) = fixture();
        engine
            .register_entity(
                "light.kitchen",
                Some(json!({"color_temp": true, "rgb_color": true})),
            )
            .unwrap();

        let state = store.get_state("light.kitchen").unwrap();
        assert_eq!(state.state, "off");
        assert_eq!(state.attr_f64("brightness"), Some(255.0));
        assert_eq!(state.attr_f64("color_temp"), Some(370.0));
        assert_eq!(state.attr("rgb_color"), Some(&json!([255, 255, 255])));
        assert_eq!(state.attr_f64("supported_features"), Some(19.0));
    }

    #[test]
    fn refuses_foreign_domains() {
        let (_store, engine) = fixture();
        assert!(engine.register_entity("switch.nope", None).is_err());
    }

    #[test]
    fn turn_on_clamps_brightness_and_color_temp() {
        let (store, engine) = fixture();
        engine
            .register_entity("light.desk", Some(json!({"color_temp": true})))
            .unwrap();

        let mut data = AttrMap::new();
        data.insert("brightness".into(), json!(999));
        data.insert("color_temp".into(), json!(100));
        assert!(
            engine
                .handle_service_call("turn_on", Some("light.desk"), &data)
                .unwrap()
        );

        let state = store.get_state("light.desk").unwrap();
        assert_eq!(state.state, "on");
        assert_eq!(state.attr_f64("brightness"), Some(255.0));
        assert_eq!(state.attr_f64("color_temp"), Some(153.0));
    }

    #[test]
    fn turn_off_preserves_brightness() {
        let (store, engine) = fixture();
        engine.register_entity("light.desk", None).unwrap();

        let mut data = AttrMap::new();
        data.insert("brightness".into(), json!(128));
        engine
            .handle_service_call("turn_on", Some("light.desk"), &data)
            .unwrap();
        engine
            .handle_service_call("turn_off", Some("light.desk"), &AttrMap::new())
            .unwrap();

        let state = store.get_state("light.desk").unwrap();
        assert_eq!(state.state, "off");
        assert_eq!(state.attr_f64("brightness"), Some(128.0));
    }

    #[test]
    fn effect_only_accepted_from_the_list() {
        let (store, engine) = fixture();
        engine
            .register_entity("light.strip", Some(json!({"effect": true})))
            .unwrap();

        let mut data = AttrMap::new();
        data.insert("effect".into(), json!("colorloop"));
        engine
            .handle_service_call("turn_on", Some("light.strip"), &data)
            .unwrap();
        assert_eq!(
            store.get_state("light.strip").unwrap().attr("effect"),
            Some(&json!("colorloop"))
        );

        let mut bogus = AttrMap::new();
        bogus.insert("effect".into(), json!("strobe"));
        engine
            .handle_service_call("turn_on", Some("light.strip"), &bogus)
            .unwrap();
        assert_eq!(
            store.get_state("light.strip").unwrap().attr("effect"),
            Some(&json!("colorloop"))
        );
    }

    #[test]
    fn unknown_service_and_unowned_entity_return_false() {
        let (_store, engine) = fixture();
        engine.register_entity("light.a", None).unwrap();
        assert!(
            !engine
                .handle_service_call("warp", Some("light.a"), &AttrMap::new())
                .unwrap()
        );
        assert!(
            !engine
                .handle_service_call("turn_on", Some("light.ghost"), &AttrMap::new())
                .unwrap()
        );
        assert!(
            !engine
                .handle_service_call("turn_on", None, &AttrMap::new())
                .unwrap()
        );
    }

    #[test]
    fn linked_lights_are_marked_automated() {
        let (_store, engine) = fixture();
        engine.register_entity("light.hall", None).unwrap();
        engine
            .link_motion_sensor("light.hall", "binary_sensor.hall_motion")
            .unwrap();
        assert!(engine.configs.read().get("light.hall").unwrap().automated);
        assert_eq!(
            engine.motion_link("light.hall").as_deref(),
            Some("binary_sensor.hall_motion")
        );
        assert!(engine.link_motion_sensor("light.ghost", "binary_sensor.x").is_err());
    }
}
