//! Cover domain engine (blinds, shades, garage doors).
//!
//! State derives from position: 0 is `closed`, 100 is `open`, anything in
//! between is `opening` or `closing` depending on travel direction.

use crate::engine::{EngineCore, data_f64, friendly_name};
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

/// open | close | stop | position.
const SUPPORTED_BASE: u64 = 15;
const SUPPORTED_TILT: u64 = 128;

/// Per-cover configuration. Unrecognized keys are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CoverConfig {
    pub name: Option<String>,
    /// `blind`, `shade`, `garage`, `door`, `window`, …
    pub device_class: Option<String>,
    /// Defaults to true for blinds.
    pub tilt_support: Option<bool>,
    /// Excluded from the ambient schedule.
    pub manual_only: bool,
}

/// Behavior engine for `cover.*` entities.
pub struct CoverEngine {
    core: EngineCore,
    configs: RwLock<HashMap<String, CoverConfig>>,
    rng: Mutex<SmallRng>,
}

impl CoverEngine {
    pub fn new(
        store: Arc<StateStore>,
        clock: Arc<SimulationClock>,
        scheduler: Arc<Scheduler>,
        seed: u64,
    ) -> Arc<Self> {
        Arc::new(Self {
            core: EngineCore::new("cover", store, clock, scheduler),
            configs: RwLock::new(HashMap::new()),
            rng: Mutex::new(SmallRng::seed_from_u64(seed)),
        })
    }

    /// Morning-open / evening-close for blinds and shades; garage doors
    /// toggle around commute hours.
    fn simulate_automatic_control(&self) {
        let hour = self.core.sim_hour();
        for entity_id in self.core.entity_ids() {
            if self
                .configs
                .read()
                .get(&entity_id)
                .is_some_and(|c| c.manual_only)
            {
                continue;
            }
            let Some(state) = self.core.store.get_state(&entity_id) else {
                continue;
            };
            let device_class = state
                .attr("device_class")
                .and_then(Value::as_str)
                .unwrap_or("blind")
                .to_string();
            let roll = self.rng.lock().gen_range(0.0..1.0);

            match device_class.as_str() {
                "blind" | "shade" => {
                    if (6..8).contains(&hour) && roll < 0.3 {
                        let _ = self.set_position(&entity_id, 100.0);
                    } else if (17..19).contains(&hour) && roll < 0.3 {
                        let _ = self.set_position(&entity_id, 0.0);
                    }
                }
                "garage" => {
                    if matches!(hour, 8 | 9 | 17 | 18) && roll < 0.1 {
                        let position = state.attr_f64("current_position").unwrap_or(0.0);
                        let next = if position == 0.0 { 100.0 } else { 0.0 };
                        let _ = self.set_position(&entity_id, next);
                    }
                }
                _ => {}
            }
        }
    }

    fn set_position(&self, entity_id: &str, position: f64) -> KernelResult<()> {
        let Some(state) = self.core.store.get_state(entity_id) else {
            return Ok(());
        };
        let position = position.clamp(0.0, 100.0) as u64;
        let prior = state.attr_f64("current_position").unwrap_or(0.0) as u64;

        let next_state = if position == 0 {
            "closed"
        } else if position == 100 {
            "open"
        } else if position > prior {
            "opening"
        } else {
            "closing"
        };

        let mut delta = AttrMap::new();
        delta.insert("current_position".into(), json!(position));
        self.core.update_state(entity_id, next_state, delta)?;
        Ok(())
    }

    fn stop(&self, entity_id: &str) -> KernelResult<()> {
        if let Some(state) = self.core.store.get_state(entity_id) {
            if matches!(state.state.as_str(), "opening" | "closing") {
                // Mid-travel stop settles as open at the current position.
                self.core.update_state(entity_id, "open", AttrMap::new())?;
            }
        }
        Ok(())
    }

    fn set_tilt(&self, entity_id: &str, data: &AttrMap) -> KernelResult<bool> {
        let Some(state) = self.core.store.get_state(entity_id) else {
            return Ok(false);
        };
        if state.attr("current_tilt_position").is_none() {
            return Ok(false);
        }
        let Some(tilt) = data_f64(data, "tilt_position")? else {
            return Err(KernelError::invalid(
                "set_cover_tilt_position requires tilt_position",
            ));
        };
        let mut delta = AttrMap::new();
        delta.insert(
            "current_tilt_position".into(),
            json!(tilt.clamp(0.0, 100.0) as u64),
        );
        self.core.update_state(entity_id, &state.state, delta)?;
        Ok(true)
    }
}

impl BehaviorEngine for CoverEngine {
    fn domain(&self) -> &'static str {
        self.core.domain()
    }

    fn register_entity(&self, entity_id: &str, config: Option<Value>) -> KernelResult<()> {
        let config: CoverConfig = match config {
            Some(value) => serde_json::from_value(value)
                .map_err(|e| KernelError::invalid(format!("cover config: {e}")))?,
            None => CoverConfig::default(),
        };
        self.core.admit(entity_id)?;
        if self.core.store.get_state(entity_id).is_none() {
            let device_class = config.device_class.clone().unwrap_or_else(|| "blind".into());
            let tilt = config.tilt_support.unwrap_or(device_class == "blind");

            let mut supported = SUPPORTED_BASE;
            let mut attrs = AttrMap::new();
            attrs.insert(
                "friendly_name".into(),
                json!(friendly_name(entity_id, config.name.as_deref())),
            );
            attrs.insert("device_class".into(), json!(device_class));
            attrs.insert("current_position".into(), json!(0));
            if tilt {
                supported |= SUPPORTED_TILT;
                attrs.insert("current_tilt_position".into(), json!(0));
            }
            attrs.insert("supported_features".into(), json!(supported));
            self.core.store.set_state(entity_id, "closed", attrs)?;
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
            Duration::minutes(30),
            move || engine.simulate_automatic_control(),
            Some("cover_auto"),
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
            "open_cover" | "turn_on" => self.set_position(entity_id, 100.0).map(|()| true),
            "close_cover" | "turn_off" => self.set_position(entity_id, 0.0).map(|()| true),
            "stop_cover" => self.stop(entity_id).map(|()| true),
            "toggle" => {
                let closed = self
                    .core
                    .store
                    .get_state(entity_id)
                    .is_some_and(|s| s.state == "closed");
                let target = if closed { 100.0 } else { 0.0 };
                self.set_position(entity_id, target).map(|()| true)
            }
            "set_cover_position" => {
                let Some(position) = data_f64(data, "position")? else {
                    return Err(KernelError::invalid(
                        "set_cover_position requires position",
                    ));
                };
                self.set_position(entity_id, position).map(|()| true)
            }
            "set_cover_tilt_position" => self.set_tilt(entity_id, data),
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_kernel::metrics::KernelMetrics;

    fn fixture() -> (Arc<StateStore>, Arc<CoverEngine>) {
        let clock = Arc::new(SimulationClock::realtime());
        let metrics = Arc::new(KernelMetrics::new());
        let store = Arc::new(StateStore::new(clock.clone(), metrics.clone()));
        let scheduler = Arc::new(Scheduler::new(clock.clone(), metrics));
        let engine = CoverEngine::new(store.clone(), clock, scheduler, 31);
        (store, engine)
    }

    fn call(engine: &CoverEngine, service: &str, id: &str, data: AttrMap) -> bool {
        engine.handle_service_call(service, Some(id), &data).unwrap()
    }

    #[test]
    fn blinds_default_to_tilt_support() {
        let (store, engine) = fixture();
        engine.register_entity("cover.livingroom", None).unwrap();
        let state = store.get_state("cover.livingroom").unwrap();
        assert_eq!(state.state, "closed");
        assert_eq!(state.attr_f64("supported_features"), Some(143.0));
        assert_eq!(state.attr_f64("current_tilt_position"), Some(0.0));
    }

    #[test]
    fn garage_has_no_tilt() {
        let (store, engine) = fixture();
        engine
            .register_entity("cover.garage", Some(json!({"device_class": "garage"})))
            .unwrap();
        let state = store.get_state("cover.garage").unwrap();
        assert_eq!(state.attr_f64("supported_features"), Some(15.0));
        assert!(state.attr("current_tilt_position").is_none());
    }

    #[test]
    fn position_derives_state() {
        let (store, engine) = fixture();
        engine.register_entity("cover.blind", None).unwrap();

        let mut data = AttrMap::new();
        data.insert("position".into(), json!(40));
        call(&engine, "set_cover_position", "cover.blind", data);
        let state = store.get_state("cover.blind").unwrap();
        assert_eq!(state.state, "opening");
        assert_eq!(state.attr_f64("current_position"), Some(40.0));

        let mut data = AttrMap::new();
        data.insert("position".into(), json!(10));
        call(&engine, "set_cover_position", "cover.blind", data);
        assert_eq!(store.get_state("cover.blind").unwrap().state, "closing");

        let mut data = AttrMap::new();
        data.insert("position".into(), json!(250));
        call(&engine, "set_cover_position", "cover.blind", data);
        let state = store.get_state("cover.blind").unwrap();
        assert_eq!(state.state, "open");
        assert_eq!(state.attr_f64("current_position"), Some(100.0));
    }

    #[test]
    fn stop_settles_a_moving_cover() {
        let (store, engine) = fixture();
        engine.register_entity("cover.blind", None).unwrap();

        let mut data = AttrMap::new();
        data.insert("position".into(), json!(55));
        call(&engine, "set_cover_position", "cover.blind", data);
        call(&engine, "stop_cover", "cover.blind", AttrMap::new());

        let state = store.get_state("cover.blind").unwrap();
        assert_eq!(state.state, "open");
        assert_eq!(state.attr_f64("current_position"), Some(55.0));
    }

    #[test]
    fn open_close_toggle() {
        let (store, engine) = fixture();
        engine.register_entity("cover.blind", None).unwrap();

        call(&engine, "open_cover", "cover.blind", AttrMap::new());
        assert_eq!(store.get_state("cover.blind").unwrap().state, "open");

        call(&engine, "close_cover", "cover.blind", AttrMap::new());
        assert_eq!(store.get_state("cover.blind").unwrap().state, "closed");

        call(&engine, "toggle", "cover.blind", AttrMap::new());
        assert_eq!(store.get_state("cover.blind").unwrap().state, "open");
    }

    #[test]
    fn tilt_requires_support() {
        let (store, engine) = fixture();
        engine
            .register_entity("cover.garage", Some(json!({"device_class": "garage"})))
            .unwrap();
        engine.register_entity("cover.blind", None).unwrap();

        let mut data = AttrMap::new();
        data.insert("tilt_position".into(), json!(70));
        assert!(!call(&engine, "set_cover_tilt_position", "cover.garage", data.clone()));
        assert!(call(&engine, "set_cover_tilt_position", "cover.blind", data));
        assert_eq!(
            store
                .get_state("cover.blind")
                .unwrap()
                .attr_f64("current_tilt_position"),
            Some(70.0)
        );
    }
}
