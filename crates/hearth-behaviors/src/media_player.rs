//! Media player domain engine.

use crate::engine::{EngineCore, data_bool, data_f64, data_str, friendly_name};
use hearth_kernel::clock::SimulationClock;
use hearth_kernel::engine::BehaviorEngine;
use hearth_kernel::error::{KernelError, KernelResult};
use hearth_kernel::model::AttrMap;
use hearth_kernel::scheduler::Scheduler;
use hearth_kernel::store::StateStore;
use chrono::Duration;
use parking_lot::{Mutex, RwLock};
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;

const MEDIA_TYPES: [&str; 5] = ["music", "tvshow", "movie", "video", "podcast"];
const SOURCES: [&str; 7] = [
    "Spotify", "YouTube", "Netflix", "Plex", "Apple TV", "HDMI 1", "HDMI 2",
];
/// HA media player feature bitmask the simulator advertises.
const SUPPORTED_FEATURES: u64 = 149_563;
/// Simulated seconds of playback per ambient tick (10 minutes).
const TICK_PLAYBACK_SECS: u64 = 600;

/// Per-player configuration. Unrecognized keys are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MediaPlayerConfig {
    pub name: Option<String>,
}

/// Behavior engine for `media_player.*` entities.
pub struct MediaPlayerEngine {
    core: EngineCore,
    configs: RwLock<HashMap<String, MediaPlayerConfig>>,
    rng: Mutex<SmallRng>,
}

impl MediaPlayerEngine {
    pub fn new(
        store: Arc<StateStore>,
        clock: Arc<SimulationClock>,
        scheduler: Arc<Scheduler>,
        seed: u64,
    ) -> Arc<Self> {
        Arc::new(Self {
            core: EngineCore::new("media_player", store, clock, scheduler),
            configs: RwLock::new(HashMap::new()),
            rng: Mutex::new(SmallRng::seed_from_u64(seed)),
        })
    }

    fn simulate_usage(&self) {
        let usage = match self.core.sim_hour() {
            6..=8 => 0.2,
            12..=13 => 0.15,
            17..=22 => 0.6,
            _ => 0.05,
        };

        for entity_id in self.core.entity_ids() {
            let Some(state) = self.core.store.get_state(&entity_id) else {
                continue;
            };

            match state.state.as_str() {
                "off" => {
                    let (start, media_type, source, duration) = {
                        let mut rng = self.rng.lock();
                        (
                            rng.gen_range(0.0..1.0) < usage * 0.05,
                            *MEDIA_TYPES.choose(&mut *rng).expect("non-empty"),
                            *SOURCES.choose(&mut *rng).expect("non-empty"),
                            rng.gen_range(180..=7200u64),
                        )
                    };
                    if !start {
                        continue;
                    }
                    let mut delta = AttrMap::new();
                    delta.insert("media_content_type".into(), json!(media_type));
                    delta.insert(
                        "media_title".into(),
                        json!(format!("Sample {}", capitalize(media_type))),
                    );
                    delta.insert("media_artist".into(), json!("Unknown Artist"));
                    delta.insert("media_duration".into(), json!(duration));
                    delta.insert("media_position".into(), json!(0));
                    delta.insert("source".into(), json!(source));
                    let _ = self.core.update_state(&entity_id, "playing", delta);
                }
                "playing" => {
                    let position = state.attr_f64("media_position").unwrap_or(0.0) as u64
                        + TICK_PLAYBACK_SECS;
                    let duration = state.attr_f64("media_duration").unwrap_or(300.0) as u64;

                    if position >= duration {
                        let _ = self.core.update_state(&entity_id, "idle", AttrMap::new());
                        continue;
                    }
                    let mut delta = AttrMap::new();
                    delta.insert("media_position".into(), json!(position));
                    let _ = self.core.update_state(&entity_id, "playing", delta);

                    let (pause, off) = {
                        let mut rng = self.rng.lock();
                        (rng.gen_range(0.0..1.0) < 0.1, rng.gen_range(0.0..1.0) < 0.05)
                    };
                    if pause {
                        let _ = self.core.update_state(&entity_id, "paused", AttrMap::new());
                    } else if off {
                        let _ = self.core.update_state(&entity_id, "off", AttrMap::new());
                    }
                }
                _ => {}
            }
        }
    }

    fn set(&self, entity_id: &str, next: &str) -> KernelResult<()> {
        if self.core.store.get_state(entity_id).is_some() {
            self.core.update_state(entity_id, next, AttrMap::new())?;
        }
        Ok(())
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

impl BehaviorEngine for MediaPlayerEngine {
    fn domain(&self) -> &'static str {
        self.core.domain()
    }

    fn register_entity(&self, entity_id: &str, config: Option<Value>) -> KernelResult<()> {
        let config: MediaPlayerConfig = match config {
            Some(value) => serde_json::from_value(value)
                .map_err(|e| KernelError::invalid(format!("media_player config: {e}")))?,
            None => MediaPlayerConfig::default(),
        };
        self.core.admit(entity_id)?;
        if self.core.store.get_state(entity_id).is_none() {
            let mut attrs = AttrMap::new();
            attrs.insert(
                "friendly_name".into(),
                json!(friendly_name(entity_id, config.name.as_deref())),
            );
            attrs.insert("supported_features".into(), json!(SUPPORTED_FEATURES));
            attrs.insert("volume_level".into(), json!(0.3));
            attrs.insert("is_volume_muted".into(), json!(false));
            attrs.insert("source_list".into(), json!(SOURCES));
            attrs.insert("source".into(), json!(SOURCES[0]));
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
            Duration::minutes(10),
            move || engine.simulate_usage(),
            Some("media_player_usage"),
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
            "turn_on" => self.set(entity_id, "idle").map(|()| true),
            "turn_off" => self.set(entity_id, "off").map(|()| true),
            "toggle" => {
                let next = match self.core.store.get_state(entity_id) {
                    Some(state) if matches!(state.state.as_str(), "playing" | "paused" | "idle") => {
                        "off"
                    }
                    _ => "idle",
                };
                self.set(entity_id, next).map(|()| true)
            }
            "media_play" => self.set(entity_id, "playing").map(|()| true),
            "media_pause" => self.set(entity_id, "paused").map(|()| true),
            "media_stop" => self.set(entity_id, "idle").map(|()| true),
            "volume_set" => {
                let Some(level) = data_f64(data, "volume_level")? else {
                    return Err(KernelError::invalid("volume_set requires volume_level"));
                };
                let mut delta = AttrMap::new();
                delta.insert("volume_level".into(), json!(level.clamp(0.0, 1.0)));
                let state = self
                    .core
                    .store
                    .get_state(entity_id)
                    .map(|s| s.state.clone())
                    .unwrap_or_else(|| "off".into());
                self.core.update_state(entity_id, &state, delta)?;
                Ok(true)
            }
            "volume_mute" => {
                let Some(muted) = data_bool(data, "is_volume_muted")? else {
                    return Err(KernelError::invalid(
                        "volume_mute requires is_volume_muted",
                    ));
                };
                let mut delta = AttrMap::new();
                delta.insert("is_volume_muted".into(), json!(muted));
                let state = self
                    .core
                    .store
                    .get_state(entity_id)
                    .map(|s| s.state.clone())
                    .unwrap_or_else(|| "off".into());
                self.core.update_state(entity_id, &state, delta)?;
                Ok(true)
            }
            "select_source" => {
                let Some(source) = data_str(data, "source") else {
                    return Err(KernelError::invalid("select_source requires source"));
                };
                let Some(state) = self.core.store.get_state(entity_id) else {
                    return Ok(false);
                };
                let listed = state
                    .attr("source_list")
                    .and_then(Value::as_array)
                    .is_some_and(|l| l.iter().any(|s| s.as_str() == Some(source)));
                if !listed {
                    return Err(KernelError::invalid(format!(
                        "source {source:?} not in source_list"
                    )));
                }
                let mut delta = AttrMap::new();
                delta.insert("source".into(), json!(source));
                self.core.update_state(entity_id, &state.state, delta)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
