//! Per-home occupancy simulation.
//!
//! A daily-routine state machine over `{is_home, is_sleeping,
//! active_areas}`, evaluated every 15 simulated minutes. It propagates to
//! the home's motion sensors (on in active areas) and person entities
//! (`home`/`away`) by writing through the store.

use hearth_kernel::clock::SimulationClock;
use hearth_kernel::model::AttrMap;
use hearth_kernel::scheduler::Scheduler;
use hearth_kernel::store::StateStore;
use chrono::{Datelike, Duration, NaiveTime, Timelike};
use parking_lot::Mutex;
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Household options shaping the routine. Unrecognized keys are ignored.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OccupancyOptions {
    pub has_kids: bool,
    /// Probability that a given weekday is worked from home.
    pub wfh_ratio: f64,
}

impl Default for OccupancyOptions {
    fn default() -> Self {
        Self {
            has_kids: false,
            wfh_ratio: 0.3,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct OccupancyState {
    is_home: bool,
    is_sleeping: bool,
    active_areas: Vec<String>,
    vacation: bool,
}

/// Occupancy state machine for one home.
pub struct OccupancySimulator {
    home_id: String,
    store: Arc<StateStore>,
    clock: Arc<SimulationClock>,
    scheduler: Arc<Scheduler>,
    options: OccupancyOptions,
    state: Mutex<OccupancyState>,
    rng: Mutex<SmallRng>,
    started: AtomicBool,
}

impl OccupancySimulator {
    pub fn new(
        home_id: impl Into<String>,
        store: Arc<StateStore>,
        clock: Arc<SimulationClock>,
        scheduler: Arc<Scheduler>,
        options: OccupancyOptions,
        seed: u64,
    ) -> Arc<Self> {
        Arc::new(Self {
            home_id: home_id.into(),
            store,
            clock,
            scheduler,
            options,
            state: Mutex::new(OccupancyState {
                is_home: true,
                ..OccupancyState::default()
            }),
            rng: Mutex::new(SmallRng::seed_from_u64(seed)),
            started: AtomicBool::new(false),
        })
    }

    pub fn home_id(&self) -> &str {
        &self.home_id
    }

    pub fn is_home(&self) -> bool {
        self.state.lock().is_home
    }

    pub fn is_sleeping(&self) -> bool {
        self.state.lock().is_sleeping
    }

    pub fn active_areas(&self) -> Vec<String> {
        self.state.lock().active_areas.clone()
    }

    /// Force everyone away until disabled.
    pub fn set_vacation_mode(&self, enabled: bool) {
        let mut state = self.state.lock();
        state.vacation = enabled;
        if enabled {
            state.is_home = false;
            state.is_sleeping = false;
            state.active_areas.clear();
        } else {
            state.is_home = true;
        }
    }

    pub fn start(self: Arc<Self>) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let task_id = format!("occupancy_{}", self.home_id);
        let scheduler = self.scheduler.clone();
        let sim = self.clone();
        scheduler.schedule_interval(
            Duration::minutes(15),
            move || sim.update_occupancy(),
            Some(&task_id),
            false,
        );
    }

    /// One routine evaluation; called from the scheduler every 15
    /// simulated minutes.
    pub fn update_occupancy(&self) {
        let now = self.clock.now();
        let time = now.time();
        let weekday = now.weekday().num_days_from_monday() < 5;

        let wake = NaiveTime::from_hms_opt(6, 30, 0).expect("valid time");
        let sleep = NaiveTime::from_hms_opt(22, 30, 0).expect("valid time");
        let leave = NaiveTime::from_hms_opt(8, 0, 0).expect("valid time");
        let back = NaiveTime::from_hms_opt(17, 30, 0).expect("valid time");

        {
            let wfh_day = self.rng.lock().gen_range(0.0..1.0) < self.options.wfh_ratio;
            let mut state = self.state.lock();

            if state.vacation {
                state.is_home = false;
                state.is_sleeping = false;
                state.active_areas.clear();
            } else {
                if time >= sleep || time < wake {
                    state.is_sleeping = true;
                    state.active_areas = vec!["bedroom".into()];
                } else {
                    state.is_sleeping = false;
                }

                if weekday && !wfh_day && time >= leave && time < back {
                    state.is_home = false;
                    state.active_areas.clear();
                } else {
                    state.is_home = true;
                }

                if state.is_home && !state.is_sleeping {
                    state.active_areas = self.pick_active_areas(time.hour(), time.minute());
                }
            }
        }

        self.update_motion_sensors();
        self.update_person_entities();
    }

    fn pick_active_areas(&self, hour: u32, minute: u32) -> Vec<String> {
        let mut rng = self.rng.lock();
        let mut areas: Vec<String> = match hour {
            6..=8 => {
                let mut areas = vec!["kitchen".to_string(), "bathroom".to_string()];
                if rng.gen_range(0.0..1.0) < 0.3 {
                    areas.push("bedroom".into());
                }
                areas
            }
            9..=11 => {
                let options = ["living_room", "kitchen", "office"];
                vec![options.choose(&mut *rng).expect("non-empty").to_string()]
            }
            12 => vec!["kitchen".into(), "dining_room".into()],
            13..=16 => {
                if self.options.wfh_ratio > 0.5 {
                    vec!["office".into()]
                } else {
                    vec!["living_room".into()]
                }
            }
            17..=19 => {
                let mut areas = vec!["kitchen".to_string(), "living_room".to_string()];
                if self.options.has_kids {
                    areas.push("playroom".into());
                }
                areas
            }
            20..=22 if hour < 22 || minute < 30 => {
                vec!["living_room".into(), "bedroom".into(), "bathroom".into()]
            }
            _ => Vec::new(),
        };

        // Occasional wandering into another room.
        if rng.gen_range(0.0..1.0) < 0.2 {
            let extras = ["living_room", "kitchen", "bedroom", "bathroom", "hallway"];
            areas.push(extras.choose(&mut *rng).expect("non-empty").to_string());
        }
        areas
    }

    fn update_motion_sensors(&self) {
        let prefix = format!("binary_sensor.{}_motion", self.home_id);
        let (is_home, is_sleeping, areas) = {
            let state = self.state.lock();
            (
                state.is_home,
                state.is_sleeping,
                state.active_areas.clone(),
            )
        };

        for state in self.store.get_all_states() {
            if !state.entity_id.starts_with(&prefix) {
                continue;
            }
            let area = state
                .attr("area")
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            let wander = self.rng.lock().gen_range(0.0..1.0) < 0.1;
            let should_be_on =
                is_home && !is_sleeping && (areas.iter().any(|a| a == area) || wander);

            let next = if should_be_on { "on" } else { "off" };
            if state.state != next {
                let _ = self
                    .store
                    .set_state(&state.entity_id, next, state.attributes.clone());
            }
        }
    }

    fn update_person_entities(&self) {
        let prefix = format!("person.{}", self.home_id);
        let is_home = self.state.lock().is_home;
        let next = if is_home { "home" } else { "away" };

        for state in self.store.get_all_states() {
            if !state.entity_id.starts_with(&prefix) {
                continue;
            }
            if state.state != next {
                let mut attrs = state.attributes.clone();
                attrs.insert("source".into(), json!("device_tracker"));
                let _ = self.store.set_state(&state.entity_id, next, attrs);
            }
        }
    }
}

/// Convenience for seeding person entities alongside a home.
pub fn register_person(
    store: &StateStore,
    home_id: &str,
    name: &str,
) -> hearth_kernel::error::KernelResult<()> {
    let entity_id = format!("person.{home_id}_{name}");
    if store.get_state(&entity_id).is_none() {
        let mut attrs = AttrMap::new();
        attrs.insert("friendly_name".into(), json!(name));
        attrs.insert("source".into(), json!("device_tracker"));
        store.set_state(&entity_id, "home", attrs)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use hearth_kernel::metrics::KernelMetrics;

    fn fixture(start: &str, options: OccupancyOptions) -> (Arc<StateStore>, Arc<OccupancySimulator>) {
        let clock = Arc::new(
            SimulationClock::new(Some(start.parse::<DateTime<Utc>>().unwrap()), 1.0, true)
                .unwrap(),
        );
        let metrics = Arc::new(KernelMetrics::new());
        let store = Arc::new(StateStore::new(clock.clone(), metrics.clone()));
        let scheduler = Arc::new(Scheduler::new(clock.clone(), metrics));
        let sim = OccupancySimulator::new("home1", store.clone(), clock, scheduler, options, 7);
        (store, sim)
    }

    #[test]
    fn sleep_window_confines_activity_to_the_bedroom() {
        // 23:00 on a Tuesday.
        let (_store, sim) = fixture("2025-06-10T23:00:00Z", OccupancyOptions::default());
        sim.update_occupancy();
        assert!(sim.is_sleeping());
        assert!(sim.is_home());
        assert_eq!(sim.active_areas(), vec!["bedroom".to_string()]);
    }

    #[test]
    fn office_hours_empty_the_house_on_a_non_wfh_weekday() {
        let options = OccupancyOptions {
            wfh_ratio: 0.0,
            ..OccupancyOptions::default()
        };
        // 10:00 on a Tuesday.
        let (_store, sim) = fixture("2025-06-10T10:00:00Z", options);
        sim.update_occupancy();
        assert!(!sim.is_home());
        assert!(sim.active_areas().is_empty());
    }

    #[test]
    fn weekends_stay_home() {
        let options = OccupancyOptions {
            wfh_ratio: 0.0,
            ..OccupancyOptions::default()
        };
        // 10:00 on a Saturday.
        let (_store, sim) = fixture("2025-06-14T10:00:00Z", options);
        sim.update_occupancy();
        assert!(sim.is_home());
        assert!(!sim.active_areas().is_empty());
    }

    #[test]
    fn evening_with_kids_includes_the_playroom() {
        let options = OccupancyOptions {
            has_kids: true,
            wfh_ratio: 0.0,
        };
        // 18:00 on a Saturday.
        let (_store, sim) = fixture("2025-06-14T18:00:00Z", options);
        sim.update_occupancy();
        assert!(sim.active_areas().iter().any(|a| a == "playroom"));
    }

    #[test]
    fn vacation_mode_forces_away_until_cleared() {
        let (_store, sim) = fixture("2025-06-14T10:00:00Z", OccupancyOptions::default());
        sim.set_vacation_mode(true);
        sim.update_occupancy();
        assert!(!sim.is_home());

        sim.set_vacation_mode(false);
        sim.update_occupancy();
        assert!(sim.is_home());
    }

    #[test]
    fn person_entities_follow_presence() {
        let options = OccupancyOptions {
            wfh_ratio: 0.0,
            ..OccupancyOptions::default()
        };
        let (store, sim) = fixture("2025-06-10T10:00:00Z", options);
        register_person(&store, "home1", "alice").unwrap();

        sim.update_occupancy();
        assert_eq!(store.get_state("person.home1_alice").unwrap().state, "away");
    }
}
