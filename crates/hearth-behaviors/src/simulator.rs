//! The simulator facade: owns the kernel components and every behavior
//! engine, wires them together, and exposes lifecycle plus a stats
//! snapshot.

use crate::binary_sensor::BinarySensorEngine;
use crate::climate::ClimateEngine;
use crate::cover::CoverEngine;
use crate::home::HomeConfig;
use crate::light::LightEngine;
use crate::media_player::MediaPlayerEngine;
use crate::occupancy::{OccupancySimulator, register_person};
use crate::sensor::SensorEngine;
use crate::switch::SwitchEngine;
use crate::weather::WeatherOracle;
use hearth_kernel::clock::SimulationClock;
use hearth_kernel::engine::BehaviorEngine;
use hearth_kernel::error::{KernelError, KernelResult};
use hearth_kernel::metrics::{KernelMetrics, MetricsSnapshot};
use hearth_kernel::model::split_entity_id;
use hearth_kernel::registry::{ServiceRegistry, ServiceSchema};
use hearth_kernel::scheduler::Scheduler;
use hearth_kernel::store::StateStore;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{info, warn};

/// Simulator construction options.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Initial simulated time; defaults to the current UTC instant.
    pub start_time: Option<DateTime<Utc>>,
    /// Simulated seconds per wall second.
    pub speed: f64,
    pub paused: bool,
    /// Master seed; engines and the weather oracle derive their own.
    pub seed: u64,
    pub region: String,
    pub max_history: usize,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            start_time: None,
            speed: 1.0,
            paused: false,
            seed: 42,
            region: "north".into(),
            max_history: hearth_kernel::store::DEFAULT_MAX_HISTORY,
        }
    }
}

/// Serializable snapshot for the stats/health endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct SimulatorStats {
    pub running: bool,
    pub entities: usize,
    pub domains: Vec<String>,
    pub current_time: DateTime<Utc>,
    pub speed: f64,
    pub paused: bool,
    pub pending_tasks: usize,
    pub metrics: MetricsSnapshot,
}

/// Coordinator tying the kernel and the behavior engines together.
pub struct Simulator {
    clock: Arc<SimulationClock>,
    store: Arc<StateStore>,
    scheduler: Arc<Scheduler>,
    registry: Arc<ServiceRegistry>,
    metrics: Arc<KernelMetrics>,
    weather: Arc<WeatherOracle>,

    lights: Arc<LightEngine>,
    switches: Arc<SwitchEngine>,
    binary_sensors: Arc<BinarySensorEngine>,
    sensors: Arc<SensorEngine>,
    climates: Arc<ClimateEngine>,
    covers: Arc<CoverEngine>,
    media_players: Arc<MediaPlayerEngine>,

    occupancy: Mutex<Vec<Arc<OccupancySimulator>>>,
    running: AtomicBool,
}

impl Simulator {
    pub fn new(config: SimulatorConfig) -> KernelResult<Self> {
        let clock = Arc::new(SimulationClock::new(
            config.start_time,
            config.speed,
            config.paused,
        )?);
        let metrics = Arc::new(KernelMetrics::new());
        let store = Arc::new(StateStore::with_max_history(
            clock.clone(),
            metrics.clone(),
            config.max_history,
        ));
        let scheduler = Arc::new(Scheduler::new(clock.clone(), metrics.clone()));
        let registry = Arc::new(ServiceRegistry::new(metrics.clone()));
        let weather = Arc::new(WeatherOracle::new(config.region.clone(), config.seed));

        let seed = config.seed;
        let lights = LightEngine::new(
            store.clone(),
            clock.clone(),
            scheduler.clone(),
            seed.wrapping_add(1),
        );
        let switches = SwitchEngine::new(
            store.clone(),
            clock.clone(),
            scheduler.clone(),
            seed.wrapping_add(2),
        );
        let binary_sensors = BinarySensorEngine::new(
            store.clone(),
            clock.clone(),
            scheduler.clone(),
            seed.wrapping_add(3),
        );
        let sensors = SensorEngine::new(
            store.clone(),
            clock.clone(),
            scheduler.clone(),
            weather.clone(),
            seed.wrapping_add(4),
        );
        let climates = ClimateEngine::new(
            store.clone(),
            clock.clone(),
            scheduler.clone(),
            weather.clone(),
            seed.wrapping_add(5),
        );
        let covers = CoverEngine::new(
            store.clone(),
            clock.clone(),
            scheduler.clone(),
            seed.wrapping_add(6),
        );
        let media_players = MediaPlayerEngine::new(
            store.clone(),
            clock.clone(),
            scheduler.clone(),
            seed.wrapping_add(7),
        );

        registry.register_engine(lights.clone());
        registry.register_engine(switches.clone());
        registry.register_engine(binary_sensors.clone());
        registry.register_engine(sensors.clone());
        registry.register_engine(climates.clone());
        registry.register_engine(covers.clone());
        registry.register_engine(media_players.clone());

        // Services beyond the per-domain defaults.
        registry.register_custom_service(
            "binary_sensor",
            "test",
            ServiceSchema::new("Manually trigger a binary sensor")
                .with_field("state", "State to set (on/off)"),
        );
        registry.register_custom_service(
            "cover",
            "set_cover_tilt_position",
            ServiceSchema::new("Set cover tilt position")
                .with_field("tilt_position", "Tilt position (0-100)"),
        );
        for (service, description) in [
            ("media_play", "Start playback"),
            ("media_pause", "Pause playback"),
            ("media_stop", "Stop playback"),
        ] {
            registry.register_custom_service(
                "media_player",
                service,
                ServiceSchema::new(description),
            );
        }
        registry.register_custom_service(
            "media_player",
            "volume_set",
            ServiceSchema::new("Set volume").with_field("volume_level", "Volume (0.0-1.0)"),
        );
        registry.register_custom_service(
            "media_player",
            "volume_mute",
            ServiceSchema::new("Mute or unmute").with_field("is_volume_muted", "Muted flag"),
        );
        registry.register_custom_service(
            "media_player",
            "select_source",
            ServiceSchema::new("Select input source").with_field("source", "Source name"),
        );

        info!(region = %config.region, speed = config.speed, "simulator initialized");

        Ok(Self {
            clock,
            store,
            scheduler,
            registry,
            metrics,
            weather,
            lights,
            switches,
            binary_sensors,
            sensors,
            climates,
            covers,
            media_players,
            occupancy: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
        })
    }

    pub fn clock(&self) -> &Arc<SimulationClock> {
        &self.clock
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    pub fn metrics(&self) -> &Arc<KernelMetrics> {
        &self.metrics
    }

    pub fn weather(&self) -> &Arc<WeatherOracle> {
        &self.weather
    }

    pub fn lights(&self) -> &Arc<LightEngine> {
        &self.lights
    }

    pub fn binary_sensors(&self) -> &Arc<BinarySensorEngine> {
        &self.binary_sensors
    }

    /// Create one entity, routed to its domain engine.
    pub fn create_entity(
        &self,
        entity_id: &str,
        config: Option<serde_json::Value>,
    ) -> KernelResult<()> {
        let (domain, _) = split_entity_id(entity_id)?;
        let Some(engine) = self.registry.engine_for(domain) else {
            return Err(KernelError::UnknownDomain(domain.to_string()));
        };
        engine.register_entity(entity_id, config)
    }

    /// Populate the entities of one home and, when configured, its
    /// occupancy routine and residents.
    pub fn create_home(&self, home: &HomeConfig) -> KernelResult<()> {
        let id = &home.home_id;
        let areas = [
            "living_room",
            "kitchen",
            "bedroom",
            "bathroom",
            "hallway",
            "office",
        ];

        for i in 0..home.totals.lights {
            self.create_entity(
                &format!("light.{id}_light_{i}"),
                Some(json!({
                    "name": format!("Light {i}"),
                    "brightness": true,
                    "color_temp": i % 3 == 0,
                    "rgb_color": i % 5 == 0,
                })),
            )?;
        }

        for i in 0..home.totals.switches {
            self.create_entity(
                &format!("switch.{id}_switch_{i}"),
                Some(json!({
                    "name": format!("Switch {i}"),
                    "power_monitoring": i % 2 == 0,
                    "rated_power": 10.0,
                })),
            )?;
        }

        for i in 0..home.totals.motion_sensors {
            self.create_entity(
                &format!("binary_sensor.{id}_motion_{i}"),
                Some(json!({
                    "name": format!("Motion Sensor {i}"),
                    "device_class": "motion",
                    "battery_powered": true,
                    "area": areas[i % areas.len()],
                })),
            )?;
        }

        for i in 0..home.totals.temperature_sensors {
            self.create_entity(
                &format!("sensor.{id}_temperature_{i}"),
                Some(json!({
                    "name": format!("Temperature Sensor {i}"),
                    "device_class": "temperature",
                    "outdoor": i == 0,
                })),
            )?;
        }

        for i in 0..home.totals.humidity_sensors {
            self.create_entity(
                &format!("sensor.{id}_humidity_{i}"),
                Some(json!({
                    "name": format!("Humidity Sensor {i}"),
                    "device_class": "humidity",
                    "outdoor": i == 0,
                })),
            )?;
        }

        if home.features.energy_monitoring {
            self.create_entity(
                &format!("sensor.{id}_power"),
                Some(json!({"name": "Total Power", "device_class": "power"})),
            )?;
            self.create_entity(
                &format!("sensor.{id}_energy"),
                Some(json!({
                    "name": "Total Energy",
                    "device_class": "energy",
                    "power_sensor": format!("sensor.{id}_power"),
                })),
            )?;
        }

        for i in 0..home.totals.thermostats {
            self.create_entity(
                &format!("climate.{id}_thermostat_{i}"),
                Some(json!({
                    "name": format!("Thermostat {i}"),
                    "humidity_control": i == 0,
                })),
            )?;
        }

        for resident in &home.residents {
            register_person(&self.store, id, resident)?;
        }

        if let Some(options) = &home.occupancy {
            let sim = OccupancySimulator::new(
                id.clone(),
                self.store.clone(),
                self.clock.clone(),
                self.scheduler.clone(),
                options.clone(),
                // Stable per-home stream, independent of registration order.
                fxhash(id),
            );
            if self.running.load(Ordering::SeqCst) {
                sim.clone().start();
            }
            self.occupancy.lock().push(sim);
        }

        info!(
            home_id = %id,
            entities = self.store.entity_count(),
            "created home"
        );
        Ok(())
    }

    /// Occupancy simulator for a home, if one was configured.
    pub fn occupancy_for(&self, home_id: &str) -> Option<Arc<OccupancySimulator>> {
        self.occupancy
            .lock()
            .iter()
            .find(|o| o.home_id() == home_id)
            .cloned()
    }

    /// Start every engine's ambient schedule and the scheduler worker.
    /// Idempotent.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("simulator already running");
            return;
        }
        self.lights.clone().start();
        self.switches.clone().start();
        self.binary_sensors.clone().start();
        self.sensors.clone().start();
        self.climates.clone().start();
        self.covers.clone().start();
        self.media_players.clone().start();
        for occupancy in self.occupancy.lock().iter() {
            occupancy.clone().start();
        }
        self.scheduler.start();
        info!("simulator started");
    }

    /// Stop the scheduler within `timeout` and tear down the engines.
    pub async fn stop(&self, timeout: Duration) -> KernelResult<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        self.scheduler.stop(timeout).await?;
        self.lights.stop();
        self.switches.stop();
        self.binary_sensors.stop();
        self.sensors.stop();
        self.climates.stop();
        self.covers.stop();
        self.media_players.stop();
        info!("simulator stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> SimulatorStats {
        SimulatorStats {
            running: self.is_running(),
            entities: self.store.entity_count(),
            domains: self.store.domains(),
            current_time: self.clock.now(),
            speed: self.clock.speed(),
            paused: self.clock.is_paused(),
            pending_tasks: self.scheduler.pending_tasks(),
            metrics: self.metrics.snapshot(),
        }
    }
}

/// Tiny FNV-style string hash for deriving per-home seeds.
fn fxhash(s: &str) -> u64 {
    let mut hash = 0xcbf2_9ce4_8422_2325u64;
    for byte in s.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::home::HomeTotals;

    fn simulator() -> Simulator {
        Simulator::new(SimulatorConfig {
            start_time: Some("2025-06-10T12:00:00Z".parse().unwrap()),
            paused: true,
            ..SimulatorConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn create_entity_routes_by_domain() {
        let sim = simulator();
        sim.create_entity("light.hall", None).unwrap();
        sim.create_entity("climate.main", None).unwrap();
        assert_eq!(sim.store().get_state("light.hall").unwrap().state, "off");
        assert!(matches!(
            sim.create_entity("vacuum.roomba", None),
            Err(KernelError::UnknownDomain(_))
        ));
    }

    #[test]
    fn create_home_populates_every_domain() {
        let sim = simulator();
        let mut home = HomeConfig::new("demo");
        home.totals = HomeTotals {
            lights: 3,
            switches: 2,
            motion_sensors: 2,
            temperature_sensors: 1,
            humidity_sensors: 1,
            thermostats: 1,
        };
        home.features.energy_monitoring = true;
        home.residents = vec!["alice".into()];
        sim.create_home(&home).unwrap();

        // 3 + 2 + 2 + 1 + 1 + 2 (power+energy) + 1 + 1 person = 13
        assert_eq!(sim.store().entity_count(), 13);
        let domains = sim.store().domains();
        for domain in ["light", "switch", "binary_sensor", "sensor", "climate", "person"] {
            assert!(domains.iter().any(|d| d == domain), "missing {domain}");
        }

        // The energy sensor integrates the home power sensor.
        let energy = sim.store().get_state("sensor.demo_energy").unwrap();
        assert_eq!(energy.attr("state_class"), Some(&json!("total_increasing")));
    }

    #[tokio::test]
    async fn lifecycle_is_idempotent() {
        let sim = simulator();
        sim.create_home(&HomeConfig::new("demo")).unwrap();
        sim.start();
        sim.start();
        assert!(sim.is_running());
        assert!(sim.scheduler().pending_tasks() > 0);

        let stats = sim.stats();
        assert!(stats.paused);
        assert!(stats.entities > 0);

        sim.stop(Duration::from_secs(2)).await.unwrap();
        assert!(!sim.is_running());
        sim.stop(Duration::from_secs(2)).await.unwrap();
    }

    #[test]
    fn service_calls_flow_through_the_registry() {
        let sim = simulator();
        sim.create_entity("light.a", None).unwrap();
        sim.create_entity("light.b", None).unwrap();

        let ids = vec!["light.a".to_string(), "light.b".to_string()];
        let results = sim
            .registry()
            .call_service("light", "turn_on", &ids, &hearth_kernel::model::AttrMap::new());
        assert!(results.iter().all(|r| r.ok));
        assert_eq!(sim.store().get_state("light.a").unwrap().state, "on");
        assert_eq!(sim.store().get_state("light.b").unwrap().state, "on");
    }
}
