//! Hearth behaviors — domain engines over the simulation kernel.
//!
//! One engine per domain (`light`, `switch`, `binary_sensor`, `sensor`,
//! `climate`, `cover`, `media_player`), each owning its entities,
//! scheduling ambient simulation on the kernel scheduler, and handling
//! service calls dispatched by the registry. The crate also carries the
//! deterministic [`weather::WeatherOracle`], the per-home
//! [`occupancy::OccupancySimulator`], and the [`simulator::Simulator`]
//! facade that wires everything together.

pub mod binary_sensor;
pub mod climate;
pub mod cover;
pub mod home;
pub mod light;
pub mod media_player;
pub mod occupancy;
pub mod sensor;
pub mod simulator;
pub mod switch;
pub mod weather;

mod engine;

pub use binary_sensor::BinarySensorEngine;
pub use climate::ClimateEngine;
pub use cover::CoverEngine;
pub use home::{HomeConfig, HomeFeatures, HomeTotals};
pub use light::LightEngine;
pub use media_player::MediaPlayerEngine;
pub use occupancy::{OccupancyOptions, OccupancySimulator};
pub use sensor::SensorEngine;
pub use simulator::{Simulator, SimulatorConfig, SimulatorStats};
pub use switch::SwitchEngine;
pub use weather::{WeatherOracle, WeatherSample};
