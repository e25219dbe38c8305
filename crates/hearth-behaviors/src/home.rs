//! Home configuration: entity totals and household options that the
//! simulator turns into registered entities.

use crate::occupancy::OccupancyOptions;
use serde::Deserialize;

/// Entity counts for one home.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HomeTotals {
    pub lights: usize,
    pub switches: usize,
    pub motion_sensors: usize,
    pub temperature_sensors: usize,
    pub humidity_sensors: usize,
    pub thermostats: usize,
}

impl Default for HomeTotals {
    fn default() -> Self {
        Self {
            lights: 10,
            switches: 5,
            motion_sensors: 5,
            temperature_sensors: 3,
            humidity_sensors: 2,
            thermostats: 1,
        }
    }
}

/// Feature switches for one home.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HomeFeatures {
    pub energy_monitoring: bool,
}

/// A simulated home: id, entity totals, features, and optionally an
/// occupancy routine plus resident `person.*` entities.
#[derive(Debug, Clone, Deserialize)]
pub struct HomeConfig {
    pub home_id: String,
    #[serde(default)]
    pub totals: HomeTotals,
    #[serde(default)]
    pub features: HomeFeatures,
    #[serde(default)]
    pub occupancy: Option<OccupancyOptions>,
    #[serde(default)]
    pub residents: Vec<String>,
}

impl HomeConfig {
    pub fn new(home_id: impl Into<String>) -> Self {
        Self {
            home_id: home_id.into(),
            totals: HomeTotals::default(),
            features: HomeFeatures::default(),
            occupancy: None,
            residents: Vec::new(),
        }
    }

    /// Preset totals for the `starter` / `intermediate` / `advanced`
    /// profiles used by the serving config. Unknown profiles get the
    /// starter shape.
    pub fn from_profile(profile: &str, home_id: impl Into<String>) -> Self {
        let totals = match profile {
            "intermediate" => HomeTotals {
                lights: 20,
                switches: 5,
                motion_sensors: 4,
                temperature_sensors: 2,
                humidity_sensors: 1,
                thermostats: 1,
            },
            "advanced" => HomeTotals {
                lights: 30,
                switches: 8,
                motion_sensors: 6,
                temperature_sensors: 3,
                humidity_sensors: 1,
                thermostats: 2,
            },
            _ => HomeTotals {
                lights: 10,
                switches: 3,
                motion_sensors: 2,
                temperature_sensors: 1,
                humidity_sensors: 1,
                thermostats: 1,
            },
        };
        Self {
            home_id: home_id.into(),
            totals,
            features: HomeFeatures {
                energy_monitoring: true,
            },
            occupancy: None,
            residents: Vec::new(),
        }
    }
}
