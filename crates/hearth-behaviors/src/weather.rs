//! Deterministic weather oracle.
//!
//! Produces `{temperature, humidity, precipitation}` for any simulated
//! instant, derived purely from `(region, seed, hour-index)`: the
//! requested timestamp is floored to the hour and that hour seeds its own
//! RNG, so the series is stable across calls and processes without
//! materializing a year of samples up front.

use chrono::{DateTime, Datelike, Timelike, Utc};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// One hourly weather sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeatherSample {
    pub temp_c: f64,
    /// Relative humidity in `[0.15, 0.95]`.
    pub rel_humidity: f64,
    pub precip: bool,
}

/// Mean winter/summer temperature anchors, humidity baseline, and hourly
/// precipitation probability for a region.
fn region_profile(region: &str) -> (f64, f64, f64, f64) {
    match region {
        "north" => (5.0, 18.0, 0.55, 0.05),
        "south" => (12.0, 33.0, 0.70, 0.08),
        "arid_west" => (7.0, 35.0, 0.30, 0.02),
        "marine_west" => (8.0, 22.0, 0.75, 0.07),
        "east_midwest" => (4.0, 30.0, 0.60, 0.06),
        _ => (6.0, 28.0, 0.55, 0.05),
    }
}

/// Deterministic time → weather function shared by climate and outdoor
/// sensors.
#[derive(Debug, Clone)]
pub struct WeatherOracle {
    region: String,
    seed: u64,
}

impl WeatherOracle {
    pub fn new(region: impl Into<String>, seed: u64) -> Self {
        Self {
            region: region.into(),
            seed,
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// Sample for the hour containing `at`. Repeated queries within the
    /// same hour return identical values.
    pub fn sample(&self, at: DateTime<Utc>) -> WeatherSample {
        let hour_index = at.timestamp().div_euclid(3600);
        let mut rng = SmallRng::seed_from_u64(mix(self.seed, hour_index as u64));

        let (winter, summer, humidity_base, precip_prob) = region_profile(&self.region);
        let day_of_year = at.ordinal() as f64;

        // Seasonal sine anchored at day 172 (summer solstice), plus noise.
        let mean = (winter + summer) / 2.0;
        let amplitude = (summer - winter) / 2.0;
        let seasonal = mean + amplitude * (2.0 * PI * (day_of_year - 172.0) / 365.0).sin();
        let temp_noise = Normal::new(0.0, 2.5).expect("valid sigma");
        let temp_c = seasonal + temp_noise.sample(&mut rng);

        let humidity_noise = Normal::new(0.0, 0.05).expect("valid sigma");
        let rel_humidity =
            (humidity_base + humidity_noise.sample(&mut rng)).clamp(0.15, 0.95);

        let precip = rng.gen_range(0.0..1.0) < precip_prob;

        WeatherSample {
            temp_c,
            rel_humidity,
            precip,
        }
    }

    /// Hour of day for `at`; handy for tests exercising diurnal behavior.
    pub fn hour_of(at: DateTime<Utc>) -> u32 {
        at.hour()
    }
}

/// splitmix64-style mixer so nearby hour indices get unrelated streams.
fn mix(seed: u64, hour_index: u64) -> u64 {
    let mut z = seed ^ hour_index.wrapping_mul(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}
