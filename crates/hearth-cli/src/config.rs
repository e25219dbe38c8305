//! YAML serving configuration.
//!
//! ```yaml
//! region: marine_west
//! homes:
//!   - home_id: demo_home
//!     totals: { lights: 12, motion_sensors: 4 }
//!     features: { energy_monitoring: true }
//!     occupancy: { has_kids: true, wfh_ratio: 0.5 }
//!     residents: [alice, bob]
//! profiles:
//!   starter: 2
//!   intermediate: 1
//! ```
//!
//! `homes` lists fully described homes; `profiles` stamps out additional
//! homes from the named presets.

use anyhow::Context;
use hearth_behaviors::home::HomeConfig;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServeFileConfig {
    /// Weather region for the whole simulation.
    pub region: Option<String>,
    /// Explicitly configured homes.
    pub homes: Vec<HomeConfig>,
    /// profile name -> number of homes to stamp out.
    pub profiles: BTreeMap<String, usize>,
}

impl ServeFileConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        serde_yaml::from_str(&raw)
            .with_context(|| format!("parsing config {}", path.display()))
    }

    /// All homes: the explicit ones plus the profile-stamped ones.
    pub fn all_homes(&self) -> Vec<HomeConfig> {
        let mut homes = self.homes.clone();
        for (profile, count) in &self.profiles {
            for i in 0..*count {
                homes.push(HomeConfig::from_profile(
                    profile,
                    format!("{profile}_{i:03}"),
                ));
            }
        }
        homes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_expand_profiles() {
        let yaml = r#"
region: south
homes:
  - home_id: mine
    residents: [alice]
profiles:
  starter: 2
"#;
        let config: ServeFileConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.region.as_deref(), Some("south"));

        let homes = config.all_homes();
        assert_eq!(homes.len(), 3);
        assert_eq!(homes[0].home_id, "mine");
        assert_eq!(homes[1].home_id, "starter_000");
        assert_eq!(homes[2].home_id, "starter_001");
    }

    #[test]
    fn empty_config_is_valid() {
        let config: ServeFileConfig = serde_yaml::from_str("{}").unwrap();
        assert!(config.all_homes().is_empty());
    }
}
