//! Station configuration: which of the attached devices may be used, and how they are grouped into
//! fixtures.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::{Result, platform};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StationConfig {
    /// Ids or names of the devices allowed in the pool. Empty means every attached device.
    pub devices: Vec<String>,
    /// Platform names or tags to run tests for. Empty means every known platform.
    pub platforms: Vec<String>,
    pub fixtures: Vec<FixtureConfig>,
}

/// A named set of devices reserved for suites that drive several devices at once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FixtureConfig {
    pub name: String,
    /// Device ids or names
    pub devices: Vec<String>,
}

impl StationConfig {
    pub fn from_json(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    /// Ids of the enabled platforms, or `None` if all platforms are enabled.
    pub fn enabled_platforms(&self) -> Result<Option<HashSet<u32>>> {
        if self.platforms.is_empty() {
            return Ok(None);
        }

        let ids = platform::parse_platforms(&self.platforms)?
            .iter()
            .map(|p| p.id())
            .collect();
        Ok(Some(ids))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse() {
        let config = StationConfig::from_json(
            r#"{
                "platforms": ["boron", "wifi"],
                "fixtures": [{ "name": "i2c", "devices": ["master", "e00fce68"] }]
            }"#,
        )
        .unwrap();

        assert!(config.devices.is_empty());
        assert_eq!(config.fixtures.len(), 1);
        assert_eq!(config.fixtures[0].devices, ["master", "e00fce68"]);

        let enabled = config.enabled_platforms().unwrap().unwrap();
        assert!(enabled.contains(&13));
        assert!(enabled.contains(&12));
        assert!(!enabled.contains(&10));
    }

    #[test]
    fn all_platforms_enabled_by_default() {
        assert_eq!(StationConfig::default().enabled_platforms().unwrap(), None);
    }

    #[test]
    fn unknown_platform_tag() {
        let config = StationConfig {
            platforms: vec!["toaster".to_string()],
            ..Default::default()
        };
        assert!(config.enabled_platforms().is_err());
    }

    #[test]
    fn unknown_field() {
        assert!(StationConfig::from_json(r#"{ "fixture": [] }"#).is_err());
    }
}
