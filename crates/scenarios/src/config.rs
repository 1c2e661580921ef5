//! Operator-facing scenario configuration
//!
//! All parameters are plain data, loaded from JSON (every field has a
//! default) and optionally overridden from the command line. They are fixed
//! once the scenario is built.

use crate::profile::LinkProfile;
use crate::qos::QosClass;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Placement order of a grid position allocator
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GridLayout {
    #[default]
    RowFirst,
    ColumnFirst,
}

/// Grid placement parameters
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridSpec {
    pub min_x: f64,
    pub min_y: f64,
    pub delta_x: f64,
    pub delta_y: f64,
    pub width: u32,
    pub layout: GridLayout,
}

impl Default for GridSpec {
    fn default() -> Self {
        Self {
            min_x: 0.0,
            min_y: 0.0,
            delta_x: 5.0,
            delta_y: 10.0,
            width: 3,
            layout: GridLayout::RowFirst,
        }
    }
}

/// Velocity vector in metres per second
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VelocitySpec {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Default for VelocitySpec {
    fn default() -> Self {
        Self { x: 5.0, y: 0.0, z: 0.0 }
    }
}

/// Link profile per technology
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkProfiles {
    pub point_to_point: LinkProfile,
    pub internet_backhaul: LinkProfile,
    pub shared_media: LinkProfile,
    pub wireless_lan: LinkProfile,
    pub vehicular: LinkProfile,
    pub cellular_access: LinkProfile,
    pub core_backhaul: LinkProfile,
}

impl Default for LinkProfiles {
    fn default() -> Self {
        Self {
            point_to_point: LinkProfile::point_to_point(),
            internet_backhaul: LinkProfile::internet_backhaul(),
            shared_media: LinkProfile::shared_media(),
            wireless_lan: LinkProfile::wireless_lan(),
            vehicular: LinkProfile::vehicular(),
            cellular_access: LinkProfile::cellular_access(),
            core_backhaul: LinkProfile::core_backhaul(),
        }
    }
}

/// Optional run artefacts
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSpec {
    /// JSON-lines trace of attachment, bearer, mobility and packet events
    pub trace_path: Option<PathBuf>,
    /// Directory receiving one pcap file per device
    pub pcap_dir: Option<PathBuf>,
}

/// Complete scenario configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioConfig {
    pub name: String,
    /// Number of base station + mobile station pairs
    pub num_node_pairs: u16,
    /// Total simulated duration (ms)
    pub sim_time_ms: u64,
    /// Distance between base stations (m)
    pub distance_m: f64,
    /// Interval between packets of one source (ms)
    pub inter_packet_interval_ms: u64,
    /// UDP payload size (bytes)
    pub packet_size: u32,
    /// Packet budget per source
    pub max_packets: u32,
    /// Application start offset (ms)
    pub app_start_ms: u64,
    /// Carrier aggregation with two component carriers
    pub use_ca: bool,
    pub disable_dl: bool,
    pub disable_ul: bool,
    /// Disable flows between peer mobile stations
    pub disable_pl: bool,
    pub qos: QosClass,
    pub grid: GridSpec,
    pub velocity: VelocitySpec,
    pub links: LinkProfiles,
    pub output: OutputSpec,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            name: "lte-epc".to_string(),
            num_node_pairs: 1,
            sim_time_ms: 1100,
            distance_m: 60.0,
            inter_packet_interval_ms: 100,
            packet_size: 1024,
            max_packets: 1000,
            app_start_ms: 500,
            use_ca: false,
            disable_dl: false,
            disable_ul: false,
            disable_pl: false,
            qos: QosClass::default(),
            grid: GridSpec::default(),
            velocity: VelocitySpec::default(),
            links: LinkProfiles::default(),
            output: OutputSpec::default(),
        }
    }
}

impl ScenarioConfig {
    /// Parse a configuration from JSON text
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: ScenarioConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn sim_time(&self) -> Duration {
        Duration::from_millis(self.sim_time_ms)
    }

    pub fn app_start(&self) -> Duration {
        Duration::from_millis(self.app_start_ms)
    }

    pub fn inter_packet_interval(&self) -> Duration {
        Duration::from_millis(self.inter_packet_interval_ms)
    }

    /// Number of cellular component carriers
    pub fn component_carriers(&self) -> u8 {
        if self.use_ca {
            2
        } else {
            1
        }
    }

    /// Check parameter ranges before any scenario is built
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_node_pairs == 0 {
            return Err(ConfigError::Invalid(
                "num_node_pairs must be at least 1".to_string(),
            ));
        }
        if self.sim_time_ms == 0 {
            return Err(ConfigError::Invalid("sim_time_ms must be positive".to_string()));
        }
        if self.inter_packet_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "inter_packet_interval_ms must be positive".to_string(),
            ));
        }
        if self.packet_size == 0 {
            return Err(ConfigError::Invalid("packet_size must be positive".to_string()));
        }
        if self.app_start_ms >= self.sim_time_ms {
            return Err(ConfigError::Invalid(format!(
                "app_start_ms ({}) must precede sim_time_ms ({})",
                self.app_start_ms, self.sim_time_ms
            )));
        }
        if self.distance_m < 0.0 || !self.distance_m.is_finite() {
            return Err(ConfigError::Invalid(format!(
                "distance_m must be a non-negative number, got {}",
                self.distance_m
            )));
        }
        if self.grid.width == 0 {
            return Err(ConfigError::Invalid("grid width must be positive".to_string()));
        }
        if self.grid.delta_x < 0.0 || self.grid.delta_y < 0.0 {
            return Err(ConfigError::Invalid(
                "grid deltas must be non-negative".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_reference_program() {
        let config = ScenarioConfig::default();
        assert_eq!(config.num_node_pairs, 1);
        assert_eq!(config.sim_time(), Duration::from_millis(1100));
        assert_eq!(config.inter_packet_interval(), Duration::from_millis(100));
        assert_eq!(config.component_carriers(), 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = ScenarioConfig::from_json(r#"{"use_ca": true, "sim_time_ms": 5000}"#).unwrap();
        assert!(config.use_ca);
        assert_eq!(config.component_carriers(), 2);
        assert_eq!(config.sim_time_ms, 5000);
        assert_eq!(config.packet_size, 1024);
        assert_eq!(config.links.shared_media, LinkProfile::shared_media());
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(ScenarioConfig::from_json(r#"{"num_node_pairs": 0}"#).is_err());
        assert!(ScenarioConfig::from_json(r#"{"app_start_ms": 2000}"#).is_err());
        assert!(ScenarioConfig::from_json(r#"{"grid": {"width": 0}}"#).is_err());
        assert!(ScenarioConfig::from_json(r#"{"grid": {"delta_x": -1.0}}"#).is_err());
        assert!(ScenarioConfig::from_json("not json").is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"name": "from-disk", "qos": "gbr_conv_voice"}}"#).unwrap();
        let config = ScenarioConfig::from_file(file.path()).unwrap();
        assert_eq!(config.name, "from-disk");
        assert_eq!(config.qos, QosClass::GbrConvVoice);

        let missing = ScenarioConfig::from_file("/nonexistent/scenario.json");
        assert!(matches!(missing, Err(ConfigError::Io { .. })));
    }
}
