//! Catalogue of built-in scenario presets
//!
//! The composition engine implements each preset; this module only names
//! them so front ends can list and resolve them without building anything.

use crate::config::ScenarioConfig;

/// Name and description of a built-in scenario
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PresetInfo {
    pub name: &'static str,
    pub description: &'static str,
}

pub struct Presets;

impl Presets {
    pub const LTE_EPC: &'static str = "lte-epc";
    pub const HETNET: &'static str = "hetnet";
    pub const BRIDGED_LANS: &'static str = "bridged-lans";

    pub fn all() -> Vec<PresetInfo> {
        vec![
            PresetInfo {
                name: Self::LTE_EPC,
                description: "Cellular access with packet core, remote host and vehicular roadside segment",
            },
            PresetInfo {
                name: Self::HETNET,
                description: "Point-to-point backbone joining LAN, WLAN and cellular access",
            },
            PresetInfo {
                name: Self::BRIDGED_LANS,
                description: "Two shared-media LANs bridged by a dual-homed node",
            },
        ]
    }

    pub fn find(name: &str) -> Option<PresetInfo> {
        Self::all().into_iter().find(|p| p.name == name)
    }

    /// Default configuration for a preset, with the preset name filled in
    pub fn config(name: &str) -> Option<ScenarioConfig> {
        let info = Self::find(name)?;
        let mut config = ScenarioConfig {
            name: info.name.to_string(),
            ..ScenarioConfig::default()
        };
        if info.name == Self::HETNET {
            config.sim_time_ms = 20_000;
            config.app_start_ms = 1_000;
            config.inter_packet_interval_ms = 1_000;
        }
        if info.name == Self::BRIDGED_LANS {
            config.sim_time_ms = 10_000;
            config.app_start_ms = 1_000;
            config.inter_packet_interval_ms = 1_000;
            config.max_packets = 5;
        }
        Some(config)
    }
}
