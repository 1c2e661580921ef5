//! Scenario configuration data model and presets
//!
//! This crate provides the operator-facing parameters of a heterogeneous
//! network scenario: per-technology link profiles, QoS classes for cellular
//! bearers, mobility parameters and the catalogue of built-in presets. The
//! composition engine consumes these values at build time; nothing here is
//! mutable once a scenario is running.

pub mod config;
pub mod presets;
pub mod profile;
pub mod qos;

pub use config::{
    ConfigError, GridLayout, GridSpec, LinkProfiles, OutputSpec, ScenarioConfig, VelocitySpec,
};
pub use presets::{PresetInfo, Presets};
pub use profile::LinkProfile;
pub use qos::QosClass;
