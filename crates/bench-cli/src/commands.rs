//! CLI command implementations
//!
//! Kept apart from main.rs so the configuration handling can be unit tested.

use crate::{OutputArgs, Overrides};
use anyhow::{Context, Result};
use hetnet::presets;
use hetnet::{ReachabilityPolicy, Scenario};
use scenarios::{Presets, ScenarioConfig};
use std::path::Path;
use tracing::{info, warn};

/// Implementation of the 'list' command
pub fn cmd_list() -> Result<()> {
    println!("Available presets:");
    println!("==================");
    for preset in Presets::all() {
        println!("  {:<14} - {}", preset.name, preset.description);
    }
    println!("\nA JSON scenario file may be given instead of a preset name.");
    Ok(())
}

/// Implementation of the 'validate' command
pub fn cmd_validate(scenario: &str, overrides: &Overrides) -> Result<()> {
    let config = resolve_config(scenario, overrides)?;
    let built = build(&config, overrides)?;
    let t = built.topology();
    println!("Scenario '{}' is valid", built.name());
    println!("  nodes:        {}", t.nodes().len());
    println!("  segments:     {}", t.fabric().segments().len());
    println!("  applications: {}", built.traffic().apps().len());
    println!("  bearers:      {}", t.cellular().bearers().len());
    println!("  stop time:    {}", built.stop_time());
    for flow in built.unreachable() {
        println!("  unreachable:  {} -> {} ({})", flow.app, flow.destination, flow.reason);
    }
    for node in built.stranded() {
        println!("  stranded:     {} -> {} ({})", node.node, node.destination, node.reason);
    }
    Ok(())
}

/// Implementation of the 'run' command
pub fn cmd_run(scenario: &str, overrides: &Overrides, output: &OutputArgs) -> Result<()> {
    let mut config = resolve_config(scenario, overrides)?;
    if let Some(path) = &output.trace {
        config.output.trace_path = Some(path.clone());
    }
    if let Some(dir) = &output.pcap_dir {
        config.output.pcap_dir = Some(dir.clone());
    }

    info!("Running scenario: {}", config.name);
    let built = build(&config, overrides)?;
    let report = built
        .run_default()
        .with_context(|| format!("Scenario '{}' failed", config.name))?;

    if output.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", report);
    }
    if let Some(path) = built.trace_path() {
        info!("Trace written to {}", path.display());
    }
    if let Some(dir) = built.pcap_dir() {
        info!("Captures written to {}", dir.display());
    }
    Ok(())
}

fn build(config: &ScenarioConfig, overrides: &Overrides) -> Result<Scenario> {
    let mut builder = presets::from_config(config)
        .with_context(|| format!("Failed to compose scenario '{}'", config.name))?;
    if overrides.warn_unreachable {
        builder.reachability(ReachabilityPolicy::Warn);
    }
    let scenario = builder
        .build()
        .with_context(|| format!("Scenario '{}' failed validation", config.name))?;
    for flow in scenario.unreachable() {
        warn!("{} -> {} will deliver nothing: {}", flow.app, flow.destination, flow.reason);
    }
    for node in scenario.stranded() {
        warn!("{} is cut off from the packet core: {}", node.node, node.reason);
    }
    Ok(scenario)
}

/// Load a preset or a JSON file and apply command-line overrides
pub fn resolve_config(scenario: &str, overrides: &Overrides) -> Result<ScenarioConfig> {
    let mut config = match Presets::config(scenario) {
        Some(config) => config,
        None => {
            let path = Path::new(scenario);
            if !path.exists() {
                anyhow::bail!(
                    "Scenario '{}' is neither a preset nor a file. Use 'list' to see presets.",
                    scenario
                );
            }
            ScenarioConfig::from_file(path)
                .with_context(|| format!("Failed to load {}", path.display()))?
        }
    };
    apply_overrides(&mut config, overrides);
    config.validate()?;
    Ok(config)
}

fn apply_overrides(config: &mut ScenarioConfig, overrides: &Overrides) {
    if let Some(ms) = overrides.sim_time_ms {
        config.sim_time_ms = ms;
    }
    if let Some(ms) = overrides.interval_ms {
        config.inter_packet_interval_ms = ms;
    }
    if let Some(pairs) = overrides.num_node_pairs {
        config.num_node_pairs = pairs;
    }
    if let Some(qos) = overrides.qos {
        config.qos = qos;
    }
    config.use_ca |= overrides.use_ca;
    config.disable_dl |= overrides.disable_dl;
    config.disable_ul |= overrides.disable_ul;
    config.disable_pl |= overrides.disable_pl;
}
