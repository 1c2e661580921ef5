//! Heterogeneous network scenario CLI
//!
//! Lists the built-in presets, validates a scenario without running it, and
//! runs a scenario to completion printing its report.

mod commands;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use commands::{cmd_list, cmd_run, cmd_validate};
use scenarios::QosClass;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List available presets
    List,

    /// Build a scenario and check it without running
    Validate {
        /// Scenario file path (JSON) or preset name
        scenario: String,

        #[command(flatten)]
        overrides: Overrides,
    },

    /// Run a scenario from file or preset and print its report
    Run {
        /// Scenario file path (JSON) or preset name
        scenario: String,

        #[command(flatten)]
        overrides: Overrides,

        #[command(flatten)]
        output: OutputArgs,
    },
}

/// Values that replace the preset or file configuration
#[derive(Args, Debug, Default, Clone)]
pub struct Overrides {
    /// Total simulated time in milliseconds
    #[arg(long)]
    pub sim_time_ms: Option<u64>,

    /// Packet interval in milliseconds
    #[arg(long)]
    pub interval_ms: Option<u64>,

    /// Number of base station / mobile pairs
    #[arg(long)]
    pub num_node_pairs: Option<u16>,

    /// Enable carrier aggregation
    #[arg(long)]
    pub use_ca: bool,

    /// Disable downlink traffic
    #[arg(long)]
    pub disable_dl: bool,

    /// Disable uplink traffic
    #[arg(long)]
    pub disable_ul: bool,

    /// Disable peer traffic
    #[arg(long)]
    pub disable_pl: bool,

    /// Bearer QoS class, by name or QCI
    #[arg(long)]
    pub qos: Option<QosClass>,

    /// Log unreachable flows and stranded nodes instead of failing the build
    #[arg(long)]
    pub warn_unreachable: bool,
}

#[derive(Args, Debug, Default, Clone)]
pub struct OutputArgs {
    /// Write a JSON-lines trace to this file
    #[arg(long)]
    pub trace: Option<PathBuf>,

    /// Write per-device pcap files into this directory
    #[arg(long)]
    pub pcap_dir: Option<PathBuf>,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::List => {
            cmd_list()?;
        }
        Commands::Validate {
            scenario,
            overrides,
        } => {
            cmd_validate(&scenario, &overrides)?;
        }
        Commands::Run {
            scenario,
            overrides,
            output,
        } => {
            cmd_run(&scenario, &overrides, &output)?;
        }
    }

    Ok(())
}
