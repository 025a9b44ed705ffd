//! Command-line arguments.

use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "prosumer-dispatch")]
#[command(author, version, about = "Per-agent prosumer dispatch simulator")]
#[command(
    after_help = "If neither --scenario nor --preset is given, the baseline preset is used.\n\
                  Log verbosity follows RUST_LOG (default: info)."
)]
pub struct Cli {
    /// Load scenario from a TOML file
    #[arg(long, value_name = "PATH", conflicts_with = "preset")]
    pub scenario: Option<PathBuf>,

    /// Use a built-in preset (baseline, storage_heavy)
    #[arg(long, value_name = "NAME")]
    pub preset: Option<String>,

    /// Override the scenario's random seed
    #[arg(long)]
    pub seed: Option<u64>,

    /// Override the number of simulated intervals
    #[arg(long)]
    pub intervals: Option<usize>,

    /// Step agents one after another instead of on threads
    #[arg(long, default_value_t = false)]
    pub sequential: bool,

    /// Read measurements from CSV (timestamp,series,signal,value) instead of
    /// generating them
    #[arg(long, value_name = "PATH")]
    pub history: Option<PathBuf>,

    /// Export interval reports to CSV
    #[arg(long, value_name = "PATH")]
    pub report_out: Option<PathBuf>,

    /// Export cumulative meter readings to CSV
    #[arg(long, value_name = "PATH")]
    pub meters_out: Option<PathBuf>,

    /// Resume agents from `<agent id>.json` files in this directory
    #[arg(long, value_name = "DIR")]
    pub state_in: Option<PathBuf>,

    /// Write each agent's final state as JSON into this directory
    #[arg(long, value_name = "DIR")]
    pub state_out: Option<PathBuf>,

    /// Do not print per-interval reports
    #[arg(long, short, default_value_t = false)]
    pub quiet: bool,
}
