//! Per-agent prosumer dispatch: model-predictive planning, real-time
//! reconciliation, and market bidding for households with controllable
//! assets.

pub mod agent;
pub mod assets;
pub mod cli;
/// TOML scenario configuration and presets.
pub mod config;
pub mod error;
pub mod forecast;
/// CSV export of simulation results.
pub mod io {
    pub mod export;
}
pub mod market;
/// Dispatch optimization: asset constraint blocks, planner, and real-time controller.
pub mod optimizer;
/// Synthetic measurement generators.
pub mod profiles;
/// Simulation engine, clock, and KPI modules.
pub mod sim;
pub mod state;
pub mod units;

pub use error::{DispatchError, Result};
