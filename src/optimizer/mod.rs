//! Dispatch optimization: real-time reconciliation and rolling-horizon planning.

pub mod blocks;
pub mod mpc;
pub mod plan;
pub mod problem;
pub mod rtc;

use std::time::Duration;

use serde::Deserialize;

pub use mpc::PredictiveController;
pub use plan::{DispatchPlan, IntervalDispatch};
pub use rtc::{RealTimeController, RtcOutcome, RtcTargets};

/// Upper bound accepted for the big-M constant.
pub const MAX_BIG_M: f64 = 1e7;

/// Cost in currency per kWh charged for EV energy the plan leaves unserved,
/// either missing at departure or missing for a trip.
pub const SOC_SHORTFALL_PENALTY_PER_KWH: f64 = 10.0;

/// Objective weights of the real-time controller.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RtcWeights {
    /// Weight on grid deviation in either direction.
    pub grid: f64,
    /// Weight on battery deviation below its committed target.
    pub battery: f64,
    /// Weight on EV deviation below its committed target.
    pub ev: f64,
}

impl Default for RtcWeights {
    fn default() -> Self {
        Self {
            grid: 0.5,
            battery: 0.1,
            ev: 1.0,
        }
    }
}

/// Solver and policy parameters shared by both controllers.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OptimizerSettings {
    /// Planning horizon in intervals.
    pub mpc_horizon: usize,
    /// Constant scaling the binary charge/discharge and import/export
    /// exclusions. Must dominate every power it bounds.
    pub big_m: f64,
    /// Wall-clock budget per solve.
    pub solver_timeout_ms: u64,
    pub rtc_weights: RtcWeights,
}

impl Default for OptimizerSettings {
    fn default() -> Self {
        Self {
            mpc_horizon: 16,
            big_m: 1e5,
            solver_timeout_ms: 10_000,
            rtc_weights: RtcWeights::default(),
        }
    }
}

impl OptimizerSettings {
    pub fn solver_timeout(&self) -> Duration {
        Duration::from_millis(self.solver_timeout_ms)
    }
}
