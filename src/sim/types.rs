//! Per-interval records produced by the simulation.

use std::fmt;

use serde::Serialize;

use crate::state::MeterReading;
use crate::units::Timestamp;

/// Complete record of one agent-interval.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntervalReport {
    pub agent_id: String,
    /// Start of the reconciled interval.
    pub interval: Timestamp,
    /// Grid power the agent was asked to hold (W, positive = export).
    pub target_grid_w: f64,
    /// Grid power actually realized (W).
    pub realized_grid_w: f64,
    pub deviation_above_w: f64,
    pub deviation_below_w: f64,
    /// Total storage SoC after the interval (Wh).
    pub storage_soc_wh: f64,
    /// Energy moved through storage during the interval (Wh).
    pub storage_throughput_wh: f64,
    /// Grid power planned for the interval that starts now (W).
    pub planned_grid_w: f64,
    pub positions: usize,
    pub accepted: usize,
    pub bid_energy_wh: f64,
    pub offer_energy_wh: f64,
    /// Cumulative meter readings after the interval.
    #[serde(skip)]
    pub meters: Vec<MeterReading>,
}

impl IntervalReport {
    /// Tracking error: `realized_grid_w - target_grid_w`.
    pub fn tracking_error_w(&self) -> f64 {
        self.realized_grid_w - self.target_grid_w
    }
}

impl fmt::Display for IntervalReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<10} t={:>10} | grid={:>8.1} W  target={:>8.1} W  err={:>7.1} W | \
             soc={:>8.1} Wh | plan={:>8.1} W | bids={:.0} Wh offers={:.0} Wh ({}/{})",
            self.agent_id,
            self.interval,
            self.realized_grid_w,
            self.target_grid_w,
            self.tracking_error_w(),
            self.storage_soc_wh,
            self.planned_grid_w,
            self.bid_energy_wh,
            self.offer_energy_wh,
            self.accepted,
            self.positions,
        )
    }
}

/// An agent-interval that failed and was skipped.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentFailure {
    pub agent_id: String,
    pub interval: Timestamp,
    pub error: String,
}

impl fmt::Display for AgentFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @ {}: {}", self.agent_id, self.interval, self.error)
    }
}

/// Everything a simulation run produced, in interval order.
#[derive(Debug, Clone, Default)]
pub struct SimulationOutcome {
    pub reports: Vec<IntervalReport>,
    pub failures: Vec<AgentFailure>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_display_does_not_panic() {
        let r = IntervalReport {
            agent_id: "house".into(),
            interval: 900,
            target_grid_w: -500.0,
            realized_grid_w: -520.0,
            deviation_above_w: 20.0,
            deviation_below_w: 0.0,
            storage_soc_wh: 3000.0,
            storage_throughput_wh: 125.0,
            planned_grid_w: -480.0,
            positions: 8,
            accepted: 8,
            bid_energy_wh: 960.0,
            offer_energy_wh: 0.0,
            meters: Vec::new(),
        };
        assert!((r.tracking_error_w() + 20.0).abs() < 1e-9);
        let s = format!("{r}");
        assert!(s.contains("house"));
    }
}
