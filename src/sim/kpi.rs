//! Post-hoc KPI computation from simulation results.

use std::collections::BTreeMap;
use std::fmt;

use super::types::SimulationOutcome;
use crate::units::interval_energy_wh;

/// Aggregate key performance indicators derived from a complete simulation run.
///
/// Computed post-hoc from the interval reports so that exported data and
/// reported metrics always agree.
#[derive(Debug, Clone, Default)]
pub struct KpiReport {
    /// Root-mean-square grid tracking error over all agent-intervals (W).
    pub rmse_tracking_w: f64,
    /// Mean absolute grid tracking error (W).
    pub mae_tracking_w: f64,
    /// Energy drawn from the grid by all agents (Wh).
    pub import_energy_wh: f64,
    /// Energy fed into the grid by all agents (Wh).
    pub export_energy_wh: f64,
    /// Largest import of a single agent in one interval (W, positive).
    pub peak_import_w: f64,
    /// Largest export of a single agent in one interval (W, positive).
    pub peak_export_w: f64,
    /// Largest summed import of the whole community in one interval (W, positive).
    pub peak_community_import_w: f64,
    /// Energy moved through storage (Wh).
    pub storage_throughput_wh: f64,
    pub positions_submitted: usize,
    pub positions_accepted: usize,
    pub failed_agent_intervals: usize,
}

impl KpiReport {
    /// Computes all KPIs from a finished run.
    pub fn from_outcome(outcome: &SimulationOutcome) -> Self {
        let reports = &outcome.reports;
        let mut kpi = Self {
            failed_agent_intervals: outcome.failures.len(),
            ..Self::default()
        };
        if reports.is_empty() {
            return kpi;
        }

        let n = reports.len() as f64;
        let mut sq_sum = 0.0_f64;
        let mut abs_sum = 0.0_f64;
        let mut community: BTreeMap<i64, f64> = BTreeMap::new();

        for r in reports {
            let err = r.tracking_error_w();
            sq_sum += err * err;
            abs_sum += err.abs();

            let grid = r.realized_grid_w;
            kpi.export_energy_wh += interval_energy_wh(grid.max(0.0));
            kpi.import_energy_wh += interval_energy_wh((-grid).max(0.0));
            kpi.peak_export_w = kpi.peak_export_w.max(grid);
            kpi.peak_import_w = kpi.peak_import_w.max(-grid);
            *community.entry(r.interval).or_default() += grid;

            kpi.storage_throughput_wh += r.storage_throughput_wh;
            kpi.positions_submitted += r.positions;
            kpi.positions_accepted += r.accepted;
        }

        kpi.rmse_tracking_w = (sq_sum / n).sqrt();
        kpi.mae_tracking_w = abs_sum / n;
        kpi.peak_community_import_w = community.values().fold(0.0_f64, |peak, w| peak.max(-w));
        kpi
    }
}

impl fmt::Display for KpiReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "--- KPI Report ---")?;
        writeln!(f, "RMSE tracking error:   {:.1} W", self.rmse_tracking_w)?;
        writeln!(f, "MAE tracking error:    {:.1} W", self.mae_tracking_w)?;
        writeln!(
            f,
            "Grid energy:           {:.2} kWh imported, {:.2} kWh exported",
            self.import_energy_wh / 1000.0,
            self.export_energy_wh / 1000.0
        )?;
        writeln!(f, "Peak import:           {:.1} W", self.peak_import_w)?;
        writeln!(f, "Peak export:           {:.1} W", self.peak_export_w)?;
        writeln!(f, "Peak community import: {:.1} W", self.peak_community_import_w)?;
        writeln!(
            f,
            "Storage throughput:    {:.2} kWh",
            self.storage_throughput_wh / 1000.0
        )?;
        writeln!(
            f,
            "Market positions:      {} submitted, {} accepted",
            self.positions_submitted, self.positions_accepted
        )?;
        write!(f, "Failed agent-intervals: {}", self.failed_agent_intervals)
    }
}
