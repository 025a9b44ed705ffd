//! Per-agent memory carried between intervals.
//!
//! The store is the only thing that survives from one interval to the next:
//! committed SoC, cumulative meters, the last plan, and the forecast snapshot
//! that plan was built from. Agents mutate a staged clone and swap it in once
//! the whole interval succeeded, so a failure never leaves a partial commit.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::assets::AgentAssets;
use crate::error::{DispatchError, Result};
use crate::forecast::ForecastTable;
use crate::optimizer::plan::{DispatchPlan, IntervalDispatch};
use crate::units::{Timestamp, interval_energy_wh};

/// Meter id used for the agent's grid connection point.
pub const GRID_METER: &str = "grid";

/// Energy through one meter. Interval deltas from the controller,
/// cumulative totals once recorded in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeterReading {
    pub timestamp: Timestamp,
    pub meter_id: String,
    /// Energy drawn (consumption, import) in Wh.
    pub energy_in_wh: f64,
    /// Energy delivered (output, export) in Wh.
    pub energy_out_wh: f64,
}

impl MeterReading {
    /// Splits one interval of signed average power into in/out energy.
    pub fn from_power(timestamp: Timestamp, meter_id: &str, power_w: f64) -> Self {
        let energy = interval_energy_wh(power_w);
        Self {
            timestamp,
            meter_id: meter_id.to_string(),
            energy_in_wh: (-energy).max(0.0),
            energy_out_wh: energy.max(0.0),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MeterTotals {
    pub energy_in_wh: f64,
    pub energy_out_wh: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateStore {
    soc_wh: BTreeMap<String, f64>,
    meters: BTreeMap<String, MeterTotals>,
    last_dispatch_w: BTreeMap<String, f64>,
    plan: Option<DispatchPlan>,
    forecast: Option<ForecastTable>,
}

impl StateStore {
    /// Seeds SoC for every storage asset from its initial value.
    pub fn for_assets(assets: &AgentAssets) -> Self {
        Self {
            soc_wh: assets
                .storage()
                .map(|a| (a.id.clone(), a.initial_soc()))
                .collect(),
            ..Self::default()
        }
    }

    /// Committed SoC of a storage asset.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Config`] for ids that carry no SoC.
    pub fn get_soc(&self, asset_id: &str) -> Result<f64> {
        self.soc_wh
            .get(asset_id)
            .copied()
            .ok_or_else(|| DispatchError::config(format!("no state of charge for {asset_id}")))
    }

    /// Overwrites the committed SoC after a reconciliation.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Config`] for unknown ids or non-finite /
    /// negative values.
    pub fn commit_soc(&mut self, asset_id: &str, soc_wh: f64) -> Result<()> {
        if !(soc_wh.is_finite() && soc_wh >= 0.0) {
            return Err(DispatchError::config(format!(
                "refusing to commit SoC {soc_wh} for {asset_id}"
            )));
        }
        let slot = self
            .soc_wh
            .get_mut(asset_id)
            .ok_or_else(|| DispatchError::config(format!("no state of charge for {asset_id}")))?;
        *slot = soc_wh;
        Ok(())
    }

    /// SoC trajectory a plan projects for one asset. Does not commit anything.
    pub fn project_soc(&self, asset_id: &str, plan: &DispatchPlan) -> Vec<(Timestamp, f64)> {
        plan.intervals
            .iter()
            .filter_map(|i| i.soc_wh.get(asset_id).map(|soc| (i.timestamp, *soc)))
            .collect()
    }

    /// Planned dispatch for `ts` from the last stored plan.
    pub fn target_for(&self, ts: Timestamp) -> Option<&IntervalDispatch> {
        self.plan.as_ref().and_then(|p| p.interval(ts))
    }

    pub fn last_plan(&self) -> Option<&DispatchPlan> {
        self.plan.as_ref()
    }

    pub fn set_plan(&mut self, plan: DispatchPlan) {
        self.plan = Some(plan);
    }

    pub fn forecast_snapshot(&self) -> Option<&ForecastTable> {
        self.forecast.as_ref()
    }

    pub fn set_forecast(&mut self, table: ForecastTable) {
        self.forecast = Some(table);
    }

    pub fn last_dispatch(&self, asset_id: &str) -> Option<f64> {
        self.last_dispatch_w.get(asset_id).copied()
    }

    pub fn set_last_dispatch(&mut self, powers: &BTreeMap<String, f64>) {
        self.last_dispatch_w = powers.clone();
    }

    /// Adds interval deltas to the running totals and returns the new
    /// cumulative readings in the same order.
    pub fn record_meters(&mut self, deltas: &[MeterReading]) -> Vec<MeterReading> {
        deltas
            .iter()
            .map(|d| {
                let totals = self.meters.entry(d.meter_id.clone()).or_default();
                totals.energy_in_wh += d.energy_in_wh;
                totals.energy_out_wh += d.energy_out_wh;
                MeterReading {
                    timestamp: d.timestamp,
                    meter_id: d.meter_id.clone(),
                    energy_in_wh: totals.energy_in_wh,
                    energy_out_wh: totals.energy_out_wh,
                }
            })
            .collect()
    }

    pub fn meter_totals(&self, meter_id: &str) -> Option<MeterTotals> {
        self.meters.get(meter_id).copied()
    }

    /// Total committed SoC across all storage assets.
    pub fn total_soc(&self) -> f64 {
        self.soc_wh.values().sum()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Writes the store as pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Io`] or [`DispatchError::Json`].
    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }

    /// Reads a store written by [`StateStore::save`].
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Io`] or [`DispatchError::Json`].
    pub fn load(path: &Path) -> Result<Self> {
        Self::from_json(&fs::read_to_string(path)?)
    }
}
