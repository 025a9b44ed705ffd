//! Real-time controller: reconciles the interval that just elapsed.
//!
//! Given what the assets actually could do during the elapsed interval and
//! the grid power committed for it, the controller picks realized asset
//! powers that track the commitment as closely as possible. The result is
//! what gets metered and what the committed SoC advances by.

use std::collections::BTreeMap;

use good_lp::{Expression, constraint};
use tracing::debug;

use super::OptimizerSettings;
use super::blocks::{AssetBlock, limit_non_grid_charging, rated_w};
use super::plan::IntervalDispatch;
use super::problem::Model;
use crate::assets::{AgentAssets, Capability};
use crate::error::{DispatchError, Result};
use crate::forecast::{ForecastTable, Signal};
use crate::state::{GRID_METER, MeterReading, StateStore};
use crate::units::Timestamp;

/// Commitments the elapsed interval is reconciled against.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RtcTargets {
    /// Committed grid power (positive = export).
    pub grid_w: f64,
    /// Committed net power per storage asset. Absent ids track zero.
    pub storage_w: BTreeMap<String, f64>,
}

impl RtcTargets {
    /// Takes both grid and storage targets from a planned interval. No plan
    /// means everything tracks zero.
    pub fn from_plan(planned: Option<&IntervalDispatch>) -> Self {
        planned
            .map(|p| Self {
                grid_w: p.grid_w,
                storage_w: p.assets.clone(),
            })
            .unwrap_or_default()
    }

    fn storage(&self, asset_id: &str) -> f64 {
        self.storage_w.get(asset_id).copied().unwrap_or(0.0)
    }
}

/// Realized dispatch of the elapsed interval.
#[derive(Debug, Clone, PartialEq)]
pub struct RtcOutcome {
    pub interval: Timestamp,
    /// Realized signed power per asset.
    pub powers_w: BTreeMap<String, f64>,
    /// Realized grid power, the sum of all asset powers.
    pub grid_w: f64,
    pub target_grid_w: f64,
    /// Grid power fell short of the target by this much.
    pub deviation_above_w: f64,
    /// Grid power exceeded the target by this much.
    pub deviation_below_w: f64,
    /// Interval-end SoC per storage asset, within `[0, capacity]`.
    pub soc_wh: BTreeMap<String, f64>,
    /// Interval energy per asset meter plus the grid meter.
    pub meter_deltas: Vec<MeterReading>,
}

impl RtcOutcome {
    fn finish(
        interval: Timestamp,
        powers_w: BTreeMap<String, f64>,
        target_grid_w: f64,
        soc_wh: BTreeMap<String, f64>,
    ) -> Self {
        let grid_w: f64 = powers_w.values().sum();
        let error = grid_w - target_grid_w;
        let mut meter_deltas: Vec<MeterReading> = powers_w
            .iter()
            .map(|(id, w)| MeterReading::from_power(interval, id, *w))
            .collect();
        meter_deltas.push(MeterReading::from_power(interval, GRID_METER, grid_w));
        Self {
            interval,
            powers_w,
            grid_w,
            target_grid_w,
            deviation_above_w: (-error).max(0.0),
            deviation_below_w: error.max(0.0),
            soc_wh,
            meter_deltas,
        }
    }

    /// Commits SoC into `state`.
    ///
    /// # Errors
    ///
    /// Propagates [`StateStore::commit_soc`] failures.
    pub fn commit(&self, state: &mut StateStore) -> Result<()> {
        for (id, soc) in &self.soc_wh {
            state.commit_soc(id, *soc)?;
        }
        state.set_last_dispatch(&self.powers_w);
        Ok(())
    }
}

pub struct RealTimeController<'a> {
    settings: &'a OptimizerSettings,
}

impl<'a> RealTimeController<'a> {
    pub fn new(settings: &'a OptimizerSettings) -> Self {
        Self { settings }
    }

    /// Reconciles the single interval covered by `actual`.
    ///
    /// `actual` must start at the elapsed interval and hold its measured
    /// load, generation ceilings, and EV availability and distance.
    ///
    /// # Errors
    ///
    /// - [`DispatchError::Config`] if `actual` does not span exactly one interval.
    /// - [`DispatchError::MissingForecast`] for absent series.
    /// - Solver errors from [`Model::solve`]; `state` is only read.
    pub fn reconcile(
        &self,
        assets: &AgentAssets,
        actual: &ForecastTable,
        targets: &RtcTargets,
        state: &StateStore,
    ) -> Result<RtcOutcome> {
        if actual.horizon() != 1 {
            return Err(DispatchError::config(format!(
                "reconciliation needs exactly one interval, got {}",
                actual.horizon()
            )));
        }
        let interval = actual.start();

        if assets.is_fixed_load_only() {
            let mut powers = BTreeMap::new();
            for asset in assets.iter() {
                let load = actual.value(&asset.id, Signal::Power, 0)?;
                powers.insert(asset.id.clone(), -rated_w(asset, load.abs()));
            }
            return Ok(RtcOutcome::finish(interval, powers, targets.grid_w, BTreeMap::new()));
        }

        let weights = self.settings.rtc_weights;
        let mut model = Model::new(format!("rtc@{interval}"));
        let mut blocks = Vec::new();
        for asset in assets.iter() {
            let soc = if asset.kind.is_storage() {
                state.get_soc(&asset.id)?
            } else {
                0.0
            };
            blocks.push(AssetBlock::build(
                &mut model,
                asset,
                actual,
                soc,
                self.settings.big_m,
            )?);
        }
        limit_non_grid_charging(&mut model, &blocks, 0);

        // storage tracking: discharge - charge = target - above + below
        for (block, asset) in blocks.iter().zip(assets.iter()) {
            let Some(s) = block.storage() else { continue };
            let above = model.non_negative();
            let below = model.non_negative();
            let weight = match asset.kind.capability() {
                Capability::MobileStorage => weights.ev,
                _ => weights.battery,
            };
            model.constrain(constraint!(
                s.discharge[0] - s.charge[0] + above - below == targets.storage(&asset.id)
            ));
            model.add_cost(below * weight);
        }

        let above = model.non_negative();
        let below = model.non_negative();
        let mut balance = Expression::default();
        let mut fixed = 0.0;
        for block in &blocks {
            let (expr, constant) = block.power(0);
            balance += expr;
            fixed += constant;
        }
        model.constrain(constraint!(balance + above - below == targets.grid_w - fixed));
        model.add_cost(above * weights.grid + below * weights.grid);

        let values = model.solve(self.settings.solver_timeout())?;

        let mut powers = BTreeMap::new();
        let mut soc = BTreeMap::new();
        for block in &blocks {
            powers.insert(block.id.clone(), block.realized(&values, 0));
            if let Some(s) = block.soc(&values, 0) {
                soc.insert(block.id.clone(), s);
            }
        }
        let outcome = RtcOutcome::finish(interval, powers, targets.grid_w, soc);
        debug!(
            interval,
            grid_w = outcome.grid_w,
            target_w = targets.grid_w,
            "reconciled"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::{Asset, AssetKind};

    fn actual(load_w: f64, pv_w: f64) -> ForecastTable {
        let mut t = ForecastTable::new(900, 1);
        t.insert("load", Signal::Power, vec![load_w]);
        t.insert("pv", Signal::Power, vec![pv_w]);
        t.insert("ev", Signal::Availability, vec![0.0]);
        t.insert("ev", Signal::DistanceDriven, vec![0.0]);
        t
    }

    fn battery() -> Asset {
        Asset::new("bat", AssetKind::Battery, 5000.0).with_storage(10_000.0, 0.95, 0.95)
    }

    #[test]
    fn fixed_load_passes_through() {
        let assets = AgentAssets::new(vec![Asset::new("load", AssetKind::Load, 5000.0)]).unwrap();
        let state = StateStore::for_assets(&assets);
        let settings = OptimizerSettings::default();
        let out = RealTimeController::new(&settings)
            .reconcile(&assets, &actual(1234.0, 0.0), &RtcTargets::default(), &state)
            .unwrap();
        assert_eq!(out.powers_w["load"], -1234.0);
        assert_eq!(out.grid_w, -1234.0);
        assert!((out.deviation_above_w - 1234.0).abs() < 1e-9);
        assert_eq!(out.deviation_below_w, 0.0);
    }

    #[test]
    fn discharge_follows_commitment() {
        let assets = AgentAssets::new(vec![
            Asset::new("load", AssetKind::Load, 5000.0),
            battery(),
        ])
        .unwrap();
        let state = StateStore::for_assets(&assets);
        let settings = OptimizerSettings::default();
        let targets = RtcTargets {
            grid_w: 0.0,
            storage_w: BTreeMap::from([("bat".to_string(), 2000.0)]),
        };
        let out = RealTimeController::new(&settings)
            .reconcile(&assets, &actual(2000.0, 0.0), &targets, &state)
            .unwrap();
        assert!((out.powers_w["bat"] - 2000.0).abs() < 1e-4);
        assert!((out.soc_wh["bat"] - 4473.684).abs() < 1e-2);
        assert!(out.deviation_above_w.abs() < 1e-4);
        assert!(out.deviation_below_w.abs() < 1e-4);
    }

    #[test]
    fn pv_only_battery_cannot_charge_without_sun() {
        let assets = AgentAssets::new(vec![
            Asset::new("load", AssetKind::Load, 5000.0),
            Asset::new("pv", AssetKind::Pv, 5000.0),
            battery(),
        ])
        .unwrap();
        let state = StateStore::for_assets(&assets);
        let settings = OptimizerSettings::default();
        // committed to importing 3 kW into the battery
        let targets = RtcTargets {
            grid_w: -3000.0,
            storage_w: BTreeMap::from([("bat".to_string(), -3000.0)]),
        };
        let out = RealTimeController::new(&settings)
            .reconcile(&assets, &actual(0.0, 0.0), &targets, &state)
            .unwrap();
        assert!(out.powers_w["bat"] >= -1e-6, "battery charged from grid");
        assert!(out.soc_wh["bat"] <= 5000.0 + 1e-6);
    }

    #[test]
    fn grid_chargeable_battery_charges_on_commitment() {
        let mut bat = battery();
        bat.charge_from_grid = true;
        let assets = AgentAssets::new(vec![Asset::new("load", AssetKind::Load, 5000.0), bat]).unwrap();
        let state = StateStore::for_assets(&assets);
        let settings = OptimizerSettings::default();
        let targets = RtcTargets {
            grid_w: -3000.0,
            storage_w: BTreeMap::from([("bat".to_string(), -3000.0)]),
        };
        let out = RealTimeController::new(&settings)
            .reconcile(&assets, &actual(0.0, 0.0), &targets, &state)
            .unwrap();
        assert!((out.powers_w["bat"] + 3000.0).abs() < 1e-4);
        assert!((out.soc_wh["bat"] - (5000.0 + 0.25 * 3000.0 * 0.95)).abs() < 1e-2);
    }

    #[test]
    fn full_battery_cannot_charge() {
        let mut bat = battery();
        bat.charge_from_grid = true;
        let assets = AgentAssets::new(vec![Asset::new("load", AssetKind::Load, 5000.0), bat]).unwrap();
        let mut state = StateStore::for_assets(&assets);
        state.commit_soc("bat", 10_000.0).unwrap();
        let settings = OptimizerSettings::default();
        let targets = RtcTargets {
            grid_w: -3000.0,
            storage_w: BTreeMap::from([("bat".to_string(), -3000.0)]),
        };
        let out = RealTimeController::new(&settings)
            .reconcile(&assets, &actual(0.0, 0.0), &targets, &state)
            .unwrap();
        assert!(out.powers_w["bat"].abs() < 1e-4);
        assert!((out.soc_wh["bat"] - 10_000.0).abs() < 1e-4);
        assert!((out.deviation_below_w - 3000.0).abs() < 1e-4);
    }

    #[test]
    fn empty_battery_cannot_discharge() {
        let assets = AgentAssets::new(vec![
            Asset::new("load", AssetKind::Load, 5000.0),
            battery(),
        ])
        .unwrap();
        let mut state = StateStore::for_assets(&assets);
        state.commit_soc("bat", 0.0).unwrap();
        let settings = OptimizerSettings::default();
        let targets = RtcTargets {
            grid_w: 3000.0,
            storage_w: BTreeMap::from([("bat".to_string(), 3000.0)]),
        };
        let out = RealTimeController::new(&settings)
            .reconcile(&assets, &actual(0.0, 0.0), &targets, &state)
            .unwrap();
        assert!(out.powers_w["bat"].abs() < 1e-4);
        assert!(out.soc_wh["bat"].abs() < 1e-4);
        assert!((out.deviation_above_w - 3000.0).abs() < 1e-4);
    }

    #[test]
    fn unplugged_ev_only_drains_by_driving() {
        let mut ev = Asset::new("ev", AssetKind::Ev, 11_000.0).with_storage(40_000.0, 0.9, 0.9);
        ev.v2g = true;
        ev.consumption_wh_per_100km = 15_000.0;
        let assets = AgentAssets::new(vec![Asset::new("load", AssetKind::Load, 5000.0), ev]).unwrap();
        let mut state = StateStore::for_assets(&assets);
        state.commit_soc("ev", 20_000.0).unwrap();
        let mut table = actual(0.0, 0.0);
        table.insert("ev", Signal::DistanceDriven, vec![10.0]);
        let settings = OptimizerSettings::default();
        let targets = RtcTargets {
            grid_w: 2000.0,
            storage_w: BTreeMap::from([("ev".to_string(), 2000.0)]),
        };
        let out = RealTimeController::new(&settings)
            .reconcile(&assets, &table, &targets, &state)
            .unwrap();
        assert!(out.powers_w["ev"].abs() < 1e-4);
        assert!((out.soc_wh["ev"] - 18_500.0).abs() < 1e-4);
        assert!((out.deviation_above_w - 2000.0).abs() < 1e-4);
    }

    #[test]
    fn rejects_multi_interval_table() {
        let assets = AgentAssets::new(vec![Asset::new("load", AssetKind::Load, 5000.0)]).unwrap();
        let state = StateStore::for_assets(&assets);
        let settings = OptimizerSettings::default();
        let table = ForecastTable::new(0, 2);
        let result =
            RealTimeController::new(&settings).reconcile(&assets, &table, &RtcTargets::default(), &state);
        assert!(matches!(result, Err(DispatchError::Config(_))));
    }
}
