//! Model-predictive controller: cost-minimal dispatch over the planning horizon.

use std::collections::BTreeMap;

use good_lp::{Expression, constraint};
use tracing::{debug, warn};

use super::blocks::{AssetBlock, limit_non_grid_charging, rated_w};
use super::plan::{DispatchPlan, IntervalDispatch};
use super::problem::Model;
use super::{OptimizerSettings, SOC_SHORTFALL_PENALTY_PER_KWH};
use crate::assets::storage::{departure_targets, soc_floors};
use crate::assets::{AgentAssets, Capability};
use crate::error::{DispatchError, Result};
use crate::forecast::{ForecastTable, MARKET_SERIES, Signal};
use crate::state::StateStore;
use crate::units::HOURS_PER_INTERVAL;

/// Converts W held for one interval, priced per kWh, into currency.
const ENERGY_COST_SCALE: f64 = HOURS_PER_INTERVAL / 1000.0;

/// Shortfall below a departure target that is worth a warning, in Wh.
const SHORTFALL_REPORT_WH: f64 = 1.0;

pub struct PredictiveController<'a> {
    settings: &'a OptimizerSettings,
}

struct DepartureSlack {
    asset_id: String,
    index: usize,
    target_wh: f64,
    slack: good_lp::Variable,
}

impl<'a> PredictiveController<'a> {
    pub fn new(settings: &'a OptimizerSettings) -> Self {
        Self { settings }
    }

    /// Plans every interval of `table`, anchoring storage at the committed SoC.
    ///
    /// Nothing is written to `state`; the caller stores the plan.
    ///
    /// # Errors
    ///
    /// - [`DispatchError::Config`] for an empty table.
    /// - [`DispatchError::MissingForecast`] for absent asset or market series.
    /// - Solver errors from [`Model::solve`].
    pub fn plan(
        &self,
        assets: &AgentAssets,
        table: &ForecastTable,
        state: &StateStore,
    ) -> Result<DispatchPlan> {
        let horizon = table.horizon();
        if horizon == 0 {
            return Err(DispatchError::config("planning horizon must be > 0"));
        }
        if assets.is_fixed_load_only() {
            return fixed_load_plan(assets, table);
        }

        let price = table.values(MARKET_SERIES, Signal::Price)?;
        let levies_pos = table.values(MARKET_SERIES, Signal::LeviesPositive)?;
        let levies_neg = table.values(MARKET_SERIES, Signal::LeviesNegative)?;
        let big_m = self.settings.big_m;
        let penalty = SOC_SHORTFALL_PENALTY_PER_KWH / 1000.0;

        let mut model = Model::new(format!("mpc@{}", table.start()));
        let mut blocks = Vec::new();
        let mut floors: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        let mut departures = Vec::new();

        for asset in assets.iter() {
            let soc_now = if asset.kind.is_storage() {
                state.get_soc(&asset.id)?
            } else {
                0.0
            };
            let block = AssetBlock::build(&mut model, asset, table, soc_now, big_m)?;

            if asset.kind.capability() == Capability::MobileStorage {
                let availability = table.values(&asset.id, Signal::Availability)?;
                let distance = table.values(&asset.id, Signal::DistanceDriven)?;
                let targets = departure_targets(asset, soc_now, availability, distance);
                if let Some(s) = block.storage() {
                    for (index, target) in targets.iter().enumerate() {
                        let Some(target_wh) = *target else { continue };
                        let slack = model.bounded(0.0, target_wh);
                        let soc = s.soc[index];
                        model.constrain(constraint!(soc + slack >= target_wh));
                        model.add_cost(slack * penalty);
                        departures.push(DepartureSlack {
                            asset_id: asset.id.clone(),
                            index,
                            target_wh,
                            slack,
                        });
                    }
                }
                floors.insert(asset.id.clone(), soc_floors(asset, &targets));
            }
            blocks.push(block);
        }

        let mut export = Vec::with_capacity(horizon);
        let mut import = Vec::with_capacity(horizon);
        for t in 0..horizon {
            limit_non_grid_charging(&mut model, &blocks, t);

            let out = model.bounded(0.0, big_m);
            let inp = model.bounded(0.0, big_m);
            let exporting = model.binary();
            model.constrain(constraint!(out - exporting * big_m <= 0.0));
            model.constrain(constraint!(inp + exporting * big_m <= big_m));

            let mut balance = Expression::default();
            let mut fixed = 0.0;
            for block in &blocks {
                let (expr, constant) = block.power(t);
                balance += expr;
                fixed += constant;
            }
            model.constrain(constraint!(balance - out + inp == -fixed));

            let export_value = (levies_pos[t] - price[t]) * ENERGY_COST_SCALE;
            let import_cost = (price[t] + levies_neg[t]) * ENERGY_COST_SCALE;
            model.add_cost(out * export_value + inp * import_cost);

            export.push(out);
            import.push(inp);
        }

        let values = model.solve(self.settings.solver_timeout())?;

        for d in &departures {
            let short = values.get(d.slack);
            if short > SHORTFALL_REPORT_WH {
                warn!(
                    asset = %d.asset_id,
                    interval = d.index,
                    target_wh = d.target_wh,
                    shortfall_wh = short,
                    "departure SoC target not reachable"
                );
            }
        }

        let intervals = table
            .timestamps()
            .enumerate()
            .map(|(t, timestamp)| {
                let mut dispatch = IntervalDispatch {
                    timestamp,
                    grid_w: values.get(export[t]) - values.get(import[t]),
                    ..IntervalDispatch::default()
                };
                for block in &blocks {
                    dispatch
                        .assets
                        .insert(block.id.clone(), block.realized(&values, t));
                    if let Some(soc) = block.soc(&values, t) {
                        dispatch.soc_wh.insert(block.id.clone(), soc);
                    }
                }
                for (id, f) in &floors {
                    dispatch.soc_floor_wh.insert(id.clone(), f[t]);
                }
                dispatch
            })
            .collect();

        let plan = DispatchPlan {
            created_at: table.start(),
            intervals,
        };
        debug!(start = table.start(), horizon, "planned");
        Ok(plan)
    }
}

/// Plan for agents with nothing to dispatch: the grid covers the load.
fn fixed_load_plan(assets: &AgentAssets, table: &ForecastTable) -> Result<DispatchPlan> {
    let mut intervals: Vec<IntervalDispatch> = table
        .timestamps()
        .map(|timestamp| IntervalDispatch {
            timestamp,
            ..IntervalDispatch::default()
        })
        .collect();
    for asset in assets.iter() {
        let load = table.values(&asset.id, Signal::Power)?;
        for (dispatch, w) in intervals.iter_mut().zip(load) {
            let w = rated_w(asset, w.abs());
            dispatch.assets.insert(asset.id.clone(), -w);
            dispatch.grid_w -= w;
        }
    }
    Ok(DispatchPlan {
        created_at: table.start(),
        intervals,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::{Asset, AssetKind};

    fn market(table: &mut ForecastTable, price: Vec<f64>) {
        let n = price.len();
        table.insert(MARKET_SERIES, Signal::Price, price);
        table.insert(MARKET_SERIES, Signal::LeviesPositive, vec![0.0; n]);
        table.insert(MARKET_SERIES, Signal::LeviesNegative, vec![0.05; n]);
    }

    #[test]
    fn fixed_load_plan_mirrors_forecast() {
        let assets = AgentAssets::new(vec![Asset::new("load", AssetKind::Load, 5000.0)]).unwrap();
        let mut table = ForecastTable::new(0, 3);
        table.insert("load", Signal::Power, vec![100.0, 200.0, 300.0]);
        let settings = OptimizerSettings::default();
        let plan = PredictiveController::new(&settings)
            .plan(&assets, &table, &StateStore::for_assets(&assets))
            .unwrap();
        let grid: Vec<f64> = plan.intervals.iter().map(|i| i.grid_w).collect();
        assert_eq!(grid, vec![-100.0, -200.0, -300.0]);
    }

    #[test]
    fn battery_shifts_to_expensive_interval() {
        let mut bat = Asset::new("bat", AssetKind::Battery, 4000.0).with_storage(4000.0, 1.0, 1.0);
        bat.charge_from_grid = true;
        bat.initial_soc_wh = Some(0.0);
        let assets = AgentAssets::new(vec![Asset::new("load", AssetKind::Load, 5000.0), bat]).unwrap();
        let mut table = ForecastTable::new(0, 2);
        table.insert("load", Signal::Power, vec![1000.0, 1000.0]);
        market(&mut table, vec![0.10, 0.50]);
        let settings = OptimizerSettings::default();
        let plan = PredictiveController::new(&settings)
            .plan(&assets, &table, &StateStore::for_assets(&assets))
            .unwrap();

        let first = &plan.intervals[0];
        let second = &plan.intervals[1];
        assert!(first.assets["bat"] < -1.0, "charges while cheap");
        assert!(second.assets["bat"] > 1.0, "discharges while expensive");
        for i in &plan.intervals {
            let sum: f64 = i.assets.values().sum();
            assert!((sum - i.grid_w).abs() < 1e-4);
            assert!((-1e-6..=4000.0 + 1e-6).contains(&i.soc_wh["bat"]));
        }
    }

    #[test]
    fn ev_reaches_departure_target() {
        let mut ev = Asset::new("ev", AssetKind::Ev, 4000.0).with_storage(20_000.0, 1.0, 1.0);
        ev.initial_soc_wh = Some(2000.0);
        ev.consumption_wh_per_100km = 20_000.0;
        let assets = AgentAssets::new(vec![Asset::new("load", AssetKind::Load, 5000.0), ev]).unwrap();
        let mut table = ForecastTable::new(0, 4);
        table.insert("load", Signal::Power, vec![500.0; 4]);
        table.insert("ev", Signal::Availability, vec![1.0, 1.0, 0.0, 0.0]);
        table.insert("ev", Signal::DistanceDriven, vec![0.0, 0.0, 5.0, 5.0]);
        market(&mut table, vec![0.30; 4]);
        let settings = OptimizerSettings::default();
        let plan = PredictiveController::new(&settings)
            .plan(&assets, &table, &StateStore::for_assets(&assets))
            .unwrap();

        // greedy projection: 2000 + 1000 + 1000 = 4000 Wh at departure
        let soc_at_departure = plan.intervals[1].soc_wh["ev"];
        assert!(soc_at_departure >= 4000.0 - 1e-3);
        assert!((plan.intervals[1].soc_floor_wh["ev"] - 4000.0).abs() < 1e-9);
        assert!((plan.intervals[0].soc_floor_wh["ev"] - 3000.0).abs() < 1e-9);
        // away: no charging, driving drains 1000 Wh per interval
        assert!(plan.intervals[2].assets["ev"].abs() < 1e-6);
        assert!((plan.intervals[3].soc_wh["ev"] - (soc_at_departure - 2000.0)).abs() < 1e-3);
    }

    #[test]
    fn load_above_rating_stays_within_big_m() {
        let mut bat = Asset::new("bat", AssetKind::Battery, 1000.0).with_storage(4000.0, 1.0, 1.0);
        bat.charge_from_grid = true;
        let assets = AgentAssets::new(vec![Asset::new("load", AssetKind::Load, 1000.0), bat]).unwrap();
        let mut table = ForecastTable::new(0, 2);
        table.insert("load", Signal::Power, vec![5000.0, 5000.0]);
        market(&mut table, vec![0.20, 0.20]);
        let settings = OptimizerSettings {
            big_m: 2000.0,
            ..OptimizerSettings::default()
        };
        let plan = PredictiveController::new(&settings)
            .plan(&assets, &table, &StateStore::for_assets(&assets))
            .unwrap();
        for i in &plan.intervals {
            assert_eq!(i.assets["load"], -1000.0);
            assert!(i.grid_w.abs() <= 2000.0 + 1e-6);
        }
    }

    #[test]
    fn missing_price_is_reported() {
        let bat = Asset::new("bat", AssetKind::Battery, 4000.0).with_storage(4000.0, 1.0, 1.0);
        let assets = AgentAssets::new(vec![bat]).unwrap();
        let table = ForecastTable::new(0, 2);
        let settings = OptimizerSettings::default();
        let result = PredictiveController::new(&settings).plan(
            &assets,
            &table,
            &StateStore::for_assets(&assets),
        );
        assert!(matches!(result, Err(DispatchError::MissingForecast { signal: Signal::Price, .. })));
    }
}
