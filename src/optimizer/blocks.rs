//! Per-asset constraint blocks.
//!
//! Every asset contributes one block to a shared model, chosen by its
//! [`Capability`]. The same builder serves the single-interval reconciliation
//! and the multi-interval plan; only the horizon of the forecast table
//! differs.

use good_lp::{Expression, constraint};
use tracing::debug;

use super::problem::{Model, Values};
use super::SOC_SHORTFALL_PENALTY_PER_KWH;
use crate::assets::storage::{driving_energy_wh, is_plugged, soc_after_driving};
use crate::assets::{Asset, AssetKind, Capability};
use crate::error::Result;
use crate::forecast::{ForecastTable, Signal};
use crate::units::HOURS_PER_INTERVAL;

/// Decision variables of one storage asset over the horizon.
#[derive(Debug, Clone)]
pub struct StorageVars {
    pub charge: Vec<good_lp::Variable>,
    pub discharge: Vec<good_lp::Variable>,
    /// Interval-end SoC.
    pub soc: Vec<good_lp::Variable>,
    /// Driving energy the vehicle could not draw, per interval.
    pub unserved: Vec<Option<good_lp::Variable>>,
    pub capacity_wh: f64,
    pub grid_chargeable: bool,
}

#[derive(Debug, Clone)]
pub enum BlockBody {
    /// Power pinned to a known signed value per interval.
    Fixed(Vec<f64>),
    /// Output chosen in `[0, forecast]`.
    Curtailable(Vec<good_lp::Variable>),
    Storage(StorageVars),
}

#[derive(Debug, Clone)]
pub struct AssetBlock {
    pub id: String,
    pub kind: AssetKind,
    pub body: BlockBody,
}

impl AssetBlock {
    /// Adds the block for `asset` to `model`.
    ///
    /// `soc_start_wh` is the committed SoC for storage assets and ignored for
    /// the rest.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::DispatchError::MissingForecast`] if the table
    /// lacks a series the asset needs.
    pub fn build(
        model: &mut Model,
        asset: &Asset,
        table: &ForecastTable,
        soc_start_wh: f64,
        big_m: f64,
    ) -> Result<Self> {
        let horizon = table.horizon();
        let body = match asset.kind.capability() {
            Capability::FixedLoad => {
                let load = table.values(&asset.id, Signal::Power)?;
                BlockBody::Fixed(load.iter().map(|w| -rated_w(asset, w.abs())).collect())
            }
            Capability::Generation => {
                let ceiling: Vec<f64> = table
                    .values(&asset.id, Signal::Power)?
                    .iter()
                    .map(|w| rated_w(asset, w.max(0.0)))
                    .collect();
                if asset.controllable {
                    BlockBody::Curtailable(
                        ceiling.iter().map(|&w| model.bounded(0.0, w)).collect(),
                    )
                } else {
                    BlockBody::Fixed(ceiling)
                }
            }
            Capability::Storage => {
                let always = vec![1.0; horizon];
                let parked = vec![0.0; horizon];
                BlockBody::Storage(storage_block(
                    model, asset, &always, &parked, soc_start_wh, big_m,
                ))
            }
            Capability::MobileStorage => {
                let availability = table.values(&asset.id, Signal::Availability)?;
                let distance = table.values(&asset.id, Signal::DistanceDriven)?;
                BlockBody::Storage(storage_block(
                    model,
                    asset,
                    availability,
                    distance,
                    soc_start_wh,
                    big_m,
                ))
            }
        };
        Ok(Self {
            id: asset.id.clone(),
            kind: asset.kind,
            body,
        })
    }

    /// Net output at interval `t`, split into a variable part and a constant.
    pub fn power(&self, t: usize) -> (Expression, f64) {
        let mut expr = Expression::default();
        match &self.body {
            BlockBody::Fixed(values) => return (expr, values[t]),
            BlockBody::Curtailable(output) => expr += output[t],
            BlockBody::Storage(s) => {
                expr += s.discharge[t];
                expr -= s.charge[t];
            }
        }
        (expr, 0.0)
    }

    pub fn realized(&self, values: &Values, t: usize) -> f64 {
        match &self.body {
            BlockBody::Fixed(v) => v[t],
            BlockBody::Curtailable(output) => values.get(output[t]),
            BlockBody::Storage(s) => values.get(s.discharge[t]) - values.get(s.charge[t]),
        }
    }

    pub fn storage(&self) -> Option<&StorageVars> {
        match &self.body {
            BlockBody::Storage(s) => Some(s),
            _ => None,
        }
    }

    /// Solved interval-end SoC, clamped against solver round-off.
    pub fn soc(&self, values: &Values, t: usize) -> Option<f64> {
        self.storage()
            .map(|s| values.get(s.soc[t]).clamp(0.0, s.capacity_wh))
    }
}

/// Caps a forecast power magnitude at the asset's rating.
///
/// Every fixed or curtailable power then stays within its rating, which is
/// what lets `big_m` be validated against the summed ratings.
pub fn rated_w(asset: &Asset, magnitude_w: f64) -> f64 {
    if magnitude_w > asset.rating_w {
        debug!(
            asset = %asset.id,
            forecast_w = magnitude_w,
            rating_w = asset.rating_w,
            "forecast clipped to rating"
        );
        return asset.rating_w;
    }
    magnitude_w
}

fn storage_block(
    model: &mut Model,
    asset: &Asset,
    availability: &[f64],
    distance_km: &[f64],
    soc_start_wh: f64,
    big_m: f64,
) -> StorageVars {
    let mobile = asset.kind.capability() == Capability::MobileStorage;
    let k_out = HOURS_PER_INTERVAL / asset.eta_discharge;
    let k_in = HOURS_PER_INTERVAL * asset.eta_charge;
    let penalty = SOC_SHORTFALL_PENALTY_PER_KWH / 1000.0;

    let mut vars = StorageVars {
        charge: Vec::with_capacity(availability.len()),
        discharge: Vec::with_capacity(availability.len()),
        soc: Vec::with_capacity(availability.len()),
        unserved: Vec::with_capacity(availability.len()),
        capacity_wh: asset.capacity_wh,
        grid_chargeable: mobile || asset.charge_from_grid,
    };

    for (t, &avail) in availability.iter().enumerate() {
        let plugged = !mobile || is_plugged(avail);
        let charge_max = if plugged { asset.rating_w } else { 0.0 };
        let discharge_max = if plugged && (!mobile || asset.v2g) {
            asset.rating_w
        } else {
            0.0
        };
        let charge = model.bounded(0.0, charge_max);
        let discharge = model.bounded(0.0, discharge_max);
        if charge_max > 0.0 && discharge_max > 0.0 {
            let discharging = model.binary();
            model.constrain(constraint!(charge + discharging * big_m <= big_m));
            model.constrain(constraint!(discharge - discharging * big_m <= 0.0));
        }
        let soc = model.bounded(0.0, asset.capacity_wh);

        let flow = Expression::from(soc) + discharge * k_out - charge * k_in;
        let mut unserved = None;
        if t == 0 {
            // the first trip is settled against the known SoC up front
            let start = if mobile {
                soc_after_driving(asset, soc_start_wh, distance_km[0])
            } else {
                soc_start_wh
            };
            model.constrain(constraint!(flow == start));
        } else {
            let drive = if mobile {
                driving_energy_wh(asset, distance_km[t])
            } else {
                0.0
            };
            let prev = vars.soc[t - 1];
            if drive > 0.0 {
                let short = model.bounded(0.0, drive);
                model.add_cost(short * penalty);
                model.constrain(constraint!(flow - prev - short == -drive));
                unserved = Some(short);
            } else {
                model.constrain(constraint!(flow - prev == 0.0));
            }
        }

        vars.charge.push(charge);
        vars.discharge.push(discharge);
        vars.soc.push(soc);
        vars.unserved.push(unserved);
    }
    vars
}

/// Caps charging of batteries that may not charge from the grid at the PV
/// output of the same interval.
pub fn limit_non_grid_charging(model: &mut Model, blocks: &[AssetBlock], t: usize) {
    let mut charging = Expression::default();
    let mut restricted = false;
    for s in blocks.iter().filter_map(AssetBlock::storage) {
        if !s.grid_chargeable {
            charging += s.charge[t];
            restricted = true;
        }
    }
    if !restricted {
        return;
    }
    let mut pv = Expression::default();
    let mut pv_fixed = 0.0;
    for block in blocks.iter().filter(|b| b.kind == AssetKind::Pv) {
        let (expr, constant) = block.power(t);
        pv += expr;
        pv_fixed += constant;
    }
    model.constrain(constraint!(charging - pv <= pv_fixed));
}
