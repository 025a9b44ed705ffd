//! State-of-charge arithmetic shared by both controllers.
//!
//! SoC values are interval-end energies in Wh. Charging and discharging are
//! non-negative average powers over one interval.

use crate::units::HOURS_PER_INTERVAL;

use super::asset::Asset;

/// Reserve an EV never drops below while driving, as a share of capacity.
pub const EV_RESERVE_SHARE: f64 = 0.05;
/// Ceiling for greedy charge projections, as a share of capacity.
pub const EV_PROJECTION_CEILING_SHARE: f64 = 0.85;

/// SoC after one interval of charging and discharging.
pub fn soc_after(soc_wh: f64, charge_w: f64, discharge_w: f64, eta_in: f64, eta_out: f64) -> f64 {
    soc_wh - HOURS_PER_INTERVAL * discharge_w / eta_out + HOURS_PER_INTERVAL * charge_w * eta_in
}

/// Energy drawn by driving `distance_km`.
pub fn driving_energy_wh(asset: &Asset, distance_km: f64) -> f64 {
    distance_km.max(0.0) * asset.consumption_wh_per_100km / 100.0
}

/// SoC left after driving, never going below the reserve floor unless it
/// already started below it.
pub fn soc_after_driving(asset: &Asset, soc_wh: f64, distance_km: f64) -> f64 {
    let drained = soc_wh - driving_energy_wh(asset, distance_km);
    let reserve = (EV_RESERVE_SHARE * asset.capacity_wh).min(soc_wh);
    drained.max(reserve)
}

/// Interval indices at which the vehicle leaves, i.e. the last plugged-in
/// interval before availability drops to zero, or the final interval if it
/// is still plugged in at the end of the horizon.
pub fn departures(availability: &[f64]) -> Vec<usize> {
    let n = availability.len();
    (0..n)
        .filter(|&i| is_plugged(availability[i]) && (i + 1 == n || !is_plugged(availability[i + 1])))
        .collect()
}

pub fn is_plugged(availability: f64) -> bool {
    availability >= 0.5
}

/// Forward pass: greedy-charge projection of the SoC an EV can reach at each
/// departure.
///
/// The projection charges at full rating whenever plugged in, drives off the
/// forecast distance while away, and stays inside
/// `[EV_RESERVE_SHARE, EV_PROJECTION_CEILING_SHARE]` of capacity. The
/// returned vector is `Some(target)` at departure indices and `None` elsewhere.
pub fn departure_targets(
    asset: &Asset,
    soc_now_wh: f64,
    availability: &[f64],
    distance_km: &[f64],
) -> Vec<Option<f64>> {
    let low = EV_RESERVE_SHARE * asset.capacity_wh;
    let high = EV_PROJECTION_CEILING_SHARE * asset.capacity_wh;
    let leaving = departures(availability);

    let mut potential = soc_now_wh;
    let mut targets = vec![None; availability.len()];
    for (i, &avail) in availability.iter().enumerate() {
        let distance = distance_km.get(i).copied().unwrap_or(0.0);
        potential -= driving_energy_wh(asset, distance);
        if is_plugged(avail) {
            potential += asset.rating_w * HOURS_PER_INTERVAL * asset.eta_charge;
        }
        potential = potential.clamp(low, high);
        if leaving.contains(&i) {
            targets[i] = Some(potential);
        }
    }
    targets
}

/// Backward pass: per-interval minimum SoC floors.
///
/// Every nonzero floor relaxes by one interval of charging capability per
/// step backwards in time. Overlapping chains keep the larger floor. Floors
/// are capped at capacity.
pub fn soc_floors(asset: &Asset, targets: &[Option<f64>]) -> Vec<f64> {
    let step = asset.rating_w * HOURS_PER_INTERVAL * asset.eta_charge;
    let mut floors: Vec<f64> = targets.iter().map(|t| t.unwrap_or(0.0)).collect();
    for i in (1..floors.len()).rev() {
        if floors[i] > 0.0 {
            let relaxed = (floors[i] - step).max(0.0);
            floors[i - 1] = floors[i - 1].max(relaxed);
        }
    }
    floors.iter().map(|f| f.min(asset.capacity_wh)).collect()
}
