//! Shared test fixtures for integration tests.
#![allow(dead_code)]

use prosumer_dispatch::assets::{Asset, AssetKind};
use prosumer_dispatch::config::ScenarioConfig;
use prosumer_dispatch::forecast::{MARKET_SERIES, MeasurementHistory, Signal};
use prosumer_dispatch::units::Timestamp;

/// Start of the fixture window, 2023-11-14 00:00 UTC.
pub const START: Timestamp = 1_699_920_000;

/// Load, non-curtailable PV, and a grid-chargeable battery.
pub fn battery_home() -> Vec<Asset> {
    let mut battery = Asset::new("home_battery", AssetKind::Battery, 4000.0).with_storage(8000.0, 0.95, 0.95);
    battery.charge_from_grid = true;
    vec![
        Asset::new("home_load", AssetKind::Load, 5000.0),
        Asset::new("home_pv", AssetKind::Pv, 4000.0),
        battery,
    ]
}

/// Load plus a 50 kWh EV without V2G, starting at 20 kWh.
pub fn ev_home() -> Vec<Asset> {
    let mut ev = Asset::new("home_ev", AssetKind::Ev, 11_000.0).with_storage(50_000.0, 0.9, 0.9);
    ev.charge_from_grid = true;
    ev.consumption_wh_per_100km = 20_000.0;
    ev.initial_soc_wh = Some(20_000.0);
    vec![Asset::new("ev_load", AssetKind::Load, 5000.0), ev]
}

/// Load and PV measurements for [`battery_home`] from `from`.
pub fn battery_home_history(history: &mut MeasurementHistory, from: Timestamp, load: &[f64], pv: &[f64]) {
    history.extend("home_load", Signal::Power, from, load);
    history.extend("home_pv", Signal::Power, from, pv);
}

/// EV plugged in except for intervals `[depart, depart + away)`, driving
/// `km` per away interval.
pub fn ev_home_history(history: &mut MeasurementHistory, from: Timestamp, n: usize, depart: usize, away: usize, km: f64) {
    let availability: Vec<f64> = (0..n)
        .map(|k| if (depart..depart + away).contains(&k) { 0.0 } else { 1.0 })
        .collect();
    let distance: Vec<f64> = availability.iter().map(|a| if *a < 0.5 { km } else { 0.0 }).collect();
    history.extend("ev_load", Signal::Power, from, &vec![600.0; n]);
    history.extend("home_ev", Signal::Availability, from, &availability);
    history.extend("home_ev", Signal::DistanceDriven, from, &distance);
}

/// Market price series plus constant levies.
pub fn market_history(history: &mut MeasurementHistory, from: Timestamp, price: &[f64]) {
    let n = price.len();
    history.extend(MARKET_SERIES, Signal::Price, from, price);
    history.extend(MARKET_SERIES, Signal::LeviesPositive, from, &vec![0.0; n]);
    history.extend(MARKET_SERIES, Signal::LeviesNegative, from, &vec![0.05; n]);
}

/// A preset shortened to `intervals` with a small planning window.
pub fn short_preset(name: &str, intervals: usize) -> ScenarioConfig {
    let mut cfg = ScenarioConfig::from_preset(name).unwrap();
    cfg.simulation.intervals = intervals;
    cfg.optimizer.mpc_horizon = 8;
    for agent in &mut cfg.agents {
        agent.bidding.horizon = 4;
    }
    cfg
}
