//! One prosumer: owns its assets and state and runs the per-interval pipeline.
//!
//! Each interval the agent reconciles the interval that just elapsed, plans
//! from the current interval onward, and refreshes its market positions. All
//! state changes happen on a staged copy that replaces the live state only
//! after every step succeeded.

use serde::Deserialize;
use tracing::{debug, info_span};

use crate::assets::{AgentAssets, Asset, Quality};
use crate::error::{DispatchError, Result};
use crate::forecast::{FlatPrice, ForecastMethod, ForecastTable, HistoryForecaster, MeasurementHistory};
use crate::market::bidding::{BiddingConfig, BiddingEngine, DEFAULT_FIXED_POINT_PER_CURRENCY};
use crate::market::{MarketService, PositionKind};
use crate::optimizer::{OptimizerSettings, PredictiveController, RealTimeController, RtcTargets};
use crate::sim::types::IntervalReport;
use crate::state::StateStore;
use crate::units::{INTERVAL_SECS, INTERVALS_PER_HOUR, Timestamp, interval_energy_wh};

/// Where the planner's price series comes from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceForecast {
    /// The market price series, forecast with the agent's method.
    #[default]
    Series,
    /// Midpoint of the agent's own bid and offer limits.
    Flat,
}

/// What the reconciliation tracks for the grid connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetSource {
    /// Grid power from the previous plan.
    #[default]
    Plan,
    /// Energy already cleared on the market, as average power.
    Market,
}

/// Everything an agent needs besides its id and assets.
#[derive(Debug, Clone)]
pub struct AgentOptions {
    pub forecast: ForecastMethod,
    pub price_forecast: PriceForecast,
    pub target_source: TargetSource,
    pub bidding: BiddingConfig,
    pub optimizer: OptimizerSettings,
    pub fixed_point_per_currency: f64,
    pub seed: u64,
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self {
            forecast: ForecastMethod::default(),
            price_forecast: PriceForecast::default(),
            target_source: TargetSource::default(),
            bidding: BiddingConfig::default(),
            optimizer: OptimizerSettings::default(),
            fixed_point_per_currency: DEFAULT_FIXED_POINT_PER_CURRENCY,
            seed: 0,
        }
    }
}

pub struct Prosumer {
    id: String,
    assets: AgentAssets,
    offer_quality: Quality,
    state: StateStore,
    options: AgentOptions,
    bidding: BiddingEngine,
}

impl Prosumer {
    /// Validates the assets and seeds a fresh state.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::DispatchError::Config`] for invalid assets.
    pub fn new(id: impl Into<String>, assets: Vec<Asset>, options: AgentOptions) -> Result<Self> {
        let assets = AgentAssets::new(assets)?;
        let state = StateStore::for_assets(&assets);
        Ok(Self::with_state(id, assets, state, options))
    }

    /// Resumes an agent from a persisted state.
    pub fn with_state(
        id: impl Into<String>,
        assets: AgentAssets,
        state: StateStore,
        options: AgentOptions,
    ) -> Self {
        let bidding = BiddingEngine::new(
            options.bidding.clone(),
            options.fixed_point_per_currency,
            options.seed,
        );
        Self {
            id: id.into(),
            offer_quality: assets.offer_quality(),
            assets,
            state,
            options,
            bidding,
        }
    }

    /// Replaces the live state, e.g. with one saved by an earlier run.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Config`] if a storage asset has no SoC in
    /// `state` or one outside `[0, capacity]`.
    pub fn restore_state(&mut self, state: StateStore) -> Result<()> {
        for asset in self.assets.storage() {
            let soc = state.get_soc(&asset.id)?;
            if !(0.0..=asset.capacity_wh).contains(&soc) {
                return Err(DispatchError::config(format!(
                    "restored SoC {soc} Wh of {} outside [0, {}]",
                    asset.id, asset.capacity_wh
                )));
            }
        }
        self.state = state;
        Ok(())
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn assets(&self) -> &AgentAssets {
        &self.assets
    }

    pub fn state(&self) -> &StateStore {
        &self.state
    }

    /// Runs reconciliation, planning, and bidding for the interval starting at `now`.
    ///
    /// # Errors
    ///
    /// Any failure aborts the interval and leaves the agent's state as it was.
    pub fn run_interval(
        &mut self,
        now: Timestamp,
        history: &MeasurementHistory,
        market: &dyn MarketService,
    ) -> Result<IntervalReport> {
        let _span = info_span!("agent", agent = %self.id, interval = now).entered();
        let elapsed = now - INTERVAL_SECS;
        let settings = &self.options.optimizer;
        let mut staged = self.state.clone();

        let actual = ForecastTable::for_agent(history, &self.assets, elapsed, 1, false)?;
        let targets = self.targets_for(elapsed, &staged, market)?;
        let rtc = RealTimeController::new(settings).reconcile(&self.assets, &actual, &targets, &staged)?;
        rtc.commit(&mut staged)?;
        let meters = staged.record_meters(&rtc.meter_deltas);

        let table = self.planning_table(history, now)?;
        let plan = PredictiveController::new(settings).plan(&self.assets, &table, &staged)?;
        let planned_grid_w = plan.grid_w_at(now).unwrap_or(0.0);

        let bids = self
            .bidding
            .submit(&self.id, self.offer_quality, &plan, now, market)?;

        staged.set_plan(plan);
        staged.set_forecast(table);
        self.state = staged;

        let storage_throughput_wh = self
            .assets
            .storage()
            .filter_map(|a| rtc.powers_w.get(&a.id))
            .map(|w| interval_energy_wh(w.abs()))
            .sum();
        debug!(
            realized_w = rtc.grid_w,
            target_w = rtc.target_grid_w,
            planned_w = planned_grid_w,
            positions = bids.positions.len(),
            "interval done"
        );

        Ok(IntervalReport {
            agent_id: self.id.clone(),
            interval: elapsed,
            target_grid_w: rtc.target_grid_w,
            realized_grid_w: rtc.grid_w,
            deviation_above_w: rtc.deviation_above_w,
            deviation_below_w: rtc.deviation_below_w,
            storage_soc_wh: self.state.total_soc(),
            storage_throughput_wh,
            planned_grid_w,
            positions: bids.positions.len(),
            accepted: bids.accepted,
            bid_energy_wh: bids.energy_wh(PositionKind::Bid),
            offer_energy_wh: bids.energy_wh(PositionKind::Offer),
            meters,
        })
    }

    fn targets_for(
        &self,
        elapsed: Timestamp,
        staged: &StateStore,
        market: &dyn MarketService,
    ) -> Result<RtcTargets> {
        let mut targets = RtcTargets::from_plan(staged.target_for(elapsed));
        if self.options.target_source == TargetSource::Market {
            targets.grid_w = market.matched_volume(&self.id, elapsed)? * INTERVALS_PER_HOUR;
        }
        Ok(targets)
    }

    fn planning_table(&self, history: &MeasurementHistory, now: Timestamp) -> Result<ForecastTable> {
        let horizon = self.options.optimizer.mpc_horizon;
        let with_market = !self.assets.is_fixed_load_only();
        let base = HistoryForecaster::new(history, self.options.forecast);
        match self.options.price_forecast {
            PriceForecast::Series => {
                ForecastTable::for_agent(&base, &self.assets, now, horizon, with_market)
            }
            PriceForecast::Flat => {
                let b = &self.options.bidding;
                let flat = FlatPrice::new(base, (b.max_bid + b.min_offer) / 2.0);
                ForecastTable::for_agent(&flat, &self.assets, now, horizon, with_market)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::AssetKind;
    use crate::forecast::{MARKET_SERIES, Signal};
    use crate::market::InMemoryMarket;

    const NOW: Timestamp = 9000;

    fn history(load_w: f64) -> MeasurementHistory {
        let mut h = MeasurementHistory::new();
        h.extend("load", Signal::Power, 0, &[load_w; 40]);
        h.extend(MARKET_SERIES, Signal::Price, 0, &[0.25; 40]);
        h.extend(MARKET_SERIES, Signal::LeviesPositive, 0, &[0.0; 40]);
        h.extend(MARKET_SERIES, Signal::LeviesNegative, 0, &[0.05; 40]);
        h
    }

    fn options() -> AgentOptions {
        AgentOptions {
            optimizer: OptimizerSettings {
                mpc_horizon: 4,
                ..OptimizerSettings::default()
            },
            bidding: BiddingConfig {
                horizon: 3,
                ..BiddingConfig::default()
            },
            ..AgentOptions::default()
        }
    }

    #[test]
    fn household_bids_for_its_load() {
        let mut agent = Prosumer::new(
            "house",
            vec![Asset::new("load", AssetKind::Load, 5000.0)],
            options(),
        )
        .unwrap();
        let market = InMemoryMarket::new();
        let report = agent.run_interval(NOW, &history(800.0), &market).unwrap();
        assert_eq!(report.interval, NOW - INTERVAL_SECS);
        assert_eq!(report.realized_grid_w, -800.0);
        assert_eq!(report.planned_grid_w, -800.0);
        assert_eq!(report.positions, 3);
        assert!((report.bid_energy_wh - 600.0).abs() < 1e-9);
        assert_eq!(market.open_positions("house").len(), 3);
    }

    #[test]
    fn failure_leaves_state_untouched() {
        let bat = Asset::new("bat", AssetKind::Battery, 3000.0).with_storage(6000.0, 0.9, 0.9);
        let mut agent = Prosumer::new(
            "b",
            vec![Asset::new("load", AssetKind::Load, 5000.0), bat],
            options(),
        )
        .unwrap();
        let before = agent.state().clone();
        // no market series: planning fails after reconciliation succeeded
        let mut h = MeasurementHistory::new();
        h.extend("load", Signal::Power, 0, &[500.0; 40]);
        let result = agent.run_interval(NOW, &h, &InMemoryMarket::new());
        assert!(matches!(result, Err(DispatchError::MissingForecast { .. })));
        assert_eq!(agent.state(), &before);
    }

    #[test]
    fn plan_becomes_next_target() {
        let bat = Asset::new("bat", AssetKind::Battery, 3000.0).with_storage(6000.0, 0.9, 0.9);
        let mut agent = Prosumer::new(
            "b",
            vec![Asset::new("load", AssetKind::Load, 5000.0), bat],
            options(),
        )
        .unwrap();
        let h = history(500.0);
        let market = InMemoryMarket::new();
        let first = agent.run_interval(NOW, &h, &market).unwrap();
        let second = agent
            .run_interval(NOW + INTERVAL_SECS, &h, &market)
            .unwrap();
        assert!((second.target_grid_w - first.planned_grid_w).abs() < 1e-9);
        assert!(second.deviation_above_w < 1e-3 && second.deviation_below_w < 1e-3);
        let bat = agent.state().meter_totals("bat").unwrap();
        assert!(bat.energy_out_wh > 0.0);
        assert!(agent.state().get_soc("bat").unwrap() < 3000.0);
    }

    #[test]
    fn restore_requires_storage_soc() {
        let bat = Asset::new("bat", AssetKind::Battery, 3000.0).with_storage(6000.0, 0.9, 0.9);
        let mut agent = Prosumer::new("b", vec![bat], options()).unwrap();
        assert!(agent.restore_state(StateStore::default()).is_err());

        let mut overfull = agent.state().clone();
        overfull.commit_soc("bat", 12_000.0).unwrap();
        assert!(matches!(
            agent.restore_state(overfull),
            Err(DispatchError::Config(_))
        ));

        let mut saved = agent.state().clone();
        saved.commit_soc("bat", 1234.0).unwrap();
        agent.restore_state(saved).unwrap();
        assert_eq!(agent.state().get_soc("bat").unwrap(), 1234.0);
    }

    #[test]
    fn market_target_uses_cleared_energy() {
        let mut opts = options();
        opts.target_source = TargetSource::Market;
        let mut agent = Prosumer::new(
            "m",
            vec![Asset::new("load", AssetKind::Load, 5000.0)],
            opts,
        )
        .unwrap();
        let market = InMemoryMarket::new();
        market.record_match("m", NOW - INTERVAL_SECS, -150.0);
        let report = agent.run_interval(NOW, &history(800.0), &market).unwrap();
        assert!((report.target_grid_w + 600.0).abs() < 1e-9);
        assert!((report.deviation_above_w - 200.0).abs() < 1e-9);
    }
}
