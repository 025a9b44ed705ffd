//! Turns a dispatch plan into priced bids and offers.

use rand::{Rng, SeedableRng, rngs::StdRng};
use serde::Deserialize;
use tracing::{debug, warn};

use super::position::{MarketPosition, PositionKind};
use super::service::{MarketService, SubmitStatus};
use crate::assets::Quality;
use crate::error::Result;
use crate::optimizer::DispatchPlan;
use crate::units::{HOURS_PER_INTERVAL, Timestamp, nth_interval};

/// Default fixed-point units per currency unit.
pub const DEFAULT_FIXED_POINT_PER_CURRENCY: f64 = 1e9;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PricingStrategy {
    /// Uniform random price in `[min_offer, max_bid]` per interval.
    #[default]
    ZeroIntelligence,
    /// Bids fall from `max_bid` and offers rise from `min_offer` across the horizon.
    Linear,
}

/// Per-agent bidding parameters. Prices are in currency per kWh.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BiddingConfig {
    pub strategy: PricingStrategy,
    pub max_bid: f64,
    pub min_offer: f64,
    /// Intervals after the current one that receive positions.
    pub horizon: usize,
    /// Quality requested on bids.
    pub preference_quality: Quality,
    /// Premium paid on bids for `preference_quality`.
    pub premium_preference_quality: f64,
    /// Withdraw open positions before submitting a fresh batch.
    pub clear_positions: bool,
    /// Smallest tradable quantity in Wh.
    pub min_quantity_wh: f64,
}

impl Default for BiddingConfig {
    fn default() -> Self {
        Self {
            strategy: PricingStrategy::ZeroIntelligence,
            max_bid: 0.30,
            min_offer: 0.10,
            horizon: 8,
            preference_quality: Quality::Na,
            premium_preference_quality: 0.0,
            clear_positions: true,
            min_quantity_wh: 10.0,
        }
    }
}

impl BiddingConfig {
    /// Price step per interval of the linear strategy.
    pub fn gradient(&self) -> f64 {
        if self.horizon <= 1 {
            0.0
        } else {
            (self.max_bid - self.min_offer) / (self.horizon - 1) as f64
        }
    }
}

/// Positions produced for one interval and how many the market took.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BidOutcome {
    pub positions: Vec<MarketPosition>,
    pub accepted: usize,
}

impl BidOutcome {
    pub fn energy_wh(&self, kind: PositionKind) -> f64 {
        self.positions
            .iter()
            .filter(|p| p.kind == kind)
            .map(MarketPosition::quantity_wh)
            .sum()
    }
}

#[derive(Debug, Clone)]
pub struct BiddingEngine {
    config: BiddingConfig,
    fixed_point_per_currency: f64,
    rng: StdRng,
}

fn round4(x: f64) -> f64 {
    (x * 1e4).round() / 1e4
}

impl BiddingEngine {
    pub fn new(config: BiddingConfig, fixed_point_per_currency: f64, seed: u64) -> Self {
        Self {
            config,
            fixed_point_per_currency,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn config(&self) -> &BiddingConfig {
        &self.config
    }

    /// Price in currency per kWh for the `index`-th interval of the horizon.
    pub fn price(&mut self, kind: PositionKind, index: usize) -> f64 {
        let c = &self.config;
        match c.strategy {
            PricingStrategy::ZeroIntelligence => {
                let u: f64 = self.rng.random();
                round4(c.min_offer + u * (c.max_bid - c.min_offer))
            }
            PricingStrategy::Linear => {
                let delta = index as f64 * c.gradient();
                round4(match kind {
                    PositionKind::Bid => c.max_bid - delta,
                    PositionKind::Offer => c.min_offer + delta,
                })
            }
        }
    }

    /// Currency per kWh to fixed point per Wh.
    pub fn to_fixed_point(&self, per_kwh: f64) -> i64 {
        (per_kwh * self.fixed_point_per_currency / 1000.0).round() as i64
    }

    /// Builds positions for the intervals after `now` without submitting.
    ///
    /// # Errors
    ///
    /// Propagates [`MarketService::matched_volume`] failures.
    pub fn build_positions(
        &mut self,
        agent_id: &str,
        offer_quality: Quality,
        plan: &DispatchPlan,
        now: Timestamp,
        market: &dyn MarketService,
    ) -> Result<Vec<MarketPosition>> {
        let mut positions = Vec::new();
        for index in 0..self.config.horizon {
            let delivery = nth_interval(now, index + 1);
            let planned_wh = plan.grid_w_at(delivery).unwrap_or(0.0) * HOURS_PER_INTERVAL;
            let net = (planned_wh - market.matched_volume(agent_id, delivery)?).round();
            if net.abs() < self.config.min_quantity_wh || net == 0.0 {
                continue;
            }
            let (kind, quality, premium) = if net < 0.0 {
                (
                    PositionKind::Bid,
                    self.config.preference_quality,
                    self.to_fixed_point(self.config.premium_preference_quality),
                )
            } else {
                (PositionKind::Offer, offer_quality, 0)
            };
            let price = self.price(kind, index);
            positions.push(MarketPosition {
                agent_id: agent_id.to_string(),
                energy_wh: net,
                price: self.to_fixed_point(price),
                kind,
                delivery,
                quality,
                premium,
            });
        }
        Ok(positions)
    }

    /// Refreshes the agent's positions on the market.
    ///
    /// # Errors
    ///
    /// Propagates market failures. Individually rejected positions are only
    /// logged.
    pub fn submit(
        &mut self,
        agent_id: &str,
        offer_quality: Quality,
        plan: &DispatchPlan,
        now: Timestamp,
        market: &dyn MarketService,
    ) -> Result<BidOutcome> {
        let positions = self.build_positions(agent_id, offer_quality, plan, now, market)?;
        if self.config.clear_positions {
            market.clear_open_positions(agent_id)?;
        }
        if positions.is_empty() {
            return Ok(BidOutcome::default());
        }
        let statuses = market.submit_positions(&positions)?;
        let mut accepted = 0;
        for (position, status) in positions.iter().zip(&statuses) {
            match status {
                SubmitStatus::Accepted => accepted += 1,
                SubmitStatus::Rejected(reason) => {
                    warn!(agent = agent_id, %position, %reason, "position rejected");
                }
            }
        }
        debug!(agent = agent_id, submitted = positions.len(), accepted, "positions submitted");
        Ok(BidOutcome {
            positions,
            accepted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::InMemoryMarket;
    use crate::optimizer::IntervalDispatch;

    fn plan(now: Timestamp, grid_w: &[f64]) -> DispatchPlan {
        DispatchPlan {
            created_at: now,
            intervals: grid_w
                .iter()
                .enumerate()
                .map(|(k, w)| IntervalDispatch {
                    timestamp: nth_interval(now, k),
                    grid_w: *w,
                    ..IntervalDispatch::default()
                })
                .collect(),
        }
    }

    fn linear(horizon: usize) -> BiddingConfig {
        BiddingConfig {
            strategy: PricingStrategy::Linear,
            max_bid: 0.30,
            min_offer: 0.10,
            horizon,
            ..BiddingConfig::default()
        }
    }

    #[test]
    fn linear_gradient_and_endpoints() {
        let cfg = linear(5);
        assert!((cfg.gradient() - 0.05).abs() < 1e-12);
        let mut engine = BiddingEngine::new(cfg, DEFAULT_FIXED_POINT_PER_CURRENCY, 1);
        assert!((engine.price(PositionKind::Bid, 0) - 0.30).abs() < 1e-12);
        assert!((engine.price(PositionKind::Bid, 4) - 0.10).abs() < 1e-12);
        assert!((engine.price(PositionKind::Offer, 0) - 0.10).abs() < 1e-12);
        assert!((engine.price(PositionKind::Offer, 4) - 0.30).abs() < 1e-12);
    }

    #[test]
    fn single_interval_horizon_has_flat_gradient() {
        assert_eq!(linear(1).gradient(), 0.0);
    }

    #[test]
    fn zero_intelligence_stays_in_band() {
        let cfg = BiddingConfig::default();
        let mut engine = BiddingEngine::new(cfg, DEFAULT_FIXED_POINT_PER_CURRENCY, 7);
        for i in 0..200 {
            let p = engine.price(PositionKind::Bid, i);
            assert!((0.10..=0.30).contains(&p));
        }
    }

    #[test]
    fn fixed_point_conversion() {
        let engine = BiddingEngine::new(linear(2), DEFAULT_FIXED_POINT_PER_CURRENCY, 0);
        assert_eq!(engine.to_fixed_point(0.30), 300_000);
    }

    #[test]
    fn net_of_matched_volume_and_sign_classification() {
        let market = InMemoryMarket::new();
        // interval 1 plans 2 kW import = 500 Wh, 200 Wh already bought
        market.record_match("a", 900, -200.0);
        let p = plan(0, &[0.0, -2000.0, 4000.0, 20.0]);
        let mut engine = BiddingEngine::new(linear(3), DEFAULT_FIXED_POINT_PER_CURRENCY, 0);
        let positions = engine
            .build_positions("a", Quality::GreenLocal, &p, 0, &market)
            .unwrap();
        // 20 W -> 5 Wh is below the tradable minimum
        assert_eq!(positions.len(), 2);
        assert_eq!(positions[0].kind, PositionKind::Bid);
        assert_eq!(positions[0].energy_wh, -300.0);
        assert_eq!(positions[0].quality, Quality::Na);
        assert_eq!(positions[1].kind, PositionKind::Offer);
        assert_eq!(positions[1].energy_wh, 1000.0);
        assert_eq!(positions[1].quality, Quality::GreenLocal);
        assert_eq!(positions[1].premium, 0);
    }

    #[test]
    fn repeated_build_is_idempotent() {
        let market = InMemoryMarket::new();
        let p = plan(0, &[0.0, -2000.0, 4000.0, -800.0]);

        let mut linear_engine = BiddingEngine::new(linear(3), DEFAULT_FIXED_POINT_PER_CURRENCY, 0);
        let a = linear_engine.build_positions("a", Quality::Na, &p, 0, &market).unwrap();
        let b = linear_engine.build_positions("a", Quality::Na, &p, 0, &market).unwrap();
        assert_eq!(a, b);

        let mut zi = BiddingEngine::new(
            BiddingConfig {
                horizon: 3,
                ..BiddingConfig::default()
            },
            DEFAULT_FIXED_POINT_PER_CURRENCY,
            0,
        );
        let a = zi.build_positions("a", Quality::Na, &p, 0, &market).unwrap();
        let b = zi.build_positions("a", Quality::Na, &p, 0, &market).unwrap();
        let shape = |ps: &[MarketPosition]| {
            ps.iter()
                .map(|p| (p.delivery, p.energy_wh, p.kind, p.quality))
                .collect::<Vec<_>>()
        };
        assert_eq!(shape(&a), shape(&b));
    }

    #[test]
    fn submit_replaces_open_positions() {
        let market = InMemoryMarket::new();
        let mut engine = BiddingEngine::new(linear(3), DEFAULT_FIXED_POINT_PER_CURRENCY, 0);
        let first = plan(0, &[0.0, -2000.0, -2000.0, -2000.0]);
        let out = engine.submit("a", Quality::Na, &first, 0, &market).unwrap();
        assert_eq!(out.accepted, 3);
        assert!((out.energy_wh(PositionKind::Bid) - 1500.0).abs() < 1e-9);

        let second = plan(0, &[0.0, -2000.0, 0.0, 0.0]);
        engine.submit("a", Quality::Na, &second, 0, &market).unwrap();
        assert_eq!(market.open_positions("a").len(), 1);
    }

    #[test]
    fn empty_plan_is_a_no_op() {
        let market = InMemoryMarket::new();
        let mut engine = BiddingEngine::new(linear(3), DEFAULT_FIXED_POINT_PER_CURRENCY, 0);
        let out = engine
            .submit("a", Quality::Na, &DispatchPlan::default(), 0, &market)
            .unwrap();
        assert!(out.positions.is_empty());
    }
}
