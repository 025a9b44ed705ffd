//! Simulation engine: synthetic measurements, agents, and the interval loop.

use std::path::Path;
use std::thread;

use tracing::{error, info};

use super::clock::Clock;
use super::types::{AgentFailure, IntervalReport, SimulationOutcome};
use crate::agent::{AgentOptions, Prosumer};
use crate::config::ScenarioConfig;
use crate::error::{DispatchError, Result};
use crate::forecast::{MARKET_SERIES, MeasurementHistory, Signal};
use crate::market::InMemoryMarket;
use crate::profiles::{self, DailySinusoid};
use crate::state::StateStore;
use crate::units::{INTERVALS_PER_DAY, SECS_PER_DAY, Timestamp};

/// Seed offset of the market price profile.
const MARKET_SEED_OFFSET: u64 = 1_000;
/// Seed offset of each agent's bidding RNG.
const BIDDING_SEED_OFFSET: u64 = 2_000;
/// Seed distance between consecutive agents' asset profiles.
const ASSET_SEED_STRIDE: u64 = 100;

/// Simulation engine owning the agents, their measurements, and the market.
pub struct Engine {
    clock: Clock,
    agents: Vec<Prosumer>,
    history: MeasurementHistory,
    market: InMemoryMarket,
    parallel: bool,
}

impl Engine {
    /// Creates an engine over prepared agents and measurements.
    ///
    /// # Arguments
    ///
    /// * `agents` - Prosumers stepped every interval, in report order
    /// * `history` - Measurements covering every interval the agents touch
    /// * `start` - First interval to run
    /// * `intervals` - Number of intervals to run
    /// * `parallel` - Step agents on scoped threads
    pub fn new(
        agents: Vec<Prosumer>,
        history: MeasurementHistory,
        start: Timestamp,
        intervals: usize,
        parallel: bool,
    ) -> Self {
        Self {
            clock: Clock::new(start, intervals),
            agents,
            history,
            market: InMemoryMarket::new(),
            parallel,
        }
    }

    /// Builds agents and synthetic measurements from a scenario.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Config`] listing every validation failure.
    pub fn from_config(cfg: &ScenarioConfig) -> Result<Self> {
        Self::with_history(cfg, synthetic_history(cfg))
    }

    /// Builds agents from a scenario and runs them against recorded measurements.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Config`] listing every validation failure.
    pub fn with_history(cfg: &ScenarioConfig, history: MeasurementHistory) -> Result<Self> {
        let errors = cfg.validate();
        if !errors.is_empty() {
            let joined: Vec<String> = errors.iter().map(ToString::to_string).collect();
            return Err(DispatchError::config(joined.join("; ")));
        }

        let s = &cfg.simulation;
        let agents = cfg
            .agents
            .iter()
            .enumerate()
            .map(|(i, agent)| {
                let options = AgentOptions {
                    forecast: agent.forecast,
                    price_forecast: agent.price_forecast,
                    target_source: cfg.market.target_source,
                    bidding: agent.bidding.clone(),
                    optimizer: cfg.optimizer.clone(),
                    fixed_point_per_currency: cfg.market.currency_to_fixed_point,
                    seed: s.seed.wrapping_add(BIDDING_SEED_OFFSET + i as u64),
                };
                Prosumer::new(agent.id.clone(), agent.assets.clone(), options)
            })
            .collect::<Result<Vec<_>>>()?;

        info!(
            agents = agents.len(),
            samples = history.len(),
            intervals = s.intervals,
            "scenario ready"
        );
        Ok(Self::new(agents, history, s.start, s.intervals, s.parallel))
    }

    /// Loads `<dir>/<agent id>.json` for every agent that has one.
    ///
    /// Returns the number of agents resumed.
    ///
    /// # Errors
    ///
    /// Propagates read, parse, and SoC validation failures.
    pub fn resume_from(&mut self, dir: &Path) -> Result<usize> {
        let mut resumed = 0;
        for agent in &mut self.agents {
            let path = dir.join(format!("{}.json", agent.id()));
            if !path.exists() {
                continue;
            }
            agent.restore_state(StateStore::load(&path)?)?;
            resumed += 1;
        }
        info!(resumed, dir = %dir.display(), "agent state restored");
        Ok(resumed)
    }

    pub fn agents(&self) -> &[Prosumer] {
        &self.agents
    }

    pub fn market(&self) -> &InMemoryMarket {
        &self.market
    }

    pub fn history(&self) -> &MeasurementHistory {
        &self.history
    }

    /// Steps every agent through the interval starting at `now`.
    ///
    /// A failing agent is logged and recorded; the others still run.
    pub fn step(&mut self, now: Timestamp, outcome: &mut SimulationOutcome) {
        let history = &self.history;
        let market = &self.market;
        let results: Vec<(String, Result<IntervalReport>)> = if self.parallel && self.agents.len() > 1 {
            thread::scope(|scope| {
                let handles: Vec<_> = self
                    .agents
                    .iter_mut()
                    .map(|agent| {
                        scope.spawn(move || {
                            let result = agent.run_interval(now, history, market);
                            (agent.id().to_string(), result)
                        })
                    })
                    .collect();
                handles
                    .into_iter()
                    .map(|h| h.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)))
                    .collect()
            })
        } else {
            self.agents
                .iter_mut()
                .map(|agent| {
                    let result = agent.run_interval(now, history, market);
                    (agent.id().to_string(), result)
                })
                .collect()
        };

        for (agent_id, result) in results {
            match result {
                Ok(report) => outcome.reports.push(report),
                Err(e) => {
                    error!(agent = %agent_id, interval = now, error = %e, "agent interval failed");
                    outcome.failures.push(AgentFailure {
                        agent_id,
                        interval: now,
                        error: e.to_string(),
                    });
                }
            }
        }
    }

    /// Runs every remaining interval.
    pub fn run(&mut self) -> SimulationOutcome {
        let mut outcome = SimulationOutcome::default();
        while let Some(now) = self.clock.tick() {
            self.step(now, &mut outcome);
        }
        info!(
            reports = outcome.reports.len(),
            failures = outcome.failures.len(),
            "simulation finished"
        );
        outcome
    }
}

/// Samples every profile of the scenario into one measurement history.
///
/// Coverage starts `history_days` before `simulation.start` and ends one
/// planning horizon after the last simulated interval.
pub fn synthetic_history(cfg: &ScenarioConfig) -> MeasurementHistory {
    let s = &cfg.simulation;
    let from = s.start - s.history_days as i64 * SECS_PER_DAY;
    let count = s.history_days * INTERVALS_PER_DAY + s.intervals + cfg.optimizer.mpc_horizon;
    let mut history = MeasurementHistory::new();

    let p = &cfg.market.price;
    let market_seed = s.seed.wrapping_add(MARKET_SEED_OFFSET);
    let mut price = DailySinusoid::new(Signal::Price, p.base, p.amp, p.phase_rad, p.noise_std, market_seed);
    profiles::record(&mut price, MARKET_SERIES, &mut history, from, count);
    for (signal, value) in [
        (Signal::LeviesPositive, cfg.market.levies_positive),
        (Signal::LeviesNegative, cfg.market.levies_negative),
    ] {
        let mut levies = DailySinusoid::new(signal, value, 0.0, 0.0, 0.0, market_seed);
        profiles::record(&mut levies, MARKET_SERIES, &mut history, from, count);
    }

    for (i, agent) in cfg.agents.iter().enumerate() {
        for (j, asset) in agent.assets.iter().enumerate() {
            let Some(profile) = agent.profile_for(asset) else {
                continue;
            };
            let seed = s
                .seed
                .wrapping_add((i as u64 + 1) * ASSET_SEED_STRIDE + j as u64);
            let mut generator = profile.build(asset, seed);
            profiles::record(generator.as_mut(), &asset.id, &mut history, from, count);
        }
    }
    history
}
