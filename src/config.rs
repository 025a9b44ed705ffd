//! TOML-based scenario configuration and preset definitions.

use std::collections::{BTreeMap, HashSet};
use std::f64::consts::PI;
use std::fmt;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::agent::{PriceForecast, TargetSource};
use crate::assets::{Asset, AssetKind, Quality};
use crate::forecast::{ForecastMethod, MARKET_SERIES};
use crate::market::BiddingConfig;
use crate::market::bidding::{DEFAULT_FIXED_POINT_PER_CURRENCY, PricingStrategy};
use crate::optimizer::{MAX_BIG_M, OptimizerSettings};
use crate::profiles::ProfileConfig;
use crate::units::{INTERVAL_SECS, Timestamp, is_aligned};

/// Days of history the `naive_average` forecast looks back over.
const NAIVE_AVERAGE_DAYS: usize = 7;

/// Top-level scenario configuration parsed from TOML.
///
/// Sections fall back to their defaults when absent, but at least one
/// `[[agents]]` entry is required. Load from TOML with
/// [`ScenarioConfig::from_toml_file`] or start from a preset.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScenarioConfig {
    /// Simulation timing and global parameters.
    #[serde(default)]
    pub simulation: SimulationConfig,
    /// Solver settings shared by all agents.
    #[serde(default)]
    pub optimizer: OptimizerSettings,
    /// Market-wide signals and settlement parameters.
    #[serde(default)]
    pub market: MarketConfig,
    #[serde(default)]
    pub agents: Vec<AgentConfig>,
}

/// Simulation timing and global parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimulationConfig {
    /// First interval to run, Unix seconds aligned to 900 s.
    pub start: Timestamp,
    /// Number of intervals to run (must be > 0).
    pub intervals: usize,
    /// Master random seed.
    pub seed: u64,
    /// Step agents on scoped threads.
    pub parallel: bool,
    /// Days of synthetic measurements generated before `start`.
    pub history_days: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            // 2023-11-14 00:00 UTC
            start: 1_699_920_000,
            intervals: 96,
            seed: 42,
            parallel: true,
            history_days: NAIVE_AVERAGE_DAYS,
        }
    }
}

/// Daily price curve in currency per kWh.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PriceProfileConfig {
    pub base: f64,
    pub amp: f64,
    pub phase_rad: f64,
    pub noise_std: f64,
}

impl Default for PriceProfileConfig {
    fn default() -> Self {
        Self {
            base: 0.22,
            amp: 0.08,
            // evening peak at 18:00
            phase_rad: -PI,
            noise_std: 0.01,
        }
    }
}

/// Market-wide parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MarketConfig {
    /// Levies on exported energy (currency per kWh).
    pub levies_positive: f64,
    /// Levies on imported energy (currency per kWh).
    pub levies_negative: f64,
    pub price: PriceProfileConfig,
    /// Fixed-point units per currency unit on the wire.
    pub currency_to_fixed_point: f64,
    pub target_source: TargetSource,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            levies_positive: 0.0,
            levies_negative: 0.08,
            price: PriceProfileConfig::default(),
            currency_to_fixed_point: DEFAULT_FIXED_POINT_PER_CURRENCY,
            target_source: TargetSource::Plan,
        }
    }
}

/// One prosumer and everything it owns.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
    pub id: String,
    #[serde(default)]
    pub forecast: ForecastMethod,
    #[serde(default)]
    pub price_forecast: PriceForecast,
    #[serde(default)]
    pub bidding: BiddingConfig,
    pub assets: Vec<Asset>,
    /// Measurement profiles keyed by asset id; assets without an entry use
    /// [`ProfileConfig::default_for`].
    #[serde(default)]
    pub profiles: BTreeMap<String, ProfileConfig>,
}

impl AgentConfig {
    /// Profile for `asset`, explicit or default.
    pub fn profile_for(&self, asset: &Asset) -> Option<ProfileConfig> {
        self.profiles
            .get(&asset.id)
            .cloned()
            .or_else(|| ProfileConfig::default_for(asset))
    }
}

/// Configuration error with field path and constraint description.
#[derive(Debug)]
pub struct ConfigError {
    /// Dotted field path (e.g., `"simulation.intervals"`).
    pub field: String,
    /// Human-readable constraint description.
    pub message: String,
}

impl ConfigError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "config error: {}: {}", self.field, self.message)
    }
}

fn storage(id: &str, kind: AssetKind, rating_w: f64, capacity_wh: f64, eta: f64) -> Asset {
    Asset::new(id, kind, rating_w).with_storage(capacity_wh, eta, eta)
}

impl ScenarioConfig {
    /// Three households: consumer only, solar with a home battery, and a
    /// commuter with an EV and a small PV roof.
    pub fn baseline() -> Self {
        let mut pv = Asset::new("solar_pv", AssetKind::Pv, 6000.0);
        pv.quality = Quality::GreenLocal;
        let mut ev = storage("commuter_ev", AssetKind::Ev, 11_000.0, 60_000.0, 0.92);
        ev.charge_from_grid = true;
        ev.consumption_wh_per_100km = 18_000.0;

        Self {
            simulation: SimulationConfig::default(),
            optimizer: OptimizerSettings::default(),
            market: MarketConfig::default(),
            agents: vec![
                AgentConfig {
                    id: "household".into(),
                    forecast: ForecastMethod::NaiveAverage,
                    price_forecast: PriceForecast::Series,
                    bidding: BiddingConfig::default(),
                    assets: vec![Asset::new("household_load", AssetKind::Load, 4000.0)],
                    profiles: BTreeMap::new(),
                },
                AgentConfig {
                    id: "solar_home".into(),
                    forecast: ForecastMethod::Perfect,
                    price_forecast: PriceForecast::Series,
                    bidding: BiddingConfig {
                        strategy: PricingStrategy::Linear,
                        ..BiddingConfig::default()
                    },
                    assets: vec![
                        Asset::new("solar_load", AssetKind::Load, 5000.0),
                        pv,
                        storage("solar_battery", AssetKind::Battery, 5000.0, 10_000.0, 0.95),
                    ],
                    profiles: BTreeMap::new(),
                },
                AgentConfig {
                    id: "commuter".into(),
                    forecast: ForecastMethod::Naive,
                    price_forecast: PriceForecast::Series,
                    bidding: BiddingConfig::default(),
                    assets: vec![
                        Asset::new("commuter_load", AssetKind::Load, 4000.0),
                        Asset::new("commuter_pv", AssetKind::Pv, 4000.0),
                        ev,
                    ],
                    profiles: BTreeMap::new(),
                },
            ],
        }
    }

    /// Storage-dominated community: a grid-charging battery farm, a V2G
    /// home on flat prices, and a wind cooperative with a heat pump.
    pub fn storage_heavy() -> Self {
        let mut farm_big = storage("farm_battery_a", AssetKind::Battery, 20_000.0, 80_000.0, 0.95);
        farm_big.charge_from_grid = true;
        let mut farm_small = storage("farm_battery_b", AssetKind::Battery, 10_000.0, 40_000.0, 0.9);
        farm_small.charge_from_grid = true;
        farm_small.initial_soc_wh = Some(10_000.0);

        let mut v2g = storage("v2g_ev", AssetKind::Ev, 11_000.0, 75_000.0, 0.92);
        v2g.v2g = true;
        v2g.charge_from_grid = true;
        v2g.consumption_wh_per_100km = 20_000.0;

        let mut wind = Asset::new("coop_wind", AssetKind::Wind, 10_000.0);
        wind.controllable = true;
        wind.quality = Quality::GreenLocal;

        let mut profiles = BTreeMap::new();
        profiles.insert(
            "v2g_ev".to_string(),
            ProfileConfig::Commute {
                depart_hour: 8.0,
                return_hour: 16.0,
                distance_km: 60.0,
                jitter_hours: 1.0,
            },
        );

        Self {
            simulation: SimulationConfig {
                seed: 7,
                ..SimulationConfig::default()
            },
            optimizer: OptimizerSettings {
                mpc_horizon: 24,
                ..OptimizerSettings::default()
            },
            market: MarketConfig {
                price: PriceProfileConfig {
                    amp: 0.12,
                    ..PriceProfileConfig::default()
                },
                ..MarketConfig::default()
            },
            agents: vec![
                AgentConfig {
                    id: "storage_farm".into(),
                    forecast: ForecastMethod::Perfect,
                    price_forecast: PriceForecast::Series,
                    bidding: BiddingConfig {
                        strategy: PricingStrategy::Linear,
                        horizon: 12,
                        ..BiddingConfig::default()
                    },
                    assets: vec![
                        Asset::new("farm_load", AssetKind::Load, 2000.0),
                        farm_big,
                        farm_small,
                    ],
                    profiles: BTreeMap::new(),
                },
                AgentConfig {
                    id: "v2g_home".into(),
                    forecast: ForecastMethod::Smoothed,
                    price_forecast: PriceForecast::Flat,
                    bidding: BiddingConfig::default(),
                    assets: vec![
                        Asset::new("v2g_load", AssetKind::Load, 4000.0),
                        Asset::new("v2g_pv", AssetKind::Pv, 5000.0),
                        v2g,
                    ],
                    profiles,
                },
                AgentConfig {
                    id: "wind_coop".into(),
                    forecast: ForecastMethod::NaiveAverage,
                    price_forecast: PriceForecast::Series,
                    bidding: BiddingConfig {
                        preference_quality: Quality::GreenLocal,
                        premium_preference_quality: 0.02,
                        ..BiddingConfig::default()
                    },
                    assets: vec![
                        wind,
                        Asset::new("coop_heat_pump", AssetKind::HeatPump, 3000.0),
                        storage("coop_battery", AssetKind::Battery, 6000.0, 12_000.0, 0.95),
                    ],
                    profiles: BTreeMap::new(),
                },
            ],
        }
    }

    /// Available preset names.
    pub const PRESETS: &[&str] = &["baseline", "storage_heavy"];

    /// Loads a scenario from a named preset.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the preset name is unknown.
    pub fn from_preset(name: &str) -> Result<Self, ConfigError> {
        match name {
            "baseline" => Ok(Self::baseline()),
            "storage_heavy" => Ok(Self::storage_heavy()),
            _ => Err(ConfigError::new(
                "preset",
                format!(
                    "unknown preset \"{name}\", available: {}",
                    Self::PRESETS.join(", ")
                ),
            )),
        }
    }

    /// Parses a scenario from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the file cannot be read or the TOML is invalid.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| {
            ConfigError::new("scenario", format!("cannot read \"{}\": {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    /// Parses a scenario from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the TOML is invalid or contains unknown fields.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(|e| ConfigError::new("toml", e.to_string()))
    }

    /// Validates all fields and returns a list of errors.
    ///
    /// Returns an empty vector if configuration is valid.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();
        self.validate_simulation(&mut errors);
        self.validate_optimizer(&mut errors);
        self.validate_market(&mut errors);

        if self.agents.is_empty() {
            errors.push(ConfigError::new("agents", "at least one agent is required"));
        }
        let mut agent_ids = HashSet::new();
        let mut asset_ids = HashSet::new();
        for (i, agent) in self.agents.iter().enumerate() {
            let field = format!("agents[{i}]");
            if agent.id.trim().is_empty() {
                errors.push(ConfigError::new(format!("{field}.id"), "must not be empty"));
            } else if !agent_ids.insert(agent.id.as_str()) {
                errors.push(ConfigError::new(
                    format!("{field}.id"),
                    format!("duplicate agent id \"{}\"", agent.id),
                ));
            }
            // asset ids key the shared measurement history
            for asset in &agent.assets {
                if asset.id == MARKET_SERIES {
                    errors.push(ConfigError::new(
                        format!("{field}.assets"),
                        format!("asset id \"{MARKET_SERIES}\" is reserved"),
                    ));
                } else if !asset_ids.insert(asset.id.as_str()) {
                    errors.push(ConfigError::new(
                        format!("{field}.assets"),
                        format!("asset id \"{}\" is used more than once", asset.id),
                    ));
                }
            }
            self.validate_agent(agent, &field, &mut errors);
        }

        errors
    }

    fn validate_simulation(&self, errors: &mut Vec<ConfigError>) {
        let s = &self.simulation;
        if !is_aligned(s.start) {
            errors.push(ConfigError::new(
                "simulation.start",
                format!("must be a multiple of {INTERVAL_SECS} s"),
            ));
        }
        if s.intervals == 0 {
            errors.push(ConfigError::new("simulation.intervals", "must be > 0"));
        }
        if s.history_days == 0 {
            errors.push(ConfigError::new("simulation.history_days", "must be > 0"));
        }
    }

    fn validate_optimizer(&self, errors: &mut Vec<ConfigError>) {
        let o = &self.optimizer;
        if o.mpc_horizon == 0 {
            errors.push(ConfigError::new("optimizer.mpc_horizon", "must be > 0"));
        }
        if !(o.big_m > 0.0 && o.big_m <= MAX_BIG_M) {
            errors.push(ConfigError::new(
                "optimizer.big_m",
                format!("must be in (0, {MAX_BIG_M:e}]"),
            ));
        }
        if o.solver_timeout_ms == 0 {
            errors.push(ConfigError::new("optimizer.solver_timeout_ms", "must be > 0"));
        }
        let w = &o.rtc_weights;
        if w.grid < 0.0 || w.battery < 0.0 || w.ev < 0.0 {
            errors.push(ConfigError::new("optimizer.rtc_weights", "weights must be >= 0"));
        }
    }

    fn validate_market(&self, errors: &mut Vec<ConfigError>) {
        let m = &self.market;
        if m.levies_positive < 0.0 || m.levies_negative < 0.0 {
            errors.push(ConfigError::new("market.levies", "must be >= 0"));
        }
        if m.price.base < 0.0 || m.price.amp < 0.0 || m.price.noise_std < 0.0 {
            errors.push(ConfigError::new("market.price", "parameters must be >= 0"));
        }
        if m.currency_to_fixed_point.is_nan() || m.currency_to_fixed_point <= 0.0 {
            errors.push(ConfigError::new("market.currency_to_fixed_point", "must be > 0"));
        }
    }

    fn validate_agent(&self, agent: &AgentConfig, field: &str, errors: &mut Vec<ConfigError>) {
        if agent.assets.is_empty() {
            errors.push(ConfigError::new(format!("{field}.assets"), "must not be empty"));
        }
        for asset in &agent.assets {
            if let Err(e) = asset.validate() {
                errors.push(ConfigError::new(format!("{field}.assets"), e.to_string()));
            }
            if let Some(profile) = agent.profile_for(asset) {
                if let Err(message) = profile.validate(asset) {
                    errors.push(ConfigError::new(
                        format!("{field}.profiles.{}", asset.id),
                        message,
                    ));
                }
            }
        }
        for id in agent.profiles.keys() {
            if !agent.assets.iter().any(|a| &a.id == id) {
                errors.push(ConfigError::new(
                    format!("{field}.profiles.{id}"),
                    "no asset with this id",
                ));
            }
        }

        let total_rating: f64 = agent.assets.iter().map(|a| a.rating_w).sum();
        if total_rating > self.optimizer.big_m {
            errors.push(ConfigError::new(
                "optimizer.big_m",
                format!("must be >= the total rating of agent \"{}\" ({total_rating} W)", agent.id),
            ));
        }

        if agent.forecast == ForecastMethod::NaiveAverage
            && self.simulation.history_days < NAIVE_AVERAGE_DAYS
        {
            errors.push(ConfigError::new(
                format!("{field}.forecast"),
                format!("naive_average needs simulation.history_days >= {NAIVE_AVERAGE_DAYS}"),
            ));
        }

        let b = &agent.bidding;
        if b.max_bid < 0.0 || b.min_offer < 0.0 {
            errors.push(ConfigError::new(
                format!("{field}.bidding"),
                "max_bid and min_offer must be >= 0",
            ));
        }
        if b.max_bid < b.min_offer {
            errors.push(ConfigError::new(
                format!("{field}.bidding"),
                format!("max_bid ({}) must be >= min_offer ({})", b.max_bid, b.min_offer),
            ));
        }
        if b.min_quantity_wh < 0.0 || b.premium_preference_quality < 0.0 {
            errors.push(ConfigError::new(
                format!("{field}.bidding"),
                "min_quantity_wh and premium_preference_quality must be >= 0",
            ));
        }
        // positions go out for intervals 1..=horizon of the plan
        if b.horizon == 0 || b.horizon >= self.optimizer.mpc_horizon {
            errors.push(ConfigError::new(
                format!("{field}.bidding.horizon"),
                "must be in [1, optimizer.mpc_horizon)",
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_valid() {
        for name in ScenarioConfig::PRESETS {
            let cfg = ScenarioConfig::from_preset(name).unwrap();
            let errors = cfg.validate();
            assert!(errors.is_empty(), "{name} should be valid: {errors:?}");
        }
    }

    #[test]
    fn from_preset_unknown() {
        let err = ScenarioConfig::from_preset("nonexistent");
        assert!(err.is_err());
        let e = err.unwrap_err();
        assert!(e.message.contains("unknown preset"));
    }

    #[test]
    fn error_display_names_field() {
        let e = ConfigError::new("simulation.intervals", "must be > 0");
        assert_eq!(e.to_string(), "config error: simulation.intervals: must be > 0");
    }

    #[test]
    fn valid_toml_parses() {
        let toml = r#"
[simulation]
start = 1699920000
intervals = 8
seed = 99
parallel = false
history_days = 2

[optimizer]
mpc_horizon = 12
big_m = 50000.0

[optimizer.rtc_weights]
grid = 1.0

[market]
levies_negative = 0.1
target_source = "market"

[market.price]
base = 0.3

[[agents]]
id = "home"
forecast = "naive"
price_forecast = "flat"

[agents.bidding]
strategy = "linear"
horizon = 4

[[agents.assets]]
id = "home_load"
kind = "load"
rating_w = 3000.0

[[agents.assets]]
id = "home_ev"
kind = "ev"
rating_w = 7400.0
capacity_wh = 40000.0
eta_charge = 0.9
eta_discharge = 0.9
charge_from_grid = true
consumption_wh_per_100km = 17000.0

[agents.profiles.home_load]
model = "constant"
power_w = 600.0

[agents.profiles.home_ev]
model = "commute"
depart_hour = 8.0
return_hour = 18.0
distance_km = 30.0
"#;
        let cfg = ScenarioConfig::from_toml_str(toml);
        assert!(cfg.is_ok(), "valid TOML should parse: {:?}", cfg.err());
        let cfg = cfg.unwrap();
        assert_eq!(cfg.simulation.intervals, 8);
        assert_eq!(cfg.optimizer.mpc_horizon, 12);
        assert_eq!(cfg.optimizer.rtc_weights.battery, 0.1);
        assert_eq!(cfg.market.target_source, TargetSource::Market);
        let agent = &cfg.agents[0];
        assert_eq!(agent.forecast, ForecastMethod::Naive);
        assert_eq!(agent.price_forecast, PriceForecast::Flat);
        assert_eq!(agent.bidding.strategy, PricingStrategy::Linear);
        assert_eq!(agent.assets[1].kind, AssetKind::Ev);
        assert_eq!(agent.profiles.len(), 2);
        let errors = cfg.validate();
        assert!(errors.is_empty(), "{errors:?}");
    }

    #[test]
    fn invalid_toml_unknown_field() {
        let toml = r#"
[simulation]
intervals = 4
bogus_field = true
"#;
        assert!(ScenarioConfig::from_toml_str(toml).is_err());
    }

    #[test]
    fn unknown_asset_kind_rejected() {
        let toml = r#"
[[agents]]
id = "a"

[[agents.assets]]
id = "x"
kind = "fusion_reactor"
rating_w = 1.0
"#;
        assert!(ScenarioConfig::from_toml_str(toml).is_err());
    }

    #[test]
    fn validation_requires_agents() {
        let cfg = ScenarioConfig::default();
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.field == "agents"));
    }

    #[test]
    fn validation_catches_unaligned_start() {
        let mut cfg = ScenarioConfig::baseline();
        cfg.simulation.start += 60;
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.field == "simulation.start"));
    }

    #[test]
    fn validation_catches_bidding_beyond_plan() {
        let mut cfg = ScenarioConfig::baseline();
        cfg.agents[0].bidding.horizon = cfg.optimizer.mpc_horizon;
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.field == "agents[0].bidding.horizon"));
    }

    #[test]
    fn validation_catches_inverted_price_band() {
        let mut cfg = ScenarioConfig::baseline();
        cfg.agents[1].bidding.max_bid = 0.05;
        cfg.agents[1].bidding.min_offer = 0.20;
        let errors = cfg.validate();
        assert!(errors
            .iter()
            .any(|e| e.field == "agents[1].bidding" && e.message.contains("min_offer")));
    }

    #[test]
    fn validation_catches_small_big_m() {
        let mut cfg = ScenarioConfig::baseline();
        cfg.optimizer.big_m = 1000.0;
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.field == "optimizer.big_m"));
    }

    #[test]
    fn validation_catches_shared_asset_ids() {
        let mut cfg = ScenarioConfig::baseline();
        cfg.agents[1].assets[0].id = "household_load".into();
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.message.contains("more than once")));
    }

    #[test]
    fn validation_catches_bad_profile() {
        let mut cfg = ScenarioConfig::baseline();
        cfg.agents[0].profiles.insert(
            "household_load".into(),
            ProfileConfig::Solar {
                sunrise_hour: 19.0,
                sunset_hour: 6.0,
                noise_std: 0.0,
            },
        );
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.field == "agents[0].profiles.household_load"));
    }

    #[test]
    fn validation_catches_short_history_for_naive_average() {
        let mut cfg = ScenarioConfig::baseline();
        cfg.simulation.history_days = 2;
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.field == "agents[0].forecast"));
    }
}
