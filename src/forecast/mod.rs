//! Forecast contract consumed by the optimizer.
//!
//! A [`ForecastProvider`] answers per-series queries. The optimizer never
//! talks to it directly; it reads a [`ForecastTable`] that was collected up
//! front and checked for gaps, so a missing value aborts the interval before
//! any problem is built.

pub mod history;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::assets::{AgentAssets, Asset, Capability};
use crate::error::{DispatchError, Result};
use crate::units::{Timestamp, nth_interval};

pub use history::{FlatPrice, ForecastMethod, HistoryForecaster, MeasurementHistory};

/// Series id under which market-wide signals (price and levies) are keyed.
pub const MARKET_SERIES: &str = "market";

/// Physical or market quantity carried by a forecast series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    /// Average power in W. Positive magnitudes: consumption for loads, output for generators.
    Power,
    /// 1 while an EV is plugged in, 0 otherwise.
    Availability,
    /// Kilometres driven during the interval.
    DistanceDriven,
    /// Energy price in currency per kWh.
    Price,
    /// Levies paid on exported energy, currency per kWh.
    LeviesPositive,
    /// Levies paid on imported energy, currency per kWh.
    LeviesNegative,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Power => "power",
            Self::Availability => "availability",
            Self::DistanceDriven => "distance_driven",
            Self::Price => "price",
            Self::LeviesPositive => "levies_positive",
            Self::LeviesNegative => "levies_negative",
        })
    }
}

/// Market signals the planner prices its objective with.
pub const MARKET_SIGNALS: [Signal; 3] = [Signal::Price, Signal::LeviesPositive, Signal::LeviesNegative];

/// Signals an asset needs per interval.
pub fn asset_signals(asset: &Asset) -> &'static [Signal] {
    match asset.kind.capability() {
        Capability::FixedLoad | Capability::Generation => &[Signal::Power],
        Capability::Storage => &[],
        Capability::MobileStorage => &[Signal::Availability, Signal::DistanceDriven],
    }
}

/// Source of time-indexed predictions.
pub trait ForecastProvider: Send + Sync {
    /// Returns `(timestamp, value)` pairs for `series`/`signal` starting at
    /// `from`. Implementations should cover `[from, from + horizon)` without
    /// gaps; [`ForecastTable::collect`] rejects anything less.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::MissingForecast`] when the underlying data
    /// does not reach the requested window.
    fn forecast(
        &self,
        series: &str,
        signal: Signal,
        from: Timestamp,
        horizon: usize,
    ) -> Result<Vec<(Timestamp, f64)>>;
}

/// Gap-free snapshot of every series an agent needs for one window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ForecastTable {
    start: Timestamp,
    horizon: usize,
    series: BTreeMap<String, BTreeMap<Signal, Vec<f64>>>,
}

impl ForecastTable {
    /// Creates an empty table for `[start, start + horizon)`.
    pub fn new(start: Timestamp, horizon: usize) -> Self {
        Self {
            start,
            horizon,
            series: BTreeMap::new(),
        }
    }

    /// Queries `provider` for every `(series, signal)` pair and checks coverage.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::MissingForecast`] naming the first interval
    /// the provider failed to cover, or the provider's own error.
    pub fn collect<P: ForecastProvider + ?Sized>(
        provider: &P,
        requests: &[(String, Signal)],
        start: Timestamp,
        horizon: usize,
    ) -> Result<Self> {
        let mut table = Self::new(start, horizon);
        for (series, signal) in requests {
            let points: BTreeMap<Timestamp, f64> = provider
                .forecast(series, *signal, start, horizon)?
                .into_iter()
                .collect();
            let mut values = Vec::with_capacity(horizon);
            for k in 0..horizon {
                let ts = nth_interval(start, k);
                match points.get(&ts) {
                    Some(v) if v.is_finite() => values.push(*v),
                    _ => {
                        return Err(DispatchError::MissingForecast {
                            series: series.clone(),
                            signal: *signal,
                            timestamp: ts,
                        });
                    }
                }
            }
            table.insert(series, *signal, values);
        }
        Ok(table)
    }

    /// Collects everything `assets` need, plus the market signals if asked.
    ///
    /// # Errors
    ///
    /// See [`ForecastTable::collect`].
    pub fn for_agent<P: ForecastProvider + ?Sized>(
        provider: &P,
        assets: &AgentAssets,
        start: Timestamp,
        horizon: usize,
        with_market: bool,
    ) -> Result<Self> {
        let mut requests: Vec<(String, Signal)> = assets
            .iter()
            .flat_map(|a| asset_signals(a).iter().map(|s| (a.id.clone(), *s)))
            .collect();
        if with_market {
            requests.extend(MARKET_SIGNALS.iter().map(|s| (MARKET_SERIES.to_string(), *s)));
        }
        Self::collect(provider, &requests, start, horizon)
    }

    /// Stores a series. Values beyond `horizon` are ignored by readers.
    pub fn insert(&mut self, series: &str, signal: Signal, values: Vec<f64>) {
        self.series
            .entry(series.to_string())
            .or_default()
            .insert(signal, values);
    }

    pub fn start(&self) -> Timestamp {
        self.start
    }

    pub fn horizon(&self) -> usize {
        self.horizon
    }

    pub fn timestamps(&self) -> impl Iterator<Item = Timestamp> + '_ {
        (0..self.horizon).map(|k| nth_interval(self.start, k))
    }

    /// Full series for the table window.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::MissingForecast`] if the series is absent or
    /// shorter than the horizon.
    pub fn values(&self, series: &str, signal: Signal) -> Result<&[f64]> {
        let values = self.series.get(series).and_then(|m| m.get(&signal));
        match values {
            Some(v) if v.len() >= self.horizon => Ok(&v[..self.horizon]),
            Some(v) => Err(self.missing(series, signal, v.len())),
            None => Err(self.missing(series, signal, 0)),
        }
    }

    /// Single value at interval index `k`.
    ///
    /// # Errors
    ///
    /// See [`ForecastTable::values`].
    pub fn value(&self, series: &str, signal: Signal, k: usize) -> Result<f64> {
        self.values(series, signal)?
            .get(k)
            .copied()
            .ok_or_else(|| self.missing(series, signal, k))
    }

    fn missing(&self, series: &str, signal: Signal, k: usize) -> DispatchError {
        DispatchError::MissingForecast {
            series: series.to_string(),
            signal,
            timestamp: nth_interval(self.start, k),
        }
    }
}
