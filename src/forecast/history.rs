//! Measurement history and the forecast methods that read from it.

use std::collections::{BTreeMap, HashMap};
use std::io::Read;
use std::path::Path;

use serde::Deserialize;

use super::{ForecastProvider, MARKET_SERIES, Signal};
use crate::error::{DispatchError, Result};
use crate::units::{INTERVAL_SECS, SECS_PER_DAY, Timestamp, nth_interval};

/// Days looked back by [`ForecastMethod::NaiveAverage`].
const AVERAGE_DAYS: i64 = 7;

/// Realized values per `(series, signal)`, keyed by interval timestamp.
///
/// Used directly as the "perfect" provider, which is also what the real-time
/// controller reads as metered data for the elapsed interval.
#[derive(Debug, Clone, Default)]
pub struct MeasurementHistory {
    series: HashMap<(String, Signal), BTreeMap<Timestamp, f64>>,
}

#[derive(Debug, Deserialize)]
struct HistoryRow {
    timestamp: Timestamp,
    series: String,
    signal: Signal,
    value: f64,
}

impl MeasurementHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, series: &str, signal: Signal, ts: Timestamp, value: f64) {
        self.series
            .entry((series.to_string(), signal))
            .or_default()
            .insert(ts, value);
    }

    /// Records consecutive interval values starting at `from`.
    pub fn extend(&mut self, series: &str, signal: Signal, from: Timestamp, values: &[f64]) {
        let entry = self.series.entry((series.to_string(), signal)).or_default();
        for (k, v) in values.iter().enumerate() {
            entry.insert(nth_interval(from, k), *v);
        }
    }

    pub fn value(&self, series: &str, signal: Signal, ts: Timestamp) -> Option<f64> {
        self.series
            .get(&(series.to_string(), signal))
            .and_then(|m| m.get(&ts).copied())
    }

    pub fn len(&self) -> usize {
        self.series.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reads `timestamp,series,signal,value` rows.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Csv`] on malformed rows.
    pub fn from_csv_reader(reader: impl Read) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        let mut history = Self::new();
        for row in rdr.deserialize() {
            let row: HistoryRow = row?;
            history.record(&row.series, row.signal, row.timestamp, row.value);
        }
        Ok(history)
    }

    /// Reads a history CSV file.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Io`] if the file cannot be opened, otherwise
    /// see [`MeasurementHistory::from_csv_reader`].
    pub fn from_csv_path(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Self::from_csv_reader(file)
    }

    fn lookup(&self, series: &str, signal: Signal, ts: Timestamp, target: Timestamp) -> Result<f64> {
        self.value(series, signal, ts)
            .ok_or_else(|| missing(series, signal, target))
    }
}

fn missing(series: &str, signal: Signal, ts: Timestamp) -> DispatchError {
    DispatchError::MissingForecast {
        series: series.to_string(),
        signal,
        timestamp: ts,
    }
}

impl ForecastProvider for MeasurementHistory {
    fn forecast(
        &self,
        series: &str,
        signal: Signal,
        from: Timestamp,
        horizon: usize,
    ) -> Result<Vec<(Timestamp, f64)>> {
        (0..horizon)
            .map(|k| {
                let ts = nth_interval(from, k);
                self.lookup(series, signal, ts, ts).map(|v| (ts, v))
            })
            .collect()
    }
}

/// How future values are derived from history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForecastMethod {
    /// The values that will actually be measured.
    #[default]
    Perfect,
    /// The `horizon` values immediately preceding the window, shifted forward.
    Naive,
    /// Mean of the same time of day over the previous seven days.
    NaiveAverage,
    /// [`ForecastMethod::Naive`] followed by a three-point centred moving average.
    Smoothed,
}

/// Applies a [`ForecastMethod`] to a [`MeasurementHistory`].
///
/// EV availability and driving distance come from the owner's schedule and
/// are always returned as measured.
#[derive(Debug, Clone, Copy)]
pub struct HistoryForecaster<'a> {
    history: &'a MeasurementHistory,
    method: ForecastMethod,
}

impl<'a> HistoryForecaster<'a> {
    pub fn new(history: &'a MeasurementHistory, method: ForecastMethod) -> Self {
        Self { history, method }
    }

    fn naive(&self, series: &str, signal: Signal, from: Timestamp, horizon: usize) -> Result<Vec<f64>> {
        let back = horizon as i64 * INTERVAL_SECS;
        (0..horizon)
            .map(|k| {
                let target = nth_interval(from, k);
                self.history.lookup(series, signal, target - back, target)
            })
            .collect()
    }

    fn naive_average(
        &self,
        series: &str,
        signal: Signal,
        from: Timestamp,
        horizon: usize,
    ) -> Result<Vec<f64>> {
        (0..horizon)
            .map(|k| {
                let target = nth_interval(from, k);
                let samples: Vec<f64> = (1..=AVERAGE_DAYS)
                    .map(|d| target - d * SECS_PER_DAY)
                    .filter(|&ts| ts < from)
                    .filter_map(|ts| self.history.value(series, signal, ts))
                    .collect();
                if samples.is_empty() {
                    Err(missing(series, signal, target))
                } else {
                    Ok(samples.iter().sum::<f64>() / samples.len() as f64)
                }
            })
            .collect()
    }
}

fn smooth(values: &[f64]) -> Vec<f64> {
    (0..values.len())
        .map(|i| {
            let lo = i.saturating_sub(1);
            let hi = (i + 1).min(values.len() - 1);
            let window = &values[lo..=hi];
            window.iter().sum::<f64>() / window.len() as f64
        })
        .collect()
}

impl ForecastProvider for HistoryForecaster<'_> {
    fn forecast(
        &self,
        series: &str,
        signal: Signal,
        from: Timestamp,
        horizon: usize,
    ) -> Result<Vec<(Timestamp, f64)>> {
        if matches!(signal, Signal::Availability | Signal::DistanceDriven) {
            return self.history.forecast(series, signal, from, horizon);
        }
        let values = match self.method {
            ForecastMethod::Perfect => return self.history.forecast(series, signal, from, horizon),
            ForecastMethod::Naive => self.naive(series, signal, from, horizon)?,
            ForecastMethod::NaiveAverage => self.naive_average(series, signal, from, horizon)?,
            ForecastMethod::Smoothed => smooth(&self.naive(series, signal, from, horizon)?),
        };
        Ok(values
            .into_iter()
            .enumerate()
            .map(|(k, v)| (nth_interval(from, k), v))
            .collect())
    }
}

/// Replaces the market price series with a constant.
#[derive(Debug, Clone, Copy)]
pub struct FlatPrice<P> {
    inner: P,
    price: f64,
}

impl<P> FlatPrice<P> {
    pub fn new(inner: P, price: f64) -> Self {
        Self { inner, price }
    }
}

impl<P: ForecastProvider> ForecastProvider for FlatPrice<P> {
    fn forecast(
        &self,
        series: &str,
        signal: Signal,
        from: Timestamp,
        horizon: usize,
    ) -> Result<Vec<(Timestamp, f64)>> {
        if series == MARKET_SERIES && signal == Signal::Price {
            return Ok((0..horizon)
                .map(|k| (nth_interval(from, k), self.price))
                .collect());
        }
        self.inner.forecast(series, signal, from, horizon)
    }
}
