//! Error types shared by the dispatch core.

use std::time::Duration;

use thiserror::Error;

use crate::forecast::Signal;
use crate::units::Timestamp;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("config error: {0}")]
    Config(String),

    #[error("missing forecast for {series}/{signal} at {timestamp}")]
    MissingForecast {
        series: String,
        signal: Signal,
        timestamp: Timestamp,
    },

    #[error("optimization infeasible: {0}")]
    Infeasible(String),

    #[error("optimization unbounded: {0}")]
    Unbounded(String),

    #[error("solver error: {0}")]
    Solver(String),

    #[error("solver did not finish within {0:?}")]
    SolverTimeout(Duration),

    #[error("market error: {0}")]
    Market(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("state serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DispatchError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}

pub type Result<T> = std::result::Result<T, DispatchError>;
