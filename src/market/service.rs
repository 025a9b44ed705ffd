//! Boundary to the market-clearing service.

use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;
use tracing::debug;

use super::position::{MarketPosition, PositionKind};
use crate::error::Result;
use crate::units::{Timestamp, is_aligned};

/// Outcome of submitting one position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitStatus {
    Accepted,
    Rejected(String),
}

impl SubmitStatus {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }
}

/// Market operations an agent depends on. Shared between agents that run in
/// parallel, so implementations serialize internally.
pub trait MarketService: Send + Sync {
    /// Signed net energy already cleared for `agent_id` at `delivery` in Wh
    /// (positive = sold).
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::DispatchError::Market`] if the market cannot answer.
    fn matched_volume(&self, agent_id: &str, delivery: Timestamp) -> Result<f64>;

    /// Submits a batch; the result has one status per position, in order.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::DispatchError::Market`] if the batch as a whole fails.
    fn submit_positions(&self, positions: &[MarketPosition]) -> Result<Vec<SubmitStatus>>;

    /// Withdraws every open position of `agent_id`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::DispatchError::Market`] if the market cannot answer.
    fn clear_open_positions(&self, agent_id: &str) -> Result<()>;
}

type PositionKey = (String, Timestamp, PositionKind);

#[derive(Debug, Default)]
struct Book {
    open: BTreeMap<PositionKey, MarketPosition>,
    matched: HashMap<(String, Timestamp), f64>,
}

/// Order book kept in memory. Clearing itself happens elsewhere; matches are
/// fed in through [`InMemoryMarket::record_match`].
#[derive(Debug, Default)]
pub struct InMemoryMarket {
    book: Mutex<Book>,
}

impl InMemoryMarket {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds signed cleared energy for an agent and interval.
    pub fn record_match(&self, agent_id: &str, delivery: Timestamp, energy_wh: f64) {
        let mut book = self.book.lock();
        *book
            .matched
            .entry((agent_id.to_string(), delivery))
            .or_default() += energy_wh;
    }

    pub fn open_positions(&self, agent_id: &str) -> Vec<MarketPosition> {
        self.book
            .lock()
            .open
            .values()
            .filter(|p| p.agent_id == agent_id)
            .cloned()
            .collect()
    }

    pub fn open_count(&self) -> usize {
        self.book.lock().open.len()
    }

    fn check(position: &MarketPosition) -> std::result::Result<(), String> {
        if !is_aligned(position.delivery) {
            return Err(format!("delivery {} is not on the interval grid", position.delivery));
        }
        if position.energy_wh == 0.0 || !position.energy_wh.is_finite() {
            return Err("energy must be nonzero".to_string());
        }
        let sign_ok = match position.kind {
            PositionKind::Bid => position.energy_wh < 0.0,
            PositionKind::Offer => position.energy_wh > 0.0,
        };
        if !sign_ok {
            return Err(format!("{} with energy {}", position.kind, position.energy_wh));
        }
        if position.price < 0 || position.premium < 0 {
            return Err("negative price".to_string());
        }
        Ok(())
    }
}

impl MarketService for InMemoryMarket {
    fn matched_volume(&self, agent_id: &str, delivery: Timestamp) -> Result<f64> {
        Ok(self
            .book
            .lock()
            .matched
            .get(&(agent_id.to_string(), delivery))
            .copied()
            .unwrap_or(0.0))
    }

    fn submit_positions(&self, positions: &[MarketPosition]) -> Result<Vec<SubmitStatus>> {
        let mut book = self.book.lock();
        let statuses = positions
            .iter()
            .map(|p| match Self::check(p) {
                Ok(()) => {
                    // one open position per agent, interval, and side
                    book.open
                        .insert((p.agent_id.clone(), p.delivery, p.kind), p.clone());
                    SubmitStatus::Accepted
                }
                Err(reason) => SubmitStatus::Rejected(reason),
            })
            .collect();
        Ok(statuses)
    }

    fn clear_open_positions(&self, agent_id: &str) -> Result<()> {
        let mut book = self.book.lock();
        let before = book.open.len();
        book.open.retain(|(agent, _, _), _| agent != agent_id);
        debug!(agent = agent_id, removed = before - book.open.len(), "cleared positions");
        Ok(())
    }
}
