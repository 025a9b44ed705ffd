//! Candidate orders.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::assets::Quality;
use crate::units::Timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionKind {
    /// Wants to buy (net consumption).
    Bid,
    /// Wants to sell (net surplus).
    Offer,
}

impl fmt::Display for PositionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Bid => "bid",
            Self::Offer => "offer",
        })
    }
}

/// One order for one delivery interval. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketPosition {
    pub agent_id: String,
    /// Whole Wh, negative for bids and positive for offers.
    pub energy_wh: f64,
    /// Unit price in the market's fixed-point unit per Wh.
    pub price: i64,
    pub kind: PositionKind,
    pub delivery: Timestamp,
    pub quality: Quality,
    /// Premium the agent pays for its preferred quality, fixed point per Wh.
    pub premium: i64,
}

impl MarketPosition {
    pub fn quantity_wh(&self) -> f64 {
        self.energy_wh.abs()
    }
}

impl fmt::Display for MarketPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {:>8.0} Wh @ {} ({}, +{}) for {}",
            self.agent_id,
            self.kind,
            self.quantity_wh(),
            self.price,
            self.quality,
            self.premium,
            self.delivery
        )
    }
}
