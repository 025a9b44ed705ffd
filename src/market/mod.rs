//! Market positions, the market service boundary, and bid/offer generation.

pub mod bidding;
pub mod position;
pub mod service;

pub use bidding::{BiddingConfig, BiddingEngine, PricingStrategy};
pub use position::{MarketPosition, PositionKind};
pub use service::{InMemoryMarket, MarketService, SubmitStatus};
