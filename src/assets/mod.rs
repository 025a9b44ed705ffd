//! Asset descriptions, validation, and storage projections.

pub mod asset;
pub mod storage;
pub mod types;

pub use asset::{AgentAssets, Asset};
pub use types::{AssetKind, Capability, Quality};
