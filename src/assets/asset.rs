//! Static asset specification and per-agent bundle validation.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::types::{AssetKind, Quality};
use crate::error::{DispatchError, Result};

fn one() -> f64 {
    1.0
}

/// One physical plant owned by an agent.
///
/// The struct carries only static data. The state of charge of storage kinds
/// lives in [`crate::state::StateStore`]; `initial_soc_wh` seeds it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Asset {
    /// Identifier, unique within the owning agent.
    pub id: String,
    pub kind: AssetKind,
    /// Power rating in W. Bounds both charge and discharge for storage.
    pub rating_w: f64,
    /// Usable energy capacity in Wh (storage kinds only).
    #[serde(default)]
    pub capacity_wh: f64,
    /// Charging efficiency in (0, 1].
    #[serde(default = "one")]
    pub eta_charge: f64,
    /// Discharging efficiency in (0, 1].
    #[serde(default = "one")]
    pub eta_discharge: f64,
    /// If `false`, output must equal the forecast exactly.
    #[serde(default)]
    pub controllable: bool,
    /// EV may discharge back to the grid.
    #[serde(default)]
    pub v2g: bool,
    /// Battery may charge from grid imports rather than only from PV.
    #[serde(default)]
    pub charge_from_grid: bool,
    /// EV consumption in Wh per 100 km.
    #[serde(default)]
    pub consumption_wh_per_100km: f64,
    #[serde(default)]
    pub quality: Quality,
    /// Starting state of charge in Wh. Defaults to half the capacity.
    #[serde(default)]
    pub initial_soc_wh: Option<f64>,
}

impl Asset {
    /// Creates an asset of `kind` with unit efficiencies and all flags off.
    pub fn new(id: impl Into<String>, kind: AssetKind, rating_w: f64) -> Self {
        Self {
            id: id.into(),
            kind,
            rating_w,
            capacity_wh: 0.0,
            eta_charge: 1.0,
            eta_discharge: 1.0,
            controllable: false,
            v2g: false,
            charge_from_grid: false,
            consumption_wh_per_100km: 0.0,
            quality: Quality::Na,
            initial_soc_wh: None,
        }
    }

    /// Builder-style storage parameters.
    pub fn with_storage(mut self, capacity_wh: f64, eta_charge: f64, eta_discharge: f64) -> Self {
        self.capacity_wh = capacity_wh;
        self.eta_charge = eta_charge;
        self.eta_discharge = eta_discharge;
        self
    }

    /// Starting SoC used when the agent's state is first created.
    pub fn initial_soc(&self) -> f64 {
        self.initial_soc_wh.unwrap_or(self.capacity_wh * 0.5)
    }

    /// Checks the static specification.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Config`] naming the asset and the offending
    /// field when the rating is not positive, a storage asset has no
    /// capacity, an efficiency lies outside `(0, 1]`, or the initial SoC is
    /// outside `[0, capacity]`.
    pub fn validate(&self) -> Result<()> {
        let fail = |what: &str| Err(DispatchError::config(format!("asset {}: {what}", self.id)));

        if self.id.trim().is_empty() {
            return Err(DispatchError::config("asset id must not be empty"));
        }
        if !(self.rating_w.is_finite() && self.rating_w > 0.0) {
            return fail("rating_w must be > 0");
        }
        if !self.kind.is_storage() {
            return Ok(());
        }
        if !(self.capacity_wh.is_finite() && self.capacity_wh > 0.0) {
            return fail("capacity_wh must be > 0 for storage assets");
        }
        for (name, eta) in [
            ("eta_charge", self.eta_charge),
            ("eta_discharge", self.eta_discharge),
        ] {
            if !(eta > 0.0 && eta <= 1.0) {
                return fail(&format!("{name} must be in (0, 1]"));
            }
        }
        if self.consumption_wh_per_100km < 0.0 {
            return fail("consumption_wh_per_100km must be >= 0");
        }
        let soc = self.initial_soc();
        if !(0.0..=self.capacity_wh).contains(&soc) {
            return fail("initial_soc_wh must be in [0, capacity_wh]");
        }
        Ok(())
    }
}

/// Validated, immutable set of assets owned by one agent.
#[derive(Debug, Clone)]
pub struct AgentAssets {
    assets: Vec<Asset>,
}

impl AgentAssets {
    /// Validates every asset and the bundle as a whole.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Config`] if the bundle is empty, ids repeat,
    /// or any single asset fails [`Asset::validate`].
    pub fn new(assets: Vec<Asset>) -> Result<Self> {
        if assets.is_empty() {
            return Err(DispatchError::config("agent must own at least one asset"));
        }
        let mut seen = HashSet::new();
        for asset in &assets {
            asset.validate()?;
            if !seen.insert(asset.id.as_str()) {
                return Err(DispatchError::config(format!(
                    "duplicate asset id {}",
                    asset.id
                )));
            }
        }
        Ok(Self { assets })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Asset> {
        self.assets.iter()
    }

    pub fn get(&self, id: &str) -> Option<&Asset> {
        self.assets.iter().find(|a| a.id == id)
    }

    pub fn storage(&self) -> impl Iterator<Item = &Asset> {
        self.assets.iter().filter(|a| a.kind.is_storage())
    }

    /// `true` when nothing but fixed loads is owned, so there is nothing to decide.
    pub fn is_fixed_load_only(&self) -> bool {
        use super::types::Capability;
        self.assets
            .iter()
            .all(|a| a.kind.capability() == Capability::FixedLoad)
    }

    /// Quality offered to the market for surplus energy.
    pub fn offer_quality(&self) -> Quality {
        if self
            .assets
            .iter()
            .any(|a| a.kind.is_renewable() && a.quality == Quality::GreenLocal)
        {
            Quality::GreenLocal
        } else if self.assets.iter().any(|a| a.quality == Quality::Local) {
            Quality::Local
        } else {
            Quality::Na
        }
    }
}
