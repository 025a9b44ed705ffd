//! Asset kinds and the capability groups the optimizer dispatches on.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Physical plant type owned by an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    Load,
    Pv,
    Battery,
    Ev,
    HeatPump,
    Chp,
    Wind,
    FixedGeneration,
}

/// Constraint block an asset contributes to a dispatch problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// Consumption fixed to its forecast.
    FixedLoad,
    /// Output fixed to, or curtailable below, its forecast.
    Generation,
    /// Stationary storage with a state of charge.
    Storage,
    /// Storage that is only reachable while plugged in and drains while driving.
    MobileStorage,
}

impl AssetKind {
    /// Maps the kind onto its constraint block.
    ///
    /// Heat pumps are dispatched from their electric demand forecast and so
    /// behave like fixed loads.
    pub fn capability(self) -> Capability {
        match self {
            Self::Load | Self::HeatPump => Capability::FixedLoad,
            Self::Pv | Self::Chp | Self::Wind | Self::FixedGeneration => Capability::Generation,
            Self::Battery => Capability::Storage,
            Self::Ev => Capability::MobileStorage,
        }
    }

    pub fn is_storage(self) -> bool {
        matches!(
            self.capability(),
            Capability::Storage | Capability::MobileStorage
        )
    }

    pub fn is_renewable(self) -> bool {
        matches!(self, Self::Pv | Self::Wind)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Load => "load",
            Self::Pv => "pv",
            Self::Battery => "battery",
            Self::Ev => "ev",
            Self::HeatPump => "heat_pump",
            Self::Chp => "chp",
            Self::Wind => "wind",
            Self::FixedGeneration => "fixed_generation",
        }
    }
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Market quality label attached to energy. Not used for physical feasibility.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quality {
    #[default]
    Na,
    Local,
    GreenLocal,
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Na => "na",
            Self::Local => "local",
            Self::GreenLocal => "green_local",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_mapping() {
        assert_eq!(AssetKind::HeatPump.capability(), Capability::FixedLoad);
        assert_eq!(AssetKind::Wind.capability(), Capability::Generation);
        assert_eq!(AssetKind::Ev.capability(), Capability::MobileStorage);
        assert!(AssetKind::Battery.is_storage());
        assert!(!AssetKind::Chp.is_storage());
    }

    #[test]
    fn kinds_parse_from_snake_case() {
        #[derive(Deserialize)]
        struct Wrap {
            kind: AssetKind,
        }
        let w: Wrap = toml::from_str("kind = \"fixed_generation\"").unwrap();
        assert_eq!(w.kind, AssetKind::FixedGeneration);
        assert!(toml::from_str::<Wrap>("kind = \"nuclear\"").is_err());
    }
}
