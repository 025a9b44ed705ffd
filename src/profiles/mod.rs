//! Synthetic measurement profiles for simulated assets and the market.
//!
//! Profiles stand in for metering data: the simulation samples them once
//! over the whole run and writes the result into a
//! [`MeasurementHistory`], which then serves both as the "actual" values
//! for reconciliation and as the source for forecasts.

use std::f64::consts::PI;

use rand::{Rng, rngs::StdRng};
use serde::Deserialize;

use crate::assets::{Asset, AssetKind};
use crate::forecast::{MeasurementHistory, Signal};
use crate::units::{Timestamp, nth_interval};

/// Electric vehicle commute schedule.
pub mod commute;
/// Daily sinusoid for loads, wind, and prices.
pub mod sinusoid;
/// Half-sine solar generation.
pub mod solar;

pub use commute::Commute;
pub use sinusoid::DailySinusoid;
pub use solar::SolarPv;

/// A generator of per-interval measurements.
pub trait Profile {
    /// Signals this profile produces, in the order they are sampled.
    fn signals(&self) -> &'static [Signal];

    /// Value of `signal` for the interval starting at `ts`.
    fn sample(&mut self, signal: Signal, ts: Timestamp) -> f64;
}

/// Serializable profile description, tagged by `model`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case", deny_unknown_fields)]
pub enum ProfileConfig {
    Sinusoid {
        base_w: f64,
        amp_w: f64,
        #[serde(default)]
        phase_rad: f64,
        #[serde(default)]
        noise_std_w: f64,
    },
    /// Output scales with the asset's rating.
    Solar {
        sunrise_hour: f64,
        sunset_hour: f64,
        #[serde(default)]
        noise_std: f64,
    },
    Commute {
        depart_hour: f64,
        return_hour: f64,
        distance_km: f64,
        #[serde(default)]
        jitter_hours: f64,
    },
    Constant {
        power_w: f64,
    },
}

impl ProfileConfig {
    /// A plausible default for `asset`, or `None` for assets without measurements.
    pub fn default_for(asset: &Asset) -> Option<Self> {
        let r = asset.rating_w;
        match asset.kind {
            AssetKind::Load => Some(Self::Sinusoid {
                base_w: 0.2 * r,
                amp_w: 0.1 * r,
                phase_rad: -PI / 2.0,
                noise_std_w: 0.02 * r,
            }),
            AssetKind::HeatPump => Some(Self::Sinusoid {
                base_w: 0.5 * r,
                amp_w: 0.2 * r,
                phase_rad: PI / 2.0,
                noise_std_w: 0.02 * r,
            }),
            AssetKind::Wind => Some(Self::Sinusoid {
                base_w: 0.3 * r,
                amp_w: 0.1 * r,
                phase_rad: 0.0,
                noise_std_w: 0.05 * r,
            }),
            AssetKind::Pv => Some(Self::Solar {
                sunrise_hour: 6.0,
                sunset_hour: 18.0,
                noise_std: 0.05,
            }),
            AssetKind::Chp | AssetKind::FixedGeneration => Some(Self::Constant { power_w: 0.5 * r }),
            AssetKind::Ev => Some(Self::Commute {
                depart_hour: 7.5,
                return_hour: 17.5,
                distance_km: 40.0,
                jitter_hours: 0.5,
            }),
            AssetKind::Battery => None,
        }
    }

    /// Checks the parameters and that the profile produces what `asset` needs.
    ///
    /// # Errors
    ///
    /// Returns a human-readable message naming the offending parameter.
    pub fn validate(&self, asset: &Asset) -> Result<(), String> {
        let expected = crate::forecast::asset_signals(asset);
        let produced: &[Signal] = match self {
            Self::Commute { .. } => &[Signal::Availability, Signal::DistanceDriven],
            _ => &[Signal::Power],
        };
        if expected != produced {
            return Err(format!("profile does not fit asset kind {}", asset.kind));
        }
        match *self {
            Self::Sinusoid {
                base_w,
                amp_w,
                noise_std_w,
                ..
            } => {
                if base_w < 0.0 || amp_w < 0.0 || noise_std_w < 0.0 {
                    return Err("sinusoid parameters must be >= 0".into());
                }
            }
            Self::Solar {
                sunrise_hour,
                sunset_hour,
                noise_std,
            } => {
                if !(0.0..24.0).contains(&sunrise_hour) || sunset_hour <= sunrise_hour || sunset_hour > 24.0 {
                    return Err("solar needs 0 <= sunrise_hour < sunset_hour <= 24".into());
                }
                if noise_std < 0.0 {
                    return Err("noise_std must be >= 0".into());
                }
            }
            Self::Commute {
                depart_hour,
                return_hour,
                distance_km,
                jitter_hours,
            } => {
                if !(0.0..24.0).contains(&depart_hour) || return_hour <= depart_hour || return_hour > 24.0 {
                    return Err("commute needs 0 <= depart_hour < return_hour <= 24".into());
                }
                if distance_km < 0.0 || jitter_hours < 0.0 {
                    return Err("distance_km and jitter_hours must be >= 0".into());
                }
            }
            Self::Constant { power_w } => {
                if power_w < 0.0 {
                    return Err("power_w must be >= 0".into());
                }
            }
        }
        Ok(())
    }

    /// Instantiates the generator for `asset`.
    pub fn build(&self, asset: &Asset, seed: u64) -> Box<dyn Profile> {
        match *self {
            Self::Sinusoid {
                base_w,
                amp_w,
                phase_rad,
                noise_std_w,
            } => Box::new(DailySinusoid::new(
                Signal::Power,
                base_w,
                amp_w,
                phase_rad,
                noise_std_w,
                seed,
            )),
            Self::Solar {
                sunrise_hour,
                sunset_hour,
                noise_std,
            } => Box::new(SolarPv::new(
                asset.rating_w,
                sunrise_hour,
                sunset_hour,
                noise_std,
                seed,
            )),
            Self::Commute {
                depart_hour,
                return_hour,
                distance_km,
                jitter_hours,
            } => Box::new(Commute::new(
                depart_hour,
                return_hour,
                distance_km,
                jitter_hours,
                seed,
            )),
            Self::Constant { power_w } => Box::new(DailySinusoid::new(
                Signal::Power,
                power_w,
                0.0,
                0.0,
                0.0,
                seed,
            )),
        }
    }
}

/// Samples `count` intervals from `from` into `history` under `series`.
pub fn record(
    profile: &mut dyn Profile,
    series: &str,
    history: &mut MeasurementHistory,
    from: Timestamp,
    count: usize,
) {
    for k in 0..count {
        let ts = nth_interval(from, k);
        for &signal in profile.signals() {
            let value = profile.sample(signal, ts);
            history.record(series, signal, ts, value);
        }
    }
}

/// Gaussian noise via the Box-Muller transform.
///
/// # Arguments
///
/// * `rng` - Random number generator
/// * `std_dev` - Standard deviation of the noise
pub fn gaussian_noise(rng: &mut StdRng, std_dev: f64) -> f64 {
    if std_dev <= 0.0 {
        return 0.0;
    }

    let u1: f64 = rng.random::<f64>().clamp(1e-12, 1.0);
    let u2: f64 = rng.random::<f64>();
    let z0 = (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos();
    z0 * std_dev
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn noise_is_zero_without_spread() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(gaussian_noise(&mut rng, 0.0), 0.0);
    }

    #[test]
    fn noise_has_roughly_the_requested_spread() {
        let mut rng = StdRng::seed_from_u64(7);
        let n = 20_000;
        let samples: Vec<f64> = (0..n).map(|_| gaussian_noise(&mut rng, 2.0)).collect();
        let mean = samples.iter().sum::<f64>() / n as f64;
        let var = samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n as f64;
        assert!(mean.abs() < 0.1);
        assert!((var.sqrt() - 2.0).abs() < 0.1);
    }

    #[test]
    fn defaults_fit_their_assets() {
        for kind in [
            AssetKind::Load,
            AssetKind::Pv,
            AssetKind::Ev,
            AssetKind::HeatPump,
            AssetKind::Chp,
            AssetKind::Wind,
            AssetKind::FixedGeneration,
        ] {
            let mut asset = Asset::new("a", kind, 4000.0);
            if kind.is_storage() {
                asset = asset.with_storage(40_000.0, 0.95, 0.95);
            }
            let profile = ProfileConfig::default_for(&asset).unwrap();
            assert_eq!(profile.validate(&asset), Ok(()), "{kind}");
        }
        let battery = Asset::new("b", AssetKind::Battery, 3000.0);
        assert!(ProfileConfig::default_for(&battery).is_none());
    }

    #[test]
    fn mismatched_profile_is_rejected() {
        let load = Asset::new("l", AssetKind::Load, 1000.0);
        let commute = ProfileConfig::Commute {
            depart_hour: 8.0,
            return_hour: 17.0,
            distance_km: 30.0,
            jitter_hours: 0.0,
        };
        assert!(commute.validate(&load).is_err());
    }

    #[test]
    fn record_fills_every_interval() {
        let asset = Asset::new("pv", AssetKind::Pv, 5000.0);
        let mut profile = ProfileConfig::default_for(&asset).unwrap().build(&asset, 3);
        let mut history = MeasurementHistory::new();
        record(profile.as_mut(), "pv", &mut history, 0, 96);
        assert_eq!(history.len(), 96);
        assert_eq!(history.value("pv", Signal::Power, 0), Some(0.0));
        assert!(history.value("pv", Signal::Power, 12 * 3600).unwrap() > 4000.0);
    }

    #[test]
    fn config_parses_tagged_models() {
        let cfg: ProfileConfig =
            toml::from_str("model = \"solar\"\nsunrise_hour = 5.0\nsunset_hour = 20.0\n").unwrap();
        assert_eq!(
            cfg,
            ProfileConfig::Solar {
                sunrise_hour: 5.0,
                sunset_hour: 20.0,
                noise_std: 0.0
            }
        );
    }
}
