use std::f64::consts::PI;

use rand::{SeedableRng, rngs::StdRng};

use super::{Profile, gaussian_noise};
use crate::forecast::Signal;
use crate::units::{Timestamp, hour_of_day};

/// A daily sinusoid with Gaussian noise, never below zero.
///
/// With `phase_rad = 0` the curve crosses its baseline rising at midnight;
/// `-PI / 2` puts the minimum at midnight and the peak at noon.
///
/// # Examples
///
/// ```
/// use prosumer_dispatch::forecast::Signal;
/// use prosumer_dispatch::profiles::{DailySinusoid, Profile};
///
/// let mut load = DailySinusoid::new(Signal::Power, 1000.0, 500.0, 0.0, 0.0, 42);
/// assert!((load.sample(Signal::Power, 6 * 3600) - 1500.0).abs() < 1e-6);
/// ```
#[derive(Debug, Clone)]
pub struct DailySinusoid {
    signal: Signal,
    /// Baseline value
    pub base: f64,
    /// Amplitude of the daily variation
    pub amp: f64,
    /// Phase offset in radians
    pub phase_rad: f64,
    /// Standard deviation of the additive noise
    pub noise_std: f64,
    rng: StdRng,
}

impl DailySinusoid {
    pub fn new(signal: Signal, base: f64, amp: f64, phase_rad: f64, noise_std: f64, seed: u64) -> Self {
        Self {
            signal,
            base,
            amp,
            phase_rad,
            noise_std: noise_std.max(0.0),
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Profile for DailySinusoid {
    fn signals(&self) -> &'static [Signal] {
        match self.signal {
            Signal::Power => &[Signal::Power],
            Signal::Price => &[Signal::Price],
            Signal::LeviesPositive => &[Signal::LeviesPositive],
            Signal::LeviesNegative => &[Signal::LeviesNegative],
            Signal::Availability => &[Signal::Availability],
            Signal::DistanceDriven => &[Signal::DistanceDriven],
        }
    }

    fn sample(&mut self, _signal: Signal, ts: Timestamp) -> f64 {
        let day_pos = hour_of_day(ts) / 24.0;
        let angle = 2.0 * PI * day_pos + self.phase_rad;
        let noise = gaussian_noise(&mut self.rng, self.noise_std);
        (self.base + self.amp * angle.sin() + noise).max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peak_and_trough_follow_phase() {
        let mut p = DailySinusoid::new(Signal::Power, 1000.0, 400.0, -PI / 2.0, 0.0, 0);
        assert!((p.sample(Signal::Power, 0) - 600.0).abs() < 1e-6);
        assert!((p.sample(Signal::Power, 12 * 3600) - 1400.0).abs() < 1e-6);
    }

    #[test]
    fn never_negative() {
        let mut p = DailySinusoid::new(Signal::Power, 0.0, 100.0, 0.0, 50.0, 9);
        for k in 0..96 {
            assert!(p.sample(Signal::Power, k * 900) >= 0.0);
        }
    }

    #[test]
    fn deterministic_for_same_seed() {
        let mut a = DailySinusoid::new(Signal::Price, 0.2, 0.05, 0.0, 0.01, 5);
        let mut b = DailySinusoid::new(Signal::Price, 0.2, 0.05, 0.0, 0.01, 5);
        for k in 0..10 {
            assert_eq!(a.sample(Signal::Price, k * 900), b.sample(Signal::Price, k * 900));
        }
    }
}
