use std::f64::consts::PI;

use rand::{SeedableRng, rngs::StdRng};

use super::{Profile, gaussian_noise};
use crate::forecast::Signal;
use crate::units::{Timestamp, hour_of_day};

/// A solar PV generator with a half-sine profile between sunrise and sunset.
///
/// Output is a positive magnitude in W and zero at night.
#[derive(Debug, Clone)]
pub struct SolarPv {
    /// Output under ideal conditions in W.
    pub peak_w: f64,
    /// Hour of day when generation starts (inclusive).
    pub sunrise_hour: f64,
    /// Hour of day when generation stops (exclusive).
    pub sunset_hour: f64,
    /// Standard deviation of the multiplicative noise, as a fraction of output.
    pub noise_std: f64,
    rng: StdRng,
}

impl SolarPv {
    pub fn new(peak_w: f64, sunrise_hour: f64, sunset_hour: f64, noise_std: f64, seed: u64) -> Self {
        Self {
            peak_w: peak_w.max(0.0),
            sunrise_hour,
            sunset_hour,
            noise_std: noise_std.max(0.0),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn daylight_frac(&self, ts: Timestamp) -> f64 {
        let h = hour_of_day(ts);
        if h < self.sunrise_hour || h >= self.sunset_hour {
            return 0.0;
        }
        let x = (h - self.sunrise_hour) / (self.sunset_hour - self.sunrise_hour);
        (PI * x).sin().max(0.0)
    }
}

impl Profile for SolarPv {
    fn signals(&self) -> &'static [Signal] {
        &[Signal::Power]
    }

    fn sample(&mut self, _signal: Signal, ts: Timestamp) -> f64 {
        let frac = self.daylight_frac(ts);
        if frac <= 0.0 {
            return 0.0;
        }
        let noise_mult = 1.0 + gaussian_noise(&mut self.rng, self.noise_std);
        (self.peak_w * frac * noise_mult).max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_at_night_peak_at_noon() {
        let mut pv = SolarPv::new(5000.0, 6.0, 18.0, 0.0, 42);
        assert_eq!(pv.sample(Signal::Power, 3 * 3600), 0.0);
        assert_eq!(pv.sample(Signal::Power, 18 * 3600), 0.0);
        assert!((pv.sample(Signal::Power, 12 * 3600) - 5000.0).abs() < 1e-6);
        assert!((pv.sample(Signal::Power, 9 * 3600) - 5000.0 * (PI / 4.0).sin()).abs() < 1e-6);
    }

    #[test]
    fn negative_peak_clamped_to_zero() {
        let pv = SolarPv::new(-1.0, 6.0, 18.0, 0.05, 42);
        assert_eq!(pv.peak_w, 0.0);
    }
}
