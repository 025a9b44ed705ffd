use rand::{Rng, SeedableRng, rngs::StdRng};

use super::Profile;
use crate::forecast::Signal;
use crate::units::{INTERVALS_PER_DAY, INTERVALS_PER_HOUR, SECS_PER_DAY, Timestamp, hour_of_day};

#[derive(Debug, Clone, Copy)]
struct Trip {
    depart_hour: f64,
    return_hour: f64,
}

/// A daily commute: the vehicle leaves once a day and returns the same day.
///
/// Departure and return are jittered per day by up to `jitter_hours`. The
/// day's distance is spread evenly over the intervals spent away.
#[derive(Debug, Clone)]
pub struct Commute {
    pub depart_hour: f64,
    pub return_hour: f64,
    /// Kilometres driven per day.
    pub distance_km: f64,
    pub jitter_hours: f64,
    sampled_day: Option<i64>,
    trip: Trip,
    rng: StdRng,
}

impl Commute {
    pub fn new(depart_hour: f64, return_hour: f64, distance_km: f64, jitter_hours: f64, seed: u64) -> Self {
        Self {
            depart_hour,
            return_hour,
            distance_km: distance_km.max(0.0),
            jitter_hours: jitter_hours.max(0.0),
            sampled_day: None,
            trip: Trip {
                depart_hour,
                return_hour,
            },
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn sample_trip_for_day(&mut self, day: i64) {
        let (depart, ret) = if self.jitter_hours > 0.0 {
            let j = self.jitter_hours;
            (
                self.depart_hour + self.rng.random_range(-j..=j),
                self.return_hour + self.rng.random_range(-j..=j),
            )
        } else {
            (self.depart_hour, self.return_hour)
        };
        let depart = depart.clamp(0.0, 23.75);
        // at least one interval away
        let ret = ret.clamp(depart + 1.0 / INTERVALS_PER_HOUR, 24.0);
        self.sampled_day = Some(day);
        self.trip = Trip {
            depart_hour: depart,
            return_hour: ret,
        };
    }

    fn trip_for(&mut self, ts: Timestamp) -> Trip {
        let day = ts.div_euclid(SECS_PER_DAY);
        if self.sampled_day != Some(day) {
            self.sample_trip_for_day(day);
        }
        self.trip
    }
}

impl Profile for Commute {
    fn signals(&self) -> &'static [Signal] {
        &[Signal::Availability, Signal::DistanceDriven]
    }

    fn sample(&mut self, signal: Signal, ts: Timestamp) -> f64 {
        let trip = self.trip_for(ts);
        let h = hour_of_day(ts);
        let away = h >= trip.depart_hour && h < trip.return_hour;
        match signal {
            Signal::Availability => {
                if away {
                    0.0
                } else {
                    1.0
                }
            }
            Signal::DistanceDriven if away => {
                let first = (trip.depart_hour * INTERVALS_PER_HOUR).ceil();
                let last = (trip.return_hour * INTERVALS_PER_HOUR).ceil();
                let away_intervals = (last - first).clamp(1.0, INTERVALS_PER_DAY as f64);
                self.distance_km / away_intervals
            }
            _ => 0.0,
        }
    }
}
