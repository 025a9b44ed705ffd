//! Time grid and unit constants.
//!
//! Power is in W, energy in Wh, and timestamps are Unix seconds aligned to
//! the 15-minute delivery grid.

/// Unix timestamp in seconds.
pub type Timestamp = i64;

/// Length of one delivery interval in seconds.
pub const INTERVAL_SECS: i64 = 900;

/// Delivery intervals per hour.
pub const INTERVALS_PER_HOUR: f64 = 4.0;

/// Duration of one interval in hours.
pub const HOURS_PER_INTERVAL: f64 = 0.25;

/// Delivery intervals per day.
pub const INTERVALS_PER_DAY: usize = 96;

pub const SECS_PER_DAY: i64 = 86_400;

/// Returns `true` if `ts` lies on an interval boundary.
pub fn is_aligned(ts: Timestamp) -> bool {
    ts.rem_euclid(INTERVAL_SECS) == 0
}

/// Timestamp of the `k`-th interval after `from`.
pub fn nth_interval(from: Timestamp, k: usize) -> Timestamp {
    from + k as i64 * INTERVAL_SECS
}

/// Fractional hour of day (UTC) at `ts`, in `[0, 24)`.
pub fn hour_of_day(ts: Timestamp) -> f64 {
    ts.rem_euclid(SECS_PER_DAY) as f64 / 3600.0
}

/// Converts an average power over one interval into energy.
pub fn interval_energy_wh(power_w: f64) -> f64 {
    power_w * HOURS_PER_INTERVAL
}
