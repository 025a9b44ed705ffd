use crate::units::{INTERVAL_SECS, Timestamp};

/// A simulation clock that walks interval-aligned timestamps.
///
/// # Examples
///
/// ```
/// use prosumer_dispatch::sim::clock::Clock;
///
/// let mut clock = Clock::new(1800, 3);
/// let mut seen = Vec::new();
///
/// clock.run(|ts| seen.push(ts));
/// assert_eq!(seen, vec![1800, 2700, 3600]);
/// ```
pub struct Clock {
    start: Timestamp,
    /// Intervals already handed out
    current: usize,
    /// Total intervals to run
    total: usize,
}

impl Clock {
    /// Creates a clock starting at `start` that runs for `total` intervals.
    pub fn new(start: Timestamp, total: usize) -> Self {
        Self {
            start,
            current: 0,
            total,
        }
    }

    /// Advances the clock by one interval.
    ///
    /// # Returns
    ///
    /// * `Some(ts)` - Start of the interval before advancing
    /// * `None` - If the clock has reached its total intervals
    pub fn tick(&mut self) -> Option<Timestamp> {
        if self.current < self.total {
            let ts = self.start + self.current as i64 * INTERVAL_SECS;
            self.current += 1;
            Some(ts)
        } else {
            None
        }
    }

    /// Intervals not yet handed out.
    pub fn remaining(&self) -> usize {
        self.total - self.current
    }

    /// Runs a function for each remaining interval.
    pub fn run(&mut self, mut f: impl FnMut(Timestamp)) {
        while let Some(ts) = self.tick() {
            f(ts);
        }
    }
}
