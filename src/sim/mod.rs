/// Interval clock.
pub mod clock;
pub mod engine;
pub mod kpi;
pub mod types;
