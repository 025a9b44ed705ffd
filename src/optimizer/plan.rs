//! Dispatch plans produced by the predictive controller.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::units::Timestamp;

/// Planned dispatch for one delivery interval.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntervalDispatch {
    pub timestamp: Timestamp,
    /// Signed power per asset id (positive = output).
    pub assets: BTreeMap<String, f64>,
    /// Net grid power (positive = export).
    pub grid_w: f64,
    /// Projected interval-end SoC per storage asset. Not committed.
    pub soc_wh: BTreeMap<String, f64>,
    /// Minimum acceptable EV SoC per interval. Informational only.
    pub soc_floor_wh: BTreeMap<String, f64>,
}

/// Ordered, immutable plan over the planning horizon.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DispatchPlan {
    /// First interval the plan covers.
    pub created_at: Timestamp,
    pub intervals: Vec<IntervalDispatch>,
}

impl DispatchPlan {
    pub fn horizon(&self) -> usize {
        self.intervals.len()
    }

    pub fn interval(&self, ts: Timestamp) -> Option<&IntervalDispatch> {
        self.intervals.iter().find(|i| i.timestamp == ts)
    }

    pub fn grid_w_at(&self, ts: Timestamp) -> Option<f64> {
        self.interval(ts).map(|i| i.grid_w)
    }

    pub fn asset_w_at(&self, asset_id: &str, ts: Timestamp) -> Option<f64> {
        self.interval(ts)
            .and_then(|i| i.assets.get(asset_id).copied())
    }

    /// Target grid power per interval, as consumed by the next reconciliation.
    pub fn grid_trajectory(&self) -> Vec<(Timestamp, f64)> {
        self.intervals
            .iter()
            .map(|i| (i.timestamp, i.grid_w))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookups_by_timestamp() {
        let plan = DispatchPlan {
            created_at: 900,
            intervals: vec![
                IntervalDispatch {
                    timestamp: 900,
                    grid_w: -300.0,
                    assets: BTreeMap::from([("load".to_string(), -300.0)]),
                    ..IntervalDispatch::default()
                },
                IntervalDispatch {
                    timestamp: 1800,
                    grid_w: 150.0,
                    ..IntervalDispatch::default()
                },
            ],
        };
        assert_eq!(plan.horizon(), 2);
        assert_eq!(plan.grid_w_at(1800), Some(150.0));
        assert_eq!(plan.grid_w_at(2700), None);
        assert_eq!(plan.asset_w_at("load", 900), Some(-300.0));
        assert_eq!(plan.grid_trajectory(), vec![(900, -300.0), (1800, 150.0)]);
    }
}
