//! Wall-clock gap correction.
//!
//! Training may pause (preemption, restarts) for hours. Any interval between
//! consecutive records longer than the threshold is treated as dead time:
//! its excess over the running average interval accumulates into a
//! correction that is subtracted from every later wall-clock time.

use serde::{Deserialize, Serialize};

/// Persisted gap correction state for one job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GapState {
    /// Seconds subtracted from raw wall-clock times.
    pub cumulative_gap: f64,
    /// Running mean of the intervals at or below the threshold.
    pub average_gap: f64,
    pub gap_samples: u64,
    pub last_wall_time: Option<f64>,
}

/// Applies gap correction with a fixed threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GapCorrector {
    pub threshold_secs: f64,
}

impl GapCorrector {
    pub fn new(threshold_secs: f64) -> Self {
        Self { threshold_secs }
    }

    /// Corrected wall time for a record logged at `wall_time`.
    ///
    /// Records that go back in time count as a zero interval.
    pub fn correct(&self, state: &mut GapState, wall_time: f64) -> f64 {
        let Some(last) = state.last_wall_time else {
            state.last_wall_time = Some(wall_time);
            return wall_time - state.cumulative_gap;
        };
        let gap = (wall_time - last).max(0.0);
        if gap > self.threshold_secs {
            state.cumulative_gap += gap - state.average_gap;
        } else {
            state.gap_samples += 1;
            state.average_gap += (gap - state.average_gap) / state.gap_samples as f64;
        }
        state.last_wall_time = Some(wall_time);
        wall_time - state.cumulative_gap
    }
}
