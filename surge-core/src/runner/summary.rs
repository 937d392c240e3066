use std::collections::BTreeMap;
use std::time::Duration;

use surge_metrics::MetricValue;

use super::thresholds_eval::ThresholdResult;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Totals {
    pub iterations: u64,
    /// Iterations that failed a check, got an unexpected status, or raised a workload error.
    pub errors: u64,
    pub requests: u64,
    pub cancelled_iterations: u64,
    pub checks_passed: u64,
    pub checks_failed: u64,
    /// Samples dropped because of a metric kind conflict.
    pub engine_errors: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Some clients were still mid-iteration when the drain timeout expired.
    pub timed_out: bool,
    pub forced_clients: u64,
    pub cancelled_iterations: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimelineReport {
    /// The run reached the end of its last stage (it was neither aborted nor interrupted).
    pub completed: bool,
    pub final_target: u64,
    /// Live clients right before the drain started.
    pub final_live: u64,
    pub peak_live: u64,
}

/// The threshold that stopped the run early.
#[derive(Debug, Clone, PartialEq)]
pub struct AbortInfo {
    pub metric: String,
    pub expression: String,
    pub observed: Option<f64>,
    pub at: Duration,
}

#[derive(Debug, Clone)]
pub struct RunResult {
    /// All thresholds passed on the final evaluation and nothing aborted the run.
    pub passed: bool,
    pub duration: Duration,
    /// The run was cancelled from outside before the timeline finished.
    pub interrupted: bool,
    pub aborted: Option<AbortInfo>,
    pub thresholds: Vec<ThresholdResult>,
    pub totals: Totals,
    pub metrics: BTreeMap<String, MetricValue>,
    pub drain: DrainReport,
    pub timeline: TimelineReport,
}

impl RunResult {
    pub fn failed_thresholds(&self) -> impl Iterator<Item = &ThresholdResult> {
        self.thresholds.iter().filter(|t| !t.passed)
    }

    /// Share of iterations that counted as errors.
    #[must_use]
    pub fn error_rate(&self) -> Option<f64> {
        (self.totals.iterations > 0)
            .then(|| self.totals.errors as f64 / self.totals.iterations as f64)
    }
}
