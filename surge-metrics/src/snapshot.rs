use hdrhistogram::Histogram;

use crate::metrics::{MetricKind, MetricValue, TREND_SCALE, TrendSummary, quantile};
use crate::metrics::{summarize_histogram, unscale_trend_value};

/// Point-in-time copy of one metric's aggregate.
///
/// Snapshots are detached from the registry: later samples never change a snapshot, and reading a
/// snapshot never blocks writers.
#[derive(Debug, Clone)]
pub struct MetricSnapshot {
    pub name: String,
    pub value: SnapshotValue,
}

#[derive(Debug, Clone)]
pub enum SnapshotValue {
    Counter(u64),
    Gauge(i64),
    Rate { total: u64, hits: u64 },
    Trend(TrendSnapshot),
}

impl MetricSnapshot {
    #[must_use]
    pub fn kind(&self) -> MetricKind {
        match &self.value {
            SnapshotValue::Counter(_) => MetricKind::Counter,
            SnapshotValue::Gauge(_) => MetricKind::Gauge,
            SnapshotValue::Rate { .. } => MetricKind::Rate,
            SnapshotValue::Trend(_) => MetricKind::Trend,
        }
    }

    /// True when nothing has been recorded yet.
    ///
    /// A counter only counts as empty while it is zero; gauges are never empty once registered
    /// through a sample.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match &self.value {
            SnapshotValue::Counter(v) => *v == 0,
            SnapshotValue::Gauge(_) => false,
            SnapshotValue::Rate { total, .. } => *total == 0,
            SnapshotValue::Trend(t) => t.count() == 0,
        }
    }

    #[must_use]
    pub fn summary(&self) -> MetricValue {
        match &self.value {
            SnapshotValue::Counter(v) => MetricValue::Counter(*v),
            SnapshotValue::Gauge(v) => MetricValue::Gauge(*v),
            SnapshotValue::Rate { total, hits } => MetricValue::Rate {
                total: *total,
                hits: *hits,
                rate: rate_of(*total, *hits),
            },
            SnapshotValue::Trend(t) => MetricValue::Trend(t.summary()),
        }
    }
}

pub(crate) fn rate_of(total: u64, hits: u64) -> Option<f64> {
    (total > 0).then(|| hits as f64 / total as f64)
}

#[derive(Debug, Clone)]
pub struct TrendSnapshot {
    histogram: Histogram<u64>,
}

impl TrendSnapshot {
    pub(crate) fn new(histogram: Histogram<u64>) -> Self {
        Self { histogram }
    }

    #[must_use]
    pub fn count(&self) -> u64 {
        self.histogram.len()
    }

    /// Percentile in `0..=100`.
    #[must_use]
    pub fn percentile(&self, p: f64) -> Option<f64> {
        quantile(&self.histogram, p / 100.0)
    }

    #[must_use]
    pub fn median(&self) -> Option<f64> {
        self.percentile(50.0)
    }

    #[must_use]
    pub fn mean(&self) -> Option<f64> {
        (self.count() > 0).then(|| self.histogram.mean() / TREND_SCALE)
    }

    #[must_use]
    pub fn min(&self) -> Option<f64> {
        (self.count() > 0).then(|| unscale_trend_value(self.histogram.min()))
    }

    #[must_use]
    pub fn max(&self) -> Option<f64> {
        (self.count() > 0).then(|| unscale_trend_value(self.histogram.max()))
    }

    #[must_use]
    pub fn summary(&self) -> TrendSummary {
        summarize_histogram(&self.histogram)
    }
}
