use std::sync::Arc;
use std::time::Instant;

use crate::metrics::MetricKind;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SampleValue {
    /// Added to a counter.
    Counter(u64),
    /// Replaces a gauge's current value.
    Gauge(i64),
    /// One boolean observation for a rate.
    Rate(bool),
    /// One numeric observation for a trend.
    Trend(f64),
}

impl SampleValue {
    #[must_use]
    pub fn kind(&self) -> MetricKind {
        match self {
            Self::Counter(_) => MetricKind::Counter,
            Self::Gauge(_) => MetricKind::Gauge,
            Self::Rate(_) => MetricKind::Rate,
            Self::Trend(_) => MetricKind::Trend,
        }
    }
}

/// A single immutable observation addressed to a named metric.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub metric: Arc<str>,
    pub value: SampleValue,
    pub at: Instant,
}

impl Sample {
    pub fn new(metric: impl Into<Arc<str>>, value: SampleValue) -> Self {
        Self {
            metric: metric.into(),
            value,
            at: Instant::now(),
        }
    }

    pub fn counter(metric: impl Into<Arc<str>>, value: u64) -> Self {
        Self::new(metric, SampleValue::Counter(value))
    }

    pub fn gauge(metric: impl Into<Arc<str>>, value: i64) -> Self {
        Self::new(metric, SampleValue::Gauge(value))
    }

    pub fn rate(metric: impl Into<Arc<str>>, hit: bool) -> Self {
        Self::new(metric, SampleValue::Rate(hit))
    }

    pub fn trend(metric: impl Into<Arc<str>>, value: f64) -> Self {
        Self::new(metric, SampleValue::Trend(value))
    }

    #[must_use]
    pub fn kind(&self) -> MetricKind {
        self.value.kind()
    }
}
