use hdrhistogram::Histogram;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Trend values are recorded with three decimal places of precision.
///
/// A trend fed with milliseconds therefore resolves down to microseconds.
pub(crate) const TREND_SCALE: f64 = 1_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum MetricKind {
    Counter,
    Gauge,
    Rate,
    Trend,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    Counter(u64),
    Gauge(i64),
    Rate {
        total: u64,
        hits: u64,
        rate: Option<f64>,
    },
    Trend(TrendSummary),
}

impl MetricValue {
    #[must_use]
    pub fn kind(&self) -> MetricKind {
        match self {
            Self::Counter(_) => MetricKind::Counter,
            Self::Gauge(_) => MetricKind::Gauge,
            Self::Rate { .. } => MetricKind::Rate,
            Self::Trend(_) => MetricKind::Trend,
        }
    }

    /// Number of samples folded into this value, where that is meaningful.
    #[must_use]
    pub fn sample_count(&self) -> u64 {
        match self {
            Self::Counter(v) => *v,
            Self::Gauge(_) => 1,
            Self::Rate { total, .. } => *total,
            Self::Trend(t) => t.count,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrendSummary {
    pub p50: Option<f64>,
    pub p75: Option<f64>,
    pub p90: Option<f64>,
    pub p95: Option<f64>,
    pub p99: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mean: Option<f64>,
    pub stdev: Option<f64>,
    pub count: u64,
}

pub(crate) fn new_default_histogram() -> Histogram<u64> {
    // Upper bound: 1 hour expressed in scaled milliseconds.
    match Histogram::<u64>::new_with_bounds(1, 3_600_000_000, 3) {
        Ok(h) => h,
        Err(err) => panic!("failed to create histogram: {err}"),
    }
}

#[inline]
pub(crate) fn scale_trend_value(v: f64) -> u64 {
    if !v.is_finite() || v <= 0.0 {
        return 0;
    }
    (v * TREND_SCALE).round() as u64
}

#[inline]
pub(crate) fn unscale_trend_value(v: u64) -> f64 {
    v as f64 / TREND_SCALE
}

pub(crate) fn quantile(h: &Histogram<u64>, q: f64) -> Option<f64> {
    (!h.is_empty()).then(|| unscale_trend_value(h.value_at_quantile(q.clamp(0.0, 1.0))))
}

pub(crate) fn summarize_histogram(h: &Histogram<u64>) -> TrendSummary {
    let count = h.len();
    let nonempty = count > 0;

    TrendSummary {
        p50: quantile(h, 0.50),
        p75: quantile(h, 0.75),
        p90: quantile(h, 0.90),
        p95: quantile(h, 0.95),
        p99: quantile(h, 0.99),
        min: nonempty.then(|| unscale_trend_value(h.min())),
        max: nonempty.then(|| unscale_trend_value(h.max())),
        mean: nonempty.then(|| h.mean() / TREND_SCALE),
        stdev: nonempty.then(|| h.stdev() / TREND_SCALE),
        count,
    }
}

#[derive(Debug)]
pub(crate) enum MetricStorage {
    Counter(Arc<AtomicU64>),
    Gauge(Arc<AtomicI64>),
    Rate(Arc<Rate>),
    Trend(Arc<Mutex<Histogram<u64>>>),
}

#[derive(Debug, Default)]
pub struct Rate {
    pub total: AtomicU64,
    pub hits: AtomicU64,
}

impl MetricStorage {
    pub(crate) fn new(kind: MetricKind) -> Self {
        match kind {
            MetricKind::Counter => Self::Counter(Arc::new(AtomicU64::new(0))),
            MetricKind::Gauge => Self::Gauge(Arc::new(AtomicI64::new(0))),
            MetricKind::Rate => Self::Rate(Arc::new(Rate::default())),
            MetricKind::Trend => Self::Trend(Arc::new(Mutex::new(new_default_histogram()))),
        }
    }

    pub(crate) fn kind(&self) -> MetricKind {
        match self {
            Self::Counter(_) => MetricKind::Counter,
            Self::Gauge(_) => MetricKind::Gauge,
            Self::Rate(_) => MetricKind::Rate,
            Self::Trend(_) => MetricKind::Trend,
        }
    }

    pub(crate) fn handle(&self) -> MetricHandle {
        match self {
            Self::Counter(a) => MetricHandle::Counter(a.clone()),
            Self::Gauge(a) => MetricHandle::Gauge(a.clone()),
            Self::Rate(a) => MetricHandle::Rate(a.clone()),
            Self::Trend(a) => MetricHandle::Trend(a.clone()),
        }
    }
}

/// Write handle for one metric.
///
/// Handles share the metric's storage, so hot paths can resolve a metric once and record without
/// touching the registry map again. Counters, gauges and rates are plain atomics; each trend owns
/// its own histogram lock.
#[derive(Debug, Clone)]
pub enum MetricHandle {
    Counter(Arc<AtomicU64>),
    Gauge(Arc<AtomicI64>),
    Rate(Arc<Rate>),
    Trend(Arc<Mutex<Histogram<u64>>>),
}

impl MetricHandle {
    #[must_use]
    pub fn kind(&self) -> MetricKind {
        match self {
            Self::Counter(_) => MetricKind::Counter,
            Self::Gauge(_) => MetricKind::Gauge,
            Self::Rate(_) => MetricKind::Rate,
            Self::Trend(_) => MetricKind::Trend,
        }
    }

    #[inline]
    pub fn increment(&self, value: u64) {
        if let Self::Counter(c) = self {
            c.fetch_add(value, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn set_gauge(&self, value: i64) {
        if let Self::Gauge(g) = self {
            g.store(value, Ordering::Relaxed);
        }
    }

    /// Raise the gauge to `value` if it is currently lower.
    #[inline]
    pub fn max_gauge(&self, value: i64) {
        if let Self::Gauge(g) = self {
            g.fetch_max(value, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn add_rate(&self, hit: bool) {
        if let Self::Rate(r) = self {
            // `total` first, so a reader never sees a hit without its sample.
            r.total.fetch_add(1, Ordering::Relaxed);
            if hit {
                r.hits.fetch_add(1, Ordering::Release);
            }
        }
    }

    #[inline]
    pub fn observe(&self, value: f64) {
        if let Self::Trend(h) = self {
            h.lock().saturating_record(scale_trend_value(value));
        }
    }

    pub fn get_counter(&self) -> u64 {
        if let Self::Counter(c) = self {
            c.load(Ordering::Relaxed)
        } else {
            0
        }
    }

    pub fn get_gauge(&self) -> i64 {
        if let Self::Gauge(g) = self {
            g.load(Ordering::Relaxed)
        } else {
            0
        }
    }

    /// Returns `(total, hits)`.
    pub fn get_rate(&self) -> (u64, u64) {
        if let Self::Rate(r) = self {
            let hits = r.hits.load(Ordering::Acquire);
            let total = r.total.load(Ordering::Relaxed);
            (total, hits)
        } else {
            (0, 0)
        }
    }
}
