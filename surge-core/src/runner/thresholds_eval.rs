use surge_metrics::{MetricKind, MetricSnapshot, Registry, SnapshotValue};

use super::thresholds::{Threshold, ThresholdAgg};

#[derive(Debug, Clone, PartialEq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum FailureReason {
    /// The metric was never registered or has no samples.
    NoData,
    /// The aggregation does not apply to the metric's kind.
    Unsupported { agg: String, kind: MetricKind },
    /// The observed value does not satisfy the predicate.
    Violated,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdResult {
    pub metric: String,
    pub expression: String,
    pub passed: bool,
    pub observed: Option<f64>,
    pub reason: Option<FailureReason>,
    pub abort_on_fail: bool,
}

impl ThresholdResult {
    #[must_use]
    pub fn is_no_data(&self) -> bool {
        matches!(self.reason, Some(FailureReason::NoData))
    }
}

/// Evaluates every threshold against the registry's current state.
///
/// Each metric is snapshotted once and shared by all thresholds that reference it. Results keep
/// the order of `thresholds`.
pub fn evaluate(thresholds: &[Threshold], registry: &Registry) -> Vec<ThresholdResult> {
    let mut snapshots: Vec<(&str, Option<MetricSnapshot>)> = Vec::new();

    thresholds
        .iter()
        .map(|t| {
            let idx = match snapshots.iter().position(|(name, _)| *name == t.metric) {
                Some(idx) => idx,
                None => {
                    snapshots.push((t.metric.as_str(), registry.snapshot(&t.metric)));
                    snapshots.len() - 1
                }
            };
            evaluate_one(t, snapshots[idx].1.as_ref())
        })
        .collect()
}

pub fn evaluate_one(threshold: &Threshold, snapshot: Option<&MetricSnapshot>) -> ThresholdResult {
    let outcome = match snapshot {
        None => Err(FailureReason::NoData),
        Some(snap) if snap.is_empty() => Err(FailureReason::NoData),
        Some(snap) => observe(threshold.expr.agg, snap),
    };

    let (passed, observed, reason) = match outcome {
        Ok(observed) => {
            let passed = threshold.expr.op.holds(observed, threshold.expr.value);
            (passed, Some(observed), (!passed).then_some(FailureReason::Violated))
        }
        Err(reason) => (false, None, Some(reason)),
    };

    ThresholdResult {
        metric: threshold.metric.clone(),
        expression: threshold.source.clone(),
        passed,
        observed,
        reason,
        abort_on_fail: threshold.abort_on_fail,
    }
}

fn observe(agg: ThresholdAgg, snapshot: &MetricSnapshot) -> Result<f64, FailureReason> {
    let unsupported = || FailureReason::Unsupported {
        agg: agg.to_string(),
        kind: snapshot.kind(),
    };

    let value = match (&snapshot.value, agg) {
        (SnapshotValue::Counter(v), ThresholdAgg::Count) => Some(*v as f64),
        (SnapshotValue::Gauge(v), ThresholdAgg::Value) => Some(*v as f64),
        (SnapshotValue::Rate { total, hits }, ThresholdAgg::Rate) => {
            (*total > 0).then(|| *hits as f64 / *total as f64)
        }
        (SnapshotValue::Rate { total, .. }, ThresholdAgg::Count) => Some(*total as f64),
        (SnapshotValue::Trend(t), ThresholdAgg::Count) => Some(t.count() as f64),
        (SnapshotValue::Trend(t), ThresholdAgg::Avg) => t.mean(),
        (SnapshotValue::Trend(t), ThresholdAgg::Min) => t.min(),
        (SnapshotValue::Trend(t), ThresholdAgg::Max) => t.max(),
        (SnapshotValue::Trend(t), ThresholdAgg::Med) => t.median(),
        (SnapshotValue::Trend(t), ThresholdAgg::P(p)) => t.percentile(p),
        _ => return Err(unsupported()),
    };

    value.ok_or(FailureReason::NoData)
}

/// `true` when every threshold passed. An empty threshold list passes.
#[must_use]
pub fn all_passed(results: &[ThresholdResult]) -> bool {
    results.iter().all(|r| r.passed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use surge_metrics::Sample;

    fn threshold(metric: &str, expr: &str) -> Threshold {
        Threshold::parse(metric, expr).unwrap_or_else(|e| panic!("{e}"))
    }

    fn record(registry: &Registry, sample: Sample) {
        registry.record(&sample).unwrap_or_else(|e| panic!("{e}"));
    }

    #[test]
    fn one_failure_in_ten_breaks_strict_rate_threshold() {
        let registry = Registry::default();
        for i in 0..10 {
            record(&registry, Sample::rate("errors", i == 0));
        }

        let results = evaluate(&[threshold("errors", "rate<0.1")], &registry);
        assert_eq!(results.len(), 1);
        let r = &results[0];
        assert_eq!(r.observed, Some(0.1));
        assert!(!r.passed);
        assert_eq!(r.reason, Some(FailureReason::Violated));

        let lenient = evaluate(&[threshold("errors", "rate<=0.1")], &registry);
        assert!(lenient[0].passed);
        assert_eq!(lenient[0].reason, None);
    }

    #[test]
    fn metric_without_samples_fails_with_no_data() {
        let registry = Registry::default();
        registry
            .register("checks", MetricKind::Rate)
            .unwrap_or_else(|e| panic!("{e}"));

        let results = evaluate(
            &[
                threshold("checks", "rate>0.9"),
                threshold("never_recorded", "p(95)<100"),
            ],
            &registry,
        );
        for r in &results {
            assert!(!r.passed, "{r:?}");
            assert!(r.is_no_data(), "{r:?}");
            assert_eq!(r.observed, None);
        }
    }

    #[test]
    fn aggregation_must_match_metric_kind() {
        let registry = Registry::default();
        record(&registry, Sample::rate("errors", false));

        let results = evaluate(&[threshold("errors", "p(95)<1")], &registry);
        assert!(!results[0].passed);
        assert_eq!(
            results[0].reason,
            Some(FailureReason::Unsupported {
                agg: "p(95)".to_string(),
                kind: MetricKind::Rate,
            })
        );
    }

    #[test]
    fn trend_aggregations() {
        let registry = Registry::default();
        for v in 1..=100 {
            record(&registry, Sample::trend("latency", f64::from(v)));
        }

        let results = evaluate(
            &[
                threshold("latency", "count==100"),
                threshold("latency", "avg<51"),
                threshold("latency", "min>=1"),
                threshold("latency", "max<=100.1"),
                threshold("latency", "med<51"),
                threshold("latency", "p(95)<96"),
                threshold("latency", "p(99.9)>99"),
            ],
            &registry,
        );
        for r in &results {
            assert!(r.passed, "{r:?}");
        }
    }

    #[test]
    fn counter_and_gauge_aggregations() {
        let registry = Registry::default();
        record(&registry, Sample::counter("http_reqs", 42));
        record(&registry, Sample::gauge("vus", 7));

        let results = evaluate(
            &[
                threshold("http_reqs", "count>=42"),
                threshold("vus", "value==7"),
                threshold("vus", "count>0"),
            ],
            &registry,
        );
        assert!(results[0].passed);
        assert!(results[1].passed);
        assert!(matches!(
            results[2].reason,
            Some(FailureReason::Unsupported { kind: MetricKind::Gauge, .. })
        ));
        assert!(!all_passed(&results));
        assert!(all_passed(&results[..2]));
    }

    #[test]
    fn evaluation_does_not_touch_the_registry() {
        let registry = Registry::default();
        record(&registry, Sample::rate("errors", true));
        let before = registry.summarize();

        let _ = evaluate(
            &[threshold("errors", "rate<0.5"), threshold("missing", "count>0")],
            &registry,
        );

        assert_eq!(registry.summarize(), before);
        assert!(!registry.contains("missing"));
    }
}
