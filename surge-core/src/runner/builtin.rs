use std::sync::Arc;
use std::time::Duration;

use surge_metrics::{MetricHandle, MetricKind, Registry, Sample, SnapshotValue};

use super::config::ExpectedStatuses;
use super::summary::Totals;
use super::workload::{IterationOutcome, WorkloadError};

pub const ITERATIONS: &str = "iterations";
pub const ITERATION_DURATION: &str = "iteration_duration";
pub const HTTP_REQS: &str = "http_reqs";
pub const HTTP_REQ_DURATION: &str = "http_req_duration";
pub const HTTP_REQ_FAILED: &str = "http_req_failed";
pub const CHECKS: &str = "checks";
pub const ERRORS: &str = "errors";
pub const WORKLOAD_ERRORS: &str = "workload_errors";
pub const ITERATIONS_CANCELLED: &str = "iterations_cancelled";
pub const ENGINE_ERRORS: &str = "engine_errors";
pub const VUS: &str = "vus";
pub const VUS_MAX: &str = "vus_max";

/// Pre-resolved handles for the metrics every run records.
#[derive(Debug, Clone)]
pub(crate) struct BuiltinMetrics {
    registry: Arc<Registry>,
    iterations: MetricHandle,
    iteration_duration: MetricHandle,
    http_reqs: MetricHandle,
    http_req_duration: MetricHandle,
    http_req_failed: MetricHandle,
    checks: MetricHandle,
    errors: MetricHandle,
    workload_errors: MetricHandle,
    iterations_cancelled: MetricHandle,
    engine_errors: MetricHandle,
    vus: MetricHandle,
    vus_max: MetricHandle,
}

impl BuiltinMetrics {
    pub(crate) fn register(registry: Arc<Registry>) -> surge_metrics::Result<Self> {
        Ok(Self {
            iterations: registry.register(ITERATIONS, MetricKind::Counter)?,
            iteration_duration: registry.register(ITERATION_DURATION, MetricKind::Trend)?,
            http_reqs: registry.register(HTTP_REQS, MetricKind::Counter)?,
            http_req_duration: registry.register(HTTP_REQ_DURATION, MetricKind::Trend)?,
            http_req_failed: registry.register(HTTP_REQ_FAILED, MetricKind::Rate)?,
            checks: registry.register(CHECKS, MetricKind::Rate)?,
            errors: registry.register(ERRORS, MetricKind::Rate)?,
            workload_errors: registry.register(WORKLOAD_ERRORS, MetricKind::Counter)?,
            iterations_cancelled: registry.register(ITERATIONS_CANCELLED, MetricKind::Counter)?,
            engine_errors: registry.register(ENGINE_ERRORS, MetricKind::Counter)?,
            vus: registry.register(VUS, MetricKind::Gauge)?,
            vus_max: registry.register(VUS_MAX, MetricKind::Gauge)?,
            registry,
        })
    }

    pub(crate) fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Records a completed iteration. Returns `true` if it counts as an error.
    pub(crate) fn record_outcome(
        &self,
        client_id: u64,
        outcome: &IterationOutcome,
        expected: &ExpectedStatuses,
        duration: Duration,
    ) -> bool {
        self.iterations.increment(1);
        self.iteration_duration.observe(millis(duration));

        let mut failed = false;
        if outcome.request.is_some() {
            let request_failed = outcome.status.is_none_or(|s| !expected.contains(s));
            self.http_reqs.increment(1);
            self.http_req_duration.observe(millis(outcome.latency));
            self.http_req_failed.add_rate(request_failed);
            failed |= request_failed;
        }

        for check in &outcome.checks {
            self.checks.add_rate(check.passed);
            failed |= !check.passed;
        }

        for sample in &outcome.samples {
            self.record_custom(client_id, sample);
        }

        self.errors.add_rate(failed);
        failed
    }

    pub(crate) fn record_error(&self, client_id: u64, err: &WorkloadError, duration: Duration) {
        tracing::debug!(client_id, kind = %err.kind(), error = %err, "iteration failed");

        self.iterations.increment(1);
        self.iteration_duration.observe(millis(duration));
        self.workload_errors.increment(1);
        self.errors.add_rate(true);
    }

    pub(crate) fn record_cancelled(&self) {
        self.iterations_cancelled.increment(1);
    }

    pub(crate) fn set_live(&self, live: u64) {
        let live = i64::try_from(live).unwrap_or(i64::MAX);
        self.vus.set_gauge(live);
        self.vus_max.max_gauge(live);
    }

    pub(crate) fn totals(&self) -> Totals {
        let (checks_total, checks_passed) = self.checks.get_rate();
        let (_, errors) = self.errors.get_rate();
        Totals {
            iterations: self.iterations.get_counter(),
            errors,
            requests: self.http_reqs.get_counter(),
            cancelled_iterations: self.iterations_cancelled.get_counter(),
            checks_passed,
            checks_failed: checks_total.saturating_sub(checks_passed),
            engine_errors: self.engine_errors.get_counter(),
        }
    }

    /// Current p95 of request latency in milliseconds.
    pub(crate) fn request_latency_p95(&self) -> Option<f64> {
        self.registry
            .snapshot(HTTP_REQ_DURATION)
            .and_then(|snap| match snap.value {
                SnapshotValue::Trend(t) => t.percentile(95.0),
                _ => None,
            })
    }

    fn record_custom(&self, client_id: u64, sample: &Sample) {
        if let Err(err) = self.registry.record(sample) {
            tracing::warn!(client_id, error = %err, "dropping sample");
            self.engine_errors.increment(1);
        }
    }
}

#[inline]
pub(crate) fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1_000.0
}
