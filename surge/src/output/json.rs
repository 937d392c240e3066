use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write as _;
use std::path::Path;
use std::sync::Arc;

use surge_core::metrics::MetricValue;
use surge_core::runner::{ProgressFn, ProgressUpdate, RunResult};

use super::OutputFormatter;
use crate::config_yaml::ResolvedConfig;

pub(crate) struct JsonOutput;

impl OutputFormatter for JsonOutput {
    fn print_header(&self, _config_path: &Path, _config: &ResolvedConfig) {}

    fn progress(&self) -> Option<ProgressFn> {
        Some(Arc::new(move |u| {
            let line = build_progress_line(&u);
            emit_json_line(&line);
        }))
    }

    fn print_summary(&self, result: &RunResult) -> anyhow::Result<()> {
        let line = build_summary_line(result);
        emit_json_line(&line);
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonProgressLine {
    pub kind: &'static str,
    pub tick: u64,
    pub elapsed_secs: f64,
    pub total_duration_secs: f64,

    pub stage: Option<usize>,
    pub stages: Option<usize>,
    pub target_clients: Option<u64>,
    pub live_clients: u64,
    pub draining_clients: u64,

    pub iterations_total: u64,
    pub errors_total: u64,
    pub requests_total: u64,
    pub checks_failed_total: u64,

    pub requests_per_sec: f64,
    pub iterations_per_sec: f64,
    pub latency_p95_ms: Option<f64>,
}

fn build_progress_line(u: &ProgressUpdate) -> JsonProgressLine {
    JsonProgressLine {
        kind: "progress",
        tick: u.tick,
        elapsed_secs: u.elapsed.as_secs_f64(),
        total_duration_secs: u.total_duration.as_secs_f64(),

        stage: u.stage.as_ref().map(|s| s.stage),
        stages: u.stage.as_ref().map(|s| s.stages),
        target_clients: u.stage.as_ref().map(|s| s.current_target),
        live_clients: u.clients.live,
        draining_clients: u.clients.draining,

        iterations_total: u.metrics.iterations_total,
        errors_total: u.metrics.errors_total,
        requests_total: u.metrics.requests_total,
        checks_failed_total: u.metrics.checks_failed_total,

        requests_per_sec: u.metrics.rps_now,
        iterations_per_sec: u.metrics.iterations_per_sec_now,
        latency_p95_ms: u.metrics.latency_p95_ms,
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonSummaryLine {
    pub kind: &'static str,
    pub passed: bool,
    pub interrupted: bool,
    pub duration_secs: f64,
    pub aborted: Option<JsonAbort>,
    pub totals: JsonTotals,
    pub drain: JsonDrain,
    pub peak_clients: u64,
    pub thresholds: Vec<JsonThreshold>,
    pub metrics: BTreeMap<String, JsonMetric>,
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonAbort {
    pub metric: String,
    pub expression: String,
    pub observed: Option<f64>,
    pub at_secs: f64,
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonTotals {
    pub iterations: u64,
    pub errors: u64,
    pub requests: u64,
    pub cancelled_iterations: u64,
    pub checks_passed: u64,
    pub checks_failed: u64,
    pub engine_errors: u64,
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonDrain {
    pub timed_out: bool,
    pub forced_clients: u64,
    pub cancelled_iterations: u64,
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonThreshold {
    pub metric: String,
    pub expression: String,
    pub passed: bool,
    pub observed: Option<f64>,
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub(crate) enum JsonMetric {
    Counter {
        value: u64,
    },
    Gauge {
        value: i64,
    },
    Rate {
        total: u64,
        hits: u64,
        rate: Option<f64>,
    },
    Trend {
        count: u64,
        avg: Option<f64>,
        min: Option<f64>,
        med: Option<f64>,
        p90: Option<f64>,
        p95: Option<f64>,
        p99: Option<f64>,
        max: Option<f64>,
    },
}

impl From<&MetricValue> for JsonMetric {
    fn from(v: &MetricValue) -> Self {
        match v {
            MetricValue::Counter(value) => Self::Counter { value: *value },
            MetricValue::Gauge(value) => Self::Gauge { value: *value },
            MetricValue::Rate { total, hits, rate } => Self::Rate {
                total: *total,
                hits: *hits,
                rate: *rate,
            },
            MetricValue::Trend(t) => Self::Trend {
                count: t.count,
                avg: t.mean,
                min: t.min,
                med: t.p50,
                p90: t.p90,
                p95: t.p95,
                p99: t.p99,
                max: t.max,
            },
        }
    }
}

fn build_summary_line(r: &RunResult) -> JsonSummaryLine {
    JsonSummaryLine {
        kind: "summary",
        passed: r.passed,
        interrupted: r.interrupted,
        duration_secs: r.duration.as_secs_f64(),
        aborted: r.aborted.as_ref().map(|a| JsonAbort {
            metric: a.metric.clone(),
            expression: a.expression.clone(),
            observed: a.observed,
            at_secs: a.at.as_secs_f64(),
        }),
        totals: JsonTotals {
            iterations: r.totals.iterations,
            errors: r.totals.errors,
            requests: r.totals.requests,
            cancelled_iterations: r.totals.cancelled_iterations,
            checks_passed: r.totals.checks_passed,
            checks_failed: r.totals.checks_failed,
            engine_errors: r.totals.engine_errors,
        },
        drain: JsonDrain {
            timed_out: r.drain.timed_out,
            forced_clients: r.drain.forced_clients,
            cancelled_iterations: r.drain.cancelled_iterations,
        },
        peak_clients: r.timeline.peak_live,
        thresholds: r
            .thresholds
            .iter()
            .map(|t| JsonThreshold {
                metric: t.metric.clone(),
                expression: t.expression.clone(),
                passed: t.passed,
                observed: t.observed,
                reason: t.reason.as_ref().map(ToString::to_string),
            })
            .collect(),
        metrics: r
            .metrics
            .iter()
            .map(|(k, v)| (k.clone(), JsonMetric::from(v)))
            .collect(),
    }
}

fn emit_json_line<T: Serialize>(line: &T) {
    let mut out = std::io::stdout().lock();
    if serde_json::to_writer(&mut out, line).is_ok() {
        let _ = writeln!(out);
        let _ = out.flush();
    }
}
