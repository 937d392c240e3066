use std::fmt::Write as _;

use surge_core::metrics::MetricValue;
use surge_core::runner::{RunResult, ThresholdResult, VUS, VUS_MAX};

use super::format::*;

pub(crate) fn render(result: &RunResult) -> String {
    let mut out = String::new();
    let t = &result.totals;

    out.push_str("summary\n");
    writeln!(out, "  duration: {}", format_duration(result.duration)).ok();
    writeln!(
        out,
        "  iterations: {} (errors {}, cancelled {})",
        t.iterations, t.errors, t.cancelled_iterations
    )
    .ok();

    let secs = result.duration.as_secs_f64().max(1e-9);
    writeln!(
        out,
        "  requests: {} (rps={})",
        t.requests,
        format_rate(t.requests as f64 / secs)
    )
    .ok();
    writeln!(
        out,
        "  checks: passed {} failed {}",
        t.checks_passed, t.checks_failed
    )
    .ok();
    if let Some(rate) = result.error_rate() {
        writeln!(out, "  error rate: {}", format_percent(rate)).ok();
    }
    writeln!(
        out,
        "  clients: peak {} final {}",
        result.timeline.peak_live, result.timeline.final_live
    )
    .ok();
    if t.engine_errors > 0 {
        writeln!(out, "  engine_errors: {}", t.engine_errors).ok();
    }

    if result.drain.timed_out {
        writeln!(
            out,
            "  drain: timed out, {} client(s) force-stopped, {} iteration(s) cancelled",
            result.drain.forced_clients, result.drain.cancelled_iterations
        )
        .ok();
    }
    if result.interrupted {
        out.push_str("  interrupted: stopped before the last stage finished\n");
    }
    if let Some(a) = &result.aborted {
        writeln!(
            out,
            "  aborted: {} {} (observed {}) after {}",
            a.metric,
            a.expression,
            format_observed(a.observed),
            format_duration(a.at)
        )
        .ok();
    }

    render_metrics(result, &mut out);
    render_thresholds(&result.thresholds, &mut out);

    out
}

fn render_metrics(result: &RunResult, out: &mut String) {
    if result.metrics.is_empty() {
        return;
    }

    out.push_str("\nmetrics\n");

    // `vus` correctly ends at 0, which reads oddly on its own; show it next to the peak.
    let vus_peak = match result.metrics.get(VUS_MAX) {
        Some(MetricValue::Gauge(v)) => Some(*v),
        _ => None,
    };

    for (name, value) in &result.metrics {
        if name == VUS_MAX && vus_peak.is_some() {
            continue;
        }

        match value {
            MetricValue::Gauge(end) if name == VUS && vus_peak.is_some() => {
                let peak = vus_peak.unwrap_or_default();
                writeln!(out, "  {name} = end={end} peak={peak}").ok();
            }
            MetricValue::Counter(v) => {
                writeln!(out, "  {name} = {v}").ok();
            }
            MetricValue::Gauge(v) => {
                writeln!(out, "  {name} = {v}").ok();
            }
            MetricValue::Rate { total, hits, rate } => match rate {
                Some(rate) => {
                    writeln!(
                        out,
                        "  {name} = {} ({hits}/{total})",
                        format_percent(*rate)
                    )
                    .ok();
                }
                None => {
                    writeln!(out, "  {name} = - (0/0)").ok();
                }
            },
            MetricValue::Trend(h) => {
                writeln!(
                    out,
                    "  {name} = avg={} min={} med={} p90={} p95={} max={} (n={})",
                    format_ms_opt(h.mean),
                    format_ms_opt(h.min),
                    format_ms_opt(h.p50),
                    format_ms_opt(h.p90),
                    format_ms_opt(h.p95),
                    format_ms_opt(h.max),
                    h.count
                )
                .ok();
            }
        }
    }
}

fn render_thresholds(results: &[ThresholdResult], out: &mut String) {
    if results.is_empty() {
        return;
    }

    out.push_str("\nthresholds\n");
    for r in results {
        let status = if r.passed { "OK" } else { "FAIL" };
        match &r.reason {
            Some(reason) if !r.passed => writeln!(
                out,
                "  [{status}] {} {} observed={} ({reason})",
                r.metric,
                r.expression,
                format_observed(r.observed)
            )
            .ok(),
            _ => writeln!(
                out,
                "  [{status}] {} {} observed={}",
                r.metric,
                r.expression,
                format_observed(r.observed)
            )
            .ok(),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::time::Duration;
    use surge_core::metrics::TrendSummary;
    use surge_core::runner::{
        AbortInfo, DrainReport, FailureReason, TimelineReport, Totals,
    };

    fn result() -> RunResult {
        let mut metrics = BTreeMap::new();
        metrics.insert("iterations".to_string(), MetricValue::Counter(200));
        metrics.insert(VUS.to_string(), MetricValue::Gauge(0));
        metrics.insert(VUS_MAX.to_string(), MetricValue::Gauge(10));
        metrics.insert(
            "errors".to_string(),
            MetricValue::Rate {
                total: 200,
                hits: 50,
                rate: Some(0.25),
            },
        );
        metrics.insert(
            "http_req_duration".to_string(),
            MetricValue::Trend(TrendSummary {
                p50: Some(2.0),
                p75: Some(3.0),
                p90: Some(4.0),
                p95: Some(5.0),
                p99: Some(6.0),
                min: Some(1.0),
                max: Some(7.0),
                mean: Some(2.5),
                stdev: Some(1.0),
                count: 200,
            }),
        );

        RunResult {
            passed: false,
            duration: Duration::from_secs(10),
            interrupted: false,
            aborted: None,
            thresholds: vec![
                ThresholdResult {
                    metric: "http_req_duration".to_string(),
                    expression: "p(95)<500".to_string(),
                    passed: true,
                    observed: Some(5.0),
                    reason: None,
                    abort_on_fail: false,
                },
                ThresholdResult {
                    metric: "errors".to_string(),
                    expression: "rate<0.1".to_string(),
                    passed: false,
                    observed: Some(0.25),
                    reason: Some(FailureReason::Violated),
                    abort_on_fail: false,
                },
            ],
            totals: Totals {
                iterations: 200,
                errors: 50,
                requests: 200,
                cancelled_iterations: 0,
                checks_passed: 350,
                checks_failed: 50,
                engine_errors: 0,
            },
            metrics,
            drain: DrainReport::default(),
            timeline: TimelineReport {
                completed: true,
                final_target: 0,
                final_live: 0,
                peak_live: 10,
            },
        }
    }

    #[test]
    fn render_includes_totals_and_rates() {
        let text = render(&result());
        assert!(text.contains("duration: 10s"), "{text}");
        assert!(text.contains("iterations: 200 (errors 50, cancelled 0)"));
        assert!(text.contains("requests: 200 (rps=20)"));
        assert!(text.contains("checks: passed 350 failed 50"));
        assert!(text.contains("error rate: 25.00%"));
        assert!(text.contains("clients: peak 10 final 0"));
        assert!(!text.contains("drain:"));
        assert!(!text.contains("aborted:"));
    }

    #[test]
    fn render_metrics_combines_vus_end_and_peak() {
        let text = render(&result());
        assert!(text.contains("vus = end=0 peak=10"), "{text}");
        assert!(!text.contains("vus_max"));
        assert!(text.contains("errors = 25.00% (50/200)"));
        assert!(text.contains("http_req_duration = avg=2.50ms min=1.00ms"));
        assert!(text.contains("(n=200)"));
    }

    #[test]
    fn render_thresholds_marks_failures_with_reason() {
        let text = render(&result());
        assert!(text.contains("[OK] http_req_duration p(95)<500 observed=5"));
        assert!(
            text.contains("[FAIL] errors rate<0.1 observed=0.2500 (violated)"),
            "{text}"
        );
    }

    #[test]
    fn render_reports_drain_timeout_and_abort() {
        let mut r = result();
        r.drain = DrainReport {
            timed_out: true,
            forced_clients: 2,
            cancelled_iterations: 2,
        };
        r.aborted = Some(AbortInfo {
            metric: "errors".to_string(),
            expression: "rate<0.1".to_string(),
            observed: Some(1.0),
            at: Duration::from_secs(3),
        });

        let text = render(&r);
        assert!(text.contains("drain: timed out, 2 client(s) force-stopped, 2 iteration(s) cancelled"));
        assert!(text.contains("aborted: errors rate<0.1 (observed 1) after 3s"));
    }
}
