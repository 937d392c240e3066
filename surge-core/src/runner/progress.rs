use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use super::builtin::BuiltinMetrics;
use super::schedule::ConcurrencyTimeline;
use super::scheduler::ClientActivity;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LiveMetrics {
    pub iterations_total: u64,
    pub errors_total: u64,
    pub requests_total: u64,
    pub checks_failed_total: u64,

    /// Requests/sec observed during the last progress interval.
    pub rps_now: f64,

    /// Iterations/sec observed during the last progress interval.
    pub iterations_per_sec_now: f64,

    /// p95 of `http_req_duration` over the whole run so far, in milliseconds.
    pub latency_p95_ms: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageProgress {
    /// 1-based stage index.
    pub stage: usize,
    pub stages: usize,
    pub stage_elapsed: Duration,
    pub stage_remaining: Duration,
    pub start_target: u64,
    pub end_target: u64,
    pub current_target: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientCounts {
    pub live: u64,
    pub draining: u64,
    pub peak: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    /// Monotonic tick counter (1-based) for progress emissions.
    pub tick: u64,
    pub elapsed: Duration,
    pub total_duration: Duration,
    pub stage: Option<StageProgress>,
    pub clients: ClientCounts,
    pub metrics: LiveMetrics,
}

pub type ProgressFn = Arc<dyn Fn(ProgressUpdate) + Send + Sync + 'static>;

pub(crate) struct ProgressSampler {
    metrics: Arc<BuiltinMetrics>,
    activity: Arc<ClientActivity>,
    timeline: Arc<ConcurrencyTimeline>,
    tick: u64,
    last_at: Instant,
    last_requests: u64,
    last_iterations: u64,
}

impl ProgressSampler {
    pub(crate) fn new(
        metrics: Arc<BuiltinMetrics>,
        activity: Arc<ClientActivity>,
        timeline: Arc<ConcurrencyTimeline>,
    ) -> Self {
        Self {
            metrics,
            activity,
            timeline,
            tick: 0,
            last_at: Instant::now(),
            last_requests: 0,
            last_iterations: 0,
        }
    }

    pub(crate) fn sample(&mut self, elapsed: Duration) -> ProgressUpdate {
        self.tick = self.tick.saturating_add(1);

        let now = Instant::now();
        let dt = now.duration_since(self.last_at).as_secs_f64().max(1e-9);
        self.last_at = now;

        let totals = self.metrics.totals();
        let delta_requests = totals.requests.saturating_sub(self.last_requests);
        let delta_iterations = totals.iterations.saturating_sub(self.last_iterations);
        self.last_requests = totals.requests;
        self.last_iterations = totals.iterations;

        let stage = self
            .timeline
            .stage_snapshot_at(elapsed)
            .map(|st| StageProgress {
                stage: st.index + 1,
                stages: st.count,
                stage_elapsed: st.stage_elapsed,
                stage_remaining: st.stage_remaining,
                start_target: st.start_target,
                end_target: st.end_target,
                current_target: st.current_target,
            });

        ProgressUpdate {
            tick: self.tick,
            elapsed,
            total_duration: self.timeline.total_duration(),
            stage,
            clients: ClientCounts {
                live: self.activity.live(),
                draining: self.activity.draining(),
                peak: self.activity.peak(),
            },
            metrics: LiveMetrics {
                iterations_total: totals.iterations,
                errors_total: totals.errors,
                requests_total: totals.requests,
                checks_failed_total: totals.checks_failed,
                rps_now: delta_requests as f64 / dt,
                iterations_per_sec_now: delta_iterations as f64 / dt,
                latency_p95_ms: self.metrics.request_latency_p95(),
            },
        }
    }
}
