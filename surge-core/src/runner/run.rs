use std::sync::{Arc, OnceLock};
use std::time::Duration;

use surge_metrics::Registry;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::builtin::BuiltinMetrics;
use super::config::RunConfig;
use super::error::Result;
use super::executor::ClientSettings;
use super::progress::{ProgressFn, ProgressSampler};
use super::schedule::ConcurrencyTimeline;
use super::scheduler::{ClientActivity, StageScheduler};
use super::summary::{AbortInfo, RunResult};
use super::thresholds::Threshold;
use super::thresholds_eval::{all_passed, evaluate};
use super::workload::Workload;

/// A run in progress.
#[derive(Debug)]
pub struct RunHandle {
    cancel: CancellationToken,
    registry: Arc<Registry>,
    task: JoinHandle<RunResult>,
}

impl RunHandle {
    /// Stops the run early. Clients drain and the final evaluation still happens.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Live view of the run's metrics.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub async fn wait(self) -> Result<RunResult> {
        Ok(self.task.await?)
    }
}

/// Validates `config` and starts the run on the current tokio runtime.
pub fn start<W: Workload>(
    config: RunConfig,
    workload: W,
    progress: Option<ProgressFn>,
) -> Result<RunHandle> {
    spawn_run(config, workload, progress, CancellationToken::new())
}

/// Runs to completion. Cancelling `cancel` interrupts the run gracefully.
pub async fn run<W: Workload>(
    config: RunConfig,
    workload: W,
    progress: Option<ProgressFn>,
    cancel: CancellationToken,
) -> Result<RunResult> {
    spawn_run(config, workload, progress, cancel)?.wait().await
}

fn spawn_run<W: Workload>(
    config: RunConfig,
    workload: W,
    progress: Option<ProgressFn>,
    cancel: CancellationToken,
) -> Result<RunHandle> {
    config.validate()?;

    let registry = Arc::new(Registry::default());
    let metrics = Arc::new(BuiltinMetrics::register(registry.clone())?);

    let task = tokio::spawn(execute(config, workload, progress, cancel.clone(), metrics));

    Ok(RunHandle {
        cancel,
        registry,
        task,
    })
}

async fn execute<W: Workload>(
    config: RunConfig,
    workload: W,
    progress: Option<ProgressFn>,
    cancel: CancellationToken,
    metrics: Arc<BuiltinMetrics>,
) -> RunResult {
    let registry = metrics.registry().clone();
    let timeline = Arc::new(ConcurrencyTimeline::new(
        config.start_clients,
        config.stages.clone(),
    ));
    let activity = Arc::new(ClientActivity::default());
    let settings = Arc::new(ClientSettings {
        pacing: config.pacing,
        iteration_timeout: config.iteration_timeout,
        expected_statuses: config.expected_statuses.clone(),
    });
    let thresholds: Arc<[Threshold]> = config.thresholds.clone().into();

    // Cancelled on external cancellation or by an aborting threshold.
    let halt = cancel.child_token();
    let abort: Arc<OnceLock<AbortInfo>> = Arc::new(OnceLock::new());

    tracing::info!(
        stages = config.stages.len(),
        total_duration = ?config.total_duration(),
        max_clients = config.max_clients(),
        thresholds = thresholds.len(),
        "run started"
    );

    let started = Instant::now();

    let watcher = (!thresholds.is_empty()).then(|| {
        tokio::spawn(watch_thresholds(
            thresholds.clone(),
            registry.clone(),
            config.threshold_interval,
            started,
            halt.clone(),
            abort.clone(),
        ))
    });

    let progress_stop = CancellationToken::new();
    let progress_task = progress.map(|progress| {
        let every = config.progress_interval;
        let stop = progress_stop.clone();
        let mut sampler =
            ProgressSampler::new(metrics.clone(), activity.clone(), timeline.clone());
        tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(started + every, every);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = stop.cancelled() => break,
                    _ = interval.tick() => {}
                }
                (progress)(sampler.sample(started.elapsed()));
            }
            // One last update with the post-drain totals.
            (progress)(sampler.sample(started.elapsed()));
        })
    });

    let mut scheduler = StageScheduler::new(
        timeline,
        workload,
        metrics.clone(),
        settings,
        activity,
        halt.clone(),
    );
    let timeline_report = scheduler.run(started, config.reconcile_interval).await;

    let interrupted = !timeline_report.completed && cancel.is_cancelled();
    if interrupted {
        tracing::warn!(elapsed = ?started.elapsed(), "run interrupted");
    }

    if let Some(watcher) = watcher {
        watcher.abort();
    }

    let drain = scheduler.drain(config.drain_timeout).await;

    progress_stop.cancel();
    if let Some(task) = progress_task
        && let Err(err) = task.await
    {
        tracing::warn!(error = %err, "progress reporter failed");
    }

    let results = evaluate(&thresholds, &registry);
    for r in results.iter().filter(|r| !r.passed) {
        tracing::warn!(
            metric = %r.metric,
            expression = %r.expression,
            observed = ?r.observed,
            reason = ?r.reason,
            "threshold failed"
        );
    }

    let aborted = abort.get().cloned();
    let passed = all_passed(&results) && aborted.is_none();
    let duration = started.elapsed();

    tracing::info!(passed, duration = ?duration, "run finished");

    RunResult {
        passed,
        duration,
        interrupted,
        aborted,
        thresholds: results,
        totals: metrics.totals(),
        metrics: registry.summarize(),
        drain,
        timeline: timeline_report,
    }
}

/// Evaluates thresholds every `every` and halts the run on the first abort-on-fail violation.
///
/// Missing data never aborts a run.
async fn watch_thresholds(
    thresholds: Arc<[Threshold]>,
    registry: Arc<Registry>,
    every: Duration,
    started: Instant,
    halt: CancellationToken,
    abort: Arc<OnceLock<AbortInfo>>,
) {
    let mut interval = tokio::time::interval_at(started + every, every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = halt.cancelled() => return,
            _ = interval.tick() => {}
        }

        let elapsed = started.elapsed();
        let results = evaluate(&thresholds, &registry);

        let tripped = thresholds.iter().zip(&results).find(|(t, r)| {
            t.abort_on_fail && !r.passed && !r.is_no_data() && elapsed >= t.delay_abort_eval
        });

        if let Some((_, r)) = tripped {
            tracing::warn!(
                metric = %r.metric,
                expression = %r.expression,
                observed = ?r.observed,
                "threshold failed; aborting run"
            );
            let _ = abort.set(AbortInfo {
                metric: r.metric.clone(),
                expression: r.expression.clone(),
                observed: r.observed,
                at: elapsed,
            });
            halt.cancel();
            return;
        }
    }
}
