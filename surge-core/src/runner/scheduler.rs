use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::task::{JoinError, JoinHandle};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::builtin::BuiltinMetrics;
use super::executor::{Client, ClientExit, ClientSettings, ClientState, ClientStatus};
use super::schedule::ConcurrencyTimeline;
use super::summary::{DrainReport, TimelineReport};
use super::workload::Workload;

/// How long force-stopped clients get to observe the hard stop before their task is aborted.
const FORCE_GRACE: Duration = Duration::from_secs(1);

/// Client counts shared with the progress reporter.
#[derive(Debug, Default)]
pub(crate) struct ClientActivity {
    live: AtomicU64,
    draining: AtomicU64,
    peak: AtomicU64,
}

impl ClientActivity {
    pub(crate) fn live(&self) -> u64 {
        self.live.load(Ordering::Relaxed)
    }

    pub(crate) fn draining(&self) -> u64 {
        self.draining.load(Ordering::Relaxed)
    }

    pub(crate) fn peak(&self) -> u64 {
        self.peak.load(Ordering::Relaxed)
    }

    fn update(&self, live: usize, draining: usize) {
        let live = live as u64;
        self.live.store(live, Ordering::Relaxed);
        self.draining.store(draining as u64, Ordering::Relaxed);
        self.peak.fetch_max(live, Ordering::Relaxed);
    }
}

struct ClientSlot {
    id: u64,
    stop: CancellationToken,
    status: Arc<ClientStatus>,
    handle: JoinHandle<ClientExit>,
}

impl ClientSlot {
    fn retire(&self) {
        self.status.mark_draining();
        self.stop.cancel();
    }
}

/// Owns the live client set and keeps it in line with the concurrency timeline.
///
/// Only the scheduler spawns or retires clients. Live clients are kept in spawn order so ramp-down
/// retires the most recently spawned ones first.
pub(crate) struct StageScheduler<W> {
    timeline: Arc<ConcurrencyTimeline>,
    workload: W,
    metrics: Arc<BuiltinMetrics>,
    settings: Arc<ClientSettings>,
    activity: Arc<ClientActivity>,
    /// Parent of every client's stop token; cancelling it drains all clients.
    halt: CancellationToken,
    force: CancellationToken,
    live: Vec<ClientSlot>,
    retiring: Vec<ClientSlot>,
    next_id: u64,
    drain: DrainReport,
}

impl<W: Workload> StageScheduler<W> {
    pub(crate) fn new(
        timeline: Arc<ConcurrencyTimeline>,
        workload: W,
        metrics: Arc<BuiltinMetrics>,
        settings: Arc<ClientSettings>,
        activity: Arc<ClientActivity>,
        halt: CancellationToken,
    ) -> Self {
        Self {
            timeline,
            workload,
            metrics,
            settings,
            activity,
            halt,
            force: CancellationToken::new(),
            live: Vec::new(),
            retiring: Vec::new(),
            next_id: 1,
            drain: DrainReport::default(),
        }
    }

    pub(crate) fn live(&self) -> usize {
        self.live.len()
    }

    /// Reconciles on every tick until the timeline ends or `halt` is cancelled.
    pub(crate) async fn run(&mut self, started: Instant, tick: Duration) -> TimelineReport {
        let mut interval = tokio::time::interval(tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut current_stage: Option<usize> = None;
        let completed = loop {
            tokio::select! {
                biased;
                _ = self.halt.cancelled() => break false,
                _ = interval.tick() => {}
            }

            let elapsed = started.elapsed();
            if let Some(snap) = self.timeline.stage_snapshot_at(elapsed)
                && current_stage != Some(snap.index)
                && !self.timeline.is_done(elapsed)
            {
                current_stage = Some(snap.index);
                tracing::info!(
                    stage = snap.index + 1,
                    stages = snap.count,
                    from = snap.start_target,
                    to = snap.end_target,
                    "stage started"
                );
            }

            self.reconcile(elapsed).await;

            if self.timeline.is_done(elapsed) {
                break true;
            }
        };

        TimelineReport {
            completed,
            final_target: self.timeline.final_target(),
            final_live: self.live.len() as u64,
            peak_live: self.activity.peak(),
        }
    }

    /// Brings the live client count to the timeline's target at `elapsed`. Returns the target.
    pub(crate) async fn reconcile(&mut self, elapsed: Duration) -> u64 {
        self.reap().await;

        let desired = self.timeline.target_at(elapsed);
        let live = self.live.len() as u64;

        if desired > live {
            for _ in live..desired {
                self.spawn_client();
            }
            tracing::debug!(live = self.live.len(), desired, "ramped up");
        } else if desired < live {
            for _ in desired..live {
                if let Some(slot) = self.live.pop() {
                    slot.retire();
                    self.retiring.push(slot);
                }
            }
            tracing::debug!(live = self.live.len(), desired, "ramped down");
        }

        self.publish();
        desired
    }

    fn spawn_client(&mut self) {
        let id = self.next_id;
        self.next_id += 1;

        let stop = self.halt.child_token();
        let status = Arc::new(ClientStatus::new());
        let client = Client {
            id,
            workload: self.workload.clone(),
            metrics: self.metrics.clone(),
            settings: self.settings.clone(),
            status: status.clone(),
            stop: stop.clone(),
            force: self.force.clone(),
        };

        self.live.push(ClientSlot {
            id,
            stop,
            status,
            handle: tokio::spawn(client.run()),
        });
    }

    /// Collects clients whose task already ended.
    async fn reap(&mut self) {
        let mut finished = Vec::new();

        let mut idx = 0;
        while idx < self.live.len() {
            if self.live[idx].handle.is_finished() {
                finished.push(self.live.remove(idx));
            } else {
                idx += 1;
            }
        }
        let (done, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut self.retiring)
            .into_iter()
            .partition(|slot| slot.handle.is_finished());
        self.retiring = pending;
        finished.extend(done);

        for slot in finished {
            let id = slot.id;
            let res = slot.handle.await;
            self.collect(id, res);
        }
    }

    fn collect(&mut self, id: u64, res: Result<ClientExit, JoinError>) {
        match res {
            Ok(exit) => {
                if exit.forced {
                    self.drain.cancelled_iterations += 1;
                }
                tracing::debug!(
                    client_id = id,
                    iterations = exit.iterations,
                    forced = exit.forced,
                    "client retired"
                );
            }
            Err(err) if err.is_panic() => {
                tracing::error!(client_id = id, "client task panicked");
            }
            Err(err) => {
                tracing::debug!(client_id = id, error = %err, "client task aborted");
            }
        }
    }

    fn publish(&self) {
        self.metrics.set_live(self.live.len() as u64);
        self.activity.update(self.live.len(), self.retiring.len());
    }

    /// Stops every client and waits for them to terminate.
    ///
    /// Clients finish their in-flight iteration unless `timeout` expires first; then they are
    /// force-stopped and the abandoned iteration is counted as cancelled.
    pub(crate) async fn drain(mut self, timeout: Duration) -> DrainReport {
        for slot in self.live.drain(..) {
            slot.retire();
            self.retiring.push(slot);
        }
        self.publish();

        let draining = self.retiring.len();
        if draining > 0 {
            tracing::info!(clients = draining, timeout = ?timeout, "draining clients");
        }

        let deadline = Instant::now() + timeout;
        let mut overdue = Vec::new();
        for mut slot in std::mem::take(&mut self.retiring) {
            match tokio::time::timeout_at(deadline, &mut slot.handle).await {
                Ok(res) => self.collect(slot.id, res),
                Err(_) => overdue.push(slot),
            }
        }

        if !overdue.is_empty() {
            tracing::warn!(
                clients = overdue.len(),
                timeout = ?timeout,
                "drain timed out; cancelling in-flight iterations"
            );
            self.drain.timed_out = true;
            self.drain.forced_clients = overdue.len() as u64;
            self.force.cancel();

            let grace = Instant::now() + FORCE_GRACE;
            for mut slot in overdue {
                match tokio::time::timeout_at(grace, &mut slot.handle).await {
                    Ok(res) => self.collect(slot.id, res),
                    Err(_) => {
                        slot.handle.abort();
                        if slot.status.get() != ClientState::Terminated {
                            self.metrics.record_cancelled();
                            self.drain.cancelled_iterations += 1;
                        }
                        tracing::error!(
                            client_id = slot.id,
                            "client ignored cancellation; aborted"
                        );
                    }
                }
            }
        }

        self.activity.update(0, 0);
        self.drain
    }
}
