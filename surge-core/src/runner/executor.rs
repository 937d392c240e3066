use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use futures::FutureExt as _;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::builtin::BuiltinMetrics;
use super::config::ExpectedStatuses;
use super::pacer::Pacing;
use super::workload::{IterationContext, Workload, WorkloadError, WorkloadResult};

/// Lifecycle of one virtual client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::FromRepr)]
#[strum(serialize_all = "snake_case")]
#[repr(u8)]
pub enum ClientState {
    Spawned,
    Running,
    Draining,
    Terminated,
}

#[derive(Debug)]
pub(crate) struct ClientStatus(AtomicU8);

impl ClientStatus {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(ClientState::Spawned as u8))
    }

    pub(crate) fn get(&self) -> ClientState {
        ClientState::from_repr(self.0.load(Ordering::Acquire)).unwrap_or(ClientState::Terminated)
    }

    fn transition(&self, from: ClientState, to: ClientState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Moves a spawned or running client to `Draining`. Terminated clients stay terminated.
    pub(crate) fn mark_draining(&self) {
        if !self.transition(ClientState::Running, ClientState::Draining) {
            self.transition(ClientState::Spawned, ClientState::Draining);
        }
    }

    fn mark_terminated(&self) {
        self.0.store(ClientState::Terminated as u8, Ordering::Release);
    }
}

/// Per-run settings every client shares.
#[derive(Debug)]
pub(crate) struct ClientSettings {
    pub pacing: Pacing,
    pub iteration_timeout: Option<Duration>,
    pub expected_statuses: ExpectedStatuses,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ClientExit {
    pub iterations: u64,
    /// The client was force-stopped with an iteration in flight.
    pub forced: bool,
}

pub(crate) struct Client<W> {
    pub id: u64,
    pub workload: W,
    pub metrics: Arc<BuiltinMetrics>,
    pub settings: Arc<ClientSettings>,
    pub status: Arc<ClientStatus>,
    /// Graceful stop: observed only between iterations.
    pub stop: CancellationToken,
    /// Hard stop: abandons the in-flight iteration.
    pub force: CancellationToken,
}

impl<W: Workload> Client<W> {
    pub(crate) async fn run(self) -> ClientExit {
        self.status.transition(ClientState::Spawned, ClientState::Running);
        tracing::debug!(client_id = self.id, "client started");

        let mut rng = StdRng::from_entropy();
        let mut iteration: u64 = 0;

        let forced = loop {
            if self.stop.is_cancelled() {
                break false;
            }

            let ctx = IterationContext {
                client_id: self.id,
                iteration,
            };
            let started = Instant::now();

            let result = tokio::select! {
                biased;
                _ = self.force.cancelled() => {
                    self.metrics.record_cancelled();
                    break true;
                }
                res = invoke(&self.workload, ctx, self.settings.iteration_timeout) => res,
            };
            let elapsed = started.elapsed();

            match result {
                Ok(outcome) => {
                    self.metrics.record_outcome(
                        self.id,
                        &outcome,
                        &self.settings.expected_statuses,
                        elapsed,
                    );
                }
                Err(err) => self.metrics.record_error(self.id, &err, elapsed),
            }
            iteration = iteration.saturating_add(1);

            let delay = self.settings.pacing.next_delay(&mut rng);
            if delay.is_zero() {
                tokio::task::yield_now().await;
                continue;
            }

            tokio::select! {
                biased;
                _ = self.stop.cancelled() => break false,
                _ = tokio::time::sleep(delay) => {}
            }
        };

        self.status.mark_terminated();
        tracing::debug!(client_id = self.id, iterations = iteration, forced, "client terminated");

        ClientExit {
            iterations: iteration,
            forced,
        }
    }
}

/// Runs one iteration. Panics and timeouts come back as workload errors so the client survives.
async fn invoke<W: Workload>(
    workload: &W,
    ctx: IterationContext,
    timeout: Option<Duration>,
) -> WorkloadResult {
    let call = match std::panic::catch_unwind(AssertUnwindSafe(|| workload.call(ctx))) {
        Ok(fut) => AssertUnwindSafe(fut).catch_unwind(),
        Err(payload) => return Err(panicked(payload.as_ref())),
    };

    let res = match timeout {
        Some(limit) => match tokio::time::timeout(limit, call).await {
            Ok(res) => res,
            Err(_) => return Err(WorkloadError::Timeout(limit)),
        },
        None => call.await,
    };
    res.unwrap_or_else(|payload| Err(panicked(payload.as_ref())))
}

fn panicked(payload: &(dyn Any + Send)) -> WorkloadError {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string());
    WorkloadError::Other(format!("workload panicked: {message}"))
}
