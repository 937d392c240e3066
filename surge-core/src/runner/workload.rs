use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use surge_metrics::Sample;

/// Identity of one workload invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IterationContext {
    /// Ordinal of the virtual client (1-based, never reused within a run).
    pub client_id: u64,
    /// Per-client iteration index (0-based).
    pub iteration: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub name: Arc<str>,
    pub passed: bool,
}

/// What a single workload invocation observed.
#[derive(Debug, Clone, Default)]
pub struct IterationOutcome {
    /// Opaque description of the request that was sent (e.g. `POST http://host/path`).
    pub request: Option<String>,
    /// Protocol status, if a response was received.
    pub status: Option<u16>,
    pub latency: Duration,
    pub checks: Vec<CheckResult>,
    /// Extra samples for workload-defined metrics.
    pub samples: Vec<Sample>,
}

impl IterationOutcome {
    pub fn request(request: impl Into<String>, status: Option<u16>, latency: Duration) -> Self {
        Self {
            request: Some(request.into()),
            status,
            latency,
            checks: Vec::new(),
            samples: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_check(mut self, name: impl Into<Arc<str>>, passed: bool) -> Self {
        self.checks.push(CheckResult {
            name: name.into(),
            passed,
        });
        self
    }

    #[must_use]
    pub fn with_sample(mut self, sample: Sample) -> Self {
        self.samples.push(sample);
        self
    }

    #[must_use]
    pub fn with_counter(self, name: impl Into<Arc<str>>, value: u64) -> Self {
        self.with_sample(Sample::counter(name, value))
    }

    pub fn all_checks_passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum WorkloadErrorKind {
    Transport,
    Timeout,
    InvalidResponse,
    Other,
}

/// Unexpected failure of one iteration. The client records it and moves on.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkloadError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("iteration timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("{0}")]
    Other(String),
}

impl WorkloadError {
    #[must_use]
    pub fn kind(&self) -> WorkloadErrorKind {
        match self {
            Self::Transport(_) => WorkloadErrorKind::Transport,
            Self::Timeout(_) => WorkloadErrorKind::Timeout,
            Self::InvalidResponse(_) => WorkloadErrorKind::InvalidResponse,
            Self::Other(_) => WorkloadErrorKind::Other,
        }
    }
}

pub type WorkloadResult = std::result::Result<IterationOutcome, WorkloadError>;

/// The user-supplied body of an iteration.
///
/// Implemented for every cloneable `Fn(IterationContext) -> impl Future<Output = WorkloadResult>`,
/// so plain async closures work:
///
/// ```no_run
/// use std::time::Duration;
/// use surge_core::runner::{IterationContext, IterationOutcome, WorkloadResult};
///
/// let workload = |ctx: IterationContext| async move {
///     let ok = ctx.iteration % 5 != 0;
///     WorkloadResult::Ok(
///         IterationOutcome::request("GET /", Some(200), Duration::from_millis(3))
///             .with_check("body ok", ok),
///     )
/// };
/// # let _ = workload;
/// ```
pub trait Workload: Clone + Send + Sync + 'static {
    type Future: Future<Output = WorkloadResult> + Send + 'static;

    fn call(&self, ctx: IterationContext) -> Self::Future;
}

impl<F, Fut> Workload for F
where
    F: Fn(IterationContext) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = WorkloadResult> + Send + 'static,
{
    type Future = Fut;

    fn call(&self, ctx: IterationContext) -> Self::Future {
        self(ctx)
    }
}
