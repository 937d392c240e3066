mod builtin;
mod config;
mod error;
mod executor;
mod pacer;
mod progress;
mod run;
mod schedule;
mod scheduler;
mod summary;
mod thresholds;
mod thresholds_eval;
mod workload;

pub use builtin::{
    CHECKS, ENGINE_ERRORS, ERRORS, HTTP_REQ_DURATION, HTTP_REQ_FAILED, HTTP_REQS, ITERATION_DURATION,
    ITERATIONS, ITERATIONS_CANCELLED, VUS, VUS_MAX, WORKLOAD_ERRORS,
};
pub use config::{ExpectedStatuses, RunConfig, Stage};
pub use error::{ConfigError, Error, Result};
pub use executor::ClientState;
pub use pacer::Pacing;
pub use progress::{ClientCounts, LiveMetrics, ProgressFn, ProgressUpdate, StageProgress};
pub use run::{RunHandle, run, start};
pub use schedule::{ConcurrencyTimeline, StageSnapshot};
pub use summary::{AbortInfo, DrainReport, RunResult, TimelineReport, Totals};
pub use thresholds::{Threshold, ThresholdAgg, ThresholdExpr, ThresholdOp, parse_threshold_expr};
pub use thresholds_eval::{FailureReason, ThresholdResult, all_passed, evaluate, evaluate_one};
pub use workload::{
    CheckResult, IterationContext, IterationOutcome, Workload, WorkloadError, WorkloadErrorKind,
    WorkloadResult,
};
