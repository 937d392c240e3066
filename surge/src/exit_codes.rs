use surge_core::runner::RunResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,

    /// One or more thresholds failed on the final evaluation.
    ThresholdsFailed = 11,

    /// An abort-on-fail threshold stopped the run early.
    Aborted = 12,

    /// The run was interrupted (Ctrl-C) before its timeline finished.
    Interrupted = 13,

    /// Invalid CLI/config (bad flags, invalid durations, stages, threshold syntax, etc.).
    InvalidInput = 30,

    /// Internal/runtime error (IO errors, failed tasks, unexpected invariants).
    RuntimeError = 40,
}

impl ExitCode {
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// An abort wins over an interruption, which wins over plain threshold failures.
    #[must_use]
    pub fn from_result(result: &RunResult) -> Self {
        if result.aborted.is_some() {
            Self::Aborted
        } else if result.interrupted {
            Self::Interrupted
        } else if !result.passed {
            Self::ThresholdsFailed
        } else {
            Self::Success
        }
    }
}
