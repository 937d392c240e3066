use std::time::Duration;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Metrics(#[from] surge_metrics::Error),

    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Rejected run configuration. A run never starts with one of these.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("`stages` must be a non-empty array of {{ duration, target }}")]
    EmptyStages,

    #[error("`stages` must add up to a positive total duration")]
    ZeroTotalDuration,

    #[error("`{name}` must be a positive duration")]
    NonPositiveInterval { name: &'static str },

    #[error("pacing jitter ({jitter:?}) must not exceed the base interval ({base:?})")]
    InvalidJitter { base: Duration, jitter: Duration },

    #[error("`expected_statuses` must not be empty")]
    EmptyExpectedStatuses,

    #[error("invalid threshold expression for metric `{metric}`: {expression}: {reason}")]
    InvalidThreshold {
        metric: String,
        expression: String,
        reason: String,
    },
}
