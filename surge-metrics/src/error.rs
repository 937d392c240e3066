use crate::metrics::MetricKind;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("metric `{metric}` is registered as {registered}, got a {requested} sample")]
    KindConflict {
        metric: String,
        registered: MetricKind,
        requested: MetricKind,
    },
}
