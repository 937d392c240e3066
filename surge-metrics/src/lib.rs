pub mod error;
pub mod metrics;
pub mod registry;
pub mod sample;
pub mod snapshot;

pub use error::{Error, Result};
pub use metrics::{MetricHandle, MetricKind, MetricValue, TrendSummary};
pub use registry::Registry;
pub use sample::{Sample, SampleValue};
pub use snapshot::{MetricSnapshot, SnapshotValue, TrendSnapshot};
