use tracing_subscriber::EnvFilter;

use crate::cli::LogFormat;

pub(crate) const LOG_ENV: &str = "SURGE_LOG";

/// Logs go to stderr so NDJSON on stdout stays parseable. Quiet (`warn`) unless `SURGE_LOG` says otherwise.
pub(crate) fn init(format: LogFormat) {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true);

    // A subscriber may already be installed (e.g. by a test harness).
    let _ = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}
