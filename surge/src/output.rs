use crate::cli::OutputFormat;
use crate::config_yaml::ResolvedConfig;
use std::path::Path;

use surge_core::runner::{ProgressFn, RunResult};

mod human;
mod json;

pub(crate) trait OutputFormatter: Send + Sync {
    fn print_header(&self, config_path: &Path, config: &ResolvedConfig);
    fn progress(&self) -> Option<ProgressFn>;
    fn print_summary(&self, result: &RunResult) -> anyhow::Result<()>;
}

pub(crate) fn formatter(format: OutputFormat) -> Box<dyn OutputFormatter> {
    match format {
        OutputFormat::HumanReadable => Box::new(human::HumanReadableOutput::new()),
        OutputFormat::Json => Box::new(json::JsonOutput),
    }
}
