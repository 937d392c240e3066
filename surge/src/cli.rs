use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use surge_core::runner::Stage;

pub(crate) fn parse_duration(input: &str) -> Result<Duration, String> {
    let s = input.trim();
    if s.is_empty() {
        return Err("duration cannot be empty (expected e.g. 10s, 250ms, 1m)".to_string());
    }

    let number_end = s
        .char_indices()
        .find(|(_, ch)| !ch.is_ascii_digit())
        .map_or(s.len(), |(idx, _)| idx);

    if number_end == 0 {
        return Err(format!(
            "invalid duration '{s}' (expected e.g. 10s, 250ms, 1m)"
        ));
    }

    let (number_str, unit_str) = s.split_at(number_end);
    let value: u64 = number_str
        .parse()
        .map_err(|_| format!("invalid duration '{s}' (expected e.g. 10s, 250ms, 1m)"))?;

    match unit_str.trim() {
        "" | "s" | "sec" | "secs" | "second" | "seconds" => Ok(Duration::from_secs(value)),
        "ms" | "msec" | "msecs" | "millisecond" | "milliseconds" => {
            Ok(Duration::from_millis(value))
        }
        "m" | "min" | "mins" | "minute" | "minutes" => {
            let secs = value
                .checked_mul(60)
                .ok_or_else(|| format!("duration '{s}' is too large"))?;
            Ok(Duration::from_secs(secs))
        }
        "h" | "hr" | "hrs" | "hour" | "hours" => {
            let secs = value
                .checked_mul(60 * 60)
                .ok_or_else(|| format!("duration '{s}' is too large"))?;
            Ok(Duration::from_secs(secs))
        }
        _ => Err(format!(
            "invalid duration '{s}' (expected e.g. 10s, 250ms, 1m)"
        )),
    }
}

/// `DURATION:TARGET`, e.g. `30s:20`.
pub(crate) fn parse_stage(input: &str) -> Result<Stage, String> {
    let (duration, target) = input
        .split_once(':')
        .ok_or_else(|| format!("invalid stage '{input}' (expected DURATION:TARGET, e.g. 30s:20)"))?;

    let duration = parse_duration(duration)?;
    let target: u64 = target
        .trim()
        .parse()
        .map_err(|_| format!("invalid stage target in '{input}' (expected a non-negative integer)"))?;

    Ok(Stage::new(duration, target))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Progress bar and human-readable summary.
    HumanReadable,
    /// Emit JSON progress and summary lines (NDJSON) to stdout.
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "surge",
    author,
    version,
    about = "Staged load generator for rate-limiting services",
    long_about = "surge ramps a population of virtual clients up and down over a list of stages.\n\nEvery client repeatedly sends a rate-limit check request, records latency, status and check metrics, and the run is judged against k6-style thresholds (e.g. `p(95)<500`).\n\nLogging is controlled with SURGE_LOG (e.g. SURGE_LOG=surge_core=debug).",
    after_help = "Examples:\n  surge run demos/token-bucket.yaml\n  surge run demos/token-bucket.yaml --base-url http://127.0.0.1:8080\n  surge run demos/token-bucket.yaml --stage 10s:5 --stage 20s:5 --output json\n  surge validate demos/token-bucket.yaml"
)]
pub struct Cli {
    /// Log line format on stderr
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a load test described by a YAML config
    #[command(
        long_about = "Run the staged load test described by a YAML config.\n\nCLI flags override values from the file. Ctrl-C stops the run gracefully: in-flight iterations finish and thresholds are evaluated one last time."
    )]
    Run(RunArgs),

    /// Parse and validate a YAML config and print the resolved timeline
    Validate(ValidateArgs),
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    /// Path to the run config (.yaml)
    pub config: PathBuf,

    /// Base URL of the service under test (overrides `baseUrl`)
    #[arg(long, env = "BASE_URL")]
    pub base_url: Option<String>,

    /// Replace the config's stages (repeatable, DURATION:TARGET)
    #[arg(long = "stage", value_name = "DURATION:TARGET", value_parser = parse_stage)]
    pub stages: Vec<Stage>,

    /// How long clients may take to finish in-flight iterations at the end of the run
    #[arg(long, value_parser = parse_duration)]
    pub drain_timeout: Option<Duration>,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::HumanReadable)]
    pub output: OutputFormat,
}

#[derive(Debug, Args)]
pub struct ValidateArgs {
    #[command(flatten)]
    pub config: ConfigArgs,
}
