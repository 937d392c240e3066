use std::fmt::Write as _;

use anyhow::Context as _;
use surge_http::{HttpClient, HttpClientConfig};
use tokio_util::sync::CancellationToken;

use crate::cli::{ConfigArgs, RunArgs, ValidateArgs};
use crate::config_yaml::{self, ResolvedConfig};
use crate::exit_codes::ExitCode;
use crate::output;
use crate::run_error::RunError;
use crate::workload::LimitCheckWorkload;

pub async fn run(args: RunArgs) -> Result<ExitCode, RunError> {
    let config = resolve(&args.config).await?;

    let out = output::formatter(args.output);
    out.print_header(&args.config.config, &config);

    let client = HttpClient::with_config(&HttpClientConfig {
        max_idle_per_host: usize::try_from(config.run.max_clients()).unwrap_or(usize::MAX),
        ..HttpClientConfig::default()
    });
    let workload = LimitCheckWorkload::new(client, config.workload);

    let cancel = CancellationToken::new();
    let interrupts = tokio::spawn(forward_interrupts(cancel.clone()));

    let result = surge_core::runner::run(config.run, workload, out.progress(), cancel).await;
    interrupts.abort();
    let result = result?;

    out.print_summary(&result).map_err(RunError::RuntimeError)?;

    Ok(ExitCode::from_result(&result))
}

pub async fn validate(args: ValidateArgs) -> Result<(), RunError> {
    let config = resolve(&args.config).await?;
    print!("{}", describe(&config));
    Ok(())
}

async fn resolve(args: &ConfigArgs) -> Result<ResolvedConfig, RunError> {
    config_yaml::load(&args.config)
        .await
        .and_then(|doc| doc.resolve(args))
        .with_context(|| format!("invalid run config: {}", args.config.display()))
        .map_err(RunError::InvalidInput)
}

/// First Ctrl-C drains the run; a second one exits immediately.
async fn forward_interrupts(cancel: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_err() {
        return;
    }
    tracing::warn!("interrupt received, draining clients");
    eprintln!("interrupted: finishing in-flight iterations (Ctrl-C again to quit)");
    cancel.cancel();

    if tokio::signal::ctrl_c().await.is_ok() {
        std::process::exit(ExitCode::Interrupted.as_i32());
    }
}

fn describe(config: &ResolvedConfig) -> String {
    let run = &config.run;
    let mut out = String::new();

    writeln!(out, "config ok").ok();
    writeln!(out, "target: POST {}", config.workload.url).ok();
    writeln!(
        out,
        "total: {} over {} stage(s), up to {} clients",
        humantime::format_duration(run.total_duration()),
        run.stages.len(),
        run.max_clients()
    )
    .ok();

    let mut from = run.start_clients;
    for (idx, stage) in run.stages.iter().enumerate() {
        writeln!(
            out,
            "  stage {}: {} {} -> {}",
            idx + 1,
            humantime::format_duration(stage.duration),
            from,
            stage.target
        )
        .ok();
        from = stage.target;
    }

    for t in &run.thresholds {
        let abort = if t.abort_on_fail {
            format!(
                " abort_on_fail (after {})",
                humantime::format_duration(t.delay_abort_eval)
            )
        } else {
            String::new()
        };
        writeln!(out, "threshold: {} {}{abort}", t.metric, t.expr).ok();
    }

    out
}
