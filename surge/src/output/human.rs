use std::path::Path;
use std::sync::Arc;

mod format;
mod progress;
mod summary;

use format::{format_duration, format_ms_opt, format_observed, format_rate};
use progress::HumanProgress;
use summary::render;
use surge_core::runner::{ProgressFn, ProgressUpdate, RunResult};

use super::OutputFormatter;
use crate::config_yaml::ResolvedConfig;

pub(crate) struct HumanReadableOutput {
    progress: Arc<HumanProgress>,
}

impl HumanReadableOutput {
    pub(crate) fn new() -> Self {
        Self {
            progress: Arc::new(HumanProgress::new()),
        }
    }
}

fn progress_message(u: &ProgressUpdate) -> String {
    let mut msg = match &u.stage {
        Some(stage) => format!(
            "stage={}/{} target={} clients={}",
            stage.stage, stage.stages, stage.current_target, u.clients.live
        ),
        None => format!("clients={}", u.clients.live),
    };
    if u.clients.draining > 0 {
        msg.push_str(&format!(" draining={}", u.clients.draining));
    }

    let m = &u.metrics;
    msg.push_str(&format!(
        " elapsed={} iters/s={} rps={} p95={} errors={}",
        format_duration(u.elapsed),
        format_rate(m.iterations_per_sec_now),
        format_rate(m.rps_now),
        format_ms_opt(m.latency_p95_ms),
        m.errors_total
    ));
    msg
}

impl OutputFormatter for HumanReadableOutput {
    fn print_header(&self, config_path: &Path, config: &ResolvedConfig) {
        let run = &config.run;
        println!("config: {}", config_path.display());
        println!(
            "target: POST {} algorithm={} limit={} window={}",
            config.workload.url,
            config.workload.algorithm,
            config.workload.limit,
            config.workload.window
        );
        println!(
            "timeline: {} stage(s) over {}, up to {} clients",
            run.stages.len(),
            format_duration(run.total_duration()),
            run.max_clients()
        );
        for t in &run.thresholds {
            let abort = if t.abort_on_fail { " (abort on fail)" } else { "" };
            println!("threshold: {} {}{abort}", t.metric, t.source);
        }
        println!();
    }

    fn progress(&self) -> Option<ProgressFn> {
        let progress = self.progress.clone();
        Some(Arc::new(move |u| {
            progress.update(u.total_duration, u.elapsed, progress_message(&u));
        }))
    }

    fn print_summary(&self, result: &RunResult) -> anyhow::Result<()> {
        self.progress.finish();
        print!("{}", render(result));

        let failed: Vec<_> = result.failed_thresholds().collect();
        if !failed.is_empty() {
            eprintln!("thresholds failed:");
            for r in failed {
                eprintln!(
                    "  {}: {} (observed {})",
                    r.metric,
                    r.expression,
                    format_observed(r.observed)
                );
            }
        }

        Ok(())
    }
}
