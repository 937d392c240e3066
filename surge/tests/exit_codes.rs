use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::Context as _;
use serde_json::Value;
use surge_testserver::TestServer;

fn status_code(status: std::process::ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

fn config_path(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/configs")
        .join(name)
}

fn describe(out: &Output) -> String {
    format!(
        "exit code {}\nstdout:\n{}\nstderr:\n{}",
        status_code(out.status),
        String::from_utf8_lossy(&out.stdout),
        String::from_utf8_lossy(&out.stderr)
    )
}

/// Runs `surge run <config> --output json` against `base_url` off the async runtime, so the
/// in-process test server keeps serving.
async fn run_json(config: &str, base_url: &str) -> anyhow::Result<Output> {
    let exe = env!("CARGO_BIN_EXE_surge");
    let path = config_path(config);
    let base_url = base_url.to_string();

    tokio::task::spawn_blocking(move || {
        Command::new(exe)
            .arg("run")
            .arg(&path)
            .arg("--base-url")
            .arg(&base_url)
            .arg("--output")
            .arg("json")
            .env_remove("BASE_URL")
            .output()
    })
    .await
    .context("spawn_blocking join")?
    .context("run surge binary")
}

fn summary_line(out: &Output) -> anyhow::Result<Value> {
    let stdout = String::from_utf8_lossy(&out.stdout);
    stdout
        .lines()
        .filter_map(|l| serde_json::from_str::<Value>(l).ok())
        .find(|v| v.get("kind").and_then(Value::as_str) == Some("summary"))
        .with_context(|| format!("no summary line\n{}", describe(out)))
}

#[test]
fn invalid_flags_exit_30() -> anyhow::Result<()> {
    let exe = env!("CARGO_BIN_EXE_surge");

    let out = Command::new(exe)
        .arg("run")
        .arg("./does-not-matter.yaml")
        .arg("--drain-timeout")
        .arg("10x")
        .output()
        .context("run surge binary")?;

    anyhow::ensure!(status_code(out.status) == 30, "{}", describe(&out));
    Ok(())
}

#[test]
fn missing_config_file_exit_30() -> anyhow::Result<()> {
    let exe = env!("CARGO_BIN_EXE_surge");

    let out = Command::new(exe)
        .arg("validate")
        .arg(config_path("does-not-exist.yaml"))
        .arg("--base-url")
        .arg("http://127.0.0.1:1")
        .output()
        .context("run surge binary")?;

    anyhow::ensure!(status_code(out.status) == 30, "{}", describe(&out));
    Ok(())
}

#[test]
fn invalid_threshold_exit_30() -> anyhow::Result<()> {
    let exe = env!("CARGO_BIN_EXE_surge");

    let out = Command::new(exe)
        .arg("validate")
        .arg(config_path("bad_threshold.yaml"))
        .arg("--base-url")
        .arg("http://127.0.0.1:1")
        .output()
        .context("run surge binary")?;

    anyhow::ensure!(status_code(out.status) == 30, "{}", describe(&out));
    let stderr = String::from_utf8_lossy(&out.stderr);
    anyhow::ensure!(stderr.contains("http_req_duration"), "{}", describe(&out));
    Ok(())
}

#[test]
fn validate_prints_timeline_and_exits_0() -> anyhow::Result<()> {
    let exe = env!("CARGO_BIN_EXE_surge");

    let out = Command::new(exe)
        .arg("validate")
        .arg(config_path("healthy.yaml"))
        .arg("--base-url")
        .arg("http://127.0.0.1:1")
        .arg("--stage")
        .arg("5s:4")
        .output()
        .context("run surge binary")?;

    anyhow::ensure!(status_code(out.status) == 0, "{}", describe(&out));
    let stdout = String::from_utf8_lossy(&out.stdout);
    anyhow::ensure!(stdout.contains("config ok"), "{}", describe(&out));
    anyhow::ensure!(stdout.contains("stage 1: 5s 0 -> 4"), "{}", describe(&out));
    anyhow::ensure!(!stdout.contains("stage 2"), "{}", describe(&out));
    Ok(())
}

#[tokio::test]
async fn healthy_run_exit_0() -> anyhow::Result<()> {
    let server = TestServer::start().await.context("start test server")?;
    let out = run_json("healthy.yaml", server.base_url()).await?;
    let served = server.stats().requests_total();
    server.shutdown().await;

    anyhow::ensure!(status_code(out.status) == 0, "{}", describe(&out));

    let summary = summary_line(&out)?;
    anyhow::ensure!(
        summary.get("passed").and_then(Value::as_bool) == Some(true),
        "{}",
        describe(&out)
    );

    let requests = summary
        .pointer("/totals/requests")
        .and_then(Value::as_u64)
        .unwrap_or_default();
    anyhow::ensure!(requests > 0, "{}", describe(&out));
    // Iterations cut off at shutdown reach the server but are never recorded.
    anyhow::ensure!(requests <= served, "client saw {requests}, server saw {served}");
    anyhow::ensure!(
        summary.pointer("/totals/errors").and_then(Value::as_u64) == Some(0),
        "{}",
        describe(&out)
    );
    anyhow::ensure!(
        summary.pointer("/metrics/request_duration/type").and_then(Value::as_str) == Some("trend"),
        "{}",
        describe(&out)
    );

    let progress_lines = String::from_utf8_lossy(&out.stdout)
        .lines()
        .filter(|l| l.contains(r#""kind":"progress""#))
        .count();
    anyhow::ensure!(progress_lines >= 2, "{}", describe(&out));

    Ok(())
}

#[tokio::test]
async fn thresholds_failed_exit_11() -> anyhow::Result<()> {
    let server = TestServer::start().await.context("start test server")?;
    let out = run_json("flaky.yaml", server.base_url()).await?;
    server.shutdown().await;

    anyhow::ensure!(status_code(out.status) == 11, "{}", describe(&out));

    let summary = summary_line(&out)?;
    let observed = summary
        .pointer("/thresholds/0/observed")
        .and_then(Value::as_f64)
        .unwrap_or_default();
    anyhow::ensure!(
        (0.1..0.35).contains(&observed),
        "observed error rate {observed}\n{}",
        describe(&out)
    );
    anyhow::ensure!(
        summary.get("aborted").is_some_and(Value::is_null),
        "{}",
        describe(&out)
    );

    Ok(())
}

#[tokio::test]
async fn abort_on_fail_exit_12() -> anyhow::Result<()> {
    let server = TestServer::start().await.context("start test server")?;
    let out = run_json("flaky_abort.yaml", server.base_url()).await?;
    server.shutdown().await;

    anyhow::ensure!(status_code(out.status) == 12, "{}", describe(&out));

    let summary = summary_line(&out)?;
    anyhow::ensure!(
        summary.pointer("/aborted/metric").and_then(Value::as_str) == Some("errors"),
        "{}",
        describe(&out)
    );
    let duration = summary
        .get("duration_secs")
        .and_then(Value::as_f64)
        .unwrap_or(f64::MAX);
    anyhow::ensure!(duration < 30.0, "{}", describe(&out));

    Ok(())
}

#[tokio::test]
async fn unreachable_target_is_recorded_not_fatal() -> anyhow::Result<()> {
    let out = run_json("flaky.yaml", "http://127.0.0.1:1").await?;

    // Every iteration is a workload error, so the errors threshold fails.
    anyhow::ensure!(status_code(out.status) == 11, "{}", describe(&out));

    let summary = summary_line(&out)?;
    let iterations = summary
        .pointer("/totals/iterations")
        .and_then(Value::as_u64)
        .unwrap_or_default();
    let errors = summary
        .pointer("/totals/errors")
        .and_then(Value::as_u64)
        .unwrap_or_default();
    anyhow::ensure!(iterations > 0 && iterations == errors, "{}", describe(&out));
    anyhow::ensure!(
        summary
            .pointer("/metrics/workload_errors/value")
            .and_then(Value::as_u64)
            == Some(iterations),
        "{}",
        describe(&out)
    );

    Ok(())
}
