use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context as _;
use clap::Parser;
use surge_testserver::{TestServerStats, TestServerUrls, router};
use tokio::net::TcpListener;

/// Local stand-in for the rate-limit service.
#[derive(Debug, Parser)]
#[command(name = "surge-testserver", version)]
struct Args {
    /// Address to listen on. Port 0 picks a free port.
    #[arg(long, default_value = "127.0.0.1:8080")]
    bind: SocketAddr,

    /// Print request counters to stderr at this interval (e.g. `10s`).
    #[arg(long, value_parser = humantime::parse_duration)]
    report_every: Option<Duration>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let listener = TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("failed to bind {}", args.bind))?;
    let addr = listener.local_addr()?;

    let stats = TestServerStats::default();
    let app = router(stats.clone());

    let urls = TestServerUrls::new(format!("http://{addr}"));
    println!("BASE_URL={}", urls.base_url);
    eprintln!("limit check: POST {}", urls.limit_check);
    eprintln!("flaky:       POST {}", urls.flaky);

    let reporter = args
        .report_every
        .map(|every| tokio::spawn(report(stats.clone(), every)));

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    if let Some(reporter) = reporter {
        reporter.abort();
    }
    eprintln!("final: {}", summary(&stats));
    Ok(())
}

async fn report(stats: TestServerStats, every: Duration) {
    let mut interval = tokio::time::interval(every);
    interval.tick().await;
    loop {
        interval.tick().await;
        eprintln!("{}", summary(&stats));
    }
}

fn summary(stats: &TestServerStats) -> String {
    format!(
        "requests={} allowed={} denied={} bad_requests={}",
        stats.requests_total(),
        stats.allowed_total(),
        stats.denied_total(),
        stats.bad_requests_total()
    )
}
