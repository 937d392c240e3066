use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

mod limiter;

pub use limiter::{Algorithm, Decision, Limiter};

pub const PATH_LIMIT_CHECK: &str = "/api/v1/limit-check";
pub const PATH_FLAKY: &str = "/api/v1/flaky";
pub const PATH_SLOW: &str = "/api/v1/slow";
pub const PATH_PLAINTEXT: &str = "/plaintext";
pub const PATH_HEALTH: &str = "/health";

/// Every n-th request to the flaky endpoint fails with a 500.
pub const FLAKY_EVERY: u64 = 5;

const DEFAULT_LIMIT: u64 = 100;
const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Default)]
pub struct TestServerStats {
    requests_total: Arc<AtomicU64>,
    allowed_total: Arc<AtomicU64>,
    denied_total: Arc<AtomicU64>,
    bad_requests_total: Arc<AtomicU64>,
    flaky_total: Arc<AtomicU64>,
}

impl TestServerStats {
    fn inc(counter: &AtomicU64) -> u64 {
        counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn requests_total(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    pub fn allowed_total(&self) -> u64 {
        self.allowed_total.load(Ordering::Relaxed)
    }

    pub fn denied_total(&self) -> u64 {
        self.denied_total.load(Ordering::Relaxed)
    }

    pub fn bad_requests_total(&self) -> u64 {
        self.bad_requests_total.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone)]
pub struct TestServerUrls {
    pub base_url: String,
    pub limit_check: String,
    pub flaky: String,
    pub slow: String,
    pub plaintext: String,
    pub health: String,
}

impl TestServerUrls {
    pub fn new(base_url: String) -> Self {
        Self {
            limit_check: format!("{base_url}{PATH_LIMIT_CHECK}"),
            flaky: format!("{base_url}{PATH_FLAKY}"),
            slow: format!("{base_url}{PATH_SLOW}"),
            plaintext: format!("{base_url}{PATH_PLAINTEXT}"),
            health: format!("{base_url}{PATH_HEALTH}"),
            base_url,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct AppState {
    stats: TestServerStats,
    limiter: Arc<Limiter>,
}

#[derive(Debug, Deserialize)]
struct CheckLimitRequest {
    key: String,
    #[serde(default)]
    algorithm: Option<Algorithm>,
    #[serde(default)]
    limit: Option<u64>,
    /// Humantime duration such as `1m` or `30s`.
    #[serde(default)]
    window: Option<String>,
}

#[derive(Debug, Serialize)]
struct CheckLimitResponse {
    allowed: bool,
    remaining: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'static str>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn json<T: Serialize>(status: StatusCode, body: &T) -> (StatusCode, Bytes) {
    match serde_json::to_vec(body) {
        Ok(bytes) => (status, Bytes::from(bytes)),
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Bytes::from_static(b"encode error"),
        ),
    }
}

fn bad_request(state: &AppState, error: impl Into<String>) -> (StatusCode, Bytes) {
    TestServerStats::inc(&state.stats.bad_requests_total);
    json(
        StatusCode::BAD_REQUEST,
        &ErrorResponse {
            error: error.into(),
        },
    )
}

fn check_limit(state: &AppState, body: &[u8]) -> (StatusCode, Bytes) {
    let req: CheckLimitRequest = match serde_json::from_slice(body) {
        Ok(v) => v,
        Err(_) => return bad_request(state, "Invalid request body"),
    };
    if req.key.is_empty() {
        return bad_request(state, "Key is required");
    }

    let window = match req.window.as_deref().map(humantime::parse_duration) {
        None => DEFAULT_WINDOW,
        Some(Ok(w)) if !w.is_zero() => w,
        Some(_) => return bad_request(state, "Invalid window"),
    };
    let limit = req.limit.filter(|l| *l > 0).unwrap_or(DEFAULT_LIMIT);
    let algorithm = req.algorithm.unwrap_or_default();

    let decision = state
        .limiter
        .check(&req.key, algorithm, limit, window, Instant::now());

    if decision.allowed {
        TestServerStats::inc(&state.stats.allowed_total);
        json(
            StatusCode::OK,
            &CheckLimitResponse {
                allowed: true,
                remaining: decision.remaining,
                message: None,
            },
        )
    } else {
        TestServerStats::inc(&state.stats.denied_total);
        json(
            StatusCode::TOO_MANY_REQUESTS,
            &CheckLimitResponse {
                allowed: false,
                remaining: 0,
                message: Some("Rate limit exceeded"),
            },
        )
    }
}

async fn handle_limit_check(State(state): State<AppState>, body: Bytes) -> (StatusCode, Bytes) {
    TestServerStats::inc(&state.stats.requests_total);
    check_limit(&state, &body)
}

async fn handle_flaky(State(state): State<AppState>, body: Bytes) -> (StatusCode, Bytes) {
    TestServerStats::inc(&state.stats.requests_total);
    let n = TestServerStats::inc(&state.stats.flaky_total);
    if n % FLAKY_EVERY == 0 {
        return json(
            StatusCode::INTERNAL_SERVER_ERROR,
            &ErrorResponse {
                error: "injected failure".to_string(),
            },
        );
    }
    check_limit(&state, &body)
}

async fn handle_slow(State(state): State<AppState>, body: Bytes) -> (StatusCode, Bytes) {
    TestServerStats::inc(&state.stats.requests_total);
    tokio::time::sleep(Duration::from_millis(50)).await;
    check_limit(&state, &body)
}

async fn handle_plaintext(State(state): State<AppState>) -> &'static str {
    TestServerStats::inc(&state.stats.requests_total);
    "Hello World!"
}

async fn handle_health() -> (StatusCode, Bytes) {
    json(StatusCode::OK, &serde_json::json!({ "status": "healthy" }))
}

fn app(state: AppState) -> Router {
    Router::new()
        .route(PATH_LIMIT_CHECK, post(handle_limit_check))
        .route(PATH_FLAKY, post(handle_flaky))
        .route(PATH_SLOW, post(handle_slow))
        .route(PATH_PLAINTEXT, get(handle_plaintext).post(handle_plaintext))
        .route(PATH_HEALTH, get(handle_health))
        .with_state(state)
}

pub fn router(stats: TestServerStats) -> Router {
    app(AppState {
        stats,
        limiter: Arc::new(Limiter::default()),
    })
}

pub struct TestServer {
    addr: SocketAddr,
    urls: TestServerUrls,
    stats: TestServerStats,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl TestServer {
    pub async fn start() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let stats = TestServerStats::default();
        let app = router(stats.clone());

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            let _ = serve.await;
        });

        Ok(Self {
            addr,
            urls: TestServerUrls::new(format!("http://{addr}")),
            stats,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn base_url(&self) -> &str {
        &self.urls.base_url
    }

    pub fn urls(&self) -> &TestServerUrls {
        &self.urls
    }

    pub fn stats(&self) -> &TestServerStats {
        &self.stats
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if self.shutdown_tx.is_some()
            && let Some(task) = self.task.take()
        {
            task.abort();
        }
    }
}
