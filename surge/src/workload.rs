use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use surge_core::metrics::Sample;
use surge_core::runner::{
    ExpectedStatuses, IterationContext, IterationOutcome, Workload, WorkloadError, WorkloadResult,
};
use surge_http::{HttpClient, HttpRequest};

pub(crate) const CHECK_STATUS: &str = "status is expected";
pub(crate) const CHECK_ALLOWED_FIELD: &str = "response has allowed field";

/// Per-request latency as the workload itself saw it, in milliseconds.
pub(crate) const REQUEST_DURATION: &str = "request_duration";

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LimitCheckSettings {
    pub url: String,
    pub algorithm: String,
    pub limit: u64,
    /// Sent verbatim, e.g. `1m`.
    pub window: String,
    pub key_prefix: String,
    pub request_timeout: Option<Duration>,
    pub expected_statuses: ExpectedStatuses,
}

#[derive(Debug, Serialize)]
struct LimitCheckRequest<'a> {
    key: String,
    algorithm: &'a str,
    limit: u64,
    window: &'a str,
}

/// POSTs one rate-limit check per iteration, keyed by client and iteration.
#[derive(Debug, Clone)]
pub(crate) struct LimitCheckWorkload {
    client: HttpClient,
    settings: Arc<LimitCheckSettings>,
}

impl LimitCheckWorkload {
    pub(crate) fn new(client: HttpClient, settings: LimitCheckSettings) -> Self {
        Self {
            client,
            settings: Arc::new(settings),
        }
    }

    async fn iterate(self, ctx: IterationContext) -> WorkloadResult {
        let s = &*self.settings;

        let body = serde_json::to_vec(&LimitCheckRequest {
            key: format!("{}:{}:{}", s.key_prefix, ctx.client_id, ctx.iteration),
            algorithm: &s.algorithm,
            limit: s.limit,
            window: &s.window,
        })
        .map_err(|err| WorkloadError::Other(format!("failed to encode request: {err}")))?;

        let req = HttpRequest::post(s.url.clone(), body)
            .with_header("Content-Type", "application/json")
            .with_timeout(s.request_timeout);
        let described = req.describe();

        let res = self.client.request(req).await.map_err(|err| match err {
            surge_http::Error::Timeout(after) => WorkloadError::Timeout(after),
            err if err.is_transport() => WorkloadError::Transport(err.to_string()),
            err => WorkloadError::Other(err.to_string()),
        })?;

        let status_ok = s.expected_statuses.contains(res.status);
        let parsed = serde_json::from_slice::<serde_json::Value>(&res.body);
        let has_allowed = match parsed {
            Ok(v) => v.get("allowed").is_some(),
            Err(err) if status_ok => {
                return Err(WorkloadError::InvalidResponse(format!(
                    "{described} answered {} with a non-JSON body: {err}",
                    res.status
                )));
            }
            Err(_) => false,
        };

        let latency_ms = res.elapsed.as_secs_f64() * 1000.0;
        Ok(
            IterationOutcome::request(described, Some(res.status), res.elapsed)
                .with_check(CHECK_STATUS, status_ok)
                .with_check(CHECK_ALLOWED_FIELD, has_allowed)
                .with_sample(Sample::trend(REQUEST_DURATION, latency_ms)),
        )
    }
}

impl Workload for LimitCheckWorkload {
    type Future = Pin<Box<dyn Future<Output = WorkloadResult> + Send + 'static>>;

    fn call(&self, ctx: IterationContext) -> Self::Future {
        Box::pin(self.clone().iterate(ctx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use surge_testserver::TestServer;

    fn settings(url: String) -> LimitCheckSettings {
        LimitCheckSettings {
            url,
            algorithm: "token_bucket".to_string(),
            limit: 100,
            window: "1m".to_string(),
            key_prefix: "user".to_string(),
            request_timeout: Some(Duration::from_secs(5)),
            expected_statuses: ExpectedStatuses::from_codes([200, 429]),
        }
    }

    fn ctx(client_id: u64, iteration: u64) -> IterationContext {
        IterationContext {
            client_id,
            iteration,
        }
    }

    fn check(outcome: &IterationOutcome, name: &str) -> bool {
        outcome
            .checks
            .iter()
            .find(|c| &*c.name == name)
            .map(|c| c.passed)
            .unwrap_or_else(|| panic!("missing check {name}"))
    }

    #[tokio::test]
    async fn allowed_request_passes_both_checks() {
        let server = TestServer::start()
            .await
            .unwrap_or_else(|e| panic!("start test server: {e}"));
        let workload = LimitCheckWorkload::new(
            HttpClient::default(),
            settings(server.urls().limit_check.clone()),
        );

        let outcome = workload
            .call(ctx(1, 0))
            .await
            .unwrap_or_else(|e| panic!("{e}"));

        assert_eq!(outcome.status, Some(200));
        assert!(check(&outcome, CHECK_STATUS));
        assert!(check(&outcome, CHECK_ALLOWED_FIELD));
        assert!(
            outcome
                .request
                .as_deref()
                .is_some_and(|r| r.starts_with("POST "))
        );
        assert_eq!(outcome.samples.len(), 1);
        assert_eq!(&*outcome.samples[0].metric, REQUEST_DURATION);
        assert_eq!(server.stats().allowed_total(), 1);

        server.shutdown().await;
    }

    #[tokio::test]
    async fn denied_request_is_still_an_expected_status() {
        let server = TestServer::start()
            .await
            .unwrap_or_else(|e| panic!("start test server: {e}"));
        let mut s = settings(server.urls().limit_check.clone());
        s.limit = 1;
        let workload = LimitCheckWorkload::new(HttpClient::default(), s);

        // Same context, same key: the second call exhausts the bucket.
        let first = workload
            .call(ctx(3, 7))
            .await
            .unwrap_or_else(|e| panic!("{e}"));
        let second = workload
            .call(ctx(3, 7))
            .await
            .unwrap_or_else(|e| panic!("{e}"));

        assert_eq!(first.status, Some(200));
        assert_eq!(second.status, Some(429));
        assert!(second.all_checks_passed());
        assert_eq!(server.stats().denied_total(), 1);

        server.shutdown().await;
    }

    #[tokio::test]
    async fn server_error_fails_the_status_check() {
        let server = TestServer::start()
            .await
            .unwrap_or_else(|e| panic!("start test server: {e}"));
        let workload =
            LimitCheckWorkload::new(HttpClient::default(), settings(server.urls().flaky.clone()));

        let mut statuses = Vec::new();
        for i in 0..5 {
            let outcome = workload
                .call(ctx(1, i))
                .await
                .unwrap_or_else(|e| panic!("{e}"));
            statuses.push((outcome.status, check(&outcome, CHECK_STATUS)));
        }

        assert_eq!(statuses[4], (Some(500), false));
        assert!(statuses[..4].iter().all(|(s, ok)| *s == Some(200) && *ok));

        server.shutdown().await;
    }

    #[tokio::test]
    async fn non_json_body_with_expected_status_is_invalid_response() {
        let server = TestServer::start()
            .await
            .unwrap_or_else(|e| panic!("start test server: {e}"));
        let workload = LimitCheckWorkload::new(
            HttpClient::default(),
            settings(server.urls().plaintext.clone()),
        );

        let err = match workload.call(ctx(1, 0)).await {
            Ok(outcome) => panic!("expected an error, got {outcome:?}"),
            Err(err) => err,
        };
        assert!(matches!(err, WorkloadError::InvalidResponse(_)), "{err}");

        server.shutdown().await;
    }

    #[tokio::test]
    async fn unreachable_server_is_a_transport_error() {
        let workload = LimitCheckWorkload::new(
            HttpClient::default(),
            settings("http://127.0.0.1:1/api/v1/limit-check".to_string()),
        );

        let err = match workload.call(ctx(1, 0)).await {
            Ok(outcome) => panic!("expected an error, got {outcome:?}"),
            Err(err) => err,
        };
        assert!(matches!(err, WorkloadError::Transport(_)), "{err}");
    }
}
