use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http_body_util::{BodyExt as _, Full};
use hyper::Request;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use super::{Error, HttpRequest, HttpResponse, Result};

/// Connection settings for [`HttpClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpClientConfig {
    /// Unset means the OS default, which can run to tens of seconds against unreachable hosts.
    pub connect_timeout: Option<Duration>,
    /// Idle connections kept per host. Sized to the peak client count this avoids reconnect churn
    /// when clients ramp down and back up.
    pub max_idle_per_host: usize,
    pub idle_timeout: Option<Duration>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Some(Duration::from_secs(3)),
            max_idle_per_host: usize::MAX,
            idle_timeout: Some(Duration::from_secs(90)),
        }
    }
}

/// Pooled HTTP/1.1 client. Clones share the connection pool.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: Client<HttpsConnector<HttpConnector>, Full<Bytes>>,
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::with_config(&HttpClientConfig::default())
    }
}

impl HttpClient {
    #[must_use]
    pub fn new(connect_timeout: Option<Duration>) -> Self {
        Self::with_config(&HttpClientConfig {
            connect_timeout,
            ..HttpClientConfig::default()
        })
    }

    #[must_use]
    pub fn with_config(config: &HttpClientConfig) -> Self {
        let mut tcp = HttpConnector::new();
        tcp.enforce_http(false);
        tcp.set_connect_timeout(config.connect_timeout);
        tcp.set_nodelay(true);

        let connector = HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .wrap_connector(tcp);

        let inner = Client::builder(TokioExecutor::new())
            .pool_max_idle_per_host(config.max_idle_per_host)
            .pool_idle_timeout(config.idle_timeout)
            .build(connector);

        Self { inner }
    }

    /// Sends `req` and reads the whole response body.
    ///
    /// `elapsed` on the response covers sending the request through reading the last body byte.
    /// The request timeout bounds the same span.
    pub async fn request(&self, req: HttpRequest) -> Result<HttpResponse> {
        let HttpRequest {
            method,
            url,
            headers,
            body,
            timeout,
        } = req;

        let (uri, authority) = target_uri(&url)?;

        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in &headers {
            let (name, value) = header_pair(name, value)?;
            builder = builder.header(name, value);
        }
        let request = builder.body(Full::new(body))?;

        let started = Instant::now();
        let exchange = async {
            let res = self
                .inner
                .request(request)
                .await
                .map_err(|err| Error::send_failed(&authority, err))?;
            let (parts, body) = res.into_parts();
            let body = body.collect().await?.to_bytes();
            Ok::<_, Error>((parts, body))
        };

        let (parts, body) = match timeout {
            Some(limit) => tokio::time::timeout(limit, exchange)
                .await
                .map_err(|_| Error::Timeout(limit))??,
            None => exchange.await?,
        };

        Ok(HttpResponse {
            status: parts.status.as_u16(),
            body,
            headers: merge_headers(&parts.headers),
            elapsed: started.elapsed(),
        })
    }

    pub async fn get(&self, url: &str) -> Result<HttpResponse> {
        self.request(HttpRequest::get(url)).await
    }
}

/// Checks `url` and returns it as a request URI plus its `host:port` authority.
fn target_uri(url: &str) -> Result<(hyper::Uri, String)> {
    let invalid = |reason: String| Error::InvalidUrl {
        url: url.to_string(),
        reason,
    };

    let parsed = url::Url::parse(url).map_err(|e| invalid(e.to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(Error::UnsupportedScheme {
            scheme: parsed.scheme().to_string(),
        });
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| invalid("missing host".to_string()))?;
    let authority = match parsed.port_or_known_default() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };

    let uri = parsed
        .as_str()
        .parse::<hyper::Uri>()
        .map_err(|e| invalid(e.to_string()))?;
    Ok((uri, authority))
}

fn header_pair(name: &str, value: &str) -> Result<(HeaderName, HeaderValue)> {
    let invalid = |reason: String| Error::InvalidHeader {
        name: name.to_string(),
        reason,
    };
    let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| invalid(e.to_string()))?;
    let header_value = HeaderValue::from_str(value).map_err(|e| invalid(e.to_string()))?;
    Ok((header_name, header_value))
}

/// Lowercases header names and joins repeated headers with ", ".
fn merge_headers(headers: &http::HeaderMap) -> Vec<(String, String)> {
    let mut merged: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes());
        match merged.get_mut(name.as_str()) {
            Some(cur) => {
                cur.push_str(", ");
                cur.push_str(&value);
            }
            None => {
                merged.insert(name.as_str().to_string(), value.into_owned());
            }
        }
    }
    merged.into_iter().collect()
}
