use std::time::Duration;

use bytes::Bytes;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Bytes,
    /// Response headers (lowercased header names). Multiple values are joined with ", ".
    pub headers: Vec<(String, String)>,
    /// Time from sending the request until the whole body was read.
    pub elapsed: Duration,
}

impl HttpResponse {
    pub fn body_utf8(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: http::Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    pub fn new(method: http::Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: Bytes::new(),
            timeout: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(http::Method::GET, url)
    }

    pub fn post(url: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            body: body.into(),
            ..Self::new(http::Method::POST, url)
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// `METHOD url`, used to identify the request in results.
    pub fn describe(&self) -> String {
        format!("{} {}", self.method, self.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_collects_headers_and_body() {
        let req = HttpRequest::post("http://localhost/api", r#"{"a":1}"#)
            .with_header("Content-Type", "application/json")
            .with_timeout(Some(Duration::from_secs(2)));

        assert_eq!(req.method, http::Method::POST);
        assert_eq!(req.body, Bytes::from_static(br#"{"a":1}"#));
        assert_eq!(
            req.headers,
            vec![("Content-Type".to_string(), "application/json".to_string())]
        );
        assert_eq!(req.timeout, Some(Duration::from_secs(2)));
        assert_eq!(req.describe(), "POST http://localhost/api");
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let res = HttpResponse {
            status: 200,
            body: Bytes::from_static(b"ok"),
            headers: vec![("content-type".to_string(), "text/plain".to_string())],
            elapsed: Duration::ZERO,
        };
        assert_eq!(res.header("Content-Type"), Some("text/plain"));
        assert_eq!(res.header("x-missing"), None);
        assert_eq!(res.body_utf8(), Some("ok"));
    }
}
