use std::time::Duration;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum HttpErrorKind {
    InvalidUrl,
    UnsupportedScheme,
    InvalidHeader,
    RequestBuild,
    Connect,
    Request,
    Timeout,
    BodyRead,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid url `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("unsupported url scheme `{scheme}`; expected http or https")]
    UnsupportedScheme { scheme: String },

    #[error("invalid header `{name}`: {reason}")]
    InvalidHeader { name: String, reason: String },

    #[error("could not build request: {0}")]
    RequestBuild(#[from] http::Error),

    #[error("could not connect to {authority}: {source}")]
    Connect {
        authority: String,
        #[source]
        source: hyper_util::client::legacy::Error,
    },

    #[error("request failed: {0}")]
    Request(#[source] hyper_util::client::legacy::Error),

    #[error("no complete response within {0:?}")]
    Timeout(Duration),

    #[error("reading the response body failed: {0}")]
    BodyRead(#[from] hyper::Error),
}

impl Error {
    #[must_use]
    pub fn kind(&self) -> HttpErrorKind {
        match self {
            Self::InvalidUrl { .. } => HttpErrorKind::InvalidUrl,
            Self::UnsupportedScheme { .. } => HttpErrorKind::UnsupportedScheme,
            Self::InvalidHeader { .. } => HttpErrorKind::InvalidHeader,
            Self::RequestBuild(_) => HttpErrorKind::RequestBuild,
            Self::Connect { .. } => HttpErrorKind::Connect,
            Self::Request(_) => HttpErrorKind::Request,
            Self::Timeout(_) => HttpErrorKind::Timeout,
            Self::BodyRead(_) => HttpErrorKind::BodyRead,
        }
    }

    /// No usable response came back. The request itself was well formed.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(
            self.kind(),
            HttpErrorKind::Connect
                | HttpErrorKind::Request
                | HttpErrorKind::Timeout
                | HttpErrorKind::BodyRead
        )
    }

    pub(crate) fn send_failed(authority: &str, err: hyper_util::client::legacy::Error) -> Self {
        if err.is_connect() {
            Self::Connect {
                authority: authority.to_string(),
                source: err,
            }
        } else {
            Self::Request(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_delivery_failures_count_as_transport() {
        let timeout = Error::Timeout(Duration::from_secs(1));
        assert!(timeout.is_transport());
        assert_eq!(timeout.kind().to_string(), "timeout");

        let header = Error::InvalidHeader {
            name: "x bad".to_string(),
            reason: "invalid HTTP header name".to_string(),
        };
        assert!(!header.is_transport());
        assert_eq!(header.kind(), HttpErrorKind::InvalidHeader);
        assert_eq!(
            header.to_string(),
            "invalid header `x bad`: invalid HTTP header name"
        );
    }
}
