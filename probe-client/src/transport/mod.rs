//! Transport abstraction for the admin API.
//!
//! This module provides a pluggable transport layer under [`ApiClient`]:
//! a single `get()` that takes an endpoint plus query parameters and
//! returns the raw status and body.
//!
//! # Design
//!
//! The cluster sometimes answers with a status line no HTTP parser will
//! accept (`HTTP/1.1 32805 (Doc force deleted)`). Rather than digging that
//! line out of a parser exception, transports report it as a structured
//! [`TransportError::MalformedStatusLine`] carrying the raw text, and
//! [`ApiClient`] decides what it means.
//!
//! [`ApiClient`]: crate::ApiClient

mod http;
mod mock;

pub use http::HttpTransport;
pub use mock::{MockReply, MockTransport};

use async_trait::async_trait;
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Connection refused or reset before a response.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// No response within the request timeout.
    #[error("request timed out")]
    Timeout,

    /// The server answered with a status line that is not `HTTP/x.y NNN ...`.
    #[error("malformed status line: {line:?}")]
    MalformedStatusLine {
        /// The raw first line of the response.
        line: String,
    },

    /// Any other request failure.
    #[error("request failed: {0}")]
    RequestFailed(String),
}

impl TransportError {
    /// Text between the first `(` and the following `)` of a malformed status line.
    pub fn status_text(&self) -> Option<&str> {
        let TransportError::MalformedStatusLine { line } = self else {
            return None;
        };
        let open = line.find('(')?;
        let rest = &line[open + 1..];
        let close = rest.find(')')?;
        Some(&rest[..close])
    }
}

/// One admin API request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Endpoint path relative to the instance root, e.g. `admin/status`.
    pub endpoint: String,
    /// Query parameters, in order.
    pub params: Vec<(String, String)>,
}

impl Request {
    /// First value of a query parameter.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Status and body of a well-formed response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body.
    pub body: String,
}

impl RawResponse {
    /// True for 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Transport trait for issuing admin API requests against one instance.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Issue a GET request.
    async fn get(&self, request: &Request) -> Result<RawResponse, TransportError>;

    /// Human-readable address of the instance, for logs.
    fn address(&self) -> String;
}

/// Whether `line` is a syntactically valid HTTP/1.x status line.
pub(crate) fn is_valid_status_line(line: &str) -> bool {
    let mut parts = line.splitn(3, ' ');
    let (Some(version), Some(code)) = (parts.next(), parts.next()) else {
        return false;
    };
    let version_ok = version
        .strip_prefix("HTTP/")
        .and_then(|v| v.split_once('.'))
        .is_some_and(|(major, minor)| {
            !major.is_empty()
                && !minor.is_empty()
                && major.bytes().all(|b| b.is_ascii_digit())
                && minor.bytes().all(|b| b.is_ascii_digit())
        });
    version_ok && code.len() == 3 && code.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_text_extracts_parenthesized_part() {
        let err = TransportError::MalformedStatusLine {
            line: "HTTP/1.1 32805 (Doc force deleted)".into(),
        };
        assert_eq!(err.status_text(), Some("Doc force deleted"));

        let err = TransportError::MalformedStatusLine {
            line: "garbage".into(),
        };
        assert_eq!(err.status_text(), None);
        assert_eq!(TransportError::Timeout.status_text(), None);
    }

    #[test]
    fn status_line_validation() {
        assert!(is_valid_status_line("HTTP/1.1 200 OK"));
        assert!(is_valid_status_line("HTTP/1.0 404"));
        assert!(!is_valid_status_line("HTTP/1.1 32805 (Doc force deleted)"));
        assert!(!is_valid_status_line("HTTP/1.1 20 OK"));
        assert!(!is_valid_status_line("SPDY/3 200 OK"));
        assert!(!is_valid_status_line(""));
    }

    #[test]
    fn request_param_lookup() {
        let request = Request {
            endpoint: "search".into(),
            params: vec![("q".into(), "test".into()), ("n".into(), "2".into())],
        };
        assert_eq!(request.param("n"), Some("2"));
        assert_eq!(request.param("missing"), None);
    }
}
