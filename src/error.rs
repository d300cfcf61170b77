//! Error types for sparql-exec
//!
//! This module provides the error handling for the library:
//! - [`QueryError`] - the structured, per-request failure handed to observers
//! - [`QueryErrorKind`] - the closed taxonomy a presentation layer switches on
//! - [`Error`] - crate-level error wrapping configuration problems and query failures
//!
//! `QueryError` is never flattened into a bare string inside the crate. Kind,
//! HTTP status, detail and cause all travel to subscribers intact.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Result type alias for sparql-exec operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for sparql-exec
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "chunk_size")
        key: Option<String>,
    },

    /// A query execution failed
    #[error(transparent)]
    Query(#[from] QueryError),

    /// The HTTP client could not be constructed
    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),
}

impl Error {
    /// Create a configuration error for the given key
    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }
}

/// Category of a failed query execution
///
/// Each kind maps to a distinct rendering in the presentation layer, so the
/// set is closed and stable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueryErrorKind {
    /// Transport failed without a response
    Network,
    /// The configured deadline expired
    Timeout,
    /// Transport failed in a way consistent with a cross-origin block
    Cors,
    /// Non-2xx response without a recognisable protocol error
    Http,
    /// The endpoint rejected the query (syntax or protocol error reported by the server)
    ProtocolViolation,
    /// A 2xx response whose body could not be decoded
    Parse,
}

impl QueryErrorKind {
    /// Wire name of the kind (matches the serialized form)
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryErrorKind::Network => "network",
            QueryErrorKind::Timeout => "timeout",
            QueryErrorKind::Cors => "cors",
            QueryErrorKind::Http => "http",
            QueryErrorKind::ProtocolViolation => "protocol-violation",
            QueryErrorKind::Parse => "parse",
        }
    }
}

impl std::fmt::Display for QueryErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Guidance attached to every CORS classification
pub const CORS_GUIDANCE: &str = "The endpoint may not allow cross-origin requests. \
     Try routing the request through a CORS proxy, or ask the endpoint administrator \
     to send Access-Control-Allow-Origin headers.";

/// Structured failure of a single query execution
///
/// # Example JSON
///
/// ```json
/// {
///   "kind": "protocol-violation",
///   "message": "Lexical error at line 1",
///   "http_status": 400
/// }
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{kind} error: {message}")]
pub struct QueryError {
    /// Failure category
    pub kind: QueryErrorKind,
    /// Human-readable message, suitable for display
    pub message: String,
    /// HTTP status code, when a response was received
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    /// Additional context (server-provided detail, body excerpt, parser message)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Rendered chain of the underlying error, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

impl QueryError {
    /// Create an error of the given kind with a message
    pub fn new(kind: QueryErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            http_status: None,
            detail: None,
            cause: None,
        }
    }

    /// Transport failed without a response
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::Network, message)
    }

    /// The deadline expired after `after`
    pub fn timeout(after: Duration) -> Self {
        Self::new(
            QueryErrorKind::Timeout,
            format!("query timed out after {} ms", after.as_millis()),
        )
    }

    /// Cross-origin block; the message always carries [`CORS_GUIDANCE`]
    pub fn cors(message: impl Into<String>) -> Self {
        Self::new(
            QueryErrorKind::Cors,
            format!("{} {}", message.into(), CORS_GUIDANCE),
        )
    }

    /// Non-2xx response without a recognisable protocol error
    pub fn http(status: u16, excerpt: impl Into<String>) -> Self {
        let excerpt = excerpt.into();
        let mut error = Self::new(
            QueryErrorKind::Http,
            format!("endpoint responded with HTTP {status}"),
        )
        .with_status(status);
        if !excerpt.is_empty() {
            error.detail = Some(excerpt);
        }
        error
    }

    /// The endpoint reported a query or protocol error
    pub fn protocol_violation(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::ProtocolViolation, message)
    }

    /// A successful response body could not be decoded
    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::Parse, message)
    }

    /// Attach the HTTP status
    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    /// Attach detail text
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Attach the rendered source chain of `cause`
    #[must_use]
    pub fn with_cause(mut self, cause: &(dyn std::error::Error + 'static)) -> Self {
        self.cause = Some(render_chain(cause));
        self
    }

    /// Machine-readable error code
    ///
    /// Clients can use this for programmatic error handling.
    pub fn code(&self) -> &'static str {
        match self.kind {
            QueryErrorKind::Network => "network_error",
            QueryErrorKind::Timeout => "timeout",
            QueryErrorKind::Cors => "cors_blocked",
            QueryErrorKind::Http => "http_error",
            QueryErrorKind::ProtocolViolation => "protocol_violation",
            QueryErrorKind::Parse => "malformed_response",
        }
    }
}

/// Render an error and all of its sources as `outer: inner: innermost`
pub(crate) fn render_chain(error: &(dyn std::error::Error + 'static)) -> String {
    let mut rendered = error.to_string();
    let mut source = error.source();
    while let Some(inner) = source {
        let text = inner.to_string();
        // reqwest and hyper frequently repeat the inner message in the outer one
        if !rendered.contains(&text) {
            rendered.push_str(": ");
            rendered.push_str(&text);
        }
        source = inner.source();
    }
    rendered
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kind_has_distinct_wire_name_and_code() {
        let kinds = [
            QueryErrorKind::Network,
            QueryErrorKind::Timeout,
            QueryErrorKind::Cors,
            QueryErrorKind::Http,
            QueryErrorKind::ProtocolViolation,
            QueryErrorKind::Parse,
        ];

        let names: std::collections::HashSet<_> = kinds.iter().map(|k| k.as_str()).collect();
        let codes: std::collections::HashSet<_> = kinds
            .iter()
            .map(|k| QueryError::new(*k, "x").code())
            .collect();

        assert_eq!(names.len(), kinds.len());
        assert_eq!(codes.len(), kinds.len());
    }

    #[test]
    fn kind_serializes_as_kebab_case() {
        let json = serde_json::to_string(&QueryErrorKind::ProtocolViolation).unwrap();
        assert_eq!(json, "\"protocol-violation\"");
    }

    #[test]
    fn structured_fields_survive_serialization() {
        let error = QueryError::http(502, "<html>Bad Gateway</html>");

        let json = serde_json::to_value(&error).unwrap();
        assert_eq!(json["kind"], "http");
        assert_eq!(json["http_status"], 502);
        assert_eq!(json["detail"], "<html>Bad Gateway</html>");
        assert!(json.get("cause").is_none(), "absent cause must be omitted");

        let back: QueryError = serde_json::from_value(json).unwrap();
        assert_eq!(back, error);
    }

    #[test]
    fn http_error_with_empty_body_has_no_detail() {
        let error = QueryError::http(500, "");
        assert_eq!(error.http_status, Some(500));
        assert!(error.detail.is_none());
    }

    #[test]
    fn cors_message_always_contains_guidance() {
        let error = QueryError::cors("Request to https://example.org/sparql was blocked.");
        assert_eq!(error.kind, QueryErrorKind::Cors);
        assert!(error.message.contains("CORS proxy"));
        assert!(error.message.starts_with("Request to https://example.org/sparql"));
    }

    #[test]
    fn timeout_message_names_the_deadline() {
        let error = QueryError::timeout(Duration::from_millis(1500));
        assert_eq!(error.kind, QueryErrorKind::Timeout);
        assert_eq!(error.message, "query timed out after 1500 ms");
    }

    #[test]
    fn display_includes_kind_and_message() {
        let error = QueryError::parse("malformed response");
        assert_eq!(error.to_string(), "parse error: malformed response");
    }

    #[test]
    fn render_chain_walks_sources_without_duplicates() {
        #[derive(Debug, Error)]
        #[error("outer failure")]
        struct Outer(#[source] std::io::Error);

        let inner = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let error = QueryError::network("x").with_cause(&Outer(inner));

        assert_eq!(error.cause.as_deref(), Some("outer failure: refused"));
    }

    #[test]
    fn query_error_converts_into_crate_error() {
        let error: Error = QueryError::parse("bad").into();
        assert!(matches!(error, Error::Query(ref q) if q.kind == QueryErrorKind::Parse));
    }

    #[test]
    fn config_error_records_key() {
        let error = Error::config("chunk_size", "must be greater than zero");
        match error {
            Error::Config { key, message } => {
                assert_eq!(key.as_deref(), Some("chunk_size"));
                assert_eq!(message, "must be greater than zero");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
