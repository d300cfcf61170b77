//! Classification of transport failures and error responses into [`QueryError`]s.

use crate::config::TransportConfig;
use crate::error::{QueryError, QueryErrorKind, render_chain};
use regex::Regex;

/// Fragments that browser fetch implementations put in opaque cross-origin failures
///
/// Outside a browser no transport reports a CORS block, so this can only ever be a
/// best-effort guess: a blocked request and an unreachable host look alike.
const CORS_MARKERS: [&str; 6] = [
    "cors",
    "cross-origin",
    "access-control-allow-origin",
    "failed to fetch",
    "networkerror when attempting to fetch",
    "load failed",
];

/// Longest message lifted from a plain-text error body
const MAX_MESSAGE_CHARS: usize = 300;

/// Whether a rendered transport error looks like a cross-origin block
pub fn looks_like_cors_block(rendered: &str) -> bool {
    let lower = rendered.to_ascii_lowercase();
    CORS_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// Turns transport failures and non-2xx responses into typed errors
#[derive(Debug)]
pub(crate) struct ErrorClassifier {
    syntax_patterns: Vec<Regex>,
    excerpt_chars: usize,
}

impl ErrorClassifier {
    pub(crate) fn new(config: &TransportConfig) -> Self {
        Self {
            syntax_patterns: compile_patterns(&config.syntax_error_patterns),
            excerpt_chars: config.error_excerpt_chars,
        }
    }

    /// Classify a request that produced no response
    pub(crate) fn classify_send_error(&self, error: &reqwest::Error, endpoint: &str) -> QueryError {
        if error.is_timeout() {
            return QueryError::new(
                QueryErrorKind::Timeout,
                format!("request to {endpoint} timed out"),
            )
            .with_cause(error);
        }

        let rendered = render_chain(error);
        // Only the sources: the outer message embeds the URL, which may itself contain "cors"
        let sources = std::error::Error::source(error)
            .map(render_chain)
            .unwrap_or_default();
        if looks_like_cors_block(&sources) {
            tracing::warn!(endpoint, error = %rendered, "request looks blocked by CORS");
            return QueryError::cors(format!(
                "Request to {endpoint} was blocked before a response was received."
            ))
            .with_cause(error);
        }

        let message = if error.is_connect() {
            format!("could not connect to {endpoint}")
        } else {
            format!("request to {endpoint} failed without a response")
        };
        tracing::warn!(endpoint, error = %rendered, "network failure");
        QueryError::network(message).with_cause(error)
    }

    /// Classify a non-2xx response
    ///
    /// First match wins: a JSON body with `error.message`, then a body matching
    /// a syntax-error pattern, then a plain HTTP error.
    pub(crate) fn classify_error_response(&self, status: u16, body: &str) -> QueryError {
        let excerpt = excerpt(body, self.excerpt_chars);

        if let Some((message, detail)) = json_error_message(body) {
            return QueryError::protocol_violation(message)
                .with_status(status)
                .with_detail(detail.unwrap_or(excerpt));
        }

        if let Some(line) = self.syntax_error_line(body) {
            return QueryError::protocol_violation(line)
                .with_status(status)
                .with_detail(excerpt);
        }

        QueryError::http(status, excerpt)
    }

    /// First line of `body` matching any syntax-error pattern
    fn syntax_error_line(&self, body: &str) -> Option<String> {
        body.lines()
            .map(str::trim)
            .find(|line| self.syntax_patterns.iter().any(|re| re.is_match(line)))
            .map(|line| excerpt(line, MAX_MESSAGE_CHARS))
    }
}

/// `(message, detail)` from a JSON error body
///
/// Accepts `{"error": {"message": ..}}` (optionally with `detail`/`details`),
/// `{"error": ".."}` and `{"message": ..}`.
fn json_error_message(body: &str) -> Option<(String, Option<String>)> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let error = value.get("error");

    let message = error
        .and_then(|e| e.get("message"))
        .or_else(|| error.filter(|e| e.is_string()))
        .or_else(|| value.get("message"))
        .and_then(serde_json::Value::as_str)?;

    let detail = error
        .and_then(|e| e.get("detail").or_else(|| e.get("details")))
        .map(|d| match d.as_str() {
            Some(text) => text.to_string(),
            None => d.to_string(),
        });

    Some((message.to_string(), detail))
}

/// The first `max_chars` characters of `text`, marked when cut
fn excerpt(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}…", &text[..cut]),
        None => text.to_string(),
    }
}

/// Compile the configured patterns; invalid ones are logged and skipped
fn compile_patterns(patterns: &[String]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|pattern| {
            regex::RegexBuilder::new(pattern)
                .size_limit(1024 * 1024)
                .build()
                .map_err(|e| {
                    tracing::warn!(pattern = %pattern, error = %e, "invalid syntax-error pattern");
                })
                .ok()
        })
        .collect()
}
