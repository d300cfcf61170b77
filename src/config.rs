//! Configuration types for sparql-exec
//!
//! Settings are supplied by the embedding application and treated as opaque.
//! Nothing in the crate derives or adjusts them at runtime.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// HTTP transport settings
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Request deadline in milliseconds (default: 60000)
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Longest serialized GET URL before a read query is sent as POST (default: 2000)
    ///
    /// Update operations ignore this and are always POSTed.
    #[serde(default = "default_max_get_url_length")]
    pub max_get_url_length: usize,

    /// Maximum number of body characters kept as detail on HTTP errors (default: 1000)
    #[serde(default = "default_error_excerpt_chars")]
    pub error_excerpt_chars: usize,

    /// User-Agent header sent with every request (None = reqwest default)
    #[serde(default)]
    pub user_agent: Option<String>,

    /// Case-insensitive patterns identifying a query syntax error in a non-JSON error body
    #[serde(default = "default_syntax_error_patterns")]
    pub syntax_error_patterns: Vec<String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            max_get_url_length: default_max_get_url_length(),
            error_excerpt_chars: default_error_excerpt_chars(),
            user_agent: None,
            syntax_error_patterns: default_syntax_error_patterns(),
        }
    }
}

/// Result decoding settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DecodeConfig {
    /// Row cap for SELECT results (default: 100000, None = unbounded)
    #[serde(default = "default_max_rows")]
    pub max_rows: Option<usize>,

    /// Bindings per slice when parsing in chunked mode (default: 1000)
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            max_rows: default_max_rows(),
            chunk_size: default_chunk_size(),
        }
    }
}

/// Thresholds deciding where a response body is parsed
///
/// The defaults are heuristics, not derived limits; tune them per deployment.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ParserThresholds {
    /// Bodies smaller than this (and under `in_process_max_rows`) parse in-process (default: 1 MiB)
    #[serde(default = "default_in_process_max_bytes")]
    pub in_process_max_bytes: usize,

    /// Worker dispatch threshold in estimated rows (default: 5000)
    #[serde(default = "default_in_process_max_rows")]
    pub in_process_max_rows: usize,

    /// Bodies larger than this are parsed in chunked slices (default: 10 MiB)
    #[serde(default = "default_chunked_min_bytes")]
    pub chunked_min_bytes: usize,

    /// Estimated row counts above this are parsed in chunked slices (default: 50000)
    #[serde(default = "default_chunked_min_rows")]
    pub chunked_min_rows: usize,

    /// Average serialized size of one binding, used to estimate row counts (default: 200)
    #[serde(default = "default_estimated_bytes_per_row")]
    pub estimated_bytes_per_row: usize,

    /// Whether the background worker may be used at all (default: true)
    #[serde(default = "default_true")]
    pub background_enabled: bool,
}

impl Default for ParserThresholds {
    fn default() -> Self {
        Self {
            in_process_max_bytes: default_in_process_max_bytes(),
            in_process_max_rows: default_in_process_max_rows(),
            chunked_min_bytes: default_chunked_min_bytes(),
            chunked_min_rows: default_chunked_min_rows(),
            estimated_bytes_per_row: default_estimated_bytes_per_row(),
            background_enabled: true,
        }
    }
}

/// Main configuration for sparql-exec
///
/// Fields are organized into logical sub-configs:
/// - [`transport`](TransportConfig) - deadlines, GET/POST cutoff
/// - [`decode`](DecodeConfig) - row cap, chunk size
/// - [`parser`](ParserThresholds) - in-process vs. background dispatch
///
/// All sub-config fields are flattened, so the serialized form is a single
/// flat object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// HTTP transport settings
    #[serde(flatten)]
    pub transport: TransportConfig,

    /// Result decoding settings
    #[serde(flatten)]
    pub decode: DecodeConfig,

    /// Parse strategy thresholds
    #[serde(flatten)]
    pub parser: ParserThresholds,
}

impl Config {
    /// Request deadline
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.transport.timeout_ms)
    }

    /// Check the settings for values that cannot work
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the offending key.
    pub fn validate(&self) -> Result<()> {
        if self.transport.timeout_ms == 0 {
            return Err(Error::config("timeout_ms", "must be greater than zero"));
        }
        if self.transport.max_get_url_length == 0 {
            return Err(Error::config(
                "max_get_url_length",
                "must be greater than zero",
            ));
        }
        if self.decode.chunk_size == 0 {
            return Err(Error::config("chunk_size", "must be greater than zero"));
        }
        if self.parser.estimated_bytes_per_row == 0 {
            return Err(Error::config(
                "estimated_bytes_per_row",
                "must be greater than zero",
            ));
        }
        if self.parser.chunked_min_bytes < self.parser.in_process_max_bytes {
            return Err(Error::config(
                "chunked_min_bytes",
                "must not be smaller than in_process_max_bytes",
            ));
        }
        if self.parser.chunked_min_rows < self.parser.in_process_max_rows {
            return Err(Error::config(
                "chunked_min_rows",
                "must not be smaller than in_process_max_rows",
            ));
        }
        Ok(())
    }
}

fn default_timeout_ms() -> u64 {
    60_000
}

fn default_max_get_url_length() -> usize {
    2000
}

fn default_error_excerpt_chars() -> usize {
    1000
}

fn default_syntax_error_patterns() -> Vec<String> {
    vec![
        r"(?i)\b(syntax|lexical|parse|parser)\s+error".to_string(),
        r#"(?i)\bencountered\s+""#.to_string(),
        r"(?i)\bwas\s+expecting\b".to_string(),
        r"(?i)\bmalformed\s*query\b".to_string(),
        r"(?i)\bquery\s*parse\s*exception\b".to_string(),
        r"(?i)\bunexpected\s+(token|character|end of input)\b".to_string(),
    ]
}

fn default_max_rows() -> Option<usize> {
    Some(100_000)
}

fn default_chunk_size() -> usize {
    1000
}

fn default_in_process_max_bytes() -> usize {
    1024 * 1024
}

fn default_in_process_max_rows() -> usize {
    5000
}

fn default_chunked_min_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_chunked_min_rows() -> usize {
    50_000
}

fn default_estimated_bytes_per_row() -> usize {
    200
}

fn default_true() -> bool {
    true
}
