//! Core types for sparql-exec

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Requested or received serialization of a query response
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultFormat {
    /// SPARQL Query Results JSON
    #[default]
    Json,
    /// SPARQL Query Results XML
    Xml,
    /// SPARQL Query Results CSV
    Csv,
    /// SPARQL Query Results TSV
    Tsv,
    /// Turtle (CONSTRUCT/DESCRIBE)
    Turtle,
    /// RDF/XML (CONSTRUCT/DESCRIBE)
    RdfXml,
    /// JSON-LD (CONSTRUCT/DESCRIBE)
    JsonLd,
    /// N-Triples (CONSTRUCT/DESCRIBE)
    NTriples,
}

impl ResultFormat {
    /// MIME type sent in the `Accept` header for this format
    pub fn mime_type(&self) -> &'static str {
        match self {
            ResultFormat::Json => "application/sparql-results+json",
            ResultFormat::Xml => "application/sparql-results+xml",
            ResultFormat::Csv => "text/csv",
            ResultFormat::Tsv => "text/tab-separated-values",
            ResultFormat::Turtle => "text/turtle",
            ResultFormat::RdfXml => "application/rdf+xml",
            ResultFormat::JsonLd => "application/ld+json",
            ResultFormat::NTriples => "application/n-triples",
        }
    }

    /// Map a `Content-Type` value to a format
    ///
    /// Parameters such as `charset` are ignored and matching is case-insensitive.
    /// Returns `None` for media types outside the table.
    pub fn from_media_type(media_type: &str) -> Option<Self> {
        let essence = media_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        let format = match essence.as_str() {
            "application/sparql-results+json" | "application/json" => ResultFormat::Json,
            "application/sparql-results+xml" => ResultFormat::Xml,
            "text/csv" => ResultFormat::Csv,
            "text/tab-separated-values" | "text/tsv" => ResultFormat::Tsv,
            "text/turtle" | "application/x-turtle" => ResultFormat::Turtle,
            "application/rdf+xml" => ResultFormat::RdfXml,
            "application/ld+json" => ResultFormat::JsonLd,
            "application/n-triples" => ResultFormat::NTriples,
            _ => return None,
        };
        Some(format)
    }

    /// Whether the format serializes RDF graphs (CONSTRUCT/DESCRIBE results)
    pub fn is_graph_format(&self) -> bool {
        matches!(
            self,
            ResultFormat::Turtle | ResultFormat::RdfXml | ResultFormat::JsonLd | ResultFormat::NTriples
        )
    }

    /// Whether the body is decoded into a table/boolean rather than passed through
    pub fn is_decodable(&self) -> bool {
        matches!(self, ResultFormat::Json)
    }
}

impl std::fmt::Display for ResultFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ResultFormat::Json => "json",
            ResultFormat::Xml => "xml",
            ResultFormat::Csv => "csv",
            ResultFormat::Tsv => "tsv",
            ResultFormat::Turtle => "turtle",
            ResultFormat::RdfXml => "rdfxml",
            ResultFormat::JsonLd => "jsonld",
            ResultFormat::NTriples => "ntriples",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for ResultFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(ResultFormat::Json),
            "xml" => Ok(ResultFormat::Xml),
            "csv" => Ok(ResultFormat::Csv),
            "tsv" => Ok(ResultFormat::Tsv),
            "turtle" | "ttl" => Ok(ResultFormat::Turtle),
            "rdfxml" | "rdf/xml" => Ok(ResultFormat::RdfXml),
            "jsonld" | "json-ld" => Ok(ResultFormat::JsonLd),
            "ntriples" | "n-triples" | "nt" => Ok(ResultFormat::NTriples),
            other => Err(format!("unknown result format '{other}'")),
        }
    }
}

/// One query execution, created per user trigger and consumed once
#[derive(Clone, Debug)]
pub struct QueryRequest {
    endpoint_url: String,
    query_text: String,
    desired_format: ResultFormat,
    timeout: Option<Duration>,
    cancellation_token: CancellationToken,
}

impl QueryRequest {
    /// Create a request for `query_text` against `endpoint_url`
    ///
    /// Defaults to JSON results, the configured timeout, and a fresh
    /// cancellation token.
    pub fn new(endpoint_url: impl Into<String>, query_text: impl Into<String>) -> Self {
        Self {
            endpoint_url: endpoint_url.into(),
            query_text: query_text.into(),
            desired_format: ResultFormat::default(),
            timeout: None,
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Request a specific response format
    #[must_use]
    pub fn with_format(mut self, format: ResultFormat) -> Self {
        self.desired_format = format;
        self
    }

    /// Override the configured deadline for this request
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Use an externally owned cancellation token
    #[must_use]
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = token;
        self
    }

    /// Endpoint URL
    pub fn endpoint_url(&self) -> &str {
        &self.endpoint_url
    }

    /// Query text as typed by the user
    pub fn query_text(&self) -> &str {
        &self.query_text
    }

    /// Requested response format
    pub fn desired_format(&self) -> ResultFormat {
        self.desired_format
    }

    /// Per-request deadline override
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Token that aborts this request when cancelled
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation_token
    }
}

/// Result of an operation that the caller may cancel
///
/// Cancellation is not a failure, so it is kept out of the error channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome<T> {
    /// The operation ran to completion
    Completed(T),
    /// The operation was cancelled by the caller
    Cancelled,
}

impl<T> Outcome<T> {
    /// Whether the operation was cancelled
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Outcome::Cancelled)
    }

    /// The completed value, if any
    pub fn completed(self) -> Option<T> {
        match self {
            Outcome::Completed(value) => Some(value),
            Outcome::Cancelled => None,
        }
    }
}

/// Value bound to one variable in one result row
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum BindingValue {
    /// IRI
    Uri {
        /// The IRI
        value: String,
    },
    /// Literal with optional datatype IRI or language tag, both kept verbatim
    Literal {
        /// Lexical form
        value: String,
        /// Datatype IRI
        #[serde(default, skip_serializing_if = "Option::is_none")]
        datatype: Option<String>,
        /// Language tag
        #[serde(default, skip_serializing_if = "Option::is_none")]
        language: Option<String>,
    },
    /// Blank node label
    BlankNode {
        /// Label without the `_:` prefix
        value: String,
    },
    /// Variable has no value in this row
    Unbound,
}

impl BindingValue {
    /// The lexical value, or `None` when unbound
    pub fn value(&self) -> Option<&str> {
        match self {
            BindingValue::Uri { value }
            | BindingValue::Literal { value, .. }
            | BindingValue::BlankNode { value } => Some(value),
            BindingValue::Unbound => None,
        }
    }

    /// Whether the variable is unbound
    pub fn is_unbound(&self) -> bool {
        matches!(self, BindingValue::Unbound)
    }
}

/// One result row, keyed by column name in column order
pub type Row = IndexMap<String, BindingValue>;

/// Bounded tabular projection of a SELECT result
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TabularResult {
    columns: Vec<String>,
    rows: Vec<Row>,
    total_row_count: usize,
    is_truncated: bool,
    row_limit: Option<usize>,
}

impl TabularResult {
    /// Assemble a result; truncation is derived from `total_row_count` and `row_limit`
    pub(crate) fn new(
        columns: Vec<String>,
        rows: Vec<Row>,
        total_row_count: usize,
        row_limit: Option<usize>,
    ) -> Self {
        let is_truncated = row_limit.is_some_and(|limit| total_row_count > limit);
        debug_assert_eq!(
            rows.len(),
            row_limit.map_or(total_row_count, |limit| total_row_count.min(limit))
        );
        Self {
            columns,
            rows,
            total_row_count,
            is_truncated,
            row_limit,
        }
    }

    /// Server-declared variable names, in order
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Parsed rows (at most `row_limit`)
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Number of bindings the server returned
    pub fn total_row_count(&self) -> usize {
        self.total_row_count
    }

    /// Whether rows were dropped by the row cap
    pub fn is_truncated(&self) -> bool {
        self.is_truncated
    }

    /// Row cap in effect when decoding (None = unbounded)
    pub fn row_limit(&self) -> Option<usize> {
        self.row_limit
    }
}

/// Result of an ASK query
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BooleanResult {
    /// The answer
    pub value: bool,
}

/// Body handed through without decoding (CSV, TSV, XML, RDF graphs, update responses)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawPassthrough {
    /// Response content type
    pub content_type: String,
    /// Untouched response body
    pub body: String,
}

/// Decoded projection of a response body
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DecodedResult {
    /// SELECT
    Table(TabularResult),
    /// ASK
    Boolean(BooleanResult),
    /// Anything not decoded into rows
    Raw(RawPassthrough),
}

/// Progress of a background parse, reported once per slice
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ParseProgress {
    /// Rows converted so far
    pub rows_parsed: usize,
    /// Rows that will be converted in total (bindings kept under the cap)
    pub total_rows_estimate: usize,
    /// Time since the parse started
    pub elapsed: Duration,
}

/// Durations captured at phase boundaries of one execution
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionMetrics {
    /// Request sent until response headers received
    pub network: Duration,
    /// Response headers until full body received
    pub download: Duration,
    /// Body received until decoded
    pub parse: Duration,
    /// Start to settlement
    pub total: Duration,
}
