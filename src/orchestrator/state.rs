//! Execution slot states and the events published to subscribers.

use crate::background::ParseStrategy;
use crate::error::QueryError;
use crate::transport::query_form::QueryForm;
use crate::types::{DecodedResult, ExecutionMetrics, ParseProgress};
use serde::Serialize;
use std::sync::Arc;

/// Everything produced by a successful execution
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ExecutionResult {
    /// Decoded projection of the body
    pub result: DecodedResult,
    /// Verbatim response body
    pub raw_body: String,
    /// Response content type
    pub content_type: String,
    /// HTTP status of the response
    pub http_status: u16,
    /// Query form the request was classified as
    pub form: QueryForm,
    /// How the body was decoded
    pub strategy: ParseStrategy,
    /// Phase timings
    pub metrics: ExecutionMetrics,
}

/// Terminal result of one execution
#[derive(Clone, Debug, PartialEq)]
pub enum Settlement {
    /// Decoded result
    Success(Arc<ExecutionResult>),
    /// Classified failure
    Error(QueryError),
}

/// State of an execution slot
///
/// `Idle → Requesting → Decoding → Settled`, back to `Idle` on cancel or reset.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum SlotState {
    /// Nothing running
    #[default]
    Idle,
    /// Waiting for the endpoint
    Requesting,
    /// Decoding the response body
    Decoding,
    /// Finished with a result or an error
    Settled(Settlement),
}

impl SlotState {
    /// Whether an execution is in flight
    pub fn is_active(&self) -> bool {
        matches!(self, SlotState::Requesting | SlotState::Decoding)
    }

    /// State name (`idle`, `requesting`, `decoding`, `settled`)
    pub fn name(&self) -> &'static str {
        match self {
            SlotState::Idle => "idle",
            SlotState::Requesting => "requesting",
            SlotState::Decoding => "decoding",
            SlotState::Settled(_) => "settled",
        }
    }

    /// The successful result, if settled with one
    pub fn result(&self) -> Option<&Arc<ExecutionResult>> {
        match self {
            SlotState::Settled(Settlement::Success(result)) => Some(result),
            _ => None,
        }
    }

    /// The error, if settled with one
    pub fn error(&self) -> Option<&QueryError> {
        match self {
            SlotState::Settled(Settlement::Error(error)) => Some(error),
            _ => None,
        }
    }
}

/// Published by an execution slot
#[derive(Clone, Debug, PartialEq)]
pub enum SlotEvent {
    /// The slot entered a new state
    StateChanged(SlotState),
    /// A background parse finished one slice
    Progress(ParseProgress),
}

impl SlotEvent {
    /// Short human-readable status, or `None` when there is nothing to show
    ///
    /// ```
    /// use sparql_exec::orchestrator::{SlotEvent, SlotState};
    /// use sparql_exec::ParseProgress;
    /// use std::time::Duration;
    ///
    /// let event = SlotEvent::Progress(ParseProgress {
    ///     rows_parsed: 4200,
    ///     total_rows_estimate: 10_000,
    ///     elapsed: Duration::from_millis(80),
    /// });
    /// assert_eq!(event.status_line().as_deref(), Some("Parsing… 4,200/10,000"));
    ///
    /// let event = SlotEvent::StateChanged(SlotState::Requesting);
    /// assert_eq!(event.status_line().as_deref(), Some("Receiving response…"));
    /// ```
    pub fn status_line(&self) -> Option<String> {
        match self {
            SlotEvent::Progress(progress) => Some(format!(
                "Parsing… {}/{}",
                group_thousands(progress.rows_parsed),
                group_thousands(progress.total_rows_estimate)
            )),
            SlotEvent::StateChanged(state) => match state {
                SlotState::Idle => None,
                SlotState::Requesting => Some("Receiving response…".to_string()),
                SlotState::Decoding => Some("Parsing…".to_string()),
                SlotState::Settled(Settlement::Error(error)) => Some(error.to_string()),
                SlotState::Settled(Settlement::Success(result)) => {
                    Some(settled_summary(result))
                }
            },
        }
    }
}

fn settled_summary(result: &ExecutionResult) -> String {
    let elapsed = result.metrics.total.as_millis();
    match &result.result {
        DecodedResult::Table(table) if table.is_truncated() => format!(
            "{} of {} rows in {elapsed} ms",
            group_thousands(table.rows().len()),
            group_thousands(table.total_row_count())
        ),
        DecodedResult::Table(table) => format!(
            "{} rows in {elapsed} ms",
            group_thousands(table.rows().len())
        ),
        DecodedResult::Boolean(boolean) => format!("{} in {elapsed} ms", boolean.value),
        DecodedResult::Raw(raw) => format!(
            "{} bytes of {} in {elapsed} ms",
            group_thousands(raw.body.len()),
            raw.content_type
        ),
    }
}

/// `4200` → `4,200`
fn group_thousands(n: usize) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BooleanResult, RawPassthrough};
    use std::time::Duration;

    fn success(result: DecodedResult) -> SlotState {
        SlotState::Settled(Settlement::Success(Arc::new(ExecutionResult {
            result,
            raw_body: String::new(),
            content_type: "application/sparql-results+json".into(),
            http_status: 200,
            form: QueryForm::Ask,
            strategy: ParseStrategy::InProcess,
            metrics: ExecutionMetrics {
                total: Duration::from_millis(12),
                ..ExecutionMetrics::default()
            },
        })))
    }

    #[test]
    fn thousands_are_grouped() {
        assert_eq!(group_thousands(0), "0");
        assert_eq!(group_thousands(999), "999");
        assert_eq!(group_thousands(1000), "1,000");
        assert_eq!(group_thousands(4200), "4,200");
        assert_eq!(group_thousands(1_234_567), "1,234,567");
    }

    #[test]
    fn only_requesting_and_decoding_are_active() {
        assert!(!SlotState::Idle.is_active());
        assert!(SlotState::Requesting.is_active());
        assert!(SlotState::Decoding.is_active());
        assert!(!SlotState::Settled(Settlement::Error(QueryError::parse("x"))).is_active());
    }

    #[test]
    fn status_lines() {
        assert_eq!(SlotEvent::StateChanged(SlotState::Idle).status_line(), None);
        assert_eq!(
            SlotEvent::StateChanged(SlotState::Decoding).status_line().as_deref(),
            Some("Parsing…")
        );
        let error = SlotEvent::StateChanged(SlotState::Settled(Settlement::Error(
            QueryError::parse("malformed response from endpoint"),
        )));
        assert_eq!(
            error.status_line().as_deref(),
            Some("parse error: malformed response from endpoint")
        );
    }

    #[test]
    fn settled_summaries() {
        let event = SlotEvent::StateChanged(success(DecodedResult::Boolean(BooleanResult {
            value: true,
        })));
        assert_eq!(event.status_line().as_deref(), Some("true in 12 ms"));

        let event = SlotEvent::StateChanged(success(DecodedResult::Raw(RawPassthrough {
            content_type: "text/turtle".into(),
            body: "x".repeat(1500),
        })));
        assert_eq!(
            event.status_line().as_deref(),
            Some("1,500 bytes of text/turtle in 12 ms")
        );
    }

    #[test]
    fn settled_accessors() {
        let state = success(DecodedResult::Boolean(BooleanResult { value: false }));
        assert!(state.result().is_some());
        assert!(state.error().is_none());
        assert_eq!(state.name(), "settled");
    }
}
