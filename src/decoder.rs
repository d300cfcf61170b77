//! Bounded decoding of SPARQL Query Results JSON
//!
//! The bindings array is deserialized through a [`DeserializeSeed`] that keeps
//! only the first `max_rows` entries and skips the rest with [`IgnoredAny`],
//! so memory stays proportional to the cap rather than to the response.
//!
//! Row construction is incremental ([`SelectDocument::decode_next`]). The
//! in-process path decodes everything in one call, the background worker
//! calls it once per slice; both produce identical rows.

use crate::error::QueryError;
use crate::types::{
    BindingValue, BooleanResult, DecodedResult, RawPassthrough, ResultFormat, Row, TabularResult,
};
use serde::de::{DeserializeSeed, Deserializer, IgnoredAny, MapAccess, SeqAccess, Visitor};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;

/// Upper bound for pre-allocating the bindings vector from a size hint
const MAX_PREALLOCATED_BINDINGS: usize = 4096;

/// Options for [`decode`]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DecodeOptions {
    /// Row cap for SELECT results (None = unbounded)
    pub max_rows: Option<usize>,
}

/// Decode a response body according to its content type
///
/// JSON results become a [`TabularResult`] or [`BooleanResult`]; every other
/// format is returned as [`RawPassthrough`] without a row cap.
///
/// # Errors
///
/// Returns a `parse` [`QueryError`] if a JSON body is malformed or lacks the
/// required structure.
pub fn decode(
    body: &str,
    content_type: &str,
    options: &DecodeOptions,
) -> Result<DecodedResult, QueryError> {
    let format = ResultFormat::from_media_type(content_type);
    if !format.is_some_and(|f| f.is_decodable()) {
        tracing::debug!(content_type, bytes = body.len(), "passing response through undecoded");
        return Ok(DecodedResult::Raw(RawPassthrough {
            content_type: content_type.to_string(),
            body: body.to_string(),
        }));
    }

    decode_results_json(body, options.max_rows)
}

/// Decode a SPARQL Query Results JSON body in one pass
///
/// # Errors
///
/// Same as [`parse_document`], plus unsupported term types.
pub fn decode_results_json(body: &str, max_rows: Option<usize>) -> Result<DecodedResult, QueryError> {
    match parse_document(body, max_rows)? {
        ResultsDocument::Boolean(value) => Ok(DecodedResult::Boolean(BooleanResult { value })),
        ResultsDocument::Select(document) => Ok(DecodedResult::Table(document.finish()?)),
    }
}

/// Structurally validated results document
#[derive(Debug)]
pub enum ResultsDocument {
    /// SELECT results awaiting row construction
    Select(SelectDocument),
    /// ASK result
    Boolean(bool),
}

/// SELECT results with the capped bindings held in raw form
#[derive(Debug)]
pub struct SelectDocument {
    columns: Vec<String>,
    pending: std::vec::IntoIter<RawBinding>,
    rows: Vec<Row>,
    kept: usize,
    total_row_count: usize,
    row_limit: Option<usize>,
}

impl SelectDocument {
    /// Column names from `head.vars`
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Number of bindings in the response, including those beyond the cap
    pub fn total_row_count(&self) -> usize {
        self.total_row_count
    }

    /// Number of rows that will be produced
    pub fn rows_to_decode(&self) -> usize {
        self.kept
    }

    /// Number of rows produced so far
    pub fn rows_decoded(&self) -> usize {
        self.rows.len()
    }

    /// Whether every kept binding has been converted
    pub fn is_complete(&self) -> bool {
        self.rows.len() == self.kept
    }

    /// Convert up to `max` further bindings into rows
    ///
    /// Returns the number of rows produced by this call.
    ///
    /// # Errors
    ///
    /// Returns a `parse` error for a term with an unsupported type.
    pub fn decode_next(&mut self, max: usize) -> Result<usize, QueryError> {
        let before = self.rows.len();
        for binding in self.pending.by_ref().take(max) {
            let row = build_row(&self.columns, binding)?;
            self.rows.push(row);
        }
        Ok(self.rows.len() - before)
    }

    /// Decode whatever is still pending and assemble the final result
    ///
    /// # Errors
    ///
    /// Returns a `parse` error for a term with an unsupported type among the
    /// rows not yet decoded.
    pub fn finish(mut self) -> Result<TabularResult, QueryError> {
        self.decode_next(usize::MAX)?;
        Ok(TabularResult::new(
            self.columns,
            self.rows,
            self.total_row_count,
            self.row_limit,
        ))
    }
}

/// Parse and validate a SPARQL Query Results JSON document
///
/// # Errors
///
/// Returns a `parse` error when the body is not JSON, when `head` is missing,
/// when neither `results.bindings` nor `boolean` is present, or when a SELECT
/// document lacks `head.vars`.
pub fn parse_document(body: &str, max_rows: Option<usize>) -> Result<ResultsDocument, QueryError> {
    let mut deserializer = serde_json::Deserializer::from_str(body);
    let raw = DocumentSeed {
        cap: max_rows.unwrap_or(usize::MAX),
    }
    .deserialize(&mut deserializer)
    .and_then(|raw| deserializer.end().map(|()| raw))
    .map_err(|e| {
        QueryError::parse("malformed response from endpoint: body is not valid SPARQL JSON")
            .with_detail(e.to_string())
    })?;

    let Some(head) = raw.head else {
        return Err(structural_error("missing 'head' object"));
    };

    if let Some(bindings) = raw.bindings {
        let Some(vars) = head.vars else {
            return Err(structural_error("SELECT results without 'head.vars'"));
        };
        let columns = unique_columns(vars);
        let kept = bindings.kept.len();
        tracing::debug!(
            columns = columns.len(),
            kept,
            total = bindings.total,
            "parsed SELECT results"
        );
        return Ok(ResultsDocument::Select(SelectDocument {
            columns,
            pending: bindings.kept.into_iter(),
            rows: Vec::with_capacity(kept),
            kept,
            total_row_count: bindings.total,
            row_limit: max_rows,
        }));
    }

    match raw.boolean {
        Some(value) => Ok(ResultsDocument::Boolean(value)),
        None => Err(structural_error(
            "expected 'results.bindings' or 'boolean'",
        )),
    }
}

fn structural_error(detail: &str) -> QueryError {
    QueryError::parse("malformed response from endpoint: unexpected results structure")
        .with_detail(detail)
}

/// Drop repeated variable names, keeping the first occurrence
fn unique_columns(vars: Vec<String>) -> Vec<String> {
    let mut columns: Vec<String> = Vec::with_capacity(vars.len());
    for var in vars {
        if !columns.contains(&var) {
            columns.push(var);
        }
    }
    columns
}

fn build_row(columns: &[String], mut binding: RawBinding) -> Result<Row, QueryError> {
    let mut row = Row::with_capacity(columns.len());
    for column in columns {
        let value = match binding.remove(column) {
            Some(term) => term.into_value(column)?,
            None => BindingValue::Unbound,
        };
        row.insert(column.clone(), value);
    }
    Ok(row)
}

type RawBinding = HashMap<String, RawTerm>;

#[derive(Debug, Deserialize)]
struct RawTerm {
    #[serde(rename = "type")]
    term_type: String,
    value: String,
    #[serde(default)]
    datatype: Option<String>,
    #[serde(default, rename = "xml:lang")]
    language: Option<String>,
}

impl RawTerm {
    fn into_value(self, column: &str) -> Result<BindingValue, QueryError> {
        match self.term_type.as_str() {
            "uri" => Ok(BindingValue::Uri { value: self.value }),
            // "typed-literal" is the pre-recommendation spelling some endpoints still emit
            "literal" | "typed-literal" => Ok(BindingValue::Literal {
                value: self.value,
                datatype: self.datatype,
                language: self.language,
            }),
            "bnode" => Ok(BindingValue::BlankNode { value: self.value }),
            other => Err(structural_error(&format!(
                "unsupported term type '{other}' for variable ?{column}"
            ))),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawHead {
    #[serde(default)]
    vars: Option<Vec<String>>,
}

#[derive(Debug, Default)]
struct RawDocument {
    head: Option<RawHead>,
    bindings: Option<CappedBindings>,
    boolean: Option<bool>,
}

#[derive(Debug, Default)]
struct CappedBindings {
    kept: Vec<RawBinding>,
    total: usize,
}

struct DocumentSeed {
    cap: usize,
}

impl<'de> DeserializeSeed<'de> for DocumentSeed {
    type Value = RawDocument;

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_map(self)
    }
}

impl<'de> Visitor<'de> for DocumentSeed {
    type Value = RawDocument;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a SPARQL results object")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let mut document = RawDocument::default();
        while let Some(key) = map.next_key::<String>()? {
            match key.as_str() {
                "head" => document.head = Some(map.next_value()?),
                "results" => {
                    document.bindings = map.next_value_seed(ResultsSeed { cap: self.cap })?;
                }
                "boolean" => document.boolean = Some(map.next_value()?),
                _ => {
                    map.next_value::<IgnoredAny>()?;
                }
            }
        }
        Ok(document)
    }
}

struct ResultsSeed {
    cap: usize,
}

impl<'de> DeserializeSeed<'de> for ResultsSeed {
    type Value = Option<CappedBindings>;

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_map(self)
    }
}

impl<'de> Visitor<'de> for ResultsSeed {
    type Value = Option<CappedBindings>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a 'results' object")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let mut bindings = None;
        while let Some(key) = map.next_key::<String>()? {
            if key == "bindings" {
                bindings = Some(map.next_value_seed(BindingsSeed { cap: self.cap })?);
            } else {
                map.next_value::<IgnoredAny>()?;
            }
        }
        Ok(bindings)
    }
}

struct BindingsSeed {
    cap: usize,
}

impl<'de> DeserializeSeed<'de> for BindingsSeed {
    type Value = CappedBindings;

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_seq(self)
    }
}

impl<'de> Visitor<'de> for BindingsSeed {
    type Value = CappedBindings;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a 'bindings' array")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
        let hint = seq.size_hint().unwrap_or(0);
        let mut capped = CappedBindings {
            kept: Vec::with_capacity(hint.min(self.cap).min(MAX_PREALLOCATED_BINDINGS)),
            total: 0,
        };

        while capped.kept.len() < self.cap {
            match seq.next_element::<RawBinding>()? {
                Some(binding) => {
                    capped.kept.push(binding);
                    capped.total += 1;
                }
                None => return Ok(capped),
            }
        }
        // Past the cap: count, but never materialise
        while seq.next_element::<IgnoredAny>()?.is_some() {
            capped.total += 1;
        }
        Ok(capped)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::QueryErrorKind;

    const JSON: &str = "application/sparql-results+json";

    /// SELECT document with `n` bindings over `?s ?o`
    pub(crate) fn select_body(n: usize) -> String {
        let bindings: Vec<_> = (0..n)
            .map(|i| {
                serde_json::json!({
                    "s": {"type": "uri", "value": format!("http://example.org/s{i}")},
                    "o": {"type": "literal", "value": i.to_string(),
                          "datatype": "http://www.w3.org/2001/XMLSchema#integer"}
                })
            })
            .collect();
        serde_json::json!({
            "head": {"vars": ["s", "o"]},
            "results": {"bindings": bindings}
        })
        .to_string()
    }

    fn decode_table(body: &str, max_rows: Option<usize>) -> TabularResult {
        match decode(body, JSON, &DecodeOptions { max_rows }).unwrap() {
            DecodedResult::Table(table) => table,
            other => panic!("expected table, got {other:?}"),
        }
    }

    #[test]
    fn thousand_bindings_capped_at_hundred() {
        let table = decode_table(&select_body(1000), Some(100));

        assert_eq!(table.rows().len(), 100);
        assert!(table.is_truncated());
        assert_eq!(table.total_row_count(), 1000);
        assert_eq!(table.row_limit(), Some(100));
        assert_eq!(
            table.rows()[99]["s"].value(),
            Some("http://example.org/s99"),
            "the first max_rows bindings must be kept in order"
        );
    }

    #[test]
    fn truncation_arithmetic_holds_across_sizes() {
        for (n, cap) in [(0, 10), (5, 10), (10, 10), (11, 10), (50, 1), (3, 0)] {
            let table = decode_table(&select_body(n), Some(cap));
            assert_eq!(table.rows().len(), n.min(cap), "n={n} cap={cap}");
            assert_eq!(table.is_truncated(), n > cap, "n={n} cap={cap}");
            assert_eq!(table.total_row_count(), n, "n={n} cap={cap}");
        }
    }

    #[test]
    fn no_cap_keeps_everything() {
        let table = decode_table(&select_body(250), None);
        assert_eq!(table.rows().len(), 250);
        assert!(!table.is_truncated());
    }

    #[test]
    fn decoding_twice_is_identical() {
        let body = select_body(40);
        assert_eq!(decode_table(&body, Some(30)), decode_table(&body, Some(30)));
    }

    #[test]
    fn ask_result_ignores_row_cap() {
        let result = decode(
            r#"{"head":{},"boolean":true}"#,
            JSON,
            &DecodeOptions { max_rows: Some(0) },
        )
        .unwrap();
        assert_eq!(result, DecodedResult::Boolean(BooleanResult { value: true }));
    }

    #[test]
    fn missing_variable_is_unbound_not_empty() {
        let body = r#"{
            "head": {"vars": ["a", "b", "c"]},
            "results": {"bindings": [
                {"a": {"type": "literal", "value": ""}, "z": {"type": "uri", "value": "http://x"}}
            ]}
        }"#;
        let table = decode_table(body, None);
        let row = &table.rows()[0];

        assert_eq!(row.len(), 3, "row is built from head.vars only");
        assert_eq!(row["a"].value(), Some(""));
        assert!(row["b"].is_unbound());
        assert!(row["c"].is_unbound());
        assert!(!row.contains_key("z"));
        let keys: Vec<_> = row.keys().cloned().collect();
        assert_eq!(keys, ["a", "b", "c"]);
    }

    #[test]
    fn literal_datatype_and_language_kept_verbatim() {
        let body = r#"{
            "head": {"vars": ["x", "y", "z"]},
            "results": {"bindings": [{
                "x": {"type": "literal", "value": "01", "datatype": "http://www.w3.org/2001/XMLSchema#INTEGER"},
                "y": {"type": "literal", "value": "Chat", "xml:lang": "fr-CA"},
                "z": {"type": "typed-literal", "value": "1", "datatype": "urn:dt"}
            }]}
        }"#;
        let row = decode_table(body, None).rows()[0].clone();

        assert_eq!(
            row["x"],
            BindingValue::Literal {
                value: "01".into(),
                datatype: Some("http://www.w3.org/2001/XMLSchema#INTEGER".into()),
                language: None,
            }
        );
        assert_eq!(
            row["y"],
            BindingValue::Literal {
                value: "Chat".into(),
                datatype: None,
                language: Some("fr-CA".into()),
            }
        );
        assert_eq!(
            row["z"],
            BindingValue::Literal {
                value: "1".into(),
                datatype: Some("urn:dt".into()),
                language: None,
            }
        );
    }

    #[test]
    fn blank_nodes_and_uris_decode() {
        let body = r#"{"head":{"vars":["b","u"]},"results":{"bindings":[
            {"b":{"type":"bnode","value":"r1"},"u":{"type":"uri","value":"http://example.org/"}}]}}"#;
        let row = decode_table(body, None).rows()[0].clone();
        assert_eq!(row["b"], BindingValue::BlankNode { value: "r1".into() });
        assert_eq!(
            row["u"],
            BindingValue::Uri {
                value: "http://example.org/".into()
            }
        );
    }

    #[test]
    fn zero_bindings_and_zero_vars_are_valid() {
        let table = decode_table(r#"{"head":{"vars":["x"]},"results":{"bindings":[]}}"#, None);
        assert_eq!(table.columns(), ["x"]);
        assert!(table.rows().is_empty());
        assert!(!table.is_truncated());

        let table = decode_table(
            r#"{"head":{"vars":[]},"results":{"bindings":[{},{}]}}"#,
            Some(1),
        );
        assert!(table.columns().is_empty());
        assert_eq!(table.rows().len(), 1);
        assert!(table.rows()[0].is_empty());
        assert_eq!(table.total_row_count(), 2);
    }

    #[test]
    fn duplicate_vars_are_collapsed() {
        let table = decode_table(
            r#"{"head":{"vars":["a","b","a"]},"results":{"bindings":[]}}"#,
            None,
        );
        assert_eq!(table.columns(), ["a", "b"]);
    }

    #[test]
    fn malformed_json_is_parse_error() {
        let error = decode("not json{", JSON, &DecodeOptions::default()).unwrap_err();
        assert_eq!(error.kind, QueryErrorKind::Parse);
        assert!(error.detail.is_some(), "parser message must be kept as detail");
    }

    #[test]
    fn trailing_garbage_is_parse_error() {
        let error = decode(
            r#"{"head":{},"boolean":true} trailing"#,
            JSON,
            &DecodeOptions::default(),
        )
        .unwrap_err();
        assert_eq!(error.kind, QueryErrorKind::Parse);
    }

    #[test]
    fn missing_bindings_and_boolean_is_parse_error() {
        let error = decode(r#"{"head":{"vars":["x"]}}"#, JSON, &DecodeOptions::default())
            .unwrap_err();
        assert_eq!(error.kind, QueryErrorKind::Parse);
        assert_eq!(
            error.detail.as_deref(),
            Some("expected 'results.bindings' or 'boolean'")
        );
    }

    #[test]
    fn missing_head_is_parse_error() {
        let error = decode(r#"{"boolean":false}"#, JSON, &DecodeOptions::default()).unwrap_err();
        assert_eq!(error.kind, QueryErrorKind::Parse);
    }

    #[test]
    fn select_without_vars_is_parse_error() {
        let error = decode(
            r#"{"head":{},"results":{"bindings":[]}}"#,
            JSON,
            &DecodeOptions::default(),
        )
        .unwrap_err();
        assert_eq!(error.kind, QueryErrorKind::Parse);
    }

    #[test]
    fn bindings_must_be_an_array() {
        let error = decode(
            r#"{"head":{"vars":[]},"results":{"bindings":{}}}"#,
            JSON,
            &DecodeOptions::default(),
        )
        .unwrap_err();
        assert_eq!(error.kind, QueryErrorKind::Parse);
    }

    #[test]
    fn unknown_term_type_is_parse_error() {
        let body = r#"{"head":{"vars":["x"]},"results":{"bindings":[{"x":{"type":"weird","value":"v"}}]}}"#;
        let error = decode(body, JSON, &DecodeOptions::default()).unwrap_err();
        assert_eq!(error.kind, QueryErrorKind::Parse);
        assert!(error.detail.unwrap().contains("?x"));
    }

    #[test]
    fn malformed_binding_beyond_cap_is_still_rejected_syntactically() {
        // Skipped bindings are not materialised but the JSON must still be well-formed
        let body = r#"{"head":{"vars":["x"]},"results":{"bindings":[{}, {"x": ]}}"#;
        let error = decode(body, JSON, &DecodeOptions { max_rows: Some(1) }).unwrap_err();
        assert_eq!(error.kind, QueryErrorKind::Parse);
    }

    #[test]
    fn csv_is_passed_through_without_cap() {
        let body = "x\r\n1\r\n2\r\n3\r\n";
        let result = decode(body, "text/csv; charset=utf-8", &DecodeOptions { max_rows: Some(1) })
            .unwrap();
        assert_eq!(
            result,
            DecodedResult::Raw(RawPassthrough {
                content_type: "text/csv; charset=utf-8".into(),
                body: body.into(),
            })
        );
    }

    #[test]
    fn unknown_content_type_is_passed_through() {
        let result = decode("<html/>", "text/html", &DecodeOptions::default()).unwrap();
        assert!(matches!(result, DecodedResult::Raw(_)));
    }

    #[test]
    fn incremental_decoding_matches_single_pass() {
        let body = select_body(57);
        let ResultsDocument::Select(mut document) = parse_document(&body, Some(50)).unwrap()
        else {
            panic!("expected SELECT document");
        };

        assert_eq!(document.rows_to_decode(), 50);
        let mut slices = 0;
        while !document.is_complete() {
            let produced = document.decode_next(7).unwrap();
            assert!(produced <= 7);
            slices += 1;
        }
        assert_eq!(slices, 8);
        assert_eq!(document.rows_decoded(), 50);
        assert_eq!(document.finish().unwrap(), decode_table(&body, Some(50)));
    }

    #[test]
    fn finishing_early_decodes_the_remaining_rows() {
        let body = select_body(10);
        let ResultsDocument::Select(mut document) = parse_document(&body, None).unwrap() else {
            panic!("expected SELECT document");
        };

        assert_eq!(document.decode_next(3).unwrap(), 3);
        assert!(!document.is_complete());

        let table = document.finish().unwrap();
        assert_eq!(table.rows().len(), 10);
        assert_eq!(table.total_row_count(), 10);
        assert_eq!(table, decode_table(&body, None));
    }

    #[test]
    fn finishing_early_reports_bad_pending_terms() {
        let body = r#"{"head":{"vars":["x"]},"results":{"bindings":[
            {"x":{"type":"uri","value":"http://example.org/a"}},
            {"x":{"type":"triple","value":"?"}}
        ]}}"#;
        let ResultsDocument::Select(mut document) = parse_document(body, None).unwrap() else {
            panic!("expected SELECT document");
        };

        document.decode_next(1).unwrap();
        let error = document.finish().unwrap_err();
        assert_eq!(error.kind, QueryErrorKind::Parse);
    }
}
