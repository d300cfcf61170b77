//! Result documents and mock endpoint helpers

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Media type of SPARQL Query Results JSON
pub const RESULTS_JSON: &str = "application/sparql-results+json";

/// Path the mock endpoint listens on
pub const ENDPOINT_PATH: &str = "/sparql";

/// ASK result `true`
pub const ASK_TRUE: &str = r#"{"head":{},"boolean":true}"#;

/// Error body as sent by Jena-style endpoints
pub const LEXICAL_ERROR: &str = r#"{"error":{"message":"Lexical error at line 1"}}"#;

/// INSERT DATA with a PREFIX prologue
pub const PREFIXED_INSERT: &str = "PREFIX ex: <http://ex.org/>\nINSERT DATA { ex:s ex:p ex:o }";

/// SELECT document with `n` bindings over `?person ?name ?age`
///
/// Every third row leaves `?age` unbound; names carry a language tag.
pub fn people_select(n: usize) -> String {
    let bindings: Vec<_> = (0..n)
        .map(|i| {
            let mut binding = serde_json::json!({
                "person": {"type": "uri", "value": format!("http://example.org/person/{i}")},
                "name": {"type": "literal", "value": format!("Person {i}"), "xml:lang": "en"},
            });
            if i % 3 != 0 {
                binding["age"] = serde_json::json!({
                    "type": "literal",
                    "value": (20 + i % 50).to_string(),
                    "datatype": "http://www.w3.org/2001/XMLSchema#integer"
                });
            }
            binding
        })
        .collect();

    serde_json::json!({
        "head": {"vars": ["person", "name", "age"]},
        "results": {"bindings": bindings}
    })
    .to_string()
}

/// Endpoint URL on `server`
pub fn endpoint(server: &MockServer) -> String {
    format!("{}{ENDPOINT_PATH}", server.uri())
}

/// Answer every GET with a JSON results body
pub async fn mount_results(server: &MockServer, body: impl Into<String>) {
    Mock::given(method("GET"))
        .and(path(ENDPOINT_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body.into(), RESULTS_JSON))
        .mount(server)
        .await;
}

/// Answer every request with `status` and a body of the given media type
pub async fn mount_error(server: &MockServer, status: u16, body: &str, media_type: &str) {
    Mock::given(path(ENDPOINT_PATH))
        .respond_with(ResponseTemplate::new(status).set_body_raw(body.to_string(), media_type))
        .mount(server)
        .await;
}
