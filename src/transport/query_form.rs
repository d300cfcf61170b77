//! Query-form classification and HTTP method selection.
//!
//! This is a keyword heuristic, not a SPARQL parser: it skips the prologue
//! (`PREFIX`/`BASE` declarations and comments) and looks at the first operative
//! keyword.

use crate::types::ResultFormat;
use serde::{Deserialize, Serialize};
use url::Url;

/// `Content-Type` of a directly POSTed query
pub const SPARQL_QUERY_CONTENT_TYPE: &str = "application/sparql-query";
/// `Content-Type` of a directly POSTed update
pub const SPARQL_UPDATE_CONTENT_TYPE: &str = "application/sparql-update";

/// Keywords that begin a SPARQL Update operation
const UPDATE_KEYWORDS: [&str; 10] = [
    "INSERT", "DELETE", "LOAD", "CLEAR", "CREATE", "DROP", "COPY", "MOVE", "ADD", "WITH",
];

/// Query form determined from the first operative keyword
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryForm {
    /// SELECT
    Select,
    /// ASK
    Ask,
    /// CONSTRUCT
    Construct,
    /// DESCRIBE
    Describe,
    /// Any SPARQL Update operation
    Update,
    /// Keyword not recognised; handled as a read
    Unknown,
}

impl QueryForm {
    /// Whether the query modifies the store
    pub fn is_update(&self) -> bool {
        matches!(self, QueryForm::Update)
    }

    /// Whether the query returns graph data rather than solutions
    pub fn is_graph(&self) -> bool {
        matches!(self, QueryForm::Construct | QueryForm::Describe)
    }
}

/// Classify a query by its first keyword after the prologue
pub fn classify(query: &str) -> QueryForm {
    let mut cursor = Cursor::new(query);
    loop {
        cursor.skip_trivia();
        let Some(word) = cursor.word() else {
            return QueryForm::Unknown;
        };
        match word.to_ascii_uppercase().as_str() {
            "PREFIX" => {
                if !cursor.skip_prefix_decl() {
                    return scan_for_form(cursor.rest());
                }
            }
            "BASE" => {
                if !cursor.skip_iri() {
                    return scan_for_form(cursor.rest());
                }
            }
            other => return form_for_keyword(other),
        }
    }
}

fn form_for_keyword(keyword: &str) -> QueryForm {
    match keyword {
        "SELECT" => QueryForm::Select,
        "ASK" => QueryForm::Ask,
        "CONSTRUCT" => QueryForm::Construct,
        "DESCRIBE" => QueryForm::Describe,
        k if UPDATE_KEYWORDS.contains(&k) => QueryForm::Update,
        _ => QueryForm::Unknown,
    }
}

/// Fallback for a prologue we could not skip: first recognised keyword
/// outside IRIs, string literals, comments, and prefixed names
fn scan_for_form(text: &str) -> QueryForm {
    let mut cursor = Cursor::new(text);
    loop {
        cursor.skip_trivia();
        let Some(c) = cursor.peek() else {
            return QueryForm::Unknown;
        };
        match c {
            '<' => {
                if !cursor.skip_iri() {
                    cursor.bump(c);
                }
            }
            '"' | '\'' => cursor.skip_string(c),
            c if is_name_char(c) => {
                let token = cursor.name_token();
                if token.chars().all(|c| c.is_ascii_alphabetic()) {
                    let form = form_for_keyword(&token.to_ascii_uppercase());
                    if form != QueryForm::Unknown {
                        return form;
                    }
                }
            }
            c => cursor.bump(c),
        }
    }
}

/// Characters of keywords, variables, and prefixed names
fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | ':' | '?' | '$')
}

struct Cursor<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(text: &'a str) -> Self {
        Self { text, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.text[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self, c: char) {
        self.pos += c.len_utf8();
    }

    /// Skip whitespace, a byte order mark, and `#` line comments
    fn skip_trivia(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() || c == '\u{feff}' {
                self.bump(c);
            } else if c == '#' {
                match self.rest().find('\n') {
                    Some(offset) => self.pos += offset + 1,
                    None => self.pos = self.text.len(),
                }
            } else {
                break;
            }
        }
    }

    fn word(&mut self) -> Option<&'a str> {
        let start = self.pos;
        while let Some(c) = self.peek().filter(|c| c.is_ascii_alphabetic()) {
            self.bump(c);
        }
        (self.pos > start).then(|| &self.text[start..self.pos])
    }

    /// `PNAME_NS IRIREF`, e.g. `ex: <http://example.org/>`
    fn skip_prefix_decl(&mut self) -> bool {
        self.skip_trivia();
        while let Some(c) = self.peek() {
            if c == ':' {
                self.bump(c);
                return self.skip_iri();
            }
            if c.is_whitespace() || c == '<' {
                return false;
            }
            self.bump(c);
        }
        false
    }

    fn name_token(&mut self) -> &'a str {
        let start = self.pos;
        while let Some(c) = self.peek().filter(|c| is_name_char(*c)) {
            self.bump(c);
        }
        &self.text[start..self.pos]
    }

    /// Skip a string literal opened by `quote`, honouring backslash escapes
    fn skip_string(&mut self, quote: char) {
        self.bump(quote);
        let mut escaped = false;
        while let Some(c) = self.peek() {
            self.bump(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == quote {
                return;
            }
        }
    }

    fn skip_iri(&mut self) -> bool {
        self.skip_trivia();
        if self.peek() != Some('<') {
            return false;
        }
        match self.rest().find('>') {
            Some(offset) => {
                self.pos += offset + 1;
                true
            }
            None => false,
        }
    }
}

/// How one query is sent over HTTP
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestPlan {
    /// Classified query form
    pub form: QueryForm,
    /// HTTP method
    pub method: reqwest::Method,
    /// Request URL (carries the `query` parameter for GET)
    pub url: Url,
    /// `Content-Type` for POST bodies
    pub content_type: Option<&'static str>,
    /// POST body
    pub body: Option<String>,
    /// `Accept` header value
    pub accept: &'static str,
}

/// Decide method, URL, and headers for `query`
///
/// Updates are always POSTed as `application/sparql-update`. Reads use GET
/// while the serialized URL is shorter than `max_get_url_length`, otherwise
/// they are POSTed as `application/sparql-query`.
pub fn plan_request(
    endpoint: &Url,
    query: &str,
    format: ResultFormat,
    max_get_url_length: usize,
) -> RequestPlan {
    let form = classify(query);
    // Solution formats cannot carry a graph; fall back to Turtle for CONSTRUCT/DESCRIBE
    let accept = if form.is_graph() && !format.is_graph_format() {
        ResultFormat::Turtle.mime_type()
    } else {
        format.mime_type()
    };

    if form.is_update() {
        return RequestPlan {
            form,
            method: reqwest::Method::POST,
            url: endpoint.clone(),
            content_type: Some(SPARQL_UPDATE_CONTENT_TYPE),
            body: Some(query.to_string()),
            accept,
        };
    }

    let mut get_url = endpoint.clone();
    get_url.query_pairs_mut().append_pair("query", query);

    if get_url.as_str().len() < max_get_url_length {
        RequestPlan {
            form,
            method: reqwest::Method::GET,
            url: get_url,
            content_type: None,
            body: None,
            accept,
        }
    } else {
        RequestPlan {
            form,
            method: reqwest::Method::POST,
            url: endpoint.clone(),
            content_type: Some(SPARQL_QUERY_CONTENT_TYPE),
            body: Some(query.to_string()),
            accept,
        }
    }
}
