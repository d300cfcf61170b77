//! # sparql-exec
//!
//! Query execution and result ingestion for SPARQL endpoints.
//!
//! ## Design Philosophy
//!
//! sparql-exec is designed to be:
//! - **Protocol-correct** - GET/POST and `Accept` negotiation follow the SPARQL 1.1 Protocol
//! - **Memory-bounded** - Result rows are capped while parsing, not after
//! - **Responsive** - Large bodies are parsed on a worker thread in cancellable slices
//! - **Library-first** - No UI; consumers subscribe to state and progress events
//!
//! ## Quick Start
//!
//! ```no_run
//! use sparql_exec::{BackgroundParser, Config, ExecutionSlot, QueryRequest, SlotState};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let parser = Arc::new(BackgroundParser::new(&config.decode));
//!     let slot = ExecutionSlot::new(config, parser.clone())?;
//!
//!     // Subscribe to state changes and parse progress
//!     let mut events = slot.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             if let Some(status) = event.status_line() {
//!                 println!("{status}");
//!             }
//!         }
//!     });
//!
//!     slot.start(QueryRequest::new(
//!         "https://dbpedia.org/sparql",
//!         "SELECT ?s WHERE { ?s a <http://dbpedia.org/ontology/City> } LIMIT 5",
//!     ))
//!     .await;
//!
//!     match slot.finished().await {
//!         SlotState::Settled(settlement) => println!("{settlement:?}"),
//!         other => println!("{}", other.name()),
//!     }
//!
//!     parser.shutdown();
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Background parsing on a worker thread
pub mod background;
/// Configuration types
pub mod config;
/// SPARQL Query Results JSON decoding
pub mod decoder;
/// Error types
pub mod error;
/// Execution slot state machine
pub mod orchestrator;
/// HTTP execution of queries and updates
pub mod transport;
/// Core request and result types
pub mod types;

// Re-export commonly used types
pub use background::{BackgroundParser, ParseJob, ParseStrategy, ResultParser};
pub use config::{Config, DecodeConfig, ParserThresholds, TransportConfig};
pub use decoder::{DecodeOptions, decode};
pub use error::{Error, QueryError, QueryErrorKind, Result};
pub use orchestrator::{ExecutionResult, ExecutionSlot, Settlement, SlotEvent, SlotState};
pub use transport::query_form::QueryForm;
pub use transport::{HttpResponse, TransportExecutor};
pub use types::{
    BindingValue, BooleanResult, DecodedResult, ExecutionMetrics, Outcome, ParseProgress,
    QueryRequest, RawPassthrough, ResultFormat, Row, TabularResult,
};
