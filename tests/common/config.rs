//! Test configuration helpers for loading live endpoints and creating test slots

use sparql_exec::{BackgroundParser, Config, ExecutionSlot, ParserThresholds};
use std::sync::Arc;

/// Error type for test configuration
#[derive(Debug)]
pub struct ConfigError(pub String);

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Config error: {}", self.0)
    }
}

impl std::error::Error for ConfigError {}

/// Load the live endpoint URL from the environment
///
/// Required environment variables:
/// - `SPARQL_ENDPOINT` - Endpoint URL (e.g. https://query.wikidata.org/sparql)
///
/// Optional environment variables:
/// - `SPARQL_TIMEOUT_MS` - Request timeout (default: 30000)
pub fn load_live_endpoint() -> Result<(String, u64), ConfigError> {
    dotenvy::dotenv().ok();

    let endpoint = std::env::var("SPARQL_ENDPOINT")
        .map_err(|_| ConfigError("SPARQL_ENDPOINT not set in environment".to_string()))?;

    let timeout_ms = std::env::var("SPARQL_TIMEOUT_MS")
        .ok()
        .and_then(|t| t.parse().ok())
        .unwrap_or(30_000);

    Ok((endpoint, timeout_ms))
}

/// Whether a live endpoint is configured
pub fn has_live_endpoint() -> bool {
    load_live_endpoint().is_ok()
}

/// Config that sends every JSON body to the worker in slices of `chunk_size`
pub fn chunked_config(chunk_size: usize) -> Config {
    let mut config = Config::default();
    config.decode.chunk_size = chunk_size;
    config.parser = ParserThresholds {
        in_process_max_bytes: 0,
        in_process_max_rows: 0,
        chunked_min_bytes: 0,
        chunked_min_rows: 0,
        ..ParserThresholds::default()
    };
    config
}

/// Create a slot with its own background parser
pub fn create_slot(config: Config) -> (ExecutionSlot, Arc<BackgroundParser>) {
    let parser = Arc::new(BackgroundParser::new(&config.decode));
    let slot = ExecutionSlot::new(config, parser.clone()).expect("valid test config");
    (slot, parser)
}
