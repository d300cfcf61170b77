//! Choice between in-process and background parsing.

use crate::config::ParserThresholds;
use serde::{Deserialize, Serialize};

/// Where and how a response body is decoded
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseStrategy {
    /// Decode on the calling task
    InProcess,
    /// Decode on the worker thread in one pass
    BackgroundSinglePass,
    /// Decode on the worker thread in fixed-size slices with progress reports
    BackgroundChunked,
}

impl ParseStrategy {
    /// Whether the worker thread is involved
    pub fn is_background(&self) -> bool {
        !matches!(self, ParseStrategy::InProcess)
    }
}

/// Estimate the number of result rows from the body size
pub fn estimate_rows(response_size: usize, thresholds: &ParserThresholds) -> usize {
    response_size / thresholds.estimated_bytes_per_row.max(1)
}

/// Pick a strategy from response size and estimated row count
///
/// - small and few rows: in-process
/// - very large or very many rows: background, chunked
/// - anything in between: background, single pass
pub fn select_strategy(
    response_size: usize,
    estimated_rows: usize,
    thresholds: &ParserThresholds,
) -> ParseStrategy {
    if !thresholds.background_enabled {
        return ParseStrategy::InProcess;
    }
    if response_size < thresholds.in_process_max_bytes
        && estimated_rows < thresholds.in_process_max_rows
    {
        ParseStrategy::InProcess
    } else if response_size > thresholds.chunked_min_bytes
        || estimated_rows > thresholds.chunked_min_rows
    {
        ParseStrategy::BackgroundChunked
    } else {
        ParseStrategy::BackgroundSinglePass
    }
}
