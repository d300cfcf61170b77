//! Custom test assertions for execution slots

use sparql_exec::{
    DecodedResult, ExecutionResult, ExecutionSlot, QueryError, QueryErrorKind, SlotEvent,
    SlotState, TabularResult,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Result of waiting for a slot to finish
#[derive(Debug)]
pub enum WaitResult {
    /// Settled with a result
    Success(Arc<ExecutionResult>),
    /// Settled with an error
    Failed(QueryError),
    /// Returned to idle (cancelled)
    Idle,
    /// Timeout waiting for the slot
    Timeout,
}

/// Wait for a slot to leave the requesting/decoding states
///
/// # Arguments
/// * `slot` - The execution slot
/// * `timeout` - Maximum time to wait
pub async fn wait_for_settled(slot: &ExecutionSlot, timeout: Duration) -> WaitResult {
    match tokio::time::timeout(timeout, slot.finished()).await {
        Ok(SlotState::Settled(sparql_exec::Settlement::Success(result))) => {
            WaitResult::Success(result)
        }
        Ok(SlotState::Settled(sparql_exec::Settlement::Error(error))) => WaitResult::Failed(error),
        Ok(_) => WaitResult::Idle,
        Err(_) => WaitResult::Timeout,
    }
}

/// Collect events until one satisfies `stop_predicate` or the timeout expires
pub async fn collect_events_until<F>(
    events: &mut broadcast::Receiver<SlotEvent>,
    timeout: Duration,
    stop_predicate: F,
) -> Vec<SlotEvent>
where
    F: Fn(&SlotEvent) -> bool,
{
    let mut collected = Vec::new();

    let _ = tokio::time::timeout(timeout, async {
        loop {
            match events.recv().await {
                Ok(event) => {
                    let should_stop = stop_predicate(&event);
                    collected.push(event);
                    if should_stop {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
    .await;

    collected
}

/// Whether `event` moves the slot out of the active states
pub fn is_finished(event: &SlotEvent) -> bool {
    matches!(event, SlotEvent::StateChanged(state) if !state.is_active())
}

/// Assert that the slot settles successfully and return the result
pub async fn assert_settled_success(slot: &ExecutionSlot, timeout: Duration) -> Arc<ExecutionResult> {
    match wait_for_settled(slot, timeout).await {
        WaitResult::Success(result) => result,
        WaitResult::Failed(error) => panic!("execution failed: {error:?}"),
        WaitResult::Idle => panic!("execution was cancelled"),
        WaitResult::Timeout => panic!("timeout waiting for execution to settle"),
    }
}

/// Assert that the slot settles with an error of `kind` and return it
pub async fn assert_settled_error(
    slot: &ExecutionSlot,
    timeout: Duration,
    kind: QueryErrorKind,
) -> QueryError {
    match wait_for_settled(slot, timeout).await {
        WaitResult::Failed(error) => {
            assert_eq!(error.kind, kind, "unexpected error: {error:?}");
            error
        }
        WaitResult::Success(result) => panic!("expected {kind} error, got {:?}", result.result),
        WaitResult::Idle => panic!("expected {kind} error, execution was cancelled"),
        WaitResult::Timeout => panic!("timeout waiting for {kind} error"),
    }
}

/// The table inside a result, panicking on other result shapes
pub fn expect_table(result: &ExecutionResult) -> &TabularResult {
    match &result.result {
        DecodedResult::Table(table) => table,
        other => panic!("expected table, got {other:?}"),
    }
}
