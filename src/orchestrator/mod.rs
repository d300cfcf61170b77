//! Execution slot: one query at a time, from request to settled result.
//!
//! - [`state`] - Slot states, settled results and published events
//!
//! An [`ExecutionSlot`] drives a request through the transport, picks a parse
//! strategy for the body, and publishes every state change and progress report
//! on a broadcast channel. Starting a new request supersedes the running one:
//! the previous execution is cancelled and has fully wound down before the new
//! one begins. State writes from a superseded execution are discarded.

pub mod state;


pub use state::{ExecutionResult, Settlement, SlotEvent, SlotState};

use crate::background::{
    ParseJob, ParseStrategy, ProgressCallback, ResultParser, estimate_rows, select_strategy,
};
use crate::config::Config;
use crate::decoder::{DecodeOptions, decode};
use crate::error::{QueryError, Result};
use crate::transport::{HttpResponse, TransportExecutor};
use crate::types::{
    DecodedResult, ExecutionMetrics, Outcome, ParseProgress, QueryRequest, RawPassthrough,
    ResultFormat,
};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Capacity of the event channel; slow subscribers see `Lagged`
const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// Runs one query at a time and publishes its progress
///
/// Typically one slot per editor tab. The result parser is shared between
/// slots and injected, so tests can substitute a fake.
///
/// # Examples
///
/// ```no_run
/// use sparql_exec::{BackgroundParser, Config, ExecutionSlot, QueryRequest};
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = Config::default();
///     let parser = Arc::new(BackgroundParser::new(&config.decode));
///     let slot = ExecutionSlot::new(config, parser.clone())?;
///
///     let mut events = slot.subscribe();
///     tokio::spawn(async move {
///         while let Ok(event) = events.recv().await {
///             if let Some(line) = event.status_line() {
///                 println!("{line}");
///             }
///         }
///     });
///
///     slot.start(QueryRequest::new(
///         "https://query.wikidata.org/sparql",
///         "SELECT * WHERE { ?s ?p ?o } LIMIT 10",
///     ))
///     .await;
///     let state = slot.finished().await;
///     println!("{}", state.name());
///
///     parser.shutdown();
///     Ok(())
/// }
/// ```
pub struct ExecutionSlot {
    config: Arc<Config>,
    transport: TransportExecutor,
    parser: Arc<dyn ResultParser>,
    shared: Arc<SlotShared>,
    /// Serialises start/cancel/reset and owns the running execution
    active: tokio::sync::Mutex<Option<ActiveRun>>,
}

impl std::fmt::Debug for ExecutionSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionSlot")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

struct ActiveRun {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl ExecutionSlot {
    /// Create a slot with its own HTTP client
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Config`] if `config` is invalid, or
    /// [`crate::Error::Client`] if the HTTP client cannot be built.
    pub fn new(config: Config, parser: Arc<dyn ResultParser>) -> Result<Self> {
        config.validate()?;
        let transport = TransportExecutor::new(&config.transport)?;
        Self::with_transport(config, transport, parser)
    }

    /// Create a slot around an existing transport (e.g. to share a client)
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Config`] if `config` is invalid.
    pub fn with_transport(
        config: Config,
        transport: TransportExecutor,
        parser: Arc<dyn ResultParser>,
    ) -> Result<Self> {
        config.validate()?;
        let (events, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (state, _rx) = watch::channel(SlotState::Idle);
        Ok(Self {
            config: Arc::new(config),
            transport,
            parser,
            shared: Arc::new(SlotShared {
                generation: Mutex::new(0),
                state,
                events,
            }),
            active: tokio::sync::Mutex::new(None),
        })
    }

    /// Subscribe to state changes and progress reports
    pub fn subscribe(&self) -> broadcast::Receiver<SlotEvent> {
        self.shared.events.subscribe()
    }

    /// Snapshot of the current state
    pub fn state(&self) -> SlotState {
        self.shared.state.borrow().clone()
    }

    /// Wait until nothing is in flight and return the state (`Idle` or `Settled`)
    pub async fn finished(&self) -> SlotState {
        let mut rx = self.shared.state.subscribe();
        let settled = match rx.wait_for(|state| !state.is_active()).await {
            Ok(state) => state.clone(),
            Err(_) => self.state(),
        };
        settled
    }

    /// Start executing `request`, superseding any running execution
    ///
    /// Returns once the request is in flight; the outcome is published on the
    /// event channel. The caller's cancellation token on `request` still
    /// works: cancelling it moves the slot to `Idle`.
    pub async fn start(&self, request: QueryRequest) {
        let mut active = self.active.lock().await;
        let generation = self.shared.begin(SlotState::Requesting);

        if let Some(previous) = active.take() {
            tracing::debug!("superseding running execution");
            previous.wind_down().await;
        }

        let token = request.cancellation_token().child_token();
        let request = request.with_cancellation_token(token.clone());
        tracing::info!(
            endpoint = %request.endpoint_url(),
            format = %request.desired_format(),
            generation,
            "starting query execution"
        );

        let run = Run {
            shared: self.shared.clone(),
            generation,
            transport: self.transport.clone(),
            parser: self.parser.clone(),
            config: self.config.clone(),
        };
        let handle = tokio::spawn(run.execute(request));
        *active = Some(ActiveRun { token, handle });
    }

    /// Abort the running execution and return to `Idle`
    ///
    /// Does nothing unless the slot is requesting or decoding. Returns once
    /// the execution, including any background parse, has stopped.
    pub async fn cancel(&self) {
        let mut active = self.active.lock().await;
        if !self.shared.interrupt() {
            return;
        }
        tracing::info!("query execution cancelled");
        if let Some(run) = active.take() {
            run.wind_down().await;
        }
    }

    /// Cancel anything running and return to `Idle` from any state
    pub async fn reset(&self) {
        let mut active = self.active.lock().await;
        self.shared.begin(SlotState::Idle);
        if let Some(run) = active.take() {
            run.wind_down().await;
        }
    }
}

impl Drop for ExecutionSlot {
    fn drop(&mut self) {
        if let Some(run) = self.active.get_mut().take() {
            run.token.cancel();
        }
    }
}

impl ActiveRun {
    async fn wind_down(self) {
        self.token.cancel();
        if let Err(e) = self.handle.await
            && e.is_panic()
        {
            tracing::error!(error = %e, "query execution task panicked");
        }
    }
}

/// State shared between a slot and its running execution
struct SlotShared {
    /// Bumped whenever an execution is superseded; stale writes are dropped
    generation: Mutex<u64>,
    state: watch::Sender<SlotState>,
    events: broadcast::Sender<SlotEvent>,
}

impl SlotShared {
    fn lock_generation(&self) -> std::sync::MutexGuard<'_, u64> {
        self.generation.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start a new generation in `state`
    fn begin(&self, state: SlotState) -> u64 {
        let mut generation = self.lock_generation();
        *generation += 1;
        self.publish(state);
        *generation
    }

    /// Move an active slot to `Idle`; returns `false` if nothing was active
    fn interrupt(&self) -> bool {
        let mut generation = self.lock_generation();
        if !self.state.borrow().is_active() {
            return false;
        }
        *generation += 1;
        self.publish(SlotState::Idle);
        true
    }

    /// Apply a state written by the execution of `generation`
    fn transition(&self, generation: u64, state: SlotState) -> bool {
        let current = self.lock_generation();
        if *current != generation {
            tracing::debug!(generation, current = *current, "dropping stale state change");
            return false;
        }
        self.publish(state);
        true
    }

    fn progress(&self, generation: u64, progress: ParseProgress) {
        let current = self.lock_generation();
        if *current == generation {
            let _ = self.events.send(SlotEvent::Progress(progress));
        }
    }

    /// Caller holds the generation lock
    fn publish(&self, state: SlotState) {
        if matches!(state, SlotState::Idle) && matches!(*self.state.borrow(), SlotState::Idle) {
            return;
        }
        self.state.send_replace(state.clone());
        // No subscribers is fine
        let _ = self.events.send(SlotEvent::StateChanged(state));
    }
}

/// One execution, owned by its spawned task
struct Run {
    shared: Arc<SlotShared>,
    generation: u64,
    transport: TransportExecutor,
    parser: Arc<dyn ResultParser>,
    config: Arc<Config>,
}

impl Run {
    async fn execute(self, request: QueryRequest) {
        let endpoint = request.endpoint_url().to_string();
        let next = match self.run(&request).await {
            Ok(Outcome::Completed(result)) => {
                tracing::info!(
                    endpoint = %endpoint,
                    status = result.http_status,
                    strategy = ?result.strategy,
                    total_ms = result.metrics.total.as_millis() as u64,
                    "query execution succeeded"
                );
                SlotState::Settled(Settlement::Success(Arc::new(result)))
            }
            Ok(Outcome::Cancelled) => {
                tracing::debug!(endpoint = %endpoint, "query execution stopped by cancellation");
                SlotState::Idle
            }
            Err(error) => {
                tracing::warn!(
                    endpoint = %endpoint,
                    code = error.code(),
                    status = ?error.http_status,
                    error = %error,
                    "query execution failed"
                );
                SlotState::Settled(Settlement::Error(error))
            }
        };
        self.shared.transition(self.generation, next);
    }

    async fn run(&self, request: &QueryRequest) -> std::result::Result<Outcome<ExecutionResult>, QueryError> {
        let started = Instant::now();
        let timeout = request.timeout().unwrap_or_else(|| self.config.timeout());
        let deadline = tokio::time::Instant::now() + timeout;

        let response = match self
            .transport
            .execute_until(request, deadline, timeout)
            .await?
        {
            Outcome::Completed(response) => response,
            Outcome::Cancelled => return Ok(Outcome::Cancelled),
        };

        if !self.shared.transition(self.generation, SlotState::Decoding) {
            return Ok(Outcome::Cancelled);
        }

        let parse_started = Instant::now();
        let decoded = self
            .decode(&response, request.cancellation_token(), deadline, timeout)
            .await?;
        let (strategy, result) = match decoded {
            Outcome::Completed(decoded) => decoded,
            Outcome::Cancelled => return Ok(Outcome::Cancelled),
        };

        let metrics = ExecutionMetrics {
            network: response.network_time,
            download: response.download_time,
            parse: parse_started.elapsed(),
            total: started.elapsed(),
        };
        Ok(Outcome::Completed(ExecutionResult {
            result,
            raw_body: response.body,
            content_type: response.content_type,
            http_status: response.status,
            form: response.form,
            strategy,
            metrics,
        }))
    }

    async fn decode(
        &self,
        response: &HttpResponse,
        cancel: &CancellationToken,
        deadline: tokio::time::Instant,
        timeout: Duration,
    ) -> std::result::Result<Outcome<(ParseStrategy, DecodedResult)>, QueryError> {
        if cancel.is_cancelled() {
            return Ok(Outcome::Cancelled);
        }

        // Update responses carry no results document
        if response.form.is_update() {
            let raw = DecodedResult::Raw(RawPassthrough {
                content_type: response.content_type.clone(),
                body: response.body.clone(),
            });
            return Ok(Outcome::Completed((ParseStrategy::InProcess, raw)));
        }

        let size = response.body.len();
        let thresholds = &self.config.parser;
        let decodable = ResultFormat::from_media_type(&response.content_type)
            .is_some_and(|format| format.is_decodable());
        let strategy = if decodable {
            select_strategy(size, estimate_rows(size, thresholds), thresholds)
        } else {
            ParseStrategy::InProcess
        };
        tracing::debug!(bytes = size, strategy = ?strategy, "decoding response");

        let max_rows = self.config.decode.max_rows;
        if !strategy.is_background() {
            let result = decode(&response.body, &response.content_type, &DecodeOptions { max_rows })?;
            return Ok(Outcome::Completed((strategy, result)));
        }

        let job = ParseJob {
            body: response.body.clone(),
            max_rows,
            strategy,
            chunk_size: Some(self.config.decode.chunk_size),
        };
        let shared = self.shared.clone();
        let generation = self.generation;
        let progress: ProgressCallback = Arc::new(move |p: ParseProgress| shared.progress(generation, p));

        let parse_token = cancel.child_token();
        let parse = self.parser.parse(job, progress, parse_token.clone());
        tokio::pin!(parse);

        let outcome = tokio::select! {
            biased;
            outcome = &mut parse => outcome?,
            () = tokio::time::sleep_until(deadline) => {
                parse_token.cancel();
                let _ = parse.await;
                return Err(QueryError::timeout(timeout));
            }
        };
        Ok(match outcome {
            Outcome::Completed(result) => Outcome::Completed((strategy, result)),
            Outcome::Cancelled => Outcome::Cancelled,
        })
    }
}
