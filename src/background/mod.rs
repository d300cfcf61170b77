//! Background parsing of large result bodies.
//!
//! Large SELECT/ASK bodies are decoded on a dedicated worker thread so the
//! async runtime stays responsive. The output is row-for-row identical to
//! [`crate::decoder::decode`].
//!
//! - [`strategy`] - In-process vs background decision
//! - [`protocol`] - Messages exchanged with the worker
//! - `worker` - The worker thread loop
//!
//! The worker is spawned lazily on the first background parse and lives until
//! [`BackgroundParser::shutdown`] or until the parser is dropped. If the thread
//! cannot be spawned, every parse runs in-process instead (degraded mode).

pub mod protocol;
pub mod strategy;
mod worker;


pub use strategy::{ParseStrategy, estimate_rows, select_strategy};

use crate::config::DecodeConfig;
use crate::decoder::{ResultsDocument, parse_document};
use crate::error::QueryError;
use crate::types::{BooleanResult, DecodedResult, Outcome, ParseProgress};
use async_trait::async_trait;
use protocol::{JobId, ParseRequest, ResponseRouter, WorkerCommand, WorkerPayload};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use worker::WorkerHandle;

/// Receives a [`ParseProgress`] after every decoded slice
pub type ProgressCallback = Arc<dyn Fn(ParseProgress) + Send + Sync>;

/// A body to decode
#[derive(Clone, Debug)]
pub struct ParseJob {
    /// SPARQL Query Results JSON body (copied to the worker)
    pub body: String,
    /// Row cap (None = unbounded)
    pub max_rows: Option<usize>,
    /// How to decode it
    pub strategy: ParseStrategy,
    /// Rows per slice for chunked decoding (None = the parser's own size)
    pub chunk_size: Option<usize>,
}

/// Decodes SPARQL JSON result bodies, possibly off the calling thread
///
/// Implementations must produce the same rows as [`crate::decoder::decode`]
/// and report cancellation as [`Outcome::Cancelled`], never as an error.
#[async_trait]
pub trait ResultParser: Send + Sync {
    /// Decode `job`, reporting progress through `progress`
    ///
    /// # Errors
    ///
    /// Returns a `parse` [`QueryError`] for malformed bodies or internal failures.
    async fn parse(
        &self,
        job: ParseJob,
        progress: ProgressCallback,
        cancel: CancellationToken,
    ) -> Result<Outcome<DecodedResult>, QueryError>;
}

/// Longest wait for the worker to confirm a cancelled job is gone
const CANCEL_ACK_TIMEOUT: Duration = Duration::from_secs(1);

type Spawner = fn(Arc<ResponseRouter>, Arc<AtomicUsize>) -> std::io::Result<WorkerHandle>;

#[derive(Debug)]
enum WorkerState {
    NotStarted,
    Running(WorkerHandle),
    /// Spawning failed; parse in-process from now on
    Unavailable,
    Stopped,
}

/// [`ResultParser`] backed by a single worker thread shared by all parses
///
/// Concurrent parses are multiplexed over the worker by job id.
///
/// # Examples
///
/// ```no_run
/// use sparql_exec::background::{BackgroundParser, ParseJob, ParseStrategy, ResultParser};
/// use sparql_exec::config::DecodeConfig;
/// use std::sync::Arc;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example(body: String) -> Result<(), sparql_exec::QueryError> {
/// let parser = BackgroundParser::new(&DecodeConfig::default());
/// let job = ParseJob {
///     body,
///     max_rows: Some(100_000),
///     strategy: ParseStrategy::BackgroundChunked,
///     chunk_size: Some(2_000),
/// };
/// let progress = Arc::new(|p: sparql_exec::ParseProgress| {
///     println!("{}/{}", p.rows_parsed, p.total_rows_estimate)
/// });
/// let outcome = parser.parse(job, progress, CancellationToken::new()).await?;
/// parser.shutdown();
/// # let _ = outcome;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct BackgroundParser {
    chunk_size: usize,
    worker: Mutex<WorkerState>,
    router: Arc<ResponseRouter>,
    active_jobs: Arc<AtomicUsize>,
    next_id: AtomicU64,
    spawner: Spawner,
}

impl BackgroundParser {
    /// Create a parser; the worker thread starts on first use
    ///
    /// `config.chunk_size` is the slice size for jobs that do not carry one.
    pub fn new(config: &DecodeConfig) -> Self {
        Self::with_spawner(config, worker::spawn_worker)
    }

    pub(crate) fn with_spawner(config: &DecodeConfig, spawner: Spawner) -> Self {
        Self {
            chunk_size: config.chunk_size.max(1),
            worker: Mutex::new(WorkerState::NotStarted),
            router: Arc::new(ResponseRouter::default()),
            active_jobs: Arc::new(AtomicUsize::new(0)),
            next_id: AtomicU64::new(1),
            spawner,
        }
    }

    /// Number of jobs currently held by the worker
    pub fn active_jobs(&self) -> usize {
        self.active_jobs.load(Ordering::SeqCst)
    }

    /// Whether the worker could not be started and parses run in-process
    pub fn is_degraded(&self) -> bool {
        matches!(*self.lock_worker(), WorkerState::Unavailable)
    }

    /// Stop the worker thread
    ///
    /// Jobs still on the worker are dropped; their callers see a `parse` error.
    /// Later parses run in-process. Blocks for at most one slice.
    pub fn shutdown(&self) {
        let previous = std::mem::replace(&mut *self.lock_worker(), WorkerState::Stopped);
        if let WorkerState::Running(handle) = previous {
            tracing::info!(
                active_jobs = self.active_jobs(),
                waiting = self.router.len(),
                "stopping parser worker"
            );
            handle.shutdown();
        }
    }

    fn lock_worker(&self) -> std::sync::MutexGuard<'_, WorkerState> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Command channel to the worker, spawning it if needed
    fn commands(&self) -> Option<Sender<WorkerCommand>> {
        let mut state = self.lock_worker();
        if matches!(*state, WorkerState::NotStarted) {
            *state = match (self.spawner)(self.router.clone(), self.active_jobs.clone()) {
                Ok(handle) => WorkerState::Running(handle),
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        "could not start parser worker, large results will be parsed in-process"
                    );
                    WorkerState::Unavailable
                }
            };
        }
        match &*state {
            WorkerState::Running(handle) => Some(handle.sender()),
            _ => None,
        }
    }

    fn slice_size(&self, job: &ParseJob) -> usize {
        match job.strategy {
            ParseStrategy::BackgroundChunked => job.chunk_size.unwrap_or(self.chunk_size).max(1),
            ParseStrategy::InProcess | ParseStrategy::BackgroundSinglePass => usize::MAX,
        }
    }

    async fn parse_on_worker(
        &self,
        commands: Sender<WorkerCommand>,
        job: ParseJob,
        progress: ProgressCallback,
        cancel: CancellationToken,
    ) -> Result<Outcome<DecodedResult>, QueryError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut responses = self.router.register(id);
        let mut guard = JobGuard {
            id,
            router: &self.router,
            commands,
            settled: false,
        };

        let chunk_size = self.slice_size(&job);
        let request = ParseRequest {
            id,
            raw_body: job.body,
            max_rows: job.max_rows,
            chunk_size,
        };
        if let Err(std::sync::mpsc::SendError(WorkerCommand::Parse(request))) =
            guard.commands.send(WorkerCommand::Parse(request))
        {
            guard.settled = true;
            tracing::warn!(job_id = id, "parser worker is gone, parsing in-process");
            let job = ParseJob {
                body: request.raw_body,
                max_rows: request.max_rows,
                strategy: job.strategy,
                chunk_size: job.chunk_size,
            };
            return parse_in_process(job, request.chunk_size, progress, cancel).await;
        }

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!(job_id = id, "background parse cancelled");
                    guard.settled = true;
                    if guard.commands.send(WorkerCommand::Cancel(id)).is_err() {
                        return Ok(Outcome::Cancelled);
                    }
                    // The worker drops the job within one slice
                    let acknowledged = tokio::time::timeout(CANCEL_ACK_TIMEOUT, async {
                        while let Some(message) = responses.recv().await {
                            if message.is_terminal() {
                                break;
                            }
                        }
                    })
                    .await;
                    if acknowledged.is_err() {
                        tracing::warn!(
                            job_id = id,
                            waited = ?CANCEL_ACK_TIMEOUT,
                            "parser worker did not acknowledge cancellation"
                        );
                    }
                    return Ok(Outcome::Cancelled);
                }
                message = responses.recv() => match message {
                    Some(WorkerPayload::Progress(p)) => progress(p),
                    Some(WorkerPayload::Complete(result)) => {
                        guard.settled = true;
                        return Ok(Outcome::Completed(result));
                    }
                    Some(WorkerPayload::Error(error)) => {
                        guard.settled = true;
                        return Err(error);
                    }
                    Some(WorkerPayload::Cancelled) => {
                        guard.settled = true;
                        return Ok(Outcome::Cancelled);
                    }
                    None => {
                        guard.settled = true;
                        return Err(QueryError::parse(
                            "malformed response from endpoint: result parser stopped before finishing",
                        ));
                    }
                },
            }
        }
    }
}

#[async_trait]
impl ResultParser for BackgroundParser {
    async fn parse(
        &self,
        job: ParseJob,
        progress: ProgressCallback,
        cancel: CancellationToken,
    ) -> Result<Outcome<DecodedResult>, QueryError> {
        if cancel.is_cancelled() {
            return Ok(Outcome::Cancelled);
        }
        let chunk = self.slice_size(&job);
        if !job.strategy.is_background() {
            return parse_in_process(job, chunk, progress, cancel).await;
        }
        match self.commands() {
            Some(commands) => self.parse_on_worker(commands, job, progress, cancel).await,
            None => parse_in_process(job, chunk, progress, cancel).await,
        }
    }
}

/// Removes the route when the parse ends and cancels the worker job if it
/// ended early (cancellation, deadline, or the future being dropped)
struct JobGuard<'a> {
    id: JobId,
    router: &'a ResponseRouter,
    commands: Sender<WorkerCommand>,
    settled: bool,
}

impl Drop for JobGuard<'_> {
    fn drop(&mut self) {
        self.router.remove(self.id);
        if !self.settled {
            let _ = self.commands.send(WorkerCommand::Cancel(self.id));
        }
    }
}

/// Slice-by-slice decode on the calling task, yielding between slices
async fn parse_in_process(
    job: ParseJob,
    chunk_size: usize,
    progress: ProgressCallback,
    cancel: CancellationToken,
) -> Result<Outcome<DecodedResult>, QueryError> {
    let started = Instant::now();
    let mut document = match parse_document(&job.body, job.max_rows)? {
        ResultsDocument::Boolean(value) => {
            return Ok(Outcome::Completed(DecodedResult::Boolean(BooleanResult {
                value,
            })));
        }
        ResultsDocument::Select(document) => document,
    };
    drop(job);

    loop {
        if cancel.is_cancelled() {
            return Ok(Outcome::Cancelled);
        }
        document.decode_next(chunk_size)?;
        progress(ParseProgress {
            rows_parsed: document.rows_decoded(),
            total_rows_estimate: document.rows_to_decode(),
            elapsed: started.elapsed(),
        });
        if document.is_complete() {
            break;
        }
        tokio::task::yield_now().await;
    }
    Ok(Outcome::Completed(DecodedResult::Table(document.finish()?)))
}
