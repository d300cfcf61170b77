//! The parser worker thread.
//!
//! One OS thread serves every background parse. Jobs are processed round-robin
//! one slice at a time, and pending commands are drained between slices, so a
//! cancellation takes effect after at most one slice.
//!
//! The first step of a job deserialises the whole body and counts its
//! bindings; it is not sliced. Only row construction is. For a very large
//! body the cancellation latency is therefore the time to deserialise it,
//! not one slice. The caller stops waiting for the acknowledgement after a
//! bounded time and the job is dropped as soon as that step ends.

use super::protocol::{JobId, ParseRequest, ResponseRouter, WorkerCommand, WorkerMessage, WorkerPayload};
use crate::decoder::{ResultsDocument, SelectDocument, parse_document};
use crate::error::QueryError;
use crate::types::{BooleanResult, DecodedResult, ParseProgress};
use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread::JoinHandle;
use std::time::Instant;

/// Name of the worker thread
pub(crate) const WORKER_THREAD_NAME: &str = "sparql-result-parser";

/// Owning handle to a running worker
#[derive(Debug)]
pub(crate) struct WorkerHandle {
    commands: Sender<WorkerCommand>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Handle with no thread behind it; commands go wherever `commands` leads
    #[cfg(test)]
    pub(crate) fn detached(commands: Sender<WorkerCommand>) -> Self {
        Self {
            commands,
            thread: None,
        }
    }

    pub(crate) fn sender(&self) -> Sender<WorkerCommand> {
        self.commands.clone()
    }

    /// Stop the worker and wait for it to exit
    ///
    /// Blocks for at most the duration of one slice.
    pub(crate) fn shutdown(mut self) {
        let _ = self.commands.send(WorkerCommand::Shutdown);
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            tracing::error!("parser worker thread panicked");
        }
    }
}

/// Spawn a worker thread
///
/// `active_jobs` tracks how many jobs the worker currently holds.
pub(crate) fn spawn_worker(
    router: Arc<ResponseRouter>,
    active_jobs: Arc<AtomicUsize>,
) -> std::io::Result<WorkerHandle> {
    let (tx, rx) = mpsc::channel();
    let thread = std::thread::Builder::new()
        .name(WORKER_THREAD_NAME.to_string())
        .spawn(move || run(rx, &router, &active_jobs))?;
    tracing::info!("parser worker started");
    Ok(WorkerHandle {
        commands: tx,
        thread: Some(thread),
    })
}

fn run(commands: Receiver<WorkerCommand>, router: &ResponseRouter, active_jobs: &AtomicUsize) {
    let mut jobs: VecDeque<Job> = VecDeque::new();
    serve(&commands, router, active_jobs, &mut jobs);

    finish(&mut jobs, router, active_jobs);
    // Requests that raced with shutdown
    while let Ok(command) = commands.try_recv() {
        if let WorkerCommand::Parse(request) = command {
            router.deliver(WorkerMessage {
                id: request.id,
                payload: stopped_error(),
            });
        }
    }
    // Later sends now fail; anything sent since the drain is lost, so end
    // every stream still open instead of leaving its receiver waiting
    drop(commands);
    let orphaned = router.close_all();
    tracing::info!(orphaned, "parser worker stopped");
}

/// Process jobs until shutdown or until every sender is gone
fn serve(
    commands: &Receiver<WorkerCommand>,
    router: &ResponseRouter,
    active_jobs: &AtomicUsize,
    jobs: &mut VecDeque<Job>,
) {
    loop {
        // Block only when there is nothing to do
        if jobs.is_empty() {
            match commands.recv() {
                Ok(command) => {
                    if !apply(command, jobs, router, active_jobs) {
                        return;
                    }
                }
                Err(_) => return,
            }
        }

        loop {
            match commands.try_recv() {
                Ok(command) => {
                    if !apply(command, jobs, router, active_jobs) {
                        return;
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => return,
            }
        }

        if let Some(mut job) = jobs.pop_front()
            && job.step(router, active_jobs)
        {
            jobs.push_back(job);
            std::thread::yield_now();
        }
    }
}

/// Apply one command; returns `false` on shutdown
fn apply(
    command: WorkerCommand,
    jobs: &mut VecDeque<Job>,
    router: &ResponseRouter,
    active_jobs: &AtomicUsize,
) -> bool {
    match command {
        WorkerCommand::Parse(request) => {
            tracing::debug!(
                job_id = request.id,
                bytes = request.raw_body.len(),
                chunk_size = request.chunk_size,
                "parse job accepted"
            );
            active_jobs.fetch_add(1, Ordering::SeqCst);
            jobs.push_back(Job::new(request));
            true
        }
        WorkerCommand::Cancel(id) => {
            let before = jobs.len();
            jobs.retain(|job| job.id != id);
            let removed = before - jobs.len();
            if removed > 0 {
                active_jobs.fetch_sub(removed, Ordering::SeqCst);
                tracing::debug!(job_id = id, "parse job cancelled");
                router.deliver(WorkerMessage {
                    id,
                    payload: WorkerPayload::Cancelled,
                });
            }
            true
        }
        WorkerCommand::Shutdown => false,
    }
}

/// Fail every job still held so no caller waits forever
fn finish(jobs: &mut VecDeque<Job>, router: &ResponseRouter, active_jobs: &AtomicUsize) {
    active_jobs.fetch_sub(jobs.len(), Ordering::SeqCst);
    for job in jobs.drain(..) {
        router.deliver(WorkerMessage {
            id: job.id,
            payload: stopped_error(),
        });
    }
}

fn stopped_error() -> WorkerPayload {
    WorkerPayload::Error(QueryError::parse(
        "malformed response from endpoint: result parser stopped before finishing",
    ))
}

struct Job {
    id: JobId,
    chunk_size: usize,
    started: Instant,
    state: JobState,
}

enum JobState {
    Pending {
        raw_body: String,
        max_rows: Option<usize>,
    },
    Decoding(SelectDocument),
    Finished,
}

impl Job {
    fn new(request: ParseRequest) -> Self {
        Self {
            id: request.id,
            chunk_size: request.chunk_size.max(1),
            started: Instant::now(),
            state: JobState::Pending {
                raw_body: request.raw_body,
                max_rows: request.max_rows,
            },
        }
    }

    /// Run one unit of work; returns `true` if the job has more to do
    ///
    /// A finished job is released from `active_jobs` before its final message
    /// goes out.
    fn step(&mut self, router: &ResponseRouter, active_jobs: &AtomicUsize) -> bool {
        let state = std::mem::replace(&mut self.state, JobState::Finished);
        let outcome = catch_unwind(AssertUnwindSafe(|| self.advance(state)));

        let (next, messages) = match outcome {
            Ok(result) => result,
            Err(_) => {
                tracing::error!(job_id = self.id, "parser panicked");
                (
                    JobState::Finished,
                    vec![WorkerPayload::Error(QueryError::parse(
                        "malformed response from endpoint: internal parser failure",
                    ))],
                )
            }
        };

        let finished = matches!(next, JobState::Finished);
        self.state = next;
        if finished {
            active_jobs.fetch_sub(1, Ordering::SeqCst);
        }

        let mut receiver_alive = true;
        for payload in messages {
            tracing::trace!(job_id = self.id, message = payload.message_type(), "worker response");
            receiver_alive &= router.deliver(WorkerMessage {
                id: self.id,
                payload,
            });
        }

        if finished {
            return false;
        }
        if !receiver_alive {
            // Nobody is listening any more
            active_jobs.fetch_sub(1, Ordering::SeqCst);
            tracing::debug!(job_id = self.id, "dropping parse job without receiver");
            return false;
        }
        true
    }

    fn advance(&self, state: JobState) -> (JobState, Vec<WorkerPayload>) {
        match state {
            JobState::Pending { raw_body, max_rows } => match parse_document(&raw_body, max_rows) {
                Ok(ResultsDocument::Boolean(value)) => (
                    JobState::Finished,
                    vec![WorkerPayload::Complete(DecodedResult::Boolean(
                        BooleanResult { value },
                    ))],
                ),
                Ok(ResultsDocument::Select(document)) => (JobState::Decoding(document), vec![]),
                Err(error) => (JobState::Finished, vec![WorkerPayload::Error(error)]),
            },
            JobState::Decoding(mut document) => {
                if let Err(error) = document.decode_next(self.chunk_size) {
                    return (JobState::Finished, vec![WorkerPayload::Error(error)]);
                }
                let progress = WorkerPayload::Progress(ParseProgress {
                    rows_parsed: document.rows_decoded(),
                    total_rows_estimate: document.rows_to_decode(),
                    elapsed: self.started.elapsed(),
                });
                if document.is_complete() {
                    match document.finish() {
                        Ok(table) => {
                            tracing::debug!(
                                job_id = self.id,
                                rows = table.rows().len(),
                                elapsed = ?self.started.elapsed(),
                                "parse job complete"
                            );
                            (
                                JobState::Finished,
                                vec![progress, WorkerPayload::Complete(DecodedResult::Table(table))],
                            )
                        }
                        Err(error) => (JobState::Finished, vec![WorkerPayload::Error(error)]),
                    }
                } else {
                    (JobState::Decoding(document), vec![progress])
                }
            }
            JobState::Finished => (JobState::Finished, vec![]),
        }
    }
}
