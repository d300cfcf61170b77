//! Messages exchanged with the parser worker thread.
//!
//! Requests carry their own copy of the body; nothing else is shared with the
//! worker. Responses are tagged with the job id and routed to the waiting
//! parse through [`ResponseRouter`], so several parses can share one worker.

use crate::error::QueryError;
use crate::types::{DecodedResult, ParseProgress};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc;

/// Identifier of one background parse
pub type JobId = u64;

/// Parse request sent to the worker
#[derive(Debug)]
pub struct ParseRequest {
    /// Job id echoed in every response
    pub id: JobId,
    /// Copy of the response body
    pub raw_body: String,
    /// Row cap (None = unbounded)
    pub max_rows: Option<usize>,
    /// Bindings converted per slice (`usize::MAX` = single pass)
    pub chunk_size: usize,
}

/// Command sent to the worker
#[derive(Debug)]
pub(crate) enum WorkerCommand {
    /// Start a parse
    Parse(ParseRequest),
    /// Drop a parse; acknowledged with [`WorkerPayload::Cancelled`]
    Cancel(JobId),
    /// Exit the worker loop
    Shutdown,
}

/// Response from the worker
#[derive(Debug)]
pub struct WorkerMessage {
    /// Job this message belongs to
    pub id: JobId,
    /// Message body
    pub payload: WorkerPayload,
}

/// Body of a worker response
#[derive(Debug)]
pub enum WorkerPayload {
    /// One slice finished
    Progress(ParseProgress),
    /// The parse finished
    Complete(DecodedResult),
    /// The parse failed
    Error(QueryError),
    /// The job was dropped after a cancel request
    Cancelled,
}

impl WorkerPayload {
    /// Message type name (`progress`, `complete`, `error`, `cancelled`)
    pub fn message_type(&self) -> &'static str {
        match self {
            WorkerPayload::Progress(_) => "progress",
            WorkerPayload::Complete(_) => "complete",
            WorkerPayload::Error(_) => "error",
            WorkerPayload::Cancelled => "cancelled",
        }
    }

    /// Whether no further messages follow for this job
    pub fn is_terminal(&self) -> bool {
        !matches!(self, WorkerPayload::Progress(_))
    }
}

/// Routes worker responses to the parse waiting on each job id
#[derive(Debug, Default)]
pub(crate) struct ResponseRouter {
    routes: Mutex<HashMap<JobId, mpsc::UnboundedSender<WorkerPayload>>>,
}

impl ResponseRouter {
    /// Register a job and return the receiving end of its responses
    pub(crate) fn register(&self, id: JobId) -> mpsc::UnboundedReceiver<WorkerPayload> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().insert(id, tx);
        rx
    }

    /// Forget a job; later messages for it are dropped
    pub(crate) fn remove(&self, id: JobId) {
        self.lock().remove(&id);
    }

    /// Deliver a message to its job
    ///
    /// Returns `false` if nobody is waiting for the job any more.
    pub(crate) fn deliver(&self, message: WorkerMessage) -> bool {
        let routes = self.lock();
        match routes.get(&message.id) {
            Some(tx) => tx.send(message.payload).is_ok(),
            None => false,
        }
    }

    /// Drop every route so that waiting receivers see their stream end
    ///
    /// Returns the number of routes that were open.
    pub(crate) fn close_all(&self) -> usize {
        let mut routes = self.lock();
        let open = routes.len();
        routes.clear();
        open
    }

    /// Number of jobs with a waiting receiver
    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<JobId, mpsc::UnboundedSender<WorkerPayload>>> {
        // A poisoned map is still structurally valid
        self.routes
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
