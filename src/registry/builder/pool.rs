//! Worker pool for annotation extraction
//!
//! A fixed set of tokio tasks, each fed by its own channel. Requests are
//! dispatched round-robin and every worker answers on one shared reply
//! channel drained by the builder's single receive loop.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::protocol::{FailureKind, WorkerReply, WorkerRequest};
use crate::registry::annotation::extract_annotations;
use crate::registry::error::BuildError;

/// Fixed-size pool of annotation workers
pub struct WorkerPool {
    senders: Vec<mpsc::UnboundedSender<WorkerRequest>>,
    handles: Vec<JoinHandle<()>>,
    replies: mpsc::UnboundedReceiver<WorkerReply>,
    next_worker: usize,
}

impl WorkerPool {
    /// Spawn `size` workers on the current tokio runtime
    pub fn start(size: usize) -> Result<Self, BuildError> {
        if size == 0 {
            return Err(BuildError::NoWorkers);
        }

        let (reply_tx, reply_rx) = mpsc::unbounded_channel();
        let mut senders = Vec::with_capacity(size);
        let mut handles = Vec::with_capacity(size);

        for id in 0..size {
            let (tx, rx) = mpsc::unbounded_channel();
            handles.push(tokio::spawn(run_worker(id, rx, reply_tx.clone())));
            senders.push(tx);
        }

        debug!("Started {} annotation workers", size);
        Ok(Self {
            senders,
            handles,
            replies: reply_rx,
            next_worker: 0,
        })
    }

    pub fn size(&self) -> usize {
        self.senders.len()
    }

    /// Send a request to the next worker in round-robin order
    ///
    /// Returns the index of the worker that received it.
    pub fn dispatch(&mut self, request: WorkerRequest) -> Result<usize, BuildError> {
        let worker = self.next_worker;
        self.next_worker = (self.next_worker + 1) % self.senders.len();

        trace!("Dispatching {:?} to worker {}", request.source_file, worker);
        self.senders[worker].send(request).map_err(|_| {
            BuildError::WorkerFailure(format!("worker {} is no longer running", worker))
        })?;
        Ok(worker)
    }

    /// Next reply from any worker; `None` once every worker has exited
    pub async fn next_reply(&mut self) -> Option<WorkerReply> {
        self.replies.recv().await
    }

    /// Stop every worker
    pub async fn shutdown(self) {
        drop(self.senders);
        for handle in self.handles {
            handle.abort();
            if let Err(e) = handle.await {
                if e.is_panic() {
                    warn!("Annotation worker panicked: {}", e);
                }
            }
        }
        debug!("Annotation workers stopped");
    }
}

/// Reports a worker that unwinds out of its loop
struct ExitGuard {
    id: usize,
    replies: mpsc::UnboundedSender<WorkerReply>,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        if std::thread::panicking() {
            let failure = WorkerReply::failure(
                FailureKind::Worker,
                None,
                format!("worker {} exited unexpectedly", self.id),
            );
            if self.replies.send(failure).is_err() {
                debug!("Worker {} panicked after the reply channel closed", self.id);
            }
        }
    }
}

async fn run_worker(
    id: usize,
    mut requests: mpsc::UnboundedReceiver<WorkerRequest>,
    replies: mpsc::UnboundedSender<WorkerReply>,
) {
    let guard = ExitGuard {
        id,
        replies: replies.clone(),
    };
    trace!("Worker {} started", id);

    while let Some(request) = requests.recv().await {
        let reply = process_request(request).await;
        if replies.send(reply).is_err() {
            break;
        }
    }

    trace!("Worker {} stopped", id);
    drop(guard);
}

/// Read one source file and extract its annotations
pub async fn process_request(request: WorkerRequest) -> WorkerReply {
    let WorkerRequest { source_file } = request;

    let text = match tokio::fs::read(&source_file).await {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) => return WorkerReply::failure(FailureKind::Read, Some(source_file), e.to_string()),
    };

    match std::panic::catch_unwind(|| extract_annotations(&text)) {
        Ok(Ok(annotations)) => WorkerReply::annotations(source_file, annotations),
        Ok(Err(e)) => {
            WorkerReply::failure(FailureKind::AnnotationParse, Some(source_file), e.to_string())
        }
        Err(_) => {
            let message = format!("annotation extraction panicked for '{}'", source_file.display());
            WorkerReply::failure(FailureKind::Worker, Some(source_file), message)
        }
    }
}
