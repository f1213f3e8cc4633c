//! Per-source load coordinators
//!
//! One coordinator exists per source path per context. It runs the source's
//! load at most once and keeps the outcome; every later caller gets that
//! same outcome, error included. Nothing is retried.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, OnceLock};
use tracing::trace;

use super::source::Source;
use super::traits::ResolveError;

/// Coordinator processing state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Unprocessed,
    ProcessingStarted,
    Processed,
}

/// Coordinator used by the synchronous context
#[derive(Debug)]
pub struct SourceCoordinator {
    source: Arc<Source>,
    state: ProcessState,
    outcome: Option<Result<(), ResolveError>>,
}

impl SourceCoordinator {
    pub fn new(source: Arc<Source>) -> Self {
        Self {
            source,
            state: ProcessState::Unprocessed,
            outcome: None,
        }
    }

    pub fn source(&self) -> &Arc<Source> {
        &self.source
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    /// Outcome once processed
    pub fn outcome(&self) -> Option<&Result<(), ResolveError>> {
        self.outcome.as_ref()
    }

    /// Unprocessed -> ProcessingStarted; false when processing already began
    pub(crate) fn begin(&mut self) -> bool {
        if self.state != ProcessState::Unprocessed {
            return false;
        }
        self.state = ProcessState::ProcessingStarted;
        true
    }

    pub(crate) fn complete(&mut self, outcome: Result<(), ResolveError>) {
        trace!(
            "Processed {} (ok: {})",
            self.source.path().display(),
            outcome.is_ok()
        );
        self.state = ProcessState::Processed;
        self.outcome = Some(outcome);
    }
}

/// Coordinator used by the asynchronous context
///
/// The first caller of [`AsyncSourceCoordinator::process`] spawns the load
/// on the runtime; every caller, that one included, awaits a shared handle
/// to it. Dropping a caller never abandons a load that has started.
pub struct AsyncSourceCoordinator {
    source: Arc<Source>,
    load: Mutex<Option<SharedLoad>>,
    outcome: Arc<OnceLock<Result<(), ResolveError>>>,
}

type SharedLoad = Shared<BoxFuture<'static, Result<(), ResolveError>>>;

impl AsyncSourceCoordinator {
    pub fn new(source: Arc<Source>) -> Self {
        Self {
            source,
            load: Mutex::new(None),
            outcome: Arc::new(OnceLock::new()),
        }
    }

    pub fn source(&self) -> &Arc<Source> {
        &self.source
    }

    pub fn state(&self) -> ProcessState {
        if self.outcome.get().is_some() {
            ProcessState::Processed
        } else if self.in_flight().is_some() {
            ProcessState::ProcessingStarted
        } else {
            ProcessState::Unprocessed
        }
    }

    pub fn outcome(&self) -> Option<Result<(), ResolveError>> {
        self.outcome.get().cloned()
    }

    fn in_flight(&self) -> Option<SharedLoad> {
        self.load.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Run `load` unless it already ran or is running, then return the outcome
    pub async fn process<F, Fut>(&self, load: F) -> Result<(), ResolveError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), ResolveError>> + Send + 'static,
    {
        let shared = {
            let mut slot = self.load.lock().unwrap_or_else(|e| e.into_inner());
            match slot.as_ref() {
                Some(shared) => {
                    trace!("Waiting on in-flight load of {}", self.source.path().display());
                    shared.clone()
                }
                None => {
                    let shared = self.spawn(load());
                    *slot = Some(shared.clone());
                    shared
                }
            }
        };
        shared.await
    }

    /// Outcome of a load that has started; `None` when nothing started yet
    pub async fn wait(&self) -> Option<Result<(), ResolveError>> {
        let shared = self.in_flight()?;
        Some(shared.await)
    }

    fn spawn<Fut>(&self, load: Fut) -> SharedLoad
    where
        Fut: Future<Output = Result<(), ResolveError>> + Send + 'static,
    {
        let path = self.source.path().to_path_buf();
        let task_outcome = Arc::clone(&self.outcome);
        let outcome = Arc::clone(&self.outcome);
        let handle = tokio::spawn(async move {
            let result = load.await;
            task_outcome.get_or_init(|| result.clone()).clone()
        });
        async move {
            let result = handle.await.unwrap_or_else(|e| {
                Err(ResolveError::source_failed(path, format!("load task failed: {}", e)))
            });
            outcome.get_or_init(|| result).clone()
        }
        .boxed()
        .shared()
    }
}

impl fmt::Debug for AsyncSourceCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncSourceCoordinator")
            .field("source", &self.source)
            .field("state", &self.state())
            .finish()
    }
}
