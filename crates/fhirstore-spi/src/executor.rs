//! Blocking-work executor lent to the store by the cache engine
//!
//! The store never owns threads. Every backend call is handed to a
//! [`BlockingExecutor`] and the caller gets back a future that only
//! waits for the result, so dispatch happens at call time.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::future;
use tokio::runtime::Handle;
use tokio::sync::{Semaphore, oneshot};
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::store::StoreFuture;

/// Unit of work submitted to an executor
pub type BlockingTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Bounded worker pool supplied by the cache engine
pub trait BlockingExecutor: Send + Sync {
    /// Schedule a task. Must not run the task on the calling thread.
    fn execute(&self, trace_id: &'static str, task: BlockingTask) -> Result<(), StoreError>;
}

/// Dispatch `work` on `executor` and return a handle to its result
///
/// A rejected submission yields an already-failed future.
pub fn supply_blocking<T, F>(
    executor: &dyn BlockingExecutor,
    trace_id: &'static str,
    work: F,
) -> StoreFuture<T>
where
    T: Send + 'static,
    F: Future<Output = Result<T, StoreError>> + Send + 'static,
{
    let (tx, rx) = oneshot::channel();

    let task: BlockingTask = Box::pin(async move {
        if tx.send(work.await).is_err() {
            debug!("Result of {} dropped, caller no longer waiting", trace_id);
        }
    });

    if let Err(e) = executor.execute(trace_id, task) {
        return Box::pin(future::ready(Err(e)));
    }

    Box::pin(async move {
        rx.await
            .map_err(|_| StoreError::TaskAborted(trace_id.to_string()))?
    })
}

/// Executor backed by a tokio runtime with a cap on in-flight tasks
#[derive(Clone)]
pub struct TokioBlockingExecutor {
    handle: Handle,
    permits: Arc<Semaphore>,
}

impl TokioBlockingExecutor {
    /// Create an executor that runs at most `max_in_flight` tasks at once
    pub fn new(handle: Handle, max_in_flight: usize) -> Self {
        Self {
            handle,
            permits: Arc::new(Semaphore::new(max_in_flight.max(1))),
        }
    }

    /// Create an executor on the runtime of the calling context
    pub fn current(max_in_flight: usize) -> Result<Self, StoreError> {
        let handle = Handle::try_current()
            .map_err(|e| StoreError::ExecutorClosed(format!("no tokio runtime: {}", e)))?;
        Ok(Self::new(handle, max_in_flight))
    }

    /// Stop accepting new work. Tasks already waiting for a permit are dropped.
    pub fn shutdown(&self) {
        self.permits.close();
    }

    pub fn is_shutdown(&self) -> bool {
        self.permits.is_closed()
    }

    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }
}

impl BlockingExecutor for TokioBlockingExecutor {
    fn execute(&self, trace_id: &'static str, task: BlockingTask) -> Result<(), StoreError> {
        if self.permits.is_closed() {
            return Err(StoreError::ExecutorClosed(trace_id.to_string()));
        }

        let permits = self.permits.clone();
        self.handle.spawn(async move {
            match permits.acquire_owned().await {
                Ok(_permit) => task.await,
                Err(_) => warn!("Executor shut down before {} could run", trace_id),
            }
        });
        Ok(())
    }
}
