//! Bounded worker pool
//!
//! Admission control for job executions. The pool never runs more than its
//! configured number of executions at once: `submit` waits for a free slot,
//! which is the backpressure signal the server uses to stop claiming jobs it
//! cannot run yet.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tracing::{debug, warn};

use crate::error::{JobqError, Result};

/// Fixed-size pool of concurrent job executions
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    capacity: usize,
    handles: Mutex<Vec<JoinHandle<()>>>,
    shutting_down: AtomicBool,
}

impl WorkerPool {
    /// Create a pool that runs at most `capacity` executions concurrently
    pub fn new(capacity: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
            handles: Mutex::new(Vec::new()),
            shutting_down: AtomicBool::new(false),
        }
    }

    /// The configured concurrency limit
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of executions that could start right now without waiting
    pub fn available_slots(&self) -> usize {
        self.permits.available_permits()
    }

    /// Submit an execution to the pool.
    ///
    /// Waits until a slot is free; the slot is released when the execution
    /// completes. Fails once shutdown has begun.
    pub async fn submit<F>(&self, execution: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(JobqError::WorkerError {
                message: "worker pool is shutting down".to_string(),
            });
        }

        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| JobqError::WorkerError {
                message: "worker pool is shutting down".to_string(),
            })?;

        let handle = tokio::spawn(async move {
            execution.await;
            drop(permit);
        });

        let mut handles = self.handles.lock().await;
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
        Ok(())
    }

    /// Stop admissions and wait up to `grace` for in-flight executions.
    ///
    /// Executions still running after the grace period are aborted; their
    /// jobs stay in `Processing` without heartbeats and are picked up by
    /// stalled-job recovery.
    pub async fn shutdown(&self, grace: chrono::Duration) {
        self.shutting_down.store(true, Ordering::SeqCst);
        self.permits.close();

        let deadline = Instant::now() + grace.to_std().unwrap_or_default();
        let mut handles = self.handles.lock().await;
        let total = handles.len();
        let mut abandoned = 0usize;

        for mut handle in handles.drain(..) {
            if handle.is_finished() {
                continue;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if timeout(remaining, &mut handle).await.is_err() {
                handle.abort();
                abandoned += 1;
            }
        }

        if abandoned > 0 {
            warn!(
                abandoned,
                total, "grace period elapsed, abandoned in-flight executions to stalled recovery"
            );
        } else {
            debug!(total, "worker pool drained");
        }
    }
}
