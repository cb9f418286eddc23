//! Job processing engine.
//!
//! This module contains the worker abstraction, the bounded worker pool, the
//! per-job processor, retry policies, the scheduler for due and recurring
//! jobs, and the background server that ties them together into one poll
//! cycle.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;

use crate::core::Job;
use crate::diagnostics::JobDashboardLogger;
use crate::error::Result;

pub mod processor;
pub mod retry;
pub mod scheduler;
pub mod server;
pub mod worker_pool;

pub use processor::{JobProcessor, ProcessorConfig};
pub use retry::{RetryPolicy, RetryStrategy};
pub use scheduler::JobScheduler;
pub use server::{BackgroundJobServer, ServerConfig};
pub use worker_pool::WorkerPool;

/// Trait for executing jobs
///
/// Implementations of this trait define how specific job methods are executed.
/// The worker receives the job and an execution context, and returns a result.
#[async_trait]
pub trait Worker: Send + Sync {
    /// Execute a job
    ///
    /// # Arguments
    /// * `job` - The job to execute
    /// * `context` - Execution context (attempt number, diagnostic logger)
    ///
    /// # Returns
    /// * `Ok(WorkerResult)` describing the outcome
    /// * `Err(JobqError)` if execution failed with an internal error
    async fn execute(&self, job: &Job, context: &WorkerContext) -> Result<WorkerResult>;

    /// Get the method name this worker handles
    fn method_name(&self) -> &str;

    /// Check if this worker can handle the given job method
    fn can_handle(&self, method: &str) -> bool {
        self.method_name() == method
    }
}

/// Registry for job workers
///
/// Maps job method names to their corresponding worker implementations. The
/// processor uses it to find the worker for each claimed job.
#[derive(Default)]
pub struct WorkerRegistry {
    workers: HashMap<String, Box<dyn Worker>>,
}

impl WorkerRegistry {
    /// Create a new worker registry
    pub fn new() -> Self {
        Self {
            workers: HashMap::new(),
        }
    }

    /// Register a worker for its method name
    pub fn register<W>(&mut self, worker: W)
    where
        W: Worker + 'static,
    {
        let method_name = worker.method_name().to_string();
        self.workers.insert(method_name, Box::new(worker));
    }

    /// Get a worker for the given method name
    pub fn get_worker(&self, method: &str) -> Option<&dyn Worker> {
        self.workers.get(method).map(|w| w.as_ref())
    }

    /// Get all registered method names
    pub fn get_methods(&self) -> Vec<&str> {
        self.workers.keys().map(|s| s.as_str()).collect()
    }

    /// Check if a method is registered
    pub fn has_worker(&self, method: &str) -> bool {
        self.workers.contains_key(method)
    }

    /// Get the number of registered workers
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}

/// Context information provided to workers during job execution
#[derive(Clone)]
pub struct WorkerContext {
    /// Name of the server executing the job
    pub server_name: String,
    /// When the execution started
    pub started_at: DateTime<Utc>,
    /// Attempt number, 1 for the first execution
    pub attempt: u32,
    /// Error message from the previous attempt, if this is a retry
    pub previous_error: Option<String>,
    /// Diagnostic logger; lines it emits are attributed to the executing job
    pub logger: Arc<JobDashboardLogger>,
}

impl WorkerContext {
    pub fn new(
        server_name: impl Into<String>,
        attempt: u32,
        previous_error: Option<String>,
        logger: Arc<JobDashboardLogger>,
    ) -> Self {
        Self {
            server_name: server_name.into(),
            started_at: Utc::now(),
            attempt,
            previous_error,
            logger,
        }
    }

    /// Execution duration so far
    pub fn duration(&self) -> Duration {
        Utc::now() - self.started_at
    }

    /// Check if this is a retry attempt
    pub fn is_retry(&self) -> bool {
        self.attempt > 1
    }
}

/// Result of job execution
///
/// Whether a failed job is retried is decided by the server's retry policy,
/// not by the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerResult {
    /// Job completed successfully
    Success {
        /// Optional result data, recorded in the job's history
        result: Option<String>,
    },
    /// Job failed
    Failure {
        /// Error message
        error: String,
    },
}

impl WorkerResult {
    /// Create a successful result
    pub fn success(result: Option<String>) -> Self {
        Self::Success { result }
    }

    /// Create a failure result
    pub fn failure(error: impl Into<String>) -> Self {
        Self::Failure {
            error: error.into(),
        }
    }

    /// Check if the result indicates success
    pub fn is_success(&self) -> bool {
        matches!(self, WorkerResult::Success { .. })
    }

    /// Get the error message if this is a failure
    pub fn error_message(&self) -> Option<&str> {
        match self {
            WorkerResult::Failure { error } => Some(error),
            WorkerResult::Success { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopWorker {
        method: String,
    }

    #[async_trait]
    impl Worker for NoopWorker {
        async fn execute(&self, _job: &Job, _context: &WorkerContext) -> Result<WorkerResult> {
            Ok(WorkerResult::success(None))
        }

        fn method_name(&self) -> &str {
            &self.method
        }
    }

    #[test]
    fn registry_maps_methods_to_workers() {
        let mut registry = WorkerRegistry::new();
        assert!(registry.is_empty());

        registry.register(NoopWorker {
            method: "send_email".to_string(),
        });

        assert_eq!(registry.len(), 1);
        assert!(registry.has_worker("send_email"));
        assert!(!registry.has_worker("unknown"));
        assert!(registry.get_worker("send_email").is_some());
        assert_eq!(registry.get_methods(), vec!["send_email"]);
    }

    #[test]
    fn worker_can_handle_its_own_method() {
        let worker = NoopWorker {
            method: "send_email".to_string(),
        };
        assert!(worker.can_handle("send_email"));
        assert!(!worker.can_handle("other"));
    }
}
