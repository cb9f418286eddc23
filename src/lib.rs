//! # jobq
//!
//! Background job processing for Rust: a persistent job lifecycle with
//! validated state transitions, a polling server with a bounded worker pool
//! and retry scheduling, recurring jobs with exactly-once expansion, and a
//! per-execution diagnostic context that attributes log lines to the job
//! that emitted them.
//!
//! ## Defining a worker
//!
//! ```rust
//! use jobq::{Job, JobqError, Worker, WorkerContext, WorkerResult};
//! use async_trait::async_trait;
//!
//! struct EmailWorker;
//!
//! #[async_trait]
//! impl Worker for EmailWorker {
//!     async fn execute(&self, job: &Job, context: &WorkerContext) -> Result<WorkerResult, JobqError> {
//!         let recipient = &job.details.arguments[0];
//!         context.logger.info("sending email to {}", &[recipient]);
//!         Ok(WorkerResult::success(None))
//!     }
//!
//!     fn method_name(&self) -> &str {
//!         "send_email"
//!     }
//! }
//! ```
//!
//! ## Running a server
//!
//! ```rust,no_run
//! use jobq::{BackgroundJobServer, Job, JobDetails, MemoryStorage, ServerConfig, WorkerRegistry};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), jobq::JobqError> {
//! let storage = Arc::new(MemoryStorage::new());
//! let mut registry = WorkerRegistry::new();
//! // registry.register(EmailWorker);
//!
//! let config = ServerConfig::new("server-1").worker_count(4);
//! let server = BackgroundJobServer::new(config, storage, Arc::new(registry));
//!
//! server.start().await?;
//! server
//!     .enqueue(Job::new(JobDetails::new(
//!         "send_email",
//!         vec!["user@example.com".to_string()],
//!     )))
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Job lifecycle
//!
//! ```text
//! Scheduled -> Enqueued -> Processing -> Succeeded -> Deleted
//!                  ^            |
//!                  |            v
//!                  +-- Failed --+-> Scheduled (retry) / Deleted
//! ```
//!
//! Every transition is validated against a shared legality table and recorded
//! in the job's append-only history. Storage backends implement the
//! [`Storage`] trait; claims go through version-checked conditional writes so
//! two servers polling the same storage never execute the same job twice.

pub mod core;
pub mod diagnostics;
pub mod error;
pub mod processing;
pub mod storage;

// Re-export main types for convenience
pub use core::{
    FixedInterval, Job, JobDetails, JobState, LogLevel, LogLine, MetadataValue,
    RecurringJobDefinition, Schedule, StateHistoryEntry,
};
pub use diagnostics::{DiagnosticSink, JobDashboardLogger, TracingSink};
pub use error::{JobqError, Result};
pub use processing::{
    BackgroundJobServer, JobProcessor, JobScheduler, RetryPolicy, RetryStrategy, ServerConfig,
    Worker, WorkerContext, WorkerPool, WorkerRegistry, WorkerResult,
};
pub use storage::{MemoryConfig, MemoryStorage, Storage, StorageError};
