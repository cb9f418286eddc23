//! The storage port: durable persistence and the atomic primitives the server
//! needs to avoid double-processing.
//!
//! Any backend (relational, document, in-memory) can sit behind [`Storage`] as
//! long as it honors three things: conditional writes on the job `version`
//! (optimistic concurrency), per-job atomicity of [`Storage::claim_batch`],
//! and the shared state-transition table. The bundled [`MemoryStorage`] is
//! the reference implementation.
//!
//! ## Exactly-once-in-effect claims
//!
//! `claim_batch` only transitions jobs still in the expected source state;
//! jobs a concurrent caller already claimed are silently excluded. Two
//! servers racing on overlapping id sets therefore end up with disjoint
//! claimed sets: if A and B both call `claim_batch([1, 2, 3], Enqueued,
//! Processing)` and B wins job 2, A gets back jobs 1 and 3 and B gets job 2.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::core::{Job, JobState};

pub mod config;
pub mod error;
pub mod memory;

pub use config::MemoryConfig;
pub use error::StorageError;
pub use memory::MemoryStorage;

/// Core storage trait that defines the persistence contract for all backends.
///
/// All mutating operations are conditioned on the stored job `version`
/// matching what the caller last read, so lost races surface as
/// [`StorageError::ConcurrentModification`] (on [`Storage::save`]) or as a
/// silently smaller claimed set (on [`Storage::claim_batch`]) instead of as
/// double-executed jobs.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Insert or fully update a job.
    ///
    /// Fails with [`StorageError::ConcurrentModification`] if the stored
    /// version differs from `job.version`: the caller must re-read and retry
    /// its decision or abandon it. On success the persisted job is returned
    /// with its version bumped.
    async fn save(&self, job: &Job) -> Result<Job, StorageError>;

    /// Retrieve a job by id. This is the dashboard read path: anything a
    /// completed `save` wrote (history, metadata) is visible here.
    async fn get(&self, job_id: &str) -> Result<Option<Job>, StorageError>;

    /// Remove a job from storage. Returns whether it existed.
    async fn delete(&self, job_id: &str) -> Result<bool, StorageError>;

    /// Jobs in `state` whose `scheduled_at` is at or before `before` (a job
    /// without a `scheduled_at` is always due), ordered by `scheduled_at`
    /// ascending then id ascending. Read-only; never mutates state.
    async fn fetch_due(
        &self,
        state: JobState,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Job>, StorageError>;

    /// Atomically transition the subset of `job_ids` still in `from_state` to
    /// `to_state`, returning the claimed jobs.
    ///
    /// Jobs missing, already claimed by a concurrent caller, or no longer in
    /// `from_state` are silently excluded; losing a race here is expected,
    /// not an error. At most one caller can win a given job id.
    async fn claim_batch(
        &self,
        job_ids: &[String],
        from_state: JobState,
        to_state: JobState,
    ) -> Result<Vec<Job>, StorageError>;

    /// Record liveness for a `Processing` job.
    async fn heartbeat(&self, job_id: &str) -> Result<(), StorageError>;

    /// Jobs in `Processing` with no heartbeat more recent than `deadline`.
    /// These are eligible for the `Processing -> Enqueued` recovery claim.
    async fn find_stalled(&self, deadline: DateTime<Utc>) -> Result<Vec<Job>, StorageError>;

    /// List jobs with optional state filtering and pagination, newest first.
    async fn list(
        &self,
        state_filter: Option<JobState>,
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> Result<Vec<Job>, StorageError>;

    /// Count of jobs grouped by current state, for monitoring.
    async fn job_counts(&self) -> Result<HashMap<JobState, usize>, StorageError>;
}
