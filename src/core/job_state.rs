//! Job lifecycle states and the transition table.
//!
//! The set of legal transitions is a single const lookup table shared by every
//! caller, including storage backends, so no code path can invent its own
//! notion of legality.

use serde::{Deserialize, Serialize};

/// The lifecycle state of a job.
///
/// States carry no payload; the timestamp and reason for entering a state are
/// recorded in the job's append-only history instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobState {
    /// Waiting for its `scheduled_at` instant before becoming runnable.
    Scheduled,
    /// Runnable and waiting to be claimed by a server.
    Enqueued,
    /// Claimed by a server and currently executing on one of its workers.
    Processing,
    /// The job body returned normally.
    Succeeded,
    /// The job body raised an error.
    Failed,
    /// Terminal: cancelled, retained out, or retry budget exhausted.
    Deleted,
}

/// Every legal `(from, to)` pair. Anything not listed here is rejected.
const ALLOWED_TRANSITIONS: &[(JobState, JobState)] = &[
    (JobState::Scheduled, JobState::Enqueued),
    (JobState::Enqueued, JobState::Processing),
    (JobState::Processing, JobState::Succeeded),
    (JobState::Processing, JobState::Failed),
    // Stalled recovery: a claim whose owner stopped heartbeating is requeued.
    (JobState::Processing, JobState::Enqueued),
    (JobState::Failed, JobState::Scheduled),
    (JobState::Failed, JobState::Deleted),
    (JobState::Succeeded, JobState::Deleted),
    (JobState::Enqueued, JobState::Deleted),
];

impl JobState {
    /// Returns the name of the state as a string.
    pub fn name(&self) -> &'static str {
        match self {
            JobState::Scheduled => "Scheduled",
            JobState::Enqueued => "Enqueued",
            JobState::Processing => "Processing",
            JobState::Succeeded => "Succeeded",
            JobState::Failed => "Failed",
            JobState::Deleted => "Deleted",
        }
    }

    /// All states, in lifecycle order. Used by exhaustive table tests and
    /// statistics grouping.
    pub fn all() -> [JobState; 6] {
        [
            JobState::Scheduled,
            JobState::Enqueued,
            JobState::Processing,
            JobState::Succeeded,
            JobState::Failed,
            JobState::Deleted,
        ]
    }

    /// Checks if this state can legally transition to `target`.
    pub fn can_transition_to(self, target: JobState) -> bool {
        ALLOWED_TRANSITIONS.contains(&(self, target))
    }

    /// The job will never run again.
    pub fn is_final(self) -> bool {
        matches!(self, JobState::Deleted)
    }

    /// The job is still moving through the lifecycle.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            JobState::Scheduled | JobState::Enqueued | JobState::Processing
        )
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
