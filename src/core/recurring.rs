//! Recurring job definitions.
//!
//! A [`RecurringJobDefinition`] is a template that the server expands into
//! concrete [`Job`] instances, at most once per scheduled occurrence. The
//! schedule expression itself is opaque to the core: anything implementing
//! [`Schedule`] works, and [`FixedInterval`] is the bundled reference
//! implementation.

use crate::core::{Job, JobDetails};
use chrono::{DateTime, Duration, Utc};

/// An opaque schedule: the core only ever asks for the next occurrence
/// strictly after a given instant.
pub trait Schedule: Send + Sync {
    fn next_occurrence(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>>;
}

/// Fires every `every` starting from `anchor`.
#[derive(Debug, Clone)]
pub struct FixedInterval {
    anchor: DateTime<Utc>,
    every: Duration,
}

impl FixedInterval {
    pub fn new(anchor: DateTime<Utc>, every: Duration) -> Self {
        Self { anchor, every }
    }

    /// An interval anchored at creation time.
    pub fn every(every: Duration) -> Self {
        Self::new(Utc::now(), every)
    }
}

impl Schedule for FixedInterval {
    fn next_occurrence(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let every_ms = self.every.num_milliseconds();
        if every_ms <= 0 {
            return None;
        }

        if after < self.anchor {
            return Some(self.anchor);
        }

        let elapsed_ms = after.signed_duration_since(self.anchor).num_milliseconds();
        // First multiple of the interval strictly after `after`.
        let steps = elapsed_ms / every_ms + 1;
        Some(self.anchor + Duration::milliseconds(steps * every_ms))
    }
}

/// Template that periodically materializes new job instances.
pub struct RecurringJobDefinition {
    pub id: String,
    pub schedule: Box<dyn Schedule>,
    pub details: JobDetails,
}

impl RecurringJobDefinition {
    pub fn new(
        id: impl Into<String>,
        schedule: impl Schedule + 'static,
        details: JobDetails,
    ) -> Self {
        Self {
            id: id.into(),
            schedule: Box::new(schedule),
            details,
        }
    }

    /// The deterministic job id for one occurrence of this definition.
    ///
    /// Identical `(definition, occurrence)` pairs always produce the same id,
    /// which is what makes expansion idempotent across crashes: a second
    /// materialization collides on insert instead of creating a duplicate.
    pub fn occurrence_job_id(&self, occurrence: DateTime<Utc>) -> String {
        format!("{}@{}", self.id, occurrence.to_rfc3339())
    }

    /// Materializes the concrete job instance for `occurrence`.
    pub fn materialize(&self, occurrence: DateTime<Utc>) -> Job {
        let mut job = Job::with_id(
            self.occurrence_job_id(occurrence),
            self.details.clone(),
            Some(occurrence),
        );
        job.recurring_job_id = Some(self.id.clone());
        job
    }
}

impl std::fmt::Debug for RecurringJobDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecurringJobDefinition")
            .field("id", &self.id)
            .field("details", &self.details)
            .finish_non_exhaustive()
    }
}
