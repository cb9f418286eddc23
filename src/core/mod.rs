//! Core types for jobq.
//!
//! This module contains the fundamental types for job processing:
//! job definitions, lifecycle state management, and recurring job templates.

pub mod job;
pub mod job_state;
pub mod recurring;

pub use job::{
    append_log_line, Job, JobDetails, JobLogLines, LogLevel, LogLine, MetadataValue,
    StateHistoryEntry, DASHBOARD_LOG_KEY, DEFAULT_LOG_BUFFER_CAPACITY,
};
pub use job_state::JobState;
pub use recurring::{FixedInterval, RecurringJobDefinition, Schedule};
