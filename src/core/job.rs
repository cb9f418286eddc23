//! Job definition and management.
//!
//! This module contains the core [`Job`] struct that represents a background
//! job with everything needed for execution, state tracking, and dashboard
//! display, plus the metadata log-line buffer used for per-job dashboard logs.
//!
//! ## Job Lifecycle
//!
//! ```text
//! Scheduled -> Enqueued -> Processing -> Succeeded -> Deleted
//!                  ^            |
//!                  |            v
//!                  +-- Failed --+-> Scheduled (retry) / Deleted
//! ```
//!
//! Every state change goes through [`Job::transition_to`], which validates the
//! transition against the shared legality table and appends an entry to the
//! job's immutable history.

use crate::core::JobState;
use crate::error::{JobqError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use uuid::Uuid;

/// Metadata key under which dashboard log lines are stored.
///
/// Fixed and well-known so dashboard readers can find the buffer without
/// coordination. Writers go through [`append_log_line`].
pub const DASHBOARD_LOG_KEY: &str = "dashboardLog";

/// Default capacity of the per-job dashboard log buffer.
pub const DEFAULT_LOG_BUFFER_CAPACITY: usize = 128;

/// Severity of a dashboard log line. Ordered: `Debug < Info < Warn < Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn name(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

/// A single dashboard log line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    pub level: LogLevel,
    pub logged_at: DateTime<Utc>,
    pub message: String,
}

impl LogLine {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            logged_at: Utc::now(),
            message: message.into(),
        }
    }
}

/// Bounded ring buffer of dashboard log lines.
///
/// Appends past capacity evict the oldest line first (strict append-order
/// FIFO); the buffer never grows unbounded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct JobLogLines {
    lines: VecDeque<LogLine>,
}

impl JobLogLines {
    /// Appends a line, evicting from the front when `capacity` is exceeded.
    /// Returns `true` if an eviction happened.
    pub fn append(&mut self, line: LogLine, capacity: usize) -> bool {
        self.lines.push_back(line);
        let mut overflowed = false;
        while self.lines.len() > capacity {
            self.lines.pop_front();
            overflowed = true;
        }
        overflowed
    }

    pub fn lines(&self) -> impl Iterator<Item = &LogLine> {
        self.lines.iter()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Checks whether any line matches the given level and message.
    pub fn contains(&self, level: LogLevel, message: &str) -> bool {
        self.lines
            .iter()
            .any(|l| l.level == level && l.message == message)
    }
}

/// A value stored in a job's metadata map.
///
/// Keys are namespaced by convention: dashboard log lines live under
/// [`DASHBOARD_LOG_KEY`], free-form annotations under caller-chosen keys, so
/// concurrent writers never collide on a key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Text(String),
    LogLines(JobLogLines),
}

/// Appends a dashboard log line to a metadata map.
///
/// Pure: returns the updated map and whether the bounded buffer overflowed
/// (oldest lines evicted). The input map is left untouched.
pub fn append_log_line(
    metadata: &HashMap<String, MetadataValue>,
    line: LogLine,
    capacity: usize,
) -> (HashMap<String, MetadataValue>, bool) {
    let mut updated = metadata.clone();
    let entry = updated
        .entry(DASHBOARD_LOG_KEY.to_string())
        .or_insert_with(|| MetadataValue::LogLines(JobLogLines::default()));

    let overflowed = match entry {
        MetadataValue::LogLines(log_lines) => log_lines.append(line, capacity),
        // A foreign value under the log key is replaced by a fresh buffer.
        other => {
            let mut log_lines = JobLogLines::default();
            let overflowed = log_lines.append(line, capacity);
            *other = MetadataValue::LogLines(log_lines);
            overflowed
        }
    };

    (updated, overflowed)
}

/// The target and arguments of a job. Immutable after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDetails {
    /// The method name to execute; must match a registered worker.
    pub method: String,
    /// String-serialized arguments passed to the worker.
    pub arguments: Vec<String>,
}

impl JobDetails {
    pub fn new(method: impl Into<String>, arguments: Vec<String>) -> Self {
        Self {
            method: method.into(),
            arguments,
        }
    }
}

/// One entry in a job's append-only state history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateHistoryEntry {
    pub state: JobState,
    pub at: DateTime<Utc>,
    pub reason: Option<String>,
}

/// Represents a background job with all information for execution and display.
///
/// ## Fields
///
/// - **`id`**: unique identifier, immutable after creation
/// - **`details`**: the work to perform (method + arguments), immutable
/// - **`state`** / **`history`**: current lifecycle state and the append-only
///   ordered record of every transition
/// - **`scheduled_at`**: instant before which the job must not run
/// - **`retries`**: prior failed attempts, incremented by the server only
/// - **`recurring_job_id`**: back-reference to the recurring definition that
///   produced this instance, if any
/// - **`metadata`**: dashboard log lines and free-form annotations
/// - **`version`**: optimistic-concurrency token, bumped by storage on every
///   successful save
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub details: JobDetails,
    pub created_at: DateTime<Utc>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub state: JobState,
    pub history: Vec<StateHistoryEntry>,
    pub retries: u32,
    pub recurring_job_id: Option<String>,
    pub metadata: HashMap<String, MetadataValue>,
    pub version: u64,
}

impl Job {
    /// Creates an immediate job; initial state is `Enqueued`.
    pub fn new(details: JobDetails) -> Self {
        Self::build(Uuid::new_v4().to_string(), details, None)
    }

    /// Creates a job that must not run before `run_at`.
    ///
    /// The initial state is `Scheduled` when `run_at` is in the future and
    /// `Enqueued` when it already passed.
    pub fn scheduled(details: JobDetails, run_at: DateTime<Utc>) -> Self {
        Self::build(Uuid::new_v4().to_string(), details, Some(run_at))
    }

    /// Creates a job with a caller-chosen id. Used by recurring expansion,
    /// where the id is deterministic in the occurrence.
    pub fn with_id(
        id: impl Into<String>,
        details: JobDetails,
        run_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self::build(id.into(), details, run_at)
    }

    fn build(id: String, details: JobDetails, scheduled_at: Option<DateTime<Utc>>) -> Self {
        let now = Utc::now();
        let state = match scheduled_at {
            Some(at) if at > now => JobState::Scheduled,
            _ => JobState::Enqueued,
        };

        Self {
            id,
            details,
            created_at: now,
            scheduled_at,
            state,
            history: vec![StateHistoryEntry {
                state,
                at: now,
                reason: None,
            }],
            retries: 0,
            recurring_job_id: None,
            metadata: HashMap::new(),
            version: 0,
        }
    }

    /// Transitions the job to `to`, recording `reason` in the history.
    ///
    /// Legality is decided by the shared transition table; on rejection the
    /// job is left untouched and [`JobqError::InvalidStateTransition`] is
    /// returned.
    pub fn transition_to(&mut self, to: JobState, reason: Option<String>) -> Result<()> {
        if !self.state.can_transition_to(to) {
            return Err(JobqError::InvalidStateTransition {
                from: self.state.name().to_string(),
                to: to.name().to_string(),
            });
        }

        self.state = to;
        self.history.push(StateHistoryEntry {
            state: to,
            at: Utc::now(),
            reason,
        });
        Ok(())
    }

    /// When the job entered its current state.
    pub fn state_changed_at(&self) -> DateTime<Utc> {
        self.history.last().map(|e| e.at).unwrap_or(self.created_at)
    }

    /// Adds a free-form text annotation to the job's metadata.
    pub fn add_metadata(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata
            .insert(key.into(), MetadataValue::Text(value.into()));
    }

    /// The job's dashboard log buffer, if any lines were emitted.
    pub fn dashboard_log(&self) -> Option<&JobLogLines> {
        match self.metadata.get(DASHBOARD_LOG_KEY) {
            Some(MetadataValue::LogLines(lines)) => Some(lines),
            _ => None,
        }
    }

    /// Serializes the job to JSON for storage.
    pub fn serialize(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| JobqError::SerializationError {
            message: format!("failed to serialize job: {}", e),
        })
    }

    /// Deserializes a job from its JSON storage form.
    pub fn deserialize(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| JobqError::SerializationError {
            message: format!("failed to deserialize job: {}", e),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn details() -> JobDetails {
        JobDetails::new("send_email", vec!["user@example.com".to_string()])
    }

    #[test]
    fn new_job_starts_enqueued() {
        let job = Job::new(details());

        assert!(!job.id.is_empty());
        assert_eq!(job.state, JobState::Enqueued);
        assert_eq!(job.scheduled_at, None);
        assert_eq!(job.retries, 0);
        assert_eq!(job.version, 0);
        assert_eq!(job.history.len(), 1);
        assert_eq!(job.history[0].state, JobState::Enqueued);
    }

    #[test]
    fn future_job_starts_scheduled() {
        let run_at = Utc::now() + Duration::hours(1);
        let job = Job::scheduled(details(), run_at);

        assert_eq!(job.state, JobState::Scheduled);
        assert_eq!(job.scheduled_at, Some(run_at));
    }

    #[test]
    fn past_scheduled_job_starts_enqueued() {
        let job = Job::scheduled(details(), Utc::now() - Duration::seconds(5));
        assert_eq!(job.state, JobState::Enqueued);
    }

    #[test]
    fn transition_appends_history() {
        let mut job = Job::new(details());

        job.transition_to(JobState::Processing, None).unwrap();
        job.transition_to(JobState::Succeeded, Some("done".to_string()))
            .unwrap();

        assert_eq!(job.state, JobState::Succeeded);
        assert_eq!(job.history.len(), 3);
        assert_eq!(job.history[1].state, JobState::Processing);
        assert_eq!(job.history[2].state, JobState::Succeeded);
        assert_eq!(job.history[2].reason.as_deref(), Some("done"));
    }

    #[test]
    fn illegal_transition_is_rejected_and_mutates_nothing() {
        let mut job = Job::new(details());

        let err = job
            .transition_to(JobState::Succeeded, None)
            .expect_err("Enqueued -> Succeeded must be rejected");
        assert!(matches!(err, JobqError::InvalidStateTransition { .. }));
        assert_eq!(job.state, JobState::Enqueued);
        assert_eq!(job.history.len(), 1);
    }

    #[test]
    fn serialization_round_trip() {
        let mut job = Job::new(details());
        job.add_metadata("source", "api");
        job.transition_to(JobState::Processing, None).unwrap();

        let json = job.serialize().unwrap();
        let restored = Job::deserialize(&json).unwrap();

        assert_eq!(job, restored);
    }

    #[test]
    fn append_log_line_is_pure_and_bounded() {
        let metadata = HashMap::new();

        let (updated, overflowed) =
            append_log_line(&metadata, LogLine::new(LogLevel::Info, "first"), 2);
        assert!(!overflowed);
        assert!(metadata.is_empty(), "input map must not be touched");

        let (updated, overflowed) =
            append_log_line(&updated, LogLine::new(LogLevel::Info, "second"), 2);
        assert!(!overflowed);

        let (updated, overflowed) =
            append_log_line(&updated, LogLine::new(LogLevel::Warn, "third"), 2);
        assert!(overflowed, "third append past capacity 2 must evict");

        let lines = match updated.get(DASHBOARD_LOG_KEY) {
            Some(MetadataValue::LogLines(lines)) => lines,
            other => panic!("expected log lines, got {:?}", other),
        };
        assert_eq!(lines.len(), 2);
        // FIFO eviction: "first" is gone, order preserved.
        let messages: Vec<&str> = lines.lines().map(|l| l.message.as_str()).collect();
        assert_eq!(messages, vec!["second", "third"]);
    }

    #[test]
    fn dashboard_log_accessor() {
        let mut job = Job::new(details());
        assert!(job.dashboard_log().is_none());

        let (metadata, _) = append_log_line(
            &job.metadata,
            LogLine::new(LogLevel::Info, "hello"),
            DEFAULT_LOG_BUFFER_CAPACITY,
        );
        job.metadata = metadata;

        let log = job.dashboard_log().unwrap();
        assert!(log.contains(LogLevel::Info, "hello"));
        assert!(!log.contains(LogLevel::Warn, "hello"));
    }
}
