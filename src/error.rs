//! Error types for jobq.
//!
//! This module provides the crate-wide error enum for job processing
//! operations, using the thiserror crate for ergonomic error handling.

use thiserror::Error;

/// The main error type for jobq operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum JobqError {
    /// Job not found
    #[error("Job not found: {job_id}")]
    JobNotFound { job_id: String },

    /// Serialization/deserialization errors
    #[error("Serialization failed: {message}")]
    SerializationError { message: String },

    /// Storage-related errors
    #[error("Storage error: {message}")]
    StorageError { message: String },

    /// Invalid job state transition. Always a defect in the calling code
    /// path, never silently ignored.
    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    /// Error raised by job target logic. Recoverable via the retry policy.
    #[error("Worker error: {message}")]
    WorkerError { message: String },

    /// Configuration errors. The only class of error that terminates a
    /// server, and only at startup.
    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    /// A bounded wait expired
    #[error("Operation timed out: {operation}")]
    TimeoutError { operation: String },
}

impl From<serde_json::Error> for JobqError {
    fn from(err: serde_json::Error) -> Self {
        JobqError::SerializationError {
            message: err.to_string(),
        }
    }
}

/// A specialized Result type for jobq operations.
pub type Result<T> = std::result::Result<T, JobqError>;
