use crate::error::JobqError;
use thiserror::Error;

/// Storage-specific errors that can occur during job persistence operations
#[derive(Error, Debug)]
pub enum StorageError {
    /// Job not found in storage
    #[error("Job not found: {job_id}")]
    JobNotFound { job_id: String },

    /// Optimistic-lock loss: the stored version differs from the version the
    /// caller last read. Recoverable: re-read and retry the decision, or
    /// abandon it.
    #[error("Concurrent modification detected for job: {job_id}")]
    ConcurrentModification { job_id: String },

    /// Attempted write would violate the job state machine
    #[error("Invalid state transition: {from} -> {to}")]
    IllegalTransition { from: String, to: String },

    /// Backend unreachable; the poll cycle logs, backs off, and retries
    #[error("Storage is unavailable: {reason}")]
    Unavailable { reason: String },

    /// Serialization errors when converting jobs to/from storage format
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// Storage capacity exceeded
    #[error("Storage capacity exceeded: {message}")]
    CapacityExceeded { message: String },

    /// Storage configuration errors
    #[error("Storage configuration error: {message}")]
    Configuration { message: String },

    /// General storage operation errors
    #[error("Storage operation failed: {operation} - {message}")]
    OperationFailed { operation: String, message: String },
}

impl StorageError {
    /// Create a job not found error
    pub fn job_not_found<S: Into<String>>(job_id: S) -> Self {
        Self::JobNotFound {
            job_id: job_id.into(),
        }
    }

    /// Create a concurrent modification error
    pub fn concurrent_modification<S: Into<String>>(job_id: S) -> Self {
        Self::ConcurrentModification {
            job_id: job_id.into(),
        }
    }

    /// Create an unavailable error
    pub fn unavailable<S: Into<String>>(reason: S) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization<S: Into<String>>(message: S) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Create a capacity exceeded error
    pub fn capacity_exceeded<S: Into<String>>(message: S) -> Self {
        Self::CapacityExceeded {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an operation failed error
    pub fn operation_failed<S: Into<String>, T: Into<String>>(operation: S, message: T) -> Self {
        Self::OperationFailed {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Losing an optimistic-lock race is an expected outcome, not a fault.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StorageError::ConcurrentModification { .. })
    }
}

// Convert StorageError to JobqError for unified error handling
impl From<StorageError> for JobqError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::JobNotFound { job_id } => JobqError::JobNotFound { job_id },
            StorageError::Serialization { message } => JobqError::SerializationError { message },
            StorageError::IllegalTransition { from, to } => {
                JobqError::InvalidStateTransition { from, to }
            }
            _ => JobqError::StorageError {
                message: err.to_string(),
            },
        }
    }
}
