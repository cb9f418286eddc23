//! Per-execution diagnostic context.
//!
//! Binds the job currently executing on a worker to that worker's task of
//! control, so any diagnostic call made by the job's own code is attributed
//! to the right job even though many jobs run concurrently.

pub mod job_logger;

pub use job_logger::{
    bind_job, current_job, format_message, DiagnosticSink, JobDashboardLogger, SharedJob,
    TracingSink,
};
