//! Dashboard logger with task-scoped job binding.
//!
//! [`JobDashboardLogger`] forwards every formatted message to the underlying
//! diagnostic sink (by default `tracing`). When a job is bound to the calling
//! task and the level clears the configured threshold, it also appends the
//! line to that job's metadata log buffer for dashboard display.
//!
//! The binding is a scoped task-local, not ambient global state: it exists
//! exactly for the duration of the future passed to [`bind_job`] and is
//! released on every exit path, including errors and cancellation. Two tasks
//! bound to different jobs can interleave emissions arbitrarily without one
//! job's buffer ever receiving the other's lines.

use std::future::Future;
use std::sync::{Arc, Mutex};

use crate::core::{append_log_line, Job, LogLevel, LogLine, DEFAULT_LOG_BUFFER_CAPACITY};

/// Handle to the job instance owned by the currently executing worker.
///
/// The mutex only serializes the worker's own short metadata writes against
/// reads the processor performs at completion; no other task holds the handle
/// while the execution is in flight.
pub type SharedJob = Arc<Mutex<Job>>;

tokio::task_local! {
    static BOUND_JOB: SharedJob;
}

/// Runs `fut` with `job` bound to the executing task.
///
/// The binding is scoped: when `fut` completes, fails, or is cancelled, the
/// association is gone. Nested binds shadow the outer job for the inner
/// scope, matching exactly-once-per-execution discipline at the call site.
pub async fn bind_job<F: Future>(job: SharedJob, fut: F) -> F::Output {
    BOUND_JOB.scope(job, fut).await
}

/// The job bound to the calling task, or `None` outside any execution.
pub fn current_job() -> Option<SharedJob> {
    BOUND_JOB.try_with(|job| job.clone()).ok()
}

/// An external logging surface the dashboard logger forwards to.
///
/// Emission is best-effort and infallible from the caller's point of view:
/// a sink must never block job execution or propagate its own failures.
pub trait DiagnosticSink: Send + Sync {
    fn emit(&self, level: LogLevel, message: &str);
}

/// Default sink: forwards to the `tracing` subscriber at the matching level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn emit(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Debug => tracing::debug!(target: "jobq::job", "{}", message),
            LogLevel::Info => tracing::info!(target: "jobq::job", "{}", message),
            LogLevel::Warn => tracing::warn!(target: "jobq::job", "{}", message),
            LogLevel::Error => tracing::error!(target: "jobq::job", "{}", message),
        }
    }
}

/// Formats a message template by substituting `{}` placeholders positionally.
///
/// Unmatched placeholders are left literal; surplus arguments are ignored.
pub fn format_message(template: &str, args: &[&str]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    let mut next_arg = 0;

    while let Some(idx) = rest.find("{}") {
        match args.get(next_arg) {
            Some(arg) => {
                out.push_str(&rest[..idx]);
                out.push_str(arg);
                next_arg += 1;
                rest = &rest[idx + 2..];
            }
            None => break,
        }
    }
    out.push_str(rest);
    out
}

/// Logger that attributes emissions to the job bound to the calling task.
pub struct JobDashboardLogger {
    sink: Arc<dyn DiagnosticSink>,
    threshold: LogLevel,
    buffer_capacity: usize,
}

impl Default for JobDashboardLogger {
    fn default() -> Self {
        Self::new(Arc::new(TracingSink))
    }
}

impl JobDashboardLogger {
    /// Logger forwarding to `sink`, appending everything at `Info` and above
    /// to the bound job's dashboard buffer.
    pub fn new(sink: Arc<dyn DiagnosticSink>) -> Self {
        Self {
            sink,
            threshold: LogLevel::Info,
            buffer_capacity: DEFAULT_LOG_BUFFER_CAPACITY,
        }
    }

    /// Only emissions at or above `threshold` reach the job's dashboard
    /// buffer; everything is still forwarded to the sink regardless.
    pub fn with_threshold(mut self, threshold: LogLevel) -> Self {
        self.threshold = threshold;
        self
    }

    /// Capacity of the per-job log-line ring buffer.
    pub fn with_buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity;
        self
    }

    /// Emits at `level`, substituting `args` into `{}` placeholders.
    pub fn log(&self, level: LogLevel, template: &str, args: &[&str]) {
        let message = format_message(template, args);

        // Always forward, bound or not.
        self.sink.emit(level, &message);

        if level < self.threshold {
            return;
        }
        let Some(job) = current_job() else {
            return;
        };

        let mut job = job.lock().unwrap();
        let line = LogLine::new(level, message);
        let (metadata, overflowed) = append_log_line(&job.metadata, line, self.buffer_capacity);
        job.metadata = metadata;
        if overflowed {
            tracing::debug!(job_id = %job.id, "dashboard log buffer overflowed, oldest line evicted");
        }
    }

    pub fn debug(&self, template: &str, args: &[&str]) {
        self.log(LogLevel::Debug, template, args);
    }

    pub fn info(&self, template: &str, args: &[&str]) {
        self.log(LogLevel::Info, template, args);
    }

    pub fn warn(&self, template: &str, args: &[&str]) {
        self.log(LogLevel::Warn, template, args);
    }

    pub fn error(&self, template: &str, args: &[&str]) {
        self.log(LogLevel::Error, template, args);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{JobDetails, LogLevel};
    use std::sync::Mutex as StdMutex;

    /// Records every emission, standing in for an external sink.
    #[derive(Default)]
    struct RecordingSink {
        emissions: StdMutex<Vec<(LogLevel, String)>>,
    }

    impl DiagnosticSink for RecordingSink {
        fn emit(&self, level: LogLevel, message: &str) {
            self.emissions
                .lock()
                .unwrap()
                .push((level, message.to_string()));
        }
    }

    fn shared_job(method: &str) -> SharedJob {
        Arc::new(Mutex::new(Job::new(JobDetails::new(method, vec![]))))
    }

    #[test]
    fn formats_positional_arguments() {
        assert_eq!(
            format_message("simple message {} {} {}", &["hello", "again", "there"]),
            "simple message hello again there"
        );
    }

    #[test]
    fn unmatched_placeholders_stay_literal() {
        assert_eq!(
            format_message("simple message {} {}", &["hello"]),
            "simple message hello {}"
        );
        assert_eq!(format_message("no placeholders", &["extra"]), "no placeholders");
        assert_eq!(format_message("{}", &[]), "{}");
    }

    #[tokio::test]
    async fn logging_without_a_job_only_forwards_to_the_sink() {
        let sink = Arc::new(RecordingSink::default());
        let logger = JobDashboardLogger::new(sink.clone());

        logger.info("simple message", &[]);

        let emissions = sink.emissions.lock().unwrap();
        assert_eq!(emissions.len(), 1);
        assert_eq!(emissions[0], (LogLevel::Info, "simple message".to_string()));
    }

    #[tokio::test]
    async fn logging_with_a_job_appends_to_its_metadata() {
        let sink = Arc::new(RecordingSink::default());
        let logger = JobDashboardLogger::new(sink.clone());
        let job = shared_job("logged");

        bind_job(job.clone(), async {
            logger.info("simple message {} {} {}", &["hello", "again", "there"]);
        })
        .await;

        let job = job.lock().unwrap();
        let log = job.dashboard_log().expect("dashboard log present");
        assert!(log.contains(LogLevel::Info, "simple message hello again there"));

        let emissions = sink.emissions.lock().unwrap();
        assert_eq!(emissions.len(), 1);
        assert_eq!(emissions[0].1, "simple message hello again there");
    }

    #[tokio::test]
    async fn threshold_gates_the_buffer_but_not_the_sink() {
        let sink = Arc::new(RecordingSink::default());
        let logger = JobDashboardLogger::new(sink.clone()).with_threshold(LogLevel::Warn);
        let job = shared_job("thresholded");

        bind_job(job.clone(), async {
            logger.info("below threshold", &[]);
            logger.warn("at threshold", &[]);
            logger.error("above threshold", &[]);
        })
        .await;

        let job = job.lock().unwrap();
        let log = job.dashboard_log().expect("dashboard log present");
        assert!(!log.contains(LogLevel::Info, "below threshold"));
        assert!(log.contains(LogLevel::Warn, "at threshold"));
        assert!(log.contains(LogLevel::Error, "above threshold"));

        // The sink saw all three regardless.
        assert_eq!(sink.emissions.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn binding_is_released_after_the_scope() {
        let job = shared_job("scoped");

        bind_job(job.clone(), async {
            assert!(current_job().is_some());
        })
        .await;

        assert!(current_job().is_none());
    }

    #[tokio::test]
    async fn binding_is_released_when_the_body_errors() {
        let job = shared_job("erroring");

        let result: Result<(), &str> = bind_job(job.clone(), async {
            assert!(current_job().is_some());
            Err("job body failed")
        })
        .await;

        assert!(result.is_err());
        assert!(current_job().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn interleaved_tasks_never_cross_contaminate() {
        let sink = Arc::new(RecordingSink::default());
        let logger = Arc::new(JobDashboardLogger::new(sink).with_buffer_capacity(200));

        let job1 = shared_job("job1");
        let job2 = shared_job("job2");

        let run = |job: SharedJob, label: &'static str, logger: Arc<JobDashboardLogger>| {
            tokio::spawn(bind_job(job, async move {
                for _ in 0..100 {
                    logger.info("info from {}", &[label]);
                    tokio::task::yield_now().await;
                }
            }))
        };

        let t1 = run(job1.clone(), "job1", logger.clone());
        let t2 = run(job2.clone(), "job2", logger.clone());
        t1.await.unwrap();
        t2.await.unwrap();

        for (job, own, other) in [
            (&job1, "info from job1", "info from job2"),
            (&job2, "info from job2", "info from job1"),
        ] {
            let job = job.lock().unwrap();
            let log = job.dashboard_log().expect("dashboard log present");
            let own_count = log
                .lines()
                .filter(|l| l.message == own)
                .count();
            assert_eq!(own_count, 100, "each job keeps exactly its own lines");
            assert!(
                !log.contains(LogLevel::Info, other),
                "no lines leak across bindings"
            );
        }
    }
}
