//! Job processor for executing individual jobs
//!
//! The processor owns the execution lifecycle of one claimed job: it binds
//! the job to the executing task for diagnostic attribution, runs the worker
//! body under the execution timeout while heartbeating, then applies the
//! outcome through the retry policy and persists it.

use chrono::{Duration, Utc};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::{retry::RetryPolicy, WorkerContext, WorkerRegistry, WorkerResult};
use crate::core::{Job, JobState};
use crate::diagnostics::{bind_job, JobDashboardLogger, SharedJob};
use crate::error::{JobqError, Result};
use crate::storage::Storage;

/// Per-execution settings, derived from the server configuration
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Name of the server this processor runs on
    pub server_name: String,
    /// Maximum wall-clock time for one execution
    pub execution_timeout: Duration,
    /// How often to refresh the liveness heartbeat while executing
    pub heartbeat_interval: Duration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            server_name: "jobq-server".to_string(),
            execution_timeout: Duration::minutes(5),
            heartbeat_interval: Duration::seconds(100),
        }
    }
}

/// Aborts the heartbeat task when dropped, so the heartbeat cannot outlive
/// the execution it vouches for even when the execution task itself is
/// aborted mid-await (as pool shutdown does past the grace period).
struct HeartbeatGuard(JoinHandle<()>);

impl Drop for HeartbeatGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Executes claimed jobs and manages their state transitions
pub struct JobProcessor {
    registry: Arc<WorkerRegistry>,
    storage: Arc<dyn Storage>,
    retry_policy: RetryPolicy,
    config: ProcessorConfig,
    logger: Arc<JobDashboardLogger>,
}

impl JobProcessor {
    pub fn new(
        registry: Arc<WorkerRegistry>,
        storage: Arc<dyn Storage>,
        retry_policy: RetryPolicy,
        config: ProcessorConfig,
        logger: Arc<JobDashboardLogger>,
    ) -> Self {
        Self {
            registry,
            storage,
            retry_policy,
            config,
            logger,
        }
    }

    /// Process one job that was already claimed into `Processing`.
    ///
    /// Ok means the outcome was decided and persisted (or deliberately
    /// abandoned after losing a save race); Err means the outcome could not
    /// be recorded at all.
    pub async fn process(&self, job: Job) -> Result<()> {
        let job_id = job.id.clone();
        let method = job.details.method.clone();
        debug!(job_id = %job_id, method = %method, "starting job execution");

        let attempt = job.retries + 1;
        let previous_error = job
            .history
            .iter()
            .rev()
            .find(|e| e.state == JobState::Failed)
            .and_then(|e| e.reason.clone());

        let Some(worker) = self.registry.get_worker(&method) else {
            warn!(job_id = %job_id, method = %method, "no worker registered for method");
            return self
                .handle_failure(job, format!("no worker registered for method: {}", method))
                .await;
        };

        let context = WorkerContext::new(
            self.config.server_name.clone(),
            attempt,
            previous_error,
            self.logger.clone(),
        );

        // The worker body sees a read snapshot; diagnostic lines land on the
        // shared instance via the task-local binding.
        let shared: SharedJob = Arc::new(Mutex::new(job));
        let snapshot = shared.lock().unwrap().clone();
        let heartbeat = self.spawn_heartbeat(job_id.clone());

        let execution_timeout = self
            .config
            .execution_timeout
            .to_std()
            .unwrap_or(std::time::Duration::from_secs(300));
        let outcome = bind_job(shared.clone(), async {
            timeout(execution_timeout, worker.execute(&snapshot, &context)).await
        })
        .await;

        drop(heartbeat);

        // Recover the job with any metadata the execution appended.
        let job = match Arc::try_unwrap(shared) {
            Ok(mutex) => mutex.into_inner().unwrap(),
            Err(shared) => shared.lock().unwrap().clone(),
        };

        match outcome {
            Ok(Ok(WorkerResult::Success { result })) => self.complete(job, result).await,
            Ok(Ok(WorkerResult::Failure { error })) => {
                warn!(job_id = %job_id, error = %error, "job reported failure");
                self.handle_failure(job, error).await
            }
            Ok(Err(e)) => {
                warn!(job_id = %job_id, error = %e, "job execution errored");
                self.handle_failure(job, e.to_string()).await
            }
            Err(_) => {
                let timed_out = JobqError::TimeoutError {
                    operation: format!(
                        "job execution after {}s",
                        self.config.execution_timeout.num_seconds()
                    ),
                };
                warn!(job_id = %job_id, error = %timed_out, "job execution timed out");
                self.handle_failure(job, timed_out.to_string()).await
            }
        }
    }

    async fn complete(&self, mut job: Job, result: Option<String>) -> Result<()> {
        job.transition_to(JobState::Succeeded, result)?;
        info!(job_id = %job.id, "job succeeded");
        self.save_or_abandon(&job).await
    }

    /// Apply the retry policy to a failed execution: reschedule while retries
    /// remain, otherwise fail terminally and retire the job.
    async fn handle_failure(&self, mut job: Job, error: String) -> Result<()> {
        let next_attempt = job.retries + 1;

        if self.retry_policy.should_retry(next_attempt) {
            let retry_at = self
                .retry_policy
                .calculate_retry_time(next_attempt)
                .unwrap_or_else(|| Utc::now() + Duration::seconds(60));

            job.transition_to(JobState::Failed, Some(error))?;
            job.transition_to(
                JobState::Scheduled,
                Some(format!("retry #{}", next_attempt)),
            )?;
            job.scheduled_at = Some(retry_at);
            job.retries = next_attempt;

            info!(
                job_id = %job.id,
                attempt = next_attempt,
                retry_at = %retry_at,
                "job failed, retry scheduled"
            );
            self.save_or_abandon(&job).await
        } else {
            job.transition_to(JobState::Failed, Some(error.clone()))?;
            job.transition_to(
                JobState::Deleted,
                Some(format!("retry limit exceeded: {}", error)),
            )?;

            error!(job_id = %job.id, retries = job.retries, "job failed permanently");
            self.save_or_abandon(&job).await
        }
    }

    /// Persist the decided outcome. Losing the optimistic-lock race means
    /// someone else (stalled recovery, a dashboard action) already moved the
    /// job on; the outcome is abandoned rather than forced.
    async fn save_or_abandon(&self, job: &Job) -> Result<()> {
        match self.storage.save(job).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_conflict() => {
                warn!(
                    job_id = %job.id,
                    "job changed concurrently during execution, abandoning outcome"
                );
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn spawn_heartbeat(&self, job_id: String) -> HeartbeatGuard {
        let storage = self.storage.clone();
        let every = self
            .config
            .heartbeat_interval
            .to_std()
            .unwrap_or(std::time::Duration::from_secs(100));

        HeartbeatGuard(tokio::spawn(async move {
            let mut ticks = tokio::time::interval(every);
            loop {
                ticks.tick().await;
                if let Err(e) = storage.heartbeat(&job_id).await {
                    debug!(job_id = %job_id, error = %e, "heartbeat refresh failed");
                }
            }
        }))
    }
}
