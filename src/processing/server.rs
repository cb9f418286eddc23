//! Background job server
//!
//! One control loop per server instance drives the whole engine: recover
//! stalled jobs, promote due scheduled jobs, dispatch enqueued jobs to the
//! worker pool, retire old succeeded jobs, expand recurring definitions,
//! then sleep until the next poll or an external wake.

use chrono::{Duration, Utc};
use std::cmp;
use std::sync::Arc;
use tokio::sync::{Notify, RwLock};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use super::{
    processor::{JobProcessor, ProcessorConfig},
    retry::RetryPolicy,
    scheduler::JobScheduler,
    worker_pool::WorkerPool,
    WorkerRegistry,
};
use crate::core::{Job, JobState, LogLevel, RecurringJobDefinition, DEFAULT_LOG_BUFFER_CAPACITY};
use crate::diagnostics::JobDashboardLogger;
use crate::error::{JobqError, Result};
use crate::storage::Storage;

/// Configuration for the background job server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Server name identifier
    pub server_name: String,
    /// Maximum number of concurrent job executions
    pub worker_count: usize,
    /// Polling interval of the control loop
    pub poll_interval: Duration,
    /// Maximum number of jobs claimed per poll cycle
    pub batch_size: usize,
    /// Timeout for a single job execution
    pub execution_timeout: Duration,
    /// A `Processing` job without a heartbeat for this long is stalled
    pub stalled_deadline: Duration,
    /// How long shutdown waits for in-flight executions
    pub shutdown_grace: Duration,
    /// Succeeded jobs older than this are retired to `Deleted`
    pub retention_age: Duration,
    /// Retry policy applied to failed executions
    pub retry_policy: RetryPolicy,
    /// Minimum level at which diagnostic lines reach the job's dashboard log
    pub log_threshold: LogLevel,
    /// Capacity of the per-job dashboard log buffer
    pub log_buffer_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_name: "jobq-server".to_string(),
            worker_count: 5,
            poll_interval: Duration::seconds(5),
            batch_size: 10,
            execution_timeout: Duration::minutes(5),
            stalled_deadline: Duration::minutes(5),
            shutdown_grace: Duration::seconds(10),
            retention_age: Duration::hours(36),
            retry_policy: RetryPolicy::default(),
            log_threshold: LogLevel::Info,
            log_buffer_capacity: DEFAULT_LOG_BUFFER_CAPACITY,
        }
    }
}

impl ServerConfig {
    /// Create a new server configuration
    pub fn new(server_name: impl Into<String>) -> Self {
        Self {
            server_name: server_name.into(),
            ..Default::default()
        }
    }

    /// Set the number of concurrent executions
    pub fn worker_count(mut self, count: usize) -> Self {
        self.worker_count = count;
        self
    }

    /// Set the polling interval
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the claim batch size
    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Set the execution timeout
    pub fn execution_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout = timeout;
        self
    }

    /// Set the stalled-job deadline
    pub fn stalled_deadline(mut self, deadline: Duration) -> Self {
        self.stalled_deadline = deadline;
        self
    }

    /// Set the shutdown grace period
    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Set the retention age for succeeded jobs
    pub fn retention_age(mut self, age: Duration) -> Self {
        self.retention_age = age;
        self
    }

    /// Set the retry policy
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Set the dashboard log threshold
    pub fn log_threshold(mut self, threshold: LogLevel) -> Self {
        self.log_threshold = threshold;
        self
    }

    /// Set the dashboard log buffer capacity
    pub fn log_buffer_capacity(mut self, capacity: usize) -> Self {
        self.log_buffer_capacity = capacity;
        self
    }
}

/// Background job server that coordinates scheduling, claiming, and execution
pub struct BackgroundJobServer {
    config: ServerConfig,
    storage: Arc<dyn Storage>,
    processor: Arc<JobProcessor>,
    scheduler: Arc<JobScheduler>,
    pool: Arc<WorkerPool>,
    wake: Arc<Notify>,
    is_running: Arc<RwLock<bool>>,
    control_handle: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl BackgroundJobServer {
    pub fn new(
        config: ServerConfig,
        storage: Arc<dyn Storage>,
        registry: Arc<WorkerRegistry>,
    ) -> Self {
        let logger = Arc::new(
            JobDashboardLogger::default()
                .with_threshold(config.log_threshold)
                .with_buffer_capacity(config.log_buffer_capacity),
        );

        let processor = Arc::new(JobProcessor::new(
            registry,
            storage.clone(),
            config.retry_policy.clone(),
            ProcessorConfig {
                server_name: config.server_name.clone(),
                execution_timeout: config.execution_timeout,
                // Three missed beats before the deadline trips.
                heartbeat_interval: config.stalled_deadline / 3,
            },
            logger,
        ));

        Self {
            scheduler: Arc::new(JobScheduler::new(storage.clone())),
            pool: Arc::new(WorkerPool::new(config.worker_count)),
            processor,
            storage,
            config,
            wake: Arc::new(Notify::new()),
            is_running: Arc::new(RwLock::new(false)),
            control_handle: tokio::sync::Mutex::new(None),
        }
    }

    /// Save a job and wake the control loop so it is picked up without
    /// waiting out the poll interval.
    pub async fn enqueue(&self, job: Job) -> Result<Job> {
        let saved = self.storage.save(&job).await?;
        self.wake.notify_one();
        Ok(saved)
    }

    /// Register a recurring job definition
    pub async fn register_recurring(&self, definition: RecurringJobDefinition) {
        self.scheduler.register_recurring(definition).await;
    }

    /// Start the control loop
    pub async fn start(&self) -> Result<()> {
        let mut is_running = self.is_running.write().await;
        if *is_running {
            return Err(JobqError::ConfigurationError {
                message: "server is already running".to_string(),
            });
        }
        *is_running = true;
        drop(is_running);

        info!(
            server_name = %self.config.server_name,
            worker_count = self.config.worker_count,
            "starting background job server"
        );

        let storage = self.storage.clone();
        let scheduler = self.scheduler.clone();
        let processor = self.processor.clone();
        let pool = self.pool.clone();
        let config = self.config.clone();
        let wake = self.wake.clone();
        let is_running = self.is_running.clone();

        let handle = tokio::spawn(async move {
            let poll = config
                .poll_interval
                .to_std()
                .unwrap_or(std::time::Duration::from_secs(5));

            while *is_running.read().await {
                if let Err(e) =
                    Self::run_cycle(&storage, &scheduler, &processor, &pool, &config).await
                {
                    error!(error = %e, "poll cycle failed, backing off");
                    sleep(std::time::Duration::from_secs(5)).await;
                    continue;
                }

                tokio::select! {
                    _ = sleep(poll) => {}
                    _ = wake.notified() => {}
                }
            }
            debug!("control loop stopped");
        });

        *self.control_handle.lock().await = Some(handle);
        Ok(())
    }

    /// Stop the server: no more claims, then drain the pool within the grace
    /// period. Executions still running afterwards are abandoned to stalled
    /// recovery.
    pub async fn stop(&self) -> Result<()> {
        let mut is_running = self.is_running.write().await;
        if !*is_running {
            return Ok(());
        }
        *is_running = false;
        drop(is_running);

        info!(server_name = %self.config.server_name, "stopping background job server");
        self.wake.notify_one();

        if let Some(handle) = self.control_handle.lock().await.take() {
            let _ = handle.await;
        }
        self.pool.shutdown(self.config.shutdown_grace).await;

        info!(server_name = %self.config.server_name, "background job server stopped");
        Ok(())
    }

    /// Check if the server is running
    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    /// Get server configuration
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    async fn run_cycle(
        storage: &Arc<dyn Storage>,
        scheduler: &Arc<JobScheduler>,
        processor: &Arc<JobProcessor>,
        pool: &Arc<WorkerPool>,
        config: &ServerConfig,
    ) -> Result<()> {
        let now = Utc::now();

        Self::recover_stalled(storage, config).await?;
        scheduler.promote_due(now, config.batch_size).await?;
        Self::dispatch(storage, processor, pool, config).await?;
        Self::retire_succeeded(storage, config).await?;
        scheduler.expand_recurring(now).await?;

        Ok(())
    }

    /// `Processing` jobs whose heartbeat went silent past the deadline are
    /// claimed back to `Enqueued` for re-execution.
    async fn recover_stalled(storage: &Arc<dyn Storage>, config: &ServerConfig) -> Result<()> {
        let deadline = Utc::now() - config.stalled_deadline;
        let stalled = storage.find_stalled(deadline).await?;
        if stalled.is_empty() {
            return Ok(());
        }

        let ids: Vec<String> = stalled.iter().map(|j| j.id.clone()).collect();
        let recovered = storage
            .claim_batch(&ids, JobState::Processing, JobState::Enqueued)
            .await?;
        if !recovered.is_empty() {
            warn!(count = recovered.len(), "recovered stalled jobs");
        }
        Ok(())
    }

    /// Claim enqueued jobs up to the free pool slots and hand them to the
    /// processor. The slot check before claiming is the backpressure that
    /// keeps claimed-but-unstarted work bounded.
    async fn dispatch(
        storage: &Arc<dyn Storage>,
        processor: &Arc<JobProcessor>,
        pool: &Arc<WorkerPool>,
        config: &ServerConfig,
    ) -> Result<()> {
        let slots = pool.available_slots();
        if slots == 0 {
            return Ok(());
        }

        let now = Utc::now();
        let due = storage
            .fetch_due(JobState::Enqueued, now, cmp::min(config.batch_size, slots))
            .await?;
        if due.is_empty() {
            return Ok(());
        }

        let ids: Vec<String> = due.iter().map(|j| j.id.clone()).collect();
        let claimed = storage
            .claim_batch(&ids, JobState::Enqueued, JobState::Processing)
            .await?;
        debug!(count = claimed.len(), "dispatching claimed jobs");

        for job in claimed {
            let processor = processor.clone();
            pool.submit(async move {
                let job_id = job.id.clone();
                if let Err(e) = processor.process(job).await {
                    error!(job_id = %job_id, error = %e, "job outcome could not be recorded");
                }
            })
            .await?;
        }
        Ok(())
    }

    /// Lazy retention: `Succeeded` jobs past the retention age move to
    /// `Deleted`.
    async fn retire_succeeded(storage: &Arc<dyn Storage>, config: &ServerConfig) -> Result<()> {
        let cutoff = Utc::now() - config.retention_age;
        let succeeded = storage.list(Some(JobState::Succeeded), None, None).await?;
        let expired: Vec<String> = succeeded
            .into_iter()
            .filter(|j| j.state_changed_at() < cutoff)
            .map(|j| j.id)
            .collect();
        if expired.is_empty() {
            return Ok(());
        }

        let retired = storage
            .claim_batch(&expired, JobState::Succeeded, JobState::Deleted)
            .await?;
        debug!(count = retired.len(), "retired succeeded jobs past retention");
        Ok(())
    }
}
