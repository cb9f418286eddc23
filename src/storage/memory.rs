use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

use super::{MemoryConfig, Storage, StorageError};
use crate::core::{Job, JobState};

#[derive(Debug, Default)]
struct MemoryState {
    jobs: HashMap<String, Job>,
    heartbeats: HashMap<String, DateTime<Utc>>,
}

/// In-memory storage implementation for jobs.
///
/// The reference backend: all jobs live in one map behind a single mutex, so
/// every operation is trivially atomic per job (and coarser). Intended for
/// development and testing, and as the contract other backends must match.
#[derive(Debug)]
pub struct MemoryStorage {
    state: Mutex<MemoryState>,
    config: MemoryConfig,
}

impl MemoryStorage {
    /// Create a new memory storage with default configuration
    pub fn new() -> Self {
        Self::with_config(MemoryConfig::default())
    }

    /// Create a new memory storage with the specified configuration
    pub fn with_config(config: MemoryConfig) -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            config,
        }
    }

    /// Get the number of jobs currently stored
    pub fn len(&self) -> usize {
        self.state.lock().unwrap().jobs.len()
    }

    /// Check if the storage is empty
    pub fn is_empty(&self) -> bool {
        self.state.lock().unwrap().jobs.is_empty()
    }

    /// Clear all jobs from storage
    pub fn clear(&self) {
        let mut state = self.state.lock().unwrap();
        state.jobs.clear();
        state.heartbeats.clear();
    }

    fn due_sort_key(job: &Job) -> (DateTime<Utc>, String) {
        (job.scheduled_at.unwrap_or(job.created_at), job.id.clone())
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn save(&self, job: &Job) -> Result<Job, StorageError> {
        let mut state = self.state.lock().unwrap();

        match state.jobs.get(&job.id) {
            Some(stored) => {
                if stored.version != job.version {
                    return Err(StorageError::concurrent_modification(job.id.clone()));
                }
            }
            None => {
                if let Some(max_jobs) = self.config.max_jobs {
                    if state.jobs.len() >= max_jobs {
                        return Err(StorageError::capacity_exceeded(format!(
                            "memory storage is at capacity ({} jobs)",
                            state.jobs.len()
                        )));
                    }
                }
            }
        }

        let mut persisted = job.clone();
        persisted.version += 1;
        state.jobs.insert(persisted.id.clone(), persisted.clone());
        if persisted.state != JobState::Processing {
            state.heartbeats.remove(&persisted.id);
        }

        Ok(persisted)
    }

    async fn get(&self, job_id: &str) -> Result<Option<Job>, StorageError> {
        let state = self.state.lock().unwrap();
        Ok(state.jobs.get(job_id).cloned())
    }

    async fn delete(&self, job_id: &str) -> Result<bool, StorageError> {
        let mut state = self.state.lock().unwrap();
        state.heartbeats.remove(job_id);
        Ok(state.jobs.remove(job_id).is_some())
    }

    async fn fetch_due(
        &self,
        state_filter: JobState,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Job>, StorageError> {
        let state = self.state.lock().unwrap();

        let mut due: Vec<Job> = state
            .jobs
            .values()
            .filter(|job| {
                job.state == state_filter
                    && job.scheduled_at.map_or(true, |at| at <= before)
            })
            .cloned()
            .collect();

        // Deterministic order: scheduled_at ascending, then id.
        due.sort_by(|a, b| Self::due_sort_key(a).cmp(&Self::due_sort_key(b)));
        due.truncate(limit);

        Ok(due)
    }

    async fn claim_batch(
        &self,
        job_ids: &[String],
        from_state: JobState,
        to_state: JobState,
    ) -> Result<Vec<Job>, StorageError> {
        if !from_state.can_transition_to(to_state) {
            return Err(StorageError::IllegalTransition {
                from: from_state.name().to_string(),
                to: to_state.name().to_string(),
            });
        }

        let mut state = self.state.lock().unwrap();
        let now = Utc::now();
        let mut claimed = Vec::new();

        for job_id in job_ids {
            let Some(job) = state.jobs.get_mut(job_id) else {
                continue;
            };
            // A concurrent caller already moved this job on; not an error.
            if job.state != from_state {
                continue;
            }

            job.transition_to(to_state, None)
                .map_err(|e| StorageError::operation_failed("claim_batch", e.to_string()))?;
            job.version += 1;
            claimed.push(job.clone());

            if to_state == JobState::Processing {
                state.heartbeats.insert(job_id.clone(), now);
            } else {
                state.heartbeats.remove(job_id);
            }
        }

        Ok(claimed)
    }

    async fn heartbeat(&self, job_id: &str) -> Result<(), StorageError> {
        let mut state = self.state.lock().unwrap();
        if !state.jobs.contains_key(job_id) {
            return Err(StorageError::job_not_found(job_id));
        }
        state.heartbeats.insert(job_id.to_string(), Utc::now());
        Ok(())
    }

    async fn find_stalled(&self, deadline: DateTime<Utc>) -> Result<Vec<Job>, StorageError> {
        let state = self.state.lock().unwrap();

        let mut stalled: Vec<Job> = state
            .jobs
            .values()
            .filter(|job| {
                job.state == JobState::Processing
                    && state
                        .heartbeats
                        .get(&job.id)
                        .map_or(true, |last| *last < deadline)
            })
            .cloned()
            .collect();

        stalled.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(stalled)
    }

    async fn list(
        &self,
        state_filter: Option<JobState>,
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> Result<Vec<Job>, StorageError> {
        let state = self.state.lock().unwrap();

        let mut jobs: Vec<Job> = state
            .jobs
            .values()
            .filter(|job| state_filter.map_or(true, |s| job.state == s))
            .cloned()
            .collect();

        // Newest first, id tie-break for stable pagination.
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));

        let start = offset.unwrap_or(0);
        if start >= jobs.len() {
            return Ok(vec![]);
        }
        let end = limit.map_or(jobs.len(), |l| (start + l).min(jobs.len()));
        Ok(jobs[start..end].to_vec())
    }

    async fn job_counts(&self) -> Result<HashMap<JobState, usize>, StorageError> {
        let state = self.state.lock().unwrap();
        let mut counts = HashMap::new();

        for job in state.jobs.values() {
            *counts.entry(job.state).or_insert(0) += 1;
        }

        Ok(counts)
    }
}
