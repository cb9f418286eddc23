//! Job scheduler for due and recurring jobs
//!
//! Promotion moves `Scheduled` jobs whose time has come into `Enqueued`
//! through the claiming path, so two servers polling the same storage never
//! promote the same job twice. Recurring expansion materializes concrete job
//! instances from registered definitions, at most once per occurrence.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::core::{Job, JobState, RecurringJobDefinition};
use crate::error::Result;
use crate::storage::Storage;

/// Promotes due jobs and expands recurring definitions
pub struct JobScheduler {
    storage: Arc<dyn Storage>,
    definitions: Mutex<Vec<RecurringJobDefinition>>,
    // Per-definition expansion cursor: occurrences at or before it are done.
    cursors: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl JobScheduler {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            definitions: Mutex::new(Vec::new()),
            cursors: Mutex::new(HashMap::new()),
        }
    }

    /// Move `Scheduled` jobs due at `now` into `Enqueued`, at most `batch` of
    /// them, returning the promoted jobs.
    ///
    /// Runs through `claim_batch`, so jobs promoted by a concurrent server in
    /// the same instant are silently excluded rather than double-promoted.
    pub async fn promote_due(&self, now: DateTime<Utc>, batch: usize) -> Result<Vec<Job>> {
        let due = self
            .storage
            .fetch_due(JobState::Scheduled, now, batch)
            .await?;
        if due.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = due.iter().map(|j| j.id.clone()).collect();
        let promoted = self
            .storage
            .claim_batch(&ids, JobState::Scheduled, JobState::Enqueued)
            .await?;

        if !promoted.is_empty() {
            debug!(count = promoted.len(), "promoted due scheduled jobs");
        }
        Ok(promoted)
    }

    /// Register a recurring definition; expansion starts from now.
    pub async fn register_recurring(&self, definition: RecurringJobDefinition) {
        self.register_recurring_from(definition, Utc::now()).await
    }

    /// Register a recurring definition with an explicit expansion cursor.
    ///
    /// Occurrences strictly after `from` will be materialized. Replaying a
    /// cursor another server already expanded is safe: the deterministic
    /// occurrence ids collide on insert and the duplicates are skipped.
    pub async fn register_recurring_from(
        &self,
        definition: RecurringJobDefinition,
        from: DateTime<Utc>,
    ) {
        info!(recurring_job_id = %definition.id, "registered recurring job");
        self.cursors.lock().await.insert(definition.id.clone(), from);
        self.definitions.lock().await.push(definition);
    }

    /// Materialize every occurrence due at `now` across all registered
    /// definitions. Returns the number of jobs actually created.
    pub async fn expand_recurring(&self, now: DateTime<Utc>) -> Result<usize> {
        let definitions = self.definitions.lock().await;
        let mut created = 0;

        for definition in definitions.iter() {
            let mut cursor = self
                .cursors
                .lock()
                .await
                .get(&definition.id)
                .copied()
                .unwrap_or(now);

            while let Some(occurrence) = definition.schedule.next_occurrence(cursor) {
                if occurrence > now {
                    break;
                }

                let job = definition.materialize(occurrence);
                match self.storage.save(&job).await {
                    Ok(_) => {
                        info!(
                            job_id = %job.id,
                            recurring_job_id = %definition.id,
                            "materialized recurring occurrence"
                        );
                        created += 1;
                    }
                    // Another server (or an earlier run of this one) got
                    // there first; the occurrence is already covered.
                    Err(e) if e.is_conflict() => {
                        debug!(job_id = %job.id, "occurrence already materialized, skipping");
                    }
                    Err(e) => return Err(e.into()),
                }
                cursor = occurrence;
            }

            self.cursors
                .lock()
                .await
                .insert(definition.id.clone(), cursor);
        }

        Ok(created)
    }
}
