//! Integration tests for the storage contract, driven against the reference
//! in-memory backend. The properties here are what any backend must provide:
//! version-checked saves, disjoint concurrent claims, and the stalled-job
//! recovery round trip.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Once;

use chrono::{Duration, Utc};
use jobq::{Job, JobDetails, JobState, MemoryStorage, Storage, StorageError};

fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

fn test_job() -> Job {
    Job::new(JobDetails::new("test_method", vec![]))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_claimers_end_up_with_disjoint_sets() {
    init_tracing();
    let storage = Arc::new(MemoryStorage::new());

    let mut ids = Vec::new();
    for _ in 0..20 {
        let job = test_job();
        ids.push(job.id.clone());
        storage.save(&job).await.unwrap();
    }

    // Four claimers race on the full overlapping id set.
    let mut handles = Vec::new();
    for _ in 0..4 {
        let storage = storage.clone();
        let ids = ids.clone();
        handles.push(tokio::spawn(async move {
            storage
                .claim_batch(&ids, JobState::Enqueued, JobState::Processing)
                .await
                .unwrap()
        }));
    }

    let mut seen = HashSet::new();
    let mut total = 0;
    for handle in handles {
        for job in handle.await.unwrap() {
            assert!(seen.insert(job.id.clone()), "job {} claimed twice", job.id);
            assert_eq!(job.state, JobState::Processing);
            total += 1;
        }
    }

    // Every job was claimed exactly once across all claimers.
    assert_eq!(total, 20);
    assert_eq!(seen, ids.into_iter().collect::<HashSet<_>>());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_saves_of_the_same_version_have_one_winner() {
    init_tracing();
    let storage = Arc::new(MemoryStorage::new());
    let saved = storage.save(&test_job()).await.unwrap();

    let mut handles = Vec::new();
    for i in 0..5 {
        let storage = storage.clone();
        let mut job = saved.clone();
        handles.push(tokio::spawn(async move {
            job.add_metadata("writer", i.to_string());
            storage.save(&job).await
        }));
    }

    let mut wins = 0;
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => wins += 1,
            Err(e) if e.is_conflict() => conflicts += 1,
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    assert_eq!(wins, 1);
    assert_eq!(conflicts, 4);

    let stored = storage.get(&saved.id).await.unwrap().unwrap();
    assert_eq!(stored.version, 2);
}

#[tokio::test]
async fn stalled_job_recovery_round_trip() {
    init_tracing();
    let storage = MemoryStorage::new();
    let job = test_job();
    storage.save(&job).await.unwrap();

    // A server claims the job and then dies without heartbeating.
    storage
        .claim_batch(&[job.id.clone()], JobState::Enqueued, JobState::Processing)
        .await
        .unwrap();

    // Past the deadline the job surfaces as stalled.
    let stalled = storage
        .find_stalled(Utc::now() + Duration::seconds(1))
        .await
        .unwrap();
    assert_eq!(stalled.len(), 1);

    // Recovery puts it back in line, and it is claimable again.
    let recovered = storage
        .claim_batch(&[job.id.clone()], JobState::Processing, JobState::Enqueued)
        .await
        .unwrap();
    assert_eq!(recovered.len(), 1);
    assert_eq!(recovered[0].state, JobState::Enqueued);

    let reclaimed = storage
        .claim_batch(&[job.id.clone()], JobState::Enqueued, JobState::Processing)
        .await
        .unwrap();
    assert_eq!(reclaimed.len(), 1);

    // The full trajectory is in the history.
    let states: Vec<JobState> = reclaimed[0].history.iter().map(|e| e.state).collect();
    assert_eq!(
        states,
        vec![
            JobState::Enqueued,
            JobState::Processing,
            JobState::Enqueued,
            JobState::Processing
        ]
    );
}

#[tokio::test]
async fn claim_batch_refuses_transitions_outside_the_table() {
    init_tracing();
    let storage = MemoryStorage::new();
    let job = test_job();
    storage.save(&job).await.unwrap();

    let result = storage
        .claim_batch(&[job.id.clone()], JobState::Scheduled, JobState::Processing)
        .await;
    assert!(matches!(
        result.unwrap_err(),
        StorageError::IllegalTransition { .. }
    ));

    // The job was not touched by the rejected claim.
    let stored = storage.get(&job.id).await.unwrap().unwrap();
    assert_eq!(stored.state, JobState::Enqueued);
    assert_eq!(stored.version, 1);
}

#[tokio::test]
async fn history_and_metadata_survive_the_save_read_cycle() {
    init_tracing();
    let storage = MemoryStorage::new();

    let mut job = test_job();
    job.add_metadata("source", "api");
    let saved = storage.save(&job).await.unwrap();

    let mut claimed = storage
        .claim_batch(&[saved.id.clone()], JobState::Enqueued, JobState::Processing)
        .await
        .unwrap()
        .remove(0);
    claimed
        .transition_to(JobState::Succeeded, Some("42 rows".to_string()))
        .unwrap();
    storage.save(&claimed).await.unwrap();

    let stored = storage.get(&job.id).await.unwrap().unwrap();
    assert_eq!(stored.state, JobState::Succeeded);
    assert_eq!(stored.history.len(), 3);
    assert_eq!(
        stored.history.last().unwrap().reason.as_deref(),
        Some("42 rows")
    );
    assert!(stored.metadata.contains_key("source"));
}
