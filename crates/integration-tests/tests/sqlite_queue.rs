//! Job queue semantics against the SQLite store

use std::collections::HashSet;
use std::sync::Arc;

use recall_core::application::{JobQueue, JobQueueConfig, NotificationBus};
use recall_core::domain::{Completion, JobStatus, MessageType, ProgressUpdate};
use recall_core::port::id_provider::UuidProvider;
use recall_core::port::time_provider::mocks::ManualTimeProvider;
use recall_core::port::time_provider::SystemTimeProvider;
use recall_core::AppError;
use recall_infra_sqlite::{create_pool, run_migrations, SqliteJobStore};
use serde_json::json;

async fn sqlite_queue() -> Arc<JobQueue> {
    let pool = create_pool(":memory:").await.unwrap();
    run_migrations(&pool).await.unwrap();
    Arc::new(JobQueue::new(
        Arc::new(SqliteJobStore::new(pool)),
        NotificationBus::new(),
        Arc::new(UuidProvider),
        Arc::new(SystemTimeProvider),
    ))
}

#[tokio::test]
async fn test_job_is_claimed_exactly_once() {
    let queue = sqlite_queue().await;
    let id = queue.enqueue("echo", json!({"text": "once"})).await.unwrap();

    let claimed = queue.claim_next_pending().await.unwrap().unwrap();
    assert_eq!(claimed.id, id);
    assert_eq!(claimed.status, JobStatus::Processing);
    assert!(queue.claim_next_pending().await.unwrap().is_none());
}

#[tokio::test]
async fn test_concurrent_claims_split_the_queue() {
    let queue = sqlite_queue().await;
    let mut ids = HashSet::new();
    for i in 0..20 {
        ids.insert(queue.enqueue("echo", json!({ "n": i })).await.unwrap());
    }

    let mut handles = Vec::new();
    for _ in 0..4 {
        let queue = queue.clone();
        handles.push(tokio::spawn(async move {
            let mut claimed = Vec::new();
            while let Some(job) = queue.claim_next_pending().await.unwrap() {
                claimed.push(job.id);
            }
            claimed
        }));
    }

    let mut seen = HashSet::new();
    for handle in handles {
        for id in handle.await.unwrap() {
            assert!(seen.insert(id), "job claimed twice");
        }
    }
    assert_eq!(seen, ids);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_claims_across_separate_connections_never_duplicate() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("jobs.db").display());

    let first = create_pool(&url).await.unwrap();
    run_migrations(&first).await.unwrap();
    let second = create_pool(&url).await.unwrap();

    // Two queues, each with its own pool: two contexts sharing one database
    let queues: Vec<Arc<JobQueue>> = [first, second]
        .into_iter()
        .map(|pool| {
            Arc::new(JobQueue::new(
                Arc::new(SqliteJobStore::new(pool)),
                NotificationBus::new(),
                Arc::new(UuidProvider),
                Arc::new(SystemTimeProvider),
            ))
        })
        .collect();

    let mut ids = HashSet::new();
    for i in 0..60 {
        let queue = &queues[i % 2];
        ids.insert(queue.enqueue("echo", json!({ "n": i })).await.unwrap());
    }

    let mut handles = Vec::new();
    for i in 0..4 {
        let queue = queues[i % 2].clone();
        handles.push(tokio::spawn(async move {
            let mut claimed = Vec::new();
            while let Some(job) = queue.claim_next_pending().await.unwrap() {
                claimed.push(job.id);
            }
            claimed
        }));
    }

    let mut seen = HashSet::new();
    for handle in handles {
        for id in handle.await.unwrap() {
            assert!(seen.insert(id), "job claimed twice");
        }
    }
    assert_eq!(seen, ids);
}

#[tokio::test]
async fn test_claims_follow_creation_order() {
    let queue = sqlite_queue().await;
    let first = queue.enqueue("echo", json!({"n": 1})).await.unwrap();
    let second = queue.enqueue("echo", json!({"n": 2})).await.unwrap();

    assert_eq!(queue.claim_next_pending().await.unwrap().unwrap().id, first);
    assert_eq!(queue.claim_next_pending().await.unwrap().unwrap().id, second);
}

#[tokio::test]
async fn test_progress_never_goes_backwards() {
    let queue = sqlite_queue().await;
    let id = queue.enqueue("echo", json!({})).await.unwrap();
    queue.claim_next_pending().await.unwrap();

    queue
        .update_progress(&id, ProgressUpdate::new("Embedding", 60))
        .await
        .unwrap();
    let job = queue
        .update_progress(&id, ProgressUpdate::new("Late report", 30))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(job.progress, 60);
    assert_eq!(job.stage.as_deref(), Some("Late report"));
}

#[tokio::test]
async fn test_terminal_jobs_ignore_late_writes() {
    let queue = sqlite_queue().await;
    let id = queue.enqueue("echo", json!({})).await.unwrap();
    queue.claim_next_pending().await.unwrap();

    let done = queue
        .complete(&id, Completion::success(Some(json!({"ok": true}))))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.progress, 100);

    assert!(queue
        .update_progress(&id, ProgressUpdate::new("ghost", 10))
        .await
        .unwrap()
        .is_none());
    assert!(queue
        .complete(&id, Completion::failure("too late"))
        .await
        .unwrap()
        .is_none());

    let job = queue.get(&id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.result, Some(json!({"ok": true})));
}

#[tokio::test]
async fn test_completing_unclaimed_job_is_rejected() {
    let queue = sqlite_queue().await;
    let id = queue.enqueue("echo", json!({})).await.unwrap();

    let err = queue.complete(&id, Completion::success(None)).await.unwrap_err();
    assert!(matches!(err, AppError::Domain(_)));

    let err = queue
        .update_progress(&"missing".to_string(), ProgressUpdate::new("x", 1))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn test_stale_processing_job_reads_as_failed() {
    let pool = create_pool(":memory:").await.unwrap();
    run_migrations(&pool).await.unwrap();
    let clock = Arc::new(ManualTimeProvider::new(1_000_000));
    let queue = JobQueue::new(
        Arc::new(SqliteJobStore::new(pool)),
        NotificationBus::new(),
        Arc::new(UuidProvider),
        clock.clone(),
    )
    .with_config(JobQueueConfig::default().with_stale_after_ms(60_000));

    let id = queue.enqueue("embedding", json!({"text": "x"})).await.unwrap();
    queue.claim_next_pending().await.unwrap();

    clock.advance(30_000);
    let job = queue.get(&id).await.unwrap().unwrap();
    assert_eq!(queue.effective_status(&job), JobStatus::Processing);

    clock.advance(31_000);
    let job = queue.get(&id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Processing);
    assert_eq!(queue.effective_status(&job), JobStatus::Failed);

    let mut completed = queue.bus().subscribe_channel(MessageType::JobCompleted);
    assert_eq!(queue.fail_stale_jobs().await.unwrap(), 1);
    assert_eq!(completed.recv().await.unwrap().job_id.as_deref(), Some(id.as_str()));

    let job = queue.get(&id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error.as_deref(), Some("worker timed out"));
}

#[tokio::test]
async fn test_clear_completed_keeps_live_jobs() {
    let queue = sqlite_queue().await;
    let done = queue.enqueue("echo", json!({})).await.unwrap();
    let pending = queue.enqueue("echo", json!({})).await.unwrap();
    queue.claim_next_pending().await.unwrap();
    queue.complete(&done, Completion::success(None)).await.unwrap();

    assert_eq!(queue.clear_completed().await.unwrap(), 1);
    let remaining: Vec<_> = queue.get_all().await.unwrap().into_iter().map(|j| j.id).collect();
    assert_eq!(remaining, vec![pending]);

    println!("✅ clear_completed removed only finished jobs");
}
