//! Execute-and-observe API over a live worker and the SQLite store

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use recall_core::application::{
    default_registry, ExecuteOptions, Execution, JobExecutor, JobQueue, NotificationBus,
    OffscreenController, ProcessorLauncher,
};
use recall_core::domain::{Dispatch, JobStatus};
use recall_core::port::id_provider::UuidProvider;
use recall_core::port::services::mocks::{MockLlm, MockServices, MockStorage};
use recall_core::port::time_provider::SystemTimeProvider;
use recall_infra_sqlite::{create_pool, run_migrations, SqliteJobStore};
use serde_json::json;

const WAIT: Duration = Duration::from_secs(10);

async fn running_worker(services: MockServices) -> (Arc<JobQueue>, OffscreenController) {
    let pool = create_pool(":memory:").await.unwrap();
    run_migrations(&pool).await.unwrap();
    let queue = Arc::new(JobQueue::new(
        Arc::new(SqliteJobStore::new(pool)),
        NotificationBus::new(),
        Arc::new(UuidProvider),
        Arc::new(SystemTimeProvider),
    ));
    let registry = default_registry(&services.set).unwrap();
    let launcher = ProcessorLauncher::new(
        queue.bus().clone(),
        registry,
        services.set,
        Arc::new(SystemTimeProvider),
    );
    let controller = OffscreenController::new(queue.clone(), Arc::new(launcher));
    controller.ensure_worker().await.unwrap();
    (queue, controller)
}

#[tokio::test]
async fn test_stream_ends_with_completed_snapshot() {
    let services = MockServices::new();
    let storage = services.storage.clone();
    let (queue, controller) = running_worker(services).await;
    let executor = JobExecutor::new(queue.clone());

    let text = "one two three four five six seven eight nine ten";
    let execution = executor
        .execute(
            "embedding",
            json!({ "text": text, "source": "notes", "chunkWords": 3 }),
            ExecuteOptions::streaming(),
        )
        .await
        .unwrap();
    let stream = match execution {
        Execution::Stream { stream, .. } => stream,
        Execution::Promise { .. } => panic!("expected a stream"),
    };

    let snapshots: Vec<_> = tokio::time::timeout(WAIT, stream.collect::<Vec<_>>())
        .await
        .unwrap();
    assert!(!snapshots.is_empty());
    for pair in snapshots.windows(2) {
        assert!(pair[1].progress >= pair[0].progress, "{:?}", snapshots);
    }

    let last = snapshots.last().unwrap();
    assert_eq!(last.status, JobStatus::Completed);
    assert_eq!(last.progress, 100);
    assert_eq!(last.result.as_ref().unwrap()["chunks"], json!(4));
    assert_eq!(storage.embedding_count("notes"), 4);

    controller.shutdown().await;
}

#[tokio::test]
async fn test_promise_resolves_for_direct_dispatch() {
    let (queue, controller) = running_worker(MockServices::new()).await;
    let executor = JobExecutor::new(queue.clone());

    let execution = executor
        .execute(
            "echo",
            json!({"text": "fast"}),
            ExecuteOptions::default().with_dispatch(Dispatch::Direct),
        )
        .await
        .unwrap();
    let job_id = execution.job_id().clone();
    let outcome = match execution {
        Execution::Promise { outcome, .. } => tokio::time::timeout(WAIT, outcome)
            .await
            .unwrap()
            .unwrap(),
        Execution::Stream { .. } => panic!("expected a promise"),
    };

    assert_eq!(outcome.status, JobStatus::Completed);
    assert_eq!(outcome.result, Some(json!({"text": "fast"})));

    let job = queue.get(&job_id).await.unwrap().unwrap();
    assert_eq!(job.dispatch, Dispatch::Direct);
    assert_eq!(job.status, JobStatus::Completed);

    controller.shutdown().await;
}

#[tokio::test]
async fn test_failed_handler_resolves_with_error() {
    let services = MockServices::with(MockStorage::new(), MockLlm::failing("model offline"));
    let (queue, controller) = running_worker(services).await;
    let executor = JobExecutor::new(queue);

    let execution = executor
        .execute("llm", json!({"prompt": "hello"}), ExecuteOptions::default())
        .await
        .unwrap();
    let outcome = match execution {
        Execution::Promise { outcome, .. } => tokio::time::timeout(WAIT, outcome)
            .await
            .unwrap()
            .unwrap(),
        Execution::Stream { .. } => panic!("expected a promise"),
    };

    assert_eq!(outcome.status, JobStatus::Failed);
    assert!(outcome.error.unwrap().contains("model offline"));

    controller.shutdown().await;
}

#[tokio::test]
async fn test_watching_finished_job_replays_final_state() {
    let (queue, controller) = running_worker(MockServices::new()).await;
    let executor = JobExecutor::new(queue.clone());

    let id = queue.enqueue("echo", json!({"n": 1})).await.unwrap();
    let outcome = tokio::time::timeout(WAIT, executor.wait(id.clone()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(outcome.status, JobStatus::Completed);

    let replay: Vec<_> = executor.watch(id).collect().await;
    assert_eq!(replay.len(), 1);
    assert_eq!(replay[0].status, JobStatus::Completed);

    controller.shutdown().await;
}
