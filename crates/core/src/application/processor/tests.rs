use super::*;
use crate::application::queue::{EnqueueRequest, JobQueue};
use crate::application::registry::{HandlerRegistration, JobHandler};
use crate::domain::JobId;
use crate::port::id_provider::UuidProvider;
use crate::port::job_store::memory::InMemoryJobStore;
use crate::port::services::mocks::{MockLlm, MockServices, MockStorage};
use crate::port::time_provider::SystemTimeProvider;
use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Notify;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

struct Echo;

#[async_trait]
impl JobHandler for Echo {
    async fn process(&self, _id: &JobId, job: &Job, deps: &ProcessDependencies) -> Result<serde_json::Value> {
        deps.report_progress("Echoing", 50).await;
        Ok(job.payload.as_value().clone())
    }
}

#[derive(Default)]
struct Counting {
    calls: AtomicUsize,
}

#[async_trait]
impl JobHandler for Counting {
    async fn process(&self, _id: &JobId, _job: &Job, _deps: &ProcessDependencies) -> Result<serde_json::Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(json!({"counted": true}))
    }
}

struct Failing;

#[async_trait]
impl JobHandler for Failing {
    async fn process(&self, _id: &JobId, _job: &Job, _deps: &ProcessDependencies) -> Result<serde_json::Value> {
        Err(AppError::Handler("model unavailable".to_string()))
    }
}

struct Panicking;

#[async_trait]
impl JobHandler for Panicking {
    async fn process(&self, _id: &JobId, job: &Job, _deps: &ProcessDependencies) -> Result<serde_json::Value> {
        if job.payload.as_value().is_object() {
            panic!("handler exploded");
        }
        Ok(json!(null))
    }
}

fn registry(counting: Arc<Counting>) -> HandlerRegistry {
    HandlerRegistry::builder()
        .register(HandlerRegistration::new(Arc::new(Echo), ["echo"]))
        .unwrap()
        .register(HandlerRegistration::new(counting, ["count"]))
        .unwrap()
        .register(HandlerRegistration::new(Arc::new(Failing), ["fail"]))
        .unwrap()
        .register(HandlerRegistration::new(Arc::new(Panicking), ["boom"]))
        .unwrap()
        .build()
}

fn quiet_config() -> ProcessorConfig {
    ProcessorConfig::default()
        .with_startup_repoll_delay(Duration::from_secs(60))
        .with_safety_poll_interval(Duration::from_secs(60))
}

struct Harness {
    queue: Arc<JobQueue>,
    bus: NotificationBus,
    counting: Arc<Counting>,
    processor: Arc<Processor>,
    shutdown: ShutdownSender,
}

fn harness_with(services: MockServices, source: Option<Arc<dyn JobSource>>) -> (Harness, ShutdownToken) {
    let bus = NotificationBus::new();
    let queue = Arc::new(JobQueue::new(
        Arc::new(InMemoryJobStore::new()),
        bus.clone(),
        Arc::new(UuidProvider),
        Arc::new(SystemTimeProvider),
    ));
    let counting = Arc::new(Counting::default());
    let source = source.unwrap_or_else(|| queue.clone() as Arc<dyn JobSource>);
    let processor = Arc::new(
        Processor::new(
            source,
            bus.clone(),
            registry(counting.clone()),
            services.set,
            Arc::new(SystemTimeProvider),
        )
        .with_config(quiet_config()),
    );
    let (tx, token) = shutdown_channel();
    (
        Harness {
            queue,
            bus,
            counting,
            processor,
            shutdown: tx,
        },
        token,
    )
}

async fn started() -> Harness {
    let (h, token) = harness_with(MockServices::new(), None);
    h.processor.start(token).await.unwrap();
    h
}

async fn wait_until(mut cond: impl FnMut() -> bool) {
    timeout(WAIT, async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

async fn completed(rx: &mut crate::application::bus::MessageReceiver, job_id: &str) -> Job {
    timeout(WAIT, async {
        loop {
            let msg = rx.recv_kind(MessageType::JobCompleted).await.unwrap();
            if msg.job_id.as_deref() == Some(job_id) {
                return msg.job.unwrap();
            }
        }
    })
    .await
    .expect("job did not complete in time")
}

#[tokio::test]
async fn test_echo_job_runs_through_queue_path() {
    let h = started().await;
    let mut rx = h.bus.subscribe_channel(MessageType::JobCompleted);

    let id = h.queue.enqueue("echo", json!({"text": "hi"})).await.unwrap();
    let job = completed(&mut rx, &id).await;
    assert_eq!(job.status, JobStatus::Completed);

    let all = h.queue.get_all().await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].status, JobStatus::Completed);
    assert_eq!(all[0].progress, 100);
    assert_eq!(all[0].result, Some(json!({"text": "hi"})));
    assert_eq!(h.processor.active_jobs(), 0);
}

#[tokio::test]
async fn test_jobs_enqueued_before_start_are_picked_up() {
    let (h, token) = harness_with(MockServices::new(), None);
    let mut rx = h.bus.subscribe_channel(MessageType::JobCompleted);
    let id = h.queue.enqueue("echo", json!({"early": 1})).await.unwrap();

    h.processor.start(token).await.unwrap();
    let job = completed(&mut rx, &id).await;
    assert_eq!(job.result, Some(json!({"early": 1})));
}

#[tokio::test]
async fn test_direct_job_runs_on_fast_path() {
    let h = started().await;
    let mut updates = h.bus.subscribe_channel(MessageType::JobUpdated);
    let mut done = h.bus.subscribe_channel(MessageType::JobCompleted);

    // Grace period is 10s, so only the fast path can run this
    let job = h
        .queue
        .enqueue_with(EnqueueRequest::new("echo", json!({"text": "fast"})).direct())
        .await
        .unwrap();

    let finished = completed(&mut done, &job.id).await;
    assert_eq!(finished.result, Some(json!({"text": "fast"})));

    let first = timeout(WAIT, updates.recv()).await.unwrap().unwrap();
    let snapshot = first.job.unwrap();
    assert_eq!(snapshot.status, JobStatus::Processing);
    assert_eq!(snapshot.stage.as_deref(), Some("Starting"));
}

#[tokio::test]
async fn test_handler_error_fails_job_and_loop_continues() {
    let h = started().await;
    let mut rx = h.bus.subscribe_channel(MessageType::JobCompleted);

    let bad = h.queue.enqueue("fail", json!({})).await.unwrap();
    let good = h.queue.enqueue("echo", json!({"ok": true})).await.unwrap();

    let failed = completed(&mut rx, &bad).await;
    assert_eq!(failed.status, JobStatus::Failed);
    assert!(failed.error.unwrap().contains("model unavailable"));

    let ok = h.queue.get(&good).await.unwrap();
    let ok = match ok {
        Some(job) if job.status.is_terminal() => job,
        _ => completed(&mut rx, &good).await,
    };
    assert_eq!(ok.status, JobStatus::Completed);
}

#[tokio::test]
async fn test_handler_panic_becomes_failed_job() {
    let h = started().await;
    let mut rx = h.bus.subscribe_channel(MessageType::JobCompleted);

    let id = h.queue.enqueue("boom", json!({})).await.unwrap();
    let job = completed(&mut rx, &id).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error.unwrap().contains("handler exploded"));

    let next = h.queue.enqueue("echo", json!({"after": "panic"})).await.unwrap();
    assert_eq!(completed(&mut rx, &next).await.status, JobStatus::Completed);
}

#[tokio::test]
async fn test_unknown_job_type_fails_job() {
    let h = started().await;
    let mut rx = h.bus.subscribe_channel(MessageType::JobCompleted);

    let id = h.queue.enqueue("nobody", json!({})).await.unwrap();
    let job = completed(&mut rx, &id).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error.unwrap().contains("Unknown job type"));
}

#[tokio::test]
async fn test_duplicate_enqueue_notification_does_not_rerun_queue_job() {
    let h = started().await;
    let mut rx = h.bus.subscribe_channel(MessageType::JobCompleted);

    let id = h.queue.enqueue("count", json!({})).await.unwrap();
    completed(&mut rx, &id).await;

    let dup = NotificationMessage::new(MessageType::JobEnqueued, 0).with_job_id(id.clone());
    h.bus.publish(dup.clone());
    h.bus.publish(dup);
    wait_until(|| !h.processor.is_ticking()).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(h.counting.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_fast_path_skips_job_that_is_no_longer_pending() {
    let h = started().await;
    let mut rx = h.bus.subscribe_channel(MessageType::JobCompleted);

    let job = h
        .queue
        .enqueue_with(EnqueueRequest::new("count", json!({})).direct())
        .await
        .unwrap();
    completed(&mut rx, &job.id).await;
    assert_eq!(h.counting.calls.load(Ordering::SeqCst), 1);

    // A late copy of the announcement still carries the pending snapshot
    let replay = NotificationMessage::for_job(MessageType::JobEnqueued, &job, job.created_at);
    h.bus.publish(replay.clone());
    h.bus.publish(replay);
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(h.counting.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.processor.active_jobs(), 0);
    let stored = h.queue.get(&job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Completed);
}

/// Blocks the first job-list read until released
struct GatedSource {
    inner: Arc<JobQueue>,
    release: Notify,
    reads: AtomicUsize,
}

#[async_trait]
impl JobSource for GatedSource {
    async fn background_jobs(&self) -> Result<Vec<Job>> {
        if self.reads.fetch_add(1, Ordering::SeqCst) == 0 {
            self.release.notified().await;
        }
        self.inner.background_jobs().await
    }

    async fn claim_job(&self) -> Result<Option<Job>> {
        self.inner.claim_job().await
    }

    async fn start_job(&self, job_id: &JobId, update: ProgressUpdate) -> Result<Option<Job>> {
        self.inner.start_job(job_id, update).await
    }

    async fn update_progress(&self, job_id: &JobId, update: ProgressUpdate) -> Result<Option<Job>> {
        JobSource::update_progress(self.inner.as_ref(), job_id, update).await
    }

    async fn complete_job(&self, job_id: &JobId, completion: Completion) -> Result<Option<Job>> {
        self.inner.complete_job(job_id, completion).await
    }
}

#[tokio::test]
async fn test_triggers_during_tick_coalesce_into_one_more_tick() {
    let bus = NotificationBus::new();
    let queue = Arc::new(JobQueue::new(
        Arc::new(InMemoryJobStore::new()),
        bus.clone(),
        Arc::new(UuidProvider),
        Arc::new(SystemTimeProvider),
    ));
    let gated = Arc::new(GatedSource {
        inner: queue,
        release: Notify::new(),
        reads: AtomicUsize::new(0),
    });
    let processor = Arc::new(
        Processor::new(
            gated.clone(),
            bus.clone(),
            HandlerRegistry::default(),
            MockServices::new().set,
            Arc::new(SystemTimeProvider),
        )
        .with_config(quiet_config()),
    );
    let (_stop, token) = shutdown_channel();
    processor.start(token).await.unwrap();

    // Startup tick is now parked inside the first read
    wait_until(|| gated.reads.load(Ordering::SeqCst) == 1).await;
    for _ in 0..5 {
        processor.request_poll();
    }
    for _ in 0..3 {
        bus.publish(NotificationMessage::new(MessageType::JobUpdated, 0));
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(processor.ticks_run(), 1);

    gated.release.notify_one();
    wait_until(|| !processor.is_ticking()).await;

    assert_eq!(processor.ticks_run(), 2);
    assert_eq!(gated.reads.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_init_failure_is_terminal_and_reported() {
    let (h, token) = harness_with(MockServices::with(MockStorage::failing_init(), MockLlm::new()), None);
    let mut rx = h.bus.subscribe_channel(MessageType::OffscreenFailed);

    let err = h.processor.start(token).await.unwrap_err();
    assert!(matches!(err, AppError::Initialization(_)));
    assert!(matches!(h.processor.state(), ProcessorState::Failed(_)));

    let msg = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert!(msg.data.unwrap()["error"]
        .as_str()
        .unwrap()
        .contains("storage unavailable"));
}

#[tokio::test]
async fn test_startup_progress_and_ready_signal() {
    let (h, token) = harness_with(MockServices::new(), None);
    let mut progress = h.bus.subscribe_channel(MessageType::InitializationProgress);
    let mut ready = h.bus.subscribe_channel(MessageType::OffscreenReady);

    h.processor.start(token).await.unwrap();
    assert_eq!(h.processor.state(), ProcessorState::Ready);
    timeout(WAIT, ready.recv()).await.unwrap().unwrap();

    let mut seen = Vec::new();
    while let Some(msg) = progress.try_recv() {
        seen.push(msg.data.unwrap()["progress"].as_u64().unwrap());
    }
    assert_eq!(seen, vec![0, 25, 50, 75, 100]);

    // INITIAL after startup reports completion
    h.bus
        .publish(NotificationMessage::new(MessageType::Initial, 0).with_destination(Destination::Offscreen));
    let reply = timeout(WAIT, progress.recv()).await.unwrap().unwrap();
    assert_eq!(reply.data.unwrap()["progress"], 100);
}

#[tokio::test]
async fn test_ping_is_answered_with_pong() {
    let h = started().await;
    let mut rx = h.bus.subscribe_channel(MessageType::Pong);

    h.bus
        .publish(NotificationMessage::new(MessageType::Ping, 0).with_data(json!({"nonce": 7})));
    let pong = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(pong.data.unwrap()["nonce"], 7);
}

#[tokio::test]
async fn test_slot_reuses_first_processor() {
    let (h, token) = harness_with(MockServices::new(), None);
    let slot = ProcessorSlot::new();
    let built = Arc::new(AtomicUsize::new(0));

    let make = {
        let built = built.clone();
        let queue = h.queue.clone();
        let bus = h.bus.clone();
        move || {
            built.fetch_add(1, Ordering::SeqCst);
            Processor::new(
                queue,
                bus,
                HandlerRegistry::default(),
                MockServices::new().set,
                Arc::new(SystemTimeProvider),
            )
            .with_config(quiet_config())
        }
    };

    let one = slot.start(make.clone(), token.clone()).await.unwrap();
    let two = slot.start(make, token).await.unwrap();
    assert!(Arc::ptr_eq(&one, &two));
    assert_eq!(built.load(Ordering::SeqCst), 1);
    assert_eq!(one.state(), ProcessorState::Ready);
    assert!(Arc::ptr_eq(&slot.get().unwrap(), &one));
}

#[tokio::test]
async fn test_shutdown_stops_reacting_to_notifications() {
    let (h, token) = harness_with(MockServices::new(), None);
    h.processor.start(token).await.unwrap();

    h.shutdown.shutdown();
    wait_until(|| h.processor.is_stopped()).await;

    let id = h.queue.enqueue("echo", json!({})).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    let job = h.queue.get(&id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Pending);
}
