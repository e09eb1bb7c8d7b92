// Processor - worker lifecycle and the dual-path execution loop
//
// Runs inside the worker context. Startup initializes downstream services,
// subscribes to job notifications, and only then announces readiness.
// Fast path: direct jobs run straight from the JOB_ENQUEUED snapshot, in parallel.
// Queue path: claims pending jobs one at a time inside a coalesced tick.

pub mod constants;
mod shutdown;
mod slot;
mod ticker;

pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};
pub use slot::ProcessorSlot;
pub use ticker::TickGuard;

use crate::application::bus::{panic_message, NotificationBus, Subscription};
use crate::application::dependencies::{ProcessDependencies, ProcessFactory};
use crate::application::registry::HandlerRegistry;
use crate::domain::{
    Completion, Destination, Dispatch, Job, JobStatus, MessageType, NotificationMessage,
    ProgressUpdate, Topic,
};
use crate::error::{AppError, Result};
use crate::port::{JobSource, ServiceSet, TimeProvider};
use constants::*;
use futures::future::BoxFuture;
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, warn, Instrument};

/// Lifecycle of one processor instance. `Failed` is terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessorState {
    Uninitialized,
    Initializing { progress: u8 },
    Ready,
    Failed(String),
}

impl ProcessorState {
    pub fn progress(&self) -> u8 {
        match self {
            ProcessorState::Uninitialized | ProcessorState::Failed(_) => 0,
            ProcessorState::Initializing { progress } => *progress,
            ProcessorState::Ready => 100,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessorState::Uninitialized => "uninitialized",
            ProcessorState::Initializing { .. } => "initializing",
            ProcessorState::Ready => "ready",
            ProcessorState::Failed(_) => "failed",
        }
    }
}

/// Backstop timing
#[derive(Debug, Clone, Copy)]
pub struct ProcessorConfig {
    pub startup_repoll_delay: Duration,
    pub safety_poll_interval: Duration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            startup_repoll_delay: STARTUP_REPOLL_DELAY,
            safety_poll_interval: SAFETY_POLL_INTERVAL,
        }
    }
}

impl ProcessorConfig {
    pub fn with_startup_repoll_delay(mut self, delay: Duration) -> Self {
        self.startup_repoll_delay = delay;
        self
    }

    pub fn with_safety_poll_interval(mut self, interval: Duration) -> Self {
        self.safety_poll_interval = interval;
        self
    }
}

pub struct Processor {
    source: Arc<dyn JobSource>,
    bus: NotificationBus,
    registry: HandlerRegistry,
    factory: ProcessFactory,
    services: ServiceSet,
    time_provider: Arc<dyn TimeProvider>,
    config: ProcessorConfig,

    state_tx: watch::Sender<ProcessorState>,
    ticker: TickGuard,
    started: AtomicBool,
    stopped: AtomicBool,
    active_jobs: AtomicUsize,
    ticks_run: AtomicU64,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl Processor {
    pub fn new(
        source: Arc<dyn JobSource>,
        bus: NotificationBus,
        registry: HandlerRegistry,
        services: ServiceSet,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ProcessorState::Uninitialized);
        Self {
            factory: ProcessFactory::from_source(Arc::clone(&source)),
            source,
            bus,
            registry,
            services,
            time_provider,
            config: ProcessorConfig::default(),
            state_tx,
            ticker: TickGuard::new(),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            active_jobs: AtomicUsize::new(0),
            ticks_run: AtomicU64::new(0),
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    pub fn with_config(mut self, config: ProcessorConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace how handler reports are delivered
    pub fn with_factory(mut self, factory: ProcessFactory) -> Self {
        self.factory = factory;
        self
    }

    pub fn state(&self) -> ProcessorState {
        self.state_tx.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<ProcessorState> {
        self.state_tx.subscribe()
    }

    /// Jobs currently inside a handler (both paths)
    pub fn active_jobs(&self) -> usize {
        self.active_jobs.load(Ordering::SeqCst)
    }

    /// Queue ticks executed so far
    pub fn ticks_run(&self) -> u64 {
        self.ticks_run.load(Ordering::SeqCst)
    }

    pub fn is_ticking(&self) -> bool {
        self.ticker.is_ticking()
    }

    /// True once the shutdown signal was observed
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Initialize services, start both paths, then publish OFFSCREEN_READY.
    ///
    /// An initialization error leaves the processor in `Failed`, publishes
    /// OFFSCREEN_FAILED and is returned; nothing is retried.
    pub async fn start(self: &Arc<Self>, shutdown: ShutdownToken) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            warn!("Processor already started, ignoring second start");
            return Ok(());
        }

        // Answer INITIAL and PING while services come up
        self.subscribe_control();

        if let Err(e) = self.initialize_services().await {
            let reason = e.to_string();
            error!(error = %reason, "Processor initialization failed");
            self.state_tx.send_replace(ProcessorState::Failed(reason.clone()));
            self.publish(
                NotificationMessage::new(MessageType::OffscreenFailed, self.now())
                    .with_destination(Destination::Background)
                    .with_data(json!({ "error": reason })),
            );
            return Err(AppError::Initialization(reason));
        }

        // Loop first, readiness second: nothing racing the signal is lost
        self.subscribe_jobs();
        self.spawn_backstops(shutdown);
        self.trigger("startup");

        self.state_tx.send_replace(ProcessorState::Ready);
        self.publish(
            NotificationMessage::new(MessageType::OffscreenReady, self.now())
                .with_destination(Destination::Background),
        );
        info!(handlers = ?self.registry.job_types(), "Processor ready");
        Ok(())
    }

    /// Ask for a queue tick (coalesced with any tick in flight)
    pub fn request_poll(self: &Arc<Self>) {
        self.trigger("manual");
    }

    async fn initialize_services(&self) -> Result<()> {
        let steps: Vec<(&str, BoxFuture<'_, Result<()>>)> = vec![
            ("storage", self.services.storage.initialize()),
            ("embedding", self.services.embedding.initialize()),
            ("llm", self.services.llm.initialize()),
            ("flow_runner", self.services.flows.initialize()),
        ];
        let total = steps.len();

        self.set_progress(0, "starting");
        for (i, (name, init)) in steps.into_iter().enumerate() {
            debug!(service = name, "Initializing service");
            init.await
                .map_err(|e| AppError::Initialization(format!("{}: {}", name, e)))?;
            let progress = ((i + 1) * 100 / total) as u8;
            self.set_progress(progress, name);
        }
        Ok(())
    }

    fn set_progress(&self, progress: u8, stage: &str) {
        self.state_tx
            .send_replace(ProcessorState::Initializing { progress });
        self.publish(
            NotificationMessage::new(MessageType::InitializationProgress, self.now())
                .with_destination(Destination::Background)
                .with_data(json!({ "progress": progress, "stage": stage })),
        );
    }

    fn subscribe_control(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let sub = self.bus.subscribe(Topic::All, move |msg: NotificationMessage| {
            let weak = weak.clone();
            async move {
                if let Some(this) = weak.upgrade() {
                    this.on_control(msg);
                }
                Ok(())
            }
        });
        self.keep(sub);
    }

    fn subscribe_jobs(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let sub = self.bus.subscribe(Topic::All, move |msg: NotificationMessage| {
            let weak = weak.clone();
            async move {
                if let Some(this) = weak.upgrade() {
                    this.on_job_message(msg);
                }
                Ok(())
            }
        });
        self.keep(sub);
    }

    fn keep(&self, sub: Subscription) {
        self.subscriptions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(sub);
    }

    fn on_control(&self, msg: NotificationMessage) {
        match msg.kind {
            MessageType::Initial => {
                let state = self.state();
                self.publish(
                    NotificationMessage::new(MessageType::InitializationProgress, self.now())
                        .with_destination(Destination::Background)
                        .with_data(json!({
                            "progress": state.progress(),
                            "stage": state.as_str(),
                        })),
                );
            }
            MessageType::Ping => {
                let mut pong = NotificationMessage::new(MessageType::Pong, self.now())
                    .with_destination(msg.destination);
                if let Some(data) = msg.data {
                    pong = pong.with_data(data);
                }
                self.publish(pong);
            }
            _ => {}
        }
    }

    fn on_job_message(self: &Arc<Self>, msg: NotificationMessage) {
        if self.stopped.load(Ordering::SeqCst) {
            return;
        }
        match msg.kind {
            MessageType::JobEnqueued => match msg.job {
                Some(job) if job.dispatch == Dispatch::Direct && job.status == JobStatus::Pending => {
                    let this = Arc::clone(self);
                    tokio::spawn(async move { this.run_direct(job).await });
                }
                _ => self.trigger("job_enqueued"),
            },
            MessageType::JobUpdated => {
                // Only a still-pending job can need a claim
                let pending = msg
                    .job
                    .as_ref()
                    .map_or(true, |job| job.status == JobStatus::Pending);
                if pending {
                    self.trigger("job_updated");
                }
            }
            _ => {}
        }
    }

    fn spawn_backstops(self: &Arc<Self>, mut shutdown: ShutdownToken) {
        let weak = Arc::downgrade(self);
        let config = self.config;

        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(config.startup_repoll_delay) => {
                    if !with_processor(&weak, |p| p.trigger("startup_repoll")) {
                        return;
                    }
                }
                _ = shutdown.wait() => {
                    with_processor(&weak, |p| p.stop());
                    return;
                }
            }

            let mut interval = tokio::time::interval(config.safety_poll_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            interval.tick().await; // first tick fires immediately
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if !with_processor(&weak, |p| p.trigger("safety_interval")) {
                            break;
                        }
                    }
                    _ = shutdown.wait() => {
                        with_processor(&weak, |p| p.stop());
                        break;
                    }
                }
            }
        });
    }

    fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.subscriptions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
        info!(active_jobs = self.active_jobs(), "Processor stopped");
    }

    fn trigger(self: &Arc<Self>, reason: &'static str) {
        if self.stopped.load(Ordering::SeqCst) {
            return;
        }
        if !self.ticker.try_begin() {
            debug!(reason, "Tick in flight, request coalesced");
            return;
        }
        debug!(reason, "Tick started");
        let this = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                this.tick().await;
                if !this.ticker.finish() {
                    break;
                }
            }
        });
    }

    /// One queue pass: read the job list, then claim and run pending jobs
    /// one at a time until none is claimable
    async fn tick(&self) {
        self.ticks_run.fetch_add(1, Ordering::SeqCst);

        let jobs = match self.source.background_jobs().await {
            Ok(jobs) => jobs,
            Err(e) => {
                warn!(error = %e, "Failed to read background jobs");
                return;
            }
        };
        let pending = jobs
            .iter()
            .filter(|j| j.status == JobStatus::Pending)
            .count();
        if pending == 0 {
            return;
        }
        debug!(pending, "Pending jobs found");

        while !self.stopped.load(Ordering::SeqCst) {
            match self.source.claim_job().await {
                Ok(Some(job)) => {
                    let deps = self.factory.create_dependencies(&job);
                    self.execute(job, deps).await;
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "Failed to claim job");
                    break;
                }
            }
        }
    }

    async fn run_direct(&self, job: Job) {
        info!(job_id = %job.id, job_type = %job.job_type, "Executing job on fast path");
        let deps = self.factory.create_dependencies(&job);
        // The start is this path's claim: a job already taken is left alone
        if !deps.start().await {
            debug!(job_id = %job.id, "Fast path skipped, job no longer pending");
            return;
        }
        self.execute(job, deps).await;
    }

    /// Run the handler in its own task so a panic becomes a failed job
    async fn execute(&self, job: Job, deps: ProcessDependencies) {
        let _active = ActiveJob::enter(&self.active_jobs);
        let deps = Arc::new(deps);

        let handler = match self.registry.resolve(&job.job_type) {
            Ok(handler) => handler,
            Err(e) => {
                warn!(job_id = %job.id, job_type = %job.job_type, "No handler for job type");
                deps.complete(Completion::failure(e.to_string())).await;
                return;
            }
        };

        let started = Instant::now();
        let span = deps.logger().span().clone();
        let task = {
            let deps = Arc::clone(&deps);
            let job = job.clone();
            tokio::spawn(
                async move { handler.process(&job.id, &job, &deps).await }.instrument(span),
            )
        };

        let completion = match task.await {
            Ok(Ok(result)) => Completion::success(Some(result).filter(|v| !v.is_null())),
            Ok(Err(e)) => {
                warn!(job_id = %job.id, job_type = %job.job_type, error = %e, "Handler failed");
                Completion::failure(e.to_string())
            }
            Err(join_err) if join_err.is_panic() => {
                let panic_msg = panic_message(join_err.into_panic().as_ref());
                error!(job_id = %job.id, job_type = %job.job_type, panic_msg = %panic_msg, "Handler panicked");
                Completion::failure(format!("handler panicked: {}", panic_msg))
            }
            Err(join_err) => {
                error!(job_id = %job.id, error = %join_err, "Handler task cancelled");
                Completion::failure("handler cancelled")
            }
        };

        debug!(
            job_id = %job.id,
            success = completion.success,
            duration_ms = started.elapsed().as_millis() as u64,
            "Handler finished"
        );
        deps.complete(completion).await;
    }

    fn publish(&self, msg: NotificationMessage) {
        self.bus.publish(msg);
    }

    fn now(&self) -> i64 {
        self.time_provider.now_millis()
    }
}

fn with_processor(weak: &Weak<Processor>, f: impl FnOnce(&Arc<Processor>)) -> bool {
    match weak.upgrade() {
        Some(processor) => {
            f(&processor);
            true
        }
        None => false,
    }
}

struct ActiveJob<'a>(&'a AtomicUsize);

impl<'a> ActiveJob<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for ActiveJob<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests;
