// Offscreen Controller - owns the worker context from the controller side
//
// Starts the worker context at most once, serves its control requests, and
// waits a bounded time for the readiness handshake. A failed or timed-out
// worker is reported, never respawned.

use crate::application::bus::NotificationBus;
use crate::application::control::{control_channel, ControlServer, RemoteJobSource};
use crate::application::processor::constants::{CONTROL_CHANNEL_CAPACITY, PING_TIMEOUT, READY_TIMEOUT};
use crate::application::processor::{
    shutdown_channel, Processor, ProcessorConfig, ProcessorSlot, ShutdownSender, ShutdownToken,
};
use crate::application::queue::JobQueue;
use crate::application::registry::HandlerRegistry;
use crate::domain::{Destination, MessageType, NotificationMessage, Topic};
use crate::error::{AppError, Result};
use crate::port::{ServiceSet, TimeProvider};
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Starts a worker context around a job source
pub trait WorkerLauncher: Send + Sync {
    fn launch(&self, source: RemoteJobSource, shutdown: ShutdownToken) -> JoinHandle<()>;
}

/// Launches a Processor in its own task, guarded by a ProcessorSlot
pub struct ProcessorLauncher {
    bus: NotificationBus,
    registry: HandlerRegistry,
    services: ServiceSet,
    time_provider: Arc<dyn TimeProvider>,
    config: ProcessorConfig,
    slot: Arc<ProcessorSlot>,
}

impl ProcessorLauncher {
    pub fn new(
        bus: NotificationBus,
        registry: HandlerRegistry,
        services: ServiceSet,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            bus,
            registry,
            services,
            time_provider,
            config: ProcessorConfig::default(),
            slot: Arc::new(ProcessorSlot::new()),
        }
    }

    pub fn with_config(mut self, config: ProcessorConfig) -> Self {
        self.config = config;
        self
    }
}

impl WorkerLauncher for ProcessorLauncher {
    fn launch(&self, source: RemoteJobSource, shutdown: ShutdownToken) -> JoinHandle<()> {
        let bus = self.bus.clone();
        let registry = self.registry.clone();
        let services = self.services.clone();
        let time_provider = Arc::clone(&self.time_provider);
        let config = self.config;
        let slot = Arc::clone(&self.slot);

        tokio::spawn(async move {
            let build = move || {
                Processor::new(Arc::new(source), bus, registry, services, time_provider)
                    .with_config(config)
            };
            // Failure is already published as OFFSCREEN_FAILED
            if let Err(e) = slot.start(build, shutdown).await {
                error!(error = %e, "Worker context failed to start");
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum WorkerStatus {
    NotStarted,
    Starting,
    Ready,
    Failed(String),
}

#[derive(Debug, Clone, Copy)]
pub struct ControllerConfig {
    pub ready_timeout: Duration,
    pub ping_timeout: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            ready_timeout: READY_TIMEOUT,
            ping_timeout: PING_TIMEOUT,
        }
    }
}

impl ControllerConfig {
    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    pub fn with_ping_timeout(mut self, timeout: Duration) -> Self {
        self.ping_timeout = timeout;
        self
    }
}

pub struct OffscreenController {
    queue: Arc<JobQueue>,
    bus: NotificationBus,
    launcher: Arc<dyn WorkerLauncher>,
    config: ControllerConfig,
    /// Serializes starts; never held by readers
    start_lock: Mutex<()>,
    status: watch::Sender<WorkerStatus>,
    worker_shutdown: Mutex<Option<ShutdownSender>>,
    startup_progress: watch::Sender<u8>,
    next_nonce: AtomicU64,
}

impl OffscreenController {
    pub fn new(queue: Arc<JobQueue>, launcher: Arc<dyn WorkerLauncher>) -> Self {
        let (startup_progress, _) = watch::channel(0);
        let (status, _) = watch::channel(WorkerStatus::NotStarted);
        Self {
            bus: queue.bus().clone(),
            queue,
            launcher,
            config: ControllerConfig::default(),
            start_lock: Mutex::new(()),
            status,
            worker_shutdown: Mutex::new(None),
            startup_progress,
            next_nonce: AtomicU64::new(1),
        }
    }

    pub fn with_config(mut self, config: ControllerConfig) -> Self {
        self.config = config;
        self
    }

    /// Latest startup progress reported by the worker (0-100)
    pub fn startup_progress(&self) -> u8 {
        *self.startup_progress.borrow()
    }

    pub fn watch_startup_progress(&self) -> watch::Receiver<u8> {
        self.startup_progress.subscribe()
    }

    /// Start the worker context if needed and wait for its readiness signal.
    ///
    /// Concurrent callers wait for the same start. Timeout and
    /// OFFSCREEN_FAILED are both hard failures for this controller.
    pub async fn ensure_worker(&self) -> Result<()> {
        let _start = self.start_lock.lock().await;
        let current = self.status.borrow().clone();
        match current {
            WorkerStatus::Ready => return Ok(()),
            WorkerStatus::Failed(reason) => {
                return Err(AppError::Initialization(format!("worker unavailable: {}", reason)))
            }
            WorkerStatus::NotStarted | WorkerStatus::Starting => {}
        }
        self.status.send_replace(WorkerStatus::Starting);

        // Sweep before any worker can claim
        if let Err(e) = self.queue.fail_stale_jobs().await {
            warn!(error = %e, "Stale job sweep failed");
        }

        // Listen before launching so the readiness signal cannot be missed
        let mut lifecycle = self.bus.subscribe_channel(Topic::All);

        let (shutdown_tx, shutdown) = shutdown_channel();
        let (remote, requests) = control_channel(CONTROL_CHANNEL_CAPACITY);
        ControlServer::new(Arc::clone(&self.queue)).spawn(requests, shutdown.clone());
        self.launcher.launch(remote, shutdown);
        *self.worker_shutdown.lock().await = Some(shutdown_tx);

        // Ask a worker that may already be mid-startup where it is
        self.bus.publish(
            NotificationMessage::new(MessageType::Initial, self.queue.now_millis())
                .with_destination(Destination::Offscreen),
        );

        let outcome = tokio::time::timeout(self.config.ready_timeout, async {
            while let Some(msg) = lifecycle.recv().await {
                match msg.kind {
                    MessageType::InitializationProgress => {
                        if let Some(p) = msg.data.as_ref().and_then(|d| d["progress"].as_u64()) {
                            self.startup_progress.send_replace(p.min(100) as u8);
                        }
                    }
                    MessageType::OffscreenReady => return Ok(()),
                    MessageType::OffscreenFailed => {
                        let reason = msg
                            .data
                            .as_ref()
                            .and_then(|d| d["error"].as_str())
                            .unwrap_or("worker failed to initialize")
                            .to_string();
                        return Err(reason);
                    }
                    _ => {}
                }
            }
            Err("notification bus closed".to_string())
        })
        .await;

        match outcome {
            Ok(Ok(())) => {
                self.startup_progress.send_replace(100);
                self.status.send_replace(WorkerStatus::Ready);
                info!("Worker context ready");
                Ok(())
            }
            Ok(Err(reason)) => {
                error!(error = %reason, "Worker context failed");
                self.status.send_replace(WorkerStatus::Failed(reason.clone()));
                self.stop_worker().await;
                Err(AppError::Initialization(reason))
            }
            Err(_) => {
                let reason = format!(
                    "worker not ready within {}s",
                    self.config.ready_timeout.as_secs_f32()
                );
                error!(error = %reason, "Worker context timed out");
                self.status.send_replace(WorkerStatus::Failed(reason.clone()));
                self.stop_worker().await;
                Err(AppError::Timeout(reason))
            }
        }
    }

    /// Never waits on a start in progress
    pub fn is_ready(&self) -> bool {
        *self.status.borrow() == WorkerStatus::Ready
    }

    /// True while a start is waiting for the readiness signal
    pub fn is_starting(&self) -> bool {
        *self.status.borrow() == WorkerStatus::Starting
    }

    /// PING the worker; true if a matching PONG arrives in time
    pub async fn ping(&self, timeout: Option<Duration>) -> bool {
        let wait = timeout.unwrap_or(self.config.ping_timeout);
        let nonce = self.next_nonce.fetch_add(1, Ordering::Relaxed);
        let mut pongs = self.bus.subscribe_channel(MessageType::Pong);

        self.bus.publish(
            NotificationMessage::new(MessageType::Ping, self.queue.now_millis())
                .with_destination(Destination::Offscreen)
                .with_data(json!({ "nonce": nonce })),
        );

        let answered = tokio::time::timeout(wait, async {
            while let Some(msg) = pongs.recv().await {
                if msg.data.as_ref().and_then(|d| d["nonce"].as_u64()) == Some(nonce) {
                    return true;
                }
            }
            false
        })
        .await;
        matches!(answered, Ok(true))
    }

    /// Stop the worker context and the control server
    pub async fn shutdown(&self) {
        self.stop_worker().await;
    }

    async fn stop_worker(&self) {
        if let Some(tx) = self.worker_shutdown.lock().await.take() {
            tx.shutdown();
            info!("Worker context shutdown requested");
        }
    }
}
