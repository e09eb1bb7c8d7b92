//! Recall Daemon - Main Entry Point
//!
//! Composition root: SQLite job store, notification bus, controller context
//! serving the worker context, and the JSON-RPC producer API.

mod config;
mod logging;

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use config::DaemonConfig;
use recall_api_rpc::RpcServer;
use recall_core::application::{
    default_registry, ControllerConfig, JobQueue, JobQueueConfig, NotificationBus,
    OffscreenController, ProcessorConfig, ProcessorLauncher,
};
use recall_core::port::id_provider::UuidProvider;
use recall_core::port::time_provider::SystemTimeProvider;
use recall_core::port::ServiceSet;
use recall_infra_inference::{OllamaBackend, PromptFlowRunner};
use recall_infra_sqlite::{
    create_pool, run_migrations, SqliteJobStore, SqliteKnowledgeStore,
};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Configuration and logging
    let config = DaemonConfig::from_env()?;
    let _log_guard = logging::init(&config.log)?;

    info!("Recall daemon v{} starting...", VERSION);

    // 2. Database
    if let Some(dir) = config.db_path.parent() {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    let db_url = config.db_path.to_string_lossy().into_owned();
    info!(db_path = %db_url, "Initializing database...");

    let pool = create_pool(&db_url)
        .await
        .context("DB pool creation failed")?;
    run_migrations(&pool).await.context("Migration failed")?;

    // 3. Controller context: store access behind the JobQueue
    let time_provider = Arc::new(SystemTimeProvider);
    let bus = NotificationBus::new();
    let queue = Arc::new(
        JobQueue::new(
            Arc::new(SqliteJobStore::new(pool.clone())),
            bus.clone(),
            Arc::new(UuidProvider),
            time_provider.clone(),
        )
        .with_config(
            JobQueueConfig::default().with_stale_after_ms(config.stale_after.as_millis() as i64),
        ),
    );

    // 4. Worker context services and handlers
    let ollama = Arc::new(OllamaBackend::new(config.ollama.clone())?);
    let services = ServiceSet {
        storage: Arc::new(SqliteKnowledgeStore::new(pool.clone())),
        embedding: ollama.clone(),
        llm: ollama.clone(),
        flows: Arc::new(PromptFlowRunner::new(ollama)),
    };
    let registry = default_registry(&services)?;
    info!(job_types = ?registry.job_types(), "Handlers registered");

    let launcher = ProcessorLauncher::new(bus, registry, services, time_provider)
        .with_config(
            ProcessorConfig::default().with_safety_poll_interval(config.safety_poll_interval),
        );
    let controller = Arc::new(
        OffscreenController::new(queue.clone(), Arc::new(launcher))
            .with_config(ControllerConfig::default().with_ready_timeout(config.ready_timeout)),
    );

    // 5. JSON-RPC server (up before the worker so producers can enqueue meanwhile)
    let (rpc_addr, rpc_handle) = RpcServer::new(config.rpc.clone(), queue, controller.clone())
        .start()
        .await
        .map_err(|e| anyhow::anyhow!("RPC server start failed: {}", e))?;
    info!(addr = %rpc_addr, "Accepting producer requests");

    // 6. Worker context. A failed start is final; pending jobs stay durable.
    match controller.ensure_worker().await {
        Ok(()) => info!("System ready. Waiting for jobs..."),
        Err(e) => error!(
            error = %e,
            "Worker context unavailable; jobs will stay pending until restart"
        ),
    }

    info!("Press Ctrl+C to shutdown");

    // 7. Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Exiting gracefully...");

    // 8. Graceful shutdown
    controller.shutdown().await;
    if let Err(e) = rpc_handle.stop() {
        warn!(error = %e, "RPC server already stopped");
    }
    if tokio::time::timeout(SHUTDOWN_GRACE, rpc_handle.stopped())
        .await
        .is_err()
    {
        warn!("RPC server did not stop within {:?}", SHUTDOWN_GRACE);
    }
    pool.close().await;

    info!("Shutdown complete.");
    Ok(())
}
