// Job Queue Service - store access for the controller context
//
// Every durable write goes through the JobStore's atomic operations and is
// followed by a notification. The notification is a hint, the store is the truth.

use crate::application::bus::NotificationBus;
use crate::domain::{
    Completion, Destination, Dispatch, Job, JobId, JobPayload, JobStatus, JobType,
    MessageType, NotificationMessage, PageData, ProgressUpdate,
};
use crate::error::{AppError, Result};
use crate::port::{IdProvider, JobSource, JobStore, TimeProvider};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Longest accepted job type tag
pub const MAX_JOB_TYPE_LEN: usize = 64;

/// Deepest accepted payload nesting
pub const MAX_PAYLOAD_DEPTH: usize = 32;

/// Processing jobs older than this read as failed (30 minutes)
pub const DEFAULT_STALE_AFTER_MS: i64 = 30 * 60 * 1000;

/// Direct jobs become claimable by the queue path after this (10 seconds)
pub const DEFAULT_DIRECT_GRACE_MS: i64 = 10 * 1000;

/// Enqueue request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueRequest {
    pub job_type: String,
    pub payload: serde_json::Value,

    #[serde(default)]
    pub dispatch: Dispatch,

    #[serde(default)]
    pub page_data: Option<PageData>,
}

impl EnqueueRequest {
    pub fn new(job_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            job_type: job_type.into(),
            payload,
            dispatch: Dispatch::Queued,
            page_data: None,
        }
    }

    pub fn direct(mut self) -> Self {
        self.dispatch = Dispatch::Direct;
        self
    }

    pub fn with_page_data(mut self, page_data: PageData) -> Self {
        self.page_data = Some(page_data);
        self
    }
}

/// Queue tuning
#[derive(Debug, Clone, Copy)]
pub struct JobQueueConfig {
    pub stale_after_ms: i64,
    pub direct_grace_ms: i64,
}

impl Default for JobQueueConfig {
    fn default() -> Self {
        Self {
            stale_after_ms: DEFAULT_STALE_AFTER_MS,
            direct_grace_ms: DEFAULT_DIRECT_GRACE_MS,
        }
    }
}

impl JobQueueConfig {
    pub fn with_stale_after_ms(mut self, ms: i64) -> Self {
        self.stale_after_ms = ms;
        self
    }

    pub fn with_direct_grace_ms(mut self, ms: i64) -> Self {
        self.direct_grace_ms = ms;
        self
    }
}

pub struct JobQueue {
    store: Arc<dyn JobStore>,
    bus: NotificationBus,
    id_provider: Arc<dyn IdProvider>,
    time_provider: Arc<dyn TimeProvider>,
    config: JobQueueConfig,
}

impl JobQueue {
    pub fn new(
        store: Arc<dyn JobStore>,
        bus: NotificationBus,
        id_provider: Arc<dyn IdProvider>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            store,
            bus,
            id_provider,
            time_provider,
            config: JobQueueConfig::default(),
        }
    }

    pub fn with_config(mut self, config: JobQueueConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> JobQueueConfig {
        self.config
    }

    pub fn bus(&self) -> &NotificationBus {
        &self.bus
    }

    pub fn now_millis(&self) -> i64 {
        self.time_provider.now_millis()
    }

    /// Create a pending queued job and return its id
    pub async fn enqueue(&self, job_type: &str, payload: serde_json::Value) -> Result<JobId> {
        let job = self
            .enqueue_with(EnqueueRequest::new(job_type, payload))
            .await?;
        Ok(job.id)
    }

    /// Validate, persist, then announce with JOB_ENQUEUED.
    ///
    /// Persistence errors propagate; nothing is published for a job that was
    /// not stored.
    pub async fn enqueue_with(&self, req: EnqueueRequest) -> Result<Job> {
        validate_request(&req)?;

        let mut job = Job::new(
            self.id_provider.generate_id(),
            self.time_provider.now_millis(),
            JobType::new(req.job_type),
            JobPayload::new(req.payload),
        )
        .with_dispatch(req.dispatch);
        job.page_data = req.page_data;

        self.store.insert(&job).await?;
        info!(job_id = %job.id, job_type = %job.job_type, dispatch = job.dispatch.as_str(), "Job enqueued");

        // Only direct jobs carry the snapshot the fast path executes from
        let msg = NotificationMessage::for_job(MessageType::JobEnqueued, &job, job.created_at)
            .with_destination(Destination::Offscreen);
        let msg = match job.dispatch {
            Dispatch::Direct => msg,
            Dispatch::Queued => msg.without_snapshot(),
        };
        self.bus.publish(msg);
        self.publish_queue_updated();

        Ok(job)
    }

    /// Claim the oldest claimable pending job
    pub async fn claim_next_pending(&self) -> Result<Option<Job>> {
        let now = self.time_provider.now_millis();
        let direct_cutoff = now - self.config.direct_grace_ms;
        let claimed = self.store.claim_next_pending(now, direct_cutoff).await?;

        if let Some(job) = &claimed {
            debug!(job_id = %job.id, job_type = %job.job_type, "Job claimed");
            self.bus
                .publish(NotificationMessage::for_job(MessageType::JobUpdated, job, now));
        }
        Ok(claimed)
    }

    /// Start a pending job outside the claim; `None` if it is no longer pending
    pub async fn start_pending(&self, job_id: &JobId, update: ProgressUpdate) -> Result<Option<Job>> {
        let now = self.time_provider.now_millis();
        match self.store.start_pending(job_id, &update, now).await? {
            Some(job) => {
                debug!(job_id = %job.id, dispatch = job.dispatch.as_str(), "Job started");
                self.bus
                    .publish(NotificationMessage::for_job(MessageType::JobUpdated, &job, now));
                Ok(Some(job))
            }
            None => {
                debug!(job_id = %job_id, "Start refused, job no longer pending");
                Ok(None)
            }
        }
    }

    /// Merge progress; `None` if the job was already terminal
    pub async fn update_progress(&self, job_id: &JobId, update: ProgressUpdate) -> Result<Option<Job>> {
        let now = self.time_provider.now_millis();
        match self.store.update_progress(job_id, &update, now).await? {
            Some(job) => {
                debug!(job_id = %job.id, stage = %update.stage, progress = job.progress, "Job progress");
                self.bus
                    .publish(NotificationMessage::for_job(MessageType::JobUpdated, &job, now));
                Ok(Some(job))
            }
            None => {
                debug!(job_id = %job_id, "Ignoring progress for terminal job");
                Ok(None)
            }
        }
    }

    /// Record the terminal outcome; `None` if the job was already terminal
    pub async fn complete(&self, job_id: &JobId, completion: Completion) -> Result<Option<Job>> {
        let now = self.time_provider.now_millis();
        match self.store.complete(job_id, &completion, now).await? {
            Some(job) => {
                if job.status == JobStatus::Completed {
                    info!(job_id = %job.id, job_type = %job.job_type, "Job completed");
                } else {
                    warn!(job_id = %job.id, job_type = %job.job_type, error = ?job.error, "Job failed");
                }
                self.bus
                    .publish(NotificationMessage::for_job(MessageType::JobCompleted, &job, now));
                self.publish_queue_updated();
                Ok(Some(job))
            }
            None => {
                debug!(job_id = %job_id, "Ignoring completion for terminal job");
                Ok(None)
            }
        }
    }

    pub async fn get(&self, job_id: &JobId) -> Result<Option<Job>> {
        self.store.find_by_id(job_id).await
    }

    pub async fn get_all(&self) -> Result<Vec<Job>> {
        self.store.get_all().await
    }

    /// Delete completed and failed jobs
    pub async fn clear_completed(&self) -> Result<u64> {
        let removed = self.store.clear_completed().await?;
        if removed > 0 {
            info!(removed, "Cleared finished jobs");
            self.publish_queue_updated();
        }
        Ok(removed)
    }

    /// Status as readers must see it (stale processing reads as failed)
    pub fn effective_status(&self, job: &Job) -> JobStatus {
        job.effective_status(self.time_provider.now_millis(), self.config.stale_after_ms)
    }

    /// Persist failure for processing jobs past the stale threshold.
    ///
    /// Run once by the controller at startup, before a new worker claims.
    pub async fn fail_stale_jobs(&self) -> Result<usize> {
        let now = self.time_provider.now_millis();
        let cutoff = now - self.config.stale_after_ms;
        info!(cutoff, stale_after_ms = self.config.stale_after_ms, "Starting stale job sweep");

        let failed = self.store.fail_stale(cutoff, now).await?;
        for job in &failed {
            warn!(job_id = %job.id, job_type = %job.job_type, "Stale job marked as failed");
            self.bus
                .publish(NotificationMessage::for_job(MessageType::JobCompleted, job, now));
        }
        if !failed.is_empty() {
            self.publish_queue_updated();
        }

        info!(failed = failed.len(), "Stale job sweep complete");
        Ok(failed.len())
    }

    fn publish_queue_updated(&self) {
        let msg = NotificationMessage::new(MessageType::JobQueueUpdated, self.time_provider.now_millis())
            .with_destination(Destination::Ui);
        self.bus.publish(msg);
    }
}

#[async_trait]
impl JobSource for JobQueue {
    async fn background_jobs(&self) -> Result<Vec<Job>> {
        self.get_all().await
    }

    async fn claim_job(&self) -> Result<Option<Job>> {
        self.claim_next_pending().await
    }

    async fn start_job(&self, job_id: &JobId, update: ProgressUpdate) -> Result<Option<Job>> {
        self.start_pending(job_id, update).await
    }

    async fn update_progress(&self, job_id: &JobId, update: ProgressUpdate) -> Result<Option<Job>> {
        JobQueue::update_progress(self, job_id, update).await
    }

    async fn complete_job(&self, job_id: &JobId, completion: Completion) -> Result<Option<Job>> {
        self.complete(job_id, completion).await
    }
}

/// Reject requests the store should never see
pub fn validate_request(req: &EnqueueRequest) -> Result<()> {
    let job_type = req.job_type.as_str();
    if job_type.is_empty() {
        return Err(AppError::Validation("Job type cannot be empty".to_string()));
    }
    if job_type.len() > MAX_JOB_TYPE_LEN {
        return Err(AppError::Validation(format!(
            "Job type too long: {} chars (max {})",
            job_type.len(),
            MAX_JOB_TYPE_LEN
        )));
    }
    if !job_type
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
    {
        return Err(AppError::Validation(format!(
            "Job type must be alphanumeric (plus '_', '-', '.'): {}",
            job_type
        )));
    }

    let depth = json_depth(&req.payload);
    if depth > MAX_PAYLOAD_DEPTH {
        return Err(AppError::Validation(format!(
            "Payload nesting too deep: {} (max {})",
            depth, MAX_PAYLOAD_DEPTH
        )));
    }
    Ok(())
}

fn json_depth(value: &serde_json::Value) -> usize {
    match value {
        serde_json::Value::Array(items) => 1 + items.iter().map(json_depth).max().unwrap_or(0),
        serde_json::Value::Object(map) => 1 + map.values().map(json_depth).max().unwrap_or(0),
        _ => 0,
    }
}
