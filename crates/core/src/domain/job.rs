// Job Domain Model

use crate::domain::error::{DomainError, Result};
use serde::{Deserialize, Serialize};

/// Job ID (UUID v4)
pub type JobId = String;

/// Highest progress value a non-terminal job may report
pub const MAX_ACTIVE_PROGRESS: u8 = 99;

/// Progress value of every terminal job
pub const TERMINAL_PROGRESS: u8 = 100;

/// Job Status
///
/// Transitions are `Pending -> Processing -> {Completed, Failed}` only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Position in the lifecycle (terminal states share the last rank)
    pub fn rank(&self) -> u8 {
        match self {
            JobStatus::Pending => 0,
            JobStatus::Processing => 1,
            JobStatus::Completed | JobStatus::Failed => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a job reaches the processor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Dispatch {
    /// Claimed from the store by the queue path
    #[default]
    Queued,
    /// Executed straight from the JOB_ENQUEUED snapshot (fast path)
    Direct,
}

impl Dispatch {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dispatch::Queued => "queued",
            Dispatch::Direct => "direct",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Dispatch::Queued),
            "direct" => Some(Dispatch::Direct),
            _ => None,
        }
    }
}

/// Job Type tag, selects a handler in the registry
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobType(String);

impl JobType {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobType {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Job Payload (opaque to the queue, interpreted by the matching handler)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobPayload(serde_json::Value);

impl JobPayload {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }

    pub fn into_value(self) -> serde_json::Value {
        self.0
    }
}

/// Captured page content for content-specific jobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageData {
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: String,
}

/// Progress report merged into a running job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub stage: String,
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}

impl ProgressUpdate {
    /// Progress is clamped to `0..=99`; only completion reaches 100
    pub fn new(stage: impl Into<String>, progress: u8) -> Self {
        Self {
            stage: stage.into(),
            progress: progress.min(MAX_ACTIVE_PROGRESS),
            result: None,
        }
    }

    pub fn with_result(mut self, result: serde_json::Value) -> Self {
        self.result = Some(result);
        self
    }

    /// First report of a fast-path job
    pub fn started() -> Self {
        Self::new("Starting", 0)
    }
}

/// Terminal outcome of a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Completion {
    pub fn success(result: Option<serde_json::Value>) -> Self {
        Self {
            success: true,
            result,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error.into()),
        }
    }

    pub fn status(&self) -> JobStatus {
        if self.success {
            JobStatus::Completed
        } else {
            JobStatus::Failed
        }
    }
}

/// Job Entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub job_type: JobType,
    pub payload: JobPayload,
    #[serde(default)]
    pub dispatch: Dispatch,

    pub status: JobStatus,
    pub progress: u8,
    pub stage: Option<String>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,

    pub created_at: i64, // epoch ms
    pub status_valid_from: i64,
    pub completed_at: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_data: Option<PageData>,
}

impl Job {
    /// Create a new pending Job
    ///
    /// # Arguments
    ///
    /// * `id` - Unique job ID (injected, not generated)
    /// * `created_at` - Creation timestamp in epoch ms (injected, not system time)
    /// * `job_type` - Handler tag
    /// * `payload` - Job payload
    pub fn new(id: impl Into<String>, created_at: i64, job_type: JobType, payload: JobPayload) -> Self {
        Self {
            id: id.into(),
            job_type,
            payload,
            dispatch: Dispatch::Queued,
            status: JobStatus::Pending,
            progress: 0,
            stage: None,
            result: None,
            error: None,
            created_at,
            status_valid_from: created_at,
            completed_at: None,
            page_data: None,
        }
    }

    /// Create a test job with deterministic ID and timestamp.
    ///
    /// Uses a simple counter for deterministic test IDs (test-1, test-2, ...).
    /// Timestamps start at 1000 and increment by 1000.
    pub fn new_test(job_type: impl Into<String>, payload: serde_json::Value) -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static TEST_COUNTER: AtomicU64 = AtomicU64::new(1);

        let counter = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
        Self::new(
            format!("test-{}", counter),
            (counter * 1000) as i64,
            JobType::new(job_type),
            JobPayload::new(payload),
        )
    }

    pub fn with_dispatch(mut self, dispatch: Dispatch) -> Self {
        self.dispatch = dispatch;
        self
    }

    pub fn with_page_data(mut self, page_data: PageData) -> Self {
        self.page_data = Some(page_data);
        self
    }

    /// Transition `Pending -> Processing` (the claim)
    pub fn claim(&mut self, now_millis: i64) -> Result<()> {
        if self.status != JobStatus::Pending {
            return Err(self.transition_error(JobStatus::Processing));
        }
        self.status = JobStatus::Processing;
        self.status_valid_from = now_millis;
        Ok(())
    }

    /// Merge a progress report.
    ///
    /// A pending job is moved to processing. Progress never decreases.
    pub fn apply_progress(&mut self, update: &ProgressUpdate, now_millis: i64) -> Result<()> {
        if self.status.is_terminal() {
            return Err(DomainError::TerminalJob(self.id.clone()));
        }
        if self.status == JobStatus::Pending {
            self.claim(now_millis)?;
        }
        self.stage = Some(update.stage.clone());
        self.progress = self
            .progress
            .max(update.progress.min(MAX_ACTIVE_PROGRESS));
        if let Some(result) = &update.result {
            self.result = Some(result.clone());
        }
        Ok(())
    }

    /// Transition `Processing -> Completed | Failed`
    pub fn finish(&mut self, completion: &Completion, now_millis: i64) -> Result<()> {
        if self.status.is_terminal() {
            return Err(DomainError::TerminalJob(self.id.clone()));
        }
        let target = completion.status();
        if self.status != JobStatus::Processing {
            return Err(self.transition_error(target));
        }
        self.status = target;
        self.progress = TERMINAL_PROGRESS;
        self.status_valid_from = now_millis;
        self.completed_at = Some(now_millis);
        if let Some(result) = &completion.result {
            self.result = Some(result.clone());
        }
        self.error = if completion.success {
            None
        } else {
            Some(
                completion
                    .error
                    .clone()
                    .unwrap_or_else(|| "job failed".to_string()),
            )
        };
        Ok(())
    }

    /// True when a processing job has not changed status within `stale_after_ms`
    pub fn is_stale(&self, now_millis: i64, stale_after_ms: i64) -> bool {
        self.status == JobStatus::Processing && now_millis - self.status_valid_from > stale_after_ms
    }

    /// Status as readers must see it: stale processing jobs count as failed.
    /// The stored record is left untouched.
    pub fn effective_status(&self, now_millis: i64, stale_after_ms: i64) -> JobStatus {
        if self.is_stale(now_millis, stale_after_ms) {
            JobStatus::Failed
        } else {
            self.status
        }
    }

    fn transition_error(&self, to: JobStatus) -> DomainError {
        DomainError::InvalidStateTransition {
            from: self.status.to_string(),
            to: to.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_new_job_is_pending() {
        let job = Job::new("a", 10, JobType::new("echo"), JobPayload::new(json!({})));
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.progress, 0);
        assert_eq!(job.status_valid_from, 10);
        assert!(job.result.is_none() && job.error.is_none());
    }

    #[test]
    fn test_claim_only_from_pending() {
        let mut job = Job::new_test("echo", json!({}));
        assert_ok!(job.claim(50));
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.status_valid_from, 50);

        let err = assert_err!(job.claim(60));
        assert!(matches!(err, DomainError::InvalidStateTransition { .. }));
    }

    #[test]
    fn test_progress_is_monotonic_and_capped() {
        let mut job = Job::new_test("echo", json!({}));
        job.claim(1).unwrap();

        job.apply_progress(&ProgressUpdate::new("a", 40), 2).unwrap();
        job.apply_progress(&ProgressUpdate::new("b", 20), 3).unwrap();
        assert_eq!(job.progress, 40);
        assert_eq!(job.stage.as_deref(), Some("b"));

        job.apply_progress(&ProgressUpdate::new("c", 250), 4).unwrap();
        assert_eq!(job.progress, MAX_ACTIVE_PROGRESS);
    }

    #[test]
    fn test_progress_on_pending_starts_job() {
        let mut job = Job::new_test("echo", json!({})).with_dispatch(Dispatch::Direct);
        job.apply_progress(&ProgressUpdate::started(), 77).unwrap();
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.status_valid_from, 77);
    }

    #[test]
    fn test_finish_sets_terminal_fields() {
        let mut job = Job::new_test("echo", json!({}));
        job.claim(1).unwrap();
        job.finish(&Completion::success(Some(json!({"text": "hi"}))), 9)
            .unwrap();

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, TERMINAL_PROGRESS);
        assert_eq!(job.completed_at, Some(9));
        assert_eq!(job.result, Some(json!({"text": "hi"})));
    }

    #[test]
    fn test_finish_failure_keeps_message() {
        let mut job = Job::new_test("echo", json!({}));
        job.claim(1).unwrap();
        job.finish(&Completion::failure("boom"), 2).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("boom"));
        assert_eq!(job.progress, TERMINAL_PROGRESS);
    }

    #[test]
    fn test_finish_requires_processing() {
        let mut job = Job::new_test("echo", json!({}));
        assert!(job.finish(&Completion::success(None), 2).is_err());
        assert_eq!(job.status, JobStatus::Pending);
    }

    #[test]
    fn test_terminal_job_rejects_updates() {
        let mut job = Job::new_test("echo", json!({}));
        job.claim(1).unwrap();
        job.finish(&Completion::success(None), 2).unwrap();

        let err = job
            .apply_progress(&ProgressUpdate::new("late", 10), 3)
            .unwrap_err();
        assert!(matches!(err, DomainError::TerminalJob(_)));
        assert!(matches!(
            job.finish(&Completion::failure("late"), 4),
            Err(DomainError::TerminalJob(_))
        ));
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[test]
    fn test_effective_status_marks_stale_processing_failed() {
        let mut job = Job::new_test("echo", json!({}));
        job.claim(1_000).unwrap();
        let stale_after = 30 * 60 * 1000;

        assert_eq!(job.effective_status(2_000, stale_after), JobStatus::Processing);
        assert_eq!(
            job.effective_status(1_000 + stale_after + 1, stale_after),
            JobStatus::Failed
        );
        // Stored record is untouched
        assert_eq!(job.status, JobStatus::Processing);
    }

    #[test]
    fn test_effective_status_ignores_old_pending() {
        let job = Job::new("a", 0, JobType::new("echo"), JobPayload::new(json!({})));
        assert_eq!(job.effective_status(i64::MAX / 2, 1), JobStatus::Pending);
    }

    #[test]
    fn test_job_serializes_camel_case() {
        let job = Job::new("a", 5, JobType::new("echo"), JobPayload::new(json!({"k": 1})));
        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["jobType"], "echo");
        assert_eq!(value["status"], "pending");
        assert_eq!(value["statusValidFrom"], 5);
        assert_eq!(value["payload"]["k"], 1);
    }
}
