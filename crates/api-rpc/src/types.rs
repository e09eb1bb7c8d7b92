//! RPC Request/Response Types
//!
//! JSON-RPC method parameters and results. Params are named (JSON objects).

use recall_core::domain::{Dispatch, Job, JobStatus, PageData};
use serde::{Deserialize, Serialize};

/// jobs.enqueue.v1 - Enqueue a job
#[derive(Debug, Deserialize)]
pub struct EnqueueRequest {
    pub job_type: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default)]
    pub dispatch: Dispatch,
    #[serde(default)]
    pub page_data: Option<PageData>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueResponse {
    pub job_id: String,
    pub status: JobStatus,
    pub dispatch: Dispatch,
}

/// jobs.get.v1 - Fetch one job
#[derive(Debug, Deserialize)]
pub struct GetJobRequest {
    pub job_id: String,
}

/// A job as producers see it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobView {
    pub job_id: String,
    pub job_type: String,
    /// Stored status
    pub status: JobStatus,
    /// Status readers must act on (stale processing reads as failed)
    pub effective_status: JobStatus,
    pub progress: u8,
    pub stage: Option<String>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub dispatch: Dispatch,
    pub created_at: i64,
    pub completed_at: Option<i64>,
}

impl JobView {
    pub fn new(job: Job, effective_status: JobStatus) -> Self {
        Self {
            job_id: job.id,
            job_type: job.job_type.to_string(),
            status: job.status,
            effective_status,
            progress: job.progress,
            stage: job.stage,
            result: job.result,
            error: job.error,
            dispatch: job.dispatch,
            created_at: job.created_at,
            completed_at: job.completed_at,
        }
    }
}

/// jobs.list.v1 - List jobs, oldest first
#[derive(Debug, Default, Deserialize)]
pub struct ListJobsRequest {
    /// Filter on effective status
    #[serde(default)]
    pub status: Option<JobStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListJobsResponse {
    pub jobs: Vec<JobView>,
}

/// jobs.clear_completed.v1 - Delete terminal jobs
#[derive(Debug, Default, Deserialize)]
pub struct ClearCompletedRequest {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClearCompletedResponse {
    pub deleted: u64,
}

/// jobs.wait.v1 - Block until a job is terminal or the timeout passes
#[derive(Debug, Deserialize)]
pub struct WaitJobRequest {
    pub job_id: String,
    #[serde(default = "default_wait_ms")]
    pub timeout_ms: u64,
}

fn default_wait_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitJobResponse {
    pub job_id: String,
    pub done: bool,
    pub status: JobStatus,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

/// worker.ping.v1 - Worker liveness
#[derive(Debug, Default, Deserialize)]
pub struct PingRequest {
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingResponse {
    pub alive: bool,
    pub ready: bool,
    pub uptime_seconds: u64,
}
