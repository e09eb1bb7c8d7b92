// Job Source Port
//
// What the worker context needs from the job queue. The worker never owns the
// store: it reaches jobs either in-process or through control messages.

use crate::domain::{Completion, Job, JobId, ProgressUpdate};
use crate::error::Result;
use async_trait::async_trait;

#[async_trait]
pub trait JobSource: Send + Sync {
    /// GET_BACKGROUND_JOBS
    async fn background_jobs(&self) -> Result<Vec<Job>>;

    /// CLAIM_JOB_FOR_OFFSCREEN
    async fn claim_job(&self) -> Result<Option<Job>>;

    /// UPDATE_JOB_PROGRESS opening a fast-path run; `None` when the job is no
    /// longer pending
    async fn start_job(&self, job_id: &JobId, update: ProgressUpdate) -> Result<Option<Job>>;

    /// UPDATE_JOB_PROGRESS; `None` when the job was already terminal
    async fn update_progress(&self, job_id: &JobId, update: ProgressUpdate) -> Result<Option<Job>>;

    /// COMPLETE_JOB; `None` when the job was already terminal
    async fn complete_job(&self, job_id: &JobId, completion: Completion) -> Result<Option<Job>>;
}
