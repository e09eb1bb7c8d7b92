//! RPC Method Handlers
//!
//! Implements the business logic for each JSON-RPC method.

use crate::error::{throttled, to_rpc_error};
use crate::rate_limiter::RateLimiter;
use crate::types::{
    ClearCompletedRequest, ClearCompletedResponse, EnqueueRequest, EnqueueResponse,
    GetJobRequest, JobView, ListJobsRequest, ListJobsResponse, PingRequest, PingResponse,
    WaitJobRequest, WaitJobResponse,
};
use jsonrpsee::types::ErrorObjectOwned;
use recall_core::application::{queue, JobExecutor, JobQueue, OffscreenController};
use recall_core::domain::Job;
use recall_core::error::AppError;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

/// RPC Handler with injected dependencies
pub struct RpcHandler {
    queue: Arc<JobQueue>,
    controller: Arc<OffscreenController>,
    executor: JobExecutor,
    rate_limiter: RateLimiter,
    start_time: Instant,
}

impl RpcHandler {
    pub fn new(
        queue: Arc<JobQueue>,
        controller: Arc<OffscreenController>,
        rate_limiter: RateLimiter,
    ) -> Self {
        Self {
            executor: JobExecutor::new(Arc::clone(&queue)),
            queue,
            controller,
            rate_limiter,
            start_time: Instant::now(),
        }
    }

    fn view(&self, job: Job) -> JobView {
        let effective = self.queue.effective_status(&job);
        JobView::new(job, effective)
    }

    async fn find(&self, job_id: &String) -> Result<Job, ErrorObjectOwned> {
        self.queue
            .get(job_id)
            .await
            .map_err(to_rpc_error)?
            .ok_or_else(|| to_rpc_error(AppError::NotFound(format!("Job {} not found", job_id))))
    }

    /// jobs.enqueue.v1
    pub async fn enqueue(
        &self,
        params: EnqueueRequest,
    ) -> Result<EnqueueResponse, ErrorObjectOwned> {
        // Rate limiting check (DoS protection)
        if !self.rate_limiter.check().await {
            return Err(throttled());
        }

        let job = self
            .queue
            .enqueue_with(queue::EnqueueRequest {
                job_type: params.job_type,
                payload: params.payload,
                dispatch: params.dispatch,
                page_data: params.page_data,
            })
            .await
            .map_err(to_rpc_error)?;

        info!(job_id = %job.id, job_type = %job.job_type, "Job enqueued via RPC");

        Ok(EnqueueResponse {
            job_id: job.id,
            status: job.status,
            dispatch: job.dispatch,
        })
    }

    /// jobs.get.v1
    pub async fn get(&self, params: GetJobRequest) -> Result<JobView, ErrorObjectOwned> {
        let job = self.find(&params.job_id).await?;
        Ok(self.view(job))
    }

    /// jobs.list.v1
    pub async fn list(&self, params: ListJobsRequest) -> Result<ListJobsResponse, ErrorObjectOwned> {
        let jobs = self
            .queue
            .get_all()
            .await
            .map_err(to_rpc_error)?
            .into_iter()
            .map(|job| self.view(job))
            .filter(|view| params.status.map_or(true, |s| view.effective_status == s))
            .collect();

        Ok(ListJobsResponse { jobs })
    }

    /// jobs.clear_completed.v1
    pub async fn clear_completed(
        &self,
        _params: ClearCompletedRequest,
    ) -> Result<ClearCompletedResponse, ErrorObjectOwned> {
        let deleted = self.queue.clear_completed().await.map_err(to_rpc_error)?;
        Ok(ClearCompletedResponse { deleted })
    }

    /// jobs.wait.v1
    pub async fn wait(&self, params: WaitJobRequest) -> Result<WaitJobResponse, ErrorObjectOwned> {
        let waited = tokio::time::timeout(
            Duration::from_millis(params.timeout_ms),
            self.executor.wait(params.job_id.clone()),
        )
        .await;

        match waited {
            Ok(outcome) => {
                let outcome = outcome.map_err(to_rpc_error)?;
                Ok(WaitJobResponse {
                    job_id: params.job_id,
                    done: true,
                    status: outcome.status,
                    result: outcome.result,
                    error: outcome.error,
                })
            }
            Err(_) => {
                let view = self.view(self.find(&params.job_id).await?);
                Ok(WaitJobResponse {
                    job_id: params.job_id,
                    done: view.effective_status.is_terminal(),
                    status: view.effective_status,
                    result: view.result,
                    error: view.error,
                })
            }
        }
    }

    /// worker.ping.v1
    pub async fn ping(&self, params: PingRequest) -> Result<PingResponse, ErrorObjectOwned> {
        let timeout = params.timeout_ms.map(Duration::from_millis);
        Ok(PingResponse {
            alive: self.controller.ping(timeout).await,
            ready: self.controller.is_ready(),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        })
    }
}
