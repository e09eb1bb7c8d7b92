// Control Channel - worker context -> controller context
//
// The worker never touches the store. Its JobSource is a request/response
// channel served by the controller against the JobQueue.

use crate::application::queue::JobQueue;
use crate::domain::{Completion, Job, JobId, MessageType, ProgressUpdate};
use crate::error::{AppError, Result};
use crate::port::JobSource;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::processor::ShutdownToken;

/// One control request with its reply slot
pub enum ControlRequest {
    GetBackgroundJobs {
        reply: oneshot::Sender<Result<Vec<Job>>>,
    },
    ClaimJob {
        reply: oneshot::Sender<Result<Option<Job>>>,
    },
    StartJob {
        job_id: JobId,
        update: ProgressUpdate,
        reply: oneshot::Sender<Result<Option<Job>>>,
    },
    UpdateProgress {
        job_id: JobId,
        update: ProgressUpdate,
        reply: oneshot::Sender<Result<Option<Job>>>,
    },
    CompleteJob {
        job_id: JobId,
        completion: Completion,
        reply: oneshot::Sender<Result<Option<Job>>>,
    },
}

impl ControlRequest {
    /// Wire name of the request
    pub fn kind(&self) -> MessageType {
        match self {
            ControlRequest::GetBackgroundJobs { .. } => MessageType::GetBackgroundJobs,
            ControlRequest::ClaimJob { .. } => MessageType::ClaimJobForOffscreen,
            ControlRequest::StartJob { .. } | ControlRequest::UpdateProgress { .. } => {
                MessageType::UpdateJobProgress
            }
            ControlRequest::CompleteJob { .. } => MessageType::CompleteJob,
        }
    }
}

/// Create the channel between a RemoteJobSource and a ControlServer
pub fn control_channel(capacity: usize) -> (RemoteJobSource, mpsc::Receiver<ControlRequest>) {
    let (tx, rx) = mpsc::channel(capacity);
    (RemoteJobSource { tx }, rx)
}

/// JobSource used inside the worker context
#[derive(Clone)]
pub struct RemoteJobSource {
    tx: mpsc::Sender<ControlRequest>,
}

impl RemoteJobSource {
    async fn call<T>(
        &self,
        kind: MessageType,
        build: impl FnOnce(oneshot::Sender<Result<T>>) -> ControlRequest,
    ) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| AppError::Transport(format!("{}: controller is not listening", kind)))?;
        reply_rx
            .await
            .map_err(|_| AppError::Transport(format!("{}: controller dropped the request", kind)))?
    }
}

#[async_trait]
impl JobSource for RemoteJobSource {
    async fn background_jobs(&self) -> Result<Vec<Job>> {
        self.call(MessageType::GetBackgroundJobs, |reply| {
            ControlRequest::GetBackgroundJobs { reply }
        })
        .await
    }

    async fn claim_job(&self) -> Result<Option<Job>> {
        self.call(MessageType::ClaimJobForOffscreen, |reply| ControlRequest::ClaimJob {
            reply,
        })
        .await
    }

    async fn start_job(&self, job_id: &JobId, update: ProgressUpdate) -> Result<Option<Job>> {
        let job_id = job_id.clone();
        self.call(MessageType::UpdateJobProgress, |reply| ControlRequest::StartJob {
            job_id,
            update,
            reply,
        })
        .await
    }

    async fn update_progress(&self, job_id: &JobId, update: ProgressUpdate) -> Result<Option<Job>> {
        let job_id = job_id.clone();
        self.call(MessageType::UpdateJobProgress, |reply| {
            ControlRequest::UpdateProgress {
                job_id,
                update,
                reply,
            }
        })
        .await
    }

    async fn complete_job(&self, job_id: &JobId, completion: Completion) -> Result<Option<Job>> {
        let job_id = job_id.clone();
        self.call(MessageType::CompleteJob, |reply| ControlRequest::CompleteJob {
            job_id,
            completion,
            reply,
        })
        .await
    }
}

/// Serves control requests against the queue, one at a time
pub struct ControlServer {
    queue: Arc<JobQueue>,
}

impl ControlServer {
    pub fn new(queue: Arc<JobQueue>) -> Self {
        Self { queue }
    }

    /// Serve until every RemoteJobSource is dropped or shutdown fires
    pub fn spawn(self, mut rx: mpsc::Receiver<ControlRequest>, mut shutdown: ShutdownToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("Control server started");
            loop {
                tokio::select! {
                    request = rx.recv() => match request {
                        Some(request) => self.handle(request).await,
                        None => break,
                    },
                    _ = shutdown.wait() => break,
                }
            }
            info!("Control server stopped");
        })
    }

    async fn handle(&self, request: ControlRequest) {
        let kind = request.kind();
        debug!(kind = %kind, "Control request");

        // A failed reply means the worker gave up waiting; nothing to do
        let delivered = match request {
            ControlRequest::GetBackgroundJobs { reply } => {
                reply.send(self.queue.get_all().await).is_ok()
            }
            ControlRequest::ClaimJob { reply } => {
                reply.send(self.queue.claim_next_pending().await).is_ok()
            }
            ControlRequest::StartJob {
                job_id,
                update,
                reply,
            } => reply
                .send(self.queue.start_pending(&job_id, update).await)
                .is_ok(),
            ControlRequest::UpdateProgress {
                job_id,
                update,
                reply,
            } => reply
                .send(self.queue.update_progress(&job_id, update).await)
                .is_ok(),
            ControlRequest::CompleteJob {
                job_id,
                completion,
                reply,
            } => reply
                .send(self.queue.complete(&job_id, completion).await)
                .is_ok(),
        };
        if !delivered {
            debug!(kind = %kind, "Control reply dropped, requester gone");
        }
    }
}
