// Progress Streaming and the execute-and-await API
//
// A JobProgressStream subscribes before it reads the store, so a job that is
// already mid-flight is replayed from the store and then followed on the bus.
// The store is re-read on a fixed interval in case notifications are lost.

use crate::application::bus::MessageReceiver;
use crate::application::processor::constants::PROGRESS_RECHECK_INTERVAL;
use crate::application::queue::{EnqueueRequest, JobQueue};
use crate::domain::{Dispatch, Job, JobId, JobStatus, Topic};
use crate::error::{AppError, Result};
use futures::future::BoxFuture;
use futures::stream::{self, BoxStream};
use futures::{FutureExt, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tracing::{debug, warn};

/// What an observer sees of a job at one point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub job_id: JobId,
    /// Effective status (stale processing reads as failed)
    pub status: JobStatus,
    pub progress: u8,
    pub stage: Option<String>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl JobSnapshot {
    fn from_job(job: Job, status: JobStatus) -> Self {
        let error = match (status, job.status) {
            (JobStatus::Failed, JobStatus::Processing) => {
                Some("worker timed out".to_string())
            }
            _ => job.error,
        };
        Self {
            job_id: job.id,
            status,
            progress: if status.is_terminal() { 100 } else { job.progress },
            stage: job.stage,
            result: job.result,
            error,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// True if `self` is news after `prev`: later status, more progress, or a
    /// new stage or partial result at the same progress
    fn advances(&self, prev: &JobSnapshot) -> bool {
        let (rank, prev_rank) = (self.status.rank(), prev.status.rank());
        if rank != prev_rank {
            return rank > prev_rank;
        }
        if prev.is_terminal() {
            return false;
        }
        self.progress > prev.progress
            || (self.progress == prev.progress
                && (self.stage != prev.stage || self.result != prev.result))
    }
}

/// Lazy, finite, non-restartable sequence of snapshots for one job.
///
/// Ends after the terminal snapshot, or right away if the job does not exist.
pub struct JobProgressStream {
    inner: BoxStream<'static, JobSnapshot>,
}

struct Watch {
    queue: Arc<JobQueue>,
    job_id: JobId,
    rx: MessageReceiver,
    recheck: Duration,
    last: Option<JobSnapshot>,
    replayed: bool,
    bus_closed: bool,
    done: bool,
}

enum Source {
    Store,
    Snapshot(Job),
}

impl JobProgressStream {
    pub fn new(queue: Arc<JobQueue>, job_id: JobId) -> Self {
        let rx = queue.bus().subscribe_channel(Topic::All);
        Self::with_receiver(queue, job_id, rx, PROGRESS_RECHECK_INTERVAL)
    }

    /// Use a receiver opened earlier (e.g. before the job was enqueued)
    pub fn with_receiver(
        queue: Arc<JobQueue>,
        job_id: JobId,
        rx: MessageReceiver,
        recheck: Duration,
    ) -> Self {
        let watch = Watch {
            queue,
            job_id,
            rx,
            recheck,
            last: None,
            replayed: false,
            bus_closed: false,
            done: false,
        };
        let inner = stream::unfold(watch, |mut w| async move {
            let snapshot = w.next_snapshot().await?;
            Some((snapshot, w))
        })
        .boxed();
        Self { inner }
    }
}

impl Watch {
    async fn next_snapshot(&mut self) -> Option<JobSnapshot> {
        loop {
            if self.done {
                return None;
            }

            let source = if !self.replayed {
                self.replayed = true;
                Source::Store
            } else {
                self.wait_for_change().await
            };

            let job = match source {
                Source::Snapshot(job) => job,
                Source::Store => match self.queue.get(&self.job_id).await {
                    Ok(Some(job)) => job,
                    Ok(None) => {
                        debug!(job_id = %self.job_id, "Watched job not in store, ending stream");
                        self.done = true;
                        return None;
                    }
                    Err(e) => {
                        warn!(job_id = %self.job_id, error = %e, "Store read failed while watching job");
                        continue;
                    }
                },
            };

            let status = self.queue.effective_status(&job);
            let snapshot = JobSnapshot::from_job(job, status);
            if let Some(prev) = &self.last {
                if !snapshot.advances(prev) {
                    continue;
                }
            }
            if snapshot.is_terminal() {
                self.done = true;
            }
            self.last = Some(snapshot.clone());
            return Some(snapshot);
        }
    }

    async fn wait_for_change(&mut self) -> Source {
        if self.bus_closed {
            tokio::time::sleep(self.recheck).await;
            return Source::Store;
        }
        let deadline = tokio::time::sleep(self.recheck);
        tokio::pin!(deadline);
        loop {
            let received = tokio::select! {
                msg = self.rx.recv() => Some(msg),
                _ = &mut deadline => None,
            };
            match received {
                None => return Source::Store,
                Some(None) => {
                    self.bus_closed = true;
                    return Source::Store;
                }
                Some(Some(msg)) if msg.job_id.as_deref() == Some(self.job_id.as_str()) => {
                    return match msg.job {
                        Some(job) => Source::Snapshot(job),
                        None => Source::Store,
                    };
                }
                Some(Some(_)) => continue,
            }
        }
    }
}

impl Stream for JobProgressStream {
    type Item = JobSnapshot;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

/// Final state of an executed job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOutcome {
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<JobSnapshot> for JobOutcome {
    fn from(snapshot: JobSnapshot) -> Self {
        Self {
            status: snapshot.status,
            result: snapshot.result,
            error: snapshot.error,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ExecuteOptions {
    pub stream: bool,
    pub dispatch: Dispatch,
}

impl ExecuteOptions {
    pub fn streaming() -> Self {
        Self {
            stream: true,
            ..Self::default()
        }
    }

    pub fn with_dispatch(mut self, dispatch: Dispatch) -> Self {
        self.dispatch = dispatch;
        self
    }
}

pub enum Execution {
    Promise {
        job_id: JobId,
        outcome: BoxFuture<'static, Result<JobOutcome>>,
    },
    Stream {
        job_id: JobId,
        stream: JobProgressStream,
    },
}

impl Execution {
    pub fn job_id(&self) -> &JobId {
        match self {
            Execution::Promise { job_id, .. } | Execution::Stream { job_id, .. } => job_id,
        }
    }
}

/// Enqueue-and-observe for producers
#[derive(Clone)]
pub struct JobExecutor {
    queue: Arc<JobQueue>,
    recheck: Duration,
}

impl JobExecutor {
    pub fn new(queue: Arc<JobQueue>) -> Self {
        Self {
            queue,
            recheck: PROGRESS_RECHECK_INTERVAL,
        }
    }

    pub fn with_recheck_interval(mut self, recheck: Duration) -> Self {
        self.recheck = recheck;
        self
    }

    pub async fn execute(
        &self,
        job_type: &str,
        payload: serde_json::Value,
        options: ExecuteOptions,
    ) -> Result<Execution> {
        // Subscribe first: a fast job may finish before enqueue returns
        let rx = self.queue.bus().subscribe_channel(Topic::All);
        let mut req = EnqueueRequest::new(job_type, payload);
        req.dispatch = options.dispatch;
        let job = self.queue.enqueue_with(req).await?;

        let stream = JobProgressStream::with_receiver(Arc::clone(&self.queue), job.id.clone(), rx, self.recheck);
        if options.stream {
            return Ok(Execution::Stream {
                job_id: job.id,
                stream,
            });
        }
        let job_id = job.id;
        let outcome = wait_for_outcome(job_id.clone(), stream).boxed();
        Ok(Execution::Promise { job_id, outcome })
    }

    /// Follow an existing job
    pub fn watch(&self, job_id: JobId) -> JobProgressStream {
        let rx = self.queue.bus().subscribe_channel(Topic::All);
        JobProgressStream::with_receiver(Arc::clone(&self.queue), job_id, rx, self.recheck)
    }

    /// Resolve once an existing job is terminal
    pub async fn wait(&self, job_id: JobId) -> Result<JobOutcome> {
        let stream = self.watch(job_id.clone());
        wait_for_outcome(job_id, stream).await
    }
}

async fn wait_for_outcome(job_id: JobId, stream: JobProgressStream) -> Result<JobOutcome> {
    let last = stream.fold(None, |_, snapshot| async move { Some(snapshot) }).await;
    match last {
        Some(snapshot) if snapshot.is_terminal() => Ok(snapshot.into()),
        _ => Err(AppError::NotFound(format!("Job {} not found", job_id))),
    }
}
