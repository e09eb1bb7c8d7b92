// Job Store Port (Interface)
//
// The store is the only mutable state shared between contexts. Every writer goes
// through these atomic operations, never read-modify-write across messages.

use crate::domain::{Completion, Job, JobId, ProgressUpdate};
use crate::error::Result;
use async_trait::async_trait;

/// Durable keyed table of jobs
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job
    async fn insert(&self, job: &Job) -> Result<()>;

    /// Find job by ID
    async fn find_by_id(&self, id: &JobId) -> Result<Option<Job>>;

    /// All jobs, oldest first
    async fn get_all(&self) -> Result<Vec<Job>>;

    /// Atomically claim the oldest claimable pending job (FIFO).
    ///
    /// Queued jobs are always claimable; direct jobs only once created at or
    /// before `direct_cutoff`. Two concurrent callers never get the same job.
    async fn claim_next_pending(&self, now: i64, direct_cutoff: i64) -> Result<Option<Job>>;

    /// Move a still-pending job to processing with its first report.
    ///
    /// The fast path's stand-in for a claim: `None` when the job is no longer
    /// pending (claimed elsewhere or terminal), `NotFound` when missing.
    async fn start_pending(
        &self,
        id: &JobId,
        update: &ProgressUpdate,
        now: i64,
    ) -> Result<Option<Job>>;

    /// Merge progress into a job.
    ///
    /// Returns `None` when the job is already terminal (ignored, not an error).
    async fn update_progress(
        &self,
        id: &JobId,
        update: &ProgressUpdate,
        now: i64,
    ) -> Result<Option<Job>>;

    /// Move a processing job to its terminal status.
    ///
    /// Returns `None` when the job is already terminal.
    async fn complete(&self, id: &JobId, completion: &Completion, now: i64)
        -> Result<Option<Job>>;

    /// Delete every terminal job, returning how many were removed
    async fn clear_completed(&self) -> Result<u64>;

    /// Persist failure for processing jobs whose status predates `cutoff`
    async fn fail_stale(&self, cutoff: i64, now: i64) -> Result<Vec<Job>>;
}

// ============================================================================
// In-memory adapter (single process, tests)
// ============================================================================

pub mod memory {
    use super::*;
    use crate::domain::{DomainError, Dispatch, JobStatus};
    use crate::error::AppError;
    use std::sync::Mutex;

    /// Mutex-serialized store; the lock is never held across an await point
    #[derive(Default)]
    pub struct InMemoryJobStore {
        jobs: Mutex<Vec<Job>>,
    }

    impl InMemoryJobStore {
        pub fn new() -> Self {
            Self::default()
        }

        fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Job>> {
            self.jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
        }

        fn write<F>(&self, id: &JobId, apply: F) -> Result<Option<Job>>
        where
            F: FnOnce(&mut Job) -> crate::domain::error::Result<()>,
        {
            let mut jobs = self.lock();
            let job = jobs
                .iter_mut()
                .find(|j| &j.id == id)
                .ok_or_else(|| AppError::NotFound(format!("Job {} not found", id)))?;

            // Work on a copy so a rejected write leaves the record untouched
            let mut updated = job.clone();
            match apply(&mut updated) {
                Ok(()) => {
                    *job = updated.clone();
                    Ok(Some(updated))
                }
                Err(DomainError::TerminalJob(_)) => Ok(None),
                Err(e) => Err(e.into()),
            }
        }
    }

    #[async_trait]
    impl JobStore for InMemoryJobStore {
        async fn insert(&self, job: &Job) -> Result<()> {
            let mut jobs = self.lock();
            if jobs.iter().any(|j| j.id == job.id) {
                return Err(AppError::Database(format!(
                    "Unique constraint violation: job {}",
                    job.id
                )));
            }
            jobs.push(job.clone());
            Ok(())
        }

        async fn find_by_id(&self, id: &JobId) -> Result<Option<Job>> {
            Ok(self.lock().iter().find(|j| &j.id == id).cloned())
        }

        async fn get_all(&self) -> Result<Vec<Job>> {
            let mut jobs = self.lock().clone();
            jobs.sort_by_key(|j| j.created_at);
            Ok(jobs)
        }

        async fn claim_next_pending(&self, now: i64, direct_cutoff: i64) -> Result<Option<Job>> {
            let mut jobs = self.lock();
            // Stable order: created_at, then insertion order
            let next = jobs
                .iter_mut()
                .filter(|j| j.status == JobStatus::Pending)
                .filter(|j| j.dispatch == Dispatch::Queued || j.created_at <= direct_cutoff)
                .min_by_key(|j| j.created_at);

            match next {
                Some(job) => {
                    job.claim(now)?;
                    Ok(Some(job.clone()))
                }
                None => Ok(None),
            }
        }

        async fn start_pending(
            &self,
            id: &JobId,
            update: &ProgressUpdate,
            now: i64,
        ) -> Result<Option<Job>> {
            let mut jobs = self.lock();
            let job = jobs
                .iter_mut()
                .find(|j| &j.id == id)
                .ok_or_else(|| AppError::NotFound(format!("Job {} not found", id)))?;
            if job.status != JobStatus::Pending {
                return Ok(None);
            }
            job.apply_progress(update, now)?;
            Ok(Some(job.clone()))
        }

        async fn update_progress(
            &self,
            id: &JobId,
            update: &ProgressUpdate,
            now: i64,
        ) -> Result<Option<Job>> {
            self.write(id, |job| job.apply_progress(update, now))
        }

        async fn complete(
            &self,
            id: &JobId,
            completion: &Completion,
            now: i64,
        ) -> Result<Option<Job>> {
            self.write(id, |job| job.finish(completion, now))
        }

        async fn clear_completed(&self) -> Result<u64> {
            let mut jobs = self.lock();
            let before = jobs.len();
            jobs.retain(|j| !j.status.is_terminal());
            Ok((before - jobs.len()) as u64)
        }

        async fn fail_stale(&self, cutoff: i64, now: i64) -> Result<Vec<Job>> {
            let mut jobs = self.lock();
            let mut failed = Vec::new();
            for job in jobs.iter_mut() {
                if job.status == JobStatus::Processing && job.status_valid_from < cutoff {
                    job.finish(&Completion::failure("worker timed out"), now)?;
                    failed.push(job.clone());
                }
            }
            Ok(failed)
        }
    }

}
