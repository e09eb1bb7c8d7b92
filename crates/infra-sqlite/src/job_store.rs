// SQLite JobStore Implementation
//
// Every write is a single conditional UPDATE, so concurrent contexts never
// read-modify-write the same row.

use crate::error::map_sqlx_error;
use async_trait::async_trait;
use recall_core::domain::job::{MAX_ACTIVE_PROGRESS, TERMINAL_PROGRESS};
use recall_core::domain::{
    Completion, Dispatch, DomainError, Job, JobId, JobPayload, JobStatus, JobType, PageData,
    ProgressUpdate,
};
use recall_core::error::{AppError, Result};
use recall_core::port::JobStore;
use sqlx::SqlitePool;
use tracing::debug;

const STALE_ERROR: &str = "worker timed out";

pub struct SqliteJobStore {
    pool: SqlitePool,
}

impl SqliteJobStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn current_status(&self, id: &JobId) -> Result<Option<JobStatus>> {
        let status: Option<String> = sqlx::query_scalar("SELECT status FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        status.map(|s| parse_status(&s)).transpose()
    }

    /// Explain why a conditional UPDATE touched no row
    async fn explain_miss(&self, id: &JobId, target: JobStatus) -> Result<Option<Job>> {
        match self.current_status(id).await? {
            None => Err(AppError::NotFound(format!("Job {} not found", id))),
            Some(status) if status.is_terminal() => {
                debug!(job_id = %id, status = %status, "Write ignored, job is terminal");
                Ok(None)
            }
            Some(status) => Err(DomainError::InvalidStateTransition {
                from: status.to_string(),
                to: target.to_string(),
            }
            .into()),
        }
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn insert(&self, job: &Job) -> Result<()> {
        let page_data = job
            .page_data
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let result = job.result.as_ref().map(|r| r.to_string());

        sqlx::query(
            r#"
            INSERT INTO jobs (
                id, job_type, payload, dispatch,
                status, progress, stage, result, error,
                created_at, status_valid_from, completed_at, page_data
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.id)
        .bind(job.job_type.as_str())
        .bind(job.payload.as_value().to_string())
        .bind(job.dispatch.as_str())
        .bind(job.status.as_str())
        .bind(job.progress as i64)
        .bind(&job.stage)
        .bind(&result)
        .bind(&job.error)
        .bind(job.created_at)
        .bind(job.status_valid_from)
        .bind(job.completed_at)
        .bind(&page_data)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn find_by_id(&self, id: &JobId) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        row.map(JobRow::into_job).transpose()
    }

    async fn get_all(&self) -> Result<Vec<Job>> {
        let rows: Vec<JobRow> =
            sqlx::query_as("SELECT * FROM jobs ORDER BY created_at ASC, rowid ASC")
                .fetch_all(&self.pool)
                .await
                .map_err(map_sqlx_error)?;

        rows.into_iter().map(JobRow::into_job).collect()
    }

    async fn claim_next_pending(&self, now: i64, direct_cutoff: i64) -> Result<Option<Job>> {
        // Select and flip in one statement: the outer status check makes a
        // second claimer of the same row update nothing
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE jobs
            SET status = 'processing', status_valid_from = ?
            WHERE id = (
                SELECT id FROM jobs
                WHERE status = 'pending'
                  AND (dispatch = 'queued' OR created_at <= ?)
                ORDER BY created_at ASC, rowid ASC
                LIMIT 1
            )
              AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(now)
        .bind(direct_cutoff)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.map(JobRow::into_job).transpose()
    }

    async fn start_pending(
        &self,
        id: &JobId,
        update: &ProgressUpdate,
        now: i64,
    ) -> Result<Option<Job>> {
        let result = update.result.as_ref().map(|r| r.to_string());

        let row = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE jobs
            SET status = 'processing',
                status_valid_from = ?,
                stage = ?,
                progress = MAX(progress, ?),
                result = COALESCE(?, result)
            WHERE id = ?
              AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(now)
        .bind(&update.stage)
        .bind(update.progress.min(MAX_ACTIVE_PROGRESS) as i64)
        .bind(&result)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if let Some(row) = row {
            return row.into_job().map(Some);
        }
        match self.current_status(id).await? {
            None => Err(AppError::NotFound(format!("Job {} not found", id))),
            Some(status) => {
                debug!(job_id = %id, status = %status, "Start ignored, job is not pending");
                Ok(None)
            }
        }
    }

    async fn update_progress(
        &self,
        id: &JobId,
        update: &ProgressUpdate,
        now: i64,
    ) -> Result<Option<Job>> {
        let result = update.result.as_ref().map(|r| r.to_string());

        // Pending moves to processing; progress only grows
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE jobs
            SET status_valid_from = CASE WHEN status = 'pending' THEN ? ELSE status_valid_from END,
                status = 'processing',
                stage = ?,
                progress = MAX(progress, ?),
                result = COALESCE(?, result)
            WHERE id = ?
              AND status IN ('pending', 'processing')
            RETURNING *
            "#,
        )
        .bind(now)
        .bind(&update.stage)
        .bind(update.progress.min(MAX_ACTIVE_PROGRESS) as i64)
        .bind(&result)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        match row {
            Some(row) => row.into_job().map(Some),
            None => self.explain_miss(id, JobStatus::Processing).await,
        }
    }

    async fn complete(&self, id: &JobId, completion: &Completion, now: i64) -> Result<Option<Job>> {
        let status = completion.status();
        let result = completion.result.as_ref().map(|r| r.to_string());
        let error = if completion.success {
            None
        } else {
            Some(
                completion
                    .error
                    .clone()
                    .unwrap_or_else(|| "job failed".to_string()),
            )
        };

        let row = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE jobs
            SET status = ?,
                progress = ?,
                status_valid_from = ?,
                completed_at = ?,
                result = COALESCE(?, result),
                error = ?
            WHERE id = ?
              AND status = 'processing'
            RETURNING *
            "#,
        )
        .bind(status.as_str())
        .bind(TERMINAL_PROGRESS as i64)
        .bind(now)
        .bind(now)
        .bind(&result)
        .bind(&error)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        match row {
            Some(row) => row.into_job().map(Some),
            None => self.explain_miss(id, status).await,
        }
    }

    async fn clear_completed(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM jobs WHERE status IN ('completed', 'failed')")
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(result.rows_affected())
    }

    async fn fail_stale(&self, cutoff: i64, now: i64) -> Result<Vec<Job>> {
        let rows: Vec<JobRow> = sqlx::query_as(
            r#"
            UPDATE jobs
            SET status = 'failed',
                progress = ?,
                status_valid_from = ?,
                completed_at = ?,
                error = ?
            WHERE status = 'processing'
              AND status_valid_from < ?
            RETURNING *
            "#,
        )
        .bind(TERMINAL_PROGRESS as i64)
        .bind(now)
        .bind(now)
        .bind(STALE_ERROR)
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(JobRow::into_job).collect()
    }
}

fn parse_status(s: &str) -> Result<JobStatus> {
    JobStatus::parse(s).ok_or_else(|| AppError::Database(format!("Unknown job status: {}", s)))
}

/// SQLite row representation
#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: String,
    job_type: String,
    payload: String,
    dispatch: String,
    status: String,
    progress: i64,
    stage: Option<String>,
    result: Option<String>,
    error: Option<String>,
    created_at: i64,
    status_valid_from: i64,
    completed_at: Option<i64>,
    page_data: Option<String>,
}

impl JobRow {
    fn into_job(self) -> Result<Job> {
        let dispatch = Dispatch::parse(&self.dispatch)
            .ok_or_else(|| AppError::Database(format!("Unknown dispatch: {}", self.dispatch)))?;
        let payload: serde_json::Value = serde_json::from_str(&self.payload)?;
        let result = self
            .result
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;
        let page_data: Option<PageData> = self
            .page_data
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;

        Ok(Job {
            id: self.id,
            job_type: JobType::new(self.job_type),
            payload: JobPayload::new(payload),
            dispatch,
            status: parse_status(&self.status)?,
            progress: self.progress.clamp(0, TERMINAL_PROGRESS as i64) as u8,
            stage: self.stage,
            result,
            error: self.error,
            created_at: self.created_at,
            status_valid_from: self.status_valid_from,
            completed_at: self.completed_at,
            page_data,
        })
    }
}
