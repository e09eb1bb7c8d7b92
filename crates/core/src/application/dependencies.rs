// Process Factory - builds the dependency bundle every handler receives
//
// Handlers only see ProcessDependencies. Whether a report travels over a
// control channel or an in-process call is decided here, not in the handler.

use crate::domain::{Completion, Job, JobId, JobType, ProgressUpdate};
use crate::error::Result;
use crate::port::JobSource;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn, Span};

/// Sends progress for a job somewhere
#[async_trait]
pub trait ProgressReporter: Send + Sync {
    async fn report(&self, job_id: &JobId, update: ProgressUpdate) -> Result<()>;

    /// First report of a fast-path run; false when the job is no longer pending
    async fn start(&self, job_id: &JobId, update: ProgressUpdate) -> Result<bool>;
}

/// Sends the terminal outcome for a job somewhere
#[async_trait]
pub trait CompletionReporter: Send + Sync {
    async fn complete(&self, job_id: &JobId, completion: Completion) -> Result<()>;
}

/// Reporter backed by a JobSource (local queue or control channel)
pub struct SourceReporter {
    source: Arc<dyn JobSource>,
}

impl SourceReporter {
    pub fn new(source: Arc<dyn JobSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl ProgressReporter for SourceReporter {
    async fn report(&self, job_id: &JobId, update: ProgressUpdate) -> Result<()> {
        self.source.update_progress(job_id, update).await.map(|_| ())
    }

    async fn start(&self, job_id: &JobId, update: ProgressUpdate) -> Result<bool> {
        Ok(self.source.start_job(job_id, update).await?.is_some())
    }
}

#[async_trait]
impl CompletionReporter for SourceReporter {
    async fn complete(&self, job_id: &JobId, completion: Completion) -> Result<()> {
        self.source.complete_job(job_id, completion).await.map(|_| ())
    }
}

/// Per-job logger: every event carries job_id and job_type
#[derive(Clone)]
pub struct JobLogger {
    span: Span,
}

impl JobLogger {
    pub fn new(job_id: &str, job_type: &JobType) -> Self {
        Self {
            span: tracing::info_span!("job", job_id = %job_id, job_type = %job_type),
        }
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn debug(&self, message: &str) {
        self.span.in_scope(|| tracing::debug!("{}", message));
    }

    pub fn info(&self, message: &str) {
        self.span.in_scope(|| tracing::info!("{}", message));
    }

    pub fn warn(&self, message: &str) {
        self.span.in_scope(|| tracing::warn!("{}", message));
    }

    pub fn error(&self, message: &str) {
        self.span.in_scope(|| tracing::error!("{}", message));
    }
}

/// Everything a handler may use to talk back
pub struct ProcessDependencies {
    pub job_id: JobId,
    pub job_type: JobType,
    progress: Arc<dyn ProgressReporter>,
    completion: Arc<dyn CompletionReporter>,
    logger: JobLogger,
    completed: AtomicBool,
}

impl ProcessDependencies {
    /// Report a stage and percentage. Transport failures are logged, not returned.
    pub async fn report_progress(&self, stage: impl Into<String>, progress: u8) {
        self.report(ProgressUpdate::new(stage, progress)).await;
    }

    /// Report progress carrying a partial result
    pub async fn report(&self, update: ProgressUpdate) {
        if self.is_completed() {
            debug!(job_id = %self.job_id, stage = %update.stage, "Progress after completion dropped");
            return;
        }
        if let Err(e) = self.progress.report(&self.job_id, update).await {
            warn!(job_id = %self.job_id, error = %e, "Progress report failed");
        }
    }

    /// Open a fast-path run. True only if this call moved the job out of
    /// pending; on false the caller must not run the handler.
    pub async fn start(&self) -> bool {
        match self.progress.start(&self.job_id, ProgressUpdate::started()).await {
            Ok(true) => true,
            Ok(false) => {
                debug!(job_id = %self.job_id, "Job already started elsewhere");
                false
            }
            Err(e) => {
                warn!(job_id = %self.job_id, error = %e, "Start report failed");
                false
            }
        }
    }

    /// Send the terminal outcome. Only the first call per job is forwarded;
    /// returns whether this call was the one.
    pub async fn complete(&self, completion: Completion) -> bool {
        if self.completed.swap(true, Ordering::SeqCst) {
            debug!(job_id = %self.job_id, "Duplicate completion dropped");
            return false;
        }
        if let Err(e) = self.completion.complete(&self.job_id, completion).await {
            warn!(job_id = %self.job_id, error = %e, "Completion report failed");
        }
        true
    }

    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn logger(&self) -> &JobLogger {
        &self.logger
    }
}

/// Bundle callbacks for one job
pub fn create_dependencies(
    job: &Job,
    progress: Arc<dyn ProgressReporter>,
    completion: Arc<dyn CompletionReporter>,
) -> ProcessDependencies {
    ProcessDependencies {
        job_id: job.id.clone(),
        job_type: job.job_type.clone(),
        progress,
        completion,
        logger: JobLogger::new(&job.id, &job.job_type),
        completed: AtomicBool::new(false),
    }
}

/// Creates ProcessDependencies with a fixed pair of reporters
#[derive(Clone)]
pub struct ProcessFactory {
    progress: Arc<dyn ProgressReporter>,
    completion: Arc<dyn CompletionReporter>,
}

impl ProcessFactory {
    pub fn new(progress: Arc<dyn ProgressReporter>, completion: Arc<dyn CompletionReporter>) -> Self {
        Self { progress, completion }
    }

    /// Report through a JobSource (the usual wiring)
    pub fn from_source(source: Arc<dyn JobSource>) -> Self {
        let reporter = Arc::new(SourceReporter::new(source));
        Self::new(reporter.clone(), reporter)
    }

    pub fn create_dependencies(&self, job: &Job) -> ProcessDependencies {
        create_dependencies(job, self.progress.clone(), self.completion.clone())
    }
}

// ============================================================================
// Recording reporters for handler tests
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::error::AppError;
    use std::sync::Mutex;

    /// Records every report instead of sending it
    #[derive(Default)]
    pub struct RecordingReporter {
        pub updates: Mutex<Vec<ProgressUpdate>>,
        pub completions: Mutex<Vec<Completion>>,
        fail: bool,
        refuse_start: bool,
    }

    impl RecordingReporter {
        pub fn new() -> Self {
            Self::default()
        }

        /// Every report returns a transport error
        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        /// Starts report the job as already taken
        pub fn refusing_start() -> Self {
            Self {
                refuse_start: true,
                ..Self::default()
            }
        }

        pub fn updates(&self) -> Vec<ProgressUpdate> {
            self.updates.lock().unwrap().clone()
        }

        pub fn completions(&self) -> Vec<Completion> {
            self.completions.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ProgressReporter for RecordingReporter {
        async fn report(&self, _job_id: &JobId, update: ProgressUpdate) -> Result<()> {
            if self.fail {
                return Err(AppError::Transport("no listener".to_string()));
            }
            self.updates.lock().unwrap().push(update);
            Ok(())
        }

        async fn start(&self, _job_id: &JobId, update: ProgressUpdate) -> Result<bool> {
            if self.fail {
                return Err(AppError::Transport("no listener".to_string()));
            }
            if self.refuse_start {
                return Ok(false);
            }
            self.updates.lock().unwrap().push(update);
            Ok(true)
        }
    }

    #[async_trait]
    impl CompletionReporter for RecordingReporter {
        async fn complete(&self, _job_id: &JobId, completion: Completion) -> Result<()> {
            if self.fail {
                return Err(AppError::Transport("no listener".to_string()));
            }
            self.completions.lock().unwrap().push(completion);
            Ok(())
        }
    }

    /// Dependencies wired to a recording reporter
    pub fn recording_dependencies(job: &Job) -> (ProcessDependencies, Arc<RecordingReporter>) {
        let reporter = Arc::new(RecordingReporter::new());
        let deps = create_dependencies(job, reporter.clone(), reporter.clone());
        (deps, reporter)
    }
}
