// Handler Registry - job type tag -> handler
//
// Built once at startup from an explicit bootstrap list, read-only afterwards.

use crate::application::dependencies::ProcessDependencies;
use crate::domain::{DomainError, Job, JobId, JobType};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Executes one kind of job.
///
/// Return the final result, or an error which becomes a failed completion.
/// Handlers may report progress through `deps` but never talk to the queue.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn process(
        &self,
        job_id: &JobId,
        job: &Job,
        deps: &ProcessDependencies,
    ) -> Result<serde_json::Value>;
}

/// One handler instance and the tags it answers for
pub struct HandlerRegistration {
    pub jobs: Vec<JobType>,
    pub instance: Arc<dyn JobHandler>,
}

impl HandlerRegistration {
    pub fn new<I, S>(instance: Arc<dyn JobHandler>, jobs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            jobs: jobs.into_iter().map(JobType::new).collect(),
            instance,
        }
    }
}

#[derive(Default)]
pub struct RegistryBuilder {
    handlers: HashMap<JobType, Arc<dyn JobHandler>>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handler for each listed tag. A tag registered twice is an error.
    pub fn register(mut self, registration: HandlerRegistration) -> Result<Self> {
        if registration.jobs.is_empty() {
            return Err(DomainError::ValidationError(
                "Handler registration lists no job types".to_string(),
            )
            .into());
        }
        for job_type in &registration.jobs {
            if self.handlers.contains_key(job_type) {
                return Err(DomainError::DuplicateJobType(job_type.to_string()).into());
            }
        }
        for job_type in registration.jobs {
            self.handlers
                .insert(job_type, Arc::clone(&registration.instance));
        }
        Ok(self)
    }

    pub fn build(self) -> HandlerRegistry {
        HandlerRegistry {
            handlers: self.handlers,
        }
    }
}

/// Read-only map of handlers
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<JobType, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    pub fn resolve(&self, job_type: &JobType) -> std::result::Result<Arc<dyn JobHandler>, DomainError> {
        self.handlers
            .get(job_type)
            .cloned()
            .ok_or_else(|| DomainError::UnknownJobType(job_type.to_string()))
    }

    pub fn contains(&self, job_type: &JobType) -> bool {
        self.handlers.contains_key(job_type)
    }

    /// Registered tags, sorted
    pub fn job_types(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.handlers.keys().map(|t| t.to_string()).collect();
        tags.sort();
        tags
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;

    struct Fixed(&'static str);

    #[async_trait]
    impl JobHandler for Fixed {
        async fn process(
            &self,
            _job_id: &JobId,
            _job: &Job,
            _deps: &ProcessDependencies,
        ) -> Result<serde_json::Value> {
            Ok(serde_json::json!(self.0))
        }
    }

    #[test]
    fn test_register_and_resolve() {
        let registry = HandlerRegistry::builder()
            .register(HandlerRegistration::new(Arc::new(Fixed("a")), ["llm", "chat"]))
            .unwrap()
            .build();

        assert!(registry.resolve(&JobType::new("llm")).is_ok());
        assert!(registry.resolve(&JobType::new("chat")).is_ok());
        assert_eq!(registry.job_types(), vec!["chat", "llm"]);
    }

    #[test]
    fn test_unknown_job_type() {
        let registry = HandlerRegistry::default();
        let err = registry.resolve(&JobType::new("missing")).err().unwrap();
        assert!(matches!(err, DomainError::UnknownJobType(t) if t == "missing"));
    }

    #[test]
    fn test_duplicate_registration_is_rejected() {
        let result = HandlerRegistry::builder()
            .register(HandlerRegistration::new(Arc::new(Fixed("a")), ["echo"]))
            .unwrap()
            .register(HandlerRegistration::new(Arc::new(Fixed("b")), ["other", "echo"]));

        match result {
            Err(AppError::Domain(DomainError::DuplicateJobType(t))) => assert_eq!(t, "echo"),
            Err(e) => panic!("unexpected error: {}", e),
            Ok(_) => panic!("duplicate registration accepted"),
        }
    }

    #[test]
    fn test_empty_registration_is_rejected() {
        let jobs: [&str; 0] = [];
        let result = RegistryBuilder::new().register(HandlerRegistration::new(Arc::new(Fixed("a")), jobs));
        assert!(result.is_err());
    }
}
