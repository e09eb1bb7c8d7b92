use crate::application::dependencies::ProcessDependencies;
use crate::application::registry::JobHandler;
use crate::domain::{Job, JobId};
use crate::error::Result;
use async_trait::async_trait;

/// Returns its payload unchanged
pub struct EchoHandler;

#[async_trait]
impl JobHandler for EchoHandler {
    async fn process(
        &self,
        _job_id: &JobId,
        job: &Job,
        deps: &ProcessDependencies,
    ) -> Result<serde_json::Value> {
        deps.report_progress("Echoing", 50).await;
        Ok(job.payload.as_value().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::dependencies::mocks::recording_dependencies;
    use serde_json::json;

    #[tokio::test]
    async fn test_echo_returns_payload() {
        let job = Job::new_test("echo", json!({"text": "hi"}));
        let (deps, reporter) = recording_dependencies(&job);

        let result = EchoHandler.process(&job.id, &job, &deps).await.unwrap();
        assert_eq!(result, json!({"text": "hi"}));
        assert_eq!(reporter.updates().len(), 1);
    }
}
