use super::parse_payload;
use crate::application::dependencies::ProcessDependencies;
use crate::application::registry::JobHandler;
use crate::domain::{Job, JobId};
use crate::error::{AppError, Result};
use crate::port::LlmService;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct LlmPayload {
    prompt: String,
    #[serde(default)]
    system: Option<String>,
}

/// Single-prompt generation
pub struct LlmHandler {
    llm: Arc<dyn LlmService>,
}

impl LlmHandler {
    pub fn new(llm: Arc<dyn LlmService>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl JobHandler for LlmHandler {
    async fn process(
        &self,
        _job_id: &JobId,
        job: &Job,
        deps: &ProcessDependencies,
    ) -> Result<serde_json::Value> {
        let payload: LlmPayload = parse_payload(job)?;
        if payload.prompt.trim().is_empty() {
            return Err(AppError::Validation("Prompt is empty".to_string()));
        }

        deps.report_progress("Generating", 10).await;
        let text = self
            .llm
            .generate(payload.system.as_deref(), &payload.prompt)
            .await?;
        deps.logger()
            .debug(&format!("Generated {} chars", text.len()));

        Ok(json!({ "text": text }))
    }
}
