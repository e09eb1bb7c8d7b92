use super::{parse_payload, source_key, source_text};
use crate::application::dependencies::ProcessDependencies;
use crate::application::registry::JobHandler;
use crate::domain::{Job, JobId};
use crate::error::{AppError, Result};
use crate::port::{ExtractedTopic, FlowRunner, StorageService};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

const EXTRACT_FLOW: &str = "extract_topics";

#[derive(Debug, Deserialize)]
struct TopicPayload {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    source: Option<String>,
}

/// Runs the topic extraction flow and attaches the topics to their source
pub struct TopicHandler {
    flows: Arc<dyn FlowRunner>,
    storage: Arc<dyn StorageService>,
}

impl TopicHandler {
    pub fn new(flows: Arc<dyn FlowRunner>, storage: Arc<dyn StorageService>) -> Self {
        Self { flows, storage }
    }
}

#[async_trait]
impl JobHandler for TopicHandler {
    async fn process(
        &self,
        _job_id: &JobId,
        job: &Job,
        deps: &ProcessDependencies,
    ) -> Result<serde_json::Value> {
        let payload: TopicPayload = parse_payload(job)?;
        let text = source_text(payload.text, job.page_data.as_ref())?;
        let source = source_key(payload.source, job);
        let title = job.page_data.as_ref().and_then(|p| p.title.clone());

        deps.report_progress("Extracting topics", 20).await;
        let raw = self
            .flows
            .run(EXTRACT_FLOW, json!({ "text": text, "title": title }))
            .await?;
        let topics: Vec<ExtractedTopic> = serde_json::from_value(raw).map_err(|e| {
            AppError::Service(format!("{} returned malformed topics: {}", EXTRACT_FLOW, e))
        })?;

        deps.report_progress(format!("Storing {} topics", topics.len()), 80)
            .await;
        let stored = self.storage.store_topics(&source, &topics).await?;

        Ok(json!({
            "source": source,
            "topics": topics.iter().map(|t| t.label.as_str()).collect::<Vec<_>>(),
            "stored": stored,
        }))
    }
}
