// Built-in job handlers and the bootstrap list

mod chat;
mod echo;
mod embedding;
mod llm;
mod topic;

pub use chat::ChatHandler;
pub use echo::EchoHandler;
pub use embedding::{chunk_text, EmbeddingHandler, DEFAULT_CHUNK_WORDS};
pub use llm::LlmHandler;
pub use topic::TopicHandler;

use crate::application::registry::{HandlerRegistration, HandlerRegistry};
use crate::domain::{Job, PageData};
use crate::error::{AppError, Result};
use crate::port::ServiceSet;
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// Every built-in handler, registered in a fixed order
pub fn default_registry(services: &ServiceSet) -> Result<HandlerRegistry> {
    HandlerRegistry::builder()
        .register(HandlerRegistration::new(Arc::new(EchoHandler), ["echo"]))?
        .register(HandlerRegistration::new(
            Arc::new(LlmHandler::new(Arc::clone(&services.llm))),
            ["llm"],
        ))?
        .register(HandlerRegistration::new(
            Arc::new(ChatHandler::new(Arc::clone(&services.llm))),
            ["chat"],
        ))?
        .register(HandlerRegistration::new(
            Arc::new(EmbeddingHandler::new(
                Arc::clone(&services.embedding),
                Arc::clone(&services.storage),
            )),
            ["embedding"],
        ))?
        .register(HandlerRegistration::new(
            Arc::new(TopicHandler::new(
                Arc::clone(&services.flows),
                Arc::clone(&services.storage),
            )),
            ["topic", "knowledge_graph"],
        ))
        .map(|builder| builder.build())
}

/// Decode a job payload into the handler's input type
pub(crate) fn parse_payload<T: DeserializeOwned>(job: &Job) -> Result<T> {
    serde_json::from_value(job.payload.as_value().clone()).map_err(|e| {
        AppError::Validation(format!("Invalid {} payload: {}", job.job_type, e))
    })
}

/// Text to work on: explicit payload text wins over captured page content
pub(crate) fn source_text(text: Option<String>, page: Option<&PageData>) -> Result<String> {
    let text = text
        .or_else(|| page.map(|p| p.content.clone()))
        .unwrap_or_default();
    if text.trim().is_empty() {
        return Err(AppError::Validation("No text to process".to_string()));
    }
    Ok(text)
}

/// Key the results are stored under: explicit source, page URL, or job id
pub(crate) fn source_key(source: Option<String>, job: &Job) -> String {
    source
        .or_else(|| job.page_data.as_ref().map(|p| p.url.clone()))
        .unwrap_or_else(|| job.id.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::services::mocks::MockServices;

    #[test]
    fn test_default_registry_covers_builtin_types() {
        let services = MockServices::new();
        let registry = default_registry(&services.set).unwrap();
        assert_eq!(
            registry.job_types(),
            vec!["chat", "echo", "embedding", "knowledge_graph", "llm", "topic"]
        );
    }
}
