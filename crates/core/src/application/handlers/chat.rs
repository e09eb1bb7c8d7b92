use super::parse_payload;
use crate::application::dependencies::ProcessDependencies;
use crate::application::registry::JobHandler;
use crate::domain::{Job, JobId};
use crate::error::{AppError, Result};
use crate::port::{ChatMessage, ChatRole, LlmService};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct ChatPayload {
    messages: Vec<ChatMessage>,
}

/// Multi-turn chat completion
pub struct ChatHandler {
    llm: Arc<dyn LlmService>,
}

impl ChatHandler {
    pub fn new(llm: Arc<dyn LlmService>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl JobHandler for ChatHandler {
    async fn process(
        &self,
        _job_id: &JobId,
        job: &Job,
        deps: &ProcessDependencies,
    ) -> Result<serde_json::Value> {
        let payload: ChatPayload = parse_payload(job)?;
        if !payload.messages.iter().any(|m| m.role == ChatRole::User) {
            return Err(AppError::Validation(
                "Chat needs at least one user message".to_string(),
            ));
        }

        deps.report_progress("Thinking", 10).await;
        let reply = self.llm.chat(&payload.messages).await?;

        Ok(json!({
            "message": ChatMessage {
                role: ChatRole::Assistant,
                content: reply,
            },
            "turns": payload.messages.len() + 1,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::dependencies::mocks::recording_dependencies;
    use crate::port::services::mocks::MockLlm;

    #[tokio::test]
    async fn test_replies_to_last_user_message() {
        let handler = ChatHandler::new(Arc::new(MockLlm::new()));
        let job = Job::new_test(
            "chat",
            json!({"messages": [
                {"role": "system", "content": "you are helpful"},
                {"role": "user", "content": "hello"},
            ]}),
        );
        let (deps, _) = recording_dependencies(&job);

        let result = handler.process(&job.id, &job, &deps).await.unwrap();
        assert_eq!(result["message"]["role"], "assistant");
        assert_eq!(result["message"]["content"], "echo: hello");
        assert_eq!(result["turns"], 3);
    }

    #[tokio::test]
    async fn test_rejects_conversation_without_user_turn() {
        let llm = Arc::new(MockLlm::new());
        let handler = ChatHandler::new(llm.clone());
        let job = Job::new_test("chat", json!({"messages": [{"role": "system", "content": "x"}]}));
        let (deps, _) = recording_dependencies(&job);

        assert!(handler.process(&job.id, &job, &deps).await.is_err());
        assert_eq!(llm.calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }
}
