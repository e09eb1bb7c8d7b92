// Prompt-based flows: a named system prompt whose answer is parsed as JSON

use async_trait::async_trait;
use recall_core::error::{AppError, Result};
use recall_core::port::{ChatMessage, FlowRunner, LlmService};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

pub const EXTRACT_TOPICS_FLOW: &str = "extract_topics";

const EXTRACT_TOPICS_PROMPT: &str = "You extract the main topics of a document for a knowledge graph. \
Answer with a JSON array only, no prose. Each element is an object with a \"label\" \
(a short noun phrase) and a \"weight\" between 0 and 1 for its importance. \
Return at most 12 topics.";

/// One flow: system prompt plus how to render the input
#[derive(Debug, Clone)]
pub struct PromptFlow {
    pub system: String,
}

impl PromptFlow {
    pub fn new(system: impl Into<String>) -> Self {
        Self {
            system: system.into(),
        }
    }

    fn render(&self, input: &Value) -> String {
        let title = input.get("title").and_then(Value::as_str);
        let text = input
            .get("text")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| input.to_string());
        match title {
            Some(title) => format!("Title: {}\n\n{}", title, text),
            None => text,
        }
    }
}

/// FlowRunner that answers every flow with one LLM call
pub struct PromptFlowRunner {
    llm: Arc<dyn LlmService>,
    flows: HashMap<String, PromptFlow>,
}

impl PromptFlowRunner {
    /// Runner with the built-in flows
    pub fn new(llm: Arc<dyn LlmService>) -> Self {
        Self {
            llm,
            flows: HashMap::new(),
        }
        .with_flow(EXTRACT_TOPICS_FLOW, PromptFlow::new(EXTRACT_TOPICS_PROMPT))
    }

    pub fn with_flow(mut self, name: impl Into<String>, flow: PromptFlow) -> Self {
        self.flows.insert(name.into(), flow);
        self
    }
}

#[async_trait]
impl FlowRunner for PromptFlowRunner {
    async fn initialize(&self) -> Result<()> {
        debug!(flows = self.flows.len(), "Prompt flows loaded");
        Ok(())
    }

    async fn run(&self, flow: &str, input: Value) -> Result<Value> {
        let definition = self
            .flows
            .get(flow)
            .ok_or_else(|| AppError::Service(format!("unknown flow: {}", flow)))?;

        let messages = [
            ChatMessage::system(definition.system.clone()),
            ChatMessage::user(definition.render(&input)),
        ];
        let answer = self.llm.chat(&messages).await?;
        extract_json(&answer)
            .ok_or_else(|| AppError::Service(format!("{} answered without JSON", flow)))
    }
}

/// First JSON array or object embedded in a model answer
fn extract_json(answer: &str) -> Option<Value> {
    if let Ok(value) = serde_json::from_str(answer.trim()) {
        return Some(value);
    }
    // Models wrap JSON in prose or code fences
    for (open, close) in [('[', ']'), ('{', '}')] {
        if let (Some(start), Some(end)) = (answer.find(open), answer.rfind(close)) {
            if start < end {
                if let Ok(value) = serde_json::from_str(&answer[start..=end]) {
                    return Some(value);
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use recall_core::port::ChatRole;
    use serde_json::json;
    use std::sync::Mutex;

    /// Answers with a canned string and records the prompt
    struct CannedLlm {
        answer: String,
        seen: Mutex<Vec<ChatMessage>>,
    }

    impl CannedLlm {
        fn new(answer: &str) -> Self {
            Self {
                answer: answer.to_string(),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LlmService for CannedLlm {
        async fn chat(&self, messages: &[ChatMessage]) -> Result<String> {
            self.seen.lock().unwrap().extend_from_slice(messages);
            Ok(self.answer.clone())
        }
    }

    #[test]
    fn test_extract_json_from_fenced_answer() {
        let answer = "Sure!\n```json\n[{\"label\": \"Rust\", \"weight\": 0.8}]\n```";
        assert_eq!(
            extract_json(answer),
            Some(json!([{"label": "Rust", "weight": 0.8}]))
        );
        assert_eq!(extract_json("no json here"), None);
    }

    #[tokio::test]
    async fn test_topic_flow_renders_title_and_text() {
        let llm = Arc::new(CannedLlm::new("[{\"label\": \"Tokio\", \"weight\": 1}]"));
        let runner = PromptFlowRunner::new(llm.clone());

        let out = runner
            .run(EXTRACT_TOPICS_FLOW, json!({"text": "async runtimes", "title": "Notes"}))
            .await
            .unwrap();
        assert_eq!(out, json!([{"label": "Tokio", "weight": 1}]));

        let seen = llm.seen.lock().unwrap();
        assert_eq!(seen[0].role, ChatRole::System);
        assert_eq!(seen[1].content, "Title: Notes\n\nasync runtimes");
    }

    #[tokio::test]
    async fn test_unknown_flow_is_an_error() {
        let runner = PromptFlowRunner::new(Arc::new(CannedLlm::new("[]")));
        assert!(runner.run("summarize", json!({})).await.is_err());
    }
}
