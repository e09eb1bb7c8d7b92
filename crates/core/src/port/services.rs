// Downstream Service Ports
//
// Storage, embedding, LLM and flow runner backends live outside core. The
// processor initializes them in order before announcing readiness.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Chat role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// One chat turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

/// Topic extracted from captured content (knowledge-graph node)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedTopic {
    pub label: String,
    #[serde(default)]
    pub weight: f32,
}

/// Relational/vector storage backend
#[async_trait]
pub trait StorageService: Send + Sync {
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    /// Store chunk vectors for a source, returning how many rows were written
    async fn store_embeddings(
        &self,
        source: &str,
        chunks: &[String],
        vectors: &[Vec<f32>],
    ) -> Result<usize>;

    /// Replace the topics attached to a source
    async fn store_topics(&self, source: &str, topics: &[ExtractedTopic]) -> Result<usize>;
}

/// Embedding backend
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    fn dimension(&self) -> usize;
}

/// LLM backend
#[async_trait]
pub trait LlmService: Send + Sync {
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn chat(&self, messages: &[ChatMessage]) -> Result<String>;

    async fn generate(&self, system: Option<&str>, prompt: &str) -> Result<String> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = system {
            messages.push(ChatMessage::system(system));
        }
        messages.push(ChatMessage::user(prompt));
        self.chat(&messages).await
    }
}

/// Named multi-step flow (e.g. knowledge-graph extraction)
#[async_trait]
pub trait FlowRunner: Send + Sync {
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn run(&self, flow: &str, input: serde_json::Value) -> Result<serde_json::Value>;
}

/// Every downstream service the worker context needs
#[derive(Clone)]
pub struct ServiceSet {
    pub storage: Arc<dyn StorageService>,
    pub embedding: Arc<dyn EmbeddingService>,
    pub llm: Arc<dyn LlmService>,
    pub flows: Arc<dyn FlowRunner>,
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::error::AppError;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Storage that keeps everything in maps
    #[derive(Default)]
    pub struct MockStorage {
        pub embeddings: Mutex<HashMap<String, usize>>,
        pub topics: Mutex<HashMap<String, Vec<ExtractedTopic>>>,
        fail_init: bool,
    }

    impl MockStorage {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn failing_init() -> Self {
            Self {
                fail_init: true,
                ..Self::default()
            }
        }

        pub fn topics_for(&self, source: &str) -> Vec<ExtractedTopic> {
            self.topics
                .lock()
                .unwrap()
                .get(source)
                .cloned()
                .unwrap_or_default()
        }

        pub fn embedding_count(&self, source: &str) -> usize {
            self.embeddings
                .lock()
                .unwrap()
                .get(source)
                .copied()
                .unwrap_or(0)
        }
    }

    #[async_trait]
    impl StorageService for MockStorage {
        async fn initialize(&self) -> Result<()> {
            if self.fail_init {
                return Err(AppError::Service("storage unavailable".to_string()));
            }
            Ok(())
        }

        async fn store_embeddings(
            &self,
            source: &str,
            chunks: &[String],
            _vectors: &[Vec<f32>],
        ) -> Result<usize> {
            *self
                .embeddings
                .lock()
                .unwrap()
                .entry(source.to_string())
                .or_default() += chunks.len();
            Ok(chunks.len())
        }

        async fn store_topics(&self, source: &str, topics: &[ExtractedTopic]) -> Result<usize> {
            self.topics
                .lock()
                .unwrap()
                .insert(source.to_string(), topics.to_vec());
            Ok(topics.len())
        }
    }

    /// Embeds text as a tiny bag-of-bytes vector
    pub struct MockEmbedding {
        dimension: usize,
    }

    impl MockEmbedding {
        pub fn new(dimension: usize) -> Self {
            Self { dimension }
        }
    }

    #[async_trait]
    impl EmbeddingService for MockEmbedding {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| {
                    let mut v = vec![0.0; self.dimension];
                    for (i, b) in t.bytes().enumerate() {
                        v[i % self.dimension] += b as f32 / 255.0;
                    }
                    v
                })
                .collect())
        }

        fn dimension(&self) -> usize {
            self.dimension
        }
    }

    /// Replies with the last user message prefixed by "echo: "
    #[derive(Default)]
    pub struct MockLlm {
        pub calls: AtomicUsize,
        fail_with: Option<String>,
    }

    impl MockLlm {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn failing(message: impl Into<String>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_with: Some(message.into()),
            }
        }
    }

    #[async_trait]
    impl LlmService for MockLlm {
        async fn chat(&self, messages: &[ChatMessage]) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(msg) = &self.fail_with {
                return Err(AppError::Service(msg.clone()));
            }
            let last = messages
                .iter()
                .rev()
                .find(|m| m.role == ChatRole::User)
                .map(|m| m.content.as_str())
                .unwrap_or_default();
            Ok(format!("echo: {}", last))
        }
    }

    /// Turns every distinct capitalized word into a topic
    #[derive(Default)]
    pub struct MockFlowRunner;

    #[async_trait]
    impl FlowRunner for MockFlowRunner {
        async fn run(&self, flow: &str, input: serde_json::Value) -> Result<serde_json::Value> {
            if flow != "extract_topics" {
                return Err(AppError::Service(format!("unknown flow: {}", flow)));
            }
            let text = input["text"].as_str().unwrap_or_default();
            let mut topics: Vec<ExtractedTopic> = Vec::new();
            for word in text.split_whitespace() {
                let word = word.trim_matches(|c: char| !c.is_alphanumeric());
                if word.chars().next().is_some_and(|c| c.is_uppercase())
                    && !topics.iter().any(|t| t.label == word)
                {
                    topics.push(ExtractedTopic {
                        label: word.to_string(),
                        weight: 1.0,
                    });
                }
            }
            Ok(serde_json::to_value(topics)?)
        }
    }

    /// ServiceSet made of mocks, with handles kept for assertions
    pub struct MockServices {
        pub storage: Arc<MockStorage>,
        pub llm: Arc<MockLlm>,
        pub set: ServiceSet,
    }

    impl MockServices {
        pub fn new() -> Self {
            Self::with(MockStorage::new(), MockLlm::new())
        }

        pub fn with(storage: MockStorage, llm: MockLlm) -> Self {
            let storage = Arc::new(storage);
            let llm = Arc::new(llm);
            let set = ServiceSet {
                storage: storage.clone(),
                embedding: Arc::new(MockEmbedding::new(8)),
                llm: llm.clone(),
                flows: Arc::new(MockFlowRunner),
            };
            Self { storage, llm, set }
        }
    }

    impl Default for MockServices {
        fn default() -> Self {
            Self::new()
        }
    }
}
