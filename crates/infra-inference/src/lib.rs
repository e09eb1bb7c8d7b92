// Recall Infrastructure - Inference Adapter
// Implements: LlmService, EmbeddingService (Ollama), FlowRunner (prompt flows)

mod flow;
mod ollama;

pub use flow::{PromptFlow, PromptFlowRunner, EXTRACT_TOPICS_FLOW};
pub use ollama::{
    OllamaBackend, OllamaConfig, DEFAULT_DIMENSION, DEFAULT_EMBED_MODEL, DEFAULT_GEN_MODEL,
    DEFAULT_OLLAMA_URL,
};
