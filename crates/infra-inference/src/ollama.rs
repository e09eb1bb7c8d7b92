//! Ollama inference backend.

use async_trait::async_trait;
use recall_core::error::{AppError, Result};
use recall_core::port::{ChatMessage, EmbeddingService, LlmService};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

/// Default Ollama endpoint.
pub const DEFAULT_OLLAMA_URL: &str = "http://127.0.0.1:11434";

/// Default embedding model.
pub const DEFAULT_EMBED_MODEL: &str = "nomic-embed-text";

/// Default generation model.
pub const DEFAULT_GEN_MODEL: &str = "llama3.2:3b";

/// Default embedding dimension for nomic-embed-text.
pub const DEFAULT_DIMENSION: usize = 768;

const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);
const SLOW_GENERATION_MS: u64 = 30_000;
const SLOW_EMBEDDING_MS: u64 = 5_000;

/// Connection and model settings
#[derive(Debug, Clone)]
pub struct OllamaConfig {
    pub base_url: String,
    pub gen_model: String,
    pub embed_model: String,
    pub dimension: usize,
    pub gen_timeout: Duration,
    pub embed_timeout: Duration,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_OLLAMA_URL.to_string(),
            gen_model: DEFAULT_GEN_MODEL.to_string(),
            embed_model: DEFAULT_EMBED_MODEL.to_string(),
            dimension: DEFAULT_DIMENSION,
            gen_timeout: Duration::from_secs(120),
            embed_timeout: Duration::from_secs(30),
        }
    }
}

impl OllamaConfig {
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_gen_model(mut self, model: impl Into<String>) -> Self {
        self.gen_model = model.into();
        self
    }

    pub fn with_embed_model(mut self, model: impl Into<String>) -> Self {
        self.embed_model = model.into();
        self
    }

    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = dimension;
        self
    }
}

/// Ollama inference backend.
pub struct OllamaBackend {
    client: Client,
    config: OllamaConfig,
}

impl OllamaBackend {
    pub fn new(config: OllamaConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.gen_timeout)
            .build()
            .map_err(|e| AppError::Initialization(format!("HTTP client: {}", e)))?;

        info!(
            "Initializing Ollama backend: url={}, embed={}, gen={}",
            config.base_url, config.embed_model, config.gen_model
        );

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &OllamaConfig {
        &self.config
    }

    /// True when the server answers `/api/tags`
    pub async fn health_check(&self) -> bool {
        let response = self
            .client
            .get(format!("{}/api/tags", self.config.base_url))
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => {
                info!("Ollama health check passed");
                true
            }
            Ok(resp) => {
                warn!("Ollama health check failed: {}", resp.status());
                false
            }
            Err(e) => {
                warn!("Ollama health check error: {}", e);
                false
            }
        }
    }

    async fn ensure_reachable(&self) -> Result<()> {
        if self.health_check().await {
            Ok(())
        } else {
            Err(AppError::Initialization(format!(
                "Ollama unreachable at {}",
                self.config.base_url
            )))
        }
    }

    async fn post<Req: Serialize, Resp: for<'de> Deserialize<'de>>(
        &self,
        endpoint: &str,
        timeout: Duration,
        body: &Req,
    ) -> Result<Resp> {
        let response = self
            .client
            .post(format!("{}{}", self.config.base_url, endpoint))
            .timeout(timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| AppError::Service(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Service(format!(
                "Ollama returned {}: {}",
                status, body
            )));
        }

        response
            .json()
            .await
            .map_err(|e| AppError::Service(format!("Failed to parse response: {}", e)))
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Request payload for the Ollama `/api/chat` endpoint.
#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ChatMessage,
}

#[async_trait]
impl LlmService for OllamaBackend {
    async fn initialize(&self) -> Result<()> {
        self.ensure_reachable().await
    }

    #[instrument(skip(self, messages), fields(component = "ollama", op = "chat", model = %self.config.gen_model, turns = messages.len()))]
    async fn chat(&self, messages: &[ChatMessage]) -> Result<String> {
        let start = Instant::now();
        let request = ChatRequest {
            model: &self.config.gen_model,
            messages,
            stream: false,
        };

        let response: ChatResponse = self
            .post("/api/chat", self.config.gen_timeout, &request)
            .await?;

        let elapsed = start.elapsed().as_millis() as u64;
        debug!(
            response_len = response.message.content.len(),
            duration_ms = elapsed,
            "Generation complete"
        );
        if elapsed > SLOW_GENERATION_MS {
            warn!(duration_ms = elapsed, slow = true, "Slow generation operation");
        }
        Ok(response.message.content)
    }
}

#[async_trait]
impl EmbeddingService for OllamaBackend {
    async fn initialize(&self) -> Result<()> {
        self.ensure_reachable().await
    }

    #[instrument(skip(self, texts), fields(component = "ollama", op = "embed", model = %self.config.embed_model, input_count = texts.len()))]
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let start = Instant::now();
        let request = EmbeddingRequest {
            model: &self.config.embed_model,
            input: texts,
        };

        let response: EmbeddingResponse = self
            .post("/api/embed", self.config.embed_timeout, &request)
            .await?;

        if let Some(v) = response
            .embeddings
            .iter()
            .find(|v| v.len() != self.config.dimension)
        {
            return Err(AppError::Service(format!(
                "Embedding dimension {} does not match configured {}",
                v.len(),
                self.config.dimension
            )));
        }

        let elapsed = start.elapsed().as_millis() as u64;
        debug!(
            result_count = response.embeddings.len(),
            duration_ms = elapsed,
            "Embedding complete"
        );
        if elapsed > SLOW_EMBEDDING_MS {
            warn!(duration_ms = elapsed, slow = true, "Slow embedding operation");
        }
        Ok(response.embeddings)
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_url_is_localhost() {
        assert!(DEFAULT_OLLAMA_URL.contains("127.0.0.1"));
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let config = OllamaConfig::default().with_base_url("http://ollama:11434/");
        assert_eq!(config.base_url, "http://ollama:11434");
    }

    #[tokio::test]
    async fn test_empty_embed_skips_request() {
        // Nothing listens on this port; an empty batch must not hit the network
        let backend =
            OllamaBackend::new(OllamaConfig::default().with_base_url("http://127.0.0.1:9")).unwrap();
        assert!(backend.embed(&[]).await.unwrap().is_empty());
    }
}
