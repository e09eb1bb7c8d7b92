use super::{parse_payload, source_key, source_text};
use crate::application::dependencies::ProcessDependencies;
use crate::application::registry::JobHandler;
use crate::domain::{Job, JobId};
use crate::error::{AppError, Result};
use crate::port::{EmbeddingService, StorageService};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;

pub const DEFAULT_CHUNK_WORDS: usize = 200;
const EMBED_BATCH_SIZE: usize = 16;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EmbeddingPayload {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    chunk_words: Option<usize>,
}

/// Split text into chunks of at most `max_words` whitespace-separated words
pub fn chunk_text(text: &str, max_words: usize) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    words
        .chunks(max_words.max(1))
        .map(|chunk| chunk.join(" "))
        .collect()
}

/// Chunks captured text, embeds it in batches, stores the vectors
pub struct EmbeddingHandler {
    embedding: Arc<dyn EmbeddingService>,
    storage: Arc<dyn StorageService>,
}

impl EmbeddingHandler {
    pub fn new(embedding: Arc<dyn EmbeddingService>, storage: Arc<dyn StorageService>) -> Self {
        Self { embedding, storage }
    }
}

#[async_trait]
impl JobHandler for EmbeddingHandler {
    async fn process(
        &self,
        _job_id: &JobId,
        job: &Job,
        deps: &ProcessDependencies,
    ) -> Result<serde_json::Value> {
        let start = Instant::now();
        let payload: EmbeddingPayload = parse_payload(job)?;
        let text = source_text(payload.text, job.page_data.as_ref())?;
        let source = source_key(payload.source, job);

        let chunks = chunk_text(&text, payload.chunk_words.unwrap_or(DEFAULT_CHUNK_WORDS));
        deps.report_progress(format!("Chunked into {} pieces", chunks.len()), 10)
            .await;

        let batches = chunks.len().div_ceil(EMBED_BATCH_SIZE);
        let mut vectors = Vec::with_capacity(chunks.len());
        for (i, batch) in chunks.chunks(EMBED_BATCH_SIZE).enumerate() {
            let embedded = self.embedding.embed(batch).await?;
            if embedded.len() != batch.len() {
                return Err(AppError::Service(format!(
                    "Embedding backend returned {} vectors for {} chunks",
                    embedded.len(),
                    batch.len()
                )));
            }
            vectors.extend(embedded);

            // 10..80 covers embedding, storage gets the rest
            let progress = 10 + ((i + 1) * 70 / batches) as u8;
            deps.report_progress(format!("Embedded batch {}/{}", i + 1, batches), progress)
                .await;
        }

        deps.report_progress("Storing vectors", 85).await;
        let stored = self
            .storage
            .store_embeddings(&source, &chunks, &vectors)
            .await?;

        deps.logger().info(&format!(
            "Embedded {} chunks for {} in {}ms",
            stored,
            source,
            start.elapsed().as_millis()
        ));

        Ok(json!({
            "source": source,
            "chunks": stored,
            "dimension": self.embedding.dimension(),
        }))
    }
}
