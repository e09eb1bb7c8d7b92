// SQLite StorageService Implementation (chunk vectors and topics)

use crate::error::map_sqlx_error;
use async_trait::async_trait;
use recall_core::error::{AppError, Result};
use recall_core::port::{ExtractedTopic, StorageService};
use sqlx::SqlitePool;
use tracing::{debug, info};

pub struct SqliteKnowledgeStore {
    pool: SqlitePool,
}

impl SqliteKnowledgeStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Topics attached to a source, heaviest first
    pub async fn topics_for(&self, source: &str) -> Result<Vec<ExtractedTopic>> {
        let rows: Vec<(String, f64)> = sqlx::query_as(
            "SELECT label, weight FROM topics WHERE source = ? ORDER BY weight DESC, label ASC",
        )
        .bind(source)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows
            .into_iter()
            .map(|(label, weight)| ExtractedTopic {
                label,
                weight: weight as f32,
            })
            .collect())
    }

    /// Stored vectors for a source in chunk order
    pub async fn vectors_for(&self, source: &str) -> Result<Vec<Vec<f32>>> {
        let blobs: Vec<Vec<u8>> = sqlx::query_scalar(
            "SELECT vector FROM embeddings WHERE source = ? ORDER BY chunk_index ASC",
        )
        .bind(source)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(blobs.iter().map(|b| decode_vector(b)).collect())
    }
}

#[async_trait]
impl StorageService for SqliteKnowledgeStore {
    async fn initialize(&self) -> Result<()> {
        let tables: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN ('embeddings', 'topics')",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if tables != 2 {
            return Err(AppError::Initialization(
                "Knowledge store tables missing, run migrations first".to_string(),
            ));
        }
        info!("Knowledge store ready");
        Ok(())
    }

    async fn store_embeddings(
        &self,
        source: &str,
        chunks: &[String],
        vectors: &[Vec<f32>],
    ) -> Result<usize> {
        if chunks.len() != vectors.len() {
            return Err(AppError::Validation(format!(
                "{} chunks but {} vectors",
                chunks.len(),
                vectors.len()
            )));
        }

        // Re-embedding a source replaces its previous chunks
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        sqlx::query("DELETE FROM embeddings WHERE source = ?")
            .bind(source)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        for (index, (chunk, vector)) in chunks.iter().zip(vectors).enumerate() {
            sqlx::query(
                "INSERT INTO embeddings (source, chunk_index, content, dimension, vector) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(source)
            .bind(index as i64)
            .bind(chunk)
            .bind(vector.len() as i64)
            .bind(encode_vector(vector))
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        debug!(source, chunks = chunks.len(), "Stored embeddings");
        Ok(chunks.len())
    }

    async fn store_topics(&self, source: &str, topics: &[ExtractedTopic]) -> Result<usize> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        sqlx::query("DELETE FROM topics WHERE source = ?")
            .bind(source)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        let mut stored = 0;
        for topic in topics {
            // Repeated labels keep the highest weight
            let result = sqlx::query(
                r#"
                INSERT INTO topics (source, label, weight) VALUES (?, ?, ?)
                ON CONFLICT (source, label) DO UPDATE SET weight = MAX(weight, excluded.weight)
                "#,
            )
            .bind(source)
            .bind(&topic.label)
            .bind(topic.weight as f64)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
            stored += result.rows_affected() as usize;
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        debug!(source, topics = topics.len(), "Stored topics");
        Ok(stored)
    }
}

fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}
