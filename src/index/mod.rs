//! Vector index: embedding storage, similarity search, and the batched,
//! rate-limit-aware build path.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::config::IndexSettings;
use crate::core::errors::ApiError;
use crate::llm::ModelProvider;
use crate::scrape::ContentRecord;

const ENTRIES_FILE: &str = "entries.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryMetadata {
    pub title: String,
    pub source: String,
    pub product: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub body: String,
    pub embedding: Vec<f32>,
    pub metadata: EntryMetadata,
}

/// Brute-force cosine index over content records. Entries are owned
/// exclusively by the index and replaced wholesale on re-ingestion.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct VectorIndex {
    entries: Vec<IndexEntry>,
}

impl VectorIndex {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Top-k entries by cosine similarity to the query embedding.
    pub fn search(&self, query_embedding: &[f32], k: usize) -> Vec<(&IndexEntry, f32)> {
        let mut scored: Vec<(&IndexEntry, f32)> = self
            .entries
            .iter()
            .map(|entry| (entry, cosine_similarity(query_embedding, &entry.embedding)))
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(k.max(1));
        scored
    }

    /// The directory's presence is the sole "knowledge base initialized"
    /// signal.
    pub fn exists(dir: &Path) -> bool {
        dir.join(ENTRIES_FILE).exists()
    }

    /// Persists the index, fully replacing any prior index at `dir`.
    pub fn save(&self, dir: &Path) -> Result<(), ApiError> {
        if dir.exists() {
            fs::remove_dir_all(dir).map_err(ApiError::internal)?;
        }
        fs::create_dir_all(dir).map_err(ApiError::internal)?;

        let payload = serde_json::to_vec(self).map_err(ApiError::internal)?;
        fs::write(dir.join(ENTRIES_FILE), payload).map_err(ApiError::internal)?;

        tracing::info!("Persisted index with {} entries to {}", self.len(), dir.display());
        Ok(())
    }

    pub fn load(dir: &Path) -> Result<Self, ApiError> {
        let raw = fs::read(dir.join(ENTRIES_FILE)).map_err(ApiError::internal)?;
        serde_json::from_slice(&raw).map_err(ApiError::internal)
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    let denom = norm_a * norm_b;

    if denom <= f32::EPSILON {
        0.0
    } else {
        dot / denom
    }
}

/// Builds a vector index from content records, batching embedding calls to
/// stay under external rate limits.
pub struct IndexBuilder {
    models: Arc<dyn ModelProvider>,
    settings: IndexSettings,
}

impl IndexBuilder {
    pub fn new(models: Arc<dyn ModelProvider>, settings: IndexSettings) -> Self {
        Self { models, settings }
    }

    /// Embeds `records` batch by batch. The first batch creates the index
    /// and later batches append; a batch whose embedding ultimately fails is
    /// logged and skipped. Empty input is a no-op.
    pub async fn build(&self, records: &[ContentRecord]) -> Result<Option<VectorIndex>, ApiError> {
        if records.is_empty() {
            tracing::info!("No records to index");
            return Ok(None);
        }

        tracing::info!("Indexing {} records", records.len());
        let mut index = VectorIndex::default();

        for (i, batch) in records.chunks(self.settings.batch_size.max(1)).enumerate() {
            if i > 0 && self.settings.batch_delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.settings.batch_delay_ms)).await;
            }

            match self.embed_batch(batch).await {
                Ok(embeddings) => {
                    for (record, embedding) in batch.iter().zip(embeddings) {
                        index.entries.push(IndexEntry {
                            body: record.body.clone(),
                            embedding,
                            metadata: EntryMetadata {
                                title: record.title.clone(),
                                source: record.source_url.clone(),
                                product: record.product.clone(),
                            },
                        });
                    }
                }
                Err(err) => {
                    tracing::warn!("Skipping batch {} of {} records: {}", i + 1, batch.len(), err);
                }
            }
        }

        Ok(Some(index))
    }

    /// The embedding call is the most rate-limit-sensitive external
    /// dependency, so it alone gets retries with exponential backoff.
    async fn embed_batch(&self, batch: &[ContentRecord]) -> Result<Vec<Vec<f32>>, ApiError> {
        let inputs: Vec<String> = batch.iter().map(|record| record.body.clone()).collect();

        let mut backoff_ms = self.settings.embed_backoff_ms;
        let mut attempt = 1;
        loop {
            match self.models.embed(&inputs).await {
                Ok(vectors) => return Ok(vectors),
                Err(err) if attempt < self.settings.embed_max_attempts => {
                    tracing::warn!(
                        "Embedding attempt {} failed: {}; retrying in {}ms",
                        attempt,
                        err,
                        backoff_ms
                    );
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms = (backoff_ms * 2).min(self.settings.embed_backoff_ceiling_ms);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::llm::testing::StubProvider;

    fn record(body: &str) -> ContentRecord {
        ContentRecord {
            title: "T".to_string(),
            body: body.to_string(),
            source_url: "https://example.com/a".to_string(),
            product: "support".to_string(),
        }
    }

    fn fast_settings() -> IndexSettings {
        IndexSettings {
            batch_size: 20,
            batch_delay_ms: 0,
            embed_max_attempts: 5,
            embed_backoff_ms: 1,
            embed_backoff_ceiling_ms: 4,
        }
    }

    #[tokio::test]
    async fn empty_input_is_a_no_op() {
        let builder = IndexBuilder::new(Arc::new(StubProvider::default()), fast_settings());
        let index = builder.build(&[]).await.expect("build");
        assert!(index.is_none());
    }

    #[tokio::test]
    async fn batch_succeeding_on_final_attempt_is_included() {
        let provider = Arc::new(StubProvider::failing_embeds(4));
        let calls = Arc::clone(&provider.embed_calls);
        let builder = IndexBuilder::new(provider, fast_settings());

        let index = builder
            .build(&[record("support hours")])
            .await
            .expect("build")
            .expect("index");

        assert_eq!(index.len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn failing_batch_is_skipped_not_fatal() {
        let provider = Arc::new(StubProvider::failing_embeds(1));
        let settings = IndexSettings {
            batch_size: 1,
            embed_max_attempts: 1,
            ..fast_settings()
        };
        let builder = IndexBuilder::new(provider, settings);

        let index = builder
            .build(&[record("first batch"), record("second batch")])
            .await
            .expect("build")
            .expect("index");

        assert_eq!(index.len(), 1);
        assert_eq!(index.entries[0].body, "second batch");
    }

    #[tokio::test]
    async fn save_load_roundtrip_replaces_prior_index() {
        let dir = tempfile::tempdir().expect("tempdir");
        let index_dir = dir.path().join("kb_index");
        assert!(!VectorIndex::exists(&index_dir));

        let builder = IndexBuilder::new(Arc::new(StubProvider::default()), fast_settings());
        let index = builder
            .build(&[record("support hours"), record("billing info")])
            .await
            .expect("build")
            .expect("index");
        index.save(&index_dir).expect("save");
        assert!(VectorIndex::exists(&index_dir));

        let reloaded = VectorIndex::load(&index_dir).expect("load");
        assert_eq!(reloaded.len(), 2);

        let smaller = builder
            .build(&[record("password reset")])
            .await
            .expect("build")
            .expect("index");
        smaller.save(&index_dir).expect("save again");

        let reloaded = VectorIndex::load(&index_dir).expect("reload");
        assert_eq!(reloaded.len(), 1);
    }

    #[tokio::test]
    async fn search_ranks_by_similarity() {
        let builder = IndexBuilder::new(Arc::new(StubProvider::default()), fast_settings());
        let index = builder
            .build(&[
                record("billing and invoices"),
                record("support hours are 8am-5pm"),
            ])
            .await
            .expect("build")
            .expect("index");

        let provider = StubProvider::default();
        let query = provider.vectorize("when are support hours?");
        let results = index.search(&query, 1);

        assert_eq!(results.len(), 1);
        assert!(results[0].0.body.contains("8am-5pm"));
    }
}
