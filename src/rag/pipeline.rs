use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, RwLock};

use crate::core::config::AnswerSettings;
use crate::core::errors::ApiError;
use crate::index::VectorIndex;
use crate::llm::ModelProvider;

/// Source attribution for one retrieved record, in retrieval order.
#[derive(Debug, Clone, Serialize)]
pub struct SourceRef {
    pub title: String,
    pub url: String,
    pub product: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub response: String,
    pub sources: Vec<SourceRef>,
    pub language: String,
}

#[derive(Debug, Clone)]
pub struct RetrievedDoc {
    pub title: String,
    pub body: String,
    pub source: String,
    pub product: String,
}

/// Events on the streaming answer path. Metadata is always emitted first so
/// clients can render attributions before any text arrives.
#[derive(Debug)]
pub enum AnswerEvent {
    Metadata {
        sources: Vec<SourceRef>,
        language: String,
    },
    Token(String),
    Error(ApiError),
}

pub struct RagPipeline {
    models: Arc<dyn ModelProvider>,
    settings: AnswerSettings,
    index: RwLock<Option<VectorIndex>>,
}

impl RagPipeline {
    pub fn new(models: Arc<dyn ModelProvider>, settings: AnswerSettings) -> Self {
        Self {
            models,
            settings,
            index: RwLock::new(None),
        }
    }

    /// Loads a previously persisted index if one exists. Absence is the
    /// normal "no knowledge yet" state, not an error.
    pub async fn load_index(&self, dir: &Path) -> Result<bool, ApiError> {
        if !VectorIndex::exists(dir) {
            tracing::info!("No persisted index at {}; starting uninitialized", dir.display());
            return Ok(false);
        }

        let index = VectorIndex::load(dir)?;
        tracing::info!("Loaded index with {} entries", index.len());
        *self.index.write().await = Some(index);
        Ok(true)
    }

    /// Swaps in a freshly built index. Queries in flight keep reading the
    /// old one until the write lock is granted.
    pub async fn install_index(&self, index: VectorIndex) {
        *self.index.write().await = Some(index);
    }

    pub async fn is_ready(&self) -> bool {
        self.index.read().await.is_some()
    }

    /// Top-k records for a query. With no index loaded this returns an
    /// empty vec without touching the embedder.
    pub async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<RetrievedDoc>, ApiError> {
        let guard = self.index.read().await;
        let Some(index) = guard.as_ref() else {
            return Ok(Vec::new());
        };
        if index.is_empty() {
            return Ok(Vec::new());
        }

        let embeddings = self.models.embed(&[query.to_string()]).await?;
        let query_embedding = embeddings
            .first()
            .ok_or_else(|| ApiError::Internal("embedder returned no vector".into()))?;

        Ok(index
            .search(query_embedding, k)
            .into_iter()
            .map(|(entry, _score)| RetrievedDoc {
                title: entry.metadata.title.clone(),
                body: entry.body.clone(),
                source: entry.metadata.source.clone(),
                product: entry.metadata.product.clone(),
            })
            .collect())
    }

    /// Retrieval + context assembly + prompt rendering. `None` means the
    /// knowledge base is uninitialized (the designed degraded mode).
    async fn prepare(
        &self,
        query: &str,
        language: &str,
    ) -> Result<Option<(Vec<SourceRef>, String)>, ApiError> {
        if !self.is_ready().await {
            return Ok(None);
        }

        let docs = self.retrieve(query, self.settings.top_k).await?;

        let sources = docs
            .iter()
            .map(|doc| SourceRef {
                title: doc.title.clone(),
                url: doc.source.clone(),
                product: doc.product.clone(),
            })
            .collect();

        let bodies: Vec<&str> = docs.iter().map(|doc| doc.body.as_str()).collect();
        let context = truncate_context(
            &bodies.join("\n\n"),
            self.settings.context_limit_chars,
        );

        let prompt = render_prompt(&self.settings.prompt_template, &context, query, language);
        Ok(Some((sources, prompt)))
    }

    pub async fn answer(&self, query: &str, language: &str) -> Result<QueryResult, ApiError> {
        match self.prepare(query, language).await? {
            None => Ok(QueryResult {
                response: self.settings.uninitialized_response.clone(),
                sources: Vec::new(),
                language: language.to_string(),
            }),
            Some((sources, prompt)) => {
                let response = self.models.generate(&prompt).await?;
                Ok(QueryResult {
                    response,
                    sources,
                    language: language.to_string(),
                })
            }
        }
    }

    /// Streaming variant. The producer stops generating as soon as the
    /// receiver is dropped, so a disconnected client cancels the model call.
    pub async fn answer_stream(&self, query: &str, language: &str) -> mpsc::Receiver<AnswerEvent> {
        let (tx, rx) = mpsc::channel(32);

        let prepared = self.prepare(query, language).await;
        let models = Arc::clone(&self.models);
        let language = language.to_string();
        let degraded = self.settings.uninitialized_response.clone();

        tokio::spawn(async move {
            match prepared {
                Err(err) => {
                    let _ = tx
                        .send(AnswerEvent::Metadata {
                            sources: Vec::new(),
                            language,
                        })
                        .await;
                    let _ = tx.send(AnswerEvent::Error(err)).await;
                }
                Ok(None) => {
                    let _ = tx
                        .send(AnswerEvent::Metadata {
                            sources: Vec::new(),
                            language,
                        })
                        .await;
                    let _ = tx.send(AnswerEvent::Token(degraded)).await;
                }
                Ok(Some((sources, prompt))) => {
                    if tx
                        .send(AnswerEvent::Metadata { sources, language })
                        .await
                        .is_err()
                    {
                        return;
                    }

                    match models.stream_generate(&prompt).await {
                        Ok(mut fragments) => {
                            while let Some(item) = fragments.recv().await {
                                match item {
                                    Ok(token) => {
                                        if tx.send(AnswerEvent::Token(token)).await.is_err() {
                                            // consumer gone; dropping the
                                            // fragment receiver cancels the
                                            // producer
                                            return;
                                        }
                                    }
                                    Err(err) => {
                                        let _ = tx.send(AnswerEvent::Error(err)).await;
                                        return;
                                    }
                                }
                            }
                        }
                        Err(err) => {
                            let _ = tx.send(AnswerEvent::Error(err)).await;
                        }
                    }
                }
            }
        });

        rx
    }
}

/// Deterministic prefix cut: contexts at or under the limit pass through
/// unchanged, longer ones keep exactly the first `limit` characters.
pub fn truncate_context(context: &str, limit: usize) -> String {
    context.chars().take(limit).collect()
}

fn render_prompt(template: &str, context: &str, question: &str, language: &str) -> String {
    template
        .replace("{context}", context)
        .replace("{question}", question)
        .replace("{language}", language)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::core::config::IndexSettings;
    use crate::index::IndexBuilder;
    use crate::llm::testing::StubProvider;
    use crate::scrape::ContentRecord;

    fn record(body: &str, url: &str) -> ContentRecord {
        ContentRecord {
            title: "Opening hours".to_string(),
            body: body.to_string(),
            source_url: url.to_string(),
            product: "support".to_string(),
        }
    }

    async fn ready_pipeline(provider: Arc<StubProvider>, bodies: &[&str]) -> RagPipeline {
        let records: Vec<ContentRecord> = bodies
            .iter()
            .enumerate()
            .map(|(i, body)| record(body, &format!("https://example.com/{}", i)))
            .collect();

        let builder = IndexBuilder::new(
            provider.clone(),
            IndexSettings {
                batch_delay_ms: 0,
                embed_backoff_ms: 1,
                ..IndexSettings::default()
            },
        );
        let index = builder.build(&records).await.expect("build").expect("index");

        let pipeline = RagPipeline::new(provider, AnswerSettings::default());
        pipeline.install_index(index).await;
        pipeline
    }

    #[test]
    fn truncation_is_deterministic_and_idempotent() {
        let short = "a".repeat(6000);
        assert_eq!(truncate_context(&short, 6000), short);

        let long = "b".repeat(9000);
        let cut = truncate_context(&long, 6000);
        assert_eq!(cut.chars().count(), 6000);
        assert_eq!(cut, "b".repeat(6000));
        assert_eq!(truncate_context(&cut, 6000), cut);
    }

    #[tokio::test]
    async fn uninitialized_retrieval_is_empty_and_never_embeds() {
        let provider = Arc::new(StubProvider::default());
        let calls = Arc::clone(&provider.embed_calls);
        let pipeline = RagPipeline::new(provider, AnswerSettings::default());

        let docs = pipeline.retrieve("anything", 2).await.expect("retrieve");
        assert!(docs.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn uninitialized_answer_is_the_degraded_response() {
        let pipeline = RagPipeline::new(
            Arc::new(StubProvider::default()),
            AnswerSettings::default(),
        );

        let result = pipeline.answer("anything", "en").await.expect("answer");
        assert!(result.response.contains("not yet initialized"));
        assert!(result.sources.is_empty());
        assert_eq!(result.language, "en");
    }

    #[tokio::test]
    async fn context_contains_retrieved_body_verbatim() {
        let provider = Arc::new(StubProvider::default());
        let pipeline = ready_pipeline(
            provider,
            &["Support hours are 8am-5pm", "Billing happens monthly."],
        )
        .await;

        let (sources, prompt) = pipeline
            .prepare("when are support hours?", "en")
            .await
            .expect("prepare")
            .expect("ready");

        assert!(prompt.contains("Support hours are 8am-5pm"));
        assert!(!sources.is_empty());
        assert_eq!(sources[0].url, "https://example.com/0");
    }

    #[tokio::test]
    async fn stream_emits_metadata_first_then_tokens() {
        let provider = Arc::new(StubProvider::default());
        let pipeline = ready_pipeline(provider, &["Support hours are 8am-5pm"]).await;

        let mut events = pipeline.answer_stream("support hours?", "en").await;

        let first = events.recv().await.expect("first event");
        let sources = match first {
            AnswerEvent::Metadata { sources, language } => {
                assert_eq!(language, "en");
                sources
            }
            other => panic!("expected metadata first, got {:?}", other),
        };
        assert_eq!(sources.len(), 1);

        let mut text = String::new();
        while let Some(event) = events.recv().await {
            match event {
                AnswerEvent::Token(token) => text.push_str(&token),
                other => panic!("unexpected event {:?}", other),
            }
        }
        assert_eq!(text, "stub answer");
    }

    #[tokio::test]
    async fn degraded_stream_still_leads_with_metadata() {
        let pipeline = RagPipeline::new(
            Arc::new(StubProvider::default()),
            AnswerSettings::default(),
        );

        let mut events = pipeline.answer_stream("anything", "fr").await;
        match events.recv().await.expect("first event") {
            AnswerEvent::Metadata { sources, language } => {
                assert!(sources.is_empty());
                assert_eq!(language, "fr");
            }
            other => panic!("expected metadata first, got {:?}", other),
        }
        match events.recv().await.expect("second event") {
            AnswerEvent::Token(token) => assert!(token.contains("not yet initialized")),
            other => panic!("expected degraded token, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn generation_failure_surfaces_as_error() {
        let provider = Arc::new(StubProvider {
            fail_generation: true,
            ..StubProvider::default()
        });
        let pipeline = ready_pipeline(provider, &["Support hours are 8am-5pm"]).await;

        assert!(pipeline.answer("support hours?", "en").await.is_err());

        let mut events = pipeline.answer_stream("support hours?", "en").await;
        assert!(matches!(
            events.recv().await,
            Some(AnswerEvent::Metadata { .. })
        ));
        assert!(matches!(events.recv().await, Some(AnswerEvent::Error(_))));
    }

    #[tokio::test]
    async fn retrieval_respects_k() {
        let provider = Arc::new(StubProvider::default());
        let pipeline = ready_pipeline(
            provider,
            &[
                "Support hours are 8am-5pm",
                "More about support coverage windows",
                "Billing happens monthly.",
            ],
        )
        .await;

        let docs = pipeline.retrieve("support hours", 2).await.expect("retrieve");
        assert_eq!(docs.len(), 2);
    }
}
