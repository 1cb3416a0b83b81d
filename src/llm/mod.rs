pub mod openai;
pub mod provider;

pub use openai::OpenAiCompatProvider;
pub use provider::ModelProvider;

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use crate::core::errors::ApiError;

    use super::ModelProvider;

    /// Deterministic in-memory provider for pipeline and index tests.
    ///
    /// Embeddings are keyword indicators over `vocabulary`, so similarity is
    /// predictable; `embed_failures` makes the first N embed calls fail to
    /// exercise retry paths.
    pub struct StubProvider {
        pub vocabulary: Vec<&'static str>,
        pub reply: String,
        pub fragments: Vec<String>,
        pub embed_failures: AtomicUsize,
        pub embed_calls: Arc<AtomicUsize>,
        pub fail_generation: bool,
    }

    impl Default for StubProvider {
        fn default() -> Self {
            Self {
                vocabulary: vec!["support", "hours", "password", "billing"],
                reply: "stub answer".to_string(),
                fragments: vec!["stub ".to_string(), "answer".to_string()],
                embed_failures: AtomicUsize::new(0),
                embed_calls: Arc::new(AtomicUsize::new(0)),
                fail_generation: false,
            }
        }
    }

    impl StubProvider {
        pub fn failing_embeds(n: usize) -> Self {
            Self {
                embed_failures: AtomicUsize::new(n),
                ..Self::default()
            }
        }

        pub fn vectorize(&self, text: &str) -> Vec<f32> {
            let lower = text.to_lowercase();
            self.vocabulary
                .iter()
                .map(|word| if lower.contains(word) { 1.0 } else { 0.0 })
                .collect()
        }
    }

    #[async_trait]
    impl ModelProvider for StubProvider {
        fn name(&self) -> &str {
            "stub"
        }

        async fn health_check(&self) -> Result<bool, ApiError> {
            Ok(true)
        }

        async fn caption(&self, _image_png: &[u8]) -> Result<String, ApiError> {
            Ok("a screenshot".to_string())
        }

        async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, ApiError> {
            self.embed_calls.fetch_add(1, Ordering::SeqCst);
            let remaining = self.embed_failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.embed_failures.store(remaining - 1, Ordering::SeqCst);
                return Err(ApiError::Internal("embedding backend overloaded".into()));
            }
            Ok(inputs.iter().map(|text| self.vectorize(text)).collect())
        }

        async fn generate(&self, _prompt: &str) -> Result<String, ApiError> {
            if self.fail_generation {
                return Err(ApiError::Internal("generation backend down".into()));
            }
            Ok(self.reply.clone())
        }

        async fn stream_generate(
            &self,
            _prompt: &str,
        ) -> Result<mpsc::Receiver<Result<String, ApiError>>, ApiError> {
            if self.fail_generation {
                return Err(ApiError::Internal("generation backend down".into()));
            }
            let (tx, rx) = mpsc::channel(8);
            let fragments = self.fragments.clone();
            tokio::spawn(async move {
                for fragment in fragments {
                    if tx.send(Ok(fragment)).await.is_err() {
                        return;
                    }
                }
            });
            Ok(rx)
        }
    }
}
