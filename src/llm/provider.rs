use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::core::errors::ApiError;

/// Injected model capabilities (captioning, embedding, generation).
///
/// Constructed once at startup and shared as `Arc<dyn ModelProvider>`, so
/// the load-once cost semantics live with the process, not in hidden
/// globals.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// return the provider name (e.g. "openai-compat")
    fn name(&self) -> &str;

    /// check if the provider is healthy/reachable
    async fn health_check(&self) -> Result<bool, ApiError>;

    /// describe an image (PNG bytes) in one short caption
    async fn caption(&self, image_png: &[u8]) -> Result<String, ApiError>;

    /// generate embeddings, one vector per input
    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, ApiError>;

    /// text completion (non-streaming)
    async fn generate(&self, prompt: &str) -> Result<String, ApiError>;

    /// text completion (streaming); dropping the receiver cancels generation
    async fn stream_generate(
        &self,
        prompt: &str,
    ) -> Result<mpsc::Receiver<Result<String, ApiError>>, ApiError>;
}
