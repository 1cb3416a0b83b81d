use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures_util::StreamExt;
use reqwest::Client;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::core::config::ModelSettings;
use crate::core::errors::ApiError;

use super::provider::ModelProvider;

/// Model backend speaking the OpenAI HTTP protocol (LM Studio, Ollama,
/// llama.cpp server and similar local runtimes all expose it).
#[derive(Clone)]
pub struct OpenAiCompatProvider {
    base_url: String,
    client: Client,
    settings: ModelSettings,
}

impl OpenAiCompatProvider {
    pub fn new(settings: ModelSettings) -> Self {
        // Generation can legitimately run for minutes, so only the connect
        // phase is bounded; reads are cancelled by dropping the stream.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            client,
            settings,
        }
    }

    async fn chat_completion(&self, body: Value) -> Result<Value, ApiError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let res = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(ApiError::internal)?;

        if !res.status().is_success() {
            let text = res.text().await.unwrap_or_default();
            return Err(ApiError::Internal(format!("chat completion error: {}", text)));
        }

        res.json().await.map_err(ApiError::internal)
    }
}

fn message_content(payload: &Value) -> String {
    payload["choices"][0]["message"]["content"]
        .as_str()
        .unwrap_or_default()
        .to_string()
}

/// Extracts the delta text from one `data:` line of an SSE stream.
///
/// Returns `None` for keep-alives, the `[DONE]` sentinel and lines without
/// content.
fn sse_delta(line: &str) -> Option<String> {
    let line = line.trim();
    let data = line.strip_prefix("data: ")?;
    if data == "[DONE]" {
        return None;
    }
    let json: Value = serde_json::from_str(data).ok()?;
    let content = json["choices"][0]["delta"]["content"].as_str()?;
    if content.is_empty() {
        None
    } else {
        Some(content.to_string())
    }
}

#[async_trait]
impl ModelProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        "openai-compat"
    }

    async fn health_check(&self) -> Result<bool, ApiError> {
        let url = format!("{}/v1/models", self.base_url);
        match self.client.get(&url).send().await {
            Ok(resp) => Ok(resp.status().is_success()),
            Err(_) => Ok(false),
        }
    }

    async fn caption(&self, image_png: &[u8]) -> Result<String, ApiError> {
        let data_url = format!("data:image/png;base64,{}", BASE64.encode(image_png));
        let body = json!({
            "model": self.settings.caption_model,
            "messages": [{
                "role": "user",
                "content": [
                    {"type": "text", "text": "Describe this image in one short sentence."},
                    {"type": "image_url", "image_url": {"url": data_url}},
                ],
            }],
            "max_tokens": 50,
            "stream": false,
        });

        let payload = self.chat_completion(body).await?;
        Ok(message_content(&payload).trim().to_string())
    }

    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, ApiError> {
        let url = format!("{}/v1/embeddings", self.base_url);
        let body = json!({
            "model": self.settings.embedding_model,
            "input": inputs,
        });

        let res = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(ApiError::internal)?;

        if !res.status().is_success() {
            let text = res.text().await.unwrap_or_default();
            return Err(ApiError::Internal(format!("embedding error: {}", text)));
        }

        let payload: Value = res.json().await.map_err(ApiError::internal)?;

        let mut embeddings = Vec::new();
        if let Some(data) = payload["data"].as_array() {
            for item in data {
                if let Some(vals) = item["embedding"].as_array() {
                    let vec: Vec<f32> = vals
                        .iter()
                        .filter_map(|v| v.as_f64().map(|f| f as f32))
                        .collect();
                    embeddings.push(vec);
                }
            }
        }

        if embeddings.len() != inputs.len() {
            return Err(ApiError::Internal(format!(
                "embedding count mismatch: {} inputs, {} vectors",
                inputs.len(),
                embeddings.len()
            )));
        }

        Ok(embeddings)
    }

    async fn generate(&self, prompt: &str) -> Result<String, ApiError> {
        let body = json!({
            "model": self.settings.generation_model,
            "messages": [{"role": "user", "content": prompt}],
            "max_tokens": self.settings.max_tokens,
            "temperature": self.settings.temperature,
            "stream": false,
        });

        let payload = self.chat_completion(body).await?;
        Ok(message_content(&payload).trim().to_string())
    }

    async fn stream_generate(
        &self,
        prompt: &str,
    ) -> Result<mpsc::Receiver<Result<String, ApiError>>, ApiError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = json!({
            "model": self.settings.generation_model,
            "messages": [{"role": "user", "content": prompt}],
            "max_tokens": self.settings.max_tokens,
            "temperature": self.settings.temperature,
            "stream": true,
        });

        let res = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(ApiError::internal)?;

        if !res.status().is_success() {
            let text = res.text().await.unwrap_or_default();
            return Err(ApiError::Internal(format!("stream error: {}", text)));
        }

        let (tx, rx) = mpsc::channel(32);
        let mut stream = res.bytes_stream();

        tokio::spawn(async move {
            while let Some(item) = stream.next().await {
                match item {
                    Ok(bytes) => {
                        let chunk_str = String::from_utf8_lossy(&bytes);
                        for line in chunk_str.lines() {
                            if line.trim() == "data: [DONE]" {
                                return;
                            }
                            if let Some(content) = sse_delta(line) {
                                // receiver dropped means the client is gone
                                if tx.send(Ok(content)).await.is_err() {
                                    return;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(ApiError::internal(e))).await;
                        return;
                    }
                }
            }
        });

        Ok(rx)
    }
}
