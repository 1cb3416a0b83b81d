use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::core::errors::ApiError;
use crate::index::IndexBuilder;
use crate::rag::{AnswerEvent, SourceRef};
use crate::scrape::{self, ScrapeOptions};
use crate::state::AppState;

/// Prefix of the final stream chunk carrying the request id; the client
/// needs that id to submit feedback once the stream is over.
pub const END_EVENT_SENTINEL: &str = "\n\n__METADATA_END__:";

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub query: String,
    #[serde(default)]
    #[allow(dead_code)]
    pub product: Option<String>,
    #[serde(default = "default_language")]
    pub language: String,
}

fn default_language() -> String {
    "en".to_string()
}

#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    pub request_id: String,
    pub score: i64,
}

/// Optional knobs for `/scrape`; an empty body runs the full rebuild.
#[derive(Debug, Default, Deserialize)]
pub struct ScrapeRequest {
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub skip_images: bool,
}

pub async fn root() -> impl IntoResponse {
    Json(json!({ "status": "Knowledge-base backend running" }))
}

pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let models_reachable = state.models.health_check().await.unwrap_or(false);
    Json(json!({
        "status": "ok",
        "initialized": state.pipeline.is_ready().await,
        "models_reachable": models_reachable,
    }))
}

/// Streaming chat endpoint.
///
/// Body protocol: one JSON metadata chunk (sources + language), then raw
/// text fragments, then the end-event sentinel with the request id. The
/// interaction is logged after the stream ends (also when the client
/// disconnects mid-stream, with whatever text was produced and the true
/// latency) so the sentinel can carry the logged id.
pub async fn chat(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatRequest>,
) -> Result<Response, ApiError> {
    if request.query.trim().is_empty() {
        return Err(ApiError::BadRequest("query must not be empty".to_string()));
    }

    let started = Instant::now();
    let mut events = state
        .pipeline
        .answer_stream(&request.query, &request.language)
        .await;

    let (tx, rx) = mpsc::channel::<Result<Bytes, Infallible>>(32);
    let metrics = state.metrics.clone();
    let query = request.query.clone();

    tokio::spawn(async move {
        let mut sources: Vec<SourceRef> = Vec::new();
        let mut ttft_ms: Option<f64> = None;
        let mut full_response = String::new();

        while let Some(event) = events.recv().await {
            match event {
                AnswerEvent::Metadata {
                    sources: retrieved,
                    language,
                } => {
                    let payload =
                        json!({ "sources": &retrieved, "language": language }).to_string();
                    sources = retrieved;
                    if tx.send(Ok(Bytes::from(payload))).await.is_err() {
                        break;
                    }
                }
                AnswerEvent::Token(token) => {
                    if ttft_ms.is_none() {
                        ttft_ms = Some(started.elapsed().as_secs_f64() * 1000.0);
                    }
                    full_response.push_str(&token);
                    if tx.send(Ok(Bytes::from(token))).await.is_err() {
                        break;
                    }
                }
                AnswerEvent::Error(err) => {
                    tracing::error!("Generation failed mid-stream: {}", err);
                    let _ = tx
                        .send(Ok(Bytes::from(format!("\n\n[error] {}", err))))
                        .await;
                    break;
                }
            }
        }
        // An early break drops the event receiver, which cancels the
        // generation producer.
        drop(events);

        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
        match metrics
            .log_interaction(
                &query,
                &full_response,
                &sources,
                latency_ms,
                ttft_ms.unwrap_or(0.0),
            )
            .await
        {
            Ok(request_id) => {
                let end_event = json!({ "request_id": request_id, "type": "end_event" });
                let _ = tx
                    .send(Ok(Bytes::from(format!(
                        "{}{}",
                        END_EVENT_SENTINEL, end_event
                    ))))
                    .await;
            }
            Err(err) => tracing::error!("Failed to log interaction: {}", err),
        }
    });

    let body = Body::from_stream(ReceiverStream::new(rx));
    Response::builder()
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(body)
        .map_err(ApiError::internal)
}

pub async fn feedback(
    State(state): State<Arc<AppState>>,
    Json(request): Json<FeedbackRequest>,
) -> Result<Json<Value>, ApiError> {
    if !(1..=5).contains(&request.score) {
        return Err(ApiError::BadRequest(
            "score must be between 1 and 5".to_string(),
        ));
    }

    state
        .metrics
        .update_feedback(&request.request_id, request.score)
        .await?;

    Ok(Json(json!({ "status": "ok" })))
}

/// Full crawl + index rebuild. The persisted index is replaced wholesale
/// and the in-memory one swapped once the build completes.
pub async fn trigger_scrape(
    State(state): State<Arc<AppState>>,
    request: Option<Json<ScrapeRequest>>,
) -> Result<Json<Value>, ApiError> {
    let request = request.map(|Json(req)| req).unwrap_or_default();
    let options = ScrapeOptions {
        limit: request.limit,
        skip_images: request.skip_images,
    };

    let records =
        scrape::scrape_portal(&state.settings.crawl, Arc::clone(&state.models), options).await?;
    let count = records.len();

    let builder = IndexBuilder::new(Arc::clone(&state.models), state.settings.index.clone());
    match builder.build(&records).await? {
        Some(index) => {
            index.save(&state.paths.index_dir)?;
            state.pipeline.install_index(index).await;
            Ok(Json(json!({
                "status": "Scraping and ingestion complete",
                "count": count,
            })))
        }
        None => Ok(Json(json!({ "status": "No documents found", "count": 0 }))),
    }
}
