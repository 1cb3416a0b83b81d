use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::server::handlers;
use crate::state::AppState;

/// Builds the application router: chat/feedback/scrape API plus health
/// probes, behind permissive CORS (the UI is served from another origin).
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .route("/chat", post(handlers::chat))
        .route("/feedback", post(handlers::feedback))
        .route("/scrape", post(handlers::trigger_scrape))
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
