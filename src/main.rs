use std::env;

use anyhow::Context;
use tokio::net::TcpListener;

use deskbot_backend::core::logging;
use deskbot_backend::server;
use deskbot_backend::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let state = AppState::initialize().await?;
    logging::init(&state.paths);

    let port = env::var("PORT")
        .ok()
        .and_then(|val| val.parse::<u16>().ok())
        .unwrap_or(state.settings.server.port);
    let bind_addr = format!("0.0.0.0:{}", port);

    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", bind_addr))?;
    tracing::info!("Listening on {}", listener.local_addr()?);

    let app = server::router::router(state);
    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
