//! card-studio HTTP Server
//!
//! Axum-based server streaming agent turns over SSE, with conversation
//! management, uploaded-blob serving and image-job progress endpoints.

mod config;
mod handlers;
mod state;

use std::sync::Arc;

use agent_core::LlmProvider;
use agent_runtime::GeminiProvider;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::ServerConfig;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env();

    // Initialize LLM provider
    let gemini = GeminiProvider::from_env()?;
    let model = gemini.config().model.clone();
    let provider: Arc<dyn LlmProvider> = Arc::new(gemini);

    match provider.health_check().await {
        Ok(true) => tracing::info!(model = %model, "Connected to Gemini"),
        Ok(false) | Err(_) => tracing::warn!("Gemini not reachable; turns will fail until it is"),
    }

    let state = AppState::build(&config, provider, &model).await?;

    tracing::info!(
        data_dir = %config.data_dir.display(),
        tools = state.orchestrator.tools().len(),
        "Studio initialized"
    );
    for name in state.orchestrator.tools().names() {
        tracing::debug!(tool = name, "Registered tool");
    }

    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = handlers::router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("card-studio server running on http://{}", config.bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
