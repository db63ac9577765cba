//! Main Entrypoint for the Onboarding API Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Loading the field schema, the client page and preparing the output files.
//! 3. Initializing shared services (session store, LLM client, realtime relay).
//! 4. Constructing the Axum router and applying middleware.
//! 5. Starting the web server and handling graceful shutdown.

use anyhow::Context;
use async_openai::config::OpenAIConfig;
use onboard_api::{
    config::Config, persistence::TranscriptSink, relay::RealtimeRelay, router::create_router,
    state::AppState,
};
use onboard_core::{
    field::FieldSchema,
    llm_client::{LLMClient, OpenAICompatibleClient},
    session::{SessionStore, spawn_sweeper},
};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

/// How often idle sessions are swept.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    info!("Received shutdown signal. Shutting down gracefully...");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing application state...");

    // --- 3. Load Schema, Client Page and Output Files ---
    let schema = FieldSchema::load(&config.schema_path, config.strict_schema).with_context(|| {
        format!(
            "Failed to load field schema from {}",
            config.schema_path.display()
        )
    })?;
    info!(fields = ?schema.names(), "Field schema loaded.");

    let client_page = tokio::fs::read_to_string(&config.client_page_path)
        .await
        .with_context(|| {
            format!(
                "Failed to read client page from {}",
                config.client_page_path.display()
            )
        })?;

    let sink = TranscriptSink::new(config.data_path.clone(), config.transcript_path.clone());
    sink.ensure_initialized()
        .await
        .context("Failed to prepare output files")?;

    // --- 4. Initialize Shared Services ---
    let sessions = Arc::new(SessionStore::new(config.session_ttl));
    spawn_sweeper(sessions.clone(), SWEEP_INTERVAL);

    if config.openai_api_key.is_none() {
        warn!("OPENAI_API_KEY is not set. Upstream calls will fail until it is provided.");
    }
    let openai_config = OpenAIConfig::new()
        .with_api_key(config.openai_api_key.clone().unwrap_or_default())
        .with_api_base(&config.openai_api_base);
    let llm_client: Arc<dyn LLMClient> = Arc::new(OpenAICompatibleClient::new(
        openai_config,
        config.chat_model.clone(),
        config.upstream_timeout,
    )?);

    let relay = Arc::new(RealtimeRelay::new(
        config.realtime_calls_url.clone(),
        config.openai_api_key.clone(),
        config.upstream_timeout,
        config.upstream_retry_backoff,
    )?);

    let app_state = Arc::new(AppState {
        config: Arc::new(config.clone()),
        schema: Arc::new(schema),
        sessions,
        llm_client,
        relay,
        sink: Arc::new(sink),
        client_page: Arc::new(client_page),
    });

    // --- 5. Create Router and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(app_state).layer(cors);

    // --- 6. Start Server ---
    info!(
        chat_model = %config.chat_model,
        realtime_model = %config.realtime_model,
        bind_address = %config.bind_address,
        "Service configured. Starting server..."
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server has shut down.");
    Ok(())
}
