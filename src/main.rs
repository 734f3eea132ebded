//! threadchat - a minimal multi-conversation chat app
//!
//! Conversations are stored in SQLite, replies come from an
//! OpenAI-compatible chat model, and a small web UI renders them.

mod api;
mod config;
mod db;
mod generator;
mod llm;
mod runtime;
mod shutdown;
mod state_machine;

use api::{create_router, AppState};
use config::AppConfig;
use db::Database;
use generator::Generator;
use llm::{LlmService, LoggingService, OpenAiService};
use runtime::RuntimeManager;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{compression::CompressionLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How often idle, unwatched conversation runtimes are released
const IDLE_SWEEP_PERIOD: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "threadchat=info,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    let config = AppConfig::from_env()?;

    // Ensure database directory exists
    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    tracing::info!(path = %config.db_path.display(), "Opening database");
    let db = Database::open(&config.db_path)?;

    if !config.llm.has_api_key() {
        tracing::warn!(
            "No LLM API key configured. Set GROQ_API_KEY, LLM_API_KEY or OPENAI_API_KEY."
        );
    }
    let service: Arc<dyn LlmService> = Arc::new(OpenAiService::new(&config.llm)?);
    let llm: Arc<dyn LlmService> = Arc::new(LoggingService::new(service));
    tracing::info!(
        model = %llm.model_id(),
        base_url = %config.llm.base_url,
        "LLM client initialized"
    );

    let generator = Arc::new(Generator::new(
        llm,
        config.llm.system_prompt.clone(),
        config.llm.max_tokens,
    ));
    let runtime = Arc::new(RuntimeManager::new(db, generator));
    runtime.spawn_idle_sweeper(IDLE_SWEEP_PERIOD);
    let state = AppState::new(runtime);

    let compression = CompressionLayer::new()
        .gzip(true)
        .br(true)
        .deflate(true)
        .zstd(true);

    let app = create_router(state)
        .layer(compression)
        .layer(TraceLayer::new_for_http());

    tracing::info!(addr = %config.listen_addr, "threadchat server listening");
    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown::shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}
