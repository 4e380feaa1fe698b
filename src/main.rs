mod auth;
mod conversation;
mod db;
mod error;
mod middleware;
mod routes;
mod state;
mod websocket;

use anyhow::Context;
use conversation::{
    start_rate_limit_sweeper, ConversationService, ConversationStore, InMemoryConversationStore,
    ParticipantEligibility, PgConversationStore, SendRateLimiter, TracingAuditSink,
};
use db::{create_pool, run_migrations};
use routes::create_router;
use state::{AppState, Config};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use websocket::ChatHub;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,recruit_messaging=debug,audit=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Arc::new(Config::from_env()?);
    error::expose_internal_details(config.is_development());

    let store: Arc<dyn ConversationStore> = match &config.database_url {
        Some(database_url) => {
            tracing::info!("Connecting to database...");
            let db = create_pool(database_url, config.database_max_connections)
                .await
                .context("failed to connect to the database")?;

            tracing::info!("Running migrations...");
            run_migrations(&db)
                .await
                .context("failed to run database migrations")?;

            Arc::new(PgConversationStore::new(db))
        }
        None => {
            tracing::warn!("DATABASE_URL not set; conversations are kept in memory and lost on restart");
            Arc::new(InMemoryConversationStore::new())
        }
    };

    // Create services
    let limiter = SendRateLimiter::new(config.message_rate_limit, config.message_rate_window);
    let conversation_service = ConversationService::new(
        store,
        Arc::new(ParticipantEligibility::new(limiter.clone())),
        Arc::new(TracingAuditSink),
    );
    let hub = ChatHub::new(conversation_service.clone());

    // Create application state
    let state = AppState {
        config: config.clone(),
        conversation_service,
        hub,
    };

    // Start rate limit sweeper
    tokio::spawn(async move {
        if let Err(e) = start_rate_limit_sweeper(limiter).await {
            tracing::error!("Rate limit sweeper error: {:?}", e);
        }
    });

    // Create router
    let app = create_router(state);

    // Start server
    let addr = config.bind_address();

    tracing::info!("Server starting on http://{}", addr);
    tracing::info!("Swagger UI available at http://{}/swagger-ui", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
