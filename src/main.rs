use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use convobridge::conversation::repository::{
    ConversationRepository, InMemoryConversationRepository, PostgresConversationRepository,
};
use convobridge::event::EventBus;
use convobridge::shared::AppState;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "convobridge=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting conversation event bridge server");

    let webhook_secret = std::env::var("WEBHOOK_SECRET").ok();
    if webhook_secret.is_none() {
        warn!("WEBHOOK_SECRET not set, webhook ingest will reject every call");
    }

    // In-memory persistence by default; Postgres when DATABASE_URL is set.
    let conversation_repository: Arc<dyn ConversationRepository + Send + Sync> =
        match std::env::var("DATABASE_URL") {
            Ok(database_url) => {
                let pool = sqlx::PgPool::connect(&database_url)
                    .await
                    .expect("Failed to connect to database");
                info!("Using PostgreSQL conversation repository");
                Arc::new(PostgresConversationRepository::new(pool))
            }
            Err(_) => {
                info!("Using in-memory conversation repository");
                Arc::new(InMemoryConversationRepository::new())
            }
        };

    // One bus for the life of the process, injected everywhere it is needed.
    let event_bus = EventBus::new();
    let app_state = AppState::new(conversation_repository, event_bus, webhook_secret);

    let app = convobridge::router(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    let listener = tokio::net::TcpListener::bind(&bind_addr).await.unwrap();
    info!("Server running on http://{}", bind_addr);
    axum::serve(listener, app).await.unwrap();
}
