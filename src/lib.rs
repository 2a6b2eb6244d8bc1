// Library crate for the conversation event bridge server
// This file exposes the public API for integration tests

use axum::{
    routing::{get, post},
    Router,
};

pub mod conversation;
pub mod event;
pub mod ingest;
pub mod shared;
pub mod stream;

// Re-export commonly used types for easier access in tests
pub use conversation::{ConversationModel, ConversationRepository, ConversationStatus};
pub use event::{BroadcastEvent, BusStats, EventBus, EventKind, Subscription, SubscriptionScope};
pub use shared::{AppError, AppState};
pub use stream::StreamFrame;

/// Builds the application router over the given state.
///
/// Used by both the binary and the integration tests so they exercise the
/// same route table.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(|| async { "convobridge" }))
        .route("/api/webhooks/events", post(ingest::ingest_event))
        .route("/api/events/stream", get(stream::event_stream))
        .route("/api/events/stats", get(stream::event_stats))
        .route("/api/events/buffer", get(stream::buffered_events))
        .route(
            "/api/conversations/:id",
            get(conversation::handlers::get_conversation),
        )
        .with_state(state)
}
