use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;

use crate::conversation::repository::ConversationRepository;
use crate::event::EventBus;
use crate::ingest::schema::FieldIssue;

/// Shared application state containing all dependencies
#[derive(Clone)]
pub struct AppState {
    pub conversation_repository: Arc<dyn ConversationRepository + Send + Sync>,
    pub event_bus: EventBus,
    /// Shared secret that inbound webhook calls must present as a bearer
    /// token. `None` means ingest is disabled: every call is rejected.
    pub webhook_secret: Option<String>,
}

impl AppState {
    pub fn new(
        conversation_repository: Arc<dyn ConversationRepository + Send + Sync>,
        event_bus: EventBus,
        webhook_secret: Option<String>,
    ) -> Self {
        Self {
            conversation_repository,
            event_bus,
            webhook_secret,
        }
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Validation failed")]
    Validation(Vec<FieldIssue>),

    #[error("Persistence conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Internal server error")]
    Internal,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Unauthorized(msg) => {
                (StatusCode::UNAUTHORIZED, Json(json!({ "error": msg }))).into_response()
            }
            AppError::Validation(issues) => (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "error": "Invalid event payload",
                    "details": issues,
                })),
            )
                .into_response(),
            AppError::Conflict(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "error": "Persistence failure",
                    "details": msg,
                })),
            )
                .into_response(),
            AppError::NotFound(msg) => {
                (StatusCode::NOT_FOUND, Json(json!({ "error": msg }))).into_response()
            }
            AppError::DatabaseError(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "error": "Database error",
                    "details": msg,
                })),
            )
                .into_response(),
            AppError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Internal server error" })),
            )
                .into_response(),
        }
    }
}
