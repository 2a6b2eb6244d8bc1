use axum::{
    extract::{Path, State},
    Json,
};
use tracing::{info, instrument};

use super::models::ConversationModel;
use crate::shared::{AppError, AppState};

/// HTTP handler for fetching a recorded conversation aggregate
///
/// GET /api/conversations/:id
/// Returns the conversation with its participants and running totals
#[instrument(name = "get_conversation", skip(state))]
pub async fn get_conversation(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> Result<Json<ConversationModel>, AppError> {
    let conversation = state
        .conversation_repository
        .get_conversation(&conversation_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Conversation {} not found", conversation_id)))?;

    info!(
        conversation_id = %conversation.id,
        status = conversation.status.as_str(),
        "Conversation fetched"
    );

    Ok(Json(conversation))
}
