use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tracing::{info, instrument};

use super::auth;
use super::schema::{self, BridgeData, FieldIssue, ValidatedEvent, WebhookEnvelope};
use crate::conversation::models::{
    CompletionUpdate, ConversationStatus, NewConversation, NewErrorLog, NewMessage, TotalsDelta,
};
use crate::event::{BroadcastEvent, EventKind};
use crate::shared::{AppError, AppState};

/// HTTP handler for the webhook ingest endpoint
///
/// POST /api/webhooks/events
/// Authenticates the caller, validates the body against its declared event
/// type, records the state transition, and publishes exactly one broadcast
/// event. The broadcast only ever reflects confirmed, persisted state: any
/// persistence failure aborts before the bus sees anything.
#[instrument(name = "ingest_event", skip(state, headers, body))]
pub async fn ingest_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    auth::authorize(&headers, state.webhook_secret.as_deref())?;

    let envelope: WebhookEnvelope = serde_json::from_slice(&body)
        .map_err(|e| AppError::Validation(vec![FieldIssue::new("body", e.to_string())]))?;
    let validated = schema::validate(&envelope.event_type, &envelope.data)?;
    let timestamp = envelope.timestamp.unwrap_or_else(Utc::now);

    info!(
        event_type = validated.kind().as_str(),
        "Webhook event accepted for dispatch"
    );

    match validated {
        ValidatedEvent::ConversationStarted(data) => {
            state
                .conversation_repository
                .create_conversation(&NewConversation {
                    id: data.conversation_id.clone(),
                    title: data.title,
                    participants: data.participants,
                    started_at: timestamp,
                })
                .await?;

            publish(&state, EventKind::ConversationStarted, timestamp, envelope.data);
            info!(conversation_id = %data.conversation_id, "Conversation started");
            Ok((
                StatusCode::CREATED,
                Json(json!({ "conversation_id": data.conversation_id })),
            )
                .into_response())
        }

        ValidatedEvent::MessageCreated(data) => {
            state
                .conversation_repository
                .create_message(&NewMessage {
                    id: data.message_id.clone(),
                    conversation_id: data.conversation_id.clone(),
                    sender: data.sender,
                    content: data.content,
                    tokens_used: data.tokens_used,
                    cost: data.cost,
                    duration_ms: data.duration_ms,
                    created_at: timestamp,
                })
                .await?;
            state
                .conversation_repository
                .increment_totals(
                    &data.conversation_id,
                    &TotalsDelta {
                        messages: 1,
                        tokens: data.tokens_used,
                        cost: data.cost,
                        duration_ms: data.duration_ms,
                    },
                )
                .await?;

            publish(&state, EventKind::MessageCreated, timestamp, envelope.data);
            info!(
                conversation_id = %data.conversation_id,
                message_id = %data.message_id,
                "Message recorded"
            );
            Ok((
                StatusCode::CREATED,
                Json(json!({ "message_id": data.message_id })),
            )
                .into_response())
        }

        ValidatedEvent::ConversationCompleted(data) => {
            state
                .conversation_repository
                .complete_conversation(
                    &data.conversation_id,
                    &CompletionUpdate {
                        status: ConversationStatus::terminal_from_inbound(data.status.as_deref()),
                        completed_at: timestamp,
                        message_count: data.message_count,
                        total_tokens: data.total_tokens,
                        total_cost: data.total_cost,
                        total_duration_ms: data.duration_ms,
                    },
                )
                .await?;

            publish(
                &state,
                EventKind::ConversationCompleted,
                timestamp,
                envelope.data,
            );
            info!(conversation_id = %data.conversation_id, "Conversation completed");
            Ok((StatusCode::OK, Json(json!({ "success": true }))).into_response())
        }

        ValidatedEvent::ConversationError(data) => {
            state
                .conversation_repository
                .append_error_log(&NewErrorLog {
                    conversation_id: data.conversation_id.clone(),
                    error: data.error.clone(),
                })
                .await?;
            state
                .conversation_repository
                .mark_errored(&data.conversation_id, &data.error)
                .await?;

            publish(&state, EventKind::ConversationError, timestamp, envelope.data);
            info!(conversation_id = %data.conversation_id, "Conversation errored");
            Ok((StatusCode::OK, Json(json!({ "success": true }))).into_response())
        }

        ValidatedEvent::BridgeTest(data) => Ok(bridge_response(
            &state,
            EventKind::BridgeTest,
            timestamp,
            envelope.data,
            data,
            "Bridge test received",
        )),

        ValidatedEvent::BridgeConnected(data) => Ok(bridge_response(
            &state,
            EventKind::BridgeConnected,
            timestamp,
            envelope.data,
            data,
            "Bridge connected",
        )),
    }
}

fn publish(state: &AppState, kind: EventKind, timestamp: DateTime<Utc>, data: Value) {
    state
        .event_bus
        .emit(BroadcastEvent::with_timestamp(kind, timestamp, data));
}

/// Bridge kinds carry no durable state change; the broadcast payload is
/// normalized so observers always see a message text.
fn bridge_response(
    state: &AppState,
    kind: EventKind,
    timestamp: DateTime<Utc>,
    mut data: Value,
    parsed: BridgeData,
    default_message: &str,
) -> Response {
    if parsed.message.is_none() {
        if let Some(map) = data.as_object_mut() {
            map.insert("message".to_string(), json!(default_message));
        }
    }

    publish(state, kind, timestamp, data);
    info!(event_type = kind.as_str(), "Bridge event published");
    (StatusCode::OK, Json(json!({ "success": true }))).into_response()
}
