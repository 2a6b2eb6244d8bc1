use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::conversation::models::ParticipantModel;
use crate::event::EventKind;
use crate::shared::AppError;

/// One structural problem found while validating a webhook body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldIssue {
    pub field: String,
    pub message: String,
}

impl FieldIssue {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }

    fn missing(field: &str) -> Self {
        Self::new(field, "is required")
    }
}

/// The outer shape every webhook call shares.
#[derive(Debug, Deserialize)]
pub struct WebhookEnvelope {
    #[serde(rename = "type")]
    pub event_type: String,
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConversationStartedData {
    pub conversation_id: String,
    pub title: Option<String>,
    pub participants: Vec<ParticipantModel>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MessageCreatedData {
    pub conversation_id: String,
    pub message_id: String,
    pub sender: String,
    pub content: String,
    pub tokens_used: i64,
    pub cost: f64,
    pub duration_ms: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConversationCompletedData {
    pub conversation_id: String,
    pub status: Option<String>,
    pub message_count: Option<i64>,
    pub total_tokens: Option<i64>,
    pub total_cost: Option<f64>,
    pub duration_ms: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConversationErrorData {
    pub conversation_id: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BridgeData {
    pub message: Option<String>,
}

/// A webhook body that passed structural validation, one variant per
/// recognized event kind. Unknown tags are rejected structurally before a
/// variant is ever constructed.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidatedEvent {
    ConversationStarted(ConversationStartedData),
    MessageCreated(MessageCreatedData),
    ConversationCompleted(ConversationCompletedData),
    ConversationError(ConversationErrorData),
    BridgeTest(BridgeData),
    BridgeConnected(BridgeData),
}

impl ValidatedEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ValidatedEvent::ConversationStarted(_) => EventKind::ConversationStarted,
            ValidatedEvent::MessageCreated(_) => EventKind::MessageCreated,
            ValidatedEvent::ConversationCompleted(_) => EventKind::ConversationCompleted,
            ValidatedEvent::ConversationError(_) => EventKind::ConversationError,
            ValidatedEvent::BridgeTest(_) => EventKind::BridgeTest,
            ValidatedEvent::BridgeConnected(_) => EventKind::BridgeConnected,
        }
    }
}

/// Validates a webhook body against its declared event type.
///
/// Returns every field problem found, not just the first, so producers can
/// fix a malformed payload in one round trip. No side effects occur on
/// failure.
pub fn validate(event_type: &str, data: &Value) -> Result<ValidatedEvent, AppError> {
    let kind = EventKind::from_webhook_type(event_type).ok_or_else(|| {
        AppError::Validation(vec![FieldIssue::new(
            "type",
            format!("Unknown event type '{}'", event_type),
        )])
    })?;

    let mut issues = Vec::new();
    let Some(map) = data.as_object() else {
        return Err(AppError::Validation(vec![FieldIssue::new(
            "data",
            "must be an object",
        )]));
    };

    let validated = match kind {
        EventKind::ConversationStarted => {
            validate_conversation_started(map, &mut issues).map(ValidatedEvent::ConversationStarted)
        }
        EventKind::MessageCreated => {
            validate_message_created(map, &mut issues).map(ValidatedEvent::MessageCreated)
        }
        EventKind::ConversationCompleted => {
            validate_conversation_completed(map, &mut issues)
                .map(ValidatedEvent::ConversationCompleted)
        }
        EventKind::ConversationError => {
            validate_conversation_error(map, &mut issues).map(ValidatedEvent::ConversationError)
        }
        EventKind::BridgeTest => validate_bridge(map, &mut issues).map(ValidatedEvent::BridgeTest),
        EventKind::BridgeConnected => {
            validate_bridge(map, &mut issues).map(ValidatedEvent::BridgeConnected)
        }
        // from_webhook_type never returns this kind.
        EventKind::ConnectionEstablished => None,
    };

    match validated {
        Some(event) if issues.is_empty() => Ok(event),
        _ => Err(AppError::Validation(issues)),
    }
}

fn validate_conversation_started(
    map: &Map<String, Value>,
    issues: &mut Vec<FieldIssue>,
) -> Option<ConversationStartedData> {
    let conversation_id = require_string(map, "conversation_id", issues);
    let title = optional_string(map, "title", issues);
    let participants = parse_participants(map, issues);

    Some(ConversationStartedData {
        conversation_id: conversation_id?,
        title,
        participants: participants?,
    })
}

fn validate_message_created(
    map: &Map<String, Value>,
    issues: &mut Vec<FieldIssue>,
) -> Option<MessageCreatedData> {
    let conversation_id = require_string(map, "conversation_id", issues);
    let message_id = require_string(map, "message_id", issues);
    let sender = require_string(map, "sender", issues);
    let content = require_string(map, "content", issues);
    let tokens_used = optional_int(map, "tokens_used", issues);
    let cost = optional_float(map, "cost", issues);
    let duration_ms = optional_int(map, "duration_ms", issues);

    Some(MessageCreatedData {
        conversation_id: conversation_id?,
        message_id: message_id?,
        sender: sender?,
        content: content?,
        tokens_used: tokens_used.unwrap_or(0),
        cost: cost.unwrap_or(0.0),
        duration_ms: duration_ms.unwrap_or(0),
    })
}

fn validate_conversation_completed(
    map: &Map<String, Value>,
    issues: &mut Vec<FieldIssue>,
) -> Option<ConversationCompletedData> {
    let conversation_id = require_string(map, "conversation_id", issues);
    let status = optional_string(map, "status", issues);
    let message_count = optional_int(map, "message_count", issues);
    let total_tokens = optional_int(map, "total_tokens", issues);
    let total_cost = optional_float(map, "total_cost", issues);
    let duration_ms = optional_int(map, "duration_ms", issues);

    Some(ConversationCompletedData {
        conversation_id: conversation_id?,
        status,
        message_count,
        total_tokens,
        total_cost,
        duration_ms,
    })
}

fn validate_conversation_error(
    map: &Map<String, Value>,
    issues: &mut Vec<FieldIssue>,
) -> Option<ConversationErrorData> {
    let conversation_id = require_string(map, "conversation_id", issues);
    let error = require_string(map, "error", issues);

    Some(ConversationErrorData {
        conversation_id: conversation_id?,
        error: error?,
    })
}

fn validate_bridge(map: &Map<String, Value>, issues: &mut Vec<FieldIssue>) -> Option<BridgeData> {
    let message = optional_string(map, "message", issues);
    Some(BridgeData { message })
}

/// The participant list accepts two historical field names, `participants`
/// and `agents`; at least one must be present and non-empty. Entries are
/// either bare names or objects with a `name` and optional `role`.
fn parse_participants(
    map: &Map<String, Value>,
    issues: &mut Vec<FieldIssue>,
) -> Option<Vec<ParticipantModel>> {
    let (field, value) = match (map.get("participants"), map.get("agents")) {
        (Some(value), _) => ("participants", value),
        (None, Some(value)) => ("agents", value),
        (None, None) => {
            issues.push(FieldIssue::new(
                "participants",
                "either participants or agents is required",
            ));
            return None;
        }
    };

    let Some(entries) = value.as_array() else {
        issues.push(FieldIssue::new(field, "must be an array"));
        return None;
    };
    if entries.is_empty() {
        issues.push(FieldIssue::new(field, "must not be empty"));
        return None;
    }

    let mut participants = Vec::with_capacity(entries.len());
    for (i, entry) in entries.iter().enumerate() {
        match entry {
            Value::String(name) => participants.push(ParticipantModel {
                name: name.clone(),
                role: None,
            }),
            Value::Object(obj) => match obj.get("name").and_then(Value::as_str) {
                Some(name) => participants.push(ParticipantModel {
                    name: name.to_string(),
                    role: obj
                        .get("role")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                }),
                None => issues.push(FieldIssue::new(
                    format!("{}[{}]", field, i),
                    "must have a name",
                )),
            },
            _ => issues.push(FieldIssue::new(
                format!("{}[{}]", field, i),
                "must be a name or an object",
            )),
        }
    }

    if participants.is_empty() {
        return None;
    }
    Some(participants)
}

fn require_string(
    map: &Map<String, Value>,
    field: &str,
    issues: &mut Vec<FieldIssue>,
) -> Option<String> {
    match map.get(field) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::String(_)) => {
            issues.push(FieldIssue::new(field, "must not be empty"));
            None
        }
        Some(_) => {
            issues.push(FieldIssue::new(field, "must be a string"));
            None
        }
        None => {
            issues.push(FieldIssue::missing(field));
            None
        }
    }
}

fn optional_string(
    map: &Map<String, Value>,
    field: &str,
    issues: &mut Vec<FieldIssue>,
) -> Option<String> {
    match map.get(field) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(_) => {
            issues.push(FieldIssue::new(field, "must be a string"));
            None
        }
    }
}

fn optional_int(
    map: &Map<String, Value>,
    field: &str,
    issues: &mut Vec<FieldIssue>,
) -> Option<i64> {
    match map.get(field) {
        None | Some(Value::Null) => None,
        Some(value) => match value.as_i64() {
            Some(n) => Some(n),
            None => {
                issues.push(FieldIssue::new(field, "must be an integer"));
                None
            }
        },
    }
}

fn optional_float(
    map: &Map<String, Value>,
    field: &str,
    issues: &mut Vec<FieldIssue>,
) -> Option<f64> {
    match map.get(field) {
        None | Some(Value::Null) => None,
        Some(value) => match value.as_f64() {
            Some(n) => Some(n),
            None => {
                issues.push(FieldIssue::new(field, "must be a number"));
                None
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn issue_fields(err: AppError) -> Vec<String> {
        match err {
            AppError::Validation(issues) => issues.into_iter().map(|i| i.field).collect(),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_type_is_rejected_structurally() {
        let err = validate("conversation.renamed", &json!({})).unwrap_err();
        assert_eq!(issue_fields(err), vec!["type"]);
    }

    #[test]
    fn test_data_must_be_an_object() {
        let err = validate("bridge.test", &json!("not an object")).unwrap_err();
        assert_eq!(issue_fields(err), vec!["data"]);
    }

    #[test]
    fn test_conversation_started_accepts_participants() {
        let event = validate(
            "conversation.started",
            &json!({
                "conversation_id": "conv-1",
                "title": "planning",
                "participants": ["researcher", {"name": "reviewer", "role": "critic"}],
            }),
        )
        .unwrap();

        let ValidatedEvent::ConversationStarted(data) = event else {
            panic!("wrong variant");
        };
        assert_eq!(data.conversation_id, "conv-1");
        assert_eq!(data.participants.len(), 2);
        assert_eq!(data.participants[1].role.as_deref(), Some("critic"));
    }

    #[test]
    fn test_conversation_started_accepts_legacy_agents_field() {
        let event = validate(
            "conversation.started",
            &json!({"conversation_id": "conv-1", "agents": ["planner"]}),
        )
        .unwrap();

        let ValidatedEvent::ConversationStarted(data) = event else {
            panic!("wrong variant");
        };
        assert_eq!(data.participants[0].name, "planner");
    }

    #[test]
    fn test_conversation_started_requires_some_participant_list() {
        let err = validate(
            "conversation.started",
            &json!({"conversation_id": "conv-1"}),
        )
        .unwrap_err();
        assert_eq!(issue_fields(err), vec!["participants"]);

        let err = validate(
            "conversation.started",
            &json!({"conversation_id": "conv-1", "participants": []}),
        )
        .unwrap_err();
        assert_eq!(issue_fields(err), vec!["participants"]);
    }

    #[rstest]
    #[case("conversation_id")]
    #[case("message_id")]
    #[case("sender")]
    #[case("content")]
    fn test_message_created_reports_each_missing_field(#[case] missing: &str) {
        let mut data = json!({
            "conversation_id": "conv-1",
            "message_id": "msg-1",
            "sender": "researcher",
            "content": "hello",
        });
        data.as_object_mut().unwrap().remove(missing);

        let err = validate("message.created", &data).unwrap_err();
        assert_eq!(issue_fields(err), vec![missing.to_string()]);
    }

    #[test]
    fn test_message_created_collects_all_problems_at_once() {
        let err = validate(
            "message.created",
            &json!({"conversation_id": "conv-1", "tokens_used": "fifty"}),
        )
        .unwrap_err();

        let fields = issue_fields(err);
        assert!(fields.contains(&"message_id".to_string()));
        assert!(fields.contains(&"sender".to_string()));
        assert!(fields.contains(&"content".to_string()));
        assert!(fields.contains(&"tokens_used".to_string()));
    }

    #[test]
    fn test_message_created_defaults_optional_increments_to_zero() {
        let event = validate(
            "message.created",
            &json!({
                "conversation_id": "conv-1",
                "message_id": "msg-1",
                "sender": "researcher",
                "content": "hello",
            }),
        )
        .unwrap();

        let ValidatedEvent::MessageCreated(data) = event else {
            panic!("wrong variant");
        };
        assert_eq!(data.tokens_used, 0);
        assert_eq!(data.cost, 0.0);
        assert_eq!(data.duration_ms, 0);
    }

    #[test]
    fn test_conversation_completed_minimal_body() {
        let event = validate(
            "conversation.completed",
            &json!({"conversation_id": "conv-1"}),
        )
        .unwrap();

        let ValidatedEvent::ConversationCompleted(data) = event else {
            panic!("wrong variant");
        };
        assert_eq!(data.status, None);
        assert_eq!(data.total_tokens, None);
    }

    #[test]
    fn test_conversation_error_requires_error_text() {
        let err = validate(
            "conversation.error",
            &json!({"conversation_id": "conv-1"}),
        )
        .unwrap_err();
        assert_eq!(issue_fields(err), vec!["error"]);
    }

    #[rstest]
    #[case("bridge.test")]
    #[case("bridge.connected")]
    fn test_bridge_kinds_accept_empty_data(#[case] event_type: &str) {
        let event = validate(event_type, &json!({})).unwrap();
        match event {
            ValidatedEvent::BridgeTest(data) | ValidatedEvent::BridgeConnected(data) => {
                assert_eq!(data.message, None);
            }
            other => panic!("wrong variant: {:?}", other),
        }
    }
}
