use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a conversation aggregate.
///
/// `Completed` and `Failed` are the closed terminal statuses a
/// `conversation.completed` event can map to; `Errored` is set by
/// `conversation.error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    Active,
    Completed,
    Failed,
    Errored,
}

impl ConversationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationStatus::Active => "active",
            ConversationStatus::Completed => "completed",
            ConversationStatus::Failed => "failed",
            ConversationStatus::Errored => "errored",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "active" => Some(ConversationStatus::Active),
            "completed" => Some(ConversationStatus::Completed),
            "failed" => Some(ConversationStatus::Failed),
            "errored" => Some(ConversationStatus::Errored),
            _ => None,
        }
    }

    /// Maps an inbound `conversation.completed` status value to a closed
    /// terminal status. Absent, `completed` and `success` all close the
    /// conversation cleanly; anything else closes it as failed.
    pub fn terminal_from_inbound(value: Option<&str>) -> Self {
        match value {
            None | Some("completed") | Some("success") => ConversationStatus::Completed,
            Some(_) => ConversationStatus::Failed,
        }
    }
}

/// A participant of a conversation, as recorded at start time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantModel {
    pub name: String,
    pub role: Option<String>,
}

/// The conversation aggregate with its running totals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationModel {
    pub id: String,
    pub title: Option<String>,
    pub status: ConversationStatus,
    pub participants: Vec<ParticipantModel>,
    pub message_count: i64,
    pub total_tokens: i64,
    pub total_cost: f64,
    pub total_duration_ms: i64,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

/// A single message recorded under a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageModel {
    pub id: String,
    pub conversation_id: String,
    pub sender: String,
    pub content: String,
    pub tokens_used: i64,
    pub cost: f64,
    pub duration_ms: i64,
    pub created_at: DateTime<Utc>,
}

/// An append-only error-log record written for `conversation.error` events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorLogModel {
    pub id: String,
    pub conversation_id: String,
    pub error: String,
    pub created_at: DateTime<Utc>,
}

/// Input for creating a conversation aggregate.
#[derive(Debug, Clone)]
pub struct NewConversation {
    pub id: String,
    pub title: Option<String>,
    pub participants: Vec<ParticipantModel>,
    pub started_at: DateTime<Utc>,
}

/// Input for creating a message record.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub id: String,
    pub conversation_id: String,
    pub sender: String,
    pub content: String,
    pub tokens_used: i64,
    pub cost: f64,
    pub duration_ms: i64,
    pub created_at: DateTime<Utc>,
}

/// Deltas applied atomically to a conversation's running totals.
#[derive(Debug, Clone, Default)]
pub struct TotalsDelta {
    pub messages: i64,
    pub tokens: i64,
    pub cost: f64,
    pub duration_ms: i64,
}

/// Final state written when a conversation completes.
#[derive(Debug, Clone)]
pub struct CompletionUpdate {
    pub status: ConversationStatus,
    pub completed_at: DateTime<Utc>,
    /// Final totals overwrite the running totals only when supplied.
    pub message_count: Option<i64>,
    pub total_tokens: Option<i64>,
    pub total_cost: Option<f64>,
    pub total_duration_ms: Option<i64>,
}

/// Input for an append-only error-log write.
#[derive(Debug, Clone)]
pub struct NewErrorLog {
    pub conversation_id: String,
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_status_mapping() {
        assert_eq!(
            ConversationStatus::terminal_from_inbound(None),
            ConversationStatus::Completed
        );
        assert_eq!(
            ConversationStatus::terminal_from_inbound(Some("completed")),
            ConversationStatus::Completed
        );
        assert_eq!(
            ConversationStatus::terminal_from_inbound(Some("success")),
            ConversationStatus::Completed
        );
        assert_eq!(
            ConversationStatus::terminal_from_inbound(Some("timeout")),
            ConversationStatus::Failed
        );
    }

    #[test]
    fn test_status_string_round_trip() {
        for status in [
            ConversationStatus::Active,
            ConversationStatus::Completed,
            ConversationStatus::Failed,
            ConversationStatus::Errored,
        ] {
            assert_eq!(ConversationStatus::from_str(status.as_str()), Some(status));
        }
    }
}
