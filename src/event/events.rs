use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The closed set of event kinds that flow through the bus.
///
/// All kinds except `ConnectionEstablished` originate from the webhook
/// ingest endpoint; `ConnectionEstablished` is synthesized by the streaming
/// transport when an observer connects and is never accepted from producers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "conversation.started")]
    ConversationStarted,
    #[serde(rename = "message.created")]
    MessageCreated,
    #[serde(rename = "conversation.completed")]
    ConversationCompleted,
    #[serde(rename = "conversation.error")]
    ConversationError,
    #[serde(rename = "bridge.test")]
    BridgeTest,
    #[serde(rename = "bridge.connected")]
    BridgeConnected,
    #[serde(rename = "connection.established")]
    ConnectionEstablished,
}

impl EventKind {
    /// The wire name of this kind, as it appears in webhook bodies and
    /// stream frames.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::ConversationStarted => "conversation.started",
            EventKind::MessageCreated => "message.created",
            EventKind::ConversationCompleted => "conversation.completed",
            EventKind::ConversationError => "conversation.error",
            EventKind::BridgeTest => "bridge.test",
            EventKind::BridgeConnected => "bridge.connected",
            EventKind::ConnectionEstablished => "connection.established",
        }
    }

    /// Parses a webhook `type` value. Returns `None` for unknown types and
    /// for `connection.established`, which producers may not send.
    pub fn from_webhook_type(value: &str) -> Option<Self> {
        match value {
            "conversation.started" => Some(EventKind::ConversationStarted),
            "message.created" => Some(EventKind::MessageCreated),
            "conversation.completed" => Some(EventKind::ConversationCompleted),
            "conversation.error" => Some(EventKind::ConversationError),
            "bridge.test" => Some(EventKind::BridgeTest),
            "bridge.connected" => Some(EventKind::BridgeConnected),
            _ => None,
        }
    }
}

/// A single event carried through the bus.
///
/// Events represent facts about things that have already happened. They are
/// constructed once by the ingest pipeline (or internal diagnostic callers)
/// and never mutated after emission; subscribers receive clones.
#[derive(Debug, Clone, Serialize)]
pub struct BroadcastEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    pub data: Value,
}

impl BroadcastEvent {
    /// Creates an event stamped with the current time.
    pub fn new(kind: EventKind, data: Value) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
            data,
        }
    }

    /// Creates an event with an explicit timestamp (e.g. the producer's).
    pub fn with_timestamp(kind: EventKind, timestamp: DateTime<Utc>, data: Value) -> Self {
        Self {
            kind,
            timestamp,
            data,
        }
    }

    /// The conversation this event belongs to, if its payload names one.
    ///
    /// The bus knows nothing about conversation lifecycle; this field is
    /// used only to filter conversation-scoped subscriptions.
    pub fn conversation_id(&self) -> Option<&str> {
        self.data.get("conversation_id").and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kind_round_trips_through_wire_name() {
        for kind in [
            EventKind::ConversationStarted,
            EventKind::MessageCreated,
            EventKind::ConversationCompleted,
            EventKind::ConversationError,
            EventKind::BridgeTest,
            EventKind::BridgeConnected,
        ] {
            assert_eq!(EventKind::from_webhook_type(kind.as_str()), Some(kind));
        }
    }

    #[test]
    fn test_connection_established_rejected_from_producers() {
        assert_eq!(EventKind::from_webhook_type("connection.established"), None);
        assert_eq!(EventKind::from_webhook_type("unknown.kind"), None);
    }

    #[test]
    fn test_conversation_id_reads_payload_field() {
        let event = BroadcastEvent::new(
            EventKind::MessageCreated,
            json!({"conversation_id": "conv-1", "content": "hi"}),
        );
        assert_eq!(event.conversation_id(), Some("conv-1"));

        let scopeless = BroadcastEvent::new(EventKind::BridgeTest, json!({"message": "ping"}));
        assert_eq!(scopeless.conversation_id(), None);
    }

    #[test]
    fn test_event_serializes_with_wire_field_names() {
        let event = BroadcastEvent::new(EventKind::BridgeTest, json!({"message": "ping"}));
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "bridge.test");
        assert_eq!(value["data"]["message"], "ping");
        assert!(value["timestamp"].is_string());
    }
}
