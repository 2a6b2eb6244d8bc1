use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};

use crate::event::{BroadcastEvent, EventKind};

/// One server-to-client frame on the event stream wire.
///
/// Every frame carries the same three fields regardless of kind, so
/// observers can dispatch on `type` without special cases.
#[derive(Debug, Clone, Serialize)]
pub struct StreamFrame {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    pub data: Value,
}

impl StreamFrame {
    /// The synthesized first frame of every connection, acknowledging the
    /// requested scope before any bus event is delivered.
    pub fn connection_established(conversation_id: Option<&str>) -> Self {
        Self {
            kind: EventKind::ConnectionEstablished,
            timestamp: Utc::now(),
            data: json!({
                "conversation_id": conversation_id,
                "message": "Connected to event stream",
            }),
        }
    }

    pub fn from_event(event: &BroadcastEvent) -> Self {
        Self {
            kind: event.kind,
            timestamp: event.timestamp,
            data: event.data.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_established_frame_carries_scope() {
        let frame = StreamFrame::connection_established(Some("conv-1"));
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["type"], "connection.established");
        assert_eq!(value["data"]["conversation_id"], "conv-1");
        assert!(value["data"]["message"].is_string());
    }

    #[test]
    fn test_global_connection_frame_has_null_scope() {
        let frame = StreamFrame::connection_established(None);
        let value = serde_json::to_value(&frame).unwrap();
        assert!(value["data"]["conversation_id"].is_null());
    }

    #[test]
    fn test_event_frame_preserves_payload_and_timestamp() {
        let event = BroadcastEvent::new(
            EventKind::MessageCreated,
            json!({"conversation_id": "conv-1", "content": "hi"}),
        );
        let frame = StreamFrame::from_event(&event);
        assert_eq!(frame.kind, EventKind::MessageCreated);
        assert_eq!(frame.timestamp, event.timestamp);
        assert_eq!(frame.data, event.data);
    }
}
