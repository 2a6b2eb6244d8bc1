use std::convert::Infallible;
use std::time::Duration;

use axum::{
    extract::{Query, State},
    http::{header, HeaderName},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    Json,
};
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use tracing::{info, instrument, warn};

use super::frame::StreamFrame;
use crate::event::{BroadcastEvent, BusStats, SubscriptionScope};
use crate::shared::AppState;

/// Keepalive cadence; defeats intermediary idle-connection timeouts.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
pub struct StreamParams {
    pub conversation_id: Option<String>,
}

/// HTTP handler for the live event stream
///
/// GET /api/events/stream?conversation_id=<id>
/// Opens a Server-Sent Events connection scoped to one conversation, or to
/// every event when no `conversation_id` is given. The recent-event buffer
/// is replayed first, then live events as they are emitted. Disconnecting
/// drops the bus subscription and the heartbeat together.
#[instrument(name = "event_stream", skip(state))]
pub async fn event_stream(
    State(state): State<AppState>,
    Query(params): Query<StreamParams>,
) -> impl IntoResponse {
    let scope = match params.conversation_id.as_deref() {
        Some(id) => SubscriptionScope::Conversation(id.to_string()),
        None => SubscriptionScope::Global,
    };

    info!(
        conversation_id = params.conversation_id.as_deref().unwrap_or("<global>"),
        "Stream observer connected"
    );

    let established = StreamFrame::connection_established(params.conversation_id.as_deref());
    let subscription = state.event_bus.subscribe(scope);

    // The subscription is owned by the stream: when the client goes away
    // axum drops the body, which drops the subscription and deregisters it.
    let frames = stream::iter(frame_to_sse(&established))
        .chain(subscription.filter_map(|event| async move {
            frame_to_sse(&StreamFrame::from_event(&event))
        }))
        .map(Ok::<Event, Infallible>);

    let sse = Sse::new(frames).keep_alive(
        KeepAlive::new()
            .interval(HEARTBEAT_INTERVAL)
            .text("heartbeat"),
    );

    (
        [
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
            (HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        sse,
    )
}

/// Serialization failures lose the frame for this connection only;
/// delivery is best-effort, at-most-once.
fn frame_to_sse(frame: &StreamFrame) -> Option<Event> {
    match serde_json::to_string(frame) {
        Ok(json) => Some(Event::default().data(json)),
        Err(e) => {
            warn!(error = %e, kind = frame.kind.as_str(), "Failed to serialize stream frame");
            None
        }
    }
}

/// HTTP handler for bus statistics
///
/// GET /api/events/stats
#[instrument(name = "event_stats", skip(state))]
pub async fn event_stats(State(state): State<AppState>) -> Json<BusStats> {
    Json(state.event_bus.stats())
}

/// HTTP handler for inspecting the replay buffer. Diagnostic use only.
///
/// GET /api/events/buffer
#[instrument(name = "buffered_events", skip(state))]
pub async fn buffered_events(State(state): State<AppState>) -> Json<Vec<BroadcastEvent>> {
    Json(state.event_bus.buffered_events())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{BroadcastEvent, EventBus, EventKind};
    use crate::shared::test_utils::AppStateBuilder;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
        Router,
    };
    use serde_json::json;
    use tower::ServiceExt; // for `oneshot`

    fn router(state: AppState) -> Router {
        Router::new()
            .route("/api/events/stream", axum::routing::get(event_stream))
            .route("/api/events/stats", axum::routing::get(event_stats))
            .route("/api/events/buffer", axum::routing::get(buffered_events))
            .with_state(state)
    }

    async fn next_chunk(body: &mut axum::body::BodyDataStream) -> String {
        let chunk = tokio::time::timeout(Duration::from_secs(5), body.next())
            .await
            .expect("timed out waiting for stream frame")
            .expect("stream ended unexpectedly")
            .expect("stream errored");
        String::from_utf8(chunk.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_stream_advertises_sse_and_no_buffering() {
        let state = AppStateBuilder::new().build();
        let request = Request::builder()
            .uri("/api/events/stream")
            .body(Body::empty())
            .unwrap();
        let response = router(state).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers["content-type"], "text/event-stream");
        assert_eq!(headers["cache-control"], "no-cache");
        assert_eq!(headers["x-accel-buffering"], "no");
    }

    #[tokio::test]
    async fn test_stream_opens_with_connection_established_frame() {
        let state = AppStateBuilder::new().build();
        let request = Request::builder()
            .uri("/api/events/stream?conversation_id=conv-1")
            .body(Body::empty())
            .unwrap();
        let response = router(state).oneshot(request).await.unwrap();

        let mut body = response.into_body().into_data_stream();
        let first = next_chunk(&mut body).await;
        assert!(first.starts_with("data: "));
        assert!(first.contains("connection.established"));
        assert!(first.contains("\"conversation_id\":\"conv-1\""));
    }

    #[tokio::test]
    async fn test_stream_replays_buffer_then_live_events() {
        let bus = EventBus::new();
        let state = AppStateBuilder::new().with_event_bus(bus.clone()).build();
        bus.emit(BroadcastEvent::new(
            EventKind::MessageCreated,
            json!({"conversation_id": "conv-1", "content": "buffered"}),
        ));

        let request = Request::builder()
            .uri("/api/events/stream")
            .body(Body::empty())
            .unwrap();
        let response = router(state).oneshot(request).await.unwrap();
        let mut body = response.into_body().into_data_stream();

        let mut seen = next_chunk(&mut body).await;
        while !seen.contains("buffered") {
            seen.push_str(&next_chunk(&mut body).await);
        }
        let established_at = seen.find("connection.established").unwrap();
        let replayed_at = seen.find("buffered").unwrap();
        assert!(established_at < replayed_at);

        bus.emit(BroadcastEvent::new(
            EventKind::ConversationCompleted,
            json!({"conversation_id": "conv-1"}),
        ));
        let mut live = String::new();
        while !live.contains("conversation.completed") {
            live.push_str(&next_chunk(&mut body).await);
        }
    }

    #[tokio::test]
    async fn test_disconnect_releases_the_subscription() {
        let bus = EventBus::new();
        let state = AppStateBuilder::new().with_event_bus(bus.clone()).build();

        let request = Request::builder()
            .uri("/api/events/stream")
            .body(Body::empty())
            .unwrap();
        let response = router(state).oneshot(request).await.unwrap();
        assert_eq!(bus.stats().total_listeners, 1);

        drop(response);
        assert_eq!(bus.stats().total_listeners, 0);
    }

    #[tokio::test]
    async fn test_stats_endpoint_reports_bus_snapshot() {
        let bus = EventBus::new();
        let state = AppStateBuilder::new().with_event_bus(bus.clone()).build();
        bus.emit(BroadcastEvent::new(EventKind::BridgeTest, json!({})));

        let request = Request::builder()
            .uri("/api/events/stats")
            .body(Body::empty())
            .unwrap();
        let response = router(state).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let stats: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(stats["buffered_event_count"], 1);
        assert_eq!(stats["buffer_capacity"], 100);
        assert_eq!(stats["total_listeners"], 0);
    }

    #[tokio::test]
    async fn test_buffer_endpoint_lists_events_in_order() {
        let bus = EventBus::new();
        let state = AppStateBuilder::new().with_event_bus(bus.clone()).build();
        bus.emit(BroadcastEvent::new(EventKind::BridgeTest, json!({"seq": 1})));
        bus.emit(BroadcastEvent::new(EventKind::BridgeTest, json!({"seq": 2})));

        let request = Request::builder()
            .uri("/api/events/buffer")
            .body(Body::empty())
            .unwrap();
        let response = router(state).oneshot(request).await.unwrap();

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let events: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(events[0]["data"]["seq"], 1);
        assert_eq!(events[1]["data"]["seq"], 2);
    }
}
