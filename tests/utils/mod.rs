use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, Response, StatusCode},
    Router,
};
use serde_json::Value;
use tower::ServiceExt; // for `oneshot`

use convobridge::conversation::repository::InMemoryConversationRepository;
use convobridge::event::EventBus;
use convobridge::shared::AppState;

pub const TEST_SECRET: &str = "integration-secret";

/// Full application router plus handles on the injected collaborators, so
/// tests can observe the bus and the repository directly.
pub struct TestServer {
    pub app: Router,
    pub bus: EventBus,
    pub repository: Arc<InMemoryConversationRepository>,
}

impl TestServer {
    pub fn new() -> Self {
        let bus = EventBus::new();
        let repository = Arc::new(InMemoryConversationRepository::new());
        let state = AppState::new(
            repository.clone(),
            bus.clone(),
            Some(TEST_SECRET.to_string()),
        );
        Self {
            app: convobridge::router(state),
            bus,
            repository,
        }
    }

    pub async fn post_event(&self, body: Value, token: Option<&str>) -> Response<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/api/webhooks/events")
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("Authorization", format!("Bearer {}", token));
        }
        let request = builder.body(Body::from(body.to_string())).unwrap();
        self.app.clone().oneshot(request).await.unwrap()
    }

    pub async fn get(&self, uri: &str) -> Response<Body> {
        self.app
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    /// Creates a conversation through the real ingest endpoint.
    pub async fn start_conversation(&self, conversation_id: &str) {
        let response = self
            .post_event(
                serde_json::json!({
                    "type": "conversation.started",
                    "data": {
                        "conversation_id": conversation_id,
                        "participants": ["researcher", "reviewer"],
                    },
                }),
                Some(TEST_SECRET),
            )
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
    }
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
