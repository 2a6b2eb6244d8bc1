// Webhook ingest pipeline
//
// Authenticates inbound producer calls, validates their bodies against the
// recognized event kinds, records the state transition, and publishes the
// event onto the bus. Order matters: auth, then validation, then
// persistence, then broadcast.

pub mod auth;
pub mod handlers;
pub mod schema;

pub use handlers::ingest_event;
pub use schema::{FieldIssue, ValidatedEvent, WebhookEnvelope};
