// Streaming transport
//
// Turns one long-lived push connection into a live bus subscription and a
// serialized frame sequence, with heartbeats and teardown on disconnect.

pub mod frame;
pub mod handlers;

pub use frame::StreamFrame;
pub use handlers::{buffered_events, event_stats, event_stream};
