// Realtime event distribution core
//
// This module provides the in-process publish/subscribe bus that fans
// validated conversation events out to live stream observers, with a
// bounded replay buffer backfilling new subscribers.

// Public API - what other modules can use
pub use bus::{BusStats, EventBus, DEFAULT_BUFFER_CAPACITY};
pub use events::{BroadcastEvent, EventKind};
pub use subscription::{Subscription, SubscriptionScope};

// Internal modules
mod bus;
mod events;
mod subscription;
