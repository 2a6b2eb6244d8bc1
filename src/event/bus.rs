use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use super::events::BroadcastEvent;
use super::subscription::{Subscription, SubscriptionScope};

/// How many recent events are kept for replay to new subscribers.
pub const DEFAULT_BUFFER_CAPACITY: usize = 100;

/// Per-subscriber queue depth. The source has no backpressure handling, so
/// a subscriber that falls this far behind starts losing events rather than
/// stalling the bus.
const SUBSCRIBER_CHANNEL_CAPACITY: usize = 256;

struct SubscriberEntry {
    id: u64,
    scope: SubscriptionScope,
    sender: mpsc::Sender<BroadcastEvent>,
}

struct BusInner {
    buffer: VecDeque<BroadcastEvent>,
    subscribers: Vec<SubscriberEntry>,
    next_subscriber_id: u64,
}

/// Read-only view of the bus, computed on demand.
#[derive(Debug, Clone, Serialize)]
pub struct BusStats {
    pub global_listener_count: usize,
    pub conversation_listener_count: usize,
    pub total_listeners: usize,
    pub buffered_event_count: usize,
    pub buffer_capacity: usize,
}

/// In-process pub/sub bus with a bounded replay buffer.
///
/// One instance is constructed in the composition root and injected into
/// the ingest pipeline and streaming transport through `AppState`. Clones
/// share the same registry and buffer.
///
/// `emit` delivers to every active subscriber before returning, so two
/// emit calls can never interleave their deliveries: each subscriber sees
/// events in emission order.
#[derive(Clone)]
pub struct EventBus {
    capacity: usize,
    inner: Arc<Mutex<BusInner>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUFFER_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Arc::new(Mutex::new(BusInner {
                buffer: VecDeque::with_capacity(capacity),
                subscribers: Vec::new(),
                next_subscriber_id: 0,
            })),
        }
    }

    /// Registers a subscriber and replays the buffered events matching its
    /// scope before any later emission can reach it.
    pub fn subscribe(&self, scope: SubscriptionScope) -> Subscription {
        self.subscribe_inner(scope, true)
    }

    /// Registers a subscriber that only sees events emitted from now on.
    pub fn subscribe_without_replay(&self, scope: SubscriptionScope) -> Subscription {
        self.subscribe_inner(scope, false)
    }

    fn subscribe_inner(&self, scope: SubscriptionScope, replay: bool) -> Subscription {
        let (sender, receiver) = mpsc::channel(SUBSCRIBER_CHANNEL_CAPACITY);

        // Replay and registration happen under one lock acquisition, so the
        // backfill is gapless: no concurrent emit can slip between them.
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_subscriber_id;
        inner.next_subscriber_id += 1;

        if replay {
            for event in inner.buffer.iter().filter(|e| scope.matches(e)) {
                if sender.try_send(event.clone()).is_err() {
                    warn!(subscriber_id = id, "Subscriber channel filled during replay");
                    break;
                }
            }
        }

        inner.subscribers.push(SubscriberEntry { id, scope, sender });
        debug!(
            subscriber_id = id,
            total = inner.subscribers.len(),
            "Subscriber registered"
        );

        Subscription::new(id, receiver, self.clone())
    }

    /// Appends the event to the replay buffer (evicting the oldest entry at
    /// capacity) and delivers it to every active subscriber: global
    /// subscribers first, then conversation subscribers whose scope
    /// matches, each in subscription order.
    ///
    /// Never fails. A full or closed subscriber channel loses this event
    /// for that subscriber only; delivery to the rest continues.
    pub fn emit(&self, event: BroadcastEvent) {
        let mut inner = self.inner.lock().unwrap();

        if inner.buffer.len() >= self.capacity {
            inner.buffer.pop_front();
        }
        inner.buffer.push_back(event.clone());

        let mut closed = Vec::new();
        for entry in inner.subscribers.iter().filter(|e| e.scope.is_global()) {
            Self::deliver(entry, &event, &mut closed);
        }
        for entry in inner
            .subscribers
            .iter()
            .filter(|e| !e.scope.is_global() && e.scope.matches(&event))
        {
            Self::deliver(entry, &event, &mut closed);
        }

        if !closed.is_empty() {
            inner.subscribers.retain(|e| !closed.contains(&e.id));
            debug!(pruned = closed.len(), "Pruned closed subscribers");
        }
    }

    fn deliver(entry: &SubscriberEntry, event: &BroadcastEvent, closed: &mut Vec<u64>) {
        match entry.sender.try_send(event.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(
                    subscriber_id = entry.id,
                    kind = event.kind.as_str(),
                    "Subscriber channel full, dropping event for this subscriber"
                );
            }
            Err(TrySendError::Closed(_)) => {
                closed.push(entry.id);
            }
        }
    }

    pub(super) fn remove_subscriber(&self, id: u64) {
        let mut inner = self.inner.lock().unwrap();
        inner.subscribers.retain(|e| e.id != id);
    }

    pub fn stats(&self) -> BusStats {
        let inner = self.inner.lock().unwrap();
        let global = inner
            .subscribers
            .iter()
            .filter(|e| e.scope.is_global())
            .count();
        BusStats {
            global_listener_count: global,
            conversation_listener_count: inner.subscribers.len() - global,
            total_listeners: inner.subscribers.len(),
            buffered_event_count: inner.buffer.len(),
            buffer_capacity: self.capacity,
        }
    }

    /// Snapshot of the replay buffer, oldest first. Diagnostic use only.
    pub fn buffered_events(&self) -> Vec<BroadcastEvent> {
        let inner = self.inner.lock().unwrap();
        inner.buffer.iter().cloned().collect()
    }

    /// Empties the replay buffer without touching active subscriptions.
    /// Reserved for test harnesses.
    pub fn clear_buffer(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.buffer.clear();
    }
}
