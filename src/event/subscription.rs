use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;
use tracing::debug;

use super::bus::EventBus;
use super::events::BroadcastEvent;

/// What a subscriber wants to observe: everything, or one conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionScope {
    Global,
    Conversation(String),
}

impl SubscriptionScope {
    pub fn is_global(&self) -> bool {
        matches!(self, SubscriptionScope::Global)
    }

    /// Whether an event should be delivered to a subscriber with this scope.
    ///
    /// A conversation scope never matches an event whose payload carries no
    /// conversation id at all.
    pub fn matches(&self, event: &BroadcastEvent) -> bool {
        match self {
            SubscriptionScope::Global => true,
            SubscriptionScope::Conversation(id) => event.conversation_id() == Some(id.as_str()),
        }
    }
}

/// A live registration on the [`EventBus`].
///
/// The bus feeds this subscription through a bounded channel; the holder is
/// the sole reader. Dropping the subscription deregisters it, so a
/// disconnecting observer cleans up on every exit path.
pub struct Subscription {
    id: u64,
    receiver: mpsc::Receiver<BroadcastEvent>,
    bus: EventBus,
    active: bool,
}

impl Subscription {
    pub(super) fn new(id: u64, receiver: mpsc::Receiver<BroadcastEvent>, bus: EventBus) -> Self {
        Self {
            id,
            receiver,
            bus,
            active: true,
        }
    }

    /// Receives the next event, or `None` once unsubscribed and drained.
    pub async fn recv(&mut self) -> Option<BroadcastEvent> {
        self.receiver.recv().await
    }

    /// Receives without waiting; `None` when no event is queued.
    pub fn try_recv(&mut self) -> Option<BroadcastEvent> {
        self.receiver.try_recv().ok()
    }

    /// Deactivates this subscription. Safe to call more than once; repeated
    /// calls have no additional effect.
    pub fn unsubscribe(&mut self) {
        if self.active {
            self.active = false;
            self.bus.remove_subscriber(self.id);
            debug!(subscriber_id = self.id, "Subscription deactivated");
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl Stream for Subscription {
    type Item = BroadcastEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().receiver.poll_recv(cx)
    }
}
