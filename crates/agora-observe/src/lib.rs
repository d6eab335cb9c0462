//! In-process publish/subscribe event bus.
//!
//! Each component (the relay, the relay client, the reputation log)
//! offers a small set of named event channels observers may subscribe
//! to, per the "event emission" design note in the core specification:
//! delivery is synchronous in the publisher's own task and must never
//! block routing. A [`tokio::sync::broadcast`] channel gives exactly
//! that — a slow or absent subscriber drops the oldest buffered event
//! rather than stalling the sender.
//!
//! This is an observability side channel, not the system of record: the
//! reputation ledger's append-only log remains authoritative for
//! reputation data, and the relay's own state remains authoritative for
//! presence. A missed event here is lost, not corrected.

mod event;

pub use event::{EventDomain, EventPayload};

use tokio::sync::broadcast;

/// Default capacity of each domain's broadcast channel. Chosen generous
/// enough that a subscriber doing one `tracing` call per event won't lag
/// under normal load; a slow subscriber still only loses history, never
/// blocks the publisher.
const DEFAULT_CAPACITY: usize = 1024;

/// One event, as delivered to subscribers.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Event {
    pub domain: EventDomain,
    pub payload: EventPayload,
}

/// A single domain's publish/subscribe channel.
#[derive(Clone)]
pub struct EventBus {
    domain: EventDomain,
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    /// Creates a new bus for the given domain with the default capacity.
    pub fn new(domain: EventDomain) -> Self {
        Self::with_capacity(domain, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(domain: EventDomain, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { domain, sender }
    }

    /// Publishes an event. Returns the number of subscribers it reached;
    /// `0` is not an error — it just means nobody is listening right now.
    pub fn publish(&self, payload: EventPayload) -> usize {
        let event = Event {
            domain: self.domain,
            payload,
        };
        tracing::debug!(domain = %self.domain, ?event.payload, "event published");
        self.sender.send(event).unwrap_or(0)
    }

    /// Subscribes to this bus. The returned receiver sees every event
    /// published from this point forward; events published before
    /// subscribing are not replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_published_events() {
        let bus = EventBus::new(EventDomain::Relay);
        let mut rx = bus.subscribe();
        bus.publish(EventPayload::PeerOnline {
            public_key: "abc".to_string(),
        });
        let event = rx.recv().await.unwrap();
        assert_eq!(event.domain, EventDomain::Relay);
        assert!(matches!(event.payload, EventPayload::PeerOnline { .. }));
    }

    #[tokio::test]
    async fn publish_without_subscribers_does_not_error() {
        let bus = EventBus::new(EventDomain::Client);
        let delivered = bus.publish(EventPayload::Reconnecting { attempt: 1 });
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn lagging_subscriber_drops_oldest_rather_than_blocking_publisher() {
        let bus = EventBus::with_capacity(EventDomain::Relay, 2);
        let mut rx = bus.subscribe();
        for i in 0..5u8 {
            bus.publish(EventPayload::MessageRelayed {
                from: "a".to_string(),
                to: format!("peer-{i}"),
            });
        }
        // The receiver is behind; it should observe a Lagged error
        // rather than the publisher ever having blocked.
        let err = rx.recv().await.unwrap_err();
        assert!(matches!(err, broadcast::error::RecvError::Lagged(_)));
    }
}
