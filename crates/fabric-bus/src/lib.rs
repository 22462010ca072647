#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **fabric-bus** – Canonical event bus abstraction.
//!
//! This crate provides the bus trait and an in-memory broadcast
//! implementation used to fan out `EventEnvelope`s from the dispatcher to
//! every interested service's own dispatcher. It sits at the deterministic
//! core layer: no persistence, no network I/O, no retry policy — just
//! broadcast fan-out with the at-least-once delivery semantics the
//! dispatcher's state filter is built to tolerate.

use std::sync::Arc;

use anyhow::Result;
use fabric_types::EventEnvelope;
use tokio::sync::broadcast;

/// Core event bus abstraction for publishing and subscribing to event
/// envelopes.
///
/// All implementations must be thread-safe and support multiple
/// subscribers. The bus makes no persistence guarantee of its own; event
/// replay is the job of the event-log collaborator (§6).
pub trait EventBus: Send + Sync {
    /// Publish an envelope to all current subscribers.
    ///
    /// Completes quickly and does not block the caller. If subscribers lag
    /// behind, the bus may drop events for them rather than stall the
    /// publisher.
    fn publish(&self, envelope: &EventEnvelope) -> Result<()>;

    /// Subscribe to the live event stream.
    ///
    /// Returns a receiver that observes every envelope published after the
    /// subscription was created.
    fn subscribe(&self) -> broadcast::Receiver<EventEnvelope>;
}

/// Simple in-memory, broadcast-only event bus using Tokio channels.
#[derive(Debug, Clone)]
pub struct InMemoryBus {
    tx: Arc<broadcast::Sender<EventEnvelope>>,
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl InMemoryBus {
    /// Create a new in-memory bus with the given ring-buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx: Arc::new(tx) }
    }

    /// Current number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl EventBus for InMemoryBus {
    fn publish(&self, envelope: &EventEnvelope) -> Result<()> {
        // A lagging-receiver error just means nobody was listening; the
        // dispatcher's state filter tolerates missed deliveries.
        let _ = self.tx.send(envelope.clone());
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use fabric_types::{EntityId, EventPayload, EventState, EventType, Metadata};
    use tokio::sync::broadcast::error::RecvError;
    use uuid::Uuid;

    fn sample_envelope(entity: &str) -> EventEnvelope {
        let now = Utc::now();
        EventEnvelope::requested(
            EventType::new("product", "create_product", 1, EventState::Requested),
            EntityId::from(entity),
            now,
            Metadata::new("u1", now),
            EventPayload::empty(),
            Uuid::now_v7(),
        )
    }

    #[tokio::test]
    async fn basic_publish_subscribe_flow() {
        let bus = InMemoryBus::new(16);
        let mut rx = bus.subscribe();
        let envelope = sample_envelope("prod-1");

        bus.publish(&envelope).unwrap();
        let received = rx.recv().await.unwrap();
        assert_eq!(received, envelope);
    }

    #[tokio::test]
    async fn multiple_subscribers_all_receive() {
        let bus = InMemoryBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        let envelope = sample_envelope("prod-2");
        bus.publish(&envelope).unwrap();

        assert_eq!(rx1.recv().await.unwrap(), envelope);
        assert_eq!(rx2.recv().await.unwrap(), envelope);
    }

    #[tokio::test]
    async fn slow_subscriber_observes_lag_instead_of_blocking_publisher() {
        let bus = InMemoryBus::new(2);
        let mut rx = bus.subscribe();

        for i in 0..5 {
            bus.publish(&sample_envelope(&format!("prod-{i}"))).unwrap();
        }

        match rx.recv().await {
            Ok(_) => {
                while rx.recv().await.is_ok() {}
            }
            Err(RecvError::Lagged(_)) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
}
