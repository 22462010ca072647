#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **fabric-dispatch** – Event dispatcher (§4.3).
//!
//! Accepts an event envelope, locates the handler for its action, guards
//! it by state filter, validates/decodes the payload, and invokes the
//! handler. Every failure mode along the way degrades to a log line and an
//! early return — dispatch is at-most-once and best-effort by design; it
//! never propagates a handler's or a malformed envelope's error upward.

use std::sync::Arc;

use fabric_bus::EventBus;
use fabric_registry::ActionRegistry;
use fabric_types::{EventEnvelope, OrchestrationContext};

/// What happened to one dispatch attempt. Real callers mostly ignore this —
/// every branch already logged — but it makes the six-step algorithm
/// directly testable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The envelope's JSON/grammar failed to parse (step 1).
    MalformedEnvelope,
    /// No handler is registered for the action at all (step 2).
    UnknownAction,
    /// The event type's service prefix did not match the local service (step 3).
    ServiceMismatch,
    /// A handler exists but its state filter dropped this envelope (step 4).
    StateFiltered,
    /// The payload failed to decode into the handler's expected shape (step 5).
    PayloadDecodeFailed,
    /// The handler ran (step 6).
    Dispatched,
}

/// Routes incoming envelopes to the local service's registered handlers.
pub struct Dispatcher {
    service_name: String,
    registry: ActionRegistry,
}

impl Dispatcher {
    /// Build a dispatcher for `service_name`, backed by `registry`.
    pub fn new(service_name: impl Into<String>, registry: ActionRegistry) -> Self {
        Self { service_name: service_name.into(), registry }
    }

    /// Parse a raw JSON envelope and dispatch it (step 1 plus the rest).
    pub async fn dispatch_raw(&self, context: &OrchestrationContext, raw_json: &str) -> DispatchOutcome {
        match serde_json::from_str::<EventEnvelope>(raw_json) {
            Ok(envelope) => self.dispatch(context, &envelope).await,
            Err(error) => {
                tracing::warn!(%error, "malformed event envelope");
                DispatchOutcome::MalformedEnvelope
            }
        }
    }

    /// Dispatch an already-parsed envelope (steps 2-6).
    pub async fn dispatch(&self, context: &OrchestrationContext, envelope: &EventEnvelope) -> DispatchOutcome {
        let action = envelope.event_type.action.as_str();

        // Step 2: the action must exist in the registry at all.
        if !self.registry.contains(action).await {
            tracing::warn!(action = %action, "no handler registered for action");
            return DispatchOutcome::UnknownAction;
        }

        // Step 3: the event type's service prefix must match ours.
        if envelope.event_type.service != self.service_name {
            tracing::warn!(
                event_service = %envelope.event_type.service,
                local_service = %self.service_name,
                "event type service prefix does not match local service"
            );
            return DispatchOutcome::ServiceMismatch;
        }

        // Step 4: the handler's state filter must admit this envelope's state.
        let handler = match self.registry.resolve(action, envelope.event_type.state).await {
            Ok(Some(handler)) => handler,
            Ok(None) => return DispatchOutcome::StateFiltered,
            Err(_) => return DispatchOutcome::UnknownAction,
        };

        // Step 5: validate/decode the payload into the handler's expected shape.
        if let Err(error) = handler.validate_payload(&envelope.payload.data) {
            tracing::error!(%error, action = %action, "payload decode failed");
            return DispatchOutcome::PayloadDecodeFailed;
        }

        // Step 6: invoke. Handler panics/errors are the handler's own
        // problem to log; the dispatcher's job ends at the call.
        handler.handle(context, envelope).await;
        DispatchOutcome::Dispatched
    }

    /// Drain a bus subscription forever, dispatching each envelope with a
    /// context derived from it. `principal_of` extracts the principal the
    /// context should carry (typically `metadata.audit.last_modified_by`).
    pub async fn run_forever(
        self: Arc<Self>,
        bus: Arc<dyn EventBus>,
        principal_of: impl Fn(&EventEnvelope) -> String,
        now: impl Fn() -> chrono::DateTime<chrono::Utc>,
    ) {
        let mut rx = bus.subscribe();
        loop {
            match rx.recv().await {
                Ok(envelope) => {
                    let context = OrchestrationContext::new(principal_of(&envelope), envelope.correlation_id, now())
                        .with_correlation_id(envelope.correlation_id);
                    self.dispatch(&context, &envelope).await;
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "dispatcher lagged behind the bus, some events were skipped");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use fabric_registry::ActionHandler;
    use fabric_types::{EntityId, EventPayload, EventState, EventType, Metadata};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    struct CountingHandler(Arc<AtomicUsize>);

    #[async_trait]
    impl ActionHandler for CountingHandler {
        async fn handle(&self, _context: &OrchestrationContext, _envelope: &EventEnvelope) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn envelope(service: &str, state: EventState) -> EventEnvelope {
        let now = Utc::now();
        EventEnvelope::requested(
            EventType::new(service, "create_product", 1, state),
            EntityId::from("p1"),
            now,
            Metadata::new("u1", now),
            EventPayload::empty(),
            Uuid::now_v7(),
        )
    }

    fn context() -> OrchestrationContext {
        OrchestrationContext::new("u1", Uuid::now_v7(), Utc::now())
    }

    #[tokio::test]
    async fn unknown_action_is_reported_and_not_invoked() {
        let dispatcher = Dispatcher::new("product", ActionRegistry::new());
        let outcome = dispatcher.dispatch(&context(), &envelope("product", EventState::Requested)).await;
        assert_eq!(outcome, DispatchOutcome::UnknownAction);
    }

    #[tokio::test]
    async fn service_prefix_mismatch_is_rejected_before_invocation() {
        let registry = ActionRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        registry.register("create_product", Arc::new(CountingHandler(calls.clone())), None).await;
        let dispatcher = Dispatcher::new("product", registry);

        let outcome = dispatcher.dispatch(&context(), &envelope("talent", EventState::Requested)).await;
        assert_eq!(outcome, DispatchOutcome::ServiceMismatch);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn only_requested_state_reaches_the_handler() {
        let registry = ActionRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        registry.register("create_product", Arc::new(CountingHandler(calls.clone())), None).await;
        let dispatcher = Dispatcher::new("product", registry);

        for state in [EventState::Requested, EventState::Completed, EventState::Failed, EventState::Cancelled] {
            dispatcher.dispatch(&context(), &envelope("product", state)).await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn malformed_json_never_reaches_registry_lookup() {
        let dispatcher = Dispatcher::new("product", ActionRegistry::new());
        let outcome = dispatcher.dispatch_raw(&context(), "{not json").await;
        assert_eq!(outcome, DispatchOutcome::MalformedEnvelope);
    }
}
