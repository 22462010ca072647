#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **fabric-registry** – Action registry and canonical event-type registry
//! (§3 "Action handler registration", §4.3).
//!
//! Both registries are write-once at startup and read-concurrently
//! thereafter (§5 "Shared resources"): a `RwLock` guards mutation, but the
//! steady-state path is all reads. Lock poisoning from a panicking writer
//! is treated as recoverable — dispatch degrades to "handler not found"
//! rather than panicking in turn.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use fabric_types::{EventState, EventType, EventEnvelope, OrchestrationContext};
use tokio::sync::RwLock;

/// Errors raised while registering or resolving handlers.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// No handler is registered for the given action.
    #[error("no handler registered for action {0:?}")]
    UnknownAction(String),
}

/// A service's reaction to one action's events. Handlers are looked up by
/// action name and invoked with `(context, envelope)` — the "service
/// instance" half of the spec signature is whatever state the handler
/// closes over when it was registered.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// Attempt to decode the raw payload into this handler's expected
    /// request shape (§4.3 step 5, §9 "tagged registry" redesign note).
    /// The default accepts anything — handlers with no typed shape to
    /// enforce need not override it.
    fn validate_payload(&self, payload: &serde_json::Value) -> Result<(), serde_json::Error> {
        let _ = payload;
        Ok(())
    }

    /// Run the handler against a dispatched envelope, after its payload has
    /// passed `validate_payload`.
    async fn handle(&self, context: &OrchestrationContext, envelope: &EventEnvelope);
}

/// Per-handler typed request shape, used by [`Decoding`] to adapt a
/// strongly-typed handler into the object-safe [`ActionHandler`] the
/// registry stores.
#[async_trait]
pub trait TypedActionHandler<T>: Send + Sync {
    /// Run the handler against the envelope's already-decoded request.
    async fn handle_typed(&self, context: &OrchestrationContext, envelope: &EventEnvelope, request: T);
}

/// Adapts a [`TypedActionHandler<T>`] into an [`ActionHandler`] by decoding
/// `envelope.payload.data` into `T` before delegating.
pub struct Decoding<T, H> {
    inner: H,
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T, H> Decoding<T, H> {
    /// Wrap a typed handler.
    pub fn new(inner: H) -> Self {
        Self { inner, _marker: std::marker::PhantomData }
    }
}

#[async_trait]
impl<T, H> ActionHandler for Decoding<T, H>
where
    T: for<'de> serde::Deserialize<'de> + Send + Sync + 'static,
    H: TypedActionHandler<T>,
{
    fn validate_payload(&self, payload: &serde_json::Value) -> Result<(), serde_json::Error> {
        serde_json::from_value::<T>(payload.clone()).map(|_| ())
    }

    async fn handle(&self, context: &OrchestrationContext, envelope: &EventEnvelope) {
        match envelope.payload.decode::<T>() {
            Ok(request) => self.inner.handle_typed(context, envelope, request).await,
            Err(error) => tracing::error!(%error, "payload decode failed after validation passed"),
        }
    }
}

struct RegisteredHandler {
    handler: Arc<dyn ActionHandler>,
    allowed_states: Vec<EventState>,
}

impl RegisteredHandler {
    fn accepts(&self, state: EventState) -> bool {
        self.allowed_states.iter().any(|allowed| *allowed == state)
    }
}

/// Default state-filter allow-list: only `requested` events reach handler
/// bodies, so services never react to their own success/failure echoes
/// (§4.3 "Registration").
pub fn default_allowed_states() -> Vec<EventState> {
    vec![EventState::Requested]
}

/// Maps action name to its registered handler, wrapped in a state filter.
#[derive(Clone, Default)]
pub struct ActionRegistry {
    handlers: Arc<RwLock<HashMap<String, Arc<RegisteredHandler>>>>,
}

impl ActionRegistry {
    /// Build an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `action`, gated by `allowed_states` (defaults
    /// to `{requested}` via [`default_allowed_states`] if `None`).
    /// Re-registering an action overwrites the previous entry silently,
    /// but logs a WARN (§4.3).
    pub async fn register(&self, action: impl Into<String>, handler: Arc<dyn ActionHandler>, allowed_states: Option<Vec<EventState>>) {
        let action = action.into();
        let registered = Arc::new(RegisteredHandler {
            handler,
            allowed_states: allowed_states.unwrap_or_else(default_allowed_states),
        });
        let mut guard = self.handlers.write().await;
        if guard.insert(action.clone(), registered).is_some() {
            tracing::warn!(action = %action, "overwriting previously registered action handler");
        }
    }

    /// Resolve the handler for `action` if its state filter accepts
    /// `state`. Returns `Ok(None)` (not an error) when the filter silently
    /// drops the envelope — only a genuinely unknown action is an error.
    pub async fn resolve(&self, action: &str, state: EventState) -> Result<Option<Arc<dyn ActionHandler>>, RegistryError> {
        let guard = self.handlers.read().await;
        let Some(registered) = guard.get(action) else {
            return Err(RegistryError::UnknownAction(action.to_string()));
        };
        Ok(registered.accepts(state).then(|| registered.handler.clone()))
    }

    /// Whether any handler is registered for `action`, regardless of state
    /// filter.
    pub async fn contains(&self, action: &str) -> bool {
        self.handlers.read().await.contains_key(action)
    }
}

/// Declarative entry loaded into the canonical event-type registry at
/// startup (§4.3 "Canonical event type registry"): `(action, state, major)`.
#[derive(Debug, Clone, Copy)]
pub struct CanonicalEventTypeEntry {
    /// Action name.
    pub action: &'static str,
    /// Lifecycle state this entry covers.
    pub state: EventState,
    /// Major version of the action's contract.
    pub major: u32,
}

/// Registry keyed by `(action, state)` for emitters constructing a
/// canonical type from structured arguments rather than string formatting.
#[derive(Clone)]
pub struct EventTypeRegistry {
    service: String,
    entries: HashMap<(String, EventStateKey), u32>,
}

// EventState isn't Hash/Eq (it only derives Copy/PartialEq/Eq via serde
// attrs), so key on its string form instead of requiring that derive on a
// type that otherwise has no reason to be hashable.
type EventStateKey = &'static str;

fn state_key(state: EventState) -> EventStateKey {
    match state {
        EventState::Requested => "requested",
        EventState::Started => "started",
        EventState::Completed => "completed",
        EventState::Failed => "failed",
        EventState::Cancelled => "cancelled",
    }
}

impl EventTypeRegistry {
    /// Build a registry for `service`, loading its permitted event names
    /// from a declarative list of entries (§4.3).
    pub fn load(service: impl Into<String>, entries: &[CanonicalEventTypeEntry]) -> Self {
        let mut map = HashMap::new();
        for entry in entries {
            map.insert((entry.action.to_string(), state_key(entry.state)), entry.major);
        }
        Self { service: service.into(), entries: map }
    }

    /// Construct the canonical `EventType` for `(action, state)`, or `None`
    /// if that combination was never declared.
    pub fn lookup(&self, action: &str, state: EventState) -> Option<EventType> {
        self.entries
            .get(&(action.to_string(), state_key(state)))
            .map(|major| EventType::new(self.service.clone(), action, *major, state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use fabric_types::{EntityId, EventPayload, Metadata};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    struct CountingHandler(Arc<AtomicUsize>);

    #[async_trait]
    impl ActionHandler for CountingHandler {
        async fn handle(&self, _context: &OrchestrationContext, _envelope: &EventEnvelope) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn envelope(state: EventState) -> EventEnvelope {
        let now = Utc::now();
        EventEnvelope::requested(
            EventType::new("product", "create_product", 1, state),
            EntityId::from("p1"),
            now,
            Metadata::new("u1", now),
            EventPayload::empty(),
            Uuid::now_v7(),
        )
    }

    #[tokio::test]
    async fn unknown_action_is_an_error() {
        let registry = ActionRegistry::new();
        let err = registry.resolve("create_product", EventState::Requested).await.unwrap_err();
        assert!(matches!(err, RegistryError::UnknownAction(_)));
    }

    #[tokio::test]
    async fn default_filter_only_admits_requested() {
        let registry = ActionRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        registry.register("create_product", Arc::new(CountingHandler(calls.clone())), None).await;

        assert!(registry.resolve("create_product", EventState::Requested).await.unwrap().is_some());
        assert!(registry.resolve("create_product", EventState::Completed).await.unwrap().is_none());
        assert!(registry.resolve("create_product", EventState::Failed).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn re_registration_overwrites() {
        let registry = ActionRegistry::new();
        registry.register("create_product", Arc::new(CountingHandler(Arc::new(AtomicUsize::new(0)))), None).await;
        registry.register("create_product", Arc::new(CountingHandler(Arc::new(AtomicUsize::new(0)))), None).await;
        assert!(registry.contains("create_product").await);
    }

    #[test]
    fn event_type_registry_builds_canonical_types_from_declared_entries() {
        let registry = EventTypeRegistry::load(
            "product",
            &[CanonicalEventTypeEntry { action: "create_product", state: EventState::Completed, major: 1 }],
        );
        let event_type = registry.lookup("create_product", EventState::Completed).unwrap();
        assert_eq!(event_type.to_string(), "product:create_product:v1:completed");
        assert!(registry.lookup("create_product", EventState::Failed).is_none());
    }

    #[tokio::test]
    async fn unused_envelope_helper_builds_expected_shape() {
        let e = envelope(EventState::Requested);
        assert_eq!(e.event_type.state, EventState::Requested);
    }

    #[derive(serde::Deserialize)]
    struct CreateProductRequest {
        name: String,
    }

    struct RecordingTyped(Arc<std::sync::Mutex<Vec<String>>>);

    #[async_trait]
    impl TypedActionHandler<CreateProductRequest> for RecordingTyped {
        async fn handle_typed(&self, _context: &OrchestrationContext, _envelope: &EventEnvelope, request: CreateProductRequest) {
            self.0.lock().unwrap().push(request.name);
        }
    }

    #[tokio::test]
    async fn decoding_wrapper_rejects_payload_missing_required_field() {
        let handler = Decoding::new(RecordingTyped(Arc::new(std::sync::Mutex::new(Vec::new()))));
        let bad_payload = serde_json::json!({"owner_id": "u1"});
        assert!(handler.validate_payload(&bad_payload).is_err());
    }

    #[tokio::test]
    async fn decoding_wrapper_delegates_to_typed_handler_on_valid_payload() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let handler = Decoding::new(RecordingTyped(seen.clone()));
        let mut e = envelope(EventState::Requested);
        e.payload = EventPayload::from_value(serde_json::json!({"name": "X"})).unwrap();
        let ctx = OrchestrationContext::new("u1", Uuid::now_v7(), Utc::now());
        handler.handle(&ctx, &e).await;
        assert_eq!(*seen.lock().unwrap(), vec!["X".to_string()]);
    }
}
