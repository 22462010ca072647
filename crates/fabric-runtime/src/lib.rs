#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **fabric-runtime** – Wiring layer that assembles one running fabric
//! instance.
//!
//! This crate owns no domain logic of its own. It composes the bus, the
//! in-memory cache, the action registry, the event dispatcher and the
//! orchestration handler into a single `FabricRuntime` value, and spawns
//! the background task that drains the bus into the dispatcher. A service
//! binary depends on this crate, registers its action handlers, and calls
//! `submit`/`handler` for the rest of its lifetime.

use std::sync::Arc;

use fabric_bus::{EventBus, InMemoryBus};
use fabric_cache::MemoryCache;
use fabric_collab::{Cache, EventEmitter};
use fabric_dispatch::Dispatcher;
use fabric_orchestrate::OrchestrationHandler;
use fabric_registry::{ActionHandler, ActionRegistry, EventTypeRegistry};
use fabric_types::{EventEnvelope, EventState, OrchestrationContext};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Configuration for one fabric runtime instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Local service name, used as the dispatcher's service-prefix filter
    /// and the orchestration handler's event-type namespace.
    pub service_name: String,
    /// `MAJOR.MINOR.PATCH` service release, whose major component tags
    /// every emitted event type.
    pub service_version: String,
    /// Event bus ring buffer capacity.
    pub bus_capacity: usize,
    /// Whether the orchestration handler emits completion/failure events
    /// at all (§4.1 — disabled for dry-run/test harnesses).
    pub events_enabled: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            service_name: "fabric".to_string(),
            service_version: "0.1.0".to_string(),
            bus_capacity: 1024,
            events_enabled: true,
        }
    }
}

/// A configuration suitable for unit and integration tests: a small bus
/// buffer and events left enabled so pipeline assertions still have
/// something to observe.
pub fn test_config() -> RuntimeConfig {
    RuntimeConfig {
        service_name: "test".to_string(),
        service_version: "0.1.0".to_string(),
        bus_capacity: 16,
        events_enabled: true,
    }
}

/// One running fabric instance: bus, cache, registry, dispatcher and
/// orchestration handler, bound together for a single service.
pub struct FabricRuntime {
    config: RuntimeConfig,
    bus: Arc<dyn EventBus>,
    cache: Arc<dyn Cache>,
    registry: ActionRegistry,
    event_types: EventTypeRegistry,
    handler: OrchestrationHandler,
    dispatch_task: Option<tokio::task::JoinHandle<()>>,
}

impl FabricRuntime {
    /// Assemble a runtime backed by a fresh in-memory cache. `emitter` is
    /// the caller-supplied event-emitter collaborator (commonly one that
    /// republishes onto this same bus, or forwards to an external broker).
    pub fn new(config: RuntimeConfig, emitter: Arc<dyn EventEmitter>) -> Self {
        Self::with_cache(config, Arc::new(MemoryCache::new()), emitter)
    }

    /// Assemble a runtime against a caller-supplied cache. Lets a service
    /// hold onto the concrete cache handle (e.g. for direct lock
    /// acquisition) while the runtime only ever sees it through the
    /// `Cache` trait object.
    pub fn with_cache(config: RuntimeConfig, cache: Arc<dyn Cache>, emitter: Arc<dyn EventEmitter>) -> Self {
        let bus: Arc<dyn EventBus> = Arc::new(InMemoryBus::new(config.bus_capacity));
        Self::with_bus_and_cache(config, bus, cache, emitter)
    }

    /// Assemble a runtime against caller-supplied bus and cache instances.
    /// Lets a service build its event emitter against the same bus the
    /// runtime will dispatch from, instead of the two being wired
    /// independently.
    pub fn with_bus_and_cache(config: RuntimeConfig, bus: Arc<dyn EventBus>, cache: Arc<dyn Cache>, emitter: Arc<dyn EventEmitter>) -> Self {
        info!(service = %config.service_name, "assembling fabric runtime");

        let registry = ActionRegistry::new();
        let event_types = EventTypeRegistry::load(config.service_name.clone(), &[]);
        let handler = OrchestrationHandler::new(config.service_name.clone(), config.service_version.clone(), cache.clone(), emitter, config.events_enabled);

        Self {
            config,
            bus,
            cache,
            registry,
            event_types,
            handler,
            dispatch_task: None,
        }
    }

    /// Register a handler for `action`, optionally restricting which
    /// envelope states reach it (defaults to `Requested` only, §4.3).
    pub async fn register_action(&self, action: impl Into<String>, handler: Arc<dyn ActionHandler>, allowed_states: Option<Vec<EventState>>) {
        self.registry.register(action, handler, allowed_states).await;
    }

    /// Load the declarative canonical event-type registry this service
    /// advertises (§4.3's closing paragraph).
    pub fn load_event_types(&mut self, entries: &[fabric_registry::CanonicalEventTypeEntry]) {
        self.event_types = EventTypeRegistry::load(self.config.service_name.clone(), entries);
    }

    /// The loaded canonical event-type registry, for lookup by callers that
    /// need to validate an event type before constructing an envelope.
    pub fn event_types(&self) -> &EventTypeRegistry {
        &self.event_types
    }

    /// Shared cache collaborator, for services that want direct access
    /// beyond what the orchestration handler already does on their behalf.
    pub fn cache(&self) -> Arc<dyn Cache> {
        self.cache.clone()
    }

    /// The orchestration handler this runtime's actions should call at
    /// every RPC exit point (§4.1).
    pub fn handler(&self) -> &OrchestrationHandler {
        &self.handler
    }

    /// Publish an envelope onto the bus, e.g. to trigger this runtime's own
    /// dispatcher loop or to notify other local subscribers.
    pub fn publish(&self, envelope: &EventEnvelope) -> anyhow::Result<()> {
        self.bus.publish(envelope)
    }

    /// Subscribe to the live envelope stream.
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.bus.subscribe()
    }

    /// Dispatch a single already-parsed envelope through the registry
    /// without going through the bus (useful for synchronous call sites
    /// and for tests).
    pub async fn dispatch(&self, context: &OrchestrationContext, envelope: &EventEnvelope) -> fabric_dispatch::DispatchOutcome {
        let dispatcher = Dispatcher::new(self.config.service_name.clone(), self.registry.clone());
        dispatcher.dispatch(context, envelope).await
    }

    /// Spawn the background task draining the bus into the registered
    /// action handlers. `principal_of` extracts the principal each derived
    /// context should carry. Idempotent: a second call replaces the prior
    /// task handle without stopping the old task, so callers should only
    /// invoke this once per runtime.
    pub fn spawn_dispatch_loop(&mut self, principal_of: impl Fn(&EventEnvelope) -> String + Send + Sync + 'static) {
        let dispatcher = Arc::new(Dispatcher::new(self.config.service_name.clone(), self.registry.clone()));
        let bus = self.bus.clone();
        debug!(service = %self.config.service_name, "spawning dispatch loop");
        let task = tokio::spawn(async move {
            dispatcher.run_forever(bus, principal_of, chrono::Utc::now).await;
        });
        self.dispatch_task = Some(task);
    }

    /// Shut the runtime down, aborting the dispatch loop if one was spawned.
    pub async fn shutdown(mut self) {
        info!(service = %self.config.service_name, "shutting down fabric runtime");
        if let Some(task) = self.dispatch_task.take() {
            task.abort();
            let _ = task.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use fabric_collab::CollabResult;
    use fabric_types::{EntityId, EventPayload, EventType, Metadata};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    struct NullEmitter;

    #[async_trait]
    impl EventEmitter for NullEmitter {
        async fn emit_envelope(&self, envelope: EventEnvelope) -> CollabResult<Uuid> {
            Ok(envelope.event_id)
        }
        async fn emit_raw(&self, _event_type: EventType, _entity_id: EntityId, _payload_bytes: Vec<u8>) -> CollabResult<Uuid> {
            Ok(Uuid::now_v7())
        }
    }

    struct CountingHandler(Arc<AtomicUsize>);

    #[async_trait]
    impl ActionHandler for CountingHandler {
        async fn handle(&self, _context: &OrchestrationContext, _envelope: &EventEnvelope) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn envelope(service: &str) -> EventEnvelope {
        let now = Utc::now();
        EventEnvelope::requested(
            EventType::new(service, "create_product", 1, EventState::Requested),
            EntityId::from("p1"),
            now,
            Metadata::new("u1", now),
            EventPayload::empty(),
            Uuid::now_v7(),
        )
    }

    #[tokio::test]
    async fn dispatch_reaches_a_registered_handler() {
        let runtime = FabricRuntime::new(test_config(), Arc::new(NullEmitter));
        let calls = Arc::new(AtomicUsize::new(0));
        runtime.register_action("create_product", Arc::new(CountingHandler(calls.clone())), None).await;

        let ctx = OrchestrationContext::new("u1", Uuid::now_v7(), Utc::now());
        let outcome = runtime.dispatch(&ctx, &envelope("test")).await;

        assert_eq!(outcome, fabric_dispatch::DispatchOutcome::Dispatched);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn handler_is_reachable_for_success_and_error_calls() {
        let runtime = FabricRuntime::new(test_config(), Arc::new(NullEmitter));
        let now = Utc::now();
        let ctx = OrchestrationContext::new("u1", Uuid::now_v7(), now);
        let metadata = Metadata::new("u1", now);
        let success = runtime
            .handler()
            .success(&ctx, "create_product", "OK", "created", serde_json::json!({"id": "p1"}), &metadata, &EntityId::from("p1"), None, now)
            .await;
        assert_eq!(success.code, "OK");
    }

    #[tokio::test]
    async fn dispatch_loop_drains_published_envelopes() {
        let mut runtime = FabricRuntime::new(test_config(), Arc::new(NullEmitter));
        let calls = Arc::new(AtomicUsize::new(0));
        runtime.register_action("create_product", Arc::new(CountingHandler(calls.clone())), None).await;
        runtime.spawn_dispatch_loop(|_envelope| "u1".to_string());

        runtime.publish(&envelope("test")).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        runtime.shutdown().await;
    }
}
