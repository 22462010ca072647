use std::sync::Arc;

use chrono::{DateTime, Utc};
use fabric_collab::{Cache, CacheInfo, EventEmitter};
use fabric_types::{EntityId, EventEnvelope, EventPayload, EventState, EventType, Metadata, OrchestrationContext};
use serde_json::{json, Value};
use uuid::Uuid;

/// Result of a successful `Success` call (§4.1).
#[derive(Debug, Clone, PartialEq)]
pub struct SuccessContext {
    /// Caller-supplied success code (service-defined, e.g. `"OK"`).
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// The business operation's result value.
    pub result: Value,
    /// When the success was recorded.
    pub timestamp: DateTime<Utc>,
}

/// Result of a failed `Error` call (§4.1).
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorContext {
    /// Caller-supplied error code (e.g. `"INVALID_ARGUMENT"`).
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Flattened cause chain, outermost first.
    pub cause_chain: Vec<String>,
    /// When the error was recorded.
    pub timestamp: DateTime<Utc>,
}

fn major_version(version: &str) -> u32 {
    version.split('.').next().and_then(|s| s.parse().ok()).unwrap_or(0)
}

fn cause_chain(mut cause: &(dyn std::error::Error + 'static)) -> Vec<String> {
    let mut chain = vec![cause.to_string()];
    while let Some(source) = cause.source() {
        chain.push(source.to_string());
        cause = source;
    }
    chain
}

/// The value every service invokes at every RPC exit point (§4.1). Carries
/// references to its collaborators; cheap to clone since every field is an
/// `Arc` or plain data.
#[derive(Clone)]
pub struct OrchestrationHandler {
    service_name: String,
    version: String,
    cache: Arc<dyn Cache>,
    emitter: Arc<dyn EventEmitter>,
    events_enabled: bool,
}

impl OrchestrationHandler {
    /// Build a handler for `service_name`, emitting events tagged with
    /// `version`'s major component.
    pub fn new(service_name: impl Into<String>, version: impl Into<String>, cache: Arc<dyn Cache>, emitter: Arc<dyn EventEmitter>, events_enabled: bool) -> Self {
        Self {
            service_name: service_name.into(),
            version: version.into(),
            cache,
            emitter,
            events_enabled,
        }
    }

    /// The terminal event type an emitted success/failure carries. The
    /// canonical grammar's state enum has no literal `success` variant
    /// (§3/§6 only define requested/started/completed/failed/cancelled);
    /// this implementation maps a successful business outcome onto
    /// `completed`, matching what the dispatcher's own state filter and
    /// the rest of the fabric already expect.
    fn event_type(&self, action: &str, state: EventState) -> EventType {
        EventType::new(self.service_name.clone(), action, major_version(&self.version), state)
    }

    /// `Success(ctx, action, code, message, result, metadata, entity_id, cache_info) -> success_context` (§4.1).
    #[allow(clippy::too_many_arguments)]
    pub async fn success(
        &self,
        ctx: &OrchestrationContext,
        action: &str,
        code: &str,
        message: &str,
        result: Value,
        metadata: &Metadata,
        entity_id: &EntityId,
        cache_info: Option<&CacheInfo>,
        now: DateTime<Utc>,
    ) -> SuccessContext {
        let success_context = SuccessContext {
            code: code.to_string(),
            message: message.to_string(),
            result: result.clone(),
            timestamp: now,
        };

        tracing::info!(
            service = %self.service_name,
            action = %action,
            entity_id = %entity_id,
            code = %code,
            request_id = %ctx.request_id,
            trace_id = %ctx.trace_id,
            correlation_id = %ctx.correlation_id,
            "operation succeeded"
        );

        if let Some(info) = cache_info {
            if let Err(error) = self.cache.set(&info.key, "profile", result.clone(), info.ttl_or_default()).await {
                tracing::warn!(%error, key = %info.key, "cache write failed after successful operation");
            }
        }

        if self.events_enabled {
            let payload = EventPayload {
                data: json!({
                    "code": code,
                    "message": message,
                    "result": result,
                    "yin_yang": "yang",
                    "correlation_id": ctx.correlation_id,
                    "actor_id": ctx.principal,
                    "request_id": ctx.request_id,
                    "service": self.service_name,
                    "timestamp": now.timestamp(),
                }),
            };
            let envelope = EventEnvelope {
                event_id: Uuid::now_v7(),
                event_type: self.event_type(action, EventState::Completed),
                entity_id: entity_id.clone(),
                occurred_at: now,
                metadata: metadata.clone(),
                payload,
                correlation_id: ctx.correlation_id,
                causation_id: None,
            };
            if let Err(error) = self.emitter.emit_envelope(envelope).await {
                tracing::warn!(%error, action = %action, "event emission failed");
            }
        }

        success_context
    }

    /// `Error(ctx, action, code, message, cause, metadata, entity_id) -> context_error` (§4.1).
    pub async fn error(
        &self,
        ctx: &OrchestrationContext,
        action: &str,
        code: &str,
        message: &str,
        cause: &(dyn std::error::Error + 'static),
        metadata: &Metadata,
        entity_id: &EntityId,
        now: DateTime<Utc>,
    ) -> ErrorContext {
        let chain = cause_chain(cause);
        let error_context = ErrorContext {
            code: code.to_string(),
            message: message.to_string(),
            cause_chain: chain.clone(),
            timestamp: now,
        };

        tracing::error!(
            service = %self.service_name,
            action = %action,
            entity_id = %entity_id,
            code = %code,
            cause = ?chain,
            request_id = %ctx.request_id,
            trace_id = %ctx.trace_id,
            correlation_id = %ctx.correlation_id,
            "operation failed"
        );

        if self.events_enabled {
            let payload = EventPayload {
                data: json!({
                    "yin_yang": "yin",
                    "error": {"code": code, "message": message},
                    "correlation_id": ctx.correlation_id,
                    "actor_id": ctx.principal,
                    "request_id": ctx.request_id,
                    "service": self.service_name,
                    "timestamp": now.timestamp(),
                }),
            };
            let envelope = EventEnvelope {
                event_id: Uuid::now_v7(),
                event_type: self.event_type(action, EventState::Failed),
                entity_id: entity_id.clone(),
                occurred_at: now,
                metadata: metadata.clone(),
                payload,
                correlation_id: ctx.correlation_id,
                causation_id: None,
            };
            if let Err(error) = self.emitter.emit_envelope(envelope).await {
                tracing::warn!(%error, action = %action, "event emission failed");
            }
        }

        error_context
    }
}
