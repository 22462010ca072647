use std::sync::Arc;

use chrono::{DateTime, Utc};
use fabric_collab::{
    entity_key, Cache, CacheInfo, EventEmitter, Job, KnowledgeGraphEnricher, NexusPatternRegistry, RelationPayload, Scheduler,
};
use fabric_normalize::{normalize, NormalizeInput};
use fabric_types::{EntityId, EventEnvelope, EventPayload, EventState, EventType, Metadata, OrchestrationContext};
use serde_json::{json, Value};
use uuid::Uuid;

/// One best-effort pipeline step's failure. Accumulated, never propagated
/// (§4.1 "the pipeline returns a list of accumulated errors; callers
/// typically ignore them — they are already logged").
#[derive(Debug, Clone, thiserror::Error)]
#[error("post-op pipeline step {step:?} failed: {message}")]
pub struct PipelineError {
    /// Which step failed.
    pub step: &'static str,
    /// What went wrong.
    pub message: String,
}

impl PipelineError {
    fn new(step: &'static str, message: impl std::fmt::Display) -> Self {
        Self { step, message: message.to_string() }
    }
}

/// The normalized metadata plus every accumulated step failure.
pub struct PipelineOutcome {
    /// Metadata after normalization (or the input metadata, unchanged, if
    /// normalization was skipped or failed).
    pub metadata: Metadata,
    /// Every step that failed, in execution order. Already logged; purely
    /// informational for callers that want stricter handling (§9).
    pub errors: Vec<PipelineError>,
}

/// The extended configuration that triggers the post-op pipeline (§4.1).
/// Every field beyond `cache_info` is optional because the corresponding
/// collaborator may not be configured for a given service.
pub struct PostOpConfig {
    /// Domain entity type, e.g. `"product"`. Required for normalization
    /// and for the metadata/search cache keys.
    pub entity_type: Option<String>,
    /// New `lineage.prev_id`.
    pub prev_id: Option<String>,
    /// New `lineage.next_id`.
    pub next_id: Option<String>,
    /// New `lineage.related_ids`.
    pub related_ids: Vec<String>,
    /// Short status tag passed through to the normalizer's audit entry.
    pub status: Option<String>,
    /// Message passed through to the normalizer's audit entry.
    pub message: String,
    /// Cache coordinates for the result value itself.
    pub cache_info: Option<CacheInfo>,
    /// Scheduler job labels, if a job should be registered on success.
    pub job_labels: Vec<String>,
    /// Nexus pattern identity, if a pattern should be registered.
    pub pattern: Option<(String, String)>,
}

impl Default for PostOpConfig {
    fn default() -> Self {
        Self {
            entity_type: None,
            prev_id: None,
            next_id: None,
            related_ids: Vec::new(),
            status: None,
            message: String::new(),
            cache_info: None,
            job_labels: Vec::new(),
            pattern: None,
        }
    }
}

/// Runs the seven-step success pipeline / error-variant pipeline described
/// in §4.1 and §4.4. Each collaborator is optional; a missing one simply
/// skips its step rather than failing the pipeline.
#[derive(Clone)]
pub struct PostOpPipeline {
    service_name: String,
    version_major: u32,
    cache: Arc<dyn Cache>,
    emitter: Arc<dyn EventEmitter>,
    kg: Option<Arc<dyn KnowledgeGraphEnricher>>,
    scheduler: Option<Arc<dyn Scheduler>>,
    nexus: Option<Arc<dyn NexusPatternRegistry>>,
}

impl PostOpPipeline {
    /// Build a pipeline for `service_name`. Collaborators beyond cache and
    /// emitter are wired in afterward with the `with_*` builders.
    pub fn new(service_name: impl Into<String>, version_major: u32, cache: Arc<dyn Cache>, emitter: Arc<dyn EventEmitter>) -> Self {
        Self {
            service_name: service_name.into(),
            version_major,
            cache,
            emitter,
            kg: None,
            scheduler: None,
            nexus: None,
        }
    }

    /// Wire in the knowledge-graph enricher.
    pub fn with_kg(mut self, kg: Arc<dyn KnowledgeGraphEnricher>) -> Self {
        self.kg = Some(kg);
        self
    }

    /// Wire in the scheduler.
    pub fn with_scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Wire in the nexus pattern registry.
    pub fn with_nexus(mut self, nexus: Arc<dyn NexusPatternRegistry>) -> Self {
        self.nexus = Some(nexus);
        self
    }

    fn event_type(&self, action: &str, state: EventState) -> EventType {
        EventType::new(self.service_name.clone(), action, self.version_major, state)
    }

    async fn normalize_step(&self, metadata: &Metadata, entity_id: &EntityId, config: &PostOpConfig, principal: &str, now: DateTime<Utc>, errors: &mut Vec<PipelineError>) -> Metadata {
        if config.entity_type.is_none() {
            return metadata.clone();
        }
        let input = NormalizeInput {
            entity_id: Some(entity_id),
            prev_id: config.prev_id.clone(),
            next_id: config.next_id.clone(),
            related_ids: config.related_ids.clone(),
            status: config.status.clone(),
            message: Some(config.message.clone()),
            principal,
            now,
        };
        match normalize(metadata, input) {
            Ok(normalized) => normalized,
            Err(error) => {
                errors.push(PipelineError::new("normalize", error));
                tracing::warn!(error = %errors.last().unwrap().message, "normalization failed, falling back to pre-normalization metadata");
                metadata.clone()
            }
        }
    }

    /// Success variant: steps 1-7 of §4.1 in order.
    #[allow(clippy::too_many_arguments)]
    pub async fn run_success(
        &self,
        ctx: &OrchestrationContext,
        action: &str,
        entity_id: &EntityId,
        result: &Value,
        metadata: &Metadata,
        config: &PostOpConfig,
        now: DateTime<Utc>,
    ) -> PipelineOutcome {
        let mut errors = Vec::new();

        // Step 1: normalize.
        let normalized = self.normalize_step(metadata, entity_id, config, &ctx.principal, now, &mut errors).await;

        // Step 2: cache write of the result.
        if let Some(info) = &config.cache_info {
            if let Err(error) = self.cache.set(&info.key, "profile", result.clone(), info.ttl_or_default()).await {
                errors.push(PipelineError::new("cache_write_result", error));
            }
        }

        // Step 3: cache write of the normalized metadata.
        if let Some(entity_type) = &config.entity_type {
            let key = entity_key(&self.service_name, entity_type, entity_id.as_str(), "metadata");
            let value = serde_json::to_value(&normalized).unwrap_or(Value::Null);
            if let Err(error) = self.cache.set(&key, "metadata", value, CacheInfo::METADATA_TTL).await {
                errors.push(PipelineError::new("cache_write_metadata", error));
            }
        }

        // Step 4: knowledge-graph enrichment.
        if let (Some(kg), Some(entity_type)) = (&self.kg, &config.entity_type) {
            let payload = RelationPayload {
                entity_id: entity_id.clone(),
                entity_type: entity_type.clone(),
                event: config.status.clone().unwrap_or_else(|| "updated".to_string()),
                message: config.message.clone(),
                metadata: normalized.clone(),
                timestamp: now,
            };
            if let Err(error) = kg.update_relation(payload).await {
                errors.push(PipelineError::new("kg_enrich", error));
            }
        }

        // Step 5: scheduler registration.
        if let (Some(scheduler), Some(entity_type)) = (&self.scheduler, &config.entity_type) {
            let job = Job {
                id: Uuid::now_v7(),
                entity_id: entity_id.clone(),
                job_type: format!("{entity_type}.completed"),
                execute_at: now,
                metadata: normalized.clone(),
                labels: config.job_labels.clone(),
            };
            if let Err(error) = scheduler.register_job(job).await {
                errors.push(PipelineError::new("scheduler_register", error));
            }
        }

        // Step 6: event emission.
        let payload = EventPayload { data: json!({"result": result, "yin_yang": "yang"}) };
        let envelope = EventEnvelope {
            event_id: Uuid::now_v7(),
            event_type: self.event_type(action, EventState::Completed),
            entity_id: entity_id.clone(),
            occurred_at: now,
            metadata: normalized.clone(),
            payload,
            correlation_id: ctx.correlation_id,
            causation_id: None,
        };
        if let Err(error) = self.emitter.emit_envelope(envelope).await {
            errors.push(PipelineError::new("event_emit", error));
        }

        // Step 7: nexus pattern registration.
        if let (Some(nexus), Some((pattern_id, pattern_type))) = (&self.nexus, &config.pattern) {
            if let Err(error) = nexus.register_pattern(pattern_id, pattern_type, &normalized).await {
                errors.push(PipelineError::new("nexus_register", error));
            }
        }

        PipelineOutcome { metadata: normalized, errors }
    }

    /// Error variant: §4.1's success pipeline with cache writes (steps 2-3)
    /// replaced by a single cache-invalidation step inserted between
    /// scheduler registration and event emission (§4.4 "Error pipeline
    /// adds one more step between 5 and 6").
    pub async fn run_error(
        &self,
        ctx: &OrchestrationContext,
        action: &str,
        entity_id: &EntityId,
        metadata: &Metadata,
        config: &PostOpConfig,
        now: DateTime<Utc>,
    ) -> PipelineOutcome {
        let mut errors = Vec::new();

        // Step 1: normalize.
        let normalized = self.normalize_step(metadata, entity_id, config, &ctx.principal, now, &mut errors).await;

        // Step 4: knowledge-graph enrichment.
        if let (Some(kg), Some(entity_type)) = (&self.kg, &config.entity_type) {
            let payload = RelationPayload {
                entity_id: entity_id.clone(),
                entity_type: entity_type.clone(),
                event: config.status.clone().unwrap_or_else(|| "failed".to_string()),
                message: config.message.clone(),
                metadata: normalized.clone(),
                timestamp: now,
            };
            if let Err(error) = kg.update_relation(payload).await {
                errors.push(PipelineError::new("kg_enrich", error));
            }
        }

        // Step 5: scheduler registration.
        if let (Some(scheduler), Some(entity_type)) = (&self.scheduler, &config.entity_type) {
            let job = Job {
                id: Uuid::now_v7(),
                entity_id: entity_id.clone(),
                job_type: format!("{entity_type}.failed"),
                execute_at: now,
                metadata: normalized.clone(),
                labels: config.job_labels.clone(),
            };
            if let Err(error) = scheduler.register_job(job).await {
                errors.push(PipelineError::new("scheduler_register", error));
            }
        }

        // Inserted step: cache invalidation rather than write.
        if let Some(info) = &config.cache_info {
            if let Err(error) = self.cache.delete(&info.key, &["profile"]).await {
                errors.push(PipelineError::new("cache_invalidate", error));
            }
        }
        if let Some(entity_type) = &config.entity_type {
            let pattern = format!("search:{}_*", entity_type);
            if let Err(error) = self.cache.delete_pattern(&pattern).await {
                errors.push(PipelineError::new("cache_invalidate_pattern", error));
            }
        }

        // Step 6: event emission.
        let payload = EventPayload { data: json!({"yin_yang": "yin"}) };
        let envelope = EventEnvelope {
            event_id: Uuid::now_v7(),
            event_type: self.event_type(action, EventState::Failed),
            entity_id: entity_id.clone(),
            occurred_at: now,
            metadata: normalized.clone(),
            payload,
            correlation_id: ctx.correlation_id,
            causation_id: None,
        };
        if let Err(error) = self.emitter.emit_envelope(envelope).await {
            errors.push(PipelineError::new("event_emit", error));
        }

        // Step 7: nexus pattern registration.
        if let (Some(nexus), Some((pattern_id, pattern_type))) = (&self.nexus, &config.pattern) {
            if let Err(error) = nexus.register_pattern(pattern_id, pattern_type, &normalized).await {
                errors.push(PipelineError::new("nexus_register", error));
            }
        }

        PipelineOutcome { metadata: normalized, errors }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fabric_cache::MemoryCache;
    use fabric_collab::CollabResult;
    use std::time::Duration;
    use uuid::Uuid;

    struct RecordingEmitter(std::sync::Mutex<Vec<EventEnvelope>>);

    #[async_trait::async_trait]
    impl EventEmitter for RecordingEmitter {
        async fn emit_envelope(&self, envelope: EventEnvelope) -> CollabResult<Uuid> {
            let id = envelope.event_id;
            self.0.lock().unwrap().push(envelope);
            Ok(id)
        }

        async fn emit_raw(&self, _event_type: EventType, _entity_id: EntityId, _payload_bytes: Vec<u8>) -> CollabResult<Uuid> {
            Ok(Uuid::now_v7())
        }
    }

    fn config() -> PostOpConfig {
        PostOpConfig {
            entity_type: Some("product".to_string()),
            status: Some("created".to_string()),
            message: "created".to_string(),
            cache_info: Some(CacheInfo { key: "service:product:product:p1:profile".to_string(), ttl: None }),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn success_pipeline_writes_both_cache_entries_and_emits_completed() {
        let cache = Arc::new(MemoryCache::new());
        let emitter = Arc::new(RecordingEmitter(Default::default()));
        let pipeline = PostOpPipeline::new("product", 1, cache.clone(), emitter.clone());
        let now = Utc::now();
        let ctx = OrchestrationContext::new("u1", Uuid::now_v7(), now);
        let metadata = Metadata::new("u1", now);

        let outcome = pipeline
            .run_success(&ctx, "create_product", &EntityId::from("p1"), &json!({"id": "p1"}), &metadata, &config(), now)
            .await;

        assert!(outcome.errors.is_empty());
        assert!(cache.get("service:product:product:p1:profile", "profile").await.unwrap().is_some());
        assert!(cache
            .get("service:product:product:p1:metadata", "metadata")
            .await
            .unwrap()
            .is_some());
        let emitted = emitter.0.lock().unwrap();
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].event_type.to_string(), "product:create_product:v1:completed");
    }

    #[tokio::test]
    async fn error_pipeline_invalidates_instead_of_writing() {
        let cache = Arc::new(MemoryCache::new());
        cache
            .set("service:product:product:p1:profile", "profile", json!({"id": "p1"}), Duration::from_secs(60))
            .await
            .unwrap();
        let emitter = Arc::new(RecordingEmitter(Default::default()));
        let pipeline = PostOpPipeline::new("product", 1, cache.clone(), emitter.clone());
        let now = Utc::now();
        let ctx = OrchestrationContext::new("u1", Uuid::now_v7(), now);
        let metadata = Metadata::new("u1", now);

        let outcome = pipeline
            .run_error(&ctx, "update_product", &EntityId::from("p1"), &metadata, &config(), now)
            .await;

        assert!(outcome.errors.is_empty());
        assert!(cache.get("service:product:product:p1:profile", "profile").await.unwrap().is_none());
        let emitted = emitter.0.lock().unwrap();
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].event_type.to_string(), "product:update_product:v1:failed");
        assert_eq!(emitted[0].payload.data["yin_yang"], "yin");
    }

    #[tokio::test]
    async fn missing_collaborators_are_skipped_not_fatal() {
        let cache = Arc::new(MemoryCache::new());
        let emitter = Arc::new(RecordingEmitter(Default::default()));
        let pipeline = PostOpPipeline::new("product", 1, cache, emitter);
        let now = Utc::now();
        let ctx = OrchestrationContext::new("u1", Uuid::now_v7(), now);
        let metadata = Metadata::new("u1", now);

        let outcome = pipeline
            .run_success(&ctx, "create_product", &EntityId::from("p1"), &json!({}), &metadata, &PostOpConfig::default(), now)
            .await;
        assert!(outcome.errors.is_empty());
    }
}
