#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **fabric-collab** – Collaborator contracts consumed by the orchestration
//! core.
//!
//! Everything in this crate is a trait plus the small value types its
//! methods pass around. Concrete cache, event-log, knowledge-graph,
//! scheduler, pattern-registry and feature-flag backends live outside this
//! workspace; `fabric-cache` provides the one in-memory reference
//! implementation needed to exercise the pipeline end to end.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fabric_types::{EntityId, EventEnvelope, EventType, Metadata};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Errors a collaborator call can surface to the orchestration core. The
/// core treats every one of these as non-fatal to the caller's business
/// operation — they are logged and absorbed (§4.1, §7).
#[derive(Debug, thiserror::Error)]
pub enum CollabError {
    /// The requested key/field was not present.
    #[error("not found: {0}")]
    NotFound(String),
    /// A distributed lock could not be acquired within its TTL.
    #[error("locked: {0}")]
    Locked(String),
    /// The backend returned a failure unrelated to the above.
    #[error("collaborator failure: {0}")]
    Backend(String),
}

/// Result alias for collaborator operations.
pub type CollabResult<T> = Result<T, CollabError>;

// ───────────────────────────── Cache ─────────────────────────────

/// Cache collaborator (§6). Implementations must be internally
/// synchronized; the core never wraps calls in its own lock beyond the
/// explicit distributed lock below.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Fetch a field's raw JSON value.
    async fn get(&self, key: &str, field: &str) -> CollabResult<Option<Value>>;

    /// Write a field with a time-to-live.
    async fn set(&self, key: &str, field: &str, value: Value, ttl: Duration) -> CollabResult<()>;

    /// Delete one or more fields from a key.
    async fn delete(&self, key: &str, fields: &[&str]) -> CollabResult<()>;

    /// Delete every key matching a glob-style pattern (e.g. `search:product_*`).
    async fn delete_pattern(&self, glob: &str) -> CollabResult<()>;

    /// Atomically set a field only if absent, with a TTL. Returns whether
    /// the set took effect — the primitive the distributed lock is built on.
    async fn set_if_absent(&self, key: &str, field: &str, ttl: Duration) -> CollabResult<bool>;
}

/// `product:<entity_type>:<id>:<variant>` cache key scheme (§4.4).
pub fn entity_key(service: &str, entity_type: &str, id: &str, variant: &str) -> String {
    format!("service:{service}:{entity_type}:{id}:{variant}")
}

/// `search:<hash32>` search-result cache key (§4.4). Hashing is the
/// caller's responsibility (see `fabric_cache::search_key_hash`); this just
/// assembles the final string.
pub fn search_key(hash32: u32) -> String {
    format!("search:{hash32:08x}")
}

/// `<service>:<entity_type>:lock:<id>` distributed-lock key (§4.4).
pub fn lock_key(service: &str, entity_type: &str, id: &str) -> String {
    format!("{service}:{entity_type}:lock:{id}")
}

/// Cache coordinates for a single write, as supplied by a caller of the
/// orchestration handler (§4.1).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheInfo {
    /// Key to write the result under.
    pub key: String,
    /// Time-to-live; defaults to 5 minutes when not set (§4.1 step 3).
    pub ttl: Option<Duration>,
}

impl CacheInfo {
    /// Default TTL applied when the caller does not specify one.
    pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

    /// Metadata cache writes always use this TTL (§4.1 step 3 of the
    /// post-op pipeline), regardless of the result's own TTL.
    pub const METADATA_TTL: Duration = Duration::from_secs(10 * 60);

    /// The TTL to actually use: caller-specified, or the platform default.
    pub fn ttl_or_default(&self) -> Duration {
        self.ttl.unwrap_or(Self::DEFAULT_TTL)
    }
}

// ───────────────────────────── Event emitter ─────────────────────────────

/// Event emitter collaborator (§6). Owns the envelope until it is handed to
/// the bus; once `emit_envelope` returns successfully, ownership has
/// transferred and the envelope is immutable.
#[async_trait]
pub trait EventEmitter: Send + Sync {
    /// Emit a fully-built envelope. Returns the event id that was emitted.
    async fn emit_envelope(&self, envelope: EventEnvelope) -> CollabResult<Uuid>;

    /// Emit from loose parts, for callers that have not built a full
    /// envelope (`emit_raw` in §6).
    async fn emit_raw(&self, event_type: EventType, entity_id: EntityId, payload_bytes: Vec<u8>) -> CollabResult<Uuid>;
}

// ───────────────────────── Knowledge graph enricher ─────────────────────

/// Relation payload passed to `update_relation` (§4.1 step 4 of the
/// post-op pipeline).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationPayload {
    /// Entity the relation is about.
    pub entity_id: EntityId,
    /// Domain-level entity type (`"product"`, `"talent"`, …).
    pub entity_type: String,
    /// Short event tag (`"created"`, `"updated"`, …).
    pub event: String,
    /// Human-readable message accompanying the relation.
    pub message: String,
    /// Metadata snapshot at enrichment time.
    pub metadata: Metadata,
    /// When the relation was recorded.
    pub timestamp: DateTime<Utc>,
}

/// Knowledge-graph enricher collaborator (§6).
#[async_trait]
pub trait KnowledgeGraphEnricher: Send + Sync {
    /// Record a relation update for an entity.
    async fn update_relation(&self, payload: RelationPayload) -> CollabResult<()>;

    /// Enrich a node's stored metadata, returning whether anything changed
    /// and a diff of the fields that did.
    async fn enrich_node(&self, entity_id: &EntityId, metadata: &Metadata) -> CollabResult<(bool, HashMap<String, Value>)>;

    /// Record a trace of an event against an entity, independent of the
    /// relation graph.
    async fn record_trace(&self, entity_id: &EntityId, event_type: &EventType, payload: &Value) -> CollabResult<()>;
}

// ───────────────────────────── Scheduler ─────────────────────────────

/// A schedulable unit of work (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique job identifier.
    pub id: Uuid,
    /// Entity the job is about.
    pub entity_id: EntityId,
    /// Domain-specific job kind.
    pub job_type: String,
    /// When the job should run.
    pub execute_at: DateTime<Utc>,
    /// Metadata snapshot to carry alongside the job.
    pub metadata: Metadata,
    /// Free-form labels for job lookup/filtering.
    pub labels: Vec<String>,
}

/// Scheduler collaborator (§6).
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Register a brand-new job.
    async fn register_job(&self, job: Job) -> CollabResult<()>;

    /// Insert a job or overwrite an existing one with the same id.
    async fn upsert_job(&self, job: Job) -> CollabResult<()>;

    /// Remove a job by id.
    async fn delete_job(&self, job_id: Uuid) -> CollabResult<()>;
}

// ───────────────────────── Nexus pattern registry ─────────────────────

/// Nexus pattern registry collaborator (§6) — the orchestration backbone
/// that tracks recurring (pattern_id, pattern_type) tuples across entities.
#[async_trait]
pub trait NexusPatternRegistry: Send + Sync {
    /// Register a pattern occurrence with its metadata snapshot.
    async fn register_pattern(&self, pattern_id: &str, pattern_type: &str, metadata: &Metadata) -> CollabResult<()>;

    /// Update the tracked state for an entity.
    async fn update_state(&self, entity_id: &EntityId, state: &str) -> CollabResult<()>;
}

// ───────────────────────── Feature-flag evaluator ─────────────────────

/// Feature-flag evaluator collaborator (§6), also responsible for
/// deterministic A/B cohort assignment used by the versioning middleware
/// (§4.5).
#[async_trait]
pub trait FeatureFlagEvaluator: Send + Sync {
    /// Resolve the set of active flags for a principal.
    async fn evaluate_flags(&self, user_id: &str) -> CollabResult<Vec<String>>;

    /// Deterministically assign an A/B cohort name for a principal. The
    /// concrete cohort enum lives in `fabric_types::AbTestGroup`; this
    /// returns the raw string the evaluator resolved so the middleware can
    /// parse it against whatever cohort set is configured.
    async fn assign_ab_test(&self, user_id: &str) -> CollabResult<String>;
}

// ───────────────────────── Metadata repository ─────────────────────

/// Metadata repository collaborator (§6), used by the KG enricher to
/// compute diffs and by lineage resolution to look up related entities.
#[async_trait]
pub trait MetadataRepository: Send + Sync {
    /// Fetch the stored metadata for an entity, if any.
    async fn get_by_id(&self, entity_id: &EntityId) -> CollabResult<Option<Metadata>>;

    /// Persist metadata for an entity.
    async fn update(&self, entity_id: &EntityId, metadata: Metadata) -> CollabResult<()>;
}

// ───────────────────────────── Event log ─────────────────────────────

/// A previously-emitted event, as returned by the event log's `list` (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggedEvent {
    /// Event type at the time it was appended.
    pub event_type: EventType,
    /// Raw JSON payload as appended.
    pub payload: Value,
    /// When the append happened.
    pub appended_at: DateTime<Utc>,
}

/// Event log collaborator (§6), used for replay — distinct from the bus,
/// which only fans out live events.
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Append an event for an entity.
    async fn append(&self, entity_id: &EntityId, event_type: EventType, payload: Value) -> CollabResult<()>;

    /// List every event appended for an entity, oldest first.
    async fn list(&self, entity_id: &EntityId) -> CollabResult<Vec<LoggedEvent>>;
}
