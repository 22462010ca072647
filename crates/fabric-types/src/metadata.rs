//! Canonical metadata model (§3 of the fabric specification).
//!
//! `Metadata` is the single record attached to every entity, event and
//! orchestration call. Its shape is fixed; the only open-ended part is
//! `service_specific`, where each service owns a disjoint subtree.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Error produced when a metadata value fails one of the invariants in §3.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MetadataError {
    /// A version string did not match `MAJOR.MINOR.PATCH`.
    #[error("invalid semver string: {0:?}")]
    InvalidSemver(String),
    /// `versioning.environment` was empty.
    #[error("versioning.environment must not be empty")]
    EmptyEnvironment,
    /// A `service_specific` subtree was present but not a JSON object.
    #[error("service_specific[{0:?}] must be a JSON object")]
    ServiceNamespaceNotAnObject(String),
}

/// Ordered, duplicate-free sequence of free-form tags. Insertion order is
/// preserved; re-inserting an existing tag is a no-op rather than moving it
/// to the end.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagSet(IndexSet<String>);

impl TagSet {
    /// Build an empty tag set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a tag, preserving first-seen ordering.
    pub fn insert(&mut self, tag: impl Into<String>) -> bool {
        self.0.insert(tag.into())
    }

    /// Iterate tags in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Number of tags held.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the set holds no tags.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<String> for TagSet {
    fn from_iter<T: IntoIterator<Item = String>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// `{system_version, service_version, <entity>_version, environment,
/// last_migrated_at}` from §3. The `<entity>_version` component is keyed by
/// entity type since a single metadata value may, over its lifetime, attach
/// to more than one entity kind's lineage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Versioning {
    /// Platform/system release this metadata was last touched by.
    pub system_version: String,
    /// Owning service's release version.
    pub service_version: String,
    /// Per-entity-type version strings, e.g. `{"product": "1.0.0"}`.
    #[serde(default)]
    pub entity_versions: BTreeMap<String, String>,
    /// Deployment environment (`prod`, `staging`, …). Must be non-empty.
    pub environment: String,
    /// When this record was last migrated to the current schema shape.
    pub last_migrated_at: DateTime<Utc>,
}

/// Semantic version fallback used by the normalizer and by fresh metadata.
pub const DEFAULT_VERSION: &str = "0.0.1";
/// Default deployment environment.
pub const DEFAULT_ENVIRONMENT: &str = "prod";

impl Versioning {
    /// Platform defaults used by the normalizer (§4.2 step 1) when
    /// versioning is missing or any semver component is empty. `now` is
    /// supplied by the caller so the normalizer stays pure.
    pub fn platform_default(now: DateTime<Utc>) -> Self {
        Self {
            system_version: DEFAULT_VERSION.to_string(),
            service_version: DEFAULT_VERSION.to_string(),
            entity_versions: BTreeMap::new(),
            environment: DEFAULT_ENVIRONMENT.to_string(),
            last_migrated_at: now,
        }
    }

    /// Validate the three semver strings and the non-empty environment
    /// invariant (§3 invariant i, §8 universal invariant).
    pub fn validate(&self) -> Result<(), MetadataError> {
        for candidate in [&self.system_version, &self.service_version] {
            if !is_valid_semver(candidate) {
                return Err(MetadataError::InvalidSemver(candidate.clone()));
            }
        }
        for version in self.entity_versions.values() {
            if !is_valid_semver(version) {
                return Err(MetadataError::InvalidSemver(version.clone()));
            }
        }
        if self.environment.is_empty() {
            return Err(MetadataError::EmptyEnvironment);
        }
        Ok(())
    }

    /// Whether any of the required semver fields is missing/empty — the
    /// trigger condition for normalizer step 1.
    pub fn needs_defaults(&self) -> bool {
        self.system_version.is_empty()
            || self.service_version.is_empty()
            || self.environment.is_empty()
    }
}

/// `^\d+\.\d+\.\d+$` without pulling in a regex dependency for three-field
/// numeric parsing.
pub fn is_valid_semver(value: &str) -> bool {
    let parts: Vec<&str> = value.split('.').collect();
    parts.len() == 3 && parts.iter().all(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()))
}

/// `{created_by, last_modified_by, history}` from §3.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditTrail {
    /// Principal that first created the record.
    pub created_by: String,
    /// Principal that last modified the record.
    pub last_modified_by: String,
    /// Append-only history of short event tags (e.g. `"created"`, `"updated"`).
    #[serde(default)]
    pub history: Vec<String>,
}

impl AuditTrail {
    /// A fresh audit trail for a newly created record (§4.2 step 2).
    pub fn created(principal: impl Into<String>) -> Self {
        let principal = principal.into();
        Self {
            created_by: principal.clone(),
            last_modified_by: principal,
            history: vec!["created".to_string()],
        }
    }

    /// Append a history entry, de-duplicating only against the immediately
    /// previous entry (§4.2 step 2).
    pub fn push_history(&mut self, entry: impl Into<String>) {
        let entry = entry.into();
        if self.history.last().map(|last| last.as_str()) != Some(entry.as_str()) {
            self.history.push(entry);
        }
    }
}

/// `{prev_id, next_id, related_ids}` graph pointers — IDs only, never owning
/// references, resolved on demand via the metadata repository (§9).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Lineage {
    /// Previous revision of this entity, if any.
    #[serde(default)]
    pub prev_id: Option<String>,
    /// Scheduled next revision of this entity, if any.
    #[serde(default)]
    pub next_id: Option<String>,
    /// Peer entities related to this one.
    #[serde(default)]
    pub related_ids: Vec<String>,
}

/// Cross-service moderation counter (§3).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BadActor {
    /// Number of times this entity/principal has been flagged.
    #[serde(default)]
    pub flag_count: i32,
    /// Timestamp of the most recent flag, if any.
    #[serde(default)]
    pub last_flagged_at: Option<DateTime<Utc>>,
}

impl BadActor {
    /// Increment the flag counter, saturating at `i32::MAX` (§4.2 step 6).
    pub fn flag(&mut self, at: DateTime<Utc>) {
        self.flag_count = self.flag_count.saturating_add(1);
        self.last_flagged_at = Some(at);
    }
}

/// Fixed A/B test cohort enum, deterministically assigned from the
/// requesting user's ID (§3, §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbTestGroup {
    /// Control cohort — sees baseline behavior.
    Control,
    /// First experimental cohort.
    VariantA,
    /// Second experimental cohort.
    VariantB,
    /// Third experimental cohort.
    VariantC,
}

impl AbTestGroup {
    /// All cohorts, in the fixed order used for deterministic assignment.
    pub const ALL: [AbTestGroup; 4] = [
        AbTestGroup::Control,
        AbTestGroup::VariantA,
        AbTestGroup::VariantB,
        AbTestGroup::VariantC,
    ];
}

/// The canonical metadata record (§3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    /// Per-service extension subtrees, keyed by service name. Each service
    /// owns its own subtree and must never write another's (§3 invariant iv).
    #[serde(default)]
    pub service_specific: BTreeMap<String, Value>,
    /// Versioning triple plus environment and migration timestamp. Missing
    /// on the wire deserializes to an empty record that normalization's
    /// step 1 then recognizes via `needs_defaults` and fills in.
    #[serde(default)]
    pub versioning: Versioning,
    /// Audit trail of who touched this record and when. Missing on the wire
    /// deserializes to an empty trail, which normalization's step 2 treats
    /// the same as a never-touched record.
    #[serde(default)]
    pub audit: AuditTrail,
    /// Lineage pointers into the revision graph.
    #[serde(default)]
    pub lineage: Lineage,
    /// Cross-service moderation flag counter.
    #[serde(default)]
    pub bad_actor: BadActor,
    /// Feature flags evaluated active for the request that produced this metadata.
    #[serde(default)]
    pub feature_flags: BTreeSet<String>,
    /// A/B cohort assigned to the requesting principal, if known.
    #[serde(default)]
    pub ab_test_group: Option<AbTestGroup>,
    /// Ordered, unique free-form tags.
    #[serde(default)]
    pub tags: TagSet,
    /// SHA-256 of the canonical JSON serialization of every other field,
    /// recomputed after every normalization (§3 invariant iii).
    #[serde(default)]
    pub content_hash: String,
}

impl Metadata {
    /// A fresh metadata value with platform defaults, as if newly created
    /// by `principal` at `now`. Still requires a pass through the
    /// normalizer before `content_hash` is meaningful.
    pub fn new(principal: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            service_specific: BTreeMap::new(),
            versioning: Versioning::platform_default(now),
            audit: AuditTrail::created(principal),
            lineage: Lineage::default(),
            bad_actor: BadActor::default(),
            feature_flags: BTreeSet::new(),
            ab_test_group: None,
            tags: TagSet::new(),
            content_hash: String::new(),
        }
    }

    /// Validate the invariants that must hold for every persisted or
    /// emitted metadata value (§3 invariant i, §8).
    pub fn validate(&self) -> Result<(), MetadataError> {
        self.versioning.validate()?;
        for (service, subtree) in &self.service_specific {
            if !subtree.is_object() {
                return Err(MetadataError::ServiceNamespaceNotAnObject(service.clone()));
            }
        }
        Ok(())
    }

    /// Mutable access to a service's namespace, creating an empty object if
    /// absent. Callers must only touch their own namespace (§3 invariant iv).
    pub fn service_namespace_mut(&mut self, service: &str) -> &mut Value {
        self.service_specific
            .entry(service.to_string())
            .or_insert_with(|| Value::Object(serde_json::Map::new()))
    }
}
