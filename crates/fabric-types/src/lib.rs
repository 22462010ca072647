#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **fabric-types** – Shared primitive data structures for the orchestration fabric.
//!
//! The crate is dependency-light and sits at the very bottom of the crate
//! graph so that every other crate in the workspace can depend on it without
//! causing cycles. It defines the canonical metadata model (§3 of the
//! fabric specification), the wire-visible event envelope, and the
//! immutable per-request orchestration context — but makes no assumptions
//! about I/O, caching, or the concrete collaborators that consume them.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Canonical metadata model: versioning, audit, lineage, feature flags and
/// the per-service extension subtree.
pub mod metadata;
/// Wire-visible event envelope and the `<service>:<action>:v<major>:<state>` grammar.
pub mod envelope;
/// Immutable per-request orchestration context.
pub mod context;

pub use metadata::{
    AbTestGroup, AuditTrail, BadActor, Lineage, Metadata, TagSet, Versioning,
};
pub use envelope::{EventEnvelope, EventPayload, EventState, EventType, EventTypeParseError};
pub use context::OrchestrationContext;

/// Opaque identifier for any entity tracked by the fabric (products, talent
/// profiles, moderation cases, …). Entities are identified by caller-chosen
/// strings (typically UUIDs) rather than a fabric-minted numeric space —
/// every domain service mints its own IDs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    /// Borrow the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for EntityId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for EntityId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// Saturating cast used wherever the spec requires a field to "clamp to its
/// declared width" rather than overflow or panic.
pub fn saturating_i32(value: i64) -> i32 {
    if value > i32::MAX as i64 {
        i32::MAX
    } else if value < i32::MIN as i64 {
        i32::MIN
    } else {
        value as i32
    }
}
