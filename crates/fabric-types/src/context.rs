//! Immutable per-request orchestration context (§4.5).
//!
//! The context carrier middleware builds one of these at the edge of the
//! system and threads it, unmodified, through the dispatcher, the handler
//! and the post-op pipeline. Nothing downstream may mutate it — a new
//! context is minted per request, never patched in place.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::metadata::{AbTestGroup, Versioning};

/// Request-scoped, read-only context threaded through an orchestration call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationContext {
    /// Identifier for this specific call.
    pub request_id: Uuid,
    /// Identifier shared across every event this call produces.
    pub correlation_id: Uuid,
    /// Identifier shared across every service hop this call traverses,
    /// independent of `correlation_id`'s per-call event chain.
    pub trace_id: Uuid,
    /// Principal (user or service) on whose behalf the call runs.
    pub principal: String,
    /// Versioning record the context-carrier middleware resolved for this
    /// call (§4.5); stamped onto the context so every downstream site that
    /// logs or emits events can read it without a second lookup.
    pub versioning: Versioning,
    /// A/B cohort assigned to `principal`, if the evaluator resolved one.
    pub ab_test_group: Option<AbTestGroup>,
    /// Feature flags active for this call, resolved once at the edge.
    pub feature_flags: BTreeSet<String>,
    /// When the call entered the fabric.
    pub started_at: DateTime<Utc>,
    /// Optional hard deadline; handlers should treat a missed deadline as
    /// cancellation rather than pressing on (§5).
    pub deadline: Option<DateTime<Utc>>,
}

impl OrchestrationContext {
    /// Build a fresh context at the edge of the system. `correlation_id`
    /// and `trace_id` default to `request_id` for a top-level call; nested
    /// calls that join an existing chain should override them after
    /// construction. `versioning` starts out empty — callers that resolve
    /// one (the context-carrier middleware) attach it via
    /// `with_versioning`.
    pub fn new(principal: impl Into<String>, request_id: Uuid, started_at: DateTime<Utc>) -> Self {
        Self {
            request_id,
            correlation_id: request_id,
            trace_id: request_id,
            principal: principal.into(),
            versioning: Versioning::default(),
            ab_test_group: None,
            feature_flags: BTreeSet::new(),
            started_at,
            deadline: None,
        }
    }

    /// Join an existing causal chain instead of starting a new one.
    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    /// Join an existing cross-service trace instead of starting a new one.
    pub fn with_trace_id(mut self, trace_id: Uuid) -> Self {
        self.trace_id = trace_id;
        self
    }

    /// Attach the resolved versioning record.
    pub fn with_versioning(mut self, versioning: Versioning) -> Self {
        self.versioning = versioning;
        self
    }

    /// Attach the evaluated A/B cohort.
    pub fn with_ab_test_group(mut self, group: AbTestGroup) -> Self {
        self.ab_test_group = Some(group);
        self
    }

    /// Attach the resolved feature-flag set.
    pub fn with_feature_flags(mut self, flags: BTreeSet<String>) -> Self {
        self.feature_flags = flags;
        self
    }

    /// Attach a hard deadline.
    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Whether a flag is active for this call.
    pub fn has_flag(&self, flag: &str) -> bool {
        self.feature_flags.contains(flag)
    }

    /// Whether `now` is at or past the deadline, if one was set.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.deadline.is_some_and(|deadline| now >= deadline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_context_defaults_correlation_id_to_request_id() {
        let id = Uuid::now_v7();
        let ctx = OrchestrationContext::new("user-1", id, Utc::now());
        assert_eq!(ctx.correlation_id, id);
    }

    #[test]
    fn fresh_context_defaults_trace_id_to_request_id() {
        let id = Uuid::now_v7();
        let ctx = OrchestrationContext::new("user-1", id, Utc::now());
        assert_eq!(ctx.trace_id, id);
    }

    #[test]
    fn with_trace_id_joins_an_existing_trace() {
        let trace = Uuid::now_v7();
        let ctx = OrchestrationContext::new("user-1", Uuid::now_v7(), Utc::now()).with_trace_id(trace);
        assert_eq!(ctx.trace_id, trace);
    }

    #[test]
    fn with_versioning_stamps_the_resolved_record() {
        let versioning = Versioning::platform_default(Utc::now());
        let ctx = OrchestrationContext::new("user-1", Uuid::now_v7(), Utc::now()).with_versioning(versioning.clone());
        assert_eq!(ctx.versioning, versioning);
    }

    #[test]
    fn expiry_only_trips_once_deadline_is_set_and_past() {
        let now = Utc::now();
        let ctx = OrchestrationContext::new("user-1", Uuid::now_v7(), now);
        assert!(!ctx.is_expired(now));
        let ctx = ctx.with_deadline(now);
        assert!(ctx.is_expired(now));
    }

    #[test]
    fn flags_lookup() {
        let ctx = OrchestrationContext::new("user-1", Uuid::now_v7(), Utc::now())
            .with_feature_flags(BTreeSet::from(["new_checkout".to_string()]));
        assert!(ctx.has_flag("new_checkout"));
        assert!(!ctx.has_flag("other"));
    }
}
