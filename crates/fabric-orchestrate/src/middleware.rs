use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use fabric_collab::FeatureFlagEvaluator;
use fabric_types::metadata::{AbTestGroup, MetadataError, Versioning};
use fabric_types::OrchestrationContext;
use fnv::FnvHasher;
use std::hash::Hasher;
use uuid::Uuid;

/// Failure modes for the versioning middleware (§4.5). Every variant maps
/// to a `400`-equivalent transport response at the edge.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MiddlewareError {
    /// The resolved versioning record failed its semver/environment invariants.
    #[error("invalid versioning record: {0}")]
    InvalidVersioning(#[from] MetadataError),
    /// The collaborator returned a cohort string outside the fixed enum.
    #[error("unrecognized A/B test group: {0:?}")]
    UnrecognizedCohort(String),
    /// The upstream request carried no resolvable principal.
    #[error("missing principal")]
    MissingPrincipal,
}

/// Parse a cohort string against the fixed `AbTestGroup` set, matching the
/// `snake_case` wire form used by its `Serialize` impl (§3).
fn parse_ab_test_group(raw: &str) -> Option<AbTestGroup> {
    match raw {
        "control" => Some(AbTestGroup::Control),
        "variant_a" => Some(AbTestGroup::VariantA),
        "variant_b" => Some(AbTestGroup::VariantB),
        "variant_c" => Some(AbTestGroup::VariantC),
        _ => None,
    }
}

/// Context-carrier and versioning middleware (§4.5). Runs once at request
/// entry: extracts the principal, resolves feature flags and A/B cohort via
/// the feature-flag evaluator collaborator, validates the resulting
/// versioning record, and hands back a ready-to-use context.
pub struct VersioningMiddleware {
    evaluator: Arc<dyn FeatureFlagEvaluator>,
    system_version: String,
    service_version: String,
    environment: String,
}

impl VersioningMiddleware {
    /// Build a middleware instance. `system_version`/`service_version`/
    /// `environment` seed the versioning record every request is stamped
    /// with; `evaluator` resolves flags and cohort per principal.
    pub fn new(
        evaluator: Arc<dyn FeatureFlagEvaluator>,
        system_version: impl Into<String>,
        service_version: impl Into<String>,
        environment: impl Into<String>,
    ) -> Self {
        Self {
            evaluator,
            system_version: system_version.into(),
            service_version: service_version.into(),
            environment: environment.into(),
        }
    }

    /// Run the middleware for an incoming request, producing a fresh
    /// `OrchestrationContext` and the validated `Versioning` record to stamp
    /// onto whatever metadata the request touches.
    pub async fn handle(&self, principal: &str, request_id: Uuid, now: DateTime<Utc>) -> Result<(OrchestrationContext, Versioning), MiddlewareError> {
        if principal.is_empty() {
            return Err(MiddlewareError::MissingPrincipal);
        }

        let flags: BTreeSet<String> = self
            .evaluator
            .evaluate_flags(principal)
            .await
            .unwrap_or_default()
            .into_iter()
            .collect();

        let cohort_raw = self.evaluator.assign_ab_test(principal).await.unwrap_or_default();
        let cohort = if cohort_raw.is_empty() {
            None
        } else {
            Some(parse_ab_test_group(&cohort_raw).ok_or(MiddlewareError::UnrecognizedCohort(cohort_raw))?)
        };

        let versioning = Versioning {
            system_version: self.system_version.clone(),
            service_version: self.service_version.clone(),
            entity_versions: Default::default(),
            environment: self.environment.clone(),
            last_migrated_at: now,
        };
        versioning.validate()?;

        let mut context = OrchestrationContext::new(principal, request_id, now)
            .with_feature_flags(flags)
            .with_versioning(versioning.clone());
        if let Some(cohort) = cohort {
            context = context.with_ab_test_group(cohort);
        }

        Ok((context, versioning))
    }
}

/// Reference `FeatureFlagEvaluator` for demos and tests: deterministically
/// assigns an A/B cohort via FNV-1a of the user id modulo the cohort count
/// (§4.5 "FNV or CRC32 of user ID mod group count"). Flags are always empty —
/// a real deployment supplies its own flag source.
pub struct DeterministicFlagEvaluator;

#[async_trait::async_trait]
impl FeatureFlagEvaluator for DeterministicFlagEvaluator {
    async fn evaluate_flags(&self, _user_id: &str) -> fabric_collab::CollabResult<Vec<String>> {
        Ok(Vec::new())
    }

    async fn assign_ab_test(&self, user_id: &str) -> fabric_collab::CollabResult<String> {
        let mut hasher = FnvHasher::default();
        hasher.write(user_id.as_bytes());
        let index = (hasher.finish() as usize) % AbTestGroup::ALL.len();
        let group = AbTestGroup::ALL[index];
        Ok(serde_json::to_value(group)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| "control".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn deterministic_evaluator_assigns_the_same_cohort_every_time() {
        let evaluator = DeterministicFlagEvaluator;
        let first = evaluator.assign_ab_test("user-42").await.unwrap();
        let second = evaluator.assign_ab_test("user-42").await.unwrap();
        assert_eq!(first, second);
        assert!(parse_ab_test_group(&first).is_some());
    }

    #[tokio::test]
    async fn middleware_stamps_a_valid_versioning_record() {
        let middleware = VersioningMiddleware::new(Arc::new(DeterministicFlagEvaluator), "1.2.0", "3.4.0", "prod");
        let (context, versioning) = middleware.handle("user-1", Uuid::now_v7(), Utc::now()).await.unwrap();
        assert!(versioning.validate().is_ok());
        assert_eq!(context.principal, "user-1");
        assert!(context.ab_test_group.is_some());
        assert_eq!(context.versioning, versioning);
    }

    #[tokio::test]
    async fn middleware_rejects_empty_principal() {
        let middleware = VersioningMiddleware::new(Arc::new(DeterministicFlagEvaluator), "1.2.0", "3.4.0", "prod");
        let result = middleware.handle("", Uuid::now_v7(), Utc::now()).await;
        assert_eq!(result.unwrap_err(), MiddlewareError::MissingPrincipal);
    }

    #[tokio::test]
    async fn middleware_rejects_invalid_environment() {
        let middleware = VersioningMiddleware::new(Arc::new(DeterministicFlagEvaluator), "1.2.0", "3.4.0", "");
        let result = middleware.handle("user-1", Uuid::now_v7(), Utc::now()).await;
        assert!(matches!(result, Err(MiddlewareError::InvalidVersioning(_))));
    }
}
