#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **fabric-normalize** – Pure metadata normalization (§4.2).
//!
//! `normalize` performs no I/O and reads the clock nowhere except through
//! its `now` argument, which callers supply so the function stays
//! deterministic and trivially unit-testable. It never aliases its input:
//! every call returns an owned, independent `Metadata`.

use chrono::{DateTime, Utc};
use fabric_types::metadata::{AuditTrail, Lineage, MetadataError};
use fabric_types::{saturating_i32, EntityId, Metadata};
use sha2::{Digest, Sha256};

/// Failure modes for normalization (§4.2 "Failure modes"). Only
/// structurally invalid input fails; everything else is filled with
/// defaults.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum NormalizeError {
    /// A `service_specific` subtree was present but not a JSON object.
    #[error(transparent)]
    Malformed(#[from] MetadataError),
}

/// The caller-supplied inputs to one normalization pass (§4.2 signature).
pub struct NormalizeInput<'a> {
    /// Entity the metadata is attached to, if known.
    pub entity_id: Option<&'a EntityId>,
    /// New `lineage.prev_id`.
    pub prev_id: Option<String>,
    /// New `lineage.next_id`.
    pub next_id: Option<String>,
    /// New `lineage.related_ids`, replacing the prior list wholesale.
    pub related_ids: Vec<String>,
    /// Short status tag driving the audit history entry (`"created"`,
    /// `"updated"`, or any other status paired with `message`).
    pub status: Option<String>,
    /// Human-readable message paired with `status` in the history entry.
    pub message: Option<String>,
    /// Principal performing this operation, used for `audit.last_modified_by`
    /// and to seed `audit.created_by` on first normalization.
    pub principal: &'a str,
    /// Clock reading supplied by the caller (§9 "Normalization purity").
    pub now: DateTime<Utc>,
}

/// Normalize `metadata` per the seven-step algorithm in §4.2. Idempotent:
/// calling this twice on its own output with the same non-timestamp inputs
/// yields byte-identical results.
pub fn normalize(metadata: &Metadata, input: NormalizeInput<'_>) -> Result<Metadata, NormalizeError> {
    let _entity_id = input.entity_id;
    let mut out = metadata.clone();

    // Step 1: fill versioning defaults if missing or incomplete.
    if out.versioning.needs_defaults() {
        out.versioning = fabric_types::metadata::Versioning::platform_default(input.now);
    }

    // Step 2: audit trail — initialize on first touch, otherwise append.
    let is_fresh = out.audit.created_by.is_empty() && out.audit.history.is_empty();
    if is_fresh {
        out.audit = AuditTrail::created(input.principal);
    } else {
        out.audit.last_modified_by = input.principal.to_string();
        let entry = match (input.status.as_deref(), input.message.as_deref()) {
            (Some("created"), _) | (None, None) => "created".to_string(),
            (Some("updated"), None) => "updated".to_string(),
            (Some(status), Some(message)) => format!("{status}: {message}"),
            (Some(status), None) => status.to_string(),
            (None, Some(message)) => format!("updated: {message}"),
        };
        out.audit.push_history(entry);
    }

    // Step 3: ensure declared service namespaces have typed-empty minimal
    // fields, without overwriting anything already present.
    for subtree in out.service_specific.values_mut() {
        let Some(object) = subtree.as_object_mut() else {
            return Err(NormalizeError::Malformed(MetadataError::ServiceNamespaceNotAnObject(
                "<unnamed>".to_string(),
            )));
        };
        object.entry("tags").or_insert_with(|| serde_json::Value::Array(Vec::new()));
    }
    out.validate()?;

    // Step 4: lineage is replaced wholesale, never merged.
    out.lineage = Lineage {
        prev_id: input.prev_id,
        next_id: input.next_id,
        related_ids: input.related_ids,
    };

    // Step 5: recompute documented derived fields — product pricing discount.
    recompute_product_discount(&mut out);

    // Step 6: clamp integer-typed fields to their declared widths.
    out.bad_actor.flag_count = saturating_i32(out.bad_actor.flag_count as i64);

    // Step 7: canonical JSON, SHA-256, write content_hash.
    out.content_hash = content_hash(&out);

    Ok(out)
}

/// `product.pricing.discount = 100 * (msrp - current_price) / msrp`, the
/// one documented derived relation in §4.2 step 5.
fn recompute_product_discount(metadata: &mut Metadata) {
    let Some(product) = metadata.service_specific.get_mut("product") else {
        return;
    };
    let Some(pricing) = product.get_mut("pricing").and_then(|p| p.as_object_mut()) else {
        return;
    };
    let msrp = pricing.get("msrp").and_then(|v| v.as_f64());
    let current_price = pricing.get("current_price").and_then(|v| v.as_f64());
    if let (Some(msrp), Some(current_price)) = (msrp, current_price) {
        if msrp != 0.0 {
            let discount = 100.0 * (msrp - current_price) / msrp;
            pricing.insert("discount".to_string(), serde_json::json!(discount));
        }
    }
}

/// SHA-256 of the canonical JSON serialization of every field except
/// `content_hash` itself (§3, §4.2 step 7). Canonical here means: object
/// keys sorted lexicographically (guaranteed by `serde_json`'s default
/// `BTreeMap`-backed `Map`, i.e. without the `preserve_order` feature) and
/// no extraneous whitespace.
pub fn content_hash(metadata: &Metadata) -> String {
    let mut for_hash = metadata.clone();
    for_hash.content_hash = String::new();
    let bytes = serde_json::to_vec(&for_hash).expect("Metadata always serializes");
    let digest = Sha256::digest(&bytes);
    hex_encode(&digest)
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        s.push_str(&format!("{byte:02x}"));
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use fabric_types::metadata::BadActor;
    use proptest::prelude::*;
    use serde_json::json;

    fn input(now: DateTime<Utc>) -> NormalizeInput<'static> {
        NormalizeInput {
            entity_id: None,
            prev_id: None,
            next_id: None,
            related_ids: Vec::new(),
            status: Some("created"),
            message: None,
            principal: "u1",
            now,
        }
    }

    #[test]
    fn normalize_is_idempotent() {
        let now = Utc::now();
        let fresh = Metadata::new("u1", now);
        let once = normalize(&fresh, input(now)).unwrap();
        let twice = normalize(&once, input(now)).unwrap();
        assert_eq!(serde_json::to_string(&once).unwrap(), serde_json::to_string(&twice).unwrap());
    }

    #[test]
    fn fresh_metadata_gets_created_history_once() {
        let now = Utc::now();
        let fresh = Metadata::new("u1", now);
        let normalized = normalize(&fresh, input(now)).unwrap();
        assert_eq!(normalized.audit.history, vec!["created".to_string()]);
        assert_eq!(normalized.audit.created_by, "u1");
    }

    #[test]
    fn second_normalization_appends_status_message_entry() {
        let now = Utc::now();
        let fresh = Metadata::new("u1", now);
        let created = normalize(&fresh, input(now)).unwrap();
        let mut second_input = input(now);
        second_input.status = Some("price_changed");
        second_input.message = Some("msrp lowered");
        let updated = normalize(&created, second_input).unwrap();
        assert_eq!(
            updated.audit.history,
            vec!["created".to_string(), "price_changed: msrp lowered".to_string()]
        );
    }

    #[test]
    fn lineage_replaces_rather_than_merges() {
        let now = Utc::now();
        let mut fresh = Metadata::new("u1", now);
        fresh.lineage.related_ids = vec!["a".to_string(), "b".to_string()];
        let mut second_input = input(now);
        second_input.related_ids = vec!["c".to_string()];
        let updated = normalize(&fresh, second_input).unwrap();
        assert_eq!(updated.lineage.related_ids, vec!["c".to_string()]);
    }

    #[test]
    fn product_discount_is_recomputed_from_pricing() {
        let now = Utc::now();
        let mut fresh = Metadata::new("u1", now);
        fresh
            .service_specific
            .insert("product".into(), json!({"pricing": {"msrp": 100.0, "current_price": 75.0}}));
        let normalized = normalize(&fresh, input(now)).unwrap();
        let discount = normalized.service_specific["product"]["pricing"]["discount"].as_f64().unwrap();
        assert!((discount - 25.0).abs() < 1e-9);
    }

    #[test]
    fn bad_actor_flag_count_saturates_during_normalization() {
        let now = Utc::now();
        let mut fresh = Metadata::new("u1", now);
        fresh.bad_actor = BadActor { flag_count: i32::MAX, last_flagged_at: None };
        let normalized = normalize(&fresh, input(now)).unwrap();
        assert_eq!(normalized.bad_actor.flag_count, i32::MAX);
    }

    #[test]
    fn non_object_service_namespace_is_rejected() {
        let now = Utc::now();
        let mut fresh = Metadata::new("u1", now);
        fresh.service_specific.insert("product".into(), json!("not an object"));
        assert!(normalize(&fresh, input(now)).is_err());
    }

    proptest! {
        #[test]
        fn content_hash_depends_only_on_normalized_content(tag in "[a-z]{1,8}") {
            let now = Utc::now();
            let mut fresh = Metadata::new("u1", now);
            fresh.tags.insert(tag);
            let normalized_a = normalize(&fresh, input(now)).unwrap();
            let normalized_b = normalize(&fresh, input(now)).unwrap();
            prop_assert_eq!(content_hash(&normalized_a), content_hash(&normalized_b));
        }
    }
}
