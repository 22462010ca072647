#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **fabric-cache** – In-memory reference implementation of the [`Cache`]
//! collaborator contract.
//!
//! Not meant for production use across process boundaries — it exists so
//! the orchestration pipeline and its tests have a real, TTL-respecting
//! cache to write through without standing up an external service. A
//! production deployment swaps this crate for a Redis/Memcached-backed
//! implementation of the same trait.

use std::collections::HashMap;
use std::hash::Hasher;
use std::sync::Arc;
use std::time::Duration;

use fabric_collab::{Cache, CollabError, CollabResult};
use fnv::FnvHasher;
use serde_json::Value;
use tokio::sync::RwLock;
use tokio::time::Instant;

#[derive(Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        match self.expires_at {
            Some(deadline) => now < deadline,
            None => true,
        }
    }
}

/// In-memory cache keyed by `key -> field -> value`, matching the
/// collaborator contract's two-level addressing (§6).
#[derive(Clone, Default)]
pub struct MemoryCache {
    entries: Arc<RwLock<HashMap<String, HashMap<String, Entry>>>>,
}

impl MemoryCache {
    /// Construct an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys, for tests and diagnostics. Expired-but-not-yet-
    /// swept entries still count until the next access touches them.
    pub async fn key_count(&self) -> usize {
        self.entries.read().await.len()
    }
}

fn glob_matches(glob: &str, candidate: &str) -> bool {
    match glob.split_once('*') {
        None => glob == candidate,
        Some((prefix, suffix)) => {
            candidate.len() >= prefix.len() + suffix.len()
                && candidate.starts_with(prefix)
                && candidate.ends_with(suffix)
        }
    }
}

#[async_trait::async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str, field: &str) -> CollabResult<Option<Value>> {
        let now = Instant::now();
        let guard = self.entries.read().await;
        Ok(guard
            .get(key)
            .and_then(|fields| fields.get(field))
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, field: &str, value: Value, ttl: Duration) -> CollabResult<()> {
        let expires_at = if ttl.is_zero() { None } else { Some(Instant::now() + ttl) };
        let mut guard = self.entries.write().await;
        guard
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str, fields: &[&str]) -> CollabResult<()> {
        let mut guard = self.entries.write().await;
        if let Some(map) = guard.get_mut(key) {
            for field in fields {
                map.remove(*field);
            }
            if map.is_empty() {
                guard.remove(key);
            }
        }
        Ok(())
    }

    async fn delete_pattern(&self, glob: &str) -> CollabResult<()> {
        let mut guard = self.entries.write().await;
        guard.retain(|key, _| !glob_matches(glob, key));
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, field: &str, ttl: Duration) -> CollabResult<bool> {
        let now = Instant::now();
        let mut guard = self.entries.write().await;
        let fields = guard.entry(key.to_string()).or_default();
        if let Some(existing) = fields.get(field) {
            if existing.is_live(now) {
                return Ok(false);
            }
        }
        let expires_at = if ttl.is_zero() { None } else { Some(now + ttl) };
        fields.insert(
            field.to_string(),
            Entry {
                value: Value::Bool(true),
                expires_at,
            },
        );
        Ok(true)
    }
}

/// FNV-1a 32-bit hash of `(pattern, entity_type, limit)`, used to derive a
/// compact `search:<hash32>` cache key (§4.4). Non-cryptographic — chosen
/// purely for the small, fast keying this scheme needs.
pub fn search_key_hash(pattern: &str, entity_type: &str, limit: usize) -> u32 {
    let mut hasher = FnvHasher::default();
    hasher.write(pattern.as_bytes());
    hasher.write_u8(0);
    hasher.write(entity_type.as_bytes());
    hasher.write_u8(0);
    hasher.write_usize(limit);
    hasher.finish() as u32
}

/// A held distributed lock. Releases on drop so every exit path — success,
/// error, or panic unwind — gives the lock back (§4.4).
pub struct LockGuard {
    cache: MemoryCache,
    key: String,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let cache = self.cache.clone();
        let key = std::mem::take(&mut self.key);
        tokio::spawn(async move {
            let _ = cache.delete(&key, &["lock"]).await;
        });
    }
}

/// Acquire the distributed lock `<service>:<entity_type>:lock:<id>` with a
/// 10-second TTL (§4.4). Fails with [`CollabError::Locked`] if another
/// holder already has it.
pub async fn acquire_lock(cache: &MemoryCache, lock_key: &str) -> CollabResult<LockGuard> {
    const LOCK_TTL: Duration = Duration::from_secs(10);
    let acquired = cache.set_if_absent(lock_key, "lock", LOCK_TTL).await?;
    if !acquired {
        return Err(CollabError::Locked(lock_key.to_string()));
    }
    Ok(LockGuard {
        cache: cache.clone(),
        key: lock_key.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn set_then_get_roundtrips() {
        let cache = MemoryCache::new();
        cache.set("k1", "profile", json!({"name": "X"}), Duration::from_secs(60)).await.unwrap();
        let got = cache.get("k1", "profile").await.unwrap();
        assert_eq!(got, Some(json!({"name": "X"})));
    }

    #[tokio::test]
    async fn expired_entries_are_invisible() {
        tokio::time::pause();
        let cache = MemoryCache::new();
        cache.set("k1", "profile", json!(1), Duration::from_millis(10)).await.unwrap();
        tokio::time::advance(Duration::from_millis(20)).await;
        assert_eq!(cache.get("k1", "profile").await.unwrap(), None);
    }

    #[tokio::test]
    async fn delete_pattern_removes_matching_keys_only() {
        let cache = MemoryCache::new();
        cache.set("search:product_abc", "v", json!(1), Duration::from_secs(60)).await.unwrap();
        cache.set("search:talent_xyz", "v", json!(1), Duration::from_secs(60)).await.unwrap();
        cache.delete_pattern("search:product_*").await.unwrap();
        assert_eq!(cache.get("search:product_abc", "v").await.unwrap(), None);
        assert_eq!(cache.get("search:talent_xyz", "v").await.unwrap(), Some(json!(1)));
    }

    #[tokio::test]
    async fn concurrent_lock_acquisition_only_one_winner() {
        let cache = MemoryCache::new();
        let first = acquire_lock(&cache, "product:product:lock:p1").await;
        let second = acquire_lock(&cache, "product:product:lock:p1").await;
        assert!(first.is_ok());
        assert!(matches!(second, Err(CollabError::Locked(_))));
    }

    #[test]
    fn search_key_hash_is_deterministic() {
        let a = search_key_hash("acme", "product", 20);
        let b = search_key_hash("acme", "product", 20);
        let c = search_key_hash("acme", "product", 21);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
