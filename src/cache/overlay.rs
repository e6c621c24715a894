//! Response Cache Overlay
//!
//! Maps (operation, canonical payload) to the last successful envelope.
//! Used to skip upstream work; freshness is not guaranteed.
//!
//! Only `ok = true` envelopes are ever stored, and every hit comes back
//! marked with [`EnvelopeSource::Cache`].

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use tracing::debug;

use super::keys::ResponseCacheKey;
use crate::upstream::{Envelope, EnvelopeSource, GraphQlPayload};

/// Injected cache collaborator. Implementations synchronize internally.
pub trait ResponseCache: Send + Sync {
    fn get(&self, operation: &str, payload: &GraphQlPayload) -> Option<Envelope>;

    fn put(&self, operation: &str, payload: &GraphQlPayload, envelope: &Envelope);
}

// ============================================================================
// In-memory overlay
// ============================================================================

/// Stored envelope with its write time
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedEnvelope {
    pub key: String,
    pub saved_at: DateTime<Utc>,
    pub envelope: Envelope,
}

/// Overlay counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct OverlayStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub stores: u64,
}

impl OverlayStats {
    /// Calculate hit rate as percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

/// DashMap-backed overlay shared across requests
#[derive(Debug, Default)]
pub struct InMemoryResponseCache {
    entries: DashMap<String, CachedEnvelope>,
    last: RwLock<Option<CachedEnvelope>>,
    hits: AtomicU64,
    misses: AtomicU64,
    stores: AtomicU64,
}

impl InMemoryResponseCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recently stored envelope
    pub fn last(&self) -> Option<CachedEnvelope> {
        self.last.read().ok().and_then(|guard| guard.clone())
    }

    /// Drop every entry; returns how many were removed
    pub fn clear(&self) -> usize {
        let removed = self.entries.len();
        self.entries.clear();
        if let Ok(mut guard) = self.last.write() {
            *guard = None;
        }
        debug!(removed, "Response cache cleared");
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> OverlayStats {
        OverlayStats {
            entries: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stores: self.stores.load(Ordering::Relaxed),
        }
    }
}

impl ResponseCache for InMemoryResponseCache {
    fn get(&self, operation: &str, payload: &GraphQlPayload) -> Option<Envelope> {
        let key = ResponseCacheKey::new(operation, payload);
        match self.entries.get(&key.to_storage_key()) {
            Some(entry) if entry.envelope.ok => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "Response cache hit");
                Some(entry.envelope.clone().with_source(EnvelopeSource::Cache))
            }
            _ => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    fn put(&self, operation: &str, payload: &GraphQlPayload, envelope: &Envelope) {
        if !envelope.ok {
            return;
        }
        let key = ResponseCacheKey::new(operation, payload).to_storage_key();
        let entry = CachedEnvelope {
            key: key.clone(),
            saved_at: Utc::now(),
            envelope: envelope.clone().with_source(EnvelopeSource::Api),
        };
        if let Ok(mut guard) = self.last.write() {
            *guard = Some(entry.clone());
        }
        self.entries.insert(key, entry);
        self.stores.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::RequestRecord;
    use serde_json::{json, Map};
    use std::collections::BTreeMap;

    fn payload(farm: &str) -> GraphQlPayload {
        let mut vars = Map::new();
        vars.insert("farmUuids".into(), json!([farm]));
        GraphQlPayload::new("CombinedDataBase", "query {}", vars)
    }

    fn envelope(payload: &GraphQlPayload) -> Envelope {
        let request = RequestRecord {
            url: "https://example.test".into(),
            headers: BTreeMap::new(),
            payload: payload.clone(),
        };
        Envelope::success(request, json!({"fieldsV2": []}))
    }

    #[test]
    fn test_hit_is_marked_cache() {
        let cache = InMemoryResponseCache::new();
        let p = payload("f1");
        cache.put("CombinedDataBase", &p, &envelope(&p));

        let hit = cache.get("CombinedDataBase", &p).unwrap();
        assert_eq!(hit.source, EnvelopeSource::Cache);
        assert!(cache.get("CombinedDataBase", &payload("f2")).is_none());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hit_rate(), 50.0);
    }

    #[test]
    fn test_failed_envelope_not_stored() {
        let cache = InMemoryResponseCache::new();
        let p = payload("f1");
        let mut env = envelope(&p);
        env.ok = false;
        cache.put("CombinedDataBase", &p, &env);
        assert!(cache.is_empty());
        assert!(cache.last().is_none());
    }

    #[test]
    fn test_clear_and_last() {
        let cache = InMemoryResponseCache::new();
        let p1 = payload("f1");
        let p2 = payload("f2");
        cache.put("CombinedDataBase", &p1, &envelope(&p1));
        cache.put("CombinedDataBase", &p2, &envelope(&p2));

        let last = cache.last().unwrap();
        assert_eq!(last.envelope.request.payload, p2);

        assert_eq!(cache.clear(), 2);
        assert!(cache.last().is_none());
    }
}
