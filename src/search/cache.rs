//! TTL + capacity bounded cache for search results.
//!
//! Keys are `(source, language, normalized query)` so results never leak
//! across document origins or language hints. Error responses are cached
//! too (negative caching) to keep a failing upstream from being hammered.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::debug;

use super::{SearchResponse, normalize_query};

/// Cache key scoping a query to a source and language hint.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    source: String,
    language: String,
    query: String,
}

impl CacheKey {
    /// Builds a key with the query normalized for stable lookups.
    pub fn new(source: &str, language: &str, query: &str) -> Self {
        Self {
            source: source.to_string(),
            language: language.to_string(),
            query: normalize_query(query),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

struct CacheSlot {
    inserted_at: Instant,
    response: SearchResponse,
}

/// Concurrent TTL cache with one-pass oldest-10% eviction at capacity.
pub struct SearchCache {
    ttl: Duration,
    capacity: usize,
    slots: Mutex<FxHashMap<CacheKey, CacheSlot>>,
}

impl SearchCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity: capacity.max(1),
            slots: Mutex::new(FxHashMap::default()),
        }
    }

    /// Returns the cached response, lazily purging it when expired.
    pub fn get(&self, key: &CacheKey) -> Option<SearchResponse> {
        let mut slots = self.slots.lock();
        let expired = match slots.get(key) {
            Some(slot) => slot.inserted_at.elapsed() > self.ttl,
            None => return None,
        };
        if expired {
            slots.remove(key);
            return None;
        }
        slots.get(key).map(|slot| slot.response.clone())
    }

    /// Inserts a response, evicting the oldest ~10% of entries first when
    /// the cache is at or over capacity.
    pub fn set(&self, key: CacheKey, response: SearchResponse) {
        let mut slots = self.slots.lock();
        if slots.len() >= self.capacity {
            let evict = (self.capacity / 10).max(1);
            let mut by_age: Vec<(Instant, CacheKey)> = slots
                .iter()
                .map(|(key, slot)| (slot.inserted_at, key.clone()))
                .collect();
            by_age.sort_by_key(|(inserted_at, _)| *inserted_at);
            for (_, stale) in by_age.into_iter().take(evict) {
                slots.remove(&stale);
            }
            debug!(evicted = evict, "search cache at capacity");
        }
        slots.insert(
            key,
            CacheSlot {
                inserted_at: Instant::now(),
                response,
            },
        );
    }

    /// Drops every entry scoped to `source`; returns how many were removed.
    pub fn invalidate_source(&self, source: &str) -> usize {
        let mut slots = self.slots.lock();
        let before = slots.len();
        slots.retain(|key, _| key.source != source);
        before - slots.len()
    }

    pub fn clear(&self) {
        self.slots.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }
}
