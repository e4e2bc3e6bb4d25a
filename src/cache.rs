//! Time-bounded, size-bounded search result cache.
//!
//! Keyed by the normalized search tuple; shared across concurrent search
//! workers, so every read-prune-write sequence runs under one mutex.
//! Entries expire by TTL and the oldest-used entries are evicted beyond
//! the entry cap. Manual-mode results are never stored (callers enforce
//! that; the cache itself only refuses empty lists).

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use crate::config::ScraperConfig;
use crate::offer::FlightOffer;
use crate::query::{CabinClass, SearchQuery};

// Process-wide cache shared by default-constructed searchers.
static GLOBAL_CACHE: OnceLock<Arc<ResultCache>> = OnceLock::new();

/// Normalized cache key: identical parameters must collide regardless of
/// input casing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    origin: String,
    destination: String,
    departure_date: String,
    return_date: String,
    adults: u32,
    cabin: CabinClass,
    max_results: usize,
}

impl CacheKey {
    pub fn for_query(query: &SearchQuery) -> Self {
        Self {
            origin: query.origin.to_ascii_uppercase(),
            destination: query.destination.to_ascii_uppercase(),
            departure_date: query.departure_date.clone(),
            return_date: query.return_date.clone().unwrap_or_default(),
            adults: query.adults,
            cabin: query.cabin,
            max_results: query.max_results,
        }
    }
}

struct CacheEntry {
    stored_at: Instant,
    last_used: u64,
    offers: Vec<FlightOffer>,
}

struct CacheInner {
    entries: HashMap<CacheKey, CacheEntry>,
    tick: u64,
}

pub struct ResultCache {
    enabled: bool,
    ttl: Duration,
    max_entries: usize,
    inner: Mutex<CacheInner>,
}

impl ResultCache {
    pub fn new(enabled: bool, ttl: Duration, max_entries: usize) -> Self {
        Self {
            enabled,
            ttl,
            max_entries: max_entries.max(1),
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                tick: 0,
            }),
        }
    }

    pub fn from_config(config: &ScraperConfig) -> Self {
        Self::new(
            config.enable_search_cache,
            config.cache_ttl(),
            config.cache_max_entries,
        )
    }

    /// Process-wide instance used by default-constructed searchers.
    pub fn global() -> Arc<ResultCache> {
        GLOBAL_CACHE
            .get_or_init(|| Arc::new(ResultCache::from_config(&ScraperConfig::default())))
            .clone()
    }

    /// Fetch a live entry. Returns `None` when bypassed (`force_refresh`),
    /// disabled, absent, or expired; expired entries are evicted on read.
    pub fn get(&self, key: &CacheKey, force_refresh: bool) -> Option<Vec<FlightOffer>> {
        if force_refresh || !self.enabled {
            return None;
        }
        let now = Instant::now();
        let mut inner = self.inner.lock();
        Self::prune_expired(&mut inner, now, self.ttl);

        let expired = match inner.entries.get(key) {
            Some(entry) => now.duration_since(entry.stored_at) > self.ttl,
            None => return None,
        };
        if expired {
            inner.entries.remove(key);
            return None;
        }

        inner.tick += 1;
        let tick = inner.tick;
        let mut offers = match inner.entries.get_mut(key) {
            Some(entry) => {
                entry.last_used = tick;
                entry.offers.clone()
            }
            None => return None,
        };
        drop(inner);

        offers.sort_by_key(FlightOffer::price_key);
        Some(offers)
    }

    /// Store offers for a key, refreshing recency; no-ops on empty lists.
    pub fn put(&self, key: CacheKey, offers: &[FlightOffer]) {
        if !self.enabled || offers.is_empty() {
            return;
        }
        let now = Instant::now();
        let mut inner = self.inner.lock();
        Self::prune_expired(&mut inner, now, self.ttl);
        inner.tick += 1;
        let tick = inner.tick;
        inner.entries.insert(
            key,
            CacheEntry {
                stored_at: now,
                last_used: tick,
                offers: offers.to_vec(),
            },
        );
        Self::prune_lru(&mut inner, self.max_entries);
    }

    pub fn clear(&self) {
        self.inner.lock().entries.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn prune_expired(inner: &mut CacheInner, now: Instant, ttl: Duration) {
        inner
            .entries
            .retain(|_, entry| now.duration_since(entry.stored_at) <= ttl);
    }

    fn prune_lru(inner: &mut CacheInner, max_entries: usize) {
        while inner.entries.len() > max_entries {
            let oldest = inner
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(key, _)| key.clone());
            match oldest {
                Some(key) => {
                    inner.entries.remove(&key);
                }
                None => break,
            }
        }
    }
}
