/*!
 * Scope Cache
 * In-memory adapter with TTL, transparent decompression and hit/miss tracking
 *
 * Fetches for one key are serialized through a per-key slot: a caller that
 * waited behind an in-flight fetch re-reads the cache instead of fetching
 * again. Evictions bump the slot epoch of matching in-flight keys, and a
 * fetch whose epoch moved returns its value without caching it.
 */

use super::entry::{CacheEntry, CacheSnapshot, Selector};
use super::source::PermissionSource;
use super::{CacheResult, QuerySpec, ScopeCacheAdapter};
use crate::compression::decompress_entry;
use crate::core::errors::CacheError;
use crate::core::limits::DEFAULT_PERMISSION_TTL;
use crate::core::types::{CacheKey, PermissionValue};
use ahash::RandomState;
use dashmap::DashMap;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheStats {
    pub size: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

/// Fetch coordination for one key
#[derive(Default)]
struct FetchSlot {
    serial: tokio::sync::Mutex<()>,
    /// Bumped by every eviction matching the key
    epoch: Mutex<u64>,
}

/// Holds a slot for the duration of one query; drops the slot once unused
struct SlotLease<'a> {
    fetches: &'a DashMap<CacheKey, Arc<FetchSlot>, RandomState>,
    key: CacheKey,
    slot: Arc<FetchSlot>,
}

impl Drop for SlotLease<'_> {
    fn drop(&mut self) {
        // Map and this lease are the only holders
        self.fetches
            .remove_if(&self.key, |_, slot| Arc::strong_count(slot) == 2);
    }
}

/// Permission cache keyed by scope
pub struct ScopeCache {
    entries: DashMap<CacheKey, CacheEntry, RandomState>,
    fetches: DashMap<CacheKey, Arc<FetchSlot>, RandomState>,
    source: Arc<dyn PermissionSource>,
    default_ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ScopeCache {
    pub fn new(source: Arc<dyn PermissionSource>) -> Self {
        Self::with_ttl(source, DEFAULT_PERMISSION_TTL)
    }

    pub fn with_ttl(source: Arc<dyn PermissionSource>, default_ttl: Duration) -> Self {
        Self {
            entries: DashMap::with_hasher(RandomState::new()),
            fetches: DashMap::with_hasher(RandomState::new()),
            source,
            default_ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Keys with a query in flight or waiting
    pub fn in_flight(&self) -> usize {
        self.fetches.len()
    }

    fn lease(&self, key: &CacheKey) -> SlotLease<'_> {
        let slot = self
            .fetches
            .entry(key.clone())
            .or_insert_with(|| Arc::new(FetchSlot::default()))
            .value()
            .clone();
        SlotLease {
            fetches: &self.fetches,
            key: key.clone(),
            slot,
        }
    }

    /// Fresh cached value, if any
    fn read_fresh(&self, key: &CacheKey) -> Option<PermissionValue> {
        let mut entry = self.entries.get_mut(key)?;
        if !entry.is_fresh(Instant::now()) {
            return None;
        }
        match decompress_entry(&mut entry) {
            Ok(value) => Some(value),
            Err(e) => {
                drop(entry);
                warn!(key = %key, error = %e, "Dropping unreadable cache entry");
                self.entries.remove(key);
                None
            }
        }
    }
}

impl ScopeCacheAdapter for ScopeCache {
    fn query(&self, spec: QuerySpec) -> BoxFuture<'_, CacheResult<PermissionValue>> {
        if !spec.force_refresh {
            if let Some(value) = self.read_fresh(&spec.key) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return futures::future::ready(Ok(value)).boxed();
            }
        }
        let ttl = spec.ttl.unwrap_or(self.default_ttl);
        let key = spec.key;
        let force_refresh = spec.force_refresh;
        async move {
            let lease = self.lease(&key);
            let _serial = lease.slot.serial.lock().await;

            if !force_refresh {
                if let Some(value) = self.read_fresh(&key) {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    debug!(key = %key, "Served by concurrent fetch");
                    return Ok(value);
                }
            }
            self.misses.fetch_add(1, Ordering::Relaxed);

            let epoch = *lease.slot.epoch.lock();
            let value = self
                .source
                .fetch(&key)
                .await
                .map_err(|source| CacheError::Fetch {
                    key: key.to_string(),
                    source,
                })?;

            let current = lease.slot.epoch.lock();
            if *current == epoch {
                self.entries.insert(key.clone(), CacheEntry::new(value.clone(), ttl));
                debug!(key = %key, "Cached permission fact");
            } else {
                debug!(key = %key, "Scope evicted during fetch, result not cached");
            }
            drop(current);
            Ok(value)
        }
        .boxed()
    }

    fn extract_snapshot(&self) -> CacheSnapshot {
        CacheSnapshot {
            taken_at: Instant::now(),
            entries: self
                .entries
                .iter()
                .map(|item| (item.key().clone(), item.value().clone()))
                .collect(),
        }
    }

    fn evict(&self, selector: &Selector) -> Vec<CacheKey> {
        // Epochs before entries: an in-flight insert is either skipped or retained away
        for slot in self.fetches.iter().filter(|slot| selector.matches(slot.key())) {
            *slot.value().epoch.lock() += 1;
        }

        let mut evicted = Vec::new();
        self.entries.retain(|key, _| {
            if selector.matches(key) {
                evicted.push(key.clone());
                false
            } else {
                true
            }
        });
        evicted.sort();
        evicted
    }

    fn gc(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_fresh(now));
        before.saturating_sub(self.entries.len())
    }

    fn write_back(&self, key: &CacheKey, entry: CacheEntry) -> bool {
        match self.entries.get_mut(key) {
            Some(mut current) if current.written_at == entry.written_at => {
                *current = entry;
                true
            }
            _ => false,
        }
    }

    fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            (hits as f64 / total as f64) * 100.0
        } else {
            0.0
        };

        CacheStats {
            size: self.entries.len(),
            hits,
            misses,
            hit_rate,
        }
    }
}
