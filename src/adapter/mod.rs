/*!
 * Scope Cache Adapter
 * The narrow cache surface every other component depends on
 *
 * ## Surface
 * - `query`: serve a fresh entry or fetch through the permission source
 * - `extract_snapshot`: immutable point-in-time copy for compression passes
 * - `evict`: remove entries matching a selector
 * - `gc`: sweep expired entries
 * - `write_back`: install a compressed entry produced from a snapshot
 */

mod entry;
mod scope_cache;
mod source;

pub use entry::{CacheEntry, CacheSnapshot, EntryData, Selector};
pub use scope_cache::{CacheStats, ScopeCache};
pub use source::{PermissionSource, StaticPermissionSource};

use crate::core::errors::CacheError;
use crate::core::types::{CacheKey, PermissionValue};
use futures::future::BoxFuture;
use std::time::Duration;

/// Result type for cache reads
pub type CacheResult<T> = Result<T, CacheError>;

/// Description of one cache query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuerySpec {
    pub key: CacheKey,
    /// Overrides the adapter default TTL
    pub ttl: Option<Duration>,
    /// Skip the cache and refetch even if fresh
    pub force_refresh: bool,
}

impl QuerySpec {
    pub fn new(key: CacheKey) -> Self {
        Self {
            key,
            ttl: None,
            force_refresh: false,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn refresh(mut self) -> Self {
        self.force_refresh = true;
        self
    }
}

/// Cache adapter contract
pub trait ScopeCacheAdapter: Send + Sync {
    fn query(&self, spec: QuerySpec) -> BoxFuture<'_, CacheResult<PermissionValue>>;

    fn extract_snapshot(&self) -> CacheSnapshot;

    /// Remove matching entries, returning the evicted keys
    fn evict(&self, selector: &Selector) -> Vec<CacheKey>;

    /// Remove expired entries, returning how many were removed
    fn gc(&self) -> usize;

    /// Replace an entry taken from a snapshot.
    ///
    /// Only applies if the entry is still present with the same write stamp;
    /// returns false otherwise.
    fn write_back(&self, key: &CacheKey, entry: CacheEntry) -> bool;

    fn stats(&self) -> CacheStats;
}
