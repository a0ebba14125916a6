/*!
 * Preload Registry
 * In-flight request table that deduplicates and bounds preloads
 *
 * Registration is synchronous. A successful registration yields a
 * `PreloadGuard` whose drop removes the entry, so completion, failure,
 * timeout and cancellation all release the slot.
 */

use crate::core::types::{CacheKey, QueryKind};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use ahash::AHashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreloadPriority {
    High,
    Medium,
    Low,
}

/// What asked for a preload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreloadSource {
    Hover,
    Focus,
    Navigation,
    Prediction,
    Initialization,
}

impl fmt::Display for PreloadSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Hover => "hover",
            Self::Focus => "focus",
            Self::Navigation => "navigation",
            Self::Prediction => "prediction",
            Self::Initialization => "initialization",
        };
        f.write_str(name)
    }
}

/// In-flight preload record
#[derive(Debug, Clone)]
pub struct PreloadRequest {
    pub id: u64,
    pub kind: QueryKind,
    pub key: CacheKey,
    pub priority: PreloadPriority,
    pub source: PreloadSource,
    pub started_at: Instant,
}

/// Why a preload was not started
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreloadRejection {
    /// Same key already in flight
    Duplicate,
    /// Concurrency ceiling reached
    CapacityReached,
}

pub struct PreloadRegistry {
    inflight: Mutex<AHashMap<CacheKey, PreloadRequest>>,
    ceiling: usize,
    next_id: AtomicU64,
    peak: AtomicUsize,
}

impl PreloadRegistry {
    pub fn new(ceiling: usize) -> Self {
        Self {
            inflight: Mutex::new(AHashMap::new()),
            ceiling,
            next_id: AtomicU64::new(1),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    /// Claim the slot for `key`
    pub fn try_register(
        self: &Arc<Self>,
        key: CacheKey,
        priority: PreloadPriority,
        source: PreloadSource,
    ) -> Result<PreloadGuard, PreloadRejection> {
        let mut inflight = self.inflight.lock();
        if inflight.contains_key(&key) {
            return Err(PreloadRejection::Duplicate);
        }
        if inflight.len() >= self.ceiling {
            return Err(PreloadRejection::CapacityReached);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        inflight.insert(
            key.clone(),
            PreloadRequest {
                id,
                kind: key.kind(),
                key: key.clone(),
                priority,
                source,
                started_at: Instant::now(),
            },
        );
        self.peak.fetch_max(inflight.len(), Ordering::Relaxed);

        Ok(PreloadGuard {
            registry: Arc::clone(self),
            key,
            id,
        })
    }

    pub fn in_flight(&self) -> usize {
        self.inflight.lock().len()
    }

    /// Highest simultaneous in-flight count observed
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::Relaxed)
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.inflight.lock().contains_key(key)
    }

    /// Snapshot of in-flight requests, oldest first
    pub fn requests(&self) -> Vec<PreloadRequest> {
        let mut requests: Vec<PreloadRequest> = self.inflight.lock().values().cloned().collect();
        requests.sort_by_key(|r| r.id);
        requests
    }

    fn release(&self, key: &CacheKey, id: u64) {
        let mut inflight = self.inflight.lock();
        if inflight.get(key).is_some_and(|r| r.id == id) {
            inflight.remove(key);
        }
    }
}

/// Holds a registry slot until dropped
pub struct PreloadGuard {
    registry: Arc<PreloadRegistry>,
    key: CacheKey,
    id: u64,
}

impl PreloadGuard {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }
}

impl Drop for PreloadGuard {
    fn drop(&mut self) {
        self.registry.release(&self.key, self.id);
    }
}
