/*!
 * Cache Entries
 * Stored facts, point-in-time snapshots and eviction selectors
 */

use crate::compression::CompressedPayload;
use crate::core::limits::CACHE_ENTRY_OVERHEAD_BYTES;
use crate::core::types::{CacheKey, PermissionValue, QueryKind, UserId, WorkspaceId};
use std::time::Duration;
use tokio::time::Instant;

/// Stored representation of a cached value
#[derive(Debug, Clone, PartialEq)]
pub enum EntryData {
    Plain(PermissionValue),
    Compressed(CompressedPayload),
}

/// One cached authorization fact
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub data: EntryData,
    /// Write stamp; compression write-backs must match it
    pub written_at: Instant,
    pub ttl: Duration,
    pub original_size: usize,
    pub compressed_size: Option<usize>,
    pub access_count: u64,
}

impl CacheEntry {
    pub fn new(value: PermissionValue, ttl: Duration) -> Self {
        let original_size = value.estimated_size();
        Self {
            data: EntryData::Plain(value),
            written_at: Instant::now(),
            ttl,
            original_size,
            compressed_size: None,
            access_count: 0,
        }
    }

    /// Servable only while `now - written_at < ttl`
    #[inline]
    pub fn is_fresh(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.written_at) < self.ttl
    }

    #[inline]
    pub fn is_compressed(&self) -> bool {
        matches!(self.data, EntryData::Compressed(_))
    }

    /// Bytes currently held by this entry, including bookkeeping
    pub fn size(&self) -> usize {
        self.compressed_size.unwrap_or(self.original_size) + CACHE_ENTRY_OVERHEAD_BYTES
    }

    /// Same entry with its payload replaced by a compressed one
    pub fn into_compressed(self, payload: CompressedPayload) -> Self {
        let compressed_size = payload.compressed_size;
        Self {
            data: EntryData::Compressed(payload),
            compressed_size: Some(compressed_size),
            ..self
        }
    }
}

/// Immutable point-in-time copy of the cache
#[derive(Debug, Clone)]
pub struct CacheSnapshot {
    pub taken_at: Instant,
    pub entries: Vec<(CacheKey, CacheEntry)>,
}

impl CacheSnapshot {
    pub fn total_bytes(&self) -> usize {
        self.entries.iter().map(|(_, entry)| entry.size()).sum()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn compressed_count(&self) -> usize {
        self.entries.iter().filter(|(_, e)| e.is_compressed()).count()
    }

    pub fn get(&self, key: &CacheKey) -> Option<&CacheEntry> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, entry)| entry)
    }
}

/// Which entries an eviction targets
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// Every permission-scoped entry
    All,
    /// Every entry of one user
    User(UserId),
    /// Entries of one user scoped to one workspace
    Workspace {
        user_id: UserId,
        workspace_id: WorkspaceId,
    },
    Exact(CacheKey),
    Kind(QueryKind),
}

impl Selector {
    pub fn matches(&self, key: &CacheKey) -> bool {
        match self {
            Self::All => true,
            Self::User(user_id) => key.is_user(user_id),
            Self::Workspace {
                user_id,
                workspace_id,
            } => key.is_workspace(user_id, workspace_id),
            Self::Exact(exact) => exact == key,
            Self::Kind(kind) => key.kind() == *kind,
        }
    }
}
