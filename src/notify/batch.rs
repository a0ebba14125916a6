/*!
 * Event Batching
 * Buffer keys and coalescing for noisy event types
 */

use super::events::{BatchSummary, EventType, PermissionEvent};
use crate::core::types::{PermissionName, UserId, WorkspaceId};
use std::collections::{BTreeSet, HashSet};
use uuid::Uuid;

/// Events sharing a key are buffered together
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BatchKey {
    pub event_type: EventType,
    pub user_id: UserId,
    pub workspace_id: Option<WorkspaceId>,
    pub permission: Option<PermissionName>,
}

impl BatchKey {
    pub fn of(event: &PermissionEvent) -> Self {
        Self {
            event_type: event.event_type(),
            user_id: event.user_id.clone(),
            workspace_id: event.workspace_id.clone(),
            permission: event.payload.permission().cloned(),
        }
    }
}

/// Collapse a buffer into one event.
///
/// A lone event is returned unchanged. Several become a summary built on the
/// latest event, carrying the batch size, every sub-kind seen and the union
/// of the cache keys in first-seen order.
pub fn coalesce(mut events: Vec<PermissionEvent>) -> Option<PermissionEvent> {
    if events.len() <= 1 {
        return events.pop();
    }

    let first_at = events.first()?.timestamp;
    let sub_kinds: BTreeSet<String> = events
        .iter()
        .map(|event| event.payload.sub_kind().to_string())
        .collect();
    let size = events.len();

    let mut seen = HashSet::new();
    let cache_keys: Vec<String> = events
        .iter()
        .flat_map(|event| event.payload.cache_keys())
        .filter(|key| seen.insert(*key))
        .cloned()
        .collect();

    let mut summary = events.pop()?;
    if let Some(keys) = summary.payload.cache_keys_mut() {
        *keys = cache_keys;
    }
    summary.id = Uuid::new_v4();
    summary.batch = Some(BatchSummary {
        size,
        sub_kinds,
        first_at,
        last_at: summary.timestamp,
    });
    Some(summary)
}
