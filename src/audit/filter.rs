/*!
 * Audit Filters
 * AND-combined entry selection with sorting and paging
 */

use super::entry::AuditLogEntry;
use crate::core::types::{UserId, WorkspaceId};
use crate::notify::{EventType, LogLevel};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::time::SystemTime;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortBy {
    #[default]
    Timestamp,
    Level,
    EventType,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

/// Entry query; every set field must match
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditFilter {
    pub user_id: Option<UserId>,
    pub workspace_id: Option<WorkspaceId>,
    /// Empty matches every type
    pub event_types: BTreeSet<EventType>,
    pub level: Option<LogLevel>,
    /// Inclusive lower bound on the event timestamp
    pub since: Option<SystemTime>,
    /// Inclusive upper bound on the event timestamp
    pub until: Option<SystemTime>,
    pub sort_by: SortBy,
    pub sort_order: SortOrder,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl AuditFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user(mut self, user_id: impl Into<UserId>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn workspace(mut self, workspace_id: impl Into<WorkspaceId>) -> Self {
        self.workspace_id = Some(workspace_id.into());
        self
    }

    pub fn event_type(mut self, event_type: EventType) -> Self {
        self.event_types.insert(event_type);
        self
    }

    pub fn event_types(mut self, event_types: impl IntoIterator<Item = EventType>) -> Self {
        self.event_types.extend(event_types);
        self
    }

    pub fn level(mut self, level: LogLevel) -> Self {
        self.level = Some(level);
        self
    }

    pub fn time_range(mut self, since: Option<SystemTime>, until: Option<SystemTime>) -> Self {
        self.since = since;
        self.until = until;
        self
    }

    pub fn sort(mut self, sort_by: SortBy, sort_order: SortOrder) -> Self {
        self.sort_by = sort_by;
        self.sort_order = sort_order;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn matches(&self, entry: &AuditLogEntry) -> bool {
        let event = &entry.event;

        if let Some(user) = &self.user_id {
            if &event.user_id != user {
                return false;
            }
        }
        if let Some(workspace) = &self.workspace_id {
            if event.workspace_id.as_ref() != Some(workspace) {
                return false;
            }
        }
        if !self.event_types.is_empty() && !self.event_types.contains(&event.event_type()) {
            return false;
        }
        if let Some(level) = self.level {
            if entry.level != level {
                return false;
            }
        }
        if self.since.is_some_and(|since| event.timestamp < since) {
            return false;
        }
        if self.until.is_some_and(|until| event.timestamp > until) {
            return false;
        }
        true
    }

    /// Filter, sort and page a set of entries
    pub fn apply<'a, I>(&self, entries: I) -> Vec<AuditLogEntry>
    where
        I: IntoIterator<Item = &'a AuditLogEntry>,
    {
        let mut selected: Vec<AuditLogEntry> = entries
            .into_iter()
            .filter(|entry| self.matches(entry))
            .cloned()
            .collect();

        selected.sort_by(|a, b| {
            let ordering = self.compare(a, b);
            match self.sort_order {
                SortOrder::Asc => ordering,
                SortOrder::Desc => ordering.reverse(),
            }
        });

        selected
            .into_iter()
            .skip(self.offset)
            .take(self.limit.unwrap_or(usize::MAX))
            .collect()
    }

    fn compare(&self, a: &AuditLogEntry, b: &AuditLogEntry) -> Ordering {
        let primary = match self.sort_by {
            SortBy::Timestamp => a.event.timestamp.cmp(&b.event.timestamp),
            SortBy::Level => a.level.cmp(&b.level),
            SortBy::EventType => a.event.event_type().cmp(&b.event.event_type()),
        };
        primary.then_with(|| a.ingested_at.cmp(&b.ingested_at))
    }
}
