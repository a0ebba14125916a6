/*!
 * Permission Events
 * Closed sum type for every permission-domain event
 */

use crate::core::types::{PermissionName, UserId, WorkspaceId};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, TimestampMilliSeconds};
use std::collections::BTreeSet;
use std::fmt;
use std::time::SystemTime;
use uuid::Uuid;

/// Severity for filtering and audit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum LogLevel {
    Debug = 0,
    Info = 1,
    Warn = 2,
    Error = 3,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event discriminant, used for subscriptions and filters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventType {
    Granted,
    Revoked,
    Updated,
    RoleChanged,
    WorkspaceAccessGranted,
    WorkspaceAccessRevoked,
    CacheInvalidated,
    CacheWarmed,
    CheckFailed,
    QueryError,
}

impl EventType {
    pub const ALL: [EventType; 10] = [
        Self::Granted,
        Self::Revoked,
        Self::Updated,
        Self::RoleChanged,
        Self::WorkspaceAccessGranted,
        Self::WorkspaceAccessRevoked,
        Self::CacheInvalidated,
        Self::CacheWarmed,
        Self::CheckFailed,
        Self::QueryError,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Granted => "granted",
            Self::Revoked => "revoked",
            Self::Updated => "updated",
            Self::RoleChanged => "roleChanged",
            Self::WorkspaceAccessGranted => "workspaceAccessGranted",
            Self::WorkspaceAccessRevoked => "workspaceAccessRevoked",
            Self::CacheInvalidated => "cacheInvalidated",
            Self::CacheWarmed => "cacheWarmed",
            Self::CheckFailed => "checkFailed",
            Self::QueryError => "queryError",
        }
    }

    /// Fixed severity table
    pub fn default_level(&self) -> LogLevel {
        match self {
            Self::QueryError | Self::CheckFailed => LogLevel::Error,
            Self::Revoked | Self::RoleChanged | Self::WorkspaceAccessRevoked => LogLevel::Warn,
            _ => LogLevel::Info,
        }
    }

    /// Events a user should be told about
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            Self::Granted
                | Self::Revoked
                | Self::RoleChanged
                | Self::WorkspaceAccessGranted
                | Self::WorkspaceAccessRevoked
                | Self::CheckFailed
        )
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind-specific event fields
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EventPayload {
    Granted {
        permission: PermissionName,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        granted_by: Option<UserId>,
    },
    Revoked {
        permission: PermissionName,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        revoked_by: Option<UserId>,
    },
    Updated {
        #[serde(default)]
        added: BTreeSet<PermissionName>,
        #[serde(default)]
        removed: BTreeSet<PermissionName>,
    },
    RoleChanged {
        previous_role: String,
        new_role: String,
    },
    WorkspaceAccessGranted {
        role: String,
    },
    WorkspaceAccessRevoked {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    CacheInvalidated {
        cache_keys: Vec<String>,
        reason: String,
    },
    CacheWarmed {
        cache_keys: Vec<String>,
        source: String,
    },
    CheckFailed {
        permission: PermissionName,
        reason: String,
    },
    QueryError {
        operation: String,
        message: String,
    },
}

impl EventPayload {
    pub fn event_type(&self) -> EventType {
        match self {
            Self::Granted { .. } => EventType::Granted,
            Self::Revoked { .. } => EventType::Revoked,
            Self::Updated { .. } => EventType::Updated,
            Self::RoleChanged { .. } => EventType::RoleChanged,
            Self::WorkspaceAccessGranted { .. } => EventType::WorkspaceAccessGranted,
            Self::WorkspaceAccessRevoked { .. } => EventType::WorkspaceAccessRevoked,
            Self::CacheInvalidated { .. } => EventType::CacheInvalidated,
            Self::CacheWarmed { .. } => EventType::CacheWarmed,
            Self::CheckFailed { .. } => EventType::CheckFailed,
            Self::QueryError { .. } => EventType::QueryError,
        }
    }

    /// The single permission this event concerns, if any
    pub fn permission(&self) -> Option<&PermissionName> {
        match self {
            Self::Granted { permission, .. }
            | Self::Revoked { permission, .. }
            | Self::CheckFailed { permission, .. } => Some(permission),
            _ => None,
        }
    }

    /// Cache keys carried by cache events
    pub fn cache_keys(&self) -> &[String] {
        match self {
            Self::CacheInvalidated { cache_keys, .. } | Self::CacheWarmed { cache_keys, .. } => cache_keys,
            _ => &[],
        }
    }

    pub fn cache_keys_mut(&mut self) -> Option<&mut Vec<String>> {
        match self {
            Self::CacheInvalidated { cache_keys, .. } | Self::CacheWarmed { cache_keys, .. } => {
                Some(cache_keys)
            }
            _ => None,
        }
    }

    /// Finer label recorded in batch summaries
    pub fn sub_kind(&self) -> &str {
        match self {
            Self::CacheInvalidated { reason, .. } => reason,
            Self::CacheWarmed { source, .. } => source,
            Self::QueryError { operation, .. } => operation,
            other => other.event_type().as_str(),
        }
    }
}

/// Coalescing details attached to a batched summary event
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub size: usize,
    pub sub_kinds: BTreeSet<String>,
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    pub first_at: SystemTime,
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    pub last_at: SystemTime,
}

/// One permission-domain event
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionEvent {
    pub id: Uuid,
    /// Actor the event concerns
    pub user_id: UserId,
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    pub timestamp: SystemTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<WorkspaceId>,
    pub payload: EventPayload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch: Option<BatchSummary>,
}

impl PermissionEvent {
    pub fn new(user_id: UserId, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            timestamp: SystemTime::now(),
            workspace_id: None,
            payload,
            batch: None,
        }
    }

    pub fn with_workspace(mut self, workspace_id: Option<WorkspaceId>) -> Self {
        self.workspace_id = workspace_id;
        self
    }

    pub fn at(mut self, timestamp: SystemTime) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn cache_invalidated(
        user_id: UserId,
        workspace_id: Option<WorkspaceId>,
        cache_keys: Vec<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::new(
            user_id,
            EventPayload::CacheInvalidated {
                cache_keys,
                reason: reason.into(),
            },
        )
        .with_workspace(workspace_id)
    }

    pub fn cache_warmed(
        user_id: UserId,
        workspace_id: Option<WorkspaceId>,
        cache_keys: Vec<String>,
        source: impl Into<String>,
    ) -> Self {
        Self::new(
            user_id,
            EventPayload::CacheWarmed {
                cache_keys,
                source: source.into(),
            },
        )
        .with_workspace(workspace_id)
    }

    pub fn check_failed(
        user_id: UserId,
        workspace_id: Option<WorkspaceId>,
        permission: PermissionName,
        reason: impl Into<String>,
    ) -> Self {
        Self::new(
            user_id,
            EventPayload::CheckFailed {
                permission,
                reason: reason.into(),
            },
        )
        .with_workspace(workspace_id)
    }

    pub fn query_error(
        user_id: UserId,
        workspace_id: Option<WorkspaceId>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(
            user_id,
            EventPayload::QueryError {
                operation: operation.into(),
                message: message.into(),
            },
        )
        .with_workspace(workspace_id)
    }

    #[inline]
    pub fn event_type(&self) -> EventType {
        self.payload.event_type()
    }

    #[inline]
    pub fn default_level(&self) -> LogLevel {
        self.event_type().default_level()
    }

    /// Warn or above
    #[inline]
    pub fn is_critical(&self) -> bool {
        self.default_level() >= LogLevel::Warn
    }

    #[inline]
    pub fn is_batched(&self) -> bool {
        self.batch.is_some()
    }
}
