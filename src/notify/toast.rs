/*!
 * Toasts
 * User-visible notifications derived from user-facing events
 */

use super::events::{EventPayload, EventType, PermissionEvent};
use crate::core::types::{UserId, WorkspaceId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToastKind {
    Success,
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Toast {
    pub kind: ToastKind,
    pub title: String,
    pub message: String,
    pub event_type: EventType,
    pub user_id: UserId,
    pub workspace_id: Option<WorkspaceId>,
}

impl Toast {
    /// Toast for a user-facing event; `None` for cache and query events
    pub fn for_event(event: &PermissionEvent) -> Option<Self> {
        let (kind, title, message) = match &event.payload {
            EventPayload::Granted { permission, .. } => (
                ToastKind::Success,
                "Permission granted",
                format!("You now have {}", permission),
            ),
            EventPayload::Revoked { permission, .. } => (
                ToastKind::Warning,
                "Permission revoked",
                format!("You no longer have {}", permission),
            ),
            EventPayload::RoleChanged {
                previous_role,
                new_role,
                ..
            } => (
                ToastKind::Info,
                "Role changed",
                format!("Your role changed from {} to {}", previous_role, new_role),
            ),
            EventPayload::WorkspaceAccessGranted { role } => (
                ToastKind::Success,
                "Workspace access granted",
                format!("You joined as {}", role),
            ),
            EventPayload::WorkspaceAccessRevoked { reason } => (
                ToastKind::Warning,
                "Workspace access removed",
                reason
                    .clone()
                    .unwrap_or_else(|| "Your access to this workspace was removed".to_string()),
            ),
            EventPayload::CheckFailed { permission, .. } => (
                ToastKind::Error,
                "Permission check failed",
                format!("Could not verify {}; access is denied for now", permission),
            ),
            EventPayload::Updated { .. }
            | EventPayload::CacheInvalidated { .. }
            | EventPayload::CacheWarmed { .. }
            | EventPayload::QueryError { .. } => return None,
        };

        Some(Self {
            kind,
            title: title.to_string(),
            message,
            event_type: event.event_type(),
            user_id: event.user_id.clone(),
            workspace_id: event.workspace_id.clone(),
        })
    }
}
