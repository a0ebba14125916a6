/*!
 * Notification Preferences
 * Process-wide toggles applied before any listener runs
 */

use super::events::{EventType, PermissionEvent};
use crate::core::config::NotificationConfig;
use crate::core::types::WorkspaceId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Why an event never reached listeners
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterReason {
    Muted,
    BelowCritical,
    WorkspaceNotAllowed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationPreferences {
    pub enable_toast: bool,
    pub enable_audit: bool,
    pub critical_only: bool,
    pub muted_types: BTreeSet<EventType>,
    /// Empty allows every workspace
    pub workspace_filters: BTreeSet<WorkspaceId>,
}

impl NotificationPreferences {
    pub fn from_config(config: &NotificationConfig) -> Self {
        Self {
            enable_toast: config.enable_toast,
            enable_audit: config.enable_audit,
            critical_only: config.critical_only,
            muted_types: config.muted_types.clone(),
            workspace_filters: config.workspace_filters.clone(),
        }
    }

    /// First global filter the event fails, if any
    pub fn filter(&self, event: &PermissionEvent) -> Option<FilterReason> {
        if self.muted_types.contains(&event.event_type()) {
            return Some(FilterReason::Muted);
        }
        if self.critical_only && !event.is_critical() {
            return Some(FilterReason::BelowCritical);
        }
        if !self.workspace_filters.is_empty() {
            // Events without a workspace are not workspace-scoped and pass
            if let Some(workspace) = &event.workspace_id {
                if !self.workspace_filters.contains(workspace) {
                    return Some(FilterReason::WorkspaceNotAllowed);
                }
            }
        }
        None
    }
}
