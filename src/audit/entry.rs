/*!
 * Audit Entries
 */

use crate::notify::{LogLevel, PermissionEvent};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, TimestampMilliSeconds};
use std::time::SystemTime;
use uuid::Uuid;

pub const AUDIT_SOURCE: &str = "permission-notification-bus";

/// Ambient session details stamped on every entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditContext {
    pub session_id: Option<String>,
    pub client: String,
    pub version: String,
}

impl Default for AuditContext {
    fn default() -> Self {
        Self {
            session_id: None,
            client: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// One recorded event
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub event: PermissionEvent,
    pub level: LogLevel,
    pub source: String,
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    pub ingested_at: SystemTime,
    pub context: AuditContext,
}

impl AuditLogEntry {
    /// Wrap an event; the level defaults to the event's severity
    pub fn new(event: PermissionEvent, level: Option<LogLevel>, context: AuditContext) -> Self {
        Self {
            id: Uuid::new_v4(),
            level: level.unwrap_or_else(|| event.default_level()),
            event,
            source: AUDIT_SOURCE.to_string(),
            ingested_at: SystemTime::now(),
            context,
        }
    }
}
