/*!
 * External Log Sink
 * Record shape shipped to a remote log collector
 */

use super::entry::AuditLogEntry;
use crate::notify::{EventPayload, LogLevel};
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, TimestampMilliSeconds};
use std::collections::BTreeMap;
use std::time::SystemTime;

/// `{timestamp, level, message, context, error, tags, source}` record
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    pub timestamp: SystemTime,
    pub level: LogLevel,
    pub message: String,
    pub context: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub tags: Vec<String>,
    pub source: String,
}

impl LogRecord {
    pub fn from_entry(entry: &AuditLogEntry) -> Self {
        let event = &entry.event;
        let event_type = event.event_type();

        let mut context = BTreeMap::new();
        context.insert("entry_id".to_string(), serde_json::Value::from(entry.id.to_string()));
        context.insert("user_id".to_string(), serde_json::Value::from(event.user_id.as_str()));
        if let Some(workspace) = &event.workspace_id {
            context.insert("workspace_id".to_string(), serde_json::Value::from(workspace.as_str()));
        }
        if let Some(session) = &entry.context.session_id {
            context.insert("session_id".to_string(), serde_json::Value::from(session.as_str()));
        }
        if let Some(batch) = &event.batch {
            context.insert("batch_size".to_string(), serde_json::Value::from(batch.size));
        }

        let error = match &event.payload {
            EventPayload::QueryError { message, .. } => Some(message.clone()),
            EventPayload::CheckFailed { reason, .. } => Some(reason.clone()),
            _ => None,
        };

        Self {
            timestamp: event.timestamp,
            level: entry.level,
            message: format!("permission {} for user {}", event_type, event.user_id),
            context,
            error,
            tags: vec!["permissions".to_string(), event_type.as_str().to_string()],
            source: entry.source.clone(),
        }
    }
}

/// Remote log transport
pub trait LogSink: Send + Sync {
    fn send<'a>(&'a self, records: &'a [LogRecord]) -> BoxFuture<'a, anyhow::Result<()>>;
}

/// Sink that keeps records in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<LogRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl LogSink for MemorySink {
    fn send<'a>(&'a self, records: &'a [LogRecord]) -> BoxFuture<'a, anyhow::Result<()>> {
        self.records.lock().extend_from_slice(records);
        futures::future::ready(Ok(())).boxed()
    }
}
