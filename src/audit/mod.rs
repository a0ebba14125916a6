/*!
 * Permission Audit Log
 * Bounded, filterable, persisted record of delivered permission events
 *
 * Entries live in a capped ring buffer; the oldest are dropped once
 * `max_entries` is reached, independent of explicit cleanup. Writes are
 * debounced to a `DurableStore`, and every persisted batch of new entries is
 * forwarded to an optional `LogSink`. A missing or failing store degrades
 * to memory-only operation.
 */

mod entry;
mod export;
mod filter;
mod sink;

pub use entry::{AuditContext, AuditLogEntry, AUDIT_SOURCE};
pub use export::{parse_envelope, AuditExport, ExportMetadata, ImportReport};
pub use filter::{AuditFilter, SortBy, SortOrder};
pub use sink::{LogRecord, LogSink, MemorySink};

use crate::core::config::AuditConfig;
use crate::core::errors::AuditError;
use crate::core::storage::DurableStore;
use crate::core::timer::DebounceTimer;
use crate::notify::{EventType, LogLevel, PermissionEvent};
use export::split_valid;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, TimestampMilliSeconds};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::{Arc, Weak};
use std::time::SystemTime;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Audit statistics
#[serde_as]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditStats {
    pub total_entries: usize,
    pub by_level: BTreeMap<LogLevel, usize>,
    pub by_type: BTreeMap<EventType, usize>,
    #[serde_as(as = "Option<TimestampMilliSeconds<i64>>")]
    pub oldest: Option<SystemTime>,
    #[serde_as(as = "Option<TimestampMilliSeconds<i64>>")]
    pub newest: Option<SystemTime>,
    /// Entries dropped by the in-memory cap
    pub dropped: u64,
}

struct AuditInner {
    entries: RwLock<VecDeque<AuditLogEntry>>,
    config: AuditConfig,
    store: Option<Arc<dyn DurableStore>>,
    sink: RwLock<Option<Arc<dyn LogSink>>>,
    /// Records not yet handed to the sink
    outbox: Mutex<VecDeque<LogRecord>>,
    persist_timer: DebounceTimer<()>,
    context: RwLock<AuditContext>,
    dropped: Mutex<u64>,
}

/// Audit logger
#[derive(Clone)]
pub struct AuditLogger {
    inner: Arc<AuditInner>,
}

impl AuditLogger {
    /// Memory-only logger
    pub fn new(config: AuditConfig) -> Self {
        Self::build(config, None)
    }

    /// Logger backed by `store`, hydrated from whatever it holds.
    ///
    /// Missing, unreadable or corrupt data starts an empty log.
    pub async fn open(config: AuditConfig, store: Arc<dyn DurableStore>) -> Self {
        let logger = Self::build(config, Some(store));
        logger.hydrate().await;
        logger
    }

    fn build(config: AuditConfig, store: Option<Arc<dyn DurableStore>>) -> Self {
        Self {
            inner: Arc::new(AuditInner {
                entries: RwLock::new(VecDeque::with_capacity(config.max_entries.min(1024))),
                persist_timer: DebounceTimer::new(config.persist_debounce),
                config,
                store,
                sink: RwLock::new(None),
                outbox: Mutex::new(VecDeque::new()),
                context: RwLock::new(AuditContext::default()),
                dropped: Mutex::new(0),
            }),
        }
    }

    async fn hydrate(&self) {
        let Some(store) = &self.inner.store else {
            return;
        };

        let raw = match store.get_item(&self.inner.config.storage_key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "Audit store unreadable, starting empty");
                return;
            }
        };

        let values = match serde_json::from_str::<Vec<serde_json::Value>>(&raw) {
            Ok(values) => values,
            Err(e) => {
                warn!(error = %e, "Discarding corrupt persisted audit log");
                return;
            }
        };

        let (mut restored, invalid) = split_valid(values);
        if invalid > 0 {
            warn!(invalid, "Skipped malformed persisted audit entries");
        }
        restored.sort_by_key(|entry| entry.ingested_at);
        let count = restored.len();
        {
            let mut entries = self.inner.entries.write();
            entries.extend(restored);
            self.enforce_cap(&mut entries);
        }
        info!(entries = count, "Audit log hydrated");

        let expired = self.cleanup_expired();
        if expired > 0 {
            debug!(expired, "Removed expired audit entries after hydrate");
        }
    }

    /// Forward persisted entries to an external collector
    pub fn set_sink(&self, sink: Arc<dyn LogSink>) {
        *self.inner.sink.write() = Some(sink);
    }

    pub fn set_session(&self, session_id: Option<String>) {
        self.inner.context.write().session_id = session_id;
    }

    pub fn context(&self) -> AuditContext {
        self.inner.context.read().clone()
    }

    /// Record an event; `level` overrides the fixed severity table
    pub fn log(&self, event: &PermissionEvent, level: Option<LogLevel>) -> Uuid {
        let entry = AuditLogEntry::new(event.clone(), level, self.context());
        let id = entry.id;

        if self.inner.sink.read().is_some() {
            let mut outbox = self.inner.outbox.lock();
            outbox.push_back(LogRecord::from_entry(&entry));
            self.trim_outbox(&mut outbox);
        }
        {
            let mut entries = self.inner.entries.write();
            entries.push_back(entry);
            self.enforce_cap(&mut entries);
        }

        self.schedule_persist();
        id
    }

    fn enforce_cap(&self, entries: &mut VecDeque<AuditLogEntry>) {
        let mut dropped = 0u64;
        while entries.len() > self.inner.config.max_entries {
            entries.pop_front();
            dropped += 1;
        }
        if dropped > 0 {
            *self.inner.dropped.lock() += dropped;
        }
    }

    /// Same cap as the log itself; the oldest records go first
    fn trim_outbox(&self, outbox: &mut VecDeque<LogRecord>) {
        let excess = outbox.len().saturating_sub(self.inner.config.max_entries);
        if excess > 0 {
            outbox.drain(..excess);
        }
    }

    /// Records waiting for the sink
    pub fn pending_records(&self) -> usize {
        self.inner.outbox.lock().len()
    }

    pub fn len(&self) -> usize {
        self.inner.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.read().is_empty()
    }

    /// Matching entries as owned copies
    pub fn get_entries(&self, filter: &AuditFilter) -> Vec<AuditLogEntry> {
        filter.apply(self.inner.entries.read().iter())
    }

    /// Remove entries ingested strictly before `cutoff`
    pub fn cleanup(&self, cutoff: SystemTime) -> usize {
        let removed = {
            let mut entries = self.inner.entries.write();
            let before = entries.len();
            entries.retain(|entry| entry.ingested_at >= cutoff);
            before - entries.len()
        };
        if removed > 0 {
            info!(removed, "Audit entries cleaned up");
            self.schedule_persist();
        }
        removed
    }

    /// `cleanup` with the configured retention age
    pub fn cleanup_expired(&self) -> usize {
        let cutoff = SystemTime::now()
            .checked_sub(self.inner.config.max_age_for_auto_cleanup)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        self.cleanup(cutoff)
    }

    pub fn clear(&self) {
        self.inner.entries.write().clear();
        self.inner.outbox.lock().clear();
        self.schedule_persist();
    }

    pub fn stats(&self) -> AuditStats {
        let entries = self.inner.entries.read();
        let mut stats = AuditStats {
            total_entries: entries.len(),
            dropped: *self.inner.dropped.lock(),
            ..Default::default()
        };

        for entry in entries.iter() {
            *stats.by_level.entry(entry.level).or_default() += 1;
            *stats.by_type.entry(entry.event.event_type()).or_default() += 1;
            stats.oldest = Some(stats.oldest.map_or(entry.ingested_at, |t| t.min(entry.ingested_at)));
            stats.newest = Some(stats.newest.map_or(entry.ingested_at, |t| t.max(entry.ingested_at)));
        }
        stats
    }

    /// Versioned JSON envelope, optionally pre-filtered
    pub fn export_audit_log(&self, filter: Option<&AuditFilter>) -> Result<String, AuditError> {
        let entries = match filter {
            Some(filter) => self.get_entries(filter),
            None => self.inner.entries.read().iter().cloned().collect(),
        };
        let export = AuditExport::new(entries, filter.is_some(), self.context());
        serde_json::to_string_pretty(&export).map_err(|e| AuditError::Serialization(e.to_string()))
    }

    /// Merge entries from an export; malformed and already-present ids are skipped
    pub fn import_entries(&self, payload: &str) -> Result<ImportReport, AuditError> {
        let (candidates, skipped_invalid) = parse_envelope(payload)?;
        let mut report = ImportReport {
            skipped_invalid,
            ..Default::default()
        };

        {
            let mut entries = self.inner.entries.write();
            let mut known: HashSet<Uuid> = entries.iter().map(|entry| entry.id).collect();

            for entry in candidates {
                if known.insert(entry.id) {
                    entries.push_back(entry);
                    report.imported += 1;
                } else {
                    report.skipped_duplicate += 1;
                }
            }

            if report.imported > 0 {
                entries.make_contiguous().sort_by_key(|entry| entry.ingested_at);
                self.enforce_cap(&mut entries);
            }
        }

        info!(
            imported = report.imported,
            skipped_invalid = report.skipped_invalid,
            skipped_duplicate = report.skipped_duplicate,
            "Audit entries imported"
        );
        if report.imported > 0 {
            self.schedule_persist();
        }
        Ok(report)
    }

    fn schedule_persist(&self) {
        if self.inner.store.is_none() && self.inner.sink.read().is_none() {
            return;
        }
        if tokio::runtime::Handle::try_current().is_err() {
            debug!("No runtime available, audit persistence deferred to flush");
            return;
        }

        let weak: Weak<AuditInner> = Arc::downgrade(&self.inner);
        self.inner.persist_timer.arm((), move || async move {
            if let Some(inner) = weak.upgrade() {
                let logger = AuditLogger { inner };
                if let Err(e) = logger.flush().await {
                    warn!(error = %e, "Audit persistence failed, keeping entries in memory");
                }
            }
        });
    }

    /// Persist now and forward pending records to the sink.
    ///
    /// The sink is fed even when the store write fails; the store error is
    /// returned afterwards.
    pub async fn flush(&self) -> Result<(), AuditError> {
        self.inner.persist_timer.cancel(&());

        let persisted = self.persist().await;
        if let Err(e) = &persisted {
            warn!(error = %e, "Audit store write failed");
        }
        self.forward_to_sink().await;
        persisted
    }

    async fn persist(&self) -> Result<(), AuditError> {
        let Some(store) = &self.inner.store else {
            return Ok(());
        };
        let serialized = {
            let entries = self.inner.entries.read();
            serde_json::to_string(&*entries).map_err(|e| AuditError::Serialization(e.to_string()))?
        };
        store
            .set_item(&self.inner.config.storage_key, serialized)
            .await?;
        Ok(())
    }

    async fn forward_to_sink(&self) {
        let Some(sink) = self.inner.sink.read().clone() else {
            return;
        };
        let records = Vec::from(std::mem::take(&mut *self.inner.outbox.lock()));
        if records.is_empty() {
            return;
        }

        if let Err(e) = sink.send(&records).await {
            warn!(error = %e, records = records.len(), "Log sink rejected batch, will retry");
            let mut outbox = self.inner.outbox.lock();
            let newer = std::mem::take(&mut *outbox);
            outbox.extend(records);
            outbox.extend(newer);
            self.trim_outbox(&mut outbox);
        }
    }
}
