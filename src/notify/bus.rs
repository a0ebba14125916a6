/*!
 * Notification Bus
 * Priority-ordered pub/sub for permission events
 *
 * Dispatch order within one `emit`:
 * 1. Global filters (muted, critical-only, workspace allow-list)
 * 2. Audit entry, then toast
 * 3. Type-specific listeners, then global listeners
 *
 * Listeners are ordered by priority tier and, within a tier, by registration.
 * A failing or panicking handler is logged and never blocks the rest.
 */

use super::batch::{coalesce, BatchKey};
use super::events::{EventType, PermissionEvent};
use super::preferences::{FilterReason, NotificationPreferences};
use super::toast::Toast;
use crate::audit::AuditLogger;
use crate::core::config::NotificationConfig;
use crate::core::limits::TOAST_CHANNEL_CAPACITY;
use crate::core::timer::DebounceTimer;
use crate::core::types::{UserId, WorkspaceId};
use arc_swap::ArcSwap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;
use tracing::{debug, error, trace, warn};

/// Listener callback
pub type Handler = Arc<dyn Fn(&PermissionEvent) -> anyhow::Result<()> + Send + Sync>;

/// Dispatch tier; earlier tiers run first
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListenerPriority {
    High,
    #[default]
    Normal,
    Low,
}

#[derive(Debug, Clone, Default)]
pub struct SubscribeOptions {
    pub priority: ListenerPriority,
    /// Remove after the first successful call
    pub once: bool,
    pub workspace_filter: Option<WorkspaceId>,
    pub user_filter: Option<UserId>,
}

impl SubscribeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn priority(mut self, priority: ListenerPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn once(mut self) -> Self {
        self.once = true;
        self
    }

    pub fn workspace(mut self, workspace_id: impl Into<WorkspaceId>) -> Self {
        self.workspace_filter = Some(workspace_id.into());
        self
    }

    pub fn user(mut self, user_id: impl Into<UserId>) -> Self {
        self.user_filter = Some(user_id.into());
        self
    }
}

struct Listener {
    id: u64,
    options: SubscribeOptions,
    handler: Handler,
    fired: AtomicBool,
}

impl Listener {
    fn accepts(&self, event: &PermissionEvent) -> bool {
        if let Some(workspace) = &self.options.workspace_filter {
            if event.workspace_id.as_ref() != Some(workspace) {
                return false;
            }
        }
        if let Some(user) = &self.options.user_filter {
            if &event.user_id != user {
                return false;
            }
        }
        true
    }
}

/// Which list a listener lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Channel {
    Type(EventType),
    Global,
}

/// Handle returned by `subscribe`
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    channel: Channel,
    bus: Weak<BusInner>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Remove the listener. Returns false if it was already gone.
    pub fn unsubscribe(self) -> bool {
        match self.bus.upgrade() {
            Some(inner) => inner.remove(self.channel, self.id),
            None => false,
        }
    }
}

/// Result of one `emit`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmitOutcome {
    pub filtered: Option<FilterReason>,
    pub delivered: usize,
    pub failed: usize,
    pub audited: bool,
    pub toasted: bool,
}

/// Result of `emit_debounced`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebouncedEmit {
    /// Not a noisy type; emitted immediately
    Immediate(EmitOutcome),
    /// Held until the quiet period ends
    Buffered { pending: usize },
    /// Hit the batch cap; flushed now
    Flushed(EmitOutcome),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusStats {
    pub emitted: u64,
    pub filtered: u64,
    pub delivered: u64,
    pub listener_failures: u64,
    pub buffered: u64,
    pub batches_flushed: u64,
    pub listeners: usize,
}

struct BusInner {
    listeners: RwLock<HashMap<EventType, Vec<Arc<Listener>>>>,
    global: RwLock<Vec<Arc<Listener>>>,
    next_id: AtomicU64,
    preferences: ArcSwap<NotificationPreferences>,
    config: NotificationConfig,
    audit: Option<AuditLogger>,
    toasts: broadcast::Sender<Toast>,
    batches: Mutex<BTreeMap<BatchKey, Vec<PermissionEvent>>>,
    batch_timer: DebounceTimer<BatchKey>,
    stats: Mutex<BusStats>,
}

impl BusInner {
    fn remove(&self, channel: Channel, id: u64) -> bool {
        let remove_from = |list: &mut Vec<Arc<Listener>>| -> bool {
            let before = list.len();
            list.retain(|l| l.id != id);
            before != list.len()
        };
        match channel {
            Channel::Type(event_type) => self
                .listeners
                .write()
                .get_mut(&event_type)
                .is_some_and(remove_from),
            Channel::Global => remove_from(&mut *self.global.write()),
        }
    }

    /// Invoke listeners in order; returns (delivered, failed)
    fn dispatch(&self, channel: Channel, listeners: Vec<Arc<Listener>>, event: &PermissionEvent) -> (usize, usize) {
        let mut delivered = 0;
        let mut failed = 0;

        for listener in listeners {
            if !listener.accepts(event) {
                continue;
            }
            if listener.options.once && listener.fired.swap(true, Ordering::AcqRel) {
                continue;
            }

            match catch_unwind(AssertUnwindSafe(|| (listener.handler)(event))) {
                Ok(Ok(())) => {
                    delivered += 1;
                    if listener.options.once {
                        self.remove(channel, listener.id);
                    }
                }
                Ok(Err(e)) => {
                    failed += 1;
                    listener.fired.store(false, Ordering::Release);
                    warn!(
                        listener = listener.id,
                        event_type = %event.event_type(),
                        error = %e,
                        "Permission event listener failed"
                    );
                }
                Err(_) => {
                    failed += 1;
                    listener.fired.store(false, Ordering::Release);
                    error!(
                        listener = listener.id,
                        event_type = %event.event_type(),
                        "Permission event listener panicked"
                    );
                }
            }
        }
        (delivered, failed)
    }
}

/// Permission event bus
#[derive(Clone)]
pub struct NotificationBus {
    inner: Arc<BusInner>,
}

impl NotificationBus {
    pub fn new(config: NotificationConfig) -> Self {
        Self::build(config, None)
    }

    /// Bus that records every delivered event in `audit`
    pub fn with_audit(config: NotificationConfig, audit: AuditLogger) -> Self {
        Self::build(config, Some(audit))
    }

    fn build(config: NotificationConfig, audit: Option<AuditLogger>) -> Self {
        let (toasts, _) = broadcast::channel(TOAST_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(BusInner {
                listeners: RwLock::new(HashMap::new()),
                global: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(1),
                preferences: ArcSwap::from_pointee(NotificationPreferences::from_config(&config)),
                batch_timer: DebounceTimer::new(config.batch_quiet_period),
                config,
                audit,
                toasts,
                batches: Mutex::new(BTreeMap::new()),
                stats: Mutex::new(BusStats::default()),
            }),
        }
    }

    pub fn audit(&self) -> Option<&AuditLogger> {
        self.inner.audit.as_ref()
    }

    /// Listen for one event type
    pub fn subscribe<F>(&self, event_type: EventType, handler: F, options: SubscribeOptions) -> Subscription
    where
        F: Fn(&PermissionEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let listener = self.listener(handler, options);
        let id = listener.id;
        {
            let mut map = self.inner.listeners.write();
            insert_ordered(map.entry(event_type).or_default(), listener);
        }
        Subscription {
            id,
            channel: Channel::Type(event_type),
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Listen for every event type; runs after type-specific listeners
    pub fn subscribe_all<F>(&self, handler: F, options: SubscribeOptions) -> Subscription
    where
        F: Fn(&PermissionEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let listener = self.listener(handler, options);
        let id = listener.id;
        insert_ordered(&mut self.inner.global.write(), listener);
        Subscription {
            id,
            channel: Channel::Global,
            bus: Arc::downgrade(&self.inner),
        }
    }

    fn listener<F>(&self, handler: F, options: SubscribeOptions) -> Arc<Listener>
    where
        F: Fn(&PermissionEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Arc::new(Listener {
            id: self.inner.next_id.fetch_add(1, Ordering::Relaxed),
            options,
            handler: Arc::new(handler),
            fired: AtomicBool::new(false),
        })
    }

    pub fn listener_count(&self) -> usize {
        let typed: usize = self.inner.listeners.read().values().map(Vec::len).sum();
        typed + self.inner.global.read().len()
    }

    /// Filter, audit, toast and dispatch one event
    pub fn emit(&self, event: PermissionEvent) -> EmitOutcome {
        let prefs = self.inner.preferences.load();
        let mut outcome = EmitOutcome::default();

        if let Some(reason) = prefs.filter(&event) {
            trace!(event_type = %event.event_type(), ?reason, "Permission event filtered");
            let mut stats = self.inner.stats.lock();
            stats.emitted += 1;
            stats.filtered += 1;
            outcome.filtered = Some(reason);
            return outcome;
        }

        if prefs.enable_audit {
            if let Some(audit) = &self.inner.audit {
                audit.log(&event, None);
                outcome.audited = true;
            }
        }

        if prefs.enable_toast {
            if let Some(toast) = Toast::for_event(&event) {
                // No receivers is fine
                let _ = self.inner.toasts.send(toast);
                outcome.toasted = true;
            }
        }

        let event_type = event.event_type();
        let typed: Vec<Arc<Listener>> = self
            .inner
            .listeners
            .read()
            .get(&event_type)
            .cloned()
            .unwrap_or_default();
        let (delivered, failed) = self.inner.dispatch(Channel::Type(event_type), typed, &event);
        outcome.delivered += delivered;
        outcome.failed += failed;

        let global: Vec<Arc<Listener>> = self.inner.global.read().clone();
        let (delivered, failed) = self.inner.dispatch(Channel::Global, global, &event);
        outcome.delivered += delivered;
        outcome.failed += failed;

        {
            let mut stats = self.inner.stats.lock();
            stats.emitted += 1;
            stats.delivered += outcome.delivered as u64;
            stats.listener_failures += outcome.failed as u64;
        }
        debug!(
            event_type = %event_type,
            user_id = %event.user_id,
            delivered = outcome.delivered,
            failed = outcome.failed,
            "Permission event emitted"
        );
        outcome
    }

    /// Emit, buffering noisy types for the quiet period.
    ///
    /// Outside a tokio runtime nothing can fire the quiet period, so noisy
    /// events are emitted at once.
    pub fn emit_debounced(&self, event: PermissionEvent) -> DebouncedEmit {
        if !self.inner.config.noisy_types.contains(&event.event_type()) {
            return DebouncedEmit::Immediate(self.emit(event));
        }

        let key = BatchKey::of(&event);
        let pending = {
            let mut batches = self.inner.batches.lock();
            let buffer = batches.entry(key.clone()).or_default();
            buffer.push(event);
            buffer.len()
        };
        self.inner.stats.lock().buffered += 1;

        if pending >= self.inner.config.max_batch_size {
            self.inner.batch_timer.cancel(&key);
            return match self.flush_batch(&key) {
                Some(outcome) => DebouncedEmit::Flushed(outcome),
                None => DebouncedEmit::Buffered { pending: 0 },
            };
        }

        if tokio::runtime::Handle::try_current().is_err() {
            debug!(event_type = %key.event_type, "No runtime available, flushing batch immediately");
            return match self.flush_batch(&key) {
                Some(outcome) => DebouncedEmit::Flushed(outcome),
                None => DebouncedEmit::Buffered { pending: 0 },
            };
        }

        let weak = Arc::downgrade(&self.inner);
        let timer_key = key.clone();
        self.inner.batch_timer.arm(key, move || async move {
            if let Some(inner) = weak.upgrade() {
                NotificationBus { inner }.flush_batch(&timer_key);
            }
        });
        DebouncedEmit::Buffered { pending }
    }

    /// Emit whatever is buffered under `key`
    fn flush_batch(&self, key: &BatchKey) -> Option<EmitOutcome> {
        let events = self.inner.batches.lock().remove(key)?;
        let event = coalesce(events)?;
        self.inner.stats.lock().batches_flushed += 1;
        Some(self.emit(event))
    }

    /// Flush every buffered batch now; returns how many events were emitted
    pub fn flush_pending(&self) -> usize {
        self.inner.batch_timer.cancel_all();
        let keys: Vec<BatchKey> = self.inner.batches.lock().keys().cloned().collect();
        keys.iter().filter_map(|key| self.flush_batch(key)).count()
    }

    pub fn pending_batches(&self) -> usize {
        self.inner.batches.lock().len()
    }

    pub fn preferences(&self) -> Arc<NotificationPreferences> {
        self.inner.preferences.load_full()
    }

    pub fn set_preferences(&self, preferences: NotificationPreferences) {
        self.inner.preferences.store(Arc::new(preferences));
    }

    /// Apply a change to the current preferences
    pub fn update_preferences<F>(&self, update: F)
    where
        F: Fn(&mut NotificationPreferences),
    {
        self.inner.preferences.rcu(|current| {
            let mut next = NotificationPreferences::clone(current);
            update(&mut next);
            next
        });
    }

    pub fn mute(&self, event_type: EventType) {
        self.update_preferences(|prefs| {
            prefs.muted_types.insert(event_type);
        });
    }

    pub fn unmute(&self, event_type: EventType) {
        self.update_preferences(|prefs| {
            prefs.muted_types.remove(&event_type);
        });
    }

    /// Receiver for user-facing toasts
    pub fn toasts(&self) -> broadcast::Receiver<Toast> {
        self.inner.toasts.subscribe()
    }

    pub fn stats(&self) -> BusStats {
        let mut stats = self.inner.stats.lock().clone();
        stats.listeners = self.listener_count();
        stats
    }
}

/// Insert after every listener of the same or higher tier
fn insert_ordered(list: &mut Vec<Arc<Listener>>, listener: Arc<Listener>) {
    let position = list
        .iter()
        .position(|existing| existing.options.priority > listener.options.priority)
        .unwrap_or(list.len());
    list.insert(position, listener);
}
