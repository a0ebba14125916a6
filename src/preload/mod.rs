/*!
 * Permission Preloader
 * Predictive, bounded, deduplicated cache warming
 *
 * ## Inputs
 * - `initialize`: session start, hydrates history and warms the current scope
 * - `handle_navigation_intent`: hover/focus signals, debounced per (scope, source)
 * - `update_workspace_context`: actual navigation, records the transition edge
 *   and preloads predicted next scopes
 *
 * ## Bounds
 * Every preload holds a `PreloadRegistry` slot for its full duration. A second
 * request for the same key, or any request beyond the ceiling, returns false
 * before the first poll.
 */

mod patterns;
mod registry;
mod scoring;

pub use patterns::{NavigationPattern, PatternHistory};
pub use registry::{
    PreloadGuard, PreloadPriority, PreloadRegistry, PreloadRejection, PreloadRequest, PreloadSource,
};
pub use scoring::{capped_frequency, confidence, recency_decay};

use crate::cache::PermissionCacheManager;
use crate::core::config::PreloaderConfig;
use crate::core::limits::PATTERN_STORAGE_PREFIX;
use crate::core::storage::DurableStore;
use crate::core::timer::DebounceTimer;
use crate::core::types::{CacheKey, PermissionName, UserId, WorkspaceId};
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

/// Scope a prediction points at
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub workspace_id: WorkspaceId,
    pub confidence: f64,
    /// Preload was accepted and succeeded
    pub preloaded: bool,
}

/// Preloader counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PreloaderStats {
    pub total_requests: u64,
    pub accepted: u64,
    pub successful: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub rejected_duplicate: u64,
    pub rejected_capacity: u64,
    pub by_source: BTreeMap<PreloadSource, u64>,
    pub by_priority: BTreeMap<PreloadPriority, u64>,
    pub average_latency_ms: f64,
    pub in_flight: usize,
    pub peak_in_flight: usize,
    pub patterns: usize,
    pub pending_intents: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct SessionContext {
    user_id: UserId,
    workspace_id: Option<WorkspaceId>,
}

type IntentKey = (CacheKey, PreloadSource);

struct PreloaderInner {
    cache: PermissionCacheManager,
    config: PreloaderConfig,
    registry: Arc<PreloadRegistry>,
    patterns: RwLock<PatternHistory>,
    store: Option<Arc<dyn DurableStore>>,
    intents: DebounceTimer<IntentKey>,
    context: RwLock<Option<SessionContext>>,
    stats: Mutex<PreloaderStats>,
}

/// Permission preloader
#[derive(Clone)]
pub struct PermissionPreloader {
    inner: Arc<PreloaderInner>,
}

impl PermissionPreloader {
    pub fn new(cache: PermissionCacheManager, config: PreloaderConfig) -> Self {
        Self::build(cache, config, None)
    }

    /// Preloader that persists pattern history per user
    pub fn with_store(cache: PermissionCacheManager, config: PreloaderConfig, store: Arc<dyn DurableStore>) -> Self {
        Self::build(cache, config, Some(store))
    }

    fn build(cache: PermissionCacheManager, config: PreloaderConfig, store: Option<Arc<dyn DurableStore>>) -> Self {
        Self {
            inner: Arc::new(PreloaderInner {
                registry: Arc::new(PreloadRegistry::new(config.max_concurrent)),
                patterns: RwLock::new(PatternHistory::new(config.pattern_history_size)),
                intents: DebounceTimer::new(config.hover_delay()),
                cache,
                config,
                store,
                context: RwLock::new(None),
                stats: Mutex::new(PreloaderStats::default()),
            }),
        }
    }

    pub fn config(&self) -> &PreloaderConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &Arc<PreloadRegistry> {
        &self.inner.registry
    }

    pub fn current_user(&self) -> Option<UserId> {
        self.inner.context.read().as_ref().map(|c| c.user_id.clone())
    }

    pub fn current_workspace(&self) -> Option<WorkspaceId> {
        self.inner
            .context
            .read()
            .as_ref()
            .and_then(|c| c.workspace_id.clone())
    }

    /// Hydrate history, then warm the context and the common permissions of the scope.
    ///
    /// Returns how many of those preloads succeeded.
    pub async fn initialize(&self, user_id: &UserId, workspace_id: Option<&WorkspaceId>) -> usize {
        self.hydrate_patterns(user_id).await;
        *self.inner.context.write() = Some(SessionContext {
            user_id: user_id.clone(),
            workspace_id: workspace_id.cloned(),
        });

        let mut preloads = vec![self.preload(
            CacheKey::user_context(user_id.clone()),
            PreloadPriority::High,
            PreloadSource::Initialization,
        )];
        if let Some(workspace) = workspace_id {
            preloads.extend(self.common_permission_preloads(
                user_id,
                workspace,
                PreloadPriority::High,
                PreloadSource::Initialization,
            ));
        }

        let warmed = join_all(preloads).await.into_iter().filter(|ok| *ok).count();
        info!(
            user_id = %user_id,
            workspace_id = workspace_id.map(|w| w.as_str()),
            warmed,
            patterns = self.inner.patterns.read().len(),
            "Preloader initialized"
        );
        warmed
    }

    fn common_permission_preloads(
        &self,
        user_id: &UserId,
        workspace_id: &WorkspaceId,
        priority: PreloadPriority,
        source: PreloadSource,
    ) -> Vec<BoxFuture<'static, bool>> {
        self.inner
            .config
            .common_permissions
            .iter()
            .map(|permission| {
                let key = CacheKey::permission(user_id.clone(), Some(workspace_id.clone()), permission.clone());
                self.preload(key, priority, source)
            })
            .collect()
    }

    /// Debounce a hover/focus signal; fires a medium-priority preload of the scope
    pub fn handle_navigation_intent(&self, user_id: &UserId, workspace_id: &WorkspaceId, source: PreloadSource) {
        let key = CacheKey::workspace(user_id.clone(), workspace_id.clone());
        if tokio::runtime::Handle::try_current().is_err() {
            debug!(key = %key, "No runtime available, ignoring navigation intent");
            return;
        }

        let weak: Weak<PreloaderInner> = Arc::downgrade(&self.inner);
        let target = key.clone();
        self.inner.intents.arm((key, source), move || async move {
            if let Some(inner) = weak.upgrade() {
                PermissionPreloader { inner }
                    .preload(target, PreloadPriority::Medium, source)
                    .await;
            }
        });
        trace!(workspace_id = %workspace_id, %source, "Navigation intent armed");
    }

    /// Drop a pending intent before it fires. Returns false if none was pending.
    pub fn cancel_navigation_intent(&self, user_id: &UserId, workspace_id: &WorkspaceId, source: PreloadSource) -> bool {
        let key = CacheKey::workspace(user_id.clone(), workspace_id.clone());
        self.inner.intents.cancel(&(key, source))
    }

    /// Fire every pending intent now
    pub async fn flush_intents(&self) -> usize {
        self.inner.intents.flush_all().await
    }

    /// Record the transition into `workspace_id`, warm it, and preload predicted next scopes
    pub async fn update_workspace_context(&self, user_id: &UserId, workspace_id: &WorkspaceId) -> Vec<Prediction> {
        let now = SystemTime::now();
        let previous = {
            let mut context = self.inner.context.write();
            let previous = context
                .as_ref()
                .filter(|c| &c.user_id == user_id)
                .and_then(|c| c.workspace_id.clone());
            *context = Some(SessionContext {
                user_id: user_id.clone(),
                workspace_id: Some(workspace_id.clone()),
            });
            previous
        };

        if let Some(previous) = previous.filter(|p| p != workspace_id) {
            self.record_transition(&previous, workspace_id, now);
            self.persist_patterns(user_id).await;
        }

        join_all(self.common_permission_preloads(
            user_id,
            workspace_id,
            PreloadPriority::Medium,
            PreloadSource::Navigation,
        ))
        .await;

        self.predict_and_preload(user_id, workspace_id, now).await
    }

    /// Count one transition edge
    pub fn record_transition(&self, from: &WorkspaceId, to: &WorkspaceId, now: SystemTime) -> NavigationPattern {
        self.inner.patterns.write().record(from, to, now)
    }

    /// Scored candidates leaving `from`, best first
    pub fn predictions(&self, from: &WorkspaceId, now: SystemTime) -> Vec<(WorkspaceId, f64)> {
        let mut scored: Vec<(WorkspaceId, f64)> = self
            .inner
            .patterns
            .read()
            .candidates_from(from)
            .into_iter()
            .map(|pattern| {
                let score = confidence(&pattern, now);
                (pattern.to, score)
            })
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored
    }

    async fn predict_and_preload(&self, user_id: &UserId, from: &WorkspaceId, now: SystemTime) -> Vec<Prediction> {
        let threshold = self.inner.config.prediction_confidence_threshold;
        let confident: Vec<(WorkspaceId, f64)> = self
            .predictions(from, now)
            .into_iter()
            .filter(|(_, score)| *score >= threshold)
            .collect();

        let preloads = confident.iter().map(|(workspace, _)| {
            self.preload(
                CacheKey::workspace(user_id.clone(), workspace.clone()),
                PreloadPriority::Low,
                PreloadSource::Prediction,
            )
        });
        let results = join_all(preloads).await;

        let predictions: Vec<Prediction> = confident
            .into_iter()
            .zip(results)
            .map(|((workspace_id, confidence), preloaded)| Prediction {
                workspace_id,
                confidence,
                preloaded,
            })
            .collect();

        if !predictions.is_empty() {
            debug!(
                from = %from,
                predicted = predictions.len(),
                "Preloaded predicted workspaces"
            );
        }
        predictions
    }

    /// Preload one `(user, workspace?, permission?)` scope
    pub fn preload_permission(
        &self,
        user_id: &UserId,
        workspace_id: Option<&WorkspaceId>,
        permission: Option<&PermissionName>,
        priority: PreloadPriority,
        source: PreloadSource,
    ) -> BoxFuture<'static, bool> {
        let key = CacheKey {
            user_id: user_id.clone(),
            workspace_id: workspace_id.cloned(),
            permission: permission.cloned(),
        };
        self.preload(key, priority, source)
    }

    /// Preload a key through the registry.
    ///
    /// Duplicate and over-capacity requests are rejected before the returned
    /// future is first polled, which then resolves to false immediately.
    pub fn preload(&self, key: CacheKey, priority: PreloadPriority, source: PreloadSource) -> BoxFuture<'static, bool> {
        let guard = match self.inner.registry.try_register(key.clone(), priority, source) {
            Ok(guard) => guard,
            Err(rejection) => {
                {
                    let mut stats = self.inner.stats.lock();
                    stats.total_requests += 1;
                    match rejection {
                        PreloadRejection::Duplicate => stats.rejected_duplicate += 1,
                        PreloadRejection::CapacityReached => stats.rejected_capacity += 1,
                    }
                }
                trace!(key = %key, ?rejection, "Preload rejected");
                return futures::future::ready(false).boxed();
            }
        };

        {
            let mut stats = self.inner.stats.lock();
            stats.total_requests += 1;
            stats.accepted += 1;
            *stats.by_source.entry(source).or_default() += 1;
            *stats.by_priority.entry(priority).or_default() += 1;
        }

        let inner = Arc::clone(&self.inner);
        async move {
            let _guard = guard;
            let start = Instant::now();
            let timeout = inner.config.preload_timeout;

            let (success, timed_out) =
                match tokio::time::timeout(timeout, inner.cache.prefetch(key.clone())).await {
                    Ok(Ok(())) => (true, false),
                    Ok(Err(e)) => {
                        warn!(key = %key, %source, error = %e, "Preload failed");
                        (false, false)
                    }
                    Err(_) => {
                        warn!(
                            key = %key,
                            %source,
                            timeout_ms = timeout.as_millis() as u64,
                            "Preload timed out"
                        );
                        (false, true)
                    }
                };

            record_completion(&inner, start.elapsed(), success, timed_out);
            success
        }
        .boxed()
    }

    /// Defensive copy of the pattern history
    pub fn patterns(&self) -> Vec<NavigationPattern> {
        self.inner.patterns.read().patterns()
    }

    pub fn stats(&self) -> PreloaderStats {
        let mut stats = self.inner.stats.lock().clone();
        stats.in_flight = self.inner.registry.in_flight();
        stats.peak_in_flight = self.inner.registry.peak();
        stats.patterns = self.inner.patterns.read().len();
        stats.pending_intents = self.inner.intents.pending_count();
        stats
    }

    /// Forget the session: context, pending intents and in-memory patterns.
    ///
    /// In-flight preloads finish on their own; persisted history is kept.
    pub fn reset(&self) {
        *self.inner.context.write() = None;
        let cancelled = self.inner.intents.cancel_all();
        self.inner.patterns.write().clear();
        info!(cancelled_intents = cancelled, "Preloader reset");
    }

    fn storage_key(user_id: &UserId) -> String {
        format!("{}:{}", PATTERN_STORAGE_PREFIX, user_id)
    }

    async fn hydrate_patterns(&self, user_id: &UserId) {
        let Some(store) = &self.inner.store else {
            return;
        };

        let key = Self::storage_key(user_id);
        let patterns = match store.get_item(&key).await {
            Ok(Some(raw)) => match serde_json::from_str::<Vec<NavigationPattern>>(&raw) {
                Ok(patterns) => patterns,
                Err(e) => {
                    warn!(user_id = %user_id, error = %e, "Discarding corrupt pattern history");
                    Vec::new()
                }
            },
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Pattern store unreadable, starting empty");
                Vec::new()
            }
        };

        *self.inner.patterns.write() =
            PatternHistory::from_patterns(self.inner.config.pattern_history_size, patterns);
    }

    async fn persist_patterns(&self, user_id: &UserId) {
        let Some(store) = &self.inner.store else {
            return;
        };

        let serialized = match serde_json::to_string(&self.patterns()) {
            Ok(serialized) => serialized,
            Err(e) => {
                warn!(error = %e, "Pattern history serialization failed");
                return;
            }
        };
        if let Err(e) = store.set_item(&Self::storage_key(user_id), serialized).await {
            warn!(user_id = %user_id, error = %e, "Pattern history not persisted");
        }
    }
}

fn record_completion(inner: &PreloaderInner, elapsed: Duration, success: bool, timed_out: bool) {
    let mut stats = inner.stats.lock();
    if success {
        stats.successful += 1;
    } else {
        stats.failed += 1;
    }
    if timed_out {
        stats.timed_out += 1;
    }

    let completed = (stats.successful + stats.failed) as f64;
    let latency_ms = elapsed.as_secs_f64() * 1000.0;
    stats.average_latency_ms += (latency_ms - stats.average_latency_ms) / completed;
}
