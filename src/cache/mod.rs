/*!
 * Permission Cache Manager
 * Warms, invalidates and maintains cached permission facts per scope
 *
 * All reads and writes go through the `ScopeCacheAdapter`. Warming is
 * best-effort: a failing scope is logged and reported, never propagated.
 * Invalidation evicts a scope, announces it on the bus, then schedules a
 * debounced re-warm of exactly that scope.
 */

use crate::adapter::{QuerySpec, ScopeCacheAdapter, Selector};
use crate::core::config::CacheConfig;
use crate::core::errors::CacheError;
use crate::core::timer::DebounceTimer;
use crate::core::types::{CacheKey, PermissionName, PermissionValue, UserId, WorkspaceId};
use crate::notify::{NotificationBus, PermissionEvent};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Outcome of warming a user's cache
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarmReport {
    pub requested: usize,
    pub warmed: usize,
    pub failed: usize,
}

/// Cache size and hit accounting
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheMetrics {
    pub entry_count: usize,
    pub estimated_bytes: usize,
    pub compressed_entries: usize,
    pub size_limit_bytes: usize,
    pub over_limit: bool,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

/// What a maintenance run did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceReport {
    pub expired_removed: usize,
    /// Entries dropped by the bulk eviction after the sweep
    pub evicted: usize,
    pub bytes_before: usize,
    pub bytes_after: usize,
}

/// Permission cache manager
#[derive(Clone)]
pub struct PermissionCacheManager {
    adapter: Arc<dyn ScopeCacheAdapter>,
    bus: NotificationBus,
    config: CacheConfig,
    rewarm: DebounceTimer<CacheKey>,
}

impl PermissionCacheManager {
    pub fn new(adapter: Arc<dyn ScopeCacheAdapter>, bus: NotificationBus, config: CacheConfig) -> Self {
        Self {
            rewarm: DebounceTimer::new(config.rewarm_delay),
            adapter,
            bus,
            config,
        }
    }

    pub fn adapter(&self) -> &Arc<dyn ScopeCacheAdapter> {
        &self.adapter
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn query_spec(&self, key: CacheKey) -> QuerySpec {
        QuerySpec::new(key).with_ttl(self.config.default_ttl)
    }

    /// Context-wide fetch first, then each priority workspace in parallel
    pub async fn warm_user_permission_cache(
        &self,
        user_id: &UserId,
        priority_workspaces: &[WorkspaceId],
    ) -> WarmReport {
        let start = Instant::now();
        let mut report = WarmReport {
            requested: 1 + priority_workspaces.len(),
            ..Default::default()
        };
        let mut warmed_keys = Vec::new();

        let context_key = CacheKey::user_context(user_id.clone());
        match self.adapter.query(self.query_spec(context_key.clone())).await {
            Ok(_) => {
                report.warmed += 1;
                warmed_keys.push(context_key.to_string());
            }
            Err(e) => {
                report.failed += 1;
                self.warm_failed(user_id, None, &e);
            }
        }

        let fetches = priority_workspaces.iter().map(|workspace| {
            let key = CacheKey::workspace(user_id.clone(), workspace.clone());
            async move {
                let result = self.adapter.query(self.query_spec(key.clone())).await;
                (workspace, key, result)
            }
        });

        for (workspace, key, result) in join_all(fetches).await {
            match result {
                Ok(_) => {
                    report.warmed += 1;
                    warmed_keys.push(key.to_string());
                }
                Err(e) => {
                    report.failed += 1;
                    self.warm_failed(user_id, Some(workspace), &e);
                }
            }
        }

        if !warmed_keys.is_empty() {
            self.bus.emit_debounced(PermissionEvent::cache_warmed(
                user_id.clone(),
                None,
                warmed_keys,
                "warm",
            ));
        }

        info!(
            user_id = %user_id,
            warmed = report.warmed,
            failed = report.failed,
            duration_ms = start.elapsed().as_millis() as u64,
            "Permission cache warmed"
        );
        report
    }

    fn warm_failed(&self, user_id: &UserId, workspace_id: Option<&WorkspaceId>, error: &CacheError) {
        warn!(
            user_id = %user_id,
            workspace_id = workspace_id.map(|w| w.as_str()),
            error = %error,
            "Permission warm failed"
        );
        self.bus.emit(PermissionEvent::query_error(
            user_id.clone(),
            workspace_id.cloned(),
            "warm",
            error.to_string(),
        ));
    }

    /// Evict a workspace scope (or every entry of the user) and schedule a re-warm.
    ///
    /// Returns the evicted keys.
    pub fn smart_invalidate_user_permissions(
        &self,
        user_id: &UserId,
        workspace_id: Option<&WorkspaceId>,
    ) -> Vec<CacheKey> {
        let (selector, scope_key) = match workspace_id {
            Some(workspace) => (
                Selector::Workspace {
                    user_id: user_id.clone(),
                    workspace_id: workspace.clone(),
                },
                CacheKey::workspace(user_id.clone(), workspace.clone()),
            ),
            None => (
                Selector::User(user_id.clone()),
                CacheKey::user_context(user_id.clone()),
            ),
        };

        let evicted = self.adapter.evict(&selector);

        let mut cache_keys = vec![scope_key.to_string()];
        cache_keys.extend(
            evicted
                .iter()
                .filter(|key| **key != scope_key)
                .map(|key| key.to_string()),
        );
        self.bus.emit(PermissionEvent::cache_invalidated(
            user_id.clone(),
            workspace_id.cloned(),
            cache_keys,
            "invalidate",
        ));

        debug!(
            user_id = %user_id,
            workspace_id = workspace_id.map(|w| w.as_str()),
            evicted = evicted.len(),
            "Permission scope invalidated"
        );

        self.schedule_rewarm(scope_key);
        evicted
    }

    /// Evict every entry of the user and drop pending re-warms. Used on logout.
    pub fn clear_user(&self, user_id: &UserId) -> Vec<CacheKey> {
        let cancelled = self.rewarm.cancel_all();
        let evicted = self.adapter.evict(&Selector::User(user_id.clone()));

        if !evicted.is_empty() {
            self.bus.emit(PermissionEvent::cache_invalidated(
                user_id.clone(),
                None,
                evicted.iter().map(|key| key.to_string()).collect(),
                "logout",
            ));
        }

        info!(
            user_id = %user_id,
            evicted = evicted.len(),
            cancelled_rewarms = cancelled,
            "User permission cache cleared"
        );
        evicted
    }

    /// Debounced background refetch of one scope
    fn schedule_rewarm(&self, key: CacheKey) {
        if tokio::runtime::Handle::try_current().is_err() {
            debug!(key = %key, "No runtime available, skipping re-warm");
            return;
        }

        let adapter = Arc::clone(&self.adapter);
        let query = self.query_spec(key.clone());
        self.rewarm.arm(key, move || async move {
            let key = query.key.clone();
            match adapter.query(query).await {
                Ok(_) => debug!(key = %key, "Invalidated scope re-warmed"),
                Err(e) => warn!(key = %key, error = %e, "Re-warm failed"),
            }
        });
    }

    /// Scopes with a re-warm still waiting
    pub fn pending_rewarms(&self) -> usize {
        self.rewarm.pending_count()
    }

    /// Run every pending re-warm now
    pub async fn flush_rewarms(&self) -> usize {
        self.rewarm.flush_all().await
    }

    pub fn get_cache_metrics(&self) -> CacheMetrics {
        let snapshot = self.adapter.extract_snapshot();
        let stats = self.adapter.stats();
        let estimated_bytes = snapshot.total_bytes();

        CacheMetrics {
            entry_count: snapshot.len(),
            estimated_bytes,
            compressed_entries: snapshot.compressed_count(),
            size_limit_bytes: self.config.max_cache_bytes,
            over_limit: estimated_bytes > self.config.max_cache_bytes,
            hits: stats.hits,
            misses: stats.misses,
            hit_rate: stats.hit_rate,
        }
    }

    /// TTL sweep, then a bulk eviction if still over the size limit
    pub fn perform_maintenance(&self) -> MaintenanceReport {
        let bytes_before = self.adapter.extract_snapshot().total_bytes();
        let expired_removed = self.adapter.gc();

        let mut report = MaintenanceReport {
            expired_removed,
            bytes_before,
            bytes_after: self.adapter.extract_snapshot().total_bytes(),
            ..Default::default()
        };

        if report.bytes_after > self.config.max_cache_bytes {
            let evicted = self.adapter.evict(&Selector::All);
            report.evicted = evicted.len();
            report.bytes_after = self.adapter.extract_snapshot().total_bytes();
            warn!(
                evicted = report.evicted,
                bytes_before,
                limit = self.config.max_cache_bytes,
                "Permission cache over size limit, evicted all entries"
            );
        } else {
            debug!(expired_removed, bytes = report.bytes_after, "Cache maintenance complete");
        }
        report
    }

    /// Cached read of a context or workspace permission set
    pub async fn get_permissions(
        &self,
        user_id: &UserId,
        workspace_id: Option<&WorkspaceId>,
    ) -> Result<PermissionValue, CacheError> {
        let key = match workspace_id {
            Some(workspace) => CacheKey::workspace(user_id.clone(), workspace.clone()),
            None => CacheKey::user_context(user_id.clone()),
        };
        self.adapter.query(self.query_spec(key)).await
    }

    /// Cached permission check; failures deny and emit `checkFailed`
    pub async fn has_permission(
        &self,
        user_id: &UserId,
        workspace_id: Option<&WorkspaceId>,
        permission: &PermissionName,
    ) -> bool {
        let key = CacheKey::permission(user_id.clone(), workspace_id.cloned(), permission.clone());
        match self.adapter.query(self.query_spec(key)).await {
            Ok(value) => value.grants(workspace_id, permission),
            Err(e) => {
                warn!(
                    user_id = %user_id,
                    permission = %permission,
                    error = %e,
                    "Permission check failed, denying"
                );
                self.bus.emit(PermissionEvent::check_failed(
                    user_id.clone(),
                    workspace_id.cloned(),
                    permission.clone(),
                    e.to_string(),
                ));
                false
            }
        }
    }

    /// Fetch one key into the cache
    pub async fn prefetch(&self, key: CacheKey) -> Result<(), CacheError> {
        self.adapter.query(self.query_spec(key)).await.map(|_| ())
    }
}
