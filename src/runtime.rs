/*!
 * Permission Runtime
 * Application-root wiring of the permission subsystem
 *
 * Construction order follows the dependency graph:
 * store -> audit -> bus -> adapter -> cache manager -> compression, preloader.
 * The runtime owns the background tasks (compression, maintenance) and drives
 * the identity lifecycle.
 */

use crate::adapter::{PermissionSource, ScopeCache, ScopeCacheAdapter};
use crate::audit::{AuditLogger, LogSink};
use crate::cache::{MaintenanceReport, PermissionCacheManager, WarmReport};
use crate::compression::{CompressionEngine, CompressionTask};
use crate::core::config::Config;
use crate::core::errors::PermissionsError;
use crate::core::storage::DurableStore;
use crate::core::types::{UserId, WorkspaceId};
use crate::monitoring::span_operation;
use crate::notify::NotificationBus;
use crate::preload::PermissionPreloader;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Identity transitions the runtime reacts to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityChange {
    LoggedIn {
        user_id: UserId,
        /// Scope the session opens in
        workspace_id: Option<WorkspaceId>,
        /// Scopes to warm up front
        priority_workspaces: Vec<WorkspaceId>,
    },
    LoggedOut,
}

/// What an identity transition did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionReport {
    pub user_id: Option<UserId>,
    pub preloaded: usize,
    pub warm: Option<WarmReport>,
    pub evicted: usize,
}

/// Builder for `PermissionRuntime`
pub struct PermissionRuntimeBuilder {
    config: Config,
    source: Option<Arc<dyn PermissionSource>>,
    store: Option<Arc<dyn DurableStore>>,
    sink: Option<Arc<dyn LogSink>>,
    background: bool,
}

impl Default for PermissionRuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PermissionRuntimeBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
            source: None,
            store: None,
            sink: None,
            background: true,
        }
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Remote permission source (required)
    pub fn with_source(mut self, source: Arc<dyn PermissionSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Durable store for audit entries and navigation patterns
    pub fn with_store(mut self, store: Arc<dyn DurableStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// External log sink for persisted audit batches
    pub fn with_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Skip the compression and maintenance loops
    pub fn without_background_tasks(mut self) -> Self {
        self.background = false;
        self
    }

    /// Wire every component. Must run inside a tokio runtime.
    pub async fn build(self) -> Result<PermissionRuntime, PermissionsError> {
        let source = self
            .source
            .ok_or_else(|| PermissionsError::Configuration("permission source is required".into()))?;
        let config = self.config;

        let audit = match &self.store {
            Some(store) => AuditLogger::open(config.audit.clone(), Arc::clone(store)).await,
            None => {
                warn!("No durable store configured, audit log is memory-only");
                AuditLogger::new(config.audit.clone())
            }
        };
        if let Some(sink) = self.sink {
            audit.set_sink(sink);
        }

        let bus = NotificationBus::with_audit(config.notification.clone(), audit.clone());
        let cache = Arc::new(ScopeCache::with_ttl(source, config.cache.default_ttl));
        let adapter: Arc<dyn ScopeCacheAdapter> = cache.clone();
        let manager = PermissionCacheManager::new(Arc::clone(&adapter), bus.clone(), config.cache.clone());
        let compression = Arc::new(CompressionEngine::new(adapter, config.compression.clone()));
        let preloader = match &self.store {
            Some(store) => PermissionPreloader::with_store(manager.clone(), config.preloader.clone(), Arc::clone(store)),
            None => PermissionPreloader::new(manager.clone(), config.preloader.clone()),
        };

        let (compression_task, maintenance_task) = if self.background {
            (
                Some(compression.start()),
                Some(MaintenanceTask::spawn(manager.clone(), audit.clone(), &config)),
            )
        } else {
            (None, None)
        };

        info!(
            background = self.background,
            durable = self.store.is_some(),
            "Permission runtime initialized"
        );

        Ok(PermissionRuntime {
            config,
            cache,
            audit,
            bus,
            manager,
            compression,
            preloader,
            compression_task,
            maintenance_task,
            session: RwLock::new(None),
        })
    }
}

/// Fully wired permission subsystem
pub struct PermissionRuntime {
    config: Config,
    cache: Arc<ScopeCache>,
    audit: AuditLogger,
    bus: NotificationBus,
    manager: PermissionCacheManager,
    compression: Arc<CompressionEngine>,
    preloader: PermissionPreloader,
    compression_task: Option<CompressionTask>,
    maintenance_task: Option<MaintenanceTask>,
    session: RwLock<Option<UserId>>,
}

impl PermissionRuntime {
    pub fn builder() -> PermissionRuntimeBuilder {
        PermissionRuntimeBuilder::new()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cache(&self) -> &Arc<ScopeCache> {
        &self.cache
    }

    pub fn audit(&self) -> &AuditLogger {
        &self.audit
    }

    pub fn bus(&self) -> &NotificationBus {
        &self.bus
    }

    pub fn cache_manager(&self) -> &PermissionCacheManager {
        &self.manager
    }

    pub fn compression(&self) -> &Arc<CompressionEngine> {
        &self.compression
    }

    pub fn preloader(&self) -> &PermissionPreloader {
        &self.preloader
    }

    pub fn current_user(&self) -> Option<UserId> {
        self.session.read().clone()
    }

    /// Run a compression pass now, on the background task when one is running
    pub fn trigger_compression(&self) {
        match &self.compression_task {
            Some(task) => task.trigger(),
            None => {
                self.compression.run_pass();
            }
        }
    }

    /// Apply a login or logout
    pub async fn handle_identity_change(&self, change: IdentityChange) -> SessionReport {
        match change {
            IdentityChange::LoggedIn {
                user_id,
                workspace_id,
                priority_workspaces,
            } => self.login(user_id, workspace_id, priority_workspaces).await,
            IdentityChange::LoggedOut => self.logout().await,
        }
    }

    async fn login(
        &self,
        user_id: UserId,
        workspace_id: Option<WorkspaceId>,
        priority_workspaces: Vec<WorkspaceId>,
    ) -> SessionReport {
        let span = span_operation("session_login");

        let previous = self.session.read().clone();
        if previous.as_ref().is_some_and(|p| p != &user_id) {
            debug!(user_id = %user_id, "Identity switched without logout, closing previous session");
            self.logout().await;
        }

        *self.session.write() = Some(user_id.clone());
        self.audit.set_session(Some(Uuid::new_v4().to_string()));

        let preloaded = self.preloader.initialize(&user_id, workspace_id.as_ref()).await;
        let warm = self
            .manager
            .warm_user_permission_cache(&user_id, &priority_workspaces)
            .await;

        span.record_items(preloaded + warm.warmed);
        span.record_result(warm.failed == 0);
        info!(
            user_id = %user_id,
            preloaded,
            warmed = warm.warmed,
            failed = warm.failed,
            "Session started"
        );

        SessionReport {
            user_id: Some(user_id),
            preloaded,
            warm: Some(warm),
            evicted: 0,
        }
    }

    async fn logout(&self) -> SessionReport {
        let Some(user_id) = self.session.write().take() else {
            debug!("Logout without an active session");
            return SessionReport::default();
        };
        let span = span_operation("session_logout");

        let evicted = self.manager.clear_user(&user_id).len();
        self.preloader.reset();
        self.bus.flush_pending();

        if let Err(e) = self.audit.flush().await {
            span.record_error(&e);
            warn!(user_id = %user_id, error = %e, "Audit flush on logout failed");
        }
        self.audit.set_session(None);

        span.record_items(evicted);
        info!(user_id = %user_id, evicted, "Session ended");

        SessionReport {
            user_id: Some(user_id),
            evicted,
            ..Default::default()
        }
    }

    /// Stop background work and flush what is buffered
    pub async fn shutdown(mut self) -> Result<(), PermissionsError> {
        if let Some(task) = self.compression_task.take() {
            task.shutdown().await;
        }
        if let Some(task) = self.maintenance_task.take() {
            task.shutdown().await;
        }

        self.preloader.reset();
        self.bus.flush_pending();
        self.audit.flush().await?;

        info!("Permission runtime shut down");
        Ok(())
    }
}

/// Periodic cache maintenance and audit retention
struct MaintenanceTask {
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl MaintenanceTask {
    fn spawn(manager: PermissionCacheManager, audit: AuditLogger, config: &Config) -> Self {
        let period = config.cache.maintenance_interval;
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let report: MaintenanceReport = manager.perform_maintenance();
                        let expired_audit = audit.cleanup_expired();
                        debug!(
                            expired_entries = report.expired_removed,
                            evicted = report.evicted,
                            expired_audit,
                            "Maintenance tick"
                        );
                    }
                    _ = &mut shutdown_rx => {
                        debug!("Maintenance task received shutdown");
                        break;
                    }
                }
            }
        });

        info!(interval_ms = period.as_millis() as u64, "Maintenance task spawned");
        Self {
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "Maintenance task shutdown error");
            }
        }
    }
}

impl Drop for MaintenanceTask {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}
