/*!
 * Permission Sources
 * Remote transport boundary and a static in-process source
 */

use crate::core::errors::SourceError;
use crate::core::types::{CacheKey, PermissionName, PermissionValue, QueryKind, UserId, WorkspaceId};
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Fetches authoritative permission facts (the remote query transport)
pub trait PermissionSource: Send + Sync {
    fn fetch<'a>(&'a self, key: &'a CacheKey) -> BoxFuture<'a, Result<PermissionValue, SourceError>>;
}

type Grants = BTreeMap<UserId, BTreeMap<WorkspaceId, BTreeSet<PermissionName>>>;

/// Source backed by an in-process grant table.
///
/// Records every fetch and supports injected latency and failures, which
/// makes it usable both as a demo backend and as a test double.
#[derive(Default)]
pub struct StaticPermissionSource {
    grants: RwLock<Grants>,
    failing_workspaces: RwLock<HashSet<WorkspaceId>>,
    offline: AtomicBool,
    latency: Mutex<Duration>,
    fetch_log: Mutex<Vec<CacheKey>>,
}

impl StaticPermissionSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(self, latency: Duration) -> Self {
        *self.latency.lock() = latency;
        self
    }

    /// Grant permissions to a user inside a workspace
    pub fn grant<I, P>(&self, user_id: impl Into<UserId>, workspace_id: impl Into<WorkspaceId>, permissions: I)
    where
        I: IntoIterator<Item = P>,
        P: Into<PermissionName>,
    {
        self.grants
            .write()
            .entry(user_id.into())
            .or_default()
            .entry(workspace_id.into())
            .or_default()
            .extend(permissions.into_iter().map(Into::into));
    }

    /// Remove a user's access to a workspace
    pub fn revoke_workspace(&self, user_id: &UserId, workspace_id: &WorkspaceId) {
        if let Some(workspaces) = self.grants.write().get_mut(user_id) {
            workspaces.remove(workspace_id);
        }
    }

    /// Make every fetch scoped to `workspace_id` fail
    pub fn fail_workspace(&self, workspace_id: impl Into<WorkspaceId>) {
        self.failing_workspaces.write().insert(workspace_id.into());
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Relaxed);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetch_log.lock().len()
    }

    /// Every fetched key in call order
    pub fn fetches(&self) -> Vec<CacheKey> {
        self.fetch_log.lock().clone()
    }

    pub fn fetches_for(&self, key: &CacheKey) -> usize {
        self.fetch_log.lock().iter().filter(|k| *k == key).count()
    }

    pub fn clear_log(&self) {
        self.fetch_log.lock().clear();
    }

    fn resolve(&self, key: &CacheKey) -> Result<PermissionValue, SourceError> {
        if self.offline.load(Ordering::Relaxed) {
            return Err(SourceError::Unavailable("source offline".into()));
        }
        if let Some(workspace) = &key.workspace_id {
            if self.failing_workspaces.read().contains(workspace) {
                return Err(SourceError::Rejected {
                    status: 503,
                    message: format!("workspace {} unavailable", workspace),
                });
            }
        }

        let grants = self.grants.read();
        let workspaces = grants.get(&key.user_id);
        let value = match key.kind() {
            QueryKind::UserContext => PermissionValue::Context(workspaces.cloned().unwrap_or_default()),
            QueryKind::WorkspacePermissions => PermissionValue::Set(
                workspaces
                    .zip(key.workspace_id.as_ref())
                    .and_then(|(map, ws)| map.get(ws).cloned())
                    .unwrap_or_default(),
            ),
            QueryKind::PermissionCheck => {
                let allowed = match (workspaces, &key.permission) {
                    (Some(map), Some(permission)) => match &key.workspace_id {
                        Some(ws) => map.get(ws).is_some_and(|set| set.contains(permission)),
                        None => map.values().any(|set| set.contains(permission)),
                    },
                    _ => false,
                };
                PermissionValue::Allowed(allowed)
            }
        };
        Ok(value)
    }
}

impl PermissionSource for StaticPermissionSource {
    fn fetch<'a>(&'a self, key: &'a CacheKey) -> BoxFuture<'a, Result<PermissionValue, SourceError>> {
        self.fetch_log.lock().push(key.clone());
        let latency = *self.latency.lock();
        async move {
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            self.resolve(key)
        }
        .boxed()
    }
}
