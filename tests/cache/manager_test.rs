/*!
 * Permission Cache Manager Tests
 * Warm-up, TTL serving, invalidation and re-warm against a counting source
 */

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use workspace_permissions::notify::EventPayload;
use workspace_permissions::{
    CacheConfig, CacheKey, EventType, NotificationBus, NotificationConfig, PermissionCacheManager,
    PermissionEvent, PermissionName, PermissionPreloader, PermissionSource, PermissionValue,
    PreloadPriority, PreloadSource, PreloaderConfig, ScopeCache, SourceError,
    StaticPermissionSource, SubscribeOptions, UserId, WarmReport, WorkspaceId,
};

struct Fixture {
    source: Arc<StaticPermissionSource>,
    cache: Arc<ScopeCache>,
    bus: NotificationBus,
    manager: PermissionCacheManager,
}

fn fixture(ttl: Duration) -> Fixture {
    let source = Arc::new(StaticPermissionSource::new());
    source.grant("u1", "w1", ["documents:read", "documents:write"]);
    source.grant("u1", "w2", ["documents:read"]);
    source.grant("u2", "w1", ["documents:read"]);

    let cache = Arc::new(ScopeCache::with_ttl(source.clone(), ttl));
    let bus = NotificationBus::new(NotificationConfig::default());
    let manager = PermissionCacheManager::new(
        cache.clone(),
        bus.clone(),
        CacheConfig::default().with_ttl(ttl),
    );
    Fixture {
        source,
        cache,
        bus,
        manager,
    }
}

fn record(bus: &NotificationBus, event_type: EventType) -> Arc<Mutex<Vec<PermissionEvent>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    bus.subscribe(
        event_type,
        move |event| {
            sink.lock().push(event.clone());
            Ok(())
        },
        SubscribeOptions::new(),
    );
    seen
}

#[tokio::test(start_paused = true)]
async fn test_warm_serves_reads_until_ttl() {
    let f = fixture(Duration::from_secs(60));
    let user = UserId::from("u1");
    let w1 = WorkspaceId::from("w1");

    f.manager.warm_user_permission_cache(&user, &[w1.clone()]).await;
    assert_eq!(f.source.fetch_count(), 2);

    f.manager.get_permissions(&user, Some(&w1)).await.unwrap();
    f.manager.get_permissions(&user, None).await.unwrap();
    assert_eq!(f.source.fetch_count(), 2);

    tokio::time::advance(Duration::from_secs(61)).await;
    f.manager.get_permissions(&user, Some(&w1)).await.unwrap();
    assert_eq!(f.source.fetch_count(), 3);

    let metrics = f.manager.get_cache_metrics();
    assert_eq!(metrics.hits, 2);
    assert!(metrics.hit_rate > 0.0);
}

#[tokio::test(start_paused = true)]
async fn test_warm_survives_failing_workspace() {
    let f = fixture(Duration::from_secs(60));
    f.source.fail_workspace("w2");
    let errors = record(&f.bus, EventType::QueryError);

    let report = f
        .manager
        .warm_user_permission_cache(&"u1".into(), &["w1".into(), "w2".into()])
        .await;

    assert_eq!(
        report,
        WarmReport {
            requested: 3,
            warmed: 2,
            failed: 1
        }
    );
    assert_eq!(f.source.fetch_count(), 3);
    assert!(f.cache.contains(&CacheKey::workspace("u1".into(), "w1".into())));
    assert!(!f.cache.contains(&CacheKey::workspace("u1".into(), "w2".into())));

    let errors = errors.lock();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].workspace_id.as_ref().map(|w| w.as_str()), Some("w2"));
}

#[tokio::test(start_paused = true)]
async fn test_invalidate_announces_and_rewarms() {
    let f = fixture(Duration::from_secs(60));
    let invalidations = record(&f.bus, EventType::CacheInvalidated);
    let user = UserId::from("u1");
    let w1 = WorkspaceId::from("w1");
    let scope = CacheKey::workspace(user.clone(), w1.clone());

    f.manager
        .warm_user_permission_cache(&user, &[w1.clone(), "w2".into()])
        .await;
    f.source.clear_log();

    let evicted = f.manager.smart_invalidate_user_permissions(&user, Some(&w1));
    assert_eq!(evicted, vec![scope.clone()]);
    assert!(f.cache.contains(&CacheKey::workspace(user.clone(), "w2".into())));

    {
        let invalidations = invalidations.lock();
        assert_eq!(invalidations.len(), 1);
        match &invalidations[0].payload {
            EventPayload::CacheInvalidated { cache_keys, .. } => {
                assert!(cache_keys.iter().any(|key| key.contains("w1")));
            }
            other => panic!("unexpected payload: {:?}", other),
        }
    }

    assert_eq!(f.manager.pending_rewarms(), 1);
    tokio::time::sleep(f.manager.config().rewarm_delay + Duration::from_millis(10)).await;
    assert_eq!(f.manager.pending_rewarms(), 0);
    assert_eq!(f.source.fetches_for(&scope), 1);
    assert!(f.cache.contains(&scope));
}

#[tokio::test(start_paused = true)]
async fn test_repeated_invalidation_coalesces() {
    let f = fixture(Duration::from_secs(60));
    let user = UserId::from("u1");
    let w1 = WorkspaceId::from("w1");
    let scope = CacheKey::workspace(user.clone(), w1.clone());

    for _ in 0..3 {
        f.manager.smart_invalidate_user_permissions(&user, Some(&w1));
        tokio::time::advance(Duration::from_millis(20)).await;
    }
    assert_eq!(f.manager.flush_rewarms().await, 1);
    assert_eq!(f.source.fetches_for(&scope), 1);
}

#[tokio::test]
async fn test_user_invalidation_leaves_other_users() {
    let f = fixture(Duration::from_secs(60));
    f.manager
        .warm_user_permission_cache(&"u1".into(), &["w1".into()])
        .await;
    f.manager
        .warm_user_permission_cache(&"u2".into(), &["w1".into()])
        .await;

    let evicted = f.manager.smart_invalidate_user_permissions(&"u1".into(), None);
    assert_eq!(evicted.len(), 2);
    assert!(evicted.iter().all(|key| key.user_id.as_str() == "u1"));
    assert!(f.cache.contains(&CacheKey::user_context("u2".into())));

    let cleared = f.manager.clear_user(&"u2".into());
    assert_eq!(cleared.len(), 2);
    assert_eq!(f.manager.pending_rewarms(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_maintenance_sweeps_and_enforces_limit() {
    let f = fixture(Duration::from_secs(5));
    let user = UserId::from("u1");
    f.manager
        .warm_user_permission_cache(&user, &["w1".into(), "w2".into()])
        .await;

    tokio::time::advance(Duration::from_secs(6)).await;
    f.manager.get_permissions(&user, None).await.unwrap();

    let report = f.manager.perform_maintenance();
    assert_eq!(report.expired_removed, 2);
    assert_eq!(report.evicted, 0);
    assert_eq!(f.cache.len(), 1);

    let tight = PermissionCacheManager::new(
        f.cache.clone(),
        f.bus.clone(),
        CacheConfig::default().with_max_cache_bytes(1),
    );
    assert!(tight.get_cache_metrics().over_limit);
    let report = tight.perform_maintenance();
    assert_eq!(report.evicted, 1);
    assert_eq!(report.bytes_after, 0);
    assert!(f.cache.is_empty());
}

#[tokio::test]
async fn test_has_permission_reads_through_cache() {
    let f = fixture(Duration::from_secs(60));
    let user = UserId::from("u1");
    let w1 = WorkspaceId::from("w1");

    assert!(f.manager.has_permission(&user, Some(&w1), &"documents:write".into()).await);
    assert!(f.manager.has_permission(&user, Some(&w1), &"documents:write".into()).await);
    assert!(!f.manager.has_permission(&user, Some(&"w2".into()), &"documents:write".into()).await);
    assert_eq!(f.source.fetch_count(), 2);
}

/// Answers with the grants in place when a fetch starts, after a delay
struct StartSnapshotSource {
    granted: Mutex<BTreeSet<PermissionName>>,
    fetches: AtomicUsize,
    latency: Duration,
}

impl StartSnapshotSource {
    fn new(granted: &[&str], latency: Duration) -> Self {
        Self {
            granted: Mutex::new(granted.iter().map(|p| PermissionName::from(*p)).collect()),
            fetches: AtomicUsize::new(0),
            latency,
        }
    }

    fn revoke_all(&self) {
        self.granted.lock().clear();
    }

    fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl PermissionSource for StartSnapshotSource {
    fn fetch<'a>(&'a self, _key: &'a CacheKey) -> BoxFuture<'a, Result<PermissionValue, SourceError>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let value = PermissionValue::Set(self.granted.lock().clone());
        let latency = self.latency;
        async move {
            tokio::time::sleep(latency).await;
            Ok(value)
        }
        .boxed()
    }
}

#[tokio::test(start_paused = true)]
async fn test_fetch_in_flight_during_invalidation_is_not_cached() {
    let ttl = Duration::from_secs(60);
    let source = Arc::new(StartSnapshotSource::new(&["documents:read"], Duration::from_millis(50)));
    let cache = Arc::new(ScopeCache::with_ttl(source.clone(), ttl));
    let manager = PermissionCacheManager::new(
        cache.clone(),
        NotificationBus::new(NotificationConfig::default()),
        CacheConfig::default().with_ttl(ttl),
    );
    let user = UserId::from("u1");
    let w1 = WorkspaceId::from("w1");
    let scope = CacheKey::workspace(user.clone(), w1.clone());

    let reader = {
        let manager = manager.clone();
        let (user, w1) = (user.clone(), w1.clone());
        tokio::spawn(async move { manager.get_permissions(&user, Some(&w1)).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    source.revoke_all();
    manager.smart_invalidate_user_permissions(&user, Some(&w1));

    // The in-flight read still answers with what it fetched, but does not cache it
    let in_flight = reader.await.unwrap().unwrap();
    assert_eq!(
        in_flight,
        PermissionValue::Set(BTreeSet::from([PermissionName::from("documents:read")]))
    );
    assert!(!cache.contains(&scope));

    tokio::time::sleep(manager.config().rewarm_delay + Duration::from_millis(100)).await;
    let value = manager.get_permissions(&user, Some(&w1)).await.unwrap();
    assert_eq!(value, PermissionValue::Set(BTreeSet::new()));
    assert_eq!(source.fetch_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_warm_and_preload_of_one_scope_fetch_once() {
    let source = Arc::new(StaticPermissionSource::new().with_latency(Duration::from_millis(50)));
    source.grant("u1", "w1", ["documents:read"]);
    let cache = Arc::new(ScopeCache::new(source.clone()));
    let manager = PermissionCacheManager::new(
        cache.clone(),
        NotificationBus::new(NotificationConfig::default()),
        CacheConfig::default(),
    );
    let preloader = PermissionPreloader::new(manager.clone(), PreloaderConfig::default());
    let user = UserId::from("u1");
    let w1 = WorkspaceId::from("w1");
    let context = CacheKey::user_context(user.clone());

    // Both start on the context scope at the same instant
    let warm_ids = [w1.clone()];
    let warm = manager.warm_user_permission_cache(&user, &warm_ids);
    let preload = preloader.preload(context.clone(), PreloadPriority::High, PreloadSource::Initialization);
    let (report, preloaded) = tokio::join!(warm, preload);

    assert_eq!(report.failed, 0);
    assert!(preloaded);
    assert_eq!(source.fetches_for(&context), 1);
    assert_eq!(source.fetches_for(&CacheKey::workspace(user, w1)), 1);
    assert_eq!(cache.in_flight(), 0);
}
