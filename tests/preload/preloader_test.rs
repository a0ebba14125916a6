/*!
 * Preloader Tests
 * Deduplication, concurrency ceiling and timeouts under a slow source
 */

use futures::future::join_all;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use workspace_permissions::{
    CacheConfig, CacheKey, NotificationBus, NotificationConfig, PermissionCacheManager,
    PermissionPreloader, PreloadPriority, PreloadSource, PreloaderConfig, ScopeCache,
    StaticPermissionSource, UserId, WorkspaceId,
};

fn preloader(config: PreloaderConfig) -> (Arc<StaticPermissionSource>, PermissionPreloader) {
    let source = Arc::new(StaticPermissionSource::new().with_latency(Duration::from_millis(50)));
    for w in 1..=8 {
        source.grant("u1", format!("w{}", w), ["workspace:read", "documents:read"]);
    }
    let cache = Arc::new(ScopeCache::new(source.clone()));
    let manager = PermissionCacheManager::new(
        cache,
        NotificationBus::new(NotificationConfig::default()),
        CacheConfig::default(),
    );
    (source, PermissionPreloader::new(manager, config))
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_duplicates_yield_one_true() {
    let (source, preloader) = preloader(PreloaderConfig::default());
    let user = UserId::from("u1");
    let w1 = WorkspaceId::from("w1");
    let permission = "documents:read".into();

    let first = preloader.preload_permission(
        &user,
        Some(&w1),
        Some(&permission),
        PreloadPriority::High,
        PreloadSource::Hover,
    );
    let second = preloader.preload_permission(
        &user,
        Some(&w1),
        Some(&permission),
        PreloadPriority::High,
        PreloadSource::Focus,
    );
    let (a, b) = tokio::join!(first, second);

    assert_eq!((a, b), (true, false));
    assert_eq!(
        source.fetches_for(&CacheKey::permission(user, Some(w1), permission)),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn test_ceiling_never_exceeded() {
    let ceiling = 3;
    let (source, preloader) = preloader(PreloaderConfig::default().with_max_concurrent(ceiling));
    let user = UserId::from("u1");

    let preloads: Vec<_> = (1..=ceiling + 1)
        .map(|w| {
            preloader.preload(
                CacheKey::workspace(user.clone(), format!("w{}", w).into()),
                PreloadPriority::Medium,
                PreloadSource::Navigation,
            )
        })
        .collect();
    assert_eq!(preloader.registry().in_flight(), ceiling);

    let results = join_all(preloads).await;
    assert_eq!(results.iter().filter(|ok| **ok).count(), ceiling);
    assert_eq!(results.last(), Some(&false));

    let stats = preloader.stats();
    assert_eq!(stats.peak_in_flight, ceiling);
    assert_eq!(stats.rejected_capacity, 1);
    assert_eq!(stats.in_flight, 0);
    assert_eq!(source.fetch_count(), ceiling);
}

#[tokio::test(start_paused = true)]
async fn test_slot_released_after_completion() {
    let (_source, preloader) = preloader(PreloaderConfig::default().with_max_concurrent(1));
    let key = CacheKey::workspace("u1".into(), "w1".into());

    assert!(
        preloader
            .preload(key.clone(), PreloadPriority::High, PreloadSource::Focus)
            .await
    );
    // Already cached: succeeds without holding the slot afterwards
    assert!(
        preloader
            .preload(key, PreloadPriority::High, PreloadSource::Focus)
            .await
    );
    assert_eq!(preloader.registry().in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_counts_as_failure() {
    let (_source, preloader) = preloader(
        PreloaderConfig::default().with_preload_timeout(Duration::from_millis(30)),
    );
    let key = CacheKey::workspace("u1".into(), "w1".into());
    assert!(!preloader.preload(key, PreloadPriority::Low, PreloadSource::Prediction).await);

    let stats = preloader.stats();
    assert_eq!(stats.timed_out, 1);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.in_flight, 0);
}

#[tokio::test(start_paused = true)]
async fn test_source_failure_resolves_false() {
    let (source, preloader) = preloader(PreloaderConfig::default());
    source.set_offline(true);

    let key = CacheKey::user_context("u1".into());
    assert!(!preloader.preload(key, PreloadPriority::High, PreloadSource::Initialization).await);

    let stats = preloader.stats();
    assert_eq!(stats.timed_out, 0);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.by_priority.get(&PreloadPriority::High), Some(&1));
}

#[tokio::test(start_paused = true)]
async fn test_stats_track_sources_and_latency() {
    let (_source, preloader) = preloader(PreloaderConfig::default());
    let user = UserId::from("u1");

    preloader.initialize(&user, Some(&"w1".into())).await;
    preloader
        .preload(
            CacheKey::workspace(user.clone(), "w2".into()),
            PreloadPriority::Low,
            PreloadSource::Prediction,
        )
        .await;

    let stats = preloader.stats();
    let initialization = 1 + preloader.config().common_permissions.len() as u64;
    assert_eq!(stats.by_source.get(&PreloadSource::Initialization), Some(&initialization));
    assert_eq!(stats.by_source.get(&PreloadSource::Prediction), Some(&1));
    assert_eq!(stats.successful, initialization + 1);
    assert!(stats.average_latency_ms >= 50.0);
}
