/*!
 * Navigation Prediction Tests
 * Transition history drives preloads of likely next workspaces
 */

use std::sync::Arc;
use std::time::SystemTime;
use workspace_permissions::core::limits::CONFIDENCE_DECAY_WINDOW;
use workspace_permissions::preload::confidence;
use workspace_permissions::{
    CacheConfig, CacheKey, MemoryStore, NotificationBus, NotificationConfig,
    PermissionCacheManager, PermissionPreloader, PreloaderConfig, ScopeCache,
    StaticPermissionSource, UserId, WorkspaceId,
};

fn setup(store: Option<Arc<MemoryStore>>) -> (Arc<StaticPermissionSource>, PermissionPreloader) {
    let source = Arc::new(StaticPermissionSource::new());
    for w in ["w1", "w2", "w3", "w4"] {
        source.grant("u1", w, ["workspace:read"]);
    }
    let cache = Arc::new(ScopeCache::new(source.clone()));
    let manager = PermissionCacheManager::new(
        cache,
        NotificationBus::new(NotificationConfig::default()),
        CacheConfig::default(),
    );
    let preloader = match store {
        Some(store) => PermissionPreloader::with_store(manager, PreloaderConfig::default(), store),
        None => PermissionPreloader::new(manager, PreloaderConfig::default()),
    };
    (source, preloader)
}

#[tokio::test]
async fn test_frequent_edge_triggers_prediction() {
    let (source, preloader) = setup(None);
    let user = UserId::from("u1");
    let w1 = WorkspaceId::from("w1");
    let w2 = WorkspaceId::from("w2");
    let w3 = WorkspaceId::from("w3");

    preloader.initialize(&user, Some(&w1)).await;
    // One unrelated excursion
    preloader.update_workspace_context(&user, &w3).await;
    preloader.update_workspace_context(&user, &w1).await;

    for _ in 0..5 {
        preloader.update_workspace_context(&user, &w2).await;
        preloader.update_workspace_context(&user, &w1).await;
    }

    let w2_scope = CacheKey::workspace(user.clone(), w2.clone());
    let w3_scope = CacheKey::workspace(user.clone(), w3.clone());
    assert_eq!(source.fetches_for(&w2_scope), 1);
    assert_eq!(source.fetches_for(&w3_scope), 0);

    let predictions = preloader.predictions(&w1, SystemTime::now());
    assert_eq!(predictions[0].0, w2);
    assert!(predictions[0].1 >= preloader.config().prediction_confidence_threshold);
    assert!(predictions.iter().any(|(w, score)| *w == w3 && *score < 0.6));
}

#[tokio::test]
async fn test_update_returns_confident_predictions_only() {
    let (_source, preloader) = setup(None);
    let user = UserId::from("u1");
    let now = SystemTime::now();

    for _ in 0..6 {
        preloader.record_transition(&"w1".into(), &"w2".into(), now);
    }
    preloader.record_transition(&"w1".into(), &"w4".into(), now);

    let predictions = preloader.update_workspace_context(&user, &"w1".into()).await;
    assert_eq!(predictions.len(), 1);
    assert_eq!(predictions[0].workspace_id.as_str(), "w2");
    assert!(predictions[0].preloaded);
    assert!((predictions[0].confidence - 0.72).abs() < 1e-6);
}

#[tokio::test]
async fn test_same_workspace_records_nothing() {
    let (_source, preloader) = setup(None);
    let user = UserId::from("u1");

    preloader.initialize(&user, Some(&"w1".into())).await;
    preloader.update_workspace_context(&user, &"w1".into()).await;
    assert!(preloader.patterns().is_empty());
}

#[tokio::test]
async fn test_stale_history_decays() {
    let (_source, preloader) = setup(None);
    let long_ago = SystemTime::now() - CONFIDENCE_DECAY_WINDOW * 2;

    for _ in 0..5 {
        preloader.record_transition(&"w1".into(), &"w2".into(), long_ago);
    }
    let pattern = preloader.patterns().pop().unwrap();
    assert!((confidence(&pattern, SystemTime::now()) - 0.35).abs() < 1e-9);
    assert!(preloader.predictions(&"w1".into(), SystemTime::now())[0].1 < 0.6);
}

#[tokio::test]
async fn test_history_survives_restart() {
    let store = Arc::new(MemoryStore::new());
    let user = UserId::from("u1");

    {
        let (_source, preloader) = setup(Some(store.clone()));
        preloader.initialize(&user, Some(&"w1".into())).await;
        for _ in 0..5 {
            preloader.update_workspace_context(&user, &"w2".into()).await;
            preloader.update_workspace_context(&user, &"w1".into()).await;
        }
    }

    let (source, preloader) = setup(Some(store));
    preloader.initialize(&user, Some(&"w3".into())).await;
    assert_eq!(preloader.patterns().len(), 2);

    preloader.update_workspace_context(&user, &"w1".into()).await;
    assert_eq!(
        source.fetches_for(&CacheKey::workspace(user.clone(), "w2".into())),
        1
    );
}

#[tokio::test]
async fn test_corrupt_history_is_ignored() {
    use workspace_permissions::DurableStore;

    let store = Arc::new(MemoryStore::new());
    store
        .set_item("permission-preloader:patterns:u1", "not json".to_string())
        .await
        .unwrap();

    let (_source, preloader) = setup(Some(store));
    let warmed = preloader.initialize(&"u1".into(), None).await;
    assert_eq!(warmed, 1);
    assert!(preloader.patterns().is_empty());
}
