/*!
 * Audit Logger Tests
 * Persistence, retention, queries and sink forwarding
 */

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use workspace_permissions::audit::{SortBy, SortOrder};
use workspace_permissions::{
    AuditConfig, AuditFilter, AuditLogger, DurableStore, EventType, LogLevel, LogRecord, LogSink,
    MemoryStore, PermissionEvent,
};
use workspace_permissions::audit::MemorySink;

fn warmed(user: &str, workspace: &str) -> PermissionEvent {
    PermissionEvent::cache_warmed(user.into(), Some(workspace.into()), vec![], "warm")
}

#[derive(Default)]
struct FlakySink {
    failing: AtomicBool,
    delivered: Mutex<Vec<LogRecord>>,
}

impl LogSink for FlakySink {
    fn send<'a>(&'a self, records: &'a [LogRecord]) -> BoxFuture<'a, anyhow::Result<()>> {
        async move {
            if self.failing.load(Ordering::SeqCst) {
                anyhow::bail!("collector unavailable");
            }
            self.delivered.lock().extend_from_slice(records);
            Ok(())
        }
        .boxed()
    }
}

#[tokio::test(start_paused = true)]
async fn test_entries_survive_restart() {
    let store = Arc::new(MemoryStore::new());
    let config = AuditConfig::default();

    let logger = AuditLogger::open(config.clone(), store.clone()).await;
    logger.log(&warmed("u1", "w1"), None);
    logger.log(&warmed("u1", "w2"), None);

    // Debounced: nothing written until the quiet period passes
    assert!(store.get_item(&config.storage_key).await.unwrap().is_none());
    tokio::time::sleep(config.persist_debounce + Duration::from_millis(10)).await;
    assert!(store.get_item(&config.storage_key).await.unwrap().is_some());

    let reopened = AuditLogger::open(config, store).await;
    assert_eq!(reopened.len(), 2);
    assert_eq!(
        reopened.get_entries(&AuditFilter::new().workspace("w2")).len(),
        1
    );
}

#[tokio::test]
async fn test_corrupt_store_starts_empty() {
    let store = Arc::new(MemoryStore::new());
    let config = AuditConfig::default();
    store
        .set_item(&config.storage_key, "{ broken".to_string())
        .await
        .unwrap();

    let logger = AuditLogger::open(config, store).await;
    assert!(logger.is_empty());
    logger.log(&warmed("u1", "w1"), None);
    assert_eq!(logger.len(), 1);
}

#[tokio::test]
async fn test_read_only_store_keeps_memory_log() {
    let store = Arc::new(MemoryStore::new());
    store.set_read_only(true);

    let logger = AuditLogger::open(AuditConfig::default(), store).await;
    logger.log(&warmed("u1", "w1"), None);
    assert!(logger.flush().await.is_err());
    assert_eq!(logger.len(), 1);
}

fn workspaces(records: &[LogRecord]) -> Vec<String> {
    records
        .iter()
        .filter_map(|record| record.context.get("workspace_id"))
        .filter_map(|value| value.as_str().map(str::to_string))
        .collect()
}

#[tokio::test]
async fn test_failing_store_still_feeds_capped_sink() {
    let store = Arc::new(MemoryStore::new());
    store.set_read_only(true);
    let sink = Arc::new(MemorySink::new());

    let logger = AuditLogger::open(AuditConfig::default().with_max_entries(10), store.clone()).await;
    logger.set_sink(sink.clone());
    for i in 0..50 {
        logger.log(&warmed("u1", &format!("w{}", i)), None);
    }
    assert_eq!(logger.pending_records(), 10);

    assert!(logger.flush().await.is_err());
    assert_eq!(logger.len(), 10);
    assert_eq!(logger.pending_records(), 0);

    let expected: Vec<String> = (40..50).map(|i| format!("w{}", i)).collect();
    assert_eq!(workspaces(&sink.records()), expected);

    store.set_read_only(false);
    logger.flush().await.unwrap();
    assert_eq!(sink.len(), 10);
}

#[tokio::test]
async fn test_sink_retry_keeps_newest_records() {
    let sink = Arc::new(FlakySink::default());
    let logger = AuditLogger::new(AuditConfig::default().with_max_entries(3));
    logger.set_sink(sink.clone());

    sink.failing.store(true, Ordering::SeqCst);
    for w in ["w0", "w1", "w2"] {
        logger.log(&warmed("u1", w), None);
    }
    logger.flush().await.unwrap();
    assert_eq!(logger.pending_records(), 3);

    logger.log(&warmed("u1", "w3"), None);
    logger.log(&warmed("u1", "w4"), None);
    assert_eq!(logger.pending_records(), 3);

    sink.failing.store(false, Ordering::SeqCst);
    logger.flush().await.unwrap();
    assert_eq!(workspaces(&sink.delivered.lock()), vec!["w2", "w3", "w4"]);
}

#[tokio::test]
async fn test_cleanup_twice() {
    let logger = AuditLogger::new(AuditConfig::default());
    for w in ["w1", "w2", "w3"] {
        logger.log(&warmed("u1", w), None);
    }

    let cutoff = SystemTime::now() + Duration::from_secs(1);
    assert_eq!(logger.cleanup(cutoff), 3);
    assert_eq!(logger.cleanup(cutoff), 0);
    assert!(logger.is_empty());
}

#[tokio::test]
async fn test_sink_receives_batches_and_retries() {
    let sink = Arc::new(FlakySink::default());
    let logger = AuditLogger::new(AuditConfig::default());
    logger.set_sink(sink.clone());
    logger.set_session(Some("session-1".to_string()));

    sink.failing.store(true, Ordering::SeqCst);
    logger.log(&warmed("u1", "w1"), None);
    logger.flush().await.unwrap();
    assert!(sink.delivered.lock().is_empty());

    sink.failing.store(false, Ordering::SeqCst);
    logger.log(&warmed("u1", "w2"), None);
    logger.flush().await.unwrap();

    let delivered = sink.delivered.lock();
    assert_eq!(delivered.len(), 2);
    assert!(delivered
        .iter()
        .all(|record| record.tags.contains(&EventType::CacheWarmed.as_str().to_string())));
}

#[test]
fn test_query_filters_sort_and_paginate() {
    let logger = AuditLogger::new(AuditConfig::default());
    let base = SystemTime::now();
    for (i, user) in ["u1", "u2", "u1", "u1"].into_iter().enumerate() {
        let event = warmed(user, "w1").at(base + Duration::from_secs(i as u64));
        logger.log(&event, None);
    }
    logger.log(
        &PermissionEvent::query_error("u1".into(), None, "warm", "offline"),
        None,
    );

    let u1 = logger.get_entries(&AuditFilter::new().user("u1"));
    assert_eq!(u1.len(), 4);

    let errors = logger.get_entries(&AuditFilter::new().level(LogLevel::Error));
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].event.event_type(), EventType::QueryError);

    let page = logger.get_entries(
        &AuditFilter::new()
            .event_type(EventType::CacheWarmed)
            .sort(SortBy::Timestamp, SortOrder::Asc)
            .offset(1)
            .limit(2),
    );
    let users: Vec<&str> = page.iter().map(|e| e.event.user_id.as_str()).collect();
    assert_eq!(users, vec!["u2", "u1"]);

    let window = logger.get_entries(&AuditFilter::new().time_range(
        Some(base + Duration::from_secs(1)),
        Some(base + Duration::from_secs(2)),
    ));
    assert_eq!(window.len(), 2);

    let stats = logger.stats();
    assert_eq!(stats.total_entries, 5);
    assert_eq!(stats.by_type.get(&EventType::CacheWarmed), Some(&4));
}
