/*!
 * Event Batching Tests
 * Noisy event types coalesce during the quiet period
 */

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use workspace_permissions::notify::DebouncedEmit;
use workspace_permissions::{
    EventType, NotificationBus, NotificationConfig, PermissionEvent, SubscribeOptions,
};

fn recording_bus(config: NotificationConfig) -> (NotificationBus, Arc<Mutex<Vec<PermissionEvent>>>) {
    let bus = NotificationBus::new(config);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    bus.subscribe_all(
        move |event| {
            sink.lock().push(event.clone());
            Ok(())
        },
        SubscribeOptions::new(),
    );
    (bus, seen)
}

fn warmed(source: &str) -> PermissionEvent {
    PermissionEvent::cache_warmed("u1".into(), Some("w1".into()), vec!["k".into()], source)
}

#[tokio::test(start_paused = true)]
async fn test_quiet_period_coalesces_burst() {
    let config = NotificationConfig::default();
    let quiet = config.batch_quiet_period;
    let (bus, seen) = recording_bus(config);

    for source in ["warm", "preload", "warm"] {
        assert!(matches!(bus.emit_debounced(warmed(source)), DebouncedEmit::Buffered { .. }));
        tokio::time::advance(Duration::from_millis(50)).await;
    }
    assert!(seen.lock().is_empty());
    assert_eq!(bus.pending_batches(), 1);

    tokio::time::sleep(quiet + Duration::from_millis(10)).await;
    let seen = seen.lock();
    assert_eq!(seen.len(), 1);
    let batch = seen[0].batch.as_ref().unwrap();
    assert_eq!(batch.size, 3);
    assert_eq!(batch.sub_kinds.len(), 2);
    assert_eq!(bus.pending_batches(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_batch_cap_flushes_immediately() {
    let config = NotificationConfig::default();
    let cap = config.max_batch_size;
    let (bus, seen) = recording_bus(config);

    for _ in 0..cap - 1 {
        bus.emit_debounced(warmed("warm"));
    }
    assert!(matches!(bus.emit_debounced(warmed("warm")), DebouncedEmit::Flushed(_)));
    assert_eq!(seen.lock().len(), 1);
    assert_eq!(seen.lock()[0].batch.as_ref().map(|b| b.size), Some(cap));
}

#[tokio::test(start_paused = true)]
async fn test_non_noisy_types_bypass_batching() {
    let (bus, seen) = recording_bus(NotificationConfig::default());
    let event = PermissionEvent::check_failed("u1".into(), None, "documents:read".into(), "offline");

    assert!(matches!(bus.emit_debounced(event), DebouncedEmit::Immediate(_)));
    assert_eq!(seen.lock().len(), 1);
    assert_eq!(seen.lock()[0].event_type(), EventType::CheckFailed);
}

#[tokio::test(start_paused = true)]
async fn test_manual_flush_and_separate_keys() {
    let (bus, seen) = recording_bus(NotificationConfig::default());

    bus.emit_debounced(warmed("warm"));
    bus.emit_debounced(PermissionEvent::cache_warmed("u2".into(), None, vec![], "warm"));
    bus.emit_debounced(PermissionEvent::cache_invalidated("u1".into(), None, vec![], "manual"));
    assert_eq!(bus.pending_batches(), 3);

    assert_eq!(bus.flush_pending(), 3);
    assert_eq!(seen.lock().len(), 3);
    // Singletons are delivered unchanged
    assert!(seen.lock().iter().all(|event| event.batch.is_none()));
}
