/*!
 * Notification Bus Tests
 * Filtering, dispatch order, audit hand-off and toasts
 */

use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use workspace_permissions::notify::{FilterReason, ListenerPriority, ToastKind};
use workspace_permissions::{
    AuditConfig, AuditFilter, AuditLogger, EventPayload, EventType, NotificationBus,
    NotificationConfig, PermissionEvent, SubscribeOptions,
};

fn granted(user: &str, workspace: &str) -> PermissionEvent {
    PermissionEvent::new(
        user.into(),
        EventPayload::Granted {
            permission: "documents:write".into(),
            granted_by: Some("admin".into()),
        },
    )
    .with_workspace(Some(workspace.into()))
}

fn revoked(user: &str) -> PermissionEvent {
    PermissionEvent::new(
        user.into(),
        EventPayload::Revoked {
            permission: "documents:write".into(),
            revoked_by: None,
        },
    )
}

fn counter(bus: &NotificationBus, event_type: EventType) -> Arc<AtomicUsize> {
    let count = Arc::new(AtomicUsize::new(0));
    let handle = Arc::clone(&count);
    bus.subscribe(
        event_type,
        move |_| {
            handle.fetch_add(1, Ordering::SeqCst);
            Ok(())
        },
        SubscribeOptions::new(),
    );
    count
}

#[test]
fn test_muted_type_skips_listeners_and_audit() {
    let audit = AuditLogger::new(AuditConfig::default());
    let bus = NotificationBus::with_audit(NotificationConfig::default(), audit.clone());
    let granted_calls = counter(&bus, EventType::Granted);
    let revoked_calls = counter(&bus, EventType::Revoked);
    let global_calls = Arc::new(AtomicUsize::new(0));
    let global = Arc::clone(&global_calls);
    bus.subscribe_all(
        move |_| {
            global.fetch_add(1, Ordering::SeqCst);
            Ok(())
        },
        SubscribeOptions::new(),
    );

    bus.mute(EventType::Granted);
    let muted = bus.emit(granted("u1", "w1"));
    let delivered = bus.emit(revoked("u1"));

    assert_eq!(muted.filtered, Some(FilterReason::Muted));
    assert_eq!(muted.delivered, 0);
    assert!(!muted.audited);
    assert_eq!(granted_calls.load(Ordering::SeqCst), 0);

    assert_eq!(delivered.delivered, 2);
    assert_eq!(revoked_calls.load(Ordering::SeqCst), 1);
    assert_eq!(global_calls.load(Ordering::SeqCst), 1);

    assert_eq!(audit.len(), 1);
    assert!(audit
        .get_entries(&AuditFilter::new().event_type(EventType::Granted))
        .is_empty());

    bus.unmute(EventType::Granted);
    assert_eq!(bus.emit(granted("u1", "w1")).delivered, 2);
    assert_eq!(audit.len(), 2);
}

#[test]
fn test_priority_order_and_once() {
    let bus = NotificationBus::new(NotificationConfig::default());
    let order = Arc::new(Mutex::new(Vec::new()));

    for (name, priority, once) in [
        ("low", ListenerPriority::Low, false),
        ("normal", ListenerPriority::Normal, false),
        ("high-once", ListenerPriority::High, true),
    ] {
        let order = Arc::clone(&order);
        let mut options = SubscribeOptions::new().priority(priority);
        if once {
            options = options.once();
        }
        bus.subscribe(
            EventType::Revoked,
            move |_| {
                order.lock().push(name);
                Ok(())
            },
            options,
        );
    }

    bus.emit(revoked("u1"));
    bus.emit(revoked("u1"));
    assert_eq!(
        *order.lock(),
        vec!["high-once", "normal", "low", "normal", "low"]
    );
    assert_eq!(bus.listener_count(), 2);
}

#[test]
fn test_failing_listeners_are_contained() {
    let bus = NotificationBus::new(NotificationConfig::default());
    bus.subscribe(
        EventType::Revoked,
        |_| anyhow::bail!("listener broke"),
        SubscribeOptions::new().priority(ListenerPriority::High),
    );
    bus.subscribe(
        EventType::Revoked,
        |_| panic!("listener panicked"),
        SubscribeOptions::new().priority(ListenerPriority::High),
    );
    let survivor = counter(&bus, EventType::Revoked);

    let outcome = bus.emit(revoked("u1"));
    assert_eq!(outcome.failed, 2);
    assert_eq!(outcome.delivered, 1);
    assert_eq!(survivor.load(Ordering::SeqCst), 1);
    assert_eq!(bus.stats().listener_failures, 2);
}

#[test]
fn test_scoped_subscription_and_unsubscribe() {
    let bus = NotificationBus::new(NotificationConfig::default());
    let seen = Arc::new(AtomicUsize::new(0));
    let handle = Arc::clone(&seen);
    let subscription = bus.subscribe(
        EventType::Granted,
        move |_| {
            handle.fetch_add(1, Ordering::SeqCst);
            Ok(())
        },
        SubscribeOptions::new().workspace("w1").user("u1"),
    );

    bus.emit(granted("u1", "w1"));
    bus.emit(granted("u1", "w2"));
    bus.emit(granted("u2", "w1"));
    assert_eq!(seen.load(Ordering::SeqCst), 1);

    assert!(subscription.unsubscribe());
    bus.emit(granted("u1", "w1"));
    assert_eq!(seen.load(Ordering::SeqCst), 1);
    assert_eq!(bus.listener_count(), 0);
}

#[test]
fn test_preferences_filter_by_workspace_and_criticality() {
    let bus = NotificationBus::new(NotificationConfig::default());
    bus.update_preferences(|prefs| {
        prefs.workspace_filters.insert("w1".into());
    });

    assert_eq!(
        bus.emit(granted("u1", "w2")).filtered,
        Some(FilterReason::WorkspaceNotAllowed)
    );
    assert_eq!(bus.emit(granted("u1", "w1")).filtered, None);
    // No workspace on the event: the allow-list does not apply
    assert_eq!(bus.emit(revoked("u1")).filtered, None);

    bus.update_preferences(|prefs| {
        prefs.workspace_filters.clear();
        prefs.critical_only = true;
    });
    assert_eq!(
        bus.emit(granted("u1", "w1")).filtered,
        Some(FilterReason::BelowCritical)
    );
    assert_eq!(bus.emit(revoked("u1")).filtered, None);
}

#[tokio::test]
async fn test_user_facing_events_raise_toasts() {
    let bus = NotificationBus::new(NotificationConfig::default());
    let mut toasts = bus.toasts();

    assert!(bus.emit(revoked("u1")).toasted);
    assert!(!bus
        .emit(PermissionEvent::cache_warmed("u1".into(), None, vec![], "warm"))
        .toasted);

    let toast = toasts.recv().await.unwrap();
    assert_eq!(toast.kind, ToastKind::Warning);
    assert_eq!(toast.event_type, EventType::Revoked);
    assert!(toasts.try_recv().is_err());
}
