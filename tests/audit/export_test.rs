/*!
 * Audit Export/Import Tests
 */

use pretty_assertions::assert_eq;
use workspace_permissions::audit::{AuditExport, ImportReport};
use workspace_permissions::{
    AuditConfig, AuditError, AuditFilter, AuditLogger, EventPayload, EventType, PermissionEvent,
};

fn populated() -> AuditLogger {
    let logger = AuditLogger::new(AuditConfig::default());
    logger.log(
        &PermissionEvent::new(
            "u1".into(),
            EventPayload::RoleChanged {
                previous_role: "viewer".into(),
                new_role: "editor".into(),
            },
        )
        .with_workspace(Some("w1".into())),
        None,
    );
    logger.log(
        &PermissionEvent::cache_invalidated("u1".into(), Some("w1".into()), vec![], "invalidate"),
        None,
    );
    logger.log(
        &PermissionEvent::check_failed("u2".into(), None, "documents:read".into(), "offline"),
        None,
    );
    logger
}

#[test]
fn test_reimport_adds_nothing() {
    let source = populated();
    let export = source.export_audit_log(None).unwrap();

    let target = AuditLogger::new(AuditConfig::default());
    let first = target.import_entries(&export).unwrap();
    assert_eq!(
        first,
        ImportReport {
            imported: 3,
            skipped_invalid: 0,
            skipped_duplicate: 0
        }
    );

    let second = target.import_entries(&export).unwrap();
    assert_eq!(second.imported, 0);
    assert_eq!(second.skipped_duplicate, 3);
    assert_eq!(target.len(), 3);
}

#[test]
fn test_filtered_export_envelope() {
    let logger = populated();
    let filter = AuditFilter::new().user("u1");
    let export = logger.export_audit_log(Some(&filter)).unwrap();

    let envelope: AuditExport = serde_json::from_str(&export).unwrap();
    assert_eq!(envelope.version, 1);
    assert!(envelope.metadata.filtered);
    assert_eq!(envelope.metadata.entry_count, 2);
    assert!(envelope
        .entries
        .iter()
        .all(|entry| entry.event.user_id.as_str() == "u1"));
    assert_eq!(
        envelope.metadata.context.client,
        logger.context().client
    );
}

#[test]
fn test_malformed_entries_skipped_on_import() {
    let export = populated().export_audit_log(None).unwrap();
    let mut value: serde_json::Value = serde_json::from_str(&export).unwrap();
    let entries = value["entries"].as_array_mut().unwrap();
    entries.push(serde_json::json!({"id": "not-a-uuid"}));
    entries.push(serde_json::json!(42));

    let target = AuditLogger::new(AuditConfig::default());
    let report = target.import_entries(&value.to_string()).unwrap();
    assert_eq!(report.imported, 3);
    assert_eq!(report.skipped_invalid, 2);

    let stats = target.stats();
    assert_eq!(stats.by_type.get(&EventType::RoleChanged), Some(&1));
}

#[test]
fn test_bad_envelopes_rejected() {
    let logger = AuditLogger::new(AuditConfig::default());
    assert!(matches!(
        logger.import_entries("[]"),
        Err(AuditError::InvalidEnvelope(_))
    ));
    assert!(matches!(
        logger.import_entries(r#"{"version": 2, "entries": []}"#),
        Err(AuditError::UnsupportedVersion { expected: 1, actual: 2 })
    ));
    assert!(logger.is_empty());
}
