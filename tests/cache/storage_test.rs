/*!
 * Durable Store Tests
 */

use tempfile::TempDir;
use workspace_permissions::{DurableStore, FileStore};

#[tokio::test]
async fn test_file_store_round_trip() {
    let dir = TempDir::new().unwrap();
    let store = FileStore::new(dir.path());

    assert_eq!(store.get_item("permission-audit-log").await.unwrap(), None);
    store
        .set_item("permission-audit-log", "[]".to_string())
        .await
        .unwrap();
    assert_eq!(
        store.get_item("permission-audit-log").await.unwrap().as_deref(),
        Some("[]")
    );

    store.remove_item("permission-audit-log").await.unwrap();
    assert_eq!(store.get_item("permission-audit-log").await.unwrap(), None);
    // Removing twice is fine
    store.remove_item("permission-audit-log").await.unwrap();
}

#[tokio::test]
async fn test_file_store_sanitizes_keys() {
    let dir = TempDir::new().unwrap();
    let store = FileStore::new(dir.path().join("nested"));

    store
        .set_item("permission-preloader:patterns:u1", "{}".to_string())
        .await
        .unwrap();
    let files: Vec<_> = std::fs::read_dir(dir.path().join("nested"))
        .unwrap()
        .map(|entry| entry.unwrap().file_name().into_string().unwrap())
        .collect();
    assert_eq!(files, vec!["permission-preloader_patterns_u1.json".to_string()]);
}
