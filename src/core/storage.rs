/*!
 * Durable Local Storage
 * Narrow key/value persistence used by the audit log and pattern history
 *
 * Every call is a suspension point. Callers treat failures as transient:
 * they log and continue in memory.
 */

use crate::core::errors::StorageError;
use ahash::RandomState;
use dashmap::DashMap;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Key/value store with string values
pub trait DurableStore: Send + Sync {
    fn get_item<'a>(&'a self, key: &'a str) -> BoxFuture<'a, StorageResult<Option<String>>>;

    fn set_item<'a>(&'a self, key: &'a str, value: String) -> BoxFuture<'a, StorageResult<()>>;

    fn remove_item<'a>(&'a self, key: &'a str) -> BoxFuture<'a, StorageResult<()>>;
}

/// In-memory store, also used as the default in tests
#[derive(Clone, Default)]
pub struct MemoryStore {
    items: Arc<DashMap<String, String, RandomState>>,
    /// Simulates a full quota: every write fails
    read_only: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent writes fail with `QuotaExceeded`
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl DurableStore for MemoryStore {
    fn get_item<'a>(&'a self, key: &'a str) -> BoxFuture<'a, StorageResult<Option<String>>> {
        let value = self.items.get(key).map(|v| v.value().clone());
        async move { Ok(value) }.boxed()
    }

    fn set_item<'a>(&'a self, key: &'a str, value: String) -> BoxFuture<'a, StorageResult<()>> {
        let result = if self.read_only.load(Ordering::Relaxed) {
            Err(StorageError::QuotaExceeded {
                key: key.to_string(),
            })
        } else {
            self.items.insert(key.to_string(), value);
            Ok(())
        };
        async move { result }.boxed()
    }

    fn remove_item<'a>(&'a self, key: &'a str) -> BoxFuture<'a, StorageResult<()>> {
        self.items.remove(key);
        async { Ok(()) }.boxed()
    }
}

/// One file per key inside a directory
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file_name: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.root.join(format!("{}.json", file_name))
    }
}

fn io_error(key: &str, err: std::io::Error) -> StorageError {
    StorageError::Io {
        key: key.to_string(),
        message: err.to_string(),
    }
}

impl DurableStore for FileStore {
    fn get_item<'a>(&'a self, key: &'a str) -> BoxFuture<'a, StorageResult<Option<String>>> {
        async move {
            match tokio::fs::read_to_string(self.path_for(key)).await {
                Ok(contents) => Ok(Some(contents)),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
                Err(e) => Err(io_error(key, e)),
            }
        }
        .boxed()
    }

    fn set_item<'a>(&'a self, key: &'a str, value: String) -> BoxFuture<'a, StorageResult<()>> {
        async move {
            tokio::fs::create_dir_all(&self.root)
                .await
                .map_err(|e| io_error(key, e))?;
            // write then rename so readers never observe a torn file
            let path = self.path_for(key);
            let tmp = path.with_extension("json.tmp");
            tokio::fs::write(&tmp, value)
                .await
                .map_err(|e| io_error(key, e))?;
            tokio::fs::rename(&tmp, &path)
                .await
                .map_err(|e| io_error(key, e))
        }
        .boxed()
    }

    fn remove_item<'a>(&'a self, key: &'a str) -> BoxFuture<'a, StorageResult<()>> {
        async move {
            match tokio::fs::remove_file(self.path_for(key)).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                Err(e) => Err(io_error(key, e)),
            }
        }
        .boxed()
    }
}
