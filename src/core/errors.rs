/*!
 * Error Types
 * Centralized error handling with thiserror, miette, and serde support
 *
 * Taxonomy:
 * - Transient I/O (`SourceError`, `StorageError`): recovered locally on warm/preload paths
 * - Validation (`CompressionError::CorruptPayload`, `AuditError`): surfaced to the caller
 * - Capacity rejections are plain `false` returns and never appear here
 */

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Remote permission source failures
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum SourceError {
    #[error("Permission source unavailable: {0}")]
    #[diagnostic(
        code(source::unavailable),
        help("The remote transport could not be reached. The request is safe to retry.")
    )]
    Unavailable(String),

    #[error("Permission source rejected query ({status}): {message}")]
    #[diagnostic(
        code(source::rejected),
        help("The server refused the query. Check the session and the query shape.")
    )]
    Rejected { status: u16, message: String },

    #[error("Malformed permission payload: {0}")]
    #[diagnostic(code(source::decode), help("The server response did not match the schema."))]
    Decode(String),
}

/// Durable local storage failures
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum StorageError {
    #[error("Durable storage unavailable: {0}")]
    #[diagnostic(
        code(storage::unavailable),
        help("Running without persistence. State is kept in memory only.")
    )]
    Unavailable(String),

    #[error("Storage quota exceeded writing {key}")]
    #[diagnostic(
        code(storage::quota_exceeded),
        help("Reduce retained audit entries or clear old pattern history.")
    )]
    QuotaExceeded { key: String },

    #[error("Storage I/O failed for {key}: {message}")]
    #[diagnostic(code(storage::io))]
    Io { key: String, message: String },
}

/// Cache read/warm failures
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum CacheError {
    #[error("Fetch failed for {key}: {source}")]
    #[diagnostic(code(cache::fetch_failed))]
    Fetch {
        key: String,
        #[source]
        source: SourceError,
    },

    #[error("Fetch for {key} timed out after {timeout_ms}ms")]
    #[diagnostic(
        code(cache::timeout),
        help("The soft preload timeout elapsed; the result is treated as a failure.")
    )]
    Timeout { key: String, timeout_ms: u64 },

    #[error("Cached entry for {key} is unreadable: {source}")]
    #[diagnostic(code(cache::corrupt_entry))]
    Corrupt {
        key: String,
        #[source]
        source: CompressionError,
    },
}

impl CacheError {
    /// Short operation label used in events and log records
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Fetch { .. } => "fetch",
            Self::Timeout { .. } => "timeout",
            Self::Corrupt { .. } => "corrupt",
        }
    }
}

/// Compression engine failures
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum CompressionError {
    #[error("Value could not be serialized: {0}")]
    #[diagnostic(code(compression::serialization))]
    Serialization(String),

    #[error("Corrupt compressed payload: {0}")]
    #[diagnostic(
        code(compression::corrupt_payload),
        help("Evict the entry; the next read refetches it from the source.")
    )]
    CorruptPayload(String),

    #[error("Unsupported compressed payload version: expected {expected}, got {actual}")]
    #[diagnostic(code(compression::unsupported_version))]
    UnsupportedVersion { expected: u8, actual: u8 },
}

/// Audit log failures
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum AuditError {
    #[error("Invalid audit export envelope: {0}")]
    #[diagnostic(
        code(audit::invalid_envelope),
        help("Import expects the JSON produced by export_audit_log.")
    )]
    InvalidEnvelope(String),

    #[error("Unsupported audit export version: expected {expected}, got {actual}")]
    #[diagnostic(code(audit::unsupported_version))]
    UnsupportedVersion { expected: u32, actual: u32 },

    #[error("Audit serialization failed: {0}")]
    #[diagnostic(code(audit::serialization))]
    Serialization(String),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Storage(#[from] StorageError),
}

/// Top-level error for the permission subsystem
#[derive(Error, Debug, Clone, Diagnostic)]
pub enum PermissionsError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Compression(#[from] CompressionError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Audit(#[from] AuditError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Storage(#[from] StorageError),

    #[error("Configuration error: {0}")]
    #[diagnostic(code(config::invalid))]
    Configuration(String),
}

/// Result type for permission subsystem operations
pub type Result<T> = std::result::Result<T, PermissionsError>;
