/*!
 * Audit Export
 * Versioned envelope for moving audit entries between stores
 */

use super::entry::{AuditContext, AuditLogEntry};
use crate::core::errors::AuditError;
use crate::core::limits::AUDIT_EXPORT_VERSION;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, TimestampMilliSeconds};
use std::time::SystemTime;

#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportMetadata {
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    pub exported_at: SystemTime,
    pub entry_count: usize,
    pub filtered: bool,
    pub context: AuditContext,
}

/// Export envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditExport {
    pub version: u32,
    pub metadata: ExportMetadata,
    pub entries: Vec<AuditLogEntry>,
}

impl AuditExport {
    pub fn new(entries: Vec<AuditLogEntry>, filtered: bool, context: AuditContext) -> Self {
        Self {
            version: AUDIT_EXPORT_VERSION,
            metadata: ExportMetadata {
                exported_at: SystemTime::now(),
                entry_count: entries.len(),
                filtered,
                context,
            },
            entries,
        }
    }
}

/// Outcome of an import
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportReport {
    pub imported: usize,
    pub skipped_invalid: usize,
    pub skipped_duplicate: usize,
}

/// Check the envelope and split its entries into valid entries and an invalid count.
///
/// Only the envelope can fail; malformed entries are counted.
pub fn parse_envelope(payload: &str) -> Result<(Vec<AuditLogEntry>, usize), AuditError> {
    let value: serde_json::Value =
        serde_json::from_str(payload).map_err(|e| AuditError::InvalidEnvelope(e.to_string()))?;

    let version = value
        .get("version")
        .and_then(|v| v.as_u64())
        .ok_or_else(|| AuditError::InvalidEnvelope("missing version".into()))?;
    if version != u64::from(AUDIT_EXPORT_VERSION) {
        return Err(AuditError::UnsupportedVersion {
            expected: AUDIT_EXPORT_VERSION,
            actual: u32::try_from(version).unwrap_or(u32::MAX),
        });
    }

    let raw_entries = value
        .get("entries")
        .and_then(|v| v.as_array())
        .ok_or_else(|| AuditError::InvalidEnvelope("missing entries array".into()))?;

    Ok(split_valid(raw_entries.iter().cloned()))
}

/// Deserialize each value independently, counting the ones that fail
pub fn split_valid<I>(values: I) -> (Vec<AuditLogEntry>, usize)
where
    I: IntoIterator<Item = serde_json::Value>,
{
    let mut valid = Vec::new();
    let mut invalid = 0;
    for value in values {
        match serde_json::from_value::<AuditLogEntry>(value) {
            Ok(entry) => valid.push(entry),
            Err(_) => invalid += 1,
        }
    }
    (valid, invalid)
}
