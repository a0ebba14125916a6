/*!
 * Compression Codec
 * JSON serialization followed by LZ4 block compression
 *
 * Payloads carry a structural marker (`__compressed: true`) and a format
 * version so persisted or exported values can be recognized without a type tag.
 */

use crate::adapter::{CacheEntry, EntryData};
use crate::core::errors::CompressionError;
use crate::core::limits::{COMPRESSED_MARKER, COMPRESSION_FORMAT_VERSION};
use crate::core::types::PermissionValue;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Compression algorithm tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionAlgorithm {
    Lz4,
}

/// Compressed replacement for a cached value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressedPayload {
    #[serde(rename = "__compressed")]
    pub marker: bool,
    pub version: u8,
    pub algorithm: CompressionAlgorithm,
    pub data: Vec<u8>,
    pub original_size: usize,
    pub compressed_size: usize,
}

impl CompressedPayload {
    /// compressed/original; 1.0 for empty input
    pub fn ratio(&self) -> f64 {
        if self.original_size == 0 {
            1.0
        } else {
            self.compressed_size as f64 / self.original_size as f64
        }
    }
}

/// Serialize and compress any value
pub fn compress_value<T: Serialize + ?Sized>(value: &T) -> Result<CompressedPayload, CompressionError> {
    let serialized =
        serde_json::to_vec(value).map_err(|e| CompressionError::Serialization(e.to_string()))?;
    let data = lz4_flex::compress_prepend_size(&serialized);

    Ok(CompressedPayload {
        marker: true,
        version: COMPRESSION_FORMAT_VERSION,
        algorithm: CompressionAlgorithm::Lz4,
        compressed_size: data.len(),
        original_size: serialized.len(),
        data,
    })
}

/// Reverse `compress_value`
pub fn decompress_value<T: DeserializeOwned>(payload: &CompressedPayload) -> Result<T, CompressionError> {
    if payload.version != COMPRESSION_FORMAT_VERSION {
        return Err(CompressionError::UnsupportedVersion {
            expected: COMPRESSION_FORMAT_VERSION,
            actual: payload.version,
        });
    }

    let bytes = lz4_flex::decompress_size_prepended(&payload.data)
        .map_err(|e| CompressionError::CorruptPayload(e.to_string()))?;
    if bytes.len() != payload.original_size {
        return Err(CompressionError::CorruptPayload(format!(
            "decompressed {} bytes, expected {}",
            bytes.len(),
            payload.original_size
        )));
    }

    serde_json::from_slice(&bytes).map_err(|e| CompressionError::CorruptPayload(e.to_string()))
}

/// Read the value held by an entry, counting the access
pub fn decompress_entry(entry: &mut CacheEntry) -> Result<PermissionValue, CompressionError> {
    entry.access_count = entry.access_count.saturating_add(1);
    match &entry.data {
        EntryData::Plain(value) => Ok(value.clone()),
        EntryData::Compressed(payload) => decompress_value(payload),
    }
}

/// Structural check for a compressed payload in untyped JSON
pub fn is_compressed_entry(value: Option<&serde_json::Value>) -> bool {
    let Some(object) = value.and_then(|v| v.as_object()) else {
        return false;
    };
    object.get(COMPRESSED_MARKER).and_then(|m| m.as_bool()) == Some(true)
        && object.get("data").is_some_and(|d| d.is_array())
        && object.get("version").is_some_and(|v| v.is_u64())
}
