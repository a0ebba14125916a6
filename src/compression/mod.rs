/*!
 * Compression Engine
 * Size-triggered compaction of large cache entries
 *
 * A pass works on an immutable snapshot, so it never blocks readers:
 * 1. Skip unless the snapshot exceeds `threshold_bytes`
 * 2. Pick compressible entries, largest first, up to `max_entries_per_pass`
 * 3. Compress each; reject on poor ratio or blown time budget
 * 4. Write accepted results back; stale entries are left alone
 */

mod codec;
mod task;

pub use codec::{
    compress_value, decompress_entry, decompress_value, is_compressed_entry, CompressedPayload,
    CompressionAlgorithm,
};
pub use task::{CompressionCommand, CompressionTask};

use crate::adapter::{CacheEntry, CacheSnapshot, EntryData, ScopeCacheAdapter};
use crate::core::config::CompressionConfig;
use crate::core::errors::CompressionError;
use crate::core::types::{CacheKey, PermissionValue};
use crate::monitoring::span_operation;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Why a compression result was discarded
#[derive(Debug, Clone, PartialEq)]
pub enum Rejection {
    /// compressed/original above the target
    RatioTooHigh { ratio: f64 },
    /// Finished, but after the time budget
    TooSlow { elapsed: Duration },
    /// Value could not be serialized
    Failed(CompressionError),
}

/// Outcome of compressing one value
#[derive(Debug, Clone)]
pub struct CompressionResult {
    pub success: bool,
    pub original_size: usize,
    pub compressed_size: usize,
    pub ratio: f64,
    pub duration: Duration,
    /// Present only on success
    pub payload: Option<CompressedPayload>,
    pub rejection: Option<Rejection>,
}

impl CompressionResult {
    fn rejected(rejection: Rejection, duration: Duration) -> Self {
        Self {
            success: false,
            original_size: 0,
            compressed_size: 0,
            ratio: 1.0,
            duration,
            payload: None,
            rejection: Some(rejection),
        }
    }
}

/// Entry selected for compression
#[derive(Debug, Clone)]
pub struct CompressionCandidate {
    pub key: CacheKey,
    pub size: usize,
    pub entry: CacheEntry,
}

/// Summary of one pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PassReport {
    /// Snapshot was under the threshold
    pub skipped: bool,
    pub snapshot_bytes: usize,
    pub candidates: usize,
    pub attempted: usize,
    pub compressed: usize,
    pub rejected: usize,
    /// Accepted but the entry changed since the snapshot
    pub stale: usize,
    pub bytes_saved: usize,
}

/// Cumulative engine counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompressionStats {
    pub passes: u64,
    pub skipped_passes: u64,
    pub attempted: u64,
    pub compressed: u64,
    pub rejected: u64,
    pub failed: u64,
    pub bytes_saved: u64,
    pub decompressions: u64,
    pub corrupt_reads: u64,
}

impl CompressionStats {
    /// Share of attempts that were accepted, as a percentage
    pub fn acceptance_rate(&self) -> f64 {
        if self.attempted == 0 {
            0.0
        } else {
            (self.compressed as f64 / self.attempted as f64) * 100.0
        }
    }
}

/// Compacts oversized cache entries in place
pub struct CompressionEngine {
    adapter: Arc<dyn ScopeCacheAdapter>,
    config: CompressionConfig,
    stats: Mutex<CompressionStats>,
}

impl CompressionEngine {
    pub fn new(adapter: Arc<dyn ScopeCacheAdapter>, config: CompressionConfig) -> Self {
        Self {
            adapter,
            config,
            stats: Mutex::new(CompressionStats::default()),
        }
    }

    pub fn config(&self) -> &CompressionConfig {
        &self.config
    }

    /// Uncompressed entries of a large-object kind above the size floor, largest first
    pub fn identify_compressible_entries(&self, snapshot: &CacheSnapshot) -> Vec<CompressionCandidate> {
        let mut candidates: Vec<CompressionCandidate> = snapshot
            .entries
            .iter()
            .filter(|(key, entry)| {
                !entry.is_compressed()
                    && self.config.compressible_kinds.contains(&key.kind())
                    && entry.original_size > self.config.min_entry_bytes
            })
            .map(|(key, entry)| CompressionCandidate {
                key: key.clone(),
                size: entry.original_size,
                entry: entry.clone(),
            })
            .collect();

        // Stable sort keeps snapshot order among equal sizes
        candidates.sort_by(|a, b| b.size.cmp(&a.size));
        candidates
    }

    /// Compress one value, never failing.
    ///
    /// The time budget is checked after the fact: a slow result is discarded.
    pub fn compress_entry<T: Serialize + ?Sized>(&self, key: &CacheKey, value: &T) -> CompressionResult {
        let start = Instant::now();
        let outcome = compress_value(value);
        let duration = start.elapsed();

        let payload = match outcome {
            Ok(payload) => payload,
            Err(e) => {
                warn!(key = %key, error = %e, "Compression failed, keeping original");
                self.stats.lock().failed += 1;
                return CompressionResult::rejected(Rejection::Failed(e), duration);
            }
        };

        let ratio = payload.ratio();
        let mut result = CompressionResult {
            success: false,
            original_size: payload.original_size,
            compressed_size: payload.compressed_size,
            ratio,
            duration,
            payload: None,
            rejection: None,
        };

        if ratio > self.config.target_ratio {
            debug!(key = %key, ratio, target = self.config.target_ratio, "Compression ratio rejected");
            result.rejection = Some(Rejection::RatioTooHigh { ratio });
        } else if duration > Duration::from_millis(self.config.max_compression_time_ms) {
            debug!(
                key = %key,
                duration_ms = duration.as_millis() as u64,
                budget_ms = self.config.max_compression_time_ms,
                "Compression exceeded time budget"
            );
            result.rejection = Some(Rejection::TooSlow { elapsed: duration });
        } else {
            result.success = true;
            result.payload = Some(payload);
        }
        result
    }

    /// Read an entry, counting corrupt payloads
    pub fn decompress_entry(&self, entry: &mut CacheEntry) -> Result<PermissionValue, CompressionError> {
        let compressed = entry.is_compressed();
        let result = decompress_entry(entry);
        let mut stats = self.stats.lock();
        if compressed {
            stats.decompressions += 1;
        }
        if result.is_err() {
            stats.corrupt_reads += 1;
        }
        result
    }

    pub fn is_compressed_entry(value: Option<&serde_json::Value>) -> bool {
        is_compressed_entry(value)
    }

    /// Run one compaction pass over the current snapshot
    pub fn run_pass(&self) -> PassReport {
        let span = span_operation("compression_pass");
        let _entered = span.enter();
        let snapshot = self.adapter.extract_snapshot();
        let mut report = PassReport {
            snapshot_bytes: snapshot.total_bytes(),
            ..Default::default()
        };

        if report.snapshot_bytes <= self.config.threshold_bytes {
            report.skipped = true;
            let mut stats = self.stats.lock();
            stats.passes += 1;
            stats.skipped_passes += 1;
            return report;
        }

        let candidates = self.identify_compressible_entries(&snapshot);
        report.candidates = candidates.len();

        for candidate in candidates.into_iter().take(self.config.max_entries_per_pass) {
            let EntryData::Plain(value) = &candidate.entry.data else {
                continue;
            };
            report.attempted += 1;

            let result = self.compress_entry(&candidate.key, value);
            let Some(payload) = result.payload else {
                report.rejected += 1;
                continue;
            };

            let saved = result.original_size.saturating_sub(result.compressed_size);
            if self
                .adapter
                .write_back(&candidate.key, candidate.entry.into_compressed(payload))
            {
                report.compressed += 1;
                report.bytes_saved += saved;
            } else {
                report.stale += 1;
            }
        }

        span.record_items(report.compressed);
        span.record_result(report.rejected == 0);
        {
            let mut stats = self.stats.lock();
            stats.passes += 1;
            stats.attempted += report.attempted as u64;
            stats.compressed += report.compressed as u64;
            stats.rejected += report.rejected as u64;
            stats.bytes_saved += report.bytes_saved as u64;
        }

        info!(
            snapshot_bytes = report.snapshot_bytes,
            candidates = report.candidates,
            compressed = report.compressed,
            rejected = report.rejected,
            bytes_saved = report.bytes_saved,
            "Compression pass complete"
        );
        report
    }

    pub fn stats(&self) -> CompressionStats {
        self.stats.lock().clone()
    }

    /// Start the periodic pass on a background task
    pub fn start(self: &Arc<Self>) -> CompressionTask {
        CompressionTask::spawn(Arc::clone(self))
    }
}
