/*!
 * Limits and Constants
 *
 * Centralized location for every fixed limit, threshold and delay.
 * Organized by component so defaults in `config` and tests share one source.
 *
 * - Performance-sensitive constants are marked with [PERF]
 * - Constants that bound memory are marked with [MEMORY]
 */

use std::time::Duration;

// =============================================================================
// PERMISSION CACHE
// =============================================================================

/// Default time-to-live of a cached permission fact (5 minutes)
pub const DEFAULT_PERMISSION_TTL: Duration = Duration::from_secs(5 * 60);

/// Estimated cache size above which maintenance evicts (10MB)
/// [MEMORY]
pub const DEFAULT_MAX_CACHE_BYTES: usize = 10 * 1024 * 1024;

/// Delay between an invalidation and the background re-warm of that scope
pub const DEFAULT_REWARM_DELAY: Duration = Duration::from_millis(100);

/// Interval of the runtime maintenance loop (cache sweep + audit retention)
pub const DEFAULT_MAINTENANCE_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Fixed per-entry bookkeeping overhead added to size estimates
pub const CACHE_ENTRY_OVERHEAD_BYTES: usize = 64;

// =============================================================================
// COMPRESSION
// =============================================================================

/// Total snapshot size that must be exceeded before a pass runs (1MB)
pub const DEFAULT_COMPRESSION_THRESHOLD: usize = 1024 * 1024;

/// Largest acceptable compressed/original ratio
pub const DEFAULT_TARGET_RATIO: f64 = 0.7;

/// Compression results slower than this are discarded
/// [PERF]
pub const DEFAULT_MAX_COMPRESSION_TIME_MS: u64 = 50;

/// Entries smaller than this are never worth compressing (1KB)
pub const DEFAULT_MIN_COMPRESSIBLE_BYTES: usize = 1024;

/// Upper bound on compression attempts per pass
/// [PERF] Largest entries are attempted first, so the budget goes to the biggest wins
pub const DEFAULT_MAX_ENTRIES_PER_PASS: usize = 32;

/// Interval between compression passes
pub const DEFAULT_COMPRESSION_INTERVAL: Duration = Duration::from_secs(60);

/// Structural marker carried by compressed payloads
pub const COMPRESSED_MARKER: &str = "__compressed";

/// Payload format version for compressed entries
pub const COMPRESSION_FORMAT_VERSION: u8 = 1;

// =============================================================================
// PRELOADER
// =============================================================================

/// Maximum preloads in flight at once; further requests are rejected
pub const DEFAULT_MAX_CONCURRENT_PRELOADS: usize = 5;

/// Quiet period before a hover/focus intent fires a preload
pub const DEFAULT_HOVER_DELAY: Duration = Duration::from_millis(150);

/// Minimum confidence for a predicted transition to be preloaded
pub const DEFAULT_PREDICTION_THRESHOLD: f64 = 0.6;

/// Navigation edges kept in history; the least recently seen is evicted
/// [MEMORY]
pub const DEFAULT_PATTERN_HISTORY_SIZE: usize = 100;

/// Soft timeout of a single preload; expiry counts as failure
pub const DEFAULT_PRELOAD_TIMEOUT: Duration = Duration::from_secs(10);

/// Permissions warmed for every workspace that becomes current
pub const COMMON_PERMISSIONS: &[&str] = &[
    "workspace:read",
    "workspace:write",
    "members:read",
    "settings:read",
];

/// Age at which the recency component of confidence reaches zero (7 days)
pub const CONFIDENCE_DECAY_WINDOW: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Transition count at which the frequency component saturates
pub const CONFIDENCE_FREQUENCY_CAP: u32 = 10;

/// Weight of the recency component in the confidence blend
pub const CONFIDENCE_RECENCY_WEIGHT: f64 = 0.3;

/// Weight of the frequency component in the confidence blend
pub const CONFIDENCE_FREQUENCY_WEIGHT: f64 = 0.7;

// =============================================================================
// NOTIFICATIONS
// =============================================================================

/// Quiet period for batched noisy events
pub const DEFAULT_BATCH_QUIET_PERIOD: Duration = Duration::from_millis(300);

/// Batch size at which a buffered key flushes immediately
pub const DEFAULT_MAX_BATCH_SIZE: usize = 10;

/// Toast broadcast channel capacity
pub const TOAST_CHANNEL_CAPACITY: usize = 64;

// =============================================================================
// AUDIT
// =============================================================================

/// Hard in-memory cap on audit entries; oldest are dropped first
/// [MEMORY]
pub const DEFAULT_MAX_AUDIT_ENTRIES: usize = 1000;

/// Entries older than this are removed by automatic retention (30 days)
pub const DEFAULT_AUDIT_MAX_AGE: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Unit for day-based retention overrides
pub const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// Debounce applied to audit persistence writes
pub const DEFAULT_AUDIT_PERSIST_DEBOUNCE: Duration = Duration::from_secs(1);

/// Durable store key for the audit log
pub const AUDIT_STORAGE_KEY: &str = "permission-audit-log";

/// Durable store key prefix for per-user navigation patterns
pub const PATTERN_STORAGE_PREFIX: &str = "permission-preloader:patterns";

/// Audit export envelope version
pub const AUDIT_EXPORT_VERSION: u32 = 1;
