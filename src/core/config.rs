/*!
 * Configuration
 *
 * Closed option sets for every component. Defaults come from `core::limits`;
 * `Config::from_env()` overlays `PERMISSIONS_*` environment variables.
 */

use crate::core::limits::*;
use crate::core::types::{PermissionName, QueryKind, WorkspaceId};
use crate::notify::EventType;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use std::collections::BTreeSet;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// Permission cache manager configuration
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub default_ttl: Duration,
    pub max_cache_bytes: usize,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub rewarm_delay: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub maintenance_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: DEFAULT_PERMISSION_TTL,
            max_cache_bytes: DEFAULT_MAX_CACHE_BYTES,
            rewarm_delay: DEFAULT_REWARM_DELAY,
            maintenance_interval: DEFAULT_MAINTENANCE_INTERVAL,
        }
    }
}

impl CacheConfig {
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn with_max_cache_bytes(mut self, bytes: usize) -> Self {
        self.max_cache_bytes = bytes;
        self
    }

    pub fn with_rewarm_delay(mut self, delay: Duration) -> Self {
        self.rewarm_delay = delay;
        self
    }
}

/// Compression engine configuration
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// Snapshot size that must be exceeded before a pass does any work
    pub threshold_bytes: usize,
    /// Largest accepted compressed/original ratio
    pub target_ratio: f64,
    /// Results slower than this are discarded
    pub max_compression_time_ms: u64,
    /// Entries below this size are skipped
    pub min_entry_bytes: usize,
    pub max_entries_per_pass: usize,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub interval: Duration,
    /// Key kinds that hold large objects
    pub compressible_kinds: BTreeSet<QueryKind>,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            threshold_bytes: DEFAULT_COMPRESSION_THRESHOLD,
            target_ratio: DEFAULT_TARGET_RATIO,
            max_compression_time_ms: DEFAULT_MAX_COMPRESSION_TIME_MS,
            min_entry_bytes: DEFAULT_MIN_COMPRESSIBLE_BYTES,
            max_entries_per_pass: DEFAULT_MAX_ENTRIES_PER_PASS,
            interval: DEFAULT_COMPRESSION_INTERVAL,
            compressible_kinds: BTreeSet::from([
                QueryKind::UserContext,
                QueryKind::WorkspacePermissions,
            ]),
        }
    }
}

impl CompressionConfig {
    pub fn with_threshold_bytes(mut self, bytes: usize) -> Self {
        self.threshold_bytes = bytes;
        self
    }

    pub fn with_target_ratio(mut self, ratio: f64) -> Self {
        self.target_ratio = ratio;
        self
    }

    pub fn with_min_entry_bytes(mut self, bytes: usize) -> Self {
        self.min_entry_bytes = bytes;
        self
    }

    pub fn with_max_compression_time_ms(mut self, ms: u64) -> Self {
        self.max_compression_time_ms = ms;
        self
    }

    pub fn with_max_entries_per_pass(mut self, max: usize) -> Self {
        self.max_entries_per_pass = max;
        self
    }
}

/// Preloader configuration
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreloaderConfig {
    pub max_concurrent: usize,
    pub hover_delay_ms: u64,
    pub prediction_confidence_threshold: f64,
    pub pattern_history_size: usize,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub preload_timeout: Duration,
    pub common_permissions: Vec<PermissionName>,
}

impl Default for PreloaderConfig {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT_PRELOADS,
            hover_delay_ms: DEFAULT_HOVER_DELAY.as_millis() as u64,
            prediction_confidence_threshold: DEFAULT_PREDICTION_THRESHOLD,
            pattern_history_size: DEFAULT_PATTERN_HISTORY_SIZE,
            preload_timeout: DEFAULT_PRELOAD_TIMEOUT,
            common_permissions: COMMON_PERMISSIONS
                .iter()
                .map(|p| PermissionName::new(p))
                .collect(),
        }
    }
}

impl PreloaderConfig {
    pub fn hover_delay(&self) -> Duration {
        Duration::from_millis(self.hover_delay_ms)
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max;
        self
    }

    pub fn with_hover_delay_ms(mut self, ms: u64) -> Self {
        self.hover_delay_ms = ms;
        self
    }

    pub fn with_pattern_history_size(mut self, size: usize) -> Self {
        self.pattern_history_size = size;
        self
    }

    pub fn with_preload_timeout(mut self, timeout: Duration) -> Self {
        self.preload_timeout = timeout;
        self
    }

    pub fn with_common_permissions<I, P>(mut self, permissions: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PermissionName>,
    {
        self.common_permissions = permissions.into_iter().map(Into::into).collect();
        self
    }
}

/// Notification bus configuration
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub enable_toast: bool,
    pub enable_audit: bool,
    pub critical_only: bool,
    pub muted_types: BTreeSet<EventType>,
    /// Workspace allow-list; empty means every workspace
    pub workspace_filters: BTreeSet<WorkspaceId>,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub batch_quiet_period: Duration,
    pub max_batch_size: usize,
    /// Types routed through the batched path by `emit_debounced`
    pub noisy_types: BTreeSet<EventType>,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enable_toast: true,
            enable_audit: true,
            critical_only: false,
            muted_types: BTreeSet::new(),
            workspace_filters: BTreeSet::new(),
            batch_quiet_period: DEFAULT_BATCH_QUIET_PERIOD,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            noisy_types: BTreeSet::from([
                EventType::Updated,
                EventType::CacheInvalidated,
                EventType::CacheWarmed,
            ]),
        }
    }
}

/// Audit logger configuration
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub max_entries: usize,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub max_age_for_auto_cleanup: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub persist_debounce: Duration,
    pub storage_key: String,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_AUDIT_ENTRIES,
            max_age_for_auto_cleanup: DEFAULT_AUDIT_MAX_AGE,
            persist_debounce: DEFAULT_AUDIT_PERSIST_DEBOUNCE,
            storage_key: AUDIT_STORAGE_KEY.to_string(),
        }
    }
}

impl AuditConfig {
    pub fn with_max_entries(mut self, max: usize) -> Self {
        self.max_entries = max;
        self
    }

    pub fn with_max_age(mut self, age: Duration) -> Self {
        self.max_age_for_auto_cleanup = age;
        self
    }
}

/// Complete subsystem configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cache: CacheConfig,
    pub compression: CompressionConfig,
    pub preloader: PreloaderConfig,
    pub notification: NotificationConfig,
    pub audit: AuditConfig,
}

impl Config {
    /// Defaults overlaid with `PERMISSIONS_*` environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as `from_env` with an explicit variable source
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let env = EnvOverlay { lookup: &lookup };

        if let Some(ms) = env.parse::<u64>("PERMISSIONS_CACHE_TTL_MS") {
            config.cache.default_ttl = Duration::from_millis(ms);
        }
        env.set(&mut config.cache.max_cache_bytes, "PERMISSIONS_CACHE_MAX_BYTES");

        env.set(
            &mut config.compression.threshold_bytes,
            "PERMISSIONS_COMPRESSION_THRESHOLD_BYTES",
        );
        env.set(
            &mut config.compression.target_ratio,
            "PERMISSIONS_COMPRESSION_TARGET_RATIO",
        );
        env.set(
            &mut config.compression.max_compression_time_ms,
            "PERMISSIONS_COMPRESSION_MAX_TIME_MS",
        );

        env.set(
            &mut config.preloader.max_concurrent,
            "PERMISSIONS_PRELOAD_MAX_CONCURRENT",
        );
        env.set(
            &mut config.preloader.hover_delay_ms,
            "PERMISSIONS_PRELOAD_HOVER_DELAY_MS",
        );
        env.set(
            &mut config.preloader.prediction_confidence_threshold,
            "PERMISSIONS_PRELOAD_CONFIDENCE_THRESHOLD",
        );
        env.set(
            &mut config.preloader.pattern_history_size,
            "PERMISSIONS_PRELOAD_PATTERN_HISTORY",
        );

        env.set(
            &mut config.notification.enable_toast,
            "PERMISSIONS_NOTIFY_TOAST",
        );
        env.set(
            &mut config.notification.enable_audit,
            "PERMISSIONS_NOTIFY_AUDIT",
        );
        env.set(
            &mut config.notification.critical_only,
            "PERMISSIONS_NOTIFY_CRITICAL_ONLY",
        );

        env.set(&mut config.audit.max_entries, "PERMISSIONS_AUDIT_MAX_ENTRIES");
        if let Some(days) = env.parse::<u64>("PERMISSIONS_AUDIT_MAX_AGE_DAYS") {
            config.audit.max_age_for_auto_cleanup =
                Duration::from_secs(days.saturating_mul(SECONDS_PER_DAY));
        }

        config
    }
}

struct EnvOverlay<'a, F> {
    lookup: &'a F,
}

impl<F> EnvOverlay<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn parse<T: FromStr>(&self, name: &str) -> Option<T> {
        let raw = (self.lookup)(name)?;
        match raw.trim().parse::<T>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(variable = name, value = %raw, "Ignoring unparsable configuration value");
                None
            }
        }
    }

    fn set<T: FromStr>(&self, target: &mut T, name: &str) {
        if let Some(value) = self.parse(name) {
            *target = value;
        }
    }
}
