/*!
 * Workspace Permissions Library
 * Client-side permission cache, predictive preloading, notifications and audit
 */

pub mod adapter;
pub mod audit;
pub mod cache;
pub mod compression;
pub mod core;
pub mod monitoring;
pub mod notify;
pub mod preload;
pub mod runtime;

// Re-exports
pub use adapter::{
    CacheEntry, CacheSnapshot, PermissionSource, QuerySpec, ScopeCache, ScopeCacheAdapter, Selector,
    StaticPermissionSource,
};
pub use audit::{AuditFilter, AuditLogEntry, AuditLogger, AuditStats, LogRecord, LogSink};
pub use cache::{CacheMetrics, MaintenanceReport, PermissionCacheManager, WarmReport};
pub use compression::{CompressionEngine, CompressionResult, CompressionStats, CompressionTask};
pub use self::core::config::{
    AuditConfig, CacheConfig, CompressionConfig, Config, NotificationConfig, PreloaderConfig,
};
pub use self::core::errors::{
    AuditError, CacheError, CompressionError, PermissionsError, SourceError, StorageError,
};
pub use self::core::storage::{DurableStore, FileStore, MemoryStore};
pub use self::core::types::{CacheKey, PermissionName, PermissionValue, QueryKind, UserId, WorkspaceId};
pub use monitoring::{init_tracing, span_operation, OperationSpan};
pub use notify::{
    EventPayload, EventType, LogLevel, NotificationBus, PermissionEvent, SubscribeOptions, Toast,
};
pub use preload::{PermissionPreloader, PreloadPriority, PreloadSource, PreloaderStats, Prediction};
pub use runtime::{IdentityChange, PermissionRuntime, PermissionRuntimeBuilder, SessionReport};
