/*!
 * Core Module
 * Shared types, limits, errors, configuration and runtime primitives
 */

pub mod config;
pub mod errors;
pub mod limits;
pub mod storage;
pub mod timer;
pub mod types;

// Re-export for convenience
pub use config::{
    AuditConfig, CacheConfig, CompressionConfig, Config, NotificationConfig, PreloaderConfig,
};
pub use errors::*;
pub use storage::{DurableStore, FileStore, MemoryStore};
pub use timer::DebounceTimer;
pub use types::*;
