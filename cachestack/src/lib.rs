pub mod config;
pub mod core;
pub mod driver;
pub mod manager;
pub mod provider;

// Re-export commonly used types
pub use config::{CacheConfig, DriverKind, LoggingConfig, ProviderDecl};
pub use crate::core::{
    CacheError, CacheItem, CachePool, DriverError, DriverResult, DriverStats, Expiration,
    PoolStats, ProviderState, Result, Status, validate_key, validate_namespace,
};
pub use driver::{
    Driver, DriverCapabilities, FilesystemConfig, FilesystemDriver, FilesystemStrategy,
    MemoryConfig, MemoryDriver, VacuumDriver,
};
pub use manager::{Manager, ManagerConfig, PickMode, ProviderInfo, ProviderStack};
pub use provider::{Provider, ProviderConfig};
