use thiserror::Error;

/// Failure reported by a backend driver.
///
/// Drivers never raise these to callers of a pool: the provider catches them,
/// records an ERROR state and degrades the operation to a miss or `false`.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

/// Result type alias for driver operations
pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// Main error type for cache pool operations.
///
/// Only argument and configuration problems surface here; backend failures
/// are absorbed into the provider state machine.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Invalid key: {0:?}")]
    InvalidKey(String),

    #[error("Invalid namespace: {0:?}")]
    InvalidNamespace(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Invalid weight {weight} for provider {id} (expected 0..=100)")]
    InvalidWeight { id: String, weight: u32 },

    #[error("Provider already registered: {0}")]
    DuplicateProvider(String),

    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Driver(#[from] DriverError),
}

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;
