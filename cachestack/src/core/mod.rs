pub mod error;
pub mod item;
pub mod key;
pub mod pool;
pub mod state;
pub mod types;

pub use error::{CacheError, DriverError, DriverResult, Result};
pub use item::{CacheItem, Expiration};
pub use key::{DEFAULT_NAMESPACE, validate_key, validate_namespace};
pub use pool::CachePool;
pub use state::{ProviderState, Status};
pub use types::{DriverStats, PoolStats};
