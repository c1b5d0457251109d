//! Backend Drivers
//!
//! Raw `(key, namespace) -> bytes` stores. Drivers know nothing about items,
//! hits, generation keys or serialization; that is the provider's job.
//! - Memory: process-local map (native namespaces, or flat)
//! - Filesystem: one file per entry, TTL kept in an xattr or a sidecar file
//! - Vacuum: accepts everything, stores nothing

use crate::core::{DriverResult, DriverStats};
use serde_json::Value;
use std::collections::HashMap;

pub mod filesystem;
pub mod memory;
pub mod vacuum;

pub use filesystem::{FilesystemConfig, FilesystemDriver, FilesystemStrategy};
pub use memory::{MemoryConfig, MemoryDriver};
pub use vacuum::VacuumDriver;

/// What a driver can do, fixed at construction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverCapabilities {
    /// The driver can enumerate and delete a namespace by itself.
    /// Without it the provider indirects keys through a generation token.
    pub native_namespaces: bool,
    /// The batch operations are backed by real backend batching
    pub batch: bool,
}

impl Default for DriverCapabilities {
    fn default() -> Self {
        Self {
            native_namespaces: true,
            batch: false,
        }
    }
}

/// Backend driver contract.
///
/// `ttl` is in seconds relative to the call; `0` stores forever.
pub trait Driver: Send + Sync {
    /// Backend name used in stats and logs
    fn name(&self) -> &'static str;

    fn capabilities(&self) -> DriverCapabilities;

    /// Backend options reported in stats
    fn options(&self) -> Value {
        Value::Object(Default::default())
    }

    /// Self-check (ping, writability...)
    fn test(&self) -> DriverResult<bool>;

    fn get(&self, key: &str, namespace: Option<&str>) -> DriverResult<Option<Vec<u8>>>;

    fn set(&self, key: &str, namespace: Option<&str>, value: &[u8], ttl: u64)
    -> DriverResult<bool>;

    fn delete(&self, key: &str, namespace: Option<&str>) -> DriverResult<bool>;

    fn has(&self, key: &str, namespace: Option<&str>) -> DriverResult<bool>;

    /// Clear one namespace, or everything when `namespace` is `None`
    fn clear(&self, namespace: Option<&str>) -> DriverResult<bool>;

    fn stats(&self) -> DriverResult<DriverStats>;

    /// Found entries only; missing keys are absent from the map
    fn get_multiple(
        &self,
        keys: &[String],
        namespace: Option<&str>,
    ) -> DriverResult<HashMap<String, Vec<u8>>> {
        let mut found = HashMap::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = self.get(key, namespace)? {
                found.insert(key.clone(), value);
            }
        }
        Ok(found)
    }

    fn set_multiple(
        &self,
        entries: &[(String, Vec<u8>)],
        namespace: Option<&str>,
        ttl: u64,
    ) -> DriverResult<bool> {
        let mut all = true;
        for (key, value) in entries {
            all &= self.set(key, namespace, value, ttl)?;
        }
        Ok(all)
    }

    fn delete_multiple(&self, keys: &[String], namespace: Option<&str>) -> DriverResult<bool> {
        let mut all = true;
        for key in keys {
            all &= self.delete(key, namespace)?;
        }
        Ok(all)
    }
}

/// Current Unix timestamp in seconds
pub(crate) fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}
