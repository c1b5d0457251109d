//! Generation keys
//!
//! On drivers that cannot enumerate a namespace, every namespace owns a random
//! 64-character token stored under the namespace name itself, and its items are
//! stored as `<token>-<key>`. Dropping the token makes all of them unreachable
//! at once. The orphaned entries stay in the backend until its own eviction or a
//! full flush reclaims them.

use crate::core::{DriverError, DriverResult};
use crate::driver::Driver;
use parking_lot::Mutex;
use rand::Rng;
use rand::distr::Alphanumeric;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use tracing::debug;

/// Length of a generation token
pub const TOKEN_LEN: usize = 64;

/// Fresh random generation token
pub fn new_token() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LEN)
        .map(char::from)
        .collect()
}

/// Physical key of an item under a generation token
pub fn physical_key(token: &str, key: &str) -> String {
    format!("{}-{}", token, key)
}

/// Number of lock stripes shared by all namespaces of a provider
pub const LOCK_STRIPES: usize = 64;

/// Token bookkeeping for one provider.
///
/// Creating and dropping a token are read-then-write sequences, so they run
/// under the namespace's lock stripe together with the write that needs the
/// token. Namespaces hashing to the same stripe serialize against each other.
pub struct GenerationKeys {
    stripes: [Mutex<()>; LOCK_STRIPES],
}

impl Default for GenerationKeys {
    fn default() -> Self {
        Self {
            stripes: std::array::from_fn(|_| Mutex::new(())),
        }
    }
}

impl GenerationKeys {
    pub fn new() -> Self {
        Self::default()
    }

    fn stripe_index(namespace: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        namespace.hash(&mut hasher);
        (hasher.finish() % LOCK_STRIPES as u64) as usize
    }

    fn lock_for(&self, namespace: &str) -> &Mutex<()> {
        &self.stripes[Self::stripe_index(namespace)]
    }

    /// Current token of a namespace; `None` means nothing is addressable
    pub fn resolve(&self, driver: &dyn Driver, namespace: &str) -> DriverResult<Option<String>> {
        match driver.get(namespace, None)? {
            None => Ok(None),
            Some(raw) => String::from_utf8(raw).map(Some).map_err(|e| {
                DriverError::Serialization(format!(
                    "generation key of {} is not text: {}",
                    namespace, e
                ))
            }),
        }
    }

    /// Run a write with the namespace token, creating the token first if the
    /// namespace has never been written to
    pub fn with_token<T>(
        &self,
        driver: &dyn Driver,
        namespace: &str,
        write: impl FnOnce(&str) -> DriverResult<T>,
    ) -> DriverResult<T> {
        let _guard = self.lock_for(namespace).lock();

        let token = match self.resolve(driver, namespace)? {
            Some(token) => token,
            None => {
                let token = new_token();
                if !driver.set(namespace, None, token.as_bytes(), 0)? {
                    return Err(DriverError::Backend(format!(
                        "could not store generation key for {}",
                        namespace
                    )));
                }
                debug!("Namespace {} born with a new generation", namespace);
                token
            }
        };

        write(&token)
    }

    /// Drop the namespace token, orphaning every entry stored under it
    pub fn invalidate(&self, driver: &dyn Driver, namespace: &str) -> DriverResult<bool> {
        let _guard = self.lock_for(namespace).lock();

        let existed = driver.delete(namespace, None)?;
        debug!(
            "Namespace {} generation dropped (had token: {})",
            namespace, existed
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::MemoryDriver;

    #[test]
    fn test_new_token() {
        let a = new_token();
        let b = new_token();
        assert_eq!(a.len(), TOKEN_LEN);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_token_created_once() {
        let driver = MemoryDriver::flat();
        let keys = GenerationKeys::new();

        assert_eq!(keys.resolve(&driver, "USERS").unwrap(), None);

        let first = keys.with_token(&driver, "USERS", |t| Ok(t.to_string())).unwrap();
        let second = keys.with_token(&driver, "USERS", |t| Ok(t.to_string())).unwrap();
        assert_eq!(first, second);
        assert_eq!(keys.resolve(&driver, "USERS").unwrap(), Some(first));
    }

    #[test]
    fn test_invalidate_rotates_generation() {
        let driver = MemoryDriver::flat();
        let keys = GenerationKeys::new();

        let first = keys.with_token(&driver, "USERS", |t| Ok(t.to_string())).unwrap();
        assert!(keys.invalidate(&driver, "USERS").unwrap());
        assert_eq!(keys.resolve(&driver, "USERS").unwrap(), None);

        let second = keys.with_token(&driver, "USERS", |t| Ok(t.to_string())).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_lock_stripes_are_stable() {
        let keys = GenerationKeys::new();
        let users = GenerationKeys::stripe_index("USERS");
        assert_eq!(users, GenerationKeys::stripe_index("USERS"));
        assert!(std::ptr::eq(keys.lock_for("USERS"), keys.lock_for("USERS")));

        for i in 0..1000 {
            assert!(GenerationKeys::stripe_index(&format!("NS{}", i)) < LOCK_STRIPES);
        }
    }

    #[test]
    fn test_shared_stripe_keeps_namespaces_apart() {
        let driver = MemoryDriver::flat();
        let keys = GenerationKeys::new();

        // find two namespaces that hash to the same stripe
        let target = GenerationKeys::stripe_index("NS0");
        let twin = (1..)
            .map(|i| format!("NS{}", i))
            .find(|ns| GenerationKeys::stripe_index(ns) == target)
            .unwrap();

        let first = keys.with_token(&driver, "NS0", |t| Ok(t.to_string())).unwrap();
        let second = keys.with_token(&driver, &twin, |t| Ok(t.to_string())).unwrap();
        assert_ne!(first, second);

        keys.invalidate(&driver, "NS0").unwrap();
        assert_eq!(keys.resolve(&driver, &twin).unwrap(), Some(second));
    }

    #[test]
    fn test_physical_key() {
        assert_eq!(physical_key("abc", "Ford"), "abc-Ford");
    }
}
