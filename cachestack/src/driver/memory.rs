use super::{Driver, DriverCapabilities};
use crate::core::{DriverError, DriverResult, DriverStats};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Stored value with its expiration
#[derive(Debug, Clone)]
struct StoredValue {
    data: Vec<u8>,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn new(data: Vec<u8>, ttl_secs: u64) -> Self {
        Self {
            data,
            // a deadline past what Instant can hold never arrives
            expires_at: (ttl_secs > 0)
                .then(|| Instant::now().checked_add(Duration::from_secs(ttl_secs)))
                .flatten(),
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// Configuration for the memory driver
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Behave as a flat key/value store without namespace enumeration
    #[serde(default)]
    pub flat: bool,
    /// Maximum number of entries (None = unbounded)
    #[serde(default)]
    pub max_entries: Option<usize>,
}

#[derive(Debug, Default, Clone)]
struct MemoryStats {
    gets: u64,
    sets: u64,
    hits: u64,
    misses: u64,
}

/// Process-local memory driver.
///
/// Entries live in per-namespace buckets so a namespace can be dropped
/// directly. In flat mode everything shares one bucket and only a full
/// clear is possible, like a memcached-style store.
#[derive(Clone)]
pub struct MemoryDriver {
    buckets: Arc<RwLock<HashMap<String, HashMap<String, StoredValue>>>>,
    stats: Arc<RwLock<MemoryStats>>,
    config: MemoryConfig,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::with_config(MemoryConfig::default())
    }

    /// Memory driver without native namespace support
    pub fn flat() -> Self {
        Self::with_config(MemoryConfig {
            flat: true,
            ..Default::default()
        })
    }

    pub fn with_config(config: MemoryConfig) -> Self {
        info!(
            "Initializing memory driver (flat={}, max_entries={:?})",
            config.flat, config.max_entries
        );

        Self {
            buckets: Arc::new(RwLock::new(HashMap::new())),
            stats: Arc::new(RwLock::new(MemoryStats::default())),
            config,
        }
    }

    /// Bucket name and entry key for a driver address
    fn locate(&self, key: &str, namespace: Option<&str>) -> (String, String) {
        match (self.config.flat, namespace) {
            (true, Some(ns)) => (String::new(), format!("{}:{}", ns, key)),
            (true, None) | (false, None) => (String::new(), key.to_string()),
            (false, Some(ns)) => (ns.to_string(), key.to_string()),
        }
    }

    fn entry_count(buckets: &HashMap<String, HashMap<String, StoredValue>>) -> usize {
        buckets.values().map(HashMap::len).sum()
    }

    fn purge_expired(buckets: &mut HashMap<String, HashMap<String, StoredValue>>) -> usize {
        let mut purged = 0;
        for bucket in buckets.values_mut() {
            let before = bucket.len();
            bucket.retain(|_, v| !v.is_expired());
            purged += before - bucket.len();
        }
        buckets.retain(|_, bucket| !bucket.is_empty());
        purged
    }
}

impl Default for MemoryDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl Driver for MemoryDriver {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn capabilities(&self) -> DriverCapabilities {
        DriverCapabilities {
            native_namespaces: !self.config.flat,
            batch: false,
        }
    }

    fn options(&self) -> Value {
        json!({
            "flat": self.config.flat,
            "max_entries": self.config.max_entries,
        })
    }

    fn test(&self) -> DriverResult<bool> {
        Ok(true)
    }

    fn get(&self, key: &str, namespace: Option<&str>) -> DriverResult<Option<Vec<u8>>> {
        let (bucket, key) = self.locate(key, namespace);
        debug!("GET bucket={:?} key={}", bucket, key);

        let mut buckets = self.buckets.write();
        let mut stats = self.stats.write();
        stats.gets += 1;

        let Some(entries) = buckets.get_mut(&bucket) else {
            stats.misses += 1;
            return Ok(None);
        };

        match entries.get(&key) {
            Some(value) if value.is_expired() => {
                debug!("Key expired: {}", key);
                entries.remove(&key);
                stats.misses += 1;
                Ok(None)
            }
            Some(value) => {
                stats.hits += 1;
                Ok(Some(value.data.clone()))
            }
            None => {
                stats.misses += 1;
                Ok(None)
            }
        }
    }

    fn set(
        &self,
        key: &str,
        namespace: Option<&str>,
        value: &[u8],
        ttl: u64,
    ) -> DriverResult<bool> {
        let (bucket, key) = self.locate(key, namespace);
        debug!("SET bucket={:?} key={}, size={}, ttl={}", bucket, key, value.len(), ttl);

        let mut buckets = self.buckets.write();

        if let Some(max) = self.config.max_entries {
            let exists = buckets.get(&bucket).is_some_and(|b| b.contains_key(&key));
            if !exists && Self::entry_count(&buckets) >= max {
                Self::purge_expired(&mut buckets);
                if Self::entry_count(&buckets) >= max {
                    warn!("Memory driver full: {} entries", max);
                    return Err(DriverError::Backend(format!(
                        "memory limit exceeded ({} entries)",
                        max
                    )));
                }
            }
        }

        buckets
            .entry(bucket)
            .or_default()
            .insert(key, StoredValue::new(value.to_vec(), ttl));
        self.stats.write().sets += 1;

        Ok(true)
    }

    fn delete(&self, key: &str, namespace: Option<&str>) -> DriverResult<bool> {
        let (bucket, key) = self.locate(key, namespace);
        debug!("DELETE bucket={:?} key={}", bucket, key);

        let mut buckets = self.buckets.write();
        Ok(buckets
            .get_mut(&bucket)
            .and_then(|entries| entries.remove(&key))
            .is_some())
    }

    fn has(&self, key: &str, namespace: Option<&str>) -> DriverResult<bool> {
        let (bucket, key) = self.locate(key, namespace);
        let buckets = self.buckets.read();
        Ok(buckets
            .get(&bucket)
            .and_then(|entries| entries.get(&key))
            .is_some_and(|value| !value.is_expired()))
    }

    fn clear(&self, namespace: Option<&str>) -> DriverResult<bool> {
        let mut buckets = self.buckets.write();
        match namespace {
            None => {
                let count = Self::entry_count(&buckets);
                buckets.clear();
                debug!("CLEAR all ({} entries)", count);
                Ok(true)
            }
            Some(_) if self.config.flat => Err(DriverError::Unsupported(
                "namespace clear on a flat memory store".to_string(),
            )),
            Some(ns) => {
                let count = buckets.remove(ns).map(|b| b.len()).unwrap_or(0);
                debug!("CLEAR namespace={} ({} entries)", ns, count);
                Ok(true)
            }
        }
    }

    fn stats(&self) -> DriverResult<DriverStats> {
        let live = {
            let buckets = self.buckets.read();
            buckets
                .values()
                .flat_map(HashMap::values)
                .filter(|v| !v.is_expired())
                .count()
        };
        let stats = self.stats.read().clone();

        Ok(DriverStats::new(live as u64)
            .with("gets", stats.gets)
            .with("sets", stats.sets)
            .with("hits", stats.hits)
            .with("misses", stats.misses))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get() {
        let driver = MemoryDriver::new();

        assert!(driver.set("key1", Some("NS"), b"value1", 0).unwrap());

        let result = driver.get("key1", Some("NS")).unwrap();
        assert_eq!(result, Some(b"value1".to_vec()));
        assert_eq!(driver.get("key1", Some("OTHER")).unwrap(), None);
    }

    #[test]
    fn test_get_nonexistent() {
        let driver = MemoryDriver::new();
        assert_eq!(driver.get("nonexistent", None).unwrap(), None);
    }

    #[test]
    fn test_delete() {
        let driver = MemoryDriver::new();
        driver.set("key1", None, b"value1", 0).unwrap();

        assert!(driver.delete("key1", None).unwrap());
        assert!(!driver.delete("key1", None).unwrap());
        assert_eq!(driver.get("key1", None).unwrap(), None);
    }

    #[test]
    fn test_ttl_expiration() {
        let driver = MemoryDriver::new();
        driver.set("key1", None, b"value1", 1).unwrap();
        assert!(driver.has("key1", None).unwrap());

        std::thread::sleep(Duration::from_millis(1100));

        assert!(!driver.has("key1", None).unwrap());
        assert_eq!(driver.get("key1", None).unwrap(), None);
    }

    #[test]
    fn test_unbounded_ttl_never_expires() {
        let driver = MemoryDriver::new();
        assert!(driver.set("key1", None, b"value1", u64::MAX).unwrap());
        let pairs = vec![("key2".to_string(), b"value2".to_vec())];
        assert!(driver.set_multiple(&pairs, None, u64::MAX).unwrap());

        assert_eq!(driver.get("key1", None).unwrap(), Some(b"value1".to_vec()));
        assert!(driver.has("key2", None).unwrap());
    }

    #[test]
    fn test_clear_namespace() {
        let driver = MemoryDriver::new();
        driver.set("a", Some("USERS"), b"1", 0).unwrap();
        driver.set("b", Some("USERS"), b"2", 0).unwrap();
        driver.set("a", Some("POSTS"), b"3", 0).unwrap();

        assert!(driver.clear(Some("USERS")).unwrap());

        assert!(!driver.has("a", Some("USERS")).unwrap());
        assert!(!driver.has("b", Some("USERS")).unwrap());
        assert!(driver.has("a", Some("POSTS")).unwrap());

        assert!(driver.clear(None).unwrap());
        assert_eq!(driver.stats().unwrap().objects, 0);
    }

    #[test]
    fn test_flat_mode() {
        let driver = MemoryDriver::flat();
        assert!(!driver.capabilities().native_namespaces);

        driver.set("a", Some("NS"), b"1", 0).unwrap();
        assert!(driver.has("a", Some("NS")).unwrap());
        assert!(!driver.has("a", None).unwrap());

        assert!(matches!(
            driver.clear(Some("NS")),
            Err(DriverError::Unsupported(_))
        ));
        assert!(driver.clear(None).unwrap());
        assert!(!driver.has("a", Some("NS")).unwrap());
    }

    #[test]
    fn test_max_entries() {
        let driver = MemoryDriver::with_config(MemoryConfig {
            flat: false,
            max_entries: Some(2),
        });

        driver.set("a", None, b"1", 0).unwrap();
        driver.set("b", None, b"2", 0).unwrap();
        // overwriting an existing key is always allowed
        assert!(driver.set("a", None, b"3", 0).unwrap());
        assert!(matches!(
            driver.set("c", None, b"4", 0),
            Err(DriverError::Backend(_))
        ));
    }

    #[test]
    fn test_stats() {
        let driver = MemoryDriver::new();
        driver.set("key1", None, b"value1", 0).unwrap();
        driver.get("key1", None).unwrap();
        driver.get("key2", None).unwrap();

        let stats = driver.stats().unwrap();
        assert_eq!(stats.objects, 1);
        assert_eq!(stats.extra["sets"], 1);
        assert_eq!(stats.extra["gets"], 2);
        assert_eq!(stats.extra["hits"], 1);
        assert_eq!(stats.extra["misses"], 1);
    }
}
