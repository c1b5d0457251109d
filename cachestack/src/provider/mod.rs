//! Provider
//!
//! Wraps exactly one [`Driver`] with item-pool semantics: key and namespace
//! validation, generation keys, TTL translation, JSON serialization, the
//! deferred-save queue and the health state machine.
//!
//! Driver failures never escape a provider. They are logged, recorded as an
//! ERROR state and reported to the caller as a miss or `false`; the reason is
//! available from [`CachePool::state`].

pub mod generation;

use crate::core::key::{DEFAULT_NAMESPACE, ensure_key, normalize_namespace};
use crate::core::{
    CacheError, CacheItem, CachePool, DriverResult, PoolStats, ProviderState, Result, Status,
};
use crate::driver::{Driver, DriverCapabilities};
use chrono::{TimeDelta, Utc};
use generation::{GenerationKeys, physical_key};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Provider configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// TTL in seconds for items saved without an expiration (0 = forever)
    #[serde(default)]
    pub default_ttl: u64,
}

/// Where the entries of one namespace live on the driver
struct Scope {
    token: Option<String>,
    namespace: Option<String>,
}

impl Scope {
    fn native(namespace: &str) -> Self {
        Self {
            token: None,
            namespace: Some(namespace.to_string()),
        }
    }

    fn generation(token: &str) -> Self {
        Self {
            token: Some(token.to_string()),
            namespace: None,
        }
    }

    fn key(&self, key: &str) -> String {
        match &self.token {
            Some(token) => physical_key(token, key),
            None => key.to_string(),
        }
    }

    fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }
}

pub struct Provider {
    id: String,
    driver: Box<dyn Driver>,
    capabilities: DriverCapabilities,
    config: ProviderConfig,
    namespace: RwLock<String>,
    state: Mutex<ProviderState>,
    deferred: Mutex<BTreeMap<(String, String), CacheItem>>,
    generations: GenerationKeys,
}

impl Provider {
    /// Create a provider and run its first self-test
    pub fn new(id: impl Into<String>, driver: impl Driver + 'static) -> Self {
        Self::with_config(id, Box::new(driver), ProviderConfig::default())
    }

    pub fn with_config(
        id: impl Into<String>,
        driver: Box<dyn Driver>,
        config: ProviderConfig,
    ) -> Self {
        let capabilities = driver.capabilities();
        let provider = Self {
            id: id.into(),
            driver,
            capabilities,
            config,
            namespace: RwLock::new(DEFAULT_NAMESPACE.to_string()),
            state: Mutex::new(ProviderState::success()),
            deferred: Mutex::new(BTreeMap::new()),
            generations: GenerationKeys::new(),
        };

        info!(
            "Provider {} created on {} driver (generation keys: {})",
            provider.id,
            provider.driver.name(),
            provider.uses_generation_keys()
        );
        provider.test();
        provider
    }

    /// Whether keys are indirected through a namespace generation token
    pub fn uses_generation_keys(&self) -> bool {
        !self.capabilities.native_namespaces
    }

    pub fn capabilities(&self) -> DriverCapabilities {
        self.capabilities
    }

    /// Force a state transition
    pub fn set_state(&self, status: Status, message: Option<String>) {
        let mut state = self.state.lock();
        *state = match status {
            Status::Success => ProviderState::success(),
            Status::Error => {
                let message = message.unwrap_or_else(|| "unspecified error".to_string());
                error!("Provider {} set to ERROR: {}", self.id, message);
                ProviderState::error(message)
            }
        };
    }

    pub fn state_message(&self) -> Option<String> {
        self.state.lock().message.clone()
    }

    pub fn state_time(&self) -> chrono::DateTime<chrono::Utc> {
        self.state.lock().timestamp
    }

    fn record_error(&self, operation: &str, message: impl std::fmt::Display) {
        let message = format!("{} failed: {}", operation, message);
        error!("Provider {} entered ERROR state: {}", self.id, message);
        *self.state.lock() = ProviderState::error(message);
    }

    /// Downgrade a driver failure to `None` plus an ERROR transition
    fn absorb<T>(&self, operation: &str, result: DriverResult<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                self.record_error(operation, e);
                None
            }
        }
    }

    fn run_test(&self, state: &mut ProviderState) -> bool {
        let failure = match self.driver.test() {
            Ok(true) => {
                if !state.is_success() {
                    info!("Provider {} recovered", self.id);
                }
                *state = ProviderState::success();
                return true;
            }
            Ok(false) => format!("{} self-test failed", self.driver.name()),
            Err(e) => format!("{} self-test failed: {}", self.driver.name(), e),
        };

        error!("Provider {} entered ERROR state: {}", self.id, failure);
        *state = ProviderState::error(failure);
        false
    }

    /// Scope for reads; `None` when the namespace has no generation yet
    fn read_scope(&self, namespace: &str) -> DriverResult<Option<Scope>> {
        if self.capabilities.native_namespaces {
            return Ok(Some(Scope::native(namespace)));
        }
        Ok(self
            .generations
            .resolve(self.driver.as_ref(), namespace)?
            .map(|token| Scope::generation(&token)))
    }

    /// Run a write in the namespace scope, creating the generation if needed
    fn write_scoped<T>(
        &self,
        namespace: &str,
        write: impl FnOnce(&Scope) -> DriverResult<T>,
    ) -> DriverResult<T> {
        if self.capabilities.native_namespaces {
            return write(&Scope::native(namespace));
        }
        self.generations
            .with_token(self.driver.as_ref(), namespace, |token| {
                write(&Scope::generation(token))
            })
    }

    fn decode(&self, key: &str, raw: &[u8]) -> CacheItem {
        match serde_json::from_slice::<Value>(raw) {
            Ok(value) => CacheItem::hydrated(key.to_string(), value),
            Err(e) => {
                warn!(
                    "Provider {}: undecodable payload for {}, treating as miss: {}",
                    self.id, key, e
                );
                CacheItem::miss(key.to_string())
            }
        }
    }

    fn encode(key: &str, value: &Value) -> Result<Vec<u8>> {
        serde_json::to_vec(value)
            .map_err(|e| CacheError::InvalidValue(format!("cannot serialize {}: {}", key, e)))
    }

    fn checked_payload(item: &CacheItem) -> Result<&Value> {
        match item.payload() {
            Some(value) if !value.is_null() => Ok(value),
            _ => Err(CacheError::InvalidValue(format!(
                "null value for key {:?}",
                item.key()
            ))),
        }
    }

    /// Save an item into a given namespace, leaving the active one untouched
    fn save_in(&self, namespace: &str, item: &CacheItem) -> Result<bool> {
        let value = Self::checked_payload(item)?;

        let ttl = match item.get_ttl() {
            Some(ttl) if ttl < 0 => {
                debug!(
                    "Provider {}: refusing to save expired item {}",
                    self.id,
                    item.key()
                );
                return Ok(false);
            }
            Some(ttl) => ttl as u64,
            None => self.config.default_ttl,
        };
        let payload = Self::encode(item.key(), value)?;

        let result = self.write_scoped(namespace, |scope| {
            self.driver
                .set(&scope.key(item.key()), scope.namespace(), &payload, ttl)
        });
        Ok(self.absorb("set", result).unwrap_or(false))
    }
}

/// Whole seconds for a driver TTL, rounding sub-second remainders up.
///
/// Follows [`item_for`](crate::core::pool::item_for): no TTL, a zero TTL or one beyond any representable
/// date all mean forever (`0`).
fn ttl_secs(ttl: Option<Duration>) -> u64 {
    let Some(ttl) = ttl.filter(|d| !d.is_zero()) else {
        return 0;
    };
    let representable = TimeDelta::from_std(ttl)
        .ok()
        .and_then(|delta| Utc::now().checked_add_signed(delta))
        .is_some();
    if !representable {
        return 0;
    }
    ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0)
}

impl CachePool for Provider {
    fn id(&self) -> &str {
        &self.id
    }

    fn backend_name(&self) -> String {
        self.driver.name().to_string()
    }

    fn namespace(&self) -> String {
        self.namespace.read().clone()
    }

    fn set_namespace(&self, namespace: &str) -> Result<()> {
        let namespace = normalize_namespace(namespace)?;
        *self.namespace.write() = namespace;
        Ok(())
    }

    fn get_item(&self, key: &str) -> Result<CacheItem> {
        ensure_key(key)?;
        let namespace = self.namespace();

        let result = self.read_scope(&namespace).and_then(|scope| match scope {
            Some(scope) => self.driver.get(&scope.key(key), scope.namespace()),
            None => Ok(None),
        });

        Ok(match self.absorb("get", result).flatten() {
            Some(raw) => self.decode(key, &raw),
            None => CacheItem::miss(key.to_string()),
        })
    }

    fn get_items(&self, keys: &[String]) -> Result<Vec<CacheItem>> {
        for key in keys {
            ensure_key(key)?;
        }
        let namespace = self.namespace();

        let result = self.read_scope(&namespace).and_then(|scope| {
            let Some(scope) = scope else {
                return Ok(HashMap::new());
            };
            let physical: Vec<String> = keys.iter().map(|k| scope.key(k)).collect();
            let mut found = self.driver.get_multiple(&physical, scope.namespace())?;
            Ok(keys
                .iter()
                .zip(physical)
                .filter_map(|(key, phys)| found.remove(&phys).map(|raw| (key.clone(), raw)))
                .collect::<HashMap<_, _>>())
        });
        let mut found = self.absorb("get_multiple", result).unwrap_or_default();

        Ok(keys
            .iter()
            .map(|key| match found.remove(key) {
                Some(raw) => self.decode(key, &raw),
                None => CacheItem::miss(key.clone()),
            })
            .collect())
    }

    fn has_item(&self, key: &str) -> Result<bool> {
        ensure_key(key)?;
        let namespace = self.namespace();

        let result = self.read_scope(&namespace).and_then(|scope| match scope {
            Some(scope) => self.driver.has(&scope.key(key), scope.namespace()),
            None => Ok(false),
        });
        Ok(self.absorb("has", result).unwrap_or(false))
    }

    fn save(&self, item: CacheItem) -> Result<bool> {
        let namespace = self.namespace();
        self.save_in(&namespace, &item)
    }

    fn save_deferred(&self, item: CacheItem) -> Result<bool> {
        Self::checked_payload(&item)?;
        let namespace = self.namespace();
        debug!(
            "Provider {}: deferring {} in {}",
            self.id,
            item.key(),
            namespace
        );
        self.deferred
            .lock()
            .insert((namespace, item.key().to_string()), item);
        Ok(true)
    }

    fn commit(&self) -> Result<bool> {
        let queued = std::mem::take(&mut *self.deferred.lock());
        let mut all = true;
        for ((namespace, _), item) in queued {
            all &= self.save_in(&namespace, &item)?;
        }
        Ok(all)
    }

    fn delete_item(&self, key: &str) -> Result<bool> {
        ensure_key(key)?;
        let namespace = self.namespace();

        let result = self.read_scope(&namespace).and_then(|scope| match scope {
            Some(scope) => self.driver.delete(&scope.key(key), scope.namespace()),
            None => Ok(false),
        });
        Ok(self.absorb("delete", result).unwrap_or(false))
    }

    fn delete_items(&self, keys: &[String]) -> Result<bool> {
        for key in keys {
            ensure_key(key)?;
        }
        let namespace = self.namespace();

        let result = self.read_scope(&namespace).and_then(|scope| match scope {
            Some(scope) => {
                let physical: Vec<String> = keys.iter().map(|k| scope.key(k)).collect();
                self.driver.delete_multiple(&physical, scope.namespace())
            }
            None => Ok(false),
        });
        Ok(self.absorb("delete_multiple", result).unwrap_or(false))
    }

    fn clear(&self) -> Result<bool> {
        self.deferred.lock().clear();
        let result = self.driver.clear(None);
        Ok(self.absorb("clear", result).unwrap_or(false))
    }

    fn clear_namespace(&self) -> Result<bool> {
        let namespace = self.namespace();
        let result = if self.capabilities.native_namespaces {
            self.driver.clear(Some(&namespace))
        } else {
            self.generations
                .invalidate(self.driver.as_ref(), &namespace)
        };
        Ok(self.absorb("clear_namespace", result).unwrap_or(false))
    }

    fn test(&self) -> bool {
        let mut state = self.state.lock();
        self.run_test(&mut state)
    }

    fn state(&self) -> ProviderState {
        self.state.lock().clone()
    }

    /// Re-test under the state lock so concurrent callers probe only once
    fn is_available(&self, flap_interval: Duration) -> bool {
        let mut state = self.state.lock();
        if state.is_success() {
            return true;
        }
        if !state.is_retest_due(flap_interval) {
            return false;
        }
        debug!("Provider {} flap interval elapsed, re-testing", self.id);
        self.run_test(&mut state)
    }

    fn stats(&self) -> PoolStats {
        let driver_stats = self
            .absorb("stats", self.driver.stats())
            .unwrap_or_default();

        PoolStats {
            id: self.id.clone(),
            backend: self.backend_name(),
            state: self.state(),
            objects: driver_stats.objects,
            options: self.driver.options(),
            driver: driver_stats.extra,
        }
    }

    fn set_multiple(&self, entries: &[(String, Value)], ttl: Option<Duration>) -> Result<bool> {
        let mut payloads = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            ensure_key(key)?;
            if value.is_null() {
                return Err(CacheError::InvalidValue(format!("null value for key {:?}", key)));
            }
            payloads.push((key.clone(), Self::encode(key, value)?));
        }
        let namespace = self.namespace();
        let ttl = ttl_secs(ttl);

        let result = self.write_scoped(&namespace, |scope| {
            let physical: Vec<(String, Vec<u8>)> = payloads
                .iter()
                .map(|(key, raw)| (scope.key(key), raw.clone()))
                .collect();
            self.driver
                .set_multiple(&physical, scope.namespace(), ttl)
        });
        Ok(self.absorb("set_multiple", result).unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{MemoryDriver, VacuumDriver};
    use chrono::{TimeDelta, Utc};
    use serde_json::json;

    #[test]
    fn test_provider_starts_healthy() {
        let provider = Provider::new("mem", MemoryDriver::new());
        assert!(provider.state().is_success());
        assert_eq!(provider.namespace(), DEFAULT_NAMESPACE);
        assert!(!provider.uses_generation_keys());
    }

    #[test]
    fn test_save_and_get() {
        let provider = Provider::new("mem", MemoryDriver::new());

        let mut item = CacheItem::new("Ford").unwrap();
        item.set(json!("Prefect"));
        assert!(provider.save(item).unwrap());

        let item = provider.get_item("Ford").unwrap();
        assert!(item.is_hit());
        assert_eq!(item.get(), Some(&json!("Prefect")));
    }

    #[test]
    fn test_expired_item_rejected() {
        let provider = Provider::new("mem", MemoryDriver::new());

        let mut item = CacheItem::new("old").unwrap();
        item.set(json!(1));
        item.expires_at(Some(Utc::now() - TimeDelta::seconds(10)));

        assert!(!provider.save(item).unwrap());
        assert!(!provider.get_item("old").unwrap().is_hit());
        // refusing is not a backend failure
        assert!(provider.state().is_success());
    }

    #[test]
    fn test_null_value_is_argument_error() {
        let provider = Provider::new("mem", MemoryDriver::new());
        let item = CacheItem::new("k").unwrap();
        assert!(matches!(
            provider.save(item),
            Err(CacheError::InvalidValue(_))
        ));
        assert!(provider.set("k", Value::Null, None).is_err());
    }

    #[test]
    fn test_invalid_key_is_argument_error() {
        let provider = Provider::new("mem", MemoryDriver::new());
        assert!(matches!(
            provider.get_item("bar{Foo"),
            Err(CacheError::InvalidKey(_))
        ));
        assert!(provider.delete("a/b").is_err());
        assert!(provider.set_namespace(&"n".repeat(65)).is_err());
    }

    #[test]
    fn test_undecodable_payload_is_miss() {
        let driver = MemoryDriver::new();
        driver
            .set("broken", Some(DEFAULT_NAMESPACE), b"{not json", 0)
            .unwrap();
        let provider = Provider::new("mem", driver);

        assert!(!provider.get_item("broken").unwrap().is_hit());
        assert!(provider.state().is_success());
    }

    #[test]
    fn test_default_ttl_applied() {
        let provider = Provider::with_config(
            "mem",
            Box::new(MemoryDriver::new()),
            ProviderConfig { default_ttl: 1 },
        );

        let mut item = CacheItem::new("short").unwrap();
        item.set(json!("lived"));
        assert!(provider.save(item).unwrap());
        assert!(provider.has("short").unwrap());

        std::thread::sleep(Duration::from_millis(1100));
        assert!(!provider.has("short").unwrap());
    }

    #[test]
    fn test_generation_keys_on_flat_driver() {
        let provider = Provider::new("flat", MemoryDriver::flat());
        assert!(provider.uses_generation_keys());

        // nothing can be addressed before the namespace is born
        assert!(!provider.get_item("Ford").unwrap().is_hit());
        assert!(!provider.delete("Ford").unwrap());

        provider.set("Ford", json!("Prefect"), None).unwrap();
        assert_eq!(
            provider.get("Ford", None).unwrap(),
            Some(json!("Prefect"))
        );

        assert!(provider.clear_namespace().unwrap());
        assert_eq!(provider.get("Ford", None).unwrap(), None);
    }

    #[test]
    fn test_deferred_commit() {
        let provider = Provider::new("mem", MemoryDriver::new());

        let mut item = CacheItem::new("later").unwrap();
        item.set(json!(42));
        assert!(provider.save_deferred(item).unwrap());
        assert!(!provider.has("later").unwrap());

        assert!(provider.commit().unwrap());
        assert_eq!(provider.get("later", None).unwrap(), Some(json!(42)));
        // queue is drained
        assert!(provider.commit().unwrap());
    }

    #[test]
    fn test_set_multiple_and_get_multiple() {
        let provider = Provider::new("flat", MemoryDriver::flat());
        let entries = vec![
            ("a".to_string(), json!(1)),
            ("b".to_string(), json!({"x": true})),
        ];
        assert!(provider.set_multiple(&entries, None).unwrap());

        let keys = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let values = provider.get_multiple(&keys, Some(json!("none"))).unwrap();
        assert_eq!(values["a"], Some(json!(1)));
        assert_eq!(values["b"], Some(json!({"x": true})));
        assert_eq!(values["c"], Some(json!("none")));

        assert!(provider.delete_multiple(&keys[..2]).unwrap());
        assert!(!provider.has("a").unwrap());
    }

    #[test]
    fn test_set_state_and_retest() {
        let provider = Provider::new("vac", VacuumDriver::new());
        provider.set_state(Status::Error, Some("forced".to_string()));
        assert_eq!(provider.state_message(), Some("forced".to_string()));
        assert!(!provider.is_available(Duration::from_secs(600)));

        // zero flap interval re-tests immediately
        std::thread::sleep(Duration::from_millis(10));
        assert!(provider.is_available(Duration::ZERO));
        assert!(provider.state().is_success());
    }

    #[test]
    fn test_stats() {
        let provider = Provider::new("mem", MemoryDriver::new());
        provider.set("a", json!(1), None).unwrap();

        let stats = provider.stats();
        assert_eq!(stats.id, "mem");
        assert_eq!(stats.backend, "memory");
        assert_eq!(stats.objects, 1);
        assert_eq!(stats.state.status, Status::Success);
        assert_eq!(stats.options["flat"], false);
    }

    #[test]
    fn test_ttl_secs_rounds_up() {
        assert_eq!(ttl_secs(None), 0);
        assert_eq!(ttl_secs(Some(Duration::from_millis(500))), 1);
        assert_eq!(ttl_secs(Some(Duration::from_secs(20))), 20);
        assert_eq!(ttl_secs(Some(Duration::ZERO)), 0);
        assert_eq!(ttl_secs(Some(Duration::from_secs(u64::MAX))), 0);
    }

    #[test]
    fn test_unbounded_ttl_is_forever() {
        for provider in [
            Provider::new("mem", MemoryDriver::new()),
            Provider::new("flat", MemoryDriver::flat()),
        ] {
            let huge = Some(Duration::from_secs(u64::MAX));
            assert!(provider.set("single", json!(1), huge).unwrap());
            let entries = vec![("batch".to_string(), json!(2))];
            assert!(provider.set_multiple(&entries, huge).unwrap());

            assert_eq!(provider.get("single", None).unwrap(), Some(json!(1)));
            assert_eq!(provider.get("batch", None).unwrap(), Some(json!(2)));
            assert!(provider.state().is_success());
        }
    }

    #[test]
    fn test_unbounded_default_ttl_is_forever() {
        let provider = Provider::with_config(
            "mem",
            Box::new(MemoryDriver::new()),
            ProviderConfig {
                default_ttl: u64::MAX,
            },
        );

        let mut item = CacheItem::new("k").unwrap();
        item.set(json!("kept"));
        assert!(provider.save(item).unwrap());
        assert_eq!(provider.get("k", None).unwrap(), Some(json!("kept")));
    }
}
