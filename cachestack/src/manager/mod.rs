//! Manager
//!
//! Composes a [`ProviderStack`] under a pick mode and an alignment flag.
//! The manager is itself a [`CachePool`], so managers can be stacked inside
//! other managers.
//!
//! Writes go to the selected provider only when alignment is off and the pick
//! mode is single-target; otherwise they fan out to every healthy provider and
//! succeed only if all of them did. Reads follow the pick mode.

pub mod pick;
pub mod stack;

pub use pick::PickMode;
pub use stack::{DEFAULT_FLAP_INTERVAL, ProviderStack, StackEntry};

use crate::core::key::{DEFAULT_NAMESPACE, ensure_key, normalize_namespace};
use crate::core::{
    CacheError, CacheItem, CachePool, PoolStats, ProviderState, Result, Status,
};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Manager configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    #[serde(default = "default_manager_id")]
    pub id: String,
    #[serde(default)]
    pub pick_mode: PickMode,
    #[serde(default)]
    pub align_cache: bool,
    /// Seconds a failed provider is skipped before being re-tested
    #[serde(default = "default_flap_interval")]
    pub flap_interval: u64,
}

fn default_manager_id() -> String {
    "manager".to_string()
}

fn default_flap_interval() -> u64 {
    DEFAULT_FLAP_INTERVAL.as_secs()
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            id: default_manager_id(),
            pick_mode: PickMode::default(),
            align_cache: false,
            flap_interval: default_flap_interval(),
        }
    }
}

/// Summary of one registered provider
#[derive(Debug, Clone, Serialize)]
pub struct ProviderInfo {
    pub id: String,
    pub weight: u8,
    pub backend: String,
    pub state: ProviderState,
}

pub struct Manager {
    id: String,
    pick_mode: PickMode,
    align_cache: bool,
    stack: ProviderStack,
    selected: Mutex<Option<String>>,
    namespace: RwLock<String>,
}

type Target = (String, Arc<dyn CachePool>);

impl Manager {
    pub fn new(config: ManagerConfig) -> Self {
        info!(
            "Initializing cache manager {} (pick_mode={}, align_cache={}, flap_interval={}s)",
            config.id, config.pick_mode, config.align_cache, config.flap_interval
        );

        Self {
            id: config.id,
            pick_mode: config.pick_mode,
            align_cache: config.align_cache,
            stack: ProviderStack::new(Duration::from_secs(config.flap_interval)),
            selected: Mutex::new(None),
            namespace: RwLock::new(DEFAULT_NAMESPACE.to_string()),
        }
    }

    /// Register a provider; it adopts the manager's active namespace
    pub fn add_provider(
        &mut self,
        id: &str,
        provider: Arc<dyn CachePool>,
        weight: u32,
    ) -> Result<()> {
        provider.set_namespace(&self.namespace())?;
        self.stack.add(id, provider, weight)
    }

    pub fn remove_provider(&mut self, id: &str) -> Result<Arc<dyn CachePool>> {
        let removed = self
            .stack
            .remove(id)
            .ok_or_else(|| CacheError::UnknownProvider(id.to_string()))?;

        let mut selected = self.selected.lock();
        if selected.as_deref() == Some(id) {
            *selected = None;
        }
        Ok(removed)
    }

    pub fn provider(&self, id: &str) -> Option<Arc<dyn CachePool>> {
        self.stack.get(id)
    }

    /// Registered providers in stack order
    pub fn providers(&self) -> Vec<ProviderInfo> {
        self.stack
            .get_all(false)
            .into_iter()
            .map(|entry| ProviderInfo {
                id: entry.id.clone(),
                weight: entry.weight,
                backend: entry.provider.backend_name(),
                state: entry.provider.state(),
            })
            .collect()
    }

    pub fn stack(&self) -> &ProviderStack {
        &self.stack
    }

    pub fn pick_mode(&self) -> PickMode {
        self.pick_mode
    }

    /// Change the selection algorithm; the previous selection is forgotten
    pub fn set_pick_mode(&mut self, pick_mode: PickMode) {
        self.pick_mode = pick_mode;
        *self.selected.lock() = None;
    }

    pub fn align_cache(&self) -> bool {
        self.align_cache
    }

    pub fn set_align_cache(&mut self, align_cache: bool) {
        self.align_cache = align_cache;
    }

    pub fn set_flap_interval(&mut self, flap_interval: Duration) {
        self.stack.set_flap_interval(flap_interval);
    }

    /// Provider chosen by the last single-target selection
    pub fn selected_provider(&self) -> Option<String> {
        self.selected.lock().clone()
    }

    /// Run the selection algorithm and record its choice.
    ///
    /// Only single-target pick modes select; ALL and TRAVERSE return `None`.
    pub fn select_provider(&self) -> Option<Target> {
        let entry = match self.pick_mode {
            PickMode::First => self.stack.first_provider(),
            PickMode::Last => self.stack.last_provider(),
            PickMode::Random => self.stack.random_provider(),
            PickMode::ByWeight => self.stack.heavy_provider(),
            PickMode::All | PickMode::Traverse => return None,
        };

        let Some(entry) = entry else {
            debug!("Manager {}: no healthy provider found", self.id);
            return None;
        };

        debug!("Manager {}: selected provider {}", self.id, entry.id);
        *self.selected.lock() = Some(entry.id.clone());
        Some((entry.id.clone(), entry.provider.clone()))
    }

    /// Whether writes go to every healthy provider
    pub fn fans_out(&self) -> bool {
        self.align_cache || !self.pick_mode.is_single_target()
    }

    fn healthy(&self) -> Vec<Target> {
        self.stack
            .list_healthy()
            .into_iter()
            .map(|e| (e.id.clone(), e.provider.clone()))
            .collect()
    }

    /// Providers a write must reach
    fn write_targets(&self) -> Vec<Target> {
        if self.fans_out() {
            return self.healthy();
        }

        // RANDOM keeps writing where the last selection landed while it stays healthy
        if self.pick_mode == PickMode::Random {
            let previous = self.selected.lock().clone();
            if let Some(entry) = previous.as_deref().and_then(|id| self.stack.entry(id)) {
                if self.stack.accepts(entry) {
                    return vec![(entry.id.clone(), entry.provider.clone())];
                }
            }
        }
        self.select_provider().into_iter().collect()
    }

    /// Apply a write to every target; partial failures are logged, not raised
    fn fan_out(
        &self,
        operation: &str,
        write: impl Fn(&dyn CachePool) -> Result<bool>,
    ) -> Result<bool> {
        let targets = self.write_targets();
        if targets.is_empty() {
            info!(
                "Manager {}: no healthy provider for {}",
                self.id, operation
            );
            return Ok(false);
        }

        let mut all = true;
        for (id, provider) in targets {
            if !write(provider.as_ref())? {
                let reason = provider.state().message.unwrap_or_default();
                error!(
                    "Manager {}: {} failed on provider {} {}",
                    self.id, operation, id, reason
                );
                all = false;
            }
        }
        Ok(all)
    }

    fn read_item(&self, key: &str) -> Result<CacheItem> {
        ensure_key(key)?;

        match self.pick_mode {
            PickMode::All => self.consensus_item(key),
            PickMode::Traverse => {
                for (id, provider) in self.healthy() {
                    let item = provider.get_item(key)?;
                    if item.is_hit() {
                        debug!("Manager {}: {} found on {}", self.id, key, id);
                        return Ok(item);
                    }
                }
                Ok(CacheItem::miss(key.to_string()))
            }
            _ => match self.select_provider() {
                Some((_, provider)) => provider.get_item(key),
                None => Ok(CacheItem::miss(key.to_string())),
            },
        }
    }

    /// ALL mode: every healthy provider must return the same value
    fn consensus_item(&self, key: &str) -> Result<CacheItem> {
        let targets = self.healthy();
        if targets.is_empty() {
            debug!("Manager {}: no healthy provider found", self.id);
            return Ok(CacheItem::miss(key.to_string()));
        }

        let mut items = Vec::with_capacity(targets.len());
        for (_, provider) in &targets {
            items.push(provider.get_item(key)?);
        }

        let encoded: Vec<Option<Vec<u8>>> = items
            .iter()
            .map(|item| item.get().and_then(|v| serde_json::to_vec(v).ok()))
            .collect();

        if encoded.iter().all(|e| *e == encoded[0]) {
            return Ok(items.swap_remove(0));
        }

        let holders: Vec<&str> = targets
            .iter()
            .zip(&items)
            .filter(|(_, item)| item.is_hit())
            .map(|((id, _), _)| id.as_str())
            .collect();
        warn!(
            "Manager {}: inconsistent values for {} across providers (hits on {:?})",
            self.id, key, holders
        );
        Ok(CacheItem::miss(key.to_string()))
    }

    /// Statistics of every registered provider, regardless of pick mode
    pub fn get_stats(&self) -> Vec<PoolStats> {
        self.stack
            .get_all(false)
            .into_iter()
            .map(|entry| entry.provider.stats())
            .collect()
    }
}

impl CachePool for Manager {
    fn id(&self) -> &str {
        &self.id
    }

    fn backend_name(&self) -> String {
        "manager".to_string()
    }

    fn namespace(&self) -> String {
        self.namespace.read().clone()
    }

    fn set_namespace(&self, namespace: &str) -> Result<()> {
        let normalized = normalize_namespace(namespace)?;
        for entry in self.stack.get_all(false) {
            entry.provider.set_namespace(namespace)?;
        }
        *self.namespace.write() = normalized;
        Ok(())
    }

    fn get_item(&self, key: &str) -> Result<CacheItem> {
        self.read_item(key)
    }

    fn get_items(&self, keys: &[String]) -> Result<Vec<CacheItem>> {
        for key in keys {
            ensure_key(key)?;
        }
        if self.pick_mode.is_single_target() {
            return match self.select_provider() {
                Some((_, provider)) => provider.get_items(keys),
                None => Ok(keys.iter().map(|k| CacheItem::miss(k.clone())).collect()),
            };
        }
        keys.iter().map(|key| self.read_item(key)).collect()
    }

    fn has_item(&self, key: &str) -> Result<bool> {
        ensure_key(key)?;

        match self.pick_mode {
            PickMode::All => {
                let targets = self.healthy();
                let mut answers = Vec::with_capacity(targets.len());
                for (_, provider) in &targets {
                    answers.push(provider.has_item(key)?);
                }
                if answers.iter().any(|a| *a != answers[0]) {
                    warn!(
                        "Manager {}: providers disagree on presence of {}",
                        self.id, key
                    );
                    return Ok(false);
                }
                Ok(answers.first().copied().unwrap_or(false))
            }
            PickMode::Traverse => {
                for (_, provider) in self.healthy() {
                    if provider.has_item(key)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            _ => match self.select_provider() {
                Some((_, provider)) => provider.has_item(key),
                None => Ok(false),
            },
        }
    }

    fn save(&self, item: CacheItem) -> Result<bool> {
        if item.payload().is_none_or(Value::is_null) {
            return Err(CacheError::InvalidValue(format!(
                "null value for key {:?}",
                item.key()
            )));
        }
        self.fan_out("save", |provider| provider.save(item.clone()))
    }

    fn save_deferred(&self, item: CacheItem) -> Result<bool> {
        if item.payload().is_none_or(Value::is_null) {
            return Err(CacheError::InvalidValue(format!(
                "null value for key {:?}",
                item.key()
            )));
        }
        self.fan_out("save_deferred", |provider| {
            provider.save_deferred(item.clone())
        })
    }

    fn commit(&self) -> Result<bool> {
        let mut all = true;
        for entry in self.stack.get_all(false) {
            if !entry.provider.commit()? {
                error!(
                    "Manager {}: commit failed on provider {}",
                    self.id, entry.id
                );
                all = false;
            }
        }
        Ok(all)
    }

    fn delete_item(&self, key: &str) -> Result<bool> {
        ensure_key(key)?;
        self.fan_out("delete", |provider| provider.delete_item(key))
    }

    fn delete_items(&self, keys: &[String]) -> Result<bool> {
        for key in keys {
            ensure_key(key)?;
        }
        self.fan_out("delete_multiple", |provider| provider.delete_items(keys))
    }

    fn clear(&self) -> Result<bool> {
        self.fan_out("clear", |provider| provider.clear())
    }

    fn clear_namespace(&self) -> Result<bool> {
        self.fan_out("clear_namespace", |provider| provider.clear_namespace())
    }

    /// Test every provider; healthy if at least one passes
    fn test(&self) -> bool {
        let mut any = false;
        for entry in self.stack.get_all(false) {
            any |= entry.provider.test();
        }
        any
    }

    fn state(&self) -> ProviderState {
        let providers = self.stack.get_all(false);
        if providers.iter().any(|e| e.provider.state().is_success()) {
            ProviderState::success()
        } else {
            ProviderState::error(format!("no healthy provider among {}", providers.len()))
        }
    }

    fn stats(&self) -> PoolStats {
        let providers = self.get_stats();
        let healthy = providers
            .iter()
            .filter(|s| s.state.status == Status::Success)
            .count();

        let mut driver = serde_json::Map::new();
        driver.insert("providers".to_string(), json!(providers.len()));
        driver.insert("healthy".to_string(), json!(healthy));

        PoolStats {
            id: self.id.clone(),
            backend: self.backend_name(),
            state: self.state(),
            objects: providers.iter().map(|s| s.objects).sum(),
            options: json!({
                "pick_mode": self.pick_mode,
                "align_cache": self.align_cache,
                "flap_interval": self.stack.flap_interval().as_secs(),
            }),
            driver,
        }
    }

    fn set_multiple(&self, entries: &[(String, Value)], ttl: Option<Duration>) -> Result<bool> {
        for (key, value) in entries {
            ensure_key(key)?;
            if value.is_null() {
                return Err(CacheError::InvalidValue(format!(
                    "null value for key {:?}",
                    key
                )));
            }
        }
        self.fan_out("set_multiple", |provider| {
            provider.set_multiple(entries, ttl)
        })
    }
}
