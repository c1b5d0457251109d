//! The item-pool contract shared by providers and managers
//!
//! A [`Provider`](crate::provider::Provider) implements it over a single
//! driver; a [`Manager`](crate::manager::Manager) implements it over a stack of
//! pools, which is what lets managers nest.

use super::error::{CacheError, Result};
use super::item::CacheItem;
use super::key::ensure_key;
use super::state::ProviderState;
use super::types::PoolStats;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

pub trait CachePool: Send + Sync {
    /// Identifier of this pool
    fn id(&self) -> &str;

    /// Name of the backend behind this pool
    fn backend_name(&self) -> String;

    /// Active namespace (storage form)
    fn namespace(&self) -> String;

    /// Switch the active namespace
    fn set_namespace(&self, namespace: &str) -> Result<()>;

    /// Look up one item; misses come back as non-hit items
    fn get_item(&self, key: &str) -> Result<CacheItem>;

    /// Look up several items, in key order
    fn get_items(&self, keys: &[String]) -> Result<Vec<CacheItem>> {
        keys.iter().map(|key| self.get_item(key)).collect()
    }

    fn has_item(&self, key: &str) -> Result<bool>;

    /// Persist an item. Refuses (returns `false`) items that already expired.
    fn save(&self, item: CacheItem) -> Result<bool>;

    /// Queue an item for the next [`CachePool::commit`]
    fn save_deferred(&self, item: CacheItem) -> Result<bool>;

    /// Flush deferred saves; `true` only if every queued save succeeded
    fn commit(&self) -> Result<bool>;

    fn delete_item(&self, key: &str) -> Result<bool>;

    fn delete_items(&self, keys: &[String]) -> Result<bool> {
        for key in keys {
            ensure_key(key)?;
        }
        let mut all = true;
        for key in keys {
            all &= self.delete_item(key)?;
        }
        Ok(all)
    }

    /// Remove every entry of every namespace
    fn clear(&self) -> Result<bool>;

    /// Remove every entry of the active namespace
    fn clear_namespace(&self) -> Result<bool>;

    /// Run the backend self-check and update the state accordingly
    fn test(&self) -> bool;

    fn state(&self) -> ProviderState;

    /// Health filter used by provider stacks.
    ///
    /// SUCCESS pools are accepted. ERROR pools are skipped until the state is
    /// older than `flap_interval`, then re-tested in place.
    fn is_available(&self, flap_interval: Duration) -> bool {
        let state = self.state();
        if state.is_success() {
            return true;
        }
        state.is_retest_due(flap_interval) && self.test()
    }

    fn stats(&self) -> PoolStats;

    /// Value for `key`, or `default` on a miss
    fn get(&self, key: &str, default: Option<Value>) -> Result<Option<Value>> {
        let item = self.get_item(key)?;
        Ok(if item.is_hit() {
            item.into_value()
        } else {
            default
        })
    }

    /// Store `value` under `key`. `None` or a zero TTL stores it forever.
    fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<bool> {
        self.save(item_for(key, value, ttl)?)
    }

    fn delete(&self, key: &str) -> Result<bool> {
        self.delete_item(key)
    }

    fn has(&self, key: &str) -> Result<bool> {
        self.has_item(key)
    }

    fn get_multiple(
        &self,
        keys: &[String],
        default: Option<Value>,
    ) -> Result<HashMap<String, Option<Value>>> {
        let items = self.get_items(keys)?;
        Ok(items
            .into_iter()
            .map(|item| {
                let key = item.key().to_string();
                let value = if item.is_hit() {
                    item.into_value()
                } else {
                    default.clone()
                };
                (key, value)
            })
            .collect())
    }

    fn set_multiple(&self, entries: &[(String, Value)], ttl: Option<Duration>) -> Result<bool> {
        let items = entries
            .iter()
            .map(|(key, value)| item_for(key, value.clone(), ttl))
            .collect::<Result<Vec<_>>>()?;
        let mut all = true;
        for item in items {
            all &= self.save(item)?;
        }
        Ok(all)
    }

    fn delete_multiple(&self, keys: &[String]) -> Result<bool> {
        self.delete_items(keys)
    }
}

/// Build a validated item ready to be saved
pub fn item_for(key: &str, value: Value, ttl: Option<Duration>) -> Result<CacheItem> {
    if value.is_null() {
        return Err(CacheError::InvalidValue(format!(
            "null value for key {:?}",
            key
        )));
    }
    let mut item = CacheItem::new(key)?;
    item.set(value);
    match ttl {
        Some(ttl) if !ttl.is_zero() => item.expires_after(Some(ttl)),
        _ => item.expires_at(None),
    };
    Ok(item)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_item_for_rejects_null() {
        assert!(matches!(
            item_for("k", Value::Null, None),
            Err(CacheError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_item_for_ttl() {
        let item = item_for("k", json!(1), None).unwrap();
        assert_eq!(item.get_ttl(), Some(0));

        let item = item_for("k", json!(1), Some(Duration::ZERO)).unwrap();
        assert_eq!(item.get_ttl(), Some(0));

        let item = item_for("k", json!(1), Some(Duration::from_secs(20))).unwrap();
        assert!(item.get_ttl().unwrap() > 0);
    }
}
