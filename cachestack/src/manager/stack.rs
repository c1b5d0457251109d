//! Provider Stack
//!
//! Ordered, weighted providers with a health filter. A provider in ERROR is
//! skipped for `flap_interval`, then re-tested in place the next time the
//! stack is queried; the fresh result decides whether it is accepted again.

use crate::core::{CacheError, CachePool, Result};
use rand::seq::IndexedRandom;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Default time a failed provider is left alone before a re-test
pub const DEFAULT_FLAP_INTERVAL: Duration = Duration::from_secs(600);

/// Shortest allowed flap interval
pub const MIN_FLAP_INTERVAL: Duration = Duration::from_secs(1);

/// Highest allowed provider weight
pub const MAX_WEIGHT: u32 = 100;

/// One registered provider
#[derive(Clone)]
pub struct StackEntry {
    pub id: String,
    pub provider: Arc<dyn CachePool>,
    pub weight: u8,
}

pub struct ProviderStack {
    entries: Vec<StackEntry>,
    flap_interval: Duration,
}

impl ProviderStack {
    pub fn new(flap_interval: Duration) -> Self {
        Self {
            entries: Vec::new(),
            flap_interval: flap_interval.max(MIN_FLAP_INTERVAL),
        }
    }

    pub fn flap_interval(&self) -> Duration {
        self.flap_interval
    }

    pub fn set_flap_interval(&mut self, flap_interval: Duration) {
        self.flap_interval = flap_interval.max(MIN_FLAP_INTERVAL);
    }

    /// Register a provider; ids are unique and weights range 0..=100
    pub fn add(&mut self, id: &str, provider: Arc<dyn CachePool>, weight: u32) -> Result<()> {
        if self.contains(id) {
            return Err(CacheError::DuplicateProvider(id.to_string()));
        }
        if weight > MAX_WEIGHT {
            return Err(CacheError::InvalidWeight {
                id: id.to_string(),
                weight,
            });
        }

        debug!("Adding provider {} (weight={})", id, weight);
        self.entries.push(StackEntry {
            id: id.to_string(),
            provider,
            weight: weight as u8,
        });
        Ok(())
    }

    pub fn remove(&mut self, id: &str) -> Option<Arc<dyn CachePool>> {
        let index = self.entries.iter().position(|e| e.id == id)?;
        debug!("Removing provider {}", id);
        Some(self.entries.remove(index).provider)
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn CachePool>> {
        self.entry(id).map(|e| e.provider.clone())
    }

    pub fn entry(&self, id: &str) -> Option<&StackEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entry(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Health filter; may re-test a provider whose flap interval elapsed
    pub fn accepts(&self, entry: &StackEntry) -> bool {
        entry.provider.is_available(self.flap_interval)
    }

    /// Accepted providers in stack order
    pub fn list_healthy(&self) -> Vec<&StackEntry> {
        self.entries.iter().filter(|e| self.accepts(e)).collect()
    }

    /// Every provider, or only the accepted ones
    pub fn get_all(&self, only_healthy: bool) -> Vec<&StackEntry> {
        if only_healthy {
            self.list_healthy()
        } else {
            self.entries.iter().collect()
        }
    }

    pub fn first_provider(&self) -> Option<&StackEntry> {
        self.entries.iter().find(|e| self.accepts(e))
    }

    pub fn last_provider(&self) -> Option<&StackEntry> {
        self.entries.iter().rev().find(|e| self.accepts(e))
    }

    pub fn random_provider(&self) -> Option<&StackEntry> {
        self.list_healthy().choose(&mut rand::rng()).copied()
    }

    /// Accepted provider with the highest weight; the first one wins ties
    pub fn heavy_provider(&self) -> Option<&StackEntry> {
        let mut heaviest: Option<&StackEntry> = None;
        for entry in self.list_healthy() {
            if heaviest.is_none_or(|best| entry.weight > best.weight) {
                heaviest = Some(entry);
            }
        }
        heaviest
    }
}

impl Default for ProviderStack {
    fn default() -> Self {
        Self::new(DEFAULT_FLAP_INTERVAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Status;
    use crate::driver::MemoryDriver;
    use crate::provider::Provider;

    fn provider(id: &str) -> Arc<Provider> {
        Arc::new(Provider::new(id, MemoryDriver::new()))
    }

    #[test]
    fn test_add_rejects_duplicates_and_heavy_weights() {
        let mut stack = ProviderStack::default();
        stack.add("a", provider("a"), 10).unwrap();

        assert!(matches!(
            stack.add("a", provider("a"), 10),
            Err(CacheError::DuplicateProvider(_))
        ));
        assert!(matches!(
            stack.add("b", provider("b"), 101),
            Err(CacheError::InvalidWeight { .. })
        ));
        assert_eq!(stack.len(), 1);
    }

    #[test]
    fn test_remove() {
        let mut stack = ProviderStack::default();
        stack.add("a", provider("a"), 10).unwrap();
        assert!(stack.remove("a").is_some());
        assert!(stack.remove("a").is_none());
        assert!(stack.is_empty());
    }

    #[test]
    fn test_first_last_heavy() {
        let mut stack = ProviderStack::default();
        stack.add("a", provider("a"), 30).unwrap();
        stack.add("b", provider("b"), 100).unwrap();
        stack.add("c", provider("c"), 0).unwrap();
        stack.add("d", provider("d"), 100).unwrap();

        assert_eq!(stack.first_provider().unwrap().id, "a");
        assert_eq!(stack.last_provider().unwrap().id, "d");
        // tie between b and d: first encountered wins
        assert_eq!(stack.heavy_provider().unwrap().id, "b");
    }

    #[test]
    fn test_unhealthy_providers_filtered() {
        let mut stack = ProviderStack::default();
        let a = provider("a");
        let b = provider("b");
        stack.add("a", a.clone(), 30).unwrap();
        stack.add("b", b.clone(), 100).unwrap();

        b.set_state(Status::Error, Some("down".to_string()));

        let healthy: Vec<&str> = stack.list_healthy().iter().map(|e| e.id.as_str()).collect();
        assert_eq!(healthy, vec!["a"]);
        assert_eq!(stack.heavy_provider().unwrap().id, "a");
        assert_eq!(stack.last_provider().unwrap().id, "a");
        assert_eq!(stack.get_all(false).len(), 2);
    }

    #[test]
    fn test_random_only_healthy() {
        let mut stack = ProviderStack::default();
        let a = provider("a");
        stack.add("a", a.clone(), 1).unwrap();
        stack.add("b", provider("b"), 1).unwrap();
        a.set_state(Status::Error, None);

        for _ in 0..20 {
            assert_eq!(stack.random_provider().unwrap().id, "b");
        }
    }

    #[test]
    fn test_flap_interval_minimum() {
        let stack = ProviderStack::new(Duration::ZERO);
        assert_eq!(stack.flap_interval(), MIN_FLAP_INTERVAL);
    }
}
