use super::error::Result;
use super::key::ensure_key;
use chrono::{DateTime, TimeDelta, Utc};
use serde_json::Value;
use std::time::Duration;

/// Absolute expiration of a cache item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiration {
    /// Explicitly stored forever
    Never,
    /// Expires at the given instant
    At(DateTime<Utc>),
}

/// One cache slot: key, payload, hit flag and expiration.
///
/// Items are created empty by a pool lookup (`hit = false`) or hydrated from a
/// successful backend read (`hit = true`). Only hits expose their value through
/// [`CacheItem::get`]; a value assigned with [`CacheItem::set`] is kept for
/// saving but does not turn a miss into a hit.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheItem {
    key: String,
    value: Option<Value>,
    hit: bool,
    expiration: Option<Expiration>,
}

impl CacheItem {
    /// Create an empty (miss) item for a validated key
    pub fn new(key: impl Into<String>) -> Result<Self> {
        let key = key.into();
        ensure_key(&key)?;
        Ok(Self::miss(key))
    }

    pub(crate) fn miss(key: String) -> Self {
        Self {
            key,
            value: None,
            hit: false,
            expiration: None,
        }
    }

    pub(crate) fn hydrated(key: String, value: Value) -> Self {
        Self {
            key,
            value: Some(value),
            hit: true,
            expiration: None,
        }
    }

    /// The item key
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Value of a hit, `None` for a miss
    pub fn get(&self) -> Option<&Value> {
        if self.hit { self.value.as_ref() } else { None }
    }

    /// Consume the item, returning the value of a hit
    pub fn into_value(self) -> Option<Value> {
        if self.hit { self.value } else { None }
    }

    /// Whether the item was produced by a successful read
    pub fn is_hit(&self) -> bool {
        self.hit
    }

    /// Assign the payload to be saved
    pub fn set(&mut self, value: Value) -> &mut Self {
        self.value = Some(value);
        self
    }

    /// Set an absolute expiration; `None` stores the item forever
    pub fn expires_at(&mut self, at: Option<DateTime<Utc>>) -> &mut Self {
        self.expiration = Some(match at {
            Some(at) => Expiration::At(at),
            None => Expiration::Never,
        });
        self
    }

    /// Set the expiration relative to now; `None` stores the item forever
    pub fn expires_after(&mut self, ttl: Option<Duration>) -> &mut Self {
        let at = ttl.and_then(|ttl| {
            TimeDelta::from_std(ttl)
                .ok()
                .and_then(|delta| Utc::now().checked_add_signed(delta))
        });
        self.expires_at(at)
    }

    /// Convenience wrapper over [`CacheItem::expires_after`] taking seconds
    pub fn expires_after_secs(&mut self, secs: u64) -> &mut Self {
        self.expires_after(Some(Duration::from_secs(secs)))
    }

    /// Current expiration setting
    pub fn expiration(&self) -> Option<Expiration> {
        self.expiration
    }

    /// Remaining lifetime in seconds.
    ///
    /// `None` when no expiration was set, `0` for "never", a negative number
    /// once the expiration has passed, otherwise the remaining seconds
    /// rounded up (at least 1).
    pub fn get_ttl(&self) -> Option<i64> {
        match self.expiration? {
            Expiration::Never => Some(0),
            Expiration::At(at) => {
                let remaining_ms = (at - Utc::now()).num_milliseconds();
                if remaining_ms <= 0 {
                    Some(remaining_ms.div_euclid(1000).min(-1))
                } else {
                    Some((remaining_ms + 999) / 1000)
                }
            }
        }
    }

    /// Payload regardless of the hit flag, used when saving
    pub(crate) fn payload(&self) -> Option<&Value> {
        self.value.as_ref()
    }
}
