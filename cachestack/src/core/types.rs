use super::state::ProviderState;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Statistics reported by a backend driver
#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq)]
pub struct DriverStats {
    /// Number of stored objects
    pub objects: u64,
    /// Backend-specific figures
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DriverStats {
    pub fn new(objects: u64) -> Self {
        Self {
            objects,
            extra: Map::new(),
        }
    }

    /// Attach a backend-specific figure
    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.extra.insert(name.to_string(), value.into());
        self
    }
}

/// Statistics of one pool (provider or manager)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PoolStats {
    pub id: String,
    pub backend: String,
    pub state: ProviderState,
    pub objects: u64,
    pub options: Value,
    /// Backend-specific figures as reported by the driver
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub driver: Map<String, Value>,
}
