use super::{Driver, DriverCapabilities};
use crate::core::{DriverResult, DriverStats};

/// Null driver: every write succeeds and nothing is ever stored
#[derive(Debug, Clone, Copy, Default)]
pub struct VacuumDriver;

impl VacuumDriver {
    pub fn new() -> Self {
        Self
    }
}

impl Driver for VacuumDriver {
    fn name(&self) -> &'static str {
        "vacuum"
    }

    fn capabilities(&self) -> DriverCapabilities {
        DriverCapabilities {
            native_namespaces: true,
            batch: true,
        }
    }

    fn test(&self) -> DriverResult<bool> {
        Ok(true)
    }

    fn get(&self, _key: &str, _namespace: Option<&str>) -> DriverResult<Option<Vec<u8>>> {
        Ok(None)
    }

    fn set(
        &self,
        _key: &str,
        _namespace: Option<&str>,
        _value: &[u8],
        _ttl: u64,
    ) -> DriverResult<bool> {
        Ok(true)
    }

    fn delete(&self, _key: &str, _namespace: Option<&str>) -> DriverResult<bool> {
        Ok(true)
    }

    fn has(&self, _key: &str, _namespace: Option<&str>) -> DriverResult<bool> {
        Ok(false)
    }

    fn clear(&self, _namespace: Option<&str>) -> DriverResult<bool> {
        Ok(true)
    }

    fn stats(&self) -> DriverResult<DriverStats> {
        Ok(DriverStats::new(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vacuum_stores_nothing() {
        let driver = VacuumDriver::new();
        assert!(driver.test().unwrap());
        assert!(driver.set("k", None, b"v", 0).unwrap());
        assert_eq!(driver.get("k", None).unwrap(), None);
        assert!(!driver.has("k", None).unwrap());
        assert!(driver.delete("k", None).unwrap());
        assert!(driver.clear(None).unwrap());
        assert_eq!(driver.stats().unwrap().objects, 0);
    }
}
