use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use crate::core::{CacheError, Result};
use crate::driver::{
    Driver, FilesystemConfig, FilesystemDriver, FilesystemStrategy, MemoryConfig, MemoryDriver,
    VacuumDriver,
};
use crate::manager::stack::MAX_WEIGHT;
use crate::manager::{Manager, ManagerConfig};
use crate::provider::{Provider, ProviderConfig};

/// Complete cache configuration: manager options plus a provider list
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub manager: ManagerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub providers: Vec<ProviderDecl>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
        }
    }
}

/// Backend kinds a provider can be declared with
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    Memory,
    Filesystem,
    Vacuum,
}

/// One declared provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderDecl {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: DriverKind,
    #[serde(default = "default_weight")]
    pub weight: u32,
    /// TTL in seconds for items saved without expiration (0 = forever)
    #[serde(default)]
    pub default_ttl: u64,

    // memory
    #[serde(default)]
    pub flat: bool,
    #[serde(default)]
    pub max_entries: Option<usize>,

    // filesystem
    #[serde(default)]
    pub directory: Option<PathBuf>,
    #[serde(default)]
    pub strategy: FilesystemStrategy,
}

fn default_weight() -> u32 {
    50
}

impl ProviderDecl {
    /// Construct the declared driver
    pub fn build_driver(&self) -> Result<Box<dyn Driver>> {
        Ok(match self.kind {
            DriverKind::Memory => Box::new(MemoryDriver::with_config(MemoryConfig {
                flat: self.flat,
                max_entries: self.max_entries,
            })),
            DriverKind::Filesystem => {
                let directory = self.directory.clone().ok_or_else(|| {
                    CacheError::Config(format!(
                        "filesystem provider {} needs a directory",
                        self.name
                    ))
                })?;
                Box::new(FilesystemDriver::new(FilesystemConfig {
                    directory,
                    strategy: self.strategy,
                })?)
            }
            DriverKind::Vacuum => Box::new(VacuumDriver::new()),
        })
    }

    pub fn build_provider(&self) -> Result<Provider> {
        Ok(Provider::with_config(
            self.name.clone(),
            self.build_driver()?,
            ProviderConfig {
                default_ttl: self.default_ttl,
            },
        ))
    }
}

impl CacheConfig {
    /// Load configuration from YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config = Self::from_yaml_str(&content)?;
        Ok(config)
    }

    /// Parse and validate a YAML document
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: CacheConfig = serde_yaml::from_str(content)
            .map_err(|e| CacheError::Config(format!("invalid YAML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.manager.flap_interval < 1 {
            return Err(CacheError::Config(
                "flap_interval must be at least 1 second".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for decl in &self.providers {
            if decl.name.is_empty() {
                return Err(CacheError::Config("provider without a name".to_string()));
            }
            if !names.insert(decl.name.as_str()) {
                return Err(CacheError::DuplicateProvider(decl.name.clone()));
            }
            if decl.weight > MAX_WEIGHT {
                return Err(CacheError::InvalidWeight {
                    id: decl.name.clone(),
                    weight: decl.weight,
                });
            }
        }
        Ok(())
    }

    /// Build every declared provider and register them, in order, with a fresh manager
    pub fn build_manager(&self) -> Result<Manager> {
        self.validate()?;
        let mut manager = Manager::new(self.manager.clone());

        for decl in &self.providers {
            let provider = decl.build_provider()?;
            info!(
                "Registering provider {} ({:?}, weight={})",
                decl.name, decl.kind, decl.weight
            );
            manager.add_provider(&decl.name, Arc::new(provider), decl.weight)?;
        }

        Ok(manager)
    }
}
