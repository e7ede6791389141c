//! Runtime configuration passed in by the extension shell

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{DockError, Result};
use crate::locator::DEFAULT_LOCATE_TIMEOUT;
use crate::sites::{SiteProfile, SiteRegistry};
use crate::storage::JsonFileStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LogConfig {
    /// `EnvFilter` directive used when `CONTEXT_DOCK_LOG` is unset
    pub level: String,
    /// One JSON object per line instead of compact text
    pub json:  bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            level: "info".to_string(),
            json:  false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DockConfig {
    pub locate_timeout_ms: u64,
    /// Extra sites registered on top of the built-in ones
    pub sites:             BTreeMap<String, SiteProfile>,
    /// Prompt storage document for hosts without `storage.local`
    pub storage_path:      Option<PathBuf>,
    pub log:               LogConfig,
}

impl Default for DockConfig {
    fn default() -> Self {
        DockConfig {
            locate_timeout_ms: DEFAULT_LOCATE_TIMEOUT.as_millis() as u64,
            sites:             BTreeMap::new(),
            storage_path:      None,
            log:               LogConfig::default(),
        }
    }
}

impl DockConfig {
    pub fn from_value(value: Value) -> Result<Self> {
        if value.is_null() {
            return Ok(Self::default());
        }
        let config: DockConfig =
            serde_json::from_value(value).map_err(|e| DockError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let value: Value =
            serde_json::from_str(raw).map_err(|e| DockError::Config(e.to_string()))?;
        Self::from_value(value)
    }

    fn validate(&self) -> Result<()> {
        if self.locate_timeout_ms == 0 {
            return Err(DockError::Config("locateTimeoutMs must be greater than 0".into()));
        }
        if let Some(domain) = self.sites.keys().find(|d| d.trim().is_empty()) {
            return Err(DockError::Config(format!("Invalid site domain: {:?}", domain)));
        }
        Ok(())
    }

    pub fn locate_timeout(&self) -> Duration {
        Duration::from_millis(self.locate_timeout_ms)
    }

    /// Built-in sites plus the configured ones
    pub fn build_registry(&self) -> Result<SiteRegistry> {
        let mut registry = SiteRegistry::with_defaults();
        for (domain, profile) in &self.sites {
            registry.register(domain, profile.clone())?;
        }
        Ok(registry)
    }

    /// File-backed store at `storagePath`, else at the per-user default
    pub fn open_store(&self) -> Result<JsonFileStore> {
        let path = match &self.storage_path {
            Some(path) => path.clone(),
            None => JsonFileStore::default_path()?,
        };
        Ok(JsonFileStore::new(path))
    }
}
