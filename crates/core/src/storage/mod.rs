//! Persistence for prompts and usage statistics
//!
//! Durability is delegated to a [`KeyValueStore`]: in the extension that is
//! `chrome.storage.local` behind a thin shim, on the desktop a JSON file, in
//! tests an in-memory map. [`PromptStore`] owns the record layout on top of it.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use once_cell::sync::Lazy;
use serde_json::{Map, Value};

use crate::errors::{DockError, Result};

pub mod prompts;

pub use prompts::{ImportOutcome, Prompt, PromptPatch, PromptStats, PromptStore, UsageStat};

/// Key holding the list of prompt records
pub const PROMPTS_KEY: &str = "contextDock.prompts";
/// Key holding the prompt id -> usage stat map
pub const PROMPT_STATS_KEY: &str = "contextDock.promptStats";
/// Key holding the id of the prompt injected most recently
pub const LAST_USED_PROMPT_KEY: &str = "contextDock.lastUsedPromptId";

/// Async key-value storage consumed by [`PromptStore`]
#[allow(async_fn_in_trait)]
pub trait KeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<Value>>;
    async fn set(&self, key: &str, value: Value) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<()>;
}

/// In-memory store, one per background context
#[derive(Debug, Default)]
pub struct MemoryStore {
    items:       RefCell<HashMap<String, Value>>,
    unavailable: Cell<bool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with a transport error, the way a
    /// revoked extension context reports `runtime.lastError`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.set(unavailable);
    }

    fn check(&self) -> Result<()> {
        if self.unavailable.get() {
            return Err(DockError::Transport(
                "storage.local is not available in this context.".into(),
            ));
        }
        Ok(())
    }
}

impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        self.check()?;
        Ok(self.items.borrow().get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.check()?;
        self.items.borrow_mut().insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.check()?;
        self.items.borrow_mut().remove(key);
        Ok(())
    }
}

/// One write lock per document path, shared by every store in the process
static FILE_LOCKS: Lazy<Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

fn file_lock(path: &Path) -> Arc<tokio::sync::Mutex<()>> {
    let mut locks = FILE_LOCKS.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    locks.entry(path.to_path_buf()).or_default().clone()
}

/// Store backed by a single JSON object on disk
///
/// The whole document is read on every access and rewritten on every
/// mutation; the data set is a few hundred prompts at most. Mutations of
/// one path are serialized across all stores opened on it.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let lock = file_lock(&path);
        Self { path, lock }
    }

    /// `<data dir>/context-dock/storage.json`
    pub fn default_path() -> Result<PathBuf> {
        let base = dirs::data_dir()
            .ok_or_else(|| DockError::Config("Could not determine data directory".into()))?;
        Ok(base.join("context-dock").join("storage.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Map<String, Value>> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => return Err(DockError::Transport(e.to_string())),
        };

        if raw.trim().is_empty() {
            return Ok(Map::new());
        }

        match serde_json::from_str::<Value>(&raw)? {
            Value::Object(map) => Ok(map),
            _ => Err(DockError::Transport(format!(
                "{} does not hold a JSON object",
                self.path.display()
            ))),
        }
    }

    async fn persist(&self, map: Map<String, Value>) -> Result<()> {
        let result: anyhow::Result<()> = async {
            if let Some(parent) = self.path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            let body = serde_json::to_string_pretty(&Value::Object(map))?;
            tokio::fs::write(&self.path, body)
                .await
                .with_context(|| format!("Failed to write {}", self.path.display()))?;
            Ok(())
        }
        .await;

        result.map_err(|e| DockError::Transport(format!("{:#}", e)))
    }
}

impl KeyValueStore for JsonFileStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.load().await?.remove(key))
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut map = self.load().await?;
        map.insert(key.to_string(), value);
        self.persist(map).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut map = self.load().await?;
        if map.remove(key).is_some() {
            self.persist(map).await?;
        }
        Ok(())
    }
}
