//! Key-value persistence standing in for browser localStorage.
//! Each key maps to one JSON document; writers overwrite the whole value.

use irrigo_core::{IrrigationError, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Minimal string key-value store.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// File-based store: one `<key>.json` file per key.
pub struct FileKvStore {
    dir: PathBuf,
}

impl FileKvStore {
    /// Create a store rooted at `dir` (created if missing).
    pub fn new(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    fn file_for(&self, key: &str) -> Result<PathBuf> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(IrrigationError::InvalidInput(format!("invalid storage key '{key}'")));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }
}

impl KvStore for FileKvStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let file = self.file_for(key)?;
        if !file.exists() {
            return Ok(None);
        }
        Ok(Some(std::fs::read_to_string(&file)?))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let file = self.file_for(key)?;
        // Write then rename so a crash never leaves a half-written document.
        let tmp = file.with_extension("json.tmp");
        std::fs::write(&tmp, value)?;
        std::fs::rename(&tmp, &file)?;
        tracing::debug!("💾 Saved {} bytes to {}", value.len(), file.display());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let file = self.file_for(key)?;
        if file.exists() {
            std::fs::remove_file(&file)?;
        }
        Ok(())
    }
}

/// In-memory store, used by tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryKvStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.entries
            .lock()
            .map_err(|_| IrrigationError::Store("kv store lock poisoned".into()))
    }
}

impl KvStore for MemoryKvStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.lock()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.lock()?.remove(key);
        Ok(())
    }
}

/// Load a JSON list stored under `key`. Missing or corrupt data yields an
/// empty list; corruption is logged, never propagated.
pub fn load_list<T: serde::de::DeserializeOwned>(kv: &dyn KvStore, key: &str) -> Vec<T> {
    match kv.get(key) {
        Ok(Some(json)) => serde_json::from_str(&json).unwrap_or_else(|e| {
            tracing::warn!("⚠️ Failed to parse '{key}', starting empty: {e}");
            Vec::new()
        }),
        Ok(None) => Vec::new(),
        Err(e) => {
            tracing::warn!("⚠️ Failed to read '{key}': {e}");
            Vec::new()
        }
    }
}

/// Overwrite the JSON list stored under `key`.
pub fn save_list<T: serde::Serialize>(kv: &dyn KvStore, key: &str, items: &[T]) -> Result<()> {
    let json = serde_json::to_string(items)?;
    kv.set(key, &json)
}
