//! Persisted key/value blob store.
//!
//! The backend contract is get/set/delete over opaque JSON values; the
//! provided implementation keeps everything in one JSON object file with
//! atomic writes (temp file + rename).

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use relayhub_core::prelude::*;
use serde_json::{Map, Value};

/// Blob store seam consumed by [`crate::settings::SettingsStore`] and the
/// supervisor (install id, reset path).
pub trait Storage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>>;
    fn set(&self, key: &str, value: &Value) -> Result<()>;
    fn delete(&self, key: &str) -> Result<()>;
}

/// Single-file JSON object storage.
///
/// The file is loaded once and cached; every mutation persists
/// synchronously before returning so a crash immediately after a `set`
/// still has the value on disk.
pub struct JsonFileStorage {
    path: PathBuf,
    cache: Mutex<Option<Map<String, Value>>>,
}

impl JsonFileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Startup check: an existing but unreadable/corrupt file is fatal and
    /// routes to the reset-and-restart path.
    pub fn validate(&self) -> Result<()> {
        if !self.path.exists() {
            return Ok(());
        }
        let content = fs::read_to_string(&self.path)?;
        serde_json::from_str::<Map<String, Value>>(&content)
            .map(|_| ())
            .map_err(|_| Error::storage_corrupt(&self.path))
    }

    /// Remove the blob entirely; the next load starts empty.
    pub fn reset(&self) -> Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        *self.cache.lock().expect("storage cache poisoned") = None;
        warn!("Storage reset: {}", self.path.display());
        Ok(())
    }

    fn load(&self) -> Result<Map<String, Value>> {
        if !self.path.exists() {
            return Ok(Map::new());
        }
        let content = fs::read_to_string(&self.path)?;
        serde_json::from_str(&content).map_err(|_| Error::storage_corrupt(&self.path))
    }

    fn persist(&self, map: &Map<String, Value>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let temp = self.path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(&Value::Object(map.clone()))?;
        fs::write(&temp, content)?;
        fs::rename(&temp, &self.path)?;
        Ok(())
    }

    fn loaded<'a>(&self, cache: &'a mut Option<Map<String, Value>>) -> Result<&'a mut Map<String, Value>> {
        if cache.is_none() {
            *cache = Some(self.load()?);
        }
        Ok(cache.as_mut().expect("cache just filled"))
    }
}

impl Storage for JsonFileStorage {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        let mut cache = self.cache.lock().expect("storage cache poisoned");
        let map = self.loaded(&mut cache)?;
        Ok(map.get(key).cloned())
    }

    // Mutation and persist happen under one lock acquisition so the file
    // always reflects a complete operation; errors propagate to the
    // caller, never swallowed.
    fn set(&self, key: &str, value: &Value) -> Result<()> {
        let mut cache = self.cache.lock().expect("storage cache poisoned");
        let map = self.loaded(&mut cache)?;
        map.insert(key.to_string(), value.clone());
        self.persist(map)
    }

    fn delete(&self, key: &str) -> Result<()> {
        let mut cache = self.cache.lock().expect("storage cache poisoned");
        let map = self.loaded(&mut cache)?;
        if map.remove(key).is_some() {
            self.persist(map)?;
        }
        Ok(())
    }
}
