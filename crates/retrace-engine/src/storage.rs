//! Key-value persistence collaborator for recorder state.

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store is unavailable: {0}")]
    Unavailable(String),
}

/// Opaque durable map. `get` returns `None` for absent keys.
pub trait KeyValueStore: Send {
    fn get(&self, key: &str) -> Result<Option<Value>, StorageError>;
    fn set(&mut self, key: &str, value: Value) -> Result<(), StorageError>;
}

/// Process-local store. Clones share the same map, which lets a test inspect
/// what a recorder wrote.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<HashMap<String, Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        let map = self
            .inner
            .lock()
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        Ok(map.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: Value) -> Result<(), StorageError> {
        let mut map = self
            .inner
            .lock()
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        map.insert(key.to_string(), value);
        Ok(())
    }
}

/// JSON object on disk, one entry per key.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<Map<String, Value>, StorageError> {
        if !self.path.exists() {
            return Ok(Map::new());
        }
        let content = std::fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(Map::new());
        }
        Ok(serde_json::from_str(&content)?)
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        Ok(self.read_all()?.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: Value) -> Result<(), StorageError> {
        let mut map = self.read_all()?;
        map.insert(key.to_string(), value);

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        // Write next to the target, then rename over it.
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(&Value::Object(map))?)?;
        std::fs::rename(&tmp, &self.path)?;
        debug!("Persisted key {} to {}", key, self.path.display());
        Ok(())
    }
}

impl<S: KeyValueStore + ?Sized> KeyValueStore for Box<S> {
    fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        (**self).get(key)
    }

    fn set(&mut self, key: &str, value: Value) -> Result<(), StorageError> {
        (**self).set(key, value)
    }
}
