//! Persisted key-value state.
//!
//! Writes land in memory first. [`Store::set_and_save`] persists right away
//! or defers to the next [`Store::flush`], depending on the store's
//! [`SaveMode`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::StoreError;

/// Key: global index of the loaded tool, `-1` when none.
pub const CURRENT_INDEX: &str = "ace_current_index";
/// Key: [`crate::FilamentPosition`] of the loaded tool.
pub const FILAMENT_POS: &str = "ace_filament_pos";
pub const ENDLESS_SPOOL_ENABLED: &str = "ace_endless_spool_enabled";
pub const ENDLESS_SPOOL_MATCH_MODE: &str = "ace_endless_spool_match_mode";

/// Key holding the inventory of unit `unit`.
pub fn inventory_key(unit: usize) -> String {
    format!("ace_inventory_{unit}")
}

/// Key holding the feed-assist slot of unit `unit`, `-1` when off.
pub fn feed_assist_key(unit: usize) -> String {
    format!("ace_feed_assist_index_{unit}")
}

/// Persisted variables.
pub trait Store: Send + Sync {
    fn get(&self, name: &str) -> Option<Value>;

    /// Update in memory; persisted on the next flush.
    fn set(&self, name: &str, value: Value);

    /// Update and persist according to the store's save mode.
    fn set_and_save(&self, name: &str, value: Value) -> Result<(), StoreError>;

    fn flush(&self) -> Result<(), StoreError>;
}

/// Typed access on top of any [`Store`].
pub trait StoreExt: Store {
    /// Stored value, or `default` when missing or of the wrong shape.
    fn get_or<T: DeserializeOwned>(&self, name: &str, default: T) -> T {
        match self.get(name) {
            Some(value) => serde_json::from_value(value).unwrap_or_else(|err| {
                warn!(name, %err, "stored value has unexpected shape");
                default
            }),
            None => default,
        }
    }

    fn save<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> Result<(), StoreError> {
        self.set_and_save(name, serde_json::to_value(value)?)
    }
}

impl<S: Store + ?Sized> StoreExt for S {}

/// When `set_and_save` reaches disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SaveMode {
    #[default]
    Immediate,
    Deferred,
}

/// Volatile store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<BTreeMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, Value>> {
        self.values.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Store for MemoryStore {
    fn get(&self, name: &str) -> Option<Value> {
        self.lock().get(name).cloned()
    }

    fn set(&self, name: &str, value: Value) {
        self.lock().insert(name.to_string(), value);
    }

    fn set_and_save(&self, name: &str, value: Value) -> Result<(), StoreError> {
        self.set(name, value);
        Ok(())
    }

    fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

struct FileState {
    values: BTreeMap<String, Value>,
    dirty: bool,
}

/// Store backed by one JSON object on disk.
pub struct JsonFileStore {
    path: PathBuf,
    mode: SaveMode,
    state: Mutex<FileState>,
}

impl JsonFileStore {
    /// Open `path`, starting empty if it does not exist yet.
    pub fn open(path: impl AsRef<Path>, mode: SaveMode) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let values = match std::fs::read_to_string(&path) {
            Ok(text) if text.trim().is_empty() => BTreeMap::new(),
            Ok(text) => serde_json::from_str(&text)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        debug!(path = %path.display(), keys = values.len(), "store opened");
        Ok(Self {
            path,
            mode,
            state: Mutex::new(FileState {
                values,
                dirty: false,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, FileState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self, values: &BTreeMap<String, Value>) -> Result<(), StoreError> {
        let text = serde_json::to_string_pretty(values)?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, text).map_err(|source| StoreError::Io {
            path: tmp.clone(),
            source,
        })?;
        std::fs::rename(&tmp, &self.path).map_err(|source| StoreError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

impl Store for JsonFileStore {
    fn get(&self, name: &str) -> Option<Value> {
        self.lock().values.get(name).cloned()
    }

    fn set(&self, name: &str, value: Value) {
        let mut state = self.lock();
        state.values.insert(name.to_string(), value);
        state.dirty = true;
    }

    fn set_and_save(&self, name: &str, value: Value) -> Result<(), StoreError> {
        self.set(name, value);
        match self.mode {
            SaveMode::Immediate => self.flush(),
            SaveMode::Deferred => Ok(()),
        }
    }

    fn flush(&self) -> Result<(), StoreError> {
        let mut state = self.lock();
        if !state.dirty {
            return Ok(());
        }
        self.write(&state.values)?;
        state.dirty = false;
        Ok(())
    }
}
