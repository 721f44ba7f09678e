//! Durable storage contract for throttle state

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use super::throttle::ThrottleState;
use crate::eval::error::ThrottleStoreError;

/// Load/save hook for persistent throttle state.
///
/// Only `once` and `once_per_interval` triggers are handed to the store.
/// Implementations replace the whole map on each save.
pub trait ThrottleStore: Send + Sync {
    fn load(&self) -> Result<HashMap<String, ThrottleState>, ThrottleStoreError>;

    fn save(&self, states: &HashMap<String, ThrottleState>) -> Result<(), ThrottleStoreError>;
}

/// Keeps state for the lifetime of the store value only
#[derive(Default)]
pub struct MemoryThrottleStore {
    states: Mutex<HashMap<String, ThrottleState>>,
}

impl MemoryThrottleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the last saved map
    pub fn snapshot(&self) -> HashMap<String, ThrottleState> {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ThrottleStore for MemoryThrottleStore {
    fn load(&self) -> Result<HashMap<String, ThrottleState>, ThrottleStoreError> {
        Ok(self.snapshot())
    }

    fn save(&self, states: &HashMap<String, ThrottleState>) -> Result<(), ThrottleStoreError> {
        *self.states.lock().unwrap_or_else(PoisonError::into_inner) = states.clone();
        Ok(())
    }
}

/// Stores state as a JSON object in a single file.
///
/// Writes go to a sibling temp file first and are renamed into place.
pub struct JsonFileThrottleStore {
    path: PathBuf,
}

impl JsonFileThrottleStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ThrottleStore for JsonFileThrottleStore {
    fn load(&self) -> Result<HashMap<String, ThrottleState>, ThrottleStoreError> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }
        let content = fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&content)?)
    }

    fn save(&self, states: &HashMap<String, ThrottleState>) -> Result<(), ThrottleStoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(states)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
