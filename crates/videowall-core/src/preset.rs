//! Preset persistence contract.
//!
//! The topology keeps presets in memory; a [`PresetStore`] is where they
//! survive restarts. The encoding is up to the implementation.

use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::topology::{Preset, PresetId};

/// Failure to read or write saved presets.
#[derive(Debug, thiserror::Error)]
pub enum PresetStoreError {
    #[error("preset storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("preset document is malformed: {0}")]
    Format(#[from] serde_json::Error),
}

/// Loads and saves presets.
pub trait PresetStore: Send + Sync {
    /// All saved presets, keyed by id.
    fn load_all(&self) -> Result<BTreeMap<PresetId, Preset>, PresetStoreError>;

    /// Save a preset, replacing any with the same id.
    fn save(&self, preset: &Preset) -> Result<(), PresetStoreError>;

    /// Delete a preset. Returns whether it existed.
    fn remove(&self, id: &PresetId) -> Result<bool, PresetStoreError>;
}

/// Volatile store, used when persistence is disabled and in tests.
#[derive(Debug, Default)]
pub struct MemoryPresetStore {
    presets: Mutex<BTreeMap<PresetId, Preset>>,
}

impl MemoryPresetStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<PresetId, Preset>> {
        self.presets
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl PresetStore for MemoryPresetStore {
    fn load_all(&self) -> Result<BTreeMap<PresetId, Preset>, PresetStoreError> {
        Ok(self.lock().clone())
    }

    fn save(&self, preset: &Preset) -> Result<(), PresetStoreError> {
        self.lock().insert(preset.id.clone(), preset.clone());
        Ok(())
    }

    fn remove(&self, id: &PresetId) -> Result<bool, PresetStoreError> {
        Ok(self.lock().remove(id).is_some())
    }
}
