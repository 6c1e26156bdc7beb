//! Presets persisted as one JSON document keyed by preset id.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use videowall_core::preset::{PresetStore, PresetStoreError};
use videowall_core::topology::{Preset, PresetId};

#[derive(Debug, Default, Serialize, Deserialize)]
struct PresetDocument {
    #[serde(default)]
    presets: BTreeMap<PresetId, Preset>,
}

/// A [`PresetStore`] backed by a JSON file.
///
/// Every write rewrites the whole document through a temp file and a
/// rename, so a crash never leaves a half-written file behind.
#[derive(Debug)]
pub struct JsonPresetFile {
    path: PathBuf,
    /// Serializes read-modify-write cycles within this process.
    write_lock: Mutex<()>,
}

impl JsonPresetFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<PresetDocument, PresetStoreError> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) if content.trim().is_empty() => Ok(PresetDocument::default()),
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(PresetDocument::default()),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, document: &PresetDocument) -> Result<(), PresetStoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(document)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn update<T>(
        &self,
        change: impl FnOnce(&mut PresetDocument) -> T,
    ) -> Result<T, PresetStoreError> {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut document = self.read()?;
        let result = change(&mut document);
        self.write(&document)?;
        Ok(result)
    }
}

impl PresetStore for JsonPresetFile {
    fn load_all(&self) -> Result<BTreeMap<PresetId, Preset>, PresetStoreError> {
        Ok(self.read()?.presets)
    }

    fn save(&self, preset: &Preset) -> Result<(), PresetStoreError> {
        self.update(|doc| {
            doc.presets.insert(preset.id.clone(), preset.clone());
        })
    }

    fn remove(&self, id: &PresetId) -> Result<bool, PresetStoreError> {
        self.update(|doc| doc.presets.remove(id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use videowall_core::topology::{DecoderId, EncoderId, TopologyStore};

    fn temp_path() -> PathBuf {
        std::env::temp_dir()
            .join(format!("videowall-presets-{}", uuid::Uuid::new_v4()))
            .join("presets.json")
    }

    #[test]
    fn test_missing_file_is_empty() {
        let store = JsonPresetFile::new(temp_path());
        assert!(store.load_all().unwrap().is_empty());
    }

    #[test]
    fn test_save_survives_reopen() {
        let path = temp_path();
        let mut preset = TopologyStore::new().snapshot(PresetId::from("morning"), "Morning");
        preset
            .mappings
            .insert(DecoderId::from("dec_01"), EncoderId::from("enc_04"));

        JsonPresetFile::new(&path).save(&preset).unwrap();

        let reopened = JsonPresetFile::new(&path);
        let all = reopened.load_all().unwrap();
        assert_eq!(all.get(&PresetId::from("morning")), Some(&preset));

        let json = std::fs::read_to_string(&path).unwrap();
        assert!(json.contains("\"morning\""));

        assert!(reopened.remove(&PresetId::from("morning")).unwrap());
        assert!(!reopened.remove(&PresetId::from("morning")).unwrap());
        assert!(JsonPresetFile::new(&path).load_all().unwrap().is_empty());

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_malformed_document_is_reported() {
        let path = temp_path();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{not json").unwrap();

        let err = JsonPresetFile::new(&path).load_all().unwrap_err();
        assert!(matches!(err, PresetStoreError::Format(_)));

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }
}
