//! Wall topology: encoders, decoders, matrix groups and presets.
//!
//! The store is plain data. It never talks to the network; operations that
//! change what a decoder should be showing return (or let the caller derive)
//! the [`DeviceIntent`]s needed to make the hardware follow.
//!
//! Decoders refer to their source by [`EncoderId`] only. Resolving that id is
//! a lookup against the store, so removing an encoder leaves a stale id
//! behind rather than a dangling pointer, and the stale id simply resolves to
//! nothing.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::Ipv4Addr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::WallError;
use crate::geometry::{self, CropRegion};
use crate::intent::{DeviceEndpoint, DeviceIntent, SourceEndpoint};

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

id_type!(
    /// Identity of a video source.
    EncoderId
);
id_type!(
    /// Identity of a display decoder.
    DecoderId
);
id_type!(
    /// Identity of a matrix group.
    MatrixId
);
id_type!(
    /// Identity of a saved preset.
    PresetId
);

/// Last known reachability of a device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    Online,
    #[default]
    Offline,
}

impl std::fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceStatus::Online => write!(f, "online"),
            DeviceStatus::Offline => write!(f, "offline"),
        }
    }
}

/// A video source endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Encoder {
    pub id: EncoderId,
    pub name: String,
    pub address: Ipv4Addr,
    /// Control ports, probed in order for liveness.
    pub ports: Vec<u16>,
    pub rtsp_port: u16,
    pub stream_path: String,
    pub width: i32,
    pub height: i32,
    pub status: DeviceStatus,
}

impl Encoder {
    pub fn source_endpoint(&self) -> SourceEndpoint {
        SourceEndpoint {
            address: self.address,
            rtsp_port: self.rtsp_port,
            stream_path: self.stream_path.clone(),
        }
    }
}

/// Row/column of a decoder on the physical wall.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GridPosition {
    pub row: u32,
    pub col: u32,
}

/// A display endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decoder {
    pub id: DecoderId,
    pub name: String,
    pub endpoint: DeviceEndpoint,
    pub position: GridPosition,
    pub current_source: Option<EncoderId>,
    pub crop: Option<CropRegion>,
    pub status: DeviceStatus,
}

impl Decoder {
    /// The crop the decoder should apply, if any.
    pub fn active_crop(&self) -> Option<&CropRegion> {
        self.crop.as_ref().filter(|c| c.is_active())
    }
}

/// How decoders are laid out and addressed on the wall.
///
/// Decoder `i` (row-major, zero-based) gets id `dec_{i+1:02}`, name
/// `M{i+1:02}` and address `base_address + i`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridLayout {
    pub rows: u32,
    pub cols: u32,
    #[serde(alias = "decoder_base_address")]
    pub base_address: Ipv4Addr,
    pub control_port: u16,
    pub http_port: u16,
    pub terminal_port: u16,
}

impl Default for GridLayout {
    fn default() -> Self {
        Self {
            rows: 4,
            cols: 14,
            base_address: Ipv4Addr::new(172, 16, 207, 11),
            control_port: 48686,
            http_port: 8001,
            terminal_port: 23,
        }
    }
}

impl GridLayout {
    /// Build the decoders for every grid cell, row-major.
    ///
    /// Fails when the grid is empty or runs past the end of the IPv4 space.
    pub fn decoders(&self) -> Result<Vec<Decoder>, String> {
        if self.rows == 0 || self.cols == 0 {
            return Err(format!("grid {}x{} must not be empty", self.rows, self.cols));
        }
        let base = u32::from(self.base_address);
        let count = self.rows.checked_mul(self.cols).ok_or("grid is too large")?;
        if base.checked_add(count - 1).is_none() {
            return Err(format!(
                "{} decoders starting at {} overflow the IPv4 space",
                count, self.base_address
            ));
        }

        let mut decoders = Vec::with_capacity(count as usize);
        for row in 0..self.rows {
            for col in 0..self.cols {
                let index = row * self.cols + col;
                decoders.push(Decoder {
                    id: DecoderId(format!("dec_{:02}", index + 1)),
                    name: format!("M{:02}", index + 1),
                    endpoint: DeviceEndpoint {
                        address: Ipv4Addr::from(base + index),
                        control_port: self.control_port,
                        http_port: self.http_port,
                        terminal_port: self.terminal_port,
                    },
                    position: GridPosition { row, col },
                    current_source: None,
                    crop: None,
                    status: DeviceStatus::Offline,
                });
            }
        }
        Ok(decoders)
    }
}

/// A rectangular group of decoders tiling one source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixGroup {
    pub id: MatrixId,
    pub name: String,
    /// Member decoders in row-major grid order.
    pub decoders: Vec<DecoderId>,
    pub rows: u32,
    pub cols: u32,
    pub source: EncoderId,
    pub auto_crop: bool,
}

/// A restorable snapshot of decoder sources and crops.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preset {
    pub id: PresetId,
    pub name: String,
    pub timestamp: DateTime<Utc>,
    pub mappings: BTreeMap<DecoderId, EncoderId>,
    #[serde(default)]
    pub crops: BTreeMap<DecoderId, CropRegion>,
}

/// What a restore actually applied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreSummary {
    /// Decoders that received a source or crop, in grid order.
    pub applied: Vec<DecoderId>,
    /// Preset entries that no longer match the wall, with the reason.
    pub skipped: Vec<String>,
}

/// In-memory registry of the wall's entities.
#[derive(Debug, Default)]
pub struct TopologyStore {
    encoders: HashMap<EncoderId, Encoder>,
    decoders: HashMap<DecoderId, Decoder>,
    matrices: HashMap<MatrixId, MatrixGroup>,
    presets: HashMap<PresetId, Preset>,
    next_matrix: u64,
}

impl TopologyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store from static configuration.
    pub fn with_devices(
        encoders: impl IntoIterator<Item = Encoder>,
        decoders: impl IntoIterator<Item = Decoder>,
    ) -> Self {
        let mut store = Self::new();
        for encoder in encoders {
            store.encoders.insert(encoder.id.clone(), encoder);
        }
        for decoder in decoders {
            store.decoders.insert(decoder.id.clone(), decoder);
        }
        store
    }

    pub fn insert_encoder(&mut self, encoder: Encoder) -> Option<Encoder> {
        self.encoders.insert(encoder.id.clone(), encoder)
    }

    /// Remove an encoder. Decoders still naming it keep the id, which then
    /// resolves to nothing.
    pub fn remove_encoder(&mut self, id: &EncoderId) -> Option<Encoder> {
        self.encoders.remove(id)
    }

    pub fn encoder(&self, id: &EncoderId) -> Option<&Encoder> {
        self.encoders.get(id)
    }

    pub fn decoder(&self, id: &DecoderId) -> Option<&Decoder> {
        self.decoders.get(id)
    }

    /// Encoders sorted by id.
    pub fn encoders(&self) -> Vec<&Encoder> {
        let mut list: Vec<_> = self.encoders.values().collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        list
    }

    /// Decoders sorted by grid position.
    pub fn decoders(&self) -> Vec<&Decoder> {
        let mut list: Vec<_> = self.decoders.values().collect();
        list.sort_by_key(|d| (d.position, d.id.clone()));
        list
    }

    pub fn matrices(&self) -> Vec<&MatrixGroup> {
        let mut list: Vec<_> = self.matrices.values().collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        list
    }

    /// The encoder a decoder is showing, if it still exists.
    pub fn source_of(&self, decoder_id: &DecoderId) -> Option<&Encoder> {
        self.decoders
            .get(decoder_id)?
            .current_source
            .as_ref()
            .and_then(|id| self.encoders.get(id))
    }

    fn decoder_mut(&mut self, id: &DecoderId) -> Result<&mut Decoder, WallError> {
        self.decoders
            .get_mut(id)
            .ok_or_else(|| WallError::UnknownDecoder(id.0.clone()))
    }

    /// Point a decoder at a source (or at nothing). Returns the previous source.
    pub fn assign(
        &mut self,
        decoder_id: &DecoderId,
        encoder_id: Option<&EncoderId>,
    ) -> Result<Option<EncoderId>, WallError> {
        if let Some(id) = encoder_id {
            if !self.encoders.contains_key(id) {
                return Err(WallError::UnknownEncoder(id.0.clone()));
            }
        }
        let decoder = self.decoder_mut(decoder_id)?;
        Ok(std::mem::replace(
            &mut decoder.current_source,
            encoder_id.cloned(),
        ))
    }

    /// Store a crop for a decoder. Regions are validated against the frame
    /// they were computed for. Returns the previous crop.
    pub fn set_crop(
        &mut self,
        decoder_id: &DecoderId,
        region: Option<CropRegion>,
    ) -> Result<Option<CropRegion>, WallError> {
        if let Some(region) = &region {
            region.validate()?;
        }
        let decoder = self.decoder_mut(decoder_id)?;
        Ok(std::mem::replace(&mut decoder.crop, region))
    }

    /// Check that a selection names at least one decoder, each known and
    /// listed once.
    pub fn check_selection(&self, decoder_ids: &[DecoderId]) -> Result<(), WallError> {
        if decoder_ids.is_empty() {
            return Err(WallError::EmptySelection);
        }
        let mut seen = HashSet::with_capacity(decoder_ids.len());
        for id in decoder_ids {
            if !self.decoders.contains_key(id) {
                return Err(WallError::UnknownDecoder(id.0.clone()));
            }
            if !seen.insert(id) {
                return Err(WallError::DuplicateDecoder(id.0.clone()));
            }
        }
        Ok(())
    }

    /// Point every selected decoder at one source. Nothing changes unless the
    /// whole selection is valid.
    pub fn assign_all(&mut self, decoder_ids: &[DecoderId], encoder_id: &EncoderId) -> Result<(), WallError> {
        self.check_selection(decoder_ids)?;
        if !self.encoders.contains_key(encoder_id) {
            return Err(WallError::UnknownEncoder(encoder_id.0.clone()));
        }
        for id in decoder_ids {
            self.decoder_mut(id)?.current_source = Some(encoder_id.clone());
        }
        Ok(())
    }

    /// The one encoder every selected decoder is showing.
    pub fn shared_source(&self, decoder_ids: &[DecoderId]) -> Result<&Encoder, WallError> {
        self.check_selection(decoder_ids)?;
        let mut shared: Option<&Encoder> = None;
        for id in decoder_ids {
            let source = self
                .source_of(id)
                .ok_or_else(|| WallError::NoSource(id.0.clone()))?;
            match shared {
                Some(first) if first.id != source.id => {
                    return Err(WallError::MixedSources {
                        first: first.id.0.clone(),
                        second: source.id.0.clone(),
                    })
                }
                _ => shared = Some(source),
            }
        }
        shared.ok_or(WallError::EmptySelection)
    }

    /// Store one crop on every selected decoder. The decoders must share a
    /// source and the region must be valid before anything changes.
    pub fn set_crop_all(&mut self, decoder_ids: &[DecoderId], region: CropRegion) -> Result<(), WallError> {
        self.shared_source(decoder_ids)?;
        region.validate()?;
        for id in decoder_ids {
            self.decoder_mut(id)?.crop = Some(region);
        }
        Ok(())
    }

    /// Clear every decoder and drop all matrix groups. Returns the decoders
    /// that had a source or a crop, in grid order.
    pub fn clear_all(&mut self) -> Vec<DecoderId> {
        let cleared: Vec<DecoderId> = self
            .decoders()
            .into_iter()
            .filter(|d| d.current_source.is_some() || d.crop.is_some())
            .map(|d| d.id.clone())
            .collect();
        for id in &cleared {
            if let Some(decoder) = self.decoders.get_mut(id) {
                decoder.current_source = None;
                decoder.crop = None;
            }
        }
        self.matrices.clear();
        cleared
    }

    /// Drop both the source and the crop of a decoder.
    pub fn clear(&mut self, decoder_id: &DecoderId) -> Result<(), WallError> {
        let decoder = self.decoder_mut(decoder_id)?;
        decoder.current_source = None;
        decoder.crop = None;
        Ok(())
    }

    pub fn set_encoder_status(&mut self, id: &EncoderId, status: DeviceStatus) -> Option<DeviceStatus> {
        self.encoders
            .get_mut(id)
            .map(|e| std::mem::replace(&mut e.status, status))
    }

    pub fn set_decoder_status(&mut self, id: &DecoderId, status: DeviceStatus) -> Option<DeviceStatus> {
        self.decoders
            .get_mut(id)
            .map(|d| std::mem::replace(&mut d.status, status))
    }

    /// Intents that make the hardware match the stored state of a decoder:
    /// a switch when its source resolves, then a crop when one is active.
    pub fn sync_intents(&self, decoder_id: &DecoderId) -> Result<Vec<DeviceIntent>, WallError> {
        let decoder = self
            .decoders
            .get(decoder_id)
            .ok_or_else(|| WallError::UnknownDecoder(decoder_id.0.clone()))?;

        let mut intents = Vec::with_capacity(2);
        if let Some(encoder) = self.source_of(decoder_id) {
            intents.push(DeviceIntent::Switch {
                target: decoder.endpoint,
                source: encoder.source_endpoint(),
            });
        }
        if let Some(region) = decoder.active_crop() {
            intents.push(DeviceIntent::SetCrop {
                target: decoder.endpoint,
                region: *region,
            });
        }
        Ok(intents)
    }

    /// The intent that pushes a decoder's current crop state to the device.
    pub fn crop_intent(&self, decoder_id: &DecoderId) -> Result<DeviceIntent, WallError> {
        let decoder = self
            .decoders
            .get(decoder_id)
            .ok_or_else(|| WallError::UnknownDecoder(decoder_id.0.clone()))?;
        Ok(match decoder.active_crop() {
            Some(region) => DeviceIntent::SetCrop {
                target: decoder.endpoint,
                region: *region,
            },
            None => DeviceIntent::ClearCrop {
                target: decoder.endpoint,
            },
        })
    }

    /// Group decoders into a `rows`x`cols` matrix showing one source.
    ///
    /// Decoders are ordered by grid position, not by the order given, so tile
    /// `(r, c)` lands on the decoder nearest that spot. With `auto_crop` each
    /// decoder gets its tile as crop; otherwise crops are left alone. Any
    /// existing matrix sharing a decoder with the new one is dropped.
    pub fn build_matrix(
        &mut self,
        decoder_ids: &[DecoderId],
        rows: u32,
        cols: u32,
        source_id: &EncoderId,
        auto_crop: bool,
    ) -> Result<MatrixGroup, WallError> {
        let expected = rows as usize * cols as usize;
        if decoder_ids.len() != expected || expected == 0 {
            return Err(WallError::ShapeMismatch {
                rows,
                cols,
                expected,
                actual: decoder_ids.len(),
            });
        }

        let mut seen = HashSet::with_capacity(decoder_ids.len());
        for id in decoder_ids {
            if !seen.insert(id) {
                return Err(WallError::DuplicateDecoder(id.0.clone()));
            }
        }

        let encoder = self
            .encoders
            .get(source_id)
            .ok_or_else(|| WallError::UnknownEncoder(source_id.0.clone()))?;

        let mut members = Vec::with_capacity(decoder_ids.len());
        for id in decoder_ids {
            let decoder = self
                .decoders
                .get(id)
                .ok_or_else(|| WallError::UnknownDecoder(id.0.clone()))?;
            members.push((decoder.position, id.clone()));
        }
        members.sort();

        // Tile before mutating so a bad frame leaves the store untouched.
        let tiles = if auto_crop {
            Some(geometry::tile(encoder.width, encoder.height, rows, cols)?)
        } else {
            None
        };

        for (index, (_, id)) in members.iter().enumerate() {
            let decoder = self.decoder_mut(id)?;
            decoder.current_source = Some(source_id.clone());
            if let Some(tiles) = &tiles {
                decoder.crop = Some(tiles[index].region);
            }
        }

        let ordered: Vec<DecoderId> = members.into_iter().map(|(_, id)| id).collect();
        self.matrices
            .retain(|_, group| !group.decoders.iter().any(|d| seen.contains(d)));

        self.next_matrix += 1;
        let group = MatrixGroup {
            id: MatrixId(format!("matrix_{}", self.next_matrix)),
            name: format!("{}x{} {}", rows, cols, source_id),
            decoders: ordered,
            rows,
            cols,
            source: source_id.clone(),
            auto_crop,
        };
        self.matrices.insert(group.id.clone(), group.clone());
        Ok(group)
    }

    /// Capture every decoder's non-empty source and crop.
    pub fn snapshot(&self, id: PresetId, name: impl Into<String>) -> Preset {
        let mut mappings = BTreeMap::new();
        let mut crops = BTreeMap::new();
        for decoder in self.decoders.values() {
            if let Some(source) = &decoder.current_source {
                mappings.insert(decoder.id.clone(), source.clone());
            }
            if let Some(crop) = &decoder.crop {
                crops.insert(decoder.id.clone(), *crop);
            }
        }
        Preset {
            id,
            name: name.into(),
            timestamp: Utc::now(),
            mappings,
            crops,
        }
    }

    /// Clear every decoder, then reapply exactly what the preset holds.
    ///
    /// Decoders absent from the preset end up with no source and no crop.
    /// Entries naming unknown decoders or encoders, or invalid crops, are
    /// skipped. Matrix groups do not survive a restore.
    pub fn restore(&mut self, preset: &Preset) -> RestoreSummary {
        for decoder in self.decoders.values_mut() {
            decoder.current_source = None;
            decoder.crop = None;
        }
        self.matrices.clear();

        let mut summary = RestoreSummary::default();
        let mut applied = HashSet::new();

        for (decoder_id, encoder_id) in &preset.mappings {
            match self.assign(decoder_id, Some(encoder_id)) {
                Ok(_) => {
                    applied.insert(decoder_id.clone());
                }
                Err(e) => summary.skipped.push(e.to_string()),
            }
        }
        for (decoder_id, crop) in &preset.crops {
            // A crop is only meaningful over a source.
            if self.decoders.contains_key(decoder_id) && !applied.contains(decoder_id) {
                summary
                    .skipped
                    .push(format!("{}: crop dropped, no source restored", decoder_id));
                continue;
            }
            match self.set_crop(decoder_id, Some(*crop)) {
                Ok(_) => {
                    applied.insert(decoder_id.clone());
                }
                Err(e) => summary.skipped.push(format!("{}: {}", decoder_id, e)),
            }
        }

        let mut ordered: Vec<_> = applied
            .into_iter()
            .filter_map(|id| self.decoders.get(&id).map(|d| (d.position, id)))
            .collect();
        ordered.sort();
        summary.applied = ordered.into_iter().map(|(_, id)| id).collect();
        summary
    }

    /// Save a preset, replacing any preset with the same id.
    pub fn save_preset(&mut self, preset: Preset) -> Option<Preset> {
        self.presets.insert(preset.id.clone(), preset)
    }

    pub fn preset(&self, id: &PresetId) -> Option<&Preset> {
        self.presets.get(id)
    }

    pub fn remove_preset(&mut self, id: &PresetId) -> Option<Preset> {
        self.presets.remove(id)
    }

    /// Presets sorted by id.
    pub fn presets(&self) -> Vec<&Preset> {
        let mut list: Vec<_> = self.presets.values().collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        list
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoder(id: &str, last_octet: u8) -> Encoder {
        Encoder {
            id: EncoderId::from(id),
            name: id.to_uppercase(),
            address: Ipv4Addr::new(172, 16, 207, last_octet),
            ports: vec![48686, 8001, 23],
            rtsp_port: 551,
            stream_path: "2160".into(),
            width: 1920,
            height: 1080,
            status: DeviceStatus::Offline,
        }
    }

    fn store_2x3() -> TopologyStore {
        let layout = GridLayout {
            rows: 2,
            cols: 3,
            ..GridLayout::default()
        };
        TopologyStore::with_devices(
            [encoder("enc_01", 75), encoder("enc_02", 76)],
            layout.decoders().unwrap(),
        )
    }

    fn id(s: &str) -> DecoderId {
        DecoderId::from(s)
    }

    #[test]
    fn test_grid_layout_is_row_major() {
        let layout = GridLayout {
            rows: 2,
            cols: 3,
            ..GridLayout::default()
        };
        let decoders = layout.decoders().unwrap();
        assert_eq!(decoders.len(), 6);
        assert_eq!(decoders[0].id, id("dec_01"));
        assert_eq!(decoders[0].endpoint.address, Ipv4Addr::new(172, 16, 207, 11));
        assert_eq!(decoders[4].id, id("dec_05"));
        assert_eq!(decoders[4].name, "M05");
        assert_eq!(decoders[4].position, GridPosition { row: 1, col: 1 });
        assert_eq!(decoders[4].endpoint.address, Ipv4Addr::new(172, 16, 207, 15));
    }

    #[test]
    fn test_grid_layout_rejects_overflow() {
        let layout = GridLayout {
            rows: 1,
            cols: 3,
            base_address: Ipv4Addr::new(255, 255, 255, 254),
            ..GridLayout::default()
        };
        assert!(layout.decoders().is_err());
        let empty = GridLayout {
            rows: 0,
            ..GridLayout::default()
        };
        assert!(empty.decoders().is_err());
    }

    #[test]
    fn test_assign_returns_previous_source() {
        let mut store = store_2x3();
        let enc1 = EncoderId::from("enc_01");
        let enc2 = EncoderId::from("enc_02");

        assert_eq!(store.assign(&id("dec_01"), Some(&enc1)).unwrap(), None);
        assert_eq!(
            store.assign(&id("dec_01"), Some(&enc2)).unwrap(),
            Some(enc1.clone())
        );
        assert_eq!(store.assign(&id("dec_01"), None).unwrap(), Some(enc2));
        assert_eq!(store.decoder(&id("dec_01")).unwrap().current_source, None);
    }

    #[test]
    fn test_assign_rejects_unknown_ids() {
        let mut store = store_2x3();
        assert_eq!(
            store.assign(&id("dec_99"), None),
            Err(WallError::UnknownDecoder("dec_99".into()))
        );
        assert_eq!(
            store.assign(&id("dec_01"), Some(&EncoderId::from("nope"))),
            Err(WallError::UnknownEncoder("nope".into()))
        );
    }

    #[test]
    fn test_set_crop_validates_region() {
        let mut store = store_2x3();
        let bad = CropRegion::new(1000, 0, 1000, 100, 1920, 1080);
        assert!(matches!(
            store.set_crop(&id("dec_02"), Some(bad)),
            Err(WallError::InvalidRegion(_))
        ));
        assert_eq!(store.decoder(&id("dec_02")).unwrap().crop, None);

        let good = CropRegion::new(0, 0, 960, 540, 1920, 1080);
        store.set_crop(&id("dec_02"), Some(good)).unwrap();
        assert_eq!(store.decoder(&id("dec_02")).unwrap().crop, Some(good));
        assert_eq!(store.set_crop(&id("dec_02"), None).unwrap(), Some(good));
    }

    #[test]
    fn test_build_matrix_shape_mismatch_leaves_store_untouched() {
        let mut store = store_2x3();
        let result = store.build_matrix(
            &[id("dec_01"), id("dec_02"), id("dec_04")],
            2,
            2,
            &EncoderId::from("enc_01"),
            true,
        );
        assert_eq!(
            result,
            Err(WallError::ShapeMismatch {
                rows: 2,
                cols: 2,
                expected: 4,
                actual: 3
            })
        );
        assert!(store.matrices().is_empty());
        assert!(store.decoders().iter().all(|d| d.crop.is_none() && d.current_source.is_none()));
    }

    #[test]
    fn test_build_matrix_orders_by_grid_position() {
        let mut store = store_2x3();
        // Positions: dec_01 (0,0), dec_02 (0,1), dec_04 (1,0), dec_05 (1,1),
        // selected in scrambled click order.
        let selection = [id("dec_05"), id("dec_01"), id("dec_04"), id("dec_02")];
        let group = store
            .build_matrix(&selection, 2, 2, &EncoderId::from("enc_01"), true)
            .unwrap();

        assert_eq!(
            group.decoders,
            vec![id("dec_01"), id("dec_02"), id("dec_04"), id("dec_05")]
        );

        let expected = [
            ("dec_01", (0, 0, 960, 540)),
            ("dec_02", (960, 0, 960, 540)),
            ("dec_04", (0, 540, 960, 540)),
            ("dec_05", (960, 540, 960, 540)),
        ];
        for (decoder_id, (x, y, w, h)) in expected {
            let decoder = store.decoder(&id(decoder_id)).unwrap();
            assert_eq!(decoder.current_source, Some(EncoderId::from("enc_01")));
            assert_eq!(
                decoder.crop,
                Some(CropRegion::new(x, y, w, h, 1920, 1080)),
                "{}",
                decoder_id
            );
        }
    }

    #[test]
    fn test_build_matrix_without_auto_crop_keeps_crops() {
        let mut store = store_2x3();
        let existing = CropRegion::new(0, 0, 100, 100, 1920, 1080);
        store.set_crop(&id("dec_03"), Some(existing)).unwrap();
        store
            .build_matrix(&[id("dec_03"), id("dec_06")], 2, 1, &EncoderId::from("enc_02"), false)
            .unwrap();
        assert_eq!(store.decoder(&id("dec_03")).unwrap().crop, Some(existing));
        assert_eq!(store.decoder(&id("dec_06")).unwrap().crop, None);
        assert_eq!(
            store.decoder(&id("dec_06")).unwrap().current_source,
            Some(EncoderId::from("enc_02"))
        );
    }

    #[test]
    fn test_build_matrix_supersedes_overlapping_groups() {
        let mut store = store_2x3();
        let first = store
            .build_matrix(&[id("dec_01"), id("dec_02")], 1, 2, &EncoderId::from("enc_01"), true)
            .unwrap();
        let other = store
            .build_matrix(&[id("dec_04"), id("dec_05")], 1, 2, &EncoderId::from("enc_01"), true)
            .unwrap();
        let second = store
            .build_matrix(&[id("dec_02"), id("dec_03")], 1, 2, &EncoderId::from("enc_02"), true)
            .unwrap();

        let ids: Vec<_> = store.matrices().iter().map(|m| m.id.clone()).collect();
        assert!(!ids.contains(&first.id));
        assert!(ids.contains(&other.id));
        assert!(ids.contains(&second.id));
    }

    #[test]
    fn test_build_matrix_rejects_duplicates_and_unknowns() {
        let mut store = store_2x3();
        assert_eq!(
            store.build_matrix(&[id("dec_01"), id("dec_01")], 1, 2, &EncoderId::from("enc_01"), true),
            Err(WallError::DuplicateDecoder("dec_01".into()))
        );
        assert_eq!(
            store.build_matrix(&[id("dec_01"), id("dec_77")], 1, 2, &EncoderId::from("enc_01"), true),
            Err(WallError::UnknownDecoder("dec_77".into()))
        );
        assert_eq!(
            store.build_matrix(&[id("dec_01"), id("dec_02")], 1, 2, &EncoderId::from("x"), true),
            Err(WallError::UnknownEncoder("x".into()))
        );
    }

    #[test]
    fn test_assign_all_is_all_or_nothing() {
        let mut store = store_2x3();
        let enc1 = EncoderId::from("enc_01");

        assert_eq!(
            store.assign_all(&[id("dec_01"), id("dec_99")], &enc1),
            Err(WallError::UnknownDecoder("dec_99".into()))
        );
        assert_eq!(
            store.assign_all(&[id("dec_01"), id("dec_01")], &enc1),
            Err(WallError::DuplicateDecoder("dec_01".into()))
        );
        assert_eq!(store.assign_all(&[], &enc1), Err(WallError::EmptySelection));
        assert!(store.decoders().iter().all(|d| d.current_source.is_none()));

        store.assign_all(&[id("dec_03"), id("dec_01")], &enc1).unwrap();
        assert_eq!(store.source_of(&id("dec_01")).unwrap().id, enc1);
        assert_eq!(store.source_of(&id("dec_03")).unwrap().id, enc1);
        assert_eq!(store.decoder(&id("dec_02")).unwrap().current_source, None);
    }

    #[test]
    fn test_set_crop_all_needs_one_shared_source() {
        let mut store = store_2x3();
        let enc1 = EncoderId::from("enc_01");
        let enc2 = EncoderId::from("enc_02");
        let region = CropRegion::new(0, 0, 960, 540, 1920, 1080);
        store.assign_all(&[id("dec_01"), id("dec_02")], &enc1).unwrap();

        assert_eq!(
            store.set_crop_all(&[id("dec_01"), id("dec_03")], region),
            Err(WallError::NoSource("dec_03".into()))
        );
        store.assign(&id("dec_03"), Some(&enc2)).unwrap();
        assert_eq!(
            store.set_crop_all(&[id("dec_01"), id("dec_03")], region),
            Err(WallError::MixedSources {
                first: "enc_01".into(),
                second: "enc_02".into(),
            })
        );
        let bad = CropRegion::new(1000, 0, 1000, 100, 1920, 1080);
        assert!(matches!(
            store.set_crop_all(&[id("dec_01"), id("dec_02")], bad),
            Err(WallError::InvalidRegion(_))
        ));
        assert!(store.decoders().iter().all(|d| d.crop.is_none()));

        store.set_crop_all(&[id("dec_01"), id("dec_02")], region).unwrap();
        assert_eq!(store.decoder(&id("dec_01")).unwrap().crop, Some(region));
        assert_eq!(store.decoder(&id("dec_02")).unwrap().crop, Some(region));
        assert_eq!(store.decoder(&id("dec_03")).unwrap().crop, None);
    }

    #[test]
    fn test_clear_all_reports_decoders_that_changed() {
        let mut store = store_2x3();
        let enc1 = EncoderId::from("enc_01");
        store
            .build_matrix(&[id("dec_05"), id("dec_02")], 2, 1, &enc1, true)
            .unwrap();
        store.assign(&id("dec_04"), Some(&enc1)).unwrap();

        let cleared = store.clear_all();
        assert_eq!(cleared, vec![id("dec_02"), id("dec_04"), id("dec_05")]);
        assert!(store
            .decoders()
            .iter()
            .all(|d| d.current_source.is_none() && d.crop.is_none()));
        assert!(store.matrices().is_empty());
        assert!(store.clear_all().is_empty());
    }

    #[test]
    fn test_snapshot_restore_round_trip() {
        let mut store = store_2x3();
        let enc1 = EncoderId::from("enc_01");
        store
            .build_matrix(&[id("dec_01"), id("dec_02")], 1, 2, &enc1, true)
            .unwrap();
        store.assign(&id("dec_06"), Some(&EncoderId::from("enc_02"))).unwrap();

        let preset = store.snapshot(PresetId::from("preset_1"), "Morning");
        let before: Vec<_> = store
            .decoders()
            .iter()
            .map(|d| (d.id.clone(), d.current_source.clone(), d.crop))
            .collect();

        // Mutate, including a decoder that is absent from the snapshot.
        store.assign(&id("dec_03"), Some(&enc1)).unwrap();
        store.clear(&id("dec_01")).unwrap();

        let summary = store.restore(&preset);
        assert!(summary.skipped.is_empty());
        assert_eq!(summary.applied, vec![id("dec_01"), id("dec_02"), id("dec_06")]);

        let after: Vec<_> = store
            .decoders()
            .iter()
            .map(|d| (d.id.clone(), d.current_source.clone(), d.crop))
            .collect();
        assert_eq!(before, after);
        assert_eq!(store.decoder(&id("dec_03")).unwrap().current_source, None);
        assert!(store.matrices().is_empty());
    }

    #[test]
    fn test_restore_skips_stale_entries() {
        let mut store = store_2x3();
        let mut preset = store.snapshot(PresetId::from("p"), "p");
        preset.mappings.insert(id("dec_99"), EncoderId::from("enc_01"));
        preset.mappings.insert(id("dec_01"), EncoderId::from("gone"));
        preset.crops.insert(id("dec_02"), CropRegion::new(0, 0, 0, 0, 1920, 1080));

        let summary = store.restore(&preset);
        assert!(summary.applied.is_empty());
        assert_eq!(summary.skipped.len(), 3);
    }

    #[test]
    fn test_restore_drops_crop_without_source() {
        let mut store = store_2x3();
        let region = CropRegion::new(0, 0, 960, 540, 1920, 1080);
        let mut preset = store.snapshot(PresetId::from("p"), "p");
        preset.mappings.insert(id("dec_01"), EncoderId::from("gone"));
        preset.crops.insert(id("dec_01"), region);
        preset.mappings.insert(id("dec_02"), EncoderId::from("enc_01"));
        preset.crops.insert(id("dec_02"), region);

        let summary = store.restore(&preset);
        assert_eq!(summary.applied, vec![id("dec_02")]);
        assert_eq!(summary.skipped.len(), 2);
        assert!(summary.skipped[1].contains("dec_01: crop dropped"));

        let dec_01 = store.decoder(&id("dec_01")).unwrap();
        assert_eq!(dec_01.crop, None);
        assert!(store.sync_intents(&id("dec_01")).unwrap().is_empty());
        assert_eq!(store.decoder(&id("dec_02")).unwrap().crop, Some(region));
    }

    #[test]
    fn test_sync_intents_switch_then_crop() {
        let mut store = store_2x3();
        let enc1 = EncoderId::from("enc_01");
        store.assign(&id("dec_01"), Some(&enc1)).unwrap();
        assert_eq!(store.sync_intents(&id("dec_01")).unwrap().len(), 1);

        store
            .set_crop(&id("dec_01"), Some(CropRegion::new(0, 0, 960, 540, 1920, 1080)))
            .unwrap();
        let intents = store.sync_intents(&id("dec_01")).unwrap();
        assert_eq!(intents.len(), 2);
        assert!(matches!(intents[0], DeviceIntent::Switch { .. }));
        assert!(matches!(intents[1], DeviceIntent::SetCrop { .. }));

        // A disabled crop is not pushed.
        let mut disabled = CropRegion::full_frame(1920, 1080);
        disabled.enabled = false;
        store.set_crop(&id("dec_01"), Some(disabled)).unwrap();
        assert_eq!(store.sync_intents(&id("dec_01")).unwrap().len(), 1);
        assert!(matches!(
            store.crop_intent(&id("dec_01")).unwrap(),
            DeviceIntent::ClearCrop { .. }
        ));
    }

    #[test]
    fn test_removed_encoder_resolves_to_nothing() {
        let mut store = store_2x3();
        let enc2 = EncoderId::from("enc_02");
        store.assign(&id("dec_04"), Some(&enc2)).unwrap();
        store.remove_encoder(&enc2);

        assert!(store.source_of(&id("dec_04")).is_none());
        assert_eq!(
            store.decoder(&id("dec_04")).unwrap().current_source,
            Some(enc2)
        );
        assert!(store.sync_intents(&id("dec_04")).unwrap().is_empty());
    }

    #[test]
    fn test_status_updates() {
        let mut store = store_2x3();
        assert_eq!(
            store.set_decoder_status(&id("dec_01"), DeviceStatus::Online),
            Some(DeviceStatus::Offline)
        );
        assert_eq!(
            store.set_encoder_status(&EncoderId::from("enc_01"), DeviceStatus::Online),
            Some(DeviceStatus::Offline)
        );
        assert_eq!(store.set_decoder_status(&id("dec_99"), DeviceStatus::Online), None);
    }

    #[test]
    fn test_preset_replacement_by_id() {
        let mut store = store_2x3();
        let first = store.snapshot(PresetId::from("preset_1"), "First");
        assert!(store.save_preset(first).is_none());
        let second = store.snapshot(PresetId::from("preset_1"), "Second");
        let replaced = store.save_preset(second).unwrap();
        assert_eq!(replaced.name, "First");
        assert_eq!(store.presets().len(), 1);
        assert_eq!(store.preset(&PresetId::from("preset_1")).unwrap().name, "Second");
    }

    #[test]
    fn test_preset_json_uses_string_keys() {
        let mut store = store_2x3();
        store.assign(&id("dec_01"), Some(&EncoderId::from("enc_01"))).unwrap();
        let preset = store.snapshot(PresetId::from("p1"), "p1");
        let json = serde_json::to_string(&preset).unwrap();
        assert!(json.contains("\"dec_01\":\"enc_01\""));
        let back: Preset = serde_json::from_str(&json).unwrap();
        assert_eq!(back, preset);
    }
}
