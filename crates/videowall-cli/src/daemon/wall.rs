//! The wall controller: topology state plus the machinery that pushes it to
//! devices.
//!
//! Every operation updates the topology first, under the write lock, and
//! only then fans the resulting intents out to background tasks, one per
//! decoder. The model therefore always reflects operator intent, even while
//! (or after) devices fail to follow it. Callers get a [`Dispatch`] back and
//! decide whether to wait for the outcome.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use videowall_core::error::ApiError;
use videowall_core::intent::DeviceIntent;
use videowall_core::preset::PresetStore;
use videowall_core::protocol::{ActivityEntry, BatchReport, CropSpec, IntentReport, PresetInfo};
use videowall_core::topology::{
    Decoder, DecoderId, DeviceStatus, Encoder, EncoderId, MatrixGroup, PresetId, RestoreSummary,
    TopologyStore,
};

use crate::daemon::config::{LivenessSettings, WallConfig};
use crate::daemon::presets::JsonPresetFile;
use crate::device::{ActivityLog, CredentialManager, Credentials, Resolver};

/// Pause between consecutive intents for the same decoder, so a device can
/// settle on a new stream before it is asked to crop it.
const INTENT_GAP: Duration = Duration::from_millis(100);

/// Background work started by a wall operation.
///
/// Dropping it detaches the tasks; they run to completion regardless.
#[derive(Debug, Default)]
pub struct Dispatch {
    decoders: Vec<DecoderId>,
    tasks: Vec<JoinHandle<BatchReport>>,
}

impl Dispatch {
    /// Decoders that received work, in dispatch order.
    pub fn decoders(&self) -> &[DecoderId] {
        &self.decoders
    }

    /// Wait for every task and merge their outcomes.
    pub async fn wait(self) -> BatchReport {
        let mut report = BatchReport::default();
        for task in self.tasks {
            match task.await {
                Ok(outcome) => report.extend(outcome),
                Err(e) => error!("Dispatch task failed: {}", e),
            }
        }
        report
    }
}

/// A device the liveness monitor can probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceRef {
    Encoder(EncoderId),
    Decoder(DecoderId),
}

impl std::fmt::Display for DeviceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceRef::Encoder(id) => write!(f, "{}", id),
            DeviceRef::Decoder(id) => write!(f, "{}", id),
        }
    }
}

/// Where and how to probe one device.
#[derive(Debug, Clone)]
pub struct ProbeTarget {
    pub device: DeviceRef,
    pub address: std::net::Ipv4Addr,
    pub ports: Vec<u16>,
}

/// Owns the topology and drives the hardware.
pub struct Wall {
    topology: RwLock<TopologyStore>,
    resolver: Arc<Resolver>,
    presets: Box<dyn PresetStore>,
    liveness: LivenessSettings,
}

impl Wall {
    pub fn new(
        topology: TopologyStore,
        resolver: Arc<Resolver>,
        presets: Box<dyn PresetStore>,
        liveness: LivenessSettings,
    ) -> Self {
        Self {
            topology: RwLock::new(topology),
            resolver,
            presets,
            liveness,
        }
    }

    /// Build the wall from configuration and load saved presets.
    pub fn from_config(config: &WallConfig) -> Result<Self> {
        let mut topology = config.topology()?;

        let activity = Arc::new(ActivityLog::new(config.activity_log_capacity));
        let credentials = Arc::new(CredentialManager::new(config.credentials.clone()));
        let resolver = Arc::new(Resolver::new(&config.resolver, credentials, activity));

        let store = JsonPresetFile::new(config.presets_path());
        let saved = store
            .load_all()
            .with_context(|| format!("Failed to load presets from {:?}", store.path()))?;
        info!("Loaded {} preset(s) from {:?}", saved.len(), store.path());
        for preset in saved.into_values() {
            topology.save_preset(preset);
        }

        Ok(Self::new(
            topology,
            resolver,
            Box::new(store),
            config.liveness.clone(),
        ))
    }

    pub fn resolver(&self) -> &Arc<Resolver> {
        &self.resolver
    }

    pub fn liveness(&self) -> &LivenessSettings {
        &self.liveness
    }

    /// Encoders, decoders (grid order) and matrix groups.
    pub async fn status(&self) -> (Vec<Encoder>, Vec<Decoder>, Vec<MatrixGroup>) {
        let topology = self.topology.read().await;
        (
            topology.encoders().into_iter().cloned().collect(),
            topology.decoders().into_iter().cloned().collect(),
            topology.matrices().into_iter().cloned().collect(),
        )
    }

    fn dispatch(&self, jobs: Vec<(DecoderId, Vec<DeviceIntent>)>) -> Dispatch {
        let mut dispatch = Dispatch::default();
        for (decoder, intents) in jobs {
            if intents.is_empty() {
                continue;
            }
            debug!("Dispatching {} intent(s) to {}", intents.len(), decoder);
            let resolver = self.resolver.clone();
            dispatch.decoders.push(decoder.clone());
            dispatch
                .tasks
                .push(tokio::spawn(run_intents(resolver, decoder, intents)));
        }
        dispatch
    }

    /// Show an encoder on a set of decoders. Stored crops are re-applied
    /// after each switch. An invalid selection changes nothing.
    pub async fn switch(&self, decoders: &[DecoderId], encoder: &EncoderId) -> Result<Dispatch, ApiError> {
        let jobs = {
            let mut topology = self.topology.write().await;
            topology.assign_all(decoders, encoder)?;
            let mut jobs = Vec::with_capacity(decoders.len());
            for id in decoders {
                jobs.push((id.clone(), topology.sync_intents(id)?));
            }
            jobs
        };
        info!("Switching {} decoder(s) to {}", decoders.len(), encoder);
        Ok(self.dispatch(jobs))
    }

    /// Wipe the whole wall. Only decoders that showed something get a
    /// ClearCrop.
    pub async fn clear_all(&self) -> Result<Dispatch, ApiError> {
        let jobs = {
            let mut topology = self.topology.write().await;
            let cleared = topology.clear_all();
            let mut jobs = Vec::with_capacity(cleared.len());
            for id in cleared {
                let intent = topology.crop_intent(&id)?;
                jobs.push((id, vec![intent]));
            }
            jobs
        };
        info!("Cleared the wall ({} decoder(s) in use)", jobs.len());
        Ok(self.dispatch(jobs))
    }

    /// Drop a decoder's source and crop.
    pub async fn clear(&self, decoder: &DecoderId) -> Result<Dispatch, ApiError> {
        let intent = {
            let mut topology = self.topology.write().await;
            topology.clear(decoder)?;
            topology.crop_intent(decoder)?
        };
        info!("Cleared {}", decoder);
        Ok(self.dispatch(vec![(decoder.clone(), vec![intent])]))
    }

    /// Crop what a set of decoders show. They must all show the same source;
    /// the region is interpreted against its frame. An invalid selection or
    /// region changes nothing.
    pub async fn set_crop(&self, decoders: &[DecoderId], spec: CropSpec) -> Result<Dispatch, ApiError> {
        let jobs = {
            let mut topology = self.topology.write().await;
            let (width, height) = {
                let source = topology.shared_source(decoders)?;
                (source.width, source.height)
            };

            let region = match spec {
                CropSpec::Region {
                    x,
                    y,
                    width: w,
                    height: h,
                } => videowall_core::geometry::CropRegion::new(x, y, w, h, width, height),
                CropSpec::Quick { preset } => preset.region(width, height),
            };
            topology.set_crop_all(decoders, region)?;
            let mut jobs = Vec::with_capacity(decoders.len());
            for id in decoders {
                jobs.push((id.clone(), vec![topology.crop_intent(id)?]));
            }
            jobs
        };
        info!("Cropping {} decoder(s)", decoders.len());
        Ok(self.dispatch(jobs))
    }

    /// Return a decoder to full frame.
    pub async fn clear_crop(&self, decoder: &DecoderId) -> Result<Dispatch, ApiError> {
        let intent = {
            let mut topology = self.topology.write().await;
            topology.set_crop(decoder, None)?;
            topology.crop_intent(decoder)?
        };
        Ok(self.dispatch(vec![(decoder.clone(), vec![intent])]))
    }

    /// Tile one encoder across decoders. Each decoder gets its switch, then
    /// its crop.
    pub async fn matrix(
        &self,
        decoders: &[DecoderId],
        rows: u32,
        cols: u32,
        encoder: &EncoderId,
        auto_crop: bool,
    ) -> Result<(MatrixGroup, Dispatch), ApiError> {
        let (group, jobs) = {
            let mut topology = self.topology.write().await;
            let group = topology.build_matrix(decoders, rows, cols, encoder, auto_crop)?;
            let mut jobs = Vec::with_capacity(group.decoders.len());
            for id in &group.decoders {
                jobs.push((id.clone(), topology.sync_intents(id)?));
            }
            (group, jobs)
        };
        info!(
            "Matrix {} ({}x{}) showing {} on {} decoder(s)",
            group.id,
            rows,
            cols,
            encoder,
            group.decoders.len()
        );
        Ok((group, self.dispatch(jobs)))
    }

    /// Snapshot the wall into a preset and persist it.
    pub async fn save_preset(&self, id: PresetId, name: Option<String>) -> Result<PresetInfo, ApiError> {
        let name = name.unwrap_or_else(|| id.to_string());
        let preset = self.topology.read().await.snapshot(id, name);

        self.presets
            .save(&preset)
            .map_err(|e| ApiError::internal(format!("Failed to persist preset: {}", e)))?;
        let info = preset_info(&preset);
        self.topology.write().await.save_preset(preset);
        info!("Saved preset {} ({} decoder(s))", info.id, info.decoders);
        Ok(info)
    }

    /// Reset the wall to exactly what a preset holds and push it out.
    pub async fn load_preset(&self, id: &PresetId) -> Result<(RestoreSummary, Dispatch), ApiError> {
        let (summary, jobs) = {
            let mut topology = self.topology.write().await;
            let preset = topology
                .preset(id)
                .cloned()
                .ok_or_else(|| ApiError::preset_not_found(id.as_str()))?;
            let summary = topology.restore(&preset);
            let mut jobs = Vec::with_capacity(summary.applied.len());
            for decoder in &summary.applied {
                jobs.push((decoder.clone(), topology.sync_intents(decoder)?));
            }
            (summary, jobs)
        };
        for skipped in &summary.skipped {
            warn!("Preset {}: skipped {}", id, skipped);
        }
        info!("Restored preset {} onto {} decoder(s)", id, summary.applied.len());
        Ok((summary, self.dispatch(jobs)))
    }

    pub async fn list_presets(&self) -> Vec<PresetInfo> {
        self.topology
            .read()
            .await
            .presets()
            .into_iter()
            .map(preset_info)
            .collect()
    }

    pub async fn delete_preset(&self, id: &PresetId) -> Result<(), ApiError> {
        if self.topology.read().await.preset(id).is_none() {
            return Err(ApiError::preset_not_found(id.as_str()));
        }
        self.presets
            .remove(id)
            .map_err(|e| ApiError::internal(format!("Failed to delete preset: {}", e)))?;
        self.topology.write().await.remove_preset(id);
        info!("Deleted preset {}", id);
        Ok(())
    }

    pub fn activity(&self, limit: Option<usize>) -> Vec<ActivityEntry> {
        self.resolver.activity().entries(limit)
    }

    /// Empty the activity log. Returns how many entries were dropped.
    pub fn clear_activity(&self) -> usize {
        let dropped = self.resolver.activity().clear();
        info!("Cleared {} activity entries", dropped);
        dropped
    }

    pub fn set_credentials(&self, username: &str, password: &str) {
        self.resolver.credentials().set_credentials(username, password);
    }

    /// Try the factory default pairs against one decoder's terminal port,
    /// adopting the working pair fleet-wide when asked to.
    pub async fn try_default_credentials(&self, decoder: &DecoderId, adopt: bool) -> Result<Credentials, ApiError> {
        let endpoint = self
            .topology
            .read()
            .await
            .decoder(decoder)
            .map(|d| d.endpoint)
            .ok_or_else(|| ApiError::decoder_not_found(decoder.as_str()))?;
        let addr = SocketAddr::from((endpoint.address, endpoint.terminal_port));

        let found = self
            .resolver
            .credentials()
            .try_defaults(addr, self.resolver.timing(), self.resolver.activity())
            .await
            .ok_or_else(|| ApiError::no_default_credentials(&endpoint.to_string()))?;

        if adopt {
            self.set_credentials(&found.username, &found.password);
        }
        Ok(found)
    }

    /// Every device with its probe ports, encoders first.
    pub async fn probe_targets(&self) -> Vec<ProbeTarget> {
        let topology = self.topology.read().await;
        let encoders = topology.encoders().into_iter().map(|e| ProbeTarget {
            device: DeviceRef::Encoder(e.id.clone()),
            address: e.address,
            ports: e.ports.clone(),
        });
        let decoders = topology.decoders().into_iter().map(|d| ProbeTarget {
            device: DeviceRef::Decoder(d.id.clone()),
            address: d.endpoint.address,
            ports: d.endpoint.probe_ports().to_vec(),
        });
        encoders.chain(decoders).collect()
    }

    /// Find a device by id, decoders first.
    pub async fn probe_target(&self, id: &str) -> Option<ProbeTarget> {
        self.probe_targets().await.into_iter().find(|t| match &t.device {
            DeviceRef::Encoder(e) => e.as_str() == id,
            DeviceRef::Decoder(d) => d.as_str() == id,
        })
    }

    /// Record a probe result, tracing transitions.
    pub async fn apply_status(&self, device: &DeviceRef, status: DeviceStatus) {
        let previous = {
            let mut topology = self.topology.write().await;
            match device {
                DeviceRef::Encoder(id) => topology.set_encoder_status(id, status),
                DeviceRef::Decoder(id) => topology.set_decoder_status(id, status),
            }
        };
        match previous {
            Some(previous) if previous != status => info!("{} is now {}", device, status),
            Some(_) => {}
            None => debug!("{} disappeared before its probe finished", device),
        }
    }

    /// Probe one device now and record the result.
    pub async fn probe(&self, id: &str) -> Result<DeviceStatus, ApiError> {
        let target = self.probe_target(id).await.ok_or_else(|| {
            ApiError::invalid_input_with_suggestion(
                format!("No encoder or decoder named '{}'", id),
                "Run 'videowall status' to see device ids",
            )
        })?;
        let status = self
            .resolver
            .probe(target.address, &target.ports, self.liveness.probe_timeout())
            .await;
        self.apply_status(&target.device, status).await;
        Ok(status)
    }
}

fn preset_info(preset: &videowall_core::topology::Preset) -> PresetInfo {
    let mut decoders: Vec<_> = preset.mappings.keys().chain(preset.crops.keys()).collect();
    decoders.sort();
    decoders.dedup();
    PresetInfo {
        id: preset.id.to_string(),
        name: preset.name.clone(),
        timestamp: preset.timestamp,
        decoders: decoders.len(),
    }
}

/// Resolve a decoder's intents one after another.
async fn run_intents(resolver: Arc<Resolver>, decoder: DecoderId, intents: Vec<DeviceIntent>) -> BatchReport {
    let mut report = BatchReport::default();
    for (i, intent) in intents.iter().enumerate() {
        if i > 0 {
            tokio::time::sleep(INTENT_GAP).await;
        }
        let outcome = resolver.resolve(intent).await;
        report.push(IntentReport {
            decoder: decoder.to_string(),
            intent: intent.kind(),
            accepted: outcome.is_ok(),
            dialect: outcome.ok().map(|accepted| accepted.command),
        });
    }
    report
}
