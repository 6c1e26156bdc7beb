//! Daemon configuration loaded from JSON.

use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use videowall_core::topology::{DeviceStatus, Encoder, EncoderId, GridLayout, TopologyStore};

use crate::daemon::paths::{self, ConfigLocation};
use crate::device::activity::DEFAULT_CAPACITY;
use crate::device::{Credentials, ResolverSettings};

/// Everything the daemon needs to know about the wall.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WallConfig {
    pub grid: GridLayout,
    pub encoders: Vec<EncoderConfig>,
    pub credentials: Credentials,
    pub resolver: ResolverSettings,
    pub liveness: LivenessSettings,
    pub activity_log_capacity: usize,
    /// Where saved presets live. Defaults to the user data directory.
    pub presets_path: Option<PathBuf>,
}

impl Default for WallConfig {
    fn default() -> Self {
        Self {
            grid: GridLayout::default(),
            encoders: Vec::new(),
            credentials: Credentials::default(),
            resolver: ResolverSettings::default(),
            liveness: LivenessSettings::default(),
            activity_log_capacity: DEFAULT_CAPACITY,
            presets_path: None,
        }
    }
}

/// One video source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncoderConfig {
    pub id: String,
    pub name: String,
    pub address: Ipv4Addr,
    #[serde(default = "default_encoder_control_port")]
    pub control_port: u16,
    #[serde(default = "default_rtsp_port")]
    pub rtsp_port: u16,
    #[serde(default = "default_stream_path")]
    pub stream_path: String,
    #[serde(default = "default_width")]
    pub width: i32,
    #[serde(default = "default_height")]
    pub height: i32,
    /// Ports tried by liveness probes. Defaults to the control port, then
    /// 8001 and 23.
    #[serde(default)]
    pub probe_ports: Option<Vec<u16>>,
}

fn default_encoder_control_port() -> u16 {
    48686
}

fn default_rtsp_port() -> u16 {
    551
}

fn default_stream_path() -> String {
    "2160".to_string()
}

fn default_width() -> i32 {
    1920
}

fn default_height() -> i32 {
    1080
}

impl EncoderConfig {
    pub fn to_encoder(&self) -> Encoder {
        let ports = match &self.probe_ports {
            Some(ports) => ports.clone(),
            None => {
                let mut ports = vec![self.control_port, 8001, 23];
                ports.dedup();
                ports
            }
        };
        Encoder {
            id: EncoderId(self.id.clone()),
            name: self.name.clone(),
            address: self.address,
            ports,
            rtsp_port: self.rtsp_port,
            stream_path: self.stream_path.clone(),
            width: self.width,
            height: self.height,
            status: DeviceStatus::Offline,
        }
    }
}

/// Background reachability sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LivenessSettings {
    pub interval_secs: u64,
    pub probe_timeout_ms: u64,
    /// Devices probed at the same time.
    pub concurrency: usize,
}

impl Default for LivenessSettings {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            probe_timeout_ms: 1000,
            concurrency: 16,
        }
    }
}

impl LivenessSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

impl WallConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        Self::from_json(&content).with_context(|| format!("Invalid config file {:?}", path))
    }

    /// Parse and validate configuration from a JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: WallConfig = serde_json::from_str(json).context("Malformed config JSON")?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve the config location and load it.
    ///
    /// An explicit path that does not exist is an error; a missing default
    /// file means built-in defaults.
    pub fn load(flag: Option<&Path>) -> Result<Self> {
        match paths::get_config_location(flag) {
            ConfigLocation::Explicit(path) => Self::from_file(&path),
            ConfigLocation::Default(path) if path.exists() => Self::from_file(&path),
            ConfigLocation::Default(_) | ConfigLocation::None => {
                tracing::info!("No config file found, using built-in defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.grid
            .decoders()
            .map_err(|e| anyhow::anyhow!("grid: {}", e))?;

        let mut ids = HashSet::new();
        for encoder in &self.encoders {
            if encoder.id.trim().is_empty() {
                bail!("encoder ids must not be empty");
            }
            if !ids.insert(encoder.id.as_str()) {
                bail!("encoder id '{}' is listed more than once", encoder.id);
            }
            if encoder.width <= 0 || encoder.height <= 0 {
                bail!(
                    "encoder '{}' frame {}x{} must have positive size",
                    encoder.id,
                    encoder.width,
                    encoder.height
                );
            }
        }

        if self.activity_log_capacity == 0 {
            bail!("activity_log_capacity must be > 0");
        }
        if self.liveness.interval_secs == 0 {
            bail!("liveness.interval_secs must be > 0");
        }
        if self.liveness.concurrency == 0 {
            bail!("liveness.concurrency must be > 0");
        }
        if self.resolver.response_limit == 0 {
            bail!("resolver.response_limit must be > 0");
        }
        Ok(())
    }

    /// Build the initial topology: configured encoders and the grid's
    /// decoders, all offline with nothing assigned.
    pub fn topology(&self) -> Result<TopologyStore> {
        let decoders = self
            .grid
            .decoders()
            .map_err(|e| anyhow::anyhow!("grid: {}", e))?;
        let encoders = self.encoders.iter().map(EncoderConfig::to_encoder);
        Ok(TopologyStore::with_devices(encoders, decoders))
    }

    pub fn presets_path(&self) -> PathBuf {
        self.presets_path
            .clone()
            .unwrap_or_else(paths::default_presets_path)
    }
}
