//! Logical device operations, independent of the dialect that serves them.

use std::fmt;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::geometry::CropRegion;

/// Network coordinates of a controllable display decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceEndpoint {
    pub address: Ipv4Addr,
    /// Binary control port.
    pub control_port: u16,
    pub http_port: u16,
    /// Authenticated line-session port.
    pub terminal_port: u16,
}

impl DeviceEndpoint {
    /// Ports a liveness probe tries, in order.
    pub fn probe_ports(&self) -> [u16; 3] {
        [self.control_port, self.http_port, self.terminal_port]
    }
}

impl fmt::Display for DeviceEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.address)
    }
}

/// Where a decoder pulls its stream from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceEndpoint {
    pub address: Ipv4Addr,
    pub rtsp_port: u16,
    pub stream_path: String,
}

impl SourceEndpoint {
    pub fn rtsp_url(&self) -> String {
        format!(
            "rtsp://{}:{}/{}",
            self.address,
            self.rtsp_port,
            self.stream_path.trim_start_matches('/')
        )
    }
}

/// Which kind of operation an intent performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    Switch,
    SetCrop,
    ClearCrop,
}

impl fmt::Display for IntentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntentKind::Switch => write!(f, "switch"),
            IntentKind::SetCrop => write!(f, "set-crop"),
            IntentKind::ClearCrop => write!(f, "clear-crop"),
        }
    }
}

/// A state-changing operation addressed to one decoder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "intent", rename_all = "snake_case")]
pub enum DeviceIntent {
    Switch {
        target: DeviceEndpoint,
        source: SourceEndpoint,
    },
    SetCrop {
        target: DeviceEndpoint,
        region: CropRegion,
    },
    ClearCrop {
        target: DeviceEndpoint,
    },
}

impl DeviceIntent {
    pub fn kind(&self) -> IntentKind {
        match self {
            DeviceIntent::Switch { .. } => IntentKind::Switch,
            DeviceIntent::SetCrop { .. } => IntentKind::SetCrop,
            DeviceIntent::ClearCrop { .. } => IntentKind::ClearCrop,
        }
    }

    pub fn target(&self) -> &DeviceEndpoint {
        match self {
            DeviceIntent::Switch { target, .. }
            | DeviceIntent::SetCrop { target, .. }
            | DeviceIntent::ClearCrop { target } => target,
        }
    }
}
