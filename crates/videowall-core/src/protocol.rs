//! Protocol types for CLI-daemon communication.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::geometry::QuickCrop;
use crate::intent::IntentKind;
use crate::topology::{Decoder, DeviceStatus, Encoder, MatrixGroup, RestoreSummary};

/// A request from CLI to daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub id: String,
    pub command: Command,
}

/// Commands the daemon can execute.
///
/// Commands that reach devices return as soon as the work is dispatched
/// unless `wait` is set, in which case the response carries a
/// [`BatchReport`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Command {
    /// Full topology with statuses, sources and crops.
    Status,
    /// Show an encoder on one or more decoders.
    Switch {
        decoders: Vec<String>,
        encoder: String,
        #[serde(default)]
        wait: bool,
    },
    /// Remove a decoder's source and crop.
    Clear {
        decoder: String,
        #[serde(default)]
        wait: bool,
    },
    /// Wipe every decoder and drop all matrix groups.
    ClearAll {
        #[serde(default)]
        wait: bool,
    },
    /// Crop what one or more decoders show. They must share a source.
    SetCrop {
        decoders: Vec<String>,
        crop: CropSpec,
        #[serde(default)]
        wait: bool,
    },
    /// Return a decoder to full frame.
    ClearCrop {
        decoder: String,
        #[serde(default)]
        wait: bool,
    },
    /// Tile one encoder across a group of decoders.
    Matrix {
        decoders: Vec<String>,
        rows: u32,
        cols: u32,
        encoder: String,
        auto_crop: bool,
        #[serde(default)]
        wait: bool,
    },
    /// Snapshot the current mapping into a preset.
    SavePreset { preset: String, name: Option<String> },
    /// Restore a preset onto the wall.
    LoadPreset {
        preset: String,
        #[serde(default)]
        wait: bool,
    },
    ListPresets,
    DeletePreset { preset: String },
    /// Recent device command attempts, newest last.
    ActivityLog { limit: Option<usize> },
    /// Forget every recorded attempt.
    ClearActivity,
    /// Replace the fleet-wide terminal credentials.
    SetCredentials { username: String, password: String },
    /// Try the built-in default credentials against one decoder.
    TryDefaultCredentials {
        decoder: String,
        #[serde(default)]
        adopt: bool,
    },
    /// Check reachability of one encoder or decoder.
    Probe { device: String },
    /// Run a liveness sweep now.
    Refresh,
    /// Shutdown the daemon gracefully.
    Shutdown,
}

/// How a crop is specified by the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CropSpec {
    /// Absolute pixels within the decoder's current source frame.
    Region {
        x: i32,
        y: i32,
        width: i32,
        height: i32,
    },
    /// A named shortcut scaled to the source frame.
    Quick { preset: QuickCrop },
}

/// A response from daemon to CLI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<ResponseData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
}

impl Response {
    pub fn success(id: impl Into<String>, data: ResponseData) -> Self {
        Self {
            id: id.into(),
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(id: impl Into<String>, error: ApiError) -> Self {
        Self {
            id: id.into(),
            success: false,
            data: None,
            error: Some(error),
        }
    }
}

/// Response payload variants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseData {
    Topology {
        encoders: Vec<Encoder>,
        decoders: Vec<Decoder>,
        matrices: Vec<MatrixGroup>,
    },
    /// Work was handed to background tasks.
    Dispatched {
        message: String,
        decoders: Vec<String>,
    },
    /// Outcome of awaited device work.
    Batch(BatchReport),
    MatrixCreated {
        group: MatrixGroup,
        #[serde(skip_serializing_if = "Option::is_none")]
        report: Option<BatchReport>,
    },
    PresetRestored {
        summary: RestoreSummary,
        #[serde(skip_serializing_if = "Option::is_none")]
        report: Option<BatchReport>,
    },
    Presets { presets: Vec<PresetInfo> },
    ActivityLog {
        entries: Vec<ActivityEntry>,
        /// How many entries the daemon keeps before evicting the oldest.
        capacity: usize,
    },
    Credentials { username: String, adopted: bool },
    Probe { device: String, status: DeviceStatus },
    /// Generic success message.
    Ok { message: String },
}

/// Summary of a saved preset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresetInfo {
    pub id: String,
    pub name: String,
    pub timestamp: DateTime<Utc>,
    pub decoders: usize,
}

/// One recorded device command attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub timestamp: DateTime<Utc>,
    pub target: String,
    /// Literal command text, or hex for binary frames, truncated.
    pub command: String,
    pub success: bool,
    /// Truncated response or error text.
    pub response: Option<String>,
}

/// Result of one intent sent to one decoder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentReport {
    pub decoder: String,
    pub intent: IntentKind,
    pub accepted: bool,
    /// The transport and command that was accepted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dialect: Option<String>,
}

/// Per-intent outcomes of a fan-out. Partial success is normal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub outcomes: Vec<IntentReport>,
    pub succeeded: usize,
    pub failed: usize,
}

impl BatchReport {
    pub fn push(&mut self, report: IntentReport) {
        if report.accepted {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
        self.outcomes.push(report);
    }

    pub fn extend(&mut self, other: BatchReport) {
        for report in other.outcomes {
            self.push(report);
        }
    }

    pub fn all_accepted(&self) -> bool {
        self.failed == 0
    }
}
