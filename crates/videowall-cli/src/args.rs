//! CLI argument parsing with clap derive macros.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use videowall_core::geometry::QuickCrop;

/// Control a video wall of network decoders fed by video encoders.
///
/// Commands talk to a background daemon that owns the wall state and speaks
/// to the hardware. The daemon starts on first use.
#[derive(Debug, Parser)]
#[command(name = "videowall", version)]
pub struct Cli {
    /// Configuration file for an auto-started daemon (and for `daemon`)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Wait for devices to answer and print per-decoder results
    #[arg(short, long, global = true)]
    pub wait: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Show encoders, decoders, sources, crops and matrix groups
    Status,

    /// Show an encoder on one or more decoders
    #[command(after_help = "\
Examples:
  videowall switch enc_03 dec_01          # Returns once the switch is dispatched
  videowall switch enc_03 dec_01 dec_02   # Same source on several decoders
  videowall --wait switch enc_03 dec_01   # Waits and reports the accepted dialect")]
    Switch(SwitchArgs),

    /// Remove the source and crop of one decoder, or of the whole wall
    #[command(after_help = "\
Examples:
  videowall clear dec_04
  videowall clear --all   # Also drops every matrix group")]
    Clear(ClearArgs),

    /// Crop what one or more decoders show
    #[command(after_help = "\
The region is in pixels of the current source frame. Decoders cropped
together must all show the same encoder.

Examples:
  videowall crop dec_05 --region 0,0,960,540
  videowall crop dec_05 --quick top-left
  videowall crop dec_05 dec_06 --quick center")]
    Crop(CropArgs),

    /// Return a decoder to full frame
    ClearCrop(DecoderArgs),

    /// Tile one encoder across a rectangular group of decoders
    #[command(after_help = "\
Decoders are placed by their grid position, not by the order given.

Examples:
  videowall matrix enc_02 2x2 dec_01 dec_02 dec_15 dec_16
  videowall matrix enc_02 1x3 dec_01 dec_02 dec_03 --no-crop")]
    Matrix(MatrixArgs),

    /// Save, load, list or delete presets
    #[command(subcommand)]
    Preset(PresetCommands),

    /// Show recent device command attempts, or forget them
    Log(LogArgs),

    /// Manage the terminal login used for decoders
    #[command(subcommand)]
    Credentials(CredentialCommands),

    /// Check whether one encoder or decoder is reachable
    Probe(ProbeArgs),

    /// Probe every device now
    Refresh,

    /// Show an end-to-end usage example
    Examples,

    /// Run the daemon in the foreground (usually auto-started)
    Daemon,

    /// Stop the daemon
    Stop,
}

#[derive(Debug, clap::Args)]
pub struct SwitchArgs {
    /// Encoder id (e.g. enc_03)
    pub encoder: String,

    /// Decoder ids (e.g. dec_01 dec_02)
    #[arg(required = true, num_args = 1..)]
    pub decoders: Vec<String>,
}

#[derive(Debug, clap::Args)]
#[group(required = true, multiple = false)]
pub struct ClearArgs {
    /// Decoder id (e.g. dec_01)
    pub decoder: Option<String>,

    /// Clear every decoder
    #[arg(long)]
    pub all: bool,
}

#[derive(Debug, clap::Args)]
pub struct DecoderArgs {
    /// Decoder id (e.g. dec_01)
    pub decoder: String,
}

#[derive(Debug, clap::Args)]
#[group(required = true, multiple = false)]
pub struct CropRegionArgs {
    /// Region as x,y,width,height
    #[arg(long, value_name = "X,Y,W,H", value_parser = parse_region)]
    pub region: Option<(i32, i32, i32, i32)>,

    /// Named region scaled to the source frame
    #[arg(long, value_enum)]
    pub quick: Option<QuickCrop>,
}

#[derive(Debug, clap::Args)]
pub struct CropArgs {
    /// Decoder ids (e.g. dec_01 dec_02)
    #[arg(required = true, num_args = 1..)]
    pub decoders: Vec<String>,

    #[command(flatten)]
    pub crop: CropRegionArgs,
}

#[derive(Debug, clap::Args)]
pub struct MatrixArgs {
    /// Encoder shown across the group
    pub encoder: String,

    /// Shape as ROWSxCOLS (e.g. 2x2)
    #[arg(value_parser = parse_shape)]
    pub shape: (u32, u32),

    /// Exactly ROWS*COLS decoder ids
    #[arg(required = true, num_args = 1..)]
    pub decoders: Vec<String>,

    /// Show the full frame on every decoder instead of one tile each
    #[arg(long)]
    pub no_crop: bool,
}

#[derive(Debug, Subcommand)]
pub enum PresetCommands {
    /// Snapshot the current wall
    Save {
        /// Preset id
        preset: String,
        /// Display name [default: the id]
        #[arg(short, long)]
        name: Option<String>,
    },
    /// Restore a preset onto the wall
    Load {
        /// Preset id
        preset: String,
    },
    /// List saved presets
    List,
    /// Delete a preset
    Delete {
        /// Preset id
        preset: String,
    },
}

#[derive(Debug, clap::Args)]
pub struct LogArgs {
    /// Number of most recent entries to show
    #[arg(short = 'n', long, default_value_t = 50)]
    pub limit: usize,

    /// Forget every recorded attempt instead of showing them
    #[arg(long, conflicts_with = "limit")]
    pub clear: bool,
}

#[derive(Debug, Subcommand)]
pub enum CredentialCommands {
    /// Replace the login used for every decoder
    Set { username: String, password: String },
    /// Try the factory default logins against one decoder
    TryDefaults {
        /// Decoder id (e.g. dec_01)
        decoder: String,
        /// Use the working login for every decoder from now on
        #[arg(long)]
        adopt: bool,
    },
}

#[derive(Debug, clap::Args)]
pub struct ProbeArgs {
    /// Encoder or decoder id
    pub device: String,
}

fn parse_region(s: &str) -> Result<(i32, i32, i32, i32), String> {
    let parts: Vec<&str> = s.split(',').map(str::trim).collect();
    let [x, y, w, h] = parts.as_slice() else {
        return Err(format!("expected X,Y,W,H but got '{}'", s));
    };
    let num = |v: &str| v.parse::<i32>().map_err(|e| format!("'{}': {}", v, e));
    Ok((num(x)?, num(y)?, num(w)?, num(h)?))
}

fn parse_shape(s: &str) -> Result<(u32, u32), String> {
    let (rows, cols) = s
        .to_ascii_lowercase()
        .split_once('x')
        .map(|(r, c)| (r.trim().to_string(), c.trim().to_string()))
        .ok_or_else(|| format!("expected ROWSxCOLS but got '{}'", s))?;
    let rows: u32 = rows.parse().map_err(|_| format!("bad row count in '{}'", s))?;
    let cols: u32 = cols.parse().map_err(|_| format!("bad column count in '{}'", s))?;
    if rows == 0 || cols == 0 {
        return Err("rows and columns must be at least 1".to_string());
    }
    Ok((rows, cols))
}

/// End-to-end example text for the `examples` command.
pub const EXAMPLES_TEXT: &str = r#"End-to-end example: put a camera across four screens

# 1. Look at the wall (starts the daemon on first use)
videowall status

# 2. Show camera enc_02 on one screen and wait for the device to answer
videowall --wait switch enc_02 dec_01

# 3. Zoom that screen into the top left quarter
videowall crop dec_01 --quick top-left

# 4. Spread the camera over a 2x2 block instead
videowall --wait matrix enc_02 2x2 dec_01 dec_02 dec_15 dec_16

# 5. Keep this layout
videowall preset save morning --name "Morning shift"

# 6. Later, bring it back
videowall preset load morning

# 7. See what was sent to the hardware and what it answered
videowall log -n 20

# 8. Start over with an empty wall
videowall clear --all

# If decoders reject the terminal login, find one that works:
videowall credentials try-defaults dec_01 --adopt
"#;
