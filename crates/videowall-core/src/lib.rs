//! Core types and logic for videowall.
//!
//! This crate models a wall of display decoders fed by a fixed set of video
//! encoders. It is pure data: nothing here opens a socket. The daemon in
//! `videowall-cli` drives devices from the intents this crate produces.
//!
//! # Modules
//!
//! - [`geometry`]: crop rectangles, validation and NxM tiling
//! - [`topology`]: encoders, decoders, matrix groups, presets and the store
//! - [`intent`]: device operations independent of transport dialect
//! - [`preset`]: preset persistence contract
//! - [`error`]: topology errors and operator-facing API errors
//! - [`protocol`]: JSON-line request/response protocol
//!
//! # Matrix tiling
//!
//! A matrix over decoders at grid positions `(0,0) (0,1) (1,0) (1,1)` showing
//! a 1920x1080 source yields:
//!
//! | Position | Crop (x, y, w, h) |
//! |----------|-------------------|
//! | (0,0) | 0, 0, 960, 540 |
//! | (0,1) | 960, 0, 960, 540 |
//! | (1,0) | 0, 540, 960, 540 |
//! | (1,1) | 960, 540, 960, 540 |
//!
//! regardless of the order the decoders were selected in.

pub mod error;
pub mod geometry;
pub mod intent;
pub mod preset;
pub mod protocol;
pub mod topology;
