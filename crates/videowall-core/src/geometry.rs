//! Crop geometry: region validation and NxM tiling of a source frame.
//!
//! All arithmetic is integer. Tiling uses plain division, so when the frame
//! size is not a multiple of the grid shape the leftover pixels on the right
//! and bottom edges are not covered by any tile:
//!
//! | Frame | Grid | Tile | Uncovered |
//! |-------|------|------|-----------|
//! | 1920x1080 | 2x2 | 960x540 | none |
//! | 1920x1080 | 3x7 | 274x360 | 2 columns |
//!
//! Decoders rely on that exact layout, so the remainder is never spread over
//! the tiles.

use serde::{Deserialize, Serialize};

use crate::error::WallError;

/// An absolute crop rectangle within a source frame.
///
/// A region that is not `enabled` means "full frame, no crop", the same as no
/// region at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CropRegion {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    pub source_width: i32,
    pub source_height: i32,
    pub enabled: bool,
}

impl CropRegion {
    /// An enabled region computed against a `frame_width`x`frame_height` source.
    pub fn new(x: i32, y: i32, width: i32, height: i32, frame_width: i32, frame_height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            source_width: frame_width,
            source_height: frame_height,
            enabled: true,
        }
    }

    /// The whole frame, enabled.
    pub fn full_frame(frame_width: i32, frame_height: i32) -> Self {
        Self::new(0, 0, frame_width, frame_height, frame_width, frame_height)
    }

    /// Build a region from fractions of the frame (`0.0..=1.0` each).
    ///
    /// Offsets and sizes are truncated toward zero.
    pub fn from_fractions(
        px: f64,
        py: f64,
        pw: f64,
        ph: f64,
        frame_width: i32,
        frame_height: i32,
    ) -> Self {
        let fw = f64::from(frame_width);
        let fh = f64::from(frame_height);
        Self::new(
            (px * fw) as i32,
            (py * fh) as i32,
            (pw * fw) as i32,
            (ph * fh) as i32,
            frame_width,
            frame_height,
        )
    }

    /// Validate against the frame the region claims to be computed for.
    pub fn validate(&self) -> Result<(), WallError> {
        validate(self, self.source_width, self.source_height)
    }

    /// True when this region actually crops something.
    pub fn is_active(&self) -> bool {
        self.enabled
    }
}

/// Check the crop invariants against a `frame_width`x`frame_height` frame.
pub fn validate(region: &CropRegion, frame_width: i32, frame_height: i32) -> Result<(), WallError> {
    if frame_width <= 0 || frame_height <= 0 {
        return Err(WallError::InvalidRegion(format!(
            "frame {}x{} must have positive size",
            frame_width, frame_height
        )));
    }
    if region.x < 0 || region.y < 0 {
        return Err(WallError::InvalidRegion(format!(
            "offset ({}, {}) must not be negative",
            region.x, region.y
        )));
    }
    if region.width <= 0 || region.height <= 0 {
        return Err(WallError::InvalidRegion(format!(
            "size {}x{} must be positive",
            region.width, region.height
        )));
    }
    // Widen before adding so extreme inputs cannot wrap.
    if i64::from(region.x) + i64::from(region.width) > i64::from(frame_width)
        || i64::from(region.y) + i64::from(region.height) > i64::from(frame_height)
    {
        return Err(WallError::InvalidRegion(format!(
            "rectangle ({}, {}, {}, {}) exceeds frame {}x{}",
            region.x, region.y, region.width, region.height, frame_width, frame_height
        )));
    }
    Ok(())
}

/// One cell of a tiled frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tile {
    pub row: u32,
    pub col: u32,
    pub region: CropRegion,
}

/// Split a frame into `rows`x`cols` equal tiles, row-major, zero-based.
///
/// `tile_width = frame_width / cols` and `tile_height = frame_height / rows`;
/// remainder pixels are dropped.
pub fn tile(frame_width: i32, frame_height: i32, rows: u32, cols: u32) -> Result<Vec<Tile>, WallError> {
    if rows == 0 || cols == 0 {
        return Err(WallError::InvalidRegion(format!(
            "grid {}x{} must have at least one row and one column",
            rows, cols
        )));
    }
    if frame_width <= 0 || frame_height <= 0 {
        return Err(WallError::InvalidRegion(format!(
            "frame {}x{} must have positive size",
            frame_width, frame_height
        )));
    }

    let cols_i = i32::try_from(cols).unwrap_or(i32::MAX);
    let rows_i = i32::try_from(rows).unwrap_or(i32::MAX);
    let tile_width = frame_width / cols_i;
    let tile_height = frame_height / rows_i;
    if tile_width == 0 || tile_height == 0 {
        return Err(WallError::InvalidRegion(format!(
            "frame {}x{} is too small for a {}x{} grid",
            frame_width, frame_height, rows, cols
        )));
    }

    let mut tiles = Vec::with_capacity(rows as usize * cols as usize);
    for row in 0..rows_i {
        for col in 0..cols_i {
            tiles.push(Tile {
                row: row as u32,
                col: col as u32,
                region: CropRegion::new(
                    col * tile_width,
                    row * tile_height,
                    tile_width,
                    tile_height,
                    frame_width,
                    frame_height,
                ),
            });
        }
    }
    Ok(tiles)
}

/// Fraction of the frame (`0.0..=1.0`) covered by `region`.
///
/// Returns 0.0 for a degenerate frame.
#[must_use]
pub fn coverage(region: &CropRegion, frame_width: i32, frame_height: i32) -> f64 {
    let frame_area = f64::from(frame_width) * f64::from(frame_height);
    if frame_area <= 0.0 {
        return 0.0;
    }
    let area = f64::from(region.width.max(0)) * f64::from(region.height.max(0));
    area / frame_area
}

/// Named crop shortcuts expressed as fractions of the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[serde(rename_all = "snake_case")]
pub enum QuickCrop {
    FullFrame,
    Center,
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
    Left,
    Right,
    Top,
    Bottom,
}

impl QuickCrop {
    pub const ALL: [QuickCrop; 10] = [
        QuickCrop::FullFrame,
        QuickCrop::Center,
        QuickCrop::TopLeft,
        QuickCrop::TopRight,
        QuickCrop::BottomLeft,
        QuickCrop::BottomRight,
        QuickCrop::Left,
        QuickCrop::Right,
        QuickCrop::Top,
        QuickCrop::Bottom,
    ];

    /// `(x, y, width, height)` as fractions of the frame.
    pub fn fractions(self) -> (f64, f64, f64, f64) {
        match self {
            QuickCrop::FullFrame => (0.0, 0.0, 1.0, 1.0),
            QuickCrop::Center => (0.25, 0.25, 0.5, 0.5),
            QuickCrop::TopLeft => (0.0, 0.0, 0.5, 0.5),
            QuickCrop::TopRight => (0.5, 0.0, 0.5, 0.5),
            QuickCrop::BottomLeft => (0.0, 0.5, 0.5, 0.5),
            QuickCrop::BottomRight => (0.5, 0.5, 0.5, 0.5),
            QuickCrop::Left => (0.0, 0.0, 0.5, 1.0),
            QuickCrop::Right => (0.5, 0.0, 0.5, 1.0),
            QuickCrop::Top => (0.0, 0.0, 1.0, 0.5),
            QuickCrop::Bottom => (0.0, 0.5, 1.0, 0.5),
        }
    }

    pub fn region(self, frame_width: i32, frame_height: i32) -> CropRegion {
        let (px, py, pw, ph) = self.fractions();
        CropRegion::from_fractions(px, py, pw, ph, frame_width, frame_height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_accepts_full_frame() {
        let region = CropRegion::full_frame(1920, 1080);
        assert!(validate(&region, 1920, 1080).is_ok());
        assert!(region.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_negative_offsets() {
        let region = CropRegion::new(-1, 0, 100, 100, 1920, 1080);
        assert!(matches!(
            validate(&region, 1920, 1080),
            Err(WallError::InvalidRegion(_))
        ));
        let region = CropRegion::new(0, -5, 100, 100, 1920, 1080);
        assert!(validate(&region, 1920, 1080).is_err());
    }

    #[test]
    fn test_validate_rejects_non_positive_size() {
        for (w, h) in [(0, 10), (10, 0), (-3, 10), (10, -3)] {
            let region = CropRegion::new(0, 0, w, h, 1920, 1080);
            assert!(validate(&region, 1920, 1080).is_err(), "{}x{} accepted", w, h);
        }
    }

    #[test]
    fn test_validate_rejects_out_of_bounds() {
        let region = CropRegion::new(961, 0, 960, 540, 1920, 1080);
        assert!(validate(&region, 1920, 1080).is_err());
        let region = CropRegion::new(0, 541, 960, 540, 1920, 1080);
        assert!(validate(&region, 1920, 1080).is_err());
        // Touching the edge is fine.
        let region = CropRegion::new(960, 540, 960, 540, 1920, 1080);
        assert!(validate(&region, 1920, 1080).is_ok());
    }

    #[test]
    fn test_validate_does_not_overflow() {
        let region = CropRegion::new(i32::MAX, 0, i32::MAX, 10, 1920, 1080);
        assert!(validate(&region, 1920, 1080).is_err());
    }

    #[test]
    fn test_tile_2x2_full_hd() {
        let tiles = tile(1920, 1080, 2, 2).unwrap();
        let rects: Vec<_> = tiles
            .iter()
            .map(|t| (t.row, t.col, t.region.x, t.region.y, t.region.width, t.region.height))
            .collect();
        assert_eq!(
            rects,
            vec![
                (0, 0, 0, 0, 960, 540),
                (0, 1, 960, 0, 960, 540),
                (1, 0, 0, 540, 960, 540),
                (1, 1, 960, 540, 960, 540),
            ]
        );
    }

    #[test]
    fn test_tile_drops_remainder_pixels() {
        let tiles = tile(1920, 1080, 3, 7).unwrap();
        assert_eq!(tiles.len(), 21);
        for t in &tiles {
            assert_eq!(t.region.width, 1920 / 7);
            assert_eq!(t.region.height, 1080 / 3);
            assert!(t.region.validate().is_ok());
        }
        let last = tiles.last().unwrap();
        // 2 pixel columns on the right stay uncovered.
        assert_eq!(last.region.x + last.region.width, 1918);
        assert_eq!(last.region.y + last.region.height, 1080);
    }

    #[test]
    fn test_tile_shape_properties() {
        for (w, h) in [(1920, 1080), (3840, 2160), (1280, 720), (7, 5)] {
            for rows in 1..=5u32 {
                for cols in 1..=5u32 {
                    let tiles = tile(w, h, rows, cols).unwrap();
                    assert_eq!(tiles.len(), (rows * cols) as usize);
                    assert_eq!((tiles[0].region.x, tiles[0].region.y), (0, 0));
                    for (i, t) in tiles.iter().enumerate() {
                        assert_eq!(t.row, i as u32 / cols);
                        assert_eq!(t.col, i as u32 % cols);
                        assert_eq!(t.region.width, w / cols as i32);
                        assert_eq!(t.region.height, h / rows as i32);
                        assert!(validate(&t.region, w, h).is_ok());
                    }
                }
            }
        }
    }

    #[test]
    fn test_tile_rejects_empty_grid_and_tiny_frames() {
        assert!(tile(1920, 1080, 0, 2).is_err());
        assert!(tile(1920, 1080, 2, 0).is_err());
        assert!(tile(3, 3, 1, 4).is_err());
        assert!(tile(0, 1080, 1, 1).is_err());
    }

    #[test]
    fn test_coverage() {
        let full = CropRegion::full_frame(1920, 1080);
        assert!((coverage(&full, 1920, 1080) - 1.0).abs() < f64::EPSILON);

        let quarter = CropRegion::new(0, 0, 960, 540, 1920, 1080);
        assert!((coverage(&quarter, 1920, 1080) - 0.25).abs() < f64::EPSILON);

        assert_eq!(coverage(&quarter, 0, 1080), 0.0);
    }

    #[test]
    fn test_quick_crops_are_valid() {
        for quick in QuickCrop::ALL {
            let region = quick.region(1920, 1080);
            assert!(region.validate().is_ok(), "{:?} invalid: {:?}", quick, region);
        }
        assert_eq!(
            QuickCrop::Center.region(1920, 1080),
            CropRegion::new(480, 270, 960, 540, 1920, 1080)
        );
        assert_eq!(
            QuickCrop::Right.region(1920, 1080),
            CropRegion::new(960, 0, 960, 1080, 1920, 1080)
        );
    }
}
