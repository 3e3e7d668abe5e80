use std::fmt;
use std::str::FromStr;

use image::RgbaImage;
use image::imageops;

/// Padding, in pixels, rendered around every tile and cropped afterwards so
/// neighbouring tiles do not show seams.
pub const GHOST: u32 = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TileParseError {
    Syntax(String),
    ZeroCount,
    OutOfRange { index: u32, count: u32 },
}

impl fmt::Display for TileParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TileParseError::Syntax(raw) => write!(f, "expected \"i of N\", got {raw:?}"),
            TileParseError::ZeroCount => write!(f, "tile count must be at least 1"),
            TileParseError::OutOfRange { index, count } => {
                write!(f, "tile index {index} is outside 0..{count}")
            }
        }
    }
}

impl std::error::Error for TileParseError {}

/// One axis of a tile grid: tile `index` of `count`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TileSpec {
    pub index: u32,
    pub count: u32,
}

impl TileSpec {
    pub fn new(index: u32, count: u32) -> Result<Self, TileParseError> {
        if count == 0 {
            return Err(TileParseError::ZeroCount);
        }
        if index >= count {
            return Err(TileParseError::OutOfRange { index, count });
        }
        Ok(Self { index, count })
    }

    /// The whole image as a single tile.
    pub fn whole() -> Self {
        Self { index: 0, count: 1 }
    }

    fn span(self) -> (f64, f64) {
        let count = f64::from(self.count);
        (
            f64::from(self.index) / count,
            f64::from(self.index + 1) / count,
        )
    }
}

impl FromStr for TileSpec {
    type Err = TileParseError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let syntax = || TileParseError::Syntax(raw.to_string());
        let (index, count) = raw.split_once("of").ok_or_else(syntax)?;
        let index = index.trim().parse::<u32>().map_err(|_| syntax())?;
        let count = count.trim().parse::<u32>().map_err(|_| syntax())?;
        TileSpec::new(index, count)
    }
}

impl fmt::Display for TileSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} of {}", self.index, self.count)
    }
}

/// Normalized camera image window for one tile, padded by `ghost` pixels on
/// every side.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct TileWindow {
    pub start: [f64; 2],
    pub end: [f64; 2],
    pub ghost: u32,
}

impl TileWindow {
    pub fn compute(row: TileSpec, col: TileSpec, width: u32, height: u32, ghost: u32) -> Self {
        let (start_x, end_x) = col.span();
        let (start_y, end_y) = row.span();
        let dx = (end_x - start_x) / f64::from(width);
        let dy = (end_y - start_y) / f64::from(height);
        let g = f64::from(ghost);
        Self {
            start: [start_x - g * dx, start_y - g * dy],
            end: [end_x + g * dx, end_y + g * dy],
            ghost,
        }
    }

    pub fn image_start(&self) -> [f32; 2] {
        [self.start[0] as f32, self.start[1] as f32]
    }

    pub fn image_end(&self) -> [f32; 2] {
        [self.end[0] as f32, self.end[1] as f32]
    }

    /// Framebuffer size needed for a `width` x `height` tile, `None` when
    /// the padding overflows.
    pub fn padded_size(&self, width: u32, height: u32) -> Option<(u32, u32)> {
        let pad = self.ghost.checked_mul(2)?;
        Some((width.checked_add(pad)?, height.checked_add(pad)?))
    }
}

/// Removes `ghost` pixels from every side of `image`.
pub fn crop_ghost(image: &RgbaImage, ghost: u32) -> RgbaImage {
    let (w, h) = image.dimensions();
    let width = w.saturating_sub(2 * ghost);
    let height = h.saturating_sub(2 * ghost);
    imageops::crop_imm(image, ghost, ghost, width, height).to_image()
}
