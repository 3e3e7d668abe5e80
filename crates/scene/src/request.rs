use std::fmt;
use std::time::Duration;

use foundation::math::Vec3;
use image::RgbaImage;

use crate::lighting::LightKind;
use crate::tile::{TileParseError, TileSpec};

pub const DEFAULT_HOUR: f64 = 12.0;

/// Largest accepted tile edge in pixels, before ghost padding.
pub const MAX_TILE_SIZE: u32 = 8192;

/// Requests may move the sun at most a century either side of the
/// reference day.
pub const MAX_HOUR_OFFSET: f64 = 100.0 * 366.0 * 24.0;

#[derive(Debug, Clone, PartialEq)]
pub enum RequestError {
    Tile(TileParseError),
    Vector { name: &'static str, value: String },
    Number { name: &'static str, value: String },
    Light(String),
    Missing(&'static str),
    EmptyImage,
    Oversized { width: u32, height: u32 },
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestError::Tile(err) => write!(f, "invalid tile: {err}"),
            RequestError::Vector { name, value } => {
                write!(f, "{name} must be three comma-separated numbers, got {value:?}")
            }
            RequestError::Number { name, value } => write!(f, "invalid {name}: {value:?}"),
            RequestError::Light(value) => {
                write!(f, "unknown light type {value:?} (expected distant or sunSky)")
            }
            RequestError::Missing(name) => write!(f, "missing parameter: {name}"),
            RequestError::EmptyImage => write!(f, "width and height must be at least 1"),
            RequestError::Oversized { width, height } => write!(
                f,
                "tile {width}x{height} exceeds the {MAX_TILE_SIZE}x{MAX_TILE_SIZE} limit"
            ),
        }
    }
}

impl std::error::Error for RequestError {}

impl From<TileParseError> for RequestError {
    fn from(err: TileParseError) -> Self {
        RequestError::Tile(err)
    }
}

/// Parses `"x,y,z"`.
pub fn parse_vec3(name: &'static str, raw: &str) -> Result<Vec3, RequestError> {
    let bad = || RequestError::Vector {
        name,
        value: raw.to_string(),
    };
    let values = raw
        .split(',')
        .map(|part| part.trim().parse::<f64>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| bad())?;
    Vec3::from_slice(&values).ok_or_else(bad)
}

/// Parses `"i of N,j of M"` into `(row, col)`.
pub fn parse_tile_pair(raw: &str) -> Result<(TileSpec, TileSpec), RequestError> {
    let (row, col) = raw
        .split_once(',')
        .ok_or_else(|| TileParseError::Syntax(raw.to_string()))?;
    Ok((row.parse()?, col.parse()?))
}

/// One tile to render.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderingRequest {
    pub width: u32,
    pub height: u32,
    pub row: TileSpec,
    pub col: TileSpec,
    pub position: Vec3,
    pub direction: Vec3,
    pub up: Vec3,
    pub observation: String,
    /// Hours after midnight UTC on the reference day; fractional hours allowed.
    pub hour: f64,
    pub light: LightKind,
    /// Overrides the scene's configured sample count when set.
    pub samples: Option<u32>,
}

impl RenderingRequest {
    pub fn validate(&self) -> Result<(), RequestError> {
        if self.width == 0 || self.height == 0 {
            return Err(RequestError::EmptyImage);
        }
        if self.width > MAX_TILE_SIZE || self.height > MAX_TILE_SIZE {
            return Err(RequestError::Oversized {
                width: self.width,
                height: self.height,
            });
        }
        if !self.hour.is_finite() || self.hour.abs() > MAX_HOUR_OFFSET {
            return Err(RequestError::Number {
                name: "hour",
                value: self.hour.to_string(),
            });
        }
        if self.samples == Some(0) {
            return Err(RequestError::Number {
                name: "samples",
                value: "0".to_string(),
            });
        }
        Ok(())
    }
}

/// Wall-clock time spent in each render stage.
#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub struct RenderTimings {
    pub observation: Duration,
    pub lights: Duration,
    pub render: Duration,
    pub decode: Duration,
}

#[derive(Debug, Clone)]
pub struct RenderingResponse {
    /// Exactly `width` x `height`.
    pub image: RgbaImage,
    pub timings: RenderTimings,
}
