//! Scene-graph orchestration for the tile renderer: builders for the park's
//! native objects, overlay hot-swapping, per-request lighting and the pooled
//! scenes that render tiles.

pub mod builders;
pub mod city;
pub mod environment;
pub mod error;
pub mod lighting;
pub mod park;
pub mod pool;
pub mod request;
pub mod scene;
pub mod tile;

pub use builders::{Colormap, Observation, Scoped, Terrain};
pub use city::{Background, Bounds, Building, City};
pub use environment::Environment;
pub use error::SceneError;
pub use lighting::{Ephemeris, LightKind, SolarEphemeris};
pub use park::{EnvironmentLayout, Park, ParkLayout, SharedPark};
pub use pool::{ScenePool, render_pooled, teardown, warm_up};
pub use request::{
    DEFAULT_HOUR, MAX_HOUR_OFFSET, MAX_TILE_SIZE, RenderTimings, RenderingRequest,
    RenderingResponse, RequestError, parse_tile_pair, parse_vec3,
};
pub use scene::{Scene, SceneSettings};
pub use tile::{GHOST, TileParseError, TileSpec, TileWindow, crop_ghost};
