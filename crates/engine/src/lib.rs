//! Native rendering engine seam: handles, typed parameters, data wrapping
//! and the device backends.

pub mod data;
pub mod device;
pub mod handle;
pub mod headless;
#[cfg(feature = "ospray")]
pub mod ospray;
pub mod types;

pub use data::{defer_release, shape3, wrap_array, wrap_array_copied, wrap_handles};
pub use device::{Device, Engine, EngineError, SharedView};
pub use handle::{Handle, ObjectKind};
pub use headless::HeadlessDevice;
#[cfg(feature = "ospray")]
pub use ospray::OsprayDevice;
pub use types::{DataType, FrameBufferFormat, Param, TEXTURE_RGB32F, affine_scale_translate};
