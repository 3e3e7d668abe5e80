use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use foundation::ScopeClosed;
use tracing::info;

use crate::handle::{Handle, ObjectKind};
use crate::types::{DataType, FrameBufferFormat, Param};

#[derive(Debug, Clone, PartialEq)]
pub enum EngineError {
    Load { library: String, reason: String },
    MissingSymbol(String),
    Init { code: i32 },
    Module { name: String, code: i32 },
    NullObject(ObjectKind),
    InvalidHandle(Handle),
    WrongKind { handle: Handle, expected: ObjectKind, found: ObjectKind },
    Unsupported(String),
    ShapeMismatch { expected: usize, actual: usize },
    Render(String),
    InvalidName(String),
    ShutDown,
    ScopeClosed,
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Load { library, reason } => {
                write!(f, "failed to load engine library {library}: {reason}")
            }
            EngineError::MissingSymbol(name) => write!(f, "engine symbol missing: {name}"),
            EngineError::Init { code } => write!(f, "engine init failed with code {code}"),
            EngineError::Module { name, code } => {
                write!(f, "engine module {name} failed to load with code {code}")
            }
            EngineError::NullObject(kind) => {
                write!(f, "engine returned a null {} object", kind.as_str())
            }
            EngineError::InvalidHandle(h) => write!(f, "invalid engine handle {h}"),
            EngineError::WrongKind {
                handle,
                expected,
                found,
            } => write!(
                f,
                "handle {handle} is a {}, expected a {}",
                found.as_str(),
                expected.as_str()
            ),
            EngineError::Unsupported(what) => write!(f, "unsupported by device: {what}"),
            EngineError::ShapeMismatch { expected, actual } => {
                write!(
                    f,
                    "array byte length mismatch: expected={expected} actual={actual}"
                )
            }
            EngineError::Render(reason) => write!(f, "render failed: {reason}"),
            EngineError::InvalidName(name) => write!(f, "invalid parameter name: {name:?}"),
            EngineError::ShutDown => write!(f, "engine has been shut down"),
            EngineError::ScopeClosed => write!(f, "resource scope is closed"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<ScopeClosed> for EngineError {
    fn from(_: ScopeClosed) -> Self {
        EngineError::ScopeClosed
    }
}

/// Non-owning description of host memory handed to the engine as shared data.
#[derive(Debug, Copy, Clone)]
pub struct SharedView {
    pub ptr: *const u8,
    pub ty: DataType,
    pub shape: [usize; 3],
    /// Byte strides per axis.
    pub strides: [i64; 3],
}

// SAFETY: a view is inert data; reading through it is governed by the
// contract of `Device::new_shared_data`.
unsafe impl Send for SharedView {}
unsafe impl Sync for SharedView {}

impl SharedView {
    /// Dense view over `shape` elements of `ty` starting at `ptr`.
    pub fn dense(ptr: *const u8, ty: DataType, shape: [usize; 3]) -> Self {
        let s0 = ty.size() as i64;
        let s1 = s0 * shape[0] as i64;
        let s2 = s1 * shape[1] as i64;
        Self {
            ptr,
            ty,
            shape,
            strides: [s0, s1, s2],
        }
    }

    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The native rendering engine seam.
///
/// Objects are reference counted by the engine: creation returns one
/// reference, object parameters and object arrays hold their own references,
/// and `release` drops one. Callers pair every creation with exactly one
/// release.
pub trait Device: Send + Sync {
    fn name(&self) -> &str;

    fn load_module(&self, name: &str) -> Result<(), EngineError>;

    /// Creates a scene-graph object. `subtype` selects the implementation
    /// (e.g. `mesh`, `perspective`, `distant`) and is ignored by kinds that
    /// have none (groups, instances, worlds, geometric models).
    fn new_object(&self, kind: ObjectKind, subtype: &str) -> Result<Handle, EngineError>;

    /// Creates a data object that reads directly from host memory.
    ///
    /// # Safety
    /// The memory described by `view` must stay valid and unmodified until
    /// the returned handle, and every object that references it, has been
    /// released.
    unsafe fn new_shared_data(&self, view: SharedView) -> Result<Handle, EngineError>;

    /// Creates an engine-owned data object of the given shape.
    fn new_data(&self, ty: DataType, shape: [usize; 3]) -> Result<Handle, EngineError>;

    fn copy_data(&self, src: Handle, dst: Handle) -> Result<(), EngineError>;

    /// Creates an engine-owned array of object references. The array holds
    /// its own reference to every item.
    fn new_object_data(&self, ty: DataType, items: &[Handle]) -> Result<Handle, EngineError>;

    fn new_framebuffer(
        &self,
        width: u32,
        height: u32,
        format: FrameBufferFormat,
    ) -> Result<Handle, EngineError>;

    fn set_param(&self, object: Handle, name: &str, value: Param) -> Result<(), EngineError>;

    fn commit(&self, object: Handle) -> Result<(), EngineError>;

    fn retain(&self, object: Handle);

    fn release(&self, object: Handle);

    /// Renders one frame and blocks until it is finished. Returns the
    /// frame's variance estimate.
    fn render_frame(
        &self,
        framebuffer: Handle,
        renderer: Handle,
        camera: Handle,
        world: Handle,
    ) -> Result<f32, EngineError>;

    /// Maps the colour channel, copies it out and unmaps it.
    fn read_color(&self, framebuffer: Handle) -> Result<Vec<u8>, EngineError>;

    /// Tears down process-global engine state. Called once, after every
    /// object has been released.
    fn shutdown(&self);
}

/// Process-scoped engine state: the device plus its init/shutdown lifecycle.
///
/// Built once before any scene exists and shut down once at exit; scenes and
/// pools receive the device from here instead of reading a global.
pub struct Engine {
    device: Arc<dyn Device>,
    shut_down: AtomicBool,
}

impl Engine {
    pub fn init(device: Arc<dyn Device>, modules: &[String]) -> Result<Self, EngineError> {
        for module in modules {
            device.load_module(module)?;
        }
        info!(device = device.name(), ?modules, "engine initialized");
        Ok(Self {
            device,
            shut_down: AtomicBool::new(false),
        })
    }

    pub fn device(&self) -> Arc<dyn Device> {
        self.device.clone()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.device.shutdown();
        info!(device = self.device.name(), "engine shut down");
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("device", &self.device.name())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{Engine, SharedView};
    use crate::headless::HeadlessDevice;
    use crate::types::DataType;
    use std::sync::Arc;

    #[test]
    fn dense_view_strides_follow_shape() {
        let view = SharedView::dense(std::ptr::null(), DataType::Vec3F, [4, 2, 1]);
        assert_eq!(view.strides, [12, 48, 96]);
        assert_eq!(view.len(), 8);
    }

    #[test]
    fn engine_shutdown_runs_once() {
        let device = Arc::new(HeadlessDevice::new());
        let engine = Engine::init(device.clone(), &["denoiser".to_string()]).unwrap();
        assert_eq!(device.loaded_modules(), vec!["denoiser".to_string()]);

        engine.shutdown();
        engine.shutdown();
        drop(engine);
        assert_eq!(device.shutdown_count(), 1);
    }
}
