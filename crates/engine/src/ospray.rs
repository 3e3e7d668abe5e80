//! Runtime binding to `libospray` (OSPRay 3 C API).

use std::collections::BTreeMap;
use std::ffi::{CString, c_char, c_void};
use std::sync::atomic::{AtomicBool, Ordering};

use libloading::Library;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::device::{Device, EngineError, SharedView};
use crate::handle::{Handle, ObjectKind};
use crate::types::{DataType, FrameBufferFormat, OBJECT_BASE, Param};

type Raw = *mut c_void;

const OSP_BOOL: u32 = 250;
const OSP_STRING: u32 = 1500;
const OSP_INT: u32 = 4000;
const OSP_UINT: u32 = 4500;
const OSP_FLOAT: u32 = 6000;
const OSP_VEC2F: u32 = 6001;
const OSP_VEC3F: u32 = 6002;
const OSP_VEC4F: u32 = 6003;
const OSP_AFFINE3F: u32 = 12003;
const OSP_FB_COLOR: u32 = 1;
const OSP_TASK_FINISHED: i32 = 100_000;

type NewByType = unsafe extern "C" fn(*const c_char) -> Raw;
type NewPlain = unsafe extern "C" fn() -> Raw;
type NewWith = unsafe extern "C" fn(Raw) -> Raw;

struct Api {
    init: unsafe extern "C" fn(*mut i32, *const *const c_char) -> i32,
    load_module: unsafe extern "C" fn(*const c_char) -> i32,
    shutdown: unsafe extern "C" fn(),
    new_camera: NewByType,
    new_geometry: NewByType,
    new_light: NewByType,
    new_material: NewByType,
    new_renderer: NewByType,
    new_texture: NewByType,
    new_image_operation: NewByType,
    new_geometric_model: NewWith,
    new_instance: NewWith,
    new_group: NewPlain,
    new_world: NewPlain,
    new_shared_data: unsafe extern "C" fn(
        *const c_void,
        u32,
        u64,
        i64,
        u64,
        i64,
        u64,
        i64,
        *const c_void,
        *const c_void,
    ) -> Raw,
    new_data: unsafe extern "C" fn(u32, u64, u64, u64) -> Raw,
    copy_data: unsafe extern "C" fn(Raw, Raw, u64, u64, u64),
    new_framebuffer: unsafe extern "C" fn(i32, i32, u32, u32) -> Raw,
    set_param: unsafe extern "C" fn(Raw, *const c_char, u32, *const c_void),
    commit: unsafe extern "C" fn(Raw),
    retain: unsafe extern "C" fn(Raw),
    release: unsafe extern "C" fn(Raw),
    render_frame: unsafe extern "C" fn(Raw, Raw, Raw, Raw) -> Raw,
    wait: unsafe extern "C" fn(Raw, i32),
    get_variance: unsafe extern "C" fn(Raw) -> f32,
    map_framebuffer: unsafe extern "C" fn(Raw, u32) -> *const c_void,
    unmap_framebuffer: unsafe extern "C" fn(*const c_void, Raw),
}

macro_rules! symbol {
    ($lib:expr, $name:literal) => {{
        // SAFETY: the declared signature matches the OSPRay 3 header.
        let sym = unsafe { $lib.get(concat!($name, "\0").as_bytes()) }
            .map_err(|_| EngineError::MissingSymbol($name.to_string()))?;
        *sym
    }};
}

/// OSPRay loaded from a shared library at runtime.
pub struct OsprayDevice {
    api: Api,
    /// Framebuffer dimensions, which OSPRay does not expose.
    sizes: Mutex<BTreeMap<Handle, (u32, u32)>>,
    shut_down: AtomicBool,
    // Dropped last: every function pointer in `api` points into it.
    _library: Library,
}

// SAFETY: OSPRay's API is thread-safe for distinct objects, and the scene
// layer never shares a scene's objects between threads without a lock.
unsafe impl Send for OsprayDevice {}
unsafe impl Sync for OsprayDevice {}

impl OsprayDevice {
    /// Loads `library` (e.g. `libospray.so`) and runs `ospInit`.
    pub fn load(library: &str) -> Result<Self, EngineError> {
        // SAFETY: loading OSPRay runs its static initializers, which have no
        // preconditions.
        let lib = unsafe { Library::new(library) }.map_err(|e| EngineError::Load {
            library: library.to_string(),
            reason: e.to_string(),
        })?;

        let api = Api {
            init: symbol!(lib, "ospInit"),
            load_module: symbol!(lib, "ospLoadModule"),
            shutdown: symbol!(lib, "ospShutdown"),
            new_camera: symbol!(lib, "ospNewCamera"),
            new_geometry: symbol!(lib, "ospNewGeometry"),
            new_light: symbol!(lib, "ospNewLight"),
            new_material: symbol!(lib, "ospNewMaterial"),
            new_renderer: symbol!(lib, "ospNewRenderer"),
            new_texture: symbol!(lib, "ospNewTexture"),
            new_image_operation: symbol!(lib, "ospNewImageOperation"),
            new_geometric_model: symbol!(lib, "ospNewGeometricModel"),
            new_instance: symbol!(lib, "ospNewInstance"),
            new_group: symbol!(lib, "ospNewGroup"),
            new_world: symbol!(lib, "ospNewWorld"),
            new_shared_data: symbol!(lib, "ospNewSharedData"),
            new_data: symbol!(lib, "ospNewData"),
            copy_data: symbol!(lib, "ospCopyData"),
            new_framebuffer: symbol!(lib, "ospNewFrameBuffer"),
            set_param: symbol!(lib, "ospSetParam"),
            commit: symbol!(lib, "ospCommit"),
            retain: symbol!(lib, "ospRetain"),
            release: symbol!(lib, "ospRelease"),
            render_frame: symbol!(lib, "ospRenderFrame"),
            wait: symbol!(lib, "ospWait"),
            get_variance: symbol!(lib, "ospGetVariance"),
            map_framebuffer: symbol!(lib, "ospMapFrameBuffer"),
            unmap_framebuffer: symbol!(lib, "ospUnmapFrameBuffer"),
        };

        // SAFETY: null argc/argv asks OSPRay to read its environment only.
        let code = unsafe { (api.init)(std::ptr::null_mut(), std::ptr::null()) };
        if code != 0 {
            return Err(EngineError::Init { code });
        }
        info!(library, "ospray initialized");

        Ok(Self {
            api,
            sizes: Mutex::new(BTreeMap::new()),
            shut_down: AtomicBool::new(false),
            _library: lib,
        })
    }

    fn live(&self) -> Result<(), EngineError> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(EngineError::ShutDown);
        }
        Ok(())
    }

    fn wrap(kind: ObjectKind, raw: Raw) -> Result<Handle, EngineError> {
        Handle::from_raw(raw as usize).ok_or(EngineError::NullObject(kind))
    }
}

fn raw(handle: Handle) -> Raw {
    handle.as_raw() as Raw
}

fn c_string(value: &str) -> Result<CString, EngineError> {
    CString::new(value).map_err(|_| EngineError::InvalidName(value.to_string()))
}

impl Device for OsprayDevice {
    fn name(&self) -> &str {
        "ospray"
    }

    fn load_module(&self, name: &str) -> Result<(), EngineError> {
        self.live()?;
        let c_name = c_string(name)?;
        // SAFETY: `c_name` is a valid NUL-terminated string for the call.
        let code = unsafe { (self.api.load_module)(c_name.as_ptr()) };
        if code != 0 {
            return Err(EngineError::Module {
                name: name.to_string(),
                code,
            });
        }
        debug!(module = name, "ospray module loaded");
        Ok(())
    }

    fn new_object(&self, kind: ObjectKind, subtype: &str) -> Result<Handle, EngineError> {
        self.live()?;
        let c_type = c_string(subtype)?;
        let ty = c_type.as_ptr();
        // SAFETY: constructors take a NUL-terminated type name or a null
        // parent and return a new reference or null.
        let raw = unsafe {
            match kind {
                ObjectKind::Camera => (self.api.new_camera)(ty),
                ObjectKind::Geometry => (self.api.new_geometry)(ty),
                ObjectKind::Light => (self.api.new_light)(ty),
                ObjectKind::Material => (self.api.new_material)(ty),
                ObjectKind::Renderer => (self.api.new_renderer)(ty),
                ObjectKind::Texture => (self.api.new_texture)(ty),
                ObjectKind::ImageOperation => (self.api.new_image_operation)(ty),
                ObjectKind::GeometricModel => (self.api.new_geometric_model)(std::ptr::null_mut()),
                ObjectKind::Instance => (self.api.new_instance)(std::ptr::null_mut()),
                ObjectKind::Group => (self.api.new_group)(),
                ObjectKind::World => (self.api.new_world)(),
                ObjectKind::Data | ObjectKind::FrameBuffer => {
                    return Err(EngineError::Unsupported(format!(
                        "{} objects have dedicated constructors",
                        kind.as_str()
                    )));
                }
            }
        };
        Self::wrap(kind, raw)
    }

    unsafe fn new_shared_data(&self, view: SharedView) -> Result<Handle, EngineError> {
        self.live()?;
        let [n1, n2, n3] = view.shape;
        let [s1, s2, s3] = view.strides;
        // SAFETY: the caller guarantees the memory outlives the data object.
        let raw = unsafe {
            (self.api.new_shared_data)(
                view.ptr.cast(),
                view.ty.code(),
                n1 as u64,
                s1,
                n2 as u64,
                s2,
                n3 as u64,
                s3,
                std::ptr::null(),
                std::ptr::null(),
            )
        };
        Self::wrap(ObjectKind::Data, raw)
    }

    fn new_data(&self, ty: DataType, shape: [usize; 3]) -> Result<Handle, EngineError> {
        self.live()?;
        // SAFETY: plain constructor.
        let raw = unsafe {
            (self.api.new_data)(ty.code(), shape[0] as u64, shape[1] as u64, shape[2] as u64)
        };
        Self::wrap(ObjectKind::Data, raw)
    }

    fn copy_data(&self, src: Handle, dst: Handle) -> Result<(), EngineError> {
        self.live()?;
        // SAFETY: both handles are live data objects owned by the caller.
        unsafe { (self.api.copy_data)(raw(src), raw(dst), 0, 0, 0) };
        Ok(())
    }

    fn new_object_data(&self, ty: DataType, items: &[Handle]) -> Result<Handle, EngineError> {
        if ty.object_kind().is_none() {
            return Err(EngineError::Unsupported(format!("{ty:?} object array")));
        }
        let pointers: Vec<usize> = items.iter().map(|h| h.as_raw()).collect();
        let view = SharedView::dense(pointers.as_ptr().cast(), ty, [pointers.len(), 1, 1]);
        // SAFETY: `pointers` outlives `shared`, released below after the copy.
        let shared = unsafe { self.new_shared_data(view)? };
        let owned = match self.new_data(ty, view.shape) {
            Ok(owned) => owned,
            Err(err) => {
                self.release(shared);
                return Err(err);
            }
        };
        let copied = self.copy_data(shared, owned);
        self.release(shared);
        if let Err(err) = copied {
            self.release(owned);
            return Err(err);
        }
        Ok(owned)
    }

    fn new_framebuffer(
        &self,
        width: u32,
        height: u32,
        format: FrameBufferFormat,
    ) -> Result<Handle, EngineError> {
        self.live()?;
        // SAFETY: plain constructor.
        let raw = unsafe {
            (self.api.new_framebuffer)(width as i32, height as i32, format.code(), OSP_FB_COLOR)
        };
        let handle = Self::wrap(ObjectKind::FrameBuffer, raw)?;
        self.sizes.lock().insert(handle, (width, height));
        Ok(handle)
    }

    fn set_param(&self, object: Handle, name: &str, value: Param) -> Result<(), EngineError> {
        self.live()?;
        let c_name = c_string(name)?;
        let obj = raw(object);
        let id = c_name.as_ptr();
        let set = self.api.set_param;
        // SAFETY: each arm passes a pointer to a value of the declared type
        // that lives for the duration of the call; OSPRay copies it.
        unsafe {
            match &value {
                Param::Object(h) => {
                    let ptr = raw(*h);
                    set(obj, id, OBJECT_BASE, (&ptr as *const Raw).cast());
                }
                Param::Bool(b) => {
                    let v = i32::from(*b);
                    set(obj, id, OSP_BOOL, (&v as *const i32).cast());
                }
                Param::Int(v) => set(obj, id, OSP_INT, (v as *const i32).cast()),
                Param::UInt(v) => set(obj, id, OSP_UINT, (v as *const u32).cast()),
                Param::Float(v) => set(obj, id, OSP_FLOAT, (v as *const f32).cast()),
                Param::Vec2f(v) => set(obj, id, OSP_VEC2F, v.as_ptr().cast()),
                Param::Vec3f(v) => set(obj, id, OSP_VEC3F, v.as_ptr().cast()),
                Param::Vec4f(v) => set(obj, id, OSP_VEC4F, v.as_ptr().cast()),
                Param::Affine3f(v) => set(obj, id, OSP_AFFINE3F, v.as_ptr().cast()),
                Param::String(s) => {
                    let c_value = c_string(s)?;
                    set(obj, id, OSP_STRING, c_value.as_ptr().cast());
                }
            }
        }
        Ok(())
    }

    fn commit(&self, object: Handle) -> Result<(), EngineError> {
        self.live()?;
        // SAFETY: live handle owned by the caller.
        unsafe { (self.api.commit)(raw(object)) };
        Ok(())
    }

    fn retain(&self, object: Handle) {
        // SAFETY: live handle owned by the caller.
        unsafe { (self.api.retain)(raw(object)) };
    }

    fn release(&self, object: Handle) {
        self.sizes.lock().remove(&object);
        // SAFETY: the caller releases each reference exactly once.
        unsafe { (self.api.release)(raw(object)) };
    }

    fn render_frame(
        &self,
        framebuffer: Handle,
        renderer: Handle,
        camera: Handle,
        world: Handle,
    ) -> Result<f32, EngineError> {
        self.live()?;
        // SAFETY: all four handles are live and committed by the caller.
        unsafe {
            let future = (self.api.render_frame)(
                raw(framebuffer),
                raw(renderer),
                raw(camera),
                raw(world),
            );
            if future.is_null() {
                return Err(EngineError::Render("ospRenderFrame returned null".into()));
            }
            (self.api.wait)(future, OSP_TASK_FINISHED);
            (self.api.release)(future);
            Ok((self.api.get_variance)(raw(framebuffer)))
        }
    }

    fn read_color(&self, framebuffer: Handle) -> Result<Vec<u8>, EngineError> {
        self.live()?;
        let (width, height) = self
            .sizes
            .lock()
            .get(&framebuffer)
            .copied()
            .ok_or(EngineError::InvalidHandle(framebuffer))?;
        let len = width as usize * height as usize * 4;
        // SAFETY: the mapping covers `len` bytes of RGBA8/SRGBA colour and is
        // unmapped before returning.
        unsafe {
            let mapped = (self.api.map_framebuffer)(raw(framebuffer), OSP_FB_COLOR);
            if mapped.is_null() {
                return Err(EngineError::Render("framebuffer map returned null".into()));
            }
            let pixels = std::slice::from_raw_parts(mapped.cast::<u8>(), len).to_vec();
            (self.api.unmap_framebuffer)(mapped, raw(framebuffer));
            Ok(pixels)
        }
    }

    fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        // SAFETY: called once, after all objects are released.
        unsafe { (self.api.shutdown)() };
        info!("ospray shut down");
    }
}
