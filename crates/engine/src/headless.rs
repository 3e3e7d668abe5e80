use std::collections::BTreeMap;
use std::num::NonZeroUsize;

use parking_lot::Mutex;
use tracing::{debug, error};

use crate::device::{Device, EngineError, SharedView};
use crate::handle::{Handle, ObjectKind};
use crate::types::{DataType, FrameBufferFormat, Param};

const RENDERERS: [&str; 3] = ["scivis", "ao", "pathtracer"];

#[derive(Debug)]
enum Payload {
    None,
    Shared { view: SharedView },
    Owned { ty: DataType, shape: [usize; 3], bytes: Vec<u8> },
    Objects { items: Vec<Handle> },
    Frame { width: u32, height: u32, pixels: Vec<u8> },
}

#[derive(Debug)]
struct Object {
    kind: ObjectKind,
    subtype: String,
    refs: usize,
    commits: u32,
    params: BTreeMap<String, Param>,
    payload: Payload,
}

impl Object {
    fn new(kind: ObjectKind, subtype: &str, payload: Payload) -> Self {
        Self {
            kind,
            subtype: subtype.to_string(),
            refs: 1,
            commits: 0,
            params: BTreeMap::new(),
            payload,
        }
    }

    /// Handles this object holds references to.
    fn children(&self) -> Vec<Handle> {
        let mut out: Vec<Handle> = self.params.values().filter_map(Param::as_object).collect();
        if let Payload::Objects { items, .. } = &self.payload {
            out.extend(items.iter().copied());
        }
        out
    }
}

#[derive(Debug, Default)]
struct State {
    next: usize,
    objects: BTreeMap<Handle, Object>,
    created: BTreeMap<ObjectKind, u64>,
    modules: Vec<String>,
    invalid_releases: u64,
    frames: u64,
    shutdowns: u32,
}

impl State {
    fn insert(&mut self, object: Object) -> Handle {
        let handle = Handle::from_nonzero(NonZeroUsize::MIN.saturating_add(self.next));
        self.next += 1;
        *self.created.entry(object.kind).or_default() += 1;
        self.objects.insert(handle, object);
        handle
    }

    fn get(&self, handle: Handle) -> Result<&Object, EngineError> {
        self.objects
            .get(&handle)
            .ok_or(EngineError::InvalidHandle(handle))
    }

    fn get_mut(&mut self, handle: Handle) -> Result<&mut Object, EngineError> {
        self.objects
            .get_mut(&handle)
            .ok_or(EngineError::InvalidHandle(handle))
    }

    fn expect_kind(&self, handle: Handle, expected: ObjectKind) -> Result<&Object, EngineError> {
        let object = self.get(handle)?;
        if object.kind != expected {
            return Err(EngineError::WrongKind {
                handle,
                expected,
                found: object.kind,
            });
        }
        Ok(object)
    }

    fn retain(&mut self, handle: Handle) -> bool {
        match self.objects.get_mut(&handle) {
            Some(object) => {
                object.refs += 1;
                true
            }
            None => false,
        }
    }

    /// Drops one reference; objects reaching zero release what they hold.
    fn release(&mut self, handle: Handle) {
        let mut pending = vec![handle];
        while let Some(handle) = pending.pop() {
            let Some(object) = self.objects.get_mut(&handle) else {
                self.invalid_releases += 1;
                error!(%handle, "release of unknown engine object");
                continue;
            };
            object.refs -= 1;
            if object.refs == 0
                && let Some(object) = self.objects.remove(&handle)
            {
                pending.extend(object.children());
            }
        }
    }
}

/// In-process engine with OSPRay reference-counting semantics.
///
/// The rasterizer is deterministic: each pixel's red and green channels are
/// the camera's normalized screen coordinate at the pixel centre (scaled to
/// `0..=255`), blue is `|position.x|` modulo 256 and alpha is opaque. Rows
/// are stored bottom-up, as native framebuffers are.
#[derive(Debug, Default)]
pub struct HeadlessDevice {
    state: Mutex<State>,
}

impl HeadlessDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn live_objects(&self) -> usize {
        self.state.lock().objects.len()
    }

    pub fn live_of_kind(&self, kind: ObjectKind) -> usize {
        self.state
            .lock()
            .objects
            .values()
            .filter(|o| o.kind == kind)
            .count()
    }

    /// Total objects of `kind` ever created.
    pub fn created(&self, kind: ObjectKind) -> u64 {
        self.state.lock().created.get(&kind).copied().unwrap_or(0)
    }

    pub fn commits(&self, handle: Handle) -> Option<u32> {
        self.state.lock().objects.get(&handle).map(|o| o.commits)
    }

    pub fn param(&self, handle: Handle, name: &str) -> Option<Param> {
        self.state
            .lock()
            .objects
            .get(&handle)
            .and_then(|o| o.params.get(name).cloned())
    }

    pub fn subtype(&self, handle: Handle) -> Option<String> {
        self.state
            .lock()
            .objects
            .get(&handle)
            .map(|o| o.subtype.clone())
    }

    pub fn refcount(&self, handle: Handle) -> Option<usize> {
        self.state.lock().objects.get(&handle).map(|o| o.refs)
    }

    pub fn invalid_releases(&self) -> u64 {
        self.state.lock().invalid_releases
    }

    pub fn frames_rendered(&self) -> u64 {
        self.state.lock().frames
    }

    /// Items of an object array.
    pub fn data_items(&self, handle: Handle) -> Option<Vec<Handle>> {
        match &self.state.lock().objects.get(&handle)?.payload {
            Payload::Objects { items, .. } => Some(items.clone()),
            _ => None,
        }
    }

    /// Contents of an engine-owned data array.
    pub fn data_bytes(&self, handle: Handle) -> Option<Vec<u8>> {
        match &self.state.lock().objects.get(&handle)?.payload {
            Payload::Owned { bytes, .. } => Some(bytes.clone()),
            _ => None,
        }
    }

    /// Shape of any data array, shared or owned.
    pub fn data_shape(&self, handle: Handle) -> Option<[usize; 3]> {
        match &self.state.lock().objects.get(&handle)?.payload {
            Payload::Shared { view } => Some(view.shape),
            Payload::Owned { shape, .. } => Some(*shape),
            Payload::Objects { items, .. } => Some([items.len(), 1, 1]),
            _ => None,
        }
    }

    pub fn loaded_modules(&self) -> Vec<String> {
        self.state.lock().modules.clone()
    }

    pub fn shutdown_count(&self) -> u32 {
        self.state.lock().shutdowns
    }
}

fn vec2(params: &BTreeMap<String, Param>, name: &str, default: [f32; 2]) -> [f32; 2] {
    match params.get(name) {
        Some(Param::Vec2f(v)) => *v,
        _ => default,
    }
}

fn vec3(params: &BTreeMap<String, Param>, name: &str) -> [f32; 3] {
    match params.get(name) {
        Some(Param::Vec3f(v)) => *v,
        _ => [0.0; 3],
    }
}

fn channel(value: f32) -> u8 {
    (value * 255.0).round().clamp(0.0, 255.0) as u8
}

fn rasterize(width: u32, height: u32, camera: &BTreeMap<String, Param>, pixels: &mut [u8]) {
    let start = vec2(camera, "imageStart", [0.0, 0.0]);
    let end = vec2(camera, "imageEnd", [1.0, 1.0]);
    let position = vec3(camera, "position");
    let blue = (position[0].abs().round() as u64 % 256) as u8;

    for row in 0..height {
        let v = start[1] + (row as f32 + 0.5) / height as f32 * (end[1] - start[1]);
        for col in 0..width {
            let u = start[0] + (col as f32 + 0.5) / width as f32 * (end[0] - start[0]);
            let at = ((row * width + col) * 4) as usize;
            pixels[at..at + 4].copy_from_slice(&[channel(u), channel(v), blue, 255]);
        }
    }
}

impl Device for HeadlessDevice {
    fn name(&self) -> &str {
        "headless"
    }

    fn load_module(&self, name: &str) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        if !state.modules.iter().any(|m| m == name) {
            state.modules.push(name.to_string());
        }
        Ok(())
    }

    fn new_object(&self, kind: ObjectKind, subtype: &str) -> Result<Handle, EngineError> {
        if matches!(kind, ObjectKind::Data | ObjectKind::FrameBuffer) {
            return Err(EngineError::Unsupported(format!(
                "{} objects have dedicated constructors",
                kind.as_str()
            )));
        }
        let handle = self
            .state
            .lock()
            .insert(Object::new(kind, subtype, Payload::None));
        debug!(%handle, kind = kind.as_str(), subtype, "new object");
        Ok(handle)
    }

    unsafe fn new_shared_data(&self, view: SharedView) -> Result<Handle, EngineError> {
        if view.ptr.is_null() && !view.is_empty() {
            return Err(EngineError::Unsupported("null shared pointer".to_string()));
        }
        let payload = Payload::Shared { view };
        Ok(self
            .state
            .lock()
            .insert(Object::new(ObjectKind::Data, "shared", payload)))
    }

    fn new_data(&self, ty: DataType, shape: [usize; 3]) -> Result<Handle, EngineError> {
        let len = ty.byte_len(shape).ok_or_else(|| {
            EngineError::Unsupported(format!("array shape {shape:?} is too large"))
        })?;
        let payload = Payload::Owned {
            ty,
            shape,
            bytes: vec![0; len],
        };
        Ok(self
            .state
            .lock()
            .insert(Object::new(ObjectKind::Data, "owned", payload)))
    }

    fn copy_data(&self, src: Handle, dst: Handle) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        let view = match &state.expect_kind(src, ObjectKind::Data)?.payload {
            Payload::Shared { view } => *view,
            _ => return Err(EngineError::Unsupported("copy from non-shared data".into())),
        };
        let target = state.expect_kind(dst, ObjectKind::Data)?;
        let Payload::Owned { ty, shape, .. } = &target.payload else {
            return Err(EngineError::Unsupported("copy into non-owned data".into()));
        };
        if *ty != view.ty || *shape != view.shape {
            return Err(EngineError::ShapeMismatch {
                expected: ty.byte_len(*shape).unwrap_or(usize::MAX),
                actual: view.ty.byte_len(view.shape).unwrap_or(usize::MAX),
            });
        }

        let len = view.len() * view.ty.size();
        // SAFETY: `new_shared_data` requires the memory behind `view` to stay
        // valid while `src` is alive, and `src` was validated above.
        let source = unsafe { std::slice::from_raw_parts(view.ptr, len) };
        if let Payload::Owned { bytes, .. } = &mut state.get_mut(dst)?.payload {
            bytes.copy_from_slice(source);
        }
        Ok(())
    }

    fn new_object_data(&self, ty: DataType, items: &[Handle]) -> Result<Handle, EngineError> {
        let Some(kind) = ty.object_kind() else {
            return Err(EngineError::Unsupported(format!("{ty:?} object array")));
        };
        let mut state = self.state.lock();
        for item in items {
            state.expect_kind(*item, kind)?;
        }
        for item in items {
            state.retain(*item);
        }
        let payload = Payload::Objects {
            items: items.to_vec(),
        };
        Ok(state.insert(Object::new(ObjectKind::Data, "objects", payload)))
    }

    fn new_framebuffer(
        &self,
        width: u32,
        height: u32,
        format: FrameBufferFormat,
    ) -> Result<Handle, EngineError> {
        if width == 0 || height == 0 {
            return Err(EngineError::Unsupported(format!(
                "framebuffer size {width}x{height}"
            )));
        }
        let len = (width as usize)
            .checked_mul(height as usize)
            .and_then(|pixels| pixels.checked_mul(4))
            .ok_or_else(|| {
                EngineError::Unsupported(format!("framebuffer size {width}x{height}"))
            })?;
        let payload = Payload::Frame {
            width,
            height,
            pixels: vec![0; len],
        };
        let subtype = match format {
            FrameBufferFormat::Rgba8 => "rgba8",
            FrameBufferFormat::Srgba => "srgba",
        };
        Ok(self
            .state
            .lock()
            .insert(Object::new(ObjectKind::FrameBuffer, subtype, payload)))
    }

    fn set_param(&self, object: Handle, name: &str, value: Param) -> Result<(), EngineError> {
        if name.is_empty() || name.contains('\0') {
            return Err(EngineError::InvalidName(name.to_string()));
        }
        let mut state = self.state.lock();
        state.get(object)?;
        if let Some(child) = value.as_object() {
            state.get(child)?;
            state.retain(child);
        }
        let previous = state.get_mut(object)?.params.insert(name.to_string(), value);
        if let Some(old) = previous.as_ref().and_then(Param::as_object) {
            state.release(old);
        }
        Ok(())
    }

    fn commit(&self, object: Handle) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        state.get_mut(object)?.commits += 1;
        Ok(())
    }

    fn retain(&self, object: Handle) {
        let mut state = self.state.lock();
        if !state.retain(object) {
            error!(handle = %object, "retain of unknown engine object");
        }
    }

    fn release(&self, object: Handle) {
        self.state.lock().release(object);
    }

    fn render_frame(
        &self,
        framebuffer: Handle,
        renderer: Handle,
        camera: Handle,
        world: Handle,
    ) -> Result<f32, EngineError> {
        let mut state = self.state.lock();
        let kind = &state.expect_kind(renderer, ObjectKind::Renderer)?.subtype;
        if !RENDERERS.contains(&kind.as_str()) {
            return Err(EngineError::Render(format!("unknown renderer type {kind:?}")));
        }
        state.expect_kind(world, ObjectKind::World)?;
        let camera = state.expect_kind(camera, ObjectKind::Camera)?.params.clone();

        let target = state.get_mut(framebuffer)?;
        let Payload::Frame {
            width,
            height,
            pixels,
        } = &mut target.payload
        else {
            return Err(EngineError::WrongKind {
                handle: framebuffer,
                expected: ObjectKind::FrameBuffer,
                found: target.kind,
            });
        };
        rasterize(*width, *height, &camera, pixels);
        state.frames += 1;
        Ok(0.0)
    }

    fn read_color(&self, framebuffer: Handle) -> Result<Vec<u8>, EngineError> {
        let state = self.state.lock();
        match &state.expect_kind(framebuffer, ObjectKind::FrameBuffer)?.payload {
            Payload::Frame { pixels, .. } => Ok(pixels.clone()),
            _ => Err(EngineError::InvalidHandle(framebuffer)),
        }
    }

    fn shutdown(&self) {
        let mut state = self.state.lock();
        state.shutdowns += 1;
        if !state.objects.is_empty() {
            error!(live = state.objects.len(), "engine shut down with live objects");
        }
    }
}
