use std::num::NonZeroUsize;

/// Opaque, reference-counted reference to an engine object.
///
/// The value is whatever the backend uses to identify the object (a pointer
/// for native backends, a counter for the headless one). Handles are `Copy`;
/// ownership is tracked by the engine's reference counts, not by Rust.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Handle(NonZeroUsize);

impl Handle {
    pub fn from_raw(raw: usize) -> Option<Self> {
        NonZeroUsize::new(raw).map(Handle)
    }

    pub(crate) fn from_nonzero(raw: NonZeroUsize) -> Self {
        Handle(raw)
    }

    pub fn as_raw(self) -> usize {
        self.0.get()
    }
}

impl std::fmt::Display for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{:x}", self.0)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ObjectKind {
    Camera,
    Data,
    FrameBuffer,
    GeometricModel,
    Geometry,
    Group,
    ImageOperation,
    Instance,
    Light,
    Material,
    Renderer,
    Texture,
    World,
}

impl ObjectKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ObjectKind::Camera => "camera",
            ObjectKind::Data => "data",
            ObjectKind::FrameBuffer => "framebuffer",
            ObjectKind::GeometricModel => "geometric_model",
            ObjectKind::Geometry => "geometry",
            ObjectKind::Group => "group",
            ObjectKind::ImageOperation => "image_operation",
            ObjectKind::Instance => "instance",
            ObjectKind::Light => "light",
            ObjectKind::Material => "material",
            ObjectKind::Renderer => "renderer",
            ObjectKind::Texture => "texture",
            ObjectKind::World => "world",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Handle;

    #[test]
    fn null_is_not_a_handle() {
        assert_eq!(Handle::from_raw(0), None);
        let h = Handle::from_raw(0x2a).unwrap();
        assert_eq!(h.as_raw(), 0x2a);
        assert_eq!(h.to_string(), "#2a");
    }
}
