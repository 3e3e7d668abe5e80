use crate::handle::{Handle, ObjectKind};

/// Element types of engine data arrays. Discriminants follow the OSPRay
/// `OSPDataType` numbering so native backends can pass them through.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum DataType {
    UChar = 2500,
    Vec2UC = 2501,
    Vec3UC = 2502,
    Vec4UC = 2503,
    UInt = 4500,
    Vec2UI = 4501,
    Vec3UI = 4502,
    Vec4UI = 4503,
    Float = 6000,
    Vec2F = 6001,
    Vec3F = 6002,
    Vec4F = 6003,
    Affine3F = 12003,
    GeometricModel = OBJECT_BASE + 104,
    ImageOperation = OBJECT_BASE + 107,
    Instance = OBJECT_BASE + 108,
    Light = OBJECT_BASE + 109,
    Material = OBJECT_BASE + 110,
}

pub(crate) const OBJECT_BASE: u32 = 0x800_0000;

impl DataType {
    /// Size of one element in bytes.
    pub fn size(self) -> usize {
        match self {
            DataType::UChar => 1,
            DataType::Vec2UC => 2,
            DataType::Vec3UC => 3,
            DataType::Vec4UC => 4,
            DataType::UInt | DataType::Float => 4,
            DataType::Vec2UI | DataType::Vec2F => 8,
            DataType::Vec3UI | DataType::Vec3F => 12,
            DataType::Vec4UI | DataType::Vec4F => 16,
            DataType::Affine3F => 48,
            DataType::GeometricModel
            | DataType::ImageOperation
            | DataType::Instance
            | DataType::Light
            | DataType::Material => std::mem::size_of::<usize>(),
        }
    }

    /// The object kind stored by an object array, `None` for plain values.
    pub fn object_kind(self) -> Option<ObjectKind> {
        match self {
            DataType::GeometricModel => Some(ObjectKind::GeometricModel),
            DataType::ImageOperation => Some(ObjectKind::ImageOperation),
            DataType::Instance => Some(ObjectKind::Instance),
            DataType::Light => Some(ObjectKind::Light),
            DataType::Material => Some(ObjectKind::Material),
            _ => None,
        }
    }

    /// Bytes held by an array of `shape`, `None` when that overflows.
    pub fn byte_len(self, shape: [usize; 3]) -> Option<usize> {
        shape
            .iter()
            .try_fold(self.size(), |acc, &dim| acc.checked_mul(dim))
    }

    pub fn code(self) -> u32 {
        self as u32
    }
}

/// Typed object parameter.
#[derive(Clone, Debug, PartialEq)]
pub enum Param {
    Object(Handle),
    Bool(bool),
    Int(i32),
    UInt(u32),
    Float(f32),
    Vec2f([f32; 2]),
    Vec3f([f32; 3]),
    Vec4f([f32; 4]),
    Affine3f([f32; 12]),
    String(String),
}

impl Param {
    pub fn as_object(&self) -> Option<Handle> {
        match self {
            Param::Object(h) => Some(*h),
            _ => None,
        }
    }
}

impl From<Handle> for Param {
    fn from(h: Handle) -> Self {
        Param::Object(h)
    }
}

impl From<f32> for Param {
    fn from(v: f32) -> Self {
        Param::Float(v)
    }
}

impl From<[f32; 2]> for Param {
    fn from(v: [f32; 2]) -> Self {
        Param::Vec2f(v)
    }
}

impl From<[f32; 3]> for Param {
    fn from(v: [f32; 3]) -> Self {
        Param::Vec3f(v)
    }
}

/// Column-major 3x4 affine with only scale and translation populated.
pub fn affine_scale_translate(scale: [f32; 3], translate: [f32; 3]) -> [f32; 12] {
    [
        scale[0], 0.0, 0.0, //
        0.0, scale[1], 0.0, //
        0.0, 0.0, scale[2], //
        translate[0], translate[1], translate[2],
    ]
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FrameBufferFormat {
    Rgba8,
    Srgba,
}

impl FrameBufferFormat {
    pub fn code(self) -> u32 {
        match self {
            FrameBufferFormat::Rgba8 => 1,
            FrameBufferFormat::Srgba => 2,
        }
    }
}

/// `OSPTextureFormat` value for three-channel float textures.
pub const TEXTURE_RGB32F: u32 = 5;
