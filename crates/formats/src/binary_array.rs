use std::fmt;
use std::fs::{self, File};
use std::io::Write;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use bytemuck::{Pod, Zeroable};
use memmap2::Mmap;

/// Highest dimension count a binary array may declare.
pub const MAX_DIMS: usize = 3;

#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Vec2f {
    pub x: f32,
    pub y: f32,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Vec3f {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3f {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct Vec3u {
    pub a: u32,
    pub b: u32,
    pub c: u32,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct Vec4u {
    pub a: u32,
    pub b: u32,
    pub c: u32,
    pub d: u32,
}

#[derive(Debug)]
pub enum AssetFormatError {
    Io { path: PathBuf, source: std::io::Error },
    TruncatedHeader { path: PathBuf },
    BadDimensionCount { path: PathBuf, ndims: u32 },
    LengthMismatch { path: PathBuf, expected: u64, actual: u64 },
    /// The declared shape holds more bytes than can be addressed.
    DimensionOverflow { path: PathBuf, dims: Vec<usize> },
    Misaligned { path: PathBuf },
}

impl fmt::Display for AssetFormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetFormatError::Io { path, source } => {
                write!(f, "I/O error reading {}: {source}", path.display())
            }
            AssetFormatError::TruncatedHeader { path } => {
                write!(f, "Truncated array header in {}", path.display())
            }
            AssetFormatError::BadDimensionCount { path, ndims } => write!(
                f,
                "Unsupported dimension count {ndims} in {} (expected 1..={MAX_DIMS})",
                path.display()
            ),
            AssetFormatError::LengthMismatch {
                path,
                expected,
                actual,
            } => write!(
                f,
                "Array length mismatch in {}: header declares {expected} bytes, file has {actual}",
                path.display()
            ),
            AssetFormatError::DimensionOverflow { path, dims } => {
                write!(f, "Array shape {dims:?} in {} is too large", path.display())
            }
            AssetFormatError::Misaligned { path } => {
                write!(f, "Array payload in {} is not aligned for its record type", path.display())
            }
        }
    }
}

impl std::error::Error for AssetFormatError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AssetFormatError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Read-only, memory-mapped array of `T` records with a 1-3 dimensional shape.
///
/// The mapping stays valid for as long as the value lives; wrap it in an `Arc`
/// to share it with native views.
pub struct BinaryArray<T> {
    map: Mmap,
    offset: usize,
    dims: Vec<usize>,
    _record: PhantomData<T>,
}

fn read_u32(bytes: &[u8], at: usize) -> Option<u32> {
    let raw = bytes.get(at..at + 4)?;
    Some(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
}

/// Byte length of `dims` records of `record` bytes each, `None` on overflow.
pub fn payload_len(dims: &[usize], record: usize) -> Option<u64> {
    dims.iter()
        .try_fold(record as u64, |acc, &dim| acc.checked_mul(dim as u64))
}

impl<T: Pod> BinaryArray<T> {
    /// Maps `path` and validates `[u32 N][u32 dims; N][records]`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, AssetFormatError> {
        let path = path.as_ref();
        let io = |source| AssetFormatError::Io {
            path: path.to_path_buf(),
            source,
        };
        let file = File::open(path).map_err(io)?;
        let len = file.metadata().map_err(io)?.len();
        if len < 4 {
            return Err(AssetFormatError::TruncatedHeader {
                path: path.to_path_buf(),
            });
        }
        // SAFETY: the file is mapped read-only; assets are not modified while
        // the server runs.
        let map = unsafe { Mmap::map(&file) }.map_err(io)?;

        let truncated = || AssetFormatError::TruncatedHeader {
            path: path.to_path_buf(),
        };
        let ndims = read_u32(&map, 0).ok_or_else(truncated)?;
        if ndims == 0 || ndims as usize > MAX_DIMS {
            return Err(AssetFormatError::BadDimensionCount {
                path: path.to_path_buf(),
                ndims,
            });
        }
        let dims = (0..ndims as usize)
            .map(|i| read_u32(&map, 4 + 4 * i).map(|d| d as usize))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(truncated)?;

        let offset = 4 + 4 * dims.len();
        let expected = payload_len(&dims, size_of::<T>()).ok_or_else(|| {
            AssetFormatError::DimensionOverflow {
                path: path.to_path_buf(),
                dims: dims.clone(),
            }
        })?;
        let actual = (map.len() - offset) as u64;
        if expected != actual {
            return Err(AssetFormatError::LengthMismatch {
                path: path.to_path_buf(),
                expected,
                actual,
            });
        }
        if bytemuck::try_cast_slice::<u8, T>(&map[offset..]).is_err() {
            return Err(AssetFormatError::Misaligned {
                path: path.to_path_buf(),
            });
        }

        Ok(Self {
            map,
            offset,
            dims,
            _record: PhantomData,
        })
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.dims.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn bytes(&self) -> &[u8] {
        &self.map[self.offset..]
    }

    pub fn records(&self) -> &[T] {
        bytemuck::try_cast_slice(self.bytes()).unwrap_or(&[])
    }
}

impl<T> AsRef<[u8]> for BinaryArray<T> {
    fn as_ref(&self) -> &[u8] {
        &self.map[self.offset..]
    }
}

impl<T> fmt::Debug for BinaryArray<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BinaryArray")
            .field("record", &std::any::type_name::<T>())
            .field("dims", &self.dims)
            .finish()
    }
}

/// Writes `records` with shape `dims` in the layout `BinaryArray::load` reads.
pub fn write_binary_array<T: Pod>(
    path: impl AsRef<Path>,
    dims: &[usize],
    records: &[T],
) -> Result<(), AssetFormatError> {
    let path = path.as_ref();
    if dims.is_empty() || dims.len() > MAX_DIMS {
        return Err(AssetFormatError::BadDimensionCount {
            path: path.to_path_buf(),
            ndims: dims.len() as u32,
        });
    }
    let overflow = || AssetFormatError::DimensionOverflow {
        path: path.to_path_buf(),
        dims: dims.to_vec(),
    };
    if dims.iter().any(|&dim| u32::try_from(dim).is_err()) {
        return Err(overflow());
    }
    let expected = payload_len(dims, size_of::<T>()).ok_or_else(overflow)?;
    let actual = size_of_val(records) as u64;
    if expected != actual {
        return Err(AssetFormatError::LengthMismatch {
            path: path.to_path_buf(),
            expected,
            actual,
        });
    }

    let io = |source| AssetFormatError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io)?;
    }
    let mut payload = Vec::with_capacity(4 + 4 * dims.len() + size_of_val(records));
    payload.extend_from_slice(&(dims.len() as u32).to_le_bytes());
    for dim in dims {
        payload.extend_from_slice(&(*dim as u32).to_le_bytes());
    }
    payload.extend_from_slice(bytemuck::cast_slice(records));

    let mut file = File::create(path).map_err(io)?;
    file.write_all(&payload).map_err(io)?;
    Ok(())
}
