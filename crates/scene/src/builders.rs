use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytemuck::Pod;
use engine::{
    DataType, Device, Handle, ObjectKind, Param, TEXTURE_RGB32F, defer_release, shape3, wrap_array,
};
use formats::layout::{
    COLORMAP_TEXELS, OBSERVATION_INDEX, TERRAIN_NORMALS, TERRAIN_POSITIONS, TERRAIN_QUADS,
    TERRAIN_TEXCOORDS,
};
use formats::{AssetFormatError, BinaryArray, Vec2f, Vec3f, Vec4u};
use foundation::ResourceScope;
use tracing::debug;

use crate::error::SceneError;

/// A builder that owns the releases for everything it made.
pub trait Scoped {
    fn scope_mut(&mut self) -> &mut ResourceScope;

    /// Hands this builder's teardown to `parent` as a single step.
    fn enter_into(&mut self, parent: &mut ResourceScope) -> Result<(), SceneError> {
        parent.enter(self.scope_mut())?;
        Ok(())
    }

    fn close(&mut self) {
        self.scope_mut().close();
    }
}

/// Maps `dir/file` and presents it to the engine as shared data. The mapping
/// is held by `scope` for as long as the view lives.
pub fn load_shared<T>(
    device: &Arc<dyn Device>,
    scope: &mut ResourceScope,
    dir: &Path,
    file: &str,
    ty: DataType,
) -> Result<Handle, SceneError>
where
    T: Pod + Send + Sync,
{
    let path = dir.join(file);
    let array = BinaryArray::<T>::load(&path)?;
    share(device, scope, &path, array, ty)
}

/// Presents an array already mapped from `path` to the engine as shared data.
pub fn share<T>(
    device: &Arc<dyn Device>,
    scope: &mut ResourceScope,
    path: &Path,
    array: BinaryArray<T>,
    ty: DataType,
) -> Result<Handle, SceneError>
where
    T: Pod + Send + Sync,
{
    let shape = shape3(array.dims()).ok_or_else(|| AssetFormatError::BadDimensionCount {
        path: path.to_path_buf(),
        ndims: array.dims().len() as u32,
    })?;
    debug!(path = %path.display(), ?shape, "loaded array");
    Ok(wrap_array(device, scope, Arc::new(array), ty, shape)?)
}

/// Mesh geometry from a directory of vertex and quad index arrays.
pub struct Terrain {
    device: Arc<dyn Device>,
    path: PathBuf,
    scope: ResourceScope,
    geometry: Option<Handle>,
}

impl Terrain {
    pub fn new(device: Arc<dyn Device>, path: impl Into<PathBuf>) -> Self {
        Self {
            device,
            path: path.into(),
            scope: ResourceScope::new(),
            geometry: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn geometry(&self) -> Option<Handle> {
        self.geometry
    }

    pub fn make(&mut self) -> Result<Handle, SceneError> {
        let device = &self.device;
        let scope = &mut self.scope;
        let dir = self.path.as_path();

        let position =
            load_shared::<Vec3f>(device, scope, dir, TERRAIN_POSITIONS, DataType::Vec3F)?;
        let texcoord =
            load_shared::<Vec2f>(device, scope, dir, TERRAIN_TEXCOORDS, DataType::Vec2F)?;
        let normal = load_shared::<Vec3f>(device, scope, dir, TERRAIN_NORMALS, DataType::Vec3F)?;
        let index = load_shared::<Vec4u>(device, scope, dir, TERRAIN_QUADS, DataType::Vec4UI)?;

        let geometry = device.new_object(ObjectKind::Geometry, "mesh")?;
        defer_release(scope, device, geometry)?;
        device.set_param(geometry, "vertex.position", Param::Object(position))?;
        device.set_param(geometry, "vertex.texcoord", Param::Object(texcoord))?;
        device.set_param(geometry, "vertex.normal", Param::Object(normal))?;
        device.set_param(geometry, "index", Param::Object(index))?;
        device.commit(geometry)?;

        self.geometry = Some(geometry);
        Ok(geometry)
    }
}

impl Scoped for Terrain {
    fn scope_mut(&mut self) -> &mut ResourceScope {
        &mut self.scope
    }
}

/// One textured `obj` material.
pub struct Colormap {
    device: Arc<dyn Device>,
    path: PathBuf,
    scope: ResourceScope,
    material: Option<Handle>,
}

impl Colormap {
    pub const SHININESS: f32 = 1.0;

    pub fn new(device: Arc<dyn Device>, path: impl Into<PathBuf>) -> Self {
        Self {
            device,
            path: path.into(),
            scope: ResourceScope::new(),
            material: None,
        }
    }

    pub fn material(&self) -> Option<Handle> {
        self.material
    }

    pub fn make(&mut self) -> Result<Handle, SceneError> {
        let device = &self.device;
        let scope = &mut self.scope;

        let texels =
            load_shared::<Vec3f>(device, scope, &self.path, COLORMAP_TEXELS, DataType::Vec3F)?;

        let texture = device.new_object(ObjectKind::Texture, "texture2d")?;
        defer_release(scope, device, texture)?;
        device.set_param(texture, "data", Param::Object(texels))?;
        device.set_param(texture, "format", Param::UInt(TEXTURE_RGB32F))?;
        device.commit(texture)?;

        let material = device.new_object(ObjectKind::Material, "obj")?;
        defer_release(scope, device, material)?;
        device.set_param(material, "map_kd", Param::Object(texture))?;
        device.set_param(material, "ns", Param::Float(Self::SHININESS))?;
        device.commit(material)?;

        self.material = Some(material);
        Ok(material)
    }
}

impl Scoped for Colormap {
    fn scope_mut(&mut self) -> &mut ResourceScope {
        &mut self.scope
    }
}

/// Per-primitive material indices.
pub struct Observation {
    device: Arc<dyn Device>,
    path: PathBuf,
    scope: ResourceScope,
    index: Option<Handle>,
}

impl Observation {
    pub fn new(device: Arc<dyn Device>, path: impl Into<PathBuf>) -> Self {
        Self {
            device,
            path: path.into(),
            scope: ResourceScope::new(),
            index: None,
        }
    }

    pub fn index(&self) -> Option<Handle> {
        self.index
    }

    pub fn make(&mut self) -> Result<Handle, SceneError> {
        let index = load_shared::<u8>(
            &self.device,
            &mut self.scope,
            &self.path,
            OBSERVATION_INDEX,
            DataType::UChar,
        )?;
        self.index = Some(index);
        Ok(index)
    }
}

impl Scoped for Observation {
    fn scope_mut(&mut self) -> &mut ResourceScope {
        &mut self.scope
    }
}
