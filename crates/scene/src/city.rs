//! City view: palette-coloured buildings over nested vertex-coloured
//! backgrounds.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use engine::{
    DataType, Device, Handle, ObjectKind, Param, affine_scale_translate, defer_release,
    wrap_handles,
};
use formats::layout::{
    BACKGROUND_COLORS, BACKGROUND_TRIANGLES, BUILDING_INDEX, BUILDING_PALETTE, CITY_BACKGROUNDS,
    CITY_BUILDING, TERRAIN_POSITIONS, TERRAIN_QUADS,
};
use formats::{AssetFormatError, BinaryArray, Vec3f, Vec3u, Vec4u};
use foundation::ResourceScope;
use tracing::info;

use crate::builders::{Scoped, load_shared, share};
use crate::error::SceneError;

/// Materials a `u8` model index can address.
pub const PALETTE_SIZE: usize = 256;

/// Per-layer shrink of the city backgrounds.
pub const LAYER_SHRINK: f32 = 0.99;

/// Scale of a background `power` layers out from the buildings.
pub fn layer_scale(power: i32) -> f32 {
    LAYER_SHRINK.powi(power)
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Bounds {
    pub min: [f32; 3],
    pub max: [f32; 3],
}

impl Bounds {
    pub fn of(points: &[Vec3f]) -> Option<Self> {
        let first = points.first()?;
        let mut bounds = Bounds {
            min: [first.x, first.y, first.z],
            max: [first.x, first.y, first.z],
        };
        for point in &points[1..] {
            for (axis, value) in [point.x, point.y, point.z].into_iter().enumerate() {
                bounds.min[axis] = bounds.min[axis].min(value);
                bounds.max[axis] = bounds.max[axis].max(value);
            }
        }
        Some(bounds)
    }

    pub fn center(&self) -> [f32; 3] {
        std::array::from_fn(|axis| (self.min[axis] + self.max[axis]) / 2.0)
    }
}

/// Wraps `model` in a one-model group and publishes it as an instance.
fn publish(
    device: &Arc<dyn Device>,
    scope: &mut ResourceScope,
    model: Handle,
    transform: Option<[f32; 12]>,
) -> Result<Handle, SceneError> {
    let models = wrap_handles(device, DataType::GeometricModel, &[model])?;
    defer_release(scope, device, models)?;

    let group = device.new_object(ObjectKind::Group, "")?;
    defer_release(scope, device, group)?;
    device.set_param(group, "geometry", Param::Object(models))?;
    device.commit(group)?;

    let instance = device.new_object(ObjectKind::Instance, "")?;
    defer_release(scope, device, instance)?;
    device.set_param(instance, "group", Param::Object(group))?;
    if let Some(transform) = transform {
        device.set_param(instance, "transform", Param::Affine3f(transform))?;
    }
    device.commit(instance)?;
    Ok(instance)
}

/// One flat `obj` material per palette entry. The palette must cover every
/// index value.
fn palette_materials(
    device: &Arc<dyn Device>,
    scope: &mut ResourceScope,
    path: &Path,
) -> Result<Vec<Handle>, SceneError> {
    let palette = BinaryArray::<Vec3f>::load(path)?;
    let colors = palette.records();
    if colors.len() < PALETTE_SIZE {
        return Err(AssetFormatError::LengthMismatch {
            path: path.to_path_buf(),
            expected: (PALETTE_SIZE * size_of::<Vec3f>()) as u64,
            actual: palette.bytes().len() as u64,
        }
        .into());
    }

    let mut materials = Vec::with_capacity(PALETTE_SIZE);
    for kd in &colors[..PALETTE_SIZE] {
        let material = device.new_object(ObjectKind::Material, "obj")?;
        defer_release(scope, device, material)?;
        device.set_param(material, "kd", Param::Vec3f([kd.x, kd.y, kd.z]))?;
        device.commit(material)?;
        materials.push(material);
    }
    Ok(materials)
}

/// Quad-mesh buildings, each quad picking a palette material by index.
pub struct Building {
    device: Arc<dyn Device>,
    path: PathBuf,
    scope: ResourceScope,
    bounds: Option<Bounds>,
    instance: Option<Handle>,
}

impl Building {
    pub fn new(device: Arc<dyn Device>, path: impl Into<PathBuf>) -> Self {
        Self {
            device,
            path: path.into(),
            scope: ResourceScope::new(),
            bounds: None,
            instance: None,
        }
    }

    /// Extent of the vertices, known after `make()`.
    pub fn bounds(&self) -> Option<Bounds> {
        self.bounds
    }

    pub fn instance(&self) -> Option<Handle> {
        self.instance
    }

    pub fn make(&mut self) -> Result<Handle, SceneError> {
        let device = &self.device;
        let scope = &mut self.scope;
        let dir = self.path.as_path();

        let path = dir.join(TERRAIN_POSITIONS);
        let positions = BinaryArray::<Vec3f>::load(&path)?;
        let bounds = Bounds::of(positions.records());
        if let Some(bounds) = &bounds {
            info!(
                path = %dir.display(),
                min = ?bounds.min,
                max = ?bounds.max,
                center = ?bounds.center(),
                "building extent"
            );
        }
        let position = share(device, scope, &path, positions, DataType::Vec3F)?;
        let quads = load_shared::<Vec4u>(device, scope, dir, TERRAIN_QUADS, DataType::Vec4UI)?;

        let geometry = device.new_object(ObjectKind::Geometry, "mesh")?;
        defer_release(scope, device, geometry)?;
        device.set_param(geometry, "vertex.position", Param::Object(position))?;
        device.set_param(geometry, "index", Param::Object(quads))?;
        device.commit(geometry)?;

        let materials = palette_materials(device, scope, &dir.join(BUILDING_PALETTE))?;
        let materials = wrap_handles(device, DataType::Material, &materials)?;
        defer_release(scope, device, materials)?;
        let index = load_shared::<u8>(device, scope, dir, BUILDING_INDEX, DataType::UChar)?;

        let model = device.new_object(ObjectKind::GeometricModel, "")?;
        defer_release(scope, device, model)?;
        device.set_param(model, "geometry", Param::Object(geometry))?;
        device.set_param(model, "material", Param::Object(materials))?;
        device.set_param(model, "index", Param::Object(index))?;
        device.commit(model)?;

        let instance = publish(device, scope, model, None)?;
        self.bounds = bounds;
        self.instance = Some(instance);
        Ok(instance)
    }
}

impl Scoped for Building {
    fn scope_mut(&mut self) -> &mut ResourceScope {
        &mut self.scope
    }
}

/// Vertex-coloured triangle mesh, mirrored through the origin and shrunk by
/// `scale`.
pub struct Background {
    device: Arc<dyn Device>,
    path: PathBuf,
    scale: f32,
    scope: ResourceScope,
    instance: Option<Handle>,
}

impl Background {
    pub fn new(device: Arc<dyn Device>, path: impl Into<PathBuf>, scale: f32) -> Self {
        Self {
            device,
            path: path.into(),
            scale,
            scope: ResourceScope::new(),
            instance: None,
        }
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn instance(&self) -> Option<Handle> {
        self.instance
    }

    pub fn make(&mut self) -> Result<Handle, SceneError> {
        let device = &self.device;
        let scope = &mut self.scope;
        let dir = self.path.as_path();

        let position =
            load_shared::<Vec3f>(device, scope, dir, TERRAIN_POSITIONS, DataType::Vec3F)?;
        let color = load_shared::<Vec3f>(device, scope, dir, BACKGROUND_COLORS, DataType::Vec3F)?;
        let index =
            load_shared::<Vec3u>(device, scope, dir, BACKGROUND_TRIANGLES, DataType::Vec3UI)?;

        let geometry = device.new_object(ObjectKind::Geometry, "mesh")?;
        defer_release(scope, device, geometry)?;
        device.set_param(geometry, "vertex.position", Param::Object(position))?;
        device.set_param(geometry, "vertex.color", Param::Object(color))?;
        device.set_param(geometry, "index", Param::Object(index))?;
        device.commit(geometry)?;

        let model = device.new_object(ObjectKind::GeometricModel, "")?;
        defer_release(scope, device, model)?;
        device.set_param(model, "geometry", Param::Object(geometry))?;
        device.commit(model)?;

        let mirrored = affine_scale_translate([-self.scale; 3], [0.0; 3]);
        let instance = publish(device, scope, model, Some(mirrored))?;
        self.instance = Some(instance);
        Ok(instance)
    }
}

impl Scoped for Background {
    fn scope_mut(&mut self) -> &mut ResourceScope {
        &mut self.scope
    }
}

/// A building layer plus the backgrounds listed in [`CITY_BACKGROUNDS`].
pub struct City {
    device: Arc<dyn Device>,
    path: PathBuf,
    scope: ResourceScope,
    bounds: Option<Bounds>,
    instances: Vec<Handle>,
}

impl City {
    pub fn new(device: Arc<dyn Device>, path: impl Into<PathBuf>) -> Self {
        Self {
            device,
            path: path.into(),
            scope: ResourceScope::new(),
            bounds: None,
            instances: Vec::new(),
        }
    }

    pub fn bounds(&self) -> Option<Bounds> {
        self.bounds
    }

    /// `[building, backgrounds...]` once made.
    pub fn instances(&self) -> &[Handle] {
        &self.instances
    }

    pub fn make(&mut self) -> Result<Vec<Handle>, SceneError> {
        let mut building = Building::new(self.device.clone(), self.path.join(CITY_BUILDING));
        let made = building.make();
        building.enter_into(&mut self.scope)?;
        let mut instances = vec![made?];
        self.bounds = building.bounds();

        for (name, power) in CITY_BACKGROUNDS {
            let scale = layer_scale(power);
            let mut background = Background::new(self.device.clone(), self.path.join(name), scale);
            let made = background.make();
            background.enter_into(&mut self.scope)?;
            instances.push(made?);
        }

        info!(path = %self.path.display(), layers = instances.len(), "city ready");
        self.instances = instances.clone();
        Ok(instances)
    }
}

impl Scoped for City {
    fn scope_mut(&mut self) -> &mut ResourceScope {
        &mut self.scope
    }
}
