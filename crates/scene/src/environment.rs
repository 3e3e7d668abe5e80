use std::sync::Arc;

use engine::{
    DataType, Device, Handle, ObjectKind, Param, affine_scale_translate, defer_release,
    wrap_handles,
};
use foundation::ResourceScope;
use tracing::debug;

use crate::builders::Scoped;
use crate::error::SceneError;

/// Terrain units are millimetres of the renderer's unit; y points down in
/// the source data.
pub const INSTANCE_SCALE: [f32; 3] = [1.0 / 1000.0, -1.0 / 1000.0, 1.0 / 1000.0];

struct Graph {
    model: Handle,
    group: Handle,
    instance: Handle,
}

/// Terrain plus materials plus an optional per-primitive index, published as
/// a single instance.
pub struct Environment {
    device: Arc<dyn Device>,
    geometry: Handle,
    materials: Vec<Handle>,
    index: Option<Handle>,
    scope: ResourceScope,
    graph: Option<Graph>,
    rebuilds: u64,
}

impl Environment {
    pub fn new(
        device: Arc<dyn Device>,
        geometry: Handle,
        materials: Vec<Handle>,
        index: Option<Handle>,
    ) -> Self {
        Self {
            device,
            geometry,
            materials,
            index,
            scope: ResourceScope::new(),
            graph: None,
            rebuilds: 0,
        }
    }

    pub fn make(&mut self) -> Result<Handle, SceneError> {
        let device = &self.device;
        let scope = &mut self.scope;

        let materials = wrap_handles(device, DataType::Material, &self.materials)?;
        defer_release(scope, device, materials)?;

        let model = device.new_object(ObjectKind::GeometricModel, "")?;
        defer_release(scope, device, model)?;
        device.set_param(model, "geometry", Param::Object(self.geometry))?;
        device.set_param(model, "material", Param::Object(materials))?;
        if let Some(index) = self.index {
            device.set_param(model, "index", Param::Object(index))?;
        }
        device.commit(model)?;

        let group = device.new_object(ObjectKind::Group, "")?;
        defer_release(scope, device, group)?;
        bind_model(device, group, model)?;
        device.commit(group)?;

        let instance = device.new_object(ObjectKind::Instance, "")?;
        defer_release(scope, device, instance)?;
        device.set_param(instance, "group", Param::Object(group))?;
        device.set_param(
            instance,
            "transform",
            Param::Affine3f(affine_scale_translate(INSTANCE_SCALE, [0.0; 3])),
        )?;
        device.commit(instance)?;

        self.graph = Some(Graph {
            model,
            group,
            instance,
        });
        Ok(instance)
    }

    /// Replaces the model's index in place. The instance keeps its identity;
    /// only the one-element model array is rebuilt.
    pub fn update_index(&mut self, index: Handle) -> Result<(), SceneError> {
        let graph = self.graph.as_ref().ok_or(SceneError::NotMade("environment"))?;
        let device = &self.device;

        device.set_param(graph.model, "index", Param::Object(index))?;
        device.commit(graph.model)?;

        bind_model(device, graph.group, graph.model)?;
        device.commit(graph.group)?;

        device.set_param(graph.instance, "group", Param::Object(graph.group))?;
        device.commit(graph.instance)?;

        self.index = Some(index);
        self.rebuilds += 1;
        debug!(%index, rebuilds = self.rebuilds, "environment index replaced");
        Ok(())
    }

    pub fn instance(&self) -> Option<Handle> {
        self.graph.as_ref().map(|g| g.instance)
    }

    pub fn index(&self) -> Option<Handle> {
        self.index
    }

    pub fn rebuilds(&self) -> u64 {
        self.rebuilds
    }
}

/// Sets a fresh `[model]` array as the group's geometry. The group keeps the
/// only reference, so the previous array goes away with the old binding.
fn bind_model(device: &Arc<dyn Device>, group: Handle, model: Handle) -> Result<(), SceneError> {
    let models = wrap_handles(device, DataType::GeometricModel, &[model])?;
    let bound = device.set_param(group, "geometry", Param::Object(models));
    device.release(models);
    bound?;
    Ok(())
}

impl Scoped for Environment {
    fn scope_mut(&mut self) -> &mut ResourceScope {
        &mut self.scope
    }
}
