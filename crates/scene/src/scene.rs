use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use engine::{
    DataType, Device, FrameBufferFormat, Handle, ObjectKind, Param, TEXTURE_RGB32F,
    defer_release, wrap_handles,
};
use formats::Vec3f;
use foundation::ResourceScope;
use image::RgbaImage;
use parking_lot::{RwLockUpgradableReadGuard, RwLockWriteGuard};
use runtime::metrics::{DECODE_NS, LIGHT_REBUILD_NS, OBSERVATION_SWAP_NS, RENDER_NS};
use tracing::{debug, info};

use crate::builders::{Scoped, load_shared};
use crate::error::SceneError;
use crate::lighting::{
    Ephemeris, LightKind, SKY_INTENSITY, SUN_INTENSITY, make_ambient, make_hdri, make_sunlight,
    sun_vector,
};
use crate::park::SharedPark;
use crate::request::{RenderTimings, RenderingRequest, RenderingResponse, RequestError};
use crate::tile::{GHOST, TileWindow, crop_ghost};

pub const BACKGROUND: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

/// How a scene renders. Changes take effect at the next `make()`.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneSettings {
    /// Engine renderer type, e.g. `pathtracer`. Not checked here; the engine
    /// rejects unknown types when rendering.
    pub renderer: String,
    pub samples: u32,
    /// Attach a `denoiser` image operation to every frame.
    pub denoiser: bool,
    /// Single-file RGB32F environment map for an `hdri` light.
    pub hdri: Option<PathBuf>,
    /// Keep a constant `ambient` light next to the per-request sun and sky.
    pub ambient: bool,
}

impl Default for SceneSettings {
    fn default() -> Self {
        Self {
            renderer: "pathtracer".to_string(),
            samples: 4,
            denoiser: false,
            hdri: None,
            ambient: true,
        }
    }
}

struct SceneObjects {
    world: Handle,
    renderer: Handle,
    camera: Handle,
    static_lights: Vec<Handle>,
    image_ops: Option<Handle>,
    samples: u32,
}

/// World, camera and renderer around a shared park. A scene renders one
/// request at a time; concurrency comes from pooling scenes.
pub struct Scene {
    device: Arc<dyn Device>,
    park: SharedPark,
    ephemeris: Arc<dyn Ephemeris>,
    settings: SceneSettings,
    scope: ResourceScope,
    objects: Option<SceneObjects>,
}

impl Scene {
    pub fn new(
        device: Arc<dyn Device>,
        park: SharedPark,
        ephemeris: Arc<dyn Ephemeris>,
        settings: SceneSettings,
    ) -> Self {
        Self {
            device,
            park,
            ephemeris,
            settings,
            scope: ResourceScope::new(),
            objects: None,
        }
    }

    pub fn configure(&mut self, renderer: impl Into<String>, samples: u32) {
        self.settings.renderer = renderer.into();
        self.settings.samples = samples;
    }

    pub fn settings(&self) -> &SceneSettings {
        &self.settings
    }

    pub fn park(&self) -> &SharedPark {
        &self.park
    }

    pub fn is_made(&self) -> bool {
        self.objects.is_some()
    }

    pub fn make(&mut self) -> Result<(), SceneError> {
        let device = &self.device;
        let scope = &mut self.scope;

        let mut static_lights = Vec::new();
        if self.settings.ambient {
            static_lights.push(make_ambient(device, scope)?);
        }
        if let Some(path) = &self.settings.hdri {
            let (dir, file) = split_file(path);
            let texels = load_shared::<Vec3f>(device, scope, &dir, &file, DataType::Vec3F)?;
            let texture = device.new_object(ObjectKind::Texture, "texture2d")?;
            defer_release(scope, device, texture)?;
            device.set_param(texture, "data", Param::Object(texels))?;
            device.set_param(texture, "format", Param::UInt(TEXTURE_RGB32F))?;
            device.commit(texture)?;
            static_lights.push(make_hdri(device, scope, texture)?);
        }

        let image_ops = if self.settings.denoiser {
            let denoiser = device.new_object(ObjectKind::ImageOperation, "denoiser")?;
            defer_release(scope, device, denoiser)?;
            device.commit(denoiser)?;
            let ops = wrap_handles(device, DataType::ImageOperation, &[denoiser])?;
            defer_release(scope, device, ops)?;
            Some(ops)
        } else {
            None
        };

        let instances = self
            .park
            .read()
            .instances()
            .ok_or(SceneError::NotMade("park"))?;
        let lights = wrap_handles(device, DataType::Light, &static_lights)?;
        defer_release(scope, device, lights)?;

        let world = device.new_object(ObjectKind::World, "")?;
        defer_release(scope, device, world)?;
        device.set_param(world, "instance", Param::Object(instances))?;
        device.set_param(world, "light", Param::Object(lights))?;
        device.set_param(world, "dynamicScene", Param::Bool(false))?;
        device.set_param(world, "compactMode", Param::Bool(true))?;
        device.commit(world)?;

        let samples = self.settings.samples;
        let renderer = device.new_object(ObjectKind::Renderer, &self.settings.renderer)?;
        defer_release(scope, device, renderer)?;
        device.set_param(renderer, "pixelSamples", Param::Int(samples_param(samples)))?;
        device.set_param(renderer, "backgroundColor", Param::Vec4f(BACKGROUND))?;
        device.commit(renderer)?;

        let camera = device.new_object(ObjectKind::Camera, "perspective")?;
        defer_release(scope, device, camera)?;
        device.commit(camera)?;

        debug!(
            renderer = %self.settings.renderer,
            samples,
            denoiser = self.settings.denoiser,
            "scene ready"
        );
        self.objects = Some(SceneObjects {
            world,
            renderer,
            camera,
            static_lights,
            image_ops,
            samples,
        });
        Ok(())
    }

    pub fn render(&mut self, request: &RenderingRequest) -> Result<RenderingResponse, SceneError> {
        request.validate()?;
        let objects = self.objects.as_mut().ok_or(SceneError::NotMade("scene"))?;
        let device = &self.device;
        let mut timings = RenderTimings::default();

        let aspect = request.width as f32 / request.height as f32;
        device.set_param(objects.camera, "aspect", Param::Float(aspect))?;
        device.commit(objects.camera)?;

        // The read guard is held until the frame is done so no other scene
        // can swap the overlay out from under this render.
        let park = self.park.clone();
        let started = Instant::now();
        let candidate = park.upgradable_read();
        let _park = if candidate.bound_id() == Some(request.observation.as_str()) {
            RwLockUpgradableReadGuard::downgrade(candidate)
        } else {
            let mut writer = RwLockUpgradableReadGuard::upgrade(candidate);
            writer.update_observation(&request.observation)?;
            RwLockWriteGuard::downgrade(writer)
        };
        timings.observation = started.elapsed();

        let started = Instant::now();
        let sun = sun_vector(self.ephemeris.as_ref(), request.hour)?;
        let mut lights = ResourceScope::new();
        let sun_light = make_sunlight(
            device,
            &mut lights,
            LightKind::Distant,
            sun,
            SUN_INTENSITY,
            request.position,
        )?;
        let sky_light = make_sunlight(
            device,
            &mut lights,
            request.light,
            sun,
            SKY_INTENSITY,
            request.position,
        )?;
        let mut all = vec![sun_light, sky_light];
        all.extend_from_slice(&objects.static_lights);
        let array = wrap_handles(device, DataType::Light, &all)?;
        let bound = device.set_param(objects.world, "light", Param::Object(array));
        device.release(array);
        bound?;
        device.commit(objects.world)?;
        lights.close();
        timings.lights = started.elapsed();

        let samples = request.samples.unwrap_or(self.settings.samples);
        if samples != objects.samples {
            let pixel_samples = Param::Int(samples_param(samples));
            device.set_param(objects.renderer, "pixelSamples", pixel_samples)?;
            device.commit(objects.renderer)?;
            objects.samples = samples;
        }

        let window =
            TileWindow::compute(request.row, request.col, request.width, request.height, GHOST);
        let camera = objects.camera;
        device.set_param(camera, "imageStart", Param::Vec2f(window.image_start()))?;
        device.set_param(camera, "imageEnd", Param::Vec2f(window.image_end()))?;
        device.set_param(camera, "position", Param::Vec3f(request.position.to_f32()))?;
        device.set_param(camera, "up", Param::Vec3f(request.up.to_f32()))?;
        device.set_param(camera, "direction", Param::Vec3f(request.direction.to_f32()))?;
        device.commit(camera)?;

        let started = Instant::now();
        let (width, height) = window
            .padded_size(request.width, request.height)
            .ok_or(RequestError::Oversized {
                width: request.width,
                height: request.height,
            })?;
        let mut frame = ResourceScope::new();
        let framebuffer = device.new_framebuffer(width, height, FrameBufferFormat::Srgba)?;
        defer_release(&mut frame, device, framebuffer)?;
        if let Some(ops) = objects.image_ops {
            device.set_param(framebuffer, "imageOperation", Param::Object(ops))?;
        }
        device.commit(framebuffer)?;
        device.render_frame(framebuffer, objects.renderer, camera, objects.world)?;
        timings.render = started.elapsed();

        let started = Instant::now();
        let pixels = device.read_color(framebuffer)?;
        frame.close();
        let len = pixels.len();
        let padded = RgbaImage::from_raw(width, height, pixels)
            .ok_or(SceneError::Decode { width, height, len })?;
        let image = crop_ghost(&padded, window.ghost);
        timings.decode = started.elapsed();

        let dimension = [request.width, request.height];
        info!(
            event = OBSERVATION_SWAP_NS,
            time = timings.observation.as_nanos() as u64,
            observation = %request.observation
        );
        info!(
            event = LIGHT_REBUILD_NS,
            time = timings.lights.as_nanos() as u64,
            hour = request.hour
        );
        info!(event = RENDER_NS, time = timings.render.as_nanos() as u64, ?dimension);
        info!(event = DECODE_NS, time = timings.decode.as_nanos() as u64, ?dimension);

        Ok(RenderingResponse { image, timings })
    }

    pub fn close(&mut self) {
        self.objects = None;
        self.scope.close();
    }
}

impl Scoped for Scene {
    fn scope_mut(&mut self) -> &mut ResourceScope {
        &mut self.scope
    }
}

fn samples_param(samples: u32) -> i32 {
    i32::try_from(samples).unwrap_or(i32::MAX)
}

fn split_file(path: &std::path::Path) -> (PathBuf, String) {
    let dir = path.parent().map(PathBuf::from).unwrap_or_default();
    let file = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    (dir, file)
}
