use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use engine::{DataType, Device, Handle, defer_release, wrap_handles};
use formats::layout::observation_dir;
use foundation::ResourceScope;
use parking_lot::RwLock;
use tracing::info;

use crate::builders::{Colormap, Observation, Scoped, Terrain};
use crate::city::City;
use crate::environment::Environment;
use crate::error::SceneError;

/// Terrain and colormap directories of one environment, relative to the
/// dataset root.
#[derive(Debug, Clone, PartialEq)]
pub struct EnvironmentLayout {
    pub terrain: String,
    pub colormaps: Vec<String>,
}

/// Everything a park loads from disk.
#[derive(Debug, Clone, PartialEq)]
pub struct ParkLayout {
    pub root: PathBuf,
    pub foreground: EnvironmentLayout,
    pub backgrounds: Vec<EnvironmentLayout>,
    /// Ids under `root/observation_<id>`.
    pub observations: Vec<String>,
    /// Bound at `make()`; the first observation when unset.
    pub default_observation: Option<String>,
    /// City directory whose layers are drawn after the backgrounds.
    pub city: Option<String>,
}

/// A park shared by every scene; swaps take the write side.
pub type SharedPark = Arc<RwLock<Park>>;

/// Foreground environment with a swappable observation overlay, plus any
/// number of static backgrounds.
pub struct Park {
    device: Arc<dyn Device>,
    layout: ParkLayout,
    scope: ResourceScope,
    indices: BTreeMap<String, Handle>,
    bound: Option<String>,
    foreground: Option<Environment>,
    instances: Option<Handle>,
}

impl Park {
    pub fn new(device: Arc<dyn Device>, layout: ParkLayout) -> Self {
        Self {
            device,
            layout,
            scope: ResourceScope::new(),
            indices: BTreeMap::new(),
            bound: None,
            foreground: None,
            instances: None,
        }
    }

    pub fn shared(self) -> SharedPark {
        Arc::new(RwLock::new(self))
    }

    pub fn make(&mut self) -> Result<Handle, SceneError> {
        let root = self.layout.root.clone();

        for id in &self.layout.observations {
            let mut observation = Observation::new(self.device.clone(), observation_dir(&root, id));
            let index = observation.make();
            observation.enter_into(&mut self.scope)?;
            self.indices.insert(id.clone(), index?);
        }
        let bound = match &self.layout.default_observation {
            Some(id) => Some(id.clone()),
            None => self.layout.observations.first().cloned(),
        };
        let index = match &bound {
            Some(id) => Some(
                *self
                    .indices
                    .get(id)
                    .ok_or_else(|| SceneError::UnknownObservation(id.clone()))?,
            ),
            None => None,
        };

        let foreground_layout = self.layout.foreground.clone();
        let mut foreground = self.environment(&foreground_layout, index)?;
        let mut instances = vec![foreground.make()?];
        foreground.enter_into(&mut self.scope)?;
        self.foreground = Some(foreground);

        for background in self.layout.backgrounds.clone() {
            let mut environment = self.environment(&background, None)?;
            let instance = environment.make();
            environment.enter_into(&mut self.scope)?;
            instances.push(instance?);
        }

        if let Some(dir) = &self.layout.city {
            let mut city = City::new(self.device.clone(), root.join(dir));
            let layers = city.make();
            city.enter_into(&mut self.scope)?;
            instances.extend(layers?);
        }

        let array = wrap_handles(&self.device, DataType::Instance, &instances)?;
        defer_release(&mut self.scope, &self.device, array)?;
        self.instances = Some(array);
        self.bound = bound;
        info!(
            observations = self.indices.len(),
            backgrounds = self.layout.backgrounds.len(),
            city = self.layout.city.as_deref().unwrap_or("-"),
            bound = self.bound.as_deref().unwrap_or("-"),
            "park ready"
        );
        Ok(array)
    }

    /// Builds the terrain and colormaps of `layout` into this park's scope
    /// and returns an environment over them, not yet made.
    fn environment(
        &mut self,
        layout: &EnvironmentLayout,
        index: Option<Handle>,
    ) -> Result<Environment, SceneError> {
        let root = &self.layout.root;

        let mut terrain = Terrain::new(self.device.clone(), root.join(&layout.terrain));
        let geometry = terrain.make();
        terrain.enter_into(&mut self.scope)?;
        let geometry = geometry?;

        let mut materials = Vec::with_capacity(layout.colormaps.len());
        for name in &layout.colormaps {
            let mut colormap = Colormap::new(self.device.clone(), root.join(name));
            let material = colormap.make();
            colormap.enter_into(&mut self.scope)?;
            materials.push(material?);
        }

        Ok(Environment::new(self.device.clone(), geometry, materials, index))
    }

    /// Binds observation `id` to the foreground. Returns whether anything
    /// changed; binding the current id is free.
    pub fn update_observation(&mut self, id: &str) -> Result<bool, SceneError> {
        if self.bound.as_deref() == Some(id) {
            return Ok(false);
        }
        let index = *self
            .indices
            .get(id)
            .ok_or_else(|| SceneError::UnknownObservation(id.to_string()))?;
        let foreground = self.foreground.as_mut().ok_or(SceneError::NotMade("park"))?;
        foreground.update_index(index)?;
        self.bound = Some(id.to_string());
        Ok(true)
    }

    pub fn bound_id(&self) -> Option<&str> {
        self.bound.as_deref()
    }

    pub fn has_observation(&self, id: &str) -> bool {
        self.indices.contains_key(id)
    }

    pub fn observation_ids(&self) -> impl Iterator<Item = &str> {
        self.indices.keys().map(String::as_str)
    }

    /// Instance array of `[foreground, backgrounds...]`.
    pub fn instances(&self) -> Option<Handle> {
        self.instances
    }

    pub fn foreground_instance(&self) -> Option<Handle> {
        self.foreground.as_ref().and_then(Environment::instance)
    }

    /// Overlay swaps performed since `make()`.
    pub fn rebuild_count(&self) -> u64 {
        self.foreground.as_ref().map_or(0, Environment::rebuilds)
    }

    pub fn close(&mut self) {
        self.instances = None;
        self.foreground = None;
        self.scope.close();
    }
}

impl Scoped for Park {
    fn scope_mut(&mut self) -> &mut ResourceScope {
        &mut self.scope
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::{EnvironmentLayout, Park, ParkLayout};
    use crate::error::SceneError;
    use engine::{Device, HeadlessDevice, Param};
    use formats::demo::{
        DEMO_BACKGROUND, DEMO_CITY, DEMO_COLORMAP, DEMO_FOREGROUND, write_demo_city,
        write_demo_dataset,
    };
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;

    pub(crate) fn temp_dir(label: &str) -> PathBuf {
        let mut dir = std::env::temp_dir();
        dir.push(format!("sunrise_park_{label}_{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).expect("create temp dir");
        dir
    }

    pub(crate) fn demo_layout(root: &Path, observations: &[&str]) -> ParkLayout {
        write_demo_dataset(root, 4, observations).expect("write dataset");
        ParkLayout {
            root: root.to_path_buf(),
            foreground: EnvironmentLayout {
                terrain: DEMO_FOREGROUND.to_string(),
                colormaps: vec![DEMO_COLORMAP.to_string()],
            },
            backgrounds: vec![EnvironmentLayout {
                terrain: DEMO_BACKGROUND.to_string(),
                colormaps: vec![DEMO_BACKGROUND.to_string()],
            }],
            observations: observations.iter().map(|id| id.to_string()).collect(),
            default_observation: None,
            city: None,
        }
    }

    fn headless() -> (Arc<HeadlessDevice>, Arc<dyn Device>) {
        let headless = Arc::new(HeadlessDevice::new());
        let device: Arc<dyn Device> = headless.clone();
        (headless, device)
    }

    #[test]
    fn make_binds_the_first_observation() {
        let root = temp_dir("make");
        let (headless, device) = headless();
        let mut park = Park::new(device, demo_layout(&root, &["a", "b"]));

        let instances = park.make().unwrap();
        assert_eq!(park.bound_id(), Some("a"));
        assert_eq!(park.observation_ids().collect::<Vec<_>>(), vec!["a", "b"]);
        let items = headless.data_items(instances).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(Some(items[0]), park.foreground_instance());

        park.close();
        assert_eq!(headless.live_objects(), 0);
        assert_eq!(headless.invalid_releases(), 0);
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn rebinding_the_same_id_is_free() {
        let root = temp_dir("same");
        let (headless, device) = headless();
        let mut park = Park::new(device, demo_layout(&root, &["a", "b"]));
        park.make().unwrap();
        let instance = park.foreground_instance().unwrap();

        assert!(park.update_observation("b").unwrap());
        assert!(!park.update_observation("b").unwrap());
        assert_eq!(park.rebuild_count(), 1);
        assert_eq!(park.bound_id(), Some("b"));
        assert_eq!(park.foreground_instance(), Some(instance));
        assert!(matches!(
            headless.param(instance, "group"),
            Some(Param::Object(_))
        ));

        park.close();
        assert_eq!(headless.live_objects(), 0);
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn unknown_observations_leave_the_binding_alone() {
        let root = temp_dir("unknown");
        let (headless, device) = headless();
        let mut park = Park::new(device, demo_layout(&root, &["a"]));
        park.make().unwrap();

        let err = park.update_observation("zzz").unwrap_err();
        assert!(matches!(err, SceneError::UnknownObservation(ref id) if id == "zzz"));
        assert!(err.is_client_error());
        assert_eq!(park.bound_id(), Some("a"));
        assert_eq!(park.rebuild_count(), 0);

        park.close();
        assert_eq!(headless.live_objects(), 0);
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn default_observation_must_exist() {
        let root = temp_dir("default");
        let (headless, device) = headless();
        let mut layout = demo_layout(&root, &["a"]);
        layout.default_observation = Some("b".to_string());
        let mut park = Park::new(device, layout);

        assert!(matches!(park.make(), Err(SceneError::UnknownObservation(_))));
        park.close();
        assert_eq!(headless.live_objects(), 0);
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn city_layers_follow_the_backgrounds() {
        let root = temp_dir("city");
        let (headless, device) = headless();
        let mut layout = demo_layout(&root, &["a"]);
        write_demo_city(&root.join(DEMO_CITY), 2).unwrap();
        layout.city = Some(DEMO_CITY.to_string());
        let mut park = Park::new(device, layout);

        let instances = park.make().unwrap();
        let items = headless.data_items(instances).unwrap();
        // Foreground, one background, building and four city backgrounds.
        assert_eq!(items.len(), 7);
        assert_eq!(headless.param(items[2], "transform"), None);
        assert!(matches!(
            headless.param(items[6], "transform"),
            Some(Param::Affine3f(m)) if m[0] == -0.99
        ));
        assert!(park.update_observation("a").is_ok());

        park.close();
        assert_eq!(headless.live_objects(), 0);
        assert_eq!(headless.invalid_releases(), 0);
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn missing_city_fails_make_without_leaking() {
        let root = temp_dir("nocity");
        let (headless, device) = headless();
        let mut layout = demo_layout(&root, &["a"]);
        layout.city = Some("nowhere".to_string());
        let mut park = Park::new(device, layout);

        assert!(matches!(park.make(), Err(SceneError::Asset(_))));
        park.close();
        assert_eq!(headless.live_objects(), 0);
        let _ = fs::remove_dir_all(&root);
    }
}
