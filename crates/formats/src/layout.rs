//! On-disk names of the arrays that make up a park dataset.
//!
//! A dataset root holds one directory per terrain, colormap and observation;
//! each directory holds the binary arrays below.

use std::path::{Path, PathBuf};

pub const TERRAIN_POSITIONS: &str = "OSPGeometry.mesh.vertex.position.vec3f.bin";
pub const TERRAIN_TEXCOORDS: &str = "OSPGeometry.mesh.vertex.texcoord.vec2f.bin";
pub const TERRAIN_NORMALS: &str = "OSPGeometry.mesh.vertex.normal.vec3f.bin";
pub const TERRAIN_QUADS: &str = "OSPGeometry.mesh.index.vec4ui.bin";

pub const COLORMAP_TEXELS: &str = "OSPTexture.texture2d.data.vec3f.bin";

pub const OBSERVATION_INDEX: &str = "OSPGeometricModel.index.vec1uc.bin";

/// Per-vertex colours and triangles of a city background.
pub const BACKGROUND_COLORS: &str = "OSPGeometry.mesh.vertex.color.vec3f.bin";
pub const BACKGROUND_TRIANGLES: &str = "OSPGeometry.mesh.index.vec3ui.bin";

/// One `kd` colour per building material; the model index picks among them.
pub const BUILDING_PALETTE: &str = "OSPMaterial.obj.kd.vec3f.bin";
pub const BUILDING_INDEX: &str = OBSERVATION_INDEX;

/// Building directory inside a city.
pub const CITY_BUILDING: &str = "Building";

/// City backgrounds, outermost first, with the power of 0.99 each one is
/// scaled by so nearer layers draw over farther ones.
pub const CITY_BACKGROUNDS: [(&str, i32); 4] = [("Earth", 4), ("USA", 3), ("TN", 2), ("Knox", 1)];

/// Directory of observation `id` under a dataset root.
pub fn observation_dir(root: &Path, id: &str) -> PathBuf {
    root.join(format!("observation_{id}"))
}

#[cfg(test)]
mod tests {
    use super::observation_dir;
    use std::path::Path;

    #[test]
    fn observation_dirs_are_prefixed() {
        assert_eq!(
            observation_dir(Path::new("data"), "0000172"),
            Path::new("data/observation_0000172")
        );
    }
}
