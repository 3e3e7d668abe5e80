//! Small synthetic park dataset in the layout the tile server loads.

use std::path::Path;

use crate::binary_array::{AssetFormatError, Vec2f, Vec3f, Vec3u, Vec4u, write_binary_array};
use crate::layout::{
    BACKGROUND_COLORS, BACKGROUND_TRIANGLES, BUILDING_INDEX, BUILDING_PALETTE, CITY_BACKGROUNDS,
    CITY_BUILDING, COLORMAP_TEXELS, OBSERVATION_INDEX, TERRAIN_NORMALS, TERRAIN_POSITIONS,
    TERRAIN_QUADS, TERRAIN_TEXCOORDS, observation_dir,
};

pub const DEMO_FOREGROUND: &str = "park";
pub const DEMO_COLORMAP: &str = "pink0";
pub const DEMO_BACKGROUND: &str = "earth";
pub const DEMO_CITY: &str = "city";
/// Spacing of the park grid, in terrain units.
pub const DEMO_CELL: f32 = 100.0;
const COLORMAP_TEXELS_WIDE: usize = 256;
const PALETTE_SIZE: usize = 256;

/// Writes a flat `grid` x `grid` quad terrain to `dir`.
pub fn write_grid_terrain(
    dir: &Path,
    grid: usize,
    cell: f32,
    height: f32,
) -> Result<(), AssetFormatError> {
    let side = grid + 1;
    let mut positions = Vec::with_capacity(side * side);
    let mut texcoords = Vec::with_capacity(side * side);
    for row in 0..side {
        for col in 0..side {
            positions.push(Vec3f::new(col as f32 * cell, height, row as f32 * cell));
            texcoords.push(Vec2f {
                x: col as f32 / grid.max(1) as f32,
                y: row as f32 / grid.max(1) as f32,
            });
        }
    }
    let normals = vec![Vec3f::new(0.0, 1.0, 0.0); side * side];

    let mut quads = Vec::with_capacity(grid * grid);
    for row in 0..grid {
        for col in 0..grid {
            let a = (row * side + col) as u32;
            let side = side as u32;
            quads.push(Vec4u {
                a,
                b: a + 1,
                c: a + side + 1,
                d: a + side,
            });
        }
    }

    write_binary_array(dir.join(TERRAIN_POSITIONS), &[positions.len()], positions.as_slice())?;
    write_binary_array(dir.join(TERRAIN_TEXCOORDS), &[texcoords.len()], texcoords.as_slice())?;
    write_binary_array(dir.join(TERRAIN_NORMALS), &[normals.len()], normals.as_slice())?;
    write_binary_array(dir.join(TERRAIN_QUADS), &[quads.len()], quads.as_slice())?;
    Ok(())
}

/// Writes a 256x1 texture that ramps from black to `tint`.
pub fn write_gradient_colormap(dir: &Path, tint: Vec3f) -> Result<(), AssetFormatError> {
    let texels = (0..COLORMAP_TEXELS_WIDE)
        .map(|i| {
            let t = i as f32 / (COLORMAP_TEXELS_WIDE - 1) as f32;
            Vec3f::new(tint.x * t, tint.y * t, tint.z * t)
        })
        .collect::<Vec<_>>();
    write_binary_array(dir.join(COLORMAP_TEXELS), &[COLORMAP_TEXELS_WIDE, 1], texels.as_slice())
}

/// Writes a complete dataset under `root`:
/// - `park/`: a `grid` x `grid` quad terrain,
/// - `pink0/`: its single colormap,
/// - `earth/`: a one-quad background holding its own terrain and colormap,
/// - `observation_<id>/`: one material index per park quad, for each id.
pub fn write_demo_dataset<S: AsRef<str>>(
    root: &Path,
    grid: usize,
    observations: &[S],
) -> Result<(), AssetFormatError> {
    write_grid_terrain(&root.join(DEMO_FOREGROUND), grid, DEMO_CELL, 0.0)?;
    write_gradient_colormap(&root.join(DEMO_COLORMAP), Vec3f::new(1.0, 0.4, 0.7))?;

    let earth = root.join(DEMO_BACKGROUND);
    write_grid_terrain(&earth, 1, DEMO_CELL * grid.max(1) as f32, -1.0)?;
    write_gradient_colormap(&earth, Vec3f::new(0.2, 0.5, 0.3))?;

    // One colormap, so every quad selects material 0.
    let index = vec![0u8; grid * grid];
    for id in observations {
        let path = observation_dir(root, id.as_ref()).join(OBSERVATION_INDEX);
        write_binary_array(path, &[index.len()], index.as_slice())?;
    }
    Ok(())
}

/// Writes a city under `dir`: a `grid` x `grid` block of building quads with
/// a full material palette, and one vertex-coloured square per background.
pub fn write_demo_city(dir: &Path, grid: usize) -> Result<(), AssetFormatError> {
    let building = dir.join(CITY_BUILDING);
    write_grid_terrain(&building, grid, DEMO_CELL, 10.0)?;
    let palette = (0..PALETTE_SIZE)
        .map(|i| {
            let t = i as f32 / (PALETTE_SIZE - 1) as f32;
            Vec3f::new(t, 0.5, 1.0 - t)
        })
        .collect::<Vec<_>>();
    write_binary_array(building.join(BUILDING_PALETTE), &[palette.len()], palette.as_slice())?;
    let index = (0..grid * grid)
        .map(|i| (i % PALETTE_SIZE) as u8)
        .collect::<Vec<_>>();
    write_binary_array(building.join(BUILDING_INDEX), &[index.len()], index.as_slice())?;

    let side = DEMO_CELL * grid.max(1) as f32;
    for (name, _) in CITY_BACKGROUNDS {
        write_colored_square(&dir.join(name), side)?;
    }
    Ok(())
}

/// Two triangles covering `side` x `side` at height zero.
fn write_colored_square(dir: &Path, side: f32) -> Result<(), AssetFormatError> {
    let positions = [
        Vec3f::new(0.0, 0.0, 0.0),
        Vec3f::new(side, 0.0, 0.0),
        Vec3f::new(side, 0.0, side),
        Vec3f::new(0.0, 0.0, side),
    ];
    let colors = [
        Vec3f::new(0.1, 0.3, 0.1),
        Vec3f::new(0.2, 0.4, 0.1),
        Vec3f::new(0.1, 0.4, 0.2),
        Vec3f::new(0.2, 0.3, 0.2),
    ];
    let triangles = [Vec3u { a: 0, b: 1, c: 2 }, Vec3u { a: 0, b: 2, c: 3 }];
    write_binary_array(dir.join(TERRAIN_POSITIONS), &[positions.len()], &positions[..])?;
    write_binary_array(dir.join(BACKGROUND_COLORS), &[colors.len()], &colors[..])?;
    write_binary_array(dir.join(BACKGROUND_TRIANGLES), &[triangles.len()], &triangles[..])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{DEMO_BACKGROUND, DEMO_FOREGROUND, write_demo_city, write_demo_dataset};
    use crate::binary_array::{BinaryArray, Vec3f, Vec3u, Vec4u};
    use crate::layout::{
        BACKGROUND_COLORS, BACKGROUND_TRIANGLES, BUILDING_INDEX, BUILDING_PALETTE,
        CITY_BACKGROUNDS, CITY_BUILDING, COLORMAP_TEXELS, OBSERVATION_INDEX, TERRAIN_POSITIONS,
        TERRAIN_QUADS, observation_dir,
    };
    use std::fs;
    use std::path::PathBuf;

    fn temp_dir(label: &str) -> PathBuf {
        let mut dir = std::env::temp_dir();
        dir.push(format!("sunrise_demo_{label}_{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).expect("create temp dir");
        dir
    }

    #[test]
    fn grid_dataset_has_consistent_counts() {
        let root = temp_dir("grid");
        write_demo_dataset(&root, 4, &["a", "b"]).expect("write dataset");

        let park = root.join(DEMO_FOREGROUND);
        let positions = BinaryArray::<Vec3f>::load(park.join(TERRAIN_POSITIONS)).unwrap();
        let quads = BinaryArray::<Vec4u>::load(park.join(TERRAIN_QUADS)).unwrap();
        assert_eq!(positions.len(), 25);
        assert_eq!(quads.len(), 16);
        assert!(quads.records().iter().all(|q| q.c < 25));
        assert_eq!(
            quads.records()[5],
            Vec4u {
                a: 6,
                b: 7,
                c: 12,
                d: 11
            }
        );

        for id in ["a", "b"] {
            let path = observation_dir(&root, id).join(OBSERVATION_INDEX);
            let index = BinaryArray::<u8>::load(path).unwrap();
            assert_eq!(index.dims(), &[16]);
        }

        let earth = root.join(DEMO_BACKGROUND);
        let texels = BinaryArray::<Vec3f>::load(earth.join(COLORMAP_TEXELS)).unwrap();
        assert_eq!(texels.dims(), &[256, 1]);
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn city_has_a_palette_and_four_coloured_backgrounds() {
        let root = temp_dir("city");
        write_demo_city(&root, 3).expect("write city");

        let building = root.join(CITY_BUILDING);
        let palette = BinaryArray::<Vec3f>::load(building.join(BUILDING_PALETTE)).unwrap();
        assert_eq!(palette.len(), 256);
        let index = BinaryArray::<u8>::load(building.join(BUILDING_INDEX)).unwrap();
        assert_eq!(index.records(), &[0, 1, 2, 3, 4, 5, 6, 7, 8]);

        for (name, _) in CITY_BACKGROUNDS {
            let dir = root.join(name);
            let colors = BinaryArray::<Vec3f>::load(dir.join(BACKGROUND_COLORS)).unwrap();
            let positions = BinaryArray::<Vec3f>::load(dir.join(TERRAIN_POSITIONS)).unwrap();
            let triangles = BinaryArray::<Vec3u>::load(dir.join(BACKGROUND_TRIANGLES)).unwrap();
            assert_eq!(colors.len(), positions.len());
            assert_eq!(triangles.records()[1], Vec3u { a: 0, b: 2, c: 3 });
        }
        let _ = fs::remove_dir_all(&root);
    }
}
