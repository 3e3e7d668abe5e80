//! Dataset utilities behind the `sunrise-tools` binary.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use bytemuck::Pod;
use formats::demo::{
    DEMO_BACKGROUND, DEMO_CITY, DEMO_COLORMAP, DEMO_FOREGROUND, write_demo_city,
    write_demo_dataset,
};
use formats::{BinaryArray, Vec2f, Vec3f, Vec3u, Vec4u};
use serde::Serialize;
use serde_json::json;

pub const CONFIG_FILE_NAME: &str = "config.json";

/// Record type of a binary array file.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Dtype {
    #[default]
    U8,
    Vec2f,
    Vec3f,
    Vec3u,
    Vec4u,
}

impl Dtype {
    /// Reads the record type from the `.<type>.bin` suffix dataset files carry.
    pub fn infer(path: &Path) -> Option<Dtype> {
        let name = path.file_name()?.to_str()?;
        let stem = name.strip_suffix(".bin")?;
        match stem.rsplit('.').next()? {
            "vec1uc" => Some(Dtype::U8),
            "vec2f" => Some(Dtype::Vec2f),
            "vec3f" => Some(Dtype::Vec3f),
            "vec3ui" => Some(Dtype::Vec3u),
            "vec4ui" => Some(Dtype::Vec4u),
            _ => None,
        }
    }
}

impl FromStr for Dtype {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "u8" => Ok(Dtype::U8),
            "vec2f" => Ok(Dtype::Vec2f),
            "vec3f" => Ok(Dtype::Vec3f),
            "vec3u" => Ok(Dtype::Vec3u),
            "vec4u" => Ok(Dtype::Vec4u),
            other => Err(format!(
                "unknown dtype {other:?} (expected u8, vec2f, vec3f, vec3u or vec4u)"
            )),
        }
    }
}

impl fmt::Display for Dtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Dtype::U8 => "u8",
            Dtype::Vec2f => "vec2f",
            Dtype::Vec3f => "vec3f",
            Dtype::Vec3u => "vec3u",
            Dtype::Vec4u => "vec4u",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Inspection {
    pub path: PathBuf,
    pub dtype: Dtype,
    pub dims: Vec<usize>,
    pub records: usize,
    pub bytes: usize,
    /// blake3 of the record payload, header excluded.
    pub content_hash: String,
}

/// Loads `path` as an array of `dtype`, which validates header and length.
pub fn inspect(path: &Path, dtype: Dtype) -> Result<Inspection, String> {
    match dtype {
        Dtype::U8 => summarize::<u8>(path, dtype),
        Dtype::Vec2f => summarize::<Vec2f>(path, dtype),
        Dtype::Vec3f => summarize::<Vec3f>(path, dtype),
        Dtype::Vec3u => summarize::<Vec3u>(path, dtype),
        Dtype::Vec4u => summarize::<Vec4u>(path, dtype),
    }
}

fn summarize<T: Pod>(path: &Path, dtype: Dtype) -> Result<Inspection, String> {
    let array = BinaryArray::<T>::load(path).map_err(|e| e.to_string())?;
    Ok(Inspection {
        path: path.to_path_buf(),
        dtype,
        dims: array.dims().to_vec(),
        records: array.len(),
        bytes: array.bytes().len(),
        content_hash: blake3::hash(array.bytes()).to_hex().to_string(),
    })
}

/// Writes a synthetic dataset and city plus a server configuration pointing
/// at them.
pub fn synth(out_dir: &Path, grid: usize, observations: &[String]) -> Result<PathBuf, String> {
    if grid == 0 {
        return Err("--grid must be at least 1".to_string());
    }
    if observations.is_empty() {
        return Err("at least one observation id is required".to_string());
    }
    fs::create_dir_all(out_dir).map_err(|e| format!("create {out_dir:?}: {e}"))?;
    write_demo_dataset(out_dir, grid, observations).map_err(|e| e.to_string())?;
    write_demo_city(&out_dir.join(DEMO_CITY), grid).map_err(|e| e.to_string())?;

    let config = json!({
        "server": { "observations": observations },
        "scene": {
            "root": out_dir.to_string_lossy(),
            "foreground": { "terrain": DEMO_FOREGROUND, "colormaps": [DEMO_COLORMAP] },
            "backgrounds": [
                { "terrain": DEMO_BACKGROUND, "colormaps": [DEMO_BACKGROUND] }
            ],
            "city": DEMO_CITY
        }
    });
    let path = out_dir.join(CONFIG_FILE_NAME);
    let payload = serde_json::to_string_pretty(&config).map_err(|e| format!("json: {e}"))?;
    fs::write(&path, payload).map_err(|e| format!("write {path:?}: {e}"))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::{CONFIG_FILE_NAME, Dtype, inspect, synth};
    use formats::layout::{
        BACKGROUND_TRIANGLES, CITY_BUILDING, OBSERVATION_INDEX, TERRAIN_QUADS, observation_dir,
    };
    use std::fs;
    use std::path::{Path, PathBuf};

    fn temp_dir(label: &str) -> PathBuf {
        let mut dir = std::env::temp_dir();
        dir.push(format!("sunrise_tools_{label}_{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).expect("create temp dir");
        dir
    }

    #[test]
    fn dtypes_follow_the_file_suffix() {
        assert_eq!(Dtype::infer(Path::new(TERRAIN_QUADS)), Some(Dtype::Vec4u));
        assert_eq!(Dtype::infer(Path::new(OBSERVATION_INDEX)), Some(Dtype::U8));
        assert_eq!(Dtype::infer(Path::new(BACKGROUND_TRIANGLES)), Some(Dtype::Vec3u));
        assert_eq!(Dtype::infer(Path::new("notes.txt")), None);
        assert_eq!("vec2f".parse::<Dtype>(), Ok(Dtype::Vec2f));
        assert!("f64".parse::<Dtype>().is_err());
    }

    #[test]
    fn synth_writes_a_loadable_dataset() {
        let root = temp_dir("synth");
        let ids = vec!["a".to_string(), "b".to_string()];
        let config = synth(&root, 3, &ids).unwrap();
        assert_eq!(config, root.join(CONFIG_FILE_NAME));

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&config).unwrap()).unwrap();
        assert_eq!(raw["server"]["observations"], serde_json::json!(["a", "b"]));
        assert_eq!(raw["scene"]["foreground"]["terrain"], "park");

        let quads = inspect(&root.join("park").join(TERRAIN_QUADS), Dtype::Vec4u).unwrap();
        assert_eq!(quads.dims, vec![9]);
        assert_eq!(quads.records, 9);
        assert_eq!(quads.bytes, 9 * 16);
        assert_eq!(quads.content_hash.len(), 64);

        let index = observation_dir(&root, "b").join(OBSERVATION_INDEX);
        assert_eq!(inspect(&index, Dtype::U8).unwrap().records, 9);

        assert_eq!(raw["scene"]["city"], "city");
        let triangles = root.join("city").join("Knox").join(BACKGROUND_TRIANGLES);
        let triangles = inspect(&triangles, Dtype::Vec3u).unwrap();
        assert_eq!((triangles.records, triangles.bytes), (2, 24));
        assert!(root.join("city").join(CITY_BUILDING).is_dir());
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn inspect_rejects_the_wrong_record_type() {
        let root = temp_dir("wrong");
        synth(&root, 2, &["a".to_string()]).unwrap();
        let index = observation_dir(&root, "a").join(OBSERVATION_INDEX);
        // Four u8 records are not a whole number of vec3f records.
        assert!(inspect(&index, Dtype::Vec3f).is_err());
        assert!(synth(&root, 0, &["a".to_string()]).is_err());
        assert!(synth(&root, 2, &[]).is_err());
        let _ = fs::remove_dir_all(&root);
    }
}
