use std::fmt;
use std::path::{Path, PathBuf};

use scene::{EnvironmentLayout, ParkLayout, SceneSettings};
use serde::{Deserialize, Serialize};

pub const RENDERER_TYPES: &[&str] = &["scivis", "ao", "pathtracer"];
pub const MODULES: &[&str] = &["denoiser"];

#[derive(Debug)]
pub enum ConfigError {
    InvalidRendererType(String),
    InvalidSampleCount(u32),
    InvalidModule(String),
    NoObservations,
    InvalidPoolSize(usize),
    Io { path: PathBuf, source: std::io::Error },
    Parse { path: PathBuf, source: serde_json::Error },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidRendererType(value) => write!(
                f,
                "renderer.type must be one of {}, got {value:?}",
                RENDERER_TYPES.join(", ")
            ),
            ConfigError::InvalidSampleCount(value) => {
                write!(f, "renderer.samples must be at least 1, got {value}")
            }
            ConfigError::InvalidModule(value) => write!(
                f,
                "renderer.modules may only contain {}, got {value:?}",
                MODULES.join(", ")
            ),
            ConfigError::NoObservations => {
                write!(f, "server.observations must list at least one id")
            }
            ConfigError::InvalidPoolSize(value) => {
                write!(f, "server.pool_size must be at least 1, got {value}")
            }
            ConfigError::Io { path, source } => {
                write!(f, "failed to read {}: {source}", path.display())
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse {}: {source}", path.display())
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    #[serde(rename = "type")]
    pub renderer_type: String,
    pub samples: u32,
    pub modules: Vec<String>,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            renderer_type: "pathtracer".to_string(),
            samples: 4,
            modules: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub name: String,
    pub version: String,
    pub bind: String,
    pub port: u16,
    pub pool_size: usize,
    pub observations: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "sunrise".to_string(),
            version: "1.0".to_string(),
            bind: "0.0.0.0".to_string(),
            port: 8080,
            pool_size: 6,
            observations: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    pub terrain: String,
    #[serde(default)]
    pub colormaps: Vec<String>,
}

impl EnvironmentConfig {
    fn layout(&self) -> EnvironmentLayout {
        EnvironmentLayout {
            terrain: self.terrain.clone(),
            colormaps: self.colormaps.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    pub root: PathBuf,
    /// Engine library for the `ospray` device.
    pub library: String,
    pub hdri: Option<PathBuf>,
    /// Constant fill light under the per-request sun and sky.
    pub ambient: bool,
    pub foreground: EnvironmentConfig,
    pub backgrounds: Vec<EnvironmentConfig>,
    pub default_observation: Option<String>,
    /// City directory under `root`, drawn after the backgrounds.
    pub city: Option<String>,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("data"),
            library: "libospray.so".to_string(),
            hdri: None,
            ambient: true,
            foreground: EnvironmentConfig {
                terrain: "park".to_string(),
                colormaps: vec!["pink0".to_string()],
            },
            backgrounds: vec![EnvironmentConfig {
                terrain: "earth".to_string(),
                colormaps: vec!["earth".to_string()],
            }],
            default_observation: None,
            city: None,
        }
    }
}

/// Passed through to the web client untouched.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub map: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub renderer: RendererConfig,
    pub server: ServerConfig,
    pub scene: SceneConfig,
    pub client: ClientConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Applies `SUNRISE_SERVER_BIND` / `SUNRISE_SERVER_PORT` style overrides.
    /// Unparseable values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(bind) = lookup("SUNRISE_SERVER_BIND") {
            self.server.bind = bind;
        }
        if let Some(port) = lookup("SUNRISE_SERVER_PORT").and_then(|v| v.parse().ok()) {
            self.server.port = port;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let renderer = &self.renderer;
        if !RENDERER_TYPES.contains(&renderer.renderer_type.as_str()) {
            return Err(ConfigError::InvalidRendererType(renderer.renderer_type.clone()));
        }
        if renderer.samples < 1 {
            return Err(ConfigError::InvalidSampleCount(renderer.samples));
        }
        if let Some(module) = renderer
            .modules
            .iter()
            .find(|m| !MODULES.contains(&m.as_str()))
        {
            return Err(ConfigError::InvalidModule(module.clone()));
        }
        if self.server.observations.is_empty() {
            return Err(ConfigError::NoObservations);
        }
        if self.server.pool_size < 1 {
            return Err(ConfigError::InvalidPoolSize(self.server.pool_size));
        }
        Ok(())
    }

    pub fn default_observation(&self) -> Option<&str> {
        self.scene
            .default_observation
            .as_deref()
            .or_else(|| self.server.observations.first().map(String::as_str))
    }

    pub fn park_layout(&self) -> ParkLayout {
        ParkLayout {
            root: self.scene.root.clone(),
            foreground: self.scene.foreground.layout(),
            backgrounds: self.scene.backgrounds.iter().map(EnvironmentConfig::layout).collect(),
            observations: self.server.observations.clone(),
            default_observation: self.default_observation().map(str::to_string),
            city: self.scene.city.clone(),
        }
    }

    pub fn scene_settings(&self) -> SceneSettings {
        SceneSettings {
            renderer: self.renderer.renderer_type.clone(),
            samples: self.renderer.samples,
            denoiser: self.renderer.modules.iter().any(|m| m == "denoiser"),
            hdri: self.scene.hdri.as_ref().map(|p| self.scene.root.join(p)),
            ambient: self.scene.ambient,
        }
    }
}
