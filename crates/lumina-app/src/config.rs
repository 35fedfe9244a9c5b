//! Application configuration.

use std::path::{Path, PathBuf};

use anyhow::Context;
use lumina_core::constants::DEFAULT_FRAMES_IN_FLIGHT;
use lumina_gpu::BackendKind;
use lumina_render::GraphicsSettings;
use serde::{Deserialize, Serialize};

/// Application configuration.
///
/// Every field has a default, so a TOML file only lists what it overrides:
///
/// ```toml
/// title = "Viewer"
/// width = 1920
/// height = 1080
///
/// [graphics]
/// msaa = "x8"
/// vsync = false
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Window title.
    pub title: String,
    /// Initial window width.
    pub width: u32,
    /// Initial window height.
    pub height: u32,
    /// Target frames per second (None for unlimited).
    pub target_fps: Option<u32>,
    /// Enable validation layers (default: debug builds only).
    pub validation: bool,
    pub frames_in_flight: usize,
    pub backend: BackendKind,
    /// Directory holding compiled `<name>.<stage>.spv` shaders.
    pub shader_dir: PathBuf,
    pub graphics: GraphicsSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            title: "Lumina Engine".to_string(),
            width: 1280,
            height: 720,
            target_fps: None,
            validation: cfg!(debug_assertions),
            frames_in_flight: DEFAULT_FRAMES_IN_FLIGHT,
            backend: BackendKind::platform_default(),
            shader_dir: PathBuf::from("shaders"),
            graphics: GraphicsSettings::default(),
        }
    }
}

impl AppConfig {
    /// Create a new config with the given title.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    /// Parse a TOML document.
    pub fn from_toml_str(source: &str) -> anyhow::Result<Self> {
        toml::from_str(source).context("Invalid application config")
    }

    /// Load a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_toml_str(&source).with_context(|| format!("In {}", path.display()))
    }

    /// Set the window dimensions.
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Set the target FPS.
    pub fn with_target_fps(mut self, fps: u32) -> Self {
        self.target_fps = Some(fps);
        self
    }

    /// Enable or disable vsync.
    pub fn with_vsync(mut self, vsync: bool) -> Self {
        self.graphics.vsync = vsync;
        self
    }

    /// Enable or disable validation layers.
    pub fn with_validation(mut self, validation: bool) -> Self {
        self.validation = validation;
        self
    }

    pub fn with_frames_in_flight(mut self, frames: usize) -> Self {
        self.frames_in_flight = frames;
        self
    }

    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_shader_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.shader_dir = dir.into();
        self
    }

    pub fn with_graphics(mut self, graphics: GraphicsSettings) -> Self {
        self.graphics = graphics;
        self
    }
}
