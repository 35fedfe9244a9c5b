//! Graphics settings and change transactions.
//!
//! Mutations made between [`Settings::start_change`] and
//! [`Settings::end_change`] are coalesced, so the renderer rebuilds what
//! they affect once, between frames.

use ash::vk;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use lumina_core::set_if_changed;

/// Multisample anti-aliasing mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MsaaMode {
    Off,
    X2,
    #[default]
    X4,
    X8,
}

impl MsaaMode {
    pub const fn sample_count(self) -> vk::SampleCountFlags {
        match self {
            Self::Off => vk::SampleCountFlags::TYPE_1,
            Self::X2 => vk::SampleCountFlags::TYPE_2,
            Self::X4 => vk::SampleCountFlags::TYPE_4,
            Self::X8 => vk::SampleCountFlags::TYPE_8,
        }
    }
}

/// Debug visualization mode for rendering.
///
/// Press F3 to cycle through modes in the viewer.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebugMode {
    /// Normal rendering (default).
    #[default]
    None = 0,
    /// Material base color only.
    Albedo = 1,
    /// Surface normals as RGB.
    Normals = 2,
    /// Linearized depth.
    Depth = 3,
    /// Accumulated diffuse and specular lighting.
    Lighting = 4,
    /// Cascade index tinted per pixel.
    ShadowCascades = 5,
}

impl DebugMode {
    /// Cycle to the next debug mode.
    #[must_use]
    pub fn next(self) -> Self {
        match self {
            Self::None => Self::Albedo,
            Self::Albedo => Self::Normals,
            Self::Normals => Self::Depth,
            Self::Depth => Self::Lighting,
            Self::Lighting => Self::ShadowCascades,
            Self::ShadowCascades => Self::None,
        }
    }

    /// Get the mode as a u32 for shader uniforms.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self as u32
    }
}

/// User-facing graphics options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphicsSettings {
    pub hdr: bool,
    pub msaa: MsaaMode,
    pub debug_mode: DebugMode,
    /// Requested swapchain size; the window size wins when they differ.
    pub resolution: [u32; 2],
    pub vsync: bool,
}

impl Default for GraphicsSettings {
    fn default() -> Self {
        Self {
            hdr: false,
            msaa: MsaaMode::default(),
            debug_mode: DebugMode::None,
            resolution: [1280, 720],
            vsync: true,
        }
    }
}

bitflags! {
    /// What a settings change requires the renderer to rebuild.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SettingsChanges: u32 {
        const SWAPCHAIN = 1 << 0;
        const RENDER_TARGETS = 1 << 1;
        const PIPELINES = 1 << 2;
        const DEBUG_MODE = 1 << 3;
    }
}

/// Graphics settings with change tracking.
#[derive(Debug, Default)]
pub struct Settings {
    current: GraphicsSettings,
    pending: SettingsChanges,
    depth: u32,
}

impl Settings {
    pub fn new(settings: GraphicsSettings) -> Self {
        Self {
            current: settings,
            pending: SettingsChanges::empty(),
            depth: 0,
        }
    }

    pub fn get(&self) -> &GraphicsSettings {
        &self.current
    }

    /// Open a change. Changes nest; only the outermost `end_change` publishes.
    pub fn start_change(&mut self) {
        self.depth += 1;
    }

    pub fn end_change(&mut self) {
        if self.depth == 0 {
            tracing::warn!("end_change called without a matching start_change");
            return;
        }
        self.depth -= 1;
    }

    pub fn is_changing(&self) -> bool {
        self.depth > 0
    }

    fn mark(&mut self, changed: bool, changes: SettingsChanges) {
        if changed {
            self.pending |= changes;
        }
    }

    pub fn set_hdr(&mut self, hdr: bool) {
        let changed = set_if_changed(&mut self.current.hdr, hdr);
        // The surface format feeds every pass and pipeline
        self.mark(
            changed,
            SettingsChanges::SWAPCHAIN | SettingsChanges::RENDER_TARGETS | SettingsChanges::PIPELINES,
        );
    }

    pub fn set_msaa(&mut self, msaa: MsaaMode) {
        let changed = set_if_changed(&mut self.current.msaa, msaa);
        self.mark(
            changed,
            SettingsChanges::RENDER_TARGETS | SettingsChanges::PIPELINES,
        );
    }

    pub fn set_debug_mode(&mut self, mode: DebugMode) {
        let changed = set_if_changed(&mut self.current.debug_mode, mode);
        self.mark(changed, SettingsChanges::DEBUG_MODE);
    }

    pub fn set_resolution(&mut self, width: u32, height: u32) {
        let changed = set_if_changed(&mut self.current.resolution, [width, height]);
        self.mark(
            changed,
            SettingsChanges::SWAPCHAIN | SettingsChanges::RENDER_TARGETS,
        );
    }

    pub fn set_vsync(&mut self, vsync: bool) {
        let changed = set_if_changed(&mut self.current.vsync, vsync);
        self.mark(changed, SettingsChanges::SWAPCHAIN);
    }

    /// Replace every setting inside a single change.
    pub fn apply(&mut self, settings: &GraphicsSettings) {
        self.start_change();
        self.set_hdr(settings.hdr);
        self.set_msaa(settings.msaa);
        self.set_debug_mode(settings.debug_mode);
        self.set_resolution(settings.resolution[0], settings.resolution[1]);
        self.set_vsync(settings.vsync);
        self.end_change();
    }

    /// Take the accumulated changes. Empty while a change is still open.
    pub fn take_changes(&mut self) -> SettingsChanges {
        if self.is_changing() {
            return SettingsChanges::empty();
        }
        std::mem::take(&mut self.pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unchanged_values_do_not_mark_changes() {
        let mut settings = Settings::new(GraphicsSettings::default());
        settings.set_vsync(true);
        settings.set_msaa(MsaaMode::X4);
        assert!(settings.take_changes().is_empty());
    }

    #[test]
    fn open_change_defers_and_coalesces() {
        let mut settings = Settings::default();
        settings.start_change();
        settings.set_msaa(MsaaMode::X8);
        settings.start_change();
        settings.set_vsync(false);
        settings.end_change();
        assert!(settings.take_changes().is_empty());
        settings.set_debug_mode(DebugMode::Normals);
        settings.end_change();

        assert_eq!(
            settings.take_changes(),
            SettingsChanges::SWAPCHAIN
                | SettingsChanges::RENDER_TARGETS
                | SettingsChanges::PIPELINES
                | SettingsChanges::DEBUG_MODE
        );
        assert!(settings.take_changes().is_empty());
        assert_eq!(settings.get().msaa, MsaaMode::X8);
    }

    #[test]
    fn apply_only_marks_what_differs() {
        let mut settings = Settings::default();
        settings.apply(&GraphicsSettings {
            debug_mode: DebugMode::Depth,
            ..Default::default()
        });
        assert_eq!(settings.take_changes(), SettingsChanges::DEBUG_MODE);
    }

    #[test]
    fn debug_mode_cycles() {
        let mut mode = DebugMode::None;
        for _ in 0..6 {
            mode = mode.next();
        }
        assert_eq!(mode, DebugMode::None);
        assert_eq!(DebugMode::ShadowCascades.as_u32(), 5);
    }

    #[test]
    fn settings_parse_from_toml_with_defaults() {
        let settings: GraphicsSettings = toml::from_str("msaa = \"x2\"\nhdr = true").unwrap();
        assert_eq!(settings.msaa, MsaaMode::X2);
        assert!(settings.hdr);
        assert!(settings.vsync);
        assert_eq!(settings.resolution, [1280, 720]);
    }
}
