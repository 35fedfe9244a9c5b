//! Viewer application implementation.

use std::path::Path;

use glam::{EulerRot, Quat, Vec3, Vec4};
use lumina_app::{AppContext, Camera, FrameOutcome, LuminaApp, WindowEvent};
use lumina_entity::{Entity, Transform};
use lumina_input::{KeyCode, MouseButton};
use lumina_render::{Light, MaterialDesc, MeshRenderer, MsaaMode, ScreenshotConfig};
use tracing::{info, warn};

use crate::flag_value;
use crate::geometry;

/// Mouse sensitivity for orbiting (radians per pixel).
const ORBIT_SENSITIVITY: f32 = 0.005;

/// Zoom factor per scroll line.
const ZOOM_STEP: f32 = 0.9;

/// Cubes in the ring around the origin.
const CUBE_COUNT: usize = 8;

/// Cube spin in radians per second.
const SPIN_SPEED: f32 = 0.6;

/// Camera orbiting a target point.
#[derive(Debug, Clone, Copy)]
struct Orbit {
    target: Vec3,
    yaw: f32,
    pitch: f32,
    distance: f32,
}

impl Default for Orbit {
    fn default() -> Self {
        Self {
            target: Vec3::new(0.0, 0.5, 0.0),
            yaw: 0.6,
            pitch: 0.45,
            distance: 9.0,
        }
    }
}

impl Orbit {
    const MIN_DISTANCE: f32 = 1.5;
    const MAX_DISTANCE: f32 = 60.0;
    const MAX_PITCH: f32 = 1.5;

    fn rotate(&mut self, dx: f32, dy: f32) {
        self.yaw -= dx * ORBIT_SENSITIVITY;
        self.pitch = (self.pitch + dy * ORBIT_SENSITIVITY).clamp(-Self::MAX_PITCH, Self::MAX_PITCH);
    }

    fn zoom(&mut self, lines: f32) {
        self.distance = (self.distance * ZOOM_STEP.powf(lines))
            .clamp(Self::MIN_DISTANCE, Self::MAX_DISTANCE);
    }

    fn eye(&self) -> Vec3 {
        let (sin_yaw, cos_yaw) = self.yaw.sin_cos();
        let (sin_pitch, cos_pitch) = self.pitch.sin_cos();
        self.target + Vec3::new(sin_yaw * cos_pitch, sin_pitch, cos_yaw * cos_pitch) * self.distance
    }

    fn apply(&self, camera: &mut Camera) {
        camera.set_position(self.eye());
        camera.look_at(self.target);
    }
}

fn next_msaa(mode: MsaaMode) -> MsaaMode {
    match mode {
        MsaaMode::Off => MsaaMode::X2,
        MsaaMode::X2 => MsaaMode::X4,
        MsaaMode::X4 => MsaaMode::X8,
        MsaaMode::X8 => MsaaMode::Off,
    }
}

/// Viewer application state.
pub struct Viewer {
    screenshot_config: ScreenshotConfig,
    orbit: Orbit,
    cubes: Vec<Entity>,
    time: f32,
    paused: bool,
}

impl Viewer {
    fn populate_scene(ctx: &mut AppContext) -> anyhow::Result<Vec<Entity>> {
        let renderer = &mut ctx.renderer;
        let scene = &mut ctx.scene;

        let cube = renderer.load_model("procedural://cube", |name| {
            Ok(vec![geometry::cube(name, 0.5)])
        })?;
        let ground = renderer.load_model("procedural://ground", |name| {
            Ok(vec![geometry::plane(name, 20.0)])
        })?;

        let ground_material = renderer.create_material(&MaterialDesc {
            name: "ground".to_string(),
            base_color: Vec4::new(0.55, 0.55, 0.5, 1.0),
            roughness: 0.9,
            ..Default::default()
        })?;
        let floor = scene.create_entity("ground");
        let mut floor_renderer = MeshRenderer::new(ground, vec![ground_material]);
        floor_renderer.casts_shadows = false;
        scene.attach(floor, floor_renderer)?;

        let mut cubes = Vec::with_capacity(CUBE_COUNT);
        for i in 0..CUBE_COUNT {
            let t = i as f32 / CUBE_COUNT as f32;
            let material = renderer.create_material(&MaterialDesc {
                name: format!("cube_{i}"),
                base_color: Vec4::new(0.9, 0.35 + 0.5 * t, 0.2, 1.0),
                metallic: if i % 2 == 0 { 0.0 } else { 1.0 },
                roughness: 0.15 + 0.8 * t,
                ..Default::default()
            })?;
            let angle = t * std::f32::consts::TAU;
            let entity = scene.create_entity(format!("cube_{i}"));
            scene.attach(
                entity,
                Transform::from_position(Vec3::new(angle.cos() * 3.0, 0.5, angle.sin() * 3.0)),
            )?;
            scene.attach(entity, MeshRenderer::new(cube.clone(), vec![material]))?;
            cubes.push(entity);
        }

        let sun = scene.create_entity("sun");
        scene.attach(
            sun,
            Transform::new(
                Vec3::ZERO,
                Quat::from_euler(EulerRot::YXZ, 0.8, -0.9, 0.0),
                Vec3::ONE,
            ),
        )?;
        scene.attach(
            sun,
            Light::directional(renderer.light_slots(), Vec3::new(1.0, 0.96, 0.9), 3.0),
        )?;

        let lamp = scene.create_entity("lamp");
        scene.attach(lamp, Transform::from_position(Vec3::new(0.0, 2.5, 0.0)))?;
        scene.attach(
            lamp,
            Light::point(renderer.light_slots(), Vec3::new(0.4, 0.6, 1.0), 8.0),
        )?;

        info!("Scene ready with {} entities", scene.len());
        Ok(cubes)
    }

    fn handle_hotkeys(&mut self, ctx: &mut AppContext) {
        if ctx.input.is_key_just_pressed(KeyCode::Escape) {
            ctx.request_exit();
        }
        if ctx.input.is_key_just_pressed(KeyCode::Space) {
            self.paused = !self.paused;
        }

        let just = |key| ctx.input.is_key_just_pressed(key);
        let (debug, msaa, hdr, vsync, reload, shot) = (
            just(KeyCode::F3),
            just(KeyCode::KeyM),
            just(KeyCode::KeyH),
            just(KeyCode::KeyV),
            just(KeyCode::KeyR),
            just(KeyCode::F12),
        );

        let current = ctx.renderer.settings().clone();
        let settings = ctx.renderer.settings_mut();
        settings.start_change();
        if debug {
            settings.set_debug_mode(current.debug_mode.next());
            info!("Debug mode: {:?}", current.debug_mode.next());
        }
        if msaa {
            settings.set_msaa(next_msaa(current.msaa));
            info!("MSAA: {:?}", next_msaa(current.msaa));
        }
        if hdr {
            settings.set_hdr(!current.hdr);
        }
        if vsync {
            settings.set_vsync(!current.vsync);
        }
        settings.end_change();

        if reload {
            match ctx.renderer.reload_shaders() {
                Ok(count) => info!("Reloaded {count} shader programs"),
                Err(e) => warn!("Shader reload failed: {e}"),
            }
        }
        if shot {
            ctx.renderer
                .request_screenshot(format!("screenshot_{}.png", ctx.frame_count));
        }
    }
}

impl LuminaApp for Viewer {
    fn init(ctx: &mut AppContext) -> anyhow::Result<Self> {
        let screenshot_config = ScreenshotConfig::from_args();
        if screenshot_config.enabled {
            info!(
                "Screenshot capture enabled: {:?} frames, output pattern: {}",
                screenshot_config.frames, screenshot_config.output_pattern
            );
        }

        let args: Vec<String> = std::env::args().collect();
        if let Some(path) = flag_value(&args, &["--panorama"]) {
            let texture = ctx.renderer.load_texture(Path::new(path))?;
            ctx.renderer.set_panorama(texture)?;
        }

        let cubes = Self::populate_scene(ctx)?;
        let orbit = Orbit::default();
        orbit.apply(&mut ctx.camera);

        Ok(Self {
            screenshot_config,
            orbit,
            cubes,
            time: 0.0,
            paused: false,
        })
    }

    fn update(&mut self, ctx: &mut AppContext, dt: f32) {
        self.handle_hotkeys(ctx);

        if ctx.input.is_mouse_pressed(MouseButton::Right) {
            let delta = ctx.input.mouse_delta();
            self.orbit.rotate(delta.x, delta.y);
        }
        let scroll = ctx.input.mouse().scroll_delta().y;
        if scroll != 0.0 {
            self.orbit.zoom(scroll);
        }
        self.orbit.apply(&mut ctx.camera);

        if !self.paused {
            self.time += dt;
            for (i, &entity) in self.cubes.iter().enumerate() {
                if let Some(mut transform) = ctx.scene.get_mut::<Transform>(entity) {
                    let phase = i as f32 * 0.7;
                    transform.set_rotation(Quat::from_euler(
                        EulerRot::YXZ,
                        self.time * SPIN_SPEED + phase,
                        (self.time * 0.5 + phase).sin() * 0.4,
                        0.0,
                    ));
                }
            }
        }

        if self.screenshot_config.should_capture(ctx.frame_count) {
            ctx.renderer
                .request_screenshot(self.screenshot_config.output_path(ctx.frame_count));
        }
    }

    fn on_frame(&mut self, ctx: &mut AppContext, outcome: FrameOutcome) {
        if matches!(outcome, FrameOutcome::Presented { .. })
            && self.screenshot_config.exit_after_capture
            && self.screenshot_config.all_captured(ctx.frame_count)
        {
            info!("All screenshots captured, exiting");
            ctx.request_exit();
        }
    }

    fn on_event(&mut self, _ctx: &mut AppContext, event: &WindowEvent) -> bool {
        if let WindowEvent::Focused(focused) = event {
            if !focused {
                self.paused = true;
            }
        }
        false
    }

    fn cleanup(&mut self, ctx: &mut AppContext) {
        info!("Viewer shutting down after {} frames", ctx.frame_count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orbit_clamps_pitch_and_distance() {
        let mut orbit = Orbit::default();
        orbit.rotate(0.0, 10_000.0);
        assert!((orbit.pitch - Orbit::MAX_PITCH).abs() < 1e-6);
        orbit.zoom(1_000.0);
        assert!((orbit.distance - Orbit::MIN_DISTANCE).abs() < 1e-6);
        orbit.zoom(-1_000.0);
        assert!((orbit.distance - Orbit::MAX_DISTANCE).abs() < 1e-6);
    }

    #[test]
    fn orbit_camera_looks_at_target() {
        let orbit = Orbit::default();
        let mut camera = Camera::default();
        orbit.apply(&mut camera);
        assert!((camera.position.distance(orbit.target) - orbit.distance).abs() < 1e-4);
        let to_target = (orbit.target - camera.position).normalize();
        assert!(camera.direction.abs_diff_eq(to_target, 1e-5));
    }

    #[test]
    fn msaa_cycles_through_every_mode() {
        let mut mode = MsaaMode::Off;
        let mut seen = Vec::new();
        for _ in 0..4 {
            mode = next_msaa(mode);
            seen.push(mode);
        }
        assert_eq!(seen, [MsaaMode::X2, MsaaMode::X4, MsaaMode::X8, MsaaMode::Off]);
    }
}
