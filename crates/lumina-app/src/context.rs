//! Application context.

use std::sync::Arc;

use lumina_entity::Scene;
use lumina_input::InputState;
use lumina_render::{Camera, Renderer};
use winit::window::Window;

/// State shared with every [`LuminaApp`](crate::LuminaApp) callback.
pub struct AppContext {
    /// Renderer owning the device, swapchain and frame resources.
    pub renderer: Renderer,
    pub scene: Scene,
    pub camera: Camera,
    pub input: InputState,
    /// Total frames presented.
    pub frame_count: u64,
    exit_requested: bool,
    // Dropped after the renderer, which presents to it
    pub window: Arc<Window>,
}

impl AppContext {
    pub(crate) fn new(window: Arc<Window>, renderer: Renderer) -> Self {
        let size = window.inner_size();
        let mut camera = Camera::default();
        camera.set_aspect(size.width.max(1) as f32 / size.height.max(1) as f32);
        Self {
            renderer,
            scene: Scene::new(),
            camera,
            input: InputState::new(),
            frame_count: 0,
            exit_requested: false,
            window,
        }
    }

    /// Exit the event loop after the current iteration.
    pub fn request_exit(&mut self) {
        self.exit_requested = true;
    }

    pub fn exit_requested(&self) -> bool {
        self.exit_requested
    }
}
