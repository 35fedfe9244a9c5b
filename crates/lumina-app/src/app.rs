//! `LuminaApp` trait definition.

use crate::context::AppContext;
use lumina_render::FrameOutcome;
use winit::event::{DeviceEvent, DeviceId, WindowEvent};

/// Trait for Lumina applications.
///
/// The framework creates the window, device and renderer, feeds input into
/// [`AppContext::input`] and renders [`AppContext::scene`] from
/// [`AppContext::camera`] once per loop iteration.
pub trait LuminaApp: Sized {
    /// Initialize the application.
    ///
    /// Called once after the window and renderer exist. Load models,
    /// textures and materials and populate the scene here.
    fn init(ctx: &mut AppContext) -> anyhow::Result<Self>;

    /// Update application state.
    ///
    /// Called every frame before rendering with the delta time in seconds.
    fn update(&mut self, ctx: &mut AppContext, dt: f32);

    /// Called after the renderer handled a frame.
    #[allow(unused_variables)]
    fn on_frame(&mut self, ctx: &mut AppContext, outcome: FrameOutcome) {}

    /// Handle window resize.
    ///
    /// The renderer recreates its swapchain on the next frame.
    #[allow(unused_variables)]
    fn on_resize(&mut self, ctx: &mut AppContext, width: u32, height: u32) -> anyhow::Result<()> {
        Ok(())
    }

    /// Handle window events.
    ///
    /// Return `true` if the event was handled and should not be processed
    /// further.
    #[allow(unused_variables)]
    fn on_event(&mut self, ctx: &mut AppContext, event: &WindowEvent) -> bool {
        false
    }

    /// Handle device events (raw input).
    #[allow(unused_variables)]
    fn on_device_event(&mut self, device_id: DeviceId, event: &DeviceEvent) {}

    /// Called when the window is asked to close. Return `false` to cancel.
    #[allow(unused_variables)]
    fn on_close_requested(&mut self, ctx: &mut AppContext) -> bool {
        true
    }

    /// Cleanup resources before shutdown.
    ///
    /// The device is idle when this is called.
    #[allow(unused_variables)]
    fn cleanup(&mut self, ctx: &mut AppContext) {}
}
