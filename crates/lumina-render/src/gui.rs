//! GUI integration point.
//!
//! The renderer owns at most one [`GuiHook`]. It is invoked once per frame
//! inside the GUI render pass, after the scene has reached the swapchain
//! image (or the multisampled final color that resolves into it).

use ash::vk;
use lumina_gpu::CommandBuffer;

use crate::error::Result;

/// State handed to the GUI hook while the GUI pass is active.
pub struct GuiFrame<'a> {
    pub cmd: &'a mut CommandBuffer,
    pub extent: vk::Extent2D,
    pub frame_index: usize,
    pub image_index: u32,
}

pub trait GuiHook: Send {
    /// Record GUI draws into the active GUI pass.
    fn draw(&mut self, frame: &mut GuiFrame<'_>) -> Result<()>;

    /// Called after the GUI pass was recreated.
    fn recreate(
        &mut self,
        _render_pass: vk::RenderPass,
        _image_count: usize,
        _samples: vk::SampleCountFlags,
    ) -> Result<()> {
        Ok(())
    }
}
