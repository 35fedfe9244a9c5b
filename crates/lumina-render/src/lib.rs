//! Rendering pipeline for the Lumina engine.
//!
//! This crate provides:
//! - the render pass graph (skybox, deferred PBR, GUI and shadow passes)
//! - shader programs and lazily rebuilt pipelines with hot reload
//! - lights with stable slot indices and cascaded shadow maps
//! - meshes, textures and materials under either texture binding strategy
//! - the [`Renderer`], which records and submits one frame at a time

pub mod camera;
pub mod draw;
pub mod error;
pub mod gui;
pub mod light;
pub mod material;
pub mod mesh;
pub mod render_pass;
pub mod renderer;
pub mod screenshot;
pub mod settings;
pub mod shader;
pub mod shadow;
pub mod swapchain;
pub mod targets;
pub mod texture;

pub use camera::{Camera, CameraUniforms, Cascade};
pub use draw::{DrawCommands, DrawConstants, DrawContext};
pub use error::{RenderError, Result};
pub use gui::{GuiFrame, GuiHook};
pub use light::{Light, LightSlot, LightSlotAllocator, LightSlots, LightType};
pub use material::{Material, MaterialBinding, MaterialDesc, MaterialParams, Materials, TextureSlot};
pub use mesh::{ImportedMesh, Mesh, MeshRenderer, Model, Vertex};
pub use render_pass::{
    build_render_pass_desc, Framebuffer, PassConfig, RenderPass, RenderPasses,
    RenderingPipelineType,
};
pub use renderer::{ComputePass, FrameOutcome, Renderer, RendererConfig, ResourceCaches};
pub use screenshot::{save_screenshot, ScreenshotConfig, ScreenshotError};
pub use settings::{DebugMode, GraphicsSettings, MsaaMode, Settings, SettingsChanges};
pub use shader::{
    DirectoryShaderSource, MemoryShaderSource, PipelineTarget, ShaderPipeline, ShaderProgram,
    ShaderSource, ShaderStage,
};
pub use shadow::ShadowMap;
pub use swapchain::Swapchain;
pub use targets::RenderTargets;
pub use texture::{Texture, TextureData};

#[cfg(test)]
pub(crate) mod test_support {
    use lumina_gpu::headless::HeadlessDevice;
    use lumina_gpu::SharedDevice;
    use std::sync::Arc;

    use crate::shader::MemoryShaderSource;

    pub fn headless() -> (Arc<HeadlessDevice>, SharedDevice) {
        let headless = Arc::new(HeadlessDevice::default());
        let shared: SharedDevice = headless.clone();
        (headless, shared)
    }

    /// Smallest blob the headless device accepts as SPIR-V.
    pub fn spirv() -> Vec<u8> {
        [0x0723_0203u32, 0x0001_0000, 0, 1, 0]
            .iter()
            .flat_map(|w| w.to_le_bytes())
            .collect()
    }

    /// Vertex and fragment stages for every built-in shader.
    pub fn shader_source() -> MemoryShaderSource {
        let mut source = MemoryShaderSource::new();
        for name in ["skybox", "pbr", "shadow"] {
            source.insert(format!("{name}.vert.spv"), spirv());
            source.insert(format!("{name}.frag.spv"), spirv());
        }
        source
    }
}
