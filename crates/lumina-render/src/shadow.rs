//! Shadow map resources.

use ash::vk;
use lumina_core::constants::SHADOW_MAP_RESOLUTION;
use lumina_gpu::{
    CommandPool, Image, ImageDesc, ImageView, Sampler, SamplerDesc, SharedDevice,
    SingleTimeCommands,
};
use std::sync::Arc;

use crate::error::Result;
use crate::light::LightType;
use crate::render_pass::{Framebuffer, RenderPass, SHADOW_DEPTH_FORMAT};

/// Layered depth image a light renders its shadows into.
///
/// Each layer (cascade, cube face or the single spot projection) has its
/// own view and framebuffer. Shaders sample all layers through one array
/// view.
pub struct ShadowMap {
    device: SharedDevice,
    // Framebuffers go before the views they reference
    framebuffers: Vec<Framebuffer>,
    layer_views: Vec<ImageView>,
    sampled_view: ImageView,
    extent: vk::Extent2D,
    reinit_count: u32,
}

impl ShadowMap {
    pub fn new(device: &SharedDevice, kind: LightType, render_pass: &RenderPass) -> Result<Self> {
        Self::with_resolution(device, kind, render_pass, SHADOW_MAP_RESOLUTION)
    }

    pub fn with_resolution(
        device: &SharedDevice,
        kind: LightType,
        render_pass: &RenderPass,
        resolution: u32,
    ) -> Result<Self> {
        let extent = vk::Extent2D {
            width: resolution,
            height: resolution,
        };
        let layers = kind.shadow_layers();
        let flags = if kind == LightType::Point {
            vk::ImageCreateFlags::CUBE_COMPATIBLE
        } else {
            vk::ImageCreateFlags::empty()
        };
        let image = Arc::new(Image::create(
            device,
            &ImageDesc::new_2d(
                "shadow_map",
                extent,
                SHADOW_DEPTH_FORMAT,
                vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
            )
            .array_layers(layers)
            .flags(flags),
        )?);

        let layer_views = (0..layers)
            .map(|layer| image.create_view(vk::ImageViewType::TYPE_2D, layer, 1))
            .collect::<lumina_gpu::Result<Vec<_>>>()?;
        let sampled_view = image.create_view(vk::ImageViewType::TYPE_2D_ARRAY, 0, layers)?;

        let mut map = Self {
            device: device.clone(),
            framebuffers: Vec::new(),
            layer_views,
            sampled_view,
            extent,
            reinit_count: 0,
        };
        map.framebuffers = map.create_framebuffers(render_pass)?;
        tracing::debug!("Created {kind:?} shadow map with {layers} layers");
        Ok(map)
    }

    fn create_framebuffers(&self, render_pass: &RenderPass) -> Result<Vec<Framebuffer>> {
        self.layer_views
            .iter()
            .map(|view| Framebuffer::new(&self.device, render_pass, &[view.handle()], self.extent))
            .collect()
    }

    /// Rebuild the per-layer framebuffers against a recreated shadow pass.
    pub fn reinit(&mut self, render_pass: &RenderPass) -> Result<()> {
        self.framebuffers.clear();
        self.framebuffers = self.create_framebuffers(render_pass)?;
        self.reinit_count += 1;
        Ok(())
    }

    /// Number of times [`reinit`](Self::reinit) ran.
    pub fn reinit_count(&self) -> u32 {
        self.reinit_count
    }

    pub fn layer_count(&self) -> u32 {
        self.layer_views.len() as u32
    }

    pub fn framebuffer(&self, layer: u32) -> Option<&Framebuffer> {
        self.framebuffers.get(layer as usize)
    }

    /// Array view over every layer.
    pub fn sampled_view(&self) -> &ImageView {
        &self.sampled_view
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

/// Shadow sampler with hardware depth comparison.
pub fn create_shadow_sampler(device: &SharedDevice) -> Result<Sampler> {
    Ok(Sampler::create(
        device,
        &SamplerDesc {
            address_mode: vk::SamplerAddressMode::CLAMP_TO_EDGE,
            mipmap_mode: vk::SamplerMipmapMode::NEAREST,
            compare: Some(vk::CompareOp::LESS_OR_EQUAL),
            max_lod: 0.0,
            ..Default::default()
        },
    )?)
}

/// Single-layer depth array bound in light slots without a shadow map.
pub fn create_placeholder_shadow(device: &SharedDevice, pool: &CommandPool) -> Result<ImageView> {
    let image = Arc::new(Image::create(
        device,
        &ImageDesc::new_2d(
            "shadow_placeholder",
            vk::Extent2D {
                width: 1,
                height: 1,
            },
            SHADOW_DEPTH_FORMAT,
            vk::ImageUsageFlags::SAMPLED,
        ),
    )?);
    let mut cmd = SingleTimeCommands::begin(pool)?;
    cmd.transition_image_layout(
        image.handle(),
        SHADOW_DEPTH_FORMAT,
        vk::ImageLayout::UNDEFINED,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        1,
    );
    cmd.finish()?;
    Ok(image.create_view(vk::ImageViewType::TYPE_2D_ARRAY, 0, 1)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render_pass::{PassConfig, RenderingPipelineType};
    use crate::test_support::headless;
    use lumina_gpu::headless::Call;

    fn shadow_pass(device: &SharedDevice) -> RenderPass {
        RenderPass::new(
            device,
            RenderingPipelineType::CascadedShadowMapping,
            &PassConfig {
                color_format: vk::Format::B8G8R8A8_SRGB,
                samples: vk::SampleCountFlags::TYPE_1,
            },
        )
        .unwrap()
    }

    #[test]
    fn layer_count_follows_light_type() {
        let (headless, device) = headless();
        let pass = shadow_pass(&device);
        for (kind, layers) in [
            (LightType::Directional, 4),
            (LightType::Point, 6),
            (LightType::Spot, 1),
        ] {
            let map = ShadowMap::with_resolution(&device, kind, &pass, 16).unwrap();
            assert_eq!(map.layer_count(), layers);
            assert!(map.framebuffer(layers - 1).is_some());
            assert!(map.framebuffer(layers).is_none());
        }
        assert_eq!(
            headless.count_calls(|c| matches!(c, Call::CreateImage { layers: 6, .. })),
            1
        );
        assert_eq!(headless.live_objects("framebuffer"), 0);
        assert_eq!(headless.live_objects("image"), 0);
    }

    #[test]
    fn reinit_rebuilds_framebuffers_against_new_pass() {
        let (headless, device) = headless();
        let old_pass = shadow_pass(&device);
        let mut map = ShadowMap::with_resolution(&device, LightType::Spot, &old_pass, 16).unwrap();
        let new_pass = shadow_pass(&device);
        drop(old_pass);

        map.reinit(&new_pass).unwrap();
        assert_eq!(map.reinit_count(), 1);
        assert_eq!(headless.live_objects("framebuffer"), 1);
        let last = headless
            .calls()
            .into_iter()
            .rev()
            .find_map(|c| match c {
                Call::CreateFramebuffer { render_pass, .. } => Some(render_pass),
                _ => None,
            })
            .unwrap();
        assert_eq!(last, new_pass.handle());
    }
}
