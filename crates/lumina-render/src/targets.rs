//! Render targets and framebuffers.
//!
//! [`RenderTargets`] owns the transient attachments of the scene passes and
//! one framebuffer per swapchain image for every swapchain-sized pass.
//! Framebuffer attachments are resolved by the attachment names in each
//! pass description, so a framebuffer always matches its pass.

use ash::vk;
use lumina_gpu::{Image, ImageDesc, ImageView, SharedDevice};
use std::sync::Arc;

use crate::error::Result;
use crate::render_pass::{
    Framebuffer, RenderPass, RenderPasses, RenderingPipelineType, DEPTH_FORMAT, LIGHTING_FORMAT,
};
use crate::swapchain::Swapchain;

/// Transient attachments and per-image framebuffers.
#[derive(Default)]
pub struct RenderTargets {
    extent: vk::Extent2D,
    samples: vk::SampleCountFlags,
    // Framebuffers are dropped before the views they reference
    skybox_framebuffers: Vec<Framebuffer>,
    pbr_framebuffers: Vec<Framebuffer>,
    gui_framebuffers: Vec<Framebuffer>,
    swapchain_views: Vec<ImageView>,
    final_color: ImageView,
    final_resolve: Option<ImageView>,
    lighting_diffuse: ImageView,
    lighting_specular: ImageView,
    depth: ImageView,
}

impl RenderTargets {
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn new(
        device: &SharedDevice,
        swapchain: &Swapchain,
        passes: &RenderPasses,
        samples: vk::SampleCountFlags,
    ) -> Result<Self> {
        let extent = swapchain.extent();
        let format = swapchain.format();
        let msaa = samples != vk::SampleCountFlags::TYPE_1;

        let attachment = |name: &str,
                          format: vk::Format,
                          usage: vk::ImageUsageFlags,
                          samples: vk::SampleCountFlags|
         -> Result<ImageView> {
            let image = Arc::new(Image::create(
                device,
                &ImageDesc::new_2d(name, extent, format, usage).samples(samples),
            )?);
            Ok(image.create_default_view()?)
        };

        let mut targets = Self {
            extent,
            samples,
            final_color: attachment(
                "final_color",
                format,
                vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_SRC,
                samples,
            )?,
            final_resolve: if msaa {
                Some(attachment(
                    "final_color_resolve",
                    format,
                    vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_SRC,
                    vk::SampleCountFlags::TYPE_1,
                )?)
            } else {
                None
            },
            lighting_diffuse: attachment(
                "lighting_diffuse",
                LIGHTING_FORMAT,
                vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::INPUT_ATTACHMENT,
                samples,
            )?,
            lighting_specular: attachment(
                "lighting_specular",
                LIGHTING_FORMAT,
                vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::INPUT_ATTACHMENT,
                samples,
            )?,
            depth: attachment(
                "depth",
                DEPTH_FORMAT,
                vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
                samples,
            )?,
            swapchain_views: swapchain
                .images()
                .iter()
                .map(Image::create_default_view)
                .collect::<lumina_gpu::Result<Vec<_>>>()?,
            ..Default::default()
        };

        targets.skybox_framebuffers = targets.create_framebuffers(device, &passes.skybox)?;
        targets.pbr_framebuffers = targets.create_framebuffers(device, &passes.pbr)?;
        targets.gui_framebuffers = targets.create_framebuffers(device, &passes.gui)?;
        tracing::debug!(
            "Created render targets {}x{} with {:?}",
            extent.width,
            extent.height,
            samples
        );
        Ok(targets)
    }

    fn create_framebuffers(
        &self,
        device: &SharedDevice,
        pass: &RenderPass,
    ) -> Result<Vec<Framebuffer>> {
        (0..self.swapchain_views.len())
            .map(|image| {
                let views: Vec<vk::ImageView> = pass
                    .desc()
                    .attachments
                    .iter()
                    .map(|a| self.view_for(a.name, image))
                    .collect();
                Framebuffer::new(device, pass, &views, self.extent)
            })
            .collect()
    }

    fn view_for(&self, name: &str, image: usize) -> vk::ImageView {
        match name {
            "final_color" => self.final_color.handle(),
            "final_color_resolve" => self
                .final_resolve
                .as_ref()
                .map_or(vk::ImageView::null(), ImageView::handle),
            "lighting_diffuse" => self.lighting_diffuse.handle(),
            "lighting_specular" => self.lighting_specular.handle(),
            "depth" => self.depth.handle(),
            "swapchain" => self.swapchain_views[image].handle(),
            _ => vk::ImageView::null(),
        }
    }

    /// Release every framebuffer and view, including swapchain image views.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Whether the targets no longer match the swapchain extent or sample count.
    pub fn is_stale(&self, extent: vk::Extent2D, samples: vk::SampleCountFlags) -> bool {
        self.extent != extent || self.samples != samples
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn samples(&self) -> vk::SampleCountFlags {
        self.samples
    }

    /// Framebuffer of a swapchain-sized pass for one swapchain image.
    pub fn framebuffer(&self, kind: RenderingPipelineType, image: u32) -> Option<&Framebuffer> {
        let framebuffers = match kind {
            RenderingPipelineType::Skybox => &self.skybox_framebuffers,
            RenderingPipelineType::PbrModel => &self.pbr_framebuffers,
            RenderingPipelineType::Gui => &self.gui_framebuffers,
            RenderingPipelineType::CascadedShadowMapping => return None,
        };
        framebuffers.get(image as usize)
    }

    /// Multisampled (or single-sampled) final color.
    pub fn final_color(&self) -> Option<&Arc<Image>> {
        self.final_color.image()
    }

    /// Single-sampled image holding the finished frame after the PBR pass,
    /// in `TRANSFER_SRC_OPTIMAL`.
    pub fn final_image(&self) -> Option<&Arc<Image>> {
        match &self.final_resolve {
            Some(view) => view.image(),
            None => self.final_color.image(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render_pass::PassConfig;
    use crate::test_support::headless;
    use lumina_gpu::headless::Call;
    use lumina_gpu::SwapchainDesc;

    fn setup(
        samples: vk::SampleCountFlags,
    ) -> (
        Arc<lumina_gpu::headless::HeadlessDevice>,
        SharedDevice,
        Swapchain,
        RenderPasses,
    ) {
        let (headless, device) = headless();
        let swapchain = Swapchain::new(
            &device,
            &SwapchainDesc {
                width: 64,
                height: 32,
                vsync: true,
                hdr: false,
                old: vk::SwapchainKHR::null(),
            },
        )
        .unwrap();
        let passes = RenderPasses::new(
            &device,
            &PassConfig {
                color_format: swapchain.format(),
                samples,
            },
        )
        .unwrap();
        (headless, device, swapchain, passes)
    }

    #[test]
    fn one_framebuffer_per_swapchain_image_and_pass() {
        let (headless, device, swapchain, passes) = setup(vk::SampleCountFlags::TYPE_1);
        let targets =
            RenderTargets::new(&device, &swapchain, &passes, vk::SampleCountFlags::TYPE_1)
                .unwrap();
        assert_eq!(headless.live_objects("framebuffer"), 3 * swapchain.image_count());
        assert!(targets
            .framebuffer(RenderingPipelineType::Gui, 2)
            .is_some());
        assert!(targets
            .framebuffer(RenderingPipelineType::CascadedShadowMapping, 0)
            .is_none());
        assert!(Arc::ptr_eq(
            targets.final_image().unwrap(),
            targets.final_color().unwrap()
        ));
    }

    #[test]
    fn msaa_targets_add_a_single_sampled_resolve() {
        let (headless, device, swapchain, passes) = setup(vk::SampleCountFlags::TYPE_4);
        let targets =
            RenderTargets::new(&device, &swapchain, &passes, vk::SampleCountFlags::TYPE_4)
                .unwrap();
        let resolve = targets.final_image().unwrap();
        assert_eq!(resolve.samples(), vk::SampleCountFlags::TYPE_1);
        assert_eq!(
            targets.final_color().unwrap().samples(),
            vk::SampleCountFlags::TYPE_4
        );
        assert_eq!(
            headless.count_calls(|c| matches!(
                c,
                Call::CreateImage {
                    samples: vk::SampleCountFlags::TYPE_4,
                    ..
                }
            )),
            4
        );
        assert!(targets.is_stale(targets.extent(), vk::SampleCountFlags::TYPE_1));
    }

    #[test]
    fn clearing_releases_swapchain_views_before_destroy() {
        let (headless, device, swapchain, passes) = setup(vk::SampleCountFlags::TYPE_1);
        let mut targets =
            RenderTargets::new(&device, &swapchain, &passes, vk::SampleCountFlags::TYPE_1)
                .unwrap();
        targets.clear();
        assert_eq!(headless.live_objects("image_view"), 0);
        assert_eq!(headless.live_objects("framebuffer"), 0);
        // Would panic with live views
        drop(swapchain);
        assert_eq!(headless.live_objects("swapchain"), 0);
    }
}
