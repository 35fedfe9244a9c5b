//! Render pass and attachment graph.
//!
//! Each [`RenderingPipelineType`] has a routine that builds its
//! [`RenderPassDesc`]. The skybox pass clears and draws the background into
//! the final color and depth attachments, the PBR pass draws lit geometry
//! on top, and the GUI pass draws overlays before presentation. The shadow
//! pass renders depth only, into one framebuffer per shadow map layer.

use ash::vk;
use lumina_gpu::{
    AttachmentDesc, AttachmentRef, RenderPassDesc, SharedDevice, SubpassDependency, SubpassDesc,
};

use crate::error::Result;

/// Format of the lighting accumulation attachments.
pub const LIGHTING_FORMAT: vk::Format = vk::Format::R16G16B16A16_SFLOAT;
/// Format of the scene depth attachment.
pub const DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;
/// Format of shadow map layers.
pub const SHADOW_DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;

/// Render pass kinds of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderingPipelineType {
    Skybox,
    PbrModel,
    Gui,
    CascadedShadowMapping,
}

/// Parameters every render pass description is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassConfig {
    /// Format of the final color attachment; matches the swapchain so it can
    /// be copied or resolved into it.
    pub color_format: vk::Format,
    /// Sample count of the scene attachments.
    pub samples: vk::SampleCountFlags,
}

impl PassConfig {
    pub fn is_multisampled(&self) -> bool {
        self.samples != vk::SampleCountFlags::TYPE_1
    }
}

/// Build the description of a render pass.
pub fn build_render_pass_desc(kind: RenderingPipelineType, config: &PassConfig) -> RenderPassDesc {
    match kind {
        RenderingPipelineType::Skybox => skybox_pass(config),
        RenderingPipelineType::PbrModel => pbr_pass(config),
        RenderingPipelineType::Gui => gui_pass(config),
        RenderingPipelineType::CascadedShadowMapping => shadow_pass(),
    }
}

/// Primary attachments plus the resolve companions added under MSAA.
///
/// Companions are appended after every primary, so primary indices do not
/// depend on the sample count.
struct AttachmentList {
    primaries: Vec<(AttachmentDesc, Option<AttachmentDesc>)>,
    multisampled: bool,
}

impl AttachmentList {
    fn new(multisampled: bool) -> Self {
        Self {
            primaries: Vec::new(),
            multisampled,
        }
    }

    fn add(&mut self, desc: AttachmentDesc) -> u32 {
        self.add_resolved(desc, None)
    }

    /// Add an attachment that gets `resolve` as companion when multisampled.
    fn add_resolved(&mut self, desc: AttachmentDesc, resolve: Option<AttachmentDesc>) -> u32 {
        self.primaries.push((desc, resolve));
        self.primaries.len() as u32 - 1
    }

    /// Resolve references matching `color`, or empty when nothing resolves.
    fn resolve_refs(&self, color: &[AttachmentRef]) -> Vec<AttachmentRef> {
        if !self.multisampled {
            return Vec::new();
        }
        let mut next = self.primaries.len() as u32;
        let mut companion = vec![None; self.primaries.len()];
        for (i, (_, resolve)) in self.primaries.iter().enumerate() {
            if resolve.is_some() {
                companion[i] = Some(next);
                next += 1;
            }
        }
        let refs: Vec<AttachmentRef> = color
            .iter()
            .map(|r| match companion[r.index as usize] {
                Some(index) => AttachmentRef::new(index, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL),
                None => AttachmentRef::new(vk::ATTACHMENT_UNUSED, vk::ImageLayout::UNDEFINED),
            })
            .collect();
        if refs.iter().all(|r| r.index == vk::ATTACHMENT_UNUSED) {
            Vec::new()
        } else {
            refs
        }
    }

    fn finish(self) -> Vec<AttachmentDesc> {
        let multisampled = self.multisampled;
        let (primaries, resolves): (Vec<_>, Vec<_>) = self.primaries.into_iter().unzip();
        primaries
            .into_iter()
            .chain(resolves.into_iter().flatten().filter(|_| multisampled))
            .collect()
    }
}

fn external_dependency(
    src_stage: vk::PipelineStageFlags,
    dst_stage: vk::PipelineStageFlags,
    src_access: vk::AccessFlags,
    dst_access: vk::AccessFlags,
) -> SubpassDependency {
    SubpassDependency {
        src_subpass: vk::SUBPASS_EXTERNAL,
        dst_subpass: 0,
        src_stage,
        dst_stage,
        src_access,
        dst_access,
        by_region: false,
    }
}

const ATTACHMENT_STAGES: vk::PipelineStageFlags = vk::PipelineStageFlags::from_raw(
    vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT.as_raw()
        | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS.as_raw()
        | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS.as_raw(),
);

const ATTACHMENT_WRITES: vk::AccessFlags = vk::AccessFlags::from_raw(
    vk::AccessFlags::COLOR_ATTACHMENT_WRITE.as_raw()
        | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE.as_raw(),
);

const ATTACHMENT_ACCESS: vk::AccessFlags = vk::AccessFlags::from_raw(
    ATTACHMENT_WRITES.as_raw()
        | vk::AccessFlags::COLOR_ATTACHMENT_READ.as_raw()
        | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ.as_raw(),
);

fn skybox_pass(config: &PassConfig) -> RenderPassDesc {
    let color = AttachmentDesc::color(
        "final_color",
        config.color_format,
        config.samples,
        vk::AttachmentLoadOp::CLEAR,
        vk::AttachmentStoreOp::STORE,
    );
    let depth = AttachmentDesc::depth(
        "depth",
        DEPTH_FORMAT,
        config.samples,
        vk::AttachmentLoadOp::CLEAR,
        vk::AttachmentStoreOp::STORE,
    );

    RenderPassDesc {
        attachments: vec![color, depth],
        subpasses: vec![SubpassDesc {
            color: vec![AttachmentRef::new(0, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)],
            depth: Some(AttachmentRef::new(
                1,
                vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            )),
            ..Default::default()
        }],
        // The previous frame may still be copying out of the final color
        dependencies: vec![external_dependency(
            ATTACHMENT_STAGES | vk::PipelineStageFlags::TRANSFER,
            ATTACHMENT_STAGES,
            ATTACHMENT_WRITES | vk::AccessFlags::TRANSFER_READ,
            ATTACHMENT_ACCESS,
        )],
    }
}

/// Deferred lighting pass.
///
/// The diffuse and specular accumulation attachments are written as color
/// outputs and read back as input attachments within the same subpass, so
/// they live in `GENERAL` layout and a by-region self-dependency orders the
/// read after the write.
fn pbr_pass(config: &PassConfig) -> RenderPassDesc {
    let msaa = config.is_multisampled();
    let mut list = AttachmentList::new(msaa);

    // Without MSAA the final color is what gets copied out
    let final_layout = if msaa {
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
    } else {
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL
    };
    let final_color = list.add_resolved(
        AttachmentDesc::color(
            "final_color",
            config.color_format,
            config.samples,
            vk::AttachmentLoadOp::LOAD,
            vk::AttachmentStoreOp::STORE,
        )
        .layouts(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL, final_layout),
        Some(AttachmentDesc {
            is_resolve: true,
            ..AttachmentDesc::color(
                "final_color_resolve",
                config.color_format,
                vk::SampleCountFlags::TYPE_1,
                vk::AttachmentLoadOp::DONT_CARE,
                vk::AttachmentStoreOp::STORE,
            )
            .layouts(
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            )
        }),
    );
    let diffuse = list.add(
        AttachmentDesc::color(
            "lighting_diffuse",
            LIGHTING_FORMAT,
            config.samples,
            vk::AttachmentLoadOp::CLEAR,
            vk::AttachmentStoreOp::DONT_CARE,
        )
        .layouts(vk::ImageLayout::UNDEFINED, vk::ImageLayout::GENERAL),
    );
    let specular = list.add(
        AttachmentDesc::color(
            "lighting_specular",
            LIGHTING_FORMAT,
            config.samples,
            vk::AttachmentLoadOp::CLEAR,
            vk::AttachmentStoreOp::DONT_CARE,
        )
        .layouts(vk::ImageLayout::UNDEFINED, vk::ImageLayout::GENERAL),
    );
    let depth = list.add(
        AttachmentDesc::depth(
            "depth",
            DEPTH_FORMAT,
            config.samples,
            vk::AttachmentLoadOp::LOAD,
            vk::AttachmentStoreOp::DONT_CARE,
        )
        .layouts(
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        ),
    );

    let color = vec![
        AttachmentRef::new(final_color, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL),
        AttachmentRef::new(diffuse, vk::ImageLayout::GENERAL),
        AttachmentRef::new(specular, vk::ImageLayout::GENERAL),
    ];
    let subpass = SubpassDesc {
        resolve: list.resolve_refs(&color),
        color,
        input: vec![
            AttachmentRef::new(diffuse, vk::ImageLayout::GENERAL),
            AttachmentRef::new(specular, vk::ImageLayout::GENERAL),
        ],
        depth: Some(AttachmentRef::new(
            depth,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        )),
    };

    RenderPassDesc {
        attachments: list.finish(),
        subpasses: vec![subpass],
        dependencies: vec![
            external_dependency(
                ATTACHMENT_STAGES,
                ATTACHMENT_STAGES | vk::PipelineStageFlags::FRAGMENT_SHADER,
                ATTACHMENT_WRITES,
                ATTACHMENT_ACCESS | vk::AccessFlags::INPUT_ATTACHMENT_READ,
            ),
            SubpassDependency {
                src_subpass: 0,
                dst_subpass: 0,
                src_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
                src_access: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
                dst_access: vk::AccessFlags::INPUT_ATTACHMENT_READ,
                by_region: true,
            },
            SubpassDependency {
                src_subpass: 0,
                dst_subpass: vk::SUBPASS_EXTERNAL,
                src_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                dst_stage: vk::PipelineStageFlags::TRANSFER
                    | vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                src_access: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
                dst_access: vk::AccessFlags::TRANSFER_READ
                    | vk::AccessFlags::COLOR_ATTACHMENT_READ,
                by_region: false,
            },
        ],
    }
}

/// Overlay pass ending in the presentable image.
///
/// Without MSAA the final color has already been copied into the swapchain
/// image, which is loaded from `TRANSFER_DST_OPTIMAL`. With MSAA the
/// multisampled final color is loaded and resolved into the swapchain image.
fn gui_pass(config: &PassConfig) -> RenderPassDesc {
    let msaa = config.is_multisampled();
    let mut list = AttachmentList::new(msaa);

    let color = if msaa {
        list.add_resolved(
            AttachmentDesc::color(
                "final_color",
                config.color_format,
                config.samples,
                vk::AttachmentLoadOp::LOAD,
                vk::AttachmentStoreOp::DONT_CARE,
            )
            .layouts(
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            ),
            Some(AttachmentDesc {
                is_resolve: true,
                ..AttachmentDesc::color(
                    "swapchain",
                    config.color_format,
                    vk::SampleCountFlags::TYPE_1,
                    vk::AttachmentLoadOp::DONT_CARE,
                    vk::AttachmentStoreOp::STORE,
                )
                .layouts(vk::ImageLayout::UNDEFINED, vk::ImageLayout::PRESENT_SRC_KHR)
            }),
        )
    } else {
        list.add(
            AttachmentDesc::color(
                "swapchain",
                config.color_format,
                vk::SampleCountFlags::TYPE_1,
                vk::AttachmentLoadOp::LOAD,
                vk::AttachmentStoreOp::STORE,
            )
            .layouts(
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::PRESENT_SRC_KHR,
            ),
        )
    };

    let color = vec![AttachmentRef::new(
        color,
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    )];
    RenderPassDesc {
        subpasses: vec![SubpassDesc {
            resolve: list.resolve_refs(&color),
            color,
            ..Default::default()
        }],
        attachments: list.finish(),
        dependencies: vec![external_dependency(
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT | vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE | vk::AccessFlags::TRANSFER_WRITE,
            vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        )],
    }
}

/// Depth-only pass rendering one shadow map layer.
fn shadow_pass() -> RenderPassDesc {
    let depth = AttachmentDesc::depth(
        "shadow_depth",
        SHADOW_DEPTH_FORMAT,
        vk::SampleCountFlags::TYPE_1,
        vk::AttachmentLoadOp::CLEAR,
        vk::AttachmentStoreOp::STORE,
    )
    .layouts(
        vk::ImageLayout::UNDEFINED,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    );

    RenderPassDesc {
        attachments: vec![depth],
        subpasses: vec![SubpassDesc {
            depth: Some(AttachmentRef::new(
                0,
                vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            )),
            ..Default::default()
        }],
        dependencies: vec![
            // Sampling of the previous frame finishes before the clear
            external_dependency(
                vk::PipelineStageFlags::FRAGMENT_SHADER,
                vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
                vk::AccessFlags::SHADER_READ,
                vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            ),
            SubpassDependency {
                src_subpass: 0,
                dst_subpass: vk::SUBPASS_EXTERNAL,
                src_stage: vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
                dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
                src_access: vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
                dst_access: vk::AccessFlags::SHADER_READ,
                by_region: false,
            },
        ],
    }
}

/// A native render pass and the description it was built from.
pub struct RenderPass {
    device: SharedDevice,
    handle: vk::RenderPass,
    kind: RenderingPipelineType,
    desc: RenderPassDesc,
}

impl RenderPass {
    /// Build and create the pass of the given kind.
    pub fn new(
        device: &SharedDevice,
        kind: RenderingPipelineType,
        config: &PassConfig,
    ) -> Result<Self> {
        let desc = build_render_pass_desc(kind, config);
        let handle = device.create_render_pass(&desc)?;
        tracing::debug!(
            "Created {kind:?} render pass with {} attachments",
            desc.attachments.len()
        );
        Ok(Self {
            device: device.clone(),
            handle,
            kind,
            desc,
        })
    }

    pub fn handle(&self) -> vk::RenderPass {
        self.handle
    }

    pub fn kind(&self) -> RenderingPipelineType {
        self.kind
    }

    pub fn desc(&self) -> &RenderPassDesc {
        &self.desc
    }

    /// Color attachments written by the first subpass.
    pub fn color_attachment_count(&self) -> u32 {
        self.desc
            .subpasses
            .first()
            .map_or(0, |s| s.color.len() as u32)
    }

    /// One clear value per attachment; ignored for loaded attachments.
    pub fn clear_values(&self) -> Vec<vk::ClearValue> {
        self.desc
            .attachments
            .iter()
            .map(|a| {
                if a.is_depth() {
                    vk::ClearValue {
                        depth_stencil: vk::ClearDepthStencilValue {
                            depth: 1.0,
                            stencil: 0,
                        },
                    }
                } else {
                    vk::ClearValue {
                        color: vk::ClearColorValue {
                            float32: [0.0, 0.0, 0.0, 1.0],
                        },
                    }
                }
            })
            .collect()
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        self.device.destroy_render_pass(self.handle);
    }
}

/// Every render pass of a frame.
pub struct RenderPasses {
    pub skybox: RenderPass,
    pub pbr: RenderPass,
    pub gui: RenderPass,
    pub shadow: RenderPass,
}

impl RenderPasses {
    /// Create all passes. The first failure aborts and is returned.
    pub fn new(device: &SharedDevice, config: &PassConfig) -> Result<Self> {
        Ok(Self {
            skybox: RenderPass::new(device, RenderingPipelineType::Skybox, config)?,
            pbr: RenderPass::new(device, RenderingPipelineType::PbrModel, config)?,
            gui: RenderPass::new(device, RenderingPipelineType::Gui, config)?,
            shadow: RenderPass::new(device, RenderingPipelineType::CascadedShadowMapping, config)?,
        })
    }
}

/// A framebuffer bound to one render pass.
pub struct Framebuffer {
    device: SharedDevice,
    handle: vk::Framebuffer,
    extent: vk::Extent2D,
}

impl Framebuffer {
    /// Create a framebuffer; `attachments` must match the pass's attachment list.
    pub fn new(
        device: &SharedDevice,
        render_pass: &RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> Result<Self> {
        let handle = device.create_framebuffer(render_pass.handle(), attachments, extent, 1)?;
        Ok(Self {
            device: device.clone(),
            handle,
            extent,
        })
    }

    pub fn handle(&self) -> vk::Framebuffer {
        self.handle
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

impl Drop for Framebuffer {
    fn drop(&mut self) {
        self.device.destroy_framebuffer(self.handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::headless;

    fn config(samples: vk::SampleCountFlags) -> PassConfig {
        PassConfig {
            color_format: vk::Format::B8G8R8A8_SRGB,
            samples,
        }
    }

    #[test]
    fn pbr_pass_with_msaa_appends_resolve_companions() {
        let desc = build_render_pass_desc(
            RenderingPipelineType::PbrModel,
            &config(vk::SampleCountFlags::TYPE_2),
        );
        desc.validate().unwrap();

        let primaries = desc.primary_attachment_count();
        let resolves = desc.attachments.iter().filter(|a| a.is_resolve).count();
        assert_eq!(primaries, 4);
        assert_eq!(resolves, 1);
        assert_eq!(desc.attachments.len(), primaries + resolves);

        let resolve = desc.attachment("final_color_resolve").unwrap();
        assert_eq!(resolve.samples, vk::SampleCountFlags::TYPE_1);
        assert_eq!(resolve.final_layout, vk::ImageLayout::TRANSFER_SRC_OPTIMAL);
        assert!(desc
            .attachments
            .iter()
            .all(|a| a.final_layout != vk::ImageLayout::PRESENT_SRC_KHR));

        let subpass = &desc.subpasses[0];
        assert_eq!(subpass.resolve.len(), subpass.color.len());
        assert_eq!(subpass.resolve[0].index, 4);
        assert_eq!(subpass.resolve[1].index, vk::ATTACHMENT_UNUSED);
    }

    #[test]
    fn pbr_pass_without_msaa_copies_out_of_final_color() {
        let desc = build_render_pass_desc(
            RenderingPipelineType::PbrModel,
            &config(vk::SampleCountFlags::TYPE_1),
        );
        desc.validate().unwrap();
        assert_eq!(desc.attachments.len(), 4);
        assert!(desc.subpasses[0].resolve.is_empty());
        assert_eq!(
            desc.attachment("final_color").unwrap().final_layout,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL
        );
    }

    #[test]
    fn lighting_attachments_are_read_back_in_the_same_subpass() {
        let desc = build_render_pass_desc(
            RenderingPipelineType::PbrModel,
            &config(vk::SampleCountFlags::TYPE_1),
        );
        let subpass = &desc.subpasses[0];
        for name in ["lighting_diffuse", "lighting_specular"] {
            let index = desc.attachment_index(name).unwrap() as u32;
            assert!(subpass.color.iter().any(|r| r.index == index));
            assert!(subpass.input.iter().any(|r| r.index == index));
        }
        let self_dep = desc
            .dependencies
            .iter()
            .find(|d| d.src_subpass == 0 && d.dst_subpass == 0)
            .unwrap();
        assert!(self_dep.by_region);

        // Without the self-dependency the description is rejected
        let mut broken = desc.clone();
        broken.dependencies.retain(|d| d.dst_subpass != 0 || d.src_subpass != 0);
        assert!(broken.validate().is_err());
    }

    #[test]
    fn gui_pass_loads_and_ends_presentable() {
        let plain = build_render_pass_desc(
            RenderingPipelineType::Gui,
            &config(vk::SampleCountFlags::TYPE_1),
        );
        plain.validate().unwrap();
        let swapchain = plain.attachment("swapchain").unwrap();
        assert_eq!(swapchain.load_op, vk::AttachmentLoadOp::LOAD);
        assert_eq!(swapchain.initial_layout, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
        assert_eq!(swapchain.final_layout, vk::ImageLayout::PRESENT_SRC_KHR);

        let msaa = build_render_pass_desc(
            RenderingPipelineType::Gui,
            &config(vk::SampleCountFlags::TYPE_4),
        );
        msaa.validate().unwrap();
        let color = msaa.attachment("final_color").unwrap();
        assert_eq!(color.load_op, vk::AttachmentLoadOp::LOAD);
        assert_eq!(color.samples, vk::SampleCountFlags::TYPE_4);
        let resolve = msaa.attachment("swapchain").unwrap();
        assert!(resolve.is_resolve);
        assert_eq!(resolve.final_layout, vk::ImageLayout::PRESENT_SRC_KHR);
        assert!(msaa
            .attachments
            .iter()
            .all(|a| a.load_op != vk::AttachmentLoadOp::CLEAR));
    }

    #[test]
    fn shadow_pass_is_depth_only() {
        let desc = build_render_pass_desc(
            RenderingPipelineType::CascadedShadowMapping,
            &config(vk::SampleCountFlags::TYPE_8),
        );
        desc.validate().unwrap();
        assert_eq!(desc.attachments.len(), 1);
        assert!(desc.attachments[0].is_depth());
        assert_eq!(desc.attachments[0].samples, vk::SampleCountFlags::TYPE_1);
        assert!(desc.subpasses[0].color.is_empty());
    }

    #[test]
    fn render_passes_are_created_and_released() {
        let (headless, device) = headless();
        {
            let passes =
                RenderPasses::new(&device, &config(vk::SampleCountFlags::TYPE_2)).unwrap();
            assert_eq!(headless.live_objects("render_pass"), 4);
            assert_eq!(passes.pbr.color_attachment_count(), 3);
            assert_eq!(passes.pbr.clear_values().len(), 5);
            assert_eq!(
                headless.render_pass_desc(passes.pbr.handle()).as_ref(),
                Some(passes.pbr.desc())
            );
        }
        assert_eq!(headless.live_objects("render_pass"), 0);
    }
}
