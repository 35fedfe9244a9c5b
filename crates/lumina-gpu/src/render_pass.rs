//! Render pass descriptors.
//!
//! A [`RenderPassDesc`] is the backend-neutral description of a render pass:
//! attachments, subpasses and the dependencies between them. It is validated
//! before any native object is created from it.

use crate::error::{GpuError, Result};
use ash::vk;

/// One attachment of a render pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentDesc {
    /// Debug name, also used to look attachments up in tests and tooling.
    pub name: &'static str,
    pub format: vk::Format,
    pub samples: vk::SampleCountFlags,
    pub load_op: vk::AttachmentLoadOp,
    pub store_op: vk::AttachmentStoreOp,
    pub initial_layout: vk::ImageLayout,
    pub final_layout: vk::ImageLayout,
    /// Whether this attachment is the resolve target of another one.
    pub is_resolve: bool,
}

impl AttachmentDesc {
    /// Color attachment with the given load/store behavior.
    pub const fn color(
        name: &'static str,
        format: vk::Format,
        samples: vk::SampleCountFlags,
        load_op: vk::AttachmentLoadOp,
        store_op: vk::AttachmentStoreOp,
    ) -> Self {
        Self {
            name,
            format,
            samples,
            load_op,
            store_op,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            is_resolve: false,
        }
    }

    /// Depth attachment with the given load/store behavior.
    pub const fn depth(
        name: &'static str,
        format: vk::Format,
        samples: vk::SampleCountFlags,
        load_op: vk::AttachmentLoadOp,
        store_op: vk::AttachmentStoreOp,
    ) -> Self {
        Self {
            name,
            format,
            samples,
            load_op,
            store_op,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            is_resolve: false,
        }
    }

    pub const fn layouts(mut self, initial: vk::ImageLayout, final_layout: vk::ImageLayout) -> Self {
        self.initial_layout = initial;
        self.final_layout = final_layout;
        self
    }

    /// Whether the attachment holds depth data.
    pub const fn is_depth(&self) -> bool {
        matches!(
            self.format,
            vk::Format::D16_UNORM
                | vk::Format::D32_SFLOAT
                | vk::Format::D24_UNORM_S8_UINT
                | vk::Format::D32_SFLOAT_S8_UINT
                | vk::Format::X8_D24_UNORM_PACK32
        )
    }
}

/// Reference from a subpass to an attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachmentRef {
    pub index: u32,
    pub layout: vk::ImageLayout,
}

impl AttachmentRef {
    pub const fn new(index: u32, layout: vk::ImageLayout) -> Self {
        Self { index, layout }
    }
}

/// One subpass of a render pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubpassDesc {
    pub color: Vec<AttachmentRef>,
    pub input: Vec<AttachmentRef>,
    /// Either empty or one entry per color attachment.
    pub resolve: Vec<AttachmentRef>,
    pub depth: Option<AttachmentRef>,
}

/// Execution and memory dependency between subpasses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubpassDependency {
    /// Producer subpass, or `vk::SUBPASS_EXTERNAL`.
    pub src_subpass: u32,
    /// Consumer subpass, or `vk::SUBPASS_EXTERNAL`.
    pub dst_subpass: u32,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub by_region: bool,
}

/// Complete description of a render pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderPassDesc {
    pub attachments: Vec<AttachmentDesc>,
    pub subpasses: Vec<SubpassDesc>,
    pub dependencies: Vec<SubpassDependency>,
}

impl RenderPassDesc {
    /// Index of the attachment with the given name.
    pub fn attachment_index(&self, name: &str) -> Option<usize> {
        self.attachments.iter().position(|a| a.name == name)
    }

    /// Attachment with the given name.
    pub fn attachment(&self, name: &str) -> Option<&AttachmentDesc> {
        self.attachments.iter().find(|a| a.name == name)
    }

    /// Number of attachments that are not resolve targets.
    pub fn primary_attachment_count(&self) -> usize {
        self.attachments.iter().filter(|a| !a.is_resolve).count()
    }

    /// Check structural consistency.
    ///
    /// Every attachment reference must name an existing attachment, resolve
    /// lists must match their color lists, and every input attachment read
    /// must be covered by a dependency from the subpass that wrote it with
    /// `INPUT_ATTACHMENT_READ` in its destination access.
    pub fn validate(&self) -> Result<()> {
        if self.subpasses.is_empty() {
            return Err(GpuError::InvalidRenderPass(
                "render pass has no subpasses".to_string(),
            ));
        }

        let count = self.attachments.len() as u32;
        let check = |r: &AttachmentRef, what: &str, subpass: usize| -> Result<()> {
            if r.index != vk::ATTACHMENT_UNUSED && r.index >= count {
                return Err(GpuError::InvalidRenderPass(format!(
                    "subpass {subpass} {what} attachment {} out of range ({count} attachments)",
                    r.index
                )));
            }
            Ok(())
        };

        for (i, subpass) in self.subpasses.iter().enumerate() {
            for r in &subpass.color {
                check(r, "color", i)?;
            }
            for r in &subpass.input {
                check(r, "input", i)?;
            }
            for r in &subpass.resolve {
                check(r, "resolve", i)?;
            }
            if let Some(r) = &subpass.depth {
                check(r, "depth", i)?;
            }
            if !subpass.resolve.is_empty() && subpass.resolve.len() != subpass.color.len() {
                return Err(GpuError::InvalidRenderPass(format!(
                    "subpass {i} has {} resolve references for {} color attachments",
                    subpass.resolve.len(),
                    subpass.color.len()
                )));
            }
        }

        let subpass_count = self.subpasses.len() as u32;
        for dep in &self.dependencies {
            for s in [dep.src_subpass, dep.dst_subpass] {
                if s != vk::SUBPASS_EXTERNAL && s >= subpass_count {
                    return Err(GpuError::InvalidRenderPass(format!(
                        "dependency references subpass {s} of {subpass_count}"
                    )));
                }
            }
        }

        for (consumer, subpass) in self.subpasses.iter().enumerate() {
            for input in &subpass.input {
                let Some(producer) = self.producer_of(input.index, consumer) else {
                    continue;
                };
                let covered = self.dependencies.iter().any(|d| {
                    d.src_subpass == producer as u32
                        && d.dst_subpass == consumer as u32
                        && d.dst_access.contains(vk::AccessFlags::INPUT_ATTACHMENT_READ)
                });
                if !covered {
                    return Err(GpuError::InvalidRenderPass(format!(
                        "input attachment '{}' read in subpass {consumer} has no dependency from subpass {producer}",
                        self.attachments[input.index as usize].name
                    )));
                }
            }
        }

        Ok(())
    }

    /// Last subpass at or before `subpass` that writes `attachment`.
    fn producer_of(&self, attachment: u32, subpass: usize) -> Option<usize> {
        (0..=subpass).rev().find(|&i| {
            let s = &self.subpasses[i];
            s.color.iter().any(|r| r.index == attachment)
                || s.depth.is_some_and(|r| r.index == attachment)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lighting_pass(with_dependency: bool) -> RenderPassDesc {
        let mut desc = RenderPassDesc {
            attachments: vec![AttachmentDesc::color(
                "diffuse",
                vk::Format::R16G16B16A16_SFLOAT,
                vk::SampleCountFlags::TYPE_1,
                vk::AttachmentLoadOp::CLEAR,
                vk::AttachmentStoreOp::DONT_CARE,
            )],
            subpasses: vec![SubpassDesc {
                color: vec![AttachmentRef::new(0, vk::ImageLayout::GENERAL)],
                input: vec![AttachmentRef::new(0, vk::ImageLayout::GENERAL)],
                ..SubpassDesc::default()
            }],
            dependencies: Vec::new(),
        };
        if with_dependency {
            desc.dependencies.push(SubpassDependency {
                src_subpass: 0,
                dst_subpass: 0,
                src_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
                src_access: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
                dst_access: vk::AccessFlags::INPUT_ATTACHMENT_READ,
                by_region: true,
            });
        }
        desc
    }

    #[test]
    fn self_dependency_satisfies_input_read() {
        assert!(lighting_pass(true).validate().is_ok());
    }

    #[test]
    fn missing_input_dependency_is_rejected() {
        let err = lighting_pass(false).validate().unwrap_err();
        assert!(matches!(err, GpuError::InvalidRenderPass(_)));
    }

    #[test]
    fn out_of_range_reference_is_rejected() {
        let mut desc = lighting_pass(true);
        desc.subpasses[0].depth = Some(AttachmentRef::new(
            3,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        ));
        assert!(desc.validate().is_err());
    }

    #[test]
    fn resolve_list_must_match_color_list() {
        let mut desc = lighting_pass(true);
        desc.subpasses[0].resolve = vec![
            AttachmentRef::new(0, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL),
            AttachmentRef::new(0, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL),
        ];
        assert!(desc.validate().is_err());
    }
}
