//! Native object creation from backend-neutral descriptions.

use crate::device::{DescriptorBindingDesc, DescriptorResource, DescriptorWrite, GraphicsPipelineDesc};
use crate::error::{GpuError, Result};
use crate::render_pass::RenderPassDesc;
use ash::vk;

/// Create a native render pass.
///
/// # Safety
/// The device must be valid.
pub unsafe fn create_render_pass(
    device: &ash::Device,
    desc: &RenderPassDesc,
) -> Result<vk::RenderPass> {
    desc.validate()?;

    let attachments: Vec<vk::AttachmentDescription> = desc
        .attachments
        .iter()
        .map(|a| {
            vk::AttachmentDescription::default()
                .format(a.format)
                .samples(a.samples)
                .load_op(a.load_op)
                .store_op(a.store_op)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(a.initial_layout)
                .final_layout(a.final_layout)
        })
        .collect();

    let to_native = |refs: &[crate::render_pass::AttachmentRef]| -> Vec<vk::AttachmentReference> {
        refs.iter()
            .map(|r| vk::AttachmentReference {
                attachment: r.index,
                layout: r.layout,
            })
            .collect()
    };

    // Reference arrays must outlive the subpass descriptions pointing at them
    let references: Vec<_> = desc
        .subpasses
        .iter()
        .map(|s| {
            (
                to_native(&s.color),
                to_native(&s.input),
                to_native(&s.resolve),
                s.depth.map(|d| vk::AttachmentReference {
                    attachment: d.index,
                    layout: d.layout,
                }),
            )
        })
        .collect();

    let subpasses: Vec<vk::SubpassDescription> = references
        .iter()
        .map(|(color, input, resolve, depth)| {
            let mut subpass = vk::SubpassDescription::default()
                .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
                .color_attachments(color)
                .input_attachments(input);
            if !resolve.is_empty() {
                subpass = subpass.resolve_attachments(resolve);
            }
            if let Some(depth) = depth {
                subpass = subpass.depth_stencil_attachment(depth);
            }
            subpass
        })
        .collect();

    let dependencies: Vec<vk::SubpassDependency> = desc
        .dependencies
        .iter()
        .map(|d| vk::SubpassDependency {
            src_subpass: d.src_subpass,
            dst_subpass: d.dst_subpass,
            src_stage_mask: d.src_stage,
            dst_stage_mask: d.dst_stage,
            src_access_mask: d.src_access,
            dst_access_mask: d.dst_access,
            dependency_flags: if d.by_region {
                vk::DependencyFlags::BY_REGION
            } else {
                vk::DependencyFlags::empty()
            },
        })
        .collect();

    let create_info = vk::RenderPassCreateInfo::default()
        .attachments(&attachments)
        .subpasses(&subpasses)
        .dependencies(&dependencies);

    device
        .create_render_pass(&create_info, None)
        .map_err(|e| GpuError::InvalidRenderPass(e.to_string()))
}

/// Create a native graphics pipeline.
///
/// Viewport and scissor are dynamic state.
///
/// # Safety
/// All handles referenced by the description must be valid.
pub unsafe fn create_graphics_pipeline(
    device: &ash::Device,
    desc: &GraphicsPipelineDesc<'_>,
) -> Result<vk::Pipeline> {
    let raster = desc.raster;

    let stages: Vec<vk::PipelineShaderStageCreateInfo> = desc
        .stages
        .iter()
        .map(|s| {
            vk::PipelineShaderStageCreateInfo::default()
                .stage(s.stage)
                .module(s.module)
                .name(s.entry_point)
        })
        .collect();

    let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
        .vertex_binding_descriptions(desc.vertex_bindings)
        .vertex_attribute_descriptions(desc.vertex_attributes);

    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
        .topology(raster.topology)
        .primitive_restart_enable(false);

    let viewport_state = vk::PipelineViewportStateCreateInfo::default()
        .viewport_count(1)
        .scissor_count(1);

    let mut rasterization = vk::PipelineRasterizationStateCreateInfo::default()
        .depth_clamp_enable(false)
        .rasterizer_discard_enable(false)
        .polygon_mode(raster.polygon_mode)
        .line_width(raster.line_width)
        .cull_mode(raster.cull_mode)
        .front_face(raster.front_face);
    if let Some((constant, slope)) = raster.depth_bias {
        rasterization = rasterization
            .depth_bias_enable(true)
            .depth_bias_constant_factor(constant)
            .depth_bias_slope_factor(slope);
    }

    let multisample = vk::PipelineMultisampleStateCreateInfo::default()
        .rasterization_samples(raster.samples)
        .sample_shading_enable(false);

    let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
        .depth_test_enable(raster.depth_test)
        .depth_write_enable(raster.depth_write)
        .depth_compare_op(raster.depth_compare)
        .depth_bounds_test_enable(false)
        .stencil_test_enable(false);

    let blend_attachment = if raster.blend {
        vk::PipelineColorBlendAttachmentState::default()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(true)
            .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .alpha_blend_op(vk::BlendOp::ADD)
    } else {
        vk::PipelineColorBlendAttachmentState::default()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(false)
    };
    let blend_attachments = vec![blend_attachment; raster.color_attachment_count as usize];

    let color_blend = vk::PipelineColorBlendStateCreateInfo::default()
        .logic_op_enable(false)
        .attachments(&blend_attachments);

    let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic_state = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

    let create_info = vk::GraphicsPipelineCreateInfo::default()
        .stages(&stages)
        .vertex_input_state(&vertex_input)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterization)
        .multisample_state(&multisample)
        .depth_stencil_state(&depth_stencil)
        .color_blend_state(&color_blend)
        .dynamic_state(&dynamic_state)
        .layout(desc.layout)
        .render_pass(desc.render_pass)
        .subpass(desc.subpass);

    let pipelines = device
        .create_graphics_pipelines(vk::PipelineCache::null(), &[create_info], None)
        .map_err(|(_, e)| GpuError::PipelineCreation(e.to_string()))?;

    pipelines
        .into_iter()
        .next()
        .ok_or_else(|| GpuError::PipelineCreation("No pipeline returned".to_string()))
}

/// Create a descriptor set layout.
///
/// Bindless bindings are partially bound, update-after-bind and variable
/// count; such a binding must be the last one of its set.
///
/// # Safety
/// The device must be valid.
pub unsafe fn create_descriptor_set_layout(
    device: &ash::Device,
    bindings: &[DescriptorBindingDesc],
) -> Result<vk::DescriptorSetLayout> {
    let native: Vec<vk::DescriptorSetLayoutBinding> = bindings
        .iter()
        .map(|b| {
            vk::DescriptorSetLayoutBinding::default()
                .binding(b.binding)
                .descriptor_type(b.kind)
                .descriptor_count(b.count)
                .stage_flags(b.stages)
        })
        .collect();

    let flags: Vec<vk::DescriptorBindingFlags> = bindings
        .iter()
        .map(|b| {
            if b.bindless {
                vk::DescriptorBindingFlags::PARTIALLY_BOUND
                    | vk::DescriptorBindingFlags::UPDATE_AFTER_BIND
                    | vk::DescriptorBindingFlags::VARIABLE_DESCRIPTOR_COUNT
            } else {
                vk::DescriptorBindingFlags::empty()
            }
        })
        .collect();

    let any_bindless = bindings.iter().any(|b| b.bindless);
    if any_bindless
        && bindings
            .iter()
            .max_by_key(|b| b.binding)
            .is_some_and(|last| !last.bindless)
    {
        return Err(GpuError::InvalidArgument(
            "Bindless binding must have the highest binding number in its set".to_string(),
        ));
    }

    let mut binding_flags =
        vk::DescriptorSetLayoutBindingFlagsCreateInfo::default().binding_flags(&flags);
    let mut create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&native);
    if any_bindless {
        create_info = create_info
            .flags(vk::DescriptorSetLayoutCreateFlags::UPDATE_AFTER_BIND_POOL)
            .push_next(&mut binding_flags);
    }

    Ok(device.create_descriptor_set_layout(&create_info, None)?)
}

/// Allocate descriptor sets, sizing the variable-count binding when given.
///
/// # Safety
/// The pool and layouts must be valid.
pub unsafe fn allocate_descriptor_sets(
    device: &ash::Device,
    pool: vk::DescriptorPool,
    layouts: &[vk::DescriptorSetLayout],
    variable_count: Option<u32>,
) -> Result<Vec<vk::DescriptorSet>> {
    let counts = vec![variable_count.unwrap_or(0); layouts.len()];
    let mut variable_info =
        vk::DescriptorSetVariableDescriptorCountAllocateInfo::default().descriptor_counts(&counts);

    let mut allocate_info = vk::DescriptorSetAllocateInfo::default()
        .descriptor_pool(pool)
        .set_layouts(layouts);
    if variable_count.is_some() {
        allocate_info = allocate_info.push_next(&mut variable_info);
    }

    Ok(device.allocate_descriptor_sets(&allocate_info)?)
}

/// Apply descriptor writes.
///
/// # Safety
/// All handles referenced by the writes must be valid.
pub unsafe fn update_descriptor_sets(device: &ash::Device, writes: &[DescriptorWrite]) {
    // Info arrays are built first so the writes can borrow them
    let buffer_infos: Vec<[vk::DescriptorBufferInfo; 1]> = writes
        .iter()
        .map(|w| match w.resource {
            DescriptorResource::Buffer {
                buffer,
                offset,
                range,
            } => [vk::DescriptorBufferInfo {
                buffer,
                offset,
                range,
            }],
            _ => [vk::DescriptorBufferInfo::default()],
        })
        .collect();

    let image_infos: Vec<[vk::DescriptorImageInfo; 1]> = writes
        .iter()
        .map(|w| match w.resource {
            DescriptorResource::Image {
                view,
                sampler,
                layout,
            } => [vk::DescriptorImageInfo {
                sampler,
                image_view: view,
                image_layout: layout,
            }],
            DescriptorResource::Sampler(sampler) => [vk::DescriptorImageInfo {
                sampler,
                ..Default::default()
            }],
            DescriptorResource::Buffer { .. } => [vk::DescriptorImageInfo::default()],
        })
        .collect();

    let native: Vec<vk::WriteDescriptorSet> = writes
        .iter()
        .enumerate()
        .map(|(i, w)| {
            let write = vk::WriteDescriptorSet::default()
                .dst_set(w.set)
                .dst_binding(w.binding)
                .dst_array_element(w.array_element)
                .descriptor_type(w.kind);
            match w.resource {
                DescriptorResource::Buffer { .. } => write.buffer_info(&buffer_infos[i]),
                _ => write.image_info(&image_infos[i]),
            }
        })
        .collect();

    device.update_descriptor_sets(&native, &[]);
}
