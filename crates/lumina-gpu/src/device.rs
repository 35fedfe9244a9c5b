//! Backend-neutral device interface.
//!
//! Every GPU operation the engine performs goes through [`RenderDevice`].
//! Native handles are the Vulkan handle types from `ash`; on the Metal
//! backend they are the portability-layer handles, and on the headless
//! backend they are opaque counters. Callers never interpret them.

use crate::error::Result;
use crate::render_pass::RenderPassDesc;
use ash::vk;
use gpu_allocator::MemoryLocation;
use serde::{Deserialize, Serialize};
use std::ffi::CStr;
use std::sync::Arc;

/// Shared handle to the active device.
pub type SharedDevice = Arc<dyn RenderDevice>;

/// Native graphics API a device drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Vulkan 1.2+ on Windows and Linux.
    #[default]
    Vulkan,
    /// Metal, driven through the Vulkan portability layer on Apple platforms.
    Metal,
    /// Recording backend without a GPU.
    Headless,
}

impl BackendKind {
    /// The backend a native build picks when none is configured.
    pub const fn platform_default() -> Self {
        if cfg!(target_vendor = "apple") {
            Self::Metal
        } else {
            Self::Vulkan
        }
    }
}

/// Queue a submission targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueKind {
    Graphics,
    Compute,
    Transfer,
}

/// Hardware limits the engine consults when choosing strategies.
#[derive(Debug, Clone)]
pub struct DeviceLimits {
    /// Maximum sampled images visible to a single shader stage.
    pub max_per_stage_descriptor_sampled_images: u32,
    /// Maximum sampled images in a descriptor set allocated from an update-after-bind pool.
    pub max_update_after_bind_sampled_images: u32,
    /// Sample counts usable for color attachments.
    pub framebuffer_color_sample_counts: vk::SampleCountFlags,
    /// Sample counts usable for depth attachments.
    pub framebuffer_depth_sample_counts: vk::SampleCountFlags,
    /// Maximum push constant block size in bytes.
    pub max_push_constants_size: u32,
    /// Descriptor indexing features required by bindless textures are present.
    pub supports_descriptor_indexing: bool,
    /// Maximum sampler anisotropy.
    pub max_sampler_anisotropy: f32,
}

impl DeviceLimits {
    /// Highest sample count usable for both color and depth attachments.
    pub fn max_msaa_samples(&self) -> vk::SampleCountFlags {
        let counts = self.framebuffer_color_sample_counts & self.framebuffer_depth_sample_counts;
        [
            vk::SampleCountFlags::TYPE_64,
            vk::SampleCountFlags::TYPE_32,
            vk::SampleCountFlags::TYPE_16,
            vk::SampleCountFlags::TYPE_8,
            vk::SampleCountFlags::TYPE_4,
            vk::SampleCountFlags::TYPE_2,
        ]
        .into_iter()
        .find(|&c| counts.contains(c))
        .unwrap_or(vk::SampleCountFlags::TYPE_1)
    }

    /// Clamp a requested sample count to what the device supports.
    pub fn clamp_samples(&self, requested: vk::SampleCountFlags) -> vk::SampleCountFlags {
        let max = self.max_msaa_samples();
        if requested.as_raw() > max.as_raw() {
            max
        } else {
            requested
        }
    }
}

impl Default for DeviceLimits {
    fn default() -> Self {
        Self {
            max_per_stage_descriptor_sampled_images: 1 << 20,
            max_update_after_bind_sampled_images: 1 << 20,
            framebuffer_color_sample_counts: vk::SampleCountFlags::TYPE_1
                | vk::SampleCountFlags::TYPE_2
                | vk::SampleCountFlags::TYPE_4
                | vk::SampleCountFlags::TYPE_8,
            framebuffer_depth_sample_counts: vk::SampleCountFlags::TYPE_1
                | vk::SampleCountFlags::TYPE_2
                | vk::SampleCountFlags::TYPE_4
                | vk::SampleCountFlags::TYPE_8,
            max_push_constants_size: 128,
            supports_descriptor_indexing: true,
            max_sampler_anisotropy: 16.0,
        }
    }
}

/// Buffer creation parameters.
#[derive(Debug, Clone, Copy)]
pub struct BufferDesc<'a> {
    pub name: &'a str,
    pub size: u64,
    pub usage: vk::BufferUsageFlags,
    pub location: MemoryLocation,
}

/// Image creation parameters.
#[derive(Debug, Clone, Copy)]
pub struct ImageDesc<'a> {
    pub name: &'a str,
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
    pub samples: vk::SampleCountFlags,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub flags: vk::ImageCreateFlags,
}

impl<'a> ImageDesc<'a> {
    /// Single-sampled, single-layer 2D image.
    pub fn new_2d(
        name: &'a str,
        extent: vk::Extent2D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
    ) -> Self {
        Self {
            name,
            extent,
            format,
            usage,
            samples: vk::SampleCountFlags::TYPE_1,
            mip_levels: 1,
            array_layers: 1,
            flags: vk::ImageCreateFlags::empty(),
        }
    }

    pub const fn samples(mut self, samples: vk::SampleCountFlags) -> Self {
        self.samples = samples;
        self
    }

    pub const fn array_layers(mut self, layers: u32) -> Self {
        self.array_layers = layers;
        self
    }

    pub const fn flags(mut self, flags: vk::ImageCreateFlags) -> Self {
        self.flags = flags;
        self
    }
}

/// Image view creation parameters.
#[derive(Debug, Clone, Copy)]
pub struct ImageViewDesc {
    pub image: vk::Image,
    pub view_type: vk::ImageViewType,
    pub format: vk::Format,
    pub range: vk::ImageSubresourceRange,
}

/// Sampler creation parameters.
#[derive(Debug, Clone, Copy)]
pub struct SamplerDesc {
    pub filter: vk::Filter,
    pub mipmap_mode: vk::SamplerMipmapMode,
    pub address_mode: vk::SamplerAddressMode,
    pub anisotropy: Option<f32>,
    /// Depth comparison for shadow sampling.
    pub compare: Option<vk::CompareOp>,
    pub max_lod: f32,
}

impl Default for SamplerDesc {
    fn default() -> Self {
        Self {
            filter: vk::Filter::LINEAR,
            mipmap_mode: vk::SamplerMipmapMode::LINEAR,
            address_mode: vk::SamplerAddressMode::REPEAT,
            anisotropy: None,
            compare: None,
            max_lod: vk::LOD_CLAMP_NONE,
        }
    }
}

/// One binding of a descriptor set layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorBindingDesc {
    pub binding: u32,
    pub kind: vk::DescriptorType,
    pub count: u32,
    pub stages: vk::ShaderStageFlags,
    /// Variable-count, partially bound, update-after-bind array.
    pub bindless: bool,
}

/// Resource written into a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorResource {
    Buffer {
        buffer: vk::Buffer,
        offset: u64,
        range: u64,
    },
    Image {
        view: vk::ImageView,
        sampler: vk::Sampler,
        layout: vk::ImageLayout,
    },
    Sampler(vk::Sampler),
}

/// A single descriptor update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorWrite {
    pub set: vk::DescriptorSet,
    pub binding: u32,
    pub array_element: u32,
    pub kind: vk::DescriptorType,
    pub resource: DescriptorResource,
}

/// Shader stage of a pipeline.
#[derive(Debug, Clone, Copy)]
pub struct ShaderStageDesc<'a> {
    pub stage: vk::ShaderStageFlags,
    pub module: vk::ShaderModule,
    pub entry_point: &'a CStr,
}

/// Fixed-function state of a graphics pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterState {
    pub topology: vk::PrimitiveTopology,
    pub polygon_mode: vk::PolygonMode,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub line_width: f32,
    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_compare: vk::CompareOp,
    /// Constant and slope depth bias, used by shadow passes.
    pub depth_bias: Option<(f32, f32)>,
    pub samples: vk::SampleCountFlags,
    pub blend: bool,
    pub color_attachment_count: u32,
}

impl Default for RasterState {
    fn default() -> Self {
        Self {
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::BACK,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            line_width: 1.0,
            depth_test: true,
            depth_write: true,
            depth_compare: vk::CompareOp::LESS_OR_EQUAL,
            depth_bias: None,
            samples: vk::SampleCountFlags::TYPE_1,
            blend: false,
            color_attachment_count: 1,
        }
    }
}

/// Graphics pipeline creation parameters.
#[derive(Debug, Clone, Copy)]
pub struct GraphicsPipelineDesc<'a> {
    pub stages: &'a [ShaderStageDesc<'a>],
    pub vertex_bindings: &'a [vk::VertexInputBindingDescription],
    pub vertex_attributes: &'a [vk::VertexInputAttributeDescription],
    pub raster: &'a RasterState,
    pub layout: vk::PipelineLayout,
    pub render_pass: vk::RenderPass,
    pub subpass: u32,
}

/// Compute pipeline creation parameters.
#[derive(Debug, Clone, Copy)]
pub struct ComputePipelineDesc<'a> {
    pub stage: ShaderStageDesc<'a>,
    pub layout: vk::PipelineLayout,
}

/// Semaphore a submission waits on before the given stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SemaphoreWait {
    pub semaphore: vk::Semaphore,
    pub stage: vk::PipelineStageFlags,
}

/// A queue submission.
#[derive(Debug, Clone, Copy)]
pub struct Submission<'a> {
    pub command_buffers: &'a [vk::CommandBuffer],
    pub waits: &'a [SemaphoreWait],
    pub signals: &'a [vk::Semaphore],
    pub fence: vk::Fence,
}

/// Image layout transition recorded into a command buffer.
#[derive(Debug, Clone, Copy)]
pub struct ImageBarrier {
    pub image: vk::Image,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub range: vk::ImageSubresourceRange,
}

impl PartialEq for ImageBarrier {
    fn eq(&self, other: &Self) -> bool {
        let (a, b) = (&self.range, &other.range);
        self.image == other.image
            && self.old_layout == other.old_layout
            && self.new_layout == other.new_layout
            && self.src_stage == other.src_stage
            && self.dst_stage == other.dst_stage
            && self.src_access == other.src_access
            && self.dst_access == other.dst_access
            && a.aspect_mask == b.aspect_mask
            && a.base_mip_level == b.base_mip_level
            && a.level_count == b.level_count
            && a.base_array_layer == b.base_array_layer
            && a.layer_count == b.layer_count
    }
}

impl Eq for ImageBarrier {}

/// Render pass instance begin parameters.
#[derive(Clone, Copy)]
pub struct RenderPassBegin<'a> {
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub extent: vk::Extent2D,
    pub clear_values: &'a [vk::ClearValue],
}

/// Swapchain creation parameters.
#[derive(Debug, Clone, Copy)]
pub struct SwapchainDesc {
    pub width: u32,
    pub height: u32,
    pub vsync: bool,
    /// Request an extended-range surface format.
    pub hdr: bool,
    /// Swapchain being replaced, if any.
    pub old: vk::SwapchainKHR,
}

/// A created swapchain.
#[derive(Debug, Clone)]
pub struct SwapchainInfo {
    pub handle: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub format: vk::Format,
    pub color_space: vk::ColorSpaceKHR,
    pub extent: vk::Extent2D,
}

/// Result of acquiring a swapchain image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired { index: u32, suboptimal: bool },
    /// No image was acquired; the swapchain must be recreated.
    OutOfDate,
}

/// Result of presenting a swapchain image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    Suboptimal,
    OutOfDate,
}

impl PresentOutcome {
    /// The swapchain no longer matches the surface.
    pub const fn needs_recreate(self) -> bool {
        matches!(self, Self::Suboptimal | Self::OutOfDate)
    }
}

/// Operations every rendering backend provides.
///
/// All methods take `&self`; implementations synchronize internally where
/// the native API requires it. Handles passed back in must have been
/// created by the same device.
pub trait RenderDevice: Send + Sync {
    /// Which native API this device drives.
    fn backend(&self) -> BackendKind;

    /// Human-readable adapter name.
    fn adapter_name(&self) -> &str;

    /// Hardware limits.
    fn limits(&self) -> &DeviceLimits;

    /// Queue family index backing a queue kind.
    fn queue_family(&self, queue: QueueKind) -> u32;

    // Buffers

    fn create_buffer(&self, desc: &BufferDesc<'_>) -> Result<vk::Buffer>;
    fn destroy_buffer(&self, buffer: vk::Buffer);
    /// Copy bytes into host-visible buffer memory.
    fn write_buffer(&self, buffer: vk::Buffer, offset: u64, data: &[u8]) -> Result<()>;
    /// Copy bytes out of host-visible buffer memory.
    fn read_buffer(&self, buffer: vk::Buffer, offset: u64, len: usize) -> Result<Vec<u8>>;

    // Images

    fn create_image(&self, desc: &ImageDesc<'_>) -> Result<vk::Image>;
    fn destroy_image(&self, image: vk::Image);
    fn create_image_view(&self, desc: &ImageViewDesc) -> Result<vk::ImageView>;
    fn destroy_image_view(&self, view: vk::ImageView);
    fn create_sampler(&self, desc: &SamplerDesc) -> Result<vk::Sampler>;
    fn destroy_sampler(&self, sampler: vk::Sampler);

    // Synchronization

    fn create_semaphore(&self) -> Result<vk::Semaphore>;
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);
    fn create_fence(&self, signaled: bool) -> Result<vk::Fence>;
    fn destroy_fence(&self, fence: vk::Fence);
    fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> Result<()>;
    fn reset_fence(&self, fence: vk::Fence) -> Result<()>;

    // Render passes

    fn create_render_pass(&self, desc: &RenderPassDesc) -> Result<vk::RenderPass>;
    fn destroy_render_pass(&self, render_pass: vk::RenderPass);
    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
        layers: u32,
    ) -> Result<vk::Framebuffer>;
    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer);

    // Shaders and pipelines

    fn create_shader_module(&self, code: &[u32]) -> Result<vk::ShaderModule>;
    fn destroy_shader_module(&self, module: vk::ShaderModule);
    fn create_pipeline_layout(
        &self,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constants: &[vk::PushConstantRange],
    ) -> Result<vk::PipelineLayout>;
    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout);
    fn create_graphics_pipeline(&self, desc: &GraphicsPipelineDesc<'_>) -> Result<vk::Pipeline>;
    fn create_compute_pipeline(&self, desc: &ComputePipelineDesc<'_>) -> Result<vk::Pipeline>;
    fn destroy_pipeline(&self, pipeline: vk::Pipeline);

    // Descriptors

    fn create_descriptor_set_layout(
        &self,
        bindings: &[DescriptorBindingDesc],
    ) -> Result<vk::DescriptorSetLayout>;
    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout);
    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        sizes: &[vk::DescriptorPoolSize],
        update_after_bind: bool,
    ) -> Result<vk::DescriptorPool>;
    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool);
    /// Allocate one set per layout. `variable_count` sizes a trailing bindless array.
    fn allocate_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        layouts: &[vk::DescriptorSetLayout],
        variable_count: Option<u32>,
    ) -> Result<Vec<vk::DescriptorSet>>;
    fn update_descriptor_sets(&self, writes: &[DescriptorWrite]);

    // Command buffers

    fn create_command_pool(&self, queue: QueueKind, transient: bool) -> Result<vk::CommandPool>;
    fn destroy_command_pool(&self, pool: vk::CommandPool);
    fn allocate_command_buffers(
        &self,
        pool: vk::CommandPool,
        count: u32,
    ) -> Result<Vec<vk::CommandBuffer>>;
    fn free_command_buffers(&self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]);
    fn begin_command_buffer(&self, cmd: vk::CommandBuffer, one_time: bool) -> Result<()>;
    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> Result<()>;
    fn reset_command_buffer(&self, cmd: vk::CommandBuffer) -> Result<()>;

    fn cmd_begin_render_pass(&self, cmd: vk::CommandBuffer, begin: &RenderPassBegin<'_>);
    fn cmd_end_render_pass(&self, cmd: vk::CommandBuffer);
    fn cmd_bind_pipeline(
        &self,
        cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    );
    fn cmd_bind_descriptor_sets(
        &self,
        cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
    );
    fn cmd_push_constants(
        &self,
        cmd: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: &[u8],
    );
    fn cmd_bind_vertex_buffers(&self, cmd: vk::CommandBuffer, buffers: &[vk::Buffer], offsets: &[u64]);
    fn cmd_bind_index_buffer(&self, cmd: vk::CommandBuffer, buffer: vk::Buffer, index_type: vk::IndexType);
    fn cmd_set_viewport(&self, cmd: vk::CommandBuffer, viewport: vk::Viewport);
    fn cmd_set_scissor(&self, cmd: vk::CommandBuffer, scissor: vk::Rect2D);
    fn cmd_draw(&self, cmd: vk::CommandBuffer, vertex_count: u32, instance_count: u32);
    fn cmd_draw_indexed(
        &self,
        cmd: vk::CommandBuffer,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
    );
    fn cmd_dispatch(&self, cmd: vk::CommandBuffer, x: u32, y: u32, z: u32);
    fn cmd_image_barrier(&self, cmd: vk::CommandBuffer, barrier: &ImageBarrier);
    fn cmd_copy_buffer(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: &[vk::BufferCopy],
    );
    fn cmd_copy_buffer_to_image(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        regions: &[vk::BufferImageCopy],
    );
    fn cmd_copy_image_to_buffer(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Image,
        dst: vk::Buffer,
        regions: &[vk::BufferImageCopy],
    );
    fn cmd_copy_image(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Image,
        dst: vk::Image,
        regions: &[vk::ImageCopy],
    );

    // Queues

    fn submit(&self, queue: QueueKind, submission: &Submission<'_>) -> Result<()>;
    fn queue_wait_idle(&self, queue: QueueKind) -> Result<()>;
    fn wait_idle(&self) -> Result<()>;

    // Presentation

    fn create_swapchain(&self, desc: &SwapchainDesc) -> Result<SwapchainInfo>;
    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR);
    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        signal: vk::Semaphore,
    ) -> Result<AcquireOutcome>;
    fn present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: &[vk::Semaphore],
    ) -> Result<PresentOutcome>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn msaa_clamp_uses_common_color_and_depth_counts() {
        let limits = DeviceLimits {
            framebuffer_color_sample_counts: vk::SampleCountFlags::TYPE_1
                | vk::SampleCountFlags::TYPE_2
                | vk::SampleCountFlags::TYPE_4
                | vk::SampleCountFlags::TYPE_8,
            framebuffer_depth_sample_counts: vk::SampleCountFlags::TYPE_1
                | vk::SampleCountFlags::TYPE_2
                | vk::SampleCountFlags::TYPE_4,
            ..DeviceLimits::default()
        };
        assert_eq!(limits.max_msaa_samples(), vk::SampleCountFlags::TYPE_4);
        assert_eq!(
            limits.clamp_samples(vk::SampleCountFlags::TYPE_8),
            vk::SampleCountFlags::TYPE_4
        );
        assert_eq!(
            limits.clamp_samples(vk::SampleCountFlags::TYPE_2),
            vk::SampleCountFlags::TYPE_2
        );
    }

    #[test]
    fn out_of_date_and_suboptimal_presents_need_recreate() {
        assert!(!PresentOutcome::Presented.needs_recreate());
        assert!(PresentOutcome::Suboptimal.needs_recreate());
        assert!(PresentOutcome::OutOfDate.needs_recreate());
    }
}
