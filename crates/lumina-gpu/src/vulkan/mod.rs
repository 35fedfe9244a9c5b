//! Native backend for Vulkan and, through the portability layer, Metal.

pub mod capabilities;
pub mod convert;
pub mod debug;
pub mod instance;
pub mod memory;
pub mod swapchain;

use crate::device::{
    AcquireOutcome, BackendKind, BufferDesc, ComputePipelineDesc, DescriptorBindingDesc,
    DescriptorWrite, DeviceLimits, GraphicsPipelineDesc, ImageBarrier, ImageDesc, ImageViewDesc,
    PresentOutcome, QueueKind, RenderDevice, RenderPassBegin, SamplerDesc, Submission,
    SwapchainDesc, SwapchainInfo,
};
use crate::error::{GpuError, Result};
use crate::render_pass::RenderPassDesc;
use ash::vk;
use capabilities::GpuCapabilities;
use debug::DebugMessenger;
use instance::{create_instance, select_physical_device};
use memory::GpuAllocator;
use parking_lot::Mutex;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle, RawWindowHandle};
use std::ffi::{c_char, CStr};
use std::sync::Arc;
use swapchain::Presenter;

/// Queue family indices.
#[derive(Debug, Clone, Copy)]
struct QueueFamilyIndices {
    graphics: u32,
    compute: u32,
    transfer: u32,
}

impl QueueFamilyIndices {
    fn unique(&self) -> Vec<u32> {
        let mut families = vec![self.graphics, self.compute, self.transfer];
        families.sort_unstable();
        families.dedup();
        families
    }
}

/// Device backed by a Vulkan driver.
pub struct VulkanDevice {
    // Entry must be kept alive for the lifetime of the device
    #[allow(dead_code)]
    entry: ash::Entry,
    instance: ash::Instance,
    debug: Option<DebugMessenger>,
    physical_device: vk::PhysicalDevice,
    device: Arc<ash::Device>,
    capabilities: GpuCapabilities,
    backend: BackendKind,
    allocator: Mutex<GpuAllocator>,
    anisotropy_enabled: bool,

    queue_families: QueueFamilyIndices,
    graphics_queue: vk::Queue,
    compute_queue: vk::Queue,
    transfer_queue: vk::Queue,
    // Queues may alias, and vkQueueSubmit requires external synchronization
    queue_lock: Mutex<()>,

    presenter: Option<Presenter>,
}

impl VulkanDevice {
    /// Get the Vulkan device handle.
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    /// Get the Vulkan instance handle.
    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    /// Get the physical device handle.
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Get GPU capabilities.
    pub fn capabilities(&self) -> &GpuCapabilities {
        &self.capabilities
    }

    fn queue(&self, queue: QueueKind) -> vk::Queue {
        match queue {
            QueueKind::Graphics => self.graphics_queue,
            QueueKind::Compute => self.compute_queue,
            QueueKind::Transfer => self.transfer_queue,
        }
    }

    fn presenter(&self) -> Result<&Presenter> {
        self.presenter.as_ref().ok_or_else(|| {
            GpuError::InvalidState("Device was created without a window surface".to_string())
        })
    }
}

impl RenderDevice for VulkanDevice {
    fn backend(&self) -> BackendKind {
        self.backend
    }

    fn adapter_name(&self) -> &str {
        &self.capabilities.device_name
    }

    fn limits(&self) -> &DeviceLimits {
        &self.capabilities.limits
    }

    fn queue_family(&self, queue: QueueKind) -> u32 {
        match queue {
            QueueKind::Graphics => self.queue_families.graphics,
            QueueKind::Compute => self.queue_families.compute,
            QueueKind::Transfer => self.queue_families.transfer,
        }
    }

    fn create_buffer(&self, desc: &BufferDesc<'_>) -> Result<vk::Buffer> {
        if desc.size == 0 {
            return Err(GpuError::InvalidArgument(format!(
                "Buffer '{}' has zero size",
                desc.name
            )));
        }
        self.allocator.lock().create_buffer(desc)
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        if let Err(e) = self.allocator.lock().destroy_buffer(buffer) {
            tracing::error!("Failed to free buffer {buffer:?}: {e}");
        }
    }

    fn write_buffer(&self, buffer: vk::Buffer, offset: u64, data: &[u8]) -> Result<()> {
        self.allocator.lock().write_buffer(buffer, offset, data)
    }

    fn read_buffer(&self, buffer: vk::Buffer, offset: u64, len: usize) -> Result<Vec<u8>> {
        self.allocator.lock().read_buffer(buffer, offset, len)
    }

    fn create_image(&self, desc: &ImageDesc<'_>) -> Result<vk::Image> {
        self.allocator.lock().create_image(desc)
    }

    fn destroy_image(&self, image: vk::Image) {
        if let Err(e) = self.allocator.lock().destroy_image(image) {
            tracing::error!("Failed to free image {image:?}: {e}");
        }
    }

    fn create_image_view(&self, desc: &ImageViewDesc) -> Result<vk::ImageView> {
        let create_info = vk::ImageViewCreateInfo::default()
            .image(desc.image)
            .view_type(desc.view_type)
            .format(desc.format)
            .subresource_range(desc.range);
        Ok(unsafe { self.device.create_image_view(&create_info, None)? })
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        unsafe { self.device.destroy_image_view(view, None) };
    }

    fn create_sampler(&self, desc: &SamplerDesc) -> Result<vk::Sampler> {
        let mut create_info = vk::SamplerCreateInfo::default()
            .mag_filter(desc.filter)
            .min_filter(desc.filter)
            .mipmap_mode(desc.mipmap_mode)
            .address_mode_u(desc.address_mode)
            .address_mode_v(desc.address_mode)
            .address_mode_w(desc.address_mode)
            .max_lod(desc.max_lod)
            .border_color(vk::BorderColor::FLOAT_OPAQUE_WHITE);
        if let Some(anisotropy) = desc.anisotropy.filter(|_| self.anisotropy_enabled) {
            create_info = create_info
                .anisotropy_enable(true)
                .max_anisotropy(anisotropy.min(self.capabilities.limits.max_sampler_anisotropy));
        }
        if let Some(compare) = desc.compare {
            create_info = create_info.compare_enable(true).compare_op(compare);
        }
        Ok(unsafe { self.device.create_sampler(&create_info, None)? })
    }

    fn destroy_sampler(&self, sampler: vk::Sampler) {
        unsafe { self.device.destroy_sampler(sampler, None) };
    }

    fn create_semaphore(&self) -> Result<vk::Semaphore> {
        let create_info = vk::SemaphoreCreateInfo::default();
        Ok(unsafe { self.device.create_semaphore(&create_info, None)? })
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.device.destroy_semaphore(semaphore, None) };
    }

    fn create_fence(&self, signaled: bool) -> Result<vk::Fence> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let create_info = vk::FenceCreateInfo::default().flags(flags);
        Ok(unsafe { self.device.create_fence(&create_info, None)? })
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.device.destroy_fence(fence, None) };
    }

    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> Result<()> {
        unsafe { self.device.wait_for_fences(&[fence], true, timeout_ns)? };
        Ok(())
    }

    fn reset_fence(&self, fence: vk::Fence) -> Result<()> {
        unsafe { self.device.reset_fences(&[fence])? };
        Ok(())
    }

    fn create_render_pass(&self, desc: &RenderPassDesc) -> Result<vk::RenderPass> {
        unsafe { convert::create_render_pass(&self.device, desc) }
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        unsafe { self.device.destroy_render_pass(render_pass, None) };
    }

    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
        layers: u32,
    ) -> Result<vk::Framebuffer> {
        let create_info = vk::FramebufferCreateInfo::default()
            .render_pass(render_pass)
            .attachments(attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(layers);
        Ok(unsafe { self.device.create_framebuffer(&create_info, None)? })
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        unsafe { self.device.destroy_framebuffer(framebuffer, None) };
    }

    fn create_shader_module(&self, code: &[u32]) -> Result<vk::ShaderModule> {
        let create_info = vk::ShaderModuleCreateInfo::default().code(code);
        unsafe { self.device.create_shader_module(&create_info, None) }
            .map_err(|e| GpuError::ShaderCompilation(format!("Failed to create module: {e}")))
    }

    fn destroy_shader_module(&self, module: vk::ShaderModule) {
        unsafe { self.device.destroy_shader_module(module, None) };
    }

    fn create_pipeline_layout(
        &self,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constants: &[vk::PushConstantRange],
    ) -> Result<vk::PipelineLayout> {
        let create_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(set_layouts)
            .push_constant_ranges(push_constants);
        Ok(unsafe { self.device.create_pipeline_layout(&create_info, None)? })
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        unsafe { self.device.destroy_pipeline_layout(layout, None) };
    }

    fn create_graphics_pipeline(&self, desc: &GraphicsPipelineDesc<'_>) -> Result<vk::Pipeline> {
        unsafe { convert::create_graphics_pipeline(&self.device, desc) }
    }

    fn create_compute_pipeline(&self, desc: &ComputePipelineDesc<'_>) -> Result<vk::Pipeline> {
        let stage = vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(desc.stage.module)
            .name(desc.stage.entry_point);
        let create_info = vk::ComputePipelineCreateInfo::default()
            .stage(stage)
            .layout(desc.layout);

        let pipelines = unsafe {
            self.device
                .create_compute_pipelines(vk::PipelineCache::null(), &[create_info], None)
                .map_err(|(_, e)| GpuError::PipelineCreation(e.to_string()))?
        };
        pipelines
            .into_iter()
            .next()
            .ok_or_else(|| GpuError::PipelineCreation("No pipeline returned".to_string()))
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        unsafe { self.device.destroy_pipeline(pipeline, None) };
    }

    fn create_descriptor_set_layout(
        &self,
        bindings: &[DescriptorBindingDesc],
    ) -> Result<vk::DescriptorSetLayout> {
        unsafe { convert::create_descriptor_set_layout(&self.device, bindings) }
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        unsafe { self.device.destroy_descriptor_set_layout(layout, None) };
    }

    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        sizes: &[vk::DescriptorPoolSize],
        update_after_bind: bool,
    ) -> Result<vk::DescriptorPool> {
        let mut flags = vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET;
        if update_after_bind {
            flags |= vk::DescriptorPoolCreateFlags::UPDATE_AFTER_BIND;
        }
        let create_info = vk::DescriptorPoolCreateInfo::default()
            .flags(flags)
            .max_sets(max_sets)
            .pool_sizes(sizes);
        Ok(unsafe { self.device.create_descriptor_pool(&create_info, None)? })
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        unsafe { self.device.destroy_descriptor_pool(pool, None) };
    }

    fn allocate_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        layouts: &[vk::DescriptorSetLayout],
        variable_count: Option<u32>,
    ) -> Result<Vec<vk::DescriptorSet>> {
        unsafe { convert::allocate_descriptor_sets(&self.device, pool, layouts, variable_count) }
    }

    fn update_descriptor_sets(&self, writes: &[DescriptorWrite]) {
        unsafe { convert::update_descriptor_sets(&self.device, writes) };
    }

    fn create_command_pool(&self, queue: QueueKind, transient: bool) -> Result<vk::CommandPool> {
        let mut flags = vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER;
        if transient {
            flags |= vk::CommandPoolCreateFlags::TRANSIENT;
        }
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(self.queue_family(queue))
            .flags(flags);
        Ok(unsafe { self.device.create_command_pool(&create_info, None)? })
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        unsafe { self.device.destroy_command_pool(pool, None) };
    }

    fn allocate_command_buffers(
        &self,
        pool: vk::CommandPool,
        count: u32,
    ) -> Result<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);
        Ok(unsafe { self.device.allocate_command_buffers(&alloc_info)? })
    }

    fn free_command_buffers(&self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]) {
        unsafe { self.device.free_command_buffers(pool, buffers) };
    }

    fn begin_command_buffer(&self, cmd: vk::CommandBuffer, one_time: bool) -> Result<()> {
        let flags = if one_time {
            vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT
        } else {
            vk::CommandBufferUsageFlags::empty()
        };
        let begin_info = vk::CommandBufferBeginInfo::default().flags(flags);
        unsafe { self.device.begin_command_buffer(cmd, &begin_info)? };
        Ok(())
    }

    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> Result<()> {
        unsafe { self.device.end_command_buffer(cmd)? };
        Ok(())
    }

    fn reset_command_buffer(&self, cmd: vk::CommandBuffer) -> Result<()> {
        unsafe {
            self.device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;
        }
        Ok(())
    }

    fn cmd_begin_render_pass(&self, cmd: vk::CommandBuffer, begin: &RenderPassBegin<'_>) {
        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(begin.render_pass)
            .framebuffer(begin.framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: begin.extent,
            })
            .clear_values(begin.clear_values);
        unsafe {
            self.device
                .cmd_begin_render_pass(cmd, &begin_info, vk::SubpassContents::INLINE);
        }
    }

    fn cmd_end_render_pass(&self, cmd: vk::CommandBuffer) {
        unsafe { self.device.cmd_end_render_pass(cmd) };
    }

    fn cmd_bind_pipeline(
        &self,
        cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    ) {
        unsafe { self.device.cmd_bind_pipeline(cmd, bind_point, pipeline) };
    }

    fn cmd_bind_descriptor_sets(
        &self,
        cmd: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
    ) {
        unsafe {
            self.device
                .cmd_bind_descriptor_sets(cmd, bind_point, layout, first_set, sets, &[]);
        }
    }

    fn cmd_push_constants(
        &self,
        cmd: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: &[u8],
    ) {
        unsafe { self.device.cmd_push_constants(cmd, layout, stages, offset, data) };
    }

    fn cmd_bind_vertex_buffers(&self, cmd: vk::CommandBuffer, buffers: &[vk::Buffer], offsets: &[u64]) {
        unsafe { self.device.cmd_bind_vertex_buffers(cmd, 0, buffers, offsets) };
    }

    fn cmd_bind_index_buffer(&self, cmd: vk::CommandBuffer, buffer: vk::Buffer, index_type: vk::IndexType) {
        unsafe { self.device.cmd_bind_index_buffer(cmd, buffer, 0, index_type) };
    }

    fn cmd_set_viewport(&self, cmd: vk::CommandBuffer, viewport: vk::Viewport) {
        unsafe { self.device.cmd_set_viewport(cmd, 0, &[viewport]) };
    }

    fn cmd_set_scissor(&self, cmd: vk::CommandBuffer, scissor: vk::Rect2D) {
        unsafe { self.device.cmd_set_scissor(cmd, 0, &[scissor]) };
    }

    fn cmd_draw(&self, cmd: vk::CommandBuffer, vertex_count: u32, instance_count: u32) {
        unsafe { self.device.cmd_draw(cmd, vertex_count, instance_count, 0, 0) };
    }

    fn cmd_draw_indexed(
        &self,
        cmd: vk::CommandBuffer,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
    ) {
        unsafe {
            self.device.cmd_draw_indexed(
                cmd,
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                0,
            );
        }
    }

    fn cmd_dispatch(&self, cmd: vk::CommandBuffer, x: u32, y: u32, z: u32) {
        unsafe { self.device.cmd_dispatch(cmd, x, y, z) };
    }

    fn cmd_image_barrier(&self, cmd: vk::CommandBuffer, barrier: &ImageBarrier) {
        let native = vk::ImageMemoryBarrier::default()
            .old_layout(barrier.old_layout)
            .new_layout(barrier.new_layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(barrier.image)
            .subresource_range(barrier.range)
            .src_access_mask(barrier.src_access)
            .dst_access_mask(barrier.dst_access);
        unsafe {
            self.device.cmd_pipeline_barrier(
                cmd,
                barrier.src_stage,
                barrier.dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[native],
            );
        }
    }

    fn cmd_copy_buffer(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: &[vk::BufferCopy],
    ) {
        unsafe { self.device.cmd_copy_buffer(cmd, src, dst, regions) };
    }

    fn cmd_copy_buffer_to_image(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        regions: &[vk::BufferImageCopy],
    ) {
        unsafe {
            self.device.cmd_copy_buffer_to_image(
                cmd,
                src,
                dst,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                regions,
            );
        }
    }

    fn cmd_copy_image_to_buffer(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Image,
        dst: vk::Buffer,
        regions: &[vk::BufferImageCopy],
    ) {
        unsafe {
            self.device.cmd_copy_image_to_buffer(
                cmd,
                src,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                dst,
                regions,
            );
        }
    }

    fn cmd_copy_image(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Image,
        dst: vk::Image,
        regions: &[vk::ImageCopy],
    ) {
        unsafe {
            self.device.cmd_copy_image(
                cmd,
                src,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                dst,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                regions,
            );
        }
    }

    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    fn submit(&self, queue: QueueKind, submission: &Submission<'_>) -> Result<()> {
        let wait_semaphores: Vec<vk::Semaphore> =
            submission.waits.iter().map(|w| w.semaphore).collect();
        let wait_stages: Vec<vk::PipelineStageFlags> =
            submission.waits.iter().map(|w| w.stage).collect();

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(submission.command_buffers)
            .signal_semaphores(submission.signals);

        let _guard = self.queue_lock.lock();
        unsafe {
            self.device
                .queue_submit(self.queue(queue), &[submit_info], submission.fence)?;
        }
        Ok(())
    }

    fn queue_wait_idle(&self, queue: QueueKind) -> Result<()> {
        let _guard = self.queue_lock.lock();
        unsafe { self.device.queue_wait_idle(self.queue(queue))? };
        Ok(())
    }

    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    fn wait_idle(&self) -> Result<()> {
        let _guard = self.queue_lock.lock();
        unsafe { self.device.device_wait_idle()? };
        Ok(())
    }

    fn create_swapchain(&self, desc: &SwapchainDesc) -> Result<SwapchainInfo> {
        unsafe {
            self.presenter()?.create_swapchain(
                self.physical_device,
                self.queue_families.graphics,
                desc,
            )
        }
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        if let Some(presenter) = &self.presenter {
            unsafe { presenter.swapchain_loader.destroy_swapchain(swapchain, None) };
        }
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        signal: vk::Semaphore,
    ) -> Result<AcquireOutcome> {
        unsafe { self.presenter()?.acquire_next_image(swapchain, signal) }
    }

    fn present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: &[vk::Semaphore],
    ) -> Result<PresentOutcome> {
        let presenter = self.presenter()?;
        let _guard = self.queue_lock.lock();
        unsafe { presenter.present(self.graphics_queue, swapchain, image_index, wait) }
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();

            if let Some(presenter) = &self.presenter {
                presenter.destroy();
            }

            // Shutdown allocator BEFORE destroying device
            // This frees all VkDeviceMemory allocations
            self.allocator.lock().shutdown();

            self.device.destroy_device(None);
            if let Some(debug) = &self.debug {
                debug.destroy();
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// Builder for creating a Vulkan device.
pub struct VulkanDeviceBuilder {
    app_name: String,
    enable_validation: bool,
    backend: BackendKind,
}

impl Default for VulkanDeviceBuilder {
    fn default() -> Self {
        Self {
            app_name: "Lumina".to_string(),
            enable_validation: cfg!(debug_assertions),
            backend: BackendKind::platform_default(),
        }
    }
}

impl VulkanDeviceBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the application name.
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    /// Enable or disable validation layers.
    pub fn validation(mut self, enable: bool) -> Self {
        self.enable_validation = enable;
        self
    }

    /// Select the native backend.
    pub fn backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    /// Build a device that presents to the given window.
    pub fn build<W>(self, window: &W) -> Result<VulkanDevice>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        let display = window
            .display_handle()
            .map_err(|e| GpuError::SurfaceCreation(e.to_string()))?
            .as_raw();
        let handle = window
            .window_handle()
            .map_err(|e| GpuError::SurfaceCreation(e.to_string()))?
            .as_raw();
        self.build_inner(Some((display, handle)))
    }

    /// Build a device without a presentation surface.
    pub fn build_offscreen(self) -> Result<VulkanDevice> {
        self.build_inner(None)
    }

    fn build_inner(self, window: Option<(RawDisplayHandle, RawWindowHandle)>) -> Result<VulkanDevice> {
        match self.backend {
            BackendKind::Headless => {
                return Err(GpuError::InvalidArgument(
                    "The headless backend has no native device".to_string(),
                ))
            }
            BackendKind::Metal if !cfg!(target_vendor = "apple") => {
                return Err(GpuError::Initialization(
                    "The Metal backend is only available on Apple platforms".to_string(),
                ))
            }
            _ => {}
        }

        // Load Vulkan entry point
        let entry = unsafe { ash::Entry::load() }
            .map_err(|e| GpuError::Initialization(format!("Failed to load Vulkan: {e}")))?;

        // Create Vulkan instance
        let instance = unsafe {
            create_instance(
                &entry,
                &self.app_name,
                self.backend,
                window.map(|(display, _)| display),
                self.enable_validation,
            )
        }?;

        let debug = if self.enable_validation {
            match unsafe { DebugMessenger::new(&entry, &instance) } {
                Ok(messenger) => Some(messenger),
                Err(e) => {
                    tracing::warn!("Validation messages unavailable: {e}");
                    None
                }
            }
        } else {
            None
        };

        let surface = match window {
            Some((display, handle)) => {
                Some(unsafe { Presenter::create_surface(&entry, &instance, display, handle) }?)
            }
            None => None,
        };

        // Select best physical device
        let physical_device = unsafe { select_physical_device(&instance) }?;

        // Query capabilities
        let capabilities = unsafe { GpuCapabilities::query(&instance, physical_device) };

        // Validate requirements
        if !capabilities.meets_requirements() {
            if !capabilities.available_extensions.contains("VK_KHR_swapchain") {
                return Err(GpuError::ExtensionNotSupported("VK_KHR_swapchain".to_string()));
            }
            return Err(GpuError::NoSuitableDevice);
        }

        tracing::info!("Selected GPU: {} on {:?}", capabilities.summary(), self.backend);

        let surface_loader = ash::khr::surface::Instance::new(&entry, &instance);
        let queue_families = unsafe {
            find_queue_families(
                &instance,
                physical_device,
                surface.map(|s| (&surface_loader, s)),
            )
        }?;

        let (device, anisotropy_enabled) =
            unsafe { create_device(&instance, physical_device, &queue_families, &capabilities) }?;
        let device = Arc::new(device);

        // Get queue handles
        let graphics_queue = unsafe { device.get_device_queue(queue_families.graphics, 0) };
        let compute_queue = unsafe { device.get_device_queue(queue_families.compute, 0) };
        let transfer_queue = unsafe { device.get_device_queue(queue_families.transfer, 0) };

        // Create GPU allocator
        let allocator = unsafe {
            GpuAllocator::new(
                &instance,
                device.clone(),
                physical_device,
                &queue_families.unique(),
            )
        }?;

        let presenter = surface.map(|s| unsafe { Presenter::new(&entry, &instance, &device, s) });

        Ok(VulkanDevice {
            entry,
            instance,
            debug,
            physical_device,
            device,
            capabilities,
            backend: self.backend,
            allocator: Mutex::new(allocator),
            anisotropy_enabled,
            queue_families,
            graphics_queue,
            compute_queue,
            transfer_queue,
            queue_lock: Mutex::new(()),
            presenter,
        })
    }
}

/// Find queue families for graphics, compute, and transfer.
///
/// # Safety
/// The instance and physical device must be valid.
unsafe fn find_queue_families(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    surface: Option<(&ash::khr::surface::Instance, vk::SurfaceKHR)>,
) -> Result<QueueFamilyIndices> {
    let queue_families = instance.get_physical_device_queue_family_properties(physical_device);

    let mut graphics_family = None;
    let mut compute_family = None;
    let mut transfer_family = None;

    for (i, family) in queue_families.iter().enumerate() {
        let i = i as u32;

        // Look for dedicated compute queue (no graphics)
        if family.queue_flags.contains(vk::QueueFlags::COMPUTE)
            && !family.queue_flags.contains(vk::QueueFlags::GRAPHICS)
            && compute_family.is_none()
        {
            compute_family = Some(i);
        }

        // Look for dedicated transfer queue (no graphics or compute)
        if family.queue_flags.contains(vk::QueueFlags::TRANSFER)
            && !family.queue_flags.contains(vk::QueueFlags::GRAPHICS)
            && !family.queue_flags.contains(vk::QueueFlags::COMPUTE)
            && transfer_family.is_none()
        {
            transfer_family = Some(i);
        }

        // Graphics queue must also present when there is a surface
        let presents = match surface {
            Some((loader, surface)) => loader
                .get_physical_device_surface_support(physical_device, i, surface)
                .unwrap_or(false),
            None => true,
        };
        if family.queue_flags.contains(vk::QueueFlags::GRAPHICS)
            && presents
            && graphics_family.is_none()
        {
            graphics_family = Some(i);
        }
    }

    // Graphics queue is required
    let graphics = graphics_family.ok_or(GpuError::NoSuitableDevice)?;

    // Fall back to graphics queue for compute if no dedicated queue
    let compute = compute_family.unwrap_or(graphics);

    // Fall back to compute queue for transfer if no dedicated queue
    let transfer = transfer_family.unwrap_or(compute);

    Ok(QueueFamilyIndices {
        graphics,
        compute,
        transfer,
    })
}

/// Device extensions to enable.
fn device_extensions(capabilities: &GpuCapabilities) -> Vec<&'static CStr> {
    let mut extensions = vec![ash::khr::swapchain::NAME];
    // Must be enabled whenever the driver exposes it
    if capabilities.is_portability_subset {
        extensions.push(ash::khr::portability_subset::NAME);
    }
    extensions
}

/// Create the logical device.
///
/// Returns the device and whether sampler anisotropy was enabled.
///
/// # Safety
/// The instance and physical device must be valid.
unsafe fn create_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    queue_families: &QueueFamilyIndices,
    capabilities: &GpuCapabilities,
) -> Result<(ash::Device, bool)> {
    // Create queue create infos
    let queue_priority = 1.0_f32;
    let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = queue_families
        .unique()
        .into_iter()
        .map(|family| {
            vk::DeviceQueueCreateInfo::default()
                .queue_family_index(family)
                .queue_priorities(std::slice::from_ref(&queue_priority))
        })
        .collect();

    let extensions = device_extensions(capabilities);
    let extension_names: Vec<*const c_char> = extensions.iter().map(|ext| ext.as_ptr()).collect();

    let supported = instance.get_physical_device_features(physical_device);
    let anisotropy = supported.sampler_anisotropy == vk::TRUE;
    let features = vk::PhysicalDeviceFeatures::default()
        .sampler_anisotropy(anisotropy)
        .fill_mode_non_solid(supported.fill_mode_non_solid == vk::TRUE);

    // Descriptor indexing for bindless textures
    let indexing = capabilities.supports_descriptor_indexing;
    let mut vulkan_1_2_features = vk::PhysicalDeviceVulkan12Features::default()
        .descriptor_binding_partially_bound(indexing)
        .descriptor_binding_sampled_image_update_after_bind(indexing)
        .descriptor_binding_variable_descriptor_count(indexing)
        .runtime_descriptor_array(indexing)
        .shader_sampled_image_array_non_uniform_indexing(indexing);

    let mut features2 = vk::PhysicalDeviceFeatures2::default()
        .features(features)
        .push_next(&mut vulkan_1_2_features);

    let device_create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&extension_names)
        .push_next(&mut features2);

    let device = instance
        .create_device(physical_device, &device_create_info, None)
        .map_err(GpuError::from)?;

    Ok((device, anisotropy))
}
