//! Recording backend without a GPU.
//!
//! [`HeadlessDevice`] implements [`RenderDevice`] by fabricating handles and
//! recording every native call. Buffer memory is kept as host copies so
//! uploads and read-backs behave like the real thing. Swapchain acquire and
//! present results can be scripted to exercise recreation paths.

use crate::device::{
    AcquireOutcome, BackendKind, BufferDesc, ComputePipelineDesc, DescriptorBindingDesc,
    DescriptorResource, DescriptorWrite, DeviceLimits, GraphicsPipelineDesc, ImageBarrier,
    ImageDesc, ImageViewDesc, PresentOutcome, QueueKind, RenderDevice, RenderPassBegin,
    SamplerDesc, SemaphoreWait, Submission, SwapchainDesc, SwapchainInfo,
};
use crate::error::{GpuError, Result};
use crate::render_pass::RenderPassDesc;
use ash::vk::{self, Handle};
use gpu_allocator::MemoryLocation;
use hashbrown::HashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;

const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Native call observed by the headless device.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    CreateBuffer { buffer: vk::Buffer, size: u64 },
    CreateImage { image: vk::Image, samples: vk::SampleCountFlags, layers: u32 },
    DestroyImage(vk::Image),
    CreateShaderModule(vk::ShaderModule),
    CreateGraphicsPipeline { pipeline: vk::Pipeline, samples: vk::SampleCountFlags },
    CreateComputePipeline(vk::Pipeline),
    DestroyPipeline(vk::Pipeline),
    CreateRenderPass(vk::RenderPass),
    DestroyRenderPass(vk::RenderPass),
    CreateFramebuffer { framebuffer: vk::Framebuffer, render_pass: vk::RenderPass, extent: vk::Extent2D },
    BeginCommandBuffer(vk::CommandBuffer),
    EndCommandBuffer(vk::CommandBuffer),
    ResetCommandBuffer(vk::CommandBuffer),
    BeginRenderPass { cmd: vk::CommandBuffer, render_pass: vk::RenderPass, framebuffer: vk::Framebuffer },
    EndRenderPass(vk::CommandBuffer),
    BindPipeline { cmd: vk::CommandBuffer, pipeline: vk::Pipeline },
    BindDescriptorSets { cmd: vk::CommandBuffer, first_set: u32, sets: Vec<vk::DescriptorSet> },
    PushConstants { cmd: vk::CommandBuffer, size: usize },
    BindVertexBuffers(vk::CommandBuffer),
    BindIndexBuffer(vk::CommandBuffer),
    SetViewport(vk::CommandBuffer),
    SetScissor(vk::CommandBuffer),
    Draw { cmd: vk::CommandBuffer, vertex_count: u32, instance_count: u32 },
    DrawIndexed { cmd: vk::CommandBuffer, index_count: u32, instance_count: u32 },
    Dispatch { cmd: vk::CommandBuffer, groups: [u32; 3] },
    ImageBarrier { cmd: vk::CommandBuffer, barrier: ImageBarrier },
    CopyBuffer { cmd: vk::CommandBuffer, src: vk::Buffer, dst: vk::Buffer },
    CopyBufferToImage { cmd: vk::CommandBuffer, image: vk::Image },
    CopyImageToBuffer { cmd: vk::CommandBuffer, image: vk::Image, buffer: vk::Buffer },
    CopyImage { cmd: vk::CommandBuffer, src: vk::Image, dst: vk::Image },
    Submit(SubmitRecord),
    WaitFence(vk::Fence),
    ResetFence(vk::Fence),
    QueueWaitIdle(QueueKind),
    WaitIdle,
    CreateSwapchain(vk::SwapchainKHR),
    DestroySwapchain(vk::SwapchainKHR),
    Acquire { signal: vk::Semaphore, outcome: AcquireOutcome },
    Present { image_index: u32, waits: Vec<vk::Semaphore>, outcome: PresentOutcome },
}

/// A recorded queue submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitRecord {
    pub queue: QueueKind,
    pub command_buffers: Vec<vk::CommandBuffer>,
    pub waits: Vec<SemaphoreWait>,
    pub signals: Vec<vk::Semaphore>,
    pub fence: vk::Fence,
}

/// Headless device configuration.
#[derive(Debug, Clone)]
pub struct HeadlessConfig {
    pub limits: DeviceLimits,
    pub swapchain_image_count: u32,
    pub surface_format: vk::Format,
    pub hdr_surface_format: vk::Format,
}

impl Default for HeadlessConfig {
    fn default() -> Self {
        Self {
            limits: DeviceLimits::default(),
            swapchain_image_count: 3,
            surface_format: vk::Format::B8G8R8A8_SRGB,
            hdr_surface_format: vk::Format::A2B10G10R10_UNORM_PACK32,
        }
    }
}

struct BufferMemory {
    data: Vec<u8>,
    host_visible: bool,
}

struct ImageRecord {
    format: vk::Format,
    live_views: u32,
    /// Byte every texel of the image reads back as.
    fill: u8,
}

#[derive(Default)]
struct State {
    next_handle: u64,
    buffers: HashMap<u64, BufferMemory>,
    images: HashMap<u64, ImageRecord>,
    views: HashMap<u64, u64>,
    fences: HashMap<u64, bool>,
    render_passes: HashMap<u64, RenderPassDesc>,
    descriptors: HashMap<(u64, u32, u32), DescriptorResource>,
    swapchains: HashMap<u64, Vec<vk::Image>>,
    next_image: u32,
    live: HashMap<&'static str, usize>,
    calls: Vec<Call>,
    acquire_script: VecDeque<AcquireOutcome>,
    present_script: VecDeque<PresentOutcome>,
}

impl State {
    fn handle<H: Handle>(&mut self, kind: &'static str) -> H {
        self.next_handle += 1;
        *self.live.entry(kind).or_default() += 1;
        H::from_raw(self.next_handle)
    }

    fn release(&mut self, kind: &'static str) {
        if let Some(count) = self.live.get_mut(kind) {
            *count = count.saturating_sub(1);
        }
    }
}

/// Device that records instead of rendering.
pub struct HeadlessDevice {
    config: HeadlessConfig,
    state: Mutex<State>,
}

impl HeadlessDevice {
    pub fn new(config: HeadlessConfig) -> Self {
        Self {
            config,
            state: Mutex::new(State::default()),
        }
    }

    /// Device whose per-stage sampled image limit is `max`.
    pub fn with_sampled_image_limit(max: u32) -> Self {
        let mut config = HeadlessConfig::default();
        config.limits.max_per_stage_descriptor_sampled_images = max;
        Self::new(config)
    }

    /// Every call recorded so far.
    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    /// Number of recorded calls matching `predicate`.
    pub fn count_calls(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.state.lock().calls.iter().filter(|c| predicate(c)).count()
    }

    /// Forget recorded calls.
    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Every queue submission recorded so far.
    pub fn submissions(&self) -> Vec<SubmitRecord> {
        self.state
            .lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::Submit(record) => Some(record.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of live objects of a kind such as `"buffer"` or `"image_view"`.
    pub fn live_objects(&self, kind: &str) -> usize {
        self.state.lock().live.get(kind).copied().unwrap_or(0)
    }

    /// Current descriptor at `(set, binding, element)`.
    pub fn descriptor(
        &self,
        set: vk::DescriptorSet,
        binding: u32,
        element: u32,
    ) -> Option<DescriptorResource> {
        self.state
            .lock()
            .descriptors
            .get(&(set.as_raw(), binding, element))
            .copied()
    }

    /// Description a render pass was created from.
    pub fn render_pass_desc(&self, render_pass: vk::RenderPass) -> Option<RenderPassDesc> {
        self.state
            .lock()
            .render_passes
            .get(&render_pass.as_raw())
            .cloned()
    }

    /// Host copy of a buffer's memory.
    pub fn buffer_contents(&self, buffer: vk::Buffer) -> Option<Vec<u8>> {
        self.state
            .lock()
            .buffers
            .get(&buffer.as_raw())
            .map(|b| b.data.clone())
    }

    /// Set the byte an image reads back as.
    pub fn fill_image(&self, image: vk::Image, value: u8) {
        if let Some(record) = self.state.lock().images.get_mut(&image.as_raw()) {
            record.fill = value;
        }
    }

    /// Queue the outcome of a future acquire.
    pub fn script_acquire(&self, outcome: AcquireOutcome) {
        self.state.lock().acquire_script.push_back(outcome);
    }

    /// Queue the outcome of a future present.
    pub fn script_present(&self, outcome: PresentOutcome) {
        self.state.lock().present_script.push_back(outcome);
    }

    fn record(&self, call: Call) {
        self.state.lock().calls.push(call);
    }
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new(HeadlessConfig::default())
    }
}

fn texel_size(format: vk::Format) -> usize {
    match format {
        vk::Format::R16G16B16A16_SFLOAT => 8,
        vk::Format::R32G32B32A32_SFLOAT => 16,
        vk::Format::R8_UNORM => 1,
        vk::Format::D16_UNORM => 2,
        _ => 4,
    }
}

impl RenderDevice for HeadlessDevice {
    fn backend(&self) -> BackendKind {
        BackendKind::Headless
    }

    fn adapter_name(&self) -> &str {
        "headless"
    }

    fn limits(&self) -> &DeviceLimits {
        &self.config.limits
    }

    fn queue_family(&self, queue: QueueKind) -> u32 {
        match queue {
            QueueKind::Graphics => 0,
            QueueKind::Compute => 1,
            QueueKind::Transfer => 2,
        }
    }

    fn create_buffer(&self, desc: &BufferDesc<'_>) -> Result<vk::Buffer> {
        if desc.size == 0 {
            return Err(GpuError::InvalidArgument(format!(
                "buffer '{}' has zero size",
                desc.name
            )));
        }
        let mut state = self.state.lock();
        let buffer: vk::Buffer = state.handle("buffer");
        state.buffers.insert(
            buffer.as_raw(),
            BufferMemory {
                data: vec![0; desc.size as usize],
                host_visible: !matches!(desc.location, MemoryLocation::GpuOnly),
            },
        );
        state.calls.push(Call::CreateBuffer {
            buffer,
            size: desc.size,
        });
        Ok(buffer)
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        let mut state = self.state.lock();
        if state.buffers.remove(&buffer.as_raw()).is_some() {
            state.release("buffer");
        }
    }

    fn write_buffer(&self, buffer: vk::Buffer, offset: u64, data: &[u8]) -> Result<()> {
        let mut state = self.state.lock();
        let memory = state
            .buffers
            .get_mut(&buffer.as_raw())
            .ok_or_else(|| GpuError::ResourceNotFound(format!("{buffer:?}")))?;
        if !memory.host_visible {
            return Err(GpuError::InvalidState(
                "buffer is not host-visible".to_string(),
            ));
        }
        let start = offset as usize;
        let end = start + data.len();
        if end > memory.data.len() {
            return Err(GpuError::InvalidArgument(format!(
                "write of {} bytes at {offset} exceeds buffer size {}",
                data.len(),
                memory.data.len()
            )));
        }
        memory.data[start..end].copy_from_slice(data);
        Ok(())
    }

    fn read_buffer(&self, buffer: vk::Buffer, offset: u64, len: usize) -> Result<Vec<u8>> {
        let state = self.state.lock();
        let memory = state
            .buffers
            .get(&buffer.as_raw())
            .ok_or_else(|| GpuError::ResourceNotFound(format!("{buffer:?}")))?;
        if !memory.host_visible {
            return Err(GpuError::InvalidState(
                "buffer is not host-visible".to_string(),
            ));
        }
        let start = offset as usize;
        memory
            .data
            .get(start..start + len)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| GpuError::InvalidArgument("read past end of buffer".to_string()))
    }

    fn create_image(&self, desc: &ImageDesc<'_>) -> Result<vk::Image> {
        if desc.extent.width == 0 || desc.extent.height == 0 {
            return Err(GpuError::InvalidArgument(format!(
                "image '{}' has zero extent",
                desc.name
            )));
        }
        let mut state = self.state.lock();
        let image: vk::Image = state.handle("image");
        state.images.insert(
            image.as_raw(),
            ImageRecord {
                format: desc.format,
                live_views: 0,
                fill: 0,
            },
        );
        state.calls.push(Call::CreateImage {
            image,
            samples: desc.samples,
            layers: desc.array_layers,
        });
        Ok(image)
    }

    fn destroy_image(&self, image: vk::Image) {
        let mut state = self.state.lock();
        if let Some(record) = state.images.remove(&image.as_raw()) {
            assert_eq!(
                record.live_views, 0,
                "image {image:?} destroyed while {} view(s) still reference it",
                record.live_views
            );
            state.release("image");
            state.calls.push(Call::DestroyImage(image));
        }
    }

    fn create_image_view(&self, desc: &ImageViewDesc) -> Result<vk::ImageView> {
        let mut state = self.state.lock();
        let record = state
            .images
            .get_mut(&desc.image.as_raw())
            .ok_or_else(|| GpuError::ResourceNotFound(format!("{:?}", desc.image)))?;
        record.live_views += 1;
        let view: vk::ImageView = state.handle("image_view");
        state.views.insert(view.as_raw(), desc.image.as_raw());
        Ok(view)
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        let mut state = self.state.lock();
        if let Some(image) = state.views.remove(&view.as_raw()) {
            if let Some(record) = state.images.get_mut(&image) {
                record.live_views -= 1;
            }
            state.release("image_view");
        }
    }

    fn create_sampler(&self, _desc: &SamplerDesc) -> Result<vk::Sampler> {
        Ok(self.state.lock().handle("sampler"))
    }

    fn destroy_sampler(&self, _sampler: vk::Sampler) {
        self.state.lock().release("sampler");
    }

    fn create_semaphore(&self) -> Result<vk::Semaphore> {
        Ok(self.state.lock().handle("semaphore"))
    }

    fn destroy_semaphore(&self, _semaphore: vk::Semaphore) {
        self.state.lock().release("semaphore");
    }

    fn create_fence(&self, signaled: bool) -> Result<vk::Fence> {
        let mut state = self.state.lock();
        let fence: vk::Fence = state.handle("fence");
        state.fences.insert(fence.as_raw(), signaled);
        Ok(fence)
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        let mut state = self.state.lock();
        if state.fences.remove(&fence.as_raw()).is_some() {
            state.release("fence");
        }
    }

    fn wait_for_fence(&self, fence: vk::Fence, _timeout_ns: u64) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(Call::WaitFence(fence));
        match state.fences.get(&fence.as_raw()) {
            Some(true) => Ok(()),
            // Nothing pending will ever signal it.
            Some(false) => Err(GpuError::Vulkan(vk::Result::TIMEOUT)),
            None => Err(GpuError::ResourceNotFound(format!("{fence:?}"))),
        }
    }

    fn reset_fence(&self, fence: vk::Fence) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(Call::ResetFence(fence));
        let signaled = state
            .fences
            .get_mut(&fence.as_raw())
            .ok_or_else(|| GpuError::ResourceNotFound(format!("{fence:?}")))?;
        *signaled = false;
        Ok(())
    }

    fn create_render_pass(&self, desc: &RenderPassDesc) -> Result<vk::RenderPass> {
        desc.validate()?;
        let mut state = self.state.lock();
        let render_pass: vk::RenderPass = state.handle("render_pass");
        state
            .render_passes
            .insert(render_pass.as_raw(), desc.clone());
        state.calls.push(Call::CreateRenderPass(render_pass));
        Ok(render_pass)
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        let mut state = self.state.lock();
        state.release("render_pass");
        state.calls.push(Call::DestroyRenderPass(render_pass));
    }

    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
        _layers: u32,
    ) -> Result<vk::Framebuffer> {
        let mut state = self.state.lock();
        let expected = state
            .render_passes
            .get(&render_pass.as_raw())
            .map(|d| d.attachments.len())
            .ok_or_else(|| GpuError::ResourceNotFound(format!("{render_pass:?}")))?;
        if expected != attachments.len() {
            return Err(GpuError::InvalidArgument(format!(
                "framebuffer has {} attachments, render pass expects {expected}",
                attachments.len()
            )));
        }
        let framebuffer: vk::Framebuffer = state.handle("framebuffer");
        state.calls.push(Call::CreateFramebuffer {
            framebuffer,
            render_pass,
            extent,
        });
        Ok(framebuffer)
    }

    fn destroy_framebuffer(&self, _framebuffer: vk::Framebuffer) {
        self.state.lock().release("framebuffer");
    }

    fn create_shader_module(&self, code: &[u32]) -> Result<vk::ShaderModule> {
        if code.first() != Some(&SPIRV_MAGIC) {
            return Err(GpuError::ShaderCompilation(
                "code is not SPIR-V".to_string(),
            ));
        }
        let mut state = self.state.lock();
        let module: vk::ShaderModule = state.handle("shader_module");
        state.calls.push(Call::CreateShaderModule(module));
        Ok(module)
    }

    fn destroy_shader_module(&self, _module: vk::ShaderModule) {
        self.state.lock().release("shader_module");
    }

    fn create_pipeline_layout(
        &self,
        _set_layouts: &[vk::DescriptorSetLayout],
        _push_constants: &[vk::PushConstantRange],
    ) -> Result<vk::PipelineLayout> {
        Ok(self.state.lock().handle("pipeline_layout"))
    }

    fn destroy_pipeline_layout(&self, _layout: vk::PipelineLayout) {
        self.state.lock().release("pipeline_layout");
    }

    fn create_graphics_pipeline(&self, desc: &GraphicsPipelineDesc<'_>) -> Result<vk::Pipeline> {
        if desc.stages.is_empty() {
            return Err(GpuError::PipelineCreation(
                "graphics pipeline has no stages".to_string(),
            ));
        }
        let mut state = self.state.lock();
        let pipeline: vk::Pipeline = state.handle("pipeline");
        state.calls.push(Call::CreateGraphicsPipeline {
            pipeline,
            samples: desc.raster.samples,
        });
        Ok(pipeline)
    }

    fn create_compute_pipeline(&self, _desc: &ComputePipelineDesc<'_>) -> Result<vk::Pipeline> {
        let mut state = self.state.lock();
        let pipeline: vk::Pipeline = state.handle("pipeline");
        state.calls.push(Call::CreateComputePipeline(pipeline));
        Ok(pipeline)
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        let mut state = self.state.lock();
        state.release("pipeline");
        state.calls.push(Call::DestroyPipeline(pipeline));
    }

    fn create_descriptor_set_layout(
        &self,
        _bindings: &[DescriptorBindingDesc],
    ) -> Result<vk::DescriptorSetLayout> {
        Ok(self.state.lock().handle("descriptor_set_layout"))
    }

    fn destroy_descriptor_set_layout(&self, _layout: vk::DescriptorSetLayout) {
        self.state.lock().release("descriptor_set_layout");
    }

    fn create_descriptor_pool(
        &self,
        _max_sets: u32,
        _sizes: &[vk::DescriptorPoolSize],
        _update_after_bind: bool,
    ) -> Result<vk::DescriptorPool> {
        Ok(self.state.lock().handle("descriptor_pool"))
    }

    fn destroy_descriptor_pool(&self, _pool: vk::DescriptorPool) {
        self.state.lock().release("descriptor_pool");
    }

    fn allocate_descriptor_sets(
        &self,
        _pool: vk::DescriptorPool,
        layouts: &[vk::DescriptorSetLayout],
        _variable_count: Option<u32>,
    ) -> Result<Vec<vk::DescriptorSet>> {
        let mut state = self.state.lock();
        Ok(layouts
            .iter()
            .map(|_| state.handle::<vk::DescriptorSet>("descriptor_set"))
            .collect())
    }

    fn update_descriptor_sets(&self, writes: &[DescriptorWrite]) {
        let mut state = self.state.lock();
        for write in writes {
            state.descriptors.insert(
                (write.set.as_raw(), write.binding, write.array_element),
                write.resource,
            );
        }
    }

    fn create_command_pool(&self, _queue: QueueKind, _transient: bool) -> Result<vk::CommandPool> {
        Ok(self.state.lock().handle("command_pool"))
    }

    fn destroy_command_pool(&self, _pool: vk::CommandPool) {
        self.state.lock().release("command_pool");
    }

    fn allocate_command_buffers(
        &self,
        _pool: vk::CommandPool,
        count: u32,
    ) -> Result<Vec<vk::CommandBuffer>> {
        let mut state = self.state.lock();
        Ok((0..count)
            .map(|_| state.handle::<vk::CommandBuffer>("command_buffer"))
            .collect())
    }

    fn free_command_buffers(&self, _pool: vk::CommandPool, buffers: &[vk::CommandBuffer]) {
        let mut state = self.state.lock();
        for _ in buffers {
            state.release("command_buffer");
        }
    }

    fn begin_command_buffer(&self, cmd: vk::CommandBuffer, _one_time: bool) -> Result<()> {
        self.record(Call::BeginCommandBuffer(cmd));
        Ok(())
    }

    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> Result<()> {
        self.record(Call::EndCommandBuffer(cmd));
        Ok(())
    }

    fn reset_command_buffer(&self, cmd: vk::CommandBuffer) -> Result<()> {
        self.record(Call::ResetCommandBuffer(cmd));
        Ok(())
    }

    fn cmd_begin_render_pass(&self, cmd: vk::CommandBuffer, begin: &RenderPassBegin<'_>) {
        self.record(Call::BeginRenderPass {
            cmd,
            render_pass: begin.render_pass,
            framebuffer: begin.framebuffer,
        });
    }

    fn cmd_end_render_pass(&self, cmd: vk::CommandBuffer) {
        self.record(Call::EndRenderPass(cmd));
    }

    fn cmd_bind_pipeline(
        &self,
        cmd: vk::CommandBuffer,
        _bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    ) {
        self.record(Call::BindPipeline { cmd, pipeline });
    }

    fn cmd_bind_descriptor_sets(
        &self,
        cmd: vk::CommandBuffer,
        _bind_point: vk::PipelineBindPoint,
        _layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
    ) {
        self.record(Call::BindDescriptorSets {
            cmd,
            first_set,
            sets: sets.to_vec(),
        });
    }

    fn cmd_push_constants(
        &self,
        cmd: vk::CommandBuffer,
        _layout: vk::PipelineLayout,
        _stages: vk::ShaderStageFlags,
        _offset: u32,
        data: &[u8],
    ) {
        self.record(Call::PushConstants {
            cmd,
            size: data.len(),
        });
    }

    fn cmd_bind_vertex_buffers(&self, cmd: vk::CommandBuffer, _buffers: &[vk::Buffer], _offsets: &[u64]) {
        self.record(Call::BindVertexBuffers(cmd));
    }

    fn cmd_bind_index_buffer(&self, cmd: vk::CommandBuffer, _buffer: vk::Buffer, _index_type: vk::IndexType) {
        self.record(Call::BindIndexBuffer(cmd));
    }

    fn cmd_set_viewport(&self, cmd: vk::CommandBuffer, _viewport: vk::Viewport) {
        self.record(Call::SetViewport(cmd));
    }

    fn cmd_set_scissor(&self, cmd: vk::CommandBuffer, _scissor: vk::Rect2D) {
        self.record(Call::SetScissor(cmd));
    }

    fn cmd_draw(&self, cmd: vk::CommandBuffer, vertex_count: u32, instance_count: u32) {
        self.record(Call::Draw {
            cmd,
            vertex_count,
            instance_count,
        });
    }

    fn cmd_draw_indexed(
        &self,
        cmd: vk::CommandBuffer,
        index_count: u32,
        instance_count: u32,
        _first_index: u32,
        _vertex_offset: i32,
    ) {
        self.record(Call::DrawIndexed {
            cmd,
            index_count,
            instance_count,
        });
    }

    fn cmd_dispatch(&self, cmd: vk::CommandBuffer, x: u32, y: u32, z: u32) {
        self.record(Call::Dispatch {
            cmd,
            groups: [x, y, z],
        });
    }

    fn cmd_image_barrier(&self, cmd: vk::CommandBuffer, barrier: &ImageBarrier) {
        self.record(Call::ImageBarrier {
            cmd,
            barrier: *barrier,
        });
    }

    fn cmd_copy_buffer(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: &[vk::BufferCopy],
    ) {
        let mut state = self.state.lock();
        for region in regions {
            let bytes = state.buffers.get(&src.as_raw()).and_then(|b| {
                let start = region.src_offset as usize;
                b.data.get(start..start + region.size as usize).map(<[u8]>::to_vec)
            });
            if let (Some(bytes), Some(target)) = (bytes, state.buffers.get_mut(&dst.as_raw())) {
                let start = region.dst_offset as usize;
                if let Some(slot) = target.data.get_mut(start..start + bytes.len()) {
                    slot.copy_from_slice(&bytes);
                }
            }
        }
        state.calls.push(Call::CopyBuffer { cmd, src, dst });
    }

    fn cmd_copy_buffer_to_image(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        _regions: &[vk::BufferImageCopy],
    ) {
        let mut state = self.state.lock();
        let first = state
            .buffers
            .get(&src.as_raw())
            .and_then(|b| b.data.first().copied());
        if let (Some(value), Some(record)) = (first, state.images.get_mut(&dst.as_raw())) {
            record.fill = value;
        }
        state.calls.push(Call::CopyBufferToImage { cmd, image: dst });
    }

    fn cmd_copy_image_to_buffer(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Image,
        dst: vk::Buffer,
        regions: &[vk::BufferImageCopy],
    ) {
        let mut state = self.state.lock();
        if let Some((fill, texel)) = state
            .images
            .get(&src.as_raw())
            .map(|r| (r.fill, texel_size(r.format)))
        {
            if let Some(target) = state.buffers.get_mut(&dst.as_raw()) {
                for region in regions {
                    let e = region.image_extent;
                    let len = (e.width * e.height * e.depth.max(1)) as usize * texel;
                    let start = region.buffer_offset as usize;
                    let end = (start + len).min(target.data.len());
                    if start < end {
                        target.data[start..end].fill(fill);
                    }
                }
            }
        }
        state.calls.push(Call::CopyImageToBuffer {
            cmd,
            image: src,
            buffer: dst,
        });
    }

    fn cmd_copy_image(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Image,
        dst: vk::Image,
        _regions: &[vk::ImageCopy],
    ) {
        let mut state = self.state.lock();
        let fill = state.images.get(&src.as_raw()).map(|r| r.fill);
        if let (Some(fill), Some(record)) = (fill, state.images.get_mut(&dst.as_raw())) {
            record.fill = fill;
        }
        state.calls.push(Call::CopyImage { cmd, src, dst });
    }

    fn submit(&self, queue: QueueKind, submission: &Submission<'_>) -> Result<()> {
        let mut state = self.state.lock();
        if submission.fence != vk::Fence::null() {
            match state.fences.get_mut(&submission.fence.as_raw()) {
                Some(signaled) if *signaled => {
                    return Err(GpuError::InvalidState(
                        "submitted with a fence that is still signaled".to_string(),
                    ));
                }
                // Work completes immediately.
                Some(signaled) => *signaled = true,
                None => return Err(GpuError::ResourceNotFound(format!("{:?}", submission.fence))),
            }
        }
        state.calls.push(Call::Submit(SubmitRecord {
            queue,
            command_buffers: submission.command_buffers.to_vec(),
            waits: submission.waits.to_vec(),
            signals: submission.signals.to_vec(),
            fence: submission.fence,
        }));
        Ok(())
    }

    fn queue_wait_idle(&self, queue: QueueKind) -> Result<()> {
        self.record(Call::QueueWaitIdle(queue));
        Ok(())
    }

    fn wait_idle(&self) -> Result<()> {
        self.record(Call::WaitIdle);
        Ok(())
    }

    fn create_swapchain(&self, desc: &SwapchainDesc) -> Result<SwapchainInfo> {
        if desc.width == 0 || desc.height == 0 {
            return Err(GpuError::SwapchainCreation(
                "surface has zero extent".to_string(),
            ));
        }
        let format = if desc.hdr {
            self.config.hdr_surface_format
        } else {
            self.config.surface_format
        };
        let mut state = self.state.lock();
        let handle: vk::SwapchainKHR = state.handle("swapchain");
        let images: Vec<vk::Image> = (0..self.config.swapchain_image_count)
            .map(|_| {
                let image: vk::Image = state.handle("swapchain_image");
                image
            })
            .collect();
        for image in &images {
            state.images.insert(
                image.as_raw(),
                ImageRecord {
                    format,
                    live_views: 0,
                    fill: 0,
                },
            );
        }
        state.swapchains.insert(handle.as_raw(), images.clone());
        state.next_image = 0;
        state.calls.push(Call::CreateSwapchain(handle));
        Ok(SwapchainInfo {
            handle,
            images,
            format,
            color_space: if desc.hdr {
                vk::ColorSpaceKHR::HDR10_ST2084_EXT
            } else {
                vk::ColorSpaceKHR::SRGB_NONLINEAR
            },
            extent: vk::Extent2D {
                width: desc.width,
                height: desc.height,
            },
        })
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        let mut state = self.state.lock();
        if let Some(images) = state.swapchains.remove(&swapchain.as_raw()) {
            for image in images {
                if let Some(record) = state.images.remove(&image.as_raw()) {
                    assert_eq!(
                        record.live_views, 0,
                        "swapchain destroyed while views of its images are alive"
                    );
                }
                state.release("swapchain_image");
            }
            state.release("swapchain");
        }
        state.calls.push(Call::DestroySwapchain(swapchain));
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        signal: vk::Semaphore,
    ) -> Result<AcquireOutcome> {
        let mut state = self.state.lock();
        let count = state
            .swapchains
            .get(&swapchain.as_raw())
            .map(Vec::len)
            .ok_or_else(|| GpuError::ResourceNotFound(format!("{swapchain:?}")))?
            as u32;
        let outcome = state.acquire_script.pop_front().unwrap_or_else(|| {
            let index = state.next_image % count;
            AcquireOutcome::Acquired {
                index,
                suboptimal: false,
            }
        });
        if let AcquireOutcome::Acquired { index, .. } = outcome {
            state.next_image = index + 1;
        }
        state.calls.push(Call::Acquire { signal, outcome });
        Ok(outcome)
    }

    fn present(
        &self,
        _swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: &[vk::Semaphore],
    ) -> Result<PresentOutcome> {
        let mut state = self.state.lock();
        let outcome = state
            .present_script
            .pop_front()
            .unwrap_or(PresentOutcome::Presented);
        state.calls.push(Call::Present {
            image_index,
            waits: wait.to_vec(),
            outcome,
        });
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_to_device_local_buffer_fails() {
        let device = HeadlessDevice::default();
        let buffer = device
            .create_buffer(&BufferDesc {
                name: "vertices",
                size: 64,
                usage: vk::BufferUsageFlags::VERTEX_BUFFER,
                location: MemoryLocation::GpuOnly,
            })
            .unwrap();
        assert!(device.write_buffer(buffer, 0, &[1, 2, 3]).is_err());
    }

    #[test]
    fn copy_buffer_moves_host_copies() {
        let device = HeadlessDevice::default();
        let desc = |name| BufferDesc {
            name,
            size: 4,
            usage: vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::TRANSFER_DST,
            location: MemoryLocation::CpuToGpu,
        };
        let src = device.create_buffer(&desc("src")).unwrap();
        let dst = device.create_buffer(&desc("dst")).unwrap();
        device.write_buffer(src, 0, &[9, 8, 7, 6]).unwrap();
        device.cmd_copy_buffer(
            vk::CommandBuffer::null(),
            src,
            dst,
            &[vk::BufferCopy::default().size(4)],
        );
        assert_eq!(device.buffer_contents(dst).unwrap(), vec![9, 8, 7, 6]);
    }

    #[test]
    fn scripted_acquire_takes_precedence() {
        let device = HeadlessDevice::default();
        let swapchain = device
            .create_swapchain(&SwapchainDesc {
                width: 8,
                height: 8,
                vsync: true,
                hdr: false,
                old: vk::SwapchainKHR::null(),
            })
            .unwrap();
        device.script_acquire(AcquireOutcome::OutOfDate);
        let semaphore = device.create_semaphore().unwrap();
        assert_eq!(
            device.acquire_next_image(swapchain.handle, semaphore).unwrap(),
            AcquireOutcome::OutOfDate
        );
        assert_eq!(
            device.acquire_next_image(swapchain.handle, semaphore).unwrap(),
            AcquireOutcome::Acquired {
                index: 0,
                suboptimal: false
            }
        );
    }

    #[test]
    fn unsignaled_fence_never_completes() {
        let device = HeadlessDevice::default();
        let fence = device.create_fence(false).unwrap();
        assert!(device.wait_for_fence(fence, u64::MAX).is_err());
        device
            .submit(
                QueueKind::Graphics,
                &Submission {
                    command_buffers: &[],
                    waits: &[],
                    signals: &[],
                    fence,
                },
            )
            .unwrap();
        assert!(device.wait_for_fence(fence, u64::MAX).is_ok());
    }
}
