//! Command buffer management.

use crate::device::{
    ImageBarrier, QueueKind, RenderPassBegin, SemaphoreWait, SharedDevice, Submission,
};
use crate::error::{GpuError, Result};
use crate::resources::format_aspect;
use ash::vk;

/// Command pool for allocating command buffers.
pub struct CommandPool {
    device: SharedDevice,
    pool: vk::CommandPool,
    queue: QueueKind,
}

impl CommandPool {
    /// Create a pool whose buffers can be reset individually.
    pub fn new(device: &SharedDevice, queue: QueueKind) -> Result<Self> {
        Self::with_flags(device, queue, false)
    }

    /// Create a pool for short-lived buffers.
    pub fn transient(device: &SharedDevice, queue: QueueKind) -> Result<Self> {
        Self::with_flags(device, queue, true)
    }

    fn with_flags(device: &SharedDevice, queue: QueueKind, transient: bool) -> Result<Self> {
        let pool = device.create_command_pool(queue, transient)?;
        Ok(Self {
            device: device.clone(),
            pool,
            queue,
        })
    }

    /// Get the raw pool handle.
    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    /// Queue the pool's buffers are submitted to.
    pub fn queue(&self) -> QueueKind {
        self.queue
    }

    /// Allocate a single primary command buffer.
    pub fn allocate(&self) -> Result<CommandBuffer> {
        let handle = self
            .device
            .allocate_command_buffers(self.pool, 1)?
            .pop()
            .ok_or_else(|| GpuError::Other("No command buffer allocated".to_string()))?;
        Ok(CommandBuffer {
            device: self.device.clone(),
            pool: self.pool,
            queue: self.queue,
            handle,
            state: CommandBufferState::Idle,
            last_pipeline: None,
        })
    }

    /// Allocate one command buffer per frame in flight.
    pub fn allocate_many(&self, count: usize) -> Result<Vec<CommandBuffer>> {
        (0..count).map(|_| self.allocate()).collect()
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        self.device.destroy_command_pool(self.pool);
    }
}

/// Recording state of a [`CommandBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandBufferState {
    /// Not recording; may be begun.
    Idle,
    /// Between `begin` and `end`.
    Recording,
    /// Ended and ready for submission.
    Executable,
}

/// A primary command buffer with tracked recording state.
///
/// The buffer must not outlive the [`CommandPool`] it came from.
pub struct CommandBuffer {
    device: SharedDevice,
    pool: vk::CommandPool,
    queue: QueueKind,
    handle: vk::CommandBuffer,
    state: CommandBufferState,
    last_pipeline: Option<vk::Pipeline>,
}

impl CommandBuffer {
    /// Get the raw command buffer handle.
    pub fn handle(&self) -> vk::CommandBuffer {
        self.handle
    }

    pub fn state(&self) -> CommandBufferState {
        self.state
    }

    pub fn queue(&self) -> QueueKind {
        self.queue
    }

    pub fn device(&self) -> &SharedDevice {
        &self.device
    }

    /// Begin recording.
    pub fn begin(&mut self) -> Result<()> {
        self.begin_with(false)
    }

    /// Begin recording a buffer that will be submitted once.
    pub fn begin_one_time(&mut self) -> Result<()> {
        self.begin_with(true)
    }

    fn begin_with(&mut self, one_time: bool) -> Result<()> {
        if self.state == CommandBufferState::Recording {
            return Err(GpuError::InvalidState(
                "Command buffer is already recording".to_string(),
            ));
        }
        self.device.begin_command_buffer(self.handle, one_time)?;
        self.state = CommandBufferState::Recording;
        self.last_pipeline = None;
        Ok(())
    }

    /// Finish recording.
    pub fn end(&mut self) -> Result<()> {
        if self.state != CommandBufferState::Recording {
            return Err(GpuError::InvalidState(
                "Command buffer is not recording".to_string(),
            ));
        }
        self.device.end_command_buffer(self.handle)?;
        self.state = CommandBufferState::Executable;
        Ok(())
    }

    /// Discard recorded commands and forget the last bound pipeline.
    pub fn reset(&mut self) -> Result<()> {
        self.device.reset_command_buffer(self.handle)?;
        self.state = CommandBufferState::Idle;
        self.last_pipeline = None;
        Ok(())
    }

    /// Bind a pipeline, skipping the native call if it is already bound.
    pub fn bind_pipeline(&mut self, bind_point: vk::PipelineBindPoint, pipeline: vk::Pipeline) {
        debug_assert_eq!(self.state, CommandBufferState::Recording);
        if self.last_pipeline == Some(pipeline) {
            return;
        }
        self.device.cmd_bind_pipeline(self.handle, bind_point, pipeline);
        self.last_pipeline = Some(pipeline);
    }

    /// Bind descriptor sets starting at `first_set`.
    pub fn bind_descriptor_sets(
        &mut self,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
    ) {
        debug_assert_eq!(self.state, CommandBufferState::Recording);
        self.device
            .cmd_bind_descriptor_sets(self.handle, bind_point, layout, first_set, sets);
    }

    /// Upload a push constant block.
    pub fn push_constants<T: bytemuck::Pod>(
        &mut self,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        value: &T,
    ) {
        self.device.cmd_push_constants(
            self.handle,
            layout,
            stages,
            0,
            bytemuck::bytes_of(value),
        );
    }

    /// Begin a render pass instance.
    pub fn begin_render_pass(
        &mut self,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_values: &[vk::ClearValue],
    ) {
        debug_assert_eq!(self.state, CommandBufferState::Recording);
        self.device.cmd_begin_render_pass(
            self.handle,
            &RenderPassBegin {
                render_pass,
                framebuffer,
                extent,
                clear_values,
            },
        );
    }

    pub fn end_render_pass(&mut self) {
        self.device.cmd_end_render_pass(self.handle);
    }

    /// Set a full-extent viewport and scissor.
    pub fn set_viewport_and_scissor(&mut self, extent: vk::Extent2D) {
        self.device.cmd_set_viewport(
            self.handle,
            vk::Viewport {
                x: 0.0,
                y: 0.0,
                width: extent.width as f32,
                height: extent.height as f32,
                min_depth: 0.0,
                max_depth: 1.0,
            },
        );
        self.device.cmd_set_scissor(
            self.handle,
            vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent,
            },
        );
    }

    pub fn bind_vertex_buffer(&mut self, buffer: vk::Buffer) {
        self.device.cmd_bind_vertex_buffers(self.handle, &[buffer], &[0]);
    }

    pub fn bind_index_buffer(&mut self, buffer: vk::Buffer) {
        self.device
            .cmd_bind_index_buffer(self.handle, buffer, vk::IndexType::UINT32);
    }

    pub fn draw(&mut self, vertex_count: u32, instance_count: u32) {
        self.device.cmd_draw(self.handle, vertex_count, instance_count);
    }

    pub fn draw_indexed(&mut self, index_count: u32, instance_count: u32, first_index: u32) {
        self.device
            .cmd_draw_indexed(self.handle, index_count, instance_count, first_index, 0);
    }

    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        self.device.cmd_dispatch(self.handle, x, y, z);
    }

    /// Transition every mip level of `layer_count` layers between layouts.
    pub fn transition_image_layout(
        &mut self,
        image: vk::Image,
        format: vk::Format,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
        layer_count: u32,
    ) {
        let (src_stage, src_access) = layout_usage(old_layout);
        let (dst_stage, dst_access) = layout_usage(new_layout);
        self.image_barrier(&ImageBarrier {
            image,
            old_layout,
            new_layout,
            src_stage,
            dst_stage,
            src_access,
            dst_access,
            range: vk::ImageSubresourceRange::default()
                .aspect_mask(format_aspect(format))
                .base_mip_level(0)
                .level_count(vk::REMAINING_MIP_LEVELS)
                .base_array_layer(0)
                .layer_count(layer_count),
        });
    }

    /// Record a barrier with explicit stage and access masks.
    pub fn image_barrier(&mut self, barrier: &ImageBarrier) {
        self.device.cmd_image_barrier(self.handle, barrier);
    }

    pub fn copy_buffer(&mut self, src: vk::Buffer, dst: vk::Buffer, size: u64) {
        self.device
            .cmd_copy_buffer(self.handle, src, dst, &[vk::BufferCopy::default().size(size)]);
    }

    /// Copy tightly packed pixels into `layer_count` layers of an image in
    /// `TRANSFER_DST_OPTIMAL`.
    pub fn copy_buffer_to_image(
        &mut self,
        buffer: vk::Buffer,
        image: vk::Image,
        format: vk::Format,
        extent: vk::Extent2D,
        layer_count: u32,
    ) {
        self.device.cmd_copy_buffer_to_image(
            self.handle,
            buffer,
            image,
            &[whole_image_copy(format, extent, layer_count)],
        );
    }

    /// Copy an image in `TRANSFER_SRC_OPTIMAL` into tightly packed pixels.
    pub fn copy_image_to_buffer(
        &mut self,
        image: vk::Image,
        format: vk::Format,
        extent: vk::Extent2D,
        buffer: vk::Buffer,
    ) {
        self.device.cmd_copy_image_to_buffer(
            self.handle,
            image,
            buffer,
            &[whole_image_copy(format, extent, 1)],
        );
    }

    /// Copy one image into another of the same extent.
    pub fn copy_image(
        &mut self,
        src: vk::Image,
        dst: vk::Image,
        format: vk::Format,
        extent: vk::Extent2D,
    ) {
        let layers = vk::ImageSubresourceLayers::default()
            .aspect_mask(format_aspect(format))
            .mip_level(0)
            .base_array_layer(0)
            .layer_count(1);
        self.device.cmd_copy_image(
            self.handle,
            src,
            dst,
            &[vk::ImageCopy::default()
                .src_subresource(layers)
                .dst_subresource(layers)
                .extent(vk::Extent3D {
                    width: extent.width,
                    height: extent.height,
                    depth: 1,
                })],
        );
    }

    /// Submit to this buffer's queue.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn submit_to_queue(
        &self,
        fence: vk::Fence,
        waits: &[SemaphoreWait],
        signals: &[vk::Semaphore],
    ) -> Result<()> {
        if self.state != CommandBufferState::Executable {
            return Err(GpuError::InvalidState(format!(
                "Cannot submit a command buffer in state {:?}",
                self.state
            )));
        }
        self.device.submit(
            self.queue,
            &Submission {
                command_buffers: &[self.handle],
                waits,
                signals,
                fence,
            },
        )
    }

    /// Block until this buffer's queue is idle. Only for one-shot transfers.
    pub fn wait_for_queue(&self) -> Result<()> {
        self.device.queue_wait_idle(self.queue)
    }
}

impl Drop for CommandBuffer {
    fn drop(&mut self) {
        self.device.free_command_buffers(self.pool, &[self.handle]);
    }
}

/// Stage and access masks a layout is produced or consumed with.
pub fn layout_usage(layout: vk::ImageLayout) -> (vk::PipelineStageFlags, vk::AccessFlags) {
    match layout {
        vk::ImageLayout::UNDEFINED => (vk::PipelineStageFlags::TOP_OF_PIPE, vk::AccessFlags::empty()),
        vk::ImageLayout::TRANSFER_DST_OPTIMAL => (
            vk::PipelineStageFlags::TRANSFER,
            vk::AccessFlags::TRANSFER_WRITE,
        ),
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL => (
            vk::PipelineStageFlags::TRANSFER,
            vk::AccessFlags::TRANSFER_READ,
        ),
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL => (
            vk::PipelineStageFlags::FRAGMENT_SHADER,
            vk::AccessFlags::SHADER_READ,
        ),
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL => (
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        ),
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL => (
            vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ),
        vk::ImageLayout::PRESENT_SRC_KHR => (
            vk::PipelineStageFlags::BOTTOM_OF_PIPE,
            vk::AccessFlags::empty(),
        ),
        _ => (
            vk::PipelineStageFlags::ALL_COMMANDS,
            vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE,
        ),
    }
}

fn whole_image_copy(format: vk::Format, extent: vk::Extent2D, layer_count: u32) -> vk::BufferImageCopy {
    vk::BufferImageCopy::default()
        .buffer_offset(0)
        .buffer_row_length(0)
        .buffer_image_height(0)
        .image_subresource(
            vk::ImageSubresourceLayers::default()
                .aspect_mask(format_aspect(format))
                .mip_level(0)
                .base_array_layer(0)
                .layer_count(layer_count),
        )
        .image_extent(vk::Extent3D {
            width: extent.width,
            height: extent.height,
            depth: 1,
        })
}

/// A command buffer that is submitted and waited on when it goes out of scope.
///
/// Recording starts at construction. Call [`finish`](Self::finish) to observe
/// submission errors; dropping logs them instead.
pub struct SingleTimeCommands {
    buffer: CommandBuffer,
    submitted: bool,
}

impl SingleTimeCommands {
    /// Allocate from `pool` and begin recording.
    pub fn begin(pool: &CommandPool) -> Result<Self> {
        let mut buffer = pool.allocate()?;
        buffer.begin_one_time()?;
        Ok(Self {
            buffer,
            submitted: false,
        })
    }

    /// End, submit, wait and free.
    pub fn finish(mut self) -> Result<()> {
        self.flush()
    }

    fn flush(&mut self) -> Result<()> {
        self.submitted = true;
        self.buffer.end()?;
        self.buffer.submit_to_queue(vk::Fence::null(), &[], &[])?;
        self.buffer.wait_for_queue()
    }
}

impl std::ops::Deref for SingleTimeCommands {
    type Target = CommandBuffer;

    fn deref(&self) -> &CommandBuffer {
        &self.buffer
    }
}

impl std::ops::DerefMut for SingleTimeCommands {
    fn deref_mut(&mut self) -> &mut CommandBuffer {
        &mut self.buffer
    }
}

impl Drop for SingleTimeCommands {
    fn drop(&mut self) {
        if !self.submitted {
            if let Err(e) = self.flush() {
                tracing::error!("Single-time command submission failed: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::{Call, HeadlessDevice};
    use ash::vk::Handle;
    use std::sync::Arc;

    fn setup() -> (Arc<HeadlessDevice>, CommandPool) {
        let headless = Arc::new(HeadlessDevice::default());
        let device: SharedDevice = headless.clone();
        let pool = CommandPool::new(&device, QueueKind::Graphics).unwrap();
        (headless, pool)
    }

    #[test]
    fn begin_while_recording_fails() {
        let (_headless, pool) = setup();
        let mut cmd = pool.allocate().unwrap();
        cmd.begin().unwrap();
        assert!(cmd.begin().is_err());
        cmd.end().unwrap();
        assert_eq!(cmd.state(), CommandBufferState::Executable);
    }

    #[test]
    fn repeated_pipeline_bind_issues_one_native_call() {
        let (headless, pool) = setup();
        let mut cmd = pool.allocate().unwrap();
        cmd.reset().unwrap();
        cmd.begin().unwrap();
        let pipeline = vk::Pipeline::from_raw(42);
        cmd.bind_pipeline(vk::PipelineBindPoint::GRAPHICS, pipeline);
        cmd.bind_pipeline(vk::PipelineBindPoint::GRAPHICS, pipeline);
        assert_eq!(
            headless.count_calls(|c| matches!(c, Call::BindPipeline { .. })),
            1
        );
    }

    #[test]
    fn reset_forgets_last_pipeline() {
        let (headless, pool) = setup();
        let mut cmd = pool.allocate().unwrap();
        let pipeline = vk::Pipeline::from_raw(7);
        cmd.begin().unwrap();
        cmd.bind_pipeline(vk::PipelineBindPoint::GRAPHICS, pipeline);
        cmd.end().unwrap();
        cmd.reset().unwrap();
        cmd.begin().unwrap();
        cmd.bind_pipeline(vk::PipelineBindPoint::GRAPHICS, pipeline);
        assert_eq!(
            headless.count_calls(|c| matches!(c, Call::BindPipeline { .. })),
            2
        );
    }

    #[test]
    fn submit_requires_ended_recording() {
        let (_headless, pool) = setup();
        let mut cmd = pool.allocate().unwrap();
        cmd.begin().unwrap();
        assert!(cmd.submit_to_queue(vk::Fence::null(), &[], &[]).is_err());
    }

    #[test]
    fn single_time_commands_submit_on_drop() {
        let (headless, pool) = setup();
        {
            let mut once = SingleTimeCommands::begin(&pool).unwrap();
            once.dispatch(1, 1, 1);
        }
        assert_eq!(headless.submissions().len(), 1);
        assert_eq!(
            headless.count_calls(|c| matches!(c, Call::QueueWaitIdle(QueueKind::Graphics))),
            1
        );
        assert_eq!(headless.live_objects("command_buffer"), 0);
    }

    #[test]
    fn single_time_commands_finish_explicitly() {
        let (headless, pool) = setup();
        let once = SingleTimeCommands::begin(&pool).unwrap();
        once.finish().unwrap();
        assert_eq!(headless.submissions().len(), 1);
    }
}
