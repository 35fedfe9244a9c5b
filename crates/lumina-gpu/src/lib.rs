//! GPU abstraction layer for the Lumina engine.
//!
//! The [`RenderDevice`] trait is the seam between the renderer and the native
//! API. This crate provides:
//! - the Vulkan backend, which also drives Metal through the portability layer
//! - a headless recording backend used by tests
//! - RAII resource wrappers, command recording and frame synchronization
//! - the descriptor table and the resource cache

pub mod cache;
pub mod command;
pub mod descriptors;
pub mod device;
pub mod error;
#[cfg(any(test, feature = "headless"))]
pub mod headless;
pub mod render_pass;
pub mod resources;
pub mod sync;
pub mod vulkan;

pub use cache::ResourceCache;
pub use command::{CommandBuffer, CommandBufferState, CommandPool, SingleTimeCommands};
pub use descriptors::{
    set_index, BindingCount, DescriptorTable, FrameTarget, TextureBindingStrategy,
};
pub use device::{
    AcquireOutcome, BackendKind, BufferDesc, ComputePipelineDesc, DescriptorBindingDesc,
    DescriptorResource, DescriptorWrite, DeviceLimits, GraphicsPipelineDesc, ImageBarrier,
    ImageDesc, ImageViewDesc, PresentOutcome, QueueKind, RasterState, RenderDevice,
    RenderPassBegin, SamplerDesc, SemaphoreWait, ShaderStageDesc, SharedDevice, Submission,
    SwapchainDesc, SwapchainInfo,
};
pub use error::{GpuError, Result};
pub use render_pass::{AttachmentDesc, AttachmentRef, RenderPassDesc, SubpassDependency, SubpassDesc};
pub use resources::{Buffer, Fence, Image, ImageView, Sampler, Semaphore};
pub use sync::{FrameCycle, FrameSync, FrameSyncManager, SubmissionChain};
pub use vulkan::{VulkanDevice, VulkanDeviceBuilder};

pub use ash::vk;
pub use gpu_allocator::MemoryLocation;
