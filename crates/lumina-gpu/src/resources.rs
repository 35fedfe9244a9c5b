//! GPU resource primitives.
//!
//! Each wrapper exclusively owns one native handle and releases it on drop.
//! Wrappers are move-only; a `Default` instance owns nothing and dropping it
//! is a no-op.

use crate::device::{BufferDesc, ImageDesc, ImageViewDesc, SamplerDesc, SharedDevice};
use crate::error::{GpuError, Result};
use ash::vk;
use gpu_allocator::MemoryLocation;
use std::sync::Arc;

/// A GPU buffer.
#[derive(Default)]
pub struct Buffer {
    device: Option<SharedDevice>,
    handle: vk::Buffer,
    size: u64,
    host_visible: bool,
}

impl Buffer {
    /// Create a buffer.
    pub fn create(device: &SharedDevice, desc: &BufferDesc<'_>) -> Result<Self> {
        let handle = device.create_buffer(desc)?;
        Ok(Self {
            device: Some(device.clone()),
            handle,
            size: desc.size,
            host_visible: !matches!(desc.location, MemoryLocation::GpuOnly),
        })
    }

    /// Create a host-visible buffer holding `data`.
    pub fn with_data<T: bytemuck::Pod>(
        device: &SharedDevice,
        name: &str,
        usage: vk::BufferUsageFlags,
        data: &[T],
    ) -> Result<Self> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let buffer = Self::create(
            device,
            &BufferDesc {
                name,
                size: bytes.len().max(1) as u64,
                usage,
                location: MemoryLocation::CpuToGpu,
            },
        )?;
        buffer.write_bytes(0, bytes)?;
        Ok(buffer)
    }

    pub fn handle(&self) -> vk::Buffer {
        self.handle
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn is_host_visible(&self) -> bool {
        self.host_visible
    }

    /// Write typed data at the start of the buffer (must be host-visible).
    pub fn write<T: bytemuck::Pod>(&self, data: &[T]) -> Result<()> {
        self.write_bytes(0, bytemuck::cast_slice(data))
    }

    /// Write raw bytes at the given offset (must be host-visible).
    pub fn write_bytes(&self, offset: u64, data: &[u8]) -> Result<()> {
        let device = self.live_device()?;
        if !self.host_visible {
            return Err(GpuError::InvalidState(
                "Buffer is not host-visible".to_string(),
            ));
        }
        let end = offset
            .checked_add(data.len() as u64)
            .ok_or_else(|| GpuError::InvalidArgument("Offset overflow".to_string()))?;
        if end > self.size {
            return Err(GpuError::InvalidArgument(format!(
                "Data range {offset}..{end} too large for buffer of {} bytes",
                self.size
            )));
        }
        device.write_buffer(self.handle, offset, data)
    }

    /// Read the whole buffer back (must be host-visible).
    pub fn read_bytes(&self) -> Result<Vec<u8>> {
        let device = self.live_device()?;
        if !self.host_visible {
            return Err(GpuError::InvalidState(
                "Buffer is not host-visible".to_string(),
            ));
        }
        device.read_buffer(self.handle, 0, self.size as usize)
    }

    fn live_device(&self) -> Result<&SharedDevice> {
        self.device
            .as_ref()
            .ok_or_else(|| GpuError::InvalidState("Buffer was never created".to_string()))
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if let Some(device) = self.device.take() {
            if self.handle != vk::Buffer::null() {
                device.destroy_buffer(self.handle);
            }
        }
    }
}

/// A GPU image.
#[derive(Default)]
pub struct Image {
    device: Option<SharedDevice>,
    handle: vk::Image,
    format: vk::Format,
    extent: vk::Extent2D,
    samples: vk::SampleCountFlags,
    mip_levels: u32,
    array_layers: u32,
    /// Swapchain images belong to the swapchain.
    owned: bool,
}

impl Image {
    /// Create an image.
    pub fn create(device: &SharedDevice, desc: &ImageDesc<'_>) -> Result<Self> {
        let handle = device.create_image(desc)?;
        Ok(Self {
            device: Some(device.clone()),
            handle,
            format: desc.format,
            extent: desc.extent,
            samples: desc.samples,
            mip_levels: desc.mip_levels,
            array_layers: desc.array_layers,
            owned: true,
        })
    }

    /// Wrap an image owned by a swapchain.
    pub fn from_swapchain(
        device: &SharedDevice,
        handle: vk::Image,
        format: vk::Format,
        extent: vk::Extent2D,
    ) -> Self {
        Self {
            device: Some(device.clone()),
            handle,
            format,
            extent,
            samples: vk::SampleCountFlags::TYPE_1,
            mip_levels: 1,
            array_layers: 1,
            owned: false,
        }
    }

    pub fn handle(&self) -> vk::Image {
        self.handle
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn samples(&self) -> vk::SampleCountFlags {
        self.samples
    }

    pub fn array_layers(&self) -> u32 {
        self.array_layers
    }

    /// Aspect implied by the image format.
    pub fn aspect(&self) -> vk::ImageAspectFlags {
        format_aspect(self.format)
    }

    /// Range covering every mip level and layer.
    pub fn full_range(&self) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange::default()
            .aspect_mask(self.aspect())
            .base_mip_level(0)
            .level_count(self.mip_levels)
            .base_array_layer(0)
            .layer_count(self.array_layers)
    }

    /// Create a view over `layer_count` layers starting at `base_layer`.
    ///
    /// The view keeps the image alive, so the image is always destroyed
    /// after its last view.
    pub fn create_view(
        self: &Arc<Self>,
        view_type: vk::ImageViewType,
        base_layer: u32,
        layer_count: u32,
    ) -> Result<ImageView> {
        let device = self
            .device
            .as_ref()
            .ok_or_else(|| GpuError::InvalidState("Image was never created".to_string()))?;
        let range = vk::ImageSubresourceRange::default()
            .aspect_mask(self.aspect())
            .base_mip_level(0)
            .level_count(self.mip_levels)
            .base_array_layer(base_layer)
            .layer_count(layer_count);
        let handle = device.create_image_view(&ImageViewDesc {
            image: self.handle,
            view_type,
            format: self.format,
            range,
        })?;
        Ok(ImageView {
            device: Some(device.clone()),
            handle,
            image: Some(Arc::clone(self)),
        })
    }

    /// View of the whole image as a single 2D surface.
    pub fn create_default_view(self: &Arc<Self>) -> Result<ImageView> {
        self.create_view(vk::ImageViewType::TYPE_2D, 0, 1)
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        if let Some(device) = self.device.take() {
            if self.owned && self.handle != vk::Image::null() {
                device.destroy_image(self.handle);
            }
        }
    }
}

/// Aspect flags for a format.
pub fn format_aspect(format: vk::Format) -> vk::ImageAspectFlags {
    match format {
        vk::Format::D16_UNORM | vk::Format::D32_SFLOAT | vk::Format::X8_D24_UNORM_PACK32 => {
            vk::ImageAspectFlags::DEPTH
        }
        vk::Format::D24_UNORM_S8_UINT | vk::Format::D32_SFLOAT_S8_UINT => {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        }
        _ => vk::ImageAspectFlags::COLOR,
    }
}

/// A view over an [`Image`].
#[derive(Default)]
pub struct ImageView {
    device: Option<SharedDevice>,
    handle: vk::ImageView,
    // Dropped after the view handle is destroyed.
    image: Option<Arc<Image>>,
}

impl ImageView {
    pub fn handle(&self) -> vk::ImageView {
        self.handle
    }

    /// The viewed image.
    pub fn image(&self) -> Option<&Arc<Image>> {
        self.image.as_ref()
    }
}

impl Drop for ImageView {
    fn drop(&mut self) {
        if let Some(device) = self.device.take() {
            if self.handle != vk::ImageView::null() {
                device.destroy_image_view(self.handle);
            }
        }
    }
}

/// A texture sampler.
#[derive(Default)]
pub struct Sampler {
    device: Option<SharedDevice>,
    handle: vk::Sampler,
}

impl Sampler {
    pub fn create(device: &SharedDevice, desc: &SamplerDesc) -> Result<Self> {
        let handle = device.create_sampler(desc)?;
        Ok(Self {
            device: Some(device.clone()),
            handle,
        })
    }

    pub fn handle(&self) -> vk::Sampler {
        self.handle
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        if let Some(device) = self.device.take() {
            if self.handle != vk::Sampler::null() {
                device.destroy_sampler(self.handle);
            }
        }
    }
}

/// A GPU-GPU synchronization primitive.
#[derive(Default)]
pub struct Semaphore {
    device: Option<SharedDevice>,
    handle: vk::Semaphore,
}

impl Semaphore {
    pub fn create(device: &SharedDevice) -> Result<Self> {
        let handle = device.create_semaphore()?;
        Ok(Self {
            device: Some(device.clone()),
            handle,
        })
    }

    pub fn handle(&self) -> vk::Semaphore {
        self.handle
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        if let Some(device) = self.device.take() {
            if self.handle != vk::Semaphore::null() {
                device.destroy_semaphore(self.handle);
            }
        }
    }
}

/// A GPU-CPU synchronization primitive.
#[derive(Default)]
pub struct Fence {
    device: Option<SharedDevice>,
    handle: vk::Fence,
}

impl Fence {
    pub fn create(device: &SharedDevice, signaled: bool) -> Result<Self> {
        let handle = device.create_fence(signaled)?;
        Ok(Self {
            device: Some(device.clone()),
            handle,
        })
    }

    pub fn handle(&self) -> vk::Fence {
        self.handle
    }

    /// Block until the fence is signaled.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn wait(&self) -> Result<()> {
        match &self.device {
            Some(device) => device.wait_for_fence(self.handle, u64::MAX),
            None => Ok(()),
        }
    }

    /// Return the fence to the unsignaled state.
    pub fn reset(&self) -> Result<()> {
        match &self.device {
            Some(device) => device.reset_fence(self.handle),
            None => Ok(()),
        }
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        if let Some(device) = self.device.take() {
            if self.handle != vk::Fence::null() {
                device.destroy_fence(self.handle);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::HeadlessDevice;

    fn device() -> (Arc<HeadlessDevice>, SharedDevice) {
        let headless = Arc::new(HeadlessDevice::default());
        let shared: SharedDevice = headless.clone();
        (headless, shared)
    }

    fn color_image(device: &SharedDevice) -> Arc<Image> {
        Arc::new(
            Image::create(
                device,
                &ImageDesc::new_2d(
                    "color",
                    vk::Extent2D {
                        width: 4,
                        height: 4,
                    },
                    vk::Format::R8G8B8A8_UNORM,
                    vk::ImageUsageFlags::SAMPLED,
                ),
            )
            .unwrap(),
        )
    }

    #[test]
    fn default_resources_drop_without_device() {
        drop(Buffer::default());
        drop(Image::default());
        drop(ImageView::default());
        drop(Sampler::default());
        drop(Semaphore::default());
        drop(Fence::default());
    }

    #[test]
    fn drop_releases_handle_once() {
        let (headless, device) = device();
        let buffer = Buffer::create(
            &device,
            &BufferDesc {
                name: "uniforms",
                size: 16,
                usage: vk::BufferUsageFlags::UNIFORM_BUFFER,
                location: MemoryLocation::CpuToGpu,
            },
        )
        .unwrap();
        assert_eq!(headless.live_objects("buffer"), 1);
        let moved = buffer;
        drop(moved);
        assert_eq!(headless.live_objects("buffer"), 0);
    }

    #[test]
    fn write_copies_exact_bytes() {
        let (headless, device) = device();
        let buffer = Buffer::create(
            &device,
            &BufferDesc {
                name: "uniforms",
                size: 8,
                usage: vk::BufferUsageFlags::UNIFORM_BUFFER,
                location: MemoryLocation::CpuToGpu,
            },
        )
        .unwrap();
        buffer.write(&[0xAAu8, 0xBB]).unwrap();
        assert_eq!(
            headless.buffer_contents(buffer.handle()).unwrap(),
            vec![0xAA, 0xBB, 0, 0, 0, 0, 0, 0]
        );
        assert!(buffer.write(&[0u32; 3]).is_err());
    }

    #[test]
    fn write_requires_host_visible_memory() {
        let (_headless, device) = device();
        let buffer = Buffer::create(
            &device,
            &BufferDesc {
                name: "vertices",
                size: 8,
                usage: vk::BufferUsageFlags::VERTEX_BUFFER,
                location: MemoryLocation::GpuOnly,
            },
        )
        .unwrap();
        assert!(matches!(
            buffer.write(&[1u8]),
            Err(GpuError::InvalidState(_))
        ));
    }

    #[test]
    fn views_are_destroyed_before_their_image() {
        let (headless, device) = device();
        let image = color_image(&device);
        let view = image.create_default_view().unwrap();
        // Last external reference goes first; the view still holds the image.
        drop(image);
        assert_eq!(headless.live_objects("image"), 1);
        drop(view);
        assert_eq!(headless.live_objects("image"), 0);
        assert_eq!(headless.live_objects("image_view"), 0);
    }

    #[test]
    fn swapchain_images_are_not_destroyed() {
        let (headless, device) = device();
        let image = color_image(&device);
        let borrowed = Image::from_swapchain(
            &device,
            image.handle(),
            image.format(),
            image.extent(),
        );
        drop(borrowed);
        assert_eq!(headless.live_objects("image"), 1);
    }
}
