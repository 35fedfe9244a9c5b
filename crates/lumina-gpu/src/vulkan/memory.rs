//! GPU memory management.

use crate::device::{BufferDesc, ImageDesc};
use crate::error::{GpuError, Result};
use ash::vk;
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};
use hashbrown::HashMap;
use std::sync::Arc;

/// GPU memory allocator wrapper.
///
/// Owns the allocation behind every buffer and image the device creates,
/// keyed by handle.
pub struct GpuAllocator {
    allocator: Option<Allocator>,
    device: Arc<ash::Device>,
    buffers: HashMap<vk::Buffer, Allocation>,
    images: HashMap<vk::Image, Allocation>,
    // Distinct queue families resources are shared between
    queue_families: Vec<u32>,
}

impl GpuAllocator {
    /// Create a new allocator.
    ///
    /// # Safety
    /// The instance, device, and physical device must be valid.
    pub unsafe fn new(
        instance: &ash::Instance,
        device: Arc<ash::Device>,
        physical_device: vk::PhysicalDevice,
        queue_families: &[u32],
    ) -> Result<Self> {
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: (*device).clone(),
            physical_device,
            debug_settings: gpu_allocator::AllocatorDebugSettings {
                log_memory_information: cfg!(debug_assertions),
                log_leaks_on_shutdown: true,
                store_stack_traces: false,
                log_allocations: false,
                log_frees: false,
                log_stack_traces: false,
            },
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })
        .map_err(|e| GpuError::AllocationFailed(e.to_string()))?;

        Ok(Self {
            allocator: Some(allocator),
            device,
            buffers: HashMap::new(),
            images: HashMap::new(),
            queue_families: queue_families.to_vec(),
        })
    }

    fn allocator(&mut self) -> Result<&mut Allocator> {
        self.allocator
            .as_mut()
            .ok_or_else(|| GpuError::InvalidState("Allocator not initialized".to_string()))
    }

    fn sharing_mode(&self) -> vk::SharingMode {
        if self.queue_families.len() > 1 {
            vk::SharingMode::CONCURRENT
        } else {
            vk::SharingMode::EXCLUSIVE
        }
    }

    /// Allocate a buffer.
    ///
    /// Buffers are shared concurrently between all queue families in use, so
    /// compute and transfer work never needs ownership transfers.
    pub fn create_buffer(&mut self, desc: &BufferDesc<'_>) -> Result<vk::Buffer> {
        let buffer_info = vk::BufferCreateInfo::default()
            .size(desc.size)
            .usage(desc.usage)
            .sharing_mode(self.sharing_mode())
            .queue_family_indices(&self.queue_families);

        let buffer = unsafe {
            self.device
                .create_buffer(&buffer_info, None)
                .map_err(GpuError::from)?
        };

        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };

        let allocation = match self.allocator()?.allocate(&AllocationCreateDesc {
            name: desc.name,
            requirements,
            location: desc.location,
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        }) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.device.destroy_buffer(buffer, None) };
                return Err(GpuError::AllocationFailed(e.to_string()));
            }
        };

        unsafe {
            self.device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
                .map_err(GpuError::from)?;
        }

        self.buffers.insert(buffer, allocation);
        Ok(buffer)
    }

    /// Free a buffer and its allocation.
    pub fn destroy_buffer(&mut self, buffer: vk::Buffer) -> Result<()> {
        if let Some(allocation) = self.buffers.remove(&buffer) {
            self.allocator()?
                .free(allocation)
                .map_err(|e| GpuError::AllocationFailed(e.to_string()))?;
        }

        unsafe {
            self.device.destroy_buffer(buffer, None);
        }

        Ok(())
    }

    /// Write raw bytes to the buffer at the given offset (must be host-visible).
    pub fn write_buffer(&mut self, buffer: vk::Buffer, offset: u64, data: &[u8]) -> Result<()> {
        let allocation = self
            .buffers
            .get_mut(&buffer)
            .ok_or_else(|| GpuError::ResourceNotFound(format!("{buffer:?}")))?;
        let mapped = allocation
            .mapped_slice_mut()
            .ok_or_else(|| GpuError::InvalidState("Buffer not mapped".to_string()))?;

        let start = offset as usize;
        let end = start
            .checked_add(data.len())
            .ok_or_else(|| GpuError::InvalidState("Offset overflow".to_string()))?;
        let target = mapped.get_mut(start..end).ok_or_else(|| {
            GpuError::InvalidState("Data range too large for buffer".to_string())
        })?;
        target.copy_from_slice(data);

        Ok(())
    }

    /// Read raw bytes from a host-visible buffer.
    pub fn read_buffer(&self, buffer: vk::Buffer, offset: u64, len: usize) -> Result<Vec<u8>> {
        let allocation = self
            .buffers
            .get(&buffer)
            .ok_or_else(|| GpuError::ResourceNotFound(format!("{buffer:?}")))?;
        let mapped = allocation
            .mapped_slice()
            .ok_or_else(|| GpuError::InvalidState("Buffer not mapped".to_string()))?;
        let start = offset as usize;
        mapped
            .get(start..start + len)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| GpuError::InvalidState("Read past end of buffer".to_string()))
    }

    /// Allocate a device-local 2D image.
    pub fn create_image(&mut self, desc: &ImageDesc<'_>) -> Result<vk::Image> {
        let create_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(desc.format)
            .extent(vk::Extent3D {
                width: desc.extent.width,
                height: desc.extent.height,
                depth: 1,
            })
            .mip_levels(desc.mip_levels)
            .array_layers(desc.array_layers)
            .samples(desc.samples)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(desc.usage)
            .sharing_mode(self.sharing_mode())
            .queue_family_indices(&self.queue_families)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .flags(desc.flags);

        let image = unsafe {
            self.device
                .create_image(&create_info, None)
                .map_err(GpuError::from)?
        };

        let requirements = unsafe { self.device.get_image_memory_requirements(image) };

        let allocation = match self.allocator()?.allocate(&AllocationCreateDesc {
            name: desc.name,
            requirements,
            location: gpu_allocator::MemoryLocation::GpuOnly,
            linear: false,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        }) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.device.destroy_image(image, None) };
                return Err(GpuError::AllocationFailed(e.to_string()));
            }
        };

        unsafe {
            self.device
                .bind_image_memory(image, allocation.memory(), allocation.offset())
                .map_err(GpuError::from)?;
        }

        self.images.insert(image, allocation);
        Ok(image)
    }

    /// Free an image and its allocation.
    pub fn destroy_image(&mut self, image: vk::Image) -> Result<()> {
        if let Some(allocation) = self.images.remove(&image) {
            self.allocator()?
                .free(allocation)
                .map_err(|e| GpuError::AllocationFailed(e.to_string()))?;
        }

        unsafe {
            self.device.destroy_image(image, None);
        }

        Ok(())
    }

    /// Shutdown the allocator, freeing all GPU memory.
    ///
    /// This must be called before the Vulkan device is destroyed.
    /// Any remaining allocations will be freed (and logged as leaks).
    pub fn shutdown(&mut self) {
        if !self.buffers.is_empty() || !self.images.is_empty() {
            tracing::warn!(
                "Shutting down allocator with {} buffers and {} images alive",
                self.buffers.len(),
                self.images.len()
            );
        }
        self.buffers.clear();
        self.images.clear();
        // Dropping the inner allocator calls vkFreeMemory
        if let Some(allocator) = self.allocator.take() {
            drop(allocator);
        }
    }
}

impl Drop for GpuAllocator {
    fn drop(&mut self) {
        // Shutdown if not already done
        self.shutdown();
    }
}
