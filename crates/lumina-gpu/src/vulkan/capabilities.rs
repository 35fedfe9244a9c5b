//! GPU capability detection.

use crate::device::DeviceLimits;
use crate::vulkan::instance::MIN_API_VERSION;
use ash::vk;
use std::collections::HashSet;
use std::ffi::CStr;

/// GPU vendor identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuVendor {
    Nvidia,
    Amd,
    Intel,
    Apple,
    Other(u32),
}

impl GpuVendor {
    /// Identify vendor from PCI vendor ID.
    pub fn from_vendor_id(id: u32) -> Self {
        match id {
            0x10DE => Self::Nvidia,
            0x1002 => Self::Amd,
            0x8086 => Self::Intel,
            0x106B => Self::Apple,
            other => Self::Other(other),
        }
    }
}

/// Detected GPU capabilities.
#[derive(Debug, Clone)]
pub struct GpuCapabilities {
    /// GPU vendor
    pub vendor: GpuVendor,
    /// Device name
    pub device_name: String,
    /// Vulkan API version
    pub api_version: u32,
    /// Driver version
    pub driver_version: u32,

    /// Partially bound, update-after-bind, variable-count sampled image arrays
    pub supports_descriptor_indexing: bool,
    /// Runs through the portability layer (MoltenVK)
    pub is_portability_subset: bool,

    /// Device-local memory in MB
    pub device_local_memory_mb: u64,

    /// Limits exposed to the rest of the engine
    pub limits: DeviceLimits,

    // Available extensions
    pub available_extensions: HashSet<String>,
}

impl GpuCapabilities {
    /// Query capabilities from a physical device.
    ///
    /// # Safety
    /// The instance and physical device must be valid.
    pub unsafe fn query(instance: &ash::Instance, physical_device: vk::PhysicalDevice) -> Self {
        // Get basic properties
        let properties = instance.get_physical_device_properties(physical_device);
        let memory_properties = instance.get_physical_device_memory_properties(physical_device);

        // Get available extensions
        let extensions = instance
            .enumerate_device_extension_properties(physical_device)
            .unwrap_or_default();

        let available_extensions: HashSet<String> = extensions
            .iter()
            .filter_map(|ext| {
                CStr::from_ptr(ext.extension_name.as_ptr())
                    .to_str()
                    .ok()
                    .map(String::from)
            })
            .collect();

        // Parse device info
        let vendor = GpuVendor::from_vendor_id(properties.vendor_id);
        let device_name = CStr::from_ptr(properties.device_name.as_ptr())
            .to_string_lossy()
            .into_owned();

        // Calculate device-local memory
        let device_local_memory_mb: u64 = memory_properties
            .memory_heaps
            .iter()
            .take(memory_properties.memory_heap_count as usize)
            .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
            .map(|heap| heap.size / (1024 * 1024))
            .sum();

        // Descriptor indexing features and update-after-bind limits (VK 1.2 core)
        let mut features_1_2 = vk::PhysicalDeviceVulkan12Features::default();
        let mut features2 = vk::PhysicalDeviceFeatures2::default().push_next(&mut features_1_2);
        instance.get_physical_device_features2(physical_device, &mut features2);

        let mut indexing_properties = vk::PhysicalDeviceDescriptorIndexingProperties::default();
        let mut properties2 =
            vk::PhysicalDeviceProperties2::default().push_next(&mut indexing_properties);
        instance.get_physical_device_properties2(physical_device, &mut properties2);

        let supports_descriptor_indexing = features_1_2.descriptor_binding_partially_bound
            == vk::TRUE
            && features_1_2.descriptor_binding_sampled_image_update_after_bind == vk::TRUE
            && features_1_2.descriptor_binding_variable_descriptor_count == vk::TRUE
            && features_1_2.runtime_descriptor_array == vk::TRUE
            && features_1_2.shader_sampled_image_array_non_uniform_indexing == vk::TRUE;

        let limits = &properties.limits;
        let device_limits = DeviceLimits {
            max_per_stage_descriptor_sampled_images: limits
                .max_per_stage_descriptor_sampled_images,
            max_update_after_bind_sampled_images: indexing_properties
                .max_descriptor_set_update_after_bind_sampled_images,
            framebuffer_color_sample_counts: limits.framebuffer_color_sample_counts,
            framebuffer_depth_sample_counts: limits.framebuffer_depth_sample_counts,
            max_push_constants_size: limits.max_push_constants_size,
            supports_descriptor_indexing,
            max_sampler_anisotropy: limits.max_sampler_anisotropy,
        };

        Self {
            vendor,
            device_name,
            api_version: properties.api_version,
            driver_version: properties.driver_version,
            supports_descriptor_indexing,
            is_portability_subset: available_extensions.contains("VK_KHR_portability_subset"),
            device_local_memory_mb,
            limits: device_limits,
            available_extensions,
        }
    }

    /// Check if the GPU meets minimum requirements for the engine.
    pub fn meets_requirements(&self) -> bool {
        self.api_version >= MIN_API_VERSION && self.available_extensions.contains("VK_KHR_swapchain")
    }

    /// Get a human-readable summary of capabilities.
    pub fn summary(&self) -> String {
        format!(
            "{} ({:?}) - Vulkan {}.{}.{} - {} MB VRAM",
            self.device_name,
            self.vendor,
            vk::api_version_major(self.api_version),
            vk::api_version_minor(self.api_version),
            vk::api_version_patch(self.api_version),
            self.device_local_memory_mb,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vendor_identification() {
        assert_eq!(GpuVendor::from_vendor_id(0x10DE), GpuVendor::Nvidia);
        assert_eq!(GpuVendor::from_vendor_id(0x1002), GpuVendor::Amd);
        assert_eq!(GpuVendor::from_vendor_id(0x106B), GpuVendor::Apple);
        assert_eq!(GpuVendor::from_vendor_id(0x1234), GpuVendor::Other(0x1234));
    }
}
