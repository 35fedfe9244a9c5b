//! Surface and swapchain management.

use crate::device::{AcquireOutcome, PresentOutcome, SwapchainDesc, SwapchainInfo};
use crate::error::{GpuError, Result};
use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

/// Surface of the window the device presents to.
pub struct Presenter {
    /// The Vulkan surface handle.
    pub surface: vk::SurfaceKHR,
    /// Surface extension loader.
    pub surface_loader: ash::khr::surface::Instance,
    /// Swapchain extension loader.
    pub swapchain_loader: ash::khr::swapchain::Device,
}

impl Presenter {
    /// Create the surface of a window.
    ///
    /// # Safety
    /// The handles must stay valid for the life of the surface.
    pub unsafe fn create_surface(
        entry: &ash::Entry,
        instance: &ash::Instance,
        display: RawDisplayHandle,
        window: RawWindowHandle,
    ) -> Result<vk::SurfaceKHR> {
        ash_window::create_surface(entry, instance, display, window, None)
            .map_err(|e| GpuError::SurfaceCreation(e.to_string()))
    }

    /// Wrap a surface together with the loaders needed to present to it.
    ///
    /// # Safety
    /// The surface must have been created from `instance`.
    pub unsafe fn new(
        entry: &ash::Entry,
        instance: &ash::Instance,
        device: &ash::Device,
        surface: vk::SurfaceKHR,
    ) -> Self {
        Self {
            surface,
            surface_loader: ash::khr::surface::Instance::new(entry, instance),
            swapchain_loader: ash::khr::swapchain::Device::new(instance, device),
        }
    }

    /// Create a swapchain for this surface.
    ///
    /// # Safety
    /// The physical device must be the one the logical device was created from.
    pub unsafe fn create_swapchain(
        &self,
        physical_device: vk::PhysicalDevice,
        graphics_queue_family: u32,
        desc: &SwapchainDesc,
    ) -> Result<SwapchainInfo> {
        let caps = self
            .surface_loader
            .get_physical_device_surface_capabilities(physical_device, self.surface)?;
        let formats = self
            .surface_loader
            .get_physical_device_surface_formats(physical_device, self.surface)?;
        let present_modes = self
            .surface_loader
            .get_physical_device_surface_present_modes(physical_device, self.surface)?;

        let surface_format = select_surface_format(&formats, desc.hdr)?;
        let present_mode = select_present_mode(&present_modes, desc.vsync);
        let extent = calculate_extent(&caps, desc.width, desc.height);
        if extent.width == 0 || extent.height == 0 {
            return Err(GpuError::SwapchainCreation(
                "Surface has zero extent".to_string(),
            ));
        }

        // Determine image count
        let mut image_count = caps.min_image_count + 1;
        if caps.max_image_count > 0 && image_count > caps.max_image_count {
            image_count = caps.max_image_count;
        }

        let queue_families = [graphics_queue_family];
        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(self.surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .queue_family_indices(&queue_families)
            .pre_transform(caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(desc.old);

        let handle = self
            .swapchain_loader
            .create_swapchain(&create_info, None)
            .map_err(|e| GpuError::SwapchainCreation(e.to_string()))?;

        let images = self.swapchain_loader.get_swapchain_images(handle)?;

        tracing::info!(
            "Created swapchain {}x{} {:?} ({:?}, {} images)",
            extent.width,
            extent.height,
            surface_format.format,
            present_mode,
            images.len()
        );

        Ok(SwapchainInfo {
            handle,
            images,
            format: surface_format.format,
            color_space: surface_format.color_space,
            extent,
        })
    }

    /// Acquire the next image.
    ///
    /// # Safety
    /// The swapchain must have been created from this presenter.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub unsafe fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        semaphore: vk::Semaphore,
    ) -> Result<AcquireOutcome> {
        let result = self.swapchain_loader.acquire_next_image(
            swapchain,
            u64::MAX,
            semaphore,
            vk::Fence::null(),
        );

        match result {
            Ok((index, suboptimal)) => Ok(AcquireOutcome::Acquired { index, suboptimal }),
            // OUT_OF_DATE means no image was acquired; caller must recreate the swapchain.
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(e) => Err(GpuError::from(e)),
        }
    }

    /// Present an image.
    ///
    /// # Safety
    /// The queue must support presentation to this surface.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub unsafe fn present(
        &self,
        queue: vk::Queue,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<PresentOutcome> {
        let swapchains = [swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        match self.swapchain_loader.queue_present(queue, &present_info) {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) => Ok(PresentOutcome::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
            Err(e) => Err(GpuError::from(e)),
        }
    }

    /// Destroy the surface.
    ///
    /// # Safety
    /// No swapchain of this surface may be alive.
    pub unsafe fn destroy(&self) {
        self.surface_loader.destroy_surface(self.surface, None);
    }
}

/// Select the best surface format.
pub fn select_surface_format(
    available: &[vk::SurfaceFormatKHR],
    hdr: bool,
) -> Result<vk::SurfaceFormatKHR> {
    if hdr {
        let preferred = [
            (
                vk::Format::A2B10G10R10_UNORM_PACK32,
                vk::ColorSpaceKHR::HDR10_ST2084_EXT,
            ),
            (
                vk::Format::R16G16B16A16_SFLOAT,
                vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT,
            ),
        ];
        for (format, color_space) in preferred {
            if let Some(found) = available
                .iter()
                .find(|f| f.format == format && f.color_space == color_space)
            {
                return Ok(*found);
            }
        }
        tracing::warn!("HDR requested but the surface offers no HDR format");
    }

    // Prefer SRGB
    for format in available {
        if format.format == vk::Format::B8G8R8A8_SRGB
            && format.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        {
            return Ok(*format);
        }
    }

    // Fall back to first available
    available
        .first()
        .copied()
        .ok_or_else(|| GpuError::SwapchainCreation("Surface reports no formats".to_string()))
}

/// Select the best present mode.
pub fn select_present_mode(available: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    if vsync {
        // Prefer FIFO (vsync)
        vk::PresentModeKHR::FIFO
    } else {
        // Prefer mailbox (triple buffering without vsync)
        for &mode in available {
            if mode == vk::PresentModeKHR::MAILBOX {
                return mode;
            }
        }
        // Fall back to immediate
        for &mode in available {
            if mode == vk::PresentModeKHR::IMMEDIATE {
                return mode;
            }
        }
        // Fall back to FIFO (always supported)
        vk::PresentModeKHR::FIFO
    }
}

/// Calculate swapchain extent.
pub fn calculate_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    desired_width: u32,
    desired_height: u32,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        vk::Extent2D {
            width: desired_width.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            ),
            height: desired_height.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    #[test]
    fn prefers_srgb_without_hdr() {
        let available = [
            format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(
                vk::Format::A2B10G10R10_UNORM_PACK32,
                vk::ColorSpaceKHR::HDR10_ST2084_EXT,
            ),
        ];
        assert_eq!(
            select_surface_format(&available, false).unwrap().format,
            vk::Format::B8G8R8A8_SRGB
        );
        assert_eq!(
            select_surface_format(&available, true).unwrap().format,
            vk::Format::A2B10G10R10_UNORM_PACK32
        );
    }

    #[test]
    fn empty_format_list_is_an_error() {
        assert!(select_surface_format(&[], false).is_err());
    }

    #[test]
    fn present_mode_falls_back_to_fifo() {
        assert_eq!(
            select_present_mode(&[vk::PresentModeKHR::MAILBOX], true),
            vk::PresentModeKHR::FIFO
        );
        assert_eq!(
            select_present_mode(&[vk::PresentModeKHR::IMMEDIATE], false),
            vk::PresentModeKHR::IMMEDIATE
        );
        assert_eq!(select_present_mode(&[], false), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn extent_is_clamped_when_surface_leaves_it_open() {
        let caps = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 1920,
                height: 1080,
            },
            ..Default::default()
        };
        assert_eq!(
            calculate_extent(&caps, 4000, 600),
            vk::Extent2D {
                width: 1920,
                height: 600
            }
        );
    }
}
