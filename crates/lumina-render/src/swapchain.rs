//! Swapchain wrapper.

use ash::vk;
use lumina_gpu::{Image, SharedDevice, SwapchainDesc, SwapchainInfo};
use std::sync::Arc;

use crate::error::Result;

/// A swapchain and its images.
///
/// Views of the images must be dropped before the swapchain.
pub struct Swapchain {
    device: SharedDevice,
    info: SwapchainInfo,
    images: Vec<Arc<Image>>,
}

impl Swapchain {
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn new(device: &SharedDevice, desc: &SwapchainDesc) -> Result<Self> {
        let info = device.create_swapchain(desc)?;
        let images = info
            .images
            .iter()
            .map(|&handle| {
                Arc::new(Image::from_swapchain(
                    device,
                    handle,
                    info.format,
                    info.extent,
                ))
            })
            .collect();
        tracing::info!(
            "Created swapchain {}x{} ({:?}, {} images)",
            info.extent.width,
            info.extent.height,
            info.format,
            info.images.len()
        );
        Ok(Self {
            device: device.clone(),
            info,
            images,
        })
    }

    pub fn handle(&self) -> vk::SwapchainKHR {
        self.info.handle
    }

    pub fn format(&self) -> vk::Format {
        self.info.format
    }

    pub fn color_space(&self) -> vk::ColorSpaceKHR {
        self.info.color_space
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.info.extent
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn images(&self) -> &[Arc<Image>] {
        &self.images
    }

    pub fn image(&self, index: u32) -> Option<&Arc<Image>> {
        self.images.get(index as usize)
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        self.images.clear();
        self.device.destroy_swapchain(self.info.handle);
    }
}
