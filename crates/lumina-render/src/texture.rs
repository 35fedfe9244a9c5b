//! Sampled textures.

use ash::vk;
use gpu_allocator::MemoryLocation;
use lumina_gpu::{
    Buffer, BufferDesc, CommandPool, Image, ImageDesc, ImageView, ResourceCache, Sampler,
    SamplerDesc, SharedDevice, SingleTimeCommands,
};
use std::path::Path;
use std::sync::Arc;

use crate::error::{RenderError, Result};

/// Bytes per texel of formats textures can be uploaded in.
pub fn texel_size(format: vk::Format) -> Option<usize> {
    match format {
        vk::Format::R8_UNORM => Some(1),
        vk::Format::R8G8B8A8_UNORM
        | vk::Format::R8G8B8A8_SRGB
        | vk::Format::B8G8R8A8_UNORM
        | vk::Format::B8G8R8A8_SRGB
        | vk::Format::A2B10G10R10_UNORM_PACK32 => Some(4),
        vk::Format::R16G16B16A16_SFLOAT => Some(8),
        vk::Format::R32G32B32A32_SFLOAT => Some(16),
        _ => None,
    }
}

/// Decoded pixels ready for upload.
#[derive(Debug, Clone)]
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    pub format: vk::Format,
    pub pixels: Vec<u8>,
}

impl TextureData {
    /// Tightly packed sRGB RGBA8 pixels.
    pub fn rgba8(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        Self {
            width,
            height,
            format: vk::Format::R8G8B8A8_SRGB,
            pixels,
        }
    }

    /// 1x1 texture of a single color.
    pub fn solid(color: [u8; 4]) -> Self {
        Self::rgba8(1, 1, color.to_vec())
    }

    /// Decode an image file into RGBA8.
    pub fn from_file(path: &Path) -> Result<Self> {
        let image = image::open(path).map_err(|e| RenderError::InvalidAsset {
            name: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let rgba = image.to_rgba8();
        let (width, height) = rgba.dimensions();
        Ok(Self::rgba8(width, height, rgba.into_raw()))
    }

    fn validate(&self, name: &str) -> Result<()> {
        let invalid = |reason: String| RenderError::InvalidAsset {
            name: name.to_string(),
            reason,
        };
        if self.width == 0 || self.height == 0 {
            return Err(invalid("texture has zero extent".to_string()));
        }
        let texel = texel_size(self.format)
            .ok_or_else(|| invalid(format!("unsupported format {:?}", self.format)))?;
        let expected = self.width as usize * self.height as usize * texel;
        if self.pixels.len() != expected {
            return Err(invalid(format!(
                "{} bytes of pixels for {}x{} {:?} (expected {expected})",
                self.pixels.len(),
                self.width,
                self.height,
                self.format
            )));
        }
        Ok(())
    }
}

/// An uploaded texture with its view and sampler.
pub struct Texture {
    name: String,
    view: ImageView,
    sampler: Sampler,
}

impl Texture {
    /// Upload pixels through a staging buffer and leave the image in
    /// `SHADER_READ_ONLY_OPTIMAL`.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn upload(
        device: &SharedDevice,
        pool: &CommandPool,
        name: &str,
        data: &TextureData,
    ) -> Result<Self> {
        data.validate(name)?;
        let extent = vk::Extent2D {
            width: data.width,
            height: data.height,
        };
        let image = Arc::new(Image::create(
            device,
            &ImageDesc::new_2d(
                name,
                extent,
                data.format,
                vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
            ),
        )?);

        let staging = Buffer::create(
            device,
            &BufferDesc {
                name: "texture_staging",
                size: data.pixels.len() as u64,
                usage: vk::BufferUsageFlags::TRANSFER_SRC,
                location: MemoryLocation::CpuToGpu,
            },
        )?;
        staging.write_bytes(0, &data.pixels)?;

        let mut cmd = SingleTimeCommands::begin(pool)?;
        cmd.transition_image_layout(
            image.handle(),
            data.format,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            1,
        );
        cmd.copy_buffer_to_image(staging.handle(), image.handle(), data.format, extent, 1);
        cmd.transition_image_layout(
            image.handle(),
            data.format,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            1,
        );
        cmd.finish()?;

        let anisotropy = device.limits().max_sampler_anisotropy;
        let sampler = Sampler::create(
            device,
            &SamplerDesc {
                anisotropy: (anisotropy > 1.0).then_some(anisotropy),
                ..Default::default()
            },
        )?;
        tracing::debug!("Uploaded texture '{name}' {}x{}", data.width, data.height);
        Ok(Self {
            name: name.to_string(),
            view: image.create_default_view()?,
            sampler,
        })
    }

    /// Load an image file through `cache`, uploading it on a miss.
    pub fn load(
        cache: &ResourceCache<Self>,
        device: &SharedDevice,
        pool: &CommandPool,
        path: &Path,
    ) -> Result<Arc<Self>> {
        let key = path.to_string_lossy();
        cache.get_or_try_insert(&key, || {
            let data = TextureData::from_file(path)?;
            Self::upload(device, pool, &key, &data)
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn view(&self) -> &ImageView {
        &self.view
    }

    pub fn sampler(&self) -> &Sampler {
        &self.sampler
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.view
            .image()
            .map_or_else(vk::Extent2D::default, |image| image.extent())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::headless;
    use lumina_gpu::headless::Call;
    use lumina_gpu::QueueKind;

    #[test]
    fn upload_transitions_and_copies() {
        let (headless, device) = headless();
        let pool = CommandPool::transient(&device, QueueKind::Graphics).unwrap();
        let texture = Texture::upload(
            &device,
            &pool,
            "checker",
            &TextureData::rgba8(2, 2, vec![255; 16]),
        )
        .unwrap();
        assert_eq!(texture.extent().width, 2);
        assert_eq!(
            headless.count_calls(|c| matches!(c, Call::CopyBufferToImage { .. })),
            1
        );
        let layouts: Vec<vk::ImageLayout> = headless
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::ImageBarrier { barrier, .. } => Some(barrier.new_layout),
                _ => None,
            })
            .collect();
        assert_eq!(
            layouts,
            vec![
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
            ]
        );
        // Staging buffer is gone
        assert_eq!(headless.live_objects("buffer"), 0);
    }

    #[test]
    fn mismatched_pixel_count_is_rejected() {
        let (_headless, device) = headless();
        let pool = CommandPool::transient(&device, QueueKind::Graphics).unwrap();
        let result = Texture::upload(
            &device,
            &pool,
            "broken",
            &TextureData::rgba8(4, 4, vec![0; 15]),
        );
        assert!(matches!(result, Err(RenderError::InvalidAsset { .. })));
    }

    #[test]
    fn cached_texture_is_uploaded_once() {
        let (headless, device) = headless();
        let pool = CommandPool::transient(&device, QueueKind::Graphics).unwrap();
        let path = std::env::temp_dir().join(format!("lumina-texture-{}.png", std::process::id()));
        image::RgbaImage::from_pixel(2, 2, image::Rgba([10, 20, 30, 255]))
            .save(&path)
            .unwrap();

        let cache = ResourceCache::new();
        let a = Texture::load(&cache, &device, &pool, &path).unwrap();
        let b = Texture::load(&cache, &device, &pool, &path).unwrap();
        std::fs::remove_file(&path).ok();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(
            headless.count_calls(|c| matches!(c, Call::CopyBufferToImage { .. })),
            1
        );
    }
}
