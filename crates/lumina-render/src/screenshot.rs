//! Screenshot capture utilities.
//!
//! The renderer copies the finished frame into a host-visible buffer and,
//! once the frame's fence has signaled, converts the pixels here and writes
//! them with the `image` crate.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use ash::vk;
use image::{ImageBuffer, Rgba};
use thiserror::Error;
use tracing::info;

use crate::error::RenderError;

/// Screenshot capture configuration.
///
/// Defines which frames to capture and where to save them.
#[derive(Clone, Default)]
pub struct ScreenshotConfig {
    /// Whether screenshot capture is enabled.
    pub enabled: bool,
    /// Output path pattern (use `{}` for frame number placeholder).
    pub output_pattern: String,
    /// Frame indices to capture.
    pub frames: HashSet<u64>,
    /// Exit after capturing all specified frames.
    pub exit_after_capture: bool,
}

impl ScreenshotConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable screenshot capture with the given output pattern.
    pub fn with_output(mut self, pattern: impl Into<String>) -> Self {
        self.enabled = true;
        self.output_pattern = pattern.into();
        self
    }

    /// Add frames to capture.
    pub fn with_frames(mut self, frames: impl IntoIterator<Item = u64>) -> Self {
        self.enabled = true;
        self.frames.extend(frames);
        self
    }

    pub fn with_exit_after(mut self, exit: bool) -> Self {
        self.exit_after_capture = exit;
        self
    }

    pub fn output_path(&self, frame: u64) -> PathBuf {
        PathBuf::from(self.output_pattern.replace("{}", &frame.to_string()))
    }

    pub fn should_capture(&self, frame: u64) -> bool {
        self.enabled && self.frames.contains(&frame)
    }

    /// Whether every requested frame is behind `current_frame`.
    pub fn all_captured(&self, current_frame: u64) -> bool {
        self.enabled
            && self
                .frames
                .iter()
                .max()
                .is_some_and(|&last| current_frame > last)
    }

    /// Parse from the process arguments.
    ///
    /// Recognizes the following flags:
    /// - `-S` or `--screenshot`: Enable screenshot capture
    /// - `-o` or `--output <PATTERN>`: Output path pattern (use `{}` for frame number)
    /// - `-f` or `--frames <FRAMES>`: Frame indices to capture (e.g., "0,5,10-15")
    /// - `--exit-after`: Exit after capturing all specified frames
    pub fn from_args() -> Self {
        let args: Vec<String> = std::env::args().collect();
        Self::parse_args(&args)
    }

    /// Parse from a slice of arguments, the first being the program name.
    pub fn parse_args(args: &[String]) -> Self {
        let mut config = Self::default();
        let mut args = args.iter().skip(1);
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-S" | "--screenshot" => config.enabled = true,
                "-o" | "--output" => {
                    if let Some(pattern) = args.next() {
                        config.output_pattern.clone_from(pattern);
                    }
                }
                "-f" | "--frames" => {
                    if let Some(frames) = args.next() {
                        config.frames = parse_frame_indices(frames);
                    }
                }
                "--exit-after" => config.exit_after_capture = true,
                _ => {}
            }
        }

        if config.enabled {
            if config.output_pattern.is_empty() {
                config.output_pattern = "screenshot_{}.png".to_string();
            }
            if config.frames.is_empty() {
                config.frames.insert(0);
            }
        }
        config
    }
}

/// Parse frame indices from a string like "0,5,10-15,20".
pub fn parse_frame_indices(s: &str) -> HashSet<u64> {
    let mut frames = HashSet::new();
    for part in s.split(',').map(str::trim) {
        if let Some((start, end)) = part.split_once('-') {
            if let (Ok(start), Ok(end)) = (start.parse::<u64>(), end.parse::<u64>()) {
                frames.extend(start..=end);
            }
        } else if let Ok(frame) = part.parse::<u64>() {
            frames.insert(frame);
        }
    }
    frames
}

/// Errors that can occur during screenshot capture.
#[derive(Debug, Error)]
pub enum ScreenshotError {
    #[error("Failed to read screenshot data: {0}")]
    ReadbackFailed(String),
    #[error("Invalid image data")]
    InvalidImageData,
    #[error("Cannot convert {0:?} pixels to RGBA8")]
    UnsupportedFormat(vk::Format),
    #[error("Failed to save screenshot: {0}")]
    SaveFailed(String),
}

impl From<ScreenshotError> for RenderError {
    fn from(error: ScreenshotError) -> Self {
        Self::Screenshot(error.to_string())
    }
}

/// Convert tightly packed pixels of a swapchain-compatible format to RGBA8.
pub fn to_rgba8(format: vk::Format, mut data: Vec<u8>) -> Result<Vec<u8>, ScreenshotError> {
    match format {
        vk::Format::R8G8B8A8_UNORM | vk::Format::R8G8B8A8_SRGB => Ok(data),
        vk::Format::B8G8R8A8_UNORM | vk::Format::B8G8R8A8_SRGB => {
            for pixel in data.chunks_exact_mut(4) {
                pixel.swap(0, 2);
            }
            Ok(data)
        }
        vk::Format::A2B10G10R10_UNORM_PACK32 => Ok(data
            .chunks_exact(4)
            .flat_map(|texel| {
                let packed = u32::from_le_bytes([texel[0], texel[1], texel[2], texel[3]]);
                let to8 = |shift: u32| (((packed >> shift) & 0x3ff) >> 2) as u8;
                [to8(0), to8(10), to8(20), ((packed >> 30) * 85) as u8]
            })
            .collect()),
        other => Err(ScreenshotError::UnsupportedFormat(other)),
    }
}

/// Convert pixel data in `format` and save it (format picked by extension).
pub fn save_screenshot(
    data: Vec<u8>,
    format: vk::Format,
    width: u32,
    height: u32,
    path: impl AsRef<Path>,
) -> Result<(), ScreenshotError> {
    let path = path.as_ref();
    let rgba = to_rgba8(format, data)?;
    let image = ImageBuffer::<Rgba<u8>, _>::from_raw(width, height, rgba)
        .ok_or(ScreenshotError::InvalidImageData)?;
    image
        .save(path)
        .map_err(|e| ScreenshotError::SaveFailed(e.to_string()))?;
    info!("Screenshot saved: {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("viewer")
            .chain(list.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn parse_mixed() {
        let frames = parse_frame_indices("0,5-7, 10");
        assert_eq!(frames, HashSet::from([0, 5, 6, 7, 10]));
    }

    #[test]
    fn parse_args_applies_defaults() {
        let config = ScreenshotConfig::parse_args(&args(&["--screenshot"]));
        assert!(config.should_capture(0));
        assert_eq!(config.output_path(0), PathBuf::from("screenshot_0.png"));

        let config =
            ScreenshotConfig::parse_args(&args(&["-o", "shot_{}.png", "-f", "2-3", "--exit-after"]));
        assert!(!config.enabled);
        assert!(config.exit_after_capture);
        assert_eq!(config.frames, HashSet::from([2, 3]));
    }

    #[test]
    fn all_captured_after_last_frame() {
        let config = ScreenshotConfig::new().with_frames([1, 4]);
        assert!(!config.all_captured(4));
        assert!(config.all_captured(5));
        assert!(!ScreenshotConfig::new().all_captured(100));
    }

    #[test]
    fn bgra_is_swizzled() {
        let rgba = to_rgba8(vk::Format::B8G8R8A8_SRGB, vec![1, 2, 3, 4]).unwrap();
        assert_eq!(rgba, vec![3, 2, 1, 4]);
    }

    #[test]
    fn ten_bit_channels_are_narrowed() {
        let packed: u32 = 0x3ff | (0x200 << 10) | (3 << 30);
        let rgba = to_rgba8(
            vk::Format::A2B10G10R10_UNORM_PACK32,
            packed.to_le_bytes().to_vec(),
        )
        .unwrap();
        assert_eq!(rgba, vec![255, 128, 0, 255]);
    }

    #[test]
    fn float_formats_are_rejected() {
        assert!(matches!(
            to_rgba8(vk::Format::R16G16B16A16_SFLOAT, vec![0; 8]),
            Err(ScreenshotError::UnsupportedFormat(_))
        ));
    }
}
