//! Screenshot capture utilities.
//!
//! Reading a texture back blocks on the device, so these helpers are for
//! tools and tests, never for the per-frame path.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use image::{ImageBuffer, Rgba};
use thiserror::Error;

use crate::error::RenderError;

/// Which frames to capture and where to write them.
#[derive(Debug, Clone, Default)]
pub struct ScreenshotConfig {
    /// Output path pattern; `{}` is replaced by the frame number.
    pub output_pattern: String,
    pub frames: BTreeSet<u64>,
}

impl ScreenshotConfig {
    pub fn new(output_pattern: impl Into<String>) -> Self {
        Self {
            output_pattern: output_pattern.into(),
            frames: BTreeSet::new(),
        }
    }

    #[must_use]
    pub fn with_frames(mut self, frames: impl IntoIterator<Item = u64>) -> Self {
        self.frames.extend(frames);
        self
    }

    pub fn output_path(&self, frame: u64) -> PathBuf {
        PathBuf::from(self.output_pattern.replace("{}", &frame.to_string()))
    }

    pub fn should_capture(&self, frame: u64) -> bool {
        self.frames.contains(&frame)
    }
}

/// Parse frame indices such as `"0,5,10-15"`. Malformed parts are skipped.
pub fn parse_frame_indices(s: &str) -> BTreeSet<u64> {
    let mut frames = BTreeSet::new();
    for part in s.split(',').map(str::trim) {
        if let Some((start, end)) = part.split_once('-') {
            if let (Ok(start), Ok(end)) = (start.trim().parse::<u64>(), end.trim().parse::<u64>()) {
                frames.extend(start..=end);
            }
        } else if let Ok(frame) = part.parse::<u64>() {
            frames.insert(frame);
        }
    }
    frames
}

/// Errors that can occur during screenshot capture.
#[derive(Error, Debug)]
pub enum ScreenshotError {
    #[error("failed to read screenshot data: {0}")]
    Readback(#[from] RenderError),
    #[error("expected {expected} bytes of RGBA data, got {actual}")]
    InvalidImageData { expected: usize, actual: usize },
    #[error("failed to save screenshot: {0}")]
    Save(#[from] image::ImageError),
}

/// Write tightly packed RGBA8 pixels to an image file. The format follows
/// the extension.
pub fn save_rgba8(path: impl AsRef<Path>, width: u32, height: u32, data: Vec<u8>) -> Result<(), ScreenshotError> {
    let path = path.as_ref();
    let expected = width as usize * height as usize * 4;
    let actual = data.len();
    let image = ImageBuffer::<Rgba<u8>, _>::from_raw(width, height, data)
        .ok_or(ScreenshotError::InvalidImageData { expected, actual })?;
    image.save(path)?;
    tracing::info!(path = %path.display(), width, height, "screenshot saved");
    Ok(())
}

/// Copy mip 0 of a 2D texture into CPU memory, rows tightly packed.
///
/// Blocks until the GPU has finished all submitted work.
pub fn read_texture(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    texture: &wgpu::Texture,
    bytes_per_texel: u32,
) -> Result<Vec<u8>, RenderError> {
    let width = texture.width();
    let height = texture.height();
    let row = width * bytes_per_texel;
    let padded_row = row.div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT) * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;

    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("texture readback"),
        size: u64::from(padded_row) * u64::from(height),
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("texture readback"),
    });
    encoder.copy_texture_to_buffer(
        wgpu::ImageCopyTexture {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::ImageCopyBuffer {
            buffer: &staging,
            layout: wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(padded_row),
                rows_per_image: Some(height),
            },
        },
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );
    queue.submit(Some(encoder.finish()));

    let (tx, rx) = std::sync::mpsc::channel();
    staging
        .slice(..)
        .map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
    device.poll(wgpu::Maintain::Wait);
    rx.recv()
        .map_err(|e| RenderError::MapAsyncFailure(e.to_string()))?
        .map_err(|e| RenderError::MapAsyncFailure(e.to_string()))?;

    let mut pixels = Vec::with_capacity((row * height) as usize);
    {
        let view = staging.slice(..).get_mapped_range();
        for chunk in view.chunks(padded_row as usize) {
            pixels.extend_from_slice(&chunk[..row as usize]);
        }
    }
    staging.unmap();
    Ok(pixels)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_mixed_indices() {
        assert_eq!(parse_frame_indices("0,5-7, 10"), BTreeSet::from([0, 5, 6, 7, 10]));
        assert_eq!(parse_frame_indices("x,3"), BTreeSet::from([3]));
    }

    #[test]
    fn output_path_substitutes_frame() {
        let config = ScreenshotConfig::new("frame_{}.png").with_frames([2]);
        assert_eq!(config.output_path(42), PathBuf::from("frame_42.png"));
        assert!(config.should_capture(2));
        assert!(!config.should_capture(3));
    }

    #[test]
    fn short_pixel_data_is_rejected() {
        let path = std::env::temp_dir().join("strata_short_screenshot.png");
        let err = save_rgba8(&path, 2, 2, vec![0; 8]).unwrap_err();
        assert!(matches!(err, ScreenshotError::InvalidImageData { expected: 16, actual: 8 }));
    }

    #[test]
    fn saves_png() {
        let path = std::env::temp_dir().join("strata_screenshot_test.png");
        save_rgba8(&path, 2, 1, vec![255, 0, 0, 255, 0, 255, 0, 255]).unwrap();
        let image = image::open(&path).unwrap().to_rgba8();
        assert_eq!(image.dimensions(), (2, 1));
        assert_eq!(image.get_pixel(1, 0).0, [0, 255, 0, 255]);
        let _ = std::fs::remove_file(path);
    }
}
