//! Test harness for headless rendering and visual regression testing.
//!
//! This module provides infrastructure for testing the rendering pipeline
//! without a display, using visual regression tests to verify correctness.

use glam::Vec3;
use image::{ImageBuffer, Rgba};
use std::path::Path;

use strata_gpu::{GpuContext, GpuContextBuilder};
use strata_render::screenshot::read_texture;
use strata_render::{Camera, FrameReport, HiZSnapshot, ReadTarget, Renderer, RendererConfig};
use strata_world::Scene;

use crate::{Result, TestError, VisualTestConfig};

/// Headless renderer for testing.
///
/// Owns a GPU context and a renderer drawing into an off-screen RGBA8 target.
pub struct HeadlessRenderer {
    context: GpuContext,
    renderer: Renderer,
    width: u32,
    height: u32,
}

impl HeadlessRenderer {
    /// Create a new headless renderer with the default configuration.
    pub fn new(width: u32, height: u32) -> Result<Self> {
        Self::with_config(width, height, RendererConfig::default())
    }

    /// Create a headless renderer with a custom configuration.
    pub fn with_config(width: u32, height: u32, config: RendererConfig) -> Result<Self> {
        let context = GpuContextBuilder::new()
            .app_name("strata-test")
            .build(config.atlas_side_voxels())
            .map_err(|e| TestError::Gpu(e.to_string()))?;
        let renderer = Renderer::new(&context, config, width, height, wgpu::TextureFormat::Rgba8Unorm)?;

        Ok(Self {
            context,
            renderer,
            width,
            height,
        })
    }

    /// Render one frame of `scene`.
    pub fn render(&mut self, scene: &mut Scene, camera: &Camera) -> Result<FrameReport> {
        let report = self.renderer.render_frame(scene, camera)?;
        if let Some(error) = self.context.take_uncaptured_error() {
            return Err(TestError::Gpu(error));
        }
        Ok(report)
    }

    /// Render one frame and read the final image back.
    pub fn render_image(&mut self, scene: &mut Scene, camera: &Camera) -> Result<ImageBuffer<Rgba<u8>, Vec<u8>>> {
        self.render(scene, camera)?;
        self.read_image()
    }

    /// The most recently rendered image.
    pub fn read_image(&self) -> Result<ImageBuffer<Rgba<u8>, Vec<u8>>> {
        let data = self.renderer.read_output_rgba8()?;
        ImageBuffer::from_raw(self.width, self.height, data)
            .ok_or_else(|| TestError::Gpu("Failed to create image from raw data".to_string()))
    }

    /// Ray distance per pixel from the G-Buffer depth target.
    pub fn read_depth(&self) -> Result<Vec<f32>> {
        let bytes = self.renderer.read_target(ReadTarget::Depth)?;
        Ok(bytes
            .chunks_exact(16)
            .map(|texel| f32::from_le_bytes([texel[0], texel[1], texel[2], texel[3]]))
            .collect())
    }

    /// Level 0 of the Hi-Z pyramid, row major.
    pub fn read_hiz_level0(&self) -> Result<Vec<f32>> {
        let bytes = read_texture(
            self.context.device(),
            self.context.queue(),
            self.renderer.targets().hiz.texture(),
            4,
        )?;
        Ok(bytes
            .chunks_exact(4)
            .map(|texel| f32::from_le_bytes([texel[0], texel[1], texel[2], texel[3]]))
            .collect())
    }

    pub fn read_target(&self, target: ReadTarget) -> Result<Vec<u8>> {
        Ok(self.renderer.read_target(target)?)
    }

    /// Newest Hi-Z snapshot after waiting for the GPU.
    pub fn readback_hiz(&mut self) -> HiZSnapshot {
        self.renderer.wait_idle();
        self.renderer.readback_hiz()
    }

    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        self.renderer.resize(width, height)?;
        self.width = self.renderer.targets().width();
        self.height = self.renderer.targets().height();
        Ok(())
    }

    pub fn renderer(&self) -> &Renderer {
        &self.renderer
    }

    pub fn renderer_mut(&mut self) -> &mut Renderer {
        &mut self.renderer
    }

    /// Get the output dimensions.
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

impl Drop for HeadlessRenderer {
    fn drop(&mut self) {
        self.renderer.wait_idle();
    }
}

/// Visual regression test runner.
///
/// Compares rendered images against baseline images and reports differences.
pub struct VisualRegressionTest {
    config: VisualTestConfig,
    renderer: HeadlessRenderer,
}

impl VisualRegressionTest {
    /// Create a new visual regression test runner.
    pub fn new(config: VisualTestConfig) -> Result<Self> {
        let renderer = HeadlessRenderer::new(256, 256)?;
        Ok(Self { config, renderer })
    }

    /// Create with custom dimensions.
    pub fn with_dimensions(config: VisualTestConfig, width: u32, height: u32) -> Result<Self> {
        let renderer = HeadlessRenderer::new(width, height)?;
        Ok(Self { config, renderer })
    }

    /// Render `scene` for `frames` frames and compare the last one.
    ///
    /// Several frames let budgeted voxel uploads settle first.
    pub fn run_test(&mut self, name: &str, scene: &mut Scene, camera: &Camera, frames: u32) -> Result<()> {
        for _ in 1..frames.max(1) {
            self.renderer.render(scene, camera)?;
        }
        let image = self.renderer.render_image(scene, camera)?;
        self.compare_and_save(name, &image)
    }

    fn compare_and_save(&self, name: &str, image: &ImageBuffer<Rgba<u8>, Vec<u8>>) -> Result<()> {
        std::fs::create_dir_all(&self.config.baseline_dir)?;
        std::fs::create_dir_all(&self.config.output_dir)?;

        let baseline_path = format!("{}/{}.png", self.config.baseline_dir, name);
        let output_path = format!("{}/{}.png", self.config.output_dir, name);

        image.save(&output_path)?;

        if Path::new(&baseline_path).exists() {
            let baseline = image::open(&baseline_path)?.to_rgba8();

            let diff = compare_images(&baseline, image)?;
            if diff > self.config.threshold {
                let diff_path = format!("{}/{}_diff.png", self.config.output_dir, name);
                create_diff_image(&baseline, image).save(&diff_path)?;

                return Err(TestError::ImageComparison(format!(
                    "Image difference {:.4} exceeds threshold {:.4} (see {})",
                    diff, self.config.threshold, diff_path
                )));
            }
        } else {
            image.save(&baseline_path)?;
            tracing::info!("Created new baseline: {}", baseline_path);
        }

        Ok(())
    }
}

/// Normalized RGB difference of two images (0.0-1.0).
pub fn compare_images(a: &ImageBuffer<Rgba<u8>, Vec<u8>>, b: &ImageBuffer<Rgba<u8>, Vec<u8>>) -> Result<f64> {
    if a.dimensions() != b.dimensions() {
        return Err(TestError::ImageComparison(format!(
            "Image dimensions don't match: {:?} vs {:?}",
            a.dimensions(),
            b.dimensions()
        )));
    }

    let total_diff: u64 = a
        .pixels()
        .zip(b.pixels())
        .map(|(pa, pb)| {
            (0..3)
                .map(|c| u64::from(pa[c].abs_diff(pb[c])))
                .sum::<u64>()
        })
        .sum();

    let max_diff = (u64::from(a.width()) * u64::from(a.height()) * 3 * 255) as f64;
    Ok(total_diff as f64 / max_diff)
}

/// Differences above a small tolerance in red, the baseline dimmed elsewhere.
pub fn create_diff_image(
    a: &ImageBuffer<Rgba<u8>, Vec<u8>>,
    b: &ImageBuffer<Rgba<u8>, Vec<u8>>,
) -> ImageBuffer<Rgba<u8>, Vec<u8>> {
    let (width, height) = a.dimensions();
    let mut diff = ImageBuffer::new(width, height);

    for (x, y, pixel) in diff.enumerate_pixels_mut() {
        let pa = a.get_pixel(x, y);
        let pb = b.get_pixel(x, y);
        let max_diff = (0..3).map(|c| pa[c].abs_diff(pb[c])).max().unwrap_or(0);
        *pixel = if max_diff > 10 {
            Rgba([255, 0, 0, 255])
        } else {
            Rgba([pa[0] / 2, pa[1] / 2, pa[2] / 2, 255])
        };
    }

    diff
}

/// A square-aspect camera on the +Z axis looking at the origin.
pub fn create_test_camera(distance: f32) -> Camera {
    Camera {
        position: Vec3::new(0.0, 0.0, distance),
        direction: Vec3::NEG_Z,
        up: Vec3::Y,
        fov: std::f32::consts::FRAC_PI_4,
        aspect: 1.0,
        near: 0.1,
        far: 1000.0,
    }
}
