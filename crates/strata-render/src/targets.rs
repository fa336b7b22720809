//! Screen-sized render targets, the Hi-Z pyramid and the shadow map array.

use strata_gpu::{GpuTexture, TextureDesc};

use crate::config::RendererConfig;
use crate::error::{RenderError, Result};

pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba32Float;
pub const NORMAL_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;
pub const MATERIAL_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba32Float;
pub const POSITION_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba32Float;
pub const INTERMEDIATE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
pub const ACCUM_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;
pub const WEIGHT_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R16Float;
pub const HIZ_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R32Float;
pub const SHADOW_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba32Float;

/// Mip sizes of the Hi-Z pyramid for a `width`x`height` depth target.
///
/// Level 0 is half the depth resolution (rounded up). Later levels follow the
/// texture mip chain, halving with truncation down to 1x1.
pub fn hiz_mip_sizes(width: u32, height: u32) -> Vec<(u32, u32)> {
    let (w, h) = (width.max(1).div_ceil(2), height.max(1).div_ceil(2));
    let levels = u32::BITS - w.max(h).leading_zeros();
    (0..levels).map(|k| ((w >> k).max(1), (h >> k).max(1))).collect()
}

/// The first level whose larger edge is at most `max_dim`.
pub fn readback_level(sizes: &[(u32, u32)], max_dim: u32) -> u32 {
    sizes
        .iter()
        .position(|&(w, h)| w.max(h) <= max_dim)
        .unwrap_or(sizes.len().saturating_sub(1)) as u32
}

/// G-Buffer attachments written by the primary raymarch.
pub struct GBuffer {
    pub depth: GpuTexture,
    pub normal: GpuTexture,
    pub material: GpuTexture,
    pub position: GpuTexture,
}

/// Every target whose size follows the output extent.
pub struct RenderTargets {
    width: u32,
    height: u32,
    output_format: wgpu::TextureFormat,
    pub gbuffer: GBuffer,
    /// Lit opaque image written by the lighting and debug passes.
    pub intermediate: GpuTexture,
    /// Opaque layer the blit copies the intermediate into.
    pub opaque: GpuTexture,
    pub accum: GpuTexture,
    pub weight: GpuTexture,
    /// Final composed image.
    pub output: GpuTexture,
    pub hiz: GpuTexture,
    hiz_sizes: Vec<(u32, u32)>,
}

fn create(device: &wgpu::Device, desc: &TextureDesc<'_>) -> Result<GpuTexture> {
    GpuTexture::new(device, desc).map_err(|e| RenderError::ResourceCreation(e.to_string()))
}

impl RenderTargets {
    pub fn new(
        device: &wgpu::Device,
        width: u32,
        height: u32,
        output_format: wgpu::TextureFormat,
    ) -> Result<Self> {
        let width = width.max(1);
        let height = height.max(1);
        let storage = wgpu::TextureUsages::STORAGE_BINDING
            | wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_SRC;
        let attachment = wgpu::TextureUsages::RENDER_ATTACHMENT
            | wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_SRC;

        let gbuffer = GBuffer {
            depth: create(device, &TextureDesc::d2("gbuffer_depth", width, height, DEPTH_FORMAT, storage))?,
            normal: create(device, &TextureDesc::d2("gbuffer_normal", width, height, NORMAL_FORMAT, storage))?,
            material: create(
                device,
                &TextureDesc::d2("gbuffer_material", width, height, MATERIAL_FORMAT, storage),
            )?,
            position: create(
                device,
                &TextureDesc::d2("gbuffer_position", width, height, POSITION_FORMAT, storage),
            )?,
        };

        let hiz_sizes = hiz_mip_sizes(width, height);
        let (hiz_w, hiz_h) = hiz_sizes[0];
        let hiz = create(
            device,
            &TextureDesc {
                mip_level_count: hiz_sizes.len() as u32,
                ..TextureDesc::d2("hiz", hiz_w, hiz_h, HIZ_FORMAT, storage)
            },
        )?;

        tracing::info!(width, height, hiz_levels = hiz_sizes.len(), "created render targets");

        Ok(Self {
            width,
            height,
            output_format,
            gbuffer,
            intermediate: create(
                device,
                &TextureDesc::d2("intermediate", width, height, INTERMEDIATE_FORMAT, storage),
            )?,
            opaque: create(device, &TextureDesc::d2("opaque", width, height, output_format, attachment))?,
            accum: create(device, &TextureDesc::d2("wboit_accum", width, height, ACCUM_FORMAT, attachment))?,
            weight: create(
                device,
                &TextureDesc::d2("wboit_weight", width, height, WEIGHT_FORMAT, attachment),
            )?,
            output: create(device, &TextureDesc::d2("output", width, height, output_format, attachment))?,
            hiz,
            hiz_sizes,
        })
    }

    pub const fn width(&self) -> u32 {
        self.width
    }

    pub const fn height(&self) -> u32 {
        self.height
    }

    pub const fn output_format(&self) -> wgpu::TextureFormat {
        self.output_format
    }

    pub fn hiz_sizes(&self) -> &[(u32, u32)] {
        &self.hiz_sizes
    }
}

/// One RGBA32F layer per shadowed light.
pub struct ShadowMaps {
    pub texture: GpuTexture,
    size: u32,
    layers: u32,
}

impl ShadowMaps {
    pub fn new(device: &wgpu::Device, config: &RendererConfig) -> Result<Self> {
        let size = config.shadow_map_size;
        let layers = config.max_shadow_layers;
        let texture = create(
            device,
            &TextureDesc {
                label: "shadow_maps",
                size: wgpu::Extent3d {
                    width: size,
                    height: size,
                    depth_or_array_layers: layers,
                },
                mip_level_count: 1,
                dimension: wgpu::TextureDimension::D2,
                view_dimension: wgpu::TextureViewDimension::D2Array,
                format: SHADOW_FORMAT,
                usage: wgpu::TextureUsages::STORAGE_BINDING | wgpu::TextureUsages::TEXTURE_BINDING,
            },
        )?;
        Ok(Self {
            texture,
            size,
            layers,
        })
    }

    pub const fn size(&self) -> u32 {
        self.size
    }

    pub const fn layers(&self) -> u32 {
        self.layers
    }
}
