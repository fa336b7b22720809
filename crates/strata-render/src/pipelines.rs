//! Bind group layouts and pipelines for every pass.
//!
//! Groups are layered the same way in every raymarching pass: group 0 is the
//! scene (camera, instances, BVH, lights), group 1 the pass-specific inputs
//! and outputs, group 2 the voxel data.

use strata_gpu::{
    create_compute_pipeline, create_render_pipeline, BindGroupLayoutBuilder, RenderPipelineConfig,
};
use strata_shaders::TRANSPARENCY_POWER_CONSTANT;

use crate::config::RendererConfig;
use crate::error::{RenderError, Result};
use crate::gizmo::{vertex_layout, GizmoInstance};
use crate::targets::{
    DEPTH_FORMAT, HIZ_FORMAT, INTERMEDIATE_FORMAT, MATERIAL_FORMAT, NORMAL_FORMAT, POSITION_FORMAT,
    SHADOW_FORMAT,
};
use crate::transparency::accumulation_targets;

const COMPUTE: wgpu::ShaderStages = wgpu::ShaderStages::COMPUTE;
const FRAGMENT: wgpu::ShaderStages = wgpu::ShaderStages::FRAGMENT;
const ALL_STAGES: wgpu::ShaderStages = wgpu::ShaderStages::COMPUTE
    .union(wgpu::ShaderStages::VERTEX)
    .union(wgpu::ShaderStages::FRAGMENT);
const RASTER: wgpu::ShaderStages = wgpu::ShaderStages::VERTEX.union(wgpu::ShaderStages::FRAGMENT);

/// Layouts shared between pipelines and the bind group cache.
pub struct Layouts {
    pub scene: wgpu::BindGroupLayout,
    pub voxel: wgpu::BindGroupLayout,
    pub gbuffer_out: wgpu::BindGroupLayout,
    pub shadow_out: wgpu::BindGroupLayout,
    pub lighting_io: wgpu::BindGroupLayout,
    pub debug_out: wgpu::BindGroupLayout,
    pub overlay_in: wgpu::BindGroupLayout,
    pub particles_in: wgpu::BindGroupLayout,
    pub hiz: wgpu::BindGroupLayout,
    pub blit: wgpu::BindGroupLayout,
    pub resolve: wgpu::BindGroupLayout,
    pub gizmo: wgpu::BindGroupLayout,
}

impl Layouts {
    pub fn new(device: &wgpu::Device) -> Self {
        let scene = BindGroupLayoutBuilder::new("scene")
            .uniform_buffer(0, ALL_STAGES)
            .storage_buffer(1, ALL_STAGES, true)
            .storage_buffer(2, ALL_STAGES, true)
            .storage_buffer(3, ALL_STAGES, true)
            .build(device);

        let voxel = BindGroupLayoutBuilder::new("voxel")
            .storage_buffer(0, ALL_STAGES, true)
            .storage_buffer(1, ALL_STAGES, true)
            .texture(
                2,
                ALL_STAGES,
                wgpu::TextureSampleType::Uint,
                wgpu::TextureViewDimension::D3,
            )
            .storage_buffer(3, ALL_STAGES, true)
            .storage_buffer(4, ALL_STAGES, true)
            .storage_buffer(5, ALL_STAGES, true)
            .storage_buffer(6, ALL_STAGES, true)
            .storage_buffer(7, ALL_STAGES, true)
            .build(device);

        let gbuffer_out = BindGroupLayoutBuilder::new("gbuffer_out")
            .storage_texture(0, COMPUTE, DEPTH_FORMAT, wgpu::TextureViewDimension::D2)
            .storage_texture(1, COMPUTE, NORMAL_FORMAT, wgpu::TextureViewDimension::D2)
            .storage_texture(2, COMPUTE, MATERIAL_FORMAT, wgpu::TextureViewDimension::D2)
            .storage_texture(3, COMPUTE, POSITION_FORMAT, wgpu::TextureViewDimension::D2)
            .build(device);

        let shadow_out = BindGroupLayoutBuilder::new("shadow_out")
            .storage_texture(0, COMPUTE, SHADOW_FORMAT, wgpu::TextureViewDimension::D2Array)
            .storage_buffer(1, COMPUTE, true)
            .build(device);

        let lighting_io = BindGroupLayoutBuilder::new("lighting_io")
            .float_texture_2d(0, COMPUTE)
            .float_texture_2d(1, COMPUTE)
            .float_texture_2d(2, COMPUTE)
            .float_texture_2d(3, COMPUTE)
            .texture(
                4,
                COMPUTE,
                wgpu::TextureSampleType::Float { filterable: false },
                wgpu::TextureViewDimension::D2Array,
            )
            .storage_texture(5, COMPUTE, INTERMEDIATE_FORMAT, wgpu::TextureViewDimension::D2)
            .build(device);

        let debug_out = BindGroupLayoutBuilder::new("debug_out")
            .storage_texture(0, COMPUTE, INTERMEDIATE_FORMAT, wgpu::TextureViewDimension::D2)
            .build(device);

        let overlay_in = BindGroupLayoutBuilder::new("overlay_in")
            .float_texture_2d(0, FRAGMENT)
            .build(device);

        let particles_in = BindGroupLayoutBuilder::new("particles_in")
            .float_texture_2d(0, FRAGMENT)
            .storage_buffer(1, RASTER, true)
            .build(device);

        let hiz = BindGroupLayoutBuilder::new("hiz")
            .float_texture_2d(0, COMPUTE)
            .storage_texture(1, COMPUTE, HIZ_FORMAT, wgpu::TextureViewDimension::D2)
            .build(device);

        let blit = BindGroupLayoutBuilder::new("blit")
            .float_texture_2d(0, FRAGMENT)
            .build(device);

        let resolve = BindGroupLayoutBuilder::new("resolve")
            .float_texture_2d(0, FRAGMENT)
            .float_texture_2d(1, FRAGMENT)
            .float_texture_2d(2, FRAGMENT)
            .build(device);

        let gizmo = BindGroupLayoutBuilder::new("gizmo")
            .uniform_buffer(0, wgpu::ShaderStages::VERTEX)
            .build(device);

        Self {
            scene,
            voxel,
            gbuffer_out,
            shadow_out,
            lighting_io,
            debug_out,
            overlay_in,
            particles_in,
            hiz,
            blit,
            resolve,
            gizmo,
        }
    }
}

/// Every pipeline of the frame graph.
pub struct Pipelines {
    pub layouts: Layouts,
    pub gbuffer: wgpu::ComputePipeline,
    pub shadow: wgpu::ComputePipeline,
    pub lighting: wgpu::ComputePipeline,
    pub debug: wgpu::ComputePipeline,
    pub hiz: wgpu::ComputePipeline,
    pub blit: wgpu::RenderPipeline,
    pub overlay: wgpu::RenderPipeline,
    pub particles: wgpu::RenderPipeline,
    pub resolve: wgpu::RenderPipeline,
    pub gizmo: wgpu::RenderPipeline,
    output_format: wgpu::TextureFormat,
}

fn pipeline_error(error: strata_gpu::GpuError) -> RenderError {
    match RenderError::from_gpu(error) {
        RenderError::Gpu(other) => RenderError::PipelineCreation(other.to_string()),
        mapped => mapped,
    }
}

impl Pipelines {
    /// Build every pipeline. Any failure is fatal.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn new(
        device: &wgpu::Device,
        config: &RendererConfig,
        output_format: wgpu::TextureFormat,
    ) -> Result<Self> {
        let layouts = Layouts::new(device);
        let l = &layouts;

        let compute = |label: &str, source: &str, groups: &[&wgpu::BindGroupLayout]| {
            create_compute_pipeline(device, label, source, "main", groups).map_err(pipeline_error)
        };

        let gbuffer = compute(
            "gbuffer",
            strata_shaders::gbuffer_wgsl(),
            &[&l.scene, &l.gbuffer_out, &l.voxel],
        )?;
        let shadow = compute(
            "shadow",
            strata_shaders::shadow_wgsl(),
            &[&l.scene, &l.shadow_out, &l.voxel],
        )?;
        let lighting = compute(
            "lighting",
            strata_shaders::lighting_wgsl(),
            &[&l.scene, &l.lighting_io, &l.voxel],
        )?;
        let debug = compute("debug", strata_shaders::debug_wgsl(), &[&l.scene, &l.debug_out])?;
        let hiz = compute("hiz", strata_shaders::hiz_wgsl(), &[&l.hiz])?;

        let opaque_target = [Some(wgpu::ColorTargetState {
            format: output_format,
            blend: None,
            write_mask: wgpu::ColorWrites::ALL,
        })];
        let blit = create_render_pipeline(
            device,
            &RenderPipelineConfig::fullscreen("blit", strata_shaders::blit_wgsl(), &opaque_target),
            &[&l.blit],
        )
        .map_err(pipeline_error)?;
        let resolve = create_render_pipeline(
            device,
            &RenderPipelineConfig::fullscreen("resolve", strata_shaders::resolve_wgsl(), &opaque_target),
            &[&l.resolve],
        )
        .map_err(pipeline_error)?;

        let oit_targets = accumulation_targets();
        let power = [(TRANSPARENCY_POWER_CONSTANT, f64::from(config.transparency_power))];
        let overlay = create_render_pipeline(
            device,
            &RenderPipelineConfig {
                constants: &power,
                ..RenderPipelineConfig::fullscreen("overlay", strata_shaders::overlay_wgsl(), &oit_targets)
            },
            &[&l.scene, &l.overlay_in, &l.voxel],
        )
        .map_err(pipeline_error)?;
        let particles = create_render_pipeline(
            device,
            &RenderPipelineConfig {
                constants: &power,
                ..RenderPipelineConfig::fullscreen("particles", strata_shaders::particles_wgsl(), &oit_targets)
            },
            &[&l.scene, &l.particles_in],
        )
        .map_err(pipeline_error)?;

        let gizmo_target = [Some(wgpu::ColorTargetState {
            format: output_format,
            blend: Some(wgpu::BlendState::ALPHA_BLENDING),
            write_mask: wgpu::ColorWrites::ALL,
        })];
        let gizmo_buffers = [vertex_layout(), GizmoInstance::layout()];
        let gizmo = create_render_pipeline(
            device,
            &RenderPipelineConfig {
                label: "gizmo",
                source: strata_shaders::gizmo_wgsl(),
                vertex_entry: "vs_main",
                fragment_entry: "fs_main",
                vertex_buffers: &gizmo_buffers,
                topology: wgpu::PrimitiveTopology::LineList,
                targets: &gizmo_target,
                constants: &[],
            },
            &[&l.gizmo],
        )
        .map_err(pipeline_error)?;

        tracing::info!(?output_format, "created frame graph pipelines");

        Ok(Self {
            layouts,
            gbuffer,
            shadow,
            lighting,
            debug,
            hiz,
            blit,
            overlay,
            particles,
            resolve,
            gizmo,
            output_format,
        })
    }

    pub const fn output_format(&self) -> wgpu::TextureFormat {
        self.output_format
    }
}
