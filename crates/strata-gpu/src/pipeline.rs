//! Pipeline creation.
//!
//! Shader modules and pipelines are created inside a validation error scope
//! so that WGSL or layout mismatches surface as [`GpuError`]s instead of
//! uncaptured device errors.

use std::borrow::Cow;
use std::collections::HashMap;

use crate::error::{GpuError, Result};

fn pop_scope(device: &wgpu::Device) -> Option<wgpu::Error> {
    pollster::block_on(device.pop_error_scope())
}

/// Compile a WGSL module.
pub fn create_shader_module(device: &wgpu::Device, label: &str, source: &str) -> Result<wgpu::ShaderModule> {
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(source)),
    });
    match pop_scope(device) {
        Some(error) => Err(GpuError::ShaderCompilation(format!("{label}: {error}"))),
        None => Ok(module),
    }
}

/// Create a compute pipeline from WGSL with the given bind group layouts.
#[cfg_attr(
    feature = "profiling-tracy",
    tracing::instrument(level = "trace", skip_all)
)]
pub fn create_compute_pipeline(
    device: &wgpu::Device,
    label: &str,
    source: &str,
    entry_point: &str,
    bind_group_layouts: &[&wgpu::BindGroupLayout],
) -> Result<wgpu::ComputePipeline> {
    let module = create_shader_module(device, label, source)?;

    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(label),
        bind_group_layouts,
        push_constant_ranges: &[],
    });
    let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(label),
        layout: Some(&layout),
        module: &module,
        entry_point: Some(entry_point),
        compilation_options: wgpu::PipelineCompilationOptions::default(),
        cache: None,
    });
    if let Some(error) = pop_scope(device) {
        return Err(GpuError::PipelineCreation(format!("{label}: {error}")));
    }

    tracing::debug!(pipeline = label, "created compute pipeline");
    Ok(pipeline)
}

/// Render pipeline configuration.
pub struct RenderPipelineConfig<'a> {
    pub label: &'a str,
    pub source: &'a str,
    pub vertex_entry: &'a str,
    pub fragment_entry: &'a str,
    pub vertex_buffers: &'a [wgpu::VertexBufferLayout<'a>],
    pub topology: wgpu::PrimitiveTopology,
    pub targets: &'a [Option<wgpu::ColorTargetState>],
    /// Values for `override` declarations, applied to both stages.
    pub constants: &'a [(&'a str, f64)],
}

impl<'a> RenderPipelineConfig<'a> {
    /// Fullscreen triangle with no vertex buffers.
    pub fn fullscreen(label: &'a str, source: &'a str, targets: &'a [Option<wgpu::ColorTargetState>]) -> Self {
        Self {
            label,
            source,
            vertex_entry: "vs_main",
            fragment_entry: "fs_main",
            vertex_buffers: &[],
            topology: wgpu::PrimitiveTopology::TriangleList,
            targets,
            constants: &[],
        }
    }
}

/// Create a render pipeline without depth testing.
#[cfg_attr(
    feature = "profiling-tracy",
    tracing::instrument(level = "trace", skip_all)
)]
pub fn create_render_pipeline(
    device: &wgpu::Device,
    config: &RenderPipelineConfig<'_>,
    bind_group_layouts: &[&wgpu::BindGroupLayout],
) -> Result<wgpu::RenderPipeline> {
    let module = create_shader_module(device, config.label, config.source)?;
    let constants: HashMap<String, f64> = config
        .constants
        .iter()
        .map(|&(name, value)| (name.to_string(), value))
        .collect();
    let options = || wgpu::PipelineCompilationOptions {
        constants: &constants,
        ..Default::default()
    };

    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(config.label),
        bind_group_layouts,
        push_constant_ranges: &[],
    });
    let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(config.label),
        layout: Some(&layout),
        vertex: wgpu::VertexState {
            module: &module,
            entry_point: Some(config.vertex_entry),
            compilation_options: options(),
            buffers: config.vertex_buffers,
        },
        primitive: wgpu::PrimitiveState {
            topology: config.topology,
            cull_mode: None,
            ..Default::default()
        },
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        fragment: Some(wgpu::FragmentState {
            module: &module,
            entry_point: Some(config.fragment_entry),
            compilation_options: options(),
            targets: config.targets,
        }),
        multiview: None,
        cache: None,
    });
    if let Some(error) = pop_scope(device) {
        return Err(GpuError::PipelineCreation(format!("{}: {error}", config.label)));
    }

    tracing::debug!(pipeline = config.label, "created render pipeline");
    Ok(pipeline)
}
