//! WebGPU device layer for the Strata renderer.
//!
//! This crate provides:
//! - Adapter, device and queue management
//! - GPU capability detection
//! - Buffer and texture ownership with generation tracking
//! - Geometric buffer growth with a safety ceiling
//! - Deferred resource deletion
//! - Bind group layout and pipeline helpers

pub mod capabilities;
pub mod context;
pub mod deferred;
pub mod descriptors;
pub mod error;
pub mod memory;
pub mod pipeline;

pub use capabilities::{GpuCapabilities, GpuVendor};
pub use context::{GpuContext, GpuContextBuilder};
pub use deferred::{DeferredDeletionQueue, Release};
pub use descriptors::BindGroupLayoutBuilder;
pub use error::{GpuError, Result};
pub use memory::{grown_size, GpuBuffer, GpuTexture, TextureDesc};
pub use pipeline::{
    create_compute_pipeline, create_render_pipeline, create_shader_module, RenderPipelineConfig,
};
